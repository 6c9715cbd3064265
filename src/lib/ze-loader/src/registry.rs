//! The driver registry: discovered drivers, their per-subsystem status, and the core and sysman
//! partitions.

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

use itertools::Itertools;
use once_cell::sync::OnceCell;
use tracing::trace;

use crate::{
    ddi::DriverDdi,
    library::{DriverLibrary, LibraryId},
    version::ApiVersion,
    ZeResult,
};

/// Declared kind of a driver. Only used for ordering and for type-filtered initialization.
///
/// The parse form is the one accepted by the driver ordering variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, strum_macros::EnumString)]
pub enum DriverType {
    #[strum(serialize = "DISCRETE_GPU_ONLY")]
    DiscreteGpu,
    #[strum(serialize = "GPU")]
    Gpu,
    #[strum(serialize = "INTEGRATED_GPU_ONLY")]
    IntegratedGpu,
    #[strum(serialize = "NPU")]
    Npu,
    #[strum(disabled)]
    Mixed,
    #[strum(disabled)]
    Other,
    #[default]
    #[strum(disabled)]
    Unknown,
}

impl DriverType {
    /// Default ordering rank. Lower sorts first; unknown sorts last.
    pub fn priority(self) -> u8 {
        match self {
            DriverType::DiscreteGpu => 0,
            DriverType::Gpu => 1,
            DriverType::IntegratedGpu => 2,
            DriverType::Mixed => 3,
            DriverType::Npu => 4,
            DriverType::Other => 5,
            DriverType::Unknown => 6,
        }
    }

    /// Guess the type of a driver from its library file name.
    pub fn from_library_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("gpu") {
            DriverType::Gpu
        } else if name.contains("npu") || name.contains("vpu") {
            DriverType::Npu
        } else {
            DriverType::Unknown
        }
    }

    /// Whether a type-filtered initialization request selects this driver type.
    pub fn selected_by(self, flags: DriverTypeFlags) -> bool {
        match self {
            DriverType::DiscreteGpu
            | DriverType::Gpu
            | DriverType::IntegratedGpu
            | DriverType::Mixed => flags.contains(DriverTypeFlags::GPU),
            DriverType::Npu => flags.contains(DriverTypeFlags::NPU),
            DriverType::Other => false,
            DriverType::Unknown => !flags.is_empty(),
        }
    }
}

impl Display for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriverType::DiscreteGpu => "discrete-gpu",
            DriverType::Gpu => "gpu",
            DriverType::IntegratedGpu => "integrated-gpu",
            DriverType::Npu => "npu",
            DriverType::Mixed => "mixed",
            DriverType::Other => "other",
            DriverType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

bitflags::bitflags! {
    /// Driver kinds requested by a type-filtered initialization.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DriverTypeFlags: u32 {
        const GPU = 1;
        const NPU = 2;
    }
}

/// An API subsystem. Each has its own partition of the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Core,
    Sysman,
}

impl Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subsystem::Core => write!(f, "core"),
            Subsystem::Sysman => write!(f, "sysman"),
        }
    }
}

bitflags::bitflags! {
    /// The subsystems a driver library implements.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Subsystems: u32 {
        const CORE = 1;
        const SYSMAN = 2;
    }
}

/// Which of a driver's independent status codes to read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Init,
    Sysman,
    DriversExt,
    Ddi,
}

impl From<Subsystem> for StatusKind {
    fn from(value: Subsystem) -> Self {
        match value {
            Subsystem::Core => StatusKind::Init,
            Subsystem::Sysman => StatusKind::Sysman,
        }
    }
}

#[derive(Debug)]
struct StatusCell(AtomicU32);

impl StatusCell {
    fn new(r: ZeResult) -> Self {
        Self(AtomicU32::new(r.0))
    }

    fn get(&self) -> ZeResult {
        ZeResult(self.0.load(Ordering::Acquire))
    }

    fn set(&self, r: ZeResult) {
        self.0.store(r.0, Ordering::Release)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Display for PciAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Properties cached from the driver after first query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DriverProperties {
    pub api_version: Option<ApiVersion>,
    pub pci: Option<PciAddress>,
}

/// One discovered vendor driver.
#[derive(Debug)]
pub struct DriverEntry {
    name: String,
    library: Arc<dyn DriverLibrary>,
    driver_type: DriverType,
    init_status: StatusCell,
    sysman_status: StatusCell,
    drivers_ext_status: StatusCell,
    ddi_status: StatusCell,
    ddi: Arc<DriverDdi>,
    in_use: AtomicBool,
    properties: OnceCell<DriverProperties>,
    pci_order: bool,
}

impl DriverEntry {
    pub fn new(library: Arc<dyn DriverLibrary>) -> Self {
        Self {
            name: library.name().to_string(),
            driver_type: DriverType::from_library_name(library.name()),
            library,
            init_status: StatusCell::new(ZeResult::SUCCESS),
            sysman_status: StatusCell::new(ZeResult::SUCCESS),
            drivers_ext_status: StatusCell::new(ZeResult::SUCCESS),
            ddi_status: StatusCell::new(ZeResult::ERROR_UNINITIALIZED),
            ddi: Arc::new(DriverDdi::default()),
            in_use: AtomicBool::new(false),
            properties: OnceCell::new(),
            pci_order: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, driver_type: DriverType) -> Self {
        self.driver_type = driver_type;
        self
    }

    /// Record that this driver asked to be ordered by PCI address.
    pub fn with_pci_order(mut self, pci_order: bool) -> Self {
        self.pci_order = pci_order;
        self
    }

    pub fn with_properties(self, props: DriverProperties) -> Self {
        let _ = self.properties.set(props);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &Arc<dyn DriverLibrary> {
        &self.library
    }

    pub fn driver_type(&self) -> DriverType {
        self.driver_type
    }

    pub fn requested_pci_order(&self) -> bool {
        self.pci_order
    }

    pub fn ddi(&self) -> &Arc<DriverDdi> {
        &self.ddi
    }

    pub fn properties(&self) -> Option<&DriverProperties> {
        self.properties.get()
    }

    /// Cache properties. The first cached value wins.
    pub fn cache_properties(&self, props: DriverProperties) -> &DriverProperties {
        self.properties.get_or_init(|| props)
    }

    pub fn status(&self, kind: StatusKind) -> ZeResult {
        self.status_cell(kind).get()
    }

    pub fn set_status(&self, kind: StatusKind, result: ZeResult) {
        trace!("{}: {:?} status -> {}", self.name, kind, result);
        self.status_cell(kind).set(result)
    }

    fn status_cell(&self, kind: StatusKind) -> &StatusCell {
        match kind {
            StatusKind::Init => &self.init_status,
            StatusKind::Sysman => &self.sysman_status,
            StatusKind::DriversExt => &self.drivers_ext_status,
            StatusKind::Ddi => &self.ddi_status,
        }
    }

    /// A driver is usable for a subsystem when its general init status and its status for that
    /// subsystem are both success. Unusable drivers are inert.
    pub fn is_usable(&self, subsystem: Subsystem) -> bool {
        self.init_status.get().is_success()
            && (subsystem == Subsystem::Core || self.sysman_status.get().is_success())
    }

    pub fn ddi_initialized(&self) -> bool {
        self.ddi_status.get().is_success()
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn mark_in_use(&self) {
        self.in_use.store(true, Ordering::Release)
    }
}

/// How the loader exposes tables for a partition. Decided once, on the first successful
/// resolution, so that every category of a partition agrees on whether handles are wrapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// The single usable driver's tables are handed out verbatim.
    Direct,
    /// Loader-owned tables forward through wrapped handles.
    Intercept,
}

/// The drivers implementing one subsystem, in discovery order until sorted.
#[derive(Debug)]
pub struct Partition {
    subsystem: Subsystem,
    discovered: Vec<Arc<DriverEntry>>,
    sorted: OnceCell<Vec<Arc<DriverEntry>>>,
    mode: OnceCell<DispatchMode>,
}

impl Partition {
    pub fn new(subsystem: Subsystem) -> Self {
        Self {
            subsystem,
            discovered: vec![],
            sorted: OnceCell::new(),
            mode: OnceCell::new(),
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    pub fn len(&self) -> usize {
        self.discovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty()
    }

    /// The drivers in their current order: sorted once the sort has run, discovery order before.
    pub fn drivers(&self) -> &[Arc<DriverEntry>] {
        self.sorted
            .get()
            .map(Vec::as_slice)
            .unwrap_or(&self.discovered)
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted.get().is_some()
    }

    /// Run `sort` at most once for this partition. Concurrent callers block until the winner has
    /// published the sorted order; later calls return it without running `sort`.
    pub fn sort_once<F>(&self, sort: F) -> &[Arc<DriverEntry>]
    where
        F: FnOnce(&[Arc<DriverEntry>]) -> Vec<Arc<DriverEntry>>,
    {
        self.sorted.get_or_init(|| {
            trace!("sorting {} partition", self.subsystem);
            sort(&self.discovered)
        })
    }

    pub fn usable(&self) -> impl Iterator<Item = &Arc<DriverEntry>> {
        let subsystem = self.subsystem;
        self.drivers()
            .iter()
            .filter(move |d| d.is_usable(subsystem))
    }

    pub fn for_each_usable(&self, mut f: impl FnMut(&Arc<DriverEntry>)) {
        for driver in self.usable() {
            f(driver)
        }
    }

    pub fn dispatch_mode(&self) -> Option<DispatchMode> {
        self.mode.get().copied()
    }

    pub(crate) fn latch_mode(&self, decide: impl FnOnce() -> DispatchMode) -> DispatchMode {
        *self.mode.get_or_init(decide)
    }
}

/// All discovered drivers and their partitions.
#[derive(Debug)]
pub struct DriverRegistry {
    all: Vec<Arc<DriverEntry>>,
    core: Partition,
    sysman: Partition,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            all: vec![],
            core: Partition::new(Subsystem::Core),
            sysman: Partition::new(Subsystem::Sysman),
        }
    }

    /// Append a driver to the registry and to the partition of every subsystem it implements.
    pub fn register(&mut self, entry: DriverEntry, subsystems: Subsystems) -> Arc<DriverEntry> {
        let entry = Arc::new(entry);
        trace!(
            "register driver {} ({}) for {:?}",
            entry.name(),
            entry.driver_type(),
            subsystems
        );
        self.all.push(entry.clone());
        for (flag, partition) in [
            (Subsystems::CORE, &mut self.core),
            (Subsystems::SYSMAN, &mut self.sysman),
        ] {
            if subsystems.contains(flag) {
                partition.discovered.push(entry.clone());
                partition.sorted = OnceCell::new();
            }
        }
        entry
    }

    pub fn all(&self) -> &[Arc<DriverEntry>] {
        &self.all
    }

    pub fn partition(&self, subsystem: Subsystem) -> &Partition {
        match subsystem {
            Subsystem::Core => &self.core,
            Subsystem::Sysman => &self.sysman,
        }
    }

    pub fn driver_count(&self, subsystem: Subsystem) -> usize {
        self.partition(subsystem).len()
    }

    pub fn for_each_usable(&self, subsystem: Subsystem, f: impl FnMut(&Arc<DriverEntry>)) {
        self.partition(subsystem).for_each_usable(f)
    }

    /// Every distinct library backing a registered driver, each exactly once, in first-seen order.
    pub fn unique_libraries(&self) -> Vec<Arc<dyn DriverLibrary>> {
        self.all
            .iter()
            .chain(self.core.drivers())
            .chain(self.sysman.drivers())
            .map(|d| d.library().clone())
            .unique_by(LibraryId::of)
            .collect()
    }
}
