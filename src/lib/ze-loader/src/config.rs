//! Loader configuration, read once from the environment.

use std::path::PathBuf;

use tracing::debug;

use crate::sort::{DriverOrderSpec, DriverSorter, SortDescriptor};

/// Driver libraries tried when no alternate list is configured.
pub const KNOWN_DRIVERS: &[&str] = &["libze_intel_gpu.so.1", "libze_intel_vpu.so.1"];

pub const NULL_DRIVER: &str = "libze_null.so.1";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Build loader-owned tables even when only one driver is usable.
    pub force_intercept: bool,
    pub validation_layer: bool,
    /// Load the tracing layer. Tracing starts enabled when set.
    pub tracing_layer: bool,
    pub null_driver: bool,
    /// Replaces [KNOWN_DRIVERS] when non-empty.
    pub alt_drivers: Vec<String>,
    pub library_path: Option<PathBuf>,
    pub drivers_order: Vec<DriverOrderSpec>,
    pub pci_order: bool,
    pub debug_trace: bool,
}

/// Unset or "0" is false; anything else is true.
fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| v != "0")
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let config = Self {
            force_intercept: flag(lookup("ZE_ENABLE_LOADER_INTERCEPT")),
            validation_layer: flag(lookup("ZE_ENABLE_VALIDATION_LAYER")),
            tracing_layer: flag(lookup("ZE_ENABLE_TRACING_LAYER")),
            null_driver: flag(lookup("ZE_ENABLE_NULL_DRIVER")),
            alt_drivers: lookup("ZE_ENABLE_ALT_DRIVERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            library_path: lookup("ZEL_LIBRARY_PATH")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            drivers_order: lookup("ZEL_DRIVERS_ORDER")
                .map(|v| DriverOrderSpec::parse_list(&v))
                .unwrap_or_default(),
            pci_order: flag(lookup("ZE_ENABLE_PCI_ID_DEVICE_ORDER")),
            debug_trace: flag(lookup("ZE_ENABLE_LOADER_DEBUG_TRACE")),
        };
        debug!("loader config: {:?}", config);
        config
    }

    /// Driver library names to open, in discovery order.
    pub fn driver_libraries(&self) -> Vec<String> {
        let base = if self.alt_drivers.is_empty() {
            KNOWN_DRIVERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.alt_drivers.clone()
        };
        self.null_driver
            .then(|| NULL_DRIVER.to_string())
            .into_iter()
            .chain(base)
            .collect()
    }

    pub fn sorter(&self) -> DriverSorter {
        DriverSorter::new(
            self.pci_order.then_some(SortDescriptor::ByPciId),
            self.drivers_order.clone(),
        )
    }
}
