//! The loader context: the registry, the sorter, the loaded layers, and the loader-owned tables,
//! plus the table resolver every exported "get proc addr table" entry runs.

use std::{
    ffi::c_void,
    iter,
    ptr::null_mut,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::{
    config::LoaderConfig,
    ddi::{
        ze::ZeGlobal,
        zes::ZesGlobal,
        DdiCategory, GetTableFn, LoaderTables,
    },
    discovery,
    dispatch::build_table,
    handle::{LoaderHandle, ZeDeviceHandle, ZeDriverHandle},
    layer::{Layer, LayerKind, Layers},
    library::{DriverLibrary, SharedLibrary},
    log,
    registry::{
        DispatchMode, DriverEntry, DriverRegistry, DriverTypeFlags, StatusKind, Subsystem,
    },
    sort::DriverSorter,
    version::{ApiVersion, ComponentVersion},
    LoaderError, LoaderErrorKind, ZeResult,
};

/// `zel_handle_type_t` values accepted by [LoaderContext::translate_handle].
pub const HANDLE_TYPE_DRIVER: u32 = 0;
pub const HANDLE_TYPE_DEVICE: u32 = 1;

#[derive(Debug)]
pub struct LoaderContext {
    version: ApiVersion,
    config: LoaderConfig,
    registry: DriverRegistry,
    sorter: DriverSorter,
    layers: Layers,
    tables: LoaderTables,
    tracing_enabled: AtomicBool,
    components: Vec<ComponentVersion>,
}

impl LoaderContext {
    /// Discover drivers and load the configured layers. Libraries that fail to open are logged
    /// and skipped.
    pub fn init(config: LoaderConfig) -> Self {
        if config.debug_trace {
            log::init_debug_trace();
        }
        let search = config.library_path.as_deref();

        let drivers: Vec<Arc<dyn DriverLibrary>> = config
            .driver_libraries()
            .into_iter()
            .filter_map(|name| match SharedLibrary::open(&name, search) {
                Ok(lib) => Some(Arc::new(lib) as Arc<dyn DriverLibrary>),
                Err(e) => {
                    debug!("skipping driver: {}", e);
                    None
                }
            })
            .collect();

        let mut layers = Layers::new();
        for (enabled, kind) in [
            (config.validation_layer, LayerKind::Validation),
            (config.tracing_layer, LayerKind::Tracing),
        ] {
            if !enabled {
                continue;
            }
            match SharedLibrary::open(kind.library_name(), search) {
                Ok(lib) => layers = layers.with(Layer::new(kind, Arc::new(lib))),
                Err(e) => warn!("{} layer requested but unavailable: {}", kind, e),
            }
        }

        Self::discover(config, drivers, layers)
    }

    /// Register the opened driver libraries and build the context. Libraries that export no
    /// table resolvers are skipped. Core drivers are asked about their devices here, so their
    /// type and PCI address are known before the first sort.
    pub fn discover(
        config: LoaderConfig,
        drivers: impl IntoIterator<Item = Arc<dyn DriverLibrary>>,
        layers: Layers,
    ) -> Self {
        let mut registry = DriverRegistry::new();
        for lib in drivers {
            let subsystems = discovery::exported_subsystems(lib.as_ref());
            if subsystems.is_empty() {
                warn!("{} exports no table resolvers, skipping", lib.name());
                continue;
            }
            registry.register(discovery::describe(lib, subsystems, config.pci_order), subsystems);
        }

        let ctx = Self::new(config, registry, layers);
        info!(
            "loader initialized: {} driver(s), {} core, {} sysman",
            ctx.registry.all().len(),
            ctx.registry.driver_count(Subsystem::Core),
            ctx.registry.driver_count(Subsystem::Sysman)
        );
        ctx
    }

    /// Build a context around an already-populated registry.
    pub fn new(config: LoaderConfig, registry: DriverRegistry, layers: Layers) -> Self {
        let components = iter::once(ComponentVersion::loader())
            .chain(layers.iter().filter_map(Layer::component_version))
            .collect();
        Self {
            version: ApiVersion::CURRENT,
            sorter: config.sorter(),
            tracing_enabled: AtomicBool::new(config.tracing_layer && layers.tracing().is_some()),
            tables: LoaderTables::default(),
            config,
            registry,
            layers,
            components,
        }
    }

    /// The newest API version this loader hands out tables for.
    pub fn version(&self) -> ApiVersion {
        self.version
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn layers(&self) -> &Layers {
        &self.layers
    }

    /// The drivers of a subsystem in their established order, sorting first if needed.
    pub fn sorted(&self, subsystem: Subsystem) -> &[Arc<DriverEntry>] {
        self.sorter.sort_partition(&self.registry, subsystem)
    }

    /// Usable drivers of a subsystem, in sorted order.
    pub fn usable(&self, subsystem: Subsystem) -> impl Iterator<Item = &Arc<DriverEntry>> {
        self.sorted(subsystem)
            .iter()
            .filter(move |d| d.is_usable(subsystem))
    }

    /// Resolve the table for category `C` at `version` into `out`.
    ///
    /// Preconditions are checked in order: the category's partition has drivers, `out` is
    /// present, and `version` does not exceed [LoaderContext::version]. On any error `out` is
    /// left untouched.
    pub fn get_proc_addr_table<C: DdiCategory>(
        &self,
        version: ApiVersion,
        out: Option<&mut C::Table>,
    ) -> Result<(), LoaderError> {
        let partition = self.registry.partition(C::SUBSYSTEM);
        if partition.is_empty() {
            return Err(LoaderErrorKind::NoDrivers {
                subsystem: C::SUBSYSTEM,
            }
            .into());
        }
        let out = out.ok_or(LoaderErrorKind::InvalidNullPointer)?;
        if version > self.version {
            return Err(LoaderErrorKind::UnsupportedVersion {
                requested: version,
                supported: self.version,
            }
            .into());
        }

        // Decided from the drivers usable before this resolution, so a sibling that lacks or
        // fails this one category does not pin the partition to a single driver.
        let usable = self.usable(C::SUBSYSTEM).count();
        let resolved = self
            .usable(C::SUBSYSTEM)
            .map(|drv| self.fetch_driver_table::<C>(drv, version).map(|_| drv.clone()));
        let (ok, failed) =
            LoaderError::collect_any(LoaderErrorKind::NoUsableDriver { symbol: C::SYMBOL }, resolved)?;
        for e in &failed {
            debug!("{}: {}", C::SYMBOL, e);
        }

        let mode = partition.latch_mode(|| {
            if usable == 1 && !self.config.force_intercept {
                DispatchMode::Direct
            } else {
                DispatchMode::Intercept
            }
        });
        let mut table = match mode {
            DispatchMode::Direct => ok[0].ddi().table::<C>(),
            DispatchMode::Intercept => {
                let table = build_table::<C>(version, true);
                C::loader_slot(&self.tables).lock().loader = Some(table);
                table
            }
        };
        trace!("{}: {:?} dispatch over {} driver(s)", C::SYMBOL, mode, ok.len());

        if let Some(validation) = self.layers.validation() {
            validation.intercept::<C>(version, &mut table)?;
        }
        if let Some(tracing) = self.layers.tracing() {
            let mut instrumented = table;
            tracing.intercept::<C>(version, &mut instrumented)?;
            let mut slot = C::loader_slot(&self.tables).lock();
            slot.pristine = Some(table);
            slot.instrumented = Some(instrumented);
            if self.tracing_enabled() {
                table = instrumented;
            }
        }

        *out = table;
        Ok(())
    }

    // Fill one driver's table for `C`. A driver-reported failure disables the driver for the
    // category's subsystem; a missing resolver only fails this resolution.
    fn fetch_driver_table<C: DdiCategory>(
        &self,
        drv: &DriverEntry,
        version: ApiVersion,
    ) -> Result<(), LoaderError> {
        let Some(sym) = drv.library().lookup(C::SYMBOL) else {
            if C::OPTIONAL {
                trace!("{}: no {}, optional", drv.name(), C::SYMBOL);
                return Ok(());
            }
            return Err(LoaderErrorKind::MissingSymbol {
                driver: drv.name().to_string(),
                symbol: C::SYMBOL,
            }
            .into());
        };
        let get: GetTableFn<C::Table> = unsafe { sym.cast() };
        let mut table = C::Table::default();
        let result = unsafe { get(version, &mut table) };
        if !result.is_success() {
            drv.set_status(C::SUBSYSTEM.into(), result);
            return Err(LoaderErrorKind::DriverFailed {
                driver: drv.name().to_string(),
                symbol: C::SYMBOL,
                result,
            }
            .into());
        }
        drv.ddi().store::<C>(table);
        Ok(())
    }

    /// The table an application should currently dispatch through for `C`: the instrumented or
    /// pristine copy when a tracing layer took part in resolution, the loader-owned table
    /// otherwise. None before `C` was resolved in intercept mode or with a tracing layer.
    pub fn active_table<C: DdiCategory>(&self) -> Option<C::Table> {
        let slot = C::loader_slot(&self.tables).lock();
        let traced = if self.tracing_enabled() {
            slot.instrumented
        } else {
            slot.pristine
        };
        traced.or(slot.loader)
    }

    /// Run every usable driver's initialization entry for `subsystem`. Each driver's status for
    /// the subsystem records its result. Succeeds if any driver initialized.
    pub fn init_subsystem(&self, subsystem: Subsystem, flags: u32) -> Result<(), LoaderError> {
        let symbol = match subsystem {
            Subsystem::Core => "zeInit",
            Subsystem::Sysman => "zesInit",
        };
        let results: Vec<_> = self
            .usable(subsystem)
            .map(|drv| {
                let init = match subsystem {
                    Subsystem::Core => drv.ddi().table::<ZeGlobal>().pfn_init,
                    Subsystem::Sysman => drv.ddi().table::<ZesGlobal>().pfn_init,
                };
                let result = match init {
                    Some(init) => unsafe { init(flags) },
                    None => ZeResult::ERROR_UNINITIALIZED,
                };
                drv.set_status(subsystem.into(), result);
                if result.is_success() {
                    Ok(())
                } else {
                    Err(LoaderError::from(LoaderErrorKind::DriverFailed {
                        driver: drv.name().to_string(),
                        symbol,
                        result,
                    }))
                }
            })
            .collect();
        LoaderError::collect_any(LoaderErrorKind::NoUsableDriver { symbol }, results).map(|_| ())
    }

    /// Select the usable core drivers whose declared type is in `flags`. Every driver's
    /// drivers-extension status records whether it was selected; selected drivers are marked as
    /// having initialized tables. Returns the number selected.
    pub fn init_drivers(&self, flags: DriverTypeFlags) -> Result<u32, LoaderError> {
        let mut selected = 0;
        for drv in self.usable(Subsystem::Core) {
            if drv.driver_type().selected_by(flags) {
                drv.set_status(StatusKind::DriversExt, ZeResult::SUCCESS);
                drv.set_status(StatusKind::Ddi, ZeResult::SUCCESS);
                selected += 1;
            } else {
                trace!("{} ({}) not selected by {:?}", drv.name(), drv.driver_type(), flags);
                drv.set_status(StatusKind::DriversExt, ZeResult::ERROR_UNINITIALIZED);
            }
        }
        if selected == 0 {
            return Err(LoaderErrorKind::NoMatchingDriverType { requested: flags }.into());
        }
        Ok(selected)
    }

    pub fn tracing_enabled(&self) -> bool {
        self.tracing_enabled.load(Ordering::Acquire)
    }

    /// Switch resolved categories to the tracing layer's instrumented tables.
    ///
    /// Only later resolutions and [LoaderContext::active_table] see the switch. A table already
    /// copied out to a caller keeps the entries it was resolved with.
    pub fn enable_tracing(&self) -> Result<(), LoaderError> {
        self.set_tracing(true)
    }

    /// Switch resolved categories back to their pre-tracing tables. Like
    /// [LoaderContext::enable_tracing], this leaves already copied tables alone.
    pub fn disable_tracing(&self) -> Result<(), LoaderError> {
        self.set_tracing(false)
    }

    fn set_tracing(&self, enabled: bool) -> Result<(), LoaderError> {
        if self.layers.tracing().is_none() {
            return Err(LoaderErrorKind::NoTracingLayer.into());
        }
        debug!("tracing {}", if enabled { "enabled" } else { "disabled" });
        self.tracing_enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    /// Fill the tracer API table from the tracing layer. Without a tracing layer the table is
    /// left untouched and the call succeeds.
    pub fn tracer_api_table(&self, version: ApiVersion, table: *mut c_void) -> Result<(), LoaderError> {
        match self.layers.tracing() {
            Some(tracing) => tracing.tracer_api_table(version, table),
            None => Ok(()),
        }
    }

    /// An opaque token for the loaded tracing layer, null if none is loaded.
    pub fn tracing_handle(&self) -> *mut c_void {
        self.layers
            .tracing()
            .map_or(null_mut(), |l| Arc::as_ptr(l.library()) as *const () as *mut c_void)
    }

    /// Versions of the loader and every loaded layer.
    pub fn components(&self) -> &[ComponentVersion] {
        &self.components
    }

    /// Translate a loader-issued driver or device handle to the driver's own handle. Identity
    /// when the core partition dispatches directly; null stays null.
    ///
    /// # Safety
    /// In intercept mode `handle` must be null or a handle of `handle_type` issued by this
    /// loader.
    pub unsafe fn translate_handle(
        &self,
        handle_type: u32,
        handle: *mut c_void,
    ) -> Result<*mut c_void, LoaderError> {
        if !matches!(handle_type, HANDLE_TYPE_DRIVER | HANDLE_TYPE_DEVICE) {
            return Err(LoaderErrorKind::InvalidArgument {
                what: format!("unsupported handle type {}", handle_type),
            }
            .into());
        }
        let intercept =
            self.registry.partition(Subsystem::Core).dispatch_mode() == Some(DispatchMode::Intercept);
        if handle.is_null() || !intercept {
            return Ok(handle);
        }
        let native = match handle_type {
            HANDLE_TYPE_DRIVER => unsafe { translate::<ZeDriverHandle>(handle) },
            _ => unsafe { translate::<ZeDeviceHandle>(handle) },
        };
        Ok(native)
    }

    /// Tear the context down, releasing every distinct library exactly once. Returns the names
    /// of the libraries released.
    pub fn shutdown(self) -> Vec<String> {
        let libraries: Vec<_> = self
            .registry
            .unique_libraries()
            .into_iter()
            .chain(self.layers.iter().map(|l| l.library().clone()))
            .collect();
        drop(self);
        libraries
            .into_iter()
            .map(|lib| {
                let name = lib.name().to_string();
                if Arc::strong_count(&lib) > 1 {
                    warn!("{} is still referenced at teardown", name);
                }
                debug!("releasing {}", name);
                name
            })
            .collect()
    }
}

unsafe fn translate<H: LoaderHandle>(handle: *mut c_void) -> *mut c_void {
    unsafe { H::factory().unwrap(H::from_raw(handle)) }.map_or(null_mut(), |o| o.handle().as_raw())
}

static CONTEXT: Lazy<RwLock<Option<Arc<LoaderContext>>>> = Lazy::new(|| RwLock::new(None));
static TORN_DOWN: AtomicBool = AtomicBool::new(false);

/// The process-wide context, created from the environment on first use. Fails once the context
/// has been torn down.
pub fn current() -> Result<Arc<LoaderContext>, LoaderError> {
    if let Some(ctx) = CONTEXT.read().as_ref() {
        return Ok(ctx.clone());
    }
    if TORN_DOWN.load(Ordering::Acquire) {
        return Err(LoaderErrorKind::NotInitialized.into());
    }
    let mut slot = CONTEXT.write();
    let ctx = slot.get_or_insert_with(|| Arc::new(LoaderContext::init(LoaderConfig::from_env())));
    Ok(ctx.clone())
}

/// Replace the process-wide context.
pub fn install(ctx: LoaderContext) -> Arc<LoaderContext> {
    let ctx = Arc::new(ctx);
    *CONTEXT.write() = Some(ctx.clone());
    TORN_DOWN.store(false, Ordering::Release);
    ctx
}

/// Tear down the process-wide context. Returns the released library names, or None if there
/// was no context or it is still in use elsewhere.
pub fn teardown() -> Option<Vec<String>> {
    TORN_DOWN.store(true, Ordering::Release);
    let ctx = CONTEXT.write().take()?;
    match Arc::try_unwrap(ctx) {
        Ok(ctx) => Some(ctx.shutdown()),
        Err(_) => {
            warn!("loader context still in use at teardown");
            None
        }
    }
}
