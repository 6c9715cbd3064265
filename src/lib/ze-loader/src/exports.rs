//! The symbols the loader library exports to applications.
//!
//! These are thin C-ABI shims: validate the pointers, run the operation against the process-wide
//! context, and report the outcome as a [ZeResult].

use std::{ffi::c_void, ptr, slice};

use tracing::{debug, info};

use crate::{
    config::LoaderConfig,
    context::{self, LoaderContext},
    ddi::DdiCategory,
    dispatch::report,
    version::{ApiVersion, ComponentVersion, ZelComponentVersion},
    LoaderErrorKind, ZeResult,
};

fn resolve<C: DdiCategory>(version: ApiVersion, table: *mut C::Table) -> ZeResult {
    let r = context::current().and_then(|ctx| {
        // Safety: the caller passes null or a pointer to a table of this category.
        ctx.get_proc_addr_table::<C>(version, unsafe { table.as_mut() })
    });
    report(C::SYMBOL, r)
}

macro_rules! resolvers {
    ($($symbol:ident => $cat:path;)*) => {
        $(
            /// Fill the caller's table for this category.
            ///
            /// # Safety
            /// `table` must be null or point to a writable table of the matching layout.
            #[no_mangle]
            pub unsafe extern "C" fn $symbol(
                version: ApiVersion,
                table: *mut <$cat as DdiCategory>::Table,
            ) -> ZeResult {
                resolve::<$cat>(version, table)
            }
        )*
    };
}

resolvers! {
    zeGetGlobalProcAddrTable => crate::ddi::ze::ZeGlobal;
    zeGetDriverProcAddrTable => crate::ddi::ze::ZeDriver;
    zeGetDeviceProcAddrTable => crate::ddi::ze::ZeDevice;
    zesGetGlobalProcAddrTable => crate::ddi::zes::ZesGlobal;
    zesGetDriverProcAddrTable => crate::ddi::zes::ZesDriver;
    zesGetDeviceProcAddrTable => crate::ddi::zes::ZesDevice;
    zesGetPowerProcAddrTable => crate::ddi::zes::ZesPower;
    zesGetEngineProcAddrTable => crate::ddi::zes::ZesEngine;
    zesGetMemoryProcAddrTable => crate::ddi::zes::ZesMemory;
    zesGetFrequencyProcAddrTable => crate::ddi::zes::ZesFrequency;
    zesGetFabricPortProcAddrTable => crate::ddi::zes::ZesFabricPort;
    zesGetRasExpProcAddrTable => crate::ddi::zes::ZesRasExp;
}

/// (Re)create the process-wide context from the environment.
#[no_mangle]
pub extern "C" fn zeLoaderInit() -> ZeResult {
    let ctx = context::install(LoaderContext::init(LoaderConfig::from_env()));
    if ctx.registry().all().is_empty() {
        debug!("zeLoaderInit: no drivers found");
    }
    ZeResult::SUCCESS
}

/// Release the process-wide context and every library it loaded.
#[no_mangle]
pub extern "C" fn zelLoaderContextTeardown() {
    if let Some(released) = context::teardown() {
        info!("released {} libraries", released.len());
    }
}

/// # Safety
/// `table` must be null or point to a writable tracer API table.
#[no_mangle]
pub unsafe extern "C" fn zelGetTracerApiProcAddrTable(version: ApiVersion, table: *mut c_void) -> ZeResult {
    if table.is_null() {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    }
    report(
        "zelGetTracerApiProcAddrTable",
        context::current().and_then(|ctx| ctx.tracer_api_table(version, table)),
    )
}

/// # Safety
/// `handle` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn zeLoaderGetTracingHandle(handle: *mut *mut c_void) -> ZeResult {
    let Some(handle) = (unsafe { handle.as_mut() }) else {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    };
    match context::current() {
        Ok(ctx) => {
            *handle = ctx.tracing_handle();
            ZeResult::SUCCESS
        }
        Err(e) => e.code(),
    }
}

#[no_mangle]
pub extern "C" fn zelEnableTracingLayer() -> ZeResult {
    report(
        "zelEnableTracingLayer",
        context::current().and_then(|ctx| ctx.enable_tracing()),
    )
}

#[no_mangle]
pub extern "C" fn zelDisableTracingLayer() -> ZeResult {
    report(
        "zelDisableTracingLayer",
        context::current().and_then(|ctx| ctx.disable_tracing()),
    )
}

/// Report the component versions. With `versions` null, only the count is written.
///
/// # Safety
/// `num_elems` must be null or writable; `versions` must be null or point to `*num_elems`
/// writable elements.
#[no_mangle]
pub unsafe extern "C" fn zelLoaderGetVersions(
    num_elems: *mut usize,
    versions: *mut ZelComponentVersion,
) -> ZeResult {
    let Some(num_elems) = (unsafe { num_elems.as_mut() }) else {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    };
    let ctx = match context::current() {
        Ok(ctx) => ctx,
        Err(e) => return e.code(),
    };
    let components = ctx.components();
    if versions.is_null() {
        *num_elems = components.len();
        return ZeResult::SUCCESS;
    }
    let n = (*num_elems).min(components.len());
    let out = unsafe { slice::from_raw_parts_mut(versions, n) };
    for (dst, src) in out.iter_mut().zip(components) {
        *dst = src.to_c();
    }
    *num_elems = n;
    ZeResult::SUCCESS
}

/// The loader's own version. Does not require a context.
///
/// # Safety
/// `version` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn zelGetLoaderVersion(version: *mut ZelComponentVersion) -> ZeResult {
    match unsafe { version.as_mut() } {
        Some(version) => {
            *version = ComponentVersion::loader().to_c();
            ZeResult::SUCCESS
        }
        None => ZeResult::ERROR_INVALID_NULL_POINTER,
    }
}

/// Translate a loader-issued handle to the driver's native handle.
///
/// # Safety
/// `handle_out` must be null or writable; `handle_in` must be null or a handle of `handle_type`
/// returned by this loader.
#[no_mangle]
pub unsafe extern "C" fn zelLoaderTranslateHandle(
    handle_type: u32,
    handle_in: *mut c_void,
    handle_out: *mut *mut c_void,
) -> ZeResult {
    if handle_out.is_null() {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    }
    let r = context::current().and_then(|ctx| unsafe { ctx.translate_handle(handle_type, handle_in) });
    match r {
        Ok(native) => {
            unsafe { ptr::write(handle_out, native) };
            ZeResult::SUCCESS
        }
        Err(e) => {
            if !matches!(e.kind, LoaderErrorKind::InvalidArgument { .. }) {
                debug!("zelLoaderTranslateHandle: {}", e);
            }
            e.code()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{ptr::null_mut, sync::Arc};

    use super::*;
    use crate::{
        ddi::zes::{ZesPower, ZesPowerDdiTable},
        layer::Layers,
        library::mock::MockLibrary,
        registry::{DriverEntry, DriverRegistry, Subsystems},
    };

    unsafe extern "C" fn power_table(_v: ApiVersion, _t: *mut ZesPowerDdiTable) -> ZeResult {
        ZeResult::SUCCESS
    }

    // The process-wide context is shared by every test in the binary, so the whole lifecycle is
    // exercised in one test.
    #[test]
    fn global_lifecycle() {
        let lib = Arc::new(MockLibrary::new("mock").export(ZesPower::SYMBOL, power_table as *const c_void));
        let mut registry = DriverRegistry::new();
        registry.register(DriverEntry::new(lib.clone()), Subsystems::all());
        context::install(LoaderContext::new(LoaderConfig::default(), registry, Layers::new()));

        unsafe {
            let mut table = ZesPowerDdiTable::default();
            assert_eq!(
                zesGetPowerProcAddrTable(ApiVersion::CURRENT, &mut table),
                ZeResult::SUCCESS
            );
            assert_eq!(
                zesGetPowerProcAddrTable(ApiVersion::CURRENT, null_mut()),
                ZeResult::ERROR_INVALID_NULL_POINTER
            );
            assert_eq!(
                zesGetPowerProcAddrTable(ApiVersion::new(1, 99), &mut table),
                ZeResult::ERROR_UNSUPPORTED_VERSION
            );

            let mut n = 0usize;
            assert_eq!(zelLoaderGetVersions(&mut n, null_mut()), ZeResult::SUCCESS);
            assert_eq!(n, 1);
            let mut versions = [ZelComponentVersion::default(); 4];
            n = versions.len();
            assert_eq!(
                zelLoaderGetVersions(&mut n, versions.as_mut_ptr()),
                ZeResult::SUCCESS
            );
            assert_eq!(n, 1);
            assert_eq!(ComponentVersion::from(&versions[0]).name, "loader");
            assert_eq!(
                zelLoaderGetVersions(null_mut(), null_mut()),
                ZeResult::ERROR_INVALID_NULL_POINTER
            );

            let mut out = 0x1 as *mut c_void;
            assert_eq!(
                zelLoaderTranslateHandle(1, null_mut(), &mut out),
                ZeResult::SUCCESS
            );
            assert!(out.is_null());
            assert_eq!(
                zelLoaderTranslateHandle(9, 0x10 as *mut c_void, &mut out),
                ZeResult::ERROR_INVALID_ARGUMENT
            );
            assert_eq!(
                zelLoaderTranslateHandle(0, 0x10 as *mut c_void, null_mut()),
                ZeResult::ERROR_INVALID_NULL_POINTER
            );

            let mut tracing = 0x1 as *mut c_void;
            assert_eq!(zeLoaderGetTracingHandle(&mut tracing), ZeResult::SUCCESS);
            assert!(tracing.is_null());
            assert_eq!(zelEnableTracingLayer(), ZeResult::ERROR_UNINITIALIZED);
        }

        zelLoaderContextTeardown();
        assert_eq!(Arc::strong_count(&lib), 1);
        let mut table = ZesPowerDdiTable::default();
        assert_eq!(
            unsafe { zesGetPowerProcAddrTable(ApiVersion::CURRENT, &mut table) },
            ZeResult::ERROR_UNINITIALIZED
        );

        let mut v = ZelComponentVersion::default();
        assert_eq!(unsafe { zelGetLoaderVersion(&mut v) }, ZeResult::SUCCESS);
        assert_eq!(v.spec_version, ApiVersion::CURRENT);
    }
}
