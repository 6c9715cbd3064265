//! Loader-owned table assembly and the generic forwarding machinery behind every loader entry.
//!
//! Every forwarding function has the same shape: recover the [Object] behind the incoming loader
//! handle, read the owning driver's table for the category, null-check the entry, call it with
//! the native handle, and wrap any handles the driver hands back.

use std::{slice, sync::Arc};

use tracing::trace;

use crate::{
    ddi::{DdiCategory, DriverDdi},
    handle::{LoaderHandle, Object},
    registry::DriverEntry,
    version::ApiVersion,
    LoaderError, ZeResult,
};

/// Build the loader-owned table for `C`: every entry introduced at or before `version` points at
/// the loader's forwarder. In intercept mode legacy entries are populated regardless of version.
pub fn build_table<C: DdiCategory>(version: ApiVersion, intercept: bool) -> C::Table {
    let mut table = C::gated(version);
    if intercept {
        C::apply_legacy(&mut table);
    }
    trace!(
        "built {} table for {} ({} of {} entries)",
        C::NAME,
        version,
        C::entries(&table).iter().flatten().count(),
        C::ENTRIES.len()
    );
    table
}

/// Recover the object behind a loader handle.
///
/// # Safety
/// `handle` must be null or a handle issued by `H`'s factory.
unsafe fn object<H: LoaderHandle>(handle: H) -> Option<&'static Object<H>> {
    unsafe { H::factory().unwrap(handle) }
}

/// Forward a call on `handle` through the owning driver's `C` table. `call` receives the table
/// snapshot and the native handle and returns None when the entry is null.
///
/// # Safety
/// `handle` must be null or a handle issued by `H`'s factory.
pub(crate) unsafe fn forward<C, H>(handle: H, call: impl FnOnce(&C::Table, H) -> Option<ZeResult>) -> ZeResult
where
    C: DdiCategory,
    H: LoaderHandle,
{
    match unsafe { forward_with::<C, H>(handle, call) } {
        Ok((_, r)) => r,
        Err(r) => r,
    }
}

unsafe fn forward_with<C, H>(
    handle: H,
    call: impl FnOnce(&C::Table, H) -> Option<ZeResult>,
) -> Result<(&'static Arc<DriverDdi>, ZeResult), ZeResult>
where
    C: DdiCategory,
    H: LoaderHandle,
{
    let obj = unsafe { object(handle) }.ok_or(ZeResult::ERROR_INVALID_NULL_HANDLE)?;
    let table = obj.ddi().table::<C>();
    let result = call(&table, obj.handle()).ok_or(ZeResult::ERROR_UNINITIALIZED)?;
    Ok((obj.ddi(), result))
}

/// Forward an enumeration call (`count`, `out` array) and wrap the returned handles.
///
/// # Safety
/// As [forward]; additionally `count` and `out` must satisfy the usual enumeration contract: when
/// both are non-null, `out` points to at least `*count` elements after the call.
pub(crate) unsafe fn forward_enum<C, H, O>(
    handle: H,
    count: *mut u32,
    out: *mut O,
    call: impl FnOnce(&C::Table, H) -> Option<ZeResult>,
) -> ZeResult
where
    C: DdiCategory,
    H: LoaderHandle,
    O: LoaderHandle,
{
    let (ddi, result) = match unsafe { forward_with::<C, H>(handle, call) } {
        Ok(x) => x,
        Err(r) => return r,
    };
    if !result.is_success() || count.is_null() || out.is_null() {
        return result;
    }
    let handles = unsafe { slice::from_raw_parts_mut(out, *count as usize) };
    O::factory().wrap_all(handles, ddi).into()
}

/// Forward a call that returns one handle through `out`, wrapping it.
///
/// # Safety
/// As [forward]; `out` must be null or valid for reads and writes.
pub(crate) unsafe fn forward_out<C, H, O>(
    handle: H,
    out: *mut O,
    call: impl FnOnce(&C::Table, H) -> Option<ZeResult>,
) -> ZeResult
where
    C: DdiCategory,
    H: LoaderHandle,
    O: LoaderHandle,
{
    let (ddi, result) = match unsafe { forward_with::<C, H>(handle, call) } {
        Ok(x) => x,
        Err(r) => return r,
    };
    if !result.is_success() || out.is_null() {
        return result;
    }
    let out = unsafe { &mut *out };
    match O::factory().wrap(*out, ddi) {
        Ok(h) => {
            *out = h;
            ZeResult::SUCCESS
        }
        Err(e) => e.code(),
    }
}

/// Translate an input array of loader handles into native handles.
///
/// # Safety
/// `handles` must be null or point to `count` handles issued by `H`'s factory.
pub(crate) unsafe fn unwrap_all<H: LoaderHandle>(handles: *const H, count: u32) -> Vec<H> {
    if handles.is_null() {
        return vec![];
    }
    unsafe { slice::from_raw_parts(handles, count as usize) }
        .iter()
        .map(|h| unsafe { object(*h) }.map_or(H::null(), |o| o.handle()))
        .collect()
}

/// Translate one input loader handle into its native handle, passing null through.
///
/// # Safety
/// `handle` must be null or a handle issued by `H`'s factory.
pub(crate) unsafe fn unwrap_one<H: LoaderHandle>(handle: H) -> H {
    unsafe { object(handle) }.map_or(H::null(), |o| o.handle())
}

/// Aggregate a top-level enumeration across `drivers`: count the handles every driver reports,
/// and when an output array is supplied fill it in order, up to `*count` entries, wrapping each
/// handle. `get` issues one driver's enumeration call and returns None when the driver has no
/// such entry. If filling fails partway, the whole output array is nulled and `*count` is left
/// alone.
///
/// # Safety
/// `count` must be non-null; `out` must be null or hold at least `*count` elements.
pub(crate) unsafe fn aggregate_get<'a, H: LoaderHandle>(
    drivers: impl Iterator<Item = &'a Arc<DriverEntry>>,
    get: impl Fn(&DriverEntry, *mut u32, *mut H) -> Option<ZeResult>,
    count: *mut u32,
    out: *mut H,
) -> ZeResult {
    let capacity = unsafe { *count };
    let filling = !out.is_null() && capacity != 0;
    let mut total: u32 = 0;
    let mut result = ZeResult::SUCCESS;

    for drv in drivers {
        if capacity > 0 && total == capacity {
            break;
        }
        let mut n: u32 = 0;
        let Some(counted) = get(drv, &mut n, std::ptr::null_mut()) else {
            trace!("{}: no driver enumeration entry", drv.name());
            continue;
        };
        if !counted.is_success() {
            trace!("{}: enumeration failed with {}", drv.name(), counted);
            continue;
        }
        if filling {
            n = n.min(capacity - total);
            let dst = unsafe { out.add(total as usize) };
            result = get(drv, &mut n, dst).unwrap_or(ZeResult::ERROR_UNINITIALIZED);
            if !result.is_success() {
                break;
            }
            let handles = unsafe { slice::from_raw_parts_mut(dst, n as usize) };
            if let Err(e) = H::factory().wrap_all(handles, drv.ddi()) {
                result = e.code();
                break;
            }
            drv.mark_in_use();
        }
        total += n;
    }

    if result.is_success() {
        unsafe { *count = total };
    } else if filling {
        trace!("enumeration failed with {} after {} handles", result, total);
        unsafe { slice::from_raw_parts_mut(out, capacity as usize) }.fill(H::null());
    }
    result
}

/// Convert a `Result` into the status reported at the C boundary, logging failures.
pub(crate) fn report<T>(what: &str, r: Result<T, LoaderError>) -> ZeResult {
    if let Err(e) = &r {
        tracing::debug!("{}: {}", what, e);
        for related in &e.related {
            tracing::debug!("  caused by: {}", related);
        }
    }
    r.into()
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use once_cell::sync::Lazy;

    use super::*;
    use crate::{
        ddi::zes::{ZesDevice, ZesDeviceDdiTable},
        handle::{ObjectFactory, ZesDeviceHandle, ZesDriverHandle, ZesPwrHandle},
        library::mock::MockLibrary,
        registry::DriverEntry,
    };

    unsafe extern "C" fn enum_power(_dev: ZesDeviceHandle, count: *mut u32, out: *mut ZesPwrHandle) -> ZeResult {
        unsafe {
            if out.is_null() {
                *count = 3;
            } else {
                for i in 0..(*count).min(3) as usize {
                    *out.add(i) = ZesPwrHandle((0x100 + i) as *mut c_void);
                }
            }
        }
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn reset(dev: ZesDeviceHandle, force: u8) -> ZeResult {
        if dev.0 as usize == 0xd0 && force == 1 {
            ZeResult::SUCCESS
        } else {
            ZeResult::ERROR_INVALID_ARGUMENT
        }
    }

    unsafe extern "C" fn get_two(count: *mut u32, out: *mut ZesDriverHandle) -> ZeResult {
        unsafe {
            if out.is_null() {
                *count = 2;
            } else {
                let n = (*count).min(2);
                for i in 0..n as usize {
                    *out.add(i) = ZesDriverHandle((0xa0 + i) as *mut c_void);
                }
                *count = n;
            }
        }
        ZeResult::SUCCESS
    }

    /// A handle category whose factory holds at most three records.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct CappedHandle(*mut c_void);

    unsafe impl Send for CappedHandle {}
    unsafe impl Sync for CappedHandle {}

    impl LoaderHandle for CappedHandle {
        const CATEGORY: &'static str = "capped";

        fn from_raw(raw: *mut c_void) -> Self {
            Self(raw)
        }

        fn as_raw(self) -> *mut c_void {
            self.0
        }

        fn factory() -> &'static ObjectFactory<Self> {
            static FACTORY: Lazy<ObjectFactory<CappedHandle>> = Lazy::new(|| ObjectFactory::new(Some(3)));
            &FACTORY
        }
    }

    unsafe extern "C" fn get_two_capped(count: *mut u32, out: *mut CappedHandle) -> ZeResult {
        unsafe {
            if out.is_null() {
                *count = 2;
            } else {
                let n = (*count).min(2);
                for i in 0..n as usize {
                    *out.add(i) = CappedHandle((0xc0 + i) as *mut c_void);
                }
                *count = n;
            }
        }
        ZeResult::SUCCESS
    }

    fn device_on(ddi: &Arc<DriverDdi>) -> ZesDeviceHandle {
        ZesDeviceHandle::factory()
            .wrap(ZesDeviceHandle(0xd0 as *mut c_void), ddi)
            .unwrap()
    }

    #[test]
    fn builder_gates_and_legacy() {
        let plain = build_table::<ZesDevice>(ApiVersion::V1_0, false);
        let intercept = build_table::<ZesDevice>(ApiVersion::V1_0, true);
        assert!(plain.pfn_get.is_none());
        assert!(plain.pfn_reset.is_some());
        assert_eq!(ZesDevice::entries(&plain), ZesDevice::entries(&intercept));

        let old = ApiVersion::new(0, 91);
        let plain = build_table::<ZesDevice>(old, false);
        let intercept = build_table::<ZesDevice>(old, true);
        assert!(ZesDevice::entries(&plain).iter().all(Option::is_none));
        assert!(intercept.pfn_enum_power_domains.is_some());
        assert!(intercept.pfn_get_card_power_domain.is_none());
    }

    #[test]
    fn forward_to_driver() {
        let ddi = Arc::new(DriverDdi::default());
        ddi.store::<ZesDevice>(ZesDeviceDdiTable {
            pfn_reset: Some(reset),
            ..Default::default()
        });
        let dev = device_on(&ddi);
        let r = unsafe { forward::<ZesDevice, _>(dev, |t, h| t.pfn_reset.map(|f| unsafe { f(h, 1) })) };
        assert_eq!(r, ZeResult::SUCCESS);

        // Null entry and null handle.
        let r = unsafe {
            forward::<ZesDevice, _>(dev, |t, h| {
                t.pfn_get_state.map(|f| unsafe { f(h, std::ptr::null_mut()) })
            })
        };
        assert_eq!(r, ZeResult::ERROR_UNINITIALIZED);
        let r = unsafe {
            forward::<ZesDevice, _>(ZesDeviceHandle::null(), |t, h| t.pfn_reset.map(|f| unsafe { f(h, 1) }))
        };
        assert_eq!(r, ZeResult::ERROR_INVALID_NULL_HANDLE);
    }

    #[test]
    fn enumeration_wraps_outputs() {
        let ddi = Arc::new(DriverDdi::default());
        ddi.store::<ZesDevice>(ZesDeviceDdiTable {
            pfn_enum_power_domains: Some(enum_power),
            ..Default::default()
        });
        let dev = device_on(&ddi);
        let call = |count: *mut u32, out: *mut ZesPwrHandle| unsafe {
            forward_enum::<ZesDevice, _, _>(dev, count, out, |t, h| {
                t.pfn_enum_power_domains.map(|f| unsafe { f(h, count, out) })
            })
        };

        let mut count = 0;
        assert_eq!(call(&mut count, std::ptr::null_mut()), ZeResult::SUCCESS);
        assert_eq!(count, 3);

        let mut out = [ZesPwrHandle::null(); 3];
        assert_eq!(call(&mut count, out.as_mut_ptr()), ZeResult::SUCCESS);
        for (i, h) in out.iter().enumerate() {
            let obj = unsafe { ZesPwrHandle::factory().unwrap(*h) }.unwrap();
            assert_eq!(obj.handle().0 as usize, 0x100 + i);
            assert!(Arc::ptr_eq(obj.ddi(), &ddi));
        }
    }

    #[test]
    fn translate_inputs() {
        let ddi = Arc::new(DriverDdi::default());
        let dev = device_on(&ddi);
        let handles = [dev, ZesDeviceHandle::null()];
        let native = unsafe { unwrap_all(handles.as_ptr(), 2) };
        assert_eq!(native, vec![ZesDeviceHandle(0xd0 as *mut c_void), ZesDeviceHandle::null()]);
        assert!(unsafe { unwrap_all::<ZesDeviceHandle>(std::ptr::null(), 4) }.is_empty());
        assert_eq!(unsafe { unwrap_one(dev) }.0 as usize, 0xd0);
    }

    #[test]
    fn aggregate_across_drivers() {
        let a = Arc::new(DriverEntry::new(Arc::new(MockLibrary::new("a"))));
        let b = Arc::new(DriverEntry::new(Arc::new(MockLibrary::new("b"))));
        let drivers = [a.clone(), b.clone()];
        let get = |_: &DriverEntry, count: *mut u32, out: *mut ZesDriverHandle| {
            Some(unsafe { get_two(count, out) })
        };

        let mut count = 0;
        let r = unsafe { aggregate_get(drivers.iter(), &get, &mut count, std::ptr::null_mut()) };
        assert_eq!(r, ZeResult::SUCCESS);
        assert_eq!(count, 4);

        let mut out = [ZesDriverHandle::null(); 3];
        let mut count = 3;
        let r = unsafe { aggregate_get(drivers.iter(), &get, &mut count, out.as_mut_ptr()) };
        assert_eq!(r, ZeResult::SUCCESS);
        assert_eq!(count, 3);
        let owners: Vec<_> = out
            .iter()
            .map(|h| unsafe { ZesDriverHandle::factory().unwrap(*h) }.unwrap())
            .map(|o| (o.handle().0 as usize, Arc::as_ptr(o.ddi())))
            .collect();
        assert_eq!(
            owners,
            vec![
                (0xa0, Arc::as_ptr(a.ddi())),
                (0xa1, Arc::as_ptr(a.ddi())),
                (0xa0, Arc::as_ptr(b.ddi())),
            ]
        );
        assert!(a.in_use() && b.in_use());
    }

    #[test]
    fn aggregate_failure_nulls_output() {
        let a = Arc::new(DriverEntry::new(Arc::new(MockLibrary::new("a"))));
        let b = Arc::new(DriverEntry::new(Arc::new(MockLibrary::new("b"))));
        let drivers = [a.clone(), b.clone()];

        // a's two handles fit under the cap; b's second does not.
        let get = |_: &DriverEntry, count: *mut u32, out: *mut CappedHandle| {
            Some(unsafe { get_two_capped(count, out) })
        };
        let mut out = [CappedHandle(0x1 as *mut c_void); 4];
        let mut count = 4;
        let r = unsafe { aggregate_get(drivers.iter(), &get, &mut count, out.as_mut_ptr()) };
        assert_eq!(r, ZeResult::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(count, 4);
        assert!(out.iter().all(|h| h.is_null()));
        assert_eq!(CappedHandle::factory().len(), 2);

        // A driver that fails while filling also clears what earlier drivers wrote.
        let get = |drv: &DriverEntry, count: *mut u32, out: *mut ZesDriverHandle| {
            if drv.name() == "b" && !out.is_null() {
                return Some(ZeResult::ERROR_DEVICE_LOST);
            }
            Some(unsafe { get_two(count, out) })
        };
        let mut out = [ZesDriverHandle(0x1 as *mut c_void); 4];
        let mut count = 4;
        let r = unsafe { aggregate_get(drivers.iter(), &get, &mut count, out.as_mut_ptr()) };
        assert_eq!(r, ZeResult::ERROR_DEVICE_LOST);
        assert_eq!(count, 4);
        assert!(out.iter().all(|h| h.is_null()));
    }
}
