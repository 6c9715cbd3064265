use std::ffi::c_void;

use super::with_context;
use crate::{
    context,
    ddi::ze::{ZeDevice, ZeDriver, ZeGlobal, ZeInitDriverTypeDesc},
    dispatch::{aggregate_get, forward, forward_enum, forward_out, unwrap_one},
    handle::{ZeDeviceHandle, ZeDriverHandle},
    registry::{DriverTypeFlags, StatusKind, Subsystem},
    ZeResult,
};

pub unsafe extern "C" fn init(flags: u32) -> ZeResult {
    with_context("zeInit", |ctx| ctx.init_subsystem(Subsystem::Core, flags))
}

pub unsafe extern "C" fn init_drivers(
    count: *mut u32,
    drivers: *mut ZeDriverHandle,
    desc: *mut ZeInitDriverTypeDesc,
) -> ZeResult {
    if count.is_null() || desc.is_null() {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    }
    let ctx = match context::current() {
        Ok(ctx) => ctx,
        Err(e) => return e.code(),
    };
    let flags = DriverTypeFlags::from_bits_truncate(unsafe { (*desc).flags });
    if let Err(e) = ctx.init_drivers(flags) {
        return e.code();
    }
    let selected = ctx
        .usable(Subsystem::Core)
        .filter(|d| d.status(StatusKind::DriversExt).is_success());
    unsafe {
        aggregate_get(
            selected,
            |drv, n, out| {
                let table = drv.ddi().table::<ZeGlobal>();
                table.pfn_init_drivers.map(|f| unsafe { f(n, out, desc) })
            },
            count,
            drivers,
        )
    }
}

pub unsafe extern "C" fn driver_get(count: *mut u32, drivers: *mut ZeDriverHandle) -> ZeResult {
    if count.is_null() {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    }
    match context::current() {
        Ok(ctx) => unsafe {
            aggregate_get(
                ctx.usable(Subsystem::Core),
                |drv, n, out| {
                    drv.ddi()
                        .table::<ZeDriver>()
                        .pfn_get
                        .map(|f| unsafe { f(n, out) })
                },
                count,
                drivers,
            )
        },
        Err(e) => e.code(),
    }
}

pub unsafe extern "C" fn driver_get_api_version(driver: ZeDriverHandle, version: *mut u32) -> ZeResult {
    unsafe { forward::<ZeDriver, _>(driver, |t, h| t.pfn_get_api_version.map(|f| unsafe { f(h, version) })) }
}

pub unsafe extern "C" fn driver_get_properties(driver: ZeDriverHandle, props: *mut c_void) -> ZeResult {
    unsafe { forward::<ZeDriver, _>(driver, |t, h| t.pfn_get_properties.map(|f| unsafe { f(h, props) })) }
}

pub unsafe extern "C" fn driver_get_ipc_properties(driver: ZeDriverHandle, props: *mut c_void) -> ZeResult {
    unsafe {
        forward::<ZeDriver, _>(driver, |t, h| t.pfn_get_ipc_properties.map(|f| unsafe { f(h, props) }))
    }
}

pub unsafe extern "C" fn driver_get_extension_properties(
    driver: ZeDriverHandle,
    count: *mut u32,
    props: *mut c_void,
) -> ZeResult {
    unsafe {
        forward::<ZeDriver, _>(driver, |t, h| {
            t.pfn_get_extension_properties.map(|f| unsafe { f(h, count, props) })
        })
    }
}

pub unsafe extern "C" fn driver_get_extension_function_address(
    driver: ZeDriverHandle,
    name: *const u8,
    func: *mut *mut c_void,
) -> ZeResult {
    unsafe {
        forward::<ZeDriver, _>(driver, |t, h| {
            t.pfn_get_extension_function_address.map(|f| unsafe { f(h, name, func) })
        })
    }
}

pub unsafe extern "C" fn driver_get_last_error_description(
    driver: ZeDriverHandle,
    desc: *mut *const u8,
) -> ZeResult {
    unsafe {
        forward::<ZeDriver, _>(driver, |t, h| {
            t.pfn_get_last_error_description.map(|f| unsafe { f(h, desc) })
        })
    }
}

pub unsafe extern "C" fn device_get(
    driver: ZeDriverHandle,
    count: *mut u32,
    devices: *mut ZeDeviceHandle,
) -> ZeResult {
    unsafe {
        forward_enum::<ZeDevice, _, _>(driver, count, devices, |t, h| {
            t.pfn_get.map(|f| unsafe { f(h, count, devices) })
        })
    }
}

pub unsafe extern "C" fn device_get_sub_devices(
    device: ZeDeviceHandle,
    count: *mut u32,
    subdevices: *mut ZeDeviceHandle,
) -> ZeResult {
    unsafe {
        forward_enum::<ZeDevice, _, _>(device, count, subdevices, |t, h| {
            t.pfn_get_sub_devices.map(|f| unsafe { f(h, count, subdevices) })
        })
    }
}

pub unsafe extern "C" fn device_get_properties(device: ZeDeviceHandle, props: *mut c_void) -> ZeResult {
    unsafe { forward::<ZeDevice, _>(device, |t, h| t.pfn_get_properties.map(|f| unsafe { f(h, props) })) }
}

pub unsafe extern "C" fn device_get_compute_properties(device: ZeDeviceHandle, props: *mut c_void) -> ZeResult {
    unsafe {
        forward::<ZeDevice, _>(device, |t, h| {
            t.pfn_get_compute_properties.map(|f| unsafe { f(h, props) })
        })
    }
}

pub unsafe extern "C" fn device_get_memory_properties(
    device: ZeDeviceHandle,
    count: *mut u32,
    props: *mut c_void,
) -> ZeResult {
    unsafe {
        forward::<ZeDevice, _>(device, |t, h| {
            t.pfn_get_memory_properties.map(|f| unsafe { f(h, count, props) })
        })
    }
}

pub unsafe extern "C" fn device_can_access_peer(
    device: ZeDeviceHandle,
    peer: ZeDeviceHandle,
    value: *mut u8,
) -> ZeResult {
    if peer.0.is_null() {
        return ZeResult::ERROR_INVALID_NULL_HANDLE;
    }
    let peer = unsafe { unwrap_one(peer) };
    unsafe {
        forward::<ZeDevice, _>(device, |t, h| t.pfn_can_access_peer.map(|f| unsafe { f(h, peer, value) }))
    }
}

pub unsafe extern "C" fn device_pci_get_properties_ext(device: ZeDeviceHandle, props: *mut c_void) -> ZeResult {
    unsafe {
        forward::<ZeDevice, _>(device, |t, h| {
            t.pfn_pci_get_properties_ext.map(|f| unsafe { f(h, props) })
        })
    }
}

pub unsafe extern "C" fn device_get_root_device(device: ZeDeviceHandle, root: *mut ZeDeviceHandle) -> ZeResult {
    unsafe {
        forward_out::<ZeDevice, _, _>(device, root, |t, h| {
            t.pfn_get_root_device.map(|f| unsafe { f(h, root) })
        })
    }
}
