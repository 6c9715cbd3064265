use std::ffi::c_void;

use super::with_context;
use crate::{
    context,
    ddi::zes::*,
    dispatch::{aggregate_get, forward, forward_enum, forward_out, unwrap_all, unwrap_one},
    handle::{
        ZesDeviceHandle, ZesDriverHandle, ZesEngineHandle, ZesFabricPortHandle, ZesFreqHandle,
        ZesMemHandle, ZesPwrHandle, ZesRasHandle,
    },
    registry::Subsystem,
    ZeResult,
};

/// Generates the forwarders that pass their arguments through unchanged apart from the leading
/// handle.
macro_rules! passthrough {
    ($( $name:ident: $cat:ty, $handle:ty, $pfn:ident ( $($arg:ident: $ty:ty),* ); )*) => {
        $(
            pub unsafe extern "C" fn $name(handle: $handle, $($arg: $ty),*) -> ZeResult {
                unsafe {
                    forward::<$cat, _>(handle, |t, h| t.$pfn.map(|f| unsafe { f(h, $($arg),*) }))
                }
            }
        )*
    };
}

/// Generates the forwarders that enumerate child objects of a device.
macro_rules! enumerate {
    ($( $name:ident: $pfn:ident -> $child:ty; )*) => {
        $(
            pub unsafe extern "C" fn $name(
                device: ZesDeviceHandle,
                count: *mut u32,
                children: *mut $child,
            ) -> ZeResult {
                unsafe {
                    forward_enum::<ZesDevice, _, _>(device, count, children, |t, h| {
                        t.$pfn.map(|f| unsafe { f(h, count, children) })
                    })
                }
            }
        )*
    };
}

pub unsafe extern "C" fn init(flags: u32) -> ZeResult {
    with_context("zesInit", |ctx| ctx.init_subsystem(Subsystem::Sysman, flags))
}

pub unsafe extern "C" fn driver_get(count: *mut u32, drivers: *mut ZesDriverHandle) -> ZeResult {
    if count.is_null() {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    }
    match context::current() {
        Ok(ctx) => unsafe {
            aggregate_get(
                ctx.usable(Subsystem::Sysman),
                |drv, n, out| {
                    drv.ddi()
                        .table::<ZesDriver>()
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

pub unsafe extern "C" fn driver_event_listen(
    driver: ZesDriverHandle,
    timeout: u32,
    count: u32,
    devices: *mut ZesDeviceHandle,
    num_events: *mut u32,
    events: *mut u32,
) -> ZeResult {
    let mut native = unsafe { unwrap_all(devices, count) };
    let devices = if devices.is_null() {
        devices
    } else {
        native.as_mut_ptr()
    };
    unsafe {
        forward::<ZesDriver, _>(driver, |t, h| {
            t.pfn_event_listen
                .map(|f| unsafe { f(h, timeout, count, devices, num_events, events) })
        })
    }
}

pub unsafe extern "C" fn driver_event_listen_ex(
    driver: ZesDriverHandle,
    timeout: u64,
    count: u32,
    devices: *mut ZesDeviceHandle,
    num_events: *mut u32,
    events: *mut u32,
) -> ZeResult {
    let mut native = unsafe { unwrap_all(devices, count) };
    let devices = if devices.is_null() {
        devices
    } else {
        native.as_mut_ptr()
    };
    unsafe {
        forward::<ZesDriver, _>(driver, |t, h| {
            t.pfn_event_listen_ex
                .map(|f| unsafe { f(h, timeout, count, devices, num_events, events) })
        })
    }
}

passthrough! {
    driver_get_extension_properties: ZesDriver, ZesDriverHandle, pfn_get_extension_properties(count: *mut u32, props: *mut c_void);
    driver_get_extension_function_address: ZesDriver, ZesDriverHandle, pfn_get_extension_function_address(name: *const u8, func: *mut *mut c_void);

    device_get_properties: ZesDevice, ZesDeviceHandle, pfn_get_properties(props: *mut c_void);
    device_get_state: ZesDevice, ZesDeviceHandle, pfn_get_state(state: *mut c_void);
    device_reset: ZesDevice, ZesDeviceHandle, pfn_reset(force: u8);
    device_reset_ext: ZesDevice, ZesDeviceHandle, pfn_reset_ext(props: *mut c_void);

    power_get_properties: ZesPower, ZesPwrHandle, pfn_get_properties(props: *mut c_void);
    power_get_energy_counter: ZesPower, ZesPwrHandle, pfn_get_energy_counter(energy: *mut c_void);
    power_get_limits: ZesPower, ZesPwrHandle, pfn_get_limits(sustained: *mut c_void, burst: *mut c_void, peak: *mut c_void);
    power_set_limits: ZesPower, ZesPwrHandle, pfn_set_limits(sustained: *const c_void, burst: *const c_void, peak: *const c_void);
    power_get_limits_ext: ZesPower, ZesPwrHandle, pfn_get_limits_ext(count: *mut u32, limits: *mut c_void);
    power_set_limits_ext: ZesPower, ZesPwrHandle, pfn_set_limits_ext(count: *mut u32, limits: *mut c_void);

    engine_get_properties: ZesEngine, ZesEngineHandle, pfn_get_properties(props: *mut c_void);
    engine_get_activity: ZesEngine, ZesEngineHandle, pfn_get_activity(stats: *mut c_void);
    engine_get_activity_ext: ZesEngine, ZesEngineHandle, pfn_get_activity_ext(count: *mut u32, stats: *mut c_void);

    memory_get_properties: ZesMemory, ZesMemHandle, pfn_get_properties(props: *mut c_void);
    memory_get_state: ZesMemory, ZesMemHandle, pfn_get_state(state: *mut c_void);
    memory_get_bandwidth: ZesMemory, ZesMemHandle, pfn_get_bandwidth(bandwidth: *mut c_void);

    frequency_get_properties: ZesFrequency, ZesFreqHandle, pfn_get_properties(props: *mut c_void);
    frequency_get_available_clocks: ZesFrequency, ZesFreqHandle, pfn_get_available_clocks(count: *mut u32, clocks: *mut f64);
    frequency_get_range: ZesFrequency, ZesFreqHandle, pfn_get_range(range: *mut c_void);
    frequency_set_range: ZesFrequency, ZesFreqHandle, pfn_set_range(range: *const c_void);
    frequency_get_state: ZesFrequency, ZesFreqHandle, pfn_get_state(state: *mut c_void);
    frequency_get_throttle_time: ZesFrequency, ZesFreqHandle, pfn_get_throttle_time(time: *mut c_void);

    fabric_port_get_properties: ZesFabricPort, ZesFabricPortHandle, pfn_get_properties(props: *mut c_void);
    fabric_port_get_link_type: ZesFabricPort, ZesFabricPortHandle, pfn_get_link_type(link: *mut c_void);
    fabric_port_get_config: ZesFabricPort, ZesFabricPortHandle, pfn_get_config(config: *mut c_void);
    fabric_port_set_config: ZesFabricPort, ZesFabricPortHandle, pfn_set_config(config: *const c_void);
    fabric_port_get_state: ZesFabricPort, ZesFabricPortHandle, pfn_get_state(state: *mut c_void);
    fabric_port_get_throughput: ZesFabricPort, ZesFabricPortHandle, pfn_get_throughput(throughput: *mut c_void);
    fabric_port_get_fabric_error_counters: ZesFabricPort, ZesFabricPortHandle, pfn_get_fabric_error_counters(counters: *mut c_void);

    ras_get_state_exp: ZesRasExp, ZesRasHandle, pfn_get_state_exp(count: *mut u32, state: *mut c_void);
    ras_clear_state_exp: ZesRasExp, ZesRasHandle, pfn_clear_state_exp(category: u32);
}

enumerate! {
    device_enum_engine_groups: pfn_enum_engine_groups -> ZesEngineHandle;
    device_enum_fabric_ports: pfn_enum_fabric_ports -> ZesFabricPortHandle;
    device_enum_frequency_domains: pfn_enum_frequency_domains -> ZesFreqHandle;
    device_enum_memory_modules: pfn_enum_memory_modules -> ZesMemHandle;
    device_enum_power_domains: pfn_enum_power_domains -> ZesPwrHandle;
    device_enum_ras_error_sets: pfn_enum_ras_error_sets -> ZesRasHandle;
}

pub unsafe extern "C" fn device_get(
    driver: ZesDriverHandle,
    count: *mut u32,
    devices: *mut ZesDeviceHandle,
) -> ZeResult {
    unsafe {
        forward_enum::<ZesDevice, _, _>(driver, count, devices, |t, h| {
            t.pfn_get.map(|f| unsafe { f(h, count, devices) })
        })
    }
}

pub unsafe extern "C" fn device_get_card_power_domain(
    device: ZesDeviceHandle,
    power: *mut ZesPwrHandle,
) -> ZeResult {
    unsafe {
        forward_out::<ZesDevice, _, _>(device, power, |t, h| {
            t.pfn_get_card_power_domain.map(|f| unsafe { f(h, power) })
        })
    }
}

/// The ports are given by loader handle and may belong to the device's driver only; each is
/// translated before the call.
pub unsafe extern "C" fn fabric_port_get_multi_port_throughput(
    device: ZesDeviceHandle,
    count: u32,
    ports: *mut ZesFabricPortHandle,
    throughput: *mut *mut c_void,
) -> ZeResult {
    if ports.is_null() {
        return ZeResult::ERROR_INVALID_NULL_POINTER;
    }
    let mut native = unsafe { unwrap_all(ports, count) };
    let ports = native.as_mut_ptr();
    unsafe {
        forward::<ZesFabricPort, _>(device, |t, h| {
            t.pfn_get_multi_port_throughput
                .map(|f| unsafe { f(h, count, ports, throughput) })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{ddi::DriverDdi, handle::LoaderHandle};

    unsafe extern "C" fn listen(
        _driver: ZesDriverHandle,
        _timeout: u32,
        count: u32,
        devices: *mut ZesDeviceHandle,
        num_events: *mut u32,
        events: *mut u32,
    ) -> ZeResult {
        // Report the native address of each device as its event.
        unsafe {
            for i in 0..count as usize {
                *events.add(i) = (*devices.add(i)).0 as usize as u32;
            }
            *num_events = count;
        }
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn limits(_pwr: ZesPwrHandle, count: *mut u32, _limits: *mut c_void) -> ZeResult {
        unsafe { *count = 7 };
        ZeResult::SUCCESS
    }

    #[test]
    fn event_listen_translates_devices() {
        let ddi = Arc::new(DriverDdi::default());
        ddi.store::<ZesDriver>(ZesDriverDdiTable {
            pfn_event_listen: Some(listen),
            ..Default::default()
        });
        let driver = ZesDriverHandle::factory()
            .wrap(ZesDriverHandle(0x51 as *mut c_void), &ddi)
            .unwrap();
        let mut devices: Vec<_> = [0x61usize, 0x62]
            .iter()
            .map(|raw| {
                ZesDeviceHandle::factory()
                    .wrap(ZesDeviceHandle(*raw as *mut c_void), &ddi)
                    .unwrap()
            })
            .collect();
        let mut num = 0;
        let mut events = [0u32; 2];
        let r = unsafe {
            driver_event_listen(driver, 0, 2, devices.as_mut_ptr(), &mut num, events.as_mut_ptr())
        };
        assert_eq!(r, ZeResult::SUCCESS);
        assert_eq!(num, 2);
        assert_eq!(events, [0x61, 0x62]);
    }

    #[test]
    fn passthrough_forwards() {
        let ddi = Arc::new(DriverDdi::default());
        ddi.store::<ZesPower>(ZesPowerDdiTable {
            pfn_get_limits_ext: Some(limits),
            ..Default::default()
        });
        let pwr = ZesPwrHandle::factory()
            .wrap(ZesPwrHandle(0x71 as *mut c_void), &ddi)
            .unwrap();
        let mut count = 0;
        let r = unsafe { power_get_limits_ext(pwr, &mut count, std::ptr::null_mut()) };
        assert_eq!(r, ZeResult::SUCCESS);
        assert_eq!(count, 7);

        let r = unsafe { power_get_properties(pwr, std::ptr::null_mut()) };
        assert_eq!(r, ZeResult::ERROR_UNINITIALIZED);
        let r = unsafe { power_get_limits_ext(ZesPwrHandle::null(), &mut count, std::ptr::null_mut()) };
        assert_eq!(r, ZeResult::ERROR_INVALID_NULL_HANDLE);
    }
}
