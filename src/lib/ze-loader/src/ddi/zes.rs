//! System-management (sysman) API tables.

use std::ffi::c_void;

use super::ddi_table;
use crate::{
    forward::zes as fwd,
    handle::{
        ZesDeviceHandle, ZesDriverHandle, ZesEngineHandle, ZesFabricPortHandle, ZesFreqHandle,
        ZesMemHandle, ZesPwrHandle, ZesRasHandle,
    },
};

ddi_table! {
    /// Introduced in 1.5; older drivers do not export it.
    ZesGlobal => ZesGlobalDdiTable {
        symbol: "zesGetGlobalProcAddrTable",
        subsystem: Sysman,
        optional: true,
        slot: zes_global,
        entries: {
            pfn_init(u32) = fwd::init, since V1_5;
        }
    }
}

ddi_table! {
    ZesDriver => ZesDriverDdiTable {
        symbol: "zesGetDriverProcAddrTable",
        subsystem: Sysman,
        optional: false,
        slot: zes_driver,
        entries: {
            pfn_event_listen(ZesDriverHandle, u32, u32, *mut ZesDeviceHandle, *mut u32, *mut u32) = fwd::driver_event_listen, since V1_0 legacy;
            pfn_event_listen_ex(ZesDriverHandle, u64, u32, *mut ZesDeviceHandle, *mut u32, *mut u32) = fwd::driver_event_listen_ex, since V1_1;
            pfn_get(*mut u32, *mut ZesDriverHandle) = fwd::driver_get, since V1_5;
            pfn_get_extension_properties(ZesDriverHandle, *mut u32, *mut c_void) = fwd::driver_get_extension_properties, since V1_8;
            pfn_get_extension_function_address(ZesDriverHandle, *const u8, *mut *mut c_void) = fwd::driver_get_extension_function_address, since V1_8;
        }
    }
}

ddi_table! {
    ZesDevice => ZesDeviceDdiTable {
        symbol: "zesGetDeviceProcAddrTable",
        subsystem: Sysman,
        optional: false,
        slot: zes_device,
        entries: {
            pfn_get_properties(ZesDeviceHandle, *mut c_void) = fwd::device_get_properties, since V1_0 legacy;
            pfn_get_state(ZesDeviceHandle, *mut c_void) = fwd::device_get_state, since V1_0 legacy;
            pfn_reset(ZesDeviceHandle, u8) = fwd::device_reset, since V1_0 legacy;
            pfn_enum_engine_groups(ZesDeviceHandle, *mut u32, *mut ZesEngineHandle) = fwd::device_enum_engine_groups, since V1_0 legacy;
            pfn_enum_fabric_ports(ZesDeviceHandle, *mut u32, *mut ZesFabricPortHandle) = fwd::device_enum_fabric_ports, since V1_0 legacy;
            pfn_enum_frequency_domains(ZesDeviceHandle, *mut u32, *mut ZesFreqHandle) = fwd::device_enum_frequency_domains, since V1_0 legacy;
            pfn_enum_memory_modules(ZesDeviceHandle, *mut u32, *mut ZesMemHandle) = fwd::device_enum_memory_modules, since V1_0 legacy;
            pfn_enum_power_domains(ZesDeviceHandle, *mut u32, *mut ZesPwrHandle) = fwd::device_enum_power_domains, since V1_0 legacy;
            pfn_enum_ras_error_sets(ZesDeviceHandle, *mut u32, *mut ZesRasHandle) = fwd::device_enum_ras_error_sets, since V1_0 legacy;
            pfn_get_card_power_domain(ZesDeviceHandle, *mut ZesPwrHandle) = fwd::device_get_card_power_domain, since V1_3;
            pfn_get(ZesDriverHandle, *mut u32, *mut ZesDeviceHandle) = fwd::device_get, since V1_5;
            pfn_reset_ext(ZesDeviceHandle, *mut c_void) = fwd::device_reset_ext, since V1_7;
        }
    }
}

ddi_table! {
    ZesPower => ZesPowerDdiTable {
        symbol: "zesGetPowerProcAddrTable",
        subsystem: Sysman,
        optional: false,
        slot: zes_power,
        entries: {
            pfn_get_properties(ZesPwrHandle, *mut c_void) = fwd::power_get_properties, since V1_0;
            pfn_get_energy_counter(ZesPwrHandle, *mut c_void) = fwd::power_get_energy_counter, since V1_0;
            pfn_get_limits(ZesPwrHandle, *mut c_void, *mut c_void, *mut c_void) = fwd::power_get_limits, since V1_0;
            pfn_set_limits(ZesPwrHandle, *const c_void, *const c_void, *const c_void) = fwd::power_set_limits, since V1_0;
            pfn_get_limits_ext(ZesPwrHandle, *mut u32, *mut c_void) = fwd::power_get_limits_ext, since V1_4;
            pfn_set_limits_ext(ZesPwrHandle, *mut u32, *mut c_void) = fwd::power_set_limits_ext, since V1_4;
        }
    }
}

ddi_table! {
    ZesEngine => ZesEngineDdiTable {
        symbol: "zesGetEngineProcAddrTable",
        subsystem: Sysman,
        optional: false,
        slot: zes_engine,
        entries: {
            pfn_get_properties(ZesEngineHandle, *mut c_void) = fwd::engine_get_properties, since V1_0;
            pfn_get_activity(ZesEngineHandle, *mut c_void) = fwd::engine_get_activity, since V1_0;
            pfn_get_activity_ext(ZesEngineHandle, *mut u32, *mut c_void) = fwd::engine_get_activity_ext, since V1_7;
        }
    }
}

ddi_table! {
    ZesMemory => ZesMemoryDdiTable {
        symbol: "zesGetMemoryProcAddrTable",
        subsystem: Sysman,
        optional: false,
        slot: zes_memory,
        entries: {
            pfn_get_properties(ZesMemHandle, *mut c_void) = fwd::memory_get_properties, since V1_0;
            pfn_get_state(ZesMemHandle, *mut c_void) = fwd::memory_get_state, since V1_0;
            pfn_get_bandwidth(ZesMemHandle, *mut c_void) = fwd::memory_get_bandwidth, since V1_0;
        }
    }
}

ddi_table! {
    ZesFrequency => ZesFrequencyDdiTable {
        symbol: "zesGetFrequencyProcAddrTable",
        subsystem: Sysman,
        optional: false,
        slot: zes_frequency,
        entries: {
            pfn_get_properties(ZesFreqHandle, *mut c_void) = fwd::frequency_get_properties, since V1_0;
            pfn_get_available_clocks(ZesFreqHandle, *mut u32, *mut f64) = fwd::frequency_get_available_clocks, since V1_0;
            pfn_get_range(ZesFreqHandle, *mut c_void) = fwd::frequency_get_range, since V1_0;
            pfn_set_range(ZesFreqHandle, *const c_void) = fwd::frequency_set_range, since V1_0;
            pfn_get_state(ZesFreqHandle, *mut c_void) = fwd::frequency_get_state, since V1_0;
            pfn_get_throttle_time(ZesFreqHandle, *mut c_void) = fwd::frequency_get_throttle_time, since V1_0;
        }
    }
}

ddi_table! {
    ZesFabricPort => ZesFabricPortDdiTable {
        symbol: "zesGetFabricPortProcAddrTable",
        subsystem: Sysman,
        optional: false,
        slot: zes_fabric_port,
        entries: {
            pfn_get_properties(ZesFabricPortHandle, *mut c_void) = fwd::fabric_port_get_properties, since V1_0;
            pfn_get_link_type(ZesFabricPortHandle, *mut c_void) = fwd::fabric_port_get_link_type, since V1_0;
            pfn_get_config(ZesFabricPortHandle, *mut c_void) = fwd::fabric_port_get_config, since V1_0;
            pfn_set_config(ZesFabricPortHandle, *const c_void) = fwd::fabric_port_set_config, since V1_0;
            pfn_get_state(ZesFabricPortHandle, *mut c_void) = fwd::fabric_port_get_state, since V1_0;
            pfn_get_throughput(ZesFabricPortHandle, *mut c_void) = fwd::fabric_port_get_throughput, since V1_0;
            pfn_get_fabric_error_counters(ZesFabricPortHandle, *mut c_void) = fwd::fabric_port_get_fabric_error_counters, since V1_7;
            pfn_get_multi_port_throughput(ZesDeviceHandle, u32, *mut ZesFabricPortHandle, *mut *mut c_void) = fwd::fabric_port_get_multi_port_throughput, since V1_7;
        }
    }
}

ddi_table! {
    /// Experimental RAS state queries. Drivers may not export this table.
    ZesRasExp => ZesRasExpDdiTable {
        symbol: "zesGetRasExpProcAddrTable",
        subsystem: Sysman,
        optional: true,
        slot: zes_ras_exp,
        entries: {
            pfn_get_state_exp(ZesRasHandle, *mut u32, *mut c_void) = fwd::ras_get_state_exp, since V1_7;
            pfn_clear_state_exp(ZesRasHandle, u32) = fwd::ras_clear_state_exp, since V1_7;
        }
    }
}
