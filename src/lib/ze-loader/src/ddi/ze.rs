//! Core API tables.

use std::ffi::{c_char, c_void};

use super::ddi_table;
use crate::{
    forward::ze as fwd,
    handle::{ZeDeviceHandle, ZeDriverHandle},
};

/// `ze_init_driver_type_desc_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ZeInitDriverTypeDesc {
    pub stype: u32,
    pub p_next: *const c_void,
    pub flags: u32,
}

pub const STRUCTURE_TYPE_DEVICE_PROPERTIES: u32 = 0x3;
pub const STRUCTURE_TYPE_PCI_EXT_PROPERTIES: u32 = 0x10008;

pub const DEVICE_TYPE_GPU: u32 = 1;
pub const DEVICE_TYPE_VPU: u32 = 5;
pub const DEVICE_PROPERTY_FLAG_INTEGRATED: u32 = 1 << 0;

/// `ze_device_properties_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ZeDeviceProperties {
    pub stype: u32,
    pub p_next: *mut c_void,
    pub device_type: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub flags: u32,
    pub subdevice_id: u32,
    pub core_clock_rate: u32,
    pub max_mem_alloc_size: u64,
    pub max_hardware_contexts: u32,
    pub max_command_queue_priority: u32,
    pub num_threads_per_eu: u32,
    pub physical_eu_simd_width: u32,
    pub num_eus_per_subslice: u32,
    pub num_subslices_per_slice: u32,
    pub num_slices: u32,
    pub timer_resolution: u64,
    pub timestamp_valid_bits: u32,
    pub kernel_timestamp_valid_bits: u32,
    pub uuid: [u8; 16],
    pub name: [c_char; 256],
}

impl Default for ZeDeviceProperties {
    fn default() -> Self {
        Self {
            stype: STRUCTURE_TYPE_DEVICE_PROPERTIES,
            p_next: std::ptr::null_mut(),
            device_type: 0,
            vendor_id: 0,
            device_id: 0,
            flags: 0,
            subdevice_id: 0,
            core_clock_rate: 0,
            max_mem_alloc_size: 0,
            max_hardware_contexts: 0,
            max_command_queue_priority: 0,
            num_threads_per_eu: 0,
            physical_eu_simd_width: 0,
            num_eus_per_subslice: 0,
            num_subslices_per_slice: 0,
            num_slices: 0,
            timer_resolution: 0,
            timestamp_valid_bits: 0,
            kernel_timestamp_valid_bits: 0,
            uuid: [0; 16],
            name: [0; 256],
        }
    }
}

/// `ze_pci_address_ext_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ZePciAddress {
    pub domain: u32,
    pub bus: u32,
    pub device: u32,
    pub function: u32,
}

/// `ze_pci_speed_ext_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ZePciSpeed {
    pub gen: i32,
    pub width: i32,
    pub max_bandwidth: i64,
}

/// `ze_pci_ext_properties_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ZePciExtProperties {
    pub stype: u32,
    pub p_next: *mut c_void,
    pub address: ZePciAddress,
    pub max_speed: ZePciSpeed,
}

impl Default for ZePciExtProperties {
    fn default() -> Self {
        Self {
            stype: STRUCTURE_TYPE_PCI_EXT_PROPERTIES,
            p_next: std::ptr::null_mut(),
            address: ZePciAddress::default(),
            max_speed: ZePciSpeed::default(),
        }
    }
}

ddi_table! {
    ZeGlobal => ZeGlobalDdiTable {
        symbol: "zeGetGlobalProcAddrTable",
        subsystem: Core,
        optional: false,
        slot: ze_global,
        entries: {
            pfn_init(u32) = fwd::init, since V1_0 legacy;
            pfn_init_drivers(*mut u32, *mut ZeDriverHandle, *mut ZeInitDriverTypeDesc) = fwd::init_drivers, since V1_10;
        }
    }
}

ddi_table! {
    ZeDriver => ZeDriverDdiTable {
        symbol: "zeGetDriverProcAddrTable",
        subsystem: Core,
        optional: false,
        slot: ze_driver,
        entries: {
            pfn_get(*mut u32, *mut ZeDriverHandle) = fwd::driver_get, since V1_0 legacy;
            pfn_get_api_version(ZeDriverHandle, *mut u32) = fwd::driver_get_api_version, since V1_0 legacy;
            pfn_get_properties(ZeDriverHandle, *mut c_void) = fwd::driver_get_properties, since V1_0 legacy;
            pfn_get_ipc_properties(ZeDriverHandle, *mut c_void) = fwd::driver_get_ipc_properties, since V1_0 legacy;
            pfn_get_extension_properties(ZeDriverHandle, *mut u32, *mut c_void) = fwd::driver_get_extension_properties, since V1_0 legacy;
            pfn_get_extension_function_address(ZeDriverHandle, *const u8, *mut *mut c_void) = fwd::driver_get_extension_function_address, since V1_1;
            pfn_get_last_error_description(ZeDriverHandle, *mut *const u8) = fwd::driver_get_last_error_description, since V1_6;
        }
    }
}

ddi_table! {
    ZeDevice => ZeDeviceDdiTable {
        symbol: "zeGetDeviceProcAddrTable",
        subsystem: Core,
        optional: false,
        slot: ze_device,
        entries: {
            pfn_get(ZeDriverHandle, *mut u32, *mut ZeDeviceHandle) = fwd::device_get, since V1_0 legacy;
            pfn_get_sub_devices(ZeDeviceHandle, *mut u32, *mut ZeDeviceHandle) = fwd::device_get_sub_devices, since V1_0 legacy;
            pfn_get_properties(ZeDeviceHandle, *mut c_void) = fwd::device_get_properties, since V1_0 legacy;
            pfn_get_compute_properties(ZeDeviceHandle, *mut c_void) = fwd::device_get_compute_properties, since V1_0 legacy;
            pfn_get_memory_properties(ZeDeviceHandle, *mut u32, *mut c_void) = fwd::device_get_memory_properties, since V1_0 legacy;
            pfn_can_access_peer(ZeDeviceHandle, ZeDeviceHandle, *mut u8) = fwd::device_can_access_peer, since V1_0 legacy;
            pfn_pci_get_properties_ext(ZeDeviceHandle, *mut c_void) = fwd::device_pci_get_properties_ext, since V1_3;
            pfn_get_root_device(ZeDeviceHandle, *mut ZeDeviceHandle) = fwd::device_get_root_device, since V1_7;
        }
    }
}
