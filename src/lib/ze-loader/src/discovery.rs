//! Driver discovery: which subsystems a library implements, and what kind of devices it drives.
//!
//! Core drivers are asked about their devices once, while the registry is being populated. The
//! answers replace the name-derived driver type and, when PCI ordering was requested, give the
//! sorter an address to order by. A driver that cannot answer keeps the name-derived type and
//! sorts by type.

use std::{ptr::null_mut, sync::Arc};

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    ddi::{
        ze::{
            ZeDevice, ZeDeviceProperties, ZeDriver, ZeGlobal, ZePciExtProperties,
            DEVICE_PROPERTY_FLAG_INTEGRATED, DEVICE_TYPE_GPU, DEVICE_TYPE_VPU,
        },
        zes::ZesDevice,
        DdiCategory, GetTableFn,
    },
    handle::{LoaderHandle, ZeDeviceHandle, ZeDriverHandle},
    library::DriverLibrary,
    registry::{DriverEntry, DriverProperties, DriverType, PciAddress, Subsystems},
    version::ApiVersion,
    ZeResult,
};

/// Which subsystems a driver library implements, judged by the resolvers it exports.
pub fn exported_subsystems(lib: &dyn DriverLibrary) -> Subsystems {
    let mut subsystems = Subsystems::empty();
    if [ZeGlobal::SYMBOL, ZeDriver::SYMBOL, ZeDevice::SYMBOL]
        .iter()
        .any(|s| lib.lookup(s).is_some())
    {
        subsystems |= Subsystems::CORE;
    }
    if lib.lookup(ZesDevice::SYMBOL).is_some() {
        subsystems |= Subsystems::SYSMAN;
    }
    subsystems
}

/// What a driver reported about itself and its devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceSummary {
    pub driver_type: Option<DriverType>,
    pub api_version: Option<ApiVersion>,
    /// Address of the driver's first device.
    pub pci: Option<PciAddress>,
}

/// Build the registry entry for a discovered driver library.
pub fn describe(lib: Arc<dyn DriverLibrary>, subsystems: Subsystems, pci_order: bool) -> DriverEntry {
    let entry = DriverEntry::new(lib.clone()).with_pci_order(pci_order);
    if !subsystems.contains(Subsystems::CORE) {
        return entry;
    }
    let Some(summary) = query_devices(lib.as_ref()) else {
        debug!("{}: device query failed, ordering by name-derived type", lib.name());
        return entry;
    };
    trace!("{}: {:?}", lib.name(), summary);
    if pci_order && summary.pci.is_none() {
        debug!("{}: no PCI address reported, ordering by type", lib.name());
    }
    let entry = entry.with_properties(DriverProperties {
        api_version: summary.api_version,
        pci: summary.pci,
    });
    match summary.driver_type {
        Some(ty) => entry.with_type(ty),
        None => entry,
    }
}

fn succeeded(result: ZeResult) -> Option<()> {
    result.is_success().then_some(())
}

// The driver's own table for `C`, bypassing the registry.
fn own_table<C: DdiCategory>(lib: &dyn DriverLibrary) -> Option<C::Table> {
    let get: GetTableFn<C::Table> = unsafe { lib.lookup(C::SYMBOL)?.cast() };
    let mut table = C::Table::default();
    succeeded(unsafe { get(ApiVersion::CURRENT, &mut table) })?;
    Some(table)
}

/// Initialize the driver and ask it about its first driver instance's devices.
pub fn query_devices(lib: &dyn DriverLibrary) -> Option<DeviceSummary> {
    let global = own_table::<ZeGlobal>(lib)?;
    let drivers = own_table::<ZeDriver>(lib)?;
    let devices = own_table::<ZeDevice>(lib)?;

    unsafe {
        succeeded((global.pfn_init?)(0))?;

        let mut count: u32 = 1;
        let mut driver = ZeDriverHandle::null();
        succeeded((drivers.pfn_get?)(&mut count, &mut driver))?;
        if count == 0 || driver.as_raw().is_null() {
            return None;
        }

        let api_version = drivers.pfn_get_api_version.and_then(|f| {
            let mut raw: u32 = 0;
            f(driver, &mut raw)
                .is_success()
                .then(|| ApiVersion::from_raw(raw))
        });

        let device_get = devices.pfn_get?;
        let mut count: u32 = 0;
        succeeded(device_get(driver, &mut count, null_mut()))?;
        let mut handles = vec![ZeDeviceHandle::null(); count as usize];
        succeeded(device_get(driver, &mut count, handles.as_mut_ptr()))?;
        handles.truncate(count as usize);

        let driver_type = devices.pfn_get_properties.and_then(|get_properties| {
            handles
                .iter()
                .map(|&dev| {
                    let mut props = ZeDeviceProperties::default();
                    succeeded(get_properties(dev, (&mut props as *mut ZeDeviceProperties).cast()))
                        .map(|_| device_type(&props))
                })
                .collect::<Option<Vec<_>>>()
                .and_then(|types| combine(&types))
        });

        let pci = match (devices.pfn_pci_get_properties_ext, handles.first()) {
            (Some(get_pci), Some(&dev)) => {
                let mut props = ZePciExtProperties::default();
                succeeded(get_pci(dev, (&mut props as *mut ZePciExtProperties).cast()))
                    .and_then(|_| pci_address(&props))
            }
            _ => None,
        };

        Some(DeviceSummary {
            driver_type,
            api_version,
            pci,
        })
    }
}

fn device_type(props: &ZeDeviceProperties) -> DriverType {
    match props.device_type {
        DEVICE_TYPE_GPU if props.flags & DEVICE_PROPERTY_FLAG_INTEGRATED != 0 => {
            DriverType::IntegratedGpu
        }
        DEVICE_TYPE_GPU => DriverType::DiscreteGpu,
        DEVICE_TYPE_VPU => DriverType::Npu,
        _ => DriverType::Other,
    }
}

// A driver whose devices disagree is mixed. No devices tells us nothing.
fn combine(types: &[DriverType]) -> Option<DriverType> {
    match types.iter().unique().collect::<Vec<_>>()[..] {
        [] => None,
        [&ty] => Some(ty),
        _ => Some(DriverType::Mixed),
    }
}

fn pci_address(props: &ZePciExtProperties) -> Option<PciAddress> {
    let addr = props.address;
    Some(PciAddress {
        domain: addr.domain,
        bus: u8::try_from(addr.bus).ok()?,
        device: u8::try_from(addr.device).ok()?,
        function: u8::try_from(addr.function).ok()?,
    })
}

#[cfg(test)]
pub(crate) mod mock {
    //! A fake core driver whose single device reports a fixed kind and PCI bus.

    use std::ffi::c_void;

    use super::*;
    use crate::{
        ddi::ze::{ZeDeviceDdiTable, ZeDriverDdiTable, ZeGlobalDdiTable},
        library::mock::MockLibrary,
    };

    pub const INTEGRATED: u32 = 0x100;

    unsafe extern "C" fn init(_flags: u32) -> ZeResult {
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn driver_get(count: *mut u32, drivers: *mut ZeDriverHandle) -> ZeResult {
        unsafe {
            if !drivers.is_null() && *count > 0 {
                *drivers = ZeDriverHandle(0xd0 as *mut c_void);
            }
            *count = 1;
        }
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn api_version(_d: ZeDriverHandle, version: *mut u32) -> ZeResult {
        unsafe { *version = ApiVersion::V1_12.raw() };
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn device_get(
        _d: ZeDriverHandle,
        count: *mut u32,
        devices: *mut ZeDeviceHandle,
    ) -> ZeResult {
        unsafe {
            if !devices.is_null() && *count > 0 {
                *devices = ZeDeviceHandle(0xde as *mut c_void);
            }
            *count = 1;
        }
        ZeResult::SUCCESS
    }

    // KIND is a device type, or'd with INTEGRATED for integrated GPUs.
    unsafe extern "C" fn device_properties<const KIND: u32>(
        _d: ZeDeviceHandle,
        props: *mut c_void,
    ) -> ZeResult {
        let props = props.cast::<ZeDeviceProperties>();
        unsafe {
            (*props).device_type = KIND & 0xff;
            if KIND & INTEGRATED != 0 {
                (*props).flags |= DEVICE_PROPERTY_FLAG_INTEGRATED;
            }
        }
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn pci_properties<const BUS: u32>(_d: ZeDeviceHandle, props: *mut c_void) -> ZeResult {
        let props = props.cast::<ZePciExtProperties>();
        unsafe { (*props).address.bus = BUS };
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn global_table(_v: ApiVersion, t: *mut ZeGlobalDdiTable) -> ZeResult {
        unsafe { (*t).pfn_init = Some(init) };
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn driver_table(_v: ApiVersion, t: *mut ZeDriverDdiTable) -> ZeResult {
        unsafe {
            (*t).pfn_get = Some(driver_get);
            (*t).pfn_get_api_version = Some(api_version);
        }
        ZeResult::SUCCESS
    }

    unsafe extern "C" fn device_table<const KIND: u32, const BUS: u32>(
        _v: ApiVersion,
        t: *mut ZeDeviceDdiTable,
    ) -> ZeResult {
        unsafe {
            (*t).pfn_get = Some(device_get);
            (*t).pfn_get_properties = Some(device_properties::<KIND>);
            (*t).pfn_pci_get_properties_ext = Some(pci_properties::<BUS>);
        }
        ZeResult::SUCCESS
    }

    /// A driver with one device of `KIND` on PCI bus `BUS`.
    pub fn device_driver<const KIND: u32, const BUS: u32>(name: &str) -> MockLibrary {
        MockLibrary::new(name)
            .export(ZeGlobal::SYMBOL, global_table as *const c_void)
            .export(ZeDriver::SYMBOL, driver_table as *const c_void)
            .export(ZeDevice::SYMBOL, device_table::<KIND, BUS> as *const c_void)
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::*, *};
    use crate::library::mock::MockLibrary;

    const DISCRETE: u32 = DEVICE_TYPE_GPU;
    const INTEGRATED_GPU: u32 = DEVICE_TYPE_GPU | INTEGRATED;

    #[test]
    fn subsystems_from_exports() {
        let lib = device_driver::<DISCRETE, 1>("a");
        assert_eq!(exported_subsystems(&lib), Subsystems::CORE);
        let lib = MockLibrary::new("b").export(ZesDevice::SYMBOL, 1 as *const std::ffi::c_void);
        assert_eq!(exported_subsystems(&lib), Subsystems::SYSMAN);
        assert!(exported_subsystems(&MockLibrary::new("c")).is_empty());
    }

    #[test]
    fn device_query() {
        let lib = device_driver::<INTEGRATED_GPU, 7>("libze_vendor");
        let summary = query_devices(&lib).unwrap();
        assert_eq!(summary.driver_type, Some(DriverType::IntegratedGpu));
        assert_eq!(summary.api_version, Some(ApiVersion::V1_12));
        assert_eq!(summary.pci.map(|p| p.bus), Some(7));

        let npu = device_driver::<DEVICE_TYPE_VPU, 0>("libze_vendor");
        assert_eq!(query_devices(&npu).unwrap().driver_type, Some(DriverType::Npu));
    }

    #[test]
    fn describe_replaces_name_heuristic() {
        let lib = Arc::new(device_driver::<DISCRETE, 3>("libze_intel_npu"));
        let entry = describe(lib, Subsystems::CORE, true);
        assert_eq!(entry.driver_type(), DriverType::DiscreteGpu);
        assert!(entry.requested_pci_order());
        assert_eq!(entry.properties().and_then(|p| p.pci).map(|p| p.bus), Some(3));
    }

    unsafe extern "C" fn empty_driver_table(_v: ApiVersion, _t: *mut crate::ddi::ze::ZeDriverDdiTable) -> ZeResult {
        ZeResult::SUCCESS
    }

    #[test]
    fn unanswered_query_keeps_name_type() {
        let lib = Arc::new(
            MockLibrary::new("libze_intel_gpu").export(ZeDriver::SYMBOL, empty_driver_table as *const std::ffi::c_void),
        );
        let entry = describe(lib.clone(), Subsystems::SYSMAN, false);
        assert_eq!(lib.lookups(), 0);
        assert_eq!(entry.driver_type(), DriverType::Gpu);

        // No global resolver, so the driver cannot be initialized.
        let entry = describe(lib, Subsystems::CORE, true);
        assert_eq!(entry.driver_type(), DriverType::Gpu);
        assert!(entry.requested_pci_order());
        assert!(entry.properties().is_none());
    }

    #[test]
    fn mixed_devices() {
        use DriverType::*;
        assert_eq!(combine(&[]), None);
        assert_eq!(combine(&[Npu, Npu]), Some(Npu));
        assert_eq!(combine(&[DiscreteGpu, IntegratedGpu]), Some(Mixed));
    }

    #[test]
    fn wide_pci_fields_are_rejected() {
        let mut props = ZePciExtProperties::default();
        props.address.bus = 0x1ff;
        assert!(pci_address(&props).is_none());
        props.address.bus = 0x3;
        props.address.domain = 0x10000;
        assert_eq!(pci_address(&props).map(|p| p.domain), Some(0x10000));
    }
}
