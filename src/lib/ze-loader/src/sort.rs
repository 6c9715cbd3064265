//! One-shot ordering of the registry partitions.

use std::{str::FromStr, sync::Arc};

use tracing::debug;

use crate::registry::{DriverEntry, DriverRegistry, DriverType, PciAddress, Subsystem};

/// Caller-supplied ordering preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDescriptor {
    /// Drivers that asked for it, and whose PCI address is known, are ordered by PCI address
    /// ahead of the type ordering.
    ByPciId,
}

/// One item of a user driver ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverOrderSpec {
    /// The driver at this position.
    GlobalIndex(usize),
    /// Every driver of this type.
    Type(DriverType),
    /// The n-th driver of this type.
    TypeAndIndex(DriverType, usize),
}

impl FromStr for DriverOrderSpec {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((ty, idx)) = s.split_once(':') {
            let ty = ty.trim().parse::<DriverType>().map_err(|_| ())?;
            let idx = idx.trim().parse::<usize>().map_err(|_| ())?;
            return Ok(DriverOrderSpec::TypeAndIndex(ty, idx));
        }
        if let Ok(idx) = s.parse::<usize>() {
            return Ok(DriverOrderSpec::GlobalIndex(idx));
        }
        s.parse::<DriverType>()
            .map(DriverOrderSpec::Type)
            .map_err(|_| ())
    }
}

impl DriverOrderSpec {
    /// Parse a comma-separated ordering. Malformed items are dropped.
    pub fn parse_list(s: &str) -> Vec<DriverOrderSpec> {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .filter_map(|item| item.parse().ok())
            .collect()
    }
}

// An NPU request also selects drivers of type "other".
fn type_matches(actual: DriverType, requested: DriverType) -> bool {
    actual == requested || (requested == DriverType::Npu && actual == DriverType::Other)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Pci(PciAddress),
    Type(u8),
}

fn sort_key(driver: &DriverEntry, descriptor: Option<SortDescriptor>) -> SortKey {
    if descriptor == Some(SortDescriptor::ByPciId) && driver.requested_pci_order() {
        if let Some(pci) = driver.properties().and_then(|p| p.pci) {
            return SortKey::Pci(pci);
        }
    }
    SortKey::Type(driver.driver_type().priority())
}

/// Order drivers by PCI address (when requested) and declared type. The sort is stable, so
/// drivers with equal keys keep discovery order.
pub fn order_by_type(
    drivers: &[Arc<DriverEntry>],
    descriptor: Option<SortDescriptor>,
) -> Vec<Arc<DriverEntry>> {
    let mut sorted = drivers.to_vec();
    sorted.sort_by_key(|d| sort_key(d, descriptor));
    sorted
}

/// Move the drivers selected by `specs` to the front, in spec order. A driver selected more than
/// once keeps its first position; the rest follow in their existing order.
pub fn apply_user_order(
    drivers: Vec<Arc<DriverEntry>>,
    specs: &[DriverOrderSpec],
) -> Vec<Arc<DriverEntry>> {
    if specs.is_empty() || drivers.is_empty() {
        return drivers;
    }

    let mut picked: Vec<usize> = Vec::with_capacity(drivers.len());
    let mut pick = |idx: usize| {
        if !picked.contains(&idx) {
            picked.push(idx);
        }
    };

    for spec in specs {
        match *spec {
            DriverOrderSpec::GlobalIndex(idx) if idx < drivers.len() => pick(idx),
            DriverOrderSpec::GlobalIndex(_) => {}
            DriverOrderSpec::Type(ty) => drivers
                .iter()
                .enumerate()
                .filter(|(_, d)| type_matches(d.driver_type(), ty))
                .for_each(|(idx, _)| pick(idx)),
            DriverOrderSpec::TypeAndIndex(ty, n) => {
                if let Some((idx, _)) = drivers
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| type_matches(d.driver_type(), ty))
                    .nth(n)
                {
                    pick(idx)
                }
            }
        }
    }

    let mut ordered: Vec<Arc<DriverEntry>> =
        picked.iter().map(|&idx| drivers[idx].clone()).collect();
    ordered.extend(
        drivers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !picked.contains(idx))
            .map(|(_, d)| d.clone()),
    );
    ordered
}

/// Orders registry partitions before first use.
#[derive(Clone, Debug, Default)]
pub struct DriverSorter {
    descriptor: Option<SortDescriptor>,
    user_order: Vec<DriverOrderSpec>,
}

impl DriverSorter {
    pub fn new(descriptor: Option<SortDescriptor>, user_order: Vec<DriverOrderSpec>) -> Self {
        Self {
            descriptor,
            user_order,
        }
    }

    /// Sort the sysman partition when `sysman_only` is set, the core partition otherwise. Runs at
    /// most once per partition; later calls return the established order.
    pub fn sort<'a>(
        &self,
        registry: &'a DriverRegistry,
        sysman_only: bool,
    ) -> &'a [Arc<DriverEntry>] {
        let subsystem = if sysman_only {
            Subsystem::Sysman
        } else {
            Subsystem::Core
        };
        self.sort_partition(registry, subsystem)
    }

    pub fn sort_partition<'a>(
        &self,
        registry: &'a DriverRegistry,
        subsystem: Subsystem,
    ) -> &'a [Arc<DriverEntry>] {
        registry.partition(subsystem).sort_once(|drivers| {
            let sorted = apply_user_order(order_by_type(drivers, self.descriptor), &self.user_order);
            debug!(
                "{} driver order: [{}]",
                subsystem,
                sorted
                    .iter()
                    .map(|d| d.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            sorted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        library::mock::MockLibrary,
        registry::{DriverProperties, Subsystems},
    };

    fn standard() -> Vec<Arc<DriverEntry>> {
        [
            ("discrete_gpu_0", DriverType::DiscreteGpu),
            ("discrete_gpu_1", DriverType::DiscreteGpu),
            ("integrated_gpu_0", DriverType::IntegratedGpu),
            ("gpu_mixed_0", DriverType::Gpu),
            ("npu_0", DriverType::Npu),
            ("other_0", DriverType::Other),
        ]
        .into_iter()
        .map(|(name, ty)| Arc::new(DriverEntry::new(Arc::new(MockLibrary::new(name))).with_type(ty)))
        .collect()
    }

    fn ordered(env: &str) -> Vec<String> {
        apply_user_order(standard(), &DriverOrderSpec::parse_list(env))
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    fn unchanged() -> Vec<String> {
        standard().iter().map(|d| d.name().to_string()).collect()
    }

    #[test]
    fn parse_specs() {
        assert_eq!(
            DriverOrderSpec::parse_list("  NPU : 0  ,  GPU  ,  1  "),
            vec![
                DriverOrderSpec::TypeAndIndex(DriverType::Npu, 0),
                DriverOrderSpec::Type(DriverType::Gpu),
                DriverOrderSpec::GlobalIndex(1),
            ]
        );
        assert_eq!(
            DriverOrderSpec::parse_list("NPU:,GPU:abc,::,INVALID:SYNTAX,2"),
            vec![DriverOrderSpec::GlobalIndex(2)]
        );
        assert!(DriverOrderSpec::parse_list(",,,,").is_empty());
        assert!(DriverOrderSpec::parse_list("").is_empty());
    }

    #[test]
    fn empty_order_unchanged() {
        assert_eq!(ordered(""), unchanged());
        assert_eq!(ordered("DISCRETE_GPU_ONLY:999"), unchanged());
        assert_eq!(ordered("INVALID_TYPE:0"), unchanged());
        assert!(apply_user_order(vec![], &DriverOrderSpec::parse_list("0,1")).is_empty());
    }

    #[test]
    fn global_indices() {
        assert_eq!(
            ordered("4,1,0"),
            vec![
                "npu_0",
                "discrete_gpu_1",
                "discrete_gpu_0",
                "integrated_gpu_0",
                "gpu_mixed_0",
                "other_0"
            ]
        );
        assert_eq!(
            ordered("999,2,1000"),
            vec![
                "integrated_gpu_0",
                "discrete_gpu_0",
                "discrete_gpu_1",
                "gpu_mixed_0",
                "npu_0",
                "other_0"
            ]
        );
    }

    #[test]
    fn types() {
        assert_eq!(
            ordered("NPU,DISCRETE_GPU_ONLY,GPU"),
            vec![
                "npu_0",
                "other_0",
                "discrete_gpu_0",
                "discrete_gpu_1",
                "gpu_mixed_0",
                "integrated_gpu_0"
            ]
        );
        assert_eq!(ordered("NPU:1")[0], "other_0");
    }

    #[test]
    fn mixed_syntax() {
        assert_eq!(
            ordered("DISCRETE_GPU_ONLY:1,3,NPU:0"),
            vec![
                "discrete_gpu_1",
                "gpu_mixed_0",
                "npu_0",
                "discrete_gpu_0",
                "integrated_gpu_0",
                "other_0"
            ]
        );
        assert_eq!(
            ordered("2,NPU,0"),
            vec![
                "integrated_gpu_0",
                "npu_0",
                "other_0",
                "discrete_gpu_0",
                "discrete_gpu_1",
                "gpu_mixed_0"
            ]
        );
        assert_eq!(
            ordered("NPU:0,NPU:0,1,1"),
            vec![
                "npu_0",
                "discrete_gpu_1",
                "discrete_gpu_0",
                "integrated_gpu_0",
                "gpu_mixed_0",
                "other_0"
            ]
        );
    }

    #[test]
    fn type_priority() {
        let mut drivers = standard();
        drivers.reverse();
        let names: Vec<_> = order_by_type(&drivers, None)
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "discrete_gpu_1",
                "discrete_gpu_0",
                "gpu_mixed_0",
                "integrated_gpu_0",
                "npu_0",
                "other_0"
            ]
        );
    }

    #[test]
    fn unknown_sorts_last() {
        let lib = |n: &str| Arc::new(MockLibrary::new(n));
        let drivers = vec![
            Arc::new(DriverEntry::new(lib("mystery")).with_type(DriverType::Unknown)),
            Arc::new(DriverEntry::new(lib("npu")).with_type(DriverType::Npu)),
        ];
        let sorted = order_by_type(&drivers, None);
        assert_eq!(sorted[0].name(), "npu");
        assert_eq!(sorted[1].name(), "mystery");
    }

    #[test]
    fn pci_order_takes_precedence() {
        let lib = |n: &str| Arc::new(MockLibrary::new(n));
        let at = |bus| DriverProperties {
            api_version: None,
            pci: Some(PciAddress {
                domain: 0,
                bus,
                device: 0,
                function: 0,
            }),
        };
        let drivers = vec![
            Arc::new(DriverEntry::new(lib("discrete")).with_type(DriverType::DiscreteGpu)),
            Arc::new(
                DriverEntry::new(lib("integrated-b"))
                    .with_type(DriverType::IntegratedGpu)
                    .with_pci_order(true)
                    .with_properties(at(9)),
            ),
            Arc::new(
                DriverEntry::new(lib("integrated-a"))
                    .with_type(DriverType::IntegratedGpu)
                    .with_pci_order(true)
                    .with_properties(at(2)),
            ),
        ];

        let by_type: Vec<_> = order_by_type(&drivers, None)
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(by_type, vec!["discrete", "integrated-b", "integrated-a"]);

        let by_pci: Vec<_> = order_by_type(&drivers, Some(SortDescriptor::ByPciId))
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(by_pci, vec!["integrated-a", "integrated-b", "discrete"]);
    }

    #[test]
    fn idempotent_sort() {
        let mut reg = DriverRegistry::new();
        for d in standard().into_iter().rev() {
            let entry = DriverEntry::new(d.library().clone()).with_type(d.driver_type());
            reg.register(entry, Subsystems::all());
        }
        let sorter = DriverSorter::new(None, DriverOrderSpec::parse_list("NPU"));
        let first: Vec<usize> = sorter
            .sort(&reg, false)
            .iter()
            .map(|d| Arc::as_ptr(d) as usize)
            .collect();
        for _ in 0..4 {
            let again: Vec<usize> = sorter
                .sort(&reg, false)
                .iter()
                .map(|d| Arc::as_ptr(d) as usize)
                .collect();
            assert_eq!(first, again);
        }
        // A different sorter cannot reorder an already-sorted partition.
        let other = DriverSorter::new(None, DriverOrderSpec::parse_list("0"));
        let after: Vec<usize> = other
            .sort(&reg, false)
            .iter()
            .map(|d| Arc::as_ptr(d) as usize)
            .collect();
        assert_eq!(first, after);

        let names: Vec<_> = reg
            .partition(Subsystem::Core)
            .drivers()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(&names[..2], &["npu_0", "other_0"]);
        assert!(!reg.partition(Subsystem::Sysman).is_sorted());
        sorter.sort(&reg, true);
        assert!(reg.partition(Subsystem::Sysman).is_sorted());
    }

    #[test]
    fn concurrent_sort_observes_one_order() {
        let mut reg = DriverRegistry::new();
        for d in standard() {
            reg.register(
                DriverEntry::new(d.library().clone()).with_type(d.driver_type()),
                Subsystems::CORE,
            );
        }
        let sorter = DriverSorter::new(None, DriverOrderSpec::parse_list("5,4"));
        let orders: Vec<Vec<String>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        sorter
                            .sort(&reg, false)
                            .iter()
                            .map(|d| d.name().to_string())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(orders.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(orders[0][0], "other_0");
        assert_eq!(orders[0][1], "npu_0");
    }
}
