//! Dispatch tables ("DDI tables"): one `#[repr(C)]` struct of function pointers per API category,
//! plus the metadata the resolver and the dispatch builder need about each category.

use std::fmt::Debug;

use parking_lot::{Mutex, RwLock};

use crate::{registry::Subsystem, version::ApiVersion, ZeResult};

pub mod ze;
pub mod zes;

/// Shape of every exported "get proc addr table" function.
pub type GetTableFn<T> = unsafe extern "C" fn(ApiVersion, *mut T) -> ZeResult;

/// Static facts about one table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: &'static str,
    /// First API version that carries this entry.
    pub since: ApiVersion,
    /// Predates per-entry version gating; always populated in loader-owned tables.
    pub legacy: bool,
}

/// An API category: its table type, its exported symbol, and how the loader fills its own
/// version of the table.
pub trait DdiCategory: 'static {
    type Table: Copy + Default + Debug + Send + Sync + 'static;

    const NAME: &'static str;
    /// Exported resolver symbol, identical in the loader, drivers, and layers.
    const SYMBOL: &'static str;
    const SUBSYSTEM: Subsystem;
    /// Extension or experimental categories that drivers may legitimately not export.
    const OPTIONAL: bool;
    const ENTRIES: &'static [EntryInfo];

    /// This category's table inside one driver's tables.
    fn slot(ddi: &DriverDdi) -> &RwLock<Self::Table>;

    /// The loader-owned copies of this category's table.
    fn loader_slot(tables: &LoaderTables) -> &Mutex<LoaderTable<Self::Table>>;

    /// Populate every entry whose introduction version is at most `version` with the loader's
    /// forwarding function, leaving the rest null.
    fn gated(version: ApiVersion) -> Self::Table;

    /// Populate every legacy entry unconditionally.
    fn apply_legacy(table: &mut Self::Table);

    /// Entry addresses in declaration order, None for null entries.
    fn entries(table: &Self::Table) -> Vec<Option<usize>>;
}

macro_rules! ddi_table {
    (@legacy) => { false };
    (@legacy legacy) => { true };
    (
        $(#[$meta:meta])*
        $cat:ident => $table:ident {
            symbol: $symbol:literal,
            subsystem: $subsys:ident,
            optional: $optional:literal,
            slot: $slot:ident,
            entries: {
                $( $field:ident ( $($arg:ty),* $(,)? ) = $fwd:path, since $min:ident $($legacy:ident)? ; )*
            }
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Clone, Copy, Default, Debug)]
        pub struct $table {
            $( pub $field: Option<unsafe extern "C" fn($($arg),*) -> $crate::ZeResult>, )*
        }

        #[derive(Clone, Copy, Debug, Default)]
        pub struct $cat;

        impl $crate::ddi::DdiCategory for $cat {
            type Table = $table;

            const NAME: &'static str = stringify!($cat);
            const SYMBOL: &'static str = $symbol;
            const SUBSYSTEM: $crate::registry::Subsystem = $crate::registry::Subsystem::$subsys;
            const OPTIONAL: bool = $optional;
            const ENTRIES: &'static [$crate::ddi::EntryInfo] = &[
                $(
                    $crate::ddi::EntryInfo {
                        name: stringify!($field),
                        since: $crate::version::ApiVersion::$min,
                        legacy: ddi_table!(@legacy $($legacy)?),
                    },
                )*
            ];

            fn slot(ddi: &$crate::ddi::DriverDdi) -> &parking_lot::RwLock<$table> {
                &ddi.$slot
            }

            fn loader_slot(
                tables: &$crate::ddi::LoaderTables,
            ) -> &parking_lot::Mutex<$crate::ddi::LoaderTable<$table>> {
                &tables.$slot
            }

            fn gated(version: $crate::version::ApiVersion) -> $table {
                let mut table = $table::default();
                $(
                    if version >= $crate::version::ApiVersion::$min {
                        table.$field = Some($fwd);
                    }
                )*
                table
            }

            fn apply_legacy(table: &mut $table) {
                $(
                    if ddi_table!(@legacy $($legacy)?) {
                        table.$field = Some($fwd);
                    }
                )*
            }

            fn entries(table: &$table) -> Vec<Option<usize>> {
                vec![$( table.$field.map(|f| f as usize) ),*]
            }
        }
    };
}
pub(crate) use ddi_table;

/// The tables the loader hands out for one category, kept for the life of the context.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoaderTable<T> {
    /// Last table built for intercept mode.
    pub loader: Option<T>,
    /// The table as it was before the tracing layer saw it.
    pub pristine: Option<T>,
    /// The tracing layer's instrumented copy.
    pub instrumented: Option<T>,
}

macro_rules! loader_tables {
    ($($slot:ident: $table:ty,)*) => {
        /// Loader-owned tables of every category.
        #[derive(Debug, Default)]
        pub struct LoaderTables {
            $( pub(crate) $slot: Mutex<LoaderTable<$table>>, )*
        }

        /// Every category table of one driver. Shared between the registry entry and every
        /// loader handle issued for that driver's objects.
        #[derive(Debug, Default)]
        pub struct DriverDdi {
            $( pub(crate) $slot: RwLock<$table>, )*
        }
    };
}

loader_tables! {
    ze_global: ze::ZeGlobalDdiTable,
    ze_driver: ze::ZeDriverDdiTable,
    ze_device: ze::ZeDeviceDdiTable,
    zes_global: zes::ZesGlobalDdiTable,
    zes_driver: zes::ZesDriverDdiTable,
    zes_device: zes::ZesDeviceDdiTable,
    zes_power: zes::ZesPowerDdiTable,
    zes_engine: zes::ZesEngineDdiTable,
    zes_memory: zes::ZesMemoryDdiTable,
    zes_frequency: zes::ZesFrequencyDdiTable,
    zes_fabric_port: zes::ZesFabricPortDdiTable,
    zes_ras_exp: zes::ZesRasExpDdiTable,
}

impl DriverDdi {
    /// Snapshot of one category table.
    pub fn table<C: DdiCategory>(&self) -> C::Table {
        *C::slot(self).read()
    }

    pub(crate) fn store<C: DdiCategory>(&self, table: C::Table) {
        *C::slot(self).write() = table;
    }
}

/// Calls `$mac!(Category, args...)` once for every category.
#[macro_export]
#[doc(hidden)]
macro_rules! for_each_category {
    ($mac:ident $(, $arg:tt)*) => {
        $mac!($crate::ddi::ze::ZeGlobal $(, $arg)*);
        $mac!($crate::ddi::ze::ZeDriver $(, $arg)*);
        $mac!($crate::ddi::ze::ZeDevice $(, $arg)*);
        $mac!($crate::ddi::zes::ZesGlobal $(, $arg)*);
        $mac!($crate::ddi::zes::ZesDriver $(, $arg)*);
        $mac!($crate::ddi::zes::ZesDevice $(, $arg)*);
        $mac!($crate::ddi::zes::ZesPower $(, $arg)*);
        $mac!($crate::ddi::zes::ZesEngine $(, $arg)*);
        $mac!($crate::ddi::zes::ZesMemory $(, $arg)*);
        $mac!($crate::ddi::zes::ZesFrequency $(, $arg)*);
        $mac!($crate::ddi::zes::ZesFabricPort $(, $arg)*);
        $mac!($crate::ddi::zes::ZesRasExp $(, $arg)*);
    };
}
