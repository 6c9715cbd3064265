//! Interception layers: the validation and tracing libraries that may wrap every resolved table.

use std::{ffi::c_void, fmt::Display, sync::Arc};

use tracing::{debug, trace};

use crate::{
    ddi::{DdiCategory, GetTableFn},
    library::DriverLibrary,
    version::{ApiVersion, ComponentVersion, ZelComponentVersion},
    LoaderError, LoaderErrorKind, ZeResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Validation,
    Tracing,
}

impl LayerKind {
    /// Library file name searched for during discovery.
    pub fn library_name(self) -> &'static str {
        match self {
            LayerKind::Validation => "libze_validation_layer.so.1",
            LayerKind::Tracing => "libze_tracing_layer.so.1",
        }
    }
}

impl Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerKind::Validation => write!(f, "validation"),
            LayerKind::Tracing => write!(f, "tracing"),
        }
    }
}

const TRACER_TABLE_SYMBOL: &str = "zelGetTracerApiProcAddrTable";
const VERSION_SYMBOL: &str = "zelLoaderGetVersion";

/// A loaded interception layer.
#[derive(Debug, Clone)]
pub struct Layer {
    kind: LayerKind,
    library: Arc<dyn DriverLibrary>,
}

impl Layer {
    pub fn new(kind: LayerKind, library: Arc<dyn DriverLibrary>) -> Self {
        Self { kind, library }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn library(&self) -> &Arc<dyn DriverLibrary> {
        &self.library
    }

    /// Give the layer the chance to wrap `table`. A layer that is loaded must export the
    /// category's resolver.
    pub fn intercept<C: DdiCategory>(
        &self,
        version: ApiVersion,
        table: &mut C::Table,
    ) -> Result<(), LoaderError> {
        let sym = self.library.lookup(C::SYMBOL).ok_or_else(|| {
            LoaderError::new(LoaderErrorKind::MissingLayerSymbol {
                layer: self.kind,
                symbol: C::SYMBOL,
            })
        })?;
        let get: GetTableFn<C::Table> = unsafe { sym.cast() };
        let result = unsafe { get(version, table) };
        trace!("{} layer: {} -> {}", self.kind, C::SYMBOL, result);
        if result.is_success() {
            Ok(())
        } else {
            Err(LoaderErrorKind::LayerFailed {
                layer: self.kind,
                symbol: C::SYMBOL,
                result,
            }
            .into())
        }
    }

    /// Fill the opaque tracer API table. Only meaningful for the tracing layer.
    pub fn tracer_api_table(&self, version: ApiVersion, table: *mut c_void) -> Result<(), LoaderError> {
        let sym = self.library.lookup(TRACER_TABLE_SYMBOL).ok_or_else(|| {
            LoaderError::new(LoaderErrorKind::MissingLayerSymbol {
                layer: self.kind,
                symbol: TRACER_TABLE_SYMBOL,
            })
        })?;
        let get: GetTableFn<c_void> = unsafe { sym.cast() };
        let result = unsafe { get(version, table) };
        if result.is_success() {
            Ok(())
        } else {
            Err(LoaderErrorKind::LayerFailed {
                layer: self.kind,
                symbol: TRACER_TABLE_SYMBOL,
                result,
            }
            .into())
        }
    }

    /// The layer's self-reported component version, if it exports one.
    pub fn component_version(&self) -> Option<ComponentVersion> {
        let sym = self.library.lookup(VERSION_SYMBOL)?;
        let get: unsafe extern "C" fn(*mut ZelComponentVersion) -> ZeResult = unsafe { sym.cast() };
        let mut raw = ZelComponentVersion::default();
        let result = unsafe { get(&mut raw) };
        if !result.is_success() {
            debug!("{} layer: version query failed with {}", self.kind, result);
            return None;
        }
        Some(ComponentVersion::from(&raw))
    }
}

/// The layers loaded into a context, applied in order: validation, then tracing.
#[derive(Debug, Clone, Default)]
pub struct Layers {
    validation: Option<Layer>,
    tracing: Option<Layer>,
}

impl Layers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, layer: Layer) -> Self {
        match layer.kind() {
            LayerKind::Validation => self.validation = Some(layer),
            LayerKind::Tracing => self.tracing = Some(layer),
        }
        self
    }

    pub fn validation(&self) -> Option<&Layer> {
        self.validation.as_ref()
    }

    pub fn tracing(&self) -> Option<&Layer> {
        self.tracing.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.validation.iter().chain(self.tracing.iter())
    }
}
