//! Definitions for errors and status codes of the loader.

use std::fmt::{Debug, Display};

use itertools::{Either, Itertools};
use miette::Diagnostic;
use thiserror::Error;

use crate::{
    layer::LayerKind,
    registry::{DriverTypeFlags, Subsystem},
    version::ApiVersion,
};

/// A C API status code (`ze_result_t`). This is the only error representation that crosses the
/// exported ABI.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ZeResult(pub u32);

static_assertions::assert_eq_size!(ZeResult, u32);

impl ZeResult {
    pub const SUCCESS: Self = Self(0);
    pub const NOT_READY: Self = Self(1);
    pub const ERROR_DEVICE_LOST: Self = Self(0x7000_0001);
    pub const ERROR_OUT_OF_HOST_MEMORY: Self = Self(0x7000_0002);
    pub const ERROR_OUT_OF_DEVICE_MEMORY: Self = Self(0x7000_0003);
    pub const ERROR_UNINITIALIZED: Self = Self(0x7800_0001);
    pub const ERROR_UNSUPPORTED_VERSION: Self = Self(0x7800_0002);
    pub const ERROR_UNSUPPORTED_FEATURE: Self = Self(0x7800_0003);
    pub const ERROR_INVALID_ARGUMENT: Self = Self(0x7800_0004);
    pub const ERROR_INVALID_NULL_HANDLE: Self = Self(0x7800_0005);
    pub const ERROR_HANDLE_OBJECT_IN_USE: Self = Self(0x7800_0006);
    pub const ERROR_INVALID_NULL_POINTER: Self = Self(0x7800_0007);
    pub const ERROR_INVALID_SIZE: Self = Self(0x7800_0008);
    pub const ERROR_UNKNOWN: Self = Self(0x7fff_ffff);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "SUCCESS",
            Self::NOT_READY => "NOT_READY",
            Self::ERROR_DEVICE_LOST => "ERROR_DEVICE_LOST",
            Self::ERROR_OUT_OF_HOST_MEMORY => "ERROR_OUT_OF_HOST_MEMORY",
            Self::ERROR_OUT_OF_DEVICE_MEMORY => "ERROR_OUT_OF_DEVICE_MEMORY",
            Self::ERROR_UNINITIALIZED => "ERROR_UNINITIALIZED",
            Self::ERROR_UNSUPPORTED_VERSION => "ERROR_UNSUPPORTED_VERSION",
            Self::ERROR_UNSUPPORTED_FEATURE => "ERROR_UNSUPPORTED_FEATURE",
            Self::ERROR_INVALID_ARGUMENT => "ERROR_INVALID_ARGUMENT",
            Self::ERROR_INVALID_NULL_HANDLE => "ERROR_INVALID_NULL_HANDLE",
            Self::ERROR_HANDLE_OBJECT_IN_USE => "ERROR_HANDLE_OBJECT_IN_USE",
            Self::ERROR_INVALID_NULL_POINTER => "ERROR_INVALID_NULL_POINTER",
            Self::ERROR_INVALID_SIZE => "ERROR_INVALID_SIZE",
            Self::ERROR_UNKNOWN => "ERROR_UNKNOWN",
            _ => return None,
        })
    }
}

impl Display for ZeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

impl Debug for ZeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZeResult({})", self)
    }
}

impl<T> From<Result<T, LoaderError>> for ZeResult {
    fn from(value: Result<T, LoaderError>) -> Self {
        match value {
            Ok(_) => ZeResult::SUCCESS,
            Err(e) => e.code(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("{kind}")]
pub struct LoaderError {
    pub kind: LoaderErrorKind,
    #[related]
    pub related: Vec<LoaderError>,
}

impl LoaderError {
    pub fn new_collect(kind: LoaderErrorKind, related: Vec<LoaderError>) -> Self {
        Self { kind, related }
    }

    pub fn new(kind: LoaderErrorKind) -> Self {
        Self {
            kind,
            related: vec![],
        }
    }

    /// Split an iterator of results into the successes and the failures. If nothing succeeded,
    /// the failures become the related errors of a new error of `parent_kind`.
    pub fn collect_any<I, T>(parent_kind: LoaderErrorKind, it: I) -> Result<(Vec<T>, Vec<LoaderError>), LoaderError>
    where
        I: IntoIterator<Item = Result<T, LoaderError>>,
    {
        let (vals, errs): (Vec<T>, Vec<LoaderError>) =
            it.into_iter().partition_map(|item| match item {
                Ok(o) => Either::Left(o),
                Err(e) => Either::Right(e),
            });

        if vals.is_empty() {
            Err(LoaderError::new_collect(parent_kind, errs))
        } else {
            Ok((vals, errs))
        }
    }

    /// The status code reported for this error at the C boundary.
    pub fn code(&self) -> ZeResult {
        self.kind.code()
    }
}

impl From<LoaderErrorKind> for LoaderError {
    fn from(value: LoaderErrorKind) -> Self {
        Self {
            kind: value,
            related: vec![],
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum LoaderErrorKind {
    #[error("a required output pointer was null")]
    InvalidNullPointer,
    #[error("requested API version {requested} exceeds supported version {supported}")]
    UnsupportedVersion {
        requested: ApiVersion,
        supported: ApiVersion,
    },
    #[error("no drivers are registered for the {subsystem} subsystem")]
    NoDrivers { subsystem: Subsystem },
    #[error("no usable driver provides '{symbol}'")]
    NoUsableDriver { symbol: &'static str },
    #[error("driver '{driver}' does not export '{symbol}'")]
    MissingSymbol {
        driver: String,
        symbol: &'static str,
    },
    #[error("driver '{driver}' failed '{symbol}' with {result}")]
    DriverFailed {
        driver: String,
        symbol: &'static str,
        result: ZeResult,
    },
    #[error("{layer} layer does not export '{symbol}'")]
    MissingLayerSymbol {
        layer: LayerKind,
        symbol: &'static str,
    },
    #[error("{layer} layer failed '{symbol}' with {result}")]
    LayerFailed {
        layer: LayerKind,
        symbol: &'static str,
        result: ZeResult,
    },
    #[error("loader context is not initialized")]
    NotInitialized,
    #[error("no tracing layer is loaded")]
    NoTracingLayer,
    #[error("no driver matches the requested driver types {requested:?}")]
    NoMatchingDriverType { requested: DriverTypeFlags },
    #[error("out of host memory while wrapping {category} handles")]
    OutOfHostMemory { category: &'static str },
    #[error("failed to load library {library}: {reason}")]
    LibraryLoadFail { library: String, reason: String },
    #[error("invalid argument: {what}")]
    InvalidArgument { what: String },
}

impl LoaderErrorKind {
    pub fn code(&self) -> ZeResult {
        match self {
            LoaderErrorKind::InvalidNullPointer => ZeResult::ERROR_INVALID_NULL_POINTER,
            LoaderErrorKind::UnsupportedVersion { .. } => ZeResult::ERROR_UNSUPPORTED_VERSION,
            LoaderErrorKind::NoDrivers { .. }
            | LoaderErrorKind::NoUsableDriver { .. }
            | LoaderErrorKind::MissingSymbol { .. }
            | LoaderErrorKind::MissingLayerSymbol { .. }
            | LoaderErrorKind::NotInitialized
            | LoaderErrorKind::NoTracingLayer
            | LoaderErrorKind::NoMatchingDriverType { .. }
            | LoaderErrorKind::LibraryLoadFail { .. } => ZeResult::ERROR_UNINITIALIZED,
            LoaderErrorKind::DriverFailed { result, .. }
            | LoaderErrorKind::LayerFailed { result, .. } => *result,
            LoaderErrorKind::OutOfHostMemory { .. } => ZeResult::ERROR_OUT_OF_HOST_MEMORY,
            LoaderErrorKind::InvalidArgument { .. } => ZeResult::ERROR_INVALID_ARGUMENT,
        }
    }
}
