//! The loader's forwarding functions: the entries of every loader-owned table.
//!
//! Aggregating entries (initialization and top-level driver enumeration) fan out across the
//! usable drivers of the process-wide context. Everything else is a single call into the generic
//! dispatcher in [crate::dispatch].

pub mod ze;
pub mod zes;

use crate::{context, dispatch, LoaderError, ZeResult};

/// Run `f` against the process-wide context and report the outcome as a status code.
fn with_context<T>(what: &str, f: impl FnOnce(&context::LoaderContext) -> Result<T, LoaderError>) -> ZeResult {
    dispatch::report(what, context::current().and_then(|ctx| f(&*ctx)))
}
