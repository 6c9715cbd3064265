//! A loader for the Level-Zero-style GPU API.
//!
//! Applications link against this library instead of a vendor driver. At first use the loader
//! discovers the installed driver libraries, sorts them into a stable order, and answers every
//! "get proc addr table" request:
//!   1. If exactly one driver is usable, that driver's own table is handed out (direct mode).
//!   2. Otherwise the loader hands out its own table (intercept mode). Each entry recovers the
//!      driver behind the incoming handle and forwards the call there, wrapping any handles the
//!      driver returns so later calls can be routed back to it.
//!
//! Optional validation and tracing layers get a chance to wrap every table before it reaches the
//! application.
//!
//! # Layout
//! - [discovery]: which subsystems a library implements and what devices it drives.
//! - [registry] and [sort]: discovered drivers, their per-subsystem status, and their ordering.
//! - [context]: the resolver and the process-wide state it runs against.
//! - [ddi]: the table layouts and per-category metadata.
//! - [dispatch] and [forward]: the loader-owned tables and the forwarding entries they point at.
//! - [handle]: loader handles and the factories that issue them.
//! - [exports]: the C ABI.

pub mod config;
pub mod context;
pub mod ddi;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod exports;
pub mod forward;
pub mod handle;
pub mod layer;
pub mod library;
pub mod log;
pub mod registry;
pub mod sort;
pub mod version;

pub use config::LoaderConfig;
pub use context::LoaderContext;
pub use error::*;
pub use version::ApiVersion;
