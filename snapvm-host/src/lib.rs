//! snapvm-host
//!
//! Host-side integration layer for the snapvm snapshot VM: restoring VM
//! instances from serialized snapshot images, resolving the snapshot's
//! numeric host-function imports to native implementations, invoking
//! exported VM functions, and isolating per-run host state so that any
//! number of independent restore/run/free cycles can execute in one
//! process without cross-contamination.
//!
//! The engine itself (interpreter, garbage collector, bytecode format) is a
//! black box behind the [`engine::Engine`] seam; this crate only speaks the
//! restore/resolve/call/free protocol.

pub mod context;
pub mod engine;
pub mod host;
pub mod hostfns;
pub mod loader;
pub mod registry;

/// Scripted reference engine and image builder (kept as a module, not a
/// binary, so it can be reused from unit tests and other workspace crates).
pub mod scripted;

pub use context::{AssertionRecord, ExecutionContext, SharedContext};
pub use engine::{
    Engine, EngineError, ExportId, HostFunction, HostFunctionId, ImportResolver, VmInstance,
};
pub use host::{RunReport, VmHost, MAX_IMAGE_BYTES};
pub use registry::HostFunctionRegistry;
