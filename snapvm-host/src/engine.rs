//! The black-box engine seam.
//!
//! The harness treats the snapvm engine as an external collaborator: it
//! restores a VM from a snapshot image, resolves the image's numeric
//! host-function imports, looks exports up, and calls into bytecode. This
//! module pins that protocol down as traits so the host layer can be driven
//! against any engine build (including the scripted engine in
//! [`crate::scripted`]).

use crate::context::SharedContext;

/// Identifier of a host function, chosen by the snapshot compiler and
/// embedded in the bytecode's import table.
pub type HostFunctionId = u16;

/// Identifier of a function the snapshot exposes to the host.
pub type ExportId = u16;

/// Engine status codes, with the human-readable descriptions the harness
/// surfaces to the operator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("snapshot image is {len} bytes, exceeding the engine limit of {max}")]
    ImageTooLarge { len: usize, max: usize },

    #[error("snapshot image is malformed: {reason}")]
    MalformedImage { reason: String },

    #[error("unresolved import: host function {id} is not registered")]
    UnresolvedImport { id: HostFunctionId },

    #[error("unresolved export: {id} is not in the snapshot export table")]
    UnresolvedExport { id: ExportId },

    #[error("host function {id} rejected {got} argument(s)")]
    InvalidArguments { id: HostFunctionId, got: usize },

    #[error("engine fault: {0}")]
    Fault(String),
}

/// A native host function, callable from inside VM bytecode.
///
/// The callback receives only the instance handle and must recover its
/// [`crate::context::ExecutionContext`] through [`VmInstance::context`].
/// Validating the argument count against the expected arity is the
/// function's own responsibility, not the engine's. Returning an error
/// aborts the bytecode invocation that triggered the call; the returned
/// value lands in the VM's result slot otherwise.
pub type HostFunction<I> = fn(
    vm: &mut I,
    id: HostFunctionId,
    args: &[<I as VmInstance>::Value],
) -> Result<<I as VmInstance>::Value, EngineError>;

/// Import-resolution callback handed to [`Engine::restore`].
///
/// The engine walks the snapshot's unresolved-import table during restore
/// and queries this once per import entry. A `None` for any entry fails the
/// restore as a whole with [`EngineError::UnresolvedImport`]; no partially
/// initialized instance is ever produced.
pub trait ImportResolver<I: VmInstance> {
    fn resolve(&self, id: HostFunctionId) -> Option<HostFunction<I>>;
}

/// A restored VM instance. Owns all VM-internal memory (heap, call stack,
/// GC state); dropping the instance releases it. Exported values must not
/// outlive the instance they came from.
pub trait VmInstance: Sized {
    /// Engine value handle, opaque to the host beyond the conversions below.
    type Value: Clone + Default;

    /// Look up a batch of export IDs against the instance's export table.
    /// Order-preserving: output position `i` corresponds to `ids[i]`.
    fn resolve_exports(&mut self, ids: &[ExportId]) -> Result<Vec<Self::Value>, EngineError>;

    /// Call into VM bytecode at an exported entry point.
    ///
    /// Host functions run synchronously nested inside this call, on the
    /// same logical stack; the first host-function error aborts the
    /// invocation and becomes its result.
    fn call(&mut self, func: &Self::Value, args: &[Self::Value])
        -> Result<Self::Value, EngineError>;

    /// The execution context bound to this instance at restore time.
    fn context(&self) -> &SharedContext;

    /// UTF-8 rendition of a value.
    fn to_string_utf8(&self, value: &Self::Value) -> String;

    /// Engine truthiness of a value.
    fn to_bool(&self, value: &Self::Value) -> bool;

    /// Optional: run a garbage collection cycle (default: no-op).
    fn run_gc(&mut self) {}
}

/// An engine build able to restore snapshot images.
pub trait Engine {
    type Instance: VmInstance;

    /// Reconstruct a live VM instance from a snapshot image, binding
    /// `context` to it for the instance's whole lifetime and resolving
    /// every import through `imports`.
    ///
    /// This is restore, not cold start: the image may describe a VM already
    /// past initialization, and the instance's globals and export table
    /// come back exactly as serialized. All-or-nothing: on failure no
    /// instance exists.
    fn restore(
        &self,
        image: &[u8],
        context: SharedContext,
        imports: &dyn ImportResolver<Self::Instance>,
    ) -> Result<Self::Instance, EngineError>;
}
