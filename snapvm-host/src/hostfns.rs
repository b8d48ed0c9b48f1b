//! The standard conformance host functions.
//!
//! IDs are fixed by the snapshot compiler's import convention: 1 = print,
//! 2 = assert. Both recover their [`crate::context::ExecutionContext`]
//! from the instance handle, check their own arity, and report contract
//! violations only through the returned status.

use log::debug;

use crate::engine::{EngineError, HostFunctionId, VmInstance};
use crate::registry::HostFunctionRegistry;

pub const HOST_FN_PRINT: HostFunctionId = 1;
pub const HOST_FN_ASSERT: HostFunctionId = 2;

/// `print(message)`: append one line to the captured printout.
pub fn print<I: VmInstance>(
    vm: &mut I,
    id: HostFunctionId,
    args: &[I::Value],
) -> Result<I::Value, EngineError> {
    if args.len() != 1 {
        return Err(EngineError::InvalidArguments {
            id,
            got: args.len(),
        });
    }
    let message = vm.to_string_utf8(&args[0]);
    debug!("prints: {message}");
    vm.context().borrow_mut().append_print(&message);
    Ok(<I::Value>::default())
}

/// `assert(condition, message)`: record an in-program assertion outcome.
///
/// A failed assertion is tallied, not raised: the VM keeps running and the
/// harness fails the case after the invocation finishes.
pub fn vm_assert<I: VmInstance>(
    vm: &mut I,
    id: HostFunctionId,
    args: &[I::Value],
) -> Result<I::Value, EngineError> {
    if args.len() < 2 {
        return Err(EngineError::InvalidArguments {
            id,
            got: args.len(),
        });
    }
    let passed = vm.to_bool(&args[0]);
    let message = vm.to_string_utf8(&args[1]);
    vm.context().borrow_mut().record_assertion(message, passed);
    Ok(<I::Value>::default())
}

/// The registry every conformance run uses.
pub fn standard<I: VmInstance>() -> HostFunctionRegistry<I> {
    let mut registry = HostFunctionRegistry::new();
    registry.register(HOST_FN_PRINT, print::<I>);
    registry.register(HOST_FN_ASSERT, vm_assert::<I>);
    registry
}
