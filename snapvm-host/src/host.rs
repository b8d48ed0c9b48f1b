//! Restore → import resolution → export lookup → invocation → teardown.

use std::rc::Rc;

use crate::context::{AssertionRecord, ExecutionContext, SharedContext};
use crate::engine::{Engine, EngineError, ExportId, VmInstance};
use crate::registry::HostFunctionRegistry;

/// Largest snapshot image the engine's size representation can address.
pub const MAX_IMAGE_BYTES: usize = u16::MAX as usize;

/// What a finished run left behind in its execution context.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub printout: String,
    pub assertions: Vec<AssertionRecord>,
}

impl RunReport {
    /// Snapshot a context's observable state.
    pub fn capture(state: &ExecutionContext) -> Self {
        Self {
            printout: state.printout().to_owned(),
            assertions: state.assertions().to_vec(),
        }
    }

    pub fn failed_assertions(&self) -> impl Iterator<Item = &AssertionRecord> {
        self.assertions.iter().filter(|a| !a.passed)
    }
}

/// Drives one engine build through restore/run/free cycles.
///
/// The host is stateless between runs: every run gets a fresh
/// [`ExecutionContext`], so any number of independent cases can execute
/// through one host without cross-contamination. The registry is shared
/// read-only across all instances.
pub struct VmHost<'r, E: Engine> {
    engine: E,
    registry: &'r HostFunctionRegistry<E::Instance>,
}

impl<'r, E: Engine> VmHost<'r, E> {
    pub fn new(engine: E, registry: &'r HostFunctionRegistry<E::Instance>) -> Self {
        Self { engine, registry }
    }

    /// Restore a VM instance from `image`, binding `context` to it.
    ///
    /// Images longer than [`MAX_IMAGE_BYTES`] never reach the engine: the
    /// reference encoding carries lengths in a u16.
    pub fn restore(
        &self,
        image: &[u8],
        context: SharedContext,
    ) -> Result<E::Instance, EngineError> {
        if image.len() > MAX_IMAGE_BYTES {
            return Err(EngineError::ImageTooLarge {
                len: image.len(),
                max: MAX_IMAGE_BYTES,
            });
        }
        self.engine.restore(image, context, self.registry)
    }

    /// Look up a batch of exports; position `i` corresponds to `ids[i]`.
    pub fn resolve_exports(
        &self,
        vm: &mut E::Instance,
        ids: &[ExportId],
    ) -> Result<Vec<<E::Instance as VmInstance>::Value>, EngineError> {
        vm.resolve_exports(ids)
    }

    /// Call into bytecode at `func`. Host functions resolved from this
    /// host's registry run nested inside the call, on the same stack.
    pub fn invoke(
        &self,
        vm: &mut E::Instance,
        func: &<E::Instance as VmInstance>::Value,
        args: &[<E::Instance as VmInstance>::Value],
    ) -> Result<<E::Instance as VmInstance>::Value, EngineError> {
        vm.call(func, args)
    }

    /// Release the instance. Taking it by value makes this the last
    /// operation on the handle; the engine frees all VM-owned memory here,
    /// and every exported value derived from the instance dies with it.
    pub fn free(&self, vm: E::Instance) {
        drop(vm);
    }

    /// The full cycle for one snapshot: restore, optionally invoke an
    /// export with no arguments, tear down, and report what the run left
    /// in its context.
    ///
    /// The instance is freed on every path out of this function, including
    /// engine failures after restore, and always before the context is
    /// read back.
    pub fn run_snapshot(
        &self,
        image: &[u8],
        export: Option<ExportId>,
    ) -> Result<RunReport, EngineError> {
        let context = ExecutionContext::shared();
        let mut vm = self.restore(image, Rc::clone(&context))?;

        let outcome = match export {
            Some(id) => match self.resolve_exports(&mut vm, &[id]) {
                Ok(exports) => match exports.into_iter().next() {
                    Some(func) => self.invoke(&mut vm, &func, &[]).map(|_| ()),
                    None => Err(EngineError::Fault(
                        "engine returned no value for a resolved export".into(),
                    )),
                },
                Err(e) => Err(e),
            },
            None => Ok(()),
        };
        self.free(vm);
        outcome?;

        let report = RunReport::capture(&context.borrow());
        Ok(report)
    }
}
