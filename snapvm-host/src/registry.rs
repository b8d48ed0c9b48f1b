//! Host-function registry.
//!
//! The engine consumes this as a fixed descriptor table during restore; on
//! the host side it is a process-wide lookup built once at startup and
//! read-only afterwards.

use std::collections::HashMap;

use crate::engine::{HostFunction, HostFunctionId, ImportResolver, VmInstance};

/// Table of host functions the snapshot compiler may import.
///
/// `resolve` is a pure lookup with no side effects, so one registry can
/// serve any number of VM instances. Registering the same ID twice is a
/// build-time programmer error; the last registration wins.
pub struct HostFunctionRegistry<I: VmInstance> {
    entries: HashMap<HostFunctionId, HostFunction<I>>,
}

impl<I: VmInstance> HostFunctionRegistry<I> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: HostFunctionId, function: HostFunction<I>) {
        self.entries.insert(id, function);
    }

    pub fn resolve(&self, id: HostFunctionId) -> Option<HostFunction<I>> {
        self.entries.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<I: VmInstance> Default for HostFunctionRegistry<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: VmInstance> ImportResolver<I> for HostFunctionRegistry<I> {
    fn resolve(&self, id: HostFunctionId) -> Option<HostFunction<I>> {
        self.entries.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::scripted::{ScriptedInstance, ScriptedValue};

    fn nil_fn(
        _vm: &mut ScriptedInstance,
        _id: HostFunctionId,
        _args: &[ScriptedValue],
    ) -> Result<ScriptedValue, EngineError> {
        Ok(ScriptedValue::Nil)
    }

    fn int_fn(
        _vm: &mut ScriptedInstance,
        _id: HostFunctionId,
        _args: &[ScriptedValue],
    ) -> Result<ScriptedValue, EngineError> {
        Ok(ScriptedValue::Int(7))
    }

    #[test]
    fn resolve_finds_registered_ids() {
        let mut registry = HostFunctionRegistry::new();
        registry.register(1, nil_fn);
        assert!(registry.resolve(1).is_some());
        assert!(registry.resolve(2).is_none());
    }

    #[test]
    fn duplicate_registration_last_wins() {
        let mut registry = HostFunctionRegistry::new();
        registry.register(1, nil_fn);
        registry.register(1, int_fn);
        assert_eq!(registry.len(), 1);
        let resolved = registry.resolve(1).unwrap();
        assert_eq!(resolved, int_fn as HostFunction<ScriptedInstance>);
    }
}
