//! Scripted reference engine.
//!
//! Not a production snapvm build: it interprets a tiny scripted snapshot
//! format whose entire behavior is "call these host functions with these
//! canned arguments, then return". That is exactly enough surface to drive
//! the restore / import-resolution / invocation / teardown protocol end to
//! end, which is what the conformance harness and this crate's tests need.
//!
//! [`SnapshotBuilder`] is the serializer side of the same format, standing
//! in for the out-of-process snapshot compiler.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};

use crate::context::SharedContext;
use crate::engine::{
    Engine, EngineError, ExportId, HostFunction, HostFunctionId, ImportResolver, VmInstance,
};

const OP_RETURN_NIL: u8 = 0x00;
const OP_CALL_HOST: u8 = 0x01;
const OP_RETURN_VALUE: u8 = 0x02;

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_STR: u8 = 3;

/// Value space of the scripted engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ScriptedValue {
    #[default]
    Nil,
    Bool(bool),
    Int(i32),
    Str(String),
    /// A resolved export; index into the instance's program table. Only
    /// meaningful while the owning instance lives.
    Function(u16),
}

#[derive(Debug, Clone)]
enum Op {
    CallHost {
        id: HostFunctionId,
        args: Vec<ScriptedValue>,
    },
    Return(ScriptedValue),
}

#[derive(Debug)]
struct ScriptedImage {
    imports: Vec<HostFunctionId>,
    exports: Vec<(ExportId, Vec<Op>)>,
}

/// Restore/free accounting, shared between an engine and its instances so
/// tests can verify every instance is freed exactly once.
#[derive(Debug, Default)]
struct InstanceStats {
    restored: Cell<usize>,
    freed: Cell<usize>,
}

/// An engine build backed by the scripted format. Clones share instance
/// accounting.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    stats: Rc<InstanceStats>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restored(&self) -> usize {
        self.stats.restored.get()
    }

    pub fn freed(&self) -> usize {
        self.stats.freed.get()
    }

    pub fn live(&self) -> usize {
        self.stats.restored.get() - self.stats.freed.get()
    }
}

/// A restored scripted VM. Owns its programs, resolved import table, and
/// the execution context bound at restore time.
pub struct ScriptedInstance {
    programs: Vec<Vec<Op>>,
    exports: HashMap<ExportId, u16>,
    imports: HashMap<HostFunctionId, HostFunction<Self>>,
    context: SharedContext,
    stats: Rc<InstanceStats>,
}

impl Drop for ScriptedInstance {
    fn drop(&mut self) {
        self.stats.freed.set(self.stats.freed.get() + 1);
    }
}

impl Engine for ScriptedEngine {
    type Instance = ScriptedInstance;

    fn restore(
        &self,
        image: &[u8],
        context: SharedContext,
        imports: &dyn ImportResolver<Self::Instance>,
    ) -> Result<Self::Instance, EngineError> {
        let parsed = parse_image(image)?;

        // Imports are resolved before any instance state exists, so a
        // missing host function can never leave a half-built VM behind.
        let mut resolved = HashMap::with_capacity(parsed.imports.len());
        for id in &parsed.imports {
            let function = imports
                .resolve(*id)
                .ok_or(EngineError::UnresolvedImport { id: *id })?;
            resolved.insert(*id, function);
        }

        let mut programs = Vec::with_capacity(parsed.exports.len());
        let mut exports = HashMap::with_capacity(parsed.exports.len());
        for (index, (id, body)) in parsed.exports.into_iter().enumerate() {
            exports.insert(id, index as u16);
            programs.push(body);
        }

        self.stats.restored.set(self.stats.restored.get() + 1);
        Ok(ScriptedInstance {
            programs,
            exports,
            imports: resolved,
            context,
            stats: Rc::clone(&self.stats),
        })
    }
}

impl VmInstance for ScriptedInstance {
    type Value = ScriptedValue;

    fn resolve_exports(&mut self, ids: &[ExportId]) -> Result<Vec<Self::Value>, EngineError> {
        ids.iter()
            .map(|id| {
                self.exports
                    .get(id)
                    .map(|&index| ScriptedValue::Function(index))
                    .ok_or(EngineError::UnresolvedExport { id: *id })
            })
            .collect()
    }

    // Scripted bodies take no parameters; `args` is accepted for protocol
    // compatibility and ignored.
    fn call(
        &mut self,
        func: &Self::Value,
        _args: &[Self::Value],
    ) -> Result<Self::Value, EngineError> {
        let ScriptedValue::Function(index) = func else {
            return Err(EngineError::Fault("called a non-function value".into()));
        };
        let program = self
            .programs
            .get(*index as usize)
            .cloned()
            .ok_or_else(|| EngineError::Fault(format!("no program for function {index}")))?;

        for op in &program {
            match op {
                Op::CallHost { id, args } => {
                    let function = self
                        .imports
                        .get(id)
                        .copied()
                        .ok_or(EngineError::UnresolvedImport { id: *id })?;
                    // Re-entrant: the host function gets the same instance
                    // handle the engine is executing on.
                    function(self, *id, args)?;
                }
                Op::Return(value) => return Ok(value.clone()),
            }
        }
        Ok(ScriptedValue::Nil)
    }

    fn context(&self) -> &SharedContext {
        &self.context
    }

    fn to_string_utf8(&self, value: &Self::Value) -> String {
        match value {
            ScriptedValue::Nil => "nil".to_string(),
            ScriptedValue::Bool(b) => b.to_string(),
            ScriptedValue::Int(v) => v.to_string(),
            ScriptedValue::Str(s) => s.clone(),
            ScriptedValue::Function(index) => format!("<function {index}>"),
        }
    }

    fn to_bool(&self, value: &Self::Value) -> bool {
        match value {
            ScriptedValue::Nil => false,
            ScriptedValue::Bool(b) => *b,
            ScriptedValue::Int(v) => *v != 0,
            ScriptedValue::Str(s) => !s.is_empty(),
            ScriptedValue::Function(_) => true,
        }
    }
}

fn malformed(reason: impl Into<String>) -> EngineError {
    EngineError::MalformedImage {
        reason: reason.into(),
    }
}

fn read_u8(bytes: &[u8], off: &mut usize) -> Result<u8, EngineError> {
    let Some(v) = bytes.get(*off).copied() else {
        return Err(malformed(format!("unexpected EOF while reading u8 at {}", *off)));
    };
    *off += 1;
    Ok(v)
}

fn read_u16_le(bytes: &[u8], off: &mut usize) -> Result<u16, EngineError> {
    if *off + 2 > bytes.len() {
        return Err(malformed(format!("unexpected EOF while reading u16 at {}", *off)));
    }
    let v = LittleEndian::read_u16(&bytes[*off..]);
    *off += 2;
    Ok(v)
}

fn read_i32_le(bytes: &[u8], off: &mut usize) -> Result<i32, EngineError> {
    if *off + 4 > bytes.len() {
        return Err(malformed(format!("unexpected EOF while reading i32 at {}", *off)));
    }
    let v = LittleEndian::read_i32(&bytes[*off..]);
    *off += 4;
    Ok(v)
}

fn read_value(bytes: &[u8], off: &mut usize) -> Result<ScriptedValue, EngineError> {
    match read_u8(bytes, off)? {
        TAG_NIL => Ok(ScriptedValue::Nil),
        TAG_BOOL => Ok(ScriptedValue::Bool(read_u8(bytes, off)? != 0)),
        TAG_INT => Ok(ScriptedValue::Int(read_i32_le(bytes, off)?)),
        TAG_STR => {
            let len = read_u16_le(bytes, off)? as usize;
            if *off + len > bytes.len() {
                return Err(malformed(format!(
                    "string constant out of range: off={} len={} total={}",
                    *off,
                    len,
                    bytes.len()
                )));
            }
            let raw = bytes[*off..*off + len].to_vec();
            *off += len;
            let s = String::from_utf8(raw).map_err(|_| malformed("non-UTF-8 string constant"))?;
            Ok(ScriptedValue::Str(s))
        }
        tag => Err(malformed(format!("unknown value tag 0x{tag:02X}"))),
    }
}

fn parse_body(bytes: &[u8]) -> Result<Vec<Op>, EngineError> {
    let mut off = 0usize;
    let mut ops = Vec::new();
    while off < bytes.len() {
        match read_u8(bytes, &mut off)? {
            OP_RETURN_NIL => ops.push(Op::Return(ScriptedValue::Nil)),
            OP_CALL_HOST => {
                let id = read_u16_le(bytes, &mut off)?;
                let argc = read_u8(bytes, &mut off)? as usize;
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(read_value(bytes, &mut off)?);
                }
                ops.push(Op::CallHost { id, args });
            }
            OP_RETURN_VALUE => ops.push(Op::Return(read_value(bytes, &mut off)?)),
            op => {
                return Err(malformed(format!("invalid opcode 0x{op:02X} at {}", off - 1)));
            }
        }
    }
    Ok(ops)
}

/// Parse a scripted snapshot image.
///
/// Layout (little-endian):
/// - u16 import_count
///   repeated import_count:
///     - u16 host_function_id
/// - u16 export_count
///   repeated export_count:
///     - u16 export_id
///     - u16 body_len
///     - [body_len] body bytes (opcodes + tagged value constants)
fn parse_image(bytes: &[u8]) -> Result<ScriptedImage, EngineError> {
    let mut off = 0usize;

    let import_count = read_u16_le(bytes, &mut off)? as usize;
    let mut imports = Vec::with_capacity(import_count);
    for _ in 0..import_count {
        imports.push(read_u16_le(bytes, &mut off)?);
    }

    let export_count = read_u16_le(bytes, &mut off)? as usize;
    let mut exports = Vec::with_capacity(export_count);
    for _ in 0..export_count {
        let id = read_u16_le(bytes, &mut off)?;
        let len = read_u16_le(bytes, &mut off)? as usize;
        if off + len > bytes.len() {
            return Err(malformed(format!(
                "export body out of range: off={} len={} total={}",
                off,
                len,
                bytes.len()
            )));
        }
        let body = parse_body(&bytes[off..off + len])?;
        off += len;
        exports.push((id, body));
    }

    if off != bytes.len() {
        return Err(malformed(format!(
            "{} trailing byte(s) after export table",
            bytes.len() - off
        )));
    }

    Ok(ScriptedImage { imports, exports })
}

/// Builds scripted snapshot images, mirroring the serializer the
/// out-of-process compiler would run. Test support only.
#[derive(Default)]
pub struct SnapshotBuilder {
    imports: Vec<HostFunctionId>,
    exports: Vec<(ExportId, Vec<u8>)>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an unresolved import the engine must satisfy at restore.
    pub fn import(mut self, id: HostFunctionId) -> Self {
        self.imports.push(id);
        self
    }

    /// Add an exported function with the given body.
    pub fn export(mut self, id: ExportId, body: Body) -> Self {
        self.exports.push((id, body.data));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut data = Vec::new();
        put_u16_le(self.imports.len() as u16, &mut data);
        for id in &self.imports {
            put_u16_le(*id, &mut data);
        }
        put_u16_le(self.exports.len() as u16, &mut data);
        for (id, body) in &self.exports {
            put_u16_le(*id, &mut data);
            put_u16_le(body.len() as u16, &mut data);
            data.extend_from_slice(body);
        }
        data
    }
}

/// Instruction body of one exported function. An empty body returns nil.
#[derive(Default)]
pub struct Body {
    data: Vec<u8>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_host(mut self, id: HostFunctionId, args: &[ScriptedValue]) -> Self {
        put_u8(OP_CALL_HOST, &mut self.data);
        put_u16_le(id, &mut self.data);
        put_u8(args.len() as u8, &mut self.data);
        for arg in args {
            put_value(arg, &mut self.data);
        }
        self
    }

    pub fn ret(mut self, value: ScriptedValue) -> Self {
        put_u8(OP_RETURN_VALUE, &mut self.data);
        put_value(&value, &mut self.data);
        self
    }

    pub fn ret_nil(mut self) -> Self {
        put_u8(OP_RETURN_NIL, &mut self.data);
        self
    }
}

fn put_u8(value: u8, buffer: &mut Vec<u8>) {
    buffer.push(value);
}

fn put_u16_le(value: u16, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn put_i32_le(value: i32, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn put_value(value: &ScriptedValue, buffer: &mut Vec<u8>) {
    match value {
        ScriptedValue::Nil => put_u8(TAG_NIL, buffer),
        ScriptedValue::Bool(b) => {
            put_u8(TAG_BOOL, buffer);
            put_u8(u8::from(*b), buffer);
        }
        ScriptedValue::Int(v) => {
            put_u8(TAG_INT, buffer);
            put_i32_le(*v, buffer);
        }
        ScriptedValue::Str(s) => {
            put_u8(TAG_STR, buffer);
            put_u16_le(s.len() as u16, buffer);
            buffer.extend_from_slice(s.as_bytes());
        }
        ScriptedValue::Function(_) => panic!("function values cannot be serialized"),
    }
}
