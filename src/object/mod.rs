//! Heap object kinds.
//!
//! Every heap entity is one variant of the closed [`Obj`] sum type. Objects
//! refer to each other through [`ObjRef`] handles into the [`Heap`] arena,
//! never through Rust references, so cycles need no special treatment.
//!
//! [`Heap`]: crate::gc::Heap

use std::rc::Rc;

use crate::chunk::Chunk;
use crate::dict::Dict;
use crate::gc::ObjRef;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// Host function callable from scripts. An `Err` is raised as a script
/// error and can be caught with `try`.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, String>;

#[derive(Debug)]
pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(Upvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    List(Vec<Value>),
    Dict(Dict),
    Enum(ObjEnum),
    EnumValue(ObjEnumValue),
    Package(ObjPackage),
    Native(ObjNative),
    Task(ObjTask),
}

#[derive(Debug)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

/// FNV-1a, the hash cached on every interned string.
pub fn hash_string(s: &str) -> u32 {
    s.bytes().fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619))
}

/// A documentation comment attached to a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct DocRecord {
    pub id: u32,
    pub line: u32,
    pub text: String,
}

#[derive(Debug)]
pub struct ObjFunction {
    pub arity: usize,
    pub upvalue_count: usize,
    pub is_static: bool,
    pub name: Option<ObjRef>,
    pub path: Option<ObjRef>,
    pub chunk: Rc<Chunk>,
    pub docs: Vec<DocRecord>,
}

#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
    pub package: Option<ObjRef>,
}

/// A captured variable. Open cells alias a stack slot of the task that
/// declared the variable; closing copies the value into the cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    Open { task: u32, slot: usize },
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub superclass: Option<ObjRef>,
    pub methods: Table,
    pub fields: Table,
    pub static_fields: Table,
    pub package: Option<ObjRef>,
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

#[derive(Debug)]
pub struct ObjEnum {
    pub name: ObjRef,
    pub members: Table,
    /// Value of the most recently declared member, for auto-increment.
    pub last: Value,
}

#[derive(Debug)]
pub struct ObjEnumValue {
    pub owner: ObjRef,
    pub name: ObjRef,
    pub value: Value,
}

#[derive(Debug)]
pub struct ObjPackage {
    pub name: ObjRef,
    pub symbols: Table,
    pub parent: Option<ObjRef>,
}

pub struct ObjNative {
    pub name: String,
    pub function: NativeFn,
}

impl std::fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Finished,
    Aborted,
}

#[derive(Debug)]
pub struct ObjTask {
    pub name: ObjRef,
    pub id: u32,
    pub status: TaskStatus,
    pub result: Value,
}

impl Obj {
    /// Pushes every handle this object keeps alive.
    pub(crate) fn trace(&self, out: &mut Vec<ObjRef>) {
        fn value(v: Value, out: &mut Vec<ObjRef>) {
            if let Value::Obj(r) = v {
                out.push(r);
            }
        }
        fn table(t: &Table, out: &mut Vec<ObjRef>) {
            for (k, v) in t.iter() {
                out.push(k.obj);
                value(v, out);
            }
        }
        match self {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                out.extend(f.name);
                out.extend(f.path);
                for c in &f.chunk.constants {
                    value(*c, out);
                }
            }
            Obj::Closure(c) => {
                out.push(c.function);
                out.extend(c.upvalues.iter().copied());
                out.extend(c.package);
            }
            Obj::Upvalue(Upvalue::Closed(v)) => value(*v, out),
            Obj::Upvalue(Upvalue::Open { .. }) => {}
            Obj::Class(c) => {
                out.push(c.name);
                out.extend(c.superclass);
                out.extend(c.package);
                table(&c.methods, out);
                table(&c.fields, out);
                table(&c.static_fields, out);
            }
            Obj::Instance(i) => {
                out.push(i.class);
                table(&i.fields, out);
            }
            Obj::BoundMethod(b) => {
                value(b.receiver, out);
                out.push(b.method);
            }
            Obj::List(items) => {
                for v in items {
                    value(*v, out);
                }
            }
            Obj::Dict(d) => {
                for v in d.values() {
                    value(v, out);
                }
            }
            Obj::Enum(e) => {
                out.push(e.name);
                table(&e.members, out);
                value(e.last, out);
            }
            Obj::EnumValue(e) => {
                out.push(e.owner);
                out.push(e.name);
                value(e.value, out);
            }
            Obj::Package(p) => {
                out.push(p.name);
                out.extend(p.parent);
                table(&p.symbols, out);
            }
            Obj::Task(t) => {
                out.push(t.name);
                value(t.result, out);
            }
        }
    }

    /// Approximate bytes owned by this object, header included.
    pub(crate) fn estimate_size(&self) -> usize {
        let owned = match self {
            Obj::String(s) => s.chars.len(),
            Obj::Function(f) => f.chunk.heap_size() + f.docs.len() * std::mem::size_of::<DocRecord>(),
            Obj::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.heap_size() + c.fields.heap_size() + c.static_fields.heap_size(),
            Obj::Instance(i) => i.fields.heap_size(),
            Obj::List(items) => items.capacity() * std::mem::size_of::<Value>(),
            Obj::Dict(d) => d.heap_size(),
            Obj::Enum(e) => e.members.heap_size(),
            Obj::Package(p) => p.symbols.heap_size(),
            Obj::Native(n) => n.name.len(),
            Obj::Upvalue(_) | Obj::BoundMethod(_) | Obj::EnumValue(_) | Obj::Task(_) => 0,
        };
        std::mem::size_of::<Obj>() + owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(hash_string(""), 2166136261);
        assert_eq!(hash_string("a"), 0xe40c292c);
    }

    #[test]
    fn list_traces_object_elements_only() {
        let a = ObjRef::from_index(3);
        let list = Obj::List(vec![Value::Number(1.0), Value::Obj(a), Value::None]);
        let mut out = Vec::new();
        list.trace(&mut out);
        assert_eq!(out, vec![a]);
    }

    #[test]
    fn size_grows_with_contents() {
        let small = Obj::List(Vec::new());
        let big = Obj::List(vec![Value::None; 100]);
        assert!(big.estimate_size() > small.estimate_size());
    }
}
