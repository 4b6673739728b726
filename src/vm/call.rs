//! Calls, method dispatch and the class model.

use std::rc::Rc;

use super::natives;
use super::task::{CallFrame, FrameKind};
use super::{Vm, VmError, VmResult};
use crate::chunk::OP_GET_GLOBAL;
use crate::gc::ObjRef;
use crate::object::{NativeFn, Obj, ObjBoundMethod, ObjClosure, ObjEnumValue, ObjInstance, TaskStatus};
use crate::table::{Key, Table};
use crate::value::{self, Value};

/// Runtime type names that can carry extension methods.
const EXTENSIBLE_TYPES: &[&str] = &[
    "null", "bool", "num", "str", "func", "class", "instance", "method", "list", "dict", "enum", "enumvalue",
    "package", "native", "task",
];

enum Callee {
    Closure,
    Native(NativeFn),
    Class,
    Bound(Value, ObjRef),
    Other,
}

enum Receiver {
    Class(ObjRef),
    Package(ObjRef),
    Instance(ObjRef),
    Other,
}

impl Vm {
    pub(crate) fn call_value(&mut self, callee: Value, argc: usize) -> VmResult {
        let Value::Obj(r) = callee else {
            return Err(VmError::Type("Can only call functions and classes."));
        };
        let kind = match self.heap.get(r) {
            Obj::Closure(_) => Callee::Closure,
            Obj::Native(n) => Callee::Native(n.function),
            Obj::Class(_) => Callee::Class,
            Obj::BoundMethod(b) => Callee::Bound(b.receiver, b.method),
            _ => Callee::Other,
        };
        match kind {
            Callee::Closure => self.call_closure(r, argc),
            Callee::Native(function) => self.call_native(function, argc),
            Callee::Class => self.instantiate(r, argc),
            Callee::Bound(receiver, method) => {
                let slot = self.task.stack.len() - argc - 1;
                self.task.stack[slot] = receiver;
                self.call_closure(method, argc)
            }
            Callee::Other => Err(VmError::Type("Can only call functions and classes.")),
        }
    }

    /// Pushes a frame for `closure`. The callee and its `argc` arguments are
    /// already on the stack. Missing arguments become `none`, extra ones are
    /// dropped after being recorded for `args`.
    pub(crate) fn call_closure(&mut self, closure: ObjRef, argc: usize) -> VmResult {
        if self.task.frames.len() >= self.config.frames_max {
            return Err(VmError::StackOverflow);
        }
        let (chunk, arity, package) = {
            let c = self.heap.closure(closure);
            let f = self.heap.function(c.function);
            (Rc::clone(&f.chunk), f.arity, c.package)
        };

        let first = self.task.stack.len() - argc;
        let args = if chunk.code.first() == Some(&OP_GET_GLOBAL) {
            self.task.stack[first..].to_vec()
        } else {
            Vec::new()
        };
        if argc < arity {
            self.task.stack.resize(first + arity, Value::None);
        } else {
            self.task.stack.truncate(first + arity);
        }

        self.task.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base: first - 1,
            package,
            kind: FrameKind::Function,
            args,
        });
        Ok(())
    }

    fn call_native(&mut self, function: NativeFn, argc: usize) -> VmResult {
        let first = self.task.stack.len() - argc;
        let args = self.task.stack[first..].to_vec();
        let result = function(self, &args).map_err(VmError::Message)?;
        self.task.stack.truncate(first - 1);
        self.push(result);
        Ok(())
    }

    fn instantiate(&mut self, class: ObjRef, argc: usize) -> VmResult {
        let fields = self.heap.class(class).fields.clone();
        let instance = self.heap.alloc(Obj::Instance(ObjInstance { class, fields }));
        let slot = self.task.stack.len() - argc - 1;
        self.task.stack[slot] = Value::Obj(instance);
        match self.find_method(class, self.names.init) {
            Some(init) => self.call_closure(init, argc),
            None if argc != 0 => Err(VmError::Message(format!("Expected 0 arguments but got {argc}."))),
            None => Ok(()),
        }
    }

    pub(crate) fn make_closure(&mut self) {
        let Value::Obj(function) = self.read_constant() else {
            unreachable!("closure operand is not a function");
        };
        let count = self.heap.function(function).upvalue_count;
        let (base, enclosing, package) = {
            let frame = self.task.frame();
            (frame.base, frame.closure, frame.package)
        };
        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            let is_local = self.read_byte() == 1;
            let index = self.read_u16() as usize;
            let upvalue = if is_local {
                self.task.capture_upvalue(&mut self.heap, base + index)
            } else {
                self.heap.closure(enclosing).upvalues[index]
            };
            upvalues.push(upvalue);
        }
        let closure = self.heap.alloc(Obj::Closure(ObjClosure { function, upvalues, package }));
        self.push(Value::Obj(closure));
    }

    pub(crate) fn return_from_frame(&mut self) {
        let result = self.pop();
        let Some(frame) = self.task.frames.pop() else {
            unreachable!("return without a frame");
        };
        self.task.close_upvalues(&mut self.heap, frame.base);
        let depth = self.task.frames.len();
        while self.task.tries.last().is_some_and(|t| t.depth > depth) {
            self.task.tries.pop();
        }
        self.task.stack.truncate(frame.base);

        if self.task.frames.is_empty() {
            self.finish_task(result);
            return;
        }
        match frame.kind {
            FrameKind::Function => self.push(result),
            FrameKind::Package { require: true } => {
                self.push(frame.package.map(Value::Obj).unwrap_or_default());
            }
            FrameKind::Package { require: false } => {}
        }
    }

    // ── Methods ─────────────────────────────────────────────────────

    /// Looks `name` up on `class` and its ancestors.
    pub(crate) fn find_method(&self, class: ObjRef, name: ObjRef) -> Option<ObjRef> {
        let key = self.heap.key(name);
        let mut current = Some(class);
        while let Some(c) = current {
            let class = self.heap.class(c);
            if let Some(Value::Obj(method)) = class.methods.get(key) {
                return Some(method);
            }
            current = class.superclass;
        }
        None
    }

    pub(crate) fn find_static(&self, class: ObjRef, name: ObjRef) -> Option<Value> {
        let key = self.heap.key(name);
        let owner = self.static_owner(class, key)?;
        self.heap.class(owner).static_fields.get(key)
    }

    /// The class on the chain from `class` upwards that holds static `key`.
    pub(crate) fn static_owner(&self, class: ObjRef, key: Key) -> Option<ObjRef> {
        let mut current = Some(class);
        while let Some(c) = current {
            let class = self.heap.class(c);
            if class.static_fields.contains(key) {
                return Some(c);
            }
            current = class.superclass;
        }
        None
    }

    fn extension(&self, receiver: Value, name: ObjRef) -> Option<ObjRef> {
        let table = self.extensions.get(value::type_name(&self.heap, receiver))?;
        table.get(self.heap.key(name)).and_then(Value::as_obj)
    }

    fn undefined_property(&self, name: ObjRef) -> VmError {
        VmError::UndefinedProperty(self.heap.str(name).to_string())
    }

    /// `receiver.name(args)` without materializing a bound method.
    pub(crate) fn invoke(&mut self, name: ObjRef, argc: usize) -> VmResult {
        let receiver = self.peek(argc);
        let slot = self.task.stack.len() - argc - 1;
        let kind = match receiver {
            Value::Obj(r) => match self.heap.get(r) {
                Obj::Class(_) => Receiver::Class(r),
                Obj::Package(_) => Receiver::Package(r),
                Obj::Instance(_) => Receiver::Instance(r),
                _ => Receiver::Other,
            },
            _ => Receiver::Other,
        };

        match kind {
            Receiver::Class(class) => {
                if let Some(method) = self.find_method(class, name) {
                    return self.call_closure(method, argc);
                }
                if let Some(value) = self.find_static(class, name) {
                    self.task.stack[slot] = value;
                    return self.call_value(value, argc);
                }
                if let Some(extension) = self.extension(receiver, name) {
                    return self.call_closure(extension, argc);
                }
                Err(self.undefined_property(name))
            }
            Receiver::Package(package) => {
                let key = self.heap.key(name);
                match self.heap.package(package).symbols.get(key) {
                    Some(value) => {
                        self.task.stack[slot] = value;
                        self.call_value(value, argc)
                    }
                    None => Err(self.undefined_property(name)),
                }
            }
            Receiver::Instance(instance) => {
                if let Some(extension) = self.extension(receiver, name) {
                    return self.call_closure(extension, argc);
                }
                let key = self.heap.key(name);
                let (class, field) = {
                    let i = self.heap.instance(instance);
                    (i.class, i.fields.get(key))
                };
                if let Some(method) = self.find_method(class, name) {
                    return self.call_closure(method, argc);
                }
                match field {
                    Some(field) => {
                        self.task.stack[slot] = field;
                        self.call_value(field, argc)
                    }
                    None => Err(self.undefined_property(name)),
                }
            }
            Receiver::Other => {
                if let Some(extension) = self.extension(receiver, name) {
                    return self.call_closure(extension, argc);
                }
                let Value::Obj(target) = receiver else {
                    return Err(VmError::Type("Only instances have methods."));
                };
                let args = self.task.stack[slot + 1..].to_vec();
                let method = self.heap.str(name).to_string();
                match natives::call_method(self, target, &method, &args) {
                    Some(result) => {
                        let result = result.map_err(VmError::Message)?;
                        self.task.stack.truncate(slot);
                        self.push(result);
                        Ok(())
                    }
                    None => Err(VmError::Type("Only instances have methods.")),
                }
            }
        }
    }

    /// `super.name(args)`; the receiver is already in the callee slot.
    pub(crate) fn invoke_super(&mut self, superclass: Value, name: ObjRef, argc: usize) -> VmResult {
        let Some(class) = self.as_class(superclass) else {
            return Err(VmError::Type("Superclass must be a class."));
        };
        match self.find_method(class, name) {
            Some(method) => self.call_closure(method, argc),
            None => Err(self.undefined_property(name)),
        }
    }

    pub(crate) fn bind_super(&mut self, superclass: Value, receiver: Value, name: ObjRef) -> VmResult<Value> {
        let Some(class) = self.as_class(superclass) else {
            return Err(VmError::Type("Superclass must be a class."));
        };
        match self.find_method(class, name) {
            Some(method) => Ok(self.bind(receiver, method)),
            None => Err(self.undefined_property(name)),
        }
    }

    fn bind(&mut self, receiver: Value, method: ObjRef) -> Value {
        Value::Obj(self.heap.alloc(Obj::BoundMethod(ObjBoundMethod { receiver, method })))
    }

    fn as_class(&self, value: Value) -> Option<ObjRef> {
        match value {
            Value::Obj(r) if matches!(self.heap.get(r), Obj::Class(_)) => Some(r),
            _ => None,
        }
    }

    /// A method an instance defines for an operator symbol.
    pub(crate) fn operator_method(&mut self, receiver: Value, symbol: &str) -> Option<ObjRef> {
        let Value::Obj(r) = receiver else { return None };
        let Obj::Instance(instance) = self.heap.get(r) else { return None };
        let class = instance.class;
        let name = self.heap.intern(symbol);
        self.find_method(class, name)
    }

    // ── Properties ──────────────────────────────────────────────────

    pub(crate) fn get_property(&mut self, target: Value, name: ObjRef) -> VmResult<Value> {
        let Value::Obj(r) = target else {
            return Err(VmError::Type("Only instances have properties."));
        };
        let key = self.heap.key(name);
        match self.heap.get(r) {
            Obj::Instance(instance) => {
                if let Some(value) = instance.fields.get(key) {
                    return Ok(value);
                }
                let class = instance.class;
                if let Some(method) = self.find_method(class, name) {
                    return Ok(self.bind(target, method));
                }
                self.find_static(class, name).ok_or_else(|| self.undefined_property(name))
            }
            Obj::Class(_) => {
                if let Some(value) = self.find_static(r, name) {
                    return Ok(value);
                }
                self.find_method(r, name).map(Value::Obj).ok_or_else(|| self.undefined_property(name))
            }
            Obj::Enum(e) => e.members.get(key).ok_or_else(|| self.undefined_property(name)),
            Obj::EnumValue(v) => match self.heap.str(name) {
                "name" => Ok(Value::Obj(v.name)),
                "value" => Ok(v.value),
                _ => Err(self.undefined_property(name)),
            },
            Obj::Package(p) => p.symbols.get(key).ok_or_else(|| self.undefined_property(name)),
            Obj::Task(t) => match self.heap.str(name) {
                "name" => Ok(Value::Obj(t.name)),
                "id" => Ok(Value::Number(t.id as f64)),
                "done" => Ok(Value::Bool(t.status != TaskStatus::Running)),
                "result" => Ok(t.result),
                _ => Err(self.undefined_property(name)),
            },
            _ => Err(VmError::Type("Only instances have properties.")),
        }
    }

    pub(crate) fn set_property(&mut self, target: Value, name: ObjRef, value: Value) -> VmResult {
        let Value::Obj(r) = target else {
            return Err(VmError::Type("Only instances have fields."));
        };
        let key = self.heap.key(name);
        match self.heap.get_mut(r) {
            Obj::Instance(instance) => {
                instance.fields.set(key, value);
            }
            Obj::Class(class) => {
                class.static_fields.set(key, value);
            }
            Obj::Package(package) => {
                package.symbols.set(key, value);
            }
            _ => return Err(VmError::Type("Only instances have fields.")),
        }
        Ok(())
    }

    // ── Declarations ────────────────────────────────────────────────

    /// Stack: superclass, subclass. Leaves the superclass as the `super`
    /// local.
    pub(crate) fn inherit(&mut self) -> VmResult {
        let subclass = self.pop();
        let Some(superclass) = self.as_class(self.peek(0)) else {
            return Err(VmError::Type("Superclass must be a class."));
        };
        let Some(subclass) = self.as_class(subclass) else {
            unreachable!("inherit target is not a class");
        };
        let (fields, statics): (Table, Table) = {
            let parent = self.heap.class(superclass);
            (parent.fields.clone(), parent.static_fields.clone())
        };
        // Methods stay on the parent; `find_method` walks `superclass`.
        let child = self.heap.class_mut(subclass);
        child.superclass = Some(superclass);
        fields.add_all(&mut child.fields);
        statics.add_all(&mut child.static_fields);
        Ok(())
    }

    /// Stack: class, closure.
    pub(crate) fn define_method(&mut self, name: ObjRef) {
        let method = self.pop();
        let class = self.pop();
        let key = self.heap.key(name);
        if let Some(class) = self.as_class(class) {
            self.heap.class_mut(class).methods.set(key, method);
        }
    }

    /// Stack: class or enum, value.
    pub(crate) fn define_property(&mut self, name: ObjRef, is_static: bool) -> VmResult {
        let value = self.pop();
        let Value::Obj(owner) = self.pop() else {
            unreachable!("property owner is not an object");
        };
        let key = self.heap.key(name);
        let last = match self.heap.get_mut(owner) {
            Obj::Class(class) => {
                if is_static {
                    class.static_fields.set(key, value);
                } else {
                    class.fields.set(key, value);
                }
                return Ok(());
            }
            Obj::Enum(e) => e.last,
            _ => unreachable!("property owner is neither a class nor an enum"),
        };

        let value = match (value, last) {
            (Value::None, Value::None) => Value::Number(0.0),
            (Value::None, Value::Number(n)) => Value::Number(n + 1.0),
            (Value::None, _) => {
                return Err(VmError::Message(format!(
                    "Enum member '{}' needs a value after a non-numeric member.",
                    self.heap.str(name)
                )));
            }
            (value, _) => value,
        };
        let member = self.heap.alloc(Obj::EnumValue(ObjEnumValue { owner, name, value }));
        let e = self.heap.enumeration_mut(owner);
        e.members.set(key, Value::Obj(member));
        e.last = value;
        Ok(())
    }

    /// `func type.name() {}`: a built-in type name extends that type, a
    /// class name adds a method to the class.
    pub(crate) fn define_extension(&mut self, type_name: ObjRef, name: ObjRef) -> VmResult {
        let method = self.pop();
        let key = self.heap.key(name);
        let ty = self.heap.str(type_name);
        if let Some(&ty) = EXTENSIBLE_TYPES.iter().find(|&&t| t == ty) {
            self.extensions.entry(ty).or_default().set(key, method);
            return Ok(());
        }
        match self.get_global(type_name) {
            Ok(value) => match self.as_class(value) {
                Some(class) => {
                    self.heap.class_mut(class).methods.set(key, method);
                    Ok(())
                }
                None => Err(VmError::Message(format!("Cannot extend '{}'.", self.heap.str(type_name)))),
            },
            Err(_) => Err(VmError::Message(format!("Unknown type '{}'.", self.heap.str(type_name)))),
        }
    }
}
