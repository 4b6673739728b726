//! The bytecode virtual machine.
//!
//! A stack machine that executes the chunks produced by
//! [`crate::compiler`]. Execution state lives in tasks (see [`task`]); the
//! dispatch loop runs the current task one instruction at a time and hands
//! control to the scheduler between instructions, which is also the only
//! place the collector may run.

mod call;
mod module;
mod natives;
mod ops;
mod task;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use crate::chunk::*;
use crate::compiler::{self, ARGS_GLOBAL, CompileError};
use crate::gc::{GcConfig, Heap, ObjRef};
use crate::object::{NativeFn, Obj, ObjClass, ObjClosure, ObjEnum, ObjNative, ObjTask, TaskStatus};
use crate::table::Table;
use crate::value::{self, Value};

use task::{CallFrame, FrameKind, MAIN_TASK, TASK_QUANTUM, Task, TaskState, TryFrame};

/// Default call depth per task.
pub const FRAMES_MAX: usize = 64;

#[derive(Clone, Debug)]
pub struct VmConfig {
    pub gc: GcConfig,
    /// Directories searched by `import` and `require` after the path itself.
    pub search_paths: Vec<PathBuf>,
    /// Print every instruction and the operand stack to stderr.
    pub trace: bool,
    pub frames_max: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { gc: GcConfig::default(), search_paths: Vec::new(), trace: false, frames_max: FRAMES_MAX }
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Raised inside the VM. Everything except `Compile` can be caught by
/// `try`; the message is what a `catch` receives.
#[derive(Debug, thiserror::Error)]
pub(crate) enum VmError {
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Deadlock: every task is waiting on another task.")]
    Deadlock,
    #[error("{0}")]
    Type(&'static str),
    #[error("{0}")]
    Message(String),
    /// An imported file failed to compile. Not catchable.
    #[error("compile error")]
    Compile(Vec<CompileError>),
}

type VmResult<T = ()> = Result<T, VmError>;

/// An uncaught script error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", trace.join("\n"))]
pub struct RuntimeError {
    pub message: String,
    /// `[line N] in name(): message` per frame, innermost first, then
    /// `Task[name]`.
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterpretError {
    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(RuntimeError),
}

impl InterpretError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) => 70,
        }
    }
}

/// Interned names the VM looks up by handle.
#[derive(Debug, Clone, Copy)]
struct Names {
    init: ObjRef,
    args: ObjRef,
    ans: ObjRef,
    name: ObjRef,
}

// ── VM ──────────────────────────────────────────────────────────────

pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) globals: Table,
    /// Methods attached to built-in types, keyed by type name.
    pub(crate) extensions: HashMap<&'static str, Table>,
    pub(crate) task: Task,
    pub(crate) queue: VecDeque<Task>,
    pub(crate) next_task_id: u32,
    pub(crate) main_result: Option<Value>,
    main_handle: ObjRef,
    names: Names,
    config: VmConfig,
    script_args: Vec<String>,
    started: Instant,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let mut heap = Heap::new(config.gc.clone());
        let names = Names {
            init: heap.intern("init"),
            args: heap.intern(ARGS_GLOBAL),
            ans: heap.intern("__ans__"),
            name: heap.intern("__name__"),
        };
        let task_name = heap.intern("default");
        let main_handle = heap.alloc(Obj::Task(ObjTask {
            name: task_name,
            id: MAIN_TASK,
            status: TaskStatus::Finished,
            result: Value::None,
        }));

        let mut vm = Vm {
            heap,
            globals: Table::new(),
            extensions: HashMap::new(),
            task: Task::new(MAIN_TASK, main_handle),
            queue: VecDeque::new(),
            next_task_id: MAIN_TASK,
            main_result: None,
            main_handle,
            names,
            config,
            script_args: Vec::new(),
            started: Instant::now(),
        };
        natives::install(&mut vm);
        vm
    }

    /// Compiles and runs `source`. The result is the value of a top-level
    /// `return`, or `none`.
    pub fn interpret(&mut self, source: &str, path: &str) -> Result<Value, InterpretError> {
        let function = compiler::compile(&mut self.heap, source, path).map_err(InterpretError::Compile)?;
        let closure = self.heap.alloc(Obj::Closure(ObjClosure { function, upvalues: Vec::new(), package: None }));
        let name = self.heap.intern_value(path);
        let key = self.heap.key(self.names.name);
        self.globals.set(key, name);
        self.start_main(closure);
        self.run()
    }

    /// Adds a directory for `import` and `require` to search.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.config.search_paths.push(path.into());
    }

    /// Sets the list scripts see as `args` at the top level.
    pub fn load_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_args = args.into_iter().map(Into::into).collect();
    }

    /// Registers a host function as a global.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let native = self.heap.alloc(Obj::Native(ObjNative { name: name.to_string(), function }));
        let key = self.heap.intern(name);
        let key = self.heap.key(key);
        self.globals.set(key, Value::Obj(native));
    }

    /// Creates or overwrites a global.
    pub fn define_global(&mut self, name: &str, value: Value) {
        let key = self.heap.intern(name);
        let key = self.heap.key(key);
        self.globals.set(key, value);
    }

    /// Compiles `source` and lists the bytecode of the script and every
    /// function nested in it.
    pub fn disassemble(&mut self, source: &str, path: &str) -> Result<String, InterpretError> {
        let script = compiler::compile(&mut self.heap, source, path).map_err(InterpretError::Compile)?;
        let mut out = String::new();
        let mut pending = vec![script];
        while let Some(function) = pending.pop() {
            let function = self.heap.function(function);
            let name = function.name.map_or(path, |n| self.heap.str(n));
            out.push_str(&function.chunk.disassemble(&self.heap, name));
            for constant in function.chunk.constants.iter().rev() {
                match constant {
                    Value::Obj(r) if matches!(self.heap.get(*r), Obj::Function(_)) => pending.push(*r),
                    _ => {}
                }
            }
        }
        Ok(out)
    }

    /// Reads a global by name.
    pub fn global(&mut self, name: &str) -> Option<Value> {
        let key = self.heap.intern(name);
        self.globals.get(self.heap.key(key))
    }

    /// Renders a value the way `print` does.
    pub fn format_value(&self, value: Value) -> String {
        value::format(&self.heap, value, false)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn bytes_allocated(&self) -> usize {
        self.heap.bytes_allocated()
    }

    /// Full collection from the VM roots. Returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut roots = Vec::new();
        for (key, value) in self.globals.iter() {
            roots.push(key.obj);
            roots.extend(value.as_obj());
        }
        for table in self.extensions.values() {
            for (key, value) in table.iter() {
                roots.push(key.obj);
                roots.extend(value.as_obj());
            }
        }
        self.task.roots(&mut roots);
        for task in &self.queue {
            task.roots(&mut roots);
        }
        let Names { init, args, ans, name } = self.names;
        roots.extend([init, args, ans, name, self.main_handle]);
        roots.extend(self.main_result.and_then(Value::as_obj));
        self.heap.collect(roots)
    }

    fn start_main(&mut self, closure: ObjRef) {
        self.drop_other_tasks();
        self.task.reset(&mut self.heap);
        self.task = Task::new(MAIN_TASK, self.main_handle);
        let handle = self.heap.task_mut(self.main_handle);
        handle.status = TaskStatus::Running;
        handle.result = Value::None;
        self.main_result = None;

        let args = std::mem::take(&mut self.script_args);
        let arg_values: Vec<Value> = args.iter().map(|a| self.heap.intern_value(a)).collect();
        self.script_args = args;
        let list = self.heap.alloc_list(arg_values.clone());
        let name = self.heap.intern("args");
        let key = self.heap.key(name);
        self.globals.set(key, list);

        let chunk = Rc::clone(&self.heap.function(self.heap.closure(closure).function).chunk);
        self.task.stack.push(Value::Obj(closure));
        self.task.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base: 0,
            package: None,
            kind: FrameKind::Function,
            args: arg_values,
        });
    }

    fn run(&mut self) -> Result<Value, InterpretError> {
        let mut budget = TASK_QUANTUM;
        loop {
            if self.task.is_done() || self.task.state != TaskState::Ready || budget == 0 {
                budget = TASK_QUANTUM;
                match self.schedule() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => self.raise(err)?,
                }
                continue;
            }
            budget -= 1;

            if self.heap.should_collect() {
                self.collect_garbage();
            }
            if self.config.trace {
                self.trace_instruction();
            }
            if let Err(err) = self.step() {
                self.raise(err)?;
            }
        }
        Ok(self.main_result.take().unwrap_or_default())
    }

    // ── Errors ──────────────────────────────────────────────────────

    /// Routes an error to the innermost `try` of the current task. Without
    /// one the task dies; for the main task that ends `interpret`.
    fn raise(&mut self, err: VmError) -> Result<(), InterpretError> {
        let message = match err {
            VmError::Compile(errors) => {
                self.abandon();
                return Err(InterpretError::Compile(errors));
            }
            other => other.to_string(),
        };

        if let Some(handler) = self.task.tries.pop() {
            self.unwind_to(handler, &message);
            return Ok(());
        }

        let error = RuntimeError { trace: self.stack_trace(&message), message };
        if self.task.id == MAIN_TASK {
            self.abandon();
            return Err(InterpretError::Runtime(error));
        }
        eprintln!("{error}");
        self.task.reset(&mut self.heap);
        self.finish_task(Value::None);
        Ok(())
    }

    fn unwind_to(&mut self, handler: TryFrame, message: &str) {
        self.task.frames.truncate(handler.depth);
        self.task.close_upvalues(&mut self.heap, handler.height);
        self.task.stack.truncate(handler.height);
        self.task.frame_mut().ip = handler.catch_ip;
        let message = self.heap.intern_value(message);
        self.push(message);
    }

    /// Stops every task after an uncaught error in the main one.
    fn abandon(&mut self) {
        self.drop_other_tasks();
        self.task.reset(&mut self.heap);
        if self.task.id == MAIN_TASK {
            self.heap.task_mut(self.main_handle).status = TaskStatus::Aborted;
        }
    }

    fn stack_trace(&self, message: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for frame in self.task.frames.iter().rev() {
            let function = self.heap.function(self.heap.closure(frame.closure).function);
            let line = frame.chunk.get_line(frame.ip.saturating_sub(1));
            match function.name {
                Some(name) => {
                    let package = frame
                        .package
                        .map(|p| format!("{}.", self.heap.str(self.heap.package(p).name)))
                        .unwrap_or_default();
                    lines.push(format!("[line {line}] in {package}{}(): {message}", self.heap.str(name)));
                }
                None => {
                    let script = function.path.map(|p| self.heap.str(p)).unwrap_or("script");
                    lines.push(format!("[line {line}] in {script}: {message}"));
                    break;
                }
            }
        }
        let task = self.heap.task(self.task.handle);
        lines.push(format!("Task[{}]", self.heap.str(task.name)));
        lines
    }

    fn trace_instruction(&self) {
        let frame = self.task.frame();
        let stack: String = self.task.stack[frame.base..]
            .iter()
            .map(|v| format!("[ {} ]", value::format(&self.heap, *v, true)))
            .collect();
        eprintln!("          {stack}");
        let (text, _) = frame.chunk.disassemble_instruction(&self.heap, frame.ip);
        eprintln!("{text}");
    }

    // ── Stack and operands ──────────────────────────────────────────

    pub(crate) fn push(&mut self, value: Value) {
        self.task.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.task.stack.pop().unwrap_or_else(|| unreachable!("operand stack underflow"))
    }

    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.task.stack[self.task.stack.len() - 1 - distance]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.task.frame_mut();
        let byte = frame.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.task.frame_mut();
        let value = frame.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_u16() as usize;
        self.task.frame().chunk.constants[index]
    }

    fn read_string(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(r) => r,
            other => unreachable!("expected a name constant, found {other:?}"),
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn step(&mut self) -> VmResult {
        let op = self.read_byte();
        match op {
            OP_CONSTANT => {
                let value = self.read_constant();
                self.push(value);
            }
            OP_NULL => self.push(Value::None),
            OP_TRUE => self.push(Value::Bool(true)),
            OP_FALSE => self.push(Value::Bool(false)),
            OP_STRING => {
                let count = self.read_u16() as usize;
                self.concat_pieces(count);
            }
            OP_EXPAND => {
                let exclusive = self.read_byte() == 1;
                self.expand(exclusive)?;
            }
            OP_POP => {
                self.pop();
            }
            OP_REPL_POP => {
                let value = self.pop();
                if self.task.frame().package.is_none() {
                    let key = self.heap.key(self.names.ans);
                    self.globals.set(key, value);
                }
            }
            OP_GET_LOCAL => {
                let slot = self.read_u16() as usize;
                let value = self.task.stack[self.task.frame().base + slot];
                self.push(value);
            }
            OP_SET_LOCAL => {
                let slot = self.read_u16() as usize;
                let base = self.task.frame().base;
                self.task.stack[base + slot] = self.peek(0);
            }
            OP_GET_GLOBAL => {
                let name = self.read_string();
                let value = self.get_global(name)?;
                self.push(value);
            }
            OP_DEFINE_GLOBAL => {
                let name = self.read_string();
                let value = self.pop();
                let key = self.heap.key(name);
                match self.task.frame().package {
                    Some(package) => {
                        self.heap.package_mut(package).symbols.set(key, value);
                    }
                    None => {
                        self.globals.set(key, value);
                    }
                }
            }
            OP_DEFINE_GLOBAL_FORCED => {
                let name = self.read_string();
                let value = self.pop();
                let key = self.heap.key(name);
                self.globals.set(key, value);
            }
            OP_SET_GLOBAL => {
                let name = self.read_string();
                let value = self.peek(0);
                self.set_global(name, value)?;
            }
            OP_GET_UPVALUE => {
                let index = self.read_u16() as usize;
                let upvalue = self.heap.closure(self.task.frame().closure).upvalues[index];
                let value = self.read_upvalue(upvalue);
                self.push(value);
            }
            OP_SET_UPVALUE => {
                let index = self.read_u16() as usize;
                let upvalue = self.heap.closure(self.task.frame().closure).upvalues[index];
                let value = self.peek(0);
                self.write_upvalue(upvalue, value);
            }
            OP_GET_PROPERTY => {
                let name = self.read_string();
                let value = self.get_property(self.peek(0), name)?;
                self.pop();
                self.push(value);
            }
            OP_GET_PROPERTY_NO_POP => {
                let name = self.read_string();
                let value = self.get_property(self.peek(0), name)?;
                self.push(value);
            }
            OP_SET_PROPERTY => {
                let name = self.read_string();
                let value = self.peek(0);
                self.set_property(self.peek(1), name, value)?;
                self.pop();
                self.pop();
                self.push(value);
            }
            OP_GET_SUPER => {
                let name = self.read_string();
                let superclass = self.pop();
                let receiver = self.pop();
                let bound = self.bind_super(superclass, receiver, name)?;
                self.push(bound);
            }
            OP_EQUAL => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(value::equal(&self.heap, a, b)));
            }
            OP_GREATER | OP_LESS => self.compare(op)?,
            OP_ADD | OP_SUBTRACT | OP_MULTIPLY | OP_DIVIDE | OP_MOD | OP_POW => {
                let elementwise = self.read_byte() == 1;
                self.arithmetic(op, elementwise)?;
            }
            OP_INC | OP_DEC => {
                let delta = if op == OP_INC { 1.0 } else { -1.0 };
                match self.numeric(self.peek(0)) {
                    Some(n) => {
                        self.pop();
                        self.push(Value::Number(n + delta));
                    }
                    None => return Err(VmError::Type("Operand must be a number.")),
                }
            }
            OP_SHIFT_LEFT | OP_SHIFT_RIGHT | OP_BITWISE_AND | OP_BITWISE_OR => self.bitwise(op)?,
            OP_IN => self.contains()?,
            OP_IS => {
                let negated = self.read_byte() == 1;
                let type_name = self.read_string();
                let value = self.pop();
                let matches = self.is_type(value, type_name);
                self.push(Value::Bool(matches != negated));
            }
            OP_NOT => self.not()?,
            OP_NEGATE => self.negate()?,
            OP_JUMP => {
                let offset = self.read_u16() as usize;
                self.task.frame_mut().ip += offset;
            }
            OP_JUMP_IF_FALSE => {
                let offset = self.read_u16() as usize;
                if self.peek(0).is_falsey() {
                    self.task.frame_mut().ip += offset;
                }
            }
            OP_LOOP => {
                let offset = self.read_u16() as usize;
                self.task.frame_mut().ip -= offset;
            }
            OP_DUP => self.push(self.peek(0)),
            OP_IMPORT => self.import()?,
            OP_REQUIRE => self.require()?,
            OP_NEW_LIST => {
                let list = self.heap.alloc_list(Vec::new());
                self.push(list);
            }
            OP_ADD_LIST => {
                let item = self.pop();
                if let Value::Obj(list) = self.peek(0) {
                    self.heap.list_mut(list).push(item);
                }
            }
            OP_NEW_DICT => {
                let dict = self.heap.alloc_dict(Default::default());
                self.push(dict);
            }
            OP_ADD_DICT => {
                let item = self.pop();
                let key = self.pop();
                let Some(key) = self.heap.as_str(key).map(str::to_string) else {
                    return Err(VmError::Type("Dictionary key must be a string."));
                };
                if let Value::Obj(dict) = self.peek(0) {
                    self.heap.dict_mut(dict).insert(&key, item);
                }
            }
            OP_SUBSCRIPT => self.subscript()?,
            OP_SUBSCRIPT_ASSIGN => self.subscript_assign()?,
            OP_CALL => {
                let argc = self.read_byte() as usize;
                self.call_value(self.peek(argc), argc)?;
            }
            OP_INVOKE => {
                let argc = self.read_byte() as usize;
                let name = self.read_string();
                self.invoke(name, argc)?;
            }
            OP_SUPER => {
                let argc = self.read_byte() as usize;
                let name = self.read_string();
                let superclass = self.pop();
                self.invoke_super(superclass, name, argc)?;
            }
            OP_CLOSURE => self.make_closure(),
            OP_CLOSE_UPVALUE => {
                let top = self.task.stack.len() - 1;
                self.task.close_upvalues(&mut self.heap, top);
                self.pop();
            }
            OP_RETURN => self.return_from_frame(),
            OP_CLASS => {
                let name = self.read_string();
                let class = self.heap.alloc(Obj::Class(ObjClass {
                    name,
                    superclass: None,
                    methods: Table::new(),
                    fields: Table::new(),
                    static_fields: Table::new(),
                    package: self.task.frame().package,
                }));
                self.push(Value::Obj(class));
            }
            OP_INHERIT => self.inherit()?,
            OP_METHOD => {
                let name = self.read_string();
                self.define_method(name);
            }
            OP_PROPERTY => {
                let name = self.read_string();
                let is_static = self.read_byte() == 1;
                self.define_property(name, is_static)?;
            }
            OP_EXTENSION => {
                let type_name = self.read_string();
                let name = self.read_string();
                self.define_extension(type_name, name)?;
            }
            OP_ENUM => {
                let name = self.read_string();
                let enumeration =
                    self.heap.alloc(Obj::Enum(ObjEnum { name, members: Table::new(), last: Value::None }));
                self.push(Value::Obj(enumeration));
            }
            OP_ASYNC => {
                let Value::Obj(closure) = self.pop() else {
                    unreachable!("async expects a closure");
                };
                let handle = self.spawn_task(closure);
                self.push(Value::Obj(handle));
            }
            OP_AWAIT => self.await_task()?,
            OP_ABORT => {
                let value = self.pop();
                match value {
                    Value::Obj(r) if matches!(self.heap.get(r), Obj::Task(_)) => self.abort_task(r)?,
                    _ => return Err(VmError::Type("Can only abort tasks.")),
                }
            }
            OP_TRY => {
                let offset = self.read_u16() as usize;
                let handler = TryFrame {
                    depth: self.task.frames.len(),
                    height: self.task.stack.len(),
                    catch_ip: self.task.frame().ip + offset,
                };
                self.task.tries.push(handler);
            }
            OP_CLOSE_TRY => {
                let offset = self.read_u16() as usize;
                self.task.tries.pop();
                self.task.frame_mut().ip += offset;
            }
            OP_NOP => {}
            _ => return Err(VmError::Message(format!("Unknown opcode {op}."))),
        }
        Ok(())
    }

    // ── Globals ─────────────────────────────────────────────────────

    fn get_global(&mut self, name: ObjRef) -> VmResult<Value> {
        if name == self.names.args {
            let args = self.task.frame().args.clone();
            return Ok(self.heap.alloc_list(args));
        }
        let key = self.heap.key(name);
        if let Some(instance) = self.frame_instance() {
            let instance = self.heap.instance(instance);
            if let Some(value) = instance.fields.get(key) {
                return Ok(value);
            }
            if let Some(value) = self.find_static(instance.class, name) {
                return Ok(value);
            }
        }
        let mut package = self.task.frame().package;
        while let Some(p) = package {
            let p = self.heap.package(p);
            if let Some(value) = p.symbols.get(key) {
                return Ok(value);
            }
            package = p.parent;
        }
        self.globals
            .get(key)
            .ok_or_else(|| VmError::UndefinedVariable(self.heap.str(name).to_string()))
    }

    fn set_global(&mut self, name: ObjRef, value: Value) -> VmResult {
        let key = self.heap.key(name);
        if let Some(instance) = self.frame_instance() {
            let class = {
                let instance = self.heap.instance_mut(instance);
                if instance.fields.contains(key) {
                    instance.fields.set(key, value);
                    return Ok(());
                }
                instance.class
            };
            if let Some(owner) = self.static_owner(class, key) {
                self.heap.class_mut(owner).static_fields.set(key, value);
                return Ok(());
            }
        }
        let mut package = self.task.frame().package;
        while let Some(p) = package {
            let p = self.heap.package_mut(p);
            if p.symbols.contains(key) {
                p.symbols.set(key, value);
                return Ok(());
            }
            package = p.parent;
        }
        if !self.globals.contains(key) {
            return Err(VmError::UndefinedVariable(self.heap.str(name).to_string()));
        }
        self.globals.set(key, value);
        Ok(())
    }

    /// The receiver of the running method, when it is an instance. Bare
    /// names inside a method see its fields and class statics first.
    fn frame_instance(&self) -> Option<ObjRef> {
        match self.task.stack.get(self.task.frame().base) {
            Some(Value::Obj(r)) if matches!(self.heap.get(*r), Obj::Instance(_)) => Some(*r),
            _ => None,
        }
    }

    // ── Tasks ───────────────────────────────────────────────────────

    /// `await t`: the result of a finished task, or park until it finishes
    /// and run this instruction again.
    fn await_task(&mut self) -> VmResult {
        let Value::Obj(handle) = self.peek(0) else {
            return Err(VmError::Type("Can only await tasks."));
        };
        let Obj::Task(target) = self.heap.get(handle) else {
            return Err(VmError::Type("Can only await tasks."));
        };
        match target.status {
            TaskStatus::Running if target.id == self.task.id => {
                Err(VmError::Type("A task cannot await itself."))
            }
            TaskStatus::Running => {
                self.task.state = TaskState::Parked(target.id);
                self.task.frame_mut().ip -= 1;
                Ok(())
            }
            TaskStatus::Finished => {
                let result = target.result;
                self.pop();
                self.push(result);
                Ok(())
            }
            TaskStatus::Aborted => {
                self.pop();
                self.push(Value::None);
                Ok(())
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new(VmConfig::default())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_run(source: &str) -> Value {
        let mut vm = Vm::default();
        match vm.interpret(source, "test") {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }

    fn vm_show(source: &str) -> String {
        let mut vm = Vm::default();
        match vm.interpret(source, "test") {
            Ok(v) => vm.format_value(v),
            Err(e) => panic!("{e}"),
        }
    }

    fn vm_error(source: &str) -> RuntimeError {
        let mut vm = Vm::default();
        match vm.interpret(source, "test") {
            Err(InterpretError::Runtime(e)) => e,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn vm_arithmetic_result() {
        assert_eq!(vm_run("var x = 1 + 2; return x;"), Value::Number(3.0));
        assert_eq!(vm_run("return 2 ^ 10 - 4 % 3;"), Value::Number(1023.0));
    }

    #[test]
    fn vm_no_return_is_none() {
        assert_eq!(vm_run("var x = 1"), Value::None);
    }

    #[test]
    fn vm_class_init_sets_field() {
        let src = "class P { var x; func init(x) { this.x = x; } }\nvar p = P(42)\nreturn p.x";
        assert_eq!(vm_run(src), Value::Number(42.0));
    }

    #[test]
    fn vm_returned_closure_keeps_upvalue() {
        let src = "func outer() { var a = 1; func inner() { return a; } return inner; }\nreturn outer()();";
        assert_eq!(vm_run(src), Value::Number(1.0));
    }

    #[test]
    fn vm_catch_receives_message() {
        assert_eq!(vm_show(r#"try { throw("boom"); } catch (e) { return e; }"#), "boom");
    }

    #[test]
    fn vm_catch_unwinds_frames() {
        let src = "func f(n) { if (n == 0) throw('deep'); return f(n - 1); }\n\
                   var r = 'none'\ntry { f(5) } catch (e) { r = e }\nreturn r";
        assert_eq!(vm_show(src), "deep");
    }

    #[test]
    fn vm_return_inside_try_drops_handler() {
        let src = "func f() { try { return 1 } catch { return 2 } }\nf()\nvar x = []\nreturn x[5]";
        let err = vm_error(src);
        assert_eq!(err.message, "List index out of bounds.");
    }

    #[test]
    fn vm_closures_per_iteration() {
        let src = "var fs = []\nfor (var i = 0; i < 3; i++) { var j = i; fs.push(@() => j) }\n\
                   return fs[0]() + fs[1]() + fs[2]()";
        assert_eq!(vm_run(src), Value::Number(3.0));
        let shared = "var fs = []\nvar j = 0\nfor (var i = 0; i < 3; i++) { j = i; fs.push(@() => j) }\n\
                      return fs[0]() + fs[1]() + fs[2]()";
        assert_eq!(vm_run(shared), Value::Number(6.0));
    }

    #[test]
    fn vm_under_application_pads_with_none() {
        assert_eq!(vm_run("func f(a, b) { return b; }\nreturn f(1)"), Value::None);
    }

    #[test]
    fn vm_args_list() {
        assert_eq!(vm_show("func f() { return args; }\nreturn f(1, 'a')"), "[1, 'a']");
    }

    #[test]
    fn vm_runtime_error_trace() {
        let err = vm_error("func boom() {\n  return 1 + nil_value;\n}\nboom()");
        assert_eq!(err.message, "Undefined variable 'nil_value'.");
        assert_eq!(err.trace[0], "[line 2] in boom(): Undefined variable 'nil_value'.");
        assert_eq!(err.trace[1], "[line 4] in test: Undefined variable 'nil_value'.");
        assert_eq!(err.trace.last().map(String::as_str), Some("Task[default]"));
    }

    #[test]
    fn vm_stack_overflow_is_an_error() {
        let err = vm_error("func f() { return f(); }\nf()");
        assert_eq!(err.message, "Stack overflow.");
    }

    #[test]
    fn vm_error_resets_for_next_run() {
        let mut vm = Vm::default();
        assert!(vm.interpret("var a = [1]\nreturn a[3]", "test").is_err());
        assert_eq!(vm.interpret("return a[0]", "test"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn vm_inheritance_and_super() {
        let src = "class A { func name() { return 'a'; } func greet() { return 'hi ' + this.name(); } }\n\
                   class B : A { func name() { return 'b' + super.name(); } }\n\
                   return B().greet()";
        assert_eq!(vm_show(src), "hi ba");
    }

    #[test]
    fn vm_subclass_reaches_parent_init_through_chain() {
        let mut vm = Vm::default();
        let src = "class A { var a; func init(a) { this.a = a; } }\nclass B : A { var b = 2; }\nreturn B(7).a + B(1).b";
        let result = vm.interpret(src, "test").map_err(|e| e.to_string());
        assert_eq!(result, Ok(Value::Number(9.0)));
        let Some(Value::Obj(b)) = vm.global("B") else { panic!("B is not a class") };
        let init = vm.heap.intern("init");
        let init = vm.heap.key(init);
        assert!(vm.heap.class(b).methods.get(init).is_none());
    }

    #[test]
    fn vm_bare_names_in_methods_see_fields() {
        let src = "class P { var x = 5; func get() { return x; } func set(v) { x = v; } }\n\
                   var p = P()\nvar before = p.get()\np.set(8)\nreturn before * 10 + p.x";
        assert_eq!(vm_run(src), Value::Number(58.0));
    }

    #[test]
    fn vm_bare_names_in_methods_see_statics_before_globals() {
        let src = "var n = 100\nclass C { static var n = 3; func bump() { n = n + 1; return n; } }\n\
                   var c = C()\nc.bump()\nreturn c.bump() * 1000 + n";
        assert_eq!(vm_run(src), Value::Number(5100.0));
    }

    #[test]
    fn vm_class_without_init_rejects_arguments() {
        let err = vm_error("class Q {}\nvar q = Q(1, 2)\nreturn 1");
        assert_eq!(err.message, "Expected 0 arguments but got 2.");
        assert_eq!(vm_run("class Q {}\nvar q = Q()\nreturn 1"), Value::Number(1.0));
    }

    #[test]
    fn vm_operator_overload() {
        let src = "class V { var x; func init(x) { this.x = x; } func +(o) { return V(this.x + o.x); } \
                   func [](i) { return this.x * i; } func -() { return V(-this.x); } }\n\
                   var v = V(2) + V(3)\nreturn [v.x, v[10], (-v).x]";
        assert_eq!(vm_show(src), "[5, 50, -5]");
    }

    #[test]
    fn vm_tasks_finish_in_any_await_order() {
        let src = "func work(n) { var s = 0; for (var i = 0; i < n; i++) s += i; return s; }\n\
                   var a = async work(300)\nvar b = async work(10)\n\
                   var rb = await b\nvar ra = await a\nreturn [ra, rb, a.done, b.done]";
        assert_eq!(vm_show(src), "[44850, 45, true, true]");
    }

    #[test]
    fn vm_mutual_await_deadlocks() {
        let src = "var a = null\nvar b = null\nfunc wa() { return await b; }\nfunc wb() { return await a; }\n\
                   a = async wa()\nb = async wb()\nreturn await a";
        let err = vm_error(src);
        assert!(err.message.contains("Deadlock"), "{}", err.message);
    }

    #[test]
    fn vm_abort_yields_none() {
        let src = "func spin() { while (true) {} }\nvar t = async spin()\nabort t\nreturn await t";
        assert_eq!(vm_run(src), Value::None);
    }

    #[test]
    fn vm_gc_frees_garbage_and_keeps_globals() {
        let mut vm = Vm::default();
        let src = "var keep = [1, 2, 3]\nfor (var i = 0; i < 10000; i++) { var t = [i, i + 1]; }\n\
                   var before = memory()\ngc()\nreturn [before, memory(), keep]";
        let result = vm.interpret(src, "test").unwrap();
        let list = vm.heap.list(result.as_obj().unwrap()).clone();
        let (before, after) = (list[0].as_number().unwrap(), list[1].as_number().unwrap());
        assert!(after < before, "{after} >= {before}");
        assert_eq!(vm.format_value(list[2]), "[1, 2, 3]");
    }

    #[test]
    fn vm_collection_keeps_reachable_objects_unmarked() {
        let mut vm = Vm::default();
        vm.interpret("var xs = [[1], {\"k\": 'v'}]", "test").unwrap();
        vm.collect_garbage();
        let first = vm.bytes_allocated();
        assert_eq!(vm.collect_garbage(), 0);
        assert_eq!(vm.bytes_allocated(), first);
        assert!(vm.heap.live_refs().all(|r| !vm.heap.is_marked(r)));
        let xs = vm.global("xs").unwrap();
        assert_eq!(vm.format_value(xs), "[[1], {\"k\": 'v'}]");
    }

    #[test]
    fn vm_enum_auto_increment() {
        assert_eq!(vm_show("enum E { A, B = 10, C }\nreturn [E.A, E.B, E.C, E.C.name]"), "[0, 10, 11, 'C']");
    }

    #[test]
    fn vm_ranges_and_for_in() {
        assert_eq!(vm_show("return [1..4, 1...4, 5..1, 0..2..6, 'a'..'c']"), "[[1, 2, 3, 4], [1, 2, 3], [5, 4, 3, 2, 1], [0, 2, 4, 6], ['a', 'b', 'c']]");
        assert_eq!(vm_run("var s = 0\nfor (var x, i in [10, 20]) s += x * (i + 1)\nreturn s"), Value::Number(50.0));
        assert_eq!(vm_show("var ks = ''\nfor (var k in {\"a\": 1}) ks += k\nreturn ks"), "a");
    }

    #[test]
    fn vm_extension_on_builtin_type() {
        assert_eq!(vm_run("func list.second() { return this[1]; }\nreturn [4, 5, 6].second()"), Value::Number(5.0));
    }

    #[test]
    fn vm_is_checks_types_and_ancestors() {
        let src = "class A {}\nclass B : A {}\nvar b = B()\nreturn [b is A, b is B, 1 is num, 'x' is !str, b is instance]";
        assert_eq!(vm_show(src), "[true, true, true, false, true]");
    }

    #[test]
    fn vm_switch_and_interpolation() {
        let src = "var n = 2\nvar out = ''\nswitch (n) { case 1: out = 'one' case 2: out = 'two' default: out = 'many' }\n\
                   return 'n=${n} ${out}'";
        assert_eq!(vm_show(src), "n=2 two");
    }

    #[test]
    fn vm_break_out_of_try_inside_loop() {
        let src = "var i = 0\nwhile (true) { try { i++; if (i == 3) break; } catch {} }\nvar l = []\n\
                   try { l[1] } catch (e) { return [i, e] }";
        assert_eq!(vm_show(src), "[3, 'List index out of bounds.']");
    }

    #[test]
    fn vm_repl_answer_global() {
        let mut vm = Vm::default();
        vm.interpret("1 + 41", "repl").unwrap();
        assert_eq!(vm.global("__ans__"), Some(Value::Number(42.0)));
    }

    #[test]
    fn vm_compile_error_is_reported() {
        let mut vm = Vm::default();
        let err = vm.interpret("var = 1", "test").unwrap_err();
        assert_eq!(err.exit_code(), 65);
        assert!(matches!(err, InterpretError::Compile(ref errors) if !errors.is_empty()));
    }
}
