//! cube: a small dynamically typed scripting language.
//!
//! Source text goes through a single-pass compiler ([`compiler`]) straight
//! to bytecode ([`chunk`]), which the stack machine in [`vm`] runs with
//! closures, classes, `try`/`catch` and cooperative tasks. Heap objects live
//! in the arena of [`gc`] and are reclaimed by mark and sweep.
//!
//! ```no_run
//! let mut vm = cube::Vm::default();
//! let result = vm.interpret("var x = 1 + 2; return x;", "main.cube");
//! assert_eq!(result, Ok(cube::Value::Number(3.0)));
//! ```

pub mod chunk;
pub mod compiler;
pub mod diagnostic;
pub mod dict;
pub mod gc;
pub mod lexer;
pub mod object;
pub mod table;
pub mod value;
pub mod vm;

pub use compiler::{CompileError, compile};
pub use gc::GcConfig;
pub use value::Value;
pub use vm::{InterpretError, RuntimeError, Vm, VmConfig};
