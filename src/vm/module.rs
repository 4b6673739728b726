//! `import` and `require`: loading other script files as packages.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::task::{CallFrame, FrameKind};
use super::{Vm, VmError, VmResult};
use crate::compiler;
use crate::gc::ObjRef;
use crate::object::{Obj, ObjClosure, ObjPackage};
use crate::table::Table;
use crate::value::Value;

const EXTENSION: &str = ".cube";

/// `dir/mod.cube` is the package `mod`.
fn display_name(path: &str) -> &str {
    Path::new(path).file_stem().and_then(|s| s.to_str()).unwrap_or(path)
}

impl Vm {
    /// Stack: path, alias or `none`. Runs the file in a package frame and
    /// binds the package under the alias, or the file name without one.
    /// `as default` runs the file in the current package instead.
    pub(crate) fn import(&mut self) -> VmResult {
        let alias = self.pop();
        let path = self.pop();
        let Some(path) = self.heap.as_str(path).map(str::to_string) else {
            return Err(VmError::Type("Import path must be a string."));
        };
        let name = match self.heap.as_str(alias) {
            Some("default") => None,
            Some(alias) => Some(alias.to_string()),
            None => Some(display_name(&path).to_string()),
        };

        let (source, resolved) = self.load_source(&path)?;
        let current = self.task.frame().package;
        let package = match name {
            Some(name) => {
                let package = self.new_package(&name, current);
                let key = self.heap.intern(&name);
                let key = self.heap.key(key);
                match current {
                    Some(p) => {
                        self.heap.package_mut(p).symbols.set(key, Value::Obj(package));
                    }
                    None => {
                        self.globals.set(key, Value::Obj(package));
                    }
                }
                Some(package)
            }
            None => current,
        };
        self.push_package_frame(&source, &resolved, package, false)
    }

    /// Stack: path. Runs the file in a fresh package and leaves the package
    /// as the expression value.
    pub(crate) fn require(&mut self) -> VmResult {
        let path = self.pop();
        let Some(path) = self.heap.as_str(path).map(str::to_string) else {
            return Err(VmError::Type("Require argument must be a string."));
        };
        let path = if path.ends_with(EXTENSION) { path } else { format!("{path}{EXTENSION}") };

        let (source, resolved) = self.load_source(&path)?;
        let current = self.task.frame().package;
        let package = self.new_package(display_name(&path), current);
        self.push_package_frame(&source, &resolved, Some(package), true)
    }

    pub(crate) fn new_package(&mut self, name: &str, parent: Option<ObjRef>) -> ObjRef {
        let name = self.heap.intern(name);
        self.heap.alloc(Obj::Package(ObjPackage { name, symbols: Table::new(), parent }))
    }

    /// Reads `path` as given, then relative to each search directory.
    fn load_source(&self, path: &str) -> VmResult<(String, PathBuf)> {
        let candidates =
            std::iter::once(PathBuf::from(path)).chain(self.config.search_paths.iter().map(|dir| dir.join(path)));
        for candidate in candidates {
            if let Ok(source) = std::fs::read_to_string(&candidate) {
                return Ok((source, candidate));
            }
        }
        Err(VmError::Message(format!("Could not load the file \"{path}\".")))
    }

    fn push_package_frame(
        &mut self,
        source: &str,
        path: &Path,
        package: Option<ObjRef>,
        require: bool,
    ) -> VmResult {
        if self.task.frames.len() >= self.config.frames_max {
            return Err(VmError::StackOverflow);
        }
        let function =
            compiler::compile(&mut self.heap, source, &path.to_string_lossy()).map_err(VmError::Compile)?;
        let chunk = Rc::clone(&self.heap.function(function).chunk);
        let closure = self.heap.alloc(Obj::Closure(ObjClosure { function, upvalues: Vec::new(), package }));
        self.push(Value::Obj(closure));
        self.task.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base: self.task.stack.len() - 1,
            package,
            kind: FrameKind::Package { require },
            args: Vec::new(),
        });
        Ok(())
    }
}
