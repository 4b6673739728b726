//! Human and machine renderings of compile and runtime errors.

pub mod ansi;
pub mod json;

use serde::Serialize;

use crate::compiler::CompileError;
use crate::vm::{InterpretError, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Compile,
    Runtime,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Compile => "compile",
            Phase::Runtime => "runtime",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub phase: Phase,
    pub message: String,
    /// 1-based line the error points at, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// `at 'lexeme'` style context for compile errors.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub notes: Vec<String>,
    #[serde(skip)]
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Diagnostic {
            phase,
            message: message.into(),
            line: None,
            location: String::new(),
            path: None,
            notes: Vec::new(),
            source: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let mut d = Diagnostic::new(Phase::Compile, &e.message).with_line(e.line);
        d.location = e.location.trim().to_string();
        d
    }
}

/// The line comes from the innermost trace entry; every trace line becomes
/// a note.
impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let mut d = Diagnostic::new(Phase::Runtime, &e.message);
        d.line = e.trace.first().and_then(|l| trace_line(l));
        d.notes = e.trace.clone();
        d
    }
}

fn trace_line(entry: &str) -> Option<u32> {
    let rest = entry.strip_prefix("[line ")?;
    rest.split(']').next()?.parse().ok()
}

/// One diagnostic per compile error, or one for a runtime error.
pub fn from_interpret_error(e: &InterpretError) -> Vec<Diagnostic> {
    match e {
        InterpretError::Compile(errors) => errors.iter().map(Diagnostic::from).collect(),
        InterpretError::Runtime(error) => vec![Diagnostic::from(error)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_compile_error() {
        let e = CompileError { line: 3, location: " at 'var'".into(), message: "Expect variable name.".into() };
        let d = Diagnostic::from(&e);
        assert_eq!(d.phase, Phase::Compile);
        assert_eq!(d.line, Some(3));
        assert_eq!(d.location, "at 'var'");
        assert_eq!(d.message, "Expect variable name.");
    }

    #[test]
    fn from_runtime_error_reads_innermost_line() {
        let e = RuntimeError {
            message: "boom".into(),
            trace: vec!["[line 7] in f(): boom".into(), "[line 9] in main.cube: boom".into(), "Task[default]".into()],
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.phase, Phase::Runtime);
        assert_eq!(d.line, Some(7));
        assert_eq!(d.notes.len(), 3);
    }

    #[test]
    fn trace_without_line_prefix() {
        assert_eq!(trace_line("Task[default]"), None);
        assert_eq!(trace_line("[line 12] in x: y"), Some(12));
    }

    #[test]
    fn builder_sets_fields() {
        let d = Diagnostic::new(Phase::Runtime, "bad").with_path("a.cube").with_source("x").with_note("n");
        assert_eq!(d.path.as_deref(), Some("a.cube"));
        assert_eq!(d.source.as_deref(), Some("x"));
        assert_eq!(d.notes, vec!["n"]);
    }
}
