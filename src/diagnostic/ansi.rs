use std::io::IsTerminal;

use super::Diagnostic;
use crate::lexer::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    /// Colors when stderr is a terminal and `NO_COLOR` is unset.
    pub fn for_stderr() -> Self {
        AnsiRenderer { use_color: std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal() }
    }

    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "compile error: message"
        let label = self.bold_red(&format!("{} error", d.phase.as_str()));
        let message = if d.location.is_empty() { d.message.clone() } else { format!("{} ({})", d.message, d.location) };
        out.push_str(&format!("{}: {}\n", label, self.bold(&message)));

        if let Some(line) = d.line {
            let path = d.path.as_deref().unwrap_or("<input>");
            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), path, line));

            if let Some(source) = &d.source {
                let text = SourceMap::new(source).line_text(source, line as usize);
                let gutter = line.to_string().len();
                let pipe = self.cyan("|");
                let pad = " ".repeat(gutter);
                let number = self.cyan(&format!("{line:>gutter$}"));
                out.push_str(&format!("{pad} {pipe}\n"));
                out.push_str(&format!("{number} {pipe} {text}\n"));
                out.push_str(&format!("{pad} {pipe}\n"));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} {}\n", self.dim("="), note));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Phase;

    fn make_diag() -> Diagnostic {
        Diagnostic::new(Phase::Runtime, "Undefined variable 'y'.")
            .with_line(2)
            .with_path("main.cube")
            .with_source("var x = 1\nreturn y")
            .with_note("[line 2] in main.cube: Undefined variable 'y'.")
    }

    #[test]
    fn render_contains_phase_and_message() {
        let out = AnsiRenderer { use_color: false }.render(&make_diag());
        assert!(out.starts_with("runtime error: Undefined variable 'y'."), "{out}");
    }

    #[test]
    fn render_contains_location_and_source_line() {
        let out = AnsiRenderer { use_color: false }.render(&make_diag());
        assert!(out.contains("--> main.cube:2"), "{out}");
        assert!(out.contains("2 | return y"), "{out}");
    }

    #[test]
    fn render_contains_notes() {
        let out = AnsiRenderer { use_color: false }.render(&make_diag());
        assert!(out.contains("= [line 2] in main.cube"), "{out}");
    }

    #[test]
    fn render_compile_location() {
        let mut d = Diagnostic::new(Phase::Compile, "Expect expression.").with_line(1);
        d.location = "at end".into();
        let out = AnsiRenderer { use_color: false }.render(&d);
        assert!(out.contains("compile error: Expect expression. (at end)"), "{out}");
        assert!(out.contains("<input>:1"), "{out}");
    }

    #[test]
    fn render_without_line_has_no_pointer() {
        let out = AnsiRenderer { use_color: false }.render(&Diagnostic::new(Phase::Runtime, "bad"));
        assert!(!out.contains("-->"));
    }

    #[test]
    fn color_toggles_escape_codes() {
        let d = make_diag();
        assert!(AnsiRenderer { use_color: true }.render(&d).contains("\x1b["));
        assert!(!AnsiRenderer { use_color: false }.render(&d).contains("\x1b["));
    }
}
