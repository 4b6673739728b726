use super::Diagnostic;

/// One JSON object per diagnostic, on a single line.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = serde_json::to_value(d).unwrap_or_default();
    obj["severity"] = serde_json::Value::from("error");

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Phase;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_basic_error() {
        let v = parse_json(&render(&Diagnostic::new(Phase::Runtime, "Stack overflow.")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["phase"], "runtime");
        assert_eq!(v["message"], "Stack overflow.");
        assert!(v["notes"].as_array().unwrap().is_empty());
        assert!(v.get("line").is_none());
    }

    #[test]
    fn render_compile_fields() {
        let mut d = Diagnostic::new(Phase::Compile, "Expect ')' after parameters.").with_line(4).with_path("a.cube");
        d.location = "at '{'".into();
        let v = parse_json(&render(&d));
        assert_eq!(v["phase"], "compile");
        assert_eq!(v["line"], 4);
        assert_eq!(v["location"], "at '{'");
        assert_eq!(v["path"], "a.cube");
    }

    #[test]
    fn render_escapes_quotes() {
        let d = Diagnostic::new(Phase::Runtime, "Could not load the file \"x.cube\".").with_note("Task[default]");
        let v = parse_json(&render(&d));
        assert_eq!(v["message"], "Could not load the file \"x.cube\".");
        assert_eq!(v["notes"][0], "Task[default]");
    }
}
