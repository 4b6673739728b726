use crate::gc::{Heap, ObjRef};
use crate::object::Obj;

/// A script value. Everything but the object case is stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Number(f64),
    Obj(ObjRef),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Obj(r)
    }
}

impl Value {
    pub fn is_falsey(self) -> bool {
        matches!(self, Value::None | Value::Bool(false))
    }

    pub fn as_number(self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_obj(self) -> Option<ObjRef> {
        match self {
            Value::Obj(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, Value::None)
    }
}

// ── Printing ─────────────────────────────────────────────────────────

/// Formats like C's `%.15g`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    const PRECISION: i32 = 15;
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= PRECISION {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{n:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') { s.trim_end_matches('0').trim_end_matches('.') } else { s }
}

/// How far printing, `==` and `deepCopy` descend into nested lists and
/// dicts. Cyclic containers stop here.
pub(crate) const MAX_DEPTH: usize = 32;

/// Human-readable rendering. `literal` quotes strings, which is how they
/// appear nested inside lists and dicts.
pub fn format(heap: &Heap, value: Value, literal: bool) -> String {
    let mut out = String::new();
    write_value(heap, value, literal, 0, &mut out);
    out
}

fn write_value(heap: &Heap, value: Value, literal: bool, depth: usize, out: &mut String) {
    match value {
        Value::None => out.push_str("null"),
        Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(n)),
        Value::Obj(r) => write_object(heap, r, literal, depth, out),
    }
}

fn write_object(heap: &Heap, r: ObjRef, literal: bool, depth: usize, out: &mut String) {
    if depth > MAX_DEPTH {
        out.push_str("...");
        return;
    }
    match heap.get(r) {
        Obj::String(s) if literal => {
            out.push('\'');
            out.push_str(&s.chars);
            out.push('\'');
        }
        Obj::String(s) => out.push_str(&s.chars),
        Obj::Function(f) => {
            let name = f.name.map(|n| heap.str(n)).unwrap_or("script");
            out.push_str(&format!("<func {name}>"));
        }
        Obj::Closure(c) => write_object(heap, c.function, literal, depth, out),
        Obj::Upvalue(_) => out.push_str("upvalue"),
        Obj::Class(c) => out.push_str(&format!("<class {}>", heap.str(c.name))),
        Obj::Instance(i) => {
            out.push_str(&format!("<{} instance>", heap.str(heap.class(i.class).name)))
        }
        Obj::BoundMethod(b) => {
            let f = heap.function(heap.closure(b.method).function);
            let name = f.name.map(|n| heap.str(n)).unwrap_or("");
            let kind = if f.is_static { "static method" } else { "bound method" };
            out.push_str(&format!("<{kind} {name}>"));
        }
        Obj::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(heap, *item, true, depth + 1, out);
            }
            out.push(']');
        }
        Obj::Dict(d) => {
            out.push('{');
            for (i, (key, item)) in d.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("\"{key}\": "));
                write_value(heap, item, true, depth + 1, out);
            }
            out.push('}');
        }
        Obj::Enum(e) => out.push_str(&format!("<enum {}>", heap.str(e.name))),
        Obj::EnumValue(v) => write_value(heap, v.value, literal, depth + 1, out),
        Obj::Package(p) => out.push_str(&format!("<package {}>", heap.str(p.name))),
        Obj::Native(n) => out.push_str(&format!("<native func {}>", n.name)),
        Obj::Task(t) => out.push_str(&format!("<task {}>", heap.str(t.name))),
    }
}

/// The name `type()` reports and `is` tests against.
pub fn type_name(heap: &Heap, value: Value) -> &'static str {
    match value {
        Value::None => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "num",
        Value::Obj(r) => match heap.get(r) {
            Obj::String(_) => "str",
            Obj::Function(_) | Obj::Closure(_) => "func",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "method",
            Obj::List(_) => "list",
            Obj::Dict(_) => "dict",
            Obj::Enum(_) => "enum",
            Obj::EnumValue(_) => "enumvalue",
            Obj::Package(_) => "package",
            Obj::Native(_) => "native",
            Obj::Task(_) => "task",
        },
    }
}

// ── Equality ─────────────────────────────────────────────────────────

/// Script-level `==`. Strings are interned so handle equality is content
/// equality; lists and dicts compare structurally; enum values compare equal
/// to the number they carry.
/// Containers nested deeper than [`MAX_DEPTH`] compare unequal.
pub fn equal(heap: &Heap, a: Value, b: Value) -> bool {
    equal_at(heap, a, b, 0)
}

fn equal_at(heap: &Heap, a: Value, b: Value, depth: usize) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Number(n), Value::Obj(r)) | (Value::Obj(r), Value::Number(n)) => {
            matches!(heap.get(r), Obj::EnumValue(e) if e.value == Value::Number(n))
        }
        (Value::Obj(x), Value::Obj(y)) if x == y => true,
        (Value::Obj(_), Value::Obj(_)) if depth > MAX_DEPTH => false,
        (Value::Obj(x), Value::Obj(y)) => match (heap.get(x), heap.get(y)) {
            (Obj::List(l), Obj::List(r)) => {
                l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| equal_at(heap, *a, *b, depth + 1))
            }
            (Obj::Dict(l), Obj::Dict(r)) => {
                l.len() == r.len()
                    && l.iter().all(|(k, v)| r.get(k).is_some_and(|o| equal_at(heap, v, o, depth + 1)))
            }
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcConfig;

    #[test]
    fn numbers_print_like_percent_g() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(1e20), "1e+20");
        assert_eq!(format_number(0.00001), "1e-05");
        assert_eq!(format_number(123456789012345.0), "123456789012345");
        assert_eq!(format_number(f64::NAN), "nan");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn falsey_values() {
        assert!(Value::None.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Number(0.0).is_falsey());
        assert!(!Value::Bool(true).is_falsey());
    }

    #[test]
    fn lists_compare_structurally() {
        let mut heap = Heap::new(GcConfig::default());
        let s = heap.intern("x");
        let a = heap.alloc(Obj::List(vec![Value::Number(1.0), Value::Obj(s)]));
        let b = heap.alloc(Obj::List(vec![Value::Number(1.0), Value::Obj(s)]));
        let c = heap.alloc(Obj::List(vec![Value::Number(2.0)]));
        assert!(equal(&heap, Value::Obj(a), Value::Obj(b)));
        assert!(!equal(&heap, Value::Obj(a), Value::Obj(c)));
        assert_eq!(format(&heap, Value::Obj(a), false), "[1, 'x']");
        assert_eq!(type_name(&heap, Value::Obj(a)), "list");
    }
}
