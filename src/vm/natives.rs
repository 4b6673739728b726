//! Built-in functions and the methods of lists, dicts and strings.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use super::Vm;
use crate::dict::Dict;
use crate::gc::ObjRef;
use crate::object::{NativeFn, Obj};
use crate::value::{self, Value, MAX_DEPTH};

type NativeResult = Result<Value, String>;

const GLOBALS: &[(&str, NativeFn)] = &[
    ("print", print),
    ("println", println),
    ("len", len),
    ("type", type_of),
    ("str", to_str),
    ("num", to_num),
    ("int", to_int),
    ("bool", to_bool),
    ("clock", clock),
    ("time", time),
    ("wait", wait),
    ("throw", throw),
    ("gc", gc),
    ("memory", memory),
    ("rand", rand),
    ("floor", floor),
    ("ceil", ceil),
    ("round", round),
    ("sqrt", sqrt),
    ("abs", abs),
];

pub(crate) fn install(vm: &mut Vm) {
    for (name, function) in GLOBALS {
        vm.define_native(name, *function);
    }
}

// ── Argument helpers ────────────────────────────────────────────────

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or_default()
}

fn number(vm: &Vm, args: &[Value], i: usize, function: &str) -> Result<f64, String> {
    vm.numeric(arg(args, i)).ok_or_else(|| format!("{function}() expects a number."))
}

fn string(vm: &Vm, args: &[Value], i: usize, function: &str) -> Result<String, String> {
    vm.heap.as_str(arg(args, i)).map(str::to_string).ok_or_else(|| format!("{function}() expects a string."))
}

/// What `print` and string concatenation show: strings without quotes.
fn display(vm: &Vm, value: Value) -> String {
    match vm.heap.as_str(value) {
        Some(s) => s.to_string(),
        None => value::format(&vm.heap, value, false),
    }
}

fn joined(vm: &Vm, args: &[Value]) -> String {
    args.iter().map(|v| display(vm, *v)).collect()
}

// ── Globals ─────────────────────────────────────────────────────────

fn print(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let text = joined(vm, args);
    let mut out = std::io::stdout().lock();
    write!(out, "{text}").and_then(|_| out.flush()).map_err(|e| e.to_string())?;
    Ok(Value::None)
}

fn println(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let text = joined(vm, args);
    let mut out = std::io::stdout().lock();
    writeln!(out, "{text}").and_then(|_| out.flush()).map_err(|e| e.to_string())?;
    Ok(Value::None)
}

fn len(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let Value::Obj(r) = arg(args, 0) else {
        return Err("len() expects a list, dict or string.".into());
    };
    let n = match vm.heap.get(r) {
        Obj::List(items) => items.len(),
        Obj::Dict(dict) => dict.len(),
        Obj::String(s) => s.chars.chars().count(),
        _ => return Err("len() expects a list, dict or string.".into()),
    };
    Ok(Value::Number(n as f64))
}

fn type_of(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let name = value::type_name(&vm.heap, arg(args, 0));
    Ok(vm.heap.intern_value(name))
}

fn to_str(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let text = display(vm, arg(args, 0));
    Ok(vm.heap.intern_value(&text))
}

fn to_num(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let value = arg(args, 0);
    if let Some(n) = vm.numeric(value) {
        return Ok(Value::Number(n));
    }
    match value {
        Value::Bool(b) => Ok(Value::Number(if b { 1.0 } else { 0.0 })),
        _ => {
            let text = display(vm, value);
            text.trim().parse::<f64>().map(Value::Number).map_err(|_| format!("Cannot convert '{text}' to a number."))
        }
    }
}

fn to_int(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match to_num(vm, args)? {
        Value::Number(n) => Ok(Value::Number(n.trunc())),
        other => Ok(other),
    }
}

fn to_bool(_vm: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(!arg(args, 0).is_falsey()))
}

fn clock(vm: &mut Vm, _args: &[Value]) -> NativeResult {
    Ok(Value::Number(vm.started.elapsed().as_secs_f64()))
}

fn time(_vm: &mut Vm, _args: &[Value]) -> NativeResult {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|e| e.to_string())?;
    Ok(Value::Number(now.as_secs_f64()))
}

/// Suspends the calling task; the scheduler swaps the result for the
/// elapsed seconds when it wakes.
fn wait(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let seconds = number(vm, args, 0, "wait")?;
    vm.sleep_current(seconds);
    Ok(Value::Number(0.0))
}

fn throw(vm: &mut Vm, args: &[Value]) -> NativeResult {
    Err(joined(vm, args))
}

fn gc(vm: &mut Vm, _args: &[Value]) -> NativeResult {
    Ok(Value::Number(vm.collect_garbage() as f64))
}

fn memory(vm: &mut Vm, _args: &[Value]) -> NativeResult {
    Ok(Value::Number(vm.bytes_allocated() as f64))
}

/// `rand()` is a float in [0, 1), `rand(n)` an integer in [0, n) and
/// `rand(a, b)` an integer in [a, b].
fn rand(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match args.len() {
        0 => Ok(Value::Number(fastrand::f64())),
        1 => {
            let n = number(vm, args, 0, "rand")? as i64;
            if n <= 0 {
                return Err("rand() bound must be positive.".into());
            }
            Ok(Value::Number(fastrand::i64(0..n) as f64))
        }
        _ => {
            let (a, b) = (number(vm, args, 0, "rand")? as i64, number(vm, args, 1, "rand")? as i64);
            if a > b {
                return Err("rand() range is empty.".into());
            }
            Ok(Value::Number(fastrand::i64(a..=b) as f64))
        }
    }
}

fn floor(vm: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Number(number(vm, args, 0, "floor")?.floor()))
}

fn ceil(vm: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Number(number(vm, args, 0, "ceil")?.ceil()))
}

fn round(vm: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Number(number(vm, args, 0, "round")?.round()))
}

fn sqrt(vm: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Number(number(vm, args, 0, "sqrt")?.sqrt()))
}

fn abs(vm: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Number(number(vm, args, 0, "abs")?.abs()))
}

// ── Methods ─────────────────────────────────────────────────────────

/// Runs a built-in method of a list, dict or string. `None` when the
/// receiver has no built-in methods at all.
pub(crate) fn call_method(vm: &mut Vm, receiver: ObjRef, name: &str, args: &[Value]) -> Option<NativeResult> {
    match vm.heap.get(receiver) {
        Obj::List(_) => Some(list_method(vm, receiver, name, args)),
        Obj::Dict(_) => Some(dict_method(vm, receiver, name, args)),
        Obj::String(_) => Some(string_method(vm, receiver, name, args)),
        _ => None,
    }
}

/// Copies lists and dicts all the way down. Containers nested deeper than
/// [`MAX_DEPTH`] are shared with the original.
fn deep_copy(vm: &mut Vm, value: Value, depth: usize) -> Value {
    let Value::Obj(r) = value else { return value };
    if depth > MAX_DEPTH {
        return value;
    }
    match vm.heap.get(r) {
        Obj::List(items) => {
            let items = items.clone();
            let copied = items.into_iter().map(|v| deep_copy(vm, v, depth + 1)).collect();
            vm.heap.alloc_list(copied)
        }
        Obj::Dict(dict) => {
            let entries: Vec<(String, Value)> = dict.iter().map(|(k, v)| (k.to_string(), v)).collect();
            let mut copy = Dict::new();
            for (key, v) in entries {
                let v = deep_copy(vm, v, depth + 1);
                copy.insert(&key, v);
            }
            vm.heap.alloc_dict(copy)
        }
        _ => value,
    }
}

fn list_method(vm: &mut Vm, list: ObjRef, name: &str, args: &[Value]) -> NativeResult {
    let len = vm.heap.list(list).len();
    let index = |vm: &Vm, i: usize, allow_end: bool| -> Result<usize, String> {
        let n = number(vm, args, i, name)? as i64;
        let n = if n < 0 { n + len as i64 } else { n };
        let limit = if allow_end { len as i64 } else { len as i64 - 1 };
        if n < 0 || n > limit {
            return Err("List index out of bounds.".into());
        }
        Ok(n as usize)
    };

    match name {
        "push" | "add" => {
            vm.heap.list_mut(list).extend_from_slice(args);
            Ok(Value::Obj(list))
        }
        "pop" => vm.heap.list_mut(list).pop().ok_or_else(|| "pop() called on an empty list.".to_string()),
        "insert" => {
            let at = index(vm, 0, true)?;
            vm.heap.list_mut(list).insert(at, arg(args, 1));
            Ok(Value::Obj(list))
        }
        "remove" => {
            let at = index(vm, 0, false)?;
            Ok(vm.heap.list_mut(list).remove(at))
        }
        "contains" => {
            let needle = arg(args, 0);
            Ok(Value::Bool(vm.heap.list(list).iter().any(|v| value::equal(&vm.heap, *v, needle))))
        }
        "index" => {
            let needle = arg(args, 0);
            let found = vm.heap.list(list).iter().position(|v| value::equal(&vm.heap, *v, needle));
            Ok(Value::Number(found.map_or(-1.0, |i| i as f64)))
        }
        "copy" => {
            let items = vm.heap.list(list).clone();
            Ok(vm.heap.alloc_list(items))
        }
        "deepCopy" => Ok(deep_copy(vm, Value::Obj(list), 0)),
        "join" => {
            let separator = match arg(args, 0) {
                Value::None => String::new(),
                _ => string(vm, args, 0, "join")?,
            };
            let text = vm.heap.list(list).iter().map(|v| display(vm, *v)).collect::<Vec<_>>().join(&separator);
            Ok(vm.heap.intern_value(&text))
        }
        "swap" => {
            let (a, b) = (index(vm, 0, false)?, index(vm, 1, false)?);
            vm.heap.list_mut(list).swap(a, b);
            Ok(Value::Obj(list))
        }
        "clear" => {
            vm.heap.list_mut(list).clear();
            Ok(Value::Obj(list))
        }
        _ => Err(format!("List has no method {name}().")),
    }
}

fn dict_method(vm: &mut Vm, dict: ObjRef, name: &str, args: &[Value]) -> NativeResult {
    match name {
        "get" => {
            let key = string(vm, args, 0, "get")?;
            Ok(vm.heap.dict(dict).get(&key).unwrap_or(arg(args, 1)))
        }
        "keys" => {
            let keys: Vec<String> = vm.heap.dict(dict).keys().map(str::to_string).collect();
            let keys = keys.iter().map(|k| vm.heap.intern_value(k)).collect();
            Ok(vm.heap.alloc_list(keys))
        }
        "values" => {
            let values = vm.heap.dict(dict).values().collect();
            Ok(vm.heap.alloc_list(values))
        }
        "remove" => {
            let key = string(vm, args, 0, "remove")?;
            Ok(vm.heap.dict_mut(dict).remove(&key).unwrap_or_default())
        }
        "exists" => {
            let key = string(vm, args, 0, "exists")?;
            Ok(Value::Bool(vm.heap.dict(dict).contains(&key)))
        }
        "copy" => {
            let copy = vm.heap.dict(dict).clone();
            Ok(vm.heap.alloc_dict(copy))
        }
        "deepCopy" => Ok(deep_copy(vm, Value::Obj(dict), 0)),
        _ => Err(format!("Dict has no method {name}().")),
    }
}

fn string_method(vm: &mut Vm, receiver: ObjRef, name: &str, args: &[Value]) -> NativeResult {
    let s = vm.heap.str(receiver).to_string();
    let result = match name {
        "upper" => s.to_uppercase(),
        "lower" => s.to_lowercase(),
        "trim" => s.trim().to_string(),
        "replace" => {
            let (from, to) = (string(vm, args, 0, "replace")?, string(vm, args, 1, "replace")?);
            s.replace(&from, &to)
        }
        "split" => {
            let parts: Vec<String> = match arg(args, 0) {
                Value::None => s.split_whitespace().map(str::to_string).collect(),
                _ => {
                    let separator = string(vm, args, 0, "split")?;
                    if separator.is_empty() {
                        s.chars().map(String::from).collect()
                    } else {
                        s.split(separator.as_str()).map(str::to_string).collect()
                    }
                }
            };
            let items = parts.iter().map(|p| vm.heap.intern_value(p)).collect();
            return Ok(vm.heap.alloc_list(items));
        }
        "contains" => return Ok(Value::Bool(s.contains(string(vm, args, 0, "contains")?.as_str()))),
        "startsWith" => return Ok(Value::Bool(s.starts_with(string(vm, args, 0, "startsWith")?.as_str()))),
        "endsWith" => return Ok(Value::Bool(s.ends_with(string(vm, args, 0, "endsWith")?.as_str()))),
        "find" => {
            let needle = string(vm, args, 0, "find")?;
            let found = s.find(&needle).map(|byte| s[..byte].chars().count());
            return Ok(Value::Number(found.map_or(-1.0, |i| i as f64)));
        }
        _ => return Err(format!("String has no method {name}().")),
    };
    Ok(vm.heap.intern_value(&result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show(source: &str) -> String {
        let mut vm = Vm::default();
        match vm.interpret(source, "test") {
            Ok(v) => vm.format_value(v),
            Err(e) => panic!("{e}"),
        }
    }

    fn fails(source: &str) -> String {
        let mut vm = Vm::default();
        match vm.interpret(source, "test") {
            Err(super::super::InterpretError::Runtime(e)) => e.message,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn list_methods() {
        assert_eq!(show("var l = [1, 2]\nl.push(3)\nreturn [l.pop(), l, l.contains(2), l.index(9)]"), "[3, [1, 2], true, -1]");
        assert_eq!(show("var l = [1, 2, 3]\nl.insert(0, 0)\nl.remove(-1)\nl.swap(0, 1)\nreturn l"), "[1, 0, 2]");
        assert_eq!(show("return [1, 'a', true].join('-')"), "1-a-true");
    }

    #[test]
    fn pop_on_empty_list_is_an_error() {
        assert_eq!(fails("var l = []\nl.pop()"), "pop() called on an empty list.");
    }

    #[test]
    fn deep_copy_is_independent() {
        let src = "var a = [[1], {\"k\": [2]}]\nvar b = a.deepCopy()\nb[0].push(9)\nvar c = a.copy()\nc[0].push(8)\nreturn [a, b]";
        assert_eq!(show(src), "[[[1, 8], {\"k\": [2]}], [[1, 9], {\"k\": [2]}]]");
    }

    #[test]
    fn self_containing_lists_copy_and_compare_without_overflow() {
        let src = "var a = [1]\na.push(a)\nvar b = [1]\nb.push(b)\nvar c = a.deepCopy()\nreturn [a == b, a == a, len(c), c[0]]";
        assert_eq!(show(src), "[false, true, 2, 1]");
    }

    #[test]
    fn dict_methods() {
        let src = "var d = {\"a\": 1, \"b\": 2}\nd.remove(\"a\")\nreturn [d.keys(), d.values(), d.exists(\"a\"), d.get(\"z\", 0)]";
        assert_eq!(show(src), "[['b'], [2], false, 0]");
    }

    #[test]
    fn string_methods() {
        assert_eq!(show("return ' Hi There '.trim().lower().split(' ')"), "['hi', 'there']");
        assert_eq!(show("return ['abc'.find('c'), 'abc'.startsWith('ab'), 'a-b'.replace('-', '+')]"), "[2, true, 'a+b']");
    }

    #[test]
    fn unknown_method_names_the_type() {
        assert_eq!(fails("'x'.nope()"), "String has no method nope().");
    }

    #[test]
    fn conversions() {
        assert_eq!(show("return [num('4.5'), int(4.5), str(12) + '!', bool(0), type([])]"), "[4.5, 4, '12!', true, 'list']");
        assert_eq!(fails("num('x')"), "Cannot convert 'x' to a number.");
    }

    #[test]
    fn rand_stays_in_range() {
        let mut vm = Vm::default();
        for _ in 0..50 {
            let v = vm.interpret("return rand(3, 5)", "test").unwrap().as_number().unwrap();
            assert!((3.0..=5.0).contains(&v) && v.fract() == 0.0, "{v}");
        }
    }
}
