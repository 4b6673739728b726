//! Operators: arithmetic, comparison, ranges, membership and subscripts.

use super::{Vm, VmError, VmResult};
use crate::chunk::*;
use crate::gc::ObjRef;
use crate::object::Obj;
use crate::value::{self, Value};

/// Method name an instance defines to overload `op`.
fn operator_symbol(op: u8) -> &'static str {
    match op {
        OP_ADD => "+",
        OP_SUBTRACT => "-",
        OP_MULTIPLY => "*",
        OP_DIVIDE => "/",
        OP_MOD => "%",
        _ => "^",
    }
}

fn apply(op: u8, a: f64, b: f64) -> f64 {
    match op {
        OP_ADD => a + b,
        OP_SUBTRACT => a - b,
        OP_MULTIPLY => a * b,
        OP_DIVIDE => a / b,
        OP_MOD => a % b,
        _ => a.powf(b),
    }
}

/// Resolves a possibly negative index against `len`.
fn index_in(index: f64, len: usize) -> Option<usize> {
    let i = index as i64;
    let i = if i < 0 { i + len as i64 } else { i };
    (0..len as i64).contains(&i).then_some(i as usize)
}

/// A range endpoint: a number or a one-character string.
#[derive(Clone, Copy, PartialEq)]
enum Step {
    Number(f64),
    Char(u32),
}

impl Step {
    fn code(self) -> f64 {
        match self {
            Step::Number(n) => n,
            Step::Char(c) => c as f64,
        }
    }
}

impl Vm {
    /// A number, or the number an enum value carries.
    pub(crate) fn numeric(&self, value: Value) -> Option<f64> {
        match value {
            Value::Number(n) => Some(n),
            Value::Obj(r) => match self.heap.get(r) {
                Obj::EnumValue(e) => e.value.as_number(),
                _ => None,
            },
            _ => None,
        }
    }

    fn list_items(&self, value: Value) -> Option<&[Value]> {
        match value {
            Value::Obj(r) => match self.heap.get(r) {
                Obj::List(items) => Some(items),
                _ => None,
            },
            _ => None,
        }
    }

    /// Joins the top `count` values into one string.
    pub(crate) fn concat_pieces(&mut self, count: usize) {
        let first = self.task.stack.len() - count;
        let text: String = self.task.stack[first..]
            .iter()
            .map(|v| match self.heap.as_str(*v) {
                Some(s) => s.to_string(),
                None => value::format(&self.heap, *v, false),
            })
            .collect();
        self.task.stack.truncate(first);
        let value = self.heap.intern_value(&text);
        self.push(value);
    }

    // ── Arithmetic ──────────────────────────────────────────────────

    pub(crate) fn arithmetic(&mut self, op: u8, elementwise: bool) -> VmResult {
        if elementwise {
            return self.elementwise(op);
        }
        let (a, b) = (self.peek(1), self.peek(0));
        if let (Some(x), Some(y)) = (self.numeric(a), self.numeric(b)) {
            self.task.stack.truncate(self.task.stack.len() - 2);
            self.push(Value::Number(apply(op, x, y)));
            return Ok(());
        }

        if op == OP_ADD {
            if self.heap.is_string(a) || self.heap.is_string(b) {
                let text = format!("{}{}", self.display(a), self.display(b));
                self.task.stack.truncate(self.task.stack.len() - 2);
                let value = self.heap.intern_value(&text);
                self.push(value);
                return Ok(());
            }
            if let (Some(l), Some(r)) = (self.list_items(a), self.list_items(b)) {
                let items = [l, r].concat();
                self.task.stack.truncate(self.task.stack.len() - 2);
                let list = self.heap.alloc_list(items);
                self.push(list);
                return Ok(());
            }
        }

        if let Some(method) = self.operator_method(a, operator_symbol(op)) {
            return self.call_closure(method, 1);
        }
        Err(VmError::Type(if op == OP_ADD {
            "Operands must be two numbers or two strings."
        } else {
            "Operands must be numbers."
        }))
    }

    /// `.+` and friends: pairwise over two lists of equal length, or each
    /// element against a scalar.
    fn elementwise(&mut self, op: u8) -> VmResult {
        let (a, b) = (self.peek(1), self.peek(0));
        let number = |vm: &Vm, v: Value| vm.numeric(v).ok_or(VmError::Type("Operands must be numbers."));

        let items = match (self.list_items(a), self.list_items(b)) {
            (Some(l), Some(r)) => {
                if l.len() != r.len() {
                    return Err(VmError::Type("Lists must have the same length."));
                }
                l.iter()
                    .zip(r)
                    .map(|(x, y)| Ok(Value::Number(apply(op, number(self, *x)?, number(self, *y)?))))
                    .collect::<VmResult<Vec<_>>>()?
            }
            (Some(l), None) => {
                let y = number(self, b)?;
                l.iter().map(|x| Ok(Value::Number(apply(op, number(self, *x)?, y)))).collect::<VmResult<Vec<_>>>()?
            }
            (None, Some(r)) => {
                let x = number(self, a)?;
                r.iter().map(|y| Ok(Value::Number(apply(op, x, number(self, *y)?)))).collect::<VmResult<Vec<_>>>()?
            }
            (None, None) => return Err(VmError::Type("Element-wise operators need a list operand.")),
        };
        self.task.stack.truncate(self.task.stack.len() - 2);
        let list = self.heap.alloc_list(items);
        self.push(list);
        Ok(())
    }

    fn display(&self, value: Value) -> String {
        match self.heap.as_str(value) {
            Some(s) => s.to_string(),
            None => value::format(&self.heap, value, false),
        }
    }

    pub(crate) fn compare(&mut self, op: u8) -> VmResult {
        let (a, b) = (self.peek(1), self.peek(0));
        let result = match (self.numeric(a), self.numeric(b)) {
            (Some(x), Some(y)) => {
                if op == OP_GREATER {
                    x > y
                } else {
                    x < y
                }
            }
            _ => match (self.heap.as_str(a), self.heap.as_str(b)) {
                (Some(x), Some(y)) => {
                    if op == OP_GREATER {
                        x > y
                    } else {
                        x < y
                    }
                }
                _ => return Err(VmError::Type("Operands must be numbers.")),
            },
        };
        self.task.stack.truncate(self.task.stack.len() - 2);
        self.push(Value::Bool(result));
        Ok(())
    }

    pub(crate) fn bitwise(&mut self, op: u8) -> VmResult {
        let (Some(a), Some(b)) = (self.numeric(self.peek(1)), self.numeric(self.peek(0))) else {
            return Err(VmError::Type("Operands must be numbers."));
        };
        let (a, b) = (a as i64, b as i64);
        let result = match op {
            OP_SHIFT_LEFT => a.wrapping_shl(b as u32),
            OP_SHIFT_RIGHT => a.wrapping_shr(b as u32),
            OP_BITWISE_AND => a & b,
            _ => a | b,
        };
        self.task.stack.truncate(self.task.stack.len() - 2);
        self.push(Value::Number(result as f64));
        Ok(())
    }

    pub(crate) fn not(&mut self) -> VmResult {
        let value = self.peek(0);
        if let Some(method) = self.operator_method(value, "!") {
            return self.call_closure(method, 0);
        }
        self.pop();
        self.push(Value::Bool(value.is_falsey()));
        Ok(())
    }

    pub(crate) fn negate(&mut self) -> VmResult {
        let value = self.peek(0);
        if let Some(n) = self.numeric(value) {
            self.pop();
            self.push(Value::Number(-n));
            return Ok(());
        }
        match self.operator_method(value, "-") {
            Some(method) => self.call_closure(method, 0),
            None => Err(VmError::Type("Operand must be a number.")),
        }
    }

    // ── Ranges ──────────────────────────────────────────────────────

    fn range_endpoint(&self, value: Value) -> Option<Step> {
        if let Some(n) = self.numeric(value) {
            return Some(Step::Number(n));
        }
        let s = self.heap.as_str(value)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(Step::Char(c as u32)),
            _ => None,
        }
    }

    /// Stack: start, second, third. `a..b` leaves `none` in the third slot;
    /// `a..step..b` fills all three.
    pub(crate) fn expand(&mut self, exclusive: bool) -> VmResult {
        let third = self.pop();
        let second = self.pop();
        let start = self.pop();
        let (step, stop) = if third.is_none() { (None, second) } else { (Some(second), third) };

        let (Some(start), Some(stop)) = (self.range_endpoint(start), self.range_endpoint(stop)) else {
            return Err(VmError::Type("Can only expand numbers and characters."));
        };
        let step = match step {
            Some(step) => self.numeric(step).ok_or(VmError::Type("Can only expand numbers and characters."))?,
            None if start.code() > stop.code() => -1.0,
            None => 1.0,
        };
        if step == 0.0 {
            return Err(VmError::Type("Range step cannot be zero."));
        }

        let end = stop.code();
        let mut items = Vec::new();
        let mut current = start.code();
        loop {
            let item = match start {
                Step::Number(_) => Value::Number(current),
                Step::Char(_) => match char::from_u32(current as u32) {
                    Some(c) => self.heap.intern_value(c.encode_utf8(&mut [0; 4])),
                    None => break,
                },
            };
            items.push(item);
            current += step;
            let past = match (step > 0.0, exclusive) {
                (true, true) => current >= end,
                (true, false) => current > end,
                (false, true) => current <= end,
                (false, false) => current < end,
            };
            if past {
                break;
            }
        }
        let list = self.heap.alloc_list(items);
        self.push(list);
        Ok(())
    }

    // ── Membership and types ────────────────────────────────────────

    /// Stack: item, container.
    pub(crate) fn contains(&mut self) -> VmResult {
        let container = self.pop();
        let item = self.pop();
        let Value::Obj(r) = container else {
            return Err(VmError::Type("Can only test membership in lists, dicts and strings."));
        };
        let found = match self.heap.get(r) {
            Obj::List(items) => items.iter().any(|v| value::equal(&self.heap, *v, item)),
            Obj::Dict(dict) => self.heap.as_str(item).is_some_and(|k| dict.contains(k)),
            Obj::String(s) => match self.heap.as_str(item) {
                Some(needle) => s.chars.contains(needle),
                None => false,
            },
            _ => return Err(VmError::Type("Can only test membership in lists, dicts and strings.")),
        };
        self.push(Value::Bool(found));
        Ok(())
    }

    /// `value is name`: the runtime type name, a class on the instance's
    /// ancestry, or the enum an enum value belongs to.
    pub(crate) fn is_type(&self, value: Value, name: ObjRef) -> bool {
        let name = self.heap.str(name);
        if value::type_name(&self.heap, value) == name {
            return true;
        }
        let Value::Obj(r) = value else { return false };
        match self.heap.get(r) {
            Obj::Instance(instance) => {
                let mut class = Some(instance.class);
                while let Some(c) = class {
                    let c = self.heap.class(c);
                    if self.heap.str(c.name) == name {
                        return true;
                    }
                    class = c.superclass;
                }
                false
            }
            Obj::EnumValue(v) => self.heap.str(self.heap.enumeration(v.owner).name) == name,
            Obj::Native(_) | Obj::BoundMethod(_) => name == "func",
            _ => false,
        }
    }

    // ── Subscripts ──────────────────────────────────────────────────

    /// Stack: container, index.
    pub(crate) fn subscript(&mut self) -> VmResult {
        let (container, index) = (self.peek(1), self.peek(0));
        let Value::Obj(r) = container else {
            return Err(VmError::Type("Invalid type to index into."));
        };

        let result = match self.heap.get(r) {
            Obj::List(items) => match (self.numeric(index), self.list_items(index)) {
                (Some(i), _) => match index_in(i, items.len()) {
                    Some(i) => items[i],
                    None => return Err(VmError::Type("List index out of bounds.")),
                },
                (None, Some(indices)) => {
                    let picked = indices
                        .iter()
                        .map(|v| {
                            self.numeric(*v)
                                .and_then(|i| index_in(i, items.len()))
                                .map(|i| items[i])
                                .ok_or(VmError::Type("List index out of bounds."))
                        })
                        .collect::<VmResult<Vec<_>>>()?;
                    self.heap.alloc_list(picked)
                }
                _ => return Err(VmError::Type("List index must be a number.")),
            },
            Obj::String(s) => {
                let chars: Vec<char> = s.chars.chars().collect();
                let pick = |v: Value| {
                    self.numeric(v)
                        .and_then(|i| index_in(i, chars.len()))
                        .map(|i| chars[i])
                        .ok_or(VmError::Type("String index out of bounds."))
                };
                let text: String = match self.list_items(index) {
                    Some(indices) => indices.iter().map(|v| pick(*v)).collect::<VmResult<_>>()?,
                    None => pick(index)?.to_string(),
                };
                self.heap.intern_value(&text)
            }
            Obj::Dict(dict) => match (self.heap.as_str(index), self.numeric(index)) {
                (Some(key), _) => dict.get(key).unwrap_or_default(),
                (None, Some(i)) => match dict.key_at(i as usize) {
                    Some(key) => {
                        let key = key.to_string();
                        self.heap.intern_value(&key)
                    }
                    None => return Err(VmError::Type("Dictionary index out of bounds.")),
                },
                _ => return Err(VmError::Type("Dictionary key must be a string.")),
            },
            Obj::Instance(_) => {
                return match self.operator_method(container, "[]") {
                    Some(method) => self.call_closure(method, 1),
                    None => Err(VmError::Type("Invalid type to index into.")),
                };
            }
            _ => return Err(VmError::Type("Invalid type to index into.")),
        };
        self.task.stack.truncate(self.task.stack.len() - 2);
        self.push(result);
        Ok(())
    }

    /// Stack: container, index, value. Leaves the value.
    pub(crate) fn subscript_assign(&mut self) -> VmResult {
        let (container, index, value) = (self.peek(2), self.peek(1), self.peek(0));
        let Value::Obj(r) = container else {
            return Err(VmError::Type("Invalid type to index into."));
        };

        match self.heap.get(r) {
            Obj::List(items) => {
                let len = items.len();
                let Some(i) = self.numeric(index) else {
                    return Err(VmError::Type("List index must be a number."));
                };
                let Some(i) = index_in(i, len) else {
                    return Err(VmError::Type("List index out of bounds."));
                };
                self.heap.list_mut(r)[i] = value;
            }
            Obj::Dict(_) => {
                let Some(key) = self.heap.as_str(index).map(str::to_string) else {
                    return Err(VmError::Type("Dictionary key must be a string."));
                };
                self.heap.dict_mut(r).insert(&key, value);
            }
            Obj::Instance(_) => {
                return match self.operator_method(container, "[=]") {
                    Some(method) => self.call_closure(method, 2),
                    None => Err(VmError::Type("Invalid type to index into.")),
                };
            }
            Obj::String(_) => return Err(VmError::Type("Strings are immutable.")),
            _ => return Err(VmError::Type("Invalid type to index into.")),
        }
        self.task.stack.truncate(self.task.stack.len() - 3);
        self.push(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::{InterpretError, Vm};

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
            Err(InterpretError::Runtime(e)) => e.message,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn elementwise_operators() {
        assert_eq!(show("return [1, 2, 3] .+ [10, 20, 30]"), "[11, 22, 33]");
        assert_eq!(show("return [1, 2] .* 3"), "[3, 6]");
        assert_eq!(show("return 2 .^ [1, 3]"), "[2, 8]");
        assert_eq!(fails("return [1] .+ [1, 2]"), "Lists must have the same length.");
    }

    #[test]
    fn plus_concatenates_strings_and_lists() {
        assert_eq!(show("return 'n' + 1"), "n1");
        assert_eq!(show("return [1] + [2, 3]"), "[1, 2, 3]");
        assert_eq!(fails("return true + 1"), "Operands must be two numbers or two strings.");
        assert_eq!(fails("return [] - 1"), "Operands must be numbers.");
    }

    #[test]
    fn comparisons_and_bits() {
        assert_eq!(show("return ['abc' < 'abd', 'b' >= 'a', 3 <= 2, 1 << 4, 6 & 3, 6 | 3, -16 >> 2]"), "[true, true, false, 16, 2, 7, -4]");
    }

    #[test]
    fn membership() {
        assert_eq!(show("return [2 in [1, 2], 'k' in {\"k\": 1}, 'ell' in 'hello', 5 in []]"), "[true, true, true, false]");
    }

    #[test]
    fn subscripts() {
        assert_eq!(show("var l = [1, 2, 3, 4]\nreturn [l[-1], l[[0, 2]], 'hello'[1], 'hello'[[0, -1]]]"), "[4, [1, 3], 'e', 'ho']");
        assert_eq!(show("var d = {\"a\": 1}\nd[\"b\"] = 2\nreturn [d[\"b\"], d[1], d[\"zz\"]]"), "[2, 'b', null]");
        assert_eq!(show("var l = [1, 2]\nl[-1] = 9\nreturn l"), "[1, 9]");
        assert_eq!(fails("var s = 'abc'\ns[0] = 'x'"), "Strings are immutable.");
        assert_eq!(fails("return 4[0]"), "Invalid type to index into.");
    }

    #[test]
    fn subscript_assign_overload() {
        let src = "class Box { var items; func init() { this.items = {} } func [=](k, v) { this.items[k] = v * 2 } }\n\
                   var b = Box()\nb['x'] = 4\nreturn b.items";
        assert_eq!(show(src), "{\"x\": 8}");
    }

    #[test]
    fn zero_step_range_is_an_error() {
        assert_eq!(fails("return 1..0..5"), "Range step cannot be zero.");
        assert_eq!(show("return [3...3, 'c'..'a']"), "[[3], ['c', 'b', 'a']]");
    }

    #[test]
    fn enum_values_act_as_numbers() {
        assert_eq!(show("enum Level { Low = 1, High }\nreturn [Level.High + 1, Level.Low == 1, Level.High is Level]"), "[3, true, true]");
    }
}
