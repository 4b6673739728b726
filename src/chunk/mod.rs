use crate::gc::Heap;
use crate::value::{self, Value};

// ── Opcodes ─────────────────────────────────────────────────────────
//
// Operand widths follow each name: u8 for argument counts and flags, u16 for
// constant, slot and jump operands (big-endian).

pub(crate) const OP_CONSTANT: u8 = 0; // u16 const
pub(crate) const OP_NULL: u8 = 1;
pub(crate) const OP_TRUE: u8 = 2;
pub(crate) const OP_FALSE: u8 = 3;
pub(crate) const OP_STRING: u8 = 4; // u16 piece count; concatenates the pieces
pub(crate) const OP_EXPAND: u8 = 5; // u8 exclusive; pops start, step or stop, stop or null
pub(crate) const OP_POP: u8 = 6;
pub(crate) const OP_REPL_POP: u8 = 7;
pub(crate) const OP_GET_LOCAL: u8 = 8; // u16 slot
pub(crate) const OP_SET_LOCAL: u8 = 9; // u16 slot
pub(crate) const OP_GET_GLOBAL: u8 = 10; // u16 name
pub(crate) const OP_DEFINE_GLOBAL: u8 = 11; // u16 name
pub(crate) const OP_DEFINE_GLOBAL_FORCED: u8 = 12; // u16 name
pub(crate) const OP_SET_GLOBAL: u8 = 13; // u16 name
pub(crate) const OP_GET_UPVALUE: u8 = 14; // u16 index
pub(crate) const OP_SET_UPVALUE: u8 = 15; // u16 index
pub(crate) const OP_GET_PROPERTY: u8 = 16; // u16 name
pub(crate) const OP_GET_PROPERTY_NO_POP: u8 = 17; // u16 name
pub(crate) const OP_SET_PROPERTY: u8 = 18; // u16 name
pub(crate) const OP_GET_SUPER: u8 = 19; // u16 name
pub(crate) const OP_EQUAL: u8 = 20;
pub(crate) const OP_GREATER: u8 = 21;
pub(crate) const OP_LESS: u8 = 22;
pub(crate) const OP_ADD: u8 = 23; // u8 elementwise
pub(crate) const OP_SUBTRACT: u8 = 24; // u8 elementwise
pub(crate) const OP_MULTIPLY: u8 = 25; // u8 elementwise
pub(crate) const OP_DIVIDE: u8 = 26; // u8 elementwise
pub(crate) const OP_MOD: u8 = 27; // u8 elementwise
pub(crate) const OP_POW: u8 = 28; // u8 elementwise
pub(crate) const OP_INC: u8 = 29;
pub(crate) const OP_DEC: u8 = 30;
pub(crate) const OP_SHIFT_LEFT: u8 = 31;
pub(crate) const OP_SHIFT_RIGHT: u8 = 32;
pub(crate) const OP_BITWISE_AND: u8 = 33;
pub(crate) const OP_BITWISE_OR: u8 = 34;
pub(crate) const OP_IN: u8 = 35;
pub(crate) const OP_IS: u8 = 36; // u8 negated, u16 type name
pub(crate) const OP_NOT: u8 = 37;
pub(crate) const OP_NEGATE: u8 = 38;
pub(crate) const OP_JUMP: u8 = 39; // u16 forward
pub(crate) const OP_JUMP_IF_FALSE: u8 = 40; // u16 forward
pub(crate) const OP_LOOP: u8 = 41; // u16 backward
pub(crate) const OP_DUP: u8 = 42;
pub(crate) const OP_IMPORT: u8 = 43;
pub(crate) const OP_REQUIRE: u8 = 44;
pub(crate) const OP_NEW_LIST: u8 = 45;
pub(crate) const OP_ADD_LIST: u8 = 46;
pub(crate) const OP_NEW_DICT: u8 = 47;
pub(crate) const OP_ADD_DICT: u8 = 48;
pub(crate) const OP_SUBSCRIPT: u8 = 49;
pub(crate) const OP_SUBSCRIPT_ASSIGN: u8 = 50;
pub(crate) const OP_CALL: u8 = 51; // u8 argc
pub(crate) const OP_INVOKE: u8 = 52; // u8 argc, u16 name
pub(crate) const OP_SUPER: u8 = 53; // u8 argc, u16 name
pub(crate) const OP_CLOSURE: u8 = 54; // u16 function, then (u8 is_local, u16 index) per upvalue
pub(crate) const OP_CLOSE_UPVALUE: u8 = 55;
pub(crate) const OP_RETURN: u8 = 56;
pub(crate) const OP_CLASS: u8 = 57; // u16 name
pub(crate) const OP_INHERIT: u8 = 58;
pub(crate) const OP_METHOD: u8 = 59; // u16 name
pub(crate) const OP_PROPERTY: u8 = 60; // u16 name, u8 static; pops value
pub(crate) const OP_EXTENSION: u8 = 61; // u16 type name, u16 method name
pub(crate) const OP_ENUM: u8 = 62; // u16 name
pub(crate) const OP_ASYNC: u8 = 63;
pub(crate) const OP_AWAIT: u8 = 64;
pub(crate) const OP_ABORT: u8 = 65;
pub(crate) const OP_TRY: u8 = 66; // u16 forward to catch
pub(crate) const OP_CLOSE_TRY: u8 = 67; // u16 forward past catch
pub(crate) const OP_NOP: u8 = 68;

/// Hard ceiling on constants in one chunk; indices are 16-bit.
pub const MAX_CONSTANTS: usize = u16::MAX as usize + 1;

// ── Chunk ────────────────────────────────────────────────────────────

/// One function's compiled instructions, constant pool and line table.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    /// Run-length encoded `(first offset, line)` pairs.
    lines: Vec<(usize, u32)>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, byte: u8, line: u32) {
        let offset = self.code.len();
        self.code.push(byte);
        match self.lines.last() {
            Some(&(_, last)) if last == line => {}
            _ => self.lines.push((offset, line)),
        }
    }

    /// Appends to the constant pool. `None` once the 16-bit index space is
    /// exhausted.
    pub fn add_constant(&mut self, value: Value) -> Option<u16> {
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(value);
        Some((self.constants.len() - 1) as u16)
    }

    pub fn get_line(&self, offset: usize) -> u32 {
        match self.lines.binary_search_by(|&(start, _)| start.cmp(&offset)) {
            Ok(i) => self.lines[i].1,
            Err(0) => 0,
            Err(i) => self.lines[i - 1].1,
        }
    }

    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.code[offset], self.code[offset + 1]])
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.code.capacity()
            + self.constants.capacity() * std::mem::size_of::<Value>()
            + self.lines.capacity() * std::mem::size_of::<(usize, u32)>()
    }

    // ── Disassembly ─────────────────────────────────────────────────

    pub fn disassemble(&self, heap: &Heap, name: &str) -> String {
        let mut out = format!("== {name} ==\n");
        let mut offset = 0;
        while offset < self.code.len() {
            let (line, next) = self.disassemble_instruction(heap, offset);
            out.push_str(&line);
            out.push('\n');
            offset = next;
        }
        out
    }

    /// Renders the instruction at `offset`; returns the text and the offset
    /// of the following instruction.
    pub fn disassemble_instruction(&self, heap: &Heap, offset: usize) -> (String, usize) {
        let line = self.get_line(offset);
        let prefix = if offset > 0 && self.get_line(offset - 1) == line {
            format!("{offset:04}    | ")
        } else {
            format!("{offset:04} {line:4} ")
        };
        let op = self.code[offset];
        let name = op_name(op);
        let constant = |at: usize| {
            let idx = self.read_u16(at) as usize;
            let shown = self
                .constants
                .get(idx)
                .map(|v| value::format(heap, *v, true))
                .unwrap_or_else(|| "?".to_string());
            format!("{name:<24} {idx:4} {shown}")
        };
        let (text, next) = match op {
            OP_CONSTANT | OP_GET_GLOBAL | OP_DEFINE_GLOBAL | OP_DEFINE_GLOBAL_FORCED
            | OP_SET_GLOBAL | OP_GET_PROPERTY | OP_GET_PROPERTY_NO_POP | OP_SET_PROPERTY
            | OP_GET_SUPER | OP_CLASS | OP_METHOD | OP_ENUM => {
                (constant(offset + 1), offset + 3)
            }
            OP_GET_LOCAL | OP_SET_LOCAL | OP_GET_UPVALUE | OP_SET_UPVALUE | OP_STRING => {
                (format!("{name:<24} {:4}", self.read_u16(offset + 1)), offset + 3)
            }
            OP_ADD | OP_SUBTRACT | OP_MULTIPLY | OP_DIVIDE | OP_MOD | OP_POW | OP_EXPAND | OP_CALL => {
                (format!("{name:<24} {:4}", self.code[offset + 1]), offset + 2)
            }
            OP_JUMP | OP_JUMP_IF_FALSE | OP_TRY | OP_CLOSE_TRY => {
                let target = offset + 3 + self.read_u16(offset + 1) as usize;
                (format!("{name:<24} {offset:4} -> {target}"), offset + 3)
            }
            OP_LOOP => {
                let target = (offset + 3).saturating_sub(self.read_u16(offset + 1) as usize);
                (format!("{name:<24} {offset:4} -> {target}"), offset + 3)
            }
            OP_INVOKE | OP_SUPER => {
                let argc = self.code[offset + 1];
                let text = constant(offset + 2);
                (format!("{text} ({argc} args)"), offset + 4)
            }
            OP_PROPERTY => {
                let text = constant(offset + 1);
                let text = if self.code[offset + 3] == 1 { format!("{text} static") } else { text };
                (text, offset + 4)
            }
            OP_IS => {
                let negated = if self.code[offset + 1] == 1 { "!" } else { "" };
                (format!("{negated}{}", constant(offset + 2)), offset + 4)
            }
            OP_EXTENSION => {
                let ty = self.read_u16(offset + 1) as usize;
                let ty = self.constants.get(ty).map(|v| value::format(heap, *v, false)).unwrap_or_default();
                (format!("{ty}.{}", constant(offset + 3)), offset + 5)
            }
            OP_CLOSURE => {
                let mut text = constant(offset + 1);
                let mut next = offset + 3;
                let upvalues = match self.constants.get(self.read_u16(offset + 1) as usize) {
                    Some(Value::Obj(r)) => heap.function(*r).upvalue_count,
                    _ => 0,
                };
                for _ in 0..upvalues {
                    let kind = if self.code[next] == 1 { "local" } else { "upvalue" };
                    text.push_str(&format!("\n{next:04}      |   {kind} {}", self.read_u16(next + 1)));
                    next += 3;
                }
                (text, next)
            }
            _ => (name.to_string(), offset + 1),
        };
        (format!("{prefix}{text}"), next)
    }
}

pub(crate) fn op_name(op: u8) -> &'static str {
    match op {
        OP_CONSTANT => "CONSTANT",
        OP_NULL => "NULL",
        OP_TRUE => "TRUE",
        OP_FALSE => "FALSE",
        OP_STRING => "STRING",
        OP_EXPAND => "EXPAND",
        OP_POP => "POP",
        OP_REPL_POP => "REPL_POP",
        OP_GET_LOCAL => "GET_LOCAL",
        OP_SET_LOCAL => "SET_LOCAL",
        OP_GET_GLOBAL => "GET_GLOBAL",
        OP_DEFINE_GLOBAL => "DEFINE_GLOBAL",
        OP_DEFINE_GLOBAL_FORCED => "DEFINE_GLOBAL_FORCED",
        OP_SET_GLOBAL => "SET_GLOBAL",
        OP_GET_UPVALUE => "GET_UPVALUE",
        OP_SET_UPVALUE => "SET_UPVALUE",
        OP_GET_PROPERTY => "GET_PROPERTY",
        OP_GET_PROPERTY_NO_POP => "GET_PROPERTY_NO_POP",
        OP_SET_PROPERTY => "SET_PROPERTY",
        OP_GET_SUPER => "GET_SUPER",
        OP_EQUAL => "EQUAL",
        OP_GREATER => "GREATER",
        OP_LESS => "LESS",
        OP_ADD => "ADD",
        OP_SUBTRACT => "SUBTRACT",
        OP_MULTIPLY => "MULTIPLY",
        OP_DIVIDE => "DIVIDE",
        OP_MOD => "MOD",
        OP_POW => "POW",
        OP_INC => "INC",
        OP_DEC => "DEC",
        OP_SHIFT_LEFT => "SHIFT_LEFT",
        OP_SHIFT_RIGHT => "SHIFT_RIGHT",
        OP_BITWISE_AND => "BITWISE_AND",
        OP_BITWISE_OR => "BITWISE_OR",
        OP_IN => "IN",
        OP_IS => "IS",
        OP_NOT => "NOT",
        OP_NEGATE => "NEGATE",
        OP_JUMP => "JUMP",
        OP_JUMP_IF_FALSE => "JUMP_IF_FALSE",
        OP_LOOP => "LOOP",
        OP_DUP => "DUP",
        OP_IMPORT => "IMPORT",
        OP_REQUIRE => "REQUIRE",
        OP_NEW_LIST => "NEW_LIST",
        OP_ADD_LIST => "ADD_LIST",
        OP_NEW_DICT => "NEW_DICT",
        OP_ADD_DICT => "ADD_DICT",
        OP_SUBSCRIPT => "SUBSCRIPT",
        OP_SUBSCRIPT_ASSIGN => "SUBSCRIPT_ASSIGN",
        OP_CALL => "CALL",
        OP_INVOKE => "INVOKE",
        OP_SUPER => "SUPER",
        OP_CLOSURE => "CLOSURE",
        OP_CLOSE_UPVALUE => "CLOSE_UPVALUE",
        OP_RETURN => "RETURN",
        OP_CLASS => "CLASS",
        OP_INHERIT => "INHERIT",
        OP_METHOD => "METHOD",
        OP_PROPERTY => "PROPERTY",
        OP_EXTENSION => "EXTENSION",
        OP_ENUM => "ENUM",
        OP_ASYNC => "ASYNC",
        OP_AWAIT => "AWAIT",
        OP_ABORT => "ABORT",
        OP_TRY => "TRY",
        OP_CLOSE_TRY => "CLOSE_TRY",
        OP_NOP => "NOP",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_run_length_encoded() {
        let mut c = Chunk::new();
        c.write(OP_NULL, 1);
        c.write(OP_NULL, 1);
        c.write(OP_POP, 1);
        c.write(OP_TRUE, 3);
        c.write(OP_POP, 3);
        c.write(OP_RETURN, 7);
        assert_eq!(c.lines.len(), 3);
        assert_eq!(c.get_line(0), 1);
        assert_eq!(c.get_line(2), 1);
        assert_eq!(c.get_line(3), 3);
        assert_eq!(c.get_line(4), 3);
        assert_eq!(c.get_line(5), 7);
    }

    #[test]
    fn constant_pool_has_sixteen_bit_ceiling() {
        let mut c = Chunk::new();
        for i in 0..MAX_CONSTANTS {
            assert_eq!(c.add_constant(Value::Number(i as f64)), Some(i as u16));
        }
        assert_eq!(c.add_constant(Value::None), None);
    }

    #[test]
    fn read_u16_is_big_endian() {
        let mut c = Chunk::new();
        c.write(OP_JUMP, 1);
        c.write(0x01, 1);
        c.write(0x02, 1);
        assert_eq!(c.read_u16(1), 0x0102);
    }

    #[test]
    fn disassembles_jumps_and_constants() {
        let heap = Heap::new(Default::default());
        let mut c = Chunk::new();
        let idx = c.add_constant(Value::Number(2.5)).unwrap();
        c.write(OP_CONSTANT, 1);
        c.write((idx >> 8) as u8, 1);
        c.write(idx as u8, 1);
        c.write(OP_JUMP, 2);
        c.write(0, 2);
        c.write(1, 2);
        c.write(OP_POP, 2);
        c.write(OP_RETURN, 2);
        let text = c.disassemble(&heap, "test");
        assert!(text.contains("CONSTANT"));
        assert!(text.contains("2.5"));
        assert!(text.contains("JUMP"));
        assert!(text.contains("-> 7"));
        assert!(text.contains("RETURN"));
    }
}
