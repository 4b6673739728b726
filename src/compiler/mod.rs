//! Single-pass compiler: source text straight to bytecode.
//!
//! There is no syntax tree. Each grammar production writes instructions into
//! the chunk of the function currently being compiled as soon as it is
//! recognized. Nested functions push a fresh [`FunctionState`]; the chain of
//! states is what local and upvalue resolution walks.

mod expr;
mod stmt;

use std::collections::HashMap;
use std::rc::Rc;

use crate::chunk::*;
use crate::gc::{Heap, ObjRef};
use crate::lexer::{self, Kind, Lexeme, Token};
use crate::object::{DocRecord, Obj, ObjFunction};
use crate::value::Value;

/// Global through which every function prologue fetches its call arguments.
pub const ARGS_GLOBAL: &str = "__args__";

pub(crate) const MAX_ARGS: usize = 255;
const MAX_LOCALS: usize = u16::MAX as usize + 1;
const MAX_UPVALUES: usize = u16::MAX as usize + 1;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: u32,
    /// ` at 'lexeme'`, ` at end`, or empty for lexer errors.
    pub location: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
    Static,
    Extension,
}

impl FunctionKind {
    fn has_receiver(self) -> bool {
        matches!(self, FunctionKind::Method | FunctionKind::Initializer | FunctionKind::Extension)
    }
}

#[derive(Debug)]
struct Local {
    name: String,
    /// `None` while the initializer is still being compiled.
    depth: Option<usize>,
    captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct UpvalueDesc {
    index: u16,
    is_local: bool,
}

#[derive(Debug)]
struct LoopState {
    start: usize,
    scope_depth: usize,
    try_depth: usize,
    breaks: Vec<usize>,
}

#[derive(Debug)]
struct FunctionState {
    kind: FunctionKind,
    name: Option<String>,
    arity: usize,
    chunk: Chunk,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: usize,
    loops: Vec<LoopState>,
    try_depth: usize,
    /// Offset of the `GET_GLOBAL __args__` prologue, if one was emitted.
    args_prologue: Option<usize>,
    args_used: bool,
    string_constants: HashMap<ObjRef, u16>,
}

impl FunctionState {
    fn new(kind: FunctionKind, name: Option<String>) -> Self {
        let receiver = if kind.has_receiver() { "this" } else { "" };
        FunctionState {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local { name: receiver.to_string(), depth: Some(0), captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            try_depth: 0,
            args_prologue: None,
            args_used: false,
            string_constants: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'src, 'h> {
    source: &'src str,
    tokens: Vec<Lexeme>,
    next: usize,
    current: Lexeme,
    previous: Lexeme,
    heap: &'h mut Heap,
    path: ObjRef,
    fs: FunctionState,
    enclosing: Vec<FunctionState>,
    classes: Vec<ClassState>,
    docs: Vec<DocRecord>,
    /// Docs still waiting for the line of the declaration they precede.
    pending_docs: usize,
    errors: Vec<CompileError>,
    panic_mode: bool,
}

/// Compiles `source` into the top-level script function. Collection is
/// suspended for the duration, so every constant created along the way stays
/// alive without being rooted.
pub fn compile(heap: &mut Heap, source: &str, path: &str) -> Result<ObjRef, Vec<CompileError>> {
    heap.pause();
    let result = Compiler::new(heap, source, path).run();
    heap.resume();
    result
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(heap: &'h mut Heap, source: &'src str, path: &str) -> Self {
        let tokens = lexer::lex(source);
        let eof = tokens[tokens.len() - 1];
        let path = heap.intern(path);
        Compiler {
            source,
            tokens,
            next: 0,
            current: eof,
            previous: eof,
            heap,
            path,
            fs: FunctionState::new(FunctionKind::Script, None),
            enclosing: Vec::new(),
            classes: Vec::new(),
            docs: Vec::new(),
            pending_docs: 0,
            errors: Vec::new(),
            panic_mode: false,
        }
    }

    fn run(mut self) -> Result<ObjRef, Vec<CompileError>> {
        self.advance();
        while !self.at_end() {
            self.declaration();
        }
        self.emit_return();

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let state = std::mem::replace(&mut self.fs, FunctionState::new(FunctionKind::Script, None));
        let function = ObjFunction {
            arity: 0,
            upvalue_count: 0,
            is_static: false,
            name: None,
            path: Some(self.path),
            chunk: Rc::new(state.chunk),
            docs: std::mem::take(&mut self.docs),
        };
        Ok(self.heap.alloc(Obj::Function(function)))
    }

    // ── Token stream ────────────────────────────────────────────────

    fn advance(&mut self) {
        self.previous = self.current;
        while let Some(lexeme) = self.tokens.get(self.next).copied() {
            self.next += 1;
            self.current = lexeme;
            match lexeme.kind {
                Kind::Error => self.error_at_current(lexeme.message.unwrap_or("Unexpected character.")),
                Kind::Tok(Token::Doc) => self.record_doc(lexeme),
                _ => {
                    let start = self.docs.len() - self.pending_docs;
                    for doc in &mut self.docs[start..] {
                        doc.line = lexeme.line;
                    }
                    self.pending_docs = 0;
                    return;
                }
            }
        }
    }

    fn record_doc(&mut self, lexeme: Lexeme) {
        let text = lexer::doc_text(lexeme.text(self.source)).to_string();
        self.docs.push(DocRecord { id: self.docs.len() as u32, line: lexeme.line, text });
        self.pending_docs += 1;
    }

    /// Kind of the lexeme after `current`, ignoring doc comments.
    fn peek_next(&self) -> Kind {
        self.tokens[self.next..]
            .iter()
            .find(|l| !l.is(Token::Doc))
            .map_or(Kind::Eof, |l| l.kind)
    }

    fn text(&self, lexeme: Lexeme) -> &'src str {
        lexeme.text(self.source)
    }

    fn previous_text(&self) -> &'src str {
        self.text(self.previous)
    }

    fn check(&self, token: Token) -> bool {
        self.current.is(token)
    }

    fn at_end(&self) -> bool {
        self.current.kind == Kind::Eof
    }

    fn match_token(&mut self, token: Token) -> bool {
        if !self.check(token) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, token: Token, message: &str) {
        if self.check(token) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    // ── Errors ──────────────────────────────────────────────────────

    fn error_at(&mut self, lexeme: Lexeme, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match lexeme.kind {
            Kind::Eof => " at end".to_string(),
            Kind::Error => String::new(),
            Kind::Tok(_) => format!(" at '{}'", self.text(lexeme)),
        };
        self.errors.push(CompileError { line: lexeme.line, location, message: message.to_string() });
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.at_end() {
            if self.previous.is(Token::Semicolon) {
                return;
            }
            if let Kind::Tok(
                Token::Class
                | Token::Enum
                | Token::Func
                | Token::Static
                | Token::Var
                | Token::Global
                | Token::For
                | Token::If
                | Token::While
                | Token::Return
                | Token::Import
                | Token::Break
                | Token::Abort
                | Token::Try
                | Token::Catch
                | Token::Pass,
            ) = self.current.kind
            {
                return;
            }
            self.advance();
        }
    }

    // ── Emission ────────────────────────────────────────────────────

    fn emit(&mut self, byte: u8) {
        let line = self.previous.line;
        self.fs.chunk.write(byte, line);
    }

    fn emit_u16(&mut self, value: u16) {
        for byte in value.to_be_bytes() {
            self.emit(byte);
        }
    }

    fn emit_op_u16(&mut self, op: u8, operand: u16) {
        self.emit(op);
        self.emit_u16(operand);
    }

    fn emit_return(&mut self) {
        if self.fs.kind == FunctionKind::Initializer {
            self.emit_op_u16(OP_GET_LOCAL, 0);
        } else {
            self.emit(OP_NULL);
        }
        self.emit(OP_RETURN);
    }

    fn make_constant(&mut self, value: Value) -> u16 {
        match self.fs.chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_u16(OP_CONSTANT, index);
    }

    /// Constant-pool slot for an interned name, reused within one function.
    fn identifier_constant(&mut self, name: &str) -> u16 {
        let string = self.heap.intern(name);
        if let Some(&index) = self.fs.string_constants.get(&string) {
            return index;
        }
        let index = self.make_constant(Value::Obj(string));
        self.fs.string_constants.insert(string, index);
        index
    }

    fn emit_jump(&mut self, op: u8) -> usize {
        self.emit(op);
        self.emit(0xff);
        self.emit(0xff);
        self.fs.chunk.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.fs.chunk.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.fs.chunk.code[offset..offset + 2].copy_from_slice(&(jump as u16).to_be_bytes());
    }

    fn emit_loop(&mut self, start: usize) {
        self.emit(OP_LOOP);
        let offset = self.fs.chunk.len() - start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_u16(offset as u16);
    }

    // ── Scopes and variables ────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.fs.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.fs.scope_depth -= 1;
        let depth = self.fs.scope_depth;
        while let Some(local) = self.fs.locals.last() {
            if local.depth.is_some_and(|d| d <= depth) {
                break;
            }
            let op = if local.captured { OP_CLOSE_UPVALUE } else { OP_POP };
            self.emit(op);
            self.fs.locals.pop();
        }
    }

    /// Emits the pops a jump out to `depth` needs, leaving the compile-time
    /// locals untouched for the code that follows the jump.
    fn discard_locals(&mut self, depth: usize) {
        let ops: Vec<u8> = self
            .fs
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.is_none_or(|d| d > depth))
            .map(|l| if l.captured { OP_CLOSE_UPVALUE } else { OP_POP })
            .collect();
        for op in ops {
            self.emit(op);
        }
    }

    fn add_local(&mut self, name: &str) {
        if self.fs.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.fs.locals.push(Local { name: name.to_string(), depth: None, captured: false });
    }

    /// Adds a local that is usable immediately; its value is already on the
    /// stack.
    fn add_hidden_local(&mut self, name: &str) -> u16 {
        self.add_local(name);
        self.mark_initialized();
        (self.fs.locals.len() - 1) as u16
    }

    fn declare_variable(&mut self, name: &str) {
        if self.fs.scope_depth == 0 {
            return;
        }
        let depth = self.fs.scope_depth;
        let duplicate = self
            .fs
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.is_none_or(|d| d >= depth))
            .any(|l| l.name == name);
        if duplicate {
            self.error("Variable with this name already declared in this scope.");
        }
        self.add_local(name);
    }

    fn skip_type_annotation(&mut self) {
        if self.match_token(Token::Colon) && !self.match_token(Token::Func) {
            self.consume(Token::Identifier, "Only variable types allowed");
        }
    }

    fn parse_variable(&mut self, message: &str) -> u16 {
        self.consume(Token::Identifier, message);
        let name = self.previous_text();
        self.skip_type_annotation();
        self.declare_variable(name);
        if self.fs.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(name)
    }

    fn mark_initialized(&mut self) {
        if self.fs.scope_depth == 0 {
            return;
        }
        let depth = self.fs.scope_depth;
        if let Some(local) = self.fs.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u16) {
        if self.fs.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_u16(OP_DEFINE_GLOBAL, global);
    }

    /// Function state `depth` levels out from the innermost one.
    fn state_at(&mut self, depth: usize) -> &mut FunctionState {
        if depth == 0 {
            &mut self.fs
        } else {
            let index = self.enclosing.len() - depth;
            &mut self.enclosing[index]
        }
    }

    fn resolve_local(&mut self, depth: usize, name: &str) -> Option<u16> {
        let state = self.state_at(depth);
        let (slot, initialized) = state
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, l)| (i, l.depth.is_some()))?;
        if name == "args" {
            state.args_used = true;
        }
        if !initialized {
            self.error("Cannot read local variable in its own initializer.");
        }
        Some(slot as u16)
    }

    fn resolve_upvalue(&mut self, depth: usize, name: &str) -> Option<u16> {
        if depth >= self.enclosing.len() {
            return None;
        }
        if let Some(local) = self.resolve_local(depth + 1, name) {
            self.state_at(depth + 1).locals[local as usize].captured = true;
            return Some(self.add_upvalue(depth, local, true));
        }
        let upvalue = self.resolve_upvalue(depth + 1, name)?;
        Some(self.add_upvalue(depth, upvalue, false))
    }

    fn add_upvalue(&mut self, depth: usize, index: u16, is_local: bool) -> u16 {
        let desc = UpvalueDesc { index, is_local };
        let state = self.state_at(depth);
        if let Some(existing) = state.upvalues.iter().position(|u| *u == desc) {
            return existing as u16;
        }
        if state.upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        state.upvalues.push(desc);
        (state.upvalues.len() - 1) as u16
    }

    /// Get and set instructions for `name`: local, then upvalue, then global.
    fn variable_ops(&mut self, name: &str) -> (u8, u8, u16) {
        if let Some(slot) = self.resolve_local(0, name) {
            (OP_GET_LOCAL, OP_SET_LOCAL, slot)
        } else if let Some(index) = self.resolve_upvalue(0, name) {
            (OP_GET_UPVALUE, OP_SET_UPVALUE, index)
        } else {
            let constant = self.identifier_constant(name);
            (OP_GET_GLOBAL, OP_SET_GLOBAL, constant)
        }
    }

    // ── Functions ───────────────────────────────────────────────────

    fn push_function(&mut self, kind: FunctionKind, name: Option<String>) {
        let outer = std::mem::replace(&mut self.fs, FunctionState::new(kind, name));
        self.enclosing.push(outer);
    }

    /// Declares the `args` local and loads it from the calling frame. The
    /// load is blanked out again in [`Self::end_function`] when nothing
    /// reads `args`.
    fn args_prologue(&mut self) {
        self.add_hidden_local("args");
        self.fs.args_prologue = Some(self.fs.chunk.len());
        let constant = self.identifier_constant(ARGS_GLOBAL);
        self.emit_op_u16(OP_GET_GLOBAL, constant);
    }

    /// Finishes the innermost function and emits the `CLOSURE` that builds
    /// it at runtime in the enclosing one.
    fn end_function(&mut self) {
        self.emit_return();
        let outer = self.enclosing.pop().unwrap_or_else(|| FunctionState::new(FunctionKind::Script, None));
        let mut state = std::mem::replace(&mut self.fs, outer);

        if let (Some(at), false) = (state.args_prologue, state.args_used) {
            state.chunk.code[at..at + 3].copy_from_slice(&[OP_NULL, OP_NOP, OP_NOP]);
        }

        let name = state.name.as_deref().map(|n| self.heap.intern(n));
        let function = ObjFunction {
            arity: state.arity,
            upvalue_count: state.upvalues.len(),
            is_static: state.kind == FunctionKind::Static,
            name,
            path: Some(self.path),
            chunk: Rc::new(state.chunk),
            docs: Vec::new(),
        };
        let function = self.heap.alloc(Obj::Function(function));

        let constant = self.make_constant(Value::Obj(function));
        self.emit_op_u16(OP_CLOSURE, constant);
        for upvalue in &state.upvalues {
            self.emit(upvalue.is_local as u8);
            self.emit_u16(upvalue.index);
        }
    }

    /// Parameter list and body, from `(` onwards.
    fn function(&mut self, kind: FunctionKind, name: Option<String>) {
        self.push_function(kind, name);
        self.begin_scope();

        self.consume(Token::LeftParen, "Expect '(' after function name.");
        if !self.check(Token::RightParen) {
            loop {
                self.fs.arity += 1;
                if self.fs.arity > MAX_ARGS {
                    self.error_at_current("Cannot have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(Token::Comma) {
                    break;
                }
            }
        }
        self.consume(Token::RightParen, "Expect ')' after parameters.");
        self.args_prologue();

        if self.match_token(Token::Equal) {
            if !self.match_token(Token::Greater) {
                self.error_at_current("Only scoped '{}' and short '=>' functions allowed.");
            }
            self.expression();
            self.match_token(Token::Semicolon);
            self.emit(OP_RETURN);
        } else {
            self.consume(Token::LeftBrace, "Expect '{' before function body.");
            self.block();
        }

        self.end_function();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcConfig;

    fn compile_src(source: &str) -> (Heap, Result<ObjRef, Vec<CompileError>>) {
        let mut heap = Heap::new(GcConfig::default());
        let result = compile(&mut heap, source, "test.cube");
        (heap, result)
    }

    fn errors(source: &str) -> Vec<String> {
        match compile_src(source).1 {
            Ok(_) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn listing(source: &str) -> String {
        let (heap, result) = compile_src(source);
        let function = result.unwrap();
        heap.function(function).chunk.disassemble(&heap, "script")
    }

    #[test]
    fn compiles_arithmetic() {
        let text = listing("var x = 1 + 2; return x;");
        assert!(text.contains("ADD"));
        assert!(text.contains("DEFINE_GLOBAL"));
        assert!(text.contains("GET_GLOBAL"));
        assert!(text.contains("RETURN"));
    }

    #[test]
    fn reports_missing_expression() {
        let errs = errors("var x = ;");
        assert_eq!(errs, vec!["[line 1] Error at ';': Expect expression.".to_string()]);
    }

    #[test]
    fn reports_error_at_end() {
        let errs = errors("print(1");
        assert_eq!(errs, vec!["[line 1] Error at end: Expect ')' after arguments.".to_string()]);
    }

    #[test]
    fn recovers_and_reports_several_errors() {
        let errs = errors("var = 1;\nvar y = 2;\nvar = 3;");
        assert_eq!(errs.len(), 2);
        assert!(errs[0].starts_with("[line 1]"));
        assert!(errs[1].starts_with("[line 3]"));
    }

    #[test]
    fn lexer_errors_have_no_location() {
        let errs = errors("var s = \"abc");
        assert_eq!(errs[0], "[line 1] Error: Unterminated string.");
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        let errs = errors("1 + 2 = 3;");
        assert!(errs[0].ends_with("Invalid assignment target."));
    }

    #[test]
    fn rejects_self_reference_in_initializer() {
        let errs = errors("{ var a = a; }");
        assert!(errs[0].ends_with("Cannot read local variable in its own initializer."));
    }

    #[test]
    fn rejects_duplicate_local() {
        let errs = errors("{ var a = 1; var a = 2; }");
        assert!(errs[0].ends_with("Variable with this name already declared in this scope."));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let errs = errors("break;");
        assert!(errs[0].ends_with("Cannot use 'break' outside of a loop."));
    }

    #[test]
    fn rejects_this_outside_class() {
        let errs = errors("this.x = 1;");
        assert!(errs[0].ends_with("Cannot use 'this' outside of a class."));
    }

    #[test]
    fn rejects_super_without_superclass() {
        let errs = errors("class A { func f() { return super.f(); } }");
        assert!(errs[0].ends_with("Cannot use 'super' in a class with no superclass."));
    }

    #[test]
    fn rejects_self_inheritance() {
        let errs = errors("class A : A {}");
        assert!(errs[0].ends_with("A class cannot inherit from itself."));
    }

    #[test]
    fn rejects_value_return_from_initializer() {
        let errs = errors("class A { func init() { return 1; } }");
        assert!(errs[0].ends_with("Cannot return a value from an initializer."));
    }

    #[test]
    fn rejects_stray_class_members() {
        let errs = errors("class A { 1 }");
        assert!(errs[0].ends_with("Only variables and functions allowed inside a class."));
    }

    #[test]
    fn unused_args_prologue_is_blanked() {
        let (heap, result) = compile_src("func f(a) { return a; }");
        let script = result.unwrap();
        let inner = heap
            .function(script)
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Obj(r) if matches!(heap.get(*r), Obj::Function(_)) => Some(*r),
                _ => None,
            })
            .unwrap();
        let text = heap.function(inner).chunk.disassemble(&heap, "f");
        assert!(!text.contains("__args__"));
        assert!(text.contains("NOP"));
    }

    #[test]
    fn used_args_prologue_is_kept() {
        let (heap, result) = compile_src("func f() { return args; }");
        let script = result.unwrap();
        let inner = heap
            .function(script)
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Obj(r) if matches!(heap.get(*r), Obj::Function(_)) => Some(*r),
                _ => None,
            })
            .unwrap();
        let text = heap.function(inner).chunk.disassemble(&heap, "f");
        assert!(text.contains("__args__"));
    }

    #[test]
    fn captured_locals_close_on_scope_exit() {
        let text = listing("{ var a = 1; func f() { return a; } }");
        assert!(text.contains("CLOSE_UPVALUE"));
        assert!(text.contains("local 1"));
    }

    #[test]
    fn docs_attach_to_script_with_following_line() {
        let (heap, result) = compile_src("//? Adds things.\n\nfunc add(a, b) => a + b\n/*? Second */ var x = 1");
        let script = result.unwrap();
        let docs = &heap.function(script).docs;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, 0);
        assert_eq!(docs[0].text, "Adds things.");
        assert_eq!(docs[0].line, 3);
        assert_eq!(docs[1].id, 1);
        assert_eq!(docs[1].text, "Second");
    }

    #[test]
    fn interpolation_emits_string_pieces() {
        let text = listing("var n = 1; var s = \"a${n}b\";");
        assert!(text.contains("STRING"));
    }

    #[test]
    fn rejects_bad_interpolation() {
        let errs = errors("var s = \"${1x}\";");
        assert!(errs[0].ends_with("Invalid identifier in string."));
        let errs = errors("var s = \"${x\";");
        assert!(errs[0].ends_with("Invalid identifier end in string."));
    }

    #[test]
    fn semicolons_are_optional() {
        assert!(errors("var a = 1\nvar b = a + 1\nprint(b)").is_empty());
    }
}
