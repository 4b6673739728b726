use super::{ClassState, Compiler, FunctionKind, LoopState};
use crate::chunk::*;
use crate::lexer::{Kind, Token};
use crate::value::Value;

/// Where a `switch` is between its `case` arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchState {
    BeforeCases,
    InCase,
    AfterDefault,
}

impl Compiler<'_, '_> {
    pub(super) fn declaration(&mut self) {
        if self.match_token(Token::Class) {
            self.class_declaration();
        } else if self.match_token(Token::Enum) {
            self.enum_declaration();
        } else if self.match_token(Token::Func) {
            self.fun_declaration();
        } else if self.match_token(Token::Global) {
            self.global_declaration();
        } else if self.match_token(Token::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(Token::For) {
            self.for_statement();
        } else if self.match_token(Token::If) {
            self.if_statement();
        } else if self.match_token(Token::Return) {
            self.return_statement();
        } else if self.match_token(Token::Import) {
            self.import_statement();
        } else if self.match_token(Token::Abort) {
            self.expression();
            self.match_token(Token::Semicolon);
            self.emit(OP_ABORT);
        } else if self.match_token(Token::Break) {
            self.break_statement();
        } else if self.match_token(Token::Continue) {
            self.continue_statement();
        } else if self.match_token(Token::While) {
            self.while_statement();
        } else if self.match_token(Token::Do) {
            self.do_while_statement();
        } else if self.match_token(Token::Switch) {
            self.switch_statement();
        } else if self.match_token(Token::Try) {
            self.try_statement();
        } else if self.match_token(Token::Pass) {
            self.emit(OP_NOP);
            self.match_token(Token::Semicolon);
        } else if self.check(Token::LeftBrace) && self.peek_next() != Kind::Tok(Token::String) {
            // `{ "k": v }` at statement start is a dict expression, not a block.
            self.advance();
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    pub(super) fn block(&mut self) {
        while !self.check(Token::RightBrace) && !self.at_end() {
            self.declaration();
        }
        self.consume(Token::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.match_token(Token::Semicolon);
        if self.fs.kind == FunctionKind::Script && self.fs.scope_depth == 0 {
            self.emit(OP_REPL_POP);
        } else {
            self.emit(OP_POP);
        }
    }

    // ── Declarations ────────────────────────────────────────────────

    fn var_declaration(&mut self) {
        loop {
            let global = self.parse_variable("Expect variable name.");
            if self.match_token(Token::Equal) {
                self.expression();
            } else {
                self.emit(OP_NULL);
            }
            self.define_variable(global);
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        self.match_token(Token::Semicolon);
    }

    /// `global var x = e`: defined in the global table even from inside a
    /// package or a nested scope.
    fn global_declaration(&mut self) {
        self.consume(Token::Var, "Only global variable declaration is valid.");
        loop {
            self.consume(Token::Identifier, "Expect variable name.");
            let global = self.identifier_constant(self.previous_text());
            self.skip_type_annotation();
            if self.match_token(Token::Equal) {
                self.expression();
            } else {
                self.emit(OP_NULL);
            }
            self.emit_op_u16(OP_DEFINE_GLOBAL_FORCED, global);
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        self.match_token(Token::Semicolon);
    }

    fn fun_declaration(&mut self) {
        let named = [Token::Identifier, Token::Func, Token::Class, Token::Enum]
            .into_iter()
            .any(|t| self.match_token(t));
        if !named {
            self.error_at_current("Expect function name or type.");
            return;
        }
        let name = self.previous_text();

        if self.match_token(Token::Dot) {
            let type_name = self.identifier_constant(name);
            self.consume(Token::Identifier, "Expect function name");
            let method = self.previous_text();
            let method_name = self.identifier_constant(method);
            self.function(FunctionKind::Extension, Some(method.to_string()));
            self.emit_op_u16(OP_EXTENSION, type_name);
            self.emit_u16(method_name);
            return;
        }

        if !self.previous.is(Token::Identifier) {
            self.error("Expect function name.");
            return;
        }
        self.declare_variable(name);
        let global = if self.fs.scope_depth > 0 { 0 } else { self.identifier_constant(name) };
        self.mark_initialized();
        self.function(FunctionKind::Function, Some(name.to_string()));
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(Token::Identifier, "Expect class name.");
        let class_name = self.previous_text();
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable(class_name);

        self.emit_op_u16(OP_CLASS, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState { has_superclass: false });

        let mut has_superclass = false;
        if self.match_token(Token::Colon) {
            self.consume(Token::Identifier, "Expect superclass name.");
            let superclass = self.previous_text();
            if superclass == class_name {
                self.error("A class cannot inherit from itself.");
            }

            self.begin_scope();
            self.named_variable(superclass, false);
            self.add_hidden_local("super");

            self.named_variable(class_name, false);
            self.emit(OP_INHERIT);
            has_superclass = true;
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.consume(Token::LeftBrace, "Expect '{' before class body.");
        while !self.check(Token::RightBrace) && !self.at_end() {
            self.named_variable(class_name, false);
            self.member(class_name);
            if self.panic_mode {
                self.skip_to_closing_brace();
            }
        }
        self.consume(Token::RightBrace, "Expect '}' after class body.");

        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn skip_to_closing_brace(&mut self) {
        while !self.check(Token::RightBrace) && !self.at_end() {
            self.advance();
        }
    }

    /// One class member. The class itself is already on the stack.
    fn member(&mut self, class_name: &str) {
        let is_static = self.match_token(Token::Static);
        if self.check(Token::Func) {
            self.method(is_static);
        } else if self.match_token(Token::Var) {
            self.property(is_static, class_name);
        } else {
            self.error_at_current("Only variables and functions allowed inside a class.");
        }
    }

    fn method(&mut self, is_static: bool) {
        self.consume(Token::Func, "Expect a function declaration.");

        let name = if self.match_token(Token::LeftBracket) {
            if self.match_token(Token::RightBracket) {
                "[]"
            } else if self.match_token(Token::Equal) && self.match_token(Token::RightBracket) {
                "[=]"
            } else {
                self.error_at_current("Expect method name.");
                return;
            }
        } else {
            let valid = matches!(
                self.current.kind,
                Kind::Tok(
                    Token::Identifier
                        | Token::Plus
                        | Token::Minus
                        | Token::Star
                        | Token::Slash
                        | Token::Percent
                        | Token::Pow
                        | Token::Bang
                )
            );
            if !valid {
                self.error_at_current("Expect method name.");
                return;
            }
            self.advance();
            self.previous_text()
        };

        let constant = self.identifier_constant(name);
        let kind = if name == "init" {
            FunctionKind::Initializer
        } else if is_static {
            FunctionKind::Static
        } else {
            FunctionKind::Method
        };
        self.function(kind, Some(name.to_string()));
        self.emit_op_u16(OP_METHOD, constant);
    }

    fn property(&mut self, is_static: bool, owner: &str) {
        loop {
            self.consume(Token::Identifier, "Expect variable name.");
            let name = self.identifier_constant(self.previous_text());
            self.skip_type_annotation();
            if self.match_token(Token::Equal) {
                self.expression();
            } else {
                self.emit(OP_NULL);
            }
            self.emit_op_u16(OP_PROPERTY, name);
            self.emit(is_static as u8);
            if !self.match_token(Token::Comma) {
                break;
            }
            self.named_variable(owner, false);
        }
        self.match_token(Token::Semicolon);
    }

    fn enum_declaration(&mut self) {
        self.consume(Token::Identifier, "Expect enum name.");
        let enum_name = self.previous_text();
        let name_constant = self.identifier_constant(enum_name);
        self.declare_variable(enum_name);

        self.emit_op_u16(OP_ENUM, name_constant);
        self.define_variable(name_constant);

        self.consume(Token::LeftBrace, "Expect '{' before enum body.");
        while !self.check(Token::RightBrace) && !self.at_end() {
            self.named_variable(enum_name, false);
            // Members share the property encoding: value (or null), then name.
            self.property(false, enum_name);
            if self.panic_mode {
                self.skip_to_closing_brace();
            }
        }
        self.consume(Token::RightBrace, "Expect '}' after enum body.");
    }

    // ── Control flow ────────────────────────────────────────────────

    fn if_statement(&mut self) {
        self.consume(Token::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(Token::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.statement();

        let else_jump = self.emit_jump(OP_JUMP);
        self.patch_jump(then_jump);
        self.emit(OP_POP);

        if self.match_token(Token::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        if self.match_token(Token::Semicolon) || self.check(Token::RightBrace) || self.at_end() {
            self.emit_return();
            return;
        }
        if self.fs.kind == FunctionKind::Initializer {
            self.error("Cannot return a value from an initializer.");
        }
        self.expression();
        self.match_token(Token::Semicolon);
        self.emit(OP_RETURN);
    }

    fn begin_loop(&mut self, start: usize) {
        let state = LoopState {
            start,
            scope_depth: self.fs.scope_depth,
            try_depth: self.fs.try_depth,
            breaks: Vec::new(),
        };
        self.fs.loops.push(state);
    }

    /// Patches every `break` of the innermost loop to land here.
    fn end_loop(&mut self) {
        if let Some(state) = self.fs.loops.pop() {
            for jump in state.breaks {
                self.patch_jump(jump);
            }
        }
    }

    fn set_loop_start(&mut self, start: usize) {
        if let Some(state) = self.fs.loops.last_mut() {
            state.start = start;
        }
    }

    /// Pops locals and try handlers entered since the innermost loop began.
    fn leave_loop_body(&mut self) -> Option<usize> {
        let (start, depth, tries) = self.fs.loops.last().map(|l| (l.start, l.scope_depth, l.try_depth))?;
        self.discard_locals(depth);
        for _ in tries..self.fs.try_depth {
            self.emit(OP_CLOSE_TRY);
            self.emit_u16(0);
        }
        Some(start)
    }

    fn break_statement(&mut self) {
        self.match_token(Token::Semicolon);
        if self.leave_loop_body().is_none() {
            self.error("Cannot use 'break' outside of a loop.");
            return;
        }
        let jump = self.emit_jump(OP_JUMP);
        if let Some(state) = self.fs.loops.last_mut() {
            state.breaks.push(jump);
        }
    }

    fn continue_statement(&mut self) {
        self.match_token(Token::Semicolon);
        match self.leave_loop_body() {
            Some(start) => self.emit_loop(start),
            None => self.error("Cannot use 'continue' outside of a loop."),
        }
    }

    fn while_statement(&mut self) {
        let start = self.fs.chunk.len();
        self.begin_loop(start);

        self.consume(Token::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(Token::RightParen, "Expect ')' after condition.");

        let exit = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.statement();
        self.emit_loop(start);

        self.patch_jump(exit);
        self.emit(OP_POP);
        self.end_loop();
    }

    fn do_while_statement(&mut self) {
        let start = self.fs.chunk.len();
        self.begin_loop(start);

        self.statement();

        self.consume(Token::While, "Expected 'while' after 'do' body.");
        self.consume(Token::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(Token::RightParen, "Expect ')' after condition.");
        self.match_token(Token::Semicolon);

        let exit = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.emit_loop(start);

        self.patch_jump(exit);
        self.emit(OP_POP);
        self.end_loop();
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(Token::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(Token::Semicolon) {
            // No initializer.
        } else if self.match_token(Token::Var) {
            self.consume(Token::Identifier, "Expect variable name.");
            let name = self.previous_text();
            self.skip_type_annotation();
            let index = if self.match_token(Token::Comma) {
                self.consume(Token::Identifier, "Expected a index name.");
                Some(self.previous_text())
            } else {
                None
            };

            if self.match_token(Token::In) {
                self.for_in(name, index);
                return;
            }
            if index.is_some() {
                self.error("Expect 'in' after index name.");
            }

            self.declare_variable(name);
            if self.match_token(Token::Equal) {
                self.expression();
            } else {
                self.emit(OP_NULL);
            }
            self.mark_initialized();
            self.consume(Token::Semicolon, "Expect ';' after variable declaration.");
        } else {
            self.expression();
            self.emit(OP_POP);
            self.consume(Token::Semicolon, "Expect ';' after loop initializer.");
        }

        let mut start = self.fs.chunk.len();
        self.begin_loop(start);

        let mut exit = None;
        if !self.match_token(Token::Semicolon) {
            self.expression();
            self.consume(Token::Semicolon, "Expect ';' after loop condition.");
            exit = Some(self.emit_jump(OP_JUMP_IF_FALSE));
            self.emit(OP_POP);
        }

        if !self.match_token(Token::RightParen) {
            let body = self.emit_jump(OP_JUMP);
            let increment = self.fs.chunk.len();
            self.expression();
            self.emit(OP_POP);
            self.consume(Token::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(start);
            start = increment;
            self.set_loop_start(start);
            self.patch_jump(body);
        }

        self.statement();
        self.emit_loop(start);

        if let Some(exit) = exit {
            self.patch_jump(exit);
            self.emit(OP_POP);
        }
        self.end_loop();
        self.end_scope();
    }

    /// `for (var x in e)` and `for (var x, i in e)`. The sequence and the
    /// position live in hidden locals; `x` is assigned `seq[i]` before every
    /// pass of the body.
    fn for_in(&mut self, name: &str, index: Option<&str>) {
        self.expression();
        let sequence = self.add_hidden_local("(sequence)");
        self.emit_constant(Value::Number(0.0));
        let position = self.add_hidden_local(index.unwrap_or("(index)"));
        self.emit(OP_NULL);
        let item = self.add_hidden_local(name);
        self.consume(Token::RightParen, "Expect ')' after for clauses.");

        let body = self.emit_jump(OP_JUMP);

        let increment = self.fs.chunk.len();
        self.begin_loop(increment);
        self.emit_op_u16(OP_GET_LOCAL, position);
        self.emit(OP_INC);
        self.emit_op_u16(OP_SET_LOCAL, position);
        self.emit(OP_POP);

        self.patch_jump(body);
        self.emit_op_u16(OP_GET_LOCAL, position);
        let len = self.identifier_constant("len");
        self.emit_op_u16(OP_GET_GLOBAL, len);
        self.emit_op_u16(OP_GET_LOCAL, sequence);
        self.emit(OP_CALL);
        self.emit(1);
        self.emit(OP_LESS);
        let exit = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);

        self.emit_op_u16(OP_GET_LOCAL, sequence);
        self.emit_op_u16(OP_GET_LOCAL, position);
        self.emit(OP_SUBSCRIPT);
        self.emit_op_u16(OP_SET_LOCAL, item);
        self.emit(OP_POP);

        self.statement();
        self.emit_loop(increment);

        self.patch_jump(exit);
        self.emit(OP_POP);
        self.end_loop();
        self.end_scope();
    }

    fn switch_statement(&mut self) {
        self.consume(Token::LeftParen, "Expect '(' after 'switch'.");
        self.expression();
        self.consume(Token::RightParen, "Expect ')' after value.");
        self.consume(Token::LeftBrace, "Expect '{' before switch cases.");

        self.begin_scope();
        let subject = self.add_hidden_local("(switch)");

        let mut state = SwitchState::BeforeCases;
        let mut case_ends = Vec::new();
        let mut skip = None;

        loop {
            if self.match_token(Token::RightBrace) {
                break;
            }
            if self.at_end() {
                self.error_at_current("Expect '}' after switch cases.");
                break;
            }
            if self.match_token(Token::Case) || self.match_token(Token::Default) {
                let is_case = self.previous.is(Token::Case);
                if state == SwitchState::AfterDefault {
                    self.error("Cannot have another case or default after the default case.");
                }
                if state != SwitchState::BeforeCases {
                    // Close the previous arm and jump over the rest.
                    self.end_scope();
                    case_ends.push(self.emit_jump(OP_JUMP));
                    if let Some(skip) = skip.take() {
                        self.patch_jump(skip);
                        self.emit(OP_POP);
                    }
                }

                if is_case {
                    state = SwitchState::InCase;
                    self.emit_op_u16(OP_GET_LOCAL, subject);
                    self.expression();
                    self.consume(Token::Colon, "Expect ':' after case value.");
                    self.emit(OP_EQUAL);
                    skip = Some(self.emit_jump(OP_JUMP_IF_FALSE));
                    self.emit(OP_POP);
                } else {
                    state = SwitchState::AfterDefault;
                    self.consume(Token::Colon, "Expect ':' after default.");
                    skip = None;
                }
                self.begin_scope();
            } else {
                if state == SwitchState::BeforeCases {
                    self.error_at_current("Cannot have statements before any case.");
                }
                self.declaration();
            }
        }

        if state != SwitchState::BeforeCases {
            self.end_scope();
        }
        if let Some(skip) = skip {
            case_ends.push(self.emit_jump(OP_JUMP));
            self.patch_jump(skip);
            self.emit(OP_POP);
        }
        for jump in case_ends {
            self.patch_jump(jump);
        }
        self.end_scope();
    }

    /// `try <statement> [catch [(name)] <statement>]`. The handler runs in
    /// the same frame; the error message is its first local.
    fn try_statement(&mut self) {
        let handler = self.emit_jump(OP_TRY);
        self.fs.try_depth += 1;
        self.statement();
        self.fs.try_depth -= 1;
        let end = self.emit_jump(OP_CLOSE_TRY);
        self.patch_jump(handler);

        self.begin_scope();
        if self.match_token(Token::Catch) {
            if self.match_token(Token::LeftParen) {
                self.consume(Token::Identifier, "Expect error variable name.");
                let name = self.previous_text();
                self.add_hidden_local(name);
                self.consume(Token::RightParen, "Expect ')' after catch variable.");
            } else {
                self.add_hidden_local("(error)");
            }
            self.statement();
        } else {
            self.add_hidden_local("(error)");
        }
        self.end_scope();
        self.patch_jump(end);
    }

    // ── Modules ─────────────────────────────────────────────────────

    /// `import a/b [as name|default]` or `import "path" [as name]`.
    fn import_statement(&mut self) {
        let path = if self.match_token(Token::Identifier) {
            let mut path = self.previous_text().to_string();
            while self.match_token(Token::Slash) {
                self.consume(Token::Identifier, "Expect an identifier after slash in import.");
                path.push('/');
                path.push_str(self.previous_text());
            }
            path.push_str(".cube");
            path
        } else {
            self.consume(Token::String, "Expect string after import.");
            let text = self.previous_text();
            text.get(1..text.len().saturating_sub(1)).unwrap_or_default().to_string()
        };
        let path = self.heap.intern_value(&path);
        self.emit_constant(path);

        if self.match_token(Token::As) {
            if self.match_token(Token::Identifier) || self.match_token(Token::Default) {
                let alias = self.previous_text();
                let alias = self.heap.intern_value(alias);
                self.emit_constant(alias);
            } else {
                self.error_at_current("Expect identifier after as.");
            }
        } else {
            self.emit(OP_NULL);
        }
        self.match_token(Token::Semicolon);
        self.emit(OP_IMPORT);
    }
}
