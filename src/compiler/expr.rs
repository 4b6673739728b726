use super::{Compiler, FunctionKind, MAX_ARGS};
use crate::chunk::*;
use crate::lexer::{Kind, Token};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Prefix {
    Grouping,
    Dict,
    List,
    Unary,
    Step,
    Variable,
    String,
    Number,
    Literal,
    Static,
    Lambda,
    Super,
    This,
    Require,
    Async,
    Await,
}

#[derive(Debug, Clone, Copy)]
enum Infix {
    Call,
    Subscript,
    Dot,
    Expand,
    Binary,
    And,
    Or,
    Is,
}

fn prefix_rule(token: Token) -> Option<Prefix> {
    use Token::*;
    Some(match token {
        LeftParen => Prefix::Grouping,
        LeftBrace => Prefix::Dict,
        LeftBracket => Prefix::List,
        Minus | Bang => Prefix::Unary,
        Inc | Dec => Prefix::Step,
        Identifier => Prefix::Variable,
        String => Prefix::String,
        Number | Nan | Inf => Prefix::Number,
        False | True | Null => Prefix::Literal,
        Static => Prefix::Static,
        Lambda => Prefix::Lambda,
        Super => Prefix::Super,
        This => Prefix::This,
        Require => Prefix::Require,
        Async => Prefix::Async,
        Await => Prefix::Await,
        _ => return None,
    })
}

fn infix_rule(token: Token) -> Option<(Infix, Precedence)> {
    use Token::*;
    Some(match token {
        LeftParen => (Infix::Call, Precedence::Call),
        LeftBracket => (Infix::Subscript, Precedence::Call),
        Dot => (Infix::Dot, Precedence::Call),
        ExpandIn | ExpandEx => (Infix::Expand, Precedence::Factor),
        Minus | Plus | DotPlus | DotMinus | DotStar | DotSlash | DotPow | DotPercent | In => {
            (Infix::Binary, Precedence::Term)
        }
        Slash | Star | Percent | Pow => (Infix::Binary, Precedence::Factor),
        BangEqual | EqualEqual | ShiftLeft | ShiftRight | BitAnd | BitOr => (Infix::Binary, Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => (Infix::Binary, Precedence::Comparison),
        And => (Infix::And, Precedence::And),
        Or => (Infix::Or, Precedence::Or),
        Is => (Infix::Is, Precedence::Term),
        _ => return None,
    })
}

fn infix_precedence(kind: Kind) -> Precedence {
    match kind {
        Kind::Tok(token) => infix_rule(token).map_or(Precedence::None, |(_, p)| p),
        _ => Precedence::None,
    }
}

/// Opcode of a compound assignment token, e.g. `+=` adds.
fn compound_op(token: Token) -> Option<u8> {
    Some(match token {
        Token::PlusEqual => OP_ADD,
        Token::MinusEqual => OP_SUBTRACT,
        Token::StarEqual => OP_MULTIPLY,
        Token::SlashEqual => OP_DIVIDE,
        Token::PercentEqual => OP_MOD,
        Token::PowEqual => OP_POW,
        _ => return None,
    })
}

impl Compiler<'_, '_> {
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    pub(super) fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match self.previous.kind {
            Kind::Tok(token) => prefix_rule(token),
            _ => None,
        };
        let Some(prefix) = prefix else {
            self.error("Expect expression.");
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(prefix, can_assign);

        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            if let Kind::Tok(token) = self.previous.kind {
                if let Some((infix, _)) = infix_rule(token) {
                    self.infix(infix, can_assign);
                }
            }
        }

        if can_assign && self.match_token(Token::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, rule: Prefix, can_assign: bool) {
        match rule {
            Prefix::Grouping => {
                self.expression();
                self.consume(Token::RightParen, "Expect ')' after expression.");
            }
            Prefix::Dict => self.dict(),
            Prefix::List => self.list(),
            Prefix::Unary => self.unary(),
            Prefix::Step => self.step(),
            Prefix::Variable => {
                let name = self.previous_text();
                self.named_variable(name, can_assign);
            }
            Prefix::String => self.string(),
            Prefix::Number => self.number(),
            Prefix::Literal => {
                let op = match self.previous.kind {
                    Kind::Tok(Token::False) => OP_FALSE,
                    Kind::Tok(Token::True) => OP_TRUE,
                    _ => OP_NULL,
                };
                self.emit(op);
            }
            Prefix::Static => self.error("Cannot use 'static' outside of a class."),
            Prefix::Lambda => self.function(FunctionKind::Function, Some("lambda".to_string())),
            Prefix::Super => self.super_(),
            Prefix::This => self.this_(),
            Prefix::Require => {
                self.consume(Token::LeftParen, "In 'require' a package name must be passed between parentheses.");
                if self.argument_list() != 1 {
                    self.error("Required accepts only one parameter.");
                }
                self.emit(OP_REQUIRE);
            }
            Prefix::Async => self.async_(),
            Prefix::Await => {
                self.parse_precedence(Precedence::Unary);
                self.emit(OP_AWAIT);
            }
        }
    }

    fn infix(&mut self, rule: Infix, can_assign: bool) {
        match rule {
            Infix::Call => {
                let argc = self.argument_list();
                self.emit(OP_CALL);
                self.emit(argc);
            }
            Infix::Subscript => {
                self.expression();
                self.consume(Token::RightBracket, "Expected closing ']'");
                if can_assign && self.match_token(Token::Equal) {
                    self.expression();
                    self.emit(OP_SUBSCRIPT_ASSIGN);
                } else {
                    self.emit(OP_SUBSCRIPT);
                }
            }
            Infix::Dot => self.dot(can_assign),
            Infix::Expand => self.expand(),
            Infix::Binary => self.binary(),
            Infix::And => {
                let end = self.emit_jump(OP_JUMP_IF_FALSE);
                self.emit(OP_POP);
                self.parse_precedence(Precedence::And);
                self.patch_jump(end);
            }
            Infix::Or => {
                let else_jump = self.emit_jump(OP_JUMP_IF_FALSE);
                let end = self.emit_jump(OP_JUMP);
                self.patch_jump(else_jump);
                self.emit(OP_POP);
                self.parse_precedence(Precedence::Or);
                self.patch_jump(end);
            }
            Infix::Is => self.is(),
        }
    }

    pub(super) fn argument_list(&mut self) -> u8 {
        let mut count = 0usize;
        if !self.check(Token::RightParen) {
            loop {
                self.expression();
                if count == MAX_ARGS {
                    self.error("Cannot have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(Token::Comma) {
                    break;
                }
            }
        }
        self.consume(Token::RightParen, "Expect ')' after arguments.");
        count.min(MAX_ARGS) as u8
    }

    // ── Variables ───────────────────────────────────────────────────

    pub(super) fn named_variable(&mut self, name: &str, can_assign: bool) {
        let (get, set, arg) = self.variable_ops(name);

        let compound = match self.current.kind {
            Kind::Tok(token) if can_assign => compound_op(token),
            _ => None,
        };

        if let Some(op) = compound {
            self.advance();
            self.emit_op_u16(get, arg);
            self.expression();
            self.emit(op);
            self.emit(0);
            self.emit_op_u16(set, arg);
        } else if can_assign && self.match_token(Token::Equal) {
            self.expression();
            self.emit_op_u16(set, arg);
        } else if self.check(Token::Inc) || self.check(Token::Dec) {
            let (step, undo) = if self.check(Token::Inc) { (OP_INC, OP_SUBTRACT) } else { (OP_DEC, OP_ADD) };
            self.advance();
            self.emit_op_u16(get, arg);
            self.emit(step);
            self.emit_op_u16(set, arg);
            self.emit_constant(Value::Number(1.0));
            self.emit(undo);
            self.emit(0);
        } else {
            self.emit_op_u16(get, arg);
        }
    }

    /// Prefix `++x`, `--x` and `++x.field`.
    fn step(&mut self) {
        let op = if self.previous.is(Token::Inc) { OP_INC } else { OP_DEC };
        self.consume(Token::Identifier, "Expected variable");
        let name = self.previous_text();
        let (get, set, arg) = self.variable_ops(name);
        self.emit_op_u16(get, arg);

        if self.match_token(Token::Dot) {
            self.consume(Token::Identifier, "Expect property name after '.'.");
            let property = self.identifier_constant(self.previous_text());
            self.emit_op_u16(OP_GET_PROPERTY_NO_POP, property);
            self.emit(op);
            self.emit_op_u16(OP_SET_PROPERTY, property);
        } else {
            self.emit(op);
            self.emit_op_u16(set, arg);
        }
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(Token::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous_text());

        let compound = match self.current.kind {
            Kind::Tok(token) if can_assign => compound_op(token),
            _ => None,
        };

        if let Some(op) = compound {
            self.advance();
            self.emit_op_u16(OP_GET_PROPERTY_NO_POP, name);
            self.expression();
            self.emit(op);
            self.emit(0);
            self.emit_op_u16(OP_SET_PROPERTY, name);
        } else if can_assign && self.match_token(Token::Equal) {
            self.expression();
            self.emit_op_u16(OP_SET_PROPERTY, name);
        } else if self.match_token(Token::LeftParen) {
            let argc = self.argument_list();
            self.emit(OP_INVOKE);
            self.emit(argc);
            self.emit_u16(name);
        } else if self.check(Token::Inc) || self.check(Token::Dec) {
            let (step, undo) = if self.check(Token::Inc) { (OP_INC, OP_SUBTRACT) } else { (OP_DEC, OP_ADD) };
            self.advance();
            self.emit_op_u16(OP_GET_PROPERTY_NO_POP, name);
            self.emit(step);
            self.emit_op_u16(OP_SET_PROPERTY, name);
            self.emit_constant(Value::Number(1.0));
            self.emit(undo);
            self.emit(0);
        } else {
            self.emit_op_u16(OP_GET_PROPERTY, name);
        }
    }

    // ── Operators ───────────────────────────────────────────────────

    fn unary(&mut self) {
        let negate = self.previous.is(Token::Minus);
        self.parse_precedence(Precedence::Unary);
        self.emit(if negate { OP_NEGATE } else { OP_NOT });
    }

    fn binary(&mut self) {
        let Kind::Tok(token) = self.previous.kind else {
            return;
        };
        let precedence = infix_precedence(self.previous.kind);
        self.parse_precedence(precedence.next());

        use Token::*;
        let (op, operand) = match token {
            BangEqual => (OP_EQUAL, Some(OP_NOT)),
            EqualEqual => (OP_EQUAL, None),
            Greater => (OP_GREATER, None),
            GreaterEqual => (OP_LESS, Some(OP_NOT)),
            Less => (OP_LESS, None),
            LessEqual => (OP_GREATER, Some(OP_NOT)),
            ShiftLeft => (OP_SHIFT_LEFT, None),
            ShiftRight => (OP_SHIFT_RIGHT, None),
            BitAnd => (OP_BITWISE_AND, None),
            BitOr => (OP_BITWISE_OR, None),
            In => (OP_IN, None),
            Plus => (OP_ADD, Some(0)),
            Minus => (OP_SUBTRACT, Some(0)),
            Star => (OP_MULTIPLY, Some(0)),
            Slash => (OP_DIVIDE, Some(0)),
            Percent => (OP_MOD, Some(0)),
            Pow => (OP_POW, Some(0)),
            DotPlus => (OP_ADD, Some(1)),
            DotMinus => (OP_SUBTRACT, Some(1)),
            DotStar => (OP_MULTIPLY, Some(1)),
            DotSlash => (OP_DIVIDE, Some(1)),
            DotPercent => (OP_MOD, Some(1)),
            DotPow => (OP_POW, Some(1)),
            _ => return,
        };
        // The second byte is either a trailing NOT or the elementwise flag.
        self.emit(op);
        if let Some(byte) = operand {
            self.emit(byte);
        }
    }

    /// `a..b`, `a...b` and the stepped `a..step..b`.
    fn expand(&mut self) {
        let mut exclusive = self.previous.is(Token::ExpandEx);
        self.parse_precedence(Precedence::Unary);
        if self.match_token(Token::ExpandIn) || self.match_token(Token::ExpandEx) {
            exclusive = self.previous.is(Token::ExpandEx);
            self.parse_precedence(Precedence::Unary);
        } else {
            self.emit(OP_NULL);
        }
        self.emit(OP_EXPAND);
        self.emit(exclusive as u8);
    }

    fn is(&mut self) {
        let negated = self.match_token(Token::Bang);
        let type_name = match self.current.kind {
            Kind::Tok(Token::Identifier | Token::Null | Token::Func | Token::Class | Token::Enum) => {
                self.advance();
                self.previous_text()
            }
            _ => {
                self.error_at_current("Expected type name after 'is'.");
                return;
            }
        };
        let constant = self.identifier_constant(type_name);
        self.emit(OP_IS);
        self.emit(negated as u8);
        self.emit_u16(constant);
    }

    // ── Literals ────────────────────────────────────────────────────

    fn number(&mut self) {
        let text = self.previous_text();
        let value = match self.previous.kind {
            Kind::Tok(Token::Nan) => Some(f64::NAN),
            Kind::Tok(Token::Inf) => Some(f64::INFINITY),
            _ => match text.strip_prefix("0x") {
                Some(hex) => i64::from_str_radix(hex, 16).ok().map(|n| n as f64),
                None => text.parse::<f64>().ok(),
            },
        };
        match value {
            Some(n) => self.emit_constant(Value::Number(n)),
            None => self.error("Invalid number."),
        }
    }

    /// String literal. Each `${name}` becomes a separate piece and the
    /// pieces are joined at runtime by `STRING`.
    fn string(&mut self) {
        let text = self.previous_text();
        let body = &text[1..text.len() - 1];
        let mut buffer = String::new();
        let mut pieces: usize = 0;
        let mut chars = body.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('n') => buffer.push('\n'),
                    Some('r') => buffer.push('\r'),
                    Some('t') => buffer.push('\t'),
                    Some('b') => buffer.push('\u{8}'),
                    Some('v') => buffer.push('\u{b}'),
                    Some('$') => buffer.push('$'),
                    Some('\\') => buffer.push('\\'),
                    Some(other) => {
                        buffer.push('\\');
                        buffer.push(other);
                    }
                    None => buffer.push('\\'),
                },
                '$' if chars.peek() == Some(&'{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        self.error("Invalid identifier end in string.");
                        return;
                    }
                    if !is_identifier(&name) {
                        self.error("Invalid identifier in string.");
                        return;
                    }
                    if !buffer.is_empty() {
                        let piece = self.heap.intern_value(&buffer);
                        self.emit_constant(piece);
                        buffer.clear();
                        pieces += 1;
                    }
                    self.named_variable(&name, false);
                    pieces += 1;
                }
                _ => buffer.push(c),
            }
        }

        if pieces == 0 {
            let value = self.heap.intern_value(&buffer);
            self.emit_constant(value);
            return;
        }
        if !buffer.is_empty() {
            let piece = self.heap.intern_value(&buffer);
            self.emit_constant(piece);
            pieces += 1;
        }
        if pieces > u16::MAX as usize {
            self.error("Too many interpolations in string.");
            return;
        }
        self.emit_op_u16(OP_STRING, pieces as u16);
    }

    fn list(&mut self) {
        self.emit(OP_NEW_LIST);
        while !self.check(Token::RightBracket) && !self.at_end() {
            self.expression();
            self.emit(OP_ADD_LIST);
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        self.consume(Token::RightBracket, "Expected closing ']'");
    }

    fn dict(&mut self) {
        self.emit(OP_NEW_DICT);
        while !self.check(Token::RightBrace) && !self.at_end() {
            self.parse_precedence(Precedence::Unary);
            self.consume(Token::Colon, "Expected ':'");
            self.expression();
            self.emit(OP_ADD_DICT);
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        self.consume(Token::RightBrace, "Expected closing '}'");
    }

    // ── Classes ─────────────────────────────────────────────────────

    fn super_(&mut self) {
        match self.classes.last() {
            None => self.error("Cannot use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Cannot use 'super' in a class with no superclass.")
            }
            Some(_) => {}
        }

        self.consume(Token::Dot, "Expect '.' after 'super'.");
        self.consume(Token::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous_text());

        self.named_variable("this", false);
        if self.match_token(Token::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit(OP_SUPER);
            self.emit(argc);
            self.emit_u16(name);
        } else {
            self.named_variable("super", false);
            self.emit_op_u16(OP_GET_SUPER, name);
        }
    }

    fn this_(&mut self) {
        let receiver = std::iter::once(self.fs.kind)
            .chain(self.enclosing.iter().rev().map(|s| s.kind))
            .find(|k| k.has_receiver() || *k == FunctionKind::Static);

        match receiver {
            Some(FunctionKind::Static) => {
                self.error("Cannot use 'this' inside a static method.");
                return;
            }
            Some(FunctionKind::Extension) => {}
            _ if self.classes.is_empty() => {
                self.error("Cannot use 'this' outside of a class.");
                return;
            }
            _ => {}
        }
        self.named_variable("this", false);
    }

    // ── Tasks ───────────────────────────────────────────────────────

    /// `async f(a, b)` wraps the call in a hidden zero-argument function and
    /// hands it to `ASYNC`, which runs it as a new task.
    fn async_(&mut self) {
        self.consume(Token::Identifier, "Expect a function call in async.");
        let callee = self.previous_text();

        self.push_function(FunctionKind::Function, Some(callee.to_string()));
        self.begin_scope();
        self.named_variable(callee, false);
        self.consume(Token::LeftParen, "Expect a function call in async.");
        let argc = self.argument_list();
        self.emit(OP_CALL);
        self.emit(argc);
        self.emit(OP_RETURN);
        self.end_function();

        self.emit(OP_ASYNC);
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
