pub mod source_map;

use logos::Logos;

pub use source_map::SourceMap;

#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"#![^\n]*", allow_greedy = true))]
#[logos(skip r"//([^?\n][^\n]*)?")]
#[logos(skip r"/\*([^?*]([^*]|\*+[^*/])*)?\*+/")]
pub enum Token {
    // Single-character punctuation
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("@")]
    Lambda,

    // Arithmetic and assignment
    #[token("-")]
    Minus,
    #[token("-=")]
    MinusEqual,
    #[token("--")]
    Dec,
    #[token("+")]
    Plus,
    #[token("+=")]
    PlusEqual,
    #[token("++")]
    Inc,
    #[token("/")]
    Slash,
    #[token("/=")]
    SlashEqual,
    #[token("*")]
    Star,
    #[token("*=")]
    StarEqual,
    #[token("%")]
    Percent,
    #[token("%=")]
    PercentEqual,
    #[token("^")]
    Pow,
    #[token("^=")]
    PowEqual,

    // Element-wise list operators
    #[token(".+")]
    DotPlus,
    #[token(".-")]
    DotMinus,
    #[token(".*")]
    DotStar,
    #[token("./")]
    DotSlash,
    #[token(".%")]
    DotPercent,
    #[token(".^")]
    DotPow,

    // Ranges
    #[token("..")]
    ExpandIn,
    #[token("...")]
    ExpandEx,

    // Comparison, logic, bits
    #[token("!")]
    #[token("not")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token("<<")]
    ShiftLeft,
    #[token(">>")]
    ShiftRight,
    #[token("&")]
    BitAnd,
    #[token("|")]
    BitOr,
    #[token("&&")]
    #[token("and")]
    And,
    #[token("||")]
    #[token("or")]
    Or,

    // Literals
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,
    #[regex(r#""[^"]*""#, allow_greedy = true)]
    #[regex(r"'[^']*'", allow_greedy = true)]
    String,
    #[regex(r#""[^"]*"#, allow_greedy = true)]
    #[regex(r"'[^']*", allow_greedy = true)]
    UnterminatedString,
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
    #[regex(r"0x[0-9a-fA-F]+")]
    Number,
    #[regex(r"//\?[^\n]*", allow_greedy = true)]
    #[regex(r"/\*\?([^*]|\*+[^*/])*\*+/")]
    Doc,

    // Keywords
    #[token("abort")]
    Abort,
    #[token("as")]
    As,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("break")]
    Break,
    #[token("case")]
    Case,
    #[token("catch")]
    Catch,
    #[token("class")]
    Class,
    #[token("continue")]
    Continue,
    #[token("default")]
    Default,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("enum")]
    Enum,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("func")]
    Func,
    #[token("global")]
    Global,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("inf")]
    Inf,
    #[token("is")]
    Is,
    #[token("nan")]
    Nan,
    #[token("null")]
    Null,
    #[token("pass")]
    Pass,
    #[token("require")]
    Require,
    #[token("return")]
    Return,
    #[token("static")]
    Static,
    #[token("super")]
    Super,
    #[token("switch")]
    Switch,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("try")]
    Try,
    #[token("var")]
    Var,
    #[token("while")]
    While,
}

/// What the compiler sees: a real token, a lexing error, or end of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Tok(Token),
    Error,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lexeme {
    pub kind: Kind,
    pub start: usize,
    pub end: usize,
    pub line: u32,
    /// Set for [`Kind::Error`].
    pub message: Option<&'static str>,
}

impl Lexeme {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    pub fn is(&self, token: Token) -> bool {
        self.kind == Kind::Tok(token)
    }
}

/// Lex the whole source. Never fails: bad input becomes [`Kind::Error`]
/// lexemes so the compiler can report them in order and keep going. The
/// last lexeme is always [`Kind::Eof`].
pub fn lex(source: &str) -> Vec<Lexeme> {
    let map = SourceMap::new(source);
    let mut lexer = Token::lexer(source);
    let mut out = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let line = map.line(span.start);
        let (kind, message) = match result {
            Ok(Token::UnterminatedString) => (Kind::Error, Some("Unterminated string.")),
            Ok(token) => (Kind::Tok(token), None),
            Err(()) => (Kind::Error, Some("Unexpected character.")),
        };
        out.push(Lexeme { kind, start: span.start, end: span.end, line, message });
    }

    let end = source.len();
    out.push(Lexeme {
        kind: Kind::Eof,
        start: end,
        end,
        line: map.line_count() as u32,
        message: None,
    });
    out
}

/// Text of a doc comment with the comment markers removed.
pub fn doc_text(raw: &str) -> &str {
    let body = if let Some(rest) = raw.strip_prefix("//?") {
        rest
    } else {
        raw.strip_prefix("/*?").and_then(|r| r.strip_suffix("*/")).unwrap_or(raw)
    };
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Kind> {
        lex(source).into_iter().map(|l| l.kind).collect()
    }

    use Kind::Tok;

    #[test]
    fn lex_var_declaration() {
        assert_eq!(
            kinds("var x = 1 + 2;"),
            vec![
                Tok(Token::Var),
                Tok(Token::Identifier),
                Tok(Token::Equal),
                Tok(Token::Number),
                Tok(Token::Plus),
                Tok(Token::Number),
                Tok(Token::Semicolon),
                Kind::Eof
            ]
        );
    }

    #[test]
    fn keywords_do_not_swallow_identifiers() {
        let lexemes = lex("format in inside isx is");
        assert_eq!(lexemes[0].kind, Tok(Token::Identifier));
        assert_eq!(lexemes[1].kind, Tok(Token::In));
        assert_eq!(lexemes[2].kind, Tok(Token::Identifier));
        assert_eq!(lexemes[3].kind, Tok(Token::Identifier));
        assert_eq!(lexemes[4].kind, Tok(Token::Is));
    }

    #[test]
    fn word_operators_alias_symbols() {
        assert_eq!(kinds("not a and b or c")[0], Tok(Token::Bang));
        assert_eq!(kinds("a && b")[1], Tok(Token::And));
        assert_eq!(kinds("a or b")[1], Tok(Token::Or));
    }

    #[test]
    fn ranges_and_dot_operators() {
        assert_eq!(
            kinds("1..5 1...5 a .+ b"),
            vec![
                Tok(Token::Number),
                Tok(Token::ExpandIn),
                Tok(Token::Number),
                Tok(Token::Number),
                Tok(Token::ExpandEx),
                Tok(Token::Number),
                Tok(Token::Identifier),
                Tok(Token::DotPlus),
                Tok(Token::Identifier),
                Kind::Eof
            ]
        );
        assert_eq!(kinds("2.5")[0], Tok(Token::Number));
    }

    #[test]
    fn comments_are_skipped_but_docs_are_kept() {
        let src = "// plain\n/* block */ var /*? doc block */ //? line doc\nx";
        let lexemes = lex(src);
        let ks: Vec<Kind> = lexemes.iter().map(|l| l.kind).collect();
        assert_eq!(
            ks,
            vec![Tok(Token::Var), Tok(Token::Doc), Tok(Token::Doc), Tok(Token::Identifier), Kind::Eof]
        );
        assert_eq!(doc_text(lexemes[1].text(src)), "doc block");
        assert_eq!(doc_text(lexemes[2].text(src)), "line doc");
    }

    #[test]
    fn strings_in_both_quote_styles() {
        let src = "\"double\" 'single'";
        let lexemes = lex(src);
        assert_eq!(lexemes[0].kind, Tok(Token::String));
        assert_eq!(lexemes[0].text(src), "\"double\"");
        assert_eq!(lexemes[1].text(src), "'single'");
    }

    #[test]
    fn errors_become_lexemes() {
        let lexemes = lex("var s = \"open");
        let last = lexemes[lexemes.len() - 2];
        assert_eq!(last.kind, Kind::Error);
        assert_eq!(last.message, Some("Unterminated string."));

        let lexemes = lex("a $ b");
        assert_eq!(lexemes[1].kind, Kind::Error);
        assert_eq!(lexemes[1].message, Some("Unexpected character."));
        assert_eq!(lexemes[2].kind, Tok(Token::Identifier));
    }

    #[test]
    fn lines_are_tracked() {
        let lexemes = lex("a\nb\n\nc");
        let lines: Vec<u32> = lexemes.iter().map(|l| l.line).collect();
        assert_eq!(lines, vec![1, 2, 4, 4]);
    }
}
