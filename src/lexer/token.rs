use std::fmt;

use logos::Logos;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Text,
    BlockStart,
    BlockEnd,
    VarStart,
    VarEnd,
    Name,
    Number,
    String,
    Operator,
    Punctuation,
    InterpolationStart,
    InterpolationEnd,
    Arrow,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let english = match self {
            TokenKind::Text => "text",
            TokenKind::BlockStart => "begin of statement block",
            TokenKind::BlockEnd => "end of statement block",
            TokenKind::VarStart => "begin of print statement",
            TokenKind::VarEnd => "end of print statement",
            TokenKind::Name => "name",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Operator => "operator",
            TokenKind::Punctuation => "punctuation",
            TokenKind::InterpolationStart => "begin of string interpolation",
            TokenKind::InterpolationEnd => "end of string interpolation",
            TokenKind::Arrow => "arrow function",
            TokenKind::Eof => "end of template",
        };
        f.write_str(english)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, line: usize) -> Self {
        Self { kind, value: value.into(), line }
    }

    /// True when the kind matches and, if `values` is non-empty, the value is one of them.
    pub fn test(&self, kind: TokenKind, values: &[&str]) -> bool {
        self.kind == kind && (values.is_empty() || values.contains(&self.value.as_str()))
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.value)
    }
}

/// Atoms recognised inside `{{ }}` / `{% %}`. Scanned one at a time from the cursor;
/// operators and delimiters are matched by the lexer's option-driven regexes first.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
pub enum Lexeme {
    #[regex(r"[ \t\r\n\x0B\x0C]+")]
    Whitespace,

    #[token("=>")]
    Arrow,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name,

    #[regex(r"[0-9]+(_[0-9]+)*")]
    Int,

    #[regex(r"[0-9]+(_[0-9]+)*\.[0-9]+(_[0-9]+)*([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+(_[0-9]+)*[eE][+-]?[0-9]+")]
    Float,

    // Strings containing `#` are lexed piecewise for interpolation.
    #[regex(r#""([^#"\\]|\\.)*""#)]
    DoubleQuoted,

    #[regex(r#"'([^'\\]|\\.)*'"#)]
    SingleQuoted,

    #[token("\"")]
    Quote,

    #[regex(r"[()\[\]{}?:.,|]")]
    #[token("?:")]
    Punctuation,
}

/// Scan the single atom at the start of `rest`.
pub fn scan_atom(rest: &str) -> Option<(Lexeme, &str)> {
    let mut lexer = Lexeme::lexer(rest);
    match lexer.next() {
        Some(Ok(lexeme)) if lexer.span().start == 0 => Some((lexeme, lexer.slice())),
        _ => None,
    }
}

/// Resolve C-style escapes in a quoted string body.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('v') => out.push('\x0B'),
            Some('f') => out.push('\x0C'),
            Some('e') => out.push('\x1B'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let mut hex = String::new();
                while hex.len() < 2 && chars.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    hex.extend(chars.next());
                }
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push('x'),
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
