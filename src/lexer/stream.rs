use std::fmt;

use crate::diagnostics::TemplateError;
use crate::source::Source;

use super::token::{Token, TokenKind};

/// Cursor over a lexed template. The last token is always `Eof`.
#[derive(Debug, Clone)]
pub struct TokenStream {
    tokens: Vec<Token>,
    current: usize,
    source: Source,
}

impl TokenStream {
    pub fn new(mut tokens: Vec<Token>, source: Source) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let line = tokens.last().map_or(1, |t| t.line);
            tokens.push(Token::new(TokenKind::Eof, "", line));
        }
        Self { tokens, current: 0, source }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn current(&self) -> &Token {
        // `new` guarantees a trailing Eof
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    /// Return the current token and advance. Advancing past `Eof` fails.
    pub fn next(&mut self) -> Result<Token, TemplateError> {
        if self.current + 1 >= self.tokens.len() {
            return Err(TemplateError::syntax("Unexpected end of template.", self.current().line, &self.source));
        }
        self.current += 1;
        Ok(self.tokens[self.current - 1].clone())
    }

    pub fn next_if(&mut self, kind: TokenKind, values: &[&str]) -> Result<Option<Token>, TemplateError> {
        if self.test(kind, values) { self.next().map(Some) } else { Ok(None) }
    }

    /// Consume a token of `kind` (and `value`, when given) or fail with a descriptive error.
    pub fn expect(&mut self, kind: TokenKind, value: Option<&str>, message: Option<&str>) -> Result<Token, TemplateError> {
        let token = self.current();
        let values: Vec<&str> = value.into_iter().collect();
        if !token.test(kind, &values) {
            let msg = format!(
                "{}Unexpected token \"{}\"{} (\"{}\" expected{}).",
                message.map(|m| format!("{m}. ")).unwrap_or_default(),
                token.kind,
                if token.value.is_empty() { String::new() } else { format!(" of value \"{}\"", token.value) },
                kind,
                value.map(|v| format!(" with value \"{v}\"")).unwrap_or_default(),
            );
            return Err(TemplateError::syntax(msg, token.line, &self.source));
        }
        self.next()
    }

    /// Peek `n` tokens ahead without moving.
    pub fn look(&self, n: usize) -> Result<&Token, TemplateError> {
        self.tokens.get(self.current + n).ok_or_else(|| {
            let line = self.tokens.last().map_or(1, |t| t.line);
            TemplateError::syntax("Unexpected end of template.", line, &self.source)
        })
    }

    /// The token just before the cursor.
    pub fn previous(&self) -> Option<&Token> {
        self.current.checked_sub(1).and_then(|i| self.tokens.get(i))
    }

    pub fn test(&self, kind: TokenKind, values: &[&str]) -> bool {
        self.current().test(kind, values)
    }

    pub fn is_eof(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    /// Splice tokens in at the cursor; they are read next.
    pub fn inject_tokens(&mut self, tokens: Vec<Token>) {
        let at = self.current;
        self.tokens.splice(at..at, tokens);
    }
}

impl Default for TokenStream {
    fn default() -> Self {
        Self::new(Vec::new(), Source::default())
    }
}

impl fmt::Display for TokenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            writeln!(f, "{token}")?;
        }
        Ok(())
    }
}
