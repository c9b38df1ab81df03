pub mod stream;
pub mod token;

pub use stream::TokenStream;
pub use token::{Token, TokenKind};

use regex::Regex;
use tracing::trace;

use crate::config::LexerOptions;
use crate::diagnostics::TemplateError;
use crate::source::Source;
use token::{scan_atom, unescape, Lexeme};

const WHITESPACE: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Block,
    Var,
    String,
    Interpolation,
}

/// Delimiter and operator regexes derived from `LexerOptions` and the operator table.
#[derive(Debug)]
pub struct Lexer {
    options: LexerOptions,
    tokens_start: Regex,
    var_end: Regex,
    block_end: Regex,
    comment_end: Regex,
    verbatim_start: Regex,
    verbatim_end: Regex,
    line_directive: Regex,
    interpolation_start: Regex,
    interpolation_end: Regex,
    operator: Option<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, TemplateError> {
    Regex::new(pattern).map_err(|e| TemplateError::logic(format!("Invalid lexer pattern {pattern:?}: {e}")))
}

impl Lexer {
    pub fn new<'a>(options: &LexerOptions, operators: impl IntoIterator<Item = &'a str>) -> Result<Self, TemplateError> {
        let q = |s: &str| regex::escape(s);
        let trim = q(&options.whitespace_trim);
        let line_trim = q(&options.whitespace_line_trim);
        let line_chars = regex::escape(&options.whitespace_line_chars);
        let end_of = |close: &str, swallow_newline: bool| {
            format!(
                r"(?:{trim}{c}\s*|{line_trim}{c}[{line_chars}]*|{c}{nl})",
                c = q(close),
                nl = if swallow_newline { r"\n?" } else { "" },
            )
        };
        let block_close = end_of(&options.tag_block.1, true);

        Ok(Self {
            tokens_start: compile(&format!(
                r"({}|{}|{})({trim}|{line_trim})?",
                q(&options.tag_variable.0),
                q(&options.tag_block.0),
                q(&options.tag_comment.0),
            ))?,
            var_end: compile(&format!(r"^\s*{}", end_of(&options.tag_variable.1, false)))?,
            block_end: compile(&format!(r"^\s*{block_close}"))?,
            comment_end: compile(&end_of(&options.tag_comment.1, true))?,
            verbatim_start: compile(&format!(r"^\s*verbatim\s*{}", end_of(&options.tag_block.1, false)))?,
            verbatim_end: compile(&format!(
                r"(?s){}({trim}|{line_trim})?\s*endverbatim\s*{}",
                q(&options.tag_block.0),
                end_of(&options.tag_block.1, false),
            ))?,
            line_directive: compile(&format!(r"^\s*line\s+(\d+)\s*{}", q(&options.tag_block.1)))?,
            interpolation_start: compile(&format!(r"^{}\s*", q(&options.interpolation.0)))?,
            interpolation_end: compile(&format!(r"^\s*{}", q(&options.interpolation.1)))?,
            operator: operator_regex(operators)?,
            options: options.clone(),
        })
    }

    pub fn options(&self) -> &LexerOptions {
        &self.options
    }

    /// Lex a whole template. State is local to the call, so one lexer serves many templates.
    pub fn tokenize(&self, source: &Source) -> Result<TokenStream, TemplateError> {
        let code = source.code();
        let positions = self
            .tokens_start
            .captures_iter(code)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(Delimiter {
                    start: whole.start(),
                    end: whole.end(),
                    open: caps.get(1)?.as_str().to_string(),
                    trim: caps.get(2).map(|m| m.as_str().to_string()),
                })
            })
            .collect();

        let mut run = Run {
            lexer: self,
            source,
            code,
            cursor: 0,
            line: 1,
            tokens: Vec::new(),
            state: State::Data,
            states: Vec::new(),
            brackets: Vec::new(),
            positions,
            position: 0,
            var_block_line: 1,
        };
        run.lex()?;
        Ok(TokenStream::new(run.tokens, source.clone()))
    }
}

/// Alternation of every operator, longest first; alphabetic operators end on a word boundary
/// and internal spaces match any whitespace.
fn operator_regex<'a>(operators: impl IntoIterator<Item = &'a str>) -> Result<Option<Regex>, TemplateError> {
    let mut symbols: Vec<&str> = std::iter::once("=").chain(operators).filter(|s| !s.is_empty()).collect();
    symbols.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    symbols.dedup();
    if symbols.is_empty() {
        return Ok(None);
    }
    let space = compile(r"\s+")?;
    let alternatives: Vec<String> = symbols
        .iter()
        .map(|op| {
            let mut pattern = space.replace_all(&regex::escape(op), r"\s+").into_owned();
            if op.ends_with(|c: char| c.is_ascii_alphabetic()) {
                pattern.push_str(r"\b");
            }
            pattern
        })
        .collect();
    compile(&format!("^(?:{})", alternatives.join("|"))).map(Some)
}

#[derive(Debug)]
struct Delimiter {
    start: usize,
    end: usize,
    open: String,
    trim: Option<String>,
}

struct Run<'l, 's> {
    lexer: &'l Lexer,
    source: &'s Source,
    code: &'s str,
    cursor: usize,
    line: usize,
    tokens: Vec<Token>,
    state: State,
    states: Vec<State>,
    brackets: Vec<(String, usize)>,
    positions: Vec<Delimiter>,
    position: usize,
    var_block_line: usize,
}

impl Run<'_, '_> {
    fn lex(&mut self) -> Result<(), TemplateError> {
        while self.cursor < self.code.len() {
            match self.state {
                State::Data => self.lex_data()?,
                State::Block => self.lex_block()?,
                State::Var => self.lex_var()?,
                State::String => self.lex_string()?,
                State::Interpolation => self.lex_interpolation()?,
            }
        }
        if let Some((expect, line)) = self.brackets.pop() {
            return Err(self.error_at(format!("Unclosed \"{expect}\"."), line));
        }
        match self.state {
            State::Block => return Err(self.error_at("Unclosed \"block\".", self.var_block_line)),
            State::Var => return Err(self.error_at("Unclosed \"variable\".", self.var_block_line)),
            _ => {}
        }
        self.push(TokenKind::Eof, "");
        Ok(())
    }

    fn error(&self, msg: impl Into<String>) -> TemplateError {
        TemplateError::syntax(msg, self.line, self.source)
    }

    fn error_at(&self, msg: impl Into<String>, line: usize) -> TemplateError {
        TemplateError::syntax(msg, line, self.source)
    }

    fn rest(&self) -> &str {
        &self.code[self.cursor..]
    }

    fn push(&mut self, kind: TokenKind, value: impl Into<String>) {
        let value = value.into();
        if kind == TokenKind::Text && value.is_empty() {
            return;
        }
        self.tokens.push(Token::new(kind, value, self.line));
    }

    fn advance(&mut self, len: usize) {
        let moved = &self.code[self.cursor..self.cursor + len];
        self.line += moved.matches('\n').count();
        self.cursor += len;
    }

    fn push_state(&mut self, state: State) {
        trace!(from = ?self.state, to = ?state, line = self.line, "lexer state");
        self.states.push(self.state);
        self.state = state;
    }

    fn pop_state(&mut self) {
        self.state = self.states.pop().unwrap_or(State::Data);
    }

    fn lex_data(&mut self) -> Result<(), TemplateError> {
        let Some(index) = self.positions[self.position..].iter().position(|d| d.start >= self.cursor) else {
            let text = self.rest().to_string();
            self.push(TokenKind::Text, text);
            self.advance(self.code.len() - self.cursor);
            return Ok(());
        };
        self.position += index;
        let delimiter = &self.positions[self.position];
        let (start, end, open) = (delimiter.start, delimiter.end, delimiter.open.clone());
        let trim = delimiter.trim.clone();
        self.position += 1;

        let lexer = self.lexer;
        let options = &lexer.options;
        let raw = &self.code[self.cursor..start];
        let text = match trim.as_deref() {
            Some(marker) if marker == options.whitespace_trim => raw.trim_end_matches(WHITESPACE),
            Some(_) => {
                let chars: Vec<char> = options.whitespace_line_chars.chars().collect();
                raw.trim_end_matches(chars.as_slice())
            }
            None => raw,
        }
        .to_string();
        self.push(TokenKind::Text, text);
        self.advance(end - self.cursor);

        if open == options.tag_comment.0 {
            self.lex_comment()
        } else if open == options.tag_block.0 {
            if let Some(m) = lexer.verbatim_start.find(self.rest()) {
                self.advance(m.end());
                self.lex_verbatim()
            } else if let Some(caps) = lexer.line_directive.captures(self.rest()) {
                let len = caps.get(0).map_or(0, |m| m.end());
                let line = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(self.line);
                self.advance(len);
                self.line = line;
                Ok(())
            } else {
                self.push(TokenKind::BlockStart, "");
                self.push_state(State::Block);
                self.var_block_line = self.line;
                Ok(())
            }
        } else {
            self.push(TokenKind::VarStart, "");
            self.push_state(State::Var);
            self.var_block_line = self.line;
            Ok(())
        }
    }

    fn lex_block(&mut self) -> Result<(), TemplateError> {
        if self.brackets.is_empty() {
            if let Some(end) = self.lexer.block_end.find(self.rest()).map(|m| m.end()) {
                self.push(TokenKind::BlockEnd, "");
                self.advance(end);
                self.pop_state();
                return Ok(());
            }
        }
        self.lex_expression()
    }

    fn lex_var(&mut self) -> Result<(), TemplateError> {
        if self.brackets.is_empty() {
            if let Some(end) = self.lexer.var_end.find(self.rest()).map(|m| m.end()) {
                self.push(TokenKind::VarEnd, "");
                self.advance(end);
                self.pop_state();
                return Ok(());
            }
        }
        self.lex_expression()
    }

    fn lex_comment(&mut self) -> Result<(), TemplateError> {
        match self.lexer.comment_end.find(self.rest()) {
            Some(m) => {
                self.advance(m.end());
                Ok(())
            }
            None => Err(self.error("Unclosed comment.")),
        }
    }

    fn lex_verbatim(&mut self) -> Result<(), TemplateError> {
        let Some(caps) = self.lexer.verbatim_end.captures(self.rest()) else {
            return Err(self.error("Unexpected end of file: Unclosed \"verbatim\" block."));
        };
        let (Some(whole), trim) = (caps.get(0), caps.get(1)) else {
            return Err(self.error("Unexpected end of file: Unclosed \"verbatim\" block."));
        };
        let raw = &self.rest()[..whole.start()];
        let text = match trim.map(|m| m.as_str()) {
            Some(marker) if marker == self.lexer.options.whitespace_trim => raw.trim_end_matches(WHITESPACE),
            Some(_) => {
                let chars: Vec<char> = self.lexer.options.whitespace_line_chars.chars().collect();
                raw.trim_end_matches(chars.as_slice())
            }
            None => raw,
        }
        .to_string();
        let consumed = whole.end();
        self.advance(consumed);
        self.push(TokenKind::Text, text);
        Ok(())
    }

    fn lex_expression(&mut self) -> Result<(), TemplateError> {
        let atom = scan_atom(self.rest()).map(|(lexeme, text)| (lexeme, text.len()));

        if let Some((Lexeme::Whitespace, len)) = atom {
            self.advance(len);
            if self.cursor >= self.code.len() {
                let what = if self.state == State::Block { "block" } else { "variable" };
                return Err(self.error_at(format!("Unclosed \"{what}\"."), self.var_block_line));
            }
            return Ok(());
        }

        if let Some((Lexeme::Arrow, len)) = atom {
            self.push(TokenKind::Arrow, "=>");
            self.advance(len);
            return Ok(());
        }

        if let Some(len) = self.match_operator() {
            let op = self.rest()[..len].split_whitespace().collect::<Vec<_>>().join(" ");
            self.push(TokenKind::Operator, op);
            self.advance(len);
            return Ok(());
        }

        let Some((lexeme, len)) = atom else {
            let c = self.rest().chars().next().unwrap_or_default();
            return Err(self.error(format!("Unexpected character \"{c}\".")));
        };
        let text = self.rest()[..len].to_string();
        match lexeme {
            Lexeme::Name => self.push(TokenKind::Name, text),
            Lexeme::Int | Lexeme::Float => self.push(TokenKind::Number, text.replace('_', "")),
            Lexeme::Punctuation => self.punctuation(&text)?,
            Lexeme::DoubleQuoted | Lexeme::SingleQuoted => {
                self.push(TokenKind::String, unescape(&text[1..text.len() - 1]));
            }
            Lexeme::Quote => {
                self.brackets.push(("\"".to_string(), self.line));
                self.push_state(State::String);
            }
            Lexeme::Whitespace | Lexeme::Arrow => {}
        }
        self.advance(len);
        Ok(())
    }

    fn match_operator(&self) -> Option<usize> {
        let regex = self.lexer.operator.as_ref()?;
        let m = regex.find(self.rest())?;
        if m.as_str().starts_with(|c: char| c.is_ascii_alphabetic())
            && self.code[..self.cursor].ends_with(['.', '|'])
        {
            return None;
        }
        Some(m.end())
    }

    fn punctuation(&mut self, text: &str) -> Result<(), TemplateError> {
        match text {
            "(" | "[" | "{" => self.brackets.push((text.to_string(), self.line)),
            ")" | "]" | "}" => {
                let Some((expect, line)) = self.brackets.pop() else {
                    return Err(self.error(format!("Unexpected \"{text}\".")));
                };
                let closes = matches!((expect.as_str(), text), ("(", ")") | ("[", "]") | ("{", "}"));
                if !closes {
                    return Err(self.error_at(format!("Unclosed \"{expect}\"."), line));
                }
            }
            _ => {}
        }
        self.push(TokenKind::Punctuation, text);
        Ok(())
    }

    fn lex_string(&mut self) -> Result<(), TemplateError> {
        if let Some(end) = self.lexer.interpolation_start.find(self.rest()).map(|m| m.end()) {
            self.brackets.push((self.lexer.options.interpolation.0.clone(), self.line));
            self.push(TokenKind::InterpolationStart, "");
            self.advance(end);
            self.push_state(State::Interpolation);
            return Ok(());
        }
        let part = string_part(self.rest(), &self.lexer.options.interpolation.0);
        if part > 0 {
            let text = unescape(&self.rest()[..part]);
            self.push(TokenKind::String, text);
            self.advance(part);
            return Ok(());
        }
        if self.rest().starts_with('"') {
            if let Some((expect, line)) = self.brackets.pop() {
                if expect != "\"" {
                    return Err(self.error_at(format!("Unclosed \"{expect}\"."), line));
                }
            }
            self.pop_state();
            self.advance(1);
            return Ok(());
        }
        let c = self.rest().chars().next().unwrap_or_default();
        Err(self.error(format!("Unexpected character \"{c}\".")))
    }

    fn lex_interpolation(&mut self) -> Result<(), TemplateError> {
        let open = &self.lexer.options.interpolation.0;
        let in_interpolation = self.brackets.last().is_some_and(|(b, _)| b == open);
        if in_interpolation {
            if let Some(end) = self.lexer.interpolation_end.find(self.rest()).map(|m| m.end()) {
                self.brackets.pop();
                self.push(TokenKind::InterpolationEnd, "");
                self.advance(end);
                self.pop_state();
                return Ok(());
            }
        }
        self.lex_expression()
    }
}

/// Length of the literal run at the start of a double-quoted string body: stops at an
/// unescaped `"` or at an interpolation opener.
fn string_part(rest: &str, interpolation_open: &str) -> usize {
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return i,
            '\\' => {
                chars.next();
            }
            _ if rest[i..].starts_with(interpolation_open) => return i,
            _ => {}
        }
    }
    rest.len()
}
