use std::io::IsTerminal;
use std::path::PathBuf;

use thiserror::Error;

use crate::source::Source;

#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("{}", located(msg, *line, origin.as_ref()))]
    Syntax { msg: String, line: Option<usize>, origin: Option<Source> },

    #[error("{}", located(msg, *line, origin.as_ref()))]
    Security { msg: String, line: Option<usize>, origin: Option<Source> },

    #[error("{}", located(msg, *line, origin.as_ref()))]
    Runtime { msg: String, line: Option<usize>, origin: Option<Source> },

    #[error("{msg}")]
    Loader { msg: String },

    #[error("{msg}")]
    Logic { msg: String },

    #[error("Config error: {msg}")]
    Config { msg: String, path: PathBuf },
}

impl TemplateError {
    pub fn syntax(msg: impl Into<String>, line: usize, source: &Source) -> Self {
        Self::Syntax { msg: msg.into(), line: Some(line), origin: Some(source.clone()) }
    }

    /// A syntax error raised away from the token stream; the parser fills in the location.
    pub fn syntax_unlocated(msg: impl Into<String>) -> Self {
        Self::Syntax { msg: msg.into(), line: None, origin: None }
    }

    pub fn security(msg: impl Into<String>, line: Option<usize>, source: Option<&Source>) -> Self {
        Self::Security { msg: msg.into(), line, origin: source.cloned() }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime { msg: msg.into(), line: None, origin: None }
    }

    pub fn runtime_at(msg: impl Into<String>, line: usize, source: &Source) -> Self {
        Self::Runtime { msg: msg.into(), line: Some(line), origin: Some(source.clone()) }
    }

    pub fn loader(msg: impl Into<String>) -> Self {
        Self::Loader { msg: msg.into() }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic { msg: msg.into() }
    }

    pub fn config(msg: impl Into<String>, path: PathBuf) -> Self {
        Self::Config { msg: msg.into(), path }
    }

    /// The raw message, without location.
    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { msg, .. }
            | Self::Security { msg, .. }
            | Self::Runtime { msg, .. }
            | Self::Loader { msg }
            | Self::Logic { msg }
            | Self::Config { msg, .. } => msg,
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. } | Self::Security { line, .. } | Self::Runtime { line, .. } => *line,
            _ => None,
        }
    }

    pub fn origin(&self) -> Option<&Source> {
        match self {
            Self::Syntax { origin, .. } | Self::Security { origin, .. } | Self::Runtime { origin, .. } => {
                origin.as_ref()
            }
            _ => None,
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security { .. })
    }

    pub fn is_loader(&self) -> bool {
        matches!(self, Self::Loader { .. })
    }

    /// Fill in whichever of line and source the error does not carry yet.
    pub fn with_location_if_missing(mut self, at_line: usize, source: &Source) -> Self {
        if let Self::Syntax { line, origin, .. }
        | Self::Security { line, origin, .. }
        | Self::Runtime { line, origin, .. } = &mut self
        {
            if line.is_none() {
                *line = Some(at_line);
            }
            if origin.is_none() {
                *origin = Some(source.clone());
            }
        }
        self
    }

    /// Replace the location unconditionally; used when a runtime failure is attributed to a tag.
    pub fn relocate(mut self, at_line: usize, source: &Source) -> Self {
        if let Self::Syntax { line, origin, .. }
        | Self::Security { line, origin, .. }
        | Self::Runtime { line, origin, .. } = &mut self
        {
            *line = Some(at_line);
            *origin = Some(source.clone());
        }
        self
    }

    pub fn append_message(mut self, suffix: &str) -> Self {
        match &mut self {
            Self::Syntax { msg, .. }
            | Self::Security { msg, .. }
            | Self::Runtime { msg, .. }
            | Self::Loader { msg }
            | Self::Logic { msg }
            | Self::Config { msg, .. } => msg.push_str(suffix),
        }
        self
    }

    /// Append a bounded "Did you mean" list built from `candidates`.
    pub fn with_suggestions<'a>(self, name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Self {
        match suggest(name, candidates) {
            Some(hint) => self.append_message(&format!(" {hint}")),
            None => self,
        }
    }
}

fn located(msg: &str, line: Option<usize>, origin: Option<&Source>) -> String {
    let (body, tail) = match msg.chars().last() {
        Some(c @ ('.' | '?')) => (&msg[..msg.len() - 1], Some(c)),
        _ => (msg, None),
    };
    let mut out = body.to_string();
    if let Some(source) = origin {
        out.push_str(&format!(" in \"{}\"", source.name()));
    }
    if let Some(line) = line.filter(|line| *line > 0) {
        out.push_str(&format!(" at line {line}"));
    }
    if let Some(c) = tail {
        out.push(c);
    }
    out
}

const MAX_SUGGESTIONS: usize = 5;

/// Names close to `name`: edit distance within a third of its length, or containing it.
pub fn alternatives<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut found: Vec<(usize, &str)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance = levenshtein(name, candidate);
            (distance <= name.len() / 3 || candidate.contains(name)).then_some((distance, candidate))
        })
        .collect();
    found.sort();
    found.dedup_by(|a, b| a.1 == b.1);
    found.into_iter().take(MAX_SUGGESTIONS).map(|(_, c)| c.to_string()).collect()
}

pub fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let found = alternatives(name, candidates);
    if found.is_empty() {
        return None;
    }
    Some(format!("Did you mean \"{}\"?", found.join("\", \"")))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b.len()]
}

/// Render an error as an ariadne report.
pub fn report(err: &TemplateError, color: bool) -> String {
    use ariadne::{Config, Label, Report, ReportKind};

    let (Some(line), Some(origin)) = (err.line(), err.origin()) else {
        return format!("error: {err}\n");
    };
    let kind = match err {
        TemplateError::Syntax { .. } => "syntax",
        TemplateError::Security { .. } => "security",
        _ => "runtime",
    };
    let range = origin.line_range(line);
    let mut out = Vec::new();
    let written = Report::build(ReportKind::Error, origin.name(), range.start)
        .with_config(Config::default().with_color(color))
        .with_message(format!("{kind} error"))
        .with_label(Label::new((origin.name(), range)).with_message(err.message()))
        .finish()
        .write((origin.name(), ariadne::Source::from(origin.code())), &mut out);
    match written {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => format!("error: {err}\n"),
    }
}

/// Render a TemplateError with ariadne for nice terminal output.
pub fn render_error(err: &TemplateError) {
    match err {
        TemplateError::Config { msg, path } => {
            eprintln!("error[config]: {msg}");
            eprintln!("  --> {}", path.display());
        }
        _ => eprint!("{}", report(err, std::io::stderr().is_terminal())),
    }
}
