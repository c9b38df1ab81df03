use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diagnostics::TemplateError;

pub const CONFIG_FILE: &str = "tessera.toml";

/// Options shared by every template compiled through one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentOptions {
    pub debug: bool,
    pub charset: String,
    pub strict_variables: bool,
    pub autoescape: Autoescape,
    /// Defaults to `debug` when unset.
    pub auto_reload: Option<bool>,
    pub optimizations: bool,
    /// Directories searched by the CLI when no explicit loader is given.
    pub template_paths: Vec<PathBuf>,
    pub lexer: LexerOptions,
    pub sandbox: Option<SandboxConfig>,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            debug: false,
            charset: "UTF-8".to_string(),
            strict_variables: false,
            autoescape: Autoescape::default(),
            auto_reload: None,
            optimizations: true,
            template_paths: Vec::new(),
            lexer: LexerOptions::default(),
            sandbox: None,
        }
    }
}

impl EnvironmentOptions {
    pub fn auto_reload(&self) -> bool {
        self.auto_reload.unwrap_or(self.debug)
    }
}

/// `autoescape = false`, `autoescape = "html"`, or `autoescape = "name"` to guess from the file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Autoescape {
    Enabled(bool),
    Strategy(String),
}

impl Default for Autoescape {
    fn default() -> Self {
        Self::Strategy("html".to_string())
    }
}

impl Autoescape {
    /// The strategy to apply to a template with the given name, or None when escaping is off.
    pub fn strategy_for(&self, template_name: &str) -> Option<String> {
        match self {
            Self::Enabled(false) => None,
            Self::Enabled(true) => Some("html".to_string()),
            Self::Strategy(s) if s == "name" => guess_strategy(template_name),
            Self::Strategy(s) => Some(s.clone()),
        }
    }
}

/// Strategy from the file extension, ignoring a trailing `.twig`-style template suffix.
pub fn guess_strategy(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let mut parts: Vec<&str> = file.split('.').skip(1).collect();
    if parts.last().is_some_and(|ext| matches!(*ext, "tss" | "tpl" | "twig")) {
        parts.pop();
    }
    match parts.last().copied() {
        Some("js") | Some("json") => Some("js".to_string()),
        Some("css") => Some("css".to_string()),
        Some("txt") => None,
        _ => Some("html".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LexerOptions {
    pub tag_comment: (String, String),
    pub tag_block: (String, String),
    pub tag_variable: (String, String),
    pub whitespace_trim: String,
    pub whitespace_line_trim: String,
    pub whitespace_line_chars: String,
    pub interpolation: (String, String),
}

impl Default for LexerOptions {
    fn default() -> Self {
        let pair = |a: &str, b: &str| (a.to_string(), b.to_string());
        Self {
            tag_comment: pair("{#", "#}"),
            tag_block: pair("{%", "%}"),
            tag_variable: pair("{{", "}}"),
            whitespace_trim: "-".to_string(),
            whitespace_line_trim: "~".to_string(),
            whitespace_line_chars: " \t\0\x0B".to_string(),
            interpolation: pair("#{", "}"),
        }
    }
}

impl LexerOptions {
    fn validate(&self, path: &Path) -> Result<(), TemplateError> {
        let delimiters = [
            ("tag_comment", &self.tag_comment),
            ("tag_block", &self.tag_block),
            ("tag_variable", &self.tag_variable),
            ("interpolation", &self.interpolation),
        ];
        for (key, (open, close)) in delimiters {
            if open.is_empty() || close.is_empty() {
                return Err(TemplateError::config(
                    format!("lexer.{key}: delimiters must not be empty"),
                    path.to_path_buf(),
                ));
            }
        }
        for (key, marker) in [("whitespace_trim", &self.whitespace_trim), ("whitespace_line_trim", &self.whitespace_line_trim)] {
            if marker.chars().count() != 1 {
                return Err(TemplateError::config(
                    format!("lexer.{key}: expected a single character, got {marker:?}"),
                    path.to_path_buf(),
                ));
            }
        }
        Ok(())
    }
}

/// Allow-lists consulted by the sandbox policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Sandbox every template, not only `{% sandbox %}` sections and sandboxed includes.
    pub sandboxed: bool,
    pub allowed_tags: Vec<String>,
    pub allowed_filters: Vec<String>,
    pub allowed_functions: Vec<String>,
    /// Class name -> method names. Matching is case-insensitive.
    pub allowed_methods: BTreeMap<String, Vec<String>>,
    pub allowed_properties: BTreeMap<String, Vec<String>>,
}

pub fn parse(content: &str, path: &Path) -> Result<EnvironmentOptions, TemplateError> {
    let options: EnvironmentOptions = toml::from_str(content).map_err(|e| {
        TemplateError::config(format!("{CONFIG_FILE}: invalid syntax: {e}"), path.to_path_buf())
    })?;
    options.lexer.validate(path)?;
    if options.charset.trim().is_empty() {
        return Err(TemplateError::config("charset must not be empty", path.to_path_buf()));
    }
    Ok(options)
}

pub fn load(path: &Path) -> Result<EnvironmentOptions, TemplateError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TemplateError::config(format!("{CONFIG_FILE}: could not read file: {e}"), path.to_path_buf())
    })?;
    parse(&content, path)
}

/// Walk from `start_dir` up to a `.git` directory or the filesystem root looking for `tessera.toml`.
pub fn discover(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir.join(".git").exists() || !dir.pop() {
            return None;
        }
    }
}
