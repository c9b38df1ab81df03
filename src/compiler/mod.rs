//! Turns a [`ModuleNode`] into Rust source text for the runtime facade.
//!
//! Rendering walks the AST directly; the generated text is what gets cached,
//! inspected with `tessera compile`, and mapped back to template lines through the
//! debug map when an error points into it.

mod emit;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::environment::Environment;
use crate::parser::ast::{Literal, ModuleNode};

pub use emit::Compile;

/// The output of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub class_name: String,
    pub template_name: String,
    pub code: String,
    /// Generated line to template line, one entry per `// line N` marker.
    pub debug_info: BTreeMap<usize, usize>,
}

impl CompiledUnit {
    /// Template line for a line of the generated code.
    pub fn template_line(&self, generated_line: usize) -> Option<usize> {
        self.debug_info.range(..=generated_line).next_back().map(|(_, line)| *line)
    }
}

pub struct Compiler<'env> {
    env: &'env Environment,
    buf: String,
    indent: usize,
    /// Line of the last node that got a `// line` marker.
    last_line: Option<usize>,
    /// Generated line at `source_offset`, 1-based.
    source_line: usize,
    source_offset: usize,
    debug_info: BTreeMap<usize, usize>,
    var_salt: usize,
}

impl<'env> Compiler<'env> {
    pub fn new(env: &'env Environment) -> Self {
        Self {
            env,
            buf: String::new(),
            indent: 0,
            last_line: None,
            source_line: 1,
            source_offset: 0,
            debug_info: BTreeMap::new(),
            var_salt: 0,
        }
    }

    pub fn env(&self) -> &'env Environment {
        self.env
    }

    pub fn compile(&mut self, module: &ModuleNode) -> CompiledUnit {
        self.reset();
        let class_name = self.env.template_class(module.name(), module.index);
        emit::module(self, module, &class_name);
        debug!(template = module.name(), class = %class_name, bytes = self.buf.len(), "compiled template");
        CompiledUnit {
            class_name,
            template_name: module.name().to_string(),
            code: std::mem::take(&mut self.buf),
            debug_info: std::mem::take(&mut self.debug_info),
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.indent = 0;
        self.last_line = None;
        self.source_line = 1;
        self.source_offset = 0;
        self.debug_info.clear();
        self.var_salt = 0;
    }

    pub fn source(&self) -> &str {
        &self.buf
    }

    /// Append a string verbatim.
    pub fn raw(&mut self, s: &str) -> &mut Self {
        self.buf.push_str(s);
        self
    }

    /// Append a string after the current indentation.
    pub fn write(&mut self, s: &str) -> &mut Self {
        for _ in 0..self.indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(s);
        self
    }

    /// Append a quoted, escaped string literal.
    pub fn string(&mut self, s: &str) -> &mut Self {
        self.buf.push_str(&format!("{s:?}"));
        self
    }

    /// Append a literal in target syntax.
    pub fn repr(&mut self, literal: &Literal) -> &mut Self {
        let text = match literal {
            Literal::Null => "Value::Null".to_string(),
            Literal::Bool(b) => format!("Value::Bool({b})"),
            Literal::Int(n) => format!("Value::Int({n})"),
            Literal::Float(n) => format!("Value::Float({n:?})"),
            Literal::Str(s) => format!("Value::from({s:?})"),
        };
        self.buf.push_str(&text);
        self
    }

    pub fn indent(&mut self) -> &mut Self {
        self.indent += 1;
        self
    }

    /// # Panics
    ///
    /// When the indentation would become negative.
    pub fn outdent(&mut self) -> &mut Self {
        assert!(self.indent > 0, "Unable to call outdent() as the indentation would become negative.");
        self.indent -= 1;
        self
    }

    pub fn var_name(&mut self) -> String {
        let name = format!("__internal_compile_{}", self.var_salt);
        self.var_salt += 1;
        name
    }

    /// Emit a `// line N` marker when the template line changed since the last one.
    pub fn add_debug_info(&mut self, line: usize) -> &mut Self {
        if self.last_line == Some(line) {
            return self;
        }
        self.write(&format!("// line {line}\n"));
        self.source_line += self.buf[self.source_offset..].matches('\n').count();
        self.source_offset = self.buf.len();
        self.debug_info.insert(self.source_line, line);
        self.last_line = Some(line);
        self
    }

    pub fn subcompile<T: Compile + ?Sized>(&mut self, item: &T) -> &mut Self {
        item.compile(self);
        self
    }
}
