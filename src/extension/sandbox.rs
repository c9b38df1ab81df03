//! Sandboxed rendering of untrusted templates.
//!
//! A [`SandboxPolicy`] whitelists tags, filters, functions, and per-class methods and
//! properties. Templates are checked when they are displayed while the sandbox is
//! enabled, either globally (`sandboxed = true` in the config) or for the duration of a
//! `{% sandbox %}` section or a sandboxed `include()`.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::SandboxConfig;
use crate::diagnostics::TemplateError;
use crate::environment::Environment;
use crate::lexer::token::{Token, TokenKind};
use crate::parser::ast::*;
use crate::parser::tags::TokenParser;
use crate::parser::{is_blank, Parser, Until};
use crate::runtime::TemplateObject;
use crate::source::Source;
use crate::visit::NodeVisitor;

use super::{Extension, VisitorFactory};

#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    tags: BTreeSet<String>,
    filters: BTreeSet<String>,
    functions: BTreeSet<String>,
    /// Lowercased class name to lowercased method names.
    methods: BTreeMap<String, BTreeSet<String>>,
    properties: BTreeMap<String, BTreeSet<String>>,
}

fn lowered(map: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, BTreeSet<String>> {
    map.iter()
        .map(|(class, names)| (class.to_lowercase(), names.iter().map(|n| n.to_lowercase()).collect()))
        .collect()
}

impl SandboxPolicy {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            tags: config.allowed_tags.iter().cloned().collect(),
            filters: config.allowed_filters.iter().cloned().collect(),
            functions: config.allowed_functions.iter().cloned().collect(),
            methods: lowered(&config.allowed_methods),
            properties: lowered(&config.allowed_properties),
        }
    }

    /// Tags first, then filters, then functions; the first violation wins.
    pub fn check_security(&self, check: &SecurityCheck, source: &Source) -> Result<(), TemplateError> {
        let groups = [
            ("Tag", &check.tags, &self.tags),
            ("Filter", &check.filters, &self.filters),
            ("Function", &check.functions, &self.functions),
        ];
        for (what, used, allowed) in groups {
            if let Some((name, line)) = used.iter().find(|(name, _)| !allowed.contains(*name)) {
                return Err(TemplateError::security(
                    format!("{what} \"{name}\" is not allowed."),
                    Some(*line),
                    Some(source),
                ));
            }
        }
        Ok(())
    }

    pub fn check_method_allowed(&self, object: &dyn TemplateObject, method: &str) -> Result<(), TemplateError> {
        let allowed = self
            .methods
            .get(&object.class_name().to_lowercase())
            .is_some_and(|methods| methods.contains(&method.to_lowercase()));
        if allowed {
            return Ok(());
        }
        Err(TemplateError::security(
            format!("Calling \"{method}\" method on a \"{}\" object is not allowed.", object.class_name()),
            None,
            None,
        ))
    }

    pub fn check_property_allowed(&self, object: &dyn TemplateObject, property: &str) -> Result<(), TemplateError> {
        let allowed = self
            .properties
            .get(&object.class_name().to_lowercase())
            .is_some_and(|properties| properties.contains(&property.to_lowercase()));
        if allowed {
            return Ok(());
        }
        Err(TemplateError::security(
            format!("Calling \"{property}\" property on a \"{}\" object is not allowed.", object.class_name()),
            None,
            None,
        ))
    }
}

pub struct SandboxExtension {
    policy: SandboxPolicy,
    sandboxed_globally: bool,
    sandboxed: AtomicBool,
}

/// Restores the previous sandbox state when dropped.
pub struct SandboxGuard<'a> {
    extension: &'a SandboxExtension,
    previous: bool,
}

impl Drop for SandboxGuard<'_> {
    fn drop(&mut self) {
        self.extension.sandboxed.store(self.previous, Ordering::SeqCst);
    }
}

impl SandboxExtension {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            policy: SandboxPolicy::from_config(config),
            sandboxed_globally: config.sandboxed,
            sandboxed: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn is_sandboxed_globally(&self) -> bool {
        self.sandboxed_globally
    }

    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed_globally || self.sandboxed.load(Ordering::SeqCst)
    }

    pub fn enable(&self) -> SandboxGuard<'_> {
        let previous = self.sandboxed.swap(true, Ordering::SeqCst);
        debug!(previous, "sandbox enabled");
        SandboxGuard { extension: self, previous }
    }

    pub fn check_security(&self, check: &SecurityCheck, source: &Source) -> Result<(), TemplateError> {
        if !self.is_sandboxed() {
            return Ok(());
        }
        self.policy.check_security(check, source)
    }

    pub fn check_method_allowed(&self, object: &dyn TemplateObject, method: &str) -> Result<(), TemplateError> {
        if !self.is_sandboxed() {
            return Ok(());
        }
        self.policy.check_method_allowed(object, method)
    }

    pub fn check_property_allowed(&self, object: &dyn TemplateObject, property: &str) -> Result<(), TemplateError> {
        if !self.is_sandboxed() {
            return Ok(());
        }
        self.policy.check_property_allowed(object, property)
    }

    /// Printing an object converts it to a string, which counts as a method call.
    pub fn ensure_to_string_allowed(&self, object: &dyn TemplateObject) -> Result<(), TemplateError> {
        self.check_method_allowed(object, "__toString")
    }
}

impl Extension for SandboxExtension {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn token_parsers(&self) -> Vec<Arc<dyn TokenParser>> {
        vec![Arc::new(SandboxTag)]
    }

    fn node_visitors(&self) -> Vec<VisitorFactory> {
        vec![Arc::new(|| Box::new(SandboxVisitor::default()) as Box<dyn NodeVisitor>)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `{% sandbox %}{% include "untrusted" %}{% endsandbox %}`
pub struct SandboxTag;

impl TokenParser for SandboxTag {
    fn tag(&self) -> &'static str {
        "sandbox"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        parser.stream().expect(TokenKind::BlockEnd, None, None)?;
        let body = parser.subparse(Some(&Until::new("sandbox", line, &["endsandbox"])), true)?;
        parser.stream().expect(TokenKind::BlockEnd, None, None)?;

        let children = match &body.kind {
            NodeKind::Body(nodes) => nodes.as_slice(),
            _ => std::slice::from_ref(&body),
        };
        for child in children {
            match &child.kind {
                NodeKind::Text(text) if is_blank(text) => {}
                NodeKind::Include { .. } => {}
                _ => {
                    return Err(
                        parser.error("Only \"include\" tags are allowed within a \"sandbox\" section.", child.line)
                    );
                }
            }
        }
        Ok(Some(Node::new(NodeKind::Sandbox(Box::new(body)), line)))
    }
}

/// Records every tag, filter and function a module uses.
#[derive(Default)]
pub struct SandboxVisitor {
    check: SecurityCheck,
}

/// The escaper's own wrapper is not something the template author wrote.
fn is_auto_escape(args: &[Arg]) -> bool {
    args.get(2).and_then(|arg| arg.value.as_const()) == Some(&Literal::Bool(true))
}

impl NodeVisitor for SandboxVisitor {
    fn enter_module(&mut self, _module: &ModuleNode, _env: &Environment) {
        self.check = SecurityCheck::default();
    }

    fn leave_module(&mut self, module: &mut ModuleNode, _env: &Environment) {
        module.security_check = Some(std::mem::take(&mut self.check));
    }

    fn enter_node(&mut self, node: &Node, _env: &Environment) {
        if let Some(tag) = node.tag {
            self.check.tags.entry(tag.to_string()).or_insert(node.line);
        }
    }

    fn enter_expr(&mut self, expr: &Expr, _env: &Environment) {
        match &expr.kind {
            ExprKind::Filter { name, args, .. } if !(name == "escape" && is_auto_escape(args)) => {
                self.check.filters.entry(name.clone()).or_insert(expr.line);
            }
            ExprKind::Function { name, .. } => {
                self.check.functions.entry(name.clone()).or_insert(expr.line);
            }
            _ => {}
        }
    }
}
