//! Automatic output escaping.
//!
//! The visitor wraps every print expression that is not already safe for the active
//! strategy in `escape(strategy, null, true)`. The active strategy comes from the
//! environment's autoescape option (possibly guessed from the template name) and is
//! overridden inside `{% autoescape %}` sections. Blocks inherit the strategy in
//! effect where they are referenced.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::environment::Environment;
use crate::parser::ast::*;
use crate::runtime::library;
use crate::visit::NodeVisitor;

use super::{CallableKind, Extension, TemplateCallable, TemplateFilter, VisitorFactory};

pub struct EscaperExtension;

/// `escape('js')` is safe for `js`; a dynamic strategy is safe for nothing.
fn escape_safety(args: &[Arg]) -> Vec<String> {
    match args.first() {
        None => vec!["html".to_string()],
        Some(arg) => match arg.value.as_const() {
            Some(Literal::Str(strategy)) => vec![strategy.clone()],
            Some(other) => vec![other.to_string()],
            None => Vec::new(),
        },
    }
}

impl Extension for EscaperExtension {
    fn name(&self) -> &'static str {
        "escaper"
    }

    fn node_visitors(&self) -> Vec<VisitorFactory> {
        vec![Arc::new(|| Box::new(EscaperVisitor::default()) as Box<dyn NodeVisitor>)]
    }

    fn filters(&self) -> Vec<TemplateFilter> {
        let escape = |name: &str| {
            TemplateCallable::filter(name, library::escape)
                .with_args(&["strategy", "charset", "autoescape"])
                .safe_callback(escape_safety)
        };
        vec![escape("escape"), escape("e"), TemplateCallable::filter("raw", library::raw).safe(&["all"])]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct EscaperVisitor {
    default: Option<String>,
    status: Vec<Option<String>>,
    /// Strategy in effect where each block was referenced.
    blocks: HashMap<String, Option<String>>,
}

impl EscaperVisitor {
    fn current(&self) -> Option<String> {
        match self.status.last() {
            Some(status) => status.clone(),
            None => self.default.clone(),
        }
    }

    fn escape(&self, expr: Expr, strategy: &str, env: &Environment) -> Expr {
        if let ExprKind::Conditional { test, then, otherwise } = expr.kind {
            let then = self.escape(*then, strategy, env);
            let otherwise = self.escape(*otherwise, strategy, env);
            return Expr::new(
                ExprKind::Conditional { test, then: Box::new(then), otherwise: Box::new(otherwise) },
                expr.line,
            );
        }
        if is_safe_for(&safety(&expr, env), strategy) {
            return expr;
        }
        escape_filter(expr, strategy)
    }
}

fn escape_filter(expr: Expr, strategy: &str) -> Expr {
    let line = expr.line;
    let args = vec![
        Arg::positional(Expr::string(strategy, line)),
        Arg::positional(Expr::constant(Literal::Null, line)),
        Arg::positional(Expr::constant(Literal::Bool(true), line)),
    ];
    Expr::new(ExprKind::Filter { node: Box::new(expr), name: "escape".to_string(), args }, line)
}

fn is_safe_for(safe: &[String], strategy: &str) -> bool {
    safe.iter().any(|s| s == strategy || s == "all")
}

fn intersect(a: Vec<String>, b: Vec<String>) -> Vec<String> {
    if a.iter().any(|s| s == "all") {
        return b;
    }
    if b.iter().any(|s| s == "all") {
        return a;
    }
    a.into_iter().filter(|s| b.contains(s)).collect()
}

/// Strategies for which the expression's value needs no escaping.
pub fn safety(expr: &Expr, env: &Environment) -> Vec<String> {
    let all = || vec!["all".to_string()];
    match &expr.kind {
        ExprKind::Const(_) | ExprKind::BlockRef { .. } | ExprKind::Parent { .. } | ExprKind::MacroCall { .. } => all(),
        ExprKind::Conditional { then, otherwise, .. } => intersect(safety(then, env), safety(otherwise, env)),
        ExprKind::Filter { node, name, args } => {
            let Some(found) = env.extensions().resolve(CallableKind::Filter, name).ok().flatten() else {
                return Vec::new();
            };
            let mut safe = found.callable.safe_for(args);
            if !safe.is_empty() {
                // Attribute escaping is stricter than html.
                if safe.iter().any(|s| s == "html_attr") {
                    safe.push("html".to_string());
                }
                return safe;
            }
            intersect(safety(node, env), found.callable.options().preserves_safety.clone())
        }
        ExprKind::Function { name, args } => env
            .extensions()
            .resolve(CallableKind::Function, name)
            .ok()
            .flatten()
            .map(|found| found.callable.safe_for(args))
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

impl NodeVisitor for EscaperVisitor {
    fn enter_module(&mut self, module: &ModuleNode, env: &Environment) {
        self.default = env.options().autoescape.strategy_for(module.name());
        self.status.clear();
        self.blocks.clear();
    }

    fn enter_block(&mut self, name: &str, _env: &Environment) {
        let status = self.blocks.get(name).cloned().unwrap_or_else(|| self.current());
        self.status.push(status);
    }

    fn leave_block(&mut self, _name: &str, _env: &Environment) {
        self.status.pop();
    }

    fn enter_node(&mut self, node: &Node, _env: &Environment) {
        match &node.kind {
            NodeKind::AutoEscape { strategy, .. } => self.status.push(strategy.clone()),
            NodeKind::BlockReference(name) => {
                self.blocks.insert(name.clone(), self.current());
            }
            _ => {}
        }
    }

    fn leave_node(&mut self, mut node: Node, env: &Environment) -> Option<Node> {
        match &mut node.kind {
            NodeKind::AutoEscape { .. } => {
                self.status.pop();
            }
            NodeKind::Print(expr) => {
                if let Some(strategy) = self.current() {
                    let line = expr.line;
                    let inner = std::mem::replace(expr, Expr::constant(Literal::Null, line));
                    *expr = self.escape(inner, &strategy, env);
                }
            }
            _ => {}
        }
        Some(node)
    }

    fn leave_expr(&mut self, expr: Expr, env: &Environment) -> Expr {
        let ExprKind::Filter { name, .. } = &expr.kind else {
            return expr;
        };
        let pre_escape = env
            .extensions()
            .resolve(CallableKind::Filter, name)
            .ok()
            .flatten()
            .and_then(|found| found.callable.options().pre_escape.clone());
        let Some(strategy) = pre_escape else {
            return expr;
        };
        let line = expr.line;
        match expr.kind {
            ExprKind::Filter { node, name, args } => {
                let node =
                    if is_safe_for(&safety(&node, env), &strategy) { *node } else { escape_filter(*node, &strategy) };
                Expr::new(ExprKind::Filter { node: Box::new(node), name, args }, line)
            }
            kind => Expr::new(kind, line),
        }
    }
}
