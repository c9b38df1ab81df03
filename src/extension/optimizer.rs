//! Compile-time simplification, run after every other visitor.
//!
//! - constant unary, binary and conditional expressions are folded (a fold that
//!   would fail at runtime is left alone so the error surfaces where it happens);
//! - `if` branches with a constant false test are removed, and a constant true
//!   first branch replaces the whole `if`;
//! - `for` loops that never read `loop` skip building it.

use std::any::Any;
use std::sync::Arc;

use crate::environment::Environment;
use crate::parser::ast::*;
use crate::runtime::{ops, Value};
use crate::visit::NodeVisitor;

use super::{CallableKind, Extension, VisitorFactory};

pub struct OptimizerExtension;

impl Extension for OptimizerExtension {
    fn name(&self) -> &'static str {
        "optimizer"
    }

    fn node_visitors(&self) -> Vec<VisitorFactory> {
        vec![Arc::new(|| Box::new(Optimizer::default()) as Box<dyn NodeVisitor>)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One entry per open `for` loop: whether its body needs the `loop` variable.
#[derive(Default)]
pub struct Optimizer {
    loops: Vec<bool>,
}

fn literal(value: &Value) -> Option<Literal> {
    match value {
        Value::Null => Some(Literal::Null),
        Value::Bool(b) => Some(Literal::Bool(*b)),
        Value::Int(n) => Some(Literal::Int(*n)),
        Value::Float(n) => Some(Literal::Float(*n)),
        Value::Str(s) => Some(Literal::Str(s.clone())),
        _ => None,
    }
}

fn constant(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(n) => Value::Float(*n),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn is_truthy(literal: &Literal) -> bool {
    constant(literal).is_truthy()
}

/// Fold an expression whose operands are constants.
pub fn fold(expr: Expr) -> Expr {
    let line = expr.line;
    let folded = match &expr.kind {
        ExprKind::Unary { op, node } => {
            node.as_const().and_then(|value| ops::unary(*op, &constant(value)).ok()).as_ref().and_then(literal)
        }
        // Concatenation stays unfolded: `~` converts through the renderer's output checks.
        ExprKind::Binary { op, left, right }
            if !matches!(op, BinaryOp::HasSome | BinaryOp::HasEvery | BinaryOp::Concat) =>
        {
            match (left.as_const(), right.as_const()) {
                (Some(l), Some(r)) => ops::binary(*op, &constant(l), &constant(r)).ok().as_ref().and_then(literal),
                _ => None,
            }
        }
        ExprKind::Conditional { test, .. } => test.as_const().map(|value| Literal::Bool(is_truthy(value))),
        _ => None,
    };
    match (folded, expr.kind) {
        (Some(Literal::Bool(take_then)), ExprKind::Conditional { then, otherwise, .. }) => {
            if take_then { *then } else { *otherwise }
        }
        (Some(value), ExprKind::Unary { .. } | ExprKind::Binary { .. }) => Expr::constant(value, line),
        (_, kind) => Expr::new(kind, line),
    }
}

fn prune_if(node: Node) -> Option<Node> {
    let line = node.line;
    let tag = node.tag;
    let (tests, otherwise) = match node.kind {
        NodeKind::If { tests, otherwise } => (tests, otherwise),
        kind => return Some(Node { kind, line, tag }),
    };
    let mut kept = Vec::with_capacity(tests.len());
    for (test, body) in tests {
        match test.as_const() {
            Some(value) if !is_truthy(value) => continue,
            Some(_) if kept.is_empty() => return Some(body),
            _ => kept.push((test, body)),
        }
    }
    if kept.is_empty() {
        return otherwise.map(|body| *body);
    }
    Some(Node { kind: NodeKind::If { tests: kept, otherwise }, line, tag })
}

impl NodeVisitor for Optimizer {
    fn priority(&self) -> i32 {
        255
    }

    fn enter_node(&mut self, node: &Node, _env: &Environment) {
        match &node.kind {
            NodeKind::For { .. } => self.loops.push(false),
            // Included templates see the whole context, `loop` included.
            NodeKind::Include { only: false, .. } | NodeKind::Embed { only: false, .. } => self.mark_all_loops(),
            _ => {}
        }
    }

    fn leave_node(&mut self, mut node: Node, env: &Environment) -> Option<Node> {
        if !env.options().optimizations {
            if let NodeKind::For { .. } = node.kind {
                self.loops.pop();
            }
            return Some(node);
        }
        if let NodeKind::For { with_loop, .. } = &mut node.kind {
            *with_loop = self.loops.pop().unwrap_or(true);
        }
        prune_if(node)
    }

    fn enter_expr(&mut self, expr: &Expr, env: &Environment) {
        match &expr.kind {
            ExprKind::Name(name) if name == "loop" => {
                if let Some(current) = self.loops.last_mut() {
                    *current = true;
                }
            }
            ExprKind::Name(name) if name == "_context" => self.mark_all_loops(),
            ExprKind::GetAttr { object, attribute, .. } => {
                let parent_access = object.as_name() == Some("loop")
                    && matches!(attribute.as_const(), Some(Literal::Str(attr)) if attr == "parent");
                if parent_access {
                    self.mark_all_loops();
                }
            }
            ExprKind::Function { name, .. } => {
                let needs_context = env
                    .extensions()
                    .resolve(CallableKind::Function, name)
                    .ok()
                    .flatten()
                    .is_some_and(|found| found.callable.options().needs_context);
                if needs_context {
                    self.mark_all_loops();
                }
            }
            _ => {}
        }
    }

    fn leave_expr(&mut self, expr: Expr, env: &Environment) -> Expr {
        if env.options().optimizations { fold(expr) } else { expr }
    }
}

impl Optimizer {
    fn mark_all_loops(&mut self) {
        self.loops.iter_mut().for_each(|uses_loop| *uses_loop = true);
    }
}
