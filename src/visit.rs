//! AST traversal.
//!
//! Two mechanisms live here:
//!
//! - `Visitor` with `walk_*` functions: read-only recursion for analysis passes
//!   (override the methods you need, call the `walk_*` function to keep recursing),
//!   used by [`template_references`].
//! - `NodeVisitor` + `NodeTraverser`: the rewriting passes registered by extensions.
//!   Each visitor gets `enter`/`leave` callbacks per node and expression; `leave_node`
//!   may replace a node or return `None` to remove it.

use std::mem;

use tracing::trace;

use crate::environment::Environment;
use crate::extension::VisitorFactory;
use crate::parser::ast::*;

// ============================================================================
// Visitor Trait (Read-Only)
// ============================================================================

pub trait Visitor: Sized {
    fn visit_module(&mut self, module: &ModuleNode) {
        walk_module(self, module);
    }

    fn visit_node(&mut self, node: &Node) {
        walk_node(self, node);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_module<V: Visitor>(v: &mut V, module: &ModuleNode) {
    if let Some(parent) = &module.parent {
        v.visit_expr(parent);
    }
    v.visit_node(&module.body);
    for block in module.blocks.values() {
        v.visit_node(&block.body);
    }
    for m in module.macros.values() {
        for (_, default) in &m.params {
            v.visit_expr(default);
        }
        v.visit_node(&m.body);
    }
    for trait_use in &module.traits {
        v.visit_expr(&trait_use.template);
    }
}

pub fn walk_node<V: Visitor>(v: &mut V, node: &Node) {
    match &node.kind {
        NodeKind::Text(_) | NodeKind::BlockReference(_) | NodeKind::Flush => {}
        NodeKind::Body(nodes) => {
            for child in nodes {
                v.visit_node(child);
            }
        }
        NodeKind::Print(expr) | NodeKind::Do(expr) | NodeKind::Deprecated(expr) => v.visit_expr(expr),
        NodeKind::If { tests, otherwise } => {
            for (test, body) in tests {
                v.visit_expr(test);
                v.visit_node(body);
            }
            if let Some(otherwise) = otherwise {
                v.visit_node(otherwise);
            }
        }
        NodeKind::For { seq, body, otherwise, .. } => {
            v.visit_expr(seq);
            v.visit_node(body);
            if let Some(otherwise) = otherwise {
                v.visit_node(otherwise);
            }
        }
        NodeKind::Set { value, .. } => match value {
            SetValue::Exprs(exprs) => {
                for expr in exprs {
                    v.visit_expr(expr);
                }
            }
            SetValue::Capture(body) => v.visit_node(body),
        },
        NodeKind::With { variables, body, .. } => {
            if let Some(variables) = variables {
                v.visit_expr(variables);
            }
            v.visit_node(body);
        }
        NodeKind::Include { expr, variables, .. } => {
            v.visit_expr(expr);
            if let Some(variables) = variables {
                v.visit_expr(variables);
            }
        }
        NodeKind::Embed { variables, .. } => {
            if let Some(variables) = variables {
                v.visit_expr(variables);
            }
        }
        NodeKind::Import { template, .. } => v.visit_expr(template),
        NodeKind::Sandbox(body) | NodeKind::AutoEscape { body, .. } => v.visit_node(body),
    }
}

fn args_exprs(args: &[Arg]) -> impl Iterator<Item = &Expr> {
    args.iter().map(|arg| &arg.value)
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Const(_) | ExprKind::Name(_) | ExprKind::Parent { .. } => {}
        ExprKind::Array(items) => {
            for item in items {
                v.visit_expr(item);
            }
        }
        ExprKind::Hash(pairs) => {
            for (key, value) in pairs {
                v.visit_expr(key);
                v.visit_expr(value);
            }
        }
        ExprKind::Unary { node, .. } => v.visit_expr(node),
        ExprKind::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ExprKind::Conditional { test, then, otherwise } => {
            v.visit_expr(test);
            v.visit_expr(then);
            v.visit_expr(otherwise);
        }
        ExprKind::GetAttr { object, attribute, arguments, .. } => {
            v.visit_expr(object);
            v.visit_expr(attribute);
            if let Some(arguments) = arguments {
                v.visit_expr(arguments);
            }
        }
        ExprKind::MacroCall { args, .. } | ExprKind::Function { args, .. } => {
            for arg in args_exprs(args) {
                v.visit_expr(arg);
            }
        }
        ExprKind::Filter { node, args, .. } | ExprKind::Test { node, args, .. } => {
            v.visit_expr(node);
            for arg in args_exprs(args) {
                v.visit_expr(arg);
            }
        }
        ExprKind::Arrow { body, .. } => v.visit_expr(body),
        ExprKind::BlockRef { name, template } => {
            v.visit_expr(name);
            if let Some(template) = template {
                v.visit_expr(template);
            }
        }
    }
}

/// Names of the templates a module refers to by constant name: parent, traits,
/// includes, imports, embeds, and `include()`/`source()`/`block()` targets.
pub fn template_references(module: &ModuleNode) -> Vec<String> {
    let mut refs = TemplateRefs::default();
    refs.module(module);
    refs.names
}

#[derive(Default)]
struct TemplateRefs {
    names: Vec<String>,
}

impl TemplateRefs {
    fn module(&mut self, module: &ModuleNode) {
        self.visit_module(module);
        for embedded in &module.embedded {
            self.module(embedded);
        }
    }

    fn add(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Const(Literal::Str(name)) => {
                if !self.names.contains(name) {
                    self.names.push(name.clone());
                }
            }
            // `{% include ["a", "b"] %}` and conditional parents
            ExprKind::Array(items) => items.iter().for_each(|item| self.add(item)),
            ExprKind::Conditional { then, otherwise, .. } => {
                self.add(then);
                self.add(otherwise);
            }
            _ => {}
        }
    }
}

impl Visitor for TemplateRefs {
    fn visit_module(&mut self, module: &ModuleNode) {
        if let Some(parent) = &module.parent {
            self.add(parent);
        }
        for trait_use in &module.traits {
            self.add(&trait_use.template);
        }
        walk_module(self, module);
    }

    fn visit_node(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::Include { expr, .. } => self.add(expr),
            NodeKind::Import { template, .. } => self.add(template),
            _ => {}
        }
        walk_node(self, node);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Function { name, args } if name == "include" || name == "source" => {
                if let Some(arg) = args.first() {
                    self.add(&arg.value);
                }
            }
            ExprKind::BlockRef { template: Some(template), .. } => self.add(template),
            _ => {}
        }
        walk_expr(self, expr);
    }
}

// ============================================================================
// Rewriting passes
// ============================================================================

pub trait NodeVisitor {
    /// Visitors run in ascending priority, one full pass each.
    fn priority(&self) -> i32 {
        0
    }

    fn enter_module(&mut self, _module: &ModuleNode, _env: &Environment) {}

    fn leave_module(&mut self, _module: &mut ModuleNode, _env: &Environment) {}

    /// Called around each block body; block bodies are not nested in the module body.
    fn enter_block(&mut self, _name: &str, _env: &Environment) {}

    fn leave_block(&mut self, _name: &str, _env: &Environment) {}

    fn enter_node(&mut self, _node: &Node, _env: &Environment) {}

    /// Return `None` to remove the node.
    fn leave_node(&mut self, node: Node, _env: &Environment) -> Option<Node> {
        Some(node)
    }

    fn enter_expr(&mut self, _expr: &Expr, _env: &Environment) {}

    fn leave_expr(&mut self, expr: Expr, _env: &Environment) -> Expr {
        expr
    }
}

pub struct NodeTraverser<'env> {
    env: &'env Environment,
    visitors: Vec<Box<dyn NodeVisitor>>,
}

impl<'env> NodeTraverser<'env> {
    pub fn new(env: &'env Environment, factories: &[VisitorFactory]) -> Self {
        let mut visitors: Vec<Box<dyn NodeVisitor>> = factories.iter().map(|factory| factory()).collect();
        visitors.sort_by_key(|visitor| visitor.priority());
        Self { env, visitors }
    }

    pub fn traverse(&mut self, mut module: ModuleNode) -> ModuleNode {
        for visitor in &mut self.visitors {
            trace!(priority = visitor.priority(), template = module.name(), "node visitor pass");
            module = Pass { visitor: visitor.as_mut(), env: self.env }.module(module);
        }
        module
    }
}

struct Pass<'a> {
    visitor: &'a mut dyn NodeVisitor,
    env: &'a Environment,
}

fn placeholder_expr(line: usize) -> Expr {
    Expr::constant(Literal::Null, line)
}

impl Pass<'_> {
    fn module(&mut self, mut module: ModuleNode) -> ModuleNode {
        self.visitor.enter_module(&module, self.env);
        if let Some(parent) = module.parent.take() {
            module.parent = Some(self.expr(parent));
        }
        let line = module.body.line;
        module.body = self.node(mem::replace(&mut module.body, Node::empty(line))).unwrap_or_else(|| Node::empty(line));
        for block in module.blocks.values_mut() {
            self.visitor.enter_block(&block.name, self.env);
            self.boxed_body(&mut block.body);
            self.visitor.leave_block(&block.name, self.env);
        }
        for m in module.macros.values_mut() {
            for (_, default) in &mut m.params {
                self.expr_in_place(default);
            }
            self.boxed_body(&mut m.body);
        }
        for trait_use in &mut module.traits {
            self.expr_in_place(&mut trait_use.template);
        }
        self.visitor.leave_module(&mut module, self.env);
        module
    }

    fn boxed_body(&mut self, slot: &mut Node) {
        let line = slot.line;
        let node = mem::replace(slot, Node::empty(line));
        *slot = self.node(node).unwrap_or_else(|| Node::empty(line));
    }

    fn expr_in_place(&mut self, slot: &mut Expr) {
        let line = slot.line;
        let expr = mem::replace(slot, placeholder_expr(line));
        *slot = self.expr(expr);
    }

    fn args(&mut self, args: &mut [Arg]) {
        for arg in args {
            self.expr_in_place(&mut arg.value);
        }
    }

    fn node(&mut self, mut node: Node) -> Option<Node> {
        self.visitor.enter_node(&node, self.env);
        match &mut node.kind {
            NodeKind::Text(_) | NodeKind::BlockReference(_) | NodeKind::Flush => {}
            NodeKind::Body(nodes) => {
                let children = mem::take(nodes);
                *nodes = children.into_iter().filter_map(|child| self.node(child)).collect();
            }
            NodeKind::Print(expr) | NodeKind::Do(expr) | NodeKind::Deprecated(expr) => self.expr_in_place(expr),
            NodeKind::If { tests, otherwise } => {
                for (test, body) in tests.iter_mut() {
                    self.expr_in_place(test);
                    self.boxed_body(body);
                }
                if let Some(otherwise) = otherwise {
                    self.boxed_body(otherwise);
                }
            }
            NodeKind::For { seq, body, otherwise, .. } => {
                self.expr_in_place(seq);
                self.boxed_body(body);
                if let Some(otherwise) = otherwise {
                    self.boxed_body(otherwise);
                }
            }
            NodeKind::Set { value, .. } => match value {
                SetValue::Exprs(exprs) => {
                    for expr in exprs.iter_mut() {
                        self.expr_in_place(expr);
                    }
                }
                SetValue::Capture(body) => self.boxed_body(body),
            },
            NodeKind::With { variables, body, .. } => {
                if let Some(variables) = variables {
                    self.expr_in_place(variables);
                }
                self.boxed_body(body);
            }
            NodeKind::Include { expr, variables, .. } => {
                self.expr_in_place(expr);
                if let Some(variables) = variables {
                    self.expr_in_place(variables);
                }
            }
            NodeKind::Embed { variables, .. } => {
                if let Some(variables) = variables {
                    self.expr_in_place(variables);
                }
            }
            NodeKind::Import { template, .. } => self.expr_in_place(template),
            NodeKind::Sandbox(body) | NodeKind::AutoEscape { body, .. } => self.boxed_body(body),
        }
        self.visitor.leave_node(node, self.env)
    }

    fn expr(&mut self, mut expr: Expr) -> Expr {
        self.visitor.enter_expr(&expr, self.env);
        match &mut expr.kind {
            ExprKind::Const(_) | ExprKind::Name(_) | ExprKind::Parent { .. } => {}
            ExprKind::Array(items) => {
                for item in items.iter_mut() {
                    self.expr_in_place(item);
                }
            }
            ExprKind::Hash(pairs) => {
                for (key, value) in pairs.iter_mut() {
                    self.expr_in_place(key);
                    self.expr_in_place(value);
                }
            }
            ExprKind::Unary { node, .. } => self.expr_in_place(node),
            ExprKind::Binary { left, right, .. } => {
                self.expr_in_place(left);
                self.expr_in_place(right);
            }
            ExprKind::Conditional { test, then, otherwise } => {
                self.expr_in_place(test);
                self.expr_in_place(then);
                self.expr_in_place(otherwise);
            }
            ExprKind::GetAttr { object, attribute, arguments, .. } => {
                self.expr_in_place(object);
                self.expr_in_place(attribute);
                if let Some(arguments) = arguments {
                    self.expr_in_place(arguments);
                }
            }
            ExprKind::MacroCall { args, .. } | ExprKind::Function { args, .. } => self.args(args),
            ExprKind::Filter { node, args, .. } | ExprKind::Test { node, args, .. } => {
                self.expr_in_place(node);
                self.args(args);
            }
            ExprKind::Arrow { body, .. } => self.expr_in_place(body),
            ExprKind::BlockRef { name, template } => {
                self.expr_in_place(name);
                if let Some(template) = template {
                    self.expr_in_place(template);
                }
            }
        }
        self.visitor.leave_expr(expr, self.env)
    }
}
