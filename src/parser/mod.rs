pub mod ast;
pub mod expr;
pub mod tags;

use std::collections::HashSet;
use std::mem;

use indexmap::IndexMap;
use tracing::trace;
use uuid::Uuid;

use crate::diagnostics::TemplateError;
use crate::environment::Environment;
use crate::extension::Registry;
use crate::lexer::stream::TokenStream;
use crate::lexer::token::{Token, TokenKind};
use crate::source::Source;
use crate::visit::NodeTraverser;
use ast::*;

const CONTENT_OUTSIDE_BLOCKS: &str = "A template that extends another one cannot include content outside blocks. \
     Did you forget to put the content inside a {% block %} tag?";

/// Where a [`Parser::subparse`] stops: the opening tag's own fork/end tags.
#[derive(Debug, Clone, Copy)]
pub struct Until<'a> {
    pub tag: &'a str,
    pub line: usize,
    pub names: &'a [&'a str],
}

impl<'a> Until<'a> {
    pub fn new(tag: &'a str, line: usize, names: &'a [&'a str]) -> Self {
        Self { tag, line, names }
    }

    fn matches(&self, token: &Token) -> bool {
        token.test(TokenKind::Name, self.names)
    }
}

/// A macro reachable by a bare name, from `{% from "t" import name as alias %}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroAlias {
    /// The variable holding the imported template.
    pub template: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
struct SymbolScope {
    functions: IndexMap<String, MacroAlias>,
    templates: HashSet<String>,
}

/// Everything one module parse accumulates. Saved and restored around nested parses.
#[derive(Debug, Default)]
struct ParseState {
    stream: TokenStream,
    parent: Option<Expr>,
    blocks: IndexMap<String, BlockNode>,
    block_stack: Vec<String>,
    macros: IndexMap<String, MacroNode>,
    traits: Vec<TraitUse>,
    embedded: Vec<ModuleNode>,
    scopes: Vec<SymbolScope>,
}

impl ParseState {
    fn new(stream: TokenStream) -> Self {
        let mut main = SymbolScope::default();
        main.templates.insert("_self".to_string());
        Self { stream, scopes: vec![main], ..Self::default() }
    }
}

pub struct Parser<'env> {
    env: &'env Environment,
    registry: &'env Registry,
    state: ParseState,
    stack: Vec<ParseState>,
    var_salt: usize,
}

impl<'env> Parser<'env> {
    pub fn new(env: &'env Environment) -> Result<Self, TemplateError> {
        Ok(Self { env, registry: env.registry()?, state: ParseState::default(), stack: Vec::new(), var_salt: 0 })
    }

    pub fn env(&self) -> &'env Environment {
        self.env
    }

    pub fn registry(&self) -> &'env Registry {
        self.registry
    }

    pub fn stream(&mut self) -> &mut TokenStream {
        &mut self.state.stream
    }

    pub fn current(&self) -> &Token {
        self.state.stream.current()
    }

    pub fn source(&self) -> &Source {
        self.state.stream.source()
    }

    pub fn error(&self, msg: impl Into<String>, line: usize) -> TemplateError {
        TemplateError::syntax(msg, line, self.source())
    }

    /// Parse a whole template into a module.
    pub fn parse(&mut self, stream: TokenStream) -> Result<ModuleNode, TemplateError> {
        self.parse_module(stream, None).map(|(module, _)| module)
    }

    /// Parse an `{% embed %}` body as its own module, sharing the enclosing stream.
    pub fn parse_embedded(&mut self, until: &Until<'_>) -> Result<ModuleNode, TemplateError> {
        let stream = mem::take(&mut self.state.stream);
        let (module, stream) = self.parse_module(stream, Some(until))?;
        self.state.stream = stream;
        Ok(module)
    }

    fn parse_module(
        &mut self,
        stream: TokenStream,
        until: Option<&Until<'_>>,
    ) -> Result<(ModuleNode, TokenStream), TemplateError> {
        let source = stream.source().clone();
        let outer = mem::replace(&mut self.state, ParseState::new(stream));
        self.stack.push(outer);
        let result = self.parse_body(until);
        let restored = self.stack.pop().unwrap_or_default();
        let state = mem::replace(&mut self.state, restored);

        let body = result.map_err(|err| {
            err.with_location_if_missing(state.stream.current().line, &source)
        })?;

        let mut module = ModuleNode::new(body, source);
        module.parent = state.parent;
        module.blocks = state.blocks;
        module.macros = state.macros;
        module.traits = state.traits;
        module.embedded = state.embedded.into_iter().map(Into::into).collect();
        let module = NodeTraverser::new(self.env, self.registry.node_visitors()).traverse(module);
        Ok((module, state.stream))
    }

    fn parse_body(&mut self, until: Option<&Until<'_>>) -> Result<Node, TemplateError> {
        let body = self.subparse(until, true)?;
        if self.state.parent.is_none() {
            return Ok(body);
        }
        let line = body.line;
        Ok(self.filter_body_nodes(body, false)?.unwrap_or_else(|| Node::empty(line)))
    }

    /// The statement loop. Stops at EOF, or at one of `until`'s tags (consumed when `drop_needle`).
    pub fn subparse(&mut self, until: Option<&Until<'_>>, drop_needle: bool) -> Result<Node, TemplateError> {
        let line = self.current().line;
        let registry = self.registry;
        let mut nodes = Vec::new();
        while !self.state.stream.is_eof() {
            match self.current().kind {
                TokenKind::Text => {
                    let token = self.stream().next()?;
                    nodes.push(Node::new(NodeKind::Text(token.value), token.line));
                }
                TokenKind::VarStart => {
                    let token = self.stream().next()?;
                    let expr = self.parse_expression(0)?;
                    self.stream().expect(TokenKind::VarEnd, None, None)?;
                    nodes.push(Node::new(NodeKind::Print(expr), token.line));
                }
                TokenKind::BlockStart => {
                    self.stream().next()?;
                    let token = self.current().clone();
                    if token.kind != TokenKind::Name {
                        return Err(self.error("A block must start with a tag name.", token.line));
                    }
                    if let Some(until) = until.filter(|until| until.matches(&token)) {
                        trace!(tag = until.tag, end = %token.value, "closing tag");
                        if drop_needle {
                            self.stream().next()?;
                        }
                        return Ok(collapse(nodes, line));
                    }
                    let Some(handler) = registry.token_parser(&token.value) else {
                        return Err(self.unknown_tag(&token, until));
                    };
                    self.stream().next()?;
                    if let Some(mut node) = handler.parse(&token, self)? {
                        node.tag = Some(handler.tag());
                        nodes.push(node);
                    }
                }
                _ => {
                    return Err(
                        self.error("The lexer or the parser ended up in an unsupported state.", self.current().line)
                    );
                }
            }
        }
        if let Some(until) = until {
            return Err(self.error(
                format!(
                    "Unexpected end of template (expecting closing tag for the \"{}\" tag defined near line {}).",
                    until.tag, until.line
                ),
                self.current().line,
            ));
        }
        Ok(collapse(nodes, line))
    }

    fn unknown_tag(&self, token: &Token, until: Option<&Until<'_>>) -> TemplateError {
        match until {
            Some(until) => self.error(
                format!(
                    "Unexpected \"{}\" tag (expecting closing tag for the \"{}\" tag defined near line {}).",
                    token.value, until.tag, until.line
                ),
                token.line,
            ),
            None => self
                .error(format!("Unknown \"{}\" tag.", token.value), token.line)
                .with_suggestions(&token.value, self.registry.tags()),
        }
    }

    /// Strip a child template's body down to what may run outside blocks.
    fn filter_body_nodes(&self, mut node: Node, nested: bool) -> Result<Option<Node>, TemplateError> {
        match &node.kind {
            NodeKind::Text(text) if !is_blank(text) => {
                if text.strip_prefix('\u{feff}').is_some_and(is_blank) {
                    return Ok(None);
                }
                return Err(self.error(CONTENT_OUTSIDE_BLOCKS, node.line));
            }
            NodeKind::Text(_) | NodeKind::BlockReference(_) => {}
            _ if node.is_output() => return Err(self.error(CONTENT_OUTSIDE_BLOCKS, node.line)),
            _ => {}
        }
        // captured output: a block in here is defined and displayed in place
        if matches!(node.kind, NodeKind::Set { .. }) {
            return Ok(Some(node));
        }
        if nested && matches!(node.kind, NodeKind::BlockReference(_)) {
            return Err(self.error("A block definition cannot be nested under non-capturing nodes.", node.line));
        }
        if node.is_output() {
            return Ok(None);
        }

        let nested = nested || !matches!(node.kind, NodeKind::Body(_));
        match &mut node.kind {
            NodeKind::Body(children) => {
                for child in mem::take(children) {
                    if let Some(child) = self.filter_body_nodes(child, nested)? {
                        children.push(child);
                    }
                }
            }
            NodeKind::If { tests, otherwise } => {
                for (_, body) in tests.iter_mut() {
                    self.filter_slot(body, nested)?;
                }
                if let Some(otherwise) = otherwise {
                    self.filter_slot(otherwise, nested)?;
                }
            }
            NodeKind::For { body, otherwise, .. } => {
                self.filter_slot(body, nested)?;
                if let Some(otherwise) = otherwise {
                    self.filter_slot(otherwise, nested)?;
                }
            }
            NodeKind::With { body, .. } | NodeKind::Sandbox(body) | NodeKind::AutoEscape { body, .. } => {
                self.filter_slot(body, nested)?;
            }
            _ => {}
        }
        Ok(Some(node))
    }

    fn filter_slot(&self, slot: &mut Node, nested: bool) -> Result<(), TemplateError> {
        let line = slot.line;
        let node = mem::replace(slot, Node::empty(line));
        *slot = self.filter_body_nodes(node, nested)?.unwrap_or_else(|| Node::empty(line));
        Ok(())
    }

    /// A fresh hygienic variable name for compiler-introduced temporaries.
    pub fn var_name(&mut self) -> String {
        let name = format!("__internal_parse_{}", self.var_salt);
        self.var_salt += 1;
        name
    }

    pub fn parent(&self) -> Option<&Expr> {
        self.state.parent.as_ref()
    }

    pub fn set_parent(&mut self, parent: Expr) {
        self.state.parent = Some(parent);
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.state.blocks.contains_key(name)
    }

    /// Declare a block; a later declaration with the same name replaces the earlier one.
    pub fn set_block(&mut self, name: &str, line: usize) {
        let block = BlockNode { name: name.to_string(), body: Node::empty(line), line };
        self.state.blocks.insert(name.to_string(), block);
    }

    pub fn set_block_body(&mut self, name: &str, body: Node) {
        if let Some(block) = self.state.blocks.get_mut(name) {
            block.body = body;
        }
    }

    pub fn push_block_stack(&mut self, name: &str) {
        self.state.block_stack.push(name.to_string());
    }

    pub fn pop_block_stack(&mut self) {
        self.state.block_stack.pop();
    }

    pub fn peek_block_stack(&self) -> Option<&str> {
        self.state.block_stack.last().map(String::as_str)
    }

    pub fn set_macro(&mut self, node: MacroNode) -> Result<(), TemplateError> {
        if let Some(existing) = self.state.macros.get(&node.name) {
            return Err(self.error(
                format!("The macro \"{}\" has already been defined at line {}.", node.name, existing.line),
                node.line,
            ));
        }
        self.state.macros.insert(node.name.clone(), node);
        Ok(())
    }

    pub fn add_trait(&mut self, trait_use: TraitUse) {
        self.state.traits.push(trait_use);
    }

    pub fn has_traits(&self) -> bool {
        !self.state.traits.is_empty()
    }

    /// Attach an embedded module under a fresh random index.
    pub fn embed_template(&mut self, mut module: ModuleNode) -> usize {
        let mut index = random_index();
        while self.state.embedded.iter().any(|m| m.index == Some(index)) {
            index = random_index();
        }
        module.index = Some(index);
        self.state.embedded.push(module);
        index
    }

    pub fn push_local_scope(&mut self) {
        self.state.scopes.push(SymbolScope::default());
    }

    pub fn pop_local_scope(&mut self) {
        if self.state.scopes.len() > 1 {
            self.state.scopes.pop();
        }
    }

    pub fn is_main_scope(&self) -> bool {
        self.state.scopes.len() == 1
    }

    fn scope_mut(&mut self) -> &mut SymbolScope {
        if self.state.scopes.is_empty() {
            self.state.scopes.push(SymbolScope::default());
        }
        let last = self.state.scopes.len() - 1;
        &mut self.state.scopes[last]
    }

    pub fn add_imported_template(&mut self, alias: &str) {
        self.scope_mut().templates.insert(alias.to_string());
    }

    pub fn add_imported_function(&mut self, alias: &str, template: &str, name: &str) {
        let alias_of = MacroAlias { template: template.to_string(), name: name.to_string() };
        self.scope_mut().functions.insert(alias.to_string(), alias_of);
    }

    /// The current scope first, then the template's main scope.
    pub fn imported_function(&self, alias: &str) -> Option<&MacroAlias> {
        let scopes = &self.state.scopes;
        scopes.last().and_then(|s| s.functions.get(alias)).or_else(|| scopes.first()?.functions.get(alias))
    }

    pub fn is_imported_template(&self, alias: &str) -> bool {
        let scopes = &self.state.scopes;
        scopes.last().is_some_and(|s| s.templates.contains(alias))
            || scopes.first().is_some_and(|s| s.templates.contains(alias))
    }
}

fn collapse(mut nodes: Vec<Node>, line: usize) -> Node {
    if nodes.len() == 1 {
        return nodes.remove(0);
    }
    Node::body(nodes, line)
}

pub(crate) fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

fn random_index() -> usize {
    (Uuid::new_v4().as_u128() & 0x7fff_ffff) as usize
}
