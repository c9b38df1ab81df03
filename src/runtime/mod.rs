//! Tree-walking renderer.
//!
//! Templates execute directly from their `ModuleNode`. A `Frame` is one activation
//! (template body, block, macro or arrow function): the template whose code runs, the
//! variables in scope, the block table it was displayed with and its local imports.
//! Output goes to caller-provided buffers so expressions that render (macro calls,
//! `block()`, `parent()`, `include()`) can capture into their own.

pub mod escape;
pub mod library;
pub mod ops;
pub mod value;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use tracing::{debug, warn};

use crate::diagnostics::TemplateError;
use crate::environment::{Environment, Template};
use crate::extension::sandbox::SandboxExtension;
use crate::extension::CallableKind;
use crate::parser::ast::*;
use crate::parser::tags::VARARGS;

pub use value::{Map, TemplateObject, Value};

const MAX_DEPTH: usize = 64;

/// A block body and the template defining it.
#[derive(Clone)]
pub struct BlockRef {
    template: Arc<Template>,
    name: String,
}

pub type Blocks = IndexMap<String, BlockRef>;
type Imports = IndexMap<String, Arc<Template>>;

struct TemplateBlocks {
    /// Trait blocks overridden by the template's own.
    all: Blocks,
    traits: Blocks,
}

/// An arrow function together with the variables visible where it was created.
pub struct Closure {
    pub params: Vec<String>,
    body: Expr,
    captured: Map,
    template: Arc<Template>,
    imports: Imports,
}

pub(crate) struct Frame {
    template: Arc<Template>,
    context: Map,
    blocks: Blocks,
    imports: Imports,
}

impl Frame {
    fn new(template: Arc<Template>, context: Map, blocks: Blocks) -> Self {
        Self { template, context, blocks, imports: Imports::new() }
    }
}

/// What a filter, function or test implementation sees of the running template.
pub struct CallContext<'a> {
    renderer: &'a Renderer<'a>,
    frame: &'a Frame,
    line: usize,
}

impl CallContext<'_> {
    pub fn env(&self) -> &Environment {
        self.renderer.env
    }

    pub fn context(&self) -> &Map {
        &self.frame.context
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.frame.template
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// Invoke an arrow function passed as an argument.
    pub fn call(&self, callable: &Value, args: &[Value]) -> Result<Value, TemplateError> {
        match callable {
            Value::Closure(closure) => self.renderer.call_closure(closure, args),
            other => Err(TemplateError::runtime(format!("Expected an arrow function, got \"{}\".", other.type_name()))),
        }
    }

    pub fn include(
        &self,
        template: &Value,
        variables: Option<&Value>,
        with_context: bool,
        ignore_missing: bool,
        sandboxed: bool,
    ) -> Result<Value, TemplateError> {
        let mut out = String::new();
        let options = IncludeOptions { with_context, ignore_missing, sandboxed };
        self.renderer.include(self.frame, template, variables, options, &mut out)?;
        Ok(Value::Markup(out))
    }
}

#[derive(Clone, Copy)]
struct IncludeOptions {
    with_context: bool,
    ignore_missing: bool,
    sandboxed: bool,
}

struct Depth<'a>(&'a Cell<usize>);

impl Drop for Depth<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// One render call. Not shared across threads; create one per render.
pub struct Renderer<'env> {
    env: &'env Environment,
    depth: Cell<usize>,
    globals: OnceCell<Map>,
    global_imports: RefCell<HashMap<String, Imports>>,
    block_tables: RefCell<HashMap<String, Rc<TemplateBlocks>>>,
}

impl<'env> Renderer<'env> {
    pub fn new(env: &'env Environment) -> Self {
        Self {
            env,
            depth: Cell::new(0),
            globals: OnceCell::new(),
            global_imports: RefCell::new(HashMap::new()),
            block_tables: RefCell::new(HashMap::new()),
        }
    }

    pub fn render(&self, template: &Arc<Template>, context: Map) -> Result<String, TemplateError> {
        debug!(template = template.name(), "render");
        let mut out = String::new();
        self.display(template, context, &Blocks::new(), &mut out)?;
        Ok(out)
    }

    pub fn render_block(&self, template: &Arc<Template>, name: &str, context: Map) -> Result<String, TemplateError> {
        let context = self.merge_globals(context)?;
        let mut out = String::new();
        self.display_block(template, name, &context, &Blocks::new(), true, &mut out)?;
        Ok(out)
    }

    pub fn has_template_block(&self, template: &Arc<Template>, name: &str, context: &Map) -> Result<bool, TemplateError> {
        self.has_block(template, name, context, &Blocks::new())
    }

    fn enter(&self, name: &str) -> Result<Depth<'_>, TemplateError> {
        let depth = self.depth.get() + 1;
        if depth > MAX_DEPTH {
            return Err(TemplateError::runtime(format!(
                "Maximum nesting level of {MAX_DEPTH} reached while rendering \"{name}\"."
            )));
        }
        self.depth.set(depth);
        Ok(Depth(&self.depth))
    }

    fn globals(&self) -> Result<&Map, TemplateError> {
        self.globals.get_or_try_init(|| self.env.globals())
    }

    /// Globals fill in names the context does not define.
    fn merge_globals(&self, mut context: Map) -> Result<Map, TemplateError> {
        for (name, value) in self.globals()? {
            context.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Ok(context)
    }

    fn sandboxed(&self) -> Option<&SandboxExtension> {
        self.env.sandbox().filter(|sandbox| sandbox.is_sandboxed())
    }

    // ------------------------------------------------------------------
    // Templates, blocks, inheritance
    // ------------------------------------------------------------------

    fn display(&self, template: &Arc<Template>, context: Map, blocks: &Blocks, out: &mut String) -> Result<(), TemplateError> {
        let _depth = self.enter(template.name())?;
        if let (Some(sandbox), Some(check)) = (self.sandboxed(), &template.module().security_check) {
            sandbox.check_security(check, template.source())?;
        }
        let context = self.merge_globals(context)?;
        let mut merged = self.template_blocks(template)?.all.clone();
        merged.extend(blocks.clone());

        let mut frame = Frame::new(template.clone(), context, merged);
        self.render_node(&mut frame, &template.module().body, out)?;
        if let Some(parent) = self.parent_of(template, &frame.context)? {
            let Frame { context, blocks, .. } = frame;
            self.display(&parent, context, &blocks, out)?;
        }
        Ok(())
    }

    fn template_blocks(&self, template: &Arc<Template>) -> Result<Rc<TemplateBlocks>, TemplateError> {
        if let Some(found) = self.block_tables.borrow().get(template.class_name()) {
            return Ok(found.clone());
        }
        let module = template.module();
        let mut traits = Blocks::new();
        for trait_use in &module.traits {
            let line = trait_use.template.line;
            let frame = Frame::new(template.clone(), Map::new(), Blocks::new());
            let value = self.eval(&frame, &trait_use.template)?;
            let used = self
                .resolve_template(&value)
                .map_err(|err| err.with_location_if_missing(line, template.source()))?;
            if !is_traitable(used.module()) {
                return Err(TemplateError::runtime_at(
                    format!("Template \"{}\" cannot be used as a trait.", used.name()),
                    line,
                    template.source(),
                ));
            }
            let mut blocks = self.template_blocks(&used)?.all.clone();
            for (name, alias) in &trait_use.targets {
                let Some(found) = blocks.shift_remove(name) else {
                    return Err(TemplateError::runtime_at(
                        format!("Block \"{name}\" is not defined in trait \"{}\".", used.name()),
                        line,
                        template.source(),
                    ));
                };
                blocks.insert(alias.clone(), found);
            }
            traits.extend(blocks);
        }

        let mut all = traits.clone();
        for name in module.blocks.keys() {
            all.insert(name.clone(), BlockRef { template: template.clone(), name: name.clone() });
        }
        let table = Rc::new(TemplateBlocks { all, traits });
        self.block_tables.borrow_mut().insert(template.class_name().to_string(), table.clone());
        Ok(table)
    }

    fn parent_of(&self, template: &Arc<Template>, context: &Map) -> Result<Option<Arc<Template>>, TemplateError> {
        let Some(expr) = &template.module().parent else {
            return Ok(None);
        };
        let value = match expr.as_const() {
            Some(Literal::Str(name)) => Value::Str(name.clone()),
            _ => self.eval(&Frame::new(template.clone(), context.clone(), Blocks::new()), expr)?,
        };
        self.resolve_template(&value)
            .map(Some)
            .map_err(|err| err.with_location_if_missing(expr.line, template.source()))
    }

    /// A template object, a name, or a list of names of which the first existing one wins.
    fn resolve_template(&self, value: &Value) -> Result<Arc<Template>, TemplateError> {
        match value {
            Value::Template(template) => Ok(template.clone()),
            Value::Seq(items) => {
                for item in items {
                    if let Value::Template(template) = item {
                        return Ok(template.clone());
                    }
                    let name = item.to_output()?;
                    if self.env.exists(&name) {
                        return self.env.load_template(&name);
                    }
                }
                let names: Vec<String> = items.iter().map(Value::to_display).collect();
                Err(TemplateError::loader(format!(
                    "Unable to find one of the following templates: \"{}\".",
                    names.join("\", \"")
                )))
            }
            other => self.env.load_template(&other.to_output()?),
        }
    }

    fn display_block(
        &self,
        this: &Arc<Template>,
        name: &str,
        context: &Map,
        blocks: &Blocks,
        use_blocks: bool,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        let own = self.template_blocks(this)?;
        let target = if use_blocks { blocks.get(name).or_else(|| own.all.get(name)) } else { own.all.get(name) };
        if let Some(target) = target {
            let Some(block) = target.template.module().blocks.get(&target.name) else {
                return Err(TemplateError::runtime(format!(
                    "Block \"{}\" on template \"{}\" does not exist.",
                    target.name,
                    target.template.name()
                )));
            };
            let mut frame = Frame::new(target.template.clone(), context.clone(), blocks.clone());
            return self.render_node(&mut frame, &block.body, out);
        }
        if let Some(parent) = self.parent_of(this, context)? {
            let mut merged = own.all.clone();
            merged.extend(blocks.clone());
            return self.display_block(&parent, name, context, &merged, false, out);
        }
        if let Some(caller) = blocks.get(name) {
            return Err(TemplateError::runtime(format!(
                "Block \"{name}\" should not call parent() in \"{}\" as the block does not exist in the parent template \"{}\".",
                caller.template.name(),
                this.name()
            )));
        }
        Err(TemplateError::runtime(format!("Block \"{name}\" on template \"{}\" does not exist.", this.name())))
    }

    fn display_parent_block(&self, frame: &Frame, name: &str, out: &mut String) -> Result<(), TemplateError> {
        let own = self.template_blocks(&frame.template)?;
        if let Some(target) = own.traits.get(name) {
            return self.display_block(&target.template, &target.name, &frame.context, &frame.blocks, false, out);
        }
        if let Some(parent) = self.parent_of(&frame.template, &frame.context)? {
            return self.display_block(&parent, name, &frame.context, &frame.blocks, false, out);
        }
        Err(TemplateError::runtime(format!(
            "The template has no parent and no traits defining the \"{name}\" block."
        )))
    }

    fn has_block(&self, this: &Arc<Template>, name: &str, context: &Map, blocks: &Blocks) -> Result<bool, TemplateError> {
        if blocks.contains_key(name) || self.template_blocks(this)?.all.contains_key(name) {
            return Ok(true);
        }
        match self.parent_of(this, context)? {
            Some(parent) => self.has_block(&parent, name, context, &Blocks::new()),
            None => Ok(false),
        }
    }

    fn include(
        &self,
        frame: &Frame,
        template: &Value,
        variables: Option<&Value>,
        options: IncludeOptions,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        let mut context = if options.with_context { frame.context.clone() } else { Map::new() };
        if let Some(variables) = variables {
            let vars = to_map(variables).ok_or_else(|| {
                TemplateError::runtime(format!(
                    "Variables passed to the \"include\" function or tag must be iterable, got \"{}\".",
                    variables.type_name()
                ))
            })?;
            context.extend(vars);
        }
        let loaded = match self.resolve_template(template) {
            Ok(loaded) => loaded,
            Err(err) if options.ignore_missing && err.is_loader() => return Ok(()),
            Err(err) => return Err(err),
        };
        let _guard = if options.sandboxed {
            let sandbox = self.env.sandbox().ok_or_else(|| {
                TemplateError::runtime("Templates can only be sandboxed if the \"sandbox\" extension is enabled.")
            })?;
            Some(sandbox.enable())
        } else {
            None
        };
        self.display(&loaded, context, &Blocks::new(), out)
    }

    // ------------------------------------------------------------------
    // Imports and macros
    // ------------------------------------------------------------------

    fn imported(&self, frame: &Frame, alias: &str) -> Result<Arc<Template>, TemplateError> {
        if alias == "_self" {
            return Ok(frame.template.clone());
        }
        if let Some(found) = frame.imports.get(alias) {
            return Ok(found.clone());
        }
        self.ensure_global_imports(&frame.template)?;
        self.global_imports
            .borrow()
            .get(frame.template.class_name())
            .and_then(|imports| imports.get(alias))
            .cloned()
            .ok_or_else(|| TemplateError::runtime(format!("Variable \"{alias}\" does not exist.")))
    }

    /// Run the top-level imports of a template whose body has not been displayed in this render.
    fn ensure_global_imports(&self, template: &Arc<Template>) -> Result<(), TemplateError> {
        if self.global_imports.borrow().contains_key(template.class_name()) {
            return Ok(());
        }
        self.global_imports.borrow_mut().insert(template.class_name().to_string(), Imports::new());
        let mut frame = Frame::new(template.clone(), self.merge_globals(Map::new())?, Blocks::new());
        for node in top_level(&template.module().body) {
            if matches!(&node.kind, NodeKind::Import { global: true, .. }) {
                self.render_node(&mut frame, node, &mut String::new())?;
            }
        }
        Ok(())
    }

    fn find_macro(&self, template: &Arc<Template>, name: &str, context: &Map) -> Result<Option<Arc<Template>>, TemplateError> {
        let mut current = template.clone();
        loop {
            if current.module().macros.contains_key(name) {
                return Ok(Some(current));
            }
            match self.parent_of(&current, context)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    fn call_macro(&self, frame: &Frame, alias: &str, name: &str, args: &[Arg]) -> Result<Value, TemplateError> {
        let template = self.imported(frame, alias)?;
        let Some(owner) = self.find_macro(&template, name, &frame.context)? else {
            return Err(TemplateError::runtime(format!(
                "Macro \"{name}\" is not defined in template \"{}\".",
                template.name()
            )));
        };
        let Some(node) = owner.module().macros.get(name) else {
            return Err(TemplateError::runtime(format!("Macro \"{name}\" is not defined in template \"{}\".", owner.name())));
        };

        let mut positional = Vec::new();
        let mut named = Map::new();
        for arg in args {
            let value = self.eval(frame, &arg.value)?;
            match &arg.name {
                Some(arg_name) => {
                    named.insert(arg_name.clone(), value);
                }
                None => positional.push(value),
            }
        }

        let _depth = self.enter(owner.name())?;
        let defaults = Frame::new(owner.clone(), Map::new(), Blocks::new());
        let mut context = Map::new();
        let mut positional = positional.into_iter();
        for (param, default) in &node.params {
            let value = match positional.next() {
                Some(_) if named.contains_key(param) => {
                    return Err(TemplateError::runtime(format!(
                        "Argument \"{param}\" is defined twice for macro \"{name}\"."
                    )));
                }
                Some(value) => value,
                None => match named.shift_remove(param) {
                    Some(value) => value,
                    None => self.eval(&defaults, default)?,
                },
            };
            context.insert(param.clone(), value);
        }
        if let Some(unknown) = named.keys().next() {
            return Err(TemplateError::runtime(format!("Macro \"{name}\" has no argument named \"{unknown}\".")));
        }
        context.insert(VARARGS.to_string(), Value::Seq(positional.collect()));

        let mut frame = Frame::new(owner.clone(), self.merge_globals(context)?, Blocks::new());
        let mut buffer = String::new();
        self.render_node(&mut frame, &node.body, &mut buffer)?;
        Ok(markup(buffer))
    }

    fn call_closure(&self, closure: &Closure, args: &[Value]) -> Result<Value, TemplateError> {
        let mut context = closure.captured.clone();
        for (i, param) in closure.params.iter().enumerate() {
            context.insert(param.clone(), args.get(i).cloned().unwrap_or_default());
        }
        let frame = Frame {
            template: closure.template.clone(),
            context,
            blocks: Blocks::new(),
            imports: closure.imports.clone(),
        };
        self.eval(&frame, &closure.body)
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    fn render_node(&self, frame: &mut Frame, node: &Node, out: &mut String) -> Result<(), TemplateError> {
        self.render_node_inner(frame, node, out)
            .map_err(|err| err.with_location_if_missing(node.line, frame.template.source()))
    }

    fn render_node_inner(&self, frame: &mut Frame, node: &Node, out: &mut String) -> Result<(), TemplateError> {
        match &node.kind {
            NodeKind::Body(nodes) => {
                for child in nodes {
                    self.render_node(frame, child, out)?;
                }
            }
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Print(expr) => {
                let value = self.eval(frame, expr)?;
                out.push_str(&self.output(&value)?);
            }
            NodeKind::If { tests, otherwise } => {
                for (test, body) in tests {
                    if self.eval(frame, test)?.is_truthy() {
                        return self.render_node(frame, body, out);
                    }
                }
                if let Some(otherwise) = otherwise {
                    self.render_node(frame, otherwise, out)?;
                }
            }
            NodeKind::For { key, value, seq, body, otherwise, with_loop } => {
                let seq = self.eval(frame, seq)?;
                let pairs = seq.pairs().unwrap_or_default();
                let parent = frame.context.clone();
                let length = pairs.len();
                for (index, (k, v)) in pairs.into_iter().enumerate() {
                    frame.context.insert(key.clone(), k);
                    frame.context.insert(value.clone(), v);
                    if *with_loop {
                        frame.context.insert("loop".to_string(), loop_variable(index, length, &parent));
                    }
                    self.render_node(frame, body, out)?;
                }
                if length == 0 {
                    if let Some(otherwise) = otherwise {
                        self.render_node(frame, otherwise, out)?;
                    }
                }
                // Variables that existed before the loop keep their new values; the rest go.
                let mut restored = Map::with_capacity(parent.len());
                for (name, old) in parent {
                    let keep_old = name == *key || name == *value || name == "loop";
                    let current = if keep_old { None } else { frame.context.swap_remove(&name) };
                    restored.insert(name, current.unwrap_or(old));
                }
                frame.context = restored;
            }
            NodeKind::BlockReference(name) => {
                let template = frame.template.clone();
                self.display_block(&template, name, &frame.context, &frame.blocks, true, out)?;
            }
            NodeKind::Set { names, value } => match value {
                SetValue::Capture(body) => {
                    let mut buffer = String::new();
                    self.render_node(frame, body, &mut buffer)?;
                    if let Some(name) = names.first() {
                        frame.context.insert(name.clone(), markup(buffer));
                    }
                }
                SetValue::Exprs(exprs) => {
                    let values = exprs.iter().map(|expr| self.eval(frame, expr)).collect::<Result<Vec<_>, _>>()?;
                    for (name, value) in names.iter().zip(values) {
                        frame.context.insert(name.clone(), value);
                    }
                }
            },
            NodeKind::With { variables, only, body } => {
                let mut context = if *only { Map::new() } else { frame.context.clone() };
                if let Some(variables) = variables {
                    let value = self.eval(frame, variables)?;
                    let vars = to_map(&value)
                        .ok_or_else(|| TemplateError::runtime("Variables passed to the \"with\" tag must be a mapping."))?;
                    context.extend(vars);
                }
                let context = self.merge_globals(context)?;
                let saved = std::mem::replace(&mut frame.context, context);
                let result = self.render_node(frame, body, out);
                frame.context = saved;
                result?;
            }
            NodeKind::Include { expr, variables, only, ignore_missing } => {
                let template = self.eval(frame, expr)?;
                let variables = variables.as_ref().map(|vars| self.eval(frame, vars)).transpose()?;
                let options = IncludeOptions { with_context: !only, ignore_missing: *ignore_missing, sandboxed: false };
                self.include(frame, &template, variables.as_ref(), options, out)?;
            }
            NodeKind::Embed { index, variables, only, ignore_missing } => {
                let template = self.env.load_embedded(&frame.template, *index)?;
                let variables = variables.as_ref().map(|vars| self.eval(frame, vars)).transpose()?;
                if *ignore_missing {
                    let mut context = if *only { Map::new() } else { frame.context.clone() };
                    if let Some(vars) = variables.as_ref().and_then(to_map) {
                        context.extend(vars);
                    }
                    match self.parent_of(&template, &context) {
                        Err(err) if err.is_loader() => return Ok(()),
                        other => {
                            other?;
                        }
                    }
                }
                let options = IncludeOptions { with_context: !only, ignore_missing: false, sandboxed: false };
                self.include(frame, &Value::Template(template), variables.as_ref(), options, out)?;
            }
            NodeKind::Import { template, var, global } => {
                let loaded = if template.as_name() == Some("_self") {
                    frame.template.clone()
                } else {
                    let value = self.eval(frame, template)?;
                    self.resolve_template(&value)?
                };
                if *global {
                    self.global_imports
                        .borrow_mut()
                        .entry(frame.template.class_name().to_string())
                        .or_default()
                        .insert(var.clone(), loaded);
                } else {
                    frame.imports.insert(var.clone(), loaded);
                }
            }
            NodeKind::Sandbox(body) => {
                let _guard = self.env.sandbox().map(SandboxExtension::enable);
                self.render_node(frame, body, out)?;
            }
            NodeKind::AutoEscape { body, .. } => self.render_node(frame, body, out)?,
            NodeKind::Do(expr) => {
                self.eval(frame, expr)?;
            }
            NodeKind::Flush => {}
            NodeKind::Deprecated(expr) => {
                let message = self.eval(frame, expr)?.to_output()?;
                warn!(template = frame.template.name(), line = node.line, "{message}");
            }
        }
        Ok(())
    }

    /// String conversion for output; objects need the sandbox's permission.
    fn output(&self, value: &Value) -> Result<String, TemplateError> {
        if let (Value::Object(object), Some(sandbox)) = (value, self.sandboxed()) {
            sandbox.ensure_to_string_allowed(object.as_ref())?;
        }
        value.to_output()
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval(&self, frame: &Frame, expr: &Expr) -> Result<Value, TemplateError> {
        self.eval_inner(frame, expr)
            .map_err(|err| err.with_location_if_missing(expr.line, frame.template.source()))
    }

    fn eval_inner(&self, frame: &Frame, expr: &Expr) -> Result<Value, TemplateError> {
        Ok(match &expr.kind {
            ExprKind::Const(literal) => literal_value(literal),
            ExprKind::Name(name) => self.lookup(frame, name)?,
            ExprKind::Array(items) => {
                Value::Seq(items.iter().map(|item| self.eval(frame, item)).collect::<Result<_, _>>()?)
            }
            ExprKind::Hash(pairs) => {
                let mut map = Map::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.eval(frame, key)?.to_output()?;
                    map.insert(key, self.eval(frame, value)?);
                }
                Value::Map(map)
            }
            ExprKind::Unary { op, node } => ops::unary(*op, &self.eval(frame, node)?)?,
            ExprKind::Binary { op, left, right } => self.binary(frame, *op, left, right)?,
            ExprKind::Conditional { test, then, otherwise } => {
                if self.eval(frame, test)?.is_truthy() {
                    self.eval(frame, then)?
                } else {
                    self.eval(frame, otherwise)?
                }
            }
            ExprKind::GetAttr { object, attribute, arguments, call_type } => {
                let target = self.eval(frame, object)?;
                let attribute = self.eval(frame, attribute)?;
                let args = match arguments {
                    Some(arguments) => self.eval(frame, arguments)?.values().unwrap_or_default(),
                    None => Vec::new(),
                };
                self.get_attribute(&target, &attribute, &args, *call_type)?
            }
            ExprKind::MacroCall { template, name, args } => self.call_macro(frame, template, name, args)?,
            ExprKind::Filter { node, name, args } => {
                let input = if name == "default" { self.eval_lenient(frame, node)? } else { self.eval(frame, node)? };
                // escaping stringifies objects
                if let (Value::Object(object), Some(sandbox), "escape" | "e") = (&input, self.sandboxed(), name.as_str()) {
                    sandbox.ensure_to_string_allowed(object.as_ref())?;
                }
                self.call(frame, CallableKind::Filter, name, Some(input), args, expr.line)?
            }
            ExprKind::Function { name, args } => self.call(frame, CallableKind::Function, name, None, args, expr.line)?,
            ExprKind::Test { node, name, args } => {
                if name == "defined" {
                    Value::Bool(self.is_defined(frame, node)?)
                } else {
                    let input = self.eval(frame, node)?;
                    Value::Bool(self.call(frame, CallableKind::Test, name, Some(input), args, expr.line)?.is_truthy())
                }
            }
            ExprKind::Arrow { params, body } => Value::Closure(Arc::new(Closure {
                params: params.clone(),
                body: (**body).clone(),
                captured: frame.context.clone(),
                template: frame.template.clone(),
                imports: frame.imports.clone(),
            })),
            ExprKind::Parent { block } => {
                let mut buffer = String::new();
                self.display_parent_block(frame, block, &mut buffer)?;
                Value::Markup(buffer)
            }
            ExprKind::BlockRef { name, template } => {
                let name = self.eval(frame, name)?.to_output()?;
                let mut buffer = String::new();
                match template {
                    Some(template) => {
                        let value = self.eval(frame, template)?;
                        let loaded = self.resolve_template(&value)?;
                        self.display_block(&loaded, &name, &frame.context, &Blocks::new(), true, &mut buffer)?;
                    }
                    None => {
                        self.display_block(&frame.template, &name, &frame.context, &frame.blocks, true, &mut buffer)?
                    }
                }
                Value::Markup(buffer)
            }
        })
    }

    fn lookup(&self, frame: &Frame, name: &str) -> Result<Value, TemplateError> {
        match name {
            "_self" => return Ok(Value::Str(frame.template.name().to_string())),
            "_context" => return Ok(Value::Map(frame.context.clone())),
            "_charset" => return Ok(Value::Str(self.env.options().charset.clone())),
            _ => {}
        }
        match frame.context.get(name) {
            Some(value) => Ok(value.clone()),
            None if self.env.options().strict_variables => {
                Err(TemplateError::runtime(format!("Variable \"{name}\" does not exist.")))
            }
            None => Ok(Value::Null),
        }
    }

    fn binary(&self, frame: &Frame, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, TemplateError> {
        match op {
            BinaryOp::And => {
                Ok(Value::Bool(self.eval(frame, left)?.is_truthy() && self.eval(frame, right)?.is_truthy()))
            }
            BinaryOp::Or => {
                Ok(Value::Bool(self.eval(frame, left)?.is_truthy() || self.eval(frame, right)?.is_truthy()))
            }
            BinaryOp::NullCoalesce => {
                let value = self.eval_lenient(frame, left)?;
                if value.is_null() { self.eval(frame, right) } else { Ok(value) }
            }
            BinaryOp::HasSome | BinaryOp::HasEvery => {
                let items = self.eval(frame, left)?;
                let arrow = self.eval(frame, right)?;
                let Value::Closure(closure) = &arrow else {
                    return Err(TemplateError::runtime(format!(
                        "The \"{op}\" operator expects an arrow function, got \"{}\".",
                        arrow.type_name()
                    )));
                };
                let every = op == BinaryOp::HasEvery;
                for (key, value) in items.pairs().unwrap_or_default() {
                    let hit = self.call_closure(closure, &[value, key])?.is_truthy();
                    if hit != every {
                        return Ok(Value::Bool(hit));
                    }
                }
                Ok(Value::Bool(every))
            }
            BinaryOp::Concat => {
                let (left, right) = (self.eval(frame, left)?, self.eval(frame, right)?);
                Ok(Value::Str(format!("{}{}", self.output(&left)?, self.output(&right)?)))
            }
            _ => ops::binary(op, &self.eval(frame, left)?, &self.eval(frame, right)?),
        }
    }

    /// Undefined operands of `default` and `??` evaluate to null even with strict variables.
    fn eval_lenient(&self, frame: &Frame, expr: &Expr) -> Result<Value, TemplateError> {
        if self.is_defined(frame, expr)? { self.eval(frame, expr) } else { Ok(Value::Null) }
    }

    fn is_defined(&self, frame: &Frame, expr: &Expr) -> Result<bool, TemplateError> {
        match &expr.kind {
            ExprKind::Name(name) => {
                Ok(matches!(name.as_str(), "_self" | "_context" | "_charset") || frame.context.contains_key(name))
            }
            ExprKind::GetAttr { object, attribute, call_type, .. } => {
                if !self.is_defined(frame, object)? {
                    return Ok(false);
                }
                let target = self.eval(frame, object)?;
                let attribute = self.eval(frame, attribute)?;
                Ok(attribute_exists(&target, &attribute, *call_type))
            }
            ExprKind::BlockRef { name, template } => {
                let name = self.eval(frame, name)?.to_output()?;
                match template {
                    Some(template) => {
                        let value = self.eval(frame, template)?;
                        let loaded = self.resolve_template(&value)?;
                        self.has_block(&loaded, &name, &frame.context, &Blocks::new())
                    }
                    None => self.has_block(&frame.template, &name, &frame.context, &frame.blocks),
                }
            }
            ExprKind::MacroCall { template, name, .. } => match self.imported(frame, template) {
                Ok(template) => Ok(self.find_macro(&template, name, &frame.context)?.is_some()),
                Err(_) => Ok(false),
            },
            _ => Ok(true),
        }
    }

    fn get_attribute(&self, target: &Value, attribute: &Value, args: &[Value], call_type: CallType) -> Result<Value, TemplateError> {
        let name = attribute.to_display();
        let strict = self.env.options().strict_variables;

        if call_type != CallType::Method {
            if let Value::Seq(_) | Value::Map(_) = target {
                return match target.item(attribute) {
                    Some(found) => Ok(found),
                    None if strict => Err(missing_key(target, &name)),
                    None => Ok(Value::Null),
                };
            }
            if call_type == CallType::Array {
                return if strict {
                    Err(TemplateError::runtime(format!(
                        "Impossible to access a key (\"{name}\") on a {}.",
                        describe_variable(target)
                    )))
                } else {
                    Ok(Value::Null)
                };
            }
        }

        let Value::Object(object) = target else {
            if !strict {
                return Ok(Value::Null);
            }
            let verb = if call_type == CallType::Method { "invoke a method" } else { "access an attribute" };
            return Err(TemplateError::runtime(format!(
                "Impossible to {verb} (\"{name}\") on a {}.",
                describe_variable(target)
            )));
        };

        if call_type == CallType::Any {
            if let Some(value) = object.property(&name) {
                if let Some(sandbox) = self.sandboxed() {
                    sandbox.check_property_allowed(object.as_ref(), &name)?;
                }
                return Ok(value);
            }
        }
        if let Some(method) = method_name(object.as_ref(), &name) {
            if let Some(sandbox) = self.sandboxed() {
                sandbox.check_method_allowed(object.as_ref(), &method)?;
            }
            return object.call_method(&method, args);
        }
        if strict {
            return Err(TemplateError::runtime(format!(
                "Neither the property \"{name}\" nor one of the methods \"{name}()\", \"get{name}()\"/\"is{name}()\"/\"has{name}()\" or \"__call()\" exist and have public access in class \"{}\".",
                object.class_name()
            )));
        }
        Ok(Value::Null)
    }

    fn call(
        &self,
        frame: &Frame,
        kind: CallableKind,
        name: &str,
        input: Option<Value>,
        args: &[Arg],
        line: usize,
    ) -> Result<Value, TemplateError> {
        let extensions = self.env.extensions();
        let found = extensions
            .resolve(kind, name)?
            .ok_or_else(|| TemplateError::runtime(format!("Unknown \"{name}\" {kind}.")))?;
        let Some(implementation) = extensions.implementation(&found.callable) else {
            return Err(TemplateError::runtime(format!("Unable to load the runtime for {kind} \"{name}\".")));
        };

        let mut values: Vec<Value> = input.into_iter().collect();
        let mut named = Map::new();
        for arg in args {
            let value = self.eval(frame, &arg.value)?;
            match &arg.name {
                Some(arg_name) => {
                    named.insert(arg_name.clone(), value);
                }
                None => values.push(value),
            }
        }
        if !named.is_empty() {
            values.push(Value::Map(named));
        }
        let ctx = CallContext { renderer: self, frame, line };
        (*implementation)(&ctx, &values)
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(n) => Value::Float(*n),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

/// Captured output is safe markup; nothing captured stays a plain empty string.
fn markup(buffer: String) -> Value {
    if buffer.is_empty() { Value::Str(buffer) } else { Value::Markup(buffer) }
}

fn loop_variable(index: usize, length: usize, parent: &Map) -> Value {
    let mut map = Map::new();
    map.insert("parent".to_string(), Value::Map(parent.clone()));
    map.insert("index0".to_string(), Value::from(index));
    map.insert("index".to_string(), Value::from(index + 1));
    map.insert("revindex0".to_string(), Value::from(length - index - 1));
    map.insert("revindex".to_string(), Value::from(length - index));
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == length));
    map.insert("length".to_string(), Value::from(length));
    Value::Map(map)
}

pub(crate) fn to_map(value: &Value) -> Option<Map> {
    match value {
        Value::Map(map) => Some(map.clone()),
        Value::Seq(items) => Some(items.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())).collect()),
        _ => None,
    }
}

fn top_level(body: &Node) -> &[Node] {
    match &body.kind {
        NodeKind::Body(nodes) => nodes,
        _ => std::slice::from_ref(body),
    }
}

/// No parent, no macros, and nothing in the body but block definitions.
fn is_traitable(module: &ModuleNode) -> bool {
    module.parent.is_none()
        && module.macros.is_empty()
        && top_level(&module.body).iter().all(|node| match &node.kind {
            NodeKind::Text(text) => text.trim().is_empty(),
            NodeKind::BlockReference(_) => true,
            NodeKind::Body(nodes) => nodes.is_empty(),
            _ => false,
        })
}

fn method_name(object: &dyn TemplateObject, name: &str) -> Option<String> {
    let mut chars = name.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => return None,
    };
    [name.to_string(), format!("get{capitalized}"), format!("is{capitalized}"), format!("has{capitalized}")]
        .into_iter()
        .find(|candidate| object.has_method(candidate))
}

fn attribute_exists(target: &Value, attribute: &Value, call_type: CallType) -> bool {
    match target {
        Value::Seq(_) | Value::Map(_) => call_type != CallType::Method && target.item(attribute).is_some(),
        Value::Object(object) if call_type != CallType::Array => {
            let name = attribute.to_display();
            object.property(&name).is_some() || method_name(object.as_ref(), &name).is_some()
        }
        _ => false,
    }
}

fn describe_variable(value: &Value) -> String {
    match value {
        Value::Null => "null variable".to_string(),
        Value::Seq(_) | Value::Map(_) => "sequence/mapping".to_string(),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Markup(_) => {
            format!("{} variable (\"{}\")", value.type_name(), value.to_display())
        }
        other => format!("{} variable", other.type_name()),
    }
}

fn missing_key(target: &Value, name: &str) -> TemplateError {
    let keys: Vec<String> = match target {
        Value::Seq(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        Value::Map(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };
    if keys.is_empty() {
        TemplateError::runtime(format!("Key \"{name}\" does not exist as the sequence/mapping is empty."))
    } else {
        TemplateError::runtime(format!(
            "Key \"{name}\" for sequence/mapping with keys \"{}\" does not exist.",
            keys.join(", ")
        ))
    }
}
