use crate::parser::ast::*;

use super::Compiler;

/// Every AST type knows how to emit itself through a [`Compiler`].
pub trait Compile {
    fn compile(&self, compiler: &mut Compiler<'_>);
}

// ── Module ───────────────────────────────────────────────────────────

pub(super) fn module(c: &mut Compiler<'_>, module: &ModuleNode, class_name: &str) {
    c.write(&format!("// Generated from {:?}.\n\n", module.name()));
    c.write(&format!("pub struct {class_name};\n\n"));
    c.write(&format!("impl {class_name} {{\n")).indent();

    c.write("pub const TEMPLATE_NAME: &'static str = ").string(module.name()).raw(";\n");
    if let Some(check) = &module.security_check {
        security_constants(c, check);
    }

    if let Some(parent) = &module.parent {
        c.raw("\n").write("pub fn parent(rt: &mut Runtime, context: &Context) -> Result<Option<Value>> {\n").indent();
        c.add_debug_info(parent.line);
        c.write("Ok(Some(").subcompile(parent).raw("))\n");
        c.outdent().write("}\n");
    }

    if !module.traits.is_empty() {
        c.raw("\n").write("pub fn use_traits(rt: &mut Runtime) -> Result<Blocks> {\n").indent();
        c.write("let mut blocks = Blocks::new();\n");
        for trait_use in &module.traits {
            c.add_debug_info(trait_use.template.line);
            c.write("rt.use_trait(&mut blocks, ").subcompile(&trait_use.template).raw(", &[");
            for (i, (from, to)) in trait_use.targets.iter().enumerate() {
                if i > 0 {
                    c.raw(", ");
                }
                c.raw("(").string(from).raw(", ").string(to).raw(")");
            }
            c.raw("])?;\n");
        }
        c.write("Ok(blocks)\n");
        c.outdent().write("}\n");
    }

    if !module.blocks.is_empty() {
        c.raw("\n").write("pub const BLOCKS: &'static [&'static str] = &[");
        for (i, name) in module.blocks.keys().enumerate() {
            if i > 0 {
                c.raw(", ");
            }
            c.string(name);
        }
        c.raw("];\n");
    }

    c.raw("\n").write("pub fn display(rt: &mut Runtime, context: &mut Context, blocks: &Blocks) -> Result<()> {\n");
    c.indent();
    if module.security_check.is_some() {
        c.write("Self::check_security(rt)?;\n");
    }
    c.subcompile(&module.body);
    if module.parent.is_some() {
        c.write("rt.display_parent(Self::parent(rt, context)?, context, blocks)?;\n");
    }
    c.write("Ok(())\n");
    c.outdent().write("}\n");

    for block in module.blocks.values() {
        c.raw("\n");
        c.write(&format!(
            "pub fn block_{}(rt: &mut Runtime, context: &mut Context, blocks: &Blocks) -> Result<()> {{\n",
            ident(&block.name)
        ));
        c.indent().subcompile(&block.body).write("Ok(())\n").outdent().write("}\n");
    }

    for m in module.macros.values() {
        macro_fn(c, m);
    }

    c.outdent().write("}\n");

    for embedded in &module.embedded {
        let class_name = c.env().template_class(embedded.name(), embedded.index);
        c.raw("\n");
        self::module(c, embedded, &class_name);
    }
}

fn security_constants(c: &mut Compiler<'_>, check: &SecurityCheck) {
    let groups = [("SANDBOX_TAGS", &check.tags), ("SANDBOX_FILTERS", &check.filters), ("SANDBOX_FUNCTIONS", &check.functions)];
    for (name, used) in groups {
        c.write(&format!("pub const {name}: &'static [(&'static str, usize)] = &["));
        for (i, (symbol, line)) in used.iter().enumerate() {
            if i > 0 {
                c.raw(", ");
            }
            c.raw("(").string(symbol).raw(&format!(", {line})"));
        }
        c.raw("];\n");
    }
    c.raw("\n").write("fn check_security(rt: &mut Runtime) -> Result<()> {\n").indent();
    c.write("rt.check_security(Self::SANDBOX_TAGS, Self::SANDBOX_FILTERS, Self::SANDBOX_FUNCTIONS)\n");
    c.outdent().write("}\n");
}

fn macro_fn(c: &mut Compiler<'_>, m: &MacroNode) {
    c.raw("\n").write(&format!("pub fn macro_{}(rt: &mut Runtime, args: Args) -> Result<Value> {{\n", ident(&m.name)));
    c.indent();
    c.add_debug_info(m.line);
    c.write("let mut context = rt.macro_context(&[");
    for (i, (param, default)) in m.params.iter().enumerate() {
        if i > 0 {
            c.raw(", ");
        }
        c.raw("(").string(param).raw(", ").subcompile(default).raw(")");
    }
    c.raw("], args)?;\n");
    c.write("rt.capture(|rt| {\n").indent();
    c.subcompile(&m.body).write("Ok(())\n");
    c.outdent().write("})\n");
    c.outdent().write("}\n");
}

/// Block and macro names are template identifiers; anything else is replaced.
fn ident(name: &str) -> String {
    name.chars().map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' }).collect()
}

// ── Statements ───────────────────────────────────────────────────────

impl Compile for Node {
    fn compile(&self, c: &mut Compiler<'_>) {
        if let NodeKind::Body(nodes) = &self.kind {
            for node in nodes {
                c.subcompile(node);
            }
            return;
        }
        c.add_debug_info(self.line);
        match &self.kind {
            NodeKind::Body(_) => {}
            NodeKind::Text(text) => {
                c.write("rt.write(").string(text).raw(");\n");
            }
            NodeKind::Print(expr) => {
                c.write("rt.echo(").subcompile(expr).raw(")?;\n");
            }
            NodeKind::If { tests, otherwise } => {
                for (i, (test, body)) in tests.iter().enumerate() {
                    if i == 0 {
                        c.write("if ");
                    } else {
                        c.outdent().write("} else if ");
                    }
                    c.raw("rt.truthy(&").subcompile(test).raw(") {\n").indent();
                    c.subcompile(body);
                }
                if let Some(otherwise) = otherwise {
                    c.outdent().write("} else {\n").indent();
                    c.subcompile(otherwise.as_ref());
                }
                c.outdent().write("}\n");
            }
            NodeKind::For { key, value, seq, body, otherwise, with_loop } => {
                let items = c.var_name();
                let iterated = c.var_name();
                c.write(&format!("let {items} = rt.iterable(")).subcompile(seq).raw(");\n");
                c.write(&format!("let {iterated} = rt.for_each(&{items}, context, "))
                    .string(key)
                    .raw(", ")
                    .string(value)
                    .raw(&format!(", {with_loop}, |rt, context| {{\n"))
                    .indent();
                c.subcompile(body.as_ref()).write("Ok(())\n");
                c.outdent().write("})?;\n");
                if let Some(otherwise) = otherwise {
                    c.write(&format!("if !{iterated} {{\n")).indent();
                    c.subcompile(otherwise.as_ref());
                    c.outdent().write("}\n");
                }
            }
            NodeKind::BlockReference(name) => {
                c.write("rt.display_block(").string(name).raw(", context, blocks)?;\n");
            }
            NodeKind::Set { names, value } => match value {
                SetValue::Exprs(values) => {
                    for (name, value) in names.iter().zip(values) {
                        c.write("context.set(").string(name).raw(", ").subcompile(value).raw(");\n");
                    }
                }
                SetValue::Capture(body) => {
                    let captured = c.var_name();
                    c.write(&format!("let {captured} = rt.capture(|rt| {{\n")).indent();
                    c.subcompile(body.as_ref()).write("Ok(())\n");
                    c.outdent().write("})?;\n");
                    for name in names {
                        c.write("context.set(").string(name).raw(&format!(", {captured}.clone());\n"));
                    }
                }
            },
            NodeKind::With { variables, only, body } => {
                c.write("{\n").indent();
                c.write("let mut context = rt.with_context(context, ");
                optional(c, variables.as_ref());
                c.raw(&format!(", {only})?;\n"));
                c.subcompile(body.as_ref());
                c.outdent().write("}\n");
            }
            NodeKind::Include { expr, variables, only, ignore_missing } => {
                c.write("rt.include(context, ").subcompile(expr).raw(", ");
                optional(c, variables.as_ref());
                c.raw(&format!(", {}, {ignore_missing}, {})?;\n", !only, self.line));
            }
            NodeKind::Embed { index, variables, only, ignore_missing } => {
                c.write(&format!("rt.embed(context, Self::TEMPLATE_NAME, {index}, "));
                optional(c, variables.as_ref());
                c.raw(&format!(", {}, {ignore_missing}, {})?;\n", !only, self.line));
            }
            NodeKind::Import { template, var, global } => {
                let target = if *global { "rt.globals_mut()" } else { "context" };
                c.write(&format!("{target}.set(")).string(var).raw(", rt.load_template(").subcompile(template);
                c.raw(&format!(", {})?);\n", self.line));
            }
            NodeKind::Sandbox(body) => {
                c.write("{\n").indent();
                c.write("let _guard = rt.enable_sandbox();\n");
                c.subcompile(body.as_ref());
                c.outdent().write("}\n");
            }
            NodeKind::AutoEscape { body, .. } => {
                c.subcompile(body.as_ref());
            }
            NodeKind::Do(expr) => {
                c.write("let _ = ").subcompile(expr).raw(";\n");
            }
            NodeKind::Flush => {
                c.write("rt.flush();\n");
            }
            NodeKind::Deprecated(expr) => {
                c.write("rt.deprecated(").subcompile(expr).raw(&format!(", {});\n", self.line));
            }
        }
    }
}

fn optional(c: &mut Compiler<'_>, expr: Option<&Expr>) {
    match expr {
        Some(expr) => {
            c.raw("Some(").subcompile(expr).raw(")");
        }
        None => {
            c.raw("None");
        }
    }
}

// ── Expressions ──────────────────────────────────────────────────────

fn arguments(c: &mut Compiler<'_>, args: &[Arg]) {
    c.raw("&[");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            c.raw(", ");
        }
        match &arg.name {
            Some(name) => c.raw("named(").string(name).raw(", "),
            None => c.raw("arg("),
        };
        c.subcompile(&arg.value).raw(")");
    }
    c.raw("]");
}

impl Compile for Expr {
    fn compile(&self, c: &mut Compiler<'_>) {
        let line = self.line;
        match &self.kind {
            ExprKind::Const(literal) => {
                c.repr(literal);
            }
            ExprKind::Name(name) => match name.as_str() {
                "_self" => {
                    c.raw("Value::from(Self::TEMPLATE_NAME)");
                }
                "_context" => {
                    c.raw("context.to_value()");
                }
                "_charset" => {
                    c.raw("rt.charset()");
                }
                _ if c.env().options().strict_variables => {
                    c.raw("context.get_strict(").string(name).raw(&format!(", {line})?"));
                }
                _ => {
                    c.raw("context.get(").string(name).raw(")");
                }
            },
            ExprKind::Array(items) => {
                c.raw("Value::seq([");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        c.raw(", ");
                    }
                    c.subcompile(item);
                }
                c.raw("])");
            }
            ExprKind::Hash(pairs) => {
                c.raw("Value::map([");
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        c.raw(", ");
                    }
                    c.raw("(").subcompile(key).raw(", ").subcompile(value).raw(")");
                }
                c.raw("])");
            }
            ExprKind::Unary { op, node } => {
                c.raw(&format!("rt.unary(UnaryOp::{op:?}, ")).subcompile(node.as_ref()).raw(")?");
            }
            ExprKind::Binary { op: BinaryOp::And, left, right } => {
                c.raw("Value::Bool(rt.truthy(&").subcompile(left.as_ref());
                c.raw(") && rt.truthy(&").subcompile(right.as_ref()).raw("))");
            }
            ExprKind::Binary { op: BinaryOp::Or, left, right } => {
                c.raw("Value::Bool(rt.truthy(&").subcompile(left.as_ref());
                c.raw(") || rt.truthy(&").subcompile(right.as_ref()).raw("))");
            }
            ExprKind::Binary { op: BinaryOp::NullCoalesce, left, right } => {
                c.raw("rt.coalesce(|rt| ").subcompile(left.as_ref()).raw(", |rt| ").subcompile(right.as_ref()).raw(")?");
            }
            ExprKind::Binary { op, left, right } => {
                c.raw(&format!("rt.binary(BinaryOp::{op:?}, "));
                c.subcompile(left.as_ref()).raw(", ").subcompile(right.as_ref()).raw(")?");
            }
            ExprKind::Conditional { test, then, otherwise } => {
                c.raw("(if rt.truthy(&").subcompile(test.as_ref()).raw(") { ");
                c.subcompile(then.as_ref()).raw(" } else { ").subcompile(otherwise.as_ref()).raw(" })");
            }
            ExprKind::GetAttr { object, attribute, arguments, call_type } => {
                c.raw("rt.get_attribute(").subcompile(object.as_ref()).raw(", ").subcompile(attribute.as_ref());
                c.raw(", ");
                optional(c, arguments.as_deref());
                c.raw(&format!(", CallType::{call_type:?}, {line})?"));
            }
            ExprKind::MacroCall { template, name, args } => {
                c.raw("rt.call_macro(");
                if template == "_self" {
                    c.raw("Value::from(Self::TEMPLATE_NAME)");
                } else {
                    c.raw("context.get(").string(template).raw(")");
                }
                c.raw(", ").string(name).raw(", ");
                arguments(c, args);
                c.raw(&format!(", {line})?"));
            }
            ExprKind::Filter { node, name, args } => {
                c.raw("rt.call_filter(").string(name).raw(", ").subcompile(node.as_ref()).raw(", ");
                arguments(c, args);
                c.raw(&format!(", {line})?"));
            }
            ExprKind::Function { name, args } => {
                c.raw("rt.call_function(").string(name).raw(", ");
                arguments(c, args);
                c.raw(&format!(", {line})?"));
            }
            ExprKind::Test { node, name, .. } if name == "defined" => {
                match node.as_name() {
                    Some(var) => c.raw("Value::Bool(context.contains(").string(var).raw("))"),
                    None => c.raw("Value::Bool(rt.is_defined(|rt| ").subcompile(node.as_ref()).raw("))"),
                };
            }
            ExprKind::Test { node, name, args } => {
                c.raw("rt.call_test(").string(name).raw(", ").subcompile(node.as_ref()).raw(", ");
                arguments(c, args);
                c.raw(&format!(", {line})?"));
            }
            ExprKind::Arrow { params, body } => {
                c.raw("Value::closure(&[");
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        c.raw(", ");
                    }
                    c.string(param);
                }
                c.raw("], move |rt, context| Ok(").subcompile(body.as_ref()).raw("))");
            }
            ExprKind::Parent { block } => {
                c.raw("rt.render_parent_block(").string(block).raw(", context, blocks)?");
            }
            ExprKind::BlockRef { name, template } => {
                c.raw("rt.render_block(").subcompile(name.as_ref()).raw(", ");
                optional(c, template.as_deref());
                c.raw(", context, blocks)?");
            }
        }
    }
}
