mod common;

use std::any::Any;
use std::sync::Arc;

use common::{env, try_render_with};
use indexmap::IndexMap;
use tessera::extension::{
    BinaryOperator, CallableFn, CallableKind, RuntimeLoader, TemplateFilter, UnaryOperator, VisitorFactory,
};
use tessera::lexer::{Token, TokenKind};
use tessera::parser::Parser;
use tessera::parser::ast::{BinaryOp, Expr, ExprKind, Node, NodeKind, UnaryOp};
use tessera::parser::tags::TokenParser;
use tessera::runtime::CallContext;
use tessera::visit::NodeVisitor;
use tessera::{Environment, Extension, TemplateCallable, TemplateError, Value};

/// `{% greet expr %}` prints "Hello, " followed by the expression.
struct GreetTag;

impl TokenParser for GreetTag {
    fn tag(&self) -> &'static str {
        "greet"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let who = parser.parse_expression(0)?;
        parser.stream().expect(TokenKind::BlockEnd, None, None)?;
        let expr = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Concat,
                left: Box::new(Expr::string("Hello, ", token.line)),
                right: Box::new(who),
            },
            token.line,
        );
        Ok(Some(Node::new(NodeKind::Print(expr), token.line)))
    }
}

struct Greeting;

impl Extension for Greeting {
    fn name(&self) -> &'static str {
        "greeting"
    }

    fn token_parsers(&self) -> Vec<Arc<dyn TokenParser>> {
        vec![Arc::new(GreetTag)]
    }

    fn filters(&self) -> Vec<TemplateFilter> {
        vec![TemplateCallable::filter("shout", |_, args| Ok(Value::from(args[0].to_display().to_uppercase())))]
    }

    fn operators(&self) -> (Vec<UnaryOperator>, Vec<BinaryOperator>) {
        (vec![UnaryOperator::new("neg", 500, UnaryOp::Neg)], vec![BinaryOperator::new("plus", 30, BinaryOp::Add)])
    }

    fn globals(&self) -> IndexMap<String, Value> {
        IndexMap::from([("site".to_string(), Value::from("tessera"))])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Claims the `if` tag a second time.
struct Clashing;

impl Extension for Clashing {
    fn name(&self) -> &'static str {
        "clashing"
    }

    fn token_parsers(&self) -> Vec<Arc<dyn TokenParser>> {
        vec![Arc::new(RenamedIf)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RenamedIf;

impl TokenParser for RenamedIf {
    fn tag(&self) -> &'static str {
        "if"
    }

    fn parse(&self, _token: &Token, _parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        Ok(None)
    }
}

#[test]
fn extension_contributes_tags_filters_operators_and_globals() {
    let mut env = env(&[("index", "{% greet 'bob'|shout %} {{ neg 2 plus 5 }} {{ site }}")]);
    env.add_extension(Greeting).unwrap();
    assert!(env.extension::<Greeting>().is_some());
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "Hello, BOB 3 tessera");
}

#[test]
fn extensions_change_class_names() {
    let plain = env(&[]);
    let mut extended = env(&[]);
    extended.add_extension(Greeting).unwrap();
    assert_ne!(plain.template_class("index", None), extended.template_class("index", None));
    assert!(extended.extensions().signature().ends_with(",\"greeting\"]"));
}

#[test]
fn duplicate_registrations_are_rejected() {
    let mut env = env(&[("index", "x")]);
    env.add_extension(Greeting).unwrap();
    let err = env.add_extension(Greeting).unwrap_err();
    assert_eq!(err.message(), "Unable to register extension \"greeting\" as it is already registered.");

    let mut env = common::env(&[("index", "x")]);
    env.add_extension(Clashing).unwrap();
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert_eq!(err.message(), "Tag \"if\" is already registered.");
}

#[test]
fn registration_closes_after_first_render() {
    let mut env = env(&[("index", "{{ site }}")]);
    env.add_global("site", "a").unwrap();
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "a");

    let err = env.add_filter(TemplateCallable::filter("late", |_, _| Ok(Value::Null))).unwrap_err();
    assert_eq!(err.message(), "Unable to add filter \"late\" as extensions have already been initialized.");
    assert!(env.add_extension(Greeting).is_err());

    env.add_global("site", "b").unwrap();
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "b");
    assert!(env.add_global("other", 1).is_err());
}

#[test]
fn callables_see_the_render_context() {
    let mut env = env(&[("index", "{{ who() }}")]);
    env.add_function(
        TemplateCallable::function("who", |ctx, _| Ok(ctx.context().get("user").cloned().unwrap_or(Value::Null)))
            .needs_context(),
    )
    .unwrap();
    assert_eq!(try_render_with(&env, "index", r#"{"user": "ann"}"#).unwrap(), "ann");
}

#[test]
fn named_arguments_follow_declared_names() {
    let mut env = env(&[("index", "{{ pad(width = 3, text = 'a') }}|{{ pad('b', 2) }}")]);
    env.add_function(
        TemplateCallable::function("pad", |_, args| {
            let width = args.get(1).and_then(Value::as_int).unwrap_or(0) as usize;
            Ok(Value::from(format!("{:>width$}", args[0].to_display())))
        })
        .with_args(&["text", "width"]),
    )
    .unwrap();
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "  a| b");
}

#[test]
fn deprecated_callables_still_run() {
    let mut env = env(&[("index", "{{ 'x'|old }}")]);
    env.add_filter(TemplateCallable::filter("old", |_, args| Ok(args[0].clone())).deprecated("2.0", Some("new")))
        .unwrap();
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "x");
}

/// Supplies implementations for `host_*` functions.
struct HostRuntime;

impl RuntimeLoader for HostRuntime {
    fn load(&self, kind: CallableKind, name: &str) -> Option<CallableFn> {
        if kind != CallableKind::Function {
            return None;
        }
        let reply = name.trim_start_matches("host_").to_string();
        Some(Arc::new(move |_: &CallContext<'_>, _: &[Value]| Ok(Value::from(reply.clone()))))
    }
}

fn host_env() -> Environment {
    let mut env = env(&[("index", "{{ host_clock() }}")]);
    env.register_undefined_function_callback(Arc::new(|name: &str| {
        name.starts_with("host_").then(|| TemplateCallable::deferred(CallableKind::Function, name))
    }));
    env
}

#[test]
fn undefined_callables_resolve_through_runtime_loaders() {
    let mut env = host_env();
    env.add_runtime_loader(HostRuntime);
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "clock");

    let err = try_render_with(&host_env(), "index", "{}").unwrap_err();
    assert_eq!(err.message(), "Unable to load the runtime for function \"host_clock\".");
}

/// Upper-cases every text node.
struct Shouting;

impl NodeVisitor for Shouting {
    fn leave_node(&mut self, mut node: Node, _env: &Environment) -> Option<Node> {
        if let NodeKind::Text(text) = &mut node.kind {
            *text = text.to_uppercase();
        }
        Some(node)
    }
}

#[test]
fn node_visitors_rewrite_the_tree() {
    let mut env = env(&[("index", "hello {{ name }}{% block b %} world{% endblock %}")]);
    let factory: VisitorFactory = Arc::new(|| Box::new(Shouting) as Box<dyn NodeVisitor>);
    env.add_node_visitor(factory).unwrap();
    assert_eq!(try_render_with(&env, "index", r#"{"name": "ann"}"#).unwrap(), "HELLO ann WORLD");
}
