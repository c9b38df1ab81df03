mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{context, try_render_with};
use tessera::config::{EnvironmentOptions, SandboxConfig};
use tessera::{ArrayLoader, Environment, TemplateError, TemplateObject, Value};

#[derive(Debug)]
struct Article;

impl TemplateObject for Article {
    fn class_name(&self) -> &str {
        "Article"
    }

    fn property(&self, name: &str) -> Option<Value> {
        match name {
            "title" => Some(Value::from("Hello")),
            "secret" => Some(Value::from("hidden")),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "getSummary" | "delete")
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> Result<Value, TemplateError> {
        Ok(Value::from(format!("{name} called")))
    }

    fn to_template_string(&self) -> Option<String> {
        Some("Article".to_string())
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn policy() -> SandboxConfig {
    SandboxConfig {
        sandboxed: false,
        allowed_tags: strings(&["if"]),
        allowed_filters: strings(&["upper"]),
        allowed_functions: strings(&["range"]),
        allowed_methods: BTreeMap::from([("Article".to_string(), strings(&["getsummary"]))]),
        allowed_properties: BTreeMap::from([("Article".to_string(), strings(&["title"]))]),
    }
}

fn sandboxed_env(templates: &[(&str, &str)], config: SandboxConfig) -> Environment {
    let options = EnvironmentOptions { sandbox: Some(config), ..EnvironmentOptions::default() };
    Environment::with_options(ArrayLoader::new(templates.iter().copied()), options)
}

fn global_env(templates: &[(&str, &str)]) -> Environment {
    sandboxed_env(templates, SandboxConfig { sandboxed: true, ..policy() })
}

fn with_article(env: &Environment, name: &str) -> Result<String, TemplateError> {
    let mut ctx = context("{}");
    ctx.insert("article".to_string(), Value::Object(Arc::new(Article)));
    env.render(name, ctx)
}

#[test]
fn allowed_constructs_render() {
    let env = global_env(&[("index", "{% if true %}{{ 'a'|upper }}{% endif %}{{ range(1, 2)[1] }}")]);
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "A2");
}

#[test]
fn disallowed_tag() {
    let env = global_env(&[("index", "\n{% for i in [1] %}{% endfor %}")]);
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert!(err.is_security());
    assert_eq!(err.to_string(), "Tag \"for\" is not allowed in \"index\" at line 2.");
}

#[test]
fn disallowed_filter_and_function() {
    let env = global_env(&[("index", "{{ 'a'|lower }}"), ("other", "{{ max(1, 2) }}")]);
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert_eq!(err.message(), "Filter \"lower\" is not allowed.");
    let err = try_render_with(&env, "other", "{}").unwrap_err();
    assert_eq!(err.message(), "Function \"max\" is not allowed.");
}

#[test]
fn autoescaping_is_not_a_filter_use() {
    let env = global_env(&[("index", "{{ name }}")]);
    assert_eq!(try_render_with(&env, "index", r#"{"name": "<b>"}"#).unwrap(), "&lt;b&gt;");
}

#[test]
fn object_policy() {
    let env = global_env(&[
        ("title", "{{ article.title }}"),
        ("summary", "{{ article.summary }}"),
        ("secret", "{{ article.secret }}"),
        ("delete", "{{ article.delete() }}"),
        ("print", "{{ article }}"),
    ]);
    assert_eq!(with_article(&env, "title").unwrap(), "Hello");
    assert_eq!(with_article(&env, "summary").unwrap(), "getSummary called");

    let err = with_article(&env, "secret").unwrap_err();
    assert!(err.is_security());
    assert_eq!(err.message(), "Calling \"secret\" property on a \"Article\" object is not allowed.");

    let err = with_article(&env, "delete").unwrap_err();
    assert_eq!(err.message(), "Calling \"delete\" method on a \"Article\" object is not allowed.");

    let err = with_article(&env, "print").unwrap_err();
    assert_eq!(err.message(), "Calling \"__toString\" method on a \"Article\" object is not allowed.");
}

#[test]
fn objects_are_unrestricted_outside_the_sandbox() {
    let env = sandboxed_env(&[("index", "{{ article.delete() }}|{{ article }}")], policy());
    assert_eq!(with_article(&env, "index").unwrap(), "delete called|Article");
}

#[test]
fn sandbox_tag_sandboxes_includes() {
    let env = sandboxed_env(
        &[
            ("index", "{% sandbox %}{% include 'inner' %}{% endsandbox %}"),
            ("inner", "{% for i in [1] %}{{ i }}{% endfor %}"),
            ("safe", "{% sandbox %}{% include 'allowed' %}{% endsandbox %}{% for i in [1] %}{{ i }}{% endfor %}"),
            ("allowed", "{% if true %}ok{% endif %}"),
        ],
        policy(),
    );
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert_eq!(err.to_string(), "Tag \"for\" is not allowed in \"inner\" at line 1.");
    assert!(!env.sandbox().unwrap().is_sandboxed());

    assert_eq!(try_render_with(&env, "safe", "{}").unwrap(), "ok1");
}

#[test]
fn sandbox_tag_only_wraps_includes() {
    let env = sandboxed_env(&[("index", "{% sandbox %}hello{% endsandbox %}")], policy());
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert!(err.is_syntax());
    assert_eq!(err.message(), "Only \"include\" tags are allowed within a \"sandbox\" section.");
}

#[test]
fn sandboxed_include_function() {
    let templates = [("index", "{{ include('inner', sandboxed = true) }}"), ("inner", "{{ 'x'|lower }}")];
    let env = sandboxed_env(&templates, policy());
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert_eq!(err.message(), "Filter \"lower\" is not allowed.");
    assert!(!env.sandbox().unwrap().is_sandboxed());

    let plain = common::env(&templates);
    let err = try_render_with(&plain, "index", "{}").unwrap_err();
    assert_eq!(err.message(), "Templates can only be sandboxed if the \"sandbox\" extension is enabled.");
}

#[test]
fn sandbox_tag_requires_the_extension() {
    let err = common::render_error("{% sandbox %}{% endsandbox %}", "{}");
    assert!(err.is_syntax());
    assert!(err.message().starts_with("Unknown \"sandbox\" tag."));
}
