#![allow(dead_code)]

use tessera::config::{Autoescape, EnvironmentOptions};
use tessera::{ArrayLoader, Environment, Map, TemplateError, Value};

/// An environment over in-memory templates with default options.
pub fn env(templates: &[(&str, &str)]) -> Environment {
    Environment::new(ArrayLoader::new(templates.iter().copied()))
}

/// Same, with autoescaping turned off.
pub fn raw_env(templates: &[(&str, &str)]) -> Environment {
    let options = EnvironmentOptions { autoescape: Autoescape::Enabled(false), ..EnvironmentOptions::default() };
    Environment::with_options(ArrayLoader::new(templates.iter().copied()), options)
}

/// Build a context from a JSON object literal.
pub fn context(json: &str) -> Map {
    match Value::from(serde_json::from_str::<serde_json::Value>(json).expect("context must be valid JSON")) {
        Value::Map(map) => map,
        other => panic!("context must be a JSON object, got {}", other.type_name()),
    }
}

pub fn try_render_with(env: &Environment, name: &str, ctx: &str) -> Result<String, TemplateError> {
    env.render(name, context(ctx))
}

/// Render `index` from the given templates.
pub fn render(templates: &[(&str, &str)], ctx: &str) -> String {
    try_render(templates, ctx).unwrap_or_else(|err| panic!("render failed: {err}"))
}

pub fn try_render(templates: &[(&str, &str)], ctx: &str) -> Result<String, TemplateError> {
    try_render_with(&env(templates), "index", ctx)
}

/// Render a single template source as `index`.
pub fn render_one(code: &str, ctx: &str) -> String {
    render(&[("index", code)], ctx)
}

pub fn render_error(code: &str, ctx: &str) -> TemplateError {
    match try_render(&[("index", code)], ctx) {
        Ok(out) => panic!("expected an error, rendered {out:?}"),
        Err(err) => err,
    }
}
