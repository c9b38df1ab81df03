mod common;

use common::{render_error, render_one};

fn message(code: &str) -> String {
    let err = render_error(code, "{}");
    assert!(err.is_syntax(), "{code}: {err}");
    err.message().to_string()
}

#[test]
fn unknown_tag_with_location() {
    let err = render_error("ok\n{% iff x %}{% endif %}", "{}");
    assert_eq!(err.to_string(), "Unknown \"iff\" tag. Did you mean \"if\" in \"index\" at line 2?");
}

#[test]
fn unclosed_tags() {
    let err = render_error("{% for x in items %}\n{{ x }}", "{}");
    assert_eq!(
        err.message(),
        "Unexpected end of template (expecting closing tag for the \"for\" tag defined near line 1)."
    );
    assert_eq!(err.line(), Some(2));

    assert!(message("{% if a %}{% endfor %}").starts_with("Unexpected \"endfor\" tag"));
}

#[test]
fn mismatched_end_names() {
    assert_eq!(
        message("{% block a %}{% endblock b %}"),
        "Expected endblock for block \"a\" (but \"b\" given)."
    );
    assert_eq!(
        message("{% macro m() %}{% endmacro n %}"),
        "Expected endmacro for macro \"m\" (but \"n\" given)."
    );
    assert_eq!(render_one("{% block a %}x{% endblock a %}", "{}"), "x");
}

#[test]
fn extends_placement() {
    assert_eq!(message("{% extends 'a' %}{% extends 'b' %}"), "Multiple extends tags are forbidden.");
    assert_eq!(message("{% block a %}{% extends 'b' %}{% endblock %}"), "Cannot use \"extend\" in a block.");
    assert_eq!(message("{% macro m() %}{% extends 'b' %}{% endmacro %}"), "Cannot use \"extend\" in a macro.");
}

#[test]
fn parent_function_placement() {
    assert_eq!(
        message("{% extends 'base' %}{% set x = parent() %}"),
        "Calling the \"parent\" function outside of a block is forbidden."
    );
    assert_eq!(
        message("{% block a %}{{ parent() }}{% endblock %}"),
        "Calling the \"parent\" function on a template that does not extend nor \"use\" another template is forbidden."
    );
}

#[test]
fn set_forms() {
    assert_eq!(
        message("{% set a, b = 1 %}"),
        "When using set, you must have the same number of variables and assignments."
    );
    assert_eq!(message("{% set a, b %}x{% endset %}"), "When using set with a block, you cannot have a multi-target.");
    assert_eq!(render_one("{% set a, b = 1, 2 %}{{ b }}{{ a }}", "{}"), "21");
}

#[test]
fn macro_definitions() {
    assert_eq!(
        message("{% macro m() %}{% endmacro %}\n{% macro m() %}{% endmacro %}"),
        "The macro \"m\" has already been defined at line 1."
    );
    assert!(message("{% macro m(varargs) %}{% endmacro %}").contains("is reserved for arbitrary arguments"));
    assert_eq!(
        render_one("{% macro greet(name = 'you') %}hi {{ name }}{% endmacro %}{{ _self.greet() }}", "{}"),
        "hi you"
    );
}

#[test]
fn use_and_autoescape_arguments() {
    assert_eq!(
        message("{% use name %}"),
        "The template references in a \"use\" statement must be a string."
    );
    assert_eq!(message("{% autoescape 1 %}{% endautoescape %}"), "An escaping strategy must be a string or false.");
}

#[test]
fn tags_nest() {
    let code = "{% for row in rows %}{% if row.show %}{% for c in row.cells %}{{ c }}{% endfor %};{% endif %}{% endfor %}";
    let ctx = r#"{"rows": [{"show": true, "cells": [1, 2]}, {"show": false, "cells": [3]}, {"show": true, "cells": []}]}"#;
    assert_eq!(render_one(code, ctx), "12;;");
}

#[test]
fn do_and_deprecated_tags() {
    assert_eq!(render_one("{% do 1 + 1 %}done", "{}"), "done");
    assert_eq!(render_one("{% deprecated 'use other' %}still renders", "{}"), "still renders");
}
