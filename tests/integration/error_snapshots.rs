//! Snapshot tests for error message formatting.
//!
//! Run `cargo insta review` to review changes.

mod common;

use common::{env, render_error, try_render_with};
use insta::assert_snapshot;
use tessera::diagnostics::report;

#[test]
fn unknown_filter_error() {
    assert_snapshot!(render_error("{{ name|uper }}", "{}"), @r#"Unknown "uper" filter. Did you mean "upper" in "index" at line 1?"#);
}

#[test]
fn unclosed_tag_error() {
    assert_snapshot!(
        render_error("{% for x in items %}\n{{ x }}", "{}"),
        @r#"Unexpected end of template (expecting closing tag for the "for" tag defined near line 1) in "index" at line 2."#
    );
}

#[test]
fn unexpected_token_error() {
    assert_snapshot!(
        render_error("\n{{ a b }}", "{}"),
        @r#"Unexpected token "name" of value "b" ("end of print statement" expected) in "index" at line 2."#
    );
}

#[test]
fn lexer_error() {
    assert_snapshot!(render_error("{{ a ) }}", "{}"), @r#"Unexpected ")" in "index" at line 1."#);
}

#[test]
fn runtime_error() {
    assert_snapshot!(
        render_error("line one\n{{ 1 / zero }}", r#"{"zero": 0}"#),
        @r#"Division by zero in "index" at line 2."#
    );
}

#[test]
fn included_template_error_names_the_included_template() {
    let env = env(&[("index", "{% include 'part' %}"), ("part", "ok\n{{ 5 % 0 }}")]);
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert_snapshot!(err, @r#"Modulo by zero in "part" at line 2."#);
}

#[test]
fn report_points_at_the_line() {
    let err = render_error("line one\n{{ name|uper }}", "{}");
    let rendered = report(&err, false);
    assert!(rendered.contains("syntax error"), "{rendered}");
    assert!(rendered.contains("{{ name|uper }}"), "{rendered}");
    assert!(rendered.contains("Did you mean \"upper\"?"), "{rendered}");
}

#[test]
fn unlocated_errors_report_plainly() {
    let err = try_render_with(&env(&[]), "missing", "{}").unwrap_err();
    assert_snapshot!(report(&err, false).trim_end(), @r#"error: Template "missing" is not defined."#);
}
