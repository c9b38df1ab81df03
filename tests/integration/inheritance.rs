mod common;

use common::{context, env, render, try_render};

const BASE: &str = "<{% block title %}Base{% endblock %}>{% block body %}{% endblock %}";

#[test]
fn child_overrides_block() {
    let out = render(&[("base", BASE), ("index", "{% extends 'base' %}{% block title %}Child{% endblock %}")], "{}");
    assert_eq!(out, "<Child>");
}

#[test]
fn parent_function_renders_parent_block() {
    let out = render(
        &[("base", BASE), ("index", "{% extends 'base' %}{% block title %}{{ parent() }}+C{% endblock %}")],
        "{}",
    );
    assert_eq!(out, "<Base+C>");
}

#[test]
fn three_levels() {
    let out = render(
        &[
            ("base", BASE),
            ("layout", "{% extends 'base' %}{% block body %}L{% endblock %}"),
            ("index", "{% extends 'layout' %}{% block title %}Child{% endblock %}"),
        ],
        "{}",
    );
    assert_eq!(out, "<Child>L");
}

#[test]
fn dynamic_parent() {
    let templates = [("base", BASE), ("index", "{% extends layout %}{% block title %}D{% endblock %}")];
    assert_eq!(render(&templates, r#"{"layout": "base"}"#), "<D>");
}

#[test]
fn first_existing_parent_wins() {
    let out = render(&[("base", BASE), ("index", "{% extends ['missing', 'base'] %}")], "{}");
    assert_eq!(out, "<Base>");
}

#[test]
fn child_top_level_sets_are_visible_to_parent() {
    let out = render(&[("base", "Hi {{ who }}"), ("index", "{% extends 'base' %}{% set who = 'kid' %}")], "{}");
    assert_eq!(out, "Hi kid");
}

#[test]
fn nested_block_overridden_from_child() {
    let out = render(
        &[
            ("base", "{% block outer %}O[{% block inner %}i{% endblock %}]{% endblock %}"),
            ("index", "{% extends 'base' %}{% block inner %}I{% endblock %}"),
        ],
        "{}",
    );
    assert_eq!(out, "O[I]");
}

#[test]
fn blocks_see_loop_variables() {
    let out = render(
        &[
            ("base", "{% for i in [1, 2] %}{% block item %}{{ i }}{% endblock %}{% endfor %}"),
            ("index", "{% extends 'base' %}{% block item %}({{ i }}){% endblock %}"),
        ],
        "{}",
    );
    assert_eq!(out, "(1)(2)");
}

#[test]
fn block_function() {
    let out = render(&[("index", "{% block title %}T{% endblock %}|{{ block('title') }}")], "{}");
    assert_eq!(out, "T|T");
    let out = render(&[("index", "{{ block('nope') is defined ? 'y' : 'n' }}")], "{}");
    assert_eq!(out, "n");
}

#[test]
fn block_from_another_template() {
    let out = render(&[("other", "{% block greet %}hey{% endblock %}"), ("index", "{{ block('greet', 'other') }}")], "{}");
    assert_eq!(out, "hey");
}

#[test]
fn missing_block_is_an_error() {
    let err = try_render(&[("index", "{{ block('nope') }}")], "{}").unwrap_err();
    assert_eq!(err.message(), "Block \"nope\" on template \"index\" does not exist.");
}

#[test]
fn content_outside_blocks_in_child() {
    let err = try_render(&[("base", BASE), ("index", "{% extends 'base' %}Hi")], "{}").unwrap_err();
    assert!(err.is_syntax());
    assert!(err.message().contains("cannot include content outside blocks"));
}

#[test]
fn traits_provide_blocks() {
    let blocks = ("blocks", "{% block sidebar %}S{% endblock %}");
    assert_eq!(render(&[blocks, ("index", "{% use 'blocks' %}<{{ block('sidebar') }}>")], "{}"), "<S>");
    assert_eq!(render(&[blocks, ("index", "{% use 'blocks' with sidebar as aside %}{{ block('aside') }}")], "{}"), "S");
    assert_eq!(
        render(&[blocks, ("index", "{% use 'blocks' %}{% block sidebar %}[{{ parent() }}]{% endblock %}")], "{}"),
        "[S]"
    );
}

#[test]
fn trait_must_only_define_blocks() {
    let err = try_render(&[("blocks", "x{% block a %}{% endblock %}"), ("index", "{% use 'blocks' %}")], "{}")
        .unwrap_err();
    assert_eq!(err.to_string(), "Template \"blocks\" cannot be used as a trait in \"index\" at line 1.");
}

#[test]
fn trait_rename_of_unknown_block() {
    let err = try_render(
        &[("blocks", "{% block a %}{% endblock %}"), ("index", "{% use 'blocks' with nope as x %}")],
        "{}",
    )
    .unwrap_err();
    assert_eq!(err.message(), "Block \"nope\" is not defined in trait \"blocks\".");
}

#[test]
fn embed_overrides_blocks_in_place() {
    let base = ("base", "[{% block content %}default{% endblock %}]");
    let out = render(
        &[base, ("index", "{% embed 'base' %}{% block content %}E{{ x }}{% endblock %}{% endembed %}")],
        r#"{"x": 1}"#,
    );
    assert_eq!(out, "[E1]");

    let out = render(
        &[
            base,
            (
                "index",
                "{% embed 'base' %}{% block content %}A{% endblock %}{% endembed %}\
                 {% embed 'base' %}{% block content %}B{% endblock %}{% endembed %}\
                 {% embed 'base' %}{% endembed %}",
            ),
        ],
        "{}",
    );
    assert_eq!(out, "[A][B][default]");
}

#[test]
fn embed_keeps_its_blocks_apart_from_the_outer_template() {
    let base = ("base", "[{% block content %}default{% endblock %}]");
    let out = render(
        &[
            base,
            (
                "index",
                "{% block content %}O{% endblock %}\
                 {% embed 'base' %}{% block content %}E{% endblock %}{% endembed %}\
                 {% block after %}A{% endblock %}",
            ),
        ],
        "{}",
    );
    assert_eq!(out, "O[E]A");

    let out = render(
        &[base, ("index", "{% embed 'base' %}{% block content %}E{% endblock %}{% endembed %}{% block content %}O{% endblock %}")],
        "{}",
    );
    assert_eq!(out, "[E]O");
}

#[test]
fn embed_keeps_its_macros_apart_from_the_outer_template() {
    let base = ("base", "[{% block content %}{% endblock %}]");
    let index = "{% macro m() %}outer{% endmacro %}\
                 {% embed 'base' %}{% macro m() %}inner{% endmacro %}{% block content %}{{ _self.m() }}{% endblock %}{% endembed %}\
                 {{ _self.m() }}";
    assert_eq!(render(&[base, ("index", index)], "{}"), "[inner]outer");
}

#[test]
fn embed_with_only() {
    let out = render(
        &[
            ("base", "{% block content %}{% endblock %}"),
            ("index", "{% embed 'base' with {a: 1} only %}{% block content %}{{ a }}{{ b }}{% endblock %}{% endembed %}"),
        ],
        r#"{"b": 2}"#,
    );
    assert_eq!(out, "1");
}

#[test]
fn embed_ignore_missing() {
    let out = render(&[("index", "a{% embed 'nope' ignore missing %}{% endembed %}b")], "{}");
    assert_eq!(out, "ab");
}

#[test]
fn render_block_follows_inheritance() {
    let env = env(&[("base", BASE), ("index", "{% extends 'base' %}{% block body %}B{% endblock %}")]);
    let template = env.load_template("index").unwrap();
    assert_eq!(template.render_block(&env, "title", context("{}")).unwrap(), "Base");
    assert_eq!(template.render_block(&env, "body", context("{}")).unwrap(), "B");
}

#[test]
fn circular_inheritance_stops() {
    let err = try_render(&[("a", "{% extends 'index' %}"), ("index", "{% extends 'a' %}")], "{}").unwrap_err();
    assert!(err.message().starts_with("Maximum nesting level of 64 reached"));
}
