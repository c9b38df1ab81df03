mod common;

use std::sync::Arc;

use common::{context, env, raw_env, render, render_error, render_one, try_render_with};
use tessera::config::EnvironmentOptions;
use tessera::{ArrayLoader, Environment, TemplateCallable, TemplateError, TemplateObject, Value};

#[test]
fn prints_variables() {
    assert_eq!(render_one("Hello {{ name }}!", r#"{"name": "World"}"#), "Hello World!");
}

#[test]
fn escapes_html_by_default() {
    assert_eq!(render_one("{{ name }}", r#"{"name": "<b>&</b>"}"#), "&lt;b&gt;&amp;&lt;/b&gt;");
    assert_eq!(render_one("{{ name|raw }}", r#"{"name": "<b>"}"#), "<b>");
}

#[test]
fn autoescape_can_be_disabled() {
    let env = raw_env(&[("index", "{{ name }}")]);
    assert_eq!(try_render_with(&env, "index", r#"{"name": "<i>"}"#).unwrap(), "<i>");
}

#[test]
fn autoescape_section_switches_strategy() {
    let out = render_one(
        "{% autoescape 'js' %}{{ s }}{% endautoescape %}|{% autoescape false %}{{ s }}{% endautoescape %}",
        r#"{"s": "a'b"}"#,
    );
    assert_eq!(out, "a\\x27b|a'b");
}

#[test]
fn range_loop() {
    assert_eq!(render_one("{% for i in 1..3 %}{{ i }}{% endfor %}", "{}"), "123");
}

#[test]
fn loop_variable() {
    let out = render_one(
        "{% for x in ['a', 'b', 'c'] %}{{ loop.index }}{{ x }}{% if not loop.last %},{% endif %}{% endfor %}",
        "{}",
    );
    assert_eq!(out, "1a,2b,3c");
}

#[test]
fn loop_else_on_empty_sequence() {
    assert_eq!(render_one("{% for x in items %}{{ x }}{% else %}empty{% endfor %}", r#"{"items": []}"#), "empty");
}

#[test]
fn loop_over_mapping_with_keys() {
    let out = render_one("{% for k, v in {'a': 1, 'b': 2} %}{{ k }}={{ v }};{% endfor %}", "{}");
    assert_eq!(out, "a=1;b=2;");
}

#[test]
fn loop_scope_is_restored() {
    let out = render_one(
        "{% set x = 1 %}{% for i in [1, 2] %}{% set x = i %}{% set y = 5 %}{% endfor %}{{ x }}[{{ y }}]",
        "{}",
    );
    assert_eq!(out, "2[]");
}

#[test]
fn loop_target_is_restored() {
    let out = render_one("{% for item in [1, 2] %}{% endfor %}{{ item }}", r#"{"item": "kept"}"#);
    assert_eq!(out, "kept");
}

#[test]
fn if_elseif_else() {
    let template = "{% if n > 5 %}big{% elseif n > 2 %}mid{% else %}small{% endif %}";
    assert_eq!(render_one(template, r#"{"n": 9}"#), "big");
    assert_eq!(render_one(template, r#"{"n": 3}"#), "mid");
    assert_eq!(render_one(template, r#"{"n": 1}"#), "small");
}

#[test]
fn set_and_capture() {
    assert_eq!(render_one("{% set a, b = 1, 2 %}{{ a + b }}", "{}"), "3");
    let out = render_one("{% set greeting %}Hi {{ name }}{% endset %}{{ greeting|upper }}", r#"{"name": "Bob"}"#);
    assert_eq!(out, "HI BOB");
}

#[test]
fn captured_markup_is_not_escaped_twice() {
    let out = render_one("{% set b %}<b>{{ n }}</b>{% endset %}{{ b }}", r#"{"n": "<"}"#);
    assert_eq!(out, "<b>&lt;</b>");
}

#[test]
fn with_only_isolates_scope() {
    let out = render_one("{% with {a: 1} only %}{{ a }}[{{ b }}]{% endwith %}{{ b }}", r#"{"b": 2}"#);
    assert_eq!(out, "1[]2");
}

#[test]
fn apply_filters_body() {
    assert_eq!(render_one("{% apply upper %}hello {{ name }}{% endapply %}", r#"{"name": "bob"}"#), "HELLO BOB");
}

#[test]
fn whitespace_control() {
    assert_eq!(render_one("a  {{- 'b' -}}  c", "{}"), "abc");
    assert_eq!(render_one("{% if true %}\nx{% endif %}", "{}"), "x");
    assert_eq!(render_one("a \n {{~ 'b' }}", "{}"), "a \nb");
}

#[test]
fn verbatim_is_not_parsed() {
    assert_eq!(render_one("{% verbatim %}{{ x }}{% endverbatim %}", "{}"), "{{ x }}");
}

#[test]
fn comments_are_dropped() {
    assert_eq!(render_one("a{# hidden {{ x }} #}b", "{}"), "ab");
}

#[test]
fn builtin_filters() {
    let cases = [
        ("{{ [3, 1, 2]|sort|join(',') }}", "1,2,3"),
        ("{{ 'hello world'|title }}", "Hello World"),
        ("{{ 3.14159|round(2) }}", "3.14"),
        ("{{ 2.5|round(method='floor') }}", "2"),
        ("{{ missing|default('none') }}", "none"),
        ("{{ [1, 2, 3]|map(x => x * 2)|join(',') }}", "2,4,6"),
        ("{{ [1, 2, 3, 4]|filter(x => x is odd)|join(',') }}", "1,3"),
        ("{{ [1, 2, 3]|reduce((carry, x) => carry + x, 0) }}", "6"),
        ("{{ '%05.1f|%s'|format(3.14159, 'x') }}", "003.1|x"),
        ("{{ [1, 2, 3, 4, 5]|slice(1, 2)|join(',') }}", "2,3"),
        ("{{ 'abcdef'[2:3] }}", "cde"),
        ("{{ 'a,b,c'|split(',')|length }}", "3"),
        ("{{ '  x  '|trim }}", "x"),
        ("{{ [1, 2]|merge([3])|join(',') }}", "1,2,3"),
        ("{{ {'b': 1, 'a': 2}|keys|join(',') }}", "b,a"),
        ("{{ [1, 2, 3]|join(', ', ' and ') }}", "1, 2 and 3"),
        ("{{ [1, 2, 3, 4, 5]|batch(2)|length }}", "3"),
        ("{{ 'abc'|reverse }}", "cba"),
        ("{{ (0 - 5)|abs }}", "5"),
        ("{{ 'hello'|capitalize }}", "Hello"),
        ("{{ [1, 2, 3]|first }}{{ [1, 2, 3]|last }}", "13"),
    ];
    for (template, expected) in cases {
        assert_eq!(render_one(template, "{}"), expected, "template: {template}");
    }
}

#[test]
fn escape_filter_strategies() {
    let out = render_one("{{ s|e('url') }}|{{ s|escape('html_attr') }}", r#"{"s": "a b"}"#);
    assert_eq!(out, "a%20b|a&#x20;b");
}

#[test]
fn nl2br_escapes_before_breaking() {
    assert_eq!(render_one("{{ s|nl2br }}", r#"{"s": "<a>\nb"}"#), "&lt;a&gt;<br />\nb");
}

#[test]
fn json_encode_filter() {
    assert_eq!(render_one("{{ data|json_encode|raw }}", r#"{"data": {"a": [1, true]}}"#), r#"{"a":[1,true]}"#);
}

#[test]
fn operators() {
    let cases = [
        ("{{ 7 // 2 }}", "3"),
        ("{{ 10 / 4 }}", "2.5"),
        ("{{ 2 ** 10 }}", "1024"),
        ("{{ 7 % 3 }}", "1"),
        ("{{ 'abc' ~ 1 }}", "abc1"),
        ("{{ 1 in [1, 2] ? 'yes' : 'no' }}", "yes"),
        ("{{ 3 not in [1, 2] ? 'yes' : 'no' }}", "yes"),
        ("{{ 'foo' starts with 'f' ? 'y' : 'n' }}", "y"),
        ("{{ 'foo' ends with 'x' ? 'y' : 'n' }}", "n"),
        ("{{ 'abc' matches '/^A/i' ? 'y' : 'n' }}", "y"),
        ("{{ null ?? 'fallback' }}", "fallback"),
        ("{{ 1 <=> 2 }}", "-1"),
        ("{{ 6 b-and 3 }}", "2"),
        ("{{ true and not false ? 'y' : 'n' }}", "y"),
        ("{{ ([1, 2, 3] has some x => x > 2) ? 'y' : 'n' }}", "y"),
        ("{{ ([1, 2, 3] has every x => x > 2) ? 'y' : 'n' }}", "n"),
        ("{{ 1 + 2 * 3 }}", "7"),
        ("{{ (1 + 2) * 3 }}", "9"),
    ];
    for (template, expected) in cases {
        assert_eq!(render_one(template, "{}"), expected, "template: {template}");
    }
}

#[test]
fn null_coalescing_is_lenient_in_strict_mode() {
    let options = EnvironmentOptions { strict_variables: true, ..EnvironmentOptions::default() };
    let env = Environment::with_options(ArrayLoader::new([("index", "{{ missing ?? 'x' }}{{ missing|default('y') }}")]), options);
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "xy");
}

#[test]
fn string_interpolation() {
    assert_eq!(render_one("{{ \"Hi #{name}!\" }}", r#"{"name": "Ann"}"#), "Hi Ann!");
    assert_eq!(render_one("{{ 'no #{interpolation}' }}", "{}"), "no #{interpolation}");
}

#[test]
fn attribute_access() {
    let ctx = r#"{"user": {"name": "A", "age": 3}, "items": [1, 2]}"#;
    assert_eq!(render_one("{{ user.name }} {{ user['age'] }} {{ items[1] }} {{ items[-1] }}", ctx), "A 3 2 2");
    assert_eq!(render_one("[{{ user.missing }}]", ctx), "[]");
}

#[test]
fn defined_and_other_tests() {
    let ctx = r#"{"a": 1, "list": [], "n": null}"#;
    assert_eq!(render_one("{{ a is defined ? 'y' : 'n' }}{{ b is defined ? 'y' : 'n' }}", ctx), "yn");
    assert_eq!(render_one("{{ list is empty ? 'y' : 'n' }}{{ n is null ? 'y' : 'n' }}", ctx), "yy");
    assert_eq!(render_one("{{ 9 is divisible by(3) ? 'y' : 'n' }}{{ a is same as(1) ? 'y' : 'n' }}", ctx), "yy");
    assert_eq!(render_one("{{ list is iterable ? 'y' : 'n' }}{{ a is not even ? 'y' : 'n' }}", ctx), "yy");
}

#[test]
fn functions() {
    assert_eq!(render_one("{% for i in 0..3 %}{{ cycle(['a', 'b'], i) }}{% endfor %}", "{}"), "abab");
    assert_eq!(render_one("{{ max(1, 5, 3) }}{{ min([4, 2, 8]) }}", "{}"), "52");
    assert_eq!(render_one("{{ range(0, 10, 5)|join(',') }}", "{}"), "0,5,10");
    assert_eq!(render_one("{{ range('a', 'c')|join }}", "{}"), "abc");
}

#[test]
fn special_variables() {
    assert_eq!(render_one("{{ _self }}|{{ _charset }}", "{}"), "index|UTF-8");
    assert_eq!(render_one("{{ _context|keys|join(',') }}", r#"{"a": 1, "b": 2}"#), "a,b");
}

#[test]
fn macros_from_another_template() {
    let out = render(
        &[
            ("macros", "{% macro hello(name, punct = '!') %}Hello {{ name }}{{ punct }}{% endmacro %}"),
            ("index", "{% import 'macros' as m %}{{ m.hello('Ann') }}|{{ m.hello(name = 'Bo', punct = '?') }}"),
        ],
        "{}",
    );
    assert_eq!(out, "Hello Ann!|Hello Bo?");
}

#[test]
fn from_import_and_varargs() {
    let out = render(
        &[
            ("macros", "{% macro hello(name) %}Hello {{ name }}{% endmacro %}{% macro list() %}{{ varargs|join(',') }}{% endmacro %}"),
            ("index", "{% from 'macros' import hello as hi, list %}{{ hi('Z') }}|{{ list(1, 2, 3) }}"),
        ],
        "{}",
    );
    assert_eq!(out, "Hello Z|1,2,3");
}

#[test]
fn macro_defined_in_same_template() {
    let out = render_one("{% macro twice(x) %}{{ x }}{{ x }}{% endmacro %}{{ _self.twice('ab') }}", "{}");
    assert_eq!(out, "abab");
}

#[test]
fn macros_do_not_see_the_caller_context() {
    let out = render_one("{% macro peek() %}[{{ secret }}]{% endmacro %}{{ _self.peek() }}", r#"{"secret": "s"}"#);
    assert_eq!(out, "[]");
}

#[test]
fn include_tag_and_function() {
    let templates = [("part", "x={{ x }} y={{ y }}"), ("index", "")];
    let render_index = |code: &str| {
        let mut all = templates.to_vec();
        all[1] = ("index", code);
        render(&all, r#"{"y": 1}"#)
    };
    assert_eq!(render_index("{% include 'part' with {x: 2} %}"), "x=2 y=1");
    assert_eq!(render_index("{% include 'part' with {x: 2} only %}"), "x=2 y=");
    assert_eq!(render_index("a{% include 'nope' ignore missing %}b"), "ab");
    assert_eq!(render_index("{{ include('part', {x: 3}) }}"), "x=3 y=1");
    assert_eq!(render_index("{% include ['nope', 'part'] %}"), "x= y=1");
}

#[test]
fn missing_include_is_a_loader_error() {
    let err = render_error("{% include 'nope' %}", "{}");
    assert!(err.is_loader());
    assert_eq!(err.message(), "Template \"nope\" is not defined.");
}

#[test]
fn source_function() {
    let out = render(&[("raw", "{{ not parsed }}"), ("index", "{{ source('raw') }}|{{ source('nope', true) }}")], "{}");
    assert_eq!(out, "{{ not parsed }}|");
}

#[test]
fn globals_fill_in_missing_names() {
    let mut env = env(&[("index", "{{ site }}/{{ page }}")]);
    env.add_global("site", "Tessera").unwrap();
    env.add_global("page", "home").unwrap();
    assert_eq!(try_render_with(&env, "index", r#"{"page": "about"}"#).unwrap(), "Tessera/about");
}

#[test]
fn custom_filter_function_and_test() {
    let mut env = env(&[("index", "{{ 'hi'|shout }} {{ answer() }} {{ 4 is small ? 'y' : 'n' }}")]);
    env.add_filter(TemplateCallable::filter("shout", |_, args| {
        Ok(Value::from(format!("{}!", args[0].to_display().to_uppercase())))
    }))
    .unwrap();
    env.add_function(TemplateCallable::function("answer", |_, _| Ok(Value::Int(42)))).unwrap();
    env.add_test(TemplateCallable::test("small", |_, args| Ok(Value::Bool(args[0].as_int().unwrap_or(0) < 10))))
        .unwrap();
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "HI! 42 y");
}

#[test]
fn wildcard_filter_receives_captures() {
    let mut env = env(&[("index", "{{ 'x'|wrap_em }}")]);
    env.add_filter(TemplateCallable::filter("wrap_*", |_, args| {
        Ok(Value::from(format!("{}:{}", args[0].to_display(), args[1].to_display())))
    }))
    .unwrap();
    assert_eq!(try_render_with(&env, "index", "{}").unwrap(), "x:em");
}

#[test]
fn safe_filter_output_is_not_escaped() {
    let mut env = env(&[("index", "{{ name|bold }}")]);
    env.add_filter(
        TemplateCallable::filter("bold", |_, args| Ok(Value::from(format!("<b>{}</b>", args[0].to_display()))))
            .safe(&["html"])
            .pre_escape("html"),
    )
    .unwrap();
    assert_eq!(try_render_with(&env, "index", r#"{"name": "<x>"}"#).unwrap(), "<b>&lt;x&gt;</b>");
}

#[test]
fn strict_variables() {
    let options = EnvironmentOptions { strict_variables: true, ..EnvironmentOptions::default() };
    let env = Environment::with_options(ArrayLoader::new([("index", "{{ missing }}")]), options);
    let err = try_render_with(&env, "index", "{}").unwrap_err();
    assert_eq!(err.to_string(), "Variable \"missing\" does not exist in \"index\" at line 1.");
    assert_eq!(render_one("[{{ missing }}]", "{}"), "[]");
}

#[test]
fn runtime_errors_carry_location() {
    let err = render_error("line one\n{{ 1 / zero }}", r#"{"zero": 0}"#);
    assert_eq!(err.message(), "Division by zero.");
    assert_eq!(err.line(), Some(2));
    assert_eq!(err.to_string(), "Division by zero in \"index\" at line 2.");
}

#[derive(Debug)]
struct Article {
    title: String,
}

impl TemplateObject for Article {
    fn class_name(&self) -> &str {
        "Article"
    }

    fn property(&self, name: &str) -> Option<Value> {
        (name == "title").then(|| Value::from(self.title.as_str()))
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "getSummary" | "isPublished")
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> Result<Value, TemplateError> {
        match name {
            "getSummary" => Ok(Value::from(format!("{}...", &self.title[..3]))),
            "isPublished" => Ok(Value::Bool(true)),
            other => Err(TemplateError::runtime(format!("no method {other}"))),
        }
    }

    fn to_template_string(&self) -> Option<String> {
        Some(self.title.clone())
    }
}

#[test]
fn host_objects() {
    let env = env(&[("index", "{{ article.title }}|{{ article.summary }}|{{ article.published ? 'y' : 'n' }}|{{ article }}")]);
    let mut ctx = context("{}");
    ctx.insert("article".to_string(), Value::Object(Arc::new(Article { title: "Tessera".to_string() })));
    assert_eq!(env.render("index", ctx).unwrap(), "Tessera|Tes...|y|Tessera");
}

#[test]
fn template_can_render_a_single_block() {
    let env = env(&[("index", "{% block title %}T{{ x }}{% endblock %} body")]);
    let template = env.load_template("index").unwrap();
    assert_eq!(template.render_block(&env, "title", context(r#"{"x": 1}"#)).unwrap(), "T1");
    assert!(template.has_block(&env, "title", &context("{}")).unwrap());
    assert!(!template.has_block(&env, "nope", &context("{}")).unwrap());
}

#[test]
fn string_templates() {
    let env = env(&[]);
    let template = env.create_template("{{ greeting }}, {{ name }}", None).unwrap();
    assert!(template.name().starts_with("__string_template__"));
    assert_eq!(template.render(&env, context(r#"{"greeting": "Hi", "name": "you"}"#)).unwrap(), "Hi, you");
}

#[test]
fn rendering_is_repeatable() {
    let env = env(&[("index", "{% for i in 1..2 %}{{ i }}{% endfor %}")]);
    let first = try_render_with(&env, "index", "{}").unwrap();
    let second = try_render_with(&env, "index", "{}").unwrap();
    assert_eq!(first, second);
}
