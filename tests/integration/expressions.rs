mod common;

use common::{render_error, render_one};

fn check(cases: &[(&str, &str)], ctx: &str) {
    for (code, expected) in cases {
        assert_eq!(render_one(code, ctx), *expected, "{code}");
    }
}

#[test]
fn comparisons_are_loose() {
    check(
        &[
            ("{{ '1' == 1 ? 'y' : 'n' }}", "y"),
            ("{{ 'abc' == 0 ? 'y' : 'n' }}", "n"),
            ("{{ 1 is same as('1') ? 'y' : 'n' }}", "n"),
            ("{{ '10' < '9' ? 'y' : 'n' }}", "n"),
            ("{{ 'apple' < 'banana' ? 'y' : 'n' }}", "y"),
            ("{{ null == false ? 'y' : 'n' }}", "y"),
            ("{{ 1.0 == 1 ? 'y' : 'n' }}", "y"),
            ("{{ 2 <=> 2 }}|{{ 'b' <=> 'a' }}", "0|1"),
        ],
        "{}",
    );
}

#[test]
fn precedence_and_associativity() {
    check(
        &[
            ("{{ 5 // 2 * 2 }}", "4"),
            ("{{ 2 ** 3 ** 2 }}", "512"),
            ("{{ 10 - 2 - 3 }}", "5"),
            ("{{ not true or true ? 'y' : 'n' }}", "y"),
            ("{{ false ? 'a' : true ? 'b' : 'c' }}", "b"),
            ("{{ (1..3)|join }}", "123"),
            ("{{ 1 ~ 2 + 3 }}", "15"),
        ],
        "{}",
    );
}

#[test]
fn conditional_shorthands() {
    check(
        &[
            ("{{ 'a' ?: 'b' }}", "a"),
            ("{{ '' ?: 'b' }}", "b"),
            ("[{{ 'a' ? : 'c' }}]", "[]"),
            ("{{ '' ? : 'c' }}", "c"),
            ("{{ 'a'?:'b' }}", "a"),
            ("[{{ false ? 'y' }}]", "[]"),
            ("{{ missing ?? other ?? 'last' }}", "last"),
        ],
        "{}",
    );
}

#[test]
fn numbers_and_strings() {
    check(
        &[
            ("{{ 1.5 + 1.5 }}", "3"),
            ("{{ 1_000 + 1 }}", "1001"),
            ("{{ '3' + 4 }}", "7"),
            ("{{ 'x' ~ null ~ true ~ false }}", "x1"),
            ("{{ 'b' in 'abc' ? 'y' : 'n' }}", "y"),
            ("{{ \"#{1 + 2}!\" }}", "3!"),
        ],
        "{}",
    );
}

#[test]
fn collections() {
    let ctx = r#"{"users": [{"name": "ann"}, {"name": "bob"}], "k": "key"}"#;
    check(
        &[
            ("{{ users[1].name|upper }}", "BOB"),
            ("{{ users|map(u => u.name)|join(',') }}", "ann,bob"),
            ("{{ {(k): 1, 'b': 2, 3: 'c'}|keys|join(',') }}", "key,b,3"),
            ("{{ {k}|json_encode|raw }}", r#"{"k":"key"}"#),
            ("{{ attribute(users[0], 'name') }}", "ann"),
            ("{{ [1, [2, 3]]|last|first }}", "2"),
            ("{{ users is iterable and users|length == 2 ? 'y' : 'n' }}", "y"),
        ],
        ctx,
    );
}

#[test]
fn unknown_callables_suggest_alternatives() {
    let err = render_error("{{ name|uper }}", "{}");
    assert!(err.is_syntax());
    assert_eq!(err.to_string(), "Unknown \"uper\" filter. Did you mean \"upper\" in \"index\" at line 1?");

    let err = render_error("{{ nope() }}", "{}");
    assert!(err.message().starts_with("Unknown \"nope\" function."));

    let err = render_error("{{ 1 is nope }}", "{}");
    assert!(err.message().starts_with("Unknown \"nope\" test."));
}

#[test]
fn argument_errors() {
    let err = render_error("{{ 'a'|upper(x = 1) }}", "{}");
    assert_eq!(err.message(), "Named arguments are not supported for filter \"upper\".");

    let err = render_error("{{ 1.5|round(2, precision = 1) }}", "{}");
    assert_eq!(err.message(), "Argument \"precision\" is defined twice for filter \"round\".");

    let err = render_error("{{ 'a,b'|split(limit = 1) }}", "{}");
    assert!(err.is_syntax());
    assert_eq!(err.message(), "Value for argument \"delimiter\" is required for filter \"split\".");

    let err = render_error("{{ range(step = 2) }}", "{}");
    assert_eq!(err.message(), "Value for argument \"low\" is required for function \"range\".");

    assert_eq!(render_one("{{ 'a,b'|split(delimiter = ',')|join('|') }}", "{}"), "a|b");
}

#[test]
fn syntax_errors() {
    let err = render_error("{{ 1 + }}", "{}");
    assert_eq!(err.message(), "Unexpected token \"end of print statement\" of value \"\".");

    let err = render_error("\n{{ a b }}", "{}");
    assert_eq!(
        err.message(),
        "Unexpected token \"name\" of value \"b\" (\"end of print statement\" expected)."
    );
    assert_eq!(err.line(), Some(2));

    let err = render_error("{{ 1 == = 2 }}", "{}");
    assert!(err.message().starts_with("Unexpected operator of value \"=\"."));

    let err = render_error("{% set true = 1 %}", "{}");
    assert_eq!(err.message(), "You cannot assign a value to \"true\".");

    let err = render_error("{{ (1 + 2) is defined }}", "{}");
    assert_eq!(err.message(), "The \"defined\" test only works with simple variables.");
}

#[test]
fn operand_errors() {
    let err = render_error("{{ -'a' }}", "{}");
    assert_eq!(err.message(), "A non-numeric value \"a\" cannot be used with the \"-\" operator.");

    let err = render_error("{{ 5 % 0 }}", "{}");
    assert_eq!(err.to_string(), "Modulo by zero in \"index\" at line 1.");
}
