mod common;

use common::env;
use tessera::config::{EnvironmentOptions, LexerOptions};
use tessera::lexer::TokenKind;
use tessera::{ArrayLoader, Environment, Source, TemplateError};

fn tokenize(code: &str) -> Result<Vec<(TokenKind, String)>, TemplateError> {
    let stream = env(&[]).tokenize(&Source::inline(code, "index"))?;
    Ok(stream.tokens().iter().map(|t| (t.kind, t.value.clone())).collect())
}

fn tokens(code: &str) -> Vec<(TokenKind, String)> {
    tokenize(code).unwrap_or_else(|err| panic!("lexing failed: {err}"))
}

fn t(kind: TokenKind, value: &str) -> (TokenKind, String) {
    (kind, value.to_string())
}

#[test]
fn print_with_filter() {
    assert_eq!(
        tokens("Hello {{ name|upper }}!"),
        vec![
            t(TokenKind::Text, "Hello "),
            t(TokenKind::VarStart, ""),
            t(TokenKind::Name, "name"),
            t(TokenKind::Punctuation, "|"),
            t(TokenKind::Name, "upper"),
            t(TokenKind::VarEnd, ""),
            t(TokenKind::Text, "!"),
            t(TokenKind::Eof, ""),
        ]
    );
}

#[test]
fn tags_numbers_and_operators() {
    assert_eq!(
        tokens("{% for i in 1..1_000 %}{{ i not in [2.5] }}{% endfor %}"),
        vec![
            t(TokenKind::BlockStart, ""),
            t(TokenKind::Name, "for"),
            t(TokenKind::Name, "i"),
            t(TokenKind::Operator, "in"),
            t(TokenKind::Number, "1"),
            t(TokenKind::Operator, ".."),
            t(TokenKind::Number, "1000"),
            t(TokenKind::BlockEnd, ""),
            t(TokenKind::VarStart, ""),
            t(TokenKind::Name, "i"),
            t(TokenKind::Operator, "not in"),
            t(TokenKind::Punctuation, "["),
            t(TokenKind::Number, "2.5"),
            t(TokenKind::Punctuation, "]"),
            t(TokenKind::VarEnd, ""),
            t(TokenKind::BlockStart, ""),
            t(TokenKind::Name, "endfor"),
            t(TokenKind::BlockEnd, ""),
            t(TokenKind::Eof, ""),
        ]
    );
}

#[test]
fn string_interpolation() {
    assert_eq!(
        tokens(r#"{{ "a#{b}c" ~ 'd#{e}' }}"#),
        vec![
            t(TokenKind::VarStart, ""),
            t(TokenKind::String, "a"),
            t(TokenKind::InterpolationStart, ""),
            t(TokenKind::Name, "b"),
            t(TokenKind::InterpolationEnd, ""),
            t(TokenKind::String, "c"),
            t(TokenKind::Operator, "~"),
            t(TokenKind::String, "d#{e}"),
            t(TokenKind::VarEnd, ""),
            t(TokenKind::Eof, ""),
        ]
    );
}

#[test]
fn elvis_is_one_token_only_when_unspaced() {
    let values = |code: &str| -> Vec<String> {
        tokens(code).into_iter().filter(|(kind, _)| *kind == TokenKind::Punctuation).map(|(_, v)| v).collect()
    };
    assert_eq!(values("{{ a ?: b }}"), vec!["?:"]);
    assert_eq!(values("{{ a ? : b }}"), vec!["?", ":"]);
    assert_eq!(values("{{ a ? b : c }}"), vec!["?", ":"]);
}

#[test]
fn arrow_functions() {
    let kinds: Vec<TokenKind> = tokens("{{ items|map(x => x) }}").into_iter().map(|(kind, _)| kind).collect();
    assert!(kinds.contains(&TokenKind::Arrow));
}

#[test]
fn whitespace_control() {
    assert_eq!(
        tokens("a  \n {{- b -}} \n c"),
        vec![t(TokenKind::Text, "a"), t(TokenKind::VarStart, ""), t(TokenKind::Name, "b"), t(TokenKind::VarEnd, ""), t(TokenKind::Text, "c"), t(TokenKind::Eof, "")]
    );
    assert_eq!(
        tokens("a \n  {{~ b ~}} \n c"),
        vec![t(TokenKind::Text, "a \n"), t(TokenKind::VarStart, ""), t(TokenKind::Name, "b"), t(TokenKind::VarEnd, ""), t(TokenKind::Text, "\n c"), t(TokenKind::Eof, "")]
    );
    assert_eq!(tokens("{% if a %}\nx{% endif %}")[4], t(TokenKind::Text, "x"));
    assert_eq!(tokens("{{ a }}\nx")[3], t(TokenKind::Text, "\nx"));
}

#[test]
fn comments_and_verbatim() {
    assert_eq!(tokens("a{# {{ hidden }} #}b"), vec![t(TokenKind::Text, "a"), t(TokenKind::Text, "b"), t(TokenKind::Eof, "")]);
    assert_eq!(
        tokens("{% verbatim %}{{ raw }}{% endverbatim %}"),
        vec![t(TokenKind::Text, "{{ raw }}"), t(TokenKind::Eof, "")]
    );
}

#[test]
fn line_numbers() {
    let stream = env(&[]).tokenize(&Source::inline("a\n{{ b }}\n\n{% line 40 %}{{ c }}", "index")).unwrap();
    let lines: Vec<(String, usize)> = stream
        .tokens()
        .iter()
        .filter(|token| token.kind == TokenKind::Name)
        .map(|token| (token.value.clone(), token.line))
        .collect();
    assert_eq!(lines, vec![("b".to_string(), 2), ("c".to_string(), 40)]);
}

#[test]
fn lexer_errors() {
    let cases = [
        ("{{ a", "Unclosed \"variable\".", 1),
        ("\n{% if", "Unclosed \"block\".", 2),
        ("{# note", "Unclosed comment.", 1),
        ("{{ a ) }}", "Unexpected \")\".", 1),
        ("{{ (a\n }}", "Unclosed \"(\".", 1),
        ("{{ a @ b }}", "Unexpected character \"@\".", 1),
        ("{% verbatim %}x", "Unexpected end of file: Unclosed \"verbatim\" block.", 1),
    ];
    for (code, message, line) in cases {
        let err = tokenize(code).unwrap_err();
        assert!(err.is_syntax(), "{code:?}");
        assert_eq!(err.message(), message, "{code:?}");
        assert_eq!(err.line(), Some(line), "{code:?}");
    }
}

#[test]
fn custom_delimiters() {
    let lexer = LexerOptions {
        tag_block: ("[%".to_string(), "%]".to_string()),
        tag_variable: ("[[".to_string(), "]]".to_string()),
        tag_comment: ("[#".to_string(), "#]".to_string()),
        ..LexerOptions::default()
    };
    let options = EnvironmentOptions { lexer, ..EnvironmentOptions::default() };
    let env = Environment::with_options(
        ArrayLoader::new([("index", "[# note #][% if true %][[ 1 + 1 ]][% endif %] {{ x }}")]),
        options,
    );
    assert_eq!(env.render("index", common::context("{}")).unwrap(), "2 {{ x }}");
}
