// Property-based tests for the template lexer: arbitrary input never panics,
// lexing is deterministic, and a few structural invariants hold for any stream.

use proptest::prelude::*;
use tessera::lexer::TokenKind;
use tessera::{ArrayLoader, Environment, Source, TemplateError};

fn lex(code: &str) -> Result<Vec<(TokenKind, String, usize)>, TemplateError> {
    let env = Environment::new(ArrayLoader::default());
    let stream = env.tokenize(&Source::inline(code, "index"))?;
    Ok(stream.tokens().iter().map(|t| (t.kind, t.value.clone(), t.line)).collect())
}

proptest! {
    #[test]
    fn never_panics(code in "\\PC{0,300}") {
        let _ = lex(&code);
    }

    #[test]
    fn never_panics_on_tag_soup(code in "(\\{\\{|\\}\\}|\\{%|%\\}|\\{#|#\\}|[-~ a-z0-9'\"()\\[\\]|.,:#\n]){0,60}") {
        let _ = lex(&code);
    }

    #[test]
    fn deterministic(code in "\\PC{0,200}") {
        let first = lex(&code).map_err(|err| err.to_string());
        let second = lex(&code).map_err(|err| err.to_string());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn streams_end_with_eof(code in "\\PC{0,200}") {
        if let Ok(tokens) = lex(&code) {
            prop_assert_eq!(tokens.last().map(|t| t.0), Some(TokenKind::Eof));
            prop_assert!(tokens.iter().all(|t| t.2 >= 1));
        }
    }

    #[test]
    fn plain_text_is_one_token(code in "[^{]{1,200}") {
        let tokens = lex(&code).unwrap();
        prop_assert_eq!(tokens.len(), 2);
        prop_assert_eq!(tokens[0].0, TokenKind::Text);
        prop_assert_eq!(&tokens[0].1, &code);
    }

    #[test]
    fn integers_lex_as_numbers(n in 0u32..1_000_000) {
        let tokens = lex(&format!("{{{{ {n} }}}}")).unwrap();
        prop_assert_eq!(tokens[1].0, TokenKind::Number);
        prop_assert_eq!(&tokens[1].1, &n.to_string());
    }

    #[test]
    fn names_keep_their_line(lines in 0usize..20, suffix in "[a-z0-9_]{0,10}") {
        let code = format!("{}{{{{ v_{suffix} }}}}", "\n".repeat(lines));
        let tokens = lex(&code).unwrap();
        let found = tokens.iter().find(|t| t.0 == TokenKind::Name).map(|t| t.2);
        prop_assert_eq!(found, Some(lines + 1));
    }
}
