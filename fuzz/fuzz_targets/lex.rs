#![no_main]
use libfuzzer_sys::fuzz_target;
use tessera::{ArrayLoader, Environment, Source};

fuzz_target!(|data: &[u8]| {
    // arbitrary text must lex to tokens or a syntax error, never a panic
    if let Ok(code) = std::str::from_utf8(data) {
        let env = Environment::new(ArrayLoader::default());
        let _ = env.tokenize(&Source::inline(code, "fuzz"));
    }
});
