#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tessera::{ArrayLoader, Environment, Source};

/// Template fragments that lex cleanly but combine into arbitrary trees.
#[derive(Arbitrary, Debug)]
enum Fragment {
    Text,
    Name,
    Number,
    Str,
    Plus,
    Tilde,
    Pipe,
    Dot,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    VarStart,
    VarEnd,
    BlockStart,
    BlockEnd,
    If,
    EndIf,
    For,
    In,
    EndFor,
    Block,
    EndBlock,
    Extends,
    Set,
    Macro,
    EndMacro,
    Newline,
}

impl Fragment {
    fn text(&self) -> &'static str {
        match self {
            Fragment::Text => "text ",
            Fragment::Name => "x ",
            Fragment::Number => "42 ",
            Fragment::Str => "'s' ",
            Fragment::Plus => "+ ",
            Fragment::Tilde => "~ ",
            Fragment::Pipe => "|upper ",
            Fragment::Dot => ".a ",
            Fragment::Comma => ", ",
            Fragment::LeftParen => "( ",
            Fragment::RightParen => ") ",
            Fragment::LeftBracket => "[ ",
            Fragment::RightBracket => "] ",
            Fragment::VarStart => "{{ ",
            Fragment::VarEnd => "}} ",
            Fragment::BlockStart => "{% ",
            Fragment::BlockEnd => "%} ",
            Fragment::If => "if ",
            Fragment::EndIf => "endif ",
            Fragment::For => "for ",
            Fragment::In => "in ",
            Fragment::EndFor => "endfor ",
            Fragment::Block => "block ",
            Fragment::EndBlock => "endblock ",
            Fragment::Extends => "extends ",
            Fragment::Set => "set ",
            Fragment::Macro => "macro ",
            Fragment::EndMacro => "endmacro ",
            Fragment::Newline => "\n",
        }
    }
}

fuzz_target!(|fragments: Vec<Fragment>| {
    let code: String = fragments.iter().map(Fragment::text).collect();
    let env = Environment::new(ArrayLoader::default());
    // parse and compile must fail with errors, never panic
    let _ = env.compile_source(&Source::inline(code.as_str(), "fuzz"));
});
