//! The core language: tags, operators, and the built-in filters, functions and tests.

use std::any::Any;
use std::sync::Arc;

use crate::diagnostics::TemplateError;
use crate::parser::ast::{Arg, BinaryOp, Expr, ExprKind, UnaryOp};
use crate::parser::tags::{core_tags, TokenParser};
use crate::parser::Parser;
use crate::runtime::library;

use super::{
    BinaryKind, BinaryOperator, CallableKind, Extension, TemplateCallable, TemplateFilter, TemplateFunction,
    TemplateTest, UnaryOperator,
};

pub struct CoreExtension;

/// `a..b` is sugar for `range(a, b)`.
fn parse_range(parser: &mut Parser<'_>, left: Expr, line: usize) -> Result<Expr, TemplateError> {
    let right = parser.parse_expression(26)?;
    Ok(Expr::new(
        ExprKind::Function { name: "range".to_string(), args: vec![Arg::positional(left), Arg::positional(right)] },
        line,
    ))
}

impl Extension for CoreExtension {
    fn name(&self) -> &'static str {
        "core"
    }

    fn token_parsers(&self) -> Vec<Arc<dyn TokenParser>> {
        core_tags()
    }

    fn filters(&self) -> Vec<TemplateFilter> {
        use TemplateCallable as F;
        vec![
            F::filter("abs", library::abs),
            F::filter("batch", library::batch).with_args(&["size", "fill", "preserve_keys"]).required_args(1),
            F::filter("capitalize", library::capitalize),
            F::filter("default", library::default).with_args(&["default"]),
            F::filter("filter", library::filter).with_args(&["arrow"]).required_args(1),
            F::filter("first", library::first),
            F::filter("format", library::format).variadic(),
            F::filter("join", library::join).with_args(&["glue", "and"]),
            F::filter("json_encode", library::json_encode),
            F::filter("keys", library::keys),
            F::filter("last", library::last),
            F::filter("length", library::length),
            F::filter("lower", library::lower),
            F::filter("map", library::map).with_args(&["arrow"]).required_args(1),
            F::filter("merge", library::merge).with_args(&["arr"]).required_args(1),
            F::filter("nl2br", library::nl2br).pre_escape("html").safe(&["html"]),
            F::filter("reduce", library::reduce).with_args(&["arrow", "initial"]).required_args(1),
            F::filter("replace", library::replace).with_args(&["from"]).required_args(1),
            F::filter("reverse", library::reverse),
            F::filter("round", library::round).with_args(&["precision", "method"]),
            F::filter("slice", library::slice).with_args(&["start", "length", "preserve_keys"]).required_args(1),
            F::filter("sort", library::sort).with_args(&["arrow"]),
            F::filter("split", library::split).with_args(&["delimiter", "limit"]).required_args(1),
            F::filter("title", library::title),
            F::filter("trim", library::trim).with_args(&["character_mask", "side"]),
            F::filter("upper", library::upper),
            F::filter("url_encode", library::url_encode),
        ]
    }

    fn functions(&self) -> Vec<TemplateFunction> {
        use TemplateCallable as F;
        vec![
            F::function("range", library::range).with_args(&["low", "high", "step"]).required_args(2),
            F::function("cycle", library::cycle).with_args(&["values", "position"]).required_args(2),
            F::function("max", library::max).variadic(),
            F::function("min", library::min).variadic(),
            F::function("include", library::include)
                .with_args(&["template", "variables", "with_context", "ignore_missing", "sandboxed"])
                .required_args(1)
                .needs_context()
                .safe(&["all"]),
            F::function("source", library::source).with_args(&["name", "ignore_missing"]).required_args(1),
        ]
    }

    fn tests(&self) -> Vec<TemplateTest> {
        use TemplateCallable as T;
        vec![
            T::compiled(CallableKind::Test, "defined"),
            T::test("empty", library::empty),
            T::test("even", library::even),
            T::test("odd", library::odd),
            T::test("iterable", library::iterable),
            T::test("null", library::null),
            T::test("none", library::null),
            T::test("same as", library::same_as).one_mandatory_argument(),
            T::test("divisible by", library::divisible_by).one_mandatory_argument(),
            T::test("sequence", library::sequence),
            T::test("mapping", library::mapping),
        ]
    }

    fn operators(&self) -> (Vec<UnaryOperator>, Vec<BinaryOperator>) {
        use BinaryOp::*;
        let unary = vec![
            UnaryOperator::new("not", 50, UnaryOp::Not),
            UnaryOperator::new("-", 500, UnaryOp::Neg),
            UnaryOperator::new("+", 500, UnaryOp::Pos),
        ];
        let mut binary = vec![
            BinaryOperator::new("or", 10, Or),
            BinaryOperator::new("xor", 12, Xor),
            BinaryOperator::new("and", 15, And),
            BinaryOperator::new("b-or", 16, BitOr),
            BinaryOperator::new("b-xor", 17, BitXor),
            BinaryOperator::new("b-and", 18, BitAnd),
        ];
        let comparisons = [
            ("==", Eq),
            ("!=", NotEq),
            ("<=>", Spaceship),
            ("<", Lt),
            (">", Gt),
            (">=", Ge),
            ("<=", Le),
            ("not in", NotIn),
            ("in", In),
            ("matches", Matches),
            ("starts with", StartsWith),
            ("ends with", EndsWith),
            ("has some", HasSome),
            ("has every", HasEvery),
        ];
        binary.extend(comparisons.into_iter().map(|(symbol, op)| BinaryOperator::new(symbol, 20, op)));
        binary.extend([
            BinaryOperator::with_kind("..", 25, BinaryKind::Parse(parse_range)),
            BinaryOperator::new("+", 30, Add),
            BinaryOperator::new("-", 30, Sub),
            BinaryOperator::new("~", 40, Concat),
            BinaryOperator::new("*", 60, Mul),
            BinaryOperator::new("/", 60, Div),
            BinaryOperator::new("//", 60, FloorDiv),
            BinaryOperator::new("%", 60, Mod),
            BinaryOperator::with_kind("is", 100, BinaryKind::Test { negated: false }),
            BinaryOperator::with_kind("is not", 100, BinaryKind::Test { negated: true }),
            BinaryOperator::new("**", 200, Pow).right(),
            BinaryOperator::new("??", 300, NullCoalesce).right(),
        ]);
        (unary, binary)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
