//! `{% tag %}` handlers. Each handler is entered with the tag name consumed and
//! must leave the stream after its closing `%}`.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::diagnostics::TemplateError;
use crate::lexer::token::{Token, TokenKind};

use super::ast::*;
use super::{Parser, Until};

pub trait TokenParser: Send + Sync {
    fn tag(&self) -> &'static str;

    /// Parse the tag body. `None` contributes nothing to the output tree.
    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError>;
}

pub fn core_tags() -> Vec<Arc<dyn TokenParser>> {
    vec![
        Arc::new(ApplyTag),
        Arc::new(ForTag),
        Arc::new(IfTag),
        Arc::new(ExtendsTag),
        Arc::new(IncludeTag),
        Arc::new(BlockTag),
        Arc::new(UseTag),
        Arc::new(MacroTag),
        Arc::new(ImportTag),
        Arc::new(FromTag),
        Arc::new(SetTag),
        Arc::new(FlushTag),
        Arc::new(DoTag),
        Arc::new(EmbedTag),
        Arc::new(WithTag),
        Arc::new(DeprecatedTag),
        Arc::new(AutoEscapeTag),
    ]
}

fn block_end(parser: &mut Parser<'_>) -> Result<Token, TemplateError> {
    parser.stream().expect(TokenKind::BlockEnd, None, None)
}

/// `{% if %}` / `{% elseif %}` / `{% else %}` / `{% endif %}`
pub struct IfTag;

impl TokenParser for IfTag {
    fn tag(&self) -> &'static str {
        "if"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let fork = Until::new("if", line, &["elseif", "else", "endif"]);
        let end = Until::new("if", line, &["endif"]);

        let expr = parser.parse_expression(0)?;
        block_end(parser)?;
        let body = parser.subparse(Some(&fork), false)?;
        let mut tests = vec![(expr, body)];
        let mut otherwise = None;
        loop {
            let tag = parser.stream().next()?;
            match tag.value.as_str() {
                "else" => {
                    block_end(parser)?;
                    otherwise = Some(Box::new(parser.subparse(Some(&end), false)?));
                }
                "elseif" => {
                    let expr = parser.parse_expression(0)?;
                    block_end(parser)?;
                    let body = parser.subparse(Some(&fork), false)?;
                    tests.push((expr, body));
                }
                "endif" => break,
                other => {
                    return Err(parser.error(
                        format!(
                            "Unexpected \"{other}\" tag; expected \"else\", \"elseif\", or \"endif\" to close the \
                             \"if\" block started at line {line}."
                        ),
                        tag.line,
                    ));
                }
            }
        }
        block_end(parser)?;
        Ok(Some(Node::new(NodeKind::If { tests, otherwise }, line)))
    }
}

/// `{% for [key,] value in seq %}...{% else %}...{% endfor %}`
pub struct ForTag;

impl TokenParser for ForTag {
    fn tag(&self) -> &'static str {
        "for"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let mut targets = parser.parse_assignment_expression()?;
        parser.stream().expect(TokenKind::Operator, Some("in"), None)?;
        let seq = parser.parse_expression(0)?;
        block_end(parser)?;

        let body = parser.subparse(Some(&Until::new("for", line, &["else", "endfor"])), false)?;
        let otherwise = if parser.stream().next()?.value == "else" {
            block_end(parser)?;
            Some(Box::new(parser.subparse(Some(&Until::new("for", line, &["endfor"])), true)?))
        } else {
            None
        };
        block_end(parser)?;

        let (key, value) = if targets.len() > 1 {
            let value = targets.remove(1);
            (targets.remove(0), value)
        } else {
            ("_key".to_string(), targets.remove(0))
        };
        let node = NodeKind::For { key, value, seq, body: Box::new(body), otherwise, with_loop: true };
        Ok(Some(Node::new(node, line)))
    }
}

/// `{% set a, b = 1, 2 %}` or `{% set a %}captured{% endset %}`
pub struct SetTag;

impl TokenParser for SetTag {
    fn tag(&self) -> &'static str {
        "set"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let names = parser.parse_assignment_expression()?;

        let value = if parser.stream().next_if(TokenKind::Operator, &["="])?.is_some() {
            let values = parser.parse_multitarget_expression()?;
            block_end(parser)?;
            if names.len() != values.len() {
                return Err(parser.error(
                    "When using set, you must have the same number of variables and assignments.",
                    parser.current().line,
                ));
            }
            SetValue::Exprs(values)
        } else {
            if names.len() > 1 {
                return Err(parser.error(
                    "When using set with a block, you cannot have a multi-target.",
                    parser.current().line,
                ));
            }
            block_end(parser)?;
            let body = parser.subparse(Some(&Until::new("set", line, &["endset"])), true)?;
            block_end(parser)?;
            SetValue::Capture(Box::new(body))
        };
        Ok(Some(Node::new(NodeKind::Set { names, value }, line)))
    }
}

/// `{% block name %}...{% endblock [name] %}` or `{% block name expr %}`
pub struct BlockTag;

impl TokenParser for BlockTag {
    fn tag(&self) -> &'static str {
        "block"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let name = parser.stream().expect(TokenKind::Name, None, None)?.value;
        parser.set_block(&name, line);
        parser.push_local_scope();
        parser.push_block_stack(&name);

        let body = if parser.stream().next_if(TokenKind::BlockEnd, &[])?.is_some() {
            let body = parser.subparse(Some(&Until::new("block", line, &["endblock"])), true)?;
            if let Some(end) = parser.stream().next_if(TokenKind::Name, &[])? {
                if end.value != name {
                    return Err(parser.error(
                        format!("Expected endblock for block \"{name}\" (but \"{}\" given).", end.value),
                        parser.current().line,
                    ));
                }
            }
            body
        } else {
            let expr = parser.parse_expression(0)?;
            Node::body(vec![Node::new(NodeKind::Print(expr), line)], line)
        };
        block_end(parser)?;

        parser.set_block_body(&name, body);
        parser.pop_block_stack();
        parser.pop_local_scope();
        Ok(Some(Node::new(NodeKind::BlockReference(name), line)))
    }
}

/// `{% extends "parent" %}`
pub struct ExtendsTag;

impl TokenParser for ExtendsTag {
    fn tag(&self) -> &'static str {
        "extends"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        if parser.peek_block_stack().is_some() {
            return Err(parser.error("Cannot use \"extend\" in a block.", token.line));
        }
        if !parser.is_main_scope() {
            return Err(parser.error("Cannot use \"extend\" in a macro.", token.line));
        }
        if parser.parent().is_some() {
            return Err(parser.error("Multiple extends tags are forbidden.", token.line));
        }
        let parent = parser.parse_expression(0)?;
        parser.set_parent(parent);
        block_end(parser)?;
        Ok(Some(Node::empty(token.line)))
    }
}

struct IncludeArguments {
    variables: Option<Expr>,
    only: bool,
    ignore_missing: bool,
}

/// `[ignore missing] [with expr] [only] %}`
fn include_arguments(parser: &mut Parser<'_>) -> Result<IncludeArguments, TemplateError> {
    let mut ignore_missing = false;
    if parser.stream().next_if(TokenKind::Name, &["ignore"])?.is_some() {
        parser.stream().expect(TokenKind::Name, Some("missing"), None)?;
        ignore_missing = true;
    }
    let mut variables = None;
    if parser.stream().next_if(TokenKind::Name, &["with"])?.is_some() {
        variables = Some(parser.parse_expression(0)?);
    }
    let only = parser.stream().next_if(TokenKind::Name, &["only"])?.is_some();
    block_end(parser)?;
    Ok(IncludeArguments { variables, only, ignore_missing })
}

/// `{% include "name" [ignore missing] [with vars] [only] %}`
pub struct IncludeTag;

impl TokenParser for IncludeTag {
    fn tag(&self) -> &'static str {
        "include"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let expr = parser.parse_expression(0)?;
        let IncludeArguments { variables, only, ignore_missing } = include_arguments(parser)?;
        Ok(Some(Node::new(NodeKind::Include { expr, variables, only, ignore_missing }, token.line)))
    }
}

/// `{% embed "parent" %}{% block ... %}{% endembed %}`: an inline child template.
pub struct EmbedTag;

impl TokenParser for EmbedTag {
    fn tag(&self) -> &'static str {
        "embed"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let parent = parser.parse_expression(0)?;
        let IncludeArguments { variables, only, ignore_missing } = include_arguments(parser)?;

        // the embedded body starts with a synthetic `{% extends %}` so `parent()` and
        // body filtering behave as in any child template
        let (parent_token, placeholder) = match &parent.kind {
            ExprKind::Const(Literal::Str(name)) => (Token::new(TokenKind::String, name.as_str(), line), false),
            ExprKind::Name(name) => (Token::new(TokenKind::Name, name.as_str(), line), false),
            _ => (Token::new(TokenKind::String, "__parent__", line), true),
        };
        parser.stream().inject_tokens(vec![
            Token::new(TokenKind::BlockStart, "", line),
            Token::new(TokenKind::Name, "extends", line),
            parent_token,
            Token::new(TokenKind::BlockEnd, "", line),
        ]);

        let mut module = parser.parse_embedded(&Until::new("embed", line, &["endembed"]))?;
        if placeholder {
            module.parent = Some(parent);
        }
        let index = parser.embed_template(module);
        block_end(parser)?;
        Ok(Some(Node::new(NodeKind::Embed { index, variables, only, ignore_missing }, line)))
    }
}

/// `{% import "macros" as forms %}`
pub struct ImportTag;

impl TokenParser for ImportTag {
    fn tag(&self) -> &'static str {
        "import"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let template = parser.parse_expression(0)?;
        parser.stream().expect(TokenKind::Name, Some("as"), None)?;
        let var = parser.stream().expect(TokenKind::Name, None, None)?.value;
        block_end(parser)?;
        parser.add_imported_template(&var);
        let global = parser.is_main_scope();
        Ok(Some(Node::new(NodeKind::Import { template, var, global }, token.line)))
    }
}

/// `{% from "macros" import input as field, label %}`
pub struct FromTag;

impl TokenParser for FromTag {
    fn tag(&self) -> &'static str {
        "from"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let template = parser.parse_expression(0)?;
        parser.stream().expect(TokenKind::Name, Some("import"), None)?;
        let mut targets = Vec::new();
        loop {
            let name = parser.stream().expect(TokenKind::Name, None, None)?.value;
            let alias = if parser.stream().next_if(TokenKind::Name, &["as"])?.is_some() {
                parser.stream().expect(TokenKind::Name, None, None)?.value
            } else {
                name.clone()
            };
            targets.push((name, alias));
            if parser.stream().next_if(TokenKind::Punctuation, &[","])?.is_none() {
                break;
            }
        }
        block_end(parser)?;

        let var = parser.var_name();
        for (name, alias) in &targets {
            parser.add_imported_function(alias, &var, name);
        }
        let global = parser.is_main_scope();
        Ok(Some(Node::new(NodeKind::Import { template, var, global }, token.line)))
    }
}

/// The variable holding extra positional macro arguments.
pub const VARARGS: &str = "varargs";

/// `{% macro name(a, b = 1) %}...{% endmacro [name] %}`
pub struct MacroTag;

impl TokenParser for MacroTag {
    fn tag(&self) -> &'static str {
        "macro"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let name = parser.stream().expect(TokenKind::Name, None, None)?.value;
        let params = parser.parse_argument_definitions()?;
        if params.iter().any(|(param, _)| param == VARARGS) {
            return Err(parser.error(
                format!(
                    "The argument \"{VARARGS}\" in macro \"{name}\" cannot be defined because the variable \
                     \"{VARARGS}\" is reserved for arbitrary arguments."
                ),
                line,
            ));
        }
        block_end(parser)?;

        parser.push_local_scope();
        let body = parser.subparse(Some(&Until::new("macro", line, &["endmacro"])), true)?;
        if let Some(end) = parser.stream().next_if(TokenKind::Name, &[])? {
            if end.value != name {
                return Err(parser.error(
                    format!("Expected endmacro for macro \"{name}\" (but \"{}\" given).", end.value),
                    parser.current().line,
                ));
            }
        }
        parser.pop_local_scope();
        block_end(parser)?;

        parser.set_macro(MacroNode { name, params, body, line })?;
        Ok(Some(Node::empty(line)))
    }
}

/// `{% use "blocks" with a as b %}`: horizontal reuse of another template's blocks.
pub struct UseTag;

impl TokenParser for UseTag {
    fn tag(&self) -> &'static str {
        "use"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let template = parser.parse_expression(0)?;
        if template.as_const().is_none() {
            return Err(parser.error(
                "The template references in a \"use\" statement must be a string.",
                parser.current().line,
            ));
        }
        let mut targets = IndexMap::new();
        if parser.stream().next_if(TokenKind::Name, &["with"])?.is_some() {
            loop {
                let name = parser.stream().expect(TokenKind::Name, None, None)?.value;
                let alias = if parser.stream().next_if(TokenKind::Name, &["as"])?.is_some() {
                    parser.stream().expect(TokenKind::Name, None, None)?.value
                } else {
                    name.clone()
                };
                targets.insert(name, alias);
                if parser.stream().next_if(TokenKind::Punctuation, &[","])?.is_none() {
                    break;
                }
            }
        }
        block_end(parser)?;
        parser.add_trait(TraitUse { template, targets });
        Ok(Some(Node::empty(token.line)))
    }
}

/// `{% with {a: 1} [only] %}...{% endwith %}`
pub struct WithTag;

impl TokenParser for WithTag {
    fn tag(&self) -> &'static str {
        "with"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let mut variables = None;
        let mut only = false;
        if !parser.stream().test(TokenKind::BlockEnd, &[]) {
            variables = Some(parser.parse_expression(0)?);
            only = parser.stream().next_if(TokenKind::Name, &["only"])?.is_some();
        }
        block_end(parser)?;
        let body = parser.subparse(Some(&Until::new("with", token.line, &["endwith"])), true)?;
        block_end(parser)?;
        Ok(Some(Node::new(NodeKind::With { variables, only, body: Box::new(body) }, token.line)))
    }
}

/// `{% apply upper|trim %}...{% endapply %}`: capture the body, print it through the filters.
pub struct ApplyTag;

impl TokenParser for ApplyTag {
    fn tag(&self) -> &'static str {
        "apply"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let var = parser.var_name();
        let filter = parser.parse_filter_expression_raw(Expr::name(&var, line))?;
        block_end(parser)?;
        let body = parser.subparse(Some(&Until::new("apply", line, &["endapply"])), true)?;
        block_end(parser)?;

        let capture = Node::new(NodeKind::Set { names: vec![var], value: SetValue::Capture(Box::new(body)) }, line);
        let print = Node::new(NodeKind::Print(filter), line);
        Ok(Some(Node::body(vec![capture, print], line)))
    }
}

/// `{% autoescape 'js' %}...{% endautoescape %}`; `false` turns escaping off.
pub struct AutoEscapeTag;

impl TokenParser for AutoEscapeTag {
    fn tag(&self) -> &'static str {
        "autoescape"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let line = token.line;
        let strategy = if parser.stream().test(TokenKind::BlockEnd, &[]) {
            Some("html".to_string())
        } else {
            let expr = parser.parse_expression(0)?;
            match expr.as_const() {
                Some(Literal::Bool(false)) => None,
                Some(Literal::Bool(true)) => Some("html".to_string()),
                Some(Literal::Str(strategy)) => Some(strategy.clone()),
                _ => {
                    return Err(
                        parser.error("An escaping strategy must be a string or false.", parser.current().line)
                    );
                }
            }
        };
        block_end(parser)?;
        let body = parser.subparse(Some(&Until::new("autoescape", line, &["endautoescape"])), true)?;
        block_end(parser)?;
        Ok(Some(Node::new(NodeKind::AutoEscape { strategy, body: Box::new(body) }, line)))
    }
}

/// `{% do expr %}`: evaluate, discard the result.
pub struct DoTag;

impl TokenParser for DoTag {
    fn tag(&self) -> &'static str {
        "do"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let expr = parser.parse_expression(0)?;
        block_end(parser)?;
        Ok(Some(Node::new(NodeKind::Do(expr), token.line)))
    }
}

pub struct FlushTag;

impl TokenParser for FlushTag {
    fn tag(&self) -> &'static str {
        "flush"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        block_end(parser)?;
        Ok(Some(Node::new(NodeKind::Flush, token.line)))
    }
}

/// `{% deprecated "message" %}`: a notice emitted whenever the template renders.
pub struct DeprecatedTag;

impl TokenParser for DeprecatedTag {
    fn tag(&self) -> &'static str {
        "deprecated"
    }

    fn parse(&self, token: &Token, parser: &mut Parser<'_>) -> Result<Option<Node>, TemplateError> {
        let expr = parser.parse_expression(0)?;
        block_end(parser)?;
        Ok(Some(Node::new(NodeKind::Deprecated(expr), token.line)))
    }
}
