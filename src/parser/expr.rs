//! Expression grammar: precedence climbing over the registered operator tables,
//! primaries, postfix chains (`.attr`, `[key]`, `[a:b]`, `|filter`) and calls.

use tracing::warn;

use crate::diagnostics::TemplateError;
use crate::extension::{Associativity, BinaryKind, CallableKind, Resolved};
use crate::lexer::token::TokenKind;

use super::ast::*;
use super::Parser;

impl Parser<'_> {
    pub fn parse_expression(&mut self, precedence: usize) -> Result<Expr, TemplateError> {
        self.parse_expression_with(precedence, false)
    }

    fn parse_expression_with(&mut self, precedence: usize, allow_arrow: bool) -> Result<Expr, TemplateError> {
        if allow_arrow {
            if let Some(arrow) = self.parse_arrow()? {
                return Ok(arrow);
            }
        }

        let registry = self.registry();
        let mut expr = self.parse_primary()?;
        loop {
            let token = self.current().clone();
            if token.kind != TokenKind::Operator {
                break;
            }
            let Some(op) = registry.binary_operator(&token.value) else { break };
            if op.precedence < precedence {
                break;
            }
            self.stream().next()?;
            expr = match &op.kind {
                BinaryKind::Test { negated: false } => self.parse_test_expression(expr)?,
                BinaryKind::Test { negated: true } => {
                    let test = self.parse_test_expression(expr)?;
                    let line = self.current().line;
                    Expr::new(ExprKind::Unary { op: UnaryOp::Not, node: Box::new(test) }, line)
                }
                BinaryKind::Parse(hook) => hook(self, expr, token.line)?,
                BinaryKind::Op(binary) => {
                    let next = match op.associativity {
                        Associativity::Left => op.precedence + 1,
                        Associativity::Right => op.precedence,
                    };
                    let right = self.parse_expression_with(next, true)?;
                    Expr::new(ExprKind::Binary { op: *binary, left: Box::new(expr), right: Box::new(right) }, token.line)
                }
            };
        }

        if precedence == 0 {
            return self.parse_conditional_expression(expr);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        let token = self.current().clone();
        if token.kind == TokenKind::Operator {
            if let Some(op) = self.registry().unary_operator(&token.value) {
                self.stream().next()?;
                let node = self.parse_expression(op.precedence)?;
                let expr = Expr::new(ExprKind::Unary { op: op.op, node: Box::new(node) }, token.line);
                return self.parse_postfix_expression(expr);
            }
        }
        if token.test(TokenKind::Punctuation, &["("]) {
            self.stream().next()?;
            let expr = self.parse_expression(0)?;
            self.stream().expect(TokenKind::Punctuation, Some(")"), Some("An opened parenthesis is not properly closed"))?;
            return self.parse_postfix_expression(expr);
        }
        self.parse_primary_expression()
    }

    pub fn parse_primary_expression(&mut self) -> Result<Expr, TemplateError> {
        let token = self.current().clone();
        let node = match token.kind {
            TokenKind::Name => {
                self.stream().next()?;
                match token.value.as_str() {
                    "true" | "TRUE" => Expr::constant(Literal::Bool(true), token.line),
                    "false" | "FALSE" => Expr::constant(Literal::Bool(false), token.line),
                    "none" | "NONE" | "null" | "NULL" => Expr::constant(Literal::Null, token.line),
                    name if self.state.stream.test(TokenKind::Punctuation, &["("]) => {
                        self.function_node(name, token.line)?
                    }
                    name => Expr::name(name, token.line),
                }
            }
            TokenKind::Number => {
                self.stream().next()?;
                Expr::constant(number_literal(&token.value), token.line)
            }
            TokenKind::String | TokenKind::InterpolationStart => self.parse_string_expression()?,
            TokenKind::Operator if is_name(&token.value) => {
                // word operators in operand position are plain names
                self.stream().next()?;
                Expr::name(&token.value, token.line)
            }
            TokenKind::Operator if self.registry().unary_operator(&token.value).is_some() => {
                let op = self.registry().unary_operator(&token.value).map(|op| op.op);
                let Some(op @ (UnaryOp::Neg | UnaryOp::Pos)) = op else {
                    return Err(self.error(format!("Unexpected unary operator \"{}\".", token.value), token.line));
                };
                self.stream().next()?;
                let node = self.parse_primary_expression()?;
                Expr::new(ExprKind::Unary { op, node: Box::new(node) }, token.line)
            }
            TokenKind::Punctuation if token.value == "[" => self.parse_array_expression()?,
            TokenKind::Punctuation if token.value == "{" => self.parse_hash_expression()?,
            TokenKind::Operator
                if token.value == "="
                    && self.state.stream.previous().is_some_and(|p| p.value == "==" || p.value == "!=") =>
            {
                return Err(self.error(
                    "Unexpected operator of value \"=\". Did you try to use \"===\" or \"!==\" for strict comparison? \
                     Use \"is same as(value)\" instead.",
                    token.line,
                ));
            }
            _ => {
                return Err(self.error(
                    format!("Unexpected token \"{}\" of value \"{}\".", token.kind, token.value),
                    token.line,
                ));
            }
        };
        self.parse_postfix_expression(node)
    }

    /// Adjacent string parts and `#{...}` interpolations, joined with `~`.
    fn parse_string_expression(&mut self) -> Result<Expr, TemplateError> {
        let mut parts = Vec::new();
        let mut next_can_be_string = true;
        loop {
            if next_can_be_string {
                if let Some(token) = self.stream().next_if(TokenKind::String, &[])? {
                    parts.push(Expr::string(token.value, token.line));
                    next_can_be_string = false;
                    continue;
                }
            }
            if self.stream().next_if(TokenKind::InterpolationStart, &[])?.is_some() {
                parts.push(self.parse_expression(0)?);
                self.stream().expect(TokenKind::InterpolationEnd, None, None)?;
                next_can_be_string = true;
                continue;
            }
            break;
        }
        let mut parts = parts.into_iter();
        let Some(mut expr) = parts.next() else {
            let token = self.current();
            return Err(self.error(format!("Unexpected token \"{}\".", token.kind), token.line));
        };
        for part in parts {
            let line = part.line;
            expr = Expr::new(ExprKind::Binary { op: BinaryOp::Concat, left: Box::new(expr), right: Box::new(part) }, line);
        }
        Ok(expr)
    }

    fn parse_array_expression(&mut self) -> Result<Expr, TemplateError> {
        let open = self.stream().expect(TokenKind::Punctuation, Some("["), Some("An array element was expected"))?;
        let mut items = Vec::new();
        while !self.state.stream.test(TokenKind::Punctuation, &["]"]) {
            if !items.is_empty() {
                self.stream().expect(
                    TokenKind::Punctuation,
                    Some(","),
                    Some("An array element must be followed by a comma"),
                )?;
                if self.state.stream.test(TokenKind::Punctuation, &["]"]) {
                    break;
                }
            }
            items.push(self.parse_expression(0)?);
        }
        self.stream().expect(TokenKind::Punctuation, Some("]"), Some("An opened array is not properly closed"))?;
        Ok(Expr::new(ExprKind::Array(items), open.line))
    }

    fn parse_hash_expression(&mut self) -> Result<Expr, TemplateError> {
        let open = self.stream().expect(TokenKind::Punctuation, Some("{"), Some("A hash element was expected"))?;
        let mut pairs = Vec::new();
        while !self.state.stream.test(TokenKind::Punctuation, &["}"]) {
            if !pairs.is_empty() {
                self.stream().expect(
                    TokenKind::Punctuation,
                    Some(","),
                    Some("A hash value must be followed by a comma"),
                )?;
                if self.state.stream.test(TokenKind::Punctuation, &["}"]) {
                    break;
                }
            }
            let key = if let Some(token) = self.stream().next_if(TokenKind::Name, &[])? {
                // `{a}` is short for `{a: a}`
                if self.state.stream.test(TokenKind::Punctuation, &[",", "}"]) {
                    pairs.push((Expr::string(&token.value, token.line), Expr::name(&token.value, token.line)));
                    continue;
                }
                Expr::string(token.value, token.line)
            } else if let Some(token) = self.stream().next_if(TokenKind::String, &[])? {
                Expr::string(token.value, token.line)
            } else if let Some(token) = self.stream().next_if(TokenKind::Number, &[])? {
                Expr::constant(number_literal(&token.value), token.line)
            } else if self.state.stream.test(TokenKind::Punctuation, &["("]) {
                self.parse_expression(0)?
            } else {
                let current = self.current();
                return Err(self.error(
                    format!(
                        "A hash key must be a quoted string, a number, a name, or an expression enclosed in \
                         parentheses (unexpected token \"{}\" of value \"{}\".",
                        current.kind, current.value
                    ),
                    current.line,
                ));
            };
            self.stream().expect(TokenKind::Punctuation, Some(":"), Some("A hash key must be followed by a colon (:)"))?;
            let value = self.parse_expression(0)?;
            pairs.push((key, value));
        }
        self.stream().expect(TokenKind::Punctuation, Some("}"), Some("An opened hash is not properly closed"))?;
        Ok(Expr::new(ExprKind::Hash(pairs), open.line))
    }

    pub fn parse_postfix_expression(&mut self, mut node: Expr) -> Result<Expr, TemplateError> {
        loop {
            if !self.state.stream.test(TokenKind::Punctuation, &[]) {
                break;
            }
            let value = self.current().value.clone();
            node = match value.as_str() {
                "." | "[" => self.parse_subscript_expression(node)?,
                "|" => {
                    self.stream().next()?;
                    self.parse_filter_expression_raw(node)?
                }
                _ => break,
            };
        }
        Ok(node)
    }

    fn function_node(&mut self, name: &str, line: usize) -> Result<Expr, TemplateError> {
        match name {
            "parent" => {
                self.parse_arguments(false, false)?;
                let Some(block) = self.peek_block_stack().map(str::to_string) else {
                    return Err(self.error("Calling the \"parent\" function outside of a block is forbidden.", line));
                };
                if self.parent().is_none() && !self.has_traits() {
                    return Err(self.error(
                        "Calling the \"parent\" function on a template that does not extend nor \"use\" another \
                         template is forbidden.",
                        line,
                    ));
                }
                Ok(Expr::new(ExprKind::Parent { block }, line))
            }
            "block" => {
                let mut args = self.parse_arguments(false, false)?.into_iter().map(|arg| arg.value);
                let Some(block) = args.next() else {
                    return Err(self.error("The \"block\" function takes one argument (the block name).", line));
                };
                let template = args.next().map(Box::new);
                Ok(Expr::new(ExprKind::BlockRef { name: Box::new(block), template }, line))
            }
            "attribute" => {
                let args: Vec<Expr> = self.parse_arguments(false, false)?.into_iter().map(|arg| arg.value).collect();
                let mut args = args.into_iter();
                let (Some(object), Some(attribute)) = (args.next(), args.next()) else {
                    return Err(self.error(
                        "The \"attribute\" function takes at least two arguments (the variable and the attributes).",
                        line,
                    ));
                };
                Ok(Expr::new(
                    ExprKind::GetAttr {
                        object: Box::new(object),
                        attribute: Box::new(attribute),
                        arguments: args.next().map(Box::new),
                        call_type: CallType::Any,
                    },
                    line,
                ))
            }
            _ => {
                if let Some(alias) = self.imported_function(name).cloned() {
                    let args = self.parse_arguments(true, false)?;
                    return Ok(Expr::new(ExprKind::MacroCall { template: alias.template, name: alias.name, args }, line));
                }
                let args = self.parse_arguments(true, true)?;
                let found = self.resolve_callable(CallableKind::Function, name, line)?;
                let args = self.bind_arguments(&found, name, args, line)?;
                Ok(Expr::new(ExprKind::Function { name: name.to_string(), args }, line))
            }
        }
    }

    fn parse_subscript_expression(&mut self, node: Expr) -> Result<Expr, TemplateError> {
        let token = self.stream().next()?;
        let line = token.line;

        if token.value == "." {
            let token = self.stream().next()?;
            let attribute = match token.kind {
                TokenKind::Name => Expr::string(&token.value, line),
                TokenKind::Number => Expr::constant(number_literal(&token.value), line),
                TokenKind::Operator if is_name(&token.value) => Expr::string(&token.value, line),
                _ => {
                    return Err(self.error(
                        format!("Expected name or number, got value \"{}\" of type {}.", token.value, token.kind),
                        line,
                    ));
                }
            };
            let has_call = self.state.stream.test(TokenKind::Punctuation, &["("]);

            if let Some(template) = node.as_name().filter(|name| self.is_imported_template(name)) {
                let template = template.to_string();
                let args = if has_call { self.parse_arguments(true, false)? } else { Vec::new() };
                return Ok(Expr::new(ExprKind::MacroCall { template, name: token.value, args }, line));
            }

            let (arguments, call_type) = if has_call {
                let args = self.parse_arguments(false, false)?.into_iter().map(|arg| arg.value).collect();
                (Some(Box::new(Expr::new(ExprKind::Array(args), line))), CallType::Method)
            } else {
                (None, CallType::Any)
            };
            return Ok(Expr::new(
                ExprKind::GetAttr { object: Box::new(node), attribute: Box::new(attribute), arguments, call_type },
                line,
            ));
        }

        // `[key]` or a `[start:length]` slice
        let mut slice = false;
        let start = if self.state.stream.test(TokenKind::Punctuation, &[":"]) {
            slice = true;
            Expr::constant(Literal::Int(0), line)
        } else {
            self.parse_expression(0)?
        };
        if self.stream().next_if(TokenKind::Punctuation, &[":"])?.is_some() {
            slice = true;
        }
        if slice {
            let length = if self.state.stream.test(TokenKind::Punctuation, &["]"]) {
                Expr::constant(Literal::Null, line)
            } else {
                self.parse_expression(0)?
            };
            self.resolve_callable(CallableKind::Filter, "slice", line)?;
            self.stream().expect(TokenKind::Punctuation, Some("]"), None)?;
            return Ok(Expr::new(
                ExprKind::Filter {
                    node: Box::new(node),
                    name: "slice".to_string(),
                    args: vec![Arg::positional(start), Arg::positional(length)],
                },
                line,
            ));
        }
        self.stream().expect(TokenKind::Punctuation, Some("]"), None)?;
        Ok(Expr::new(
            ExprKind::GetAttr {
                object: Box::new(node),
                attribute: Box::new(start),
                arguments: None,
                call_type: CallType::Array,
            },
            line,
        ))
    }

    /// One or more `name(args)` filters applied to `node`; the leading `|` is already consumed.
    pub fn parse_filter_expression_raw(&mut self, mut node: Expr) -> Result<Expr, TemplateError> {
        loop {
            let token = self.stream().expect(TokenKind::Name, None, None)?;
            let args = if self.state.stream.test(TokenKind::Punctuation, &["("]) {
                self.parse_arguments(true, true)?
            } else {
                Vec::new()
            };
            let found = self.resolve_callable(CallableKind::Filter, &token.value, token.line)?;
            let args = self.bind_arguments(&found, &token.value, args, token.line)?;
            node = Expr::new(ExprKind::Filter { node: Box::new(node), name: token.value, args }, token.line);

            if !self.state.stream.test(TokenKind::Punctuation, &["|"]) {
                break;
            }
            self.stream().next()?;
        }
        Ok(node)
    }

    /// A parenthesized call argument list. Named arguments (`name = value`) only when `named`.
    pub fn parse_arguments(&mut self, named: bool, allow_arrow: bool) -> Result<Vec<Arg>, TemplateError> {
        self.stream().expect(
            TokenKind::Punctuation,
            Some("("),
            Some("A list of arguments must begin with an opening parenthesis"),
        )?;
        let mut args = Vec::new();
        while !self.state.stream.test(TokenKind::Punctuation, &[")"]) {
            if !args.is_empty() {
                self.stream().expect(TokenKind::Punctuation, Some(","), Some("Arguments must be separated by a comma"))?;
                // trailing comma
                if self.state.stream.test(TokenKind::Punctuation, &[")"]) {
                    break;
                }
            }
            let value = self.parse_expression_with(0, allow_arrow)?;
            let equals = if named { self.stream().next_if(TokenKind::Operator, &["="])? } else { None };
            match equals {
                Some(token) => {
                    let Some(name) = value.as_name().map(str::to_string) else {
                        return Err(self.error(
                            format!("A parameter name must be a string, \"{}\" given.", value.kind.kind_name()),
                            token.line,
                        ));
                    };
                    let value = self.parse_expression_with(0, allow_arrow)?;
                    args.push(Arg { name: Some(name), value });
                }
                None => args.push(Arg::positional(value)),
            }
        }
        self.stream().expect(
            TokenKind::Punctuation,
            Some(")"),
            Some("A list of arguments must be closed by a parenthesis"),
        )?;
        Ok(args)
    }

    /// Macro parameter definitions: names with optional constant defaults.
    pub fn parse_argument_definitions(&mut self) -> Result<Vec<(String, Expr)>, TemplateError> {
        self.stream().expect(
            TokenKind::Punctuation,
            Some("("),
            Some("A list of arguments must begin with an opening parenthesis"),
        )?;
        let mut params: Vec<(String, Expr)> = Vec::new();
        let mut first = true;
        while !self.state.stream.test(TokenKind::Punctuation, &[")"]) {
            if !first {
                self.stream().expect(TokenKind::Punctuation, Some(","), Some("Arguments must be separated by a comma"))?;
                if self.state.stream.test(TokenKind::Punctuation, &[")"]) {
                    break;
                }
            }
            first = false;
            let token = self.stream().expect(TokenKind::Name, None, Some("An argument must be a name"))?;
            let default = match self.stream().next_if(TokenKind::Operator, &["="])? {
                Some(equals) => {
                    let value = self.parse_primary_expression()?;
                    if !is_constant(&value) {
                        return Err(self.error(
                            "A default value for an argument must be a constant (a boolean, a string, a number, \
                             a sequence, or a mapping).",
                            equals.line,
                        ));
                    }
                    value
                }
                None => Expr::constant(Literal::Null, token.line),
            };
            match params.iter_mut().find(|(name, _)| *name == token.value) {
                Some(slot) => slot.1 = default,
                None => params.push((token.value, default)),
            }
        }
        self.stream().expect(
            TokenKind::Punctuation,
            Some(")"),
            Some("A list of arguments must be closed by a parenthesis"),
        )?;
        Ok(params)
    }

    /// Comma-separated assignment targets (`set`, `for`).
    pub fn parse_assignment_expression(&mut self) -> Result<Vec<String>, TemplateError> {
        let mut targets = Vec::new();
        loop {
            let token = self.current().clone();
            if token.kind == TokenKind::Operator && is_name(&token.value) {
                self.stream().next()?;
            } else {
                self.stream().expect(TokenKind::Name, None, Some("Only variables can be assigned to"))?;
            }
            if ["true", "false", "none", "null"].contains(&token.value.to_ascii_lowercase().as_str()) {
                return Err(self.error(format!("You cannot assign a value to \"{}\".", token.value), token.line));
            }
            targets.push(token.value);
            if self.stream().next_if(TokenKind::Punctuation, &[","])?.is_none() {
                break;
            }
        }
        Ok(targets)
    }

    pub fn parse_multitarget_expression(&mut self) -> Result<Vec<Expr>, TemplateError> {
        let mut targets = Vec::new();
        loop {
            targets.push(self.parse_expression(0)?);
            if self.stream().next_if(TokenKind::Punctuation, &[","])?.is_none() {
                break;
            }
        }
        Ok(targets)
    }

    fn parse_test_expression(&mut self, node: Expr) -> Result<Expr, TemplateError> {
        let line = node.line;
        let (name, found) = self.test_callable(line)?;

        let args = if self.state.stream.test(TokenKind::Punctuation, &["("]) {
            self.parse_arguments(true, false)?
        } else if found.callable.options().one_mandatory_argument {
            vec![Arg::positional(self.parse_primary_expression()?)]
        } else {
            Vec::new()
        };
        let args = self.bind_arguments(&found, &name, args, line)?;

        let node = match node.as_name().and_then(|alias| self.imported_function(alias)) {
            Some(alias) if name == "defined" => Expr::new(
                ExprKind::MacroCall { template: alias.template.clone(), name: alias.name.clone(), args: Vec::new() },
                line,
            ),
            _ => node,
        };
        if name == "defined" && !definable(&node) {
            return Err(self.error("The \"defined\" test only works with simple variables.", line));
        }
        let end_line = self.current().line;
        Ok(Expr::new(ExprKind::Test { node: Box::new(node), name, args }, end_line))
    }

    /// Test names may be two words (`divisible by`, `same as`).
    fn test_callable(&mut self, line: usize) -> Result<(String, Resolved), TemplateError> {
        let mut name = self.stream().expect(TokenKind::Name, None, None)?.value;
        let extensions = self.env().extensions();
        if let Some(found) = extensions.resolve(CallableKind::Test, &name)? {
            self.warn_deprecated(&found, line);
            return Ok((name, found));
        }
        if self.state.stream.test(TokenKind::Name, &[]) {
            name = format!("{name} {}", self.current().value);
            if let Some(found) = extensions.resolve(CallableKind::Test, &name)? {
                self.stream().next()?;
                self.warn_deprecated(&found, line);
                return Ok((name, found));
            }
        }
        Err(self
            .error(format!("Unknown \"{name}\" test."), line)
            .with_suggestions(&name, self.registry().names(CallableKind::Test)))
    }

    /// `a ? b : c`, `a ?: c` (middle is `a`), `a ? : c` (middle is empty) and `a ? b` (else is empty).
    fn parse_conditional_expression(&mut self, mut expr: Expr) -> Result<Expr, TemplateError> {
        while let Some(mark) = self.stream().next_if(TokenKind::Punctuation, &["?", "?:"])? {
            let (then, otherwise) = if mark.value == "?:" {
                (expr.clone(), self.parse_expression(0)?)
            } else if self.stream().next_if(TokenKind::Punctuation, &[":"])?.is_some() {
                (Expr::string("", mark.line), self.parse_expression(0)?)
            } else {
                let then = self.parse_expression(0)?;
                let otherwise = if self.stream().next_if(TokenKind::Punctuation, &[":"])?.is_some() {
                    self.parse_expression(0)?
                } else {
                    Expr::string("", self.current().line)
                };
                (then, otherwise)
            };
            let line = self.current().line;
            expr = Expr::new(
                ExprKind::Conditional { test: Box::new(expr), then: Box::new(then), otherwise: Box::new(otherwise) },
                line,
            );
        }
        Ok(expr)
    }

    /// `x => expr` or `(a, b) => expr`; `None` when the tokens ahead are not an arrow function.
    fn parse_arrow(&mut self) -> Result<Option<Expr>, TemplateError> {
        let stream = &self.state.stream;
        let at = |i: usize, kind: TokenKind, values: &[&str]| stream.look(i).is_ok_and(|t| t.test(kind, values));

        if at(1, TokenKind::Arrow, &[]) {
            let line = self.current().line;
            let param = self.stream().expect(TokenKind::Name, None, None)?;
            self.stream().expect(TokenKind::Arrow, None, None)?;
            let body = self.parse_expression(0)?;
            return Ok(Some(Expr::new(ExprKind::Arrow { params: vec![param.value], body: Box::new(body) }, line)));
        }

        if !at(0, TokenKind::Punctuation, &["("]) {
            return Ok(None);
        }
        let mut i = 1;
        loop {
            i += 1;
            if !at(i, TokenKind::Punctuation, &[","]) {
                break;
            }
            i += 1;
        }
        if !at(i, TokenKind::Punctuation, &[")"]) || !at(i + 1, TokenKind::Arrow, &[]) {
            return Ok(None);
        }

        let line = self.stream().expect(TokenKind::Punctuation, Some("("), None)?.line;
        let mut params = Vec::new();
        loop {
            params.push(self.stream().expect(TokenKind::Name, None, None)?.value);
            if self.stream().next_if(TokenKind::Punctuation, &[","])?.is_none() {
                break;
            }
        }
        self.stream().expect(TokenKind::Punctuation, Some(")"), None)?;
        self.stream().expect(TokenKind::Arrow, None, None)?;
        let body = self.parse_expression(0)?;
        Ok(Some(Expr::new(ExprKind::Arrow { params, body: Box::new(body) }, line)))
    }

    fn resolve_callable(&self, kind: CallableKind, name: &str, line: usize) -> Result<Resolved, TemplateError> {
        let found = self
            .env()
            .extensions()
            .resolve(kind, name)
            .map_err(|err| err.with_location_if_missing(line, self.source()))?;
        let Some(found) = found else {
            return Err(self
                .error(format!("Unknown \"{name}\" {kind}."), line)
                .with_suggestions(name, self.registry().names(kind)));
        };
        self.warn_deprecated(&found, line);
        Ok(found)
    }

    fn warn_deprecated(&self, found: &Resolved, line: usize) {
        if let Some(notice) = found.callable.deprecation_notice() {
            warn!(template = self.source().name(), line, "{notice}");
        }
    }

    /// Map named arguments onto declared positions and prepend wildcard captures.
    fn bind_arguments(
        &self,
        found: &Resolved,
        name: &str,
        args: Vec<Arg>,
        line: usize,
    ) -> Result<Vec<Arg>, TemplateError> {
        let kind = found.callable.kind();
        let mut bound: Vec<Arg> =
            found.captures.iter().map(|capture| Arg::positional(Expr::string(capture, line))).collect();

        if args.iter().all(|arg| arg.name.is_none()) {
            bound.extend(args);
            return Ok(bound);
        }

        let options = found.callable.options();
        if options.arg_names.is_empty() && !options.is_variadic {
            return Err(self.error(format!("Named arguments are not supported for {kind} \"{name}\"."), line));
        }

        let mut slots: Vec<Option<Expr>> = vec![None; options.arg_names.len()];
        let mut extra = Vec::new();
        let mut seen_named = false;
        for (position, arg) in args.into_iter().enumerate() {
            match arg.name {
                None if seen_named => {
                    return Err(self.error(
                        format!("Positional arguments cannot be used after named arguments for {kind} \"{name}\"."),
                        line,
                    ));
                }
                None => {
                    if position < slots.len() {
                        slots[position] = Some(arg.value);
                    } else {
                        extra.push(Arg::positional(arg.value));
                    }
                }
                Some(arg_name) => {
                    seen_named = true;
                    match options.arg_names.iter().position(|declared| *declared == arg_name) {
                        Some(index) if slots[index].is_some() => {
                            return Err(self.error(
                                format!("Argument \"{arg_name}\" is defined twice for {kind} \"{name}\"."),
                                line,
                            ));
                        }
                        Some(index) => slots[index] = Some(arg.value),
                        None if options.is_variadic => extra.push(Arg { name: Some(arg_name), value: arg.value }),
                        None => {
                            return Err(self.error(
                                format!(
                                    "Unknown argument \"{arg_name}\" for {kind} \"{name}({})\".",
                                    options.arg_names.join(", ")
                                ),
                                line,
                            ));
                        }
                    }
                }
            }
        }

        let required = options.required_args.min(slots.len());
        if let Some(missing) = slots[..required].iter().position(Option::is_none) {
            return Err(self.error(
                format!("Value for argument \"{}\" is required for {kind} \"{name}\".", options.arg_names[missing]),
                line,
            ));
        }

        let used = slots.iter().rposition(Option::is_some).map_or(0, |last| last + 1);
        bound.extend(
            slots
                .into_iter()
                .take(used)
                .map(|slot| Arg::positional(slot.unwrap_or_else(|| Expr::constant(Literal::Null, line)))),
        );
        bound.extend(extra);
        Ok(bound)
    }
}

/// Integer when it fits, float otherwise.
pub fn number_literal(value: &str) -> Literal {
    if let Ok(n) = value.parse::<i64>() {
        return Literal::Int(n);
    }
    match value.parse::<f64>() {
        Ok(n) => Literal::Float(n),
        Err(_) => Literal::Str(value.to_string()),
    }
}

pub(crate) fn is_name(value: &str) -> bool {
    let mut chars = value.chars();
    let head = chars.next().is_some_and(|c| c.is_alphabetic() || c == '_' || !c.is_ascii());
    head && chars.all(|c| c.is_alphanumeric() || c == '_' || !c.is_ascii())
}

fn is_constant(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Const(_) => true,
        ExprKind::Array(items) => items.iter().all(is_constant),
        ExprKind::Hash(pairs) => pairs.iter().all(|(k, v)| is_constant(k) && is_constant(v)),
        ExprKind::Unary { op: UnaryOp::Neg | UnaryOp::Pos, node } => is_constant(node),
        _ => false,
    }
}

fn definable(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Name(_)
        | ExprKind::GetAttr { .. }
        | ExprKind::BlockRef { .. }
        | ExprKind::MacroCall { .. }
        | ExprKind::Const(_)
        | ExprKind::Array(_)
        | ExprKind::Hash(_) => true,
        ExprKind::Function { name, .. } => name == "constant",
        _ => false,
    }
}
