//! Extension registry: tags, node visitors, filters, functions, tests, operators and globals.
//!
//! Registration is open until the first lookup, which freezes the set. Freezing merges
//! every extension's contributions (in registration order, then the staging bucket) into
//! one [`Registry`]; later registration fails with a logic error.

pub mod core;
pub mod escaper;
pub mod optimizer;
pub mod sandbox;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::debug;

use crate::diagnostics::TemplateError;
use crate::parser::ast::{Arg, BinaryOp, Expr, UnaryOp};
use crate::parser::tags::TokenParser;
use crate::parser::Parser;
use crate::runtime::{CallContext, Value};
use crate::visit::NodeVisitor;

pub type CallableFn = Arc<dyn Fn(&CallContext<'_>, &[Value]) -> Result<Value, TemplateError> + Send + Sync>;
pub type VisitorFactory = Arc<dyn Fn() -> Box<dyn NodeVisitor> + Send + Sync>;
pub type UndefinedCallback = Arc<dyn Fn(&str) -> Option<TemplateCallable> + Send + Sync>;
/// Parses the right-hand side of a binary operator and builds the node.
pub type ParseHook = fn(&mut Parser<'_>, Expr, usize) -> Result<Expr, TemplateError>;
pub type SafeCallback = fn(&[Arg]) -> Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableKind {
    Filter,
    Function,
    Test,
}

impl fmt::Display for CallableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallableKind::Filter => "filter",
            CallableKind::Function => "function",
            CallableKind::Test => "test",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub since: String,
    pub alternative: Option<String>,
}

#[derive(Clone, Default)]
pub struct CallableOptions {
    /// Declared argument names, used to map named arguments to positions.
    pub arg_names: Vec<String>,
    /// How many of the leading `arg_names` have no default.
    pub required_args: usize,
    pub is_variadic: bool,
    pub is_safe: Vec<String>,
    pub is_safe_callback: Option<SafeCallback>,
    /// The output is as safe as the filtered input for these strategies.
    pub preserves_safety: Vec<String>,
    /// Escape the filtered input with this strategy before calling.
    pub pre_escape: Option<String>,
    pub needs_context: bool,
    pub deprecation: Option<Deprecation>,
    /// Tests only: a single argument may follow the test name without parentheses.
    pub one_mandatory_argument: bool,
}

/// A filter, function or test.
#[derive(Clone)]
pub struct TemplateCallable {
    kind: CallableKind,
    name: String,
    callable: Option<CallableFn>,
    options: CallableOptions,
}

pub type TemplateFilter = TemplateCallable;
pub type TemplateFunction = TemplateCallable;
pub type TemplateTest = TemplateCallable;

impl TemplateCallable {
    fn build<F>(kind: CallableKind, name: &str, callable: Option<F>) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        Self {
            kind,
            name: name.to_string(),
            callable: callable.map(|f| Arc::new(f) as CallableFn),
            options: CallableOptions::default(),
        }
    }

    pub fn filter<F>(name: &str, f: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        Self::build(CallableKind::Filter, name, Some(f))
    }

    pub fn function<F>(name: &str, f: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        Self::build(CallableKind::Function, name, Some(f))
    }

    pub fn test<F>(name: &str, f: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        Self::build(CallableKind::Test, name, Some(f))
    }

    /// A callable without an implementation; resolved through the runtime loaders when called.
    pub fn deferred(kind: CallableKind, name: &str) -> Self {
        Self { kind, name: name.to_string(), callable: None, options: CallableOptions::default() }
    }

    /// A callable the parser knows but never dispatches at render time (e.g. `defined`).
    pub fn compiled(kind: CallableKind, name: &str) -> Self {
        Self::deferred(kind, name)
    }

    pub fn with_args(mut self, names: &[&str]) -> Self {
        self.options.arg_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// The first `count` declared arguments must be given when any argument is named.
    pub fn required_args(mut self, count: usize) -> Self {
        self.options.required_args = count;
        self
    }

    pub fn variadic(mut self) -> Self {
        self.options.is_variadic = true;
        self
    }

    pub fn safe(mut self, strategies: &[&str]) -> Self {
        self.options.is_safe = strategies.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn safe_callback(mut self, callback: SafeCallback) -> Self {
        self.options.is_safe_callback = Some(callback);
        self
    }

    pub fn preserves_safety(mut self, strategies: &[&str]) -> Self {
        self.options.preserves_safety = strategies.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn pre_escape(mut self, strategy: &str) -> Self {
        self.options.pre_escape = Some(strategy.to_string());
        self
    }

    pub fn needs_context(mut self) -> Self {
        self.options.needs_context = true;
        self
    }

    pub fn deprecated(mut self, since: &str, alternative: Option<&str>) -> Self {
        self.options.deprecation =
            Some(Deprecation { since: since.to_string(), alternative: alternative.map(str::to_string) });
        self
    }

    pub fn one_mandatory_argument(mut self) -> Self {
        self.options.one_mandatory_argument = true;
        self
    }

    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callable(&self) -> Option<&CallableFn> {
        self.callable.as_ref()
    }

    pub fn options(&self) -> &CallableOptions {
        &self.options
    }

    /// Strategies for which the output is already safe.
    pub fn safe_for(&self, args: &[Arg]) -> Vec<String> {
        match self.options.is_safe_callback {
            Some(callback) => callback(args),
            None => self.options.is_safe.clone(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.name.contains('*')
    }

    /// Describe the deprecation, if any, for a notice.
    pub fn deprecation_notice(&self) -> Option<String> {
        let deprecation = self.options.deprecation.as_ref()?;
        let mut msg =
            capitalize(&format!("{} \"{}\" is deprecated since {}.", self.kind, self.name, deprecation.since));
        if let Some(alternative) = &deprecation.alternative {
            msg = format!("{} Use \"{alternative}\" instead.", msg);
        }
        Some(msg)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl fmt::Debug for TemplateCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateCallable")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("deferred", &self.callable.is_none())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct UnaryOperator {
    pub symbol: String,
    pub precedence: usize,
    pub op: UnaryOp,
}

impl UnaryOperator {
    pub fn new(symbol: &str, precedence: usize, op: UnaryOp) -> Self {
        Self { symbol: symbol.to_string(), precedence, op }
    }
}

#[derive(Clone)]
pub enum BinaryKind {
    Op(BinaryOp),
    /// `is` / `is not`.
    Test { negated: bool },
    Parse(ParseHook),
}

#[derive(Clone)]
pub struct BinaryOperator {
    pub symbol: String,
    pub precedence: usize,
    pub associativity: Associativity,
    pub kind: BinaryKind,
}

impl BinaryOperator {
    pub fn new(symbol: &str, precedence: usize, op: BinaryOp) -> Self {
        Self { symbol: symbol.to_string(), precedence, associativity: Associativity::Left, kind: BinaryKind::Op(op) }
    }

    pub fn right(mut self) -> Self {
        self.associativity = Associativity::Right;
        self
    }

    pub fn with_kind(symbol: &str, precedence: usize, kind: BinaryKind) -> Self {
        Self { symbol: symbol.to_string(), precedence, associativity: Associativity::Left, kind }
    }
}

impl fmt::Debug for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryOperator")
            .field("symbol", &self.symbol)
            .field("precedence", &self.precedence)
            .field("associativity", &self.associativity)
            .finish()
    }
}

/// A bundle of contributions to the registry.
pub trait Extension: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn token_parsers(&self) -> Vec<Arc<dyn TokenParser>> {
        Vec::new()
    }

    fn node_visitors(&self) -> Vec<VisitorFactory> {
        Vec::new()
    }

    fn filters(&self) -> Vec<TemplateFilter> {
        Vec::new()
    }

    fn functions(&self) -> Vec<TemplateFunction> {
        Vec::new()
    }

    fn tests(&self) -> Vec<TemplateTest> {
        Vec::new()
    }

    fn operators(&self) -> (Vec<UnaryOperator>, Vec<BinaryOperator>) {
        (Vec::new(), Vec::new())
    }

    fn globals(&self) -> IndexMap<String, Value> {
        IndexMap::new()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Resolves implementations for callables registered without one.
pub trait RuntimeLoader: Send + Sync {
    fn load(&self, kind: CallableKind, name: &str) -> Option<CallableFn>;
}

/// Contributions added directly on the environment rather than through an extension.
#[derive(Default)]
struct Staging {
    token_parsers: Vec<Arc<dyn TokenParser>>,
    node_visitors: Vec<VisitorFactory>,
    filters: Vec<TemplateFilter>,
    functions: Vec<TemplateFunction>,
    tests: Vec<TemplateTest>,
    globals: IndexMap<String, Value>,
}

struct Dynamic {
    pattern: Regex,
    callable: TemplateCallable,
}

#[derive(Default)]
struct CallableTable {
    exact: IndexMap<String, TemplateCallable>,
    dynamic: Vec<Dynamic>,
}

impl CallableTable {
    fn insert(&mut self, callable: TemplateCallable) -> Result<(), TemplateError> {
        if callable.is_dynamic() {
            let pattern = format!("^{}$", regex::escape(callable.name()).replace(r"\*", "(.*?)"));
            let pattern = Regex::new(&pattern).map_err(|e| {
                TemplateError::logic(format!("Invalid {} name \"{}\": {e}", callable.kind(), callable.name()))
            })?;
            self.dynamic.retain(|d| d.callable.name() != callable.name());
            self.dynamic.push(Dynamic { pattern, callable });
        } else {
            self.exact.insert(callable.name().to_string(), callable);
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(callable) = self.exact.get(name) {
            return Some(Resolved { callable: callable.clone(), captures: Vec::new() });
        }
        self.dynamic.iter().find_map(|d| {
            let caps = d.pattern.captures(name)?;
            let captures = caps.iter().skip(1).flatten().map(|m| m.as_str().to_string()).collect();
            Some(Resolved { callable: d.callable.clone(), captures })
        })
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.exact.keys().map(String::as_str)
    }
}

/// A callable found by name, with the parts a wildcard name captured.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub callable: TemplateCallable,
    pub captures: Vec<String>,
}

/// The merged, read-only view produced by freezing an [`ExtensionSet`].
#[derive(Default)]
pub struct Registry {
    token_parsers: IndexMap<String, Arc<dyn TokenParser>>,
    node_visitors: Vec<VisitorFactory>,
    filters: CallableTable,
    functions: CallableTable,
    tests: CallableTable,
    unary: IndexMap<String, UnaryOperator>,
    binary: IndexMap<String, BinaryOperator>,
    globals: IndexMap<String, Value>,
}

impl Registry {
    pub fn token_parser(&self, tag: &str) -> Option<&Arc<dyn TokenParser>> {
        self.token_parsers.get(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.token_parsers.keys().map(String::as_str)
    }

    pub fn node_visitors(&self) -> &[VisitorFactory] {
        &self.node_visitors
    }

    pub fn unary_operator(&self, symbol: &str) -> Option<&UnaryOperator> {
        self.unary.get(symbol)
    }

    pub fn binary_operator(&self, symbol: &str) -> Option<&BinaryOperator> {
        self.binary.get(symbol)
    }

    pub fn operator_symbols(&self) -> impl Iterator<Item = &str> {
        self.unary.keys().chain(self.binary.keys()).map(String::as_str)
    }

    pub fn globals(&self) -> &IndexMap<String, Value> {
        &self.globals
    }

    fn table(&self, kind: CallableKind) -> &CallableTable {
        match kind {
            CallableKind::Filter => &self.filters,
            CallableKind::Function => &self.functions,
            CallableKind::Test => &self.tests,
        }
    }

    pub fn names(&self, kind: CallableKind) -> Vec<&str> {
        self.table(kind).names().collect()
    }
}

pub struct ExtensionSet {
    extensions: IndexMap<&'static str, Arc<dyn Extension>>,
    staging: Staging,
    frozen: OnceCell<Registry>,
    late_globals: IndexMap<String, Value>,
    undefined: IndexMap<CallableKind, Vec<UndefinedCallback>>,
    runtime_loaders: Vec<Arc<dyn RuntimeLoader>>,
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self {
            extensions: IndexMap::new(),
            staging: Staging::default(),
            frozen: OnceCell::new(),
            late_globals: IndexMap::new(),
            undefined: IndexMap::new(),
            runtime_loaders: Vec::new(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    fn ensure_open(&self, what: &str) -> Result<(), TemplateError> {
        if self.is_frozen() {
            return Err(TemplateError::logic(format!(
                "Unable to {what} as extensions have already been initialized."
            )));
        }
        Ok(())
    }

    pub fn add_extension(&mut self, extension: Arc<dyn Extension>) -> Result<(), TemplateError> {
        let name = extension.name();
        self.ensure_open(&format!("register extension \"{name}\""))?;
        if self.extensions.contains_key(name) {
            return Err(TemplateError::logic(format!(
                "Unable to register extension \"{name}\" as it is already registered."
            )));
        }
        debug!(extension = name, "registered extension");
        self.extensions.insert(name, extension);
        Ok(())
    }

    /// Register one of the environment's own extensions on a fresh set.
    pub(crate) fn insert_builtin(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.insert(extension.name(), extension);
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    /// Typed access to a registered extension.
    pub fn extension<T: Extension>(&self) -> Option<&T> {
        self.extensions.values().find_map(|ext| ext.as_any().downcast_ref::<T>())
    }

    pub fn add_token_parser(&mut self, parser: Arc<dyn TokenParser>) -> Result<(), TemplateError> {
        self.ensure_open(&format!("add token parser \"{}\"", parser.tag()))?;
        self.staging.token_parsers.push(parser);
        Ok(())
    }

    pub fn add_node_visitor(&mut self, factory: VisitorFactory) -> Result<(), TemplateError> {
        self.ensure_open("add a node visitor")?;
        self.staging.node_visitors.push(factory);
        Ok(())
    }

    pub fn add_filter(&mut self, filter: TemplateFilter) -> Result<(), TemplateError> {
        self.ensure_open(&format!("add filter \"{}\"", filter.name()))?;
        self.staging.filters.push(filter);
        Ok(())
    }

    pub fn add_function(&mut self, function: TemplateFunction) -> Result<(), TemplateError> {
        self.ensure_open(&format!("add function \"{}\"", function.name()))?;
        self.staging.functions.push(function);
        Ok(())
    }

    pub fn add_test(&mut self, test: TemplateTest) -> Result<(), TemplateError> {
        self.ensure_open(&format!("add test \"{}\"", test.name()))?;
        self.staging.tests.push(test);
        Ok(())
    }

    /// Globals may be replaced after freezing, but not introduced.
    pub fn add_global(&mut self, name: &str, value: Value) -> Result<(), TemplateError> {
        match self.frozen.get() {
            None => {
                self.staging.globals.insert(name.to_string(), value);
                Ok(())
            }
            Some(registry) if registry.globals.contains_key(name) => {
                self.late_globals.insert(name.to_string(), value);
                Ok(())
            }
            Some(_) => Err(TemplateError::logic(format!(
                "Unable to add global \"{name}\" as the runtime or the extensions have already been initialized."
            ))),
        }
    }

    pub fn register_undefined_callback(&mut self, kind: CallableKind, callback: UndefinedCallback) {
        self.undefined.entry(kind).or_default().push(callback);
    }

    pub fn add_runtime_loader(&mut self, loader: Arc<dyn RuntimeLoader>) {
        self.runtime_loaders.push(loader);
    }

    /// JSON array of extension names in registration order; part of every cache key.
    pub fn signature(&self) -> String {
        let names: Vec<&str> = self.extensions.keys().copied().collect();
        serde_json::to_string(&names).unwrap_or_default()
    }

    pub fn registry(&self) -> Result<&Registry, TemplateError> {
        self.frozen.get_or_try_init(|| self.freeze())
    }

    fn freeze(&self) -> Result<Registry, TemplateError> {
        let mut registry = Registry::default();
        for (name, extension) in &self.extensions {
            let (unary, binary) = extension.operators();
            merge(
                &mut registry,
                name,
                extension.token_parsers(),
                extension.node_visitors(),
                [extension.filters(), extension.functions(), extension.tests()],
                (unary, binary),
                extension.globals(),
            )?;
        }
        let staging = &self.staging;
        merge(
            &mut registry,
            "staging",
            staging.token_parsers.clone(),
            staging.node_visitors.clone(),
            [staging.filters.clone(), staging.functions.clone(), staging.tests.clone()],
            (Vec::new(), Vec::new()),
            staging.globals.clone(),
        )?;
        debug!(
            tags = registry.token_parsers.len(),
            filters = registry.filters.exact.len(),
            functions = registry.functions.exact.len(),
            tests = registry.tests.exact.len(),
            "extensions initialized"
        );
        Ok(registry)
    }

    pub fn globals(&self) -> Result<IndexMap<String, Value>, TemplateError> {
        let mut globals = self.registry()?.globals.clone();
        for (name, value) in &self.late_globals {
            globals.insert(name.clone(), value.clone());
        }
        Ok(globals)
    }

    /// Exact name, then wildcard patterns, then the undefined-callable callbacks.
    pub fn resolve(&self, kind: CallableKind, name: &str) -> Result<Option<Resolved>, TemplateError> {
        if let Some(found) = self.registry()?.table(kind).resolve(name) {
            return Ok(Some(found));
        }
        let fallback = self
            .undefined
            .get(&kind)
            .into_iter()
            .flatten()
            .find_map(|callback| callback(name))
            .map(|callable| Resolved { callable, captures: Vec::new() });
        Ok(fallback)
    }

    /// The implementation for a callable, falling back to runtime loaders for deferred ones.
    pub fn implementation(&self, callable: &TemplateCallable) -> Option<CallableFn> {
        if let Some(f) = callable.callable() {
            return Some(f.clone());
        }
        self.runtime_loaders.iter().find_map(|loader| loader.load(callable.kind(), callable.name()))
    }
}

#[allow(clippy::too_many_arguments)]
fn merge(
    registry: &mut Registry,
    origin: &str,
    parsers: Vec<Arc<dyn TokenParser>>,
    visitors: Vec<VisitorFactory>,
    [filters, functions, tests]: [Vec<TemplateCallable>; 3],
    (unary, binary): (Vec<UnaryOperator>, Vec<BinaryOperator>),
    globals: IndexMap<String, Value>,
) -> Result<(), TemplateError> {
    for parser in parsers {
        let tag = parser.tag();
        if registry.token_parsers.contains_key(tag) {
            return Err(TemplateError::logic(format!("Tag \"{tag}\" is already registered.")));
        }
        registry.token_parsers.insert(tag.to_string(), parser);
    }
    registry.node_visitors.extend(visitors);
    for filter in filters {
        registry.filters.insert(filter)?;
    }
    for function in functions {
        registry.functions.insert(function)?;
    }
    for test in tests {
        if registry.tests.exact.contains_key(test.name()) {
            return Err(TemplateError::logic(format!("Test \"{}\" is already registered.", test.name())));
        }
        registry.tests.insert(test)?;
    }
    for op in unary {
        if op.symbol.is_empty() {
            return Err(TemplateError::logic(format!("Operator symbols cannot be empty (extension \"{origin}\").")));
        }
        registry.unary.insert(op.symbol.clone(), op);
    }
    for op in binary {
        if op.symbol.is_empty() {
            return Err(TemplateError::logic(format!("Operator symbols cannot be empty (extension \"{origin}\").")));
        }
        registry.binary.insert(op.symbol.clone(), op);
    }
    registry.globals.extend(globals);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeting;

    impl Extension for Greeting {
        fn name(&self) -> &'static str {
            "greeting"
        }

        fn filters(&self) -> Vec<TemplateFilter> {
            vec![TemplateCallable::filter("shout", |_, args| {
                Ok(Value::from(args[0].to_display().to_uppercase()))
            })]
        }

        fn globals(&self) -> IndexMap<String, Value> {
            IndexMap::from([("site".to_string(), Value::from("tessera"))])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn noop_filter(name: &str) -> TemplateFilter {
        TemplateCallable::filter(name, |_, _| Ok(Value::Null))
    }

    #[test]
    fn register_after_freeze_fails() {
        let mut set = ExtensionSet::new();
        set.add_filter(noop_filter("a")).unwrap();
        set.registry().unwrap();
        let err = set.add_filter(noop_filter("b")).unwrap_err();
        assert_eq!(err.message(), "Unable to add filter \"b\" as extensions have already been initialized.");
    }

    #[test]
    fn extension_contributions_are_merged() {
        let mut set = ExtensionSet::new();
        set.add_extension(Arc::new(Greeting)).unwrap();
        assert!(set.resolve(CallableKind::Filter, "shout").unwrap().is_some());
        assert_eq!(set.globals().unwrap()["site"], Value::from("tessera"));
    }

    #[test]
    fn duplicate_extension_rejected() {
        let mut set = ExtensionSet::new();
        set.add_extension(Arc::new(Greeting)).unwrap();
        assert!(set.add_extension(Arc::new(Greeting)).is_err());
    }

    #[test]
    fn typed_lookup() {
        let mut set = ExtensionSet::new();
        set.add_extension(Arc::new(Greeting)).unwrap();
        assert!(set.extension::<Greeting>().is_some());
    }

    #[test]
    fn signature_lists_extensions_in_order() {
        let mut set = ExtensionSet::new();
        set.add_extension(Arc::new(Greeting)).unwrap();
        assert_eq!(set.signature(), "[\"greeting\"]");
    }

    #[test]
    fn wildcard_captures() {
        let mut set = ExtensionSet::new();
        set.add_filter(noop_filter("date_*_*")).unwrap();
        let found = set.resolve(CallableKind::Filter, "date_long_utc").unwrap().unwrap();
        assert_eq!(found.captures, vec!["long", "utc"]);
    }

    #[test]
    fn exact_name_wins_over_wildcard() {
        let mut set = ExtensionSet::new();
        set.add_filter(noop_filter("a_*")).unwrap();
        set.add_filter(noop_filter("a_b")).unwrap();
        let found = set.resolve(CallableKind::Filter, "a_b").unwrap().unwrap();
        assert!(found.captures.is_empty());
    }

    #[test]
    fn undefined_callback_fallback() {
        let mut set = ExtensionSet::new();
        set.register_undefined_callback(
            CallableKind::Function,
            Arc::new(|name: &str| name.starts_with("host_").then(|| TemplateCallable::deferred(CallableKind::Function, name))),
        );
        assert!(set.resolve(CallableKind::Function, "host_now").unwrap().is_some());
        assert!(set.resolve(CallableKind::Function, "other").unwrap().is_none());
    }

    #[test]
    fn duplicate_test_rejected_at_freeze() {
        let mut set = ExtensionSet::new();
        set.add_test(TemplateCallable::test("odd", |_, _| Ok(Value::Bool(true)))).unwrap();
        set.add_test(TemplateCallable::test("odd", |_, _| Ok(Value::Bool(false)))).unwrap();
        let err = set.registry().err().unwrap();
        assert_eq!(err.message(), "Test \"odd\" is already registered.");
    }

    #[test]
    fn globals_can_be_replaced_but_not_added_after_freeze() {
        let mut set = ExtensionSet::new();
        set.add_global("a", Value::Int(1)).unwrap();
        set.registry().unwrap();
        set.add_global("a", Value::Int(2)).unwrap();
        assert_eq!(set.globals().unwrap()["a"], Value::Int(2));
        assert!(set.add_global("b", Value::Int(3)).is_err());
    }

    #[test]
    fn deprecation_notice() {
        let f = noop_filter("old").deprecated("2.0", Some("new"));
        assert_eq!(f.deprecation_notice().unwrap(), "Filter \"old\" is deprecated since 2.0. Use \"new\" instead.");
    }
}
