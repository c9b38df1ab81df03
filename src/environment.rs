//! The environment owns everything shared between templates: options, the loader,
//! the extension registry, the compiled-unit cache and the lexer built from the
//! registered operators.
//!
//! ```no_run
//! use tessera::{ArrayLoader, Environment, Map};
//!
//! let env = Environment::new(ArrayLoader::new([("index", "Hello {{ name }}!")]));
//! let mut context = Map::new();
//! context.insert("name".into(), "World".into());
//! assert_eq!(env.render("index", context).unwrap(), "Hello World!");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::{NullCache, TemplateCache};
use crate::compiler::{CompiledUnit, Compiler};
use crate::config::EnvironmentOptions;
use crate::diagnostics::TemplateError;
use crate::extension::core::CoreExtension;
use crate::extension::escaper::EscaperExtension;
use crate::extension::optimizer::OptimizerExtension;
use crate::extension::sandbox::SandboxExtension;
use crate::extension::{
    CallableKind, Extension, ExtensionSet, Registry, RuntimeLoader, TemplateFilter, TemplateFunction, TemplateTest,
    UndefinedCallback, VisitorFactory,
};
use crate::lexer::stream::TokenStream;
use crate::lexer::Lexer;
use crate::loader::Loader;
use crate::parser::ast::ModuleNode;
use crate::parser::tags::TokenParser;
use crate::parser::Parser;
use crate::runtime::{Map, Renderer, Value};
use crate::source::Source;

pub struct Environment {
    options: EnvironmentOptions,
    loader: Box<dyn Loader>,
    extensions: ExtensionSet,
    cache: Arc<dyn TemplateCache>,
    lexer: OnceCell<Lexer>,
    /// Loaded templates by class name.
    templates: Mutex<HashMap<String, Arc<Template>>>,
}

impl Environment {
    pub fn new(loader: impl Loader + 'static) -> Self {
        Self::with_options(loader, EnvironmentOptions::default())
    }

    pub fn with_options(loader: impl Loader + 'static, options: EnvironmentOptions) -> Self {
        let mut extensions = ExtensionSet::new();
        extensions.insert_builtin(Arc::new(CoreExtension));
        extensions.insert_builtin(Arc::new(EscaperExtension));
        extensions.insert_builtin(Arc::new(OptimizerExtension));
        if let Some(sandbox) = &options.sandbox {
            extensions.insert_builtin(Arc::new(SandboxExtension::new(sandbox)));
        }
        Self {
            options,
            loader: Box::new(loader),
            extensions,
            cache: Arc::new(NullCache),
            lexer: OnceCell::new(),
            templates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TemplateCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }

    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }

    /// Replacing the loader forgets every loaded template.
    pub fn set_loader(&mut self, loader: impl Loader + 'static) {
        self.loader = Box::new(loader);
        if let Ok(templates) = self.templates.get_mut() {
            templates.clear();
        }
    }

    pub fn cache(&self) -> &Arc<dyn TemplateCache> {
        &self.cache
    }

    pub fn set_cache(&mut self, cache: Arc<dyn TemplateCache>) {
        self.cache = cache;
    }

    // ------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    pub fn registry(&self) -> Result<&Registry, TemplateError> {
        self.extensions.registry()
    }

    pub fn extension<T: Extension>(&self) -> Option<&T> {
        self.extensions.extension::<T>()
    }

    pub fn sandbox(&self) -> Option<&SandboxExtension> {
        self.extension::<SandboxExtension>()
    }

    pub fn add_extension(&mut self, extension: impl Extension) -> Result<(), TemplateError> {
        self.extensions.add_extension(Arc::new(extension))
    }

    pub fn add_token_parser(&mut self, parser: Arc<dyn TokenParser>) -> Result<(), TemplateError> {
        self.extensions.add_token_parser(parser)
    }

    pub fn add_node_visitor(&mut self, factory: VisitorFactory) -> Result<(), TemplateError> {
        self.extensions.add_node_visitor(factory)
    }

    pub fn add_filter(&mut self, filter: TemplateFilter) -> Result<(), TemplateError> {
        self.extensions.add_filter(filter)
    }

    pub fn add_function(&mut self, function: TemplateFunction) -> Result<(), TemplateError> {
        self.extensions.add_function(function)
    }

    pub fn add_test(&mut self, test: TemplateTest) -> Result<(), TemplateError> {
        self.extensions.add_test(test)
    }

    pub fn add_global(&mut self, name: &str, value: impl Into<Value>) -> Result<(), TemplateError> {
        self.extensions.add_global(name, value.into())
    }

    pub fn register_undefined_filter_callback(&mut self, callback: UndefinedCallback) {
        self.extensions.register_undefined_callback(CallableKind::Filter, callback);
    }

    pub fn register_undefined_function_callback(&mut self, callback: UndefinedCallback) {
        self.extensions.register_undefined_callback(CallableKind::Function, callback);
    }

    pub fn register_undefined_test_callback(&mut self, callback: UndefinedCallback) {
        self.extensions.register_undefined_callback(CallableKind::Test, callback);
    }

    pub fn add_runtime_loader(&mut self, loader: impl RuntimeLoader + 'static) {
        self.extensions.add_runtime_loader(Arc::new(loader));
    }

    pub fn globals(&self) -> Result<Map, TemplateError> {
        self.extensions.globals()
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    pub fn tokenize(&self, source: &Source) -> Result<TokenStream, TemplateError> {
        let lexer = self.lexer.get_or_try_init(|| {
            let registry = self.registry()?;
            Lexer::new(&self.options.lexer, registry.operator_symbols())
        })?;
        lexer.tokenize(source)
    }

    pub fn parse(&self, stream: TokenStream) -> Result<ModuleNode, TemplateError> {
        Parser::new(self)?.parse(stream)
    }

    pub fn compile(&self, module: &ModuleNode) -> CompiledUnit {
        Compiler::new(self).compile(module)
    }

    pub fn compile_source(&self, source: &Source) -> Result<CompiledUnit, TemplateError> {
        let module = self.parse(self.tokenize(source)?)?;
        Ok(self.compile(&module))
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Everything besides the template itself that changes the compiled output.
    pub fn options_hash(&self) -> String {
        let parts = serde_json::json!([
            self.extensions.signature(),
            env!("CARGO_PKG_VERSION"),
            self.options.debug,
            self.options.strict_variables,
            self.options.optimizations,
            self.options.autoescape,
            self.options.sandbox.is_some(),
        ]);
        parts.to_string()
    }

    /// `__Template_<sha256>` for a top-level template, with `___<index>` for an embedded one.
    pub fn template_class(&self, name: &str, index: Option<usize>) -> String {
        let key = self.loader.cache_key(name).unwrap_or_else(|_| name.to_string());
        let hash = Sha256::digest(format!("{key}{}", self.options_hash()).as_bytes());
        let mut class = format!("__Template_{hash:x}");
        if let Some(index) = index {
            class.push_str(&format!("___{index}"));
        }
        class
    }

    pub fn exists(&self, name: &str) -> bool {
        self.loader.exists(name)
    }

    fn loaded(&self, class_name: &str) -> Option<Arc<Template>> {
        self.templates.lock().ok().and_then(|templates| templates.get(class_name).cloned())
    }

    fn remember(&self, template: Arc<Template>) -> Arc<Template> {
        if let Ok(mut templates) = self.templates.lock() {
            templates.insert(template.class_name.clone(), template.clone());
        }
        template
    }

    /// Parse `name` and attach its compiled unit, taken from the cache when it holds a fresh one.
    /// The parsed module is what renders; the unit only describes it.
    pub fn load_template(&self, name: &str) -> Result<Arc<Template>, TemplateError> {
        let class_name = self.template_class(name, None);
        if let Some(template) = self.loaded(&class_name) {
            return Ok(template);
        }

        let source = self.loader.source(name)?;
        let module = Arc::new(self.parse(self.tokenize(&source)?)?);

        let key = self.cache.generate_key(name, &class_name);
        let cached = if key.is_empty() {
            None
        } else if !self.options.auto_reload() || self.loader.is_fresh(name, self.cache.timestamp(&key))? {
            self.cache.load(&key)
        } else {
            None
        };
        let unit = match cached {
            Some(unit) => {
                debug!(template = name, class = %class_name, "compiled unit cache hit");
                unit
            }
            None => {
                let unit = self.compile(&module);
                if !key.is_empty() {
                    self.cache.write(&key, &unit)?;
                }
                unit
            }
        };

        debug!(template = name, class = %class_name, "loaded template");
        Ok(self.remember(Arc::new(Template { name: name.to_string(), class_name, module, unit: Arc::new(unit) })))
    }

    /// The `{% embed %}` module `index` declared somewhere inside `template`.
    pub fn load_embedded(&self, template: &Arc<Template>, index: usize) -> Result<Arc<Template>, TemplateError> {
        let class_name = self.template_class(&template.name, Some(index));
        if let Some(loaded) = self.loaded(&class_name) {
            return Ok(loaded);
        }
        let Some(module) = template.module.find_embedded(index) else {
            return Err(TemplateError::logic(format!(
                "Template \"{}\" has no embedded template with index {index}.",
                template.name
            )));
        };
        let embedded = Template {
            name: template.name.clone(),
            class_name,
            module: module.clone(),
            unit: template.unit.clone(),
        };
        Ok(self.remember(Arc::new(embedded)))
    }

    /// A template from a string; it is not registered with the loader.
    pub fn create_template(&self, code: &str, name: Option<&str>) -> Result<Arc<Template>, TemplateError> {
        let hash = format!("{:x}", Sha256::digest(code.as_bytes()));
        let name = match name {
            Some(name) => format!("{name} (string template {})", &hash[..12]),
            None => format!("__string_template__{hash}"),
        };
        let source = Source::inline(code, name.clone());
        let module = self.parse(self.tokenize(&source)?)?;
        let unit = self.compile(&module);
        debug!(template = %name, "created template from string");
        Ok(Arc::new(Template {
            name,
            class_name: unit.class_name.clone(),
            module: Arc::new(module),
            unit: Arc::new(unit),
        }))
    }

    pub fn render(&self, name: &str, context: Map) -> Result<String, TemplateError> {
        self.load_template(name)?.render(self, context)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("options", &self.options)
            .field("extensions", &self.extensions.signature())
            .finish_non_exhaustive()
    }
}

/// A loaded template: its parsed module and the compiled unit it came with.
#[derive(Debug)]
pub struct Template {
    name: String,
    class_name: String,
    module: Arc<ModuleNode>,
    unit: Arc<CompiledUnit>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn module(&self) -> &Arc<ModuleNode> {
        &self.module
    }

    pub fn unit(&self) -> &CompiledUnit {
        &self.unit
    }

    pub fn source(&self) -> &Source {
        &self.module.source
    }

    pub fn render(self: &Arc<Self>, env: &Environment, context: Map) -> Result<String, TemplateError> {
        Renderer::new(env).render(self, context)
    }

    pub fn render_block(self: &Arc<Self>, env: &Environment, name: &str, context: Map) -> Result<String, TemplateError> {
        Renderer::new(env).render_block(self, name, context)
    }

    pub fn has_block(self: &Arc<Self>, env: &Environment, name: &str, context: &Map) -> Result<bool, TemplateError> {
        Renderer::new(env).has_template_block(self, name, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::loader::ArrayLoader;

    #[test]
    fn templates_are_loaded_once() {
        let env = Environment::new(ArrayLoader::new([("index", "Hi")]));
        let a = env.load_template("index").unwrap();
        let b = env.load_template("index").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn class_names_depend_on_options() {
        let loader = || ArrayLoader::new([("index", "Hi")]);
        let plain = Environment::new(loader());
        let strict = Environment::with_options(
            loader(),
            EnvironmentOptions { strict_variables: true, ..EnvironmentOptions::default() },
        );
        assert_ne!(plain.template_class("index", None), strict.template_class("index", None));
        assert!(plain.template_class("index", Some(3)).ends_with("___3"));
    }

    #[test]
    fn compiled_units_go_through_the_cache() {
        let cache = Arc::new(MemoryCache::new());
        let env = Environment::new(ArrayLoader::new([("index", "Hi")])).with_cache(cache.clone());
        env.load_template("index").unwrap();
        assert_eq!(cache.len(), 1);

        let again = Environment::new(ArrayLoader::new([("index", "Hi")])).with_cache(cache.clone());
        let template = again.load_template("index").unwrap();
        assert_eq!(template.unit().template_name, "index");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sandbox_extension_only_when_configured() {
        let env = Environment::new(ArrayLoader::default());
        assert!(env.sandbox().is_none());
        let options = EnvironmentOptions { sandbox: Some(Default::default()), ..EnvironmentOptions::default() };
        let env = Environment::with_options(ArrayLoader::default(), options);
        assert!(env.sandbox().is_some());
        assert_eq!(env.extensions().signature(), r#"["core","escaper","optimizer","sandbox"]"#);
    }

    #[test]
    fn missing_template_is_a_loader_error() {
        let env = Environment::new(ArrayLoader::default());
        let err = env.load_template("nope").unwrap_err();
        assert!(err.is_loader());
    }

    #[test]
    fn string_templates() {
        let env = Environment::new(ArrayLoader::default());
        let template = env.create_template("{{ 1 + 2 }}", None).unwrap();
        assert!(template.name().starts_with("__string_template__"));
        assert_eq!(template.render(&env, Map::new()).unwrap(), "3");
    }
}
