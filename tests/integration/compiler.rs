mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{context, env};
use tessera::config::EnvironmentOptions;
use tessera::{
    ArrayLoader, CompiledUnit, Environment, FilesystemCache, MemoryCache, Source, TemplateCache, TemplateError,
};

#[test]
fn compiled_unit_describes_the_template() {
    let env = env(&[]);
    let unit = env
        .compile_source(&Source::inline("{% block title %}T{% endblock %}{% macro m() %}{% endmacro %}", "page"))
        .unwrap();
    assert!(unit.class_name.starts_with("__Template_"));
    assert_eq!(unit.template_name, "page");
    assert!(unit.code.contains(&format!("pub struct {};", unit.class_name)));
    assert!(unit.code.contains("pub fn display("));
    assert!(unit.code.contains("pub fn block_title("));
    assert!(unit.code.contains("pub fn macro_m("));
}

#[test]
fn debug_info_maps_back_to_template_lines() {
    let env = env(&[]);
    let unit = env.compile_source(&Source::inline("{{ a }}\n\n{{ b }}", "index")).unwrap();
    let lines: Vec<usize> = unit.debug_info.values().copied().collect();
    assert!(lines.contains(&1));
    assert!(lines.contains(&3));
    assert_eq!(unit.template_line(usize::MAX), Some(3));
    assert_eq!(unit.template_line(0), None);
}

#[test]
fn class_names_depend_on_options() {
    let plain = env(&[]);
    let debug = Environment::with_options(
        ArrayLoader::default(),
        EnvironmentOptions { debug: true, ..EnvironmentOptions::default() },
    );
    assert_eq!(plain.template_class("index", None), env(&[]).template_class("index", None));
    assert_ne!(plain.template_class("index", None), debug.template_class("index", None));
    assert_ne!(plain.template_class("index", None), plain.template_class("other", None));
    assert!(plain.template_class("index", Some(7)).ends_with("___7"));
}

#[test]
fn syntax_errors_surface_from_compile_source() {
    let env = env(&[]);
    let err = env.compile_source(&Source::inline("{% if %}", "index")).unwrap_err();
    assert!(err.is_syntax());
    assert_eq!(err.line(), Some(1));
}

/// Counts cache traffic on top of an in-memory cache.
#[derive(Default)]
struct CountingCache {
    inner: MemoryCache,
    loads: AtomicUsize,
    writes: AtomicUsize,
}

impl TemplateCache for CountingCache {
    fn generate_key(&self, name: &str, class_name: &str) -> String {
        self.inner.generate_key(name, class_name)
    }

    fn load(&self, key: &str) -> Option<CompiledUnit> {
        let unit = self.inner.load(key);
        if unit.is_some() {
            self.loads.fetch_add(1, Ordering::SeqCst);
        }
        unit
    }

    fn write(&self, key: &str, unit: &CompiledUnit) -> Result<(), TemplateError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, unit)
    }

    fn timestamp(&self, key: &str) -> u64 {
        self.inner.timestamp(key)
    }
}

#[test]
fn memory_cache_is_shared_between_environments() {
    let templates = [("index", "Hello {{ name }}")];
    let cache = Arc::new(CountingCache::default());

    let first = env(&templates).with_cache(cache.clone());
    assert_eq!(first.render("index", context(r#"{"name": "a"}"#)).unwrap(), "Hello a");
    assert_eq!(cache.writes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.inner.len(), 1);

    let second = env(&templates).with_cache(cache.clone());
    assert_eq!(second.render("index", context(r#"{"name": "b"}"#)).unwrap(), "Hello b");
    assert_eq!(cache.loads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.writes.load(Ordering::SeqCst), 1);
}

#[test]
fn loaded_templates_are_reused_within_an_environment() {
    let cache = Arc::new(CountingCache::default());
    let env = env(&[("index", "x")]).with_cache(cache.clone());
    let a = env.load_template("index").unwrap();
    let b = env.load_template("index").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.writes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.loads.load(Ordering::SeqCst), 0);
}

#[test]
fn cached_units_describe_but_do_not_render() {
    let cache = Arc::new(MemoryCache::new());
    let env = env(&[("index", "from source")]).with_cache(cache.clone());
    let class_name = env.template_class("index", None);
    let stored = CompiledUnit {
        class_name: class_name.clone(),
        template_name: "index".to_string(),
        code: "// stored".to_string(),
        debug_info: Default::default(),
    };
    cache.write(&cache.generate_key("index", &class_name), &stored).unwrap();

    let template = env.load_template("index").unwrap();
    assert_eq!(template.unit(), &stored);
    assert_eq!(template.render(&env, context("{}")).unwrap(), "from source");
}

fn json_files(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(json_files(&path));
        } else if path.extension().is_some_and(|ext| ext == "json") {
            found.push(fs::read_to_string(&path).unwrap());
        }
    }
    found
}

#[test]
fn filesystem_cache_persists_units() {
    let dir = tempfile::tempdir().unwrap();
    let templates = [("index", "{{ 1 + 2 }}")];

    let first = env(&templates).with_cache(Arc::new(FilesystemCache::new(dir.path())));
    assert_eq!(first.render("index", context("{}")).unwrap(), "3");
    let files = json_files(dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].contains("\"template_name\": \"index\""));
    assert!(files[0].contains("\"timestamp\""));

    let second = env(&templates).with_cache(Arc::new(FilesystemCache::new(dir.path())));
    let template = second.load_template("index").unwrap();
    assert_eq!(template.unit().class_name, second.template_class("index", None));
    assert_eq!(template.render(&second, context("{}")).unwrap(), "3");
    assert_eq!(json_files(dir.path()).len(), 1);
}
