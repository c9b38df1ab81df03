mod common;

use std::fs;
use std::path::Path;

use common::context;
use tessera::config::{self, EnvironmentOptions};
use tessera::loader::MAIN_NAMESPACE;
use tessera::{ArrayLoader, ChainLoader, Environment, FilesystemLoader, Loader};

fn write(dir: &Path, name: &str, code: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, code).unwrap();
}

#[test]
fn filesystem_templates_extend_and_include() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "layout.html", "<main>{% block content %}{% endblock %}</main>");
    write(dir.path(), "partials/item.html", "<li>{{ item }}</li>");
    write(
        dir.path(),
        "page.html",
        "{% extends 'layout.html' %}{% block content %}{% for item in items %}{% include 'partials/item.html' %}{% endfor %}{% endblock %}",
    );

    let env = Environment::new(FilesystemLoader::new([dir.path()]));
    let out = env.render("page.html", context(r#"{"items": ["a", "b"]}"#)).unwrap();
    assert_eq!(out, "<main><li>a</li><li>b</li></main>");
}

#[test]
fn namespaces_and_path_priority() {
    let theme = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let admin = tempfile::tempdir().unwrap();
    write(base.path(), "button.html", "base");
    write(theme.path(), "button.html", "theme");
    write(admin.path(), "index.html", "admin {% include 'button.html' %} {% include '@admin/footer.html' %}");
    write(admin.path(), "footer.html", "footer");

    let mut loader = FilesystemLoader::new([base.path()]);
    loader.prepend_path(theme.path(), MAIN_NAMESPACE);
    loader.add_path(admin.path(), "admin");
    assert_eq!(loader.paths(MAIN_NAMESPACE).len(), 2);
    assert_eq!(loader.namespaces().collect::<Vec<_>>(), vec![MAIN_NAMESPACE, "admin"]);

    let env = Environment::new(loader);
    assert!(env.exists("@admin/index.html"));
    assert!(!env.exists("@admin/button.html"));
    assert_eq!(env.render("@admin/index.html", context("{}")).unwrap(), "admin theme footer");
}

#[test]
fn missing_file_is_a_loader_error() {
    let dir = tempfile::tempdir().unwrap();
    let env = Environment::new(FilesystemLoader::new([dir.path()]));
    let err = env.render("nope.html", context("{}")).unwrap_err();
    assert!(err.is_loader());
    assert!(err.message().starts_with("Unable to find template \"nope.html\""));
}

#[test]
fn freshness_follows_modification_time() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.html", "a");
    let loader = FilesystemLoader::new([dir.path()]);
    assert!(!loader.is_fresh("a.html", 0).unwrap());
    assert!(loader.is_fresh("a.html", u64::MAX).unwrap());
    assert!(loader.is_fresh("b.html", 0).is_err());
}

#[test]
fn cache_keys_identify_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.html", "a");
    write(dir.path(), "sub/a.html", "a");
    let loader = FilesystemLoader::new([dir.path()]);
    assert_ne!(loader.cache_key("a.html").unwrap(), loader.cache_key("sub/a.html").unwrap());
    assert_eq!(loader.cache_key("a.html").unwrap(), loader.cache_key("./a.html").unwrap());
}

#[test]
fn chain_loader_falls_through() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "disk.html", "disk {% include 'memory' %}");
    let mut chain = ChainLoader::default();
    chain.add_loader(ArrayLoader::new([("memory", "memory")]));
    chain.add_loader(FilesystemLoader::new([dir.path()]));
    let env = Environment::new(chain);
    assert_eq!(env.render("disk.html", context("{}")).unwrap(), "disk memory");

    let err = env.render("missing", context("{}")).unwrap_err();
    assert!(err.is_loader());
    assert_eq!(err.message(), "Template \"missing\" is not defined.");
}

#[test]
fn options_file_configures_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(config::CONFIG_FILE);
    fs::write(&path, "strict_variables = true\nautoescape = false\n").unwrap();

    let options = config::load(&path).unwrap();
    assert!(options.strict_variables);
    let env = Environment::with_options(ArrayLoader::new([("index", "{{ '<b>' }}{{ missing }}")]), options);
    let err = env.render("index", context("{}")).unwrap_err();
    assert_eq!(err.message(), "Variable \"missing\" does not exist.");

    let env = Environment::with_options(ArrayLoader::new([("index", "{{ x }}")]), EnvironmentOptions::default());
    assert_eq!(env.render("index", context(r#"{"x": "<b>"}"#)).unwrap(), "&lt;b&gt;");

    fs::write(&path, "strict_variables = \"yes\"").unwrap();
    let err = config::load(&path).unwrap_err();
    assert!(err.message().starts_with("tessera.toml: invalid syntax"));
}
