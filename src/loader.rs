//! Template loaders: where template source text comes from.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use indexmap::IndexMap;
use tracing::trace;

use crate::diagnostics::TemplateError;
use crate::source::Source;

pub const MAIN_NAMESPACE: &str = "__main__";

pub trait Loader: Send + Sync {
    fn source(&self, name: &str) -> Result<Source, TemplateError>;

    /// A key unique to the template across every loader in use.
    fn cache_key(&self, name: &str) -> Result<String, TemplateError>;

    /// Whether the template is unchanged since `time` (seconds since the epoch).
    fn is_fresh(&self, name: &str, time: u64) -> Result<bool, TemplateError>;

    fn exists(&self, name: &str) -> bool;
}

/// Templates held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ArrayLoader {
    templates: IndexMap<String, String>,
}

impl ArrayLoader {
    pub fn new<N: Into<String>, C: Into<String>>(templates: impl IntoIterator<Item = (N, C)>) -> Self {
        Self { templates: templates.into_iter().map(|(name, code)| (name.into(), code.into())).collect() }
    }

    pub fn set_template(&mut self, name: impl Into<String>, code: impl Into<String>) {
        self.templates.insert(name.into(), code.into());
    }

    fn get(&self, name: &str) -> Result<&str, TemplateError> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TemplateError::loader(format!("Template \"{name}\" is not defined.")))
    }
}

impl Loader for ArrayLoader {
    fn source(&self, name: &str) -> Result<Source, TemplateError> {
        Ok(Source::new(self.get(name)?, name, ""))
    }

    fn cache_key(&self, name: &str) -> Result<String, TemplateError> {
        let code = self.get(name)?;
        Ok(format!("{name}:{code}"))
    }

    fn is_fresh(&self, name: &str, _time: u64) -> Result<bool, TemplateError> {
        self.get(name).map(|_| true)
    }

    fn exists(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }
}

/// Templates read from directories, optionally grouped under `@namespace/` prefixes.
#[derive(Debug, Default)]
pub struct FilesystemLoader {
    paths: IndexMap<String, Vec<PathBuf>>,
    found: Mutex<HashMap<String, PathBuf>>,
}

impl FilesystemLoader {
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        let mut loader = Self::default();
        for path in paths {
            loader.add_path(path, MAIN_NAMESPACE);
        }
        loader
    }

    pub fn paths(&self, namespace: &str) -> &[PathBuf] {
        self.paths.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    pub fn add_path(&mut self, path: impl Into<PathBuf>, namespace: &str) {
        self.clear_found();
        self.paths.entry(namespace.to_string()).or_default().push(path.into());
    }

    pub fn prepend_path(&mut self, path: impl Into<PathBuf>, namespace: &str) {
        self.clear_found();
        self.paths.entry(namespace.to_string()).or_default().insert(0, path.into());
    }

    fn clear_found(&mut self) {
        if let Ok(found) = self.found.get_mut() {
            found.clear();
        }
    }

    fn find(&self, name: &str) -> Result<PathBuf, TemplateError> {
        let name = normalize_name(name);
        if let Some(path) = self.found.lock().ok().and_then(|found| found.get(&name).cloned()) {
            return Ok(path);
        }

        validate_name(&name)?;
        let (namespace, short) = parse_name(&name)?;
        let Some(dirs) = self.paths.get(namespace) else {
            return Err(TemplateError::loader(format!("There are no registered paths for namespace \"{namespace}\".")));
        };

        for dir in dirs {
            let candidate = dir.join(short);
            trace!(candidate = %candidate.display(), "looking up template");
            if candidate.is_file() {
                if let Ok(mut found) = self.found.lock() {
                    found.insert(name.clone(), candidate.clone());
                }
                return Ok(candidate);
            }
        }

        let looked: Vec<String> = dirs.iter().map(|dir| dir.display().to_string()).collect();
        Err(TemplateError::loader(format!(
            "Unable to find template \"{name}\" (looked into: {}).",
            looked.join(", ")
        )))
    }
}

fn normalize_name(name: &str) -> String {
    let mut normalized = name.replace('\\', "/");
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    normalized
}

/// Reject names that climb above the search directory.
fn validate_name(name: &str) -> Result<(), TemplateError> {
    if name.contains('\0') {
        return Err(TemplateError::loader("A template name cannot contain NUL bytes."));
    }
    let mut level: i32 = 0;
    for component in Path::new(name.trim_start_matches('/')).components() {
        match component {
            Component::ParentDir => level -= 1,
            Component::Normal(_) => level += 1,
            _ => {}
        }
        if level < 0 {
            return Err(TemplateError::loader(format!(
                "Looks like you try to load a template outside configured directories ({name})."
            )));
        }
    }
    Ok(())
}

fn parse_name(name: &str) -> Result<(&str, &str), TemplateError> {
    let Some(rest) = name.strip_prefix('@') else {
        return Ok((MAIN_NAMESPACE, name.trim_start_matches('/')));
    };
    match rest.split_once('/') {
        Some((namespace, short)) if !namespace.is_empty() && !short.is_empty() => Ok((namespace, short)),
        _ => Err(TemplateError::loader(format!(
            "Malformed namespaced template name \"{name}\" (expecting \"@namespace/template_name\")."
        ))),
    }
}

fn modified(path: &Path) -> Option<u64> {
    let time = fs::metadata(path).and_then(|meta| meta.modified()).ok()?;
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

impl Loader for FilesystemLoader {
    fn source(&self, name: &str) -> Result<Source, TemplateError> {
        let path = self.find(name)?;
        let code = fs::read_to_string(&path)
            .map_err(|err| TemplateError::loader(format!("Unable to read template \"{name}\": {err}")))?;
        Ok(Source::new(code, name, path.to_string_lossy()))
    }

    fn cache_key(&self, name: &str) -> Result<String, TemplateError> {
        let path = self.find(name)?;
        Ok(path.canonicalize().unwrap_or(path).to_string_lossy().into_owned())
    }

    fn is_fresh(&self, name: &str, time: u64) -> Result<bool, TemplateError> {
        let path = self.find(name)?;
        Ok(modified(&path).is_some_and(|mtime| mtime < time))
    }

    fn exists(&self, name: &str) -> bool {
        self.find(name).is_ok()
    }
}

/// Asks each loader in turn; the first that has the template wins.
#[derive(Default)]
pub struct ChainLoader {
    loaders: Vec<Box<dyn Loader>>,
}

impl ChainLoader {
    pub fn new(loaders: Vec<Box<dyn Loader>>) -> Self {
        Self { loaders }
    }

    pub fn add_loader(&mut self, loader: impl Loader + 'static) {
        self.loaders.push(Box::new(loader));
    }

    fn first<T>(&self, name: &str, f: impl Fn(&dyn Loader) -> Result<T, TemplateError>) -> Result<T, TemplateError> {
        let mut errors = Vec::new();
        for loader in &self.loaders {
            if !loader.exists(name) {
                continue;
            }
            match f(loader.as_ref()) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_loader() => errors.push(err.message().to_string()),
                Err(err) => return Err(err),
            }
        }
        let detail = if errors.is_empty() { String::new() } else { format!(" ({})", errors.join(", ")) };
        Err(TemplateError::loader(format!("Template \"{name}\" is not defined{detail}.")))
    }
}

impl Loader for ChainLoader {
    fn source(&self, name: &str) -> Result<Source, TemplateError> {
        self.first(name, |loader| loader.source(name))
    }

    fn cache_key(&self, name: &str) -> Result<String, TemplateError> {
        self.first(name, |loader| loader.cache_key(name))
    }

    fn is_fresh(&self, name: &str, time: u64) -> Result<bool, TemplateError> {
        self.first(name, |loader| loader.is_fresh(name, time))
    }

    fn exists(&self, name: &str) -> bool {
        self.loaders.iter().any(|loader| loader.exists(name))
    }
}
