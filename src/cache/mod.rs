//! Storage for compiled template units.
//!
//! The environment asks the cache for a unit by key before compiling a template, and
//! writes the fresh unit back afterwards. When `auto_reload` is on, a cached unit is
//! only used if the loader reports the template unchanged since the unit's timestamp.
//!
//! A unit is an inspection artifact: its generated code and line map. Rendering walks
//! the parsed module, so every template is still tokenized and parsed on first load and
//! a cache hit saves only the emit step.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::compiler::CompiledUnit;
use crate::diagnostics::TemplateError;

pub trait TemplateCache: Send + Sync {
    /// Cache key for a template; an empty key disables caching for it.
    fn generate_key(&self, name: &str, class_name: &str) -> String;

    fn load(&self, key: &str) -> Option<CompiledUnit>;

    fn write(&self, key: &str, unit: &CompiledUnit) -> Result<(), TemplateError>;

    /// Seconds since the epoch at which the entry was written, 0 when absent.
    fn timestamp(&self, key: &str) -> u64;
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Never stores anything.
#[derive(Debug, Default)]
pub struct NullCache;

impl TemplateCache for NullCache {
    fn generate_key(&self, _name: &str, _class_name: &str) -> String {
        String::new()
    }

    fn load(&self, _key: &str) -> Option<CompiledUnit> {
        None
    }

    fn write(&self, _key: &str, _unit: &CompiledUnit) -> Result<(), TemplateError> {
        Ok(())
    }

    fn timestamp(&self, _key: &str) -> u64 {
        0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub unit: CompiledUnit,
    pub timestamp: u64,
}

impl CacheEntry {
    pub fn new(unit: CompiledUnit) -> Self {
        Self { unit, timestamp: now() }
    }
}

/// Process-local cache, shared by every environment holding the same instance.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TemplateCache for MemoryCache {
    fn generate_key(&self, _name: &str, class_name: &str) -> String {
        class_name.to_string()
    }

    fn load(&self, key: &str) -> Option<CompiledUnit> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).map(|entry| entry.unit.clone())
    }

    fn write(&self, key: &str, unit: &CompiledUnit) -> Result<(), TemplateError> {
        let mut entries =
            self.entries.lock().map_err(|_| TemplateError::runtime("The template cache lock is poisoned."))?;
        entries.insert(key.to_string(), CacheEntry::new(unit.clone()));
        Ok(())
    }

    fn timestamp(&self, key: &str) -> u64 {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).map(|entry| entry.timestamp))
            .unwrap_or(0)
    }
}

/// One JSON file per template class under `directory/xx/<sha256>.json`.
#[derive(Debug, Clone)]
pub struct FilesystemCache {
    directory: PathBuf,
}

impl FilesystemCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let json = fs::read_to_string(key).ok()?;
        serde_json::from_str(&json).ok()
    }
}

impl TemplateCache for FilesystemCache {
    fn generate_key(&self, _name: &str, class_name: &str) -> String {
        let hash = format!("{:x}", Sha256::digest(class_name.as_bytes()));
        self.directory.join(&hash[..2]).join(format!("{hash}.json")).to_string_lossy().into_owned()
    }

    fn load(&self, key: &str) -> Option<CompiledUnit> {
        self.read_entry(key).map(|entry| entry.unit)
    }

    fn write(&self, key: &str, unit: &CompiledUnit) -> Result<(), TemplateError> {
        let path = Path::new(key);
        let dir = path.parent().unwrap_or(&self.directory);
        fs::create_dir_all(dir).map_err(|err| {
            TemplateError::runtime(format!("Unable to create the cache directory ({}): {err}", dir.display()))
        })?;

        let json = serde_json::to_string_pretty(&CacheEntry::new(unit.clone()))
            .map_err(|err| TemplateError::runtime(format!("Unable to serialize \"{}\": {err}", unit.template_name)))?;

        // Readers never see a partial entry: write aside, then rename.
        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|err| TemplateError::runtime(format!("Failed to write cache file \"{key}\": {err}")))?;
        debug!(template = %unit.template_name, key, "wrote cache entry");
        Ok(())
    }

    fn timestamp(&self, key: &str) -> u64 {
        self.read_entry(key).map(|entry| entry.timestamp).unwrap_or(0)
    }
}
