use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One compilation unit: template code plus the logical name and the path it was loaded from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    code: Arc<str>,
    name: String,
    path: String,
}

impl Source {
    pub fn new(code: impl Into<Arc<str>>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self { code: code.into(), name: name.into(), path: path.into() }
    }

    /// A source with no backing file, e.g. a template created from a string.
    pub fn inline(code: impl Into<Arc<str>>, name: impl Into<String>) -> Self {
        Self::new(code, name, "")
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Byte range of a 1-based line, without its trailing newline.
    /// Lines past the end clamp to an empty range at the end of the code.
    pub fn line_range(&self, line: usize) -> Range<usize> {
        let mut start = 0;
        for _ in 1..line.max(1) {
            match self.code[start..].find('\n') {
                Some(offset) => start += offset + 1,
                None => return self.code.len()..self.code.len(),
            }
        }
        let end = self.code[start..].find('\n').map_or(self.code.len(), |offset| start + offset);
        start..end
    }

    pub fn line_count(&self) -> usize {
        self.code.lines().count().max(1)
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::inline("", "")
    }
}

// Code can be large; keep debug output readable in error dumps.
impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("len", &self.code.len())
            .finish()
    }
}
