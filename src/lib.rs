//! A template engine: templates are lexed, parsed into a module tree, rewritten by
//! node visitors (auto-escaping, sandbox bookkeeping, constant folding), compiled to
//! inspectable source text, and rendered by walking the tree.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod extension;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod runtime;
pub mod source;
pub mod visit;

pub use cache::{FilesystemCache, MemoryCache, NullCache, TemplateCache};
pub use compiler::CompiledUnit;
pub use config::EnvironmentOptions;
pub use diagnostics::TemplateError;
pub use environment::{Environment, Template};
pub use extension::{Extension, TemplateCallable};
pub use loader::{ArrayLoader, ChainLoader, FilesystemLoader, Loader};
pub use runtime::{Map, TemplateObject, Value};
pub use source::Source;
