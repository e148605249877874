//! Command registry.
//!
//! Maps command names (including the leading `:`) to handler functions. The
//! registry is filled once when the server is built and only read afterwards,
//! so connection handlers share it through an `Arc` without locking.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::commands;

/// Per-peer working directory handed to every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve `target` against this directory. Absolute targets win.
    pub fn join(&self, target: &str) -> PathBuf {
        self.path.join(target)
    }

    pub fn set(&mut self, path: PathBuf) {
        self.path = path;
    }
}

/// Errors a handler reports instead of a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command exists but is not available in this server
    Unimplemented(&'static str),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Unimplemented(name) => write!(f, "{} is not implemented", name),
        }
    }
}

impl std::error::Error for CommandError {}

/// Outcome of a handler: bytes to write back, or a feature error
pub type CommandResult = Result<Bytes, CommandError>;

/// Handler contract: arguments in, response bytes out.
///
/// Ordinary failures (missing files, bad paths) are reported as notice bytes
/// in the `Ok` payload; only `CommandError` escapes as an error.
pub type Handler = fn(&mut WorkDir, &[String]) -> CommandResult;

/// Mapping from command name to handler
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Handler>,
}

impl CommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all filesystem commands installed
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(":ls", commands::ls);
        registry.register(":cd", commands::cd);
        registry.register(":cwd", commands::cwd);
        registry.register(":cat", commands::cat);
        registry.register(":mkdir", commands::mkdir);
        registry.register(":rmdir", commands::rmdir);
        registry.register(":rm", commands::rm);
        registry.register(":touch", commands::touch);
        registry.register(":tree", commands::tree);
        registry
    }

    /// Insert or overwrite the handler for `name`
    pub fn register(&mut self, name: &str, handler: Handler) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Look up the handler for `name`
    pub fn resolve(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered command names, sorted
    #[cfg(test)]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(_: &mut WorkDir, _: &[String]) -> CommandResult {
        Ok(Bytes::from_static(b"hello\n"))
    }

    fn bye(_: &mut WorkDir, _: &[String]) -> CommandResult {
        Ok(Bytes::from_static(b"bye\n"))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = CommandRegistry::new();
        assert!(registry.is_empty());
        registry.register(":hello", hello);

        let handler = registry.resolve(":hello").unwrap();
        let mut wd = WorkDir::new("/");
        assert_eq!(handler(&mut wd, &[]).unwrap(), Bytes::from_static(b"hello\n"));
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = CommandRegistry::new();
        registry.register(":greet", hello);
        registry.register(":greet", bye);
        assert_eq!(registry.len(), 1);

        let handler = registry.resolve(":greet").unwrap();
        let mut wd = WorkDir::new("/");
        assert_eq!(handler(&mut wd, &[]).unwrap(), Bytes::from_static(b"bye\n"));
    }

    #[test]
    fn test_resolve_missing() {
        let registry = CommandRegistry::with_defaults();
        assert!(registry.resolve(":ftp").is_none());
        assert!(registry.resolve("ls").is_none());
        assert!(registry.resolve("hello").is_none());
    }

    #[test]
    fn test_defaults() {
        let registry = CommandRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec![":cat", ":cd", ":cwd", ":ls", ":mkdir", ":rm", ":rmdir", ":touch", ":tree"]
        );
    }

    #[test]
    fn test_workdir_join() {
        let wd = WorkDir::new("/srv");
        assert_eq!(wd.join("a.txt"), PathBuf::from("/srv/a.txt"));
        assert_eq!(wd.join("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
