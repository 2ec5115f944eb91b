use crate::lexer::is_identifier;
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the variable store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// Variable names must look like identifiers (`[A-Za-z_][A-Za-z0-9_]*`).
    #[error("invalid variable name '{0}'")]
    InvalidName(String),
}

/// Mutable, user-level state shared by every component of the interpreter.
///
/// The environment contains:
/// - `vars`: ambient variables set with `KEY=value`. They are merged into every
///   module invocation and consulted first when expanding `$name`.
/// - `modules_dir`: directory the module runtime was started on; wrapper
///   commands re-launch the interpreter against it.
/// - `should_exit`: a flag the interactive loop checks to know when to terminate.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, String>,
    pub modules_dir: PathBuf,
    pub should_exit: bool,
}

impl Environment {
    /// Creates a store bound to the given modules directory, with no ambient variables.
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: HashMap::new(),
            modules_dir: modules_dir.into(),
            should_exit: false,
        }
    }

    /// Store rooted at the current directory. Mostly useful in tests.
    pub fn empty() -> Self {
        Self::new(stdenv::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Looks up an ambient variable only.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Resolves `$key` for expansion.
    ///
    /// Looks up the key in the ambient variables first, falling back to `std::env::var`.
    pub fn resolve(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or override an ambient variable.
    pub fn set_var(
        &mut self,
        key: impl Into<String>,
        val: impl Into<String>,
    ) -> Result<(), EnvError> {
        let key = key.into();
        if !is_identifier(&key) {
            return Err(EnvError::InvalidName(key));
        }
        self.vars.insert(key, val.into());
        Ok(())
    }

    /// All ambient variables.
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Ambient variables sorted by name, for display.
    pub fn sorted_vars(&self) -> Vec<(&str, &str)> {
        let mut vars: Vec<_> = self
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        vars.sort();
        vars
    }
}
