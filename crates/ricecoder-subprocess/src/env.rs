//! Child environment and argument vector serialization
//!
//! The child always starts from the parent's environment; caller overrides
//! replace inherited variables of the same name and everything else passes
//! through untouched.

use std::collections::BTreeMap;
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, Result};

/// Overrides layered on top of the inherited environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    overrides: BTreeMap<String, String>,
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ProcessError::invalid("environment variable name is empty"));
    }
    if key.contains('=') || key.contains('\0') {
        return Err(ProcessError::invalid(format!(
            "environment variable name {key:?} contains '=' or NUL"
        )));
    }
    Ok(())
}

fn entry(key: &[u8], value: &[u8]) -> Result<CString> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(key.len() + value.len() + 2)
        .map_err(|_| ProcessError::OutOfMemory)?;
    bytes.extend_from_slice(key);
    bytes.push(b'=');
    bytes.extend_from_slice(value);
    CString::new(bytes).map_err(|_| ProcessError::invalid("environment entry contains NUL"))
}

impl Environment {
    /// Create empty overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one override, replacing an earlier one for the same key
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Set one override in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(key.into(), value.into());
    }

    /// Override for `key`, if any
    pub fn get(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Number of overrides
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// True when nothing is overridden
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Check names and values without building anything
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.overrides {
            check_key(key)?;
            if value.contains('\0') {
                return Err(ProcessError::invalid(format!(
                    "value of environment variable {key:?} contains NUL"
                )));
            }
        }
        Ok(())
    }

    /// Full child environment extending the current process environment
    pub fn build(&self) -> Result<Vec<CString>> {
        self.build_from(std::env::vars_os())
    }

    /// Full child environment extending `parent`.
    ///
    /// Entries are `KEY=VALUE`, sorted by key.
    pub fn build_from<I>(&self, parent: I) -> Result<Vec<CString>>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let merged = self.resolve_from(parent)?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(merged.len())
            .map_err(|_| ProcessError::OutOfMemory)?;
        for (key, value) in &merged {
            entries.push(entry(key.as_bytes(), value.as_bytes())?);
        }
        Ok(entries)
    }

    /// Merged name/value pairs extending the current process environment
    pub fn resolve(&self) -> Result<BTreeMap<OsString, OsString>> {
        self.resolve_from(std::env::vars_os())
    }

    /// Merged name/value pairs extending `parent`, sorted by name
    pub fn resolve_from<I>(&self, parent: I) -> Result<BTreeMap<OsString, OsString>>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        self.validate()?;

        let mut merged: BTreeMap<OsString, OsString> = parent.into_iter().collect();
        for (key, value) in &self.overrides {
            merged.insert(OsString::from(key), OsString::from(value));
        }
        Ok(merged)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            overrides: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Validate and serialize an argument vector; the first element is the
/// executable.
pub fn serialize_argv<S: AsRef<str>>(argv: &[S]) -> Result<Vec<CString>> {
    if argv.is_empty() {
        return Err(ProcessError::invalid("argument vector is empty"));
    }

    let mut out = Vec::new();
    out.try_reserve_exact(argv.len())
        .map_err(|_| ProcessError::OutOfMemory)?;
    for (i, arg) in argv.iter().enumerate() {
        let arg = CString::new(arg.as_ref())
            .map_err(|_| ProcessError::invalid(format!("argument {i} contains NUL")))?;
        out.push(arg);
    }
    if out[0].as_bytes().is_empty() {
        return Err(ProcessError::invalid("executable name is empty"));
    }
    Ok(out)
}
