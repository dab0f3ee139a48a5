use std::fmt;

use crate::error::{CallError, Result};

/// A request path of the form `/<fully-qualified-service>/<method>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    path: String,
    split: usize,
}

impl MethodPath {
    /// Build a path from its two components.
    pub fn new(service: &str, method: &str) -> Result<Self> {
        Self::parse(&format!("/{service}/{method}"))
    }

    /// Parse a `:path` value.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || CallError::Protocol(format!("malformed method path '{path}'"));

        let rest = path.strip_prefix('/').ok_or_else(invalid)?;
        let (service, method) = rest.split_once('/').ok_or_else(invalid)?;
        if service.is_empty() || method.is_empty() || method.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            path: path.to_string(),
            split: 1 + service.len(),
        })
    }

    /// Fully-qualified service name, e.g. `helloworld.Greeter`.
    pub fn service(&self) -> &str {
        &self.path[1..self.split]
    }

    pub fn method(&self) -> &str {
        &self.path[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
