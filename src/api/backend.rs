//! Purpose: Define the backend contract and the registry that names backends.
//! Exports: `Backend`, `BackendKind`, `BackendConfig`, `BackendRegistry`.
//! Role: The composition root builds one registry and hands it to the server.
//! Invariants: Backend names are unique within a registry.
//! Invariants: There is no process-wide registration; lookups go through a registry value.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::memory::MemoryBackend;
use crate::api::request::{CreateRequest, DeleteRequest, ReadRequest, WriteReceipt, WriteRequest};
use crate::core::error::{Error, ErrorKind};
use crate::core::iter::FrameIterator;

pub type BoxFrameIterator = Box<dyn FrameIterator + Send>;

/// A storage adapter serving the four gateway operations.
pub trait Backend: Send + Sync {
    fn read(&self, request: &ReadRequest) -> Result<BoxFrameIterator, Error>;

    /// Consumes `frames` to its end. A failed iterator aborts the write with its error.
    fn write(
        &self,
        request: &WriteRequest,
        frames: &mut dyn FrameIterator,
    ) -> Result<WriteReceipt, Error>;

    fn create(&self, request: &CreateRequest) -> Result<(), Error>;

    fn delete(&self, request: &DeleteRequest) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendKind {
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "memory" => Ok(BackendKind::Memory),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown backend type {kind:?}"))
                .with_hint("Supported backend types: memory.")),
        }
    }
}

/// One `NAME=TYPE` backend declaration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,
}

impl FromStr for BackendConfig {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let Some((name, kind)) = spec.split_once('=') else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid backend spec {spec:?}"))
                .with_hint("Use NAME=TYPE, for example mem=memory."));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("backend spec {spec:?} has an empty name")));
        }
        Ok(Self {
            name: name.to_string(),
            kind: kind.trim().parse()?,
        })
    }
}

impl fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.kind.as_str())
    }
}

#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every configured backend; `row_limit` is the default page size.
    pub fn from_configs(configs: &[BackendConfig], row_limit: usize) -> Result<Self, Error> {
        let mut registry = Self::new();
        for config in configs {
            let backend: Arc<dyn Backend> = match config.kind {
                BackendKind::Memory => Arc::new(MemoryBackend::new(row_limit)),
            };
            registry.register(&config.name, backend)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, backend: Arc<dyn Backend>) -> Result<(), Error> {
        if self.backends.contains_key(name) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("duplicate backend name {name:?}")));
        }
        tracing::debug!(backend = name, "registered backend");
        self.backends.insert(name.to_string(), backend);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, Error> {
        self.backends.get(name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("unknown backend {name:?}"))
                .with_hint(format!("Configured backends: {}.", self.names().join(", ")))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
