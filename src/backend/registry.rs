//! Backend registry: maps a [`Backend`] to how it is reached

use std::path::{Path, PathBuf};

use crate::array::Backend;
use crate::config::{self, AcceleratorConfig};
use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMode {
    /// Callable in-process without any support library
    Direct,
    /// Requires the kernels library at `path`, whose symbols start with `symbol_prefix`
    DynamicLibrary { path: PathBuf, symbol_prefix: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub backend: Backend,
    pub mode: BackendMode,
}

impl BackendDescriptor {
    pub fn is_direct(&self) -> bool {
        matches!(self.mode, BackendMode::Direct)
    }

    pub fn library_path(&self) -> Option<&Path> {
        match &self.mode {
            BackendMode::DynamicLibrary { path, .. } => Some(path),
            BackendMode::Direct => None,
        }
    }

    pub fn symbol_prefix(&self) -> Option<&str> {
        match &self.mode {
            BackendMode::DynamicLibrary { symbol_prefix, .. } => Some(symbol_prefix),
            BackendMode::Direct => None,
        }
    }
}

/// Resolves backends against configuration captured at construction
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    accelerator_library: Option<PathBuf>,
    library_env: String,
    symbol_prefix: String,
}

impl BackendRegistry {
    /// Build a registry, resolving the accelerator library location once
    pub fn new(config: &AcceleratorConfig) -> Self {
        Self {
            accelerator_library: config.resolved_library_path(),
            library_env: config.library_env.clone(),
            symbol_prefix: config.symbol_prefix.clone(),
        }
    }

    pub fn from_global_config() -> Self {
        Self::new(&config::get_config().accelerator)
    }

    pub fn resolve(&self, backend: Backend) -> KernelResult<BackendDescriptor> {
        let mode = match backend {
            Backend::Host => BackendMode::Direct,
            Backend::Accelerator => {
                let path = self.accelerator_library.clone().ok_or_else(|| {
                    KernelError::configuration_error(format!(
                        "accelerator backend has no library location: set accelerator.library_path or {}",
                        self.library_env
                    ))
                })?;
                if self.symbol_prefix.is_empty() {
                    return Err(KernelError::configuration_error("accelerator symbol prefix is empty"));
                }
                BackendMode::DynamicLibrary {
                    path,
                    symbol_prefix: self.symbol_prefix.clone(),
                }
            }
        };

        Ok(BackendDescriptor { backend, mode })
    }

    /// Resolve a backend given by identifier, e.g. `"cpu"` or `"cuda"`
    pub fn resolve_name(&self, identifier: &str) -> KernelResult<BackendDescriptor> {
        self.resolve(identifier.parse()?)
    }
}
