//! Backends that own buffer memory

use std::fmt::{self, Display};
use std::str::FromStr;
use serde::{Serialize, Deserialize};

use crate::error::{KernelError, KernelResult};

/// Execution/memory domain a buffer lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Host CPU memory, allocated directly
    Host,
    /// Accelerator device memory, allocated through a dynamically loaded kernels library
    Accelerator,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Host, Backend::Accelerator];

    pub const fn is_host(&self) -> bool {
        matches!(self, Backend::Host)
    }

    /// Whether elements can be dereferenced from host code
    pub const fn is_host_accessible(&self) -> bool {
        self.is_host()
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Backend::Host => "host",
            Backend::Accelerator => "accelerator",
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = KernelError;

    fn from_str(s: &str) -> KernelResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Backend::Host),
            "accelerator" | "cuda" | "gpu" => Ok(Backend::Accelerator),
            _ => Err(KernelError::configuration_error(format!(
                "unknown backend identifier '{}'",
                s
            ))),
        }
    }
}
