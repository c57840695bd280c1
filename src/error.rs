use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

/// Why an allocation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationFailure {
    /// Negative length, or a size that cannot be represented; retrying cannot help
    InvalidLength,
    /// The backend had no memory to give (null return)
    Exhausted,
}

/// Main error type for kernelmem
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Unknown backend identifier, or an accelerator without a library location
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Accelerator support library is configured but could not be opened
    #[error("Load error: failed to open '{}': {reason}", path.display())]
    LoadError {
        path: PathBuf,
        reason: String,
    },

    /// Expected entry point is absent from a loaded library
    #[error("Symbol resolution error: '{symbol}': {reason}")]
    SymbolResolutionError {
        symbol: String,
        reason: String,
    },

    /// Invalid length, size overflow, or a backend allocation that returned null
    #[error("Allocation error: {message}")]
    AllocationError {
        message: String,
        kind: AllocationFailure,
    },

    /// Malformed input such as an unparsable configuration file
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl KernelError {
    pub fn configuration_error(message: impl Into<String>) -> Self {
        KernelError::ConfigurationError(message.into())
    }

    pub fn load_error(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        KernelError::LoadError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn symbol_error(symbol: &str, reason: impl ToString) -> Self {
        KernelError::SymbolResolutionError {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an allocation error for a backend that returned no memory
    pub fn allocation_error(length: impl Display, dtype: &str, backend: &str, message: &str) -> Self {
        Self::allocation_failure(AllocationFailure::Exhausted, length, dtype, backend, message)
    }

    /// Create an allocation error for a length no backend can satisfy
    pub fn invalid_length(length: impl Display, dtype: &str, backend: &str, message: &str) -> Self {
        Self::allocation_failure(AllocationFailure::InvalidLength, length, dtype, backend, message)
    }

    fn allocation_failure(kind: AllocationFailure, length: impl Display, dtype: &str, backend: &str, message: &str) -> Self {
        KernelError::AllocationError {
            message: format!("cannot allocate {} x {} on {}: {}", length, dtype, backend, message),
            kind,
        }
    }
}

impl From<std::io::Error> for KernelError {
    fn from(err: std::io::Error) -> Self {
        KernelError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::InvalidInput(err.to_string())
    }
}

/// Result type for kernelmem operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalid,
    LibraryUnavailable,
    SymbolMissing,
    OutOfMemory,
    InvalidLength,
    InvalidInput,
    Io,
}

impl KernelError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            KernelError::ConfigurationError(_) => ErrorCode::ConfigInvalid,
            KernelError::LoadError { .. } => ErrorCode::LibraryUnavailable,
            KernelError::SymbolResolutionError { .. } => ErrorCode::SymbolMissing,
            KernelError::AllocationError { kind: AllocationFailure::Exhausted, .. } => ErrorCode::OutOfMemory,
            KernelError::AllocationError { kind: AllocationFailure::InvalidLength, .. } => ErrorCode::InvalidLength,
            KernelError::InvalidInput(_) => ErrorCode::InvalidInput,
            KernelError::IoError(_) => ErrorCode::Io,
        }
    }

    /// Whether retrying the same request can succeed without changing configuration.
    ///
    /// A failed library load leaves the cache empty, so the next request re-attempts it,
    /// and an exhausted backend may have memory later. Invalid lengths never succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.code(), ErrorCode::LibraryUnavailable | ErrorCode::OutOfMemory)
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            KernelError::ConfigurationError(msg) => {
                format!("Configuration Error: {}\n\nSet `accelerator.library_path` in the configuration or export the library environment variable (KERNELMEM_ACCELERATOR_LIBRARY by default).", msg)
            }
            KernelError::LoadError { path, reason } => {
                format!("Load Error: could not open {}: {}\n\nCheck that the accelerator support library exists and that its own dependencies (driver, runtime) are installed.", path.display(), reason)
            }
            KernelError::SymbolResolutionError { symbol, reason } => {
                format!("Symbol Error: {} ({})\n\nThe accelerator library was loaded but does not export this entry point. It was probably built for a different set of element types or symbol prefix.", symbol, reason)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let error = KernelError::load_error("/opt/lib/libkernels.so", "file not found");
        assert!(error.to_string().contains("/opt/lib/libkernels.so"));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_codes() {
        let config = KernelError::configuration_error("unknown backend 'tpu'");
        assert_eq!(config.code(), ErrorCode::ConfigInvalid);
        assert!(!config.is_recoverable());

        let load = KernelError::load_error("libmissing.so", "nope");
        assert_eq!(load.code(), ErrorCode::LibraryUnavailable);
        assert!(load.is_recoverable());

        let symbol = KernelError::symbol_error("awkward_cuda_ptrf_alloc", "undefined");
        assert_eq!(symbol.code(), ErrorCode::SymbolMissing);
        assert!(!symbol.is_recoverable());
    }

    #[test]
    fn test_allocation_error_message() {
        let error = KernelError::invalid_length(-3, "float32", "host", "negative length");
        assert_eq!(error.code(), ErrorCode::InvalidLength);
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("-3 x float32 on host"));

        let exhausted = KernelError::allocation_error(usize::MAX, "int8", "accelerator", "returned null");
        assert_eq!(exhausted.code(), ErrorCode::OutOfMemory);
        assert!(exhausted.is_recoverable());
        assert!(exhausted.to_string().contains(&format!("{} x int8", usize::MAX)));
    }

    #[test]
    fn test_user_message() {
        let error = KernelError::symbol_error("awkward_cuda_ptrd_dealloc", "undefined symbol");
        let message = error.user_message();
        assert!(message.contains("Symbol Error"));
        assert!(message.contains("awkward_cuda_ptrd_dealloc"));
    }
}
