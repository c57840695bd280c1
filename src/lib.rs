//! kernelmem - cross-backend ownership for typed numeric buffers
//!
//! Features:
//! - Element blocks of `int8, uint8, int32, uint32, int64, float32, float64, bool`
//! - Host allocation and accelerator allocation through a lazily loaded kernels library
//! - Shared ownership with exactly-once release through the allocating backend
//! - JSON configuration with environment fallback for the library location
//!
//! ```no_run
//! use kernelmem::{allocate, Backend};
//!
//! let buffer = allocate::<f32>(1024, Backend::Host)?;
//! assert_eq!(buffer.length(), 1024);
//! # Ok::<(), kernelmem::KernelError>(())
//! ```

pub mod array;
pub mod backend;
pub mod config;
pub mod error;
pub mod memory;

use std::str::FromStr;

use lazy_static::lazy_static;

pub use array::{AnyBuffer, Backend, Element, ElementType, OwnedBuffer, TypedAllocator};
pub use backend::{BackendDescriptor, BackendMode, BackendRegistry, BackendStats, KernelBackend, LibraryCache};
pub use config::{ConfigBuilder, KernelConfig};
pub use error::{AllocationFailure, ErrorCode, KernelError, KernelResult};
pub use memory::{DeletionStrategy, ReleaseOutcome};

/// Install a `tracing` subscriber using the global logging configuration.
///
/// Calling it again, or after another subscriber was installed, is a no-op.
pub fn init() -> KernelResult<()> {
    let logging = config::get_config().logging;
    let level = tracing::Level::from_str(&logging.level)
        .map_err(|_| KernelError::InvalidInput(format!("unknown log level '{}'", logging.level)))?;

    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(logging.ansi)
        .try_init()
        .is_ok()
    {
        tracing::info!("kernelmem {} initialized", version());
    }
    Ok(())
}

/// Get the current crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

lazy_static! {
    static ref DEFAULT_ALLOCATOR: TypedAllocator = TypedAllocator::from_config(&config::get_config());
}

/// Process-wide allocator, configured from the global configuration on first use
pub fn default_allocator() -> &'static TypedAllocator {
    &DEFAULT_ALLOCATOR
}

/// Allocate `length` elements of `T` on `backend` with the process-wide allocator
pub fn allocate<T: Element>(length: i64, backend: Backend) -> KernelResult<OwnedBuffer<T>> {
    default_allocator().allocate(length, backend)
}
