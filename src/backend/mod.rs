//! Memory providers for each backend
//!
//! Every backend is reached through [`KernelBackend`]: the host provider allocates
//! directly, the accelerator provider adapts the entry points exported by a
//! dynamically loaded kernels library. All dynamic-loading concerns stay inside
//! [`library`] and [`accelerator`].

pub mod registry;
pub mod library;
pub mod host;
pub mod accelerator;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::array::{Backend, ElementType};
use crate::error::KernelResult;

pub use registry::{BackendDescriptor, BackendMode, BackendRegistry};
pub use library::{global_libraries, DylibLoader, EntryPoint, LibraryCache, LibraryHandle, LibraryLoader, SymbolSource};
pub use host::HostBackend;
pub use accelerator::{symbol_name, AcceleratorBackend, SymbolKind};

/// Capability provider that obtains and releases raw element blocks on one backend
pub trait KernelBackend: Send + Sync + Debug {
    fn backend(&self) -> Backend;

    /// Allocate `length` elements of `dtype`.
    ///
    /// The returned pointer is never null and is aligned for `dtype`.
    fn allocate(&self, dtype: ElementType, length: usize) -> KernelResult<NonNull<u8>>;

    /// Make sure blocks of `dtype` could be obtained and released, without allocating.
    ///
    /// Used for zero-length requests so they report the same configuration, load and
    /// symbol failures as any other request.
    fn prepare(&self, _dtype: ElementType) -> KernelResult<()> {
        Ok(())
    }

    /// Release a block.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this provider with the same `dtype` and
    /// `length`, and must not have been released already.
    unsafe fn deallocate(&self, dtype: ElementType, ptr: NonNull<u8>, length: usize) -> KernelResult<()>;

    fn stats(&self) -> BackendStats;
}

/// Snapshot of a provider's allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: usize,
    pub releases: usize,
    pub failed_releases: usize,
    pub live_bytes: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    allocations: AtomicUsize,
    releases: AtomicUsize,
    failed_releases: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl StatsCounter {
    pub(crate) fn record_allocation(&self, bytes: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self, bytes: usize) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    // live_bytes stays charged: the device memory was not given back
    pub(crate) fn record_failed_release(&self) {
        self.failed_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BackendStats {
        BackendStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            failed_releases: self.failed_releases.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Non-null, well-aligned placeholder for blocks that own no memory
pub(crate) fn dangling_for(dtype: ElementType) -> NonNull<u8> {
    NonNull::new(dtype.align() as *mut u8).unwrap_or(NonNull::dangling())
}
