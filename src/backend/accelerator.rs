//! Accelerator provider adapting a kernels library's exported entry points

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::array::{Backend, ElementType};
use crate::error::{KernelError, KernelResult};
use super::library::{EntryPoint, LibraryCache};
use super::registry::BackendDescriptor;
use super::{BackendStats, KernelBackend, StatsCounter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Alloc,
    Dealloc,
}

impl SymbolKind {
    pub const fn suffix(&self) -> &'static str {
        match self {
            SymbolKind::Alloc => "alloc",
            SymbolKind::Dealloc => "dealloc",
        }
    }
}

/// Exported symbol name for one element type and operation, e.g. `awkward_cuda_ptriU8_dealloc`
pub fn symbol_name(prefix: &str, dtype: ElementType, kind: SymbolKind) -> String {
    format!("{}{}_{}", prefix, dtype.code(), kind.suffix())
}

/// Provider for a dynamically loaded accelerator backend
pub struct AcceleratorBackend {
    descriptor: BackendDescriptor,
    prefix: String,
    libraries: Arc<LibraryCache>,
    stats: StatsCounter,
}

impl AcceleratorBackend {
    pub fn new(descriptor: BackendDescriptor, libraries: Arc<LibraryCache>) -> KernelResult<Self> {
        let prefix = descriptor
            .symbol_prefix()
            .ok_or_else(|| {
                KernelError::configuration_error(format!(
                    "{} backend is not reached through a kernels library",
                    descriptor.backend
                ))
            })?
            .to_string();

        Ok(Self {
            descriptor,
            prefix,
            libraries,
            stats: StatsCounter::default(),
        })
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn symbol_name(&self, dtype: ElementType, kind: SymbolKind) -> String {
        symbol_name(&self.prefix, dtype, kind)
    }

    /// Resolve an entry point and run `call` while the library handle is held
    fn with_entry_point<R>(
        &self,
        dtype: ElementType,
        kind: SymbolKind,
        call: impl FnOnce(&EntryPoint) -> R,
    ) -> KernelResult<R> {
        let handle = self.libraries.get_or_load(&self.descriptor)?;
        let entry = handle.resolve_symbol(&self.symbol_name(dtype, kind))?;
        Ok(call(&entry))
    }
}

impl KernelBackend for AcceleratorBackend {
    fn backend(&self) -> Backend {
        self.descriptor.backend
    }

    /// Load the library and resolve both entry points for `dtype` without calling them
    fn prepare(&self, dtype: ElementType) -> KernelResult<()> {
        let handle = self.libraries.get_or_load(&self.descriptor)?;
        handle.resolve_symbol(&self.symbol_name(dtype, SymbolKind::Alloc))?;
        handle.resolve_symbol(&self.symbol_name(dtype, SymbolKind::Dealloc))?;
        Ok(())
    }

    fn allocate(&self, dtype: ElementType, length: usize) -> KernelResult<NonNull<u8>> {
        let count = i64::try_from(length).map_err(|_| {
            KernelError::invalid_length(length, dtype.name(), "accelerator", "length exceeds the signed 64-bit ABI")
        })?;

        let raw = self.with_entry_point(dtype, SymbolKind::Alloc, |entry| unsafe {
            let alloc = entry.as_alloc();
            alloc(count)
        })?;

        let ptr = NonNull::new(raw as *mut u8).ok_or_else(|| {
            KernelError::allocation_error(count, dtype.name(), "accelerator", "backend allocation routine returned null")
        })?;

        let bytes = length.saturating_mul(dtype.size());
        self.stats.record_allocation(bytes);
        tracing::debug!(dtype = %dtype, length, ptr = ?ptr, "accelerator allocation");
        Ok(ptr)
    }

    unsafe fn deallocate(&self, dtype: ElementType, ptr: NonNull<u8>, length: usize) -> KernelResult<()> {
        let released = self.with_entry_point(dtype, SymbolKind::Dealloc, |entry| unsafe {
            let dealloc = entry.as_dealloc();
            dealloc(ptr.as_ptr() as *mut c_void)
        });

        match released {
            Ok(()) => {
                self.stats.record_release(length.saturating_mul(dtype.size()));
                tracing::debug!(dtype = %dtype, length, ptr = ?ptr, "accelerator release");
                Ok(())
            }
            Err(e) => {
                self.stats.record_failed_release();
                Err(e)
            }
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for AcceleratorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratorBackend")
            .field("descriptor", &self.descriptor)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
