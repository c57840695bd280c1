//! Direct host-memory provider

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::array::{Backend, ElementType};
use crate::error::{KernelError, KernelResult};
use super::{dangling_for, BackendStats, KernelBackend, StatsCounter};

/// Allocates zeroed, naturally aligned element blocks from the global allocator
#[derive(Debug, Default)]
pub struct HostBackend {
    stats: StatsCounter,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout(dtype: ElementType, length: usize) -> KernelResult<Layout> {
        let size = length.checked_mul(dtype.size()).ok_or_else(|| {
            KernelError::invalid_length(length, dtype.name(), "host", "size overflows usize")
        })?;
        Layout::from_size_align(size, dtype.align())
            .map_err(|e| KernelError::invalid_length(length, dtype.name(), "host", &format!("invalid layout: {}", e)))
    }
}

impl KernelBackend for HostBackend {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn allocate(&self, dtype: ElementType, length: usize) -> KernelResult<NonNull<u8>> {
        let layout = Self::layout(dtype, length)?;
        if layout.size() == 0 {
            self.stats.record_allocation(0);
            return Ok(dangling_for(dtype));
        }

        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            KernelError::allocation_error(length, dtype.name(), "host", "global allocator returned null")
        })?;

        self.stats.record_allocation(layout.size());
        tracing::debug!(dtype = %dtype, length, bytes = layout.size(), "host allocation");
        Ok(ptr)
    }

    unsafe fn deallocate(&self, dtype: ElementType, ptr: NonNull<u8>, length: usize) -> KernelResult<()> {
        let layout = Self::layout(dtype, length)?;
        if layout.size() != 0 {
            dealloc(ptr.as_ptr(), layout);
        }

        self.stats.record_release(layout.size());
        tracing::debug!(dtype = %dtype, length, "host release");
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.stats.snapshot()
    }
}
