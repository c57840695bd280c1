//! Release actions bound to owned buffers

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::array::{Backend, Element, ElementType};
use crate::backend::KernelBackend;

/// What happened when a strategy ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The backend routine released the block
    Freed,
    /// Zero-length block; no backend memory to give back
    Empty,
    /// The backend could not release the block; a diagnostic was logged
    Failed,
}

/// Releases blocks of `T` through the provider that allocated them.
///
/// A strategy is only ever created by the allocator together with the buffer it
/// releases, so its `(ElementType, Backend)` pair always matches the block.
pub struct DeletionStrategy<T: Element> {
    provider: Arc<dyn KernelBackend>,
    _element: PhantomData<fn() -> T>,
}

impl<T: Element> DeletionStrategy<T> {
    pub(crate) fn bind(provider: Arc<dyn KernelBackend>) -> Self {
        Self {
            provider,
            _element: PhantomData,
        }
    }

    pub fn backend(&self) -> Backend {
        self.provider.backend()
    }

    pub fn element_type(&self) -> ElementType {
        T::TYPE
    }

    /// Release a block. Never panics and never propagates failures.
    ///
    /// # Safety
    /// `ptr` and `length` must describe a live block allocated by this strategy's
    /// provider, and this must be the only release of it.
    pub(crate) unsafe fn release(&self, ptr: NonNull<T>, length: usize) -> ReleaseOutcome {
        if length == 0 {
            return ReleaseOutcome::Empty;
        }

        match self.provider.deallocate(T::TYPE, ptr.cast::<u8>(), length) {
            Ok(()) => ReleaseOutcome::Freed,
            Err(e) => {
                tracing::error!(
                    backend = %self.backend(),
                    dtype = %T::TYPE,
                    length,
                    ptr = ?ptr,
                    error = %e,
                    "failed to release buffer; backend memory is leaked"
                );
                ReleaseOutcome::Failed
            }
        }
    }
}

impl<T: Element> fmt::Debug for DeletionStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionStrategy")
            .field("backend", &self.backend())
            .field("element_type", &T::TYPE)
            .finish()
    }
}
