//! Shared-ownership buffers with a bound release action

use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::memory::{DeletionStrategy, ReleaseOutcome};
use super::devices::Backend;
use super::dtype::{Element, ElementType};

struct SharedBlock<T: Element> {
    ptr: NonNull<T>,
    length: usize,
    deleter: DeletionStrategy<T>,
}

impl<T: Element> Drop for SharedBlock<T> {
    fn drop(&mut self) {
        // Runs once: Arc drops the block only when the last owner goes away.
        let outcome = unsafe { self.deleter.release(self.ptr, self.length) };
        if outcome != ReleaseOutcome::Failed {
            tracing::trace!(backend = %self.deleter.backend(), dtype = %T::TYPE, length = self.length, "buffer released");
        }
    }
}

// The block is plain element memory; `T: Element` is Send + Sync.
unsafe impl<T: Element> Send for SharedBlock<T> {}
unsafe impl<T: Element> Sync for SharedBlock<T> {}

/// Contiguous block of `length` elements on one backend, under shared ownership.
///
/// Cloning adds an owner. When the last owner is dropped, the deletion strategy
/// bound at allocation releases the memory exactly once, on that thread.
pub struct OwnedBuffer<T: Element> {
    shared: Arc<SharedBlock<T>>,
}

impl<T: Element> OwnedBuffer<T> {
    pub(crate) fn bind(ptr: NonNull<T>, length: usize, deleter: DeletionStrategy<T>) -> Self {
        Self {
            shared: Arc::new(SharedBlock { ptr, length, deleter }),
        }
    }

    pub fn length(&self) -> usize {
        self.shared.length
    }

    pub fn is_empty(&self) -> bool {
        self.shared.length == 0
    }

    pub fn backend(&self) -> Backend {
        self.shared.deleter.backend()
    }

    pub fn element_type(&self) -> ElementType {
        T::TYPE
    }

    /// Number of live owners of this block
    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    pub fn deleter(&self) -> &DeletionStrategy<T> {
        &self.shared.deleter
    }

    pub fn as_ptr(&self) -> *const T {
        self.shared.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut T {
        self.shared.ptr.as_ptr()
    }

    /// Whether two handles own the same block
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Read element `index` without bounds checking.
    ///
    /// # Safety
    /// `index < self.length()`, the buffer must be host-accessible, and no other
    /// thread may be writing the element.
    pub unsafe fn get_unchecked(&self, index: usize) -> T {
        self.shared.ptr.as_ptr().add(index).read()
    }

    /// Write element `index` without bounds checking.
    ///
    /// # Safety
    /// Same as [`get_unchecked`](Self::get_unchecked), and no other reference to
    /// the element may be live.
    pub unsafe fn write_unchecked(&self, index: usize, value: T) {
        self.shared.ptr.as_ptr().add(index).write(value)
    }

    /// Host view of the elements; `None` for device memory
    ///
    /// # Safety
    /// No owner may write the block while the slice is alive.
    pub unsafe fn host_slice(&self) -> Option<&[T]> {
        if !self.backend().is_host_accessible() {
            return None;
        }
        Some(std::slice::from_raw_parts(self.shared.ptr.as_ptr(), self.shared.length))
    }
}

impl<T: Element> Clone for OwnedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Element> fmt::Debug for OwnedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedBuffer")
            .field("element_type", &T::TYPE)
            .field("backend", &self.backend())
            .field("length", &self.length())
            .field("owners", &self.owners())
            .field("ptr", &self.shared.ptr)
            .finish()
    }
}

/// An [`OwnedBuffer`] whose element type is chosen at runtime
#[derive(Debug, Clone)]
pub enum AnyBuffer {
    Int8(OwnedBuffer<i8>),
    UInt8(OwnedBuffer<u8>),
    Int32(OwnedBuffer<i32>),
    UInt32(OwnedBuffer<u32>),
    Int64(OwnedBuffer<i64>),
    Float32(OwnedBuffer<f32>),
    Float64(OwnedBuffer<f64>),
    Bool(OwnedBuffer<bool>),
}

macro_rules! with_buffer {
    ($any:expr, $buf:ident => $body:expr) => {
        match $any {
            AnyBuffer::Int8($buf) => $body,
            AnyBuffer::UInt8($buf) => $body,
            AnyBuffer::Int32($buf) => $body,
            AnyBuffer::UInt32($buf) => $body,
            AnyBuffer::Int64($buf) => $body,
            AnyBuffer::Float32($buf) => $body,
            AnyBuffer::Float64($buf) => $body,
            AnyBuffer::Bool($buf) => $body,
        }
    };
}

impl AnyBuffer {
    pub fn length(&self) -> usize {
        with_buffer!(self, b => b.length())
    }

    pub fn backend(&self) -> Backend {
        with_buffer!(self, b => b.backend())
    }

    pub fn element_type(&self) -> ElementType {
        with_buffer!(self, b => b.element_type())
    }

    pub fn owners(&self) -> usize {
        with_buffer!(self, b => b.owners())
    }

    pub fn as_raw_ptr(&self) -> *const u8 {
        with_buffer!(self, b => b.as_ptr() as *const u8)
    }

    /// Typed view if the element type is `T`
    pub fn as_typed<T: Element>(&self) -> Option<&OwnedBuffer<T>> {
        with_buffer!(self, b => (b as &dyn Any).downcast_ref::<OwnedBuffer<T>>())
    }
}
