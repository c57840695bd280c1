//! Typed, backend-tagged element buffers
//!
//! - [`ElementType`] and the sealed [`Element`] trait name the eight supported kinds
//! - [`Backend`] tags which memory domain owns a block
//! - [`TypedAllocator`] obtains blocks and binds their release action
//! - [`OwnedBuffer`] shares a block and releases it when the last owner drops

pub mod dtype;
pub mod devices;
pub mod storage;
pub mod allocator;

pub use dtype::{Element, ElementType};
pub use devices::Backend;
pub use storage::{AnyBuffer, OwnedBuffer};
pub use allocator::TypedAllocator;
