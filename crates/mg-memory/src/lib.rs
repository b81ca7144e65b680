//! Magnum memory -- a defragmenting heap for long-lived engine data.
//!
//! [`DefragmentingAllocator`] serves allocations from a single fixed buffer
//! and can compact them on demand, which keeps resource payloads from
//! fragmenting memory as assets are loaded and unloaded. Allocations are
//! addressed through handles rather than pointers, so compaction never
//! invalidates them.
//!
//! # Quick Start
//!
//! ```
//! use mg_memory::prelude::*;
//!
//! let mut heap = DefragmentingAllocator::new(1024);
//! let a = heap.alloc_copy(b"first").unwrap();
//! let b = heap.alloc_copy(b"second").unwrap();
//! heap.free(a);
//! heap.defragment();
//! assert_eq!(heap.get_slice(&b), b"second");
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod allocator;
pub mod shared_heap;

pub use allocator::{DaBox, DaRef, DefragmentingAllocator, MAX_ALIGN};
pub use shared_heap::{HeapBox, SharedHeap};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by heap allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The tail of the buffer cannot hold the request.
    #[error(
        "allocation of {requested} bytes does not fit ({tail_space} bytes at tail, {free_space} bytes free in total)"
    )]
    OutOfSpace {
        requested: usize,
        free_space: usize,
        tail_space: usize,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::allocator::{DaBox, DaRef, DefragmentingAllocator};
    pub use crate::shared_heap::{HeapBox, SharedHeap};
    pub use crate::AllocError;
}
