//! Thread-shared [`DefragmentingAllocator`] with self-freeing handles.

use std::fmt;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::allocator::{DaBox, DefragmentingAllocator};
use crate::AllocError;

/// A [`DefragmentingAllocator`] behind an `Arc<Mutex<_>>`.
///
/// Cloning a `SharedHeap` is cheap and yields another handle to the same
/// allocator. Allocations made through it return [`HeapBox`]es that free
/// themselves on drop.
#[derive(Clone)]
pub struct SharedHeap {
    inner: Arc<Mutex<DefragmentingAllocator>>,
}

impl SharedHeap {
    /// Create a heap backed by `size_in_bytes` bytes.
    pub fn new(size_in_bytes: usize) -> Self {
        tracing::debug!(bytes = size_in_bytes, "creating shared heap");
        Self {
            inner: Arc::new(Mutex::new(DefragmentingAllocator::new(size_in_bytes))),
        }
    }

    /// Lock the underlying allocator.
    pub fn lock(&self) -> MutexGuard<'_, DefragmentingAllocator> {
        self.inner.lock()
    }

    /// Allocate a single value, compacting first if the tail is too small.
    pub fn alloc<T: Send + Sync + 'static>(&self, value: T) -> Result<HeapBox<T>, AllocError> {
        let mut heap = self.inner.lock();
        if !heap.has_space_for::<T>(1) {
            heap.defragment();
        }
        let handle = heap.alloc(value)?;
        Ok(HeapBox::new(self.clone(), handle))
    }

    /// Allocate a copy of `src`, compacting first if the tail is too small.
    pub fn alloc_copy<T: Clone + Send + Sync + 'static>(
        &self,
        src: &[T],
    ) -> Result<HeapBox<[T]>, AllocError> {
        let mut heap = self.inner.lock();
        if !heap.has_space_for::<T>(src.len()) {
            heap.defragment();
        }
        let handle = heap.alloc_copy(src)?;
        Ok(HeapBox::new(self.clone(), handle))
    }

    /// Compact the heap.
    pub fn defragment(&self) {
        self.inner.lock().defragment();
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.lock().buffer_size()
    }

    pub fn num_used_bytes(&self) -> usize {
        self.inner.lock().num_used_bytes()
    }

    pub fn free_space(&self) -> usize {
        self.inner.lock().free_space()
    }

    /// Whether two handles share the same allocator.
    pub fn ptr_eq(&self, other: &SharedHeap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(heap) => f.debug_tuple("SharedHeap").field(&*heap).finish(),
            None => f.write_str("SharedHeap(<locked>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// HeapBox
// ---------------------------------------------------------------------------

/// Owning handle into a [`SharedHeap`]. Freed when dropped.
///
/// Access locks the whole heap for the lifetime of the returned guard, so
/// keep guards short-lived.
pub struct HeapBox<T: ?Sized> {
    heap: SharedHeap,
    handle: Option<DaBox<T>>,
}

impl<T: ?Sized> HeapBox<T> {
    fn new(heap: SharedHeap, handle: DaBox<T>) -> Self {
        Self {
            heap,
            handle: Some(handle),
        }
    }

    fn handle(&self) -> &DaBox<T> {
        self.handle.as_ref().expect("HeapBox handle taken before drop")
    }

    /// The heap this box lives in.
    pub fn heap(&self) -> &SharedHeap {
        &self.heap
    }
}

impl<T> HeapBox<T> {
    /// Lock the heap and borrow the value.
    pub fn lock(&self) -> MappedMutexGuard<'_, T> {
        let handle = self.handle();
        MutexGuard::map(self.heap.inner.lock(), |heap| heap.get_mut(handle))
    }
}

impl<T> HeapBox<[T]> {
    /// Lock the heap and borrow the slice.
    pub fn lock_slice(&self) -> MappedMutexGuard<'_, [T]> {
        let handle = self.handle();
        MutexGuard::map(self.heap.inner.lock(), |heap| heap.get_slice_mut(handle))
    }

    pub fn len(&self) -> usize {
        self.heap.inner.lock().len_of(self.handle())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Drop for HeapBox<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.heap.inner.lock().free(handle);
        }
    }
}

impl<T: ?Sized> fmt::Debug for HeapBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HeapBox").field(&self.handle).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_free_on_drop() {
        let heap = SharedHeap::new(128);
        {
            let a = heap.alloc_copy(b"hello").unwrap();
            assert_eq!(&*a.lock_slice(), b"hello");
            assert_eq!(heap.num_used_bytes(), 16);
        }
        assert_eq!(heap.num_used_bytes(), 0);
    }

    #[test]
    fn alloc_defragments_when_tail_is_full() {
        let heap = SharedHeap::new(64);
        let a = heap.alloc([1u8; 16]).unwrap();
        let b = heap.alloc([2u8; 16]).unwrap();
        let c = heap.alloc([3u8; 16]).unwrap();
        let d = heap.alloc([4u8; 16]).unwrap();
        drop(b);
        assert_eq!(heap.free_space(), 16);

        let e = heap.alloc([5u8; 16]).unwrap();
        assert_eq!(*a.lock(), [1u8; 16]);
        assert_eq!(*c.lock(), [3u8; 16]);
        assert_eq!(*d.lock(), [4u8; 16]);
        assert_eq!(*e.lock(), [5u8; 16]);
        assert_eq!(heap.free_space(), 0);
    }

    #[test]
    fn alloc_fails_when_heap_is_full() {
        let heap = SharedHeap::new(32);
        let _a = heap.alloc_copy(&[0u8; 32]).unwrap();
        assert!(heap.alloc(1u8).is_err());
    }

    #[test]
    fn clones_share_the_allocator() {
        let heap = SharedHeap::new(32);
        let other = heap.clone();
        assert!(heap.ptr_eq(&other));
        let _a = other.alloc(1u32).unwrap();
        assert_eq!(heap.num_used_bytes(), 16);
    }
}
