//! Bump allocator whose allocations can be compacted on demand.
//!
//! A [`DefragmentingAllocator`] owns one pre-allocated byte buffer and serves
//! requests from its tail (`data_head`). Freeing the most recent allocation
//! retracts the tail immediately; freeing anything else leaves a hole that is
//! only reclaimed by [`DefragmentingAllocator::defragment`], which slides every
//! live allocation toward the start of the buffer.
//!
//! Because payloads move, callers never hold raw addresses. Allocations are
//! addressed through [`DaBox`] (owning) and [`DaRef`] (non-owning) handles,
//! and every dereference re-resolves the payload location through the
//! allocator's metadata table.
//!
//! # Safety
//!
//! The buffer is raw memory and payloads are written and dropped through
//! type-erased function pointers recorded at allocation time (see
//! [`Mover`]). The invariants that make this sound:
//!
//! - every handle carries the id of the allocator that issued it and the
//!   generation of its metadata slot, so a handle can only ever resolve to the
//!   allocation (and therefore the type) it was created for;
//! - all allocation sizes are rounded up to [`MAX_ALIGN`] and the buffer is
//!   aligned to [`MAX_ALIGN`], so every allocation start stays aligned across
//!   compaction;
//! - Rust values are always bitwise-movable, so relocation is a `memmove` of
//!   the allocation's bytes. Overlapping source and destination ranges are
//!   handled by `ptr::copy`.

use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::AllocError;

/// Alignment of the backing buffer and granularity of every allocation.
pub const MAX_ALIGN: usize = 16;

/// Metadata slots reserved up front.
const INITIAL_ALLOC_INFO_CAPACITY: usize = 50;

static NEXT_ALLOCATOR_ID: AtomicU32 = AtomicU32::new(1);

#[repr(align(16))]
struct MaxAligned;

// ---------------------------------------------------------------------------
// Mover -- type-erased destruction for relocatable payloads
// ---------------------------------------------------------------------------

/// Type-erased operations recorded for each allocation.
///
/// Moving needs no type knowledge in Rust (a move is a byte copy), so the
/// only per-type operation is dropping `num_elems` values in place.
#[derive(Clone, Copy)]
struct Mover {
    drop_fn: unsafe fn(*mut u8, usize),
}

impl Mover {
    fn new<T>() -> Self {
        unsafe fn drop_fn_impl<T>(ptr: *mut u8, num_elems: usize) {
            let slice = ptr::slice_from_raw_parts_mut(ptr.cast::<T>(), num_elems);
            ptr::drop_in_place(slice);
        }

        Self {
            drop_fn: drop_fn_impl::<T>,
        }
    }
}

// ---------------------------------------------------------------------------
// AllocInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct AllocInfo {
    /// Byte offset of the first element within the buffer.
    offset: usize,
    /// Number of elements stored.
    num_elems: usize,
    /// Bytes occupied, including trailing padding up to `MAX_ALIGN`.
    raw_size: usize,
    /// Bumped every time the slot is released.
    generation: u32,
    /// `None` when the slot is free.
    mover: Option<Mover>,
}

impl AllocInfo {
    const fn vacant() -> Self {
        Self {
            offset: 0,
            num_elems: 0,
            raw_size: 0,
            generation: 0,
            mover: None,
        }
    }

    fn is_live(&self) -> bool {
        self.mover.is_some()
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Owning handle to a value or slice stored in a [`DefragmentingAllocator`].
///
/// The handle holds no address; it is resolved through the allocator on each
/// access. Release it with [`DefragmentingAllocator::free`]; a handle that is
/// dropped without being freed keeps its storage until the allocator itself
/// is dropped.
#[must_use = "dropping a DaBox without freeing it keeps its storage reserved"]
pub struct DaBox<T: ?Sized> {
    allocator_id: u32,
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> Box<T>>,
}

/// Non-owning, copyable handle to an allocation.
///
/// Lookups through a `DaRef` whose allocation has been freed return `None`.
pub struct DaRef<T: ?Sized> {
    allocator_id: u32,
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> DaBox<T> {
    /// Create a non-owning reference to the same allocation.
    pub fn downgrade(&self) -> DaRef<T> {
        DaRef {
            allocator_id: self.allocator_id,
            index: self.index,
            generation: self.generation,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for DaBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DaBox(heap {}, slot {}v{})",
            self.allocator_id, self.index, self.generation
        )
    }
}

impl<T: ?Sized> Clone for DaRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for DaRef<T> {}

impl<T: ?Sized> PartialEq for DaRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.allocator_id == other.allocator_id
            && self.index == other.index
            && self.generation == other.generation
    }
}

impl<T: ?Sized> Eq for DaRef<T> {}

impl<T: ?Sized> fmt::Debug for DaRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DaRef(heap {}, slot {}v{})",
            self.allocator_id, self.index, self.generation
        )
    }
}

// ---------------------------------------------------------------------------
// DefragmentingAllocator
// ---------------------------------------------------------------------------

/// Bump allocator with relocatable allocations.
///
/// Not internally synchronized; wrap it in a lock (see
/// [`SharedHeap`](crate::SharedHeap)) to share between threads.
pub struct DefragmentingAllocator {
    id: u32,
    buffer: NonNull<u8>,
    buffer_size: usize,
    alloc_info: Vec<AllocInfo>,
    /// Offset at which the next allocation starts.
    data_head: usize,
    /// Sum of `raw_size` over live allocations.
    used_bytes: usize,
}

// Safety: the buffer is exclusively owned, and only `Send + Sync` payloads
// can be stored (enforced by the bounds on every `alloc*` method).
#[allow(unsafe_code)]
unsafe impl Send for DefragmentingAllocator {}
#[allow(unsafe_code)]
unsafe impl Sync for DefragmentingAllocator {}

impl fmt::Debug for DefragmentingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefragmentingAllocator")
            .field("buffer_size", &self.buffer_size)
            .field("used_bytes", &self.used_bytes)
            .field("data_head", &self.data_head)
            .field("allocations", &self.num_allocations())
            .finish()
    }
}

impl DefragmentingAllocator {
    /// Create an allocator backed by a buffer of `size_in_bytes` bytes.
    pub fn new(size_in_bytes: usize) -> Self {
        let buffer = if size_in_bytes == 0 {
            NonNull::<MaxAligned>::dangling().cast::<u8>()
        } else {
            let layout = Self::buffer_layout(size_in_bytes);
            #[allow(unsafe_code)]
            let ptr = unsafe { alloc::alloc(layout) };
            match NonNull::new(ptr) {
                Some(ptr) => ptr,
                None => alloc::handle_alloc_error(layout),
            }
        };

        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            buffer,
            buffer_size: size_in_bytes,
            alloc_info: Vec::with_capacity(INITIAL_ALLOC_INFO_CAPACITY),
            data_head: 0,
            used_bytes: 0,
        }
    }

    fn buffer_layout(size: usize) -> Layout {
        Layout::from_size_align(size, MAX_ALIGN).expect("allocator buffer size overflows Layout")
    }

    /// Size of the backing buffer in bytes.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Bytes occupied by live allocations (including alignment padding).
    #[inline]
    pub fn num_used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Free bytes in the buffer. This space may be fragmented; call
    /// [`defragment`](Self::defragment) before relying on it being contiguous.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.buffer_size - self.used_bytes
    }

    /// Bytes available at the tail without compaction.
    #[inline]
    pub fn tail_space(&self) -> usize {
        self.buffer_size - self.data_head
    }

    /// Number of live allocations.
    pub fn num_allocations(&self) -> usize {
        self.alloc_info.iter().filter(|ai| ai.is_live()).count()
    }

    /// Whether `num` values of `T` fit at the tail of the buffer right now.
    pub fn has_space_for<T>(&self, num: usize) -> bool {
        match Self::alloc_size(std::mem::size_of::<T>(), num) {
            Some(size) => size <= self.tail_space(),
            None => false,
        }
    }

    /// Round `elem_size * num` up so the allocation ends on a `MAX_ALIGN`
    /// boundary.
    fn alloc_size(elem_size: usize, num: usize) -> Option<usize> {
        let bytes = elem_size.checked_mul(num)?;
        let padded = bytes.checked_add(MAX_ALIGN - 1)?;
        Some(padded & !(MAX_ALIGN - 1))
    }

    fn assert_alignment<T>() {
        assert!(
            std::mem::align_of::<T>() <= MAX_ALIGN,
            "DefragmentingAllocator supports alignments up to {MAX_ALIGN}, {} requires {}",
            std::any::type_name::<T>(),
            std::mem::align_of::<T>()
        );
    }

    /// Reserve tail space and a metadata slot. Returns the slot index.
    fn alloc_impl<T>(&mut self, num: usize) -> Result<usize, AllocError> {
        Self::assert_alignment::<T>();

        let requested = Self::alloc_size(std::mem::size_of::<T>(), num).ok_or(
            AllocError::OutOfSpace {
                requested: usize::MAX,
                free_space: self.free_space(),
                tail_space: self.tail_space(),
            },
        )?;

        if requested > self.tail_space() {
            return Err(AllocError::OutOfSpace {
                requested,
                free_space: self.free_space(),
                tail_space: self.tail_space(),
            });
        }

        let index = match self.alloc_info.iter().position(|ai| !ai.is_live()) {
            Some(index) => index,
            None => {
                assert!(
                    self.alloc_info.len() < u32::MAX as usize,
                    "DefragmentingAllocator metadata table is full"
                );
                self.alloc_info.push(AllocInfo::vacant());
                self.alloc_info.len() - 1
            }
        };

        let info = &mut self.alloc_info[index];
        info.offset = self.data_head;
        info.num_elems = num;
        info.raw_size = requested;
        info.mover = Some(Mover::new::<T>());

        self.data_head += requested;
        self.used_bytes += requested;

        Ok(index)
    }

    fn make_box<T: ?Sized>(&self, index: usize) -> DaBox<T> {
        DaBox {
            allocator_id: self.id,
            index: index as u32,
            generation: self.alloc_info[index].generation,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn ptr_at(&self, offset: usize) -> *mut u8 {
        self.buffer.as_ptr().wrapping_add(offset)
    }

    /// Allocate a single value.
    pub fn alloc<T: Send + Sync + 'static>(&mut self, value: T) -> Result<DaBox<T>, AllocError> {
        let index = self.alloc_impl::<T>(1)?;
        let dst = self.ptr_at(self.alloc_info[index].offset).cast::<T>();
        // Safety: `alloc_impl` reserved `size_of::<T>()` aligned bytes at `dst`.
        #[allow(unsafe_code)]
        unsafe {
            ptr::write(dst, value);
        }
        Ok(self.make_box(index))
    }

    /// Allocate `num` default-initialised values.
    pub fn alloc_slice<T: Default + Send + Sync + 'static>(
        &mut self,
        num: usize,
    ) -> Result<DaBox<[T]>, AllocError> {
        let index = self.alloc_impl::<T>(num)?;
        let dst = self.ptr_at(self.alloc_info[index].offset).cast::<T>();
        for i in 0..num {
            // Safety: the reservation covers `num` elements of `T`.
            #[allow(unsafe_code)]
            unsafe {
                ptr::write(dst.add(i), T::default());
            }
        }
        Ok(self.make_box(index))
    }

    /// Allocate a copy of `src`.
    pub fn alloc_copy<T: Clone + Send + Sync + 'static>(
        &mut self,
        src: &[T],
    ) -> Result<DaBox<[T]>, AllocError> {
        let index = self.alloc_impl::<T>(src.len())?;
        let dst = self.ptr_at(self.alloc_info[index].offset).cast::<T>();
        for (i, value) in src.iter().enumerate() {
            // Safety: the reservation covers `src.len()` elements of `T`.
            #[allow(unsafe_code)]
            unsafe {
                ptr::write(dst.add(i), value.clone());
            }
        }
        Ok(self.make_box(index))
    }

    /// Resolve a handle to its metadata slot, asserting it belongs here and
    /// is still live.
    fn resolve(&self, allocator_id: u32, index: u32, generation: u32) -> Option<&AllocInfo> {
        if allocator_id != self.id {
            return None;
        }
        let info = self.alloc_info.get(index as usize)?;
        (info.is_live() && info.generation == generation).then_some(info)
    }

    fn resolve_box<T: ?Sized>(&self, handle: &DaBox<T>) -> &AllocInfo {
        assert_eq!(
            handle.allocator_id, self.id,
            "DaBox used with an allocator that did not issue it"
        );
        self.resolve(handle.allocator_id, handle.index, handle.generation)
            .expect("DaBox refers to a freed allocation")
    }

    /// Access a single value.
    pub fn get<T>(&self, handle: &DaBox<T>) -> &T {
        let offset = self.resolve_box(handle).offset;
        // Safety: the handle resolved to a live allocation of one `T`.
        #[allow(unsafe_code)]
        unsafe {
            &*self.ptr_at(offset).cast::<T>()
        }
    }

    /// Mutably access a single value.
    pub fn get_mut<T>(&mut self, handle: &DaBox<T>) -> &mut T {
        let offset = self.resolve_box(handle).offset;
        // Safety: as in `get`; `&mut self` guarantees exclusivity.
        #[allow(unsafe_code)]
        unsafe {
            &mut *self.ptr_at(offset).cast::<T>()
        }
    }

    /// Access a slice allocation.
    pub fn get_slice<T>(&self, handle: &DaBox<[T]>) -> &[T] {
        let info = *self.resolve_box(handle);
        // Safety: the handle resolved to a live allocation of `num_elems` `T`s.
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts(self.ptr_at(info.offset).cast::<T>(), info.num_elems)
        }
    }

    /// Mutably access a slice allocation.
    pub fn get_slice_mut<T>(&mut self, handle: &DaBox<[T]>) -> &mut [T] {
        let info = *self.resolve_box(handle);
        // Safety: as in `get_slice`; `&mut self` guarantees exclusivity.
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr_at(info.offset).cast::<T>(), info.num_elems)
        }
    }

    /// Access a single value through a non-owning reference.
    pub fn try_get<T>(&self, reference: DaRef<T>) -> Option<&T> {
        let info = self.resolve(reference.allocator_id, reference.index, reference.generation)?;
        // Safety: resolution succeeded, so the slot still holds the `T` the
        // reference was created for.
        #[allow(unsafe_code)]
        unsafe {
            Some(&*self.ptr_at(info.offset).cast::<T>())
        }
    }

    /// Access a slice through a non-owning reference.
    pub fn try_get_slice<T>(&self, reference: DaRef<[T]>) -> Option<&[T]> {
        let info = *self.resolve(reference.allocator_id, reference.index, reference.generation)?;
        // Safety: see `try_get`.
        #[allow(unsafe_code)]
        unsafe {
            Some(std::slice::from_raw_parts(
                self.ptr_at(info.offset).cast::<T>(),
                info.num_elems,
            ))
        }
    }

    /// Number of elements in the allocation (1 for single values).
    pub fn len_of<T: ?Sized>(&self, handle: &DaBox<T>) -> usize {
        self.resolve_box(handle).num_elems
    }

    /// Drop the payload and release its storage.
    ///
    /// If the allocation is the last one in the buffer, the tail is retracted
    /// so its space is reusable immediately; otherwise it becomes a hole until
    /// the next [`defragment`](Self::defragment).
    pub fn free<T: ?Sized>(&mut self, handle: DaBox<T>) {
        self.resolve_box(&handle);
        let info = &mut self.alloc_info[handle.index as usize];
        let mover = info.mover.take().expect("resolved allocation has a mover");
        let start = info.offset;
        let raw_size = info.raw_size;
        let num_elems = info.num_elems;

        info.generation = info.generation.wrapping_add(1);
        info.raw_size = 0;
        info.num_elems = 0;

        // Safety: the slot was live and holds `num_elems` initialised values.
        #[allow(unsafe_code)]
        unsafe {
            (mover.drop_fn)(self.ptr_at(start), num_elems);
        }

        self.used_bytes -= raw_size;
        if start + raw_size == self.data_head {
            self.data_head -= raw_size;
        }
    }

    /// Compact live allocations toward the start of the buffer.
    ///
    /// Allocations keep their relative order; their handles stay valid.
    pub fn defragment(&mut self) {
        let mut live: Vec<usize> = (0..self.alloc_info.len())
            .filter(|&i| self.alloc_info[i].is_live())
            .collect();
        live.sort_by_key(|&i| self.alloc_info[i].offset);

        let old_head = self.data_head;
        let mut new_head = 0;
        let mut moved = 0usize;

        for index in live {
            let info = &mut self.alloc_info[index];
            // Empty allocations may share an offset with a neighbour or sit
            // past a retracted tail; they own no bytes to move.
            if info.raw_size == 0 {
                info.offset = new_head;
                continue;
            }
            if info.offset != new_head {
                debug_assert!(new_head < info.offset);
                // Safety: both ranges lie within the buffer; `ptr::copy`
                // permits overlap. The source is not dropped, ownership
                // simply moves with the bytes.
                #[allow(unsafe_code)]
                unsafe {
                    ptr::copy(
                        self.buffer.as_ptr().wrapping_add(info.offset),
                        self.buffer.as_ptr().wrapping_add(new_head),
                        info.raw_size,
                    );
                }
                info.offset = new_head;
                moved += 1;
            }
            new_head += info.raw_size;
        }

        assert!(new_head <= old_head);
        self.data_head = new_head;

        tracing::debug!(
            reclaimed = old_head - new_head,
            moved,
            used = self.used_bytes,
            "defragmented heap"
        );
    }
}

impl Drop for DefragmentingAllocator {
    fn drop(&mut self) {
        for info in &mut self.alloc_info {
            if let Some(mover) = info.mover.take() {
                // Safety: live slots hold initialised values.
                #[allow(unsafe_code)]
                unsafe {
                    (mover.drop_fn)(self.buffer.as_ptr().wrapping_add(info.offset), info.num_elems);
                }
            }
        }
        if self.buffer_size > 0 {
            // Safety: allocated in `new` with the same layout.
            #[allow(unsafe_code)]
            unsafe {
                alloc::dealloc(self.buffer.as_ptr(), Self::buffer_layout(self.buffer_size));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct S {
        i: i32,
        text: [u8; 28],
    }

    fn s(i: i32) -> S {
        let mut text = [0u8; 28];
        text[..10].copy_from_slice(b"old allocs");
        S { i, text }
    }

    #[test]
    fn alloc_and_read_back() {
        let mut da = DefragmentingAllocator::new(1024);
        let b = da.alloc(true).unwrap();
        let text = da.alloc_copy(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ").unwrap();
        assert!(*da.get(&b));
        assert_eq!(da.get_slice(&text), b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        assert_eq!(da.len_of(&text), 26);
    }

    #[test]
    fn sizes_are_rounded_to_max_align() {
        let mut da = DefragmentingAllocator::new(256);
        let _a = da.alloc(1u8).unwrap();
        assert_eq!(da.num_used_bytes(), MAX_ALIGN);
        let _b = da.alloc_slice::<u8>(17).unwrap();
        assert_eq!(da.num_used_bytes(), MAX_ALIGN + 2 * MAX_ALIGN);
    }

    #[test]
    fn freeing_last_allocation_retracts_head() {
        let n = 32;
        let mut da = DefragmentingAllocator::new(n * std::mem::size_of::<S>());
        let mut allocs: Vec<DaBox<S>> = (0..n as i32).map(|i| da.alloc(s(i)).unwrap()).collect();
        assert_eq!(da.free_space(), 0);

        // Free half in LIFO order.
        for _ in 0..n / 2 {
            let h = allocs.pop().unwrap();
            da.free(h);
        }
        assert_eq!(da.free_space(), (n / 2) * std::mem::size_of::<S>());
        assert!(da.has_space_for::<S>(n / 2));

        // Re-fill without defragmenting.
        for i in n / 2..n {
            allocs.push(da.alloc(S { i: i as i32, ..S::default() }).unwrap());
        }
        for (i, h) in allocs.iter().enumerate().take(n / 2) {
            assert_eq!(da.get(h).i, i as i32);
            assert_eq!(&da.get(h).text[..10], b"old allocs");
        }

        while let Some(h) = allocs.pop() {
            da.free(h);
        }
        assert_eq!(da.free_space(), n * std::mem::size_of::<S>());
    }

    #[test]
    fn interior_free_leaves_hole_until_defragment() {
        let mut da = DefragmentingAllocator::new(64);
        let a = da.alloc([1u64; 2]).unwrap();
        let b = da.alloc([2u64; 2]).unwrap();
        let c = da.alloc([3u64; 2]).unwrap();
        let _ = da.alloc([4u64; 2]).unwrap();

        da.free(b);
        assert_eq!(da.free_space(), 16);
        assert!(!da.has_space_for::<[u64; 2]>(1));
        assert!(da.alloc([5u64; 2]).is_err());

        da.defragment();
        assert!(da.has_space_for::<[u64; 2]>(1));
        let e = da.alloc([5u64; 2]).unwrap();
        assert_eq!(*da.get(&a), [1, 1]);
        assert_eq!(*da.get(&c), [3, 3]);
        assert_eq!(*da.get(&e), [5, 5]);
    }

    #[test]
    fn defragment_handles_empty_allocations() {
        let mut da = DefragmentingAllocator::new(128);
        let a = da.alloc_slice::<u8>(16).unwrap();
        let empty = da.alloc_slice::<u8>(0).unwrap();
        let b = da.alloc_slice::<u8>(16).unwrap();
        da.get_slice_mut(&b).fill(7);

        da.free(a);
        let c = da.alloc_slice::<u8>(32).unwrap();
        da.get_slice_mut(&c).fill(9);
        da.defragment();

        assert_eq!(da.free_space(), 128 - 48);
        assert!(da.get_slice(&empty).is_empty());
        assert!(da.get_slice(&b).iter().all(|&x| x == 7));
        assert!(da.get_slice(&c).iter().all(|&x| x == 9));

        // An empty allocation left behind a retracted tail.
        let tail = da.alloc_slice::<u8>(16).unwrap();
        let behind = da.alloc_slice::<u8>(0).unwrap();
        da.free(tail);
        da.defragment();
        assert_eq!(da.free_space(), 128 - 48);
        assert_eq!(da.len_of(&behind), 0);
        assert!(da.get_slice(&c).iter().all(|&x| x == 9));
    }

    #[test]
    fn stale_ref_returns_none() {
        let mut da = DefragmentingAllocator::new(64);
        let a = da.alloc(7u32).unwrap();
        let r = a.downgrade();
        assert_eq!(da.try_get(r), Some(&7));
        da.free(a);
        assert_eq!(da.try_get(r), None);

        // Slot reuse does not resurrect the old reference.
        let _b = da.alloc(9u32).unwrap();
        assert_eq!(da.try_get(r), None);
    }

    #[test]
    fn ref_from_other_allocator_does_not_resolve() {
        let mut da1 = DefragmentingAllocator::new(64);
        let da2 = DefragmentingAllocator::new(64);
        let a = da1.alloc(1u32).unwrap();
        assert_eq!(da2.try_get(a.downgrade()), None);
    }

    #[test]
    #[should_panic(expected = "did not issue it")]
    fn box_from_other_allocator_panics() {
        let mut da1 = DefragmentingAllocator::new(64);
        let da2 = DefragmentingAllocator::new(64);
        let a = da1.alloc(1u32).unwrap();
        let _ = da2.get(&a);
    }

    #[test]
    fn drops_run_on_free_and_on_allocator_drop() {
        let drops = Arc::new(AtomicUsize::new(0));

        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let mut da = DefragmentingAllocator::new(256);
            let a = da.alloc(Counted(drops.clone())).unwrap();
            let _b = da.alloc(Counted(drops.clone())).unwrap();
            da.free(a);
            assert_eq!(drops.load(Ordering::SeqCst), 1);
            da.defragment();
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn heap_owning_types_survive_relocation() {
        let mut da = DefragmentingAllocator::new(256);
        let a = da.alloc(String::from("first")).unwrap();
        let b = da.alloc(vec![1, 2, 3]).unwrap();
        da.free(a);
        da.defragment();
        assert_eq!(da.get(&b), &vec![1, 2, 3]);
        da.get_mut(&b).push(4);
        assert_eq!(da.get(&b).len(), 4);
    }

    #[test]
    fn zero_sized_requests_are_allowed() {
        let mut da = DefragmentingAllocator::new(0);
        let empty = da.alloc_slice::<u32>(0).unwrap();
        assert!(da.get_slice(&empty).is_empty());
        assert!(da.alloc(1u8).is_err());
    }

    #[test]
    fn out_of_space_reports_sizes() {
        let mut da = DefragmentingAllocator::new(32);
        let err = da.alloc_slice::<u8>(64).unwrap_err();
        match err {
            AllocError::OutOfSpace {
                requested,
                free_space,
                tail_space,
            } => {
                assert_eq!(requested, 64);
                assert_eq!(free_space, 32);
                assert_eq!(tail_space, 32);
            }
        }
    }
}
