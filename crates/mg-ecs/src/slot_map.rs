//! Dense array with stable, generation-checked handles.
//!
//! A [`SlotMap`] stores its elements contiguously (so iteration is a plain
//! slice walk) while handing out [`SlotMapHandle`]s that stay valid across
//! insertions, erasures of other elements and reallocation. Lookups go
//! through a key table: `keys[handle.index]` records where the element
//! currently lives and which generation it belongs to.
//!
//! Erasing moves the last element into the hole, so iteration order is
//! unspecified and changes with mutation.
//!
//! The key table doubles as a free list (unused keys are chained through
//! their `position` field) and as the inverse mapping from dense position to
//! key (`keys[position].inverse_index`), which is what lets erase patch the
//! moved element's key in O(1).

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Generation value marking an uninitialised handle.
pub const SENTINEL: u32 = u32::MAX;

/// Growth factor numerator/denominator (1.5x).
const GROWTH_NUM: usize = 3;
const GROWTH_DEN: usize = 2;

// ---------------------------------------------------------------------------
// SlotMapHandle
// ---------------------------------------------------------------------------

/// Generation-checked reference to an element of a [`SlotMap`].
///
/// `Default` produces an uninitialised handle that is never valid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotMapHandle {
    index: u32,
    generation: u32,
}

impl SlotMapHandle {
    /// The uninitialised handle.
    pub const NULL: SlotMapHandle = SlotMapHandle {
        index: 0,
        generation: SENTINEL,
    };

    /// Whether this handle was produced by a slot map at all. An initialised
    /// handle may still be stale; use [`SlotMap::is_handle_valid`].
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.generation != SENTINEL
    }

    /// Index into the owning map's key table.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Default for SlotMapHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for SlotMapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initialized() {
            write!(f, "SlotMapHandle({}v{})", self.index, self.generation)
        } else {
            f.write_str("SlotMapHandle(null)")
        }
    }
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Key {
    /// Live key: dense position of its element. Free key: next free key
    /// index, or `SENTINEL` at the end of the list.
    position: u32,
    /// Bumped on every erase of the element this key addressed.
    generation: u32,
    /// Indexed by dense position rather than by key: the key addressing
    /// `data[this key's index]`.
    inverse_index: u32,
}

// ---------------------------------------------------------------------------
// SlotMap
// ---------------------------------------------------------------------------

/// Dense storage with O(1) insert, erase and handle lookup.
///
/// Not internally synchronised: multi-threaded mutation requires external
/// synchronisation.
#[derive(Clone)]
pub struct SlotMap<T> {
    data: Vec<T>,
    /// Always `capacity()` long.
    keys: Vec<Key>,
    first_free_key: u32,
}

impl<T> SlotMap<T> {
    /// Create an empty slot map without allocating.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            keys: Vec::new(),
            first_free_key: SENTINEL,
        }
    }

    /// Create an empty slot map with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        map.resize(capacity);
        map
    }

    /// Number of live elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of elements that fit before the next reallocation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Largest capacity supported (`SENTINEL` is reserved).
    #[inline]
    pub const fn max_size() -> usize {
        (SENTINEL - 1) as usize
    }

    /// Grow the storage to `new_capacity`.
    ///
    /// Live elements are moved into the new storage; every handle stays
    /// valid. Requests below the current capacity leave the key table alone,
    /// since its generations must outlive every handle they were issued to.
    pub fn resize(&mut self, new_capacity: usize) {
        assert!(
            new_capacity >= self.len(),
            "SlotMap::resize: new capacity {new_capacity} is smaller than size {}",
            self.len()
        );
        assert!(
            new_capacity <= Self::max_size(),
            "SlotMap::resize: capacity {new_capacity} exceeds max_size"
        );

        let old_capacity = self.capacity();
        if new_capacity <= old_capacity {
            return;
        }

        self.data.reserve_exact(new_capacity - self.data.len());
        self.keys.reserve_exact(new_capacity - old_capacity);

        // New keys form a chain that ends at the current free list head.
        for index in old_capacity..new_capacity {
            let next = if index + 1 < new_capacity {
                (index + 1) as u32
            } else {
                self.first_free_key
            };
            self.keys.push(Key {
                position: next,
                generation: 0,
                inverse_index: SENTINEL,
            });
        }
        self.first_free_key = old_capacity as u32;
    }

    fn grow(&mut self) {
        let capacity = self.capacity();
        let new_capacity = (capacity * GROWTH_NUM / GROWTH_DEN)
            .max(2)
            .max(capacity + 1)
            .min(Self::max_size());
        assert!(new_capacity > capacity, "SlotMap exceeded max_size");
        self.resize(new_capacity);
    }

    /// Insert a value, returning a handle to it.
    ///
    /// Reallocates (moving every element) only when `len() == capacity()`.
    pub fn insert(&mut self, value: T) -> SlotMapHandle {
        if self.len() == self.capacity() {
            self.grow();
        }

        let key_index = self.first_free_key;
        debug_assert_ne!(key_index, SENTINEL);
        let position = self.data.len() as u32;

        let key = &mut self.keys[key_index as usize];
        self.first_free_key = key.position;
        key.position = position;
        let generation = key.generation;

        self.keys[position as usize].inverse_index = key_index;
        self.data.push(value);

        SlotMapHandle {
            index: key_index,
            generation,
        }
    }

    /// Whether `handle` refers to a live element of this map.
    #[inline]
    pub fn is_handle_valid(&self, handle: SlotMapHandle) -> bool {
        self.position_of(handle).is_some()
    }

    /// Dense position of the element `handle` refers to.
    #[inline]
    pub fn position_of(&self, handle: SlotMapHandle) -> Option<usize> {
        if !handle.is_initialized() {
            return None;
        }
        let key = self.keys.get(handle.index as usize)?;
        if key.generation != handle.generation {
            return None;
        }
        let position = key.position as usize;
        (position < self.data.len() && self.keys[position].inverse_index == handle.index)
            .then_some(position)
    }

    pub fn get(&self, handle: SlotMapHandle) -> Option<&T> {
        let position = self.position_of(handle)?;
        Some(&self.data[position])
    }

    pub fn get_mut(&mut self, handle: SlotMapHandle) -> Option<&mut T> {
        let position = self.position_of(handle)?;
        Some(&mut self.data[position])
    }

    /// Handle for the element at dense `position`.
    pub fn make_handle(&self, position: usize) -> SlotMapHandle {
        assert!(
            position < self.len(),
            "SlotMap::make_handle: position {position} out of range (size {})",
            self.len()
        );
        let key_index = self.keys[position].inverse_index;
        SlotMapHandle {
            index: key_index,
            generation: self.keys[key_index as usize].generation,
        }
    }

    /// Remove the element `handle` refers to and return it.
    ///
    /// The last element is moved into the vacated position; its handle keeps
    /// working. Panics if `handle` is not valid.
    pub fn erase(&mut self, handle: SlotMapHandle) -> T {
        let position = match self.position_of(handle) {
            Some(position) => position,
            None => panic!("SlotMap::erase: invalid handle {handle:?}"),
        };
        self.erase_position(position)
    }

    /// Remove the element at dense `position`. Returns whether an element was
    /// removed.
    pub fn erase_at(&mut self, position: usize) -> bool {
        if position >= self.len() {
            return false;
        }
        self.erase_position(position);
        true
    }

    fn erase_position(&mut self, position: usize) -> T {
        let key_index = self.keys[position].inverse_index;
        let last = self.data.len() - 1;

        let value = self.data.swap_remove(position);
        if position != last {
            let moved_key = self.keys[last].inverse_index;
            self.keys[moved_key as usize].position = position as u32;
            self.keys[position].inverse_index = moved_key;
        }
        self.keys[last].inverse_index = SENTINEL;

        self.release_key(key_index);
        value
    }

    fn release_key(&mut self, key_index: u32) {
        let key = &mut self.keys[key_index as usize];
        key.generation += 1;
        assert!(
            key.generation != SENTINEL,
            "SlotMap: generation counter overflow for key {key_index}"
        );
        key.position = self.first_free_key;
        self.first_free_key = key_index;
    }

    /// Remove every element. All outstanding handles become invalid;
    /// capacity is kept.
    pub fn clear(&mut self) {
        for position in (0..self.data.len()).rev() {
            let key_index = self.keys[position].inverse_index;
            self.keys[position].inverse_index = SENTINEL;
            self.release_key(key_index);
        }
        self.data.clear();
    }

    /// The live elements as a dense slice, in storage order.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }

    /// Handles of all live elements, in storage order.
    pub fn handles(&self) -> impl Iterator<Item = SlotMapHandle> + '_ {
        (0..self.len()).map(|position| self.make_handle(position))
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotMap")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("data", &self.data)
            .finish()
    }
}

impl<T> Index<SlotMapHandle> for SlotMap<T> {
    type Output = T;

    fn index(&self, handle: SlotMapHandle) -> &T {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("SlotMap: invalid handle {handle:?}"),
        }
    }
}

impl<T> IndexMut<SlotMapHandle> for SlotMap<T> {
    fn index_mut(&mut self, handle: SlotMapHandle) -> &mut T {
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("SlotMap: invalid handle {handle:?}"),
        }
    }
}

impl<'a, T> IntoIterator for &'a SlotMap<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut SlotMap<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut map = SlotMap::new();
        let a = map.insert("a");
        let b = map.insert("b");
        assert_eq!(map.len(), 2);
        assert_eq!(map[a], "a");
        assert_eq!(map[b], "b");
        assert!(map.is_handle_valid(a));
    }

    #[test]
    fn erase_moves_last_into_hole() {
        let mut map = SlotMap::with_capacity(4);
        let h10 = map.insert(10);
        let h20 = map.insert(20);
        let h30 = map.insert(30);
        let h40 = map.insert(40);
        assert_eq!(map.capacity(), 4);

        assert_eq!(map.erase(h20), 20);
        assert_eq!(map.len(), 3);

        let mut values: Vec<i32> = map.iter().copied().collect();
        values.sort();
        assert_eq!(values, vec![10, 30, 40]);
        // Dense storage: the last element filled the hole.
        assert_eq!(map.as_slice(), &[10, 40, 30]);

        assert!(!map.is_handle_valid(h20));
        assert_eq!(map[h10], 10);
        assert_eq!(map[h30], 30);
        assert_eq!(map[h40], 40);
    }

    #[test]
    fn handles_survive_reallocation() {
        let mut map = SlotMap::new();
        let handles: Vec<_> = (0..100).map(|i| map.insert(i)).collect();
        assert!(map.capacity() >= 100);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(map[*h], i);
        }
    }

    #[test]
    fn growth_is_one_and_a_half() {
        let mut map = SlotMap::new();
        map.insert(0);
        assert_eq!(map.capacity(), 2);
        map.insert(1);
        map.insert(2);
        assert_eq!(map.capacity(), 3);
        map.insert(3);
        assert_eq!(map.capacity(), 4);
        map.insert(4);
        assert_eq!(map.capacity(), 6);
    }

    #[test]
    fn reused_key_does_not_revalidate_old_handle() {
        let mut map = SlotMap::with_capacity(1);
        let a = map.insert(1);
        map.erase(a);
        let b = map.insert(2);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(!map.is_handle_valid(a));
        assert_eq!(map.get(a), None);
        assert_eq!(map[b], 2);
    }

    #[test]
    fn make_handle_matches_insert_handle() {
        let mut map = SlotMap::new();
        let a = map.insert('a');
        let b = map.insert('b');
        let c = map.insert('c');
        map.erase(a);
        for position in 0..map.len() {
            let h = map.make_handle(position);
            assert_eq!(map[h], map.as_slice()[position]);
        }
        assert!(map.handles().any(|h| h == b));
        assert!(map.handles().any(|h| h == c));
    }

    #[test]
    fn erase_at_by_position() {
        let mut map = SlotMap::new();
        let a = map.insert(1);
        let b = map.insert(2);
        assert!(map.erase_at(0));
        assert!(!map.erase_at(5));
        assert!(!map.is_handle_valid(a));
        assert_eq!(map[b], 2);
    }

    #[test]
    fn clear_invalidates_every_handle() {
        let mut map = SlotMap::new();
        let handles: Vec<_> = (0..10).map(|i| map.insert(i)).collect();
        let capacity = map.capacity();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), capacity);
        for h in handles {
            assert!(!map.is_handle_valid(h));
        }
        let h = map.insert(42);
        assert_eq!(map[h], 42);
    }

    #[test]
    fn clone_preserves_handles() {
        let mut map = SlotMap::new();
        let a = map.insert(String::from("a"));
        let copy = map.clone();
        assert_eq!(copy[a], "a");
    }

    #[test]
    fn null_handle_is_never_valid() {
        let mut map = SlotMap::new();
        map.insert(0);
        let null = SlotMapHandle::default();
        assert!(!null.is_initialized());
        assert!(!map.is_handle_valid(null));
    }

    #[test]
    fn resize_never_shrinks_keys() {
        let mut map = SlotMap::with_capacity(10);
        let a = map.insert(1);
        let b = map.insert(2);
        map.resize(2);
        assert_eq!(map.capacity(), 10);
        assert_eq!(map[a], 1);
        assert_eq!(map[b], 2);
    }

    #[test]
    #[should_panic(expected = "smaller than size")]
    fn resize_below_size_panics() {
        let mut map = SlotMap::new();
        map.insert(1);
        map.insert(2);
        map.resize(1);
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn double_erase_panics() {
        let mut map = SlotMap::new();
        let a = map.insert(1);
        map.erase(a);
        map.erase(a);
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn index_with_stale_handle_panics() {
        let mut map = SlotMap::new();
        let a = map.insert(1);
        map.erase(a);
        let _ = map[a];
    }
}
