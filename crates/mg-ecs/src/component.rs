//! Component type registration, masks and per-type collections.
//!
//! Every component type stored in an
//! [`EntityCollection`](crate::EntityCollection) is assigned a
//! [`ComponentTypeId`] in `0..MAX_COMPONENT_TYPES` on first use. The id is the
//! bit position in each entity's [`ComponentMask`] and the slot in its
//! [`ComponentList`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::slot_map::{SlotMap, SlotMapHandle};

/// Hard cap on distinct component types per collection (bits in the mask).
pub const MAX_COMPONENT_TYPES: usize = 64;

/// Marker for types that can be stored as components.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Identifier of a registered component type, in `0..MAX_COMPONENT_TYPES`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentMask
// ---------------------------------------------------------------------------

/// Set of component types, one bit per [`ComponentTypeId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComponentMask(u64);

impl ComponentMask {
    pub const EMPTY: ComponentMask = ComponentMask(0);

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn contains(self, id: ComponentTypeId) -> bool {
        self.0 & (1u64 << id.0) != 0
    }

    /// Whether every bit of `other` is set in `self`.
    #[inline]
    pub fn contains_all(self, other: ComponentMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit of `other` is set in `self`.
    #[inline]
    pub fn is_disjoint(self, other: ComponentMask) -> bool {
        self.0 & other.0 == 0
    }

    #[inline]
    pub fn insert(&mut self, id: ComponentTypeId) {
        self.0 |= 1u64 << id.0;
    }

    #[inline]
    pub fn remove(&mut self, id: ComponentTypeId) {
        self.0 &= !(1u64 << id.0);
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Ids of all set bits, lowest first.
    pub fn iter(self) -> impl Iterator<Item = ComponentTypeId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let id = bits.trailing_zeros();
            bits &= bits - 1;
            Some(ComponentTypeId(id))
        })
    }
}

impl fmt::Debug for ComponentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentMask({:#066b})", self.0)
    }
}

/// Per-entity table of component handles, indexed by [`ComponentTypeId`].
/// Entries whose mask bit is clear are meaningless.
pub type ComponentList = [SlotMapHandle; MAX_COMPONENT_TYPES];

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentTypeId,
    /// `std::any::type_name::<T>()`
    pub name: &'static str,
    pub type_id: TypeId,
}

/// Maps Rust types to [`ComponentTypeId`]s.
///
/// Registering a type twice returns the existing id.
#[derive(Debug, Default, Clone)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, assigning the next free id.
    ///
    /// Panics if `MAX_COMPONENT_TYPES` types are already registered.
    pub fn register<T: Component>(&mut self) -> ComponentTypeId {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            return existing;
        }

        assert!(
            self.infos.len() < MAX_COMPONENT_TYPES,
            "cannot register component '{}': limit of {MAX_COMPONENT_TYPES} component types reached",
            std::any::type_name::<T>()
        );

        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            name: std::any::type_name::<T>(),
            type_id: rust_type_id,
        });
        self.by_type.insert(rust_type_id, id);
        tracing::trace!(component = std::any::type_name::<T>(), id = id.0, "registered component");
        id
    }

    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Type-erased collections
// ---------------------------------------------------------------------------

/// A `SlotMap<C>` viewed without knowing `C`.
///
/// Lets the entity collection erase an entity's components by id alone.
pub(crate) trait ErasedCollection: Send + Sync {
    fn erase(&mut self, handle: SlotMapHandle);
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<C: Component> ErasedCollection for SlotMap<C> {
    fn erase(&mut self, handle: SlotMapHandle) {
        SlotMap::erase(self, handle);
    }

    fn clear(&mut self) {
        SlotMap::clear(self);
    }

    fn len(&self) -> usize {
        SlotMap::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
