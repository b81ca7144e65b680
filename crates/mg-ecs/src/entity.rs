//! Entity handles and per-entity metadata.
//!
//! An [`Entity`] is a [`SlotMapHandle`] into the collection's entity table.
//! It carries no payload itself: the table holds an [`EntityData`] record with
//! the entity's component mask and a handle to its [`ComponentList`].
//!
//! [`ComponentList`]: crate::component::ComponentList

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::ComponentMask;
use crate::slot_map::SlotMapHandle;

/// A generation-checked entity handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Entity(SlotMapHandle);

impl Entity {
    #[inline]
    pub(crate) fn from_handle(handle: SlotMapHandle) -> Self {
        Self(handle)
    }

    /// The underlying slot map handle.
    #[inline]
    pub fn handle(self) -> SlotMapHandle {
        self.0
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0.index()
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.0.generation()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Metadata record stored for every live entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityData {
    /// Bit `i` is set iff the entity owns a component of type `i`.
    pub mask: ComponentMask,
    pub(crate) component_list: SlotMapHandle,
}
