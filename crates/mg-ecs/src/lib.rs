//! Magnum ECS -- slot-map storage with bitmask component queries.
//!
//! Entities are generation-checked handles into a [`SlotMap`] of per-entity
//! metadata (a 64-bit component mask plus a handle to the entity's component
//! list). Every component type lives in its own dense `SlotMap<C>`, and
//! queries test each entity's mask against inclusion/exclusion masks before
//! resolving the requested components.
//!
//! # Quick Start
//!
//! ```
//! use mg_ecs::prelude::*;
//!
//! #[derive(Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut ecs = EntityCollection::new(64);
//! let entity = ecs.create_entity();
//! ecs.add_component(entity, Position { x: 0.0, y: 0.0 });
//! ecs.add_component(entity, Velocity { dx: 1.0, dy: 0.0 });
//!
//! for (_, (pos, vel)) in ecs.get_with_mut::<(&mut Position, &Velocity)>() {
//!     pos.x += vel.dx;
//!     pos.y += vel.dy;
//! }
//!
//! assert_eq!(ecs.get_component::<Position>(entity), &Position { x: 1.0, y: 0.0 });
//! ```

#![deny(unsafe_code)]

pub mod collection;
pub mod component;
pub mod entity;
#[allow(unsafe_code)]
pub mod query;
pub mod slot_map;

pub use collection::EntityCollection;
pub use slot_map::{SlotMap, SlotMapHandle};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors returned by the non-panicking `try_*` accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (deleted, or from another collection).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::Entity },

    /// The entity exists but has no component of the requested type.
    #[error("entity {entity:?} has no component '{component}'")]
    MissingComponent {
        entity: entity::Entity,
        component: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::collection::EntityCollection;
    pub use crate::component::{
        Component, ComponentMask, ComponentRegistry, ComponentTypeId, MAX_COMPONENT_TYPES,
    };
    pub use crate::entity::Entity;
    pub use crate::query::{Not, Query, QueryIter, QueryTerm};
    pub use crate::slot_map::{SlotMap, SlotMapHandle};
    pub use crate::EcsError;
}
