//! The [`EntityCollection`] -- entities, their component masks and the
//! per-type component collections.

use crate::component::{
    Component, ComponentList, ComponentMask, ComponentRegistry, ComponentTypeId,
    ErasedCollection, MAX_COMPONENT_TYPES,
};
use crate::entity::{Entity, EntityData};
use crate::query::{Query, QueryIter};
use crate::slot_map::{SlotMap, SlotMapHandle};
use crate::EcsError;

/// Owns all entities and components.
///
/// Entities live in one slot map of [`EntityData`]; each entity's component
/// handles live in a second slot map of [`ComponentList`]s; each component
/// type has its own `SlotMap<C>`. Component types are registered on first
/// use (or explicitly via [`register_component`](Self::register_component))
/// and are capped at [`MAX_COMPONENT_TYPES`].
///
/// Not internally synchronised: every mutation takes `&mut self`, so sharing
/// across threads requires external synchronisation.
pub struct EntityCollection {
    entity_data: SlotMap<EntityData>,
    component_lists: SlotMap<ComponentList>,
    registry: ComponentRegistry,
    /// Indexed by `ComponentTypeId`; `collections[i]` is a `SlotMap<C>` for
    /// the type registered as `i`.
    collections: Vec<Box<dyn ErasedCollection>>,
}

impl EntityCollection {
    /// Create a collection with room for `capacity` entities.
    pub fn new(capacity: usize) -> Self {
        Self {
            entity_data: SlotMap::with_capacity(capacity),
            component_lists: SlotMap::with_capacity(capacity),
            registry: ComponentRegistry::new(),
            collections: Vec::with_capacity(MAX_COMPONENT_TYPES),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register component type `C`, returning its id. Idempotent.
    ///
    /// Panics if `MAX_COMPONENT_TYPES` types are already registered.
    pub fn register_component<C: Component>(&mut self) -> ComponentTypeId {
        let id = self.registry.register::<C>();
        if id.index() == self.collections.len() {
            self.collections.push(Box::new(SlotMap::<C>::new()));
        }
        id
    }

    pub(crate) fn collection<C: Component>(&self, id: ComponentTypeId) -> &SlotMap<C> {
        self.collections[id.index()]
            .as_any()
            .downcast_ref::<SlotMap<C>>()
            .expect("component collection type matches its registered id")
    }

    pub(crate) fn collection_mut<C: Component>(&mut self, id: ComponentTypeId) -> &mut SlotMap<C> {
        self.collections[id.index()]
            .as_any_mut()
            .downcast_mut::<SlotMap<C>>()
            .expect("component collection type matches its registered id")
    }

    pub(crate) fn entity_table(&self) -> &SlotMap<EntityData> {
        &self.entity_data
    }

    pub(crate) fn component_list_table(&self) -> &SlotMap<ComponentList> {
        &self.component_lists
    }

    /// Read-only view of every stored `C`, in storage order.
    pub fn components<C: Component>(&self) -> &[C] {
        match self.registry.lookup::<C>() {
            Some(id) => self.collection::<C>(id).as_slice(),
            None => &[],
        }
    }

    // -- entity lifecycle ----------------------------------------------------

    /// Create an entity with no components.
    pub fn create_entity(&mut self) -> Entity {
        let component_list = self
            .component_lists
            .insert([SlotMapHandle::NULL; MAX_COMPONENT_TYPES]);
        let handle = self.entity_data.insert(EntityData {
            mask: ComponentMask::EMPTY,
            component_list,
        });
        Entity::from_handle(handle)
    }

    /// Delete `entity` and every component it owns.
    ///
    /// Panics if `entity` is not alive.
    pub fn delete_entity(&mut self, entity: Entity) {
        let data = *self.data(entity);
        let list = self.component_lists.erase(data.component_list);
        for id in data.mask.iter() {
            self.collections[id.index()].erase(list[id.index()]);
        }
        self.entity_data.erase(entity.handle());
        tracing::trace!(%entity, components = data.mask.len(), "deleted entity");
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entity_data.is_handle_valid(entity.handle())
    }

    pub fn num_entities(&self) -> usize {
        self.entity_data.len()
    }

    /// All live entities, in storage order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entity_data.handles().map(Entity::from_handle)
    }

    /// Delete every entity and component. Registrations are kept; every
    /// outstanding entity handle becomes invalid.
    pub fn reset(&mut self) {
        for collection in &mut self.collections {
            collection.clear();
        }
        self.component_lists.clear();
        self.entity_data.clear();
    }

    fn data(&self, entity: Entity) -> &EntityData {
        match self.entity_data.get(entity.handle()) {
            Some(data) => data,
            None => panic!("entity {entity:?} is not alive"),
        }
    }

    fn try_data(&self, entity: Entity) -> Result<&EntityData, EcsError> {
        self.entity_data
            .get(entity.handle())
            .ok_or(EcsError::StaleEntity { entity })
    }

    /// The component mask of `entity`. Panics if `entity` is not alive.
    pub fn component_mask(&self, entity: Entity) -> ComponentMask {
        self.data(entity).mask
    }

    // -- components ------------------------------------------------------------

    /// Attach `value` to `entity` and return a reference to the stored
    /// component.
    ///
    /// Panics if `entity` is not alive or already has a `C`.
    pub fn add_component<C: Component>(&mut self, entity: Entity, value: C) -> &mut C {
        let id = self.register_component::<C>();
        let data = *self.data(entity);
        assert!(
            !data.mask.contains(id),
            "entity {entity:?} already has component '{}'",
            std::any::type_name::<C>()
        );

        let collection = self.collection_mut::<C>(id);
        let handle = collection.insert(value);

        self.component_lists[data.component_list][id.index()] = handle;
        self.entity_data[entity.handle()].mask.insert(id);

        &mut self.collection_mut::<C>(id)[handle]
    }

    /// Detach and return the `C` owned by `entity`.
    ///
    /// Panics if `entity` is not alive or has no `C`.
    pub fn remove_component<C: Component>(&mut self, entity: Entity) -> C {
        let (id, handle) = self.component_handle::<C>(entity);
        self.entity_data[entity.handle()].mask.remove(id);
        self.collection_mut::<C>(id).erase(handle)
    }

    /// Whether `entity` has a `C`. Panics if `entity` is not alive.
    pub fn has_component<C: Component>(&self, entity: Entity) -> bool {
        let mask = self.data(entity).mask;
        match self.registry.lookup::<C>() {
            Some(id) => mask.contains(id),
            None => false,
        }
    }

    fn component_handle<C: Component>(&self, entity: Entity) -> (ComponentTypeId, SlotMapHandle) {
        let data = self.data(entity);
        let id = match self.registry.lookup::<C>() {
            Some(id) if data.mask.contains(id) => id,
            _ => panic!(
                "entity {entity:?} has no component '{}'",
                std::any::type_name::<C>()
            ),
        };
        (id, self.component_lists[data.component_list][id.index()])
    }

    /// The `C` owned by `entity`. Panics if `entity` is not alive or has no `C`.
    pub fn get_component<C: Component>(&self, entity: Entity) -> &C {
        let (id, handle) = self.component_handle::<C>(entity);
        &self.collection::<C>(id)[handle]
    }

    pub fn get_component_mut<C: Component>(&mut self, entity: Entity) -> &mut C {
        let (id, handle) = self.component_handle::<C>(entity);
        &mut self.collection_mut::<C>(id)[handle]
    }

    fn try_component_handle<C: Component>(
        &self,
        entity: Entity,
    ) -> Result<(ComponentTypeId, SlotMapHandle), EcsError> {
        let data = self.try_data(entity)?;
        match self.registry.lookup::<C>() {
            Some(id) if data.mask.contains(id) => {
                Ok((id, self.component_lists[data.component_list][id.index()]))
            }
            _ => Err(EcsError::MissingComponent {
                entity,
                component: std::any::type_name::<C>(),
            }),
        }
    }

    /// Non-panicking [`get_component`](Self::get_component).
    pub fn try_get_component<C: Component>(&self, entity: Entity) -> Result<&C, EcsError> {
        let (id, handle) = self.try_component_handle::<C>(entity)?;
        Ok(&self.collection::<C>(id)[handle])
    }

    pub fn try_get_component_mut<C: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<&mut C, EcsError> {
        let (id, handle) = self.try_component_handle::<C>(entity)?;
        Ok(&mut self.collection_mut::<C>(id)[handle])
    }

    // -- queries ---------------------------------------------------------------

    /// Iterate entities matching a read-only query.
    ///
    /// ```
    /// use mg_ecs::prelude::*;
    ///
    /// struct Position(f32, f32);
    /// struct Frozen;
    ///
    /// let mut ecs = EntityCollection::new(16);
    /// let a = ecs.create_entity();
    /// ecs.add_component(a, Position(1.0, 2.0));
    /// let b = ecs.create_entity();
    /// ecs.add_component(b, Position(3.0, 4.0));
    /// ecs.add_component(b, Frozen);
    ///
    /// let moving: Vec<Entity> = ecs
    ///     .get_with::<(&Position, Not<Frozen>)>()
    ///     .map(|(entity, _)| entity)
    ///     .collect();
    /// assert_eq!(moving, vec![a]);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the query contains mutable designators; use
    /// [`get_with_mut`](Self::get_with_mut) for those.
    pub fn get_with<Q: Query>(&self) -> QueryIter<'_, Q> {
        assert!(
            !Q::HAS_MUTABLE,
            "EntityCollection::get_with() cannot be used with mutable designators. \
             Use EntityCollection::get_with_mut() instead, which requires &mut self."
        );
        Q::validate();
        QueryIter::new(self, Q::filter(self), Q::prepare(self))
    }

    /// Iterate entities matching a query that may mutate components.
    ///
    /// # Panics
    ///
    /// Panics if a component type is accessed mutably together with any
    /// other access to the same type.
    pub fn get_with_mut<Q: Query>(&mut self) -> QueryIter<'_, Q> {
        Q::validate();
        let filter = Q::filter(self);
        let state = Q::prepare_mut(self);
        let this: &EntityCollection = self;
        QueryIter::new(this, filter, state)
    }
}

impl Default for EntityCollection {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCollection")
            .field("entities", &self.num_entities())
            .field("component_types", &self.registry.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
