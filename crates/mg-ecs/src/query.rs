//! Mask-filtered iteration over entities and their components.
//!
//! A query is a tuple of designators:
//!
//! | designator      | matches when the entity...   | yields          |
//! |-----------------|------------------------------|-----------------|
//! | `&C`            | has `C`                      | `&C`            |
//! | `&mut C`        | has `C`                      | `&mut C`        |
//! | `Not<C>`        | does not have `C`            | `()`            |
//! | `Option<&C>`    | always                       | `Option<&C>`    |
//! | `Option<&mut C>`| always                       | `Option<&mut C>`|
//!
//! The designators are folded into an inclusion mask and an exclusion mask;
//! an entity matches iff `mask & include == include && mask & exclude == 0`.
//! Iteration walks the entity table in dense storage order (not creation
//! order) and resolves each requested component through the entity's
//! component list.
//!
//! ## Soundness
//!
//! Read-only queries go through [`EntityCollection::get_with`], which takes
//! `&self` and rejects `&mut` designators. Mutable queries go through
//! [`EntityCollection::get_with_mut`], which takes `&mut self` and captures a
//! raw pointer to each requested collection's storage up front. Every entity
//! owns a distinct component per type, so rows never alias; within one row a
//! type may not be borrowed mutably together with any other access to it
//! (checked before iteration starts, panicking otherwise).

use std::any::TypeId;
use std::marker::PhantomData;

use crate::component::{Component, ComponentList, ComponentMask, ComponentTypeId};
use crate::entity::{Entity, EntityData};
use crate::slot_map::{SlotMap, SlotMapHandle};
use crate::EntityCollection;

// ---------------------------------------------------------------------------
// Designators
// ---------------------------------------------------------------------------

/// Query designator excluding entities that have `C`. Yields `()`.
pub struct Not<C>(PhantomData<fn() -> C>);

/// How a designator constrains matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    /// The component must be present.
    Required,
    /// The component must be absent.
    Excluded,
    /// The component may be absent.
    Optional,
}

/// Component data access performed by a designator.
#[derive(Debug, Clone, Copy)]
pub struct Access {
    pub type_id: TypeId,
    pub name: &'static str,
    pub mutable: bool,
}

impl Access {
    fn of<C: 'static>(mutable: bool) -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
            mutable,
        }
    }
}

// ---------------------------------------------------------------------------
// Column -- raw view of one component collection
// ---------------------------------------------------------------------------

/// Pointer pair into a `SlotMap<C>`: the map itself (for key lookups) and
/// its element storage (for yielding references).
pub struct Column<C> {
    id: ComponentTypeId,
    map: *const SlotMap<C>,
    data: *mut C,
}

impl<C> Clone for Column<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Column<C> {}

impl<C: Component> Column<C> {
    fn shared(ecs: &EntityCollection) -> Option<Self> {
        let id = ecs.registry().lookup::<C>()?;
        let map = ecs.collection::<C>(id);
        Some(Self {
            id,
            map: map as *const SlotMap<C>,
            data: map.as_slice().as_ptr().cast_mut(),
        })
    }

    fn exclusive(ecs: &mut EntityCollection) -> Option<Self> {
        let id = ecs.registry().lookup::<C>()?;
        let map = ecs.collection_mut::<C>(id);
        let data = map.as_mut_ptr();
        Some(Self {
            id,
            map: map as *const SlotMap<C>,
            data,
        })
    }

    /// # Safety
    ///
    /// The collection must outlive `'w` and must not be mutated meanwhile.
    unsafe fn position(self, list: &ComponentList) -> Option<usize> {
        let handle: SlotMapHandle = list[self.id.index()];
        (*self.map).position_of(handle)
    }

    /// # Safety
    ///
    /// See [`position`](Self::position).
    unsafe fn get<'w>(self, list: &ComponentList) -> Option<&'w C> {
        let position = self.position(list)?;
        Some(&*self.data.add(position))
    }

    /// # Safety
    ///
    /// See [`position`](Self::position). Additionally the column must have
    /// been built by [`exclusive`](Self::exclusive) and no other reference to
    /// this element may be live.
    unsafe fn get_mut<'w>(self, list: &ComponentList) -> Option<&'w mut C> {
        let position = self.position(list)?;
        Some(&mut *self.data.add(position))
    }
}

// ---------------------------------------------------------------------------
// QueryTerm -- one designator
// ---------------------------------------------------------------------------

/// A single query designator.
pub trait QueryTerm {
    /// Value yielded per matching entity.
    type Item<'w>;
    /// Per-query state captured before iteration.
    type State: Copy;
    const KIND: TermKind;
    const MUTABLE: bool;

    /// Registered id of the designated component, if registered.
    fn component_id(ecs: &EntityCollection) -> Option<ComponentTypeId>;
    /// Component data this designator reads or writes.
    fn access() -> Option<Access>;
    fn prepare(ecs: &EntityCollection) -> Self::State;
    fn prepare_mut(ecs: &mut EntityCollection) -> Self::State {
        Self::prepare(ecs)
    }
    /// Produce the item for one matching entity.
    ///
    /// # Safety
    ///
    /// `state` must come from `prepare`/`prepare_mut` on a collection that is
    /// still borrowed for `'w`, and `data` must belong to an entity matching
    /// the query. Mutable designators must not yield the same element twice.
    unsafe fn fetch<'w>(state: Self::State, data: &EntityData, list: &ComponentList)
        -> Self::Item<'w>;
}

impl<C: Component> QueryTerm for &C {
    type Item<'w> = &'w C;
    type State = Option<Column<C>>;
    const KIND: TermKind = TermKind::Required;
    const MUTABLE: bool = false;

    fn component_id(ecs: &EntityCollection) -> Option<ComponentTypeId> {
        ecs.registry().lookup::<C>()
    }

    fn access() -> Option<Access> {
        Some(Access::of::<C>(false))
    }

    fn prepare(ecs: &EntityCollection) -> Self::State {
        Column::shared(ecs)
    }

    unsafe fn fetch<'w>(state: Self::State, _data: &EntityData, list: &ComponentList) -> &'w C {
        state
            .and_then(|column| column.get(list))
            .expect("entity mask names a component missing from its collection")
    }
}

impl<C: Component> QueryTerm for &mut C {
    type Item<'w> = &'w mut C;
    type State = Option<Column<C>>;
    const KIND: TermKind = TermKind::Required;
    const MUTABLE: bool = true;

    fn component_id(ecs: &EntityCollection) -> Option<ComponentTypeId> {
        ecs.registry().lookup::<C>()
    }

    fn access() -> Option<Access> {
        Some(Access::of::<C>(true))
    }

    fn prepare(_ecs: &EntityCollection) -> Self::State {
        panic!(
            "&mut {} requires EntityCollection::get_with_mut()",
            std::any::type_name::<C>()
        );
    }

    fn prepare_mut(ecs: &mut EntityCollection) -> Self::State {
        Column::exclusive(ecs)
    }

    unsafe fn fetch<'w>(
        state: Self::State,
        _data: &EntityData,
        list: &ComponentList,
    ) -> &'w mut C {
        state
            .and_then(|column| column.get_mut(list))
            .expect("entity mask names a component missing from its collection")
    }
}

impl<C: Component> QueryTerm for Not<C> {
    type Item<'w> = ();
    type State = ();
    const KIND: TermKind = TermKind::Excluded;
    const MUTABLE: bool = false;

    fn component_id(ecs: &EntityCollection) -> Option<ComponentTypeId> {
        ecs.registry().lookup::<C>()
    }

    fn access() -> Option<Access> {
        None
    }

    fn prepare(_ecs: &EntityCollection) -> Self::State {}

    unsafe fn fetch<'w>(
        _state: (),
        _data: &EntityData,
        _list: &ComponentList,
    ) -> Self::Item<'w> {
    }
}

impl<C: Component> QueryTerm for Option<&C> {
    type Item<'w> = Option<&'w C>;
    type State = Option<Column<C>>;
    const KIND: TermKind = TermKind::Optional;
    const MUTABLE: bool = false;

    fn component_id(ecs: &EntityCollection) -> Option<ComponentTypeId> {
        ecs.registry().lookup::<C>()
    }

    fn access() -> Option<Access> {
        Some(Access::of::<C>(false))
    }

    fn prepare(ecs: &EntityCollection) -> Self::State {
        Column::shared(ecs)
    }

    unsafe fn fetch<'w>(
        state: Self::State,
        data: &EntityData,
        list: &ComponentList,
    ) -> Option<&'w C> {
        let column = state?;
        if !data.mask.contains(column.id) {
            return None;
        }
        column.get(list)
    }
}

impl<C: Component> QueryTerm for Option<&mut C> {
    type Item<'w> = Option<&'w mut C>;
    type State = Option<Column<C>>;
    const KIND: TermKind = TermKind::Optional;
    const MUTABLE: bool = true;

    fn component_id(ecs: &EntityCollection) -> Option<ComponentTypeId> {
        ecs.registry().lookup::<C>()
    }

    fn access() -> Option<Access> {
        Some(Access::of::<C>(true))
    }

    fn prepare(_ecs: &EntityCollection) -> Self::State {
        panic!(
            "Option<&mut {}> requires EntityCollection::get_with_mut()",
            std::any::type_name::<C>()
        );
    }

    fn prepare_mut(ecs: &mut EntityCollection) -> Self::State {
        Column::exclusive(ecs)
    }

    unsafe fn fetch<'w>(
        state: Self::State,
        data: &EntityData,
        list: &ComponentList,
    ) -> Option<&'w mut C> {
        let column = state?;
        if !data.mask.contains(column.id) {
            return None;
        }
        column.get_mut(list)
    }
}

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// Inclusion and exclusion masks of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub include: ComponentMask,
    pub exclude: ComponentMask,
}

impl QueryFilter {
    /// Fold one designator in. Returns `None` if the query can never match
    /// (a required component type has never been registered).
    fn add<T: QueryTerm>(&mut self, ecs: &EntityCollection) -> Option<()> {
        let id = T::component_id(ecs);
        match T::KIND {
            TermKind::Required => self.include.insert(id?),
            TermKind::Excluded => {
                if let Some(id) = id {
                    self.exclude.insert(id);
                }
            }
            TermKind::Optional => {}
        }
        Some(())
    }

    #[inline]
    pub fn matches(&self, mask: ComponentMask) -> bool {
        mask.contains_all(self.include) && mask.is_disjoint(self.exclude)
    }
}

/// Panics if a component type is accessed mutably alongside any other access
/// to the same type.
fn validate_no_access_conflicts(accesses: &[Option<Access>]) {
    let accesses: Vec<Access> = accesses.iter().flatten().copied().collect();
    for (i, a) in accesses.iter().enumerate() {
        for b in &accesses[i + 1..] {
            if a.type_id != b.type_id {
                continue;
            }
            if a.mutable && b.mutable {
                panic!(
                    "query contains duplicate mutable access to component '{}'",
                    a.name
                );
            }
            if a.mutable || b.mutable {
                panic!(
                    "query contains overlapping read and mutable access to component '{}'",
                    a.name
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Query -- tuple of designators
// ---------------------------------------------------------------------------

/// A tuple of [`QueryTerm`]s: `(&A,)`, `(&A, Not<B>)`, `(&mut A, Option<&B>)`, ...
pub trait Query {
    type Item<'w>;
    type State: Copy;
    const HAS_MUTABLE: bool;

    /// Masks for matching, or `None` if no entity can match.
    fn filter(ecs: &EntityCollection) -> Option<QueryFilter>;
    /// Panics on conflicting access to one component type.
    fn validate();
    fn prepare(ecs: &EntityCollection) -> Self::State;
    fn prepare_mut(ecs: &mut EntityCollection) -> Self::State;
    /// # Safety
    ///
    /// See [`QueryTerm::fetch`].
    unsafe fn fetch<'w>(state: Self::State, data: &EntityData, list: &ComponentList)
        -> Self::Item<'w>;
}

macro_rules! impl_query_tuple {
    ($($term:ident),+) => {
        impl<$($term: QueryTerm),+> Query for ($($term,)+) {
            type Item<'w> = ($($term::Item<'w>,)+);
            type State = ($($term::State,)+);
            const HAS_MUTABLE: bool = $($term::MUTABLE)||+;

            fn filter(ecs: &EntityCollection) -> Option<QueryFilter> {
                let mut filter = QueryFilter::default();
                $(filter.add::<$term>(ecs)?;)+
                Some(filter)
            }

            fn validate() {
                validate_no_access_conflicts(&[$($term::access()),+]);
            }

            fn prepare(ecs: &EntityCollection) -> Self::State {
                ($($term::prepare(ecs),)+)
            }

            fn prepare_mut(ecs: &mut EntityCollection) -> Self::State {
                ($($term::prepare_mut(ecs),)+)
            }

            #[allow(non_snake_case)]
            unsafe fn fetch<'w>(
                state: Self::State,
                data: &EntityData,
                list: &ComponentList,
            ) -> Self::Item<'w> {
                let ($($term,)+) = state;
                ($(<$term as QueryTerm>::fetch($term, data, list),)+)
            }
        }
    };
}

impl_query_tuple!(A);
impl_query_tuple!(A, B);
impl_query_tuple!(A, B, C);
impl_query_tuple!(A, B, C, D);
impl_query_tuple!(A, B, C, D, E);
impl_query_tuple!(A, B, C, D, E, F);

// ---------------------------------------------------------------------------
// QueryIter
// ---------------------------------------------------------------------------

/// Lazy iterator over `(Entity, Q::Item)` for every matching entity.
pub struct QueryIter<'w, Q: Query> {
    entities: &'w SlotMap<EntityData>,
    lists: &'w SlotMap<ComponentList>,
    filter: Option<QueryFilter>,
    state: Q::State,
    position: usize,
}

impl<'w, Q: Query> QueryIter<'w, Q> {
    pub(crate) fn new(ecs: &'w EntityCollection, filter: Option<QueryFilter>, state: Q::State) -> Self {
        Self {
            entities: ecs.entity_table(),
            lists: ecs.component_list_table(),
            filter,
            state,
            position: 0,
        }
    }
}

impl<'w, Q: Query> Iterator for QueryIter<'w, Q> {
    type Item = (Entity, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter?;
        let entities = self.entities.as_slice();
        while self.position < entities.len() {
            let position = self.position;
            self.position += 1;

            let data = &entities[position];
            if !filter.matches(data.mask) {
                continue;
            }

            let entity = Entity::from_handle(self.entities.make_handle(position));
            let list = &self.lists[data.component_list];
            // Safety: the collection is borrowed for 'w (shared for `get_with`,
            // exclusive for `get_with_mut`), each position is visited once,
            // and access conflicts were rejected before iteration.
            let item = unsafe { Q::fetch(self.state, data, list) };
            return Some((entity, item));
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.filter {
            Some(_) => (0, Some(self.entities.len().saturating_sub(self.position))),
            None => (0, Some(0)),
        }
    }
}
