// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The top-level entity/archetype/query index.

use ahash::AHashMap;
#[cfg(feature = "profiling")]
use tracing::debug;

use crate::archetype::Archetype;
use crate::bitset::Signature;
use crate::component::{component_id, type_info, Bundle, Component};
use crate::entity::{Entity, EntityId, EntityLocation, MAX_ENTITIES};
use crate::error::{EcsError, Result};
use crate::query::{Fetch, QueryCache};

/// Owns every archetype, the entity table, and the query-subset cache.
pub struct World {
    archetypes: Vec<Archetype>,
    archetype_index: AHashMap<Signature, usize>,
    entities: Vec<Option<EntityLocation>>,
    free_ids: Vec<EntityId>,
    query_cache: QueryCache,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create an empty world.
    pub fn new() -> Self {
        Self {
            archetypes: Vec::new(),
            archetype_index: AHashMap::default(),
            entities: Vec::new(),
            free_ids: Vec::new(),
            query_cache: QueryCache::default(),
        }
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.iter().filter(|e| e.is_some()).count()
    }

    /// Number of archetypes currently created.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    fn location(&self, id: EntityId) -> Result<EntityLocation> {
        self.entities
            .get(id.index())
            .and_then(|slot| *slot)
            .ok_or(EcsError::EntityNotFound)
    }

    fn allocate_id(&mut self) -> Result<EntityId> {
        if let Some(id) = self.free_ids.pop() {
            return Ok(id);
        }
        if self.entities.len() >= MAX_ENTITIES {
            return Err(EcsError::EntityCapacityExceeded {
                capacity: MAX_ENTITIES,
            });
        }
        let id = EntityId::from_index(self.entities.len() as u32);
        self.entities.push(None);
        Ok(id)
    }

    fn get_or_create_archetype(&mut self, signature: Signature, infos: Vec<crate::component::TypeInfo>) -> usize {
        if let Some(&index) = self.archetype_index.get(&signature) {
            return index;
        }
        let archetype = Archetype::new(signature, infos);
        self.archetypes.push(archetype);
        let index = self.archetypes.len() - 1;
        self.archetype_index.insert(signature, index);
        self.query_cache.introduce(signature);
        #[cfg(feature = "profiling")]
        debug!(?signature, index, "created archetype");
        index
    }

    /// Spawn a new entity with the given component bundle.
    pub fn add_entity<B: Bundle>(&mut self, bundle: B) -> Result<Entity> {
        let infos = B::type_infos();
        let signature = infos.iter().fold(Signature::EMPTY, |s, i| s.with(i.id));
        let id = self.allocate_id()?;
        let archetype_index = self.get_or_create_archetype(signature, infos.into_vec());
        let slot = self.archetypes[archetype_index].emplace_entity(id, bundle)?;
        self.entities[id.index()] = Some(EntityLocation {
            signature,
            archetype_index,
            slot,
        });
        Ok(Entity { id, signature })
    }

    /// Remove an entity and destroy every component it carries.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<()> {
        let location = self.location(id)?;
        self.entities[id.index()] = None;
        let archetype = &mut self.archetypes[location.archetype_index];
        if let Some(swapped) = archetype.remove_slot(id)? {
            if let Some(loc) = self.entities[swapped.index()].as_mut() {
                loc.slot = location.slot;
            }
        }
        self.free_ids.push(id);
        Ok(())
    }

    /// True if `id` is live and carries a `T` component.
    pub fn has<T: Component>(&self, id: EntityId) -> bool {
        match self.location(id) {
            Ok(loc) => loc.signature.contains(component_id::<T>()),
            Err(_) => false,
        }
    }

    /// Borrow entity `id`'s `T` component.
    pub fn get<T: Component>(&self, id: EntityId) -> Result<&T> {
        let location = self.location(id)?;
        self.archetypes[location.archetype_index]
            .get::<T>(id)
            .ok_or(EcsError::ComponentNotFound)
    }

    /// Mutably borrow entity `id`'s `T` component.
    pub fn get_mut<T: Component>(&mut self, id: EntityId) -> Result<&mut T> {
        let location = self.location(id)?;
        self.archetypes[location.archetype_index]
            .get_mut::<T>(id)
            .ok_or(EcsError::ComponentNotFound)
    }

    /// Add a `T` component to `id`, moving it into the archetype for its new
    /// signature. Errors if `id` already carries `T`.
    pub fn add_component<T: Component>(&mut self, id: EntityId, value: T) -> Result<()> {
        let location = self.location(id)?;
        let new_component = component_id::<T>();
        if location.signature.contains(new_component) {
            return Err(EcsError::ComponentAlreadyPresent);
        }

        let old_archetype = &mut self.archetypes[location.archetype_index];
        let (bytes, swapped) = old_archetype.remove_slot_extracting(id)?;
        if let Some(swapped_id) = swapped {
            if let Some(loc) = self.entities[swapped_id.index()].as_mut() {
                loc.slot = location.slot;
            }
        }

        let new_signature = location.signature.with(new_component);
        let mut new_infos: Vec<_> = bytes.entries().iter().map(|(info, _)| *info).collect();
        new_infos.push(type_info::<T>());
        let new_index = self.get_or_create_archetype(new_signature, new_infos);

        let new_archetype = &mut self.archetypes[new_index];
        let (new_slot, block) = new_archetype.allocate_slot(id)?;
        for (info, src_offset) in bytes.entries() {
            let dst_offset = new_archetype
                .offset_of(info.id)
                .expect("surviving component missing from new archetype");
            let src = unsafe { bytes.component_ptr(*src_offset) };
            unsafe { (info.vtable.move_)(block.add(dst_offset), src) };
        }
        let new_offset = new_archetype
            .offset_of(new_component)
            .expect("newly added component missing from new archetype");
        unsafe { std::ptr::write(block.add(new_offset) as *mut T, value) };

        self.entities[id.index()] = Some(EntityLocation {
            signature: new_signature,
            archetype_index: new_index,
            slot: new_slot,
        });
        Ok(())
    }

    /// Remove `id`'s `T` component, moving it into the archetype for its new
    /// (smaller) signature. Errors if `id` does not carry `T`.
    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> Result<()> {
        let location = self.location(id)?;
        let removed = component_id::<T>();
        if !location.signature.contains(removed) {
            return Err(EcsError::ComponentNotFound);
        }

        let old_archetype = &mut self.archetypes[location.archetype_index];
        let (bytes, swapped) = old_archetype.remove_slot_extracting(id)?;
        if let Some(swapped_id) = swapped {
            if let Some(loc) = self.entities[swapped_id.index()].as_mut() {
                loc.slot = location.slot;
            }
        }

        let new_signature = location.signature.without(removed);
        let new_infos: Vec<_> = bytes
            .entries()
            .iter()
            .map(|(info, _)| *info)
            .filter(|info| info.id != removed)
            .collect();
        let new_index = self.get_or_create_archetype(new_signature, new_infos);

        let new_archetype = &mut self.archetypes[new_index];
        let (new_slot, block) = new_archetype.allocate_slot(id)?;
        for (info, src_offset) in bytes.entries() {
            let src = unsafe { bytes.component_ptr(*src_offset) };
            if info.id == removed {
                unsafe { (info.vtable.drop)(src) };
                continue;
            }
            let dst_offset = new_archetype
                .offset_of(info.id)
                .expect("surviving component missing from new archetype");
            unsafe { (info.vtable.move_)(block.add(dst_offset), src) };
        }

        self.entities[id.index()] = Some(EntityLocation {
            signature: new_signature,
            archetype_index: new_index,
            slot: new_slot,
        });
        Ok(())
    }

    /// Invoke `action` once for every entity whose signature is a superset
    /// of `Q`'s, passing the `Q`-requested components as mutable references.
    pub fn for_each<Q: Fetch>(&mut self, mut action: impl FnMut(Q::Out<'_>)) {
        let signature = Q::signature();
        self.query_cache.introduce(signature);
        let matching: Vec<Signature> = self
            .query_cache
            .matches(signature)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for candidate in matching {
            if let Some(&archetype_index) = self.archetype_index.get(&candidate) {
                self.archetypes[archetype_index].for_each::<Q>(&mut action);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(i32);

    #[test]
    fn add_then_remove_entity_reuses_id() -> Result<()> {
        let mut world = World::new();
        let e0 = world.add_entity((Position { x: 0.0, y: 0.0 },))?;
        let e1 = world.add_entity((Position { x: 1.0, y: 0.0 },))?;
        let e2 = world.add_entity((Position { x: 2.0, y: 0.0 },))?;
        let e3 = world.add_entity((Position { x: 3.0, y: 0.0 },))?;
        assert_eq!(e0.id.index(), 0);
        assert_eq!(e1.id.index(), 1);
        assert_eq!(e2.id.index(), 2);
        assert_eq!(e3.id.index(), 3);

        world.remove_entity(e1.id)?;
        let e4 = world.add_entity((Position { x: 9.0, y: 0.0 },))?;
        assert_eq!(e4.id, e1.id);

        let e5 = world.add_entity((Position { x: 10.0, y: 0.0 },))?;
        assert_eq!(e5.id.index(), 4);
        Ok(())
    }

    #[test]
    fn add_component_preserves_sibling_values() -> Result<()> {
        let mut world = World::new();
        let e = world.add_entity((Health(10), Position { x: 1.0, y: 2.0 }))?;
        world.add_component(e.id, Velocity { x: 5.0, y: 5.0 })?;
        assert_eq!(*world.get::<Health>(e.id)?, Health(10));
        assert_eq!(*world.get::<Position>(e.id)?, Position { x: 1.0, y: 2.0 });
        assert_eq!(*world.get::<Velocity>(e.id)?, Velocity { x: 5.0, y: 5.0 });
        Ok(())
    }

    #[test]
    fn remove_component_preserves_sibling_values_and_drops_removed() -> Result<()> {
        let mut world = World::new();
        let e = world.add_entity((Health(7), Position { x: 1.0, y: 2.0 }))?;
        world.remove_component::<Health>(e.id)?;
        assert!(!world.has::<Health>(e.id));
        assert_eq!(*world.get::<Position>(e.id)?, Position { x: 1.0, y: 2.0 });
        Ok(())
    }

    #[test]
    fn for_each_dispatches_to_every_superset_archetype() -> Result<()> {
        let mut world = World::new();
        world.add_entity((Health(1), Position { x: 0.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }))?;
        world.add_entity((Health(1), Position { x: 0.0, y: 0.0 }))?;
        world.add_entity((Health(1), Velocity { x: 0.0, y: 0.0 }))?;
        world.add_entity((Health(1), Position { x: 0.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }))?;

        let mut count = 0;
        world.for_each::<(Position, Velocity)>(|(_, _)| count += 1);
        assert_eq!(count, 2);

        let mut count = 0;
        world.for_each::<(Position,)>(|(_,)| count += 1);
        assert_eq!(count, 3);
        Ok(())
    }
}
