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

//! Entity identifiers and location metadata.

use crate::bitset::Signature;

/// Maximum number of live entities a single [`crate::world::World`] can hold.
pub const MAX_ENTITIES: usize = 20_000;

/// A plain entity id.
///
/// Ids are dense and reused via a LIFO free list: after
/// [`crate::world::World::remove_entity`], the next `add_entity` call
/// returns an entity whose id equals the one just removed. There is no
/// generation counter - a reused id is indistinguishable from the entity
/// that previously held it, so callers must not retain ids past removal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

impl EntityId {
    pub(crate) fn from_index(index: u32) -> Self {
        EntityId(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

/// An entity handle paired with its component signature at the time it was
/// returned, e.g. from [`crate::world::World::add_entity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub signature: Signature,
}

/// Where an entity's components physically live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntityLocation {
    pub signature: Signature,
    pub archetype_index: usize,
    pub slot: usize,
}
