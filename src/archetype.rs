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

//! Archetype storage: chunked, fixed-block, alignment-sorted column data.
//!
//! Every entity with the same component signature lives in the same
//! [`Archetype`]. Components are packed into a single per-entity "block"
//! whose layout is canonical (sorted descending by `(align, id)` so the
//! widest-aligned component bounds the block's own alignment requirement),
//! and blocks are appended into fixed-capacity chunks. Chunks are never
//! freed individually; removal keeps the block array dense with a
//! swap-back move instead.

use std::alloc::Layout;
use std::ptr::NonNull;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::bitset::Signature;
use crate::component::{Bundle, ComponentId, TypeInfo, MAX_BUNDLE_COMPONENTS};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::query::Fetch;

/// Target size, in bytes, of one storage chunk. Chosen once per archetype;
/// how many entity blocks fit in a chunk depends on the archetype's block
/// size.
pub const MEMORY_CHUNK_SIZE: usize = 100_000;

/// A raw, manually managed, max-aligned allocation.
struct RawBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBuffer {
    fn alloc(size: usize, align: usize) -> Result<Self> {
        let size = size.max(1);
        let align = align.max(1);
        let layout = Layout::from_size_align(size, align).map_err(|_| EcsError::AllocationFailed)?;
        let ptr = unsafe { std::alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Self { ptr, layout }),
            None => Err(EcsError::AllocationFailed),
        }
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// One append-only, fixed-capacity chunk of entity blocks.
struct Chunk {
    buffer: RawBuffer,
}

impl Chunk {
    fn new(block_align: usize) -> Result<Self> {
        Ok(Self {
            buffer: RawBuffer::alloc(MEMORY_CHUNK_SIZE, block_align)?,
        })
    }

    fn block_ptr(&self, local_slot: usize, block_size: usize) -> *mut u8 {
        unsafe { self.buffer.as_ptr().add(local_slot * block_size) }
    }
}

/// The canonical, alignment-sorted layout of one archetype's per-entity block.
struct ArchetypeLayout {
    /// `(type info, byte offset within the block)`, sorted descending by `(align, id)`.
    entries: SmallVec<[(TypeInfo, usize); MAX_BUNDLE_COMPONENTS]>,
    block_size: usize,
    block_align: usize,
}

impl ArchetypeLayout {
    fn build(mut infos: Vec<TypeInfo>) -> Self {
        infos.sort();
        let mut offset = 0usize;
        let mut entries = SmallVec::new();
        for info in &infos {
            entries.push((*info, offset));
            offset += info.size;
        }
        let block_align = infos.first().map(|i| i.align).unwrap_or(1);
        let padding = (block_align - (offset % block_align.max(1))) % block_align.max(1);
        Self {
            entries,
            block_size: offset + padding,
            block_align,
        }
    }

    fn offset_of(&self, id: ComponentId) -> Option<usize> {
        self.entries
            .iter()
            .find(|(info, _)| info.id == id)
            .map(|(_, offset)| *offset)
    }
}

/// Raw bytes for one entity's components, extracted from an archetype.
///
/// Self-describing: it carries the same `(TypeInfo, offset)` entries as the
/// archetype it was extracted from, so a caller can move each component out
/// by id without needing to consult the source archetype again. Every entry
/// must be either moved out (via the vtable's `move_`) or explicitly
/// destroyed (via `drop`) before this value is dropped - dropping it only
/// frees the backing memory, it does not run component destructors.
pub struct ExtractedBytes {
    buffer: RawBuffer,
    entries: SmallVec<[(TypeInfo, usize); MAX_BUNDLE_COMPONENTS]>,
}

impl ExtractedBytes {
    /// The `(TypeInfo, offset)` pairs describing this payload's contents.
    pub fn entries(&self) -> &[(TypeInfo, usize)] {
        &self.entries
    }

    /// Pointer to the component stored at `offset` within this payload.
    ///
    /// # Safety
    /// `offset` must be one of the offsets returned by [`ExtractedBytes::entries`].
    pub unsafe fn component_ptr(&self, offset: usize) -> *mut u8 {
        unsafe { self.buffer.as_ptr().add(offset) }
    }
}

/// Storage for every live entity sharing one exact component signature.
pub struct Archetype {
    signature: Signature,
    layout: ArchetypeLayout,
    chunks: Vec<Chunk>,
    /// Total occupied blocks across all chunks.
    count: usize,
    /// Occupied blocks in the last chunk. Reset to `blocks_per_chunk` when
    /// it underflows to zero, so a chunk vacated by removal is reused
    /// before a new one is allocated - see [`Archetype::remove_slot`].
    count_in_last_chunk: usize,
    /// Dense slot -> entity id, kept parallel to the block array.
    slot_to_entity: Vec<EntityId>,
    /// Reverse of `slot_to_entity`.
    entity_to_slot: FxHashMap<EntityId, usize>,
}

impl Archetype {
    /// Build a new, empty archetype for the given component set.
    ///
    /// `infos` need not be pre-sorted; the canonical layout is computed here.
    pub fn new(signature: Signature, infos: Vec<TypeInfo>) -> Self {
        Self {
            signature,
            layout: ArchetypeLayout::build(infos),
            chunks: Vec::new(),
            count: 0,
            count_in_last_chunk: 0,
            slot_to_entity: Vec::new(),
            entity_to_slot: FxHashMap::default(),
        }
    }

    /// The component signature this archetype stores.
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if no entities are stored.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of chunks currently allocated. Never shrinks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn type_infos(&self) -> impl Iterator<Item = TypeInfo> + '_ {
        self.layout.entries.iter().map(|(info, _)| *info)
    }

    pub(crate) fn offset_of(&self, id: ComponentId) -> Option<usize> {
        self.layout.offset_of(id)
    }

    fn blocks_per_chunk(&self) -> usize {
        MEMORY_CHUNK_SIZE / self.layout.block_size.max(1)
    }

    fn array_index(&self, slot: usize) -> usize {
        slot / self.blocks_per_chunk()
    }

    fn index_in_array(&self, slot: usize) -> usize {
        (slot % self.blocks_per_chunk()) * self.layout.block_size
    }

    fn needs_another_chunk(&self) -> bool {
        self.chunks.is_empty()
            || (self.count_in_last_chunk + 1) * self.layout.block_size > MEMORY_CHUNK_SIZE
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        let chunk = &self.chunks[self.array_index(slot)];
        unsafe { chunk.buffer.as_ptr().add(self.index_in_array(slot)) }
    }

    /// Reserve the next dense slot for `entity`, growing the chunk list if
    /// needed. Returns a pointer to the (uninitialized) start of the block;
    /// the caller is responsible for constructing every component into it.
    pub(crate) fn allocate_slot(&mut self, entity: EntityId) -> Result<(usize, *mut u8)> {
        debug_assert!(
            !self.entity_to_slot.contains_key(&entity),
            "entity already present in archetype"
        );

        if self.needs_another_chunk() {
            self.chunks.push(Chunk::new(self.layout.block_align)?);
            self.count_in_last_chunk = 0;
        }

        let slot = self.count;
        let ptr = self.slot_ptr(slot);

        self.entity_to_slot.insert(entity, slot);
        self.slot_to_entity.push(entity);

        self.count += 1;
        self.count_in_last_chunk += 1;

        Ok((slot, ptr))
    }

    /// Construct a new entity's components in place from `bundle`.
    pub fn emplace_entity<B: Bundle>(&mut self, entity: EntityId, bundle: B) -> Result<usize> {
        let (slot, block) = self.allocate_slot(entity)?;
        let ptrs: SmallVec<[*mut u8; MAX_BUNDLE_COMPONENTS]> = B::type_infos()
            .iter()
            .map(|info| {
                let offset = self
                    .layout
                    .offset_of(info.id)
                    .expect("bundle component missing from archetype layout");
                unsafe { block.add(offset) }
            })
            .collect();
        unsafe { bundle.write_components(&ptrs) };
        Ok(slot)
    }

    /// Move-construct an entity's components from a self-describing payload
    /// whose entries match this archetype's layout exactly (same component
    /// ids and offsets). Used when re-inserting an entity into an archetype
    /// it was just extracted from, unchanged.
    pub fn insert_from_bytes(&mut self, entity: EntityId, bytes: ExtractedBytes) -> Result<usize> {
        let (slot, block) = self.allocate_slot(entity)?;
        for (info, offset) in bytes.entries() {
            let dst = unsafe { block.add(*offset) };
            let src = unsafe { bytes.component_ptr(*offset) };
            unsafe { (info.vtable.move_)(dst, src) };
        }
        Ok(slot)
    }

    /// Get a reference to entity `entity`'s `T` component, if present.
    pub fn get<T: crate::component::Component>(&self, entity: EntityId) -> Option<&T> {
        let slot = *self.entity_to_slot.get(&entity)?;
        let id = crate::component::component_id::<T>();
        let offset = self.layout.offset_of(id)?;
        let ptr = self.slot_ptr(slot);
        Some(unsafe { &*(ptr.add(offset) as *const T) })
    }

    /// Get a mutable reference to entity `entity`'s `T` component, if present.
    pub fn get_mut<T: crate::component::Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let slot = *self.entity_to_slot.get(&entity)?;
        let id = crate::component::component_id::<T>();
        let offset = self.layout.offset_of(id)?;
        let ptr = self.slot_ptr(slot);
        Some(unsafe { &mut *(ptr.add(offset) as *mut T) })
    }

    /// Call `action` once per stored entity with the components `Q` requests.
    ///
    /// Iterates chunk by chunk: every full chunk first, then the partial
    /// tail of the last chunk.
    pub fn for_each<Q: Fetch>(&mut self, action: &mut impl FnMut(Q::Out<'_>)) {
        let offsets: SmallVec<[usize; MAX_BUNDLE_COMPONENTS]> = Q::type_ids()
            .iter()
            .map(|id| {
                self.layout
                    .offset_of(*id)
                    .expect("query signature matched an archetype lacking this component")
            })
            .collect();

        if self.count == 0 {
            return;
        }
        let blocks_per_chunk = self.blocks_per_chunk();
        let full_chunks = self.count / blocks_per_chunk;
        let remainder = self.count % blocks_per_chunk;

        for chunk_index in 0..full_chunks {
            let chunk = &self.chunks[chunk_index];
            for local in 0..blocks_per_chunk {
                let block = chunk.block_ptr(local, self.layout.block_size);
                let out = unsafe { Q::fetch(block, &offsets) };
                action(out);
            }
        }
        if remainder > 0 {
            let chunk = &self.chunks[full_chunks];
            for local in 0..remainder {
                let block = chunk.block_ptr(local, self.layout.block_size);
                let out = unsafe { Q::fetch(block, &offsets) };
                action(out);
            }
        }
    }

    /// Shared swap-back bookkeeping: given the slot just vacated, move the
    /// last occupied slot's entity bookkeeping into it (unless the vacated
    /// slot already was the last one) and shrink the dense arrays.
    ///
    /// Returns the id of the entity that was swapped into `removed_slot`,
    /// if any.
    fn finish_removal(&mut self, removed_slot: usize) -> Option<EntityId> {
        let last_slot = self.count - 1;
        let swapped = if removed_slot != last_slot {
            let last_entity = self.slot_to_entity[last_slot];
            self.entity_to_slot.insert(last_entity, removed_slot);
            self.slot_to_entity[removed_slot] = last_entity;
            Some(last_entity)
        } else {
            None
        };

        self.slot_to_entity.pop();
        self.count -= 1;
        self.count_in_last_chunk -= 1;
        if self.count_in_last_chunk == 0 {
            // The next insertion reuses this chunk from its start rather
            // than allocating a new one.
            self.count_in_last_chunk = self.blocks_per_chunk();
        }
        swapped
    }

    /// Remove `entity`, running every component's destructor, then swap the
    /// last occupied slot into the vacated one to keep storage dense.
    ///
    /// Returns the id of the entity swapped into the vacated slot, if any -
    /// the caller must update that entity's location bookkeeping.
    pub fn remove_slot(&mut self, entity: EntityId) -> Result<Option<EntityId>> {
        let slot = self
            .entity_to_slot
            .remove(&entity)
            .ok_or(EcsError::EntityNotFound)?;
        let block = self.slot_ptr(slot);
        for (info, offset) in &self.layout.entries {
            unsafe { (info.vtable.drop)(block.add(*offset)) };
        }

        let last_slot = self.count - 1;
        if slot != last_slot {
            let last_block = self.slot_ptr(last_slot);
            let dst = self.slot_ptr(slot);
            for (info, offset) in &self.layout.entries {
                unsafe { (info.vtable.move_)(dst.add(*offset), last_block.add(*offset)) };
            }
        }

        Ok(self.finish_removal(slot))
    }

    /// Remove `entity`, move-extracting its components into a
    /// self-describing [`ExtractedBytes`] payload rather than destroying
    /// them, then swap-back as in [`Archetype::remove_slot`].
    ///
    /// Used when an entity is transitioning to a different archetype (an
    /// `add_component`/`remove_component` call) and its surviving
    /// components must be relocated, not destroyed.
    pub fn remove_slot_extracting(&mut self, entity: EntityId) -> Result<(ExtractedBytes, Option<EntityId>)> {
        let slot = self
            .entity_to_slot
            .remove(&entity)
            .ok_or(EcsError::EntityNotFound)?;
        let block = self.slot_ptr(slot);

        let buffer = RawBuffer::alloc(self.layout.block_size, self.layout.block_align)?;
        for (info, offset) in &self.layout.entries {
            let dst = unsafe { buffer.as_ptr().add(*offset) };
            let src = unsafe { block.add(*offset) };
            unsafe { (info.vtable.move_)(dst, src) };
        }

        let last_slot = self.count - 1;
        if slot != last_slot {
            let last_block = self.slot_ptr(last_slot);
            let dst = self.slot_ptr(slot);
            for (info, offset) in &self.layout.entries {
                unsafe { (info.vtable.move_)(dst.add(*offset), last_block.add(*offset)) };
            }
        }

        let swapped = self.finish_removal(slot);
        let extracted = ExtractedBytes {
            buffer,
            entries: self.layout.entries.clone(),
        };
        Ok((extracted, swapped))
    }
}

impl Drop for Archetype {
    fn drop(&mut self) {
        for slot in 0..self.count {
            let block = self.slot_ptr(slot);
            for (info, offset) in &self.layout.entries {
                unsafe { (info.vtable.drop)(block.add(*offset)) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::type_info;

    #[derive(Debug, Clone, Copy)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    fn position_velocity_archetype() -> Archetype {
        let infos = vec![type_info::<Position>(), type_info::<Velocity>()];
        let sig = infos.iter().fold(Signature::EMPTY, |s, i| s.with(i.id));
        Archetype::new(sig, infos)
    }

    #[test]
    fn emplace_then_get_round_trips() {
        let mut arch = position_velocity_archetype();
        let e = EntityId::from_index(0);
        arch.emplace_entity(e, (Position { x: 1.0, y: 2.0 }, Velocity { x: 0.5, y: 0.0 }))
            .unwrap();
        assert_eq!(arch.get::<Position>(e).unwrap().x, 1.0);
        assert_eq!(arch.get::<Velocity>(e).unwrap().x, 0.5);
    }

    #[test]
    fn remove_swaps_last_entity_into_vacated_slot() {
        let mut arch = position_velocity_archetype();
        let e0 = EntityId::from_index(0);
        let e1 = EntityId::from_index(1);
        let e2 = EntityId::from_index(2);
        arch.emplace_entity(e0, (Position { x: 0.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }))
            .unwrap();
        arch.emplace_entity(e1, (Position { x: 1.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }))
            .unwrap();
        arch.emplace_entity(e2, (Position { x: 2.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }))
            .unwrap();

        let swapped = arch.remove_slot(e0).unwrap();
        assert_eq!(swapped, Some(e2));
        assert_eq!(arch.len(), 2);
        assert_eq!(arch.get::<Position>(e2).unwrap().x, 2.0);
        assert_eq!(arch.get::<Position>(e1).unwrap().x, 1.0);
    }

    #[test]
    fn new_chunk_allocated_once_first_is_full() {
        let mut arch = position_velocity_archetype();
        let blocks_per_chunk = arch.blocks_per_chunk();
        for i in 0..blocks_per_chunk {
            arch.emplace_entity(
                EntityId::from_index(i as u32),
                (Position { x: i as f32, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }),
            )
            .unwrap();
        }
        assert_eq!(arch.chunk_count(), 1);
        arch.emplace_entity(
            EntityId::from_index(blocks_per_chunk as u32),
            (Position { x: 99.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }),
        )
        .unwrap();
        assert_eq!(arch.chunk_count(), 2);
    }

    #[test]
    fn zero_component_archetype_tracks_entities_without_storage() {
        let mut arch = Archetype::new(Signature::EMPTY, vec![]);
        let e = EntityId::from_index(0);
        let slot = arch.emplace_entity(e, ()).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(arch.len(), 1);
    }
}
