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

//! Component registration and type-erased layout descriptors.
//!
//! Components are data attached to entities. To store arbitrary component
//! types behind raw byte pointers, every registered type gets a
//! [`TypeInfo`]: its size, its alignment, and a [`ComponentVTable`] of
//! `copy`/`move`/`drop` functions the storage layer can call without
//! knowing the concrete type.

use std::any::TypeId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

use ahash::AHashMap;
use smallvec::{smallvec, SmallVec};

use crate::bitset::MAX_COMPONENTS;
use crate::error::{EcsError, Result};

/// Maximum number of components supported by a single Bundle
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// A dense component id assigned the first time a type is registered.
///
/// Ids are assigned in registration order starting at zero and are never
/// reused across types; they index directly into a [`crate::bitset::Signature`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    pub(crate) fn from_index(index: u32) -> Self {
        ComponentId(index)
    }

    /// The dense index of this id, in `0..MAX_COMPONENTS`.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Marker trait for component types.
///
/// Components must be `'static` (no borrowed data) and `Clone` - the
/// storage layer needs a copy-construct primitive for operations like
/// duplicating an entity's components without consuming the original.
pub trait Component: 'static + Send + Sync + Clone {}

impl<T: 'static + Send + Sync + Clone> Component for T {}

/// Type-erased `copy` / `move` / `drop` operations for one component type.
///
/// All three functions operate on raw, possibly-unaligned-relative byte
/// offsets within an archetype's chunk storage; callers are responsible for
/// passing pointers that are valid and correctly aligned for the type the
/// vtable was built for.
pub struct ComponentVTable {
    /// Copy-construct the value at `src` into the uninitialized memory at `dst`.
    pub copy: unsafe fn(dst: *mut u8, src: *const u8),
    /// Move-construct the value at `src` into the uninitialized memory at
    /// `dst`. The memory at `src` is logically uninitialized afterwards;
    /// the destructor must not be run on it again.
    pub move_: unsafe fn(dst: *mut u8, src: *mut u8),
    /// Run the destructor of the value at `ptr` in place.
    pub drop: unsafe fn(ptr: *mut u8),
}

unsafe fn copy_fn<T: Component>(dst: *mut u8, src: *const u8) {
    let value = unsafe { (*(src as *const T)).clone() };
    unsafe { std::ptr::write(dst as *mut T, value) };
}

unsafe fn move_fn<T: Component>(dst: *mut u8, src: *mut u8) {
    let value = unsafe { std::ptr::read(src as *const T) };
    unsafe { std::ptr::write(dst as *mut T, value) };
}

unsafe fn drop_fn<T: Component>(ptr: *mut u8) {
    unsafe { std::ptr::drop_in_place(ptr as *mut T) };
}

trait HasVTable {
    const VTABLE: ComponentVTable;
}

impl<T: Component> HasVTable for T {
    const VTABLE: ComponentVTable = ComponentVTable {
        copy: copy_fn::<T>,
        move_: move_fn::<T>,
        drop: drop_fn::<T>,
    };
}

/// Size, alignment and vtable for one registered component type.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    pub id: ComponentId,
    pub size: usize,
    pub align: usize,
    pub vtable: &'static ComponentVTable,
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    /// Descending by `(alignment, id)` - canonical archetype layout order.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .align
            .cmp(&self.align)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

static NEXT_COMPONENT_ID: AtomicU32 = AtomicU32::new(0);
static REGISTRY: OnceLock<Mutex<AHashMap<TypeId, ComponentId>>> = OnceLock::new();

fn registry() -> &'static Mutex<AHashMap<TypeId, ComponentId>> {
    REGISTRY.get_or_init(|| Mutex::new(AHashMap::default()))
}

/// Register `T`, returning its stable [`ComponentId`].
///
/// The first call for a given `T` assigns a fresh id; every later call
/// returns the same id. Panics are avoided in favor of [`EcsError`] when the
/// registry runs out of ids - see [`MAX_COMPONENTS`].
pub fn try_component_id<T: Component>() -> Result<ComponentId> {
    let type_id = TypeId::of::<T>();
    let mut map = registry().lock().expect("component registry poisoned");
    if let Some(&id) = map.get(&type_id) {
        return Ok(id);
    }
    let next = NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed);
    if next as usize >= MAX_COMPONENTS {
        NEXT_COMPONENT_ID.fetch_sub(1, Ordering::Relaxed);
        return Err(EcsError::ComponentRegistryExhausted {
            limit: MAX_COMPONENTS,
        });
    }
    let id = ComponentId(next);
    map.insert(type_id, id);
    Ok(id)
}

/// Register `T`, returning its stable [`ComponentId`].
///
/// # Panics
/// Panics if the registry has exhausted [`MAX_COMPONENTS`] distinct types.
/// Prefer [`try_component_id`] where that condition must be handled as a
/// recoverable error.
pub fn component_id<T: Component>() -> ComponentId {
    try_component_id::<T>().expect("component registry exhausted")
}

/// Build the [`TypeInfo`] describing `T`, registering it if necessary.
pub fn type_info<T: Component>() -> TypeInfo {
    TypeInfo {
        id: component_id::<T>(),
        size: std::mem::size_of::<T>(),
        align: std::mem::align_of::<T>(),
        vtable: &<T as HasVTable>::VTABLE,
    }
}

/// A fixed-size group of components spawned onto a single entity at once.
///
/// Implemented for tuples of up to [`MAX_BUNDLE_COMPONENTS`] component types.
pub trait Bundle: Send + Sync + 'static {
    /// [`TypeInfo`] for every component in the bundle, in declaration order.
    fn type_infos() -> SmallVec<[TypeInfo; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Move-construct every component of `self` into the destination
    /// pointers, which must be valid, correctly aligned, and uninitialized.
    ///
    /// `ptrs[i]` corresponds to the `i`-th entry returned by [`Bundle::type_infos`].
    ///
    /// # Safety
    /// Caller must ensure every pointer is valid, properly aligned for the
    /// corresponding component type, and currently uninitialized.
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn type_infos() -> SmallVec<[TypeInfo; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(type_info::<$T>()),*]
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    unsafe { std::ptr::write(ptrs[i] as *mut $T, $T) };
                    i += 1;
                )*
                let _ = i;
            }
        }
    };
}

impl Bundle for () {
    fn type_infos() -> SmallVec<[TypeInfo; MAX_BUNDLE_COMPONENTS]> {
        smallvec![]
    }

    unsafe fn write_components(self, _ptrs: &[*mut u8]) {}
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    #![allow(dead_code)]
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy)]
    struct Velocity {
        x: f32,
    }

    #[test]
    fn single_component_bundle() {
        let infos = <(Position,)>::type_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, component_id::<Position>());
    }

    #[test]
    fn multiple_component_bundle() {
        let infos = <(Position, Velocity)>::type_infos();
        assert_eq!(infos.len(), 2);
    }

    #[test]
    fn component_id_is_stable_across_calls() {
        #[derive(Debug, Clone, Copy)]
        struct Marker;
        let a = component_id::<Marker>();
        let b = component_id::<Marker>();
        assert_eq!(a, b);
    }

    #[test]
    fn type_info_sorts_descending_by_align_then_id() {
        #[derive(Debug, Clone, Copy)]
        struct Small(u8);
        #[derive(Debug, Clone, Copy)]
        struct Big(u64);

        let mut infos = vec![type_info::<Small>(), type_info::<Big>()];
        infos.sort();
        assert!(infos[0].align >= infos[1].align);
    }
}
