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

//! Query dispatch and the archetype-subset cache.
//!
//! A query names a tuple of component types to fetch mutably, e.g.
//! `(Position, Velocity)`. [`Fetch`] describes how to turn a raw block
//! pointer plus per-component offsets into borrowed references, and
//! [`QueryCache`] remembers, for every signature ever introduced (whether
//! it came from a query or from creating an archetype), which archetypes
//! satisfy it - so repeated dispatch of the same query never re-scans
//! every archetype for a subset check.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

use crate::bitset::Signature;
use crate::component::{component_id, Component, ComponentId, MAX_BUNDLE_COMPONENTS};

/// A tuple of component types that can be fetched mutably from an archetype
/// block. Implemented for tuples of up to [`MAX_BUNDLE_COMPONENTS`] types.
pub trait Fetch {
    /// The borrowed tuple this query yields for one entity.
    type Out<'a>;

    /// Component ids this query requires, in the same order `fetch` expects offsets.
    fn type_ids() -> SmallVec<[ComponentId; MAX_BUNDLE_COMPONENTS]>;

    /// The signature formed by the union of [`Fetch::type_ids`].
    fn signature() -> Signature {
        Self::type_ids()
            .into_iter()
            .fold(Signature::EMPTY, |sig, id| sig.with(id))
    }

    /// Build the output tuple from a block pointer and matching per-component offsets.
    ///
    /// # Safety
    /// `block` must point to a valid, live entity block in an archetype
    /// whose signature is a superset of `Self::signature()`, and `offsets`
    /// must contain this archetype's byte offset for each id in
    /// [`Fetch::type_ids`], in the same order.
    unsafe fn fetch<'a>(block: *mut u8, offsets: &[usize]) -> Self::Out<'a>;
}

macro_rules! impl_fetch {
    ($($T:ident),+) => {
        impl<$($T: Component),+> Fetch for ($($T,)+) {
            type Out<'a> = ($(&'a mut $T,)+);

            fn type_ids() -> SmallVec<[ComponentId; MAX_BUNDLE_COMPONENTS]> {
                smallvec::smallvec![$(component_id::<$T>()),+]
            }

            #[allow(non_snake_case)]
            unsafe fn fetch<'a>(block: *mut u8, offsets: &[usize]) -> Self::Out<'a> {
                let mut i = 0;
                $(
                    let $T = unsafe { &mut *(block.add(offsets[i]) as *mut $T) };
                    i += 1;
                )+
                let _ = i;
                ($($T,)+)
            }
        }
    };
}

impl_fetch!(A);
impl_fetch!(A, B);
impl_fetch!(A, B, C);
impl_fetch!(A, B, C, D);
impl_fetch!(A, B, C, D, E);
impl_fetch!(A, B, C, D, E, F);
impl_fetch!(A, B, C, D, E, F, G);
impl_fetch!(A, B, C, D, E, F, G, H);

/// Reconciled cache of which archetype signatures satisfy which query (or
/// archetype) signatures.
///
/// Every signature ever introduced - by creating an archetype or by
/// dispatching a query - becomes a key. Introducing a new signature `S`
/// checks it against every signature already known: whichever side is the
/// subset of the other gets the other recorded into its match set. Because
/// every archetype signature is itself introduced through this same path,
/// a single generalized pass over existing keys subsumes having to also
/// special-case "existing archetypes" separately.
#[derive(Default)]
pub(crate) struct QueryCache {
    entries: AHashMap<Signature, AHashSet<Signature>>,
}

impl QueryCache {
    /// Register `signature` if it hasn't been seen before, reconciling it
    /// bidirectionally against every signature already known. A no-op if
    /// `signature` was already introduced.
    pub fn introduce(&mut self, signature: Signature) {
        if self.entries.contains_key(&signature) {
            return;
        }
        let known: Vec<Signature> = self.entries.keys().copied().collect();
        let mut own = AHashSet::default();
        own.insert(signature); // a signature trivially satisfies itself
        self.entries.insert(signature, own);
        for other in known {
            if other.is_subset_of(signature) {
                self.entries.get_mut(&other).unwrap().insert(signature);
            }
            if signature.is_subset_of(other) {
                self.entries.get_mut(&signature).unwrap().insert(other);
            }
        }
    }

    /// Signatures known to satisfy `signature`, if it has been introduced.
    pub fn matches(&self, signature: Signature) -> Option<&AHashSet<Signature>> {
        self.entries.get(&signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::component_id;

    #[derive(Debug, Clone, Copy)]
    struct A;
    #[derive(Debug, Clone, Copy)]
    struct B;
    #[derive(Debug, Clone, Copy)]
    struct C;

    fn sig(ids: &[ComponentId]) -> Signature {
        ids.iter().fold(Signature::EMPTY, |s, &id| s.with(id))
    }

    #[test]
    fn archetype_matches_query_subset() {
        let a = component_id::<A>();
        let b = component_id::<B>();
        let c = component_id::<C>();

        let mut cache = QueryCache::default();
        let abc = sig(&[a, b, c]);
        let ab = sig(&[a, b]);
        let ac = sig(&[a, c]);

        cache.introduce(abc);
        cache.introduce(ab);
        cache.introduce(ac);

        let query_ab = sig(&[a, b]);
        cache.introduce(query_ab);
        let matches = cache.matches(query_ab).unwrap();
        assert!(matches.contains(&abc));
        assert!(matches.contains(&ab));
        assert!(!matches.contains(&ac));
    }

    #[test]
    fn introducing_twice_is_idempotent() {
        let a = component_id::<A>();
        let mut cache = QueryCache::default();
        let s = sig(&[a]);
        cache.introduce(s);
        cache.introduce(s);
        assert_eq!(cache.matches(s).unwrap().len(), 1);
    }
}
