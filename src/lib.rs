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

//! Archetype ECS core - chunked archetype storage and query dispatch.
//!
//! This crate implements the storage layer of an archetype-based Entity
//! Component System: entities are grouped into archetypes by their exact
//! component signature, each archetype owns fixed-capacity chunked byte
//! buffers laid out for cache locality, and queries are dispatched against
//! a reconciled cache of which archetypes satisfy which signatures.
//!
//! This crate does not schedule systems, serialize worlds, or provide a
//! multithreaded executor - it is the data-storage core those layers would
//! be built on top of.

pub mod archetype;
pub mod bitset;
pub mod component;
pub mod entity;
pub mod error;
pub mod query;
pub mod world;

pub use archetype::Archetype;
pub use bitset::Signature;
pub use component::{Bundle, Component, ComponentId, TypeInfo};
pub use entity::{Entity, EntityId};
pub use error::{EcsError, Result};
pub use query::Fetch;
pub use world::World;
