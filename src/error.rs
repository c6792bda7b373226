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

//! Error types

use std::fmt;

/// ECS error type
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity id does not refer to a live entity
    EntityNotFound,

    /// Entity does not carry the requested component
    ComponentNotFound,

    /// Entity already carries the component being added
    ComponentAlreadyPresent,

    /// The entity table is full and no free id could be reused
    EntityCapacityExceeded { capacity: usize },

    /// A bundle or signature named more distinct component types than
    /// the fixed-width signature can represent
    ComponentRegistryExhausted { limit: usize },

    /// Chunk or block allocation failed
    AllocationFailed,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "entity not found"),
            EcsError::ComponentNotFound => write!(f, "component not found on entity"),
            EcsError::ComponentAlreadyPresent => write!(f, "entity already has this component"),
            EcsError::EntityCapacityExceeded { capacity } => {
                write!(f, "entity capacity exceeded: max is {capacity}")
            }
            EcsError::ComponentRegistryExhausted { limit } => {
                write!(f, "component registry exhausted: limit is {limit} distinct types")
            }
            EcsError::AllocationFailed => write!(f, "chunk allocation failed"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
