// Copyright 2023 the orestone authors
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
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{hash_map::Entry, HashMap};

use anyhow::{Context, Result};
use log::info;

use orestone_core::{
    block_id::{BlockError, BlockId},
    constants::blocks::AIR,
    lighting::LIGHT_MAX,
};

/// Definition of a single block type, registered with a [`BlockTypeManager`].
///
/// The fields here drive map behavior only; visuals belong to whatever
/// client-facing layer sits on top of this crate.
pub struct BlockType {
    /// Unique name, conventionally `namespace:name`.
    pub short_name: String,
    /// Whether emitted/diffuse light passes through this block.
    pub allow_light_propagation: bool,
    /// Whether direct sunlight passes through this block *without* diminishing.
    /// Only meaningful when `allow_light_propagation` is also true.
    pub sunlight_propagates: bool,
    /// Light emitted by this block, 0 (none) to [`LIGHT_MAX`].
    pub light_emission: u8,
    /// Whether this block is solid for physics purposes.
    pub solid: bool,
}
impl BlockType {
    /// A block that emits no light and blocks all light, e.g. stone.
    pub fn new_solid_opaque(short_name: impl Into<String>) -> BlockType {
        BlockType {
            short_name: short_name.into(),
            allow_light_propagation: false,
            sunlight_propagates: false,
            light_emission: 0,
            solid: true,
        }
    }
    /// A fully transparent, non-solid block, e.g. air.
    pub fn new_transparent(short_name: impl Into<String>) -> BlockType {
        BlockType {
            short_name: short_name.into(),
            allow_light_propagation: true,
            sunlight_propagates: true,
            light_emission: 0,
            solid: false,
        }
    }
}

/// Manages the set of registered block types and assigns block IDs.
///
/// IDs are dense and stable for the lifetime of the manager; the low 12 bits of
/// a [`BlockId`] carry the variant and do not affect type lookup.
pub struct BlockTypeManager {
    block_types: Vec<BlockType>,
    name_to_base_id_map: HashMap<String, u32>,
    // Separate copies of allow_light_propagation / sunlight_propagates, packed
    // densely in order to be more cache friendly in the lighting hot loops.
    light_propagation: bitvec::vec::BitVec,
    sunlight_propagation: bitvec::vec::BitVec,
}
impl BlockTypeManager {
    /// Creates a manager with `builtin:air` pre-registered as block 0.
    pub fn new() -> BlockTypeManager {
        let mut manager = BlockTypeManager {
            block_types: Vec::new(),
            name_to_base_id_map: HashMap::new(),
            light_propagation: bitvec::vec::BitVec::new(),
            sunlight_propagation: bitvec::vec::BitVec::new(),
        };
        manager
            .register_block(BlockType::new_transparent(AIR))
            .expect("air registration cannot fail on an empty manager");
        manager
    }

    /// Registers a new block and returns its ID (variant bits zero).
    ///
    /// Returns an error if another block is already registered with the same
    /// short name, or if there are too many block types (up to roughly one
    /// million can be registered).
    pub fn register_block(&mut self, block: BlockType) -> Result<BlockId> {
        let id = match self.name_to_base_id_map.entry(block.short_name.clone()) {
            Entry::Occupied(_) => {
                return Err(BlockError::NameAlreadyExists(block.short_name).into());
            }
            Entry::Vacant(x) => {
                let new_id = BlockId(
                    (self.block_types.len() << 12)
                        .try_into()
                        .with_context(|| BlockError::TooManyBlocks)?,
                );
                info!(
                    "Registering new block {} as {:?}",
                    block.short_name, new_id
                );
                self.light_propagation.push(block.allow_light_propagation);
                self.sunlight_propagation
                    .push(block.allow_light_propagation && block.sunlight_propagates);
                self.block_types.push(block);
                x.insert(new_id.base_id());
                new_id
            }
        };
        Ok(id)
    }

    pub fn get_block(&self, id: BlockId) -> Result<&BlockType> {
        self.block_types
            .get(id.index())
            .with_context(|| BlockError::IdNotFound(id.into()))
    }

    pub fn get_by_name(&self, short_name: &str) -> Option<BlockId> {
        self.name_to_base_id_map
            .get(short_name)
            .map(|x| BlockId(*x))
    }

    #[inline]
    pub(crate) fn allows_light_propagation(&self, id: BlockId) -> bool {
        if id.index() < self.light_propagation.len() {
            self.light_propagation[id.index()]
        } else {
            // unknown blocks don't propagate light
            false
        }
    }

    #[inline]
    pub(crate) fn sunlight_propagates(&self, id: BlockId) -> bool {
        if id.index() < self.sunlight_propagation.len() {
            self.sunlight_propagation[id.index()]
        } else {
            false
        }
    }

    #[inline]
    pub(crate) fn light_emission(&self, id: BlockId) -> u8 {
        match self.block_types.get(id.index()) {
            Some(x) => x.light_emission.min(LIGHT_MAX),
            None => 0,
        }
    }
}
impl Default for BlockTypeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_is_block_zero() {
        let manager = BlockTypeManager::new();
        assert_eq!(manager.get_by_name(AIR), Some(BlockId(0)));
        assert!(manager.allows_light_propagation(BlockId(0)));
        assert!(manager.sunlight_propagates(BlockId(0)));
    }

    #[test]
    fn test_register_and_lookup() {
        let mut manager = BlockTypeManager::new();
        let stone = manager
            .register_block(BlockType::new_solid_opaque("test:stone"))
            .unwrap();
        assert_eq!(stone.index(), 1);
        assert_eq!(manager.get_by_name("test:stone"), Some(stone));
        assert!(!manager.allows_light_propagation(stone));
        assert!(manager
            .register_block(BlockType::new_solid_opaque("test:stone"))
            .is_err());
    }

    #[test]
    fn test_unknown_ids_are_opaque() {
        let manager = BlockTypeManager::new();
        let bogus = BlockId(0xffff_f000);
        assert!(!manager.allows_light_propagation(bogus));
        assert!(!manager.sunlight_propagates(bogus));
        assert_eq!(manager.light_emission(bogus), 0);
    }
}
