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

//! Per-column sunlight propagation within a single chunk.
//!
//! Sunlight is the day-bank light that enters from the sky and travels
//! straight down. Within a column it stays at full strength while it only
//! passes through sunlight-propagating nodes; the first node that merely
//! propagates light starts diminishing it, and the first node that blocks
//! light zeroes the rest of the column. Horizontal diffusion of the
//! resulting values is handled separately by the light spread.

use orestone_core::{
    coordinates::{BlockCoordinate, ChunkOffset},
    lighting::{diminish_light, LightBank, LIGHT_SUN},
};
use rustc_hash::FxHashSet;

use super::{blocks::BlockTypeManager, game_map::MapChunk};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RelightMode {
    /// Written values never decrease. Used when lighting a freshly generated
    /// or loaded chunk, where stored values are a valid lower bound.
    KeepBrighter,
    /// Overwrite the day bank with pure sunlight values, discarding stale
    /// diffuse contributions so they can be re-spread afterwards.
    RemoveAndRecompute,
}

pub(crate) struct SunlightOutcome {
    /// False when the bottom row disagrees with the chunk below about whether
    /// sunlight continues downward, or when the chunk below could not be
    /// consulted. The caller should revisit the chunk below.
    pub(crate) bottom_valid: bool,
    /// True when some light-propagating node ended the pass with zero
    /// daylight. Such nodes may still receive light from the sides.
    pub(crate) dark_air_left: bool,
}

/// One-node-deep view of the chunks vertically adjacent to the one being
/// relit. Implementations sample under their own locks; the sunlight pass
/// itself never touches another chunk.
pub(crate) trait VerticalNeighbors {
    /// Day-bank light of the node directly above the chunk top at this
    /// column, or None if that chunk is not available.
    fn above_day_light(&self, x: u8, z: u8) -> Option<u8>;
    /// Day-bank light and light-propagation flag of the node directly below
    /// the chunk bottom, or None if that chunk is not available.
    fn below_day_light(&self, x: u8, z: u8) -> Option<(u8, bool)>;
}

/// Recomputes the day-bank sunlight of every column of `chunk`.
///
/// Nodes whose post-pass value can still light a neighbor are added to
/// `light_sources` for a subsequent spread.
pub(crate) fn propagate_sunlight(
    chunk: &mut MapChunk,
    block_types: &BlockTypeManager,
    neighbors: &impl VerticalNeighbors,
    mode: RelightMode,
    light_sources: &mut FxHashSet<BlockCoordinate>,
) -> SunlightOutcome {
    let remove_light = mode == RelightMode::RemoveAndRecompute;
    let mut bottom_valid = true;
    let mut dark_air_left = false;

    for x in 0..16u8 {
        for z in 0..16u8 {
            let no_sunlight = match neighbors.above_day_light(x, z) {
                Some(day) => day != LIGHT_SUN,
                None => {
                    if chunk.is_underground {
                        true
                    } else {
                        // No chunk above and not underground. Assume full sun
                        // unless the topmost node already blocks it.
                        let top = chunk.get_block(ChunkOffset::new(x, 15, z));
                        !block_types.sunlight_propagates(top)
                    }
                }
            };

            let mut current_light = if no_sunlight { 0 } else { LIGHT_SUN };
            for y in (0..16u8).rev() {
                let offset = ChunkOffset::new(x, y, z);
                let id = chunk.get_block(offset);
                if current_light == 0 {
                    // Stays dark the rest of the way down.
                } else if current_light == LIGHT_SUN && block_types.sunlight_propagates(id) {
                    // Full sunlight passes through undiminished.
                } else if !block_types.allows_light_propagation(id) {
                    current_light = 0;
                } else {
                    current_light = diminish_light(current_light);
                }

                let old_light = chunk.get_light(offset).get(LightBank::Day);
                if current_light > old_light || remove_light {
                    let mut light = chunk.get_light(offset);
                    light.set(LightBank::Day, current_light);
                    chunk.set_light(offset, light);
                }

                if diminish_light(current_light) != 0 {
                    light_sources.insert(chunk.coord().with_offset(offset));
                }
                if current_light == 0 && block_types.allows_light_propagation(id) {
                    dark_air_left = true;
                }
            }

            // Whether sunlight, as computed here, should continue into the
            // chunk below. Compare against what that chunk currently holds;
            // if it cannot be consulted, the boundary cannot be trusted.
            let sunlight_should_go_down = current_light == LIGHT_SUN;
            match neighbors.below_day_light(x, z) {
                Some((below_day, below_propagates)) => {
                    if below_propagates {
                        if sunlight_should_go_down && below_day != LIGHT_SUN {
                            bottom_valid = false;
                        } else if !sunlight_should_go_down && below_day == LIGHT_SUN {
                            bottom_valid = false;
                        }
                    }
                }
                None => bottom_valid = false,
            }
        }
    }

    SunlightOutcome {
        bottom_valid,
        dark_air_left,
    }
}
