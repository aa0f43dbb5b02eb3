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

//! Light primitives shared between engine components: the packed per-node
//! light banks, the decode/blend functions, and the general multi-source
//! spread used for torches and light removal.

mod tests;

use crate::block_id::BlockId;
use crate::coordinates::ChunkOffset;

/// Stored light level meaning "direct, unattenuated sunlight".
pub const LIGHT_SUN: u8 = 15;
/// Largest stored light level an ordinary light source can emit.
pub const LIGHT_MAX: u8 = 14;

/// Stored-level to display-brightness lookup. Deliberately biased toward a
/// brighter low end rather than linear or geometric; index 14 (and the
/// clamped index for [LIGHT_SUN]) maps to full brightness.
const LIGHT_DECODE_TABLE: [u8; (LIGHT_MAX as usize) + 1] = [
    8, 11, 14, 18, 22, 29, 37, 47, 60, 76, 97, 123, 157, 200, 255,
];

/// Converts a stored light value in [0, 15] to a display brightness in [0, 255].
/// Monotone non-decreasing; `decode_light(LIGHT_SUN) == 255`.
#[inline]
pub fn decode_light(stored: u8) -> u8 {
    LIGHT_DECODE_TABLE[stored.min(LIGHT_MAX) as usize]
}

/// One tier of attenuation for light passing through a light-permitting but
/// not fully transparent node. Full sun that failed to pass unimpeded drops
/// to the ordinary maximum, minus one.
#[inline]
pub fn diminish_light(light: u8) -> u8 {
    if light == 0 {
        0
    } else if light >= LIGHT_MAX {
        LIGHT_MAX - 1
    } else {
        light - 1
    }
}

/// Blends the two stored light banks by the time-of-day factor in [0, 1000].
/// `blend_light(0, d, n) == n` and `blend_light(1000, d, n) == d`.
#[inline]
pub fn blend_light(daylight_factor: u32, lightday: u8, lightnight: u8) -> u8 {
    let f = daylight_factor.min(1000);
    let l = (f * lightday as u32 + (1000 - f) * lightnight as u32) / 1000;
    l.min(LIGHT_SUN as u32) as u8
}

/// Which of the two independently tracked light channels is being addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightBank {
    Day,
    Night,
}

/// The two 4-bit light banks of one node, packed into a byte. The day bank
/// occupies the low nibble, matching the persisted node layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PackedLight(pub u8);
impl PackedLight {
    #[inline]
    pub const fn new(day: u8, night: u8) -> Self {
        PackedLight((day & 0xf) | (night << 4))
    }
    #[inline]
    pub const fn day(&self) -> u8 {
        self.0 & 0xf
    }
    #[inline]
    pub const fn night(&self) -> u8 {
        self.0 >> 4
    }
    #[inline]
    pub fn get(&self, bank: LightBank) -> u8 {
        match bank {
            LightBank::Day => self.day(),
            LightBank::Night => self.night(),
        }
    }
    #[inline]
    pub fn set(&mut self, bank: LightBank, value: u8) {
        debug_assert!(value <= LIGHT_SUN);
        match bank {
            LightBank::Day => self.0 = (self.0 & 0xf0) | (value & 0xf),
            LightBank::Night => self.0 = (self.0 & 0x0f) | (value << 4),
        }
    }
}

/// A single chunk's worth of nodes as seen by the light spread, along with
/// the day-bank values that the per-column sunlight pass already derived.
pub trait ChunkBuffer {
    fn block(&self, offset: ChunkOffset) -> BlockId;
    /// Current stored day-bank light; full-sun columns and their diminished
    /// tails act as spread seeds.
    fn day_light(&self, offset: ChunkOffset) -> u8;
}

/// A chunk and its (up to 26) immediately adjacent chunks. Missing neighbors
/// simply contribute no seeds and absorb no light.
pub trait NeighborBuffer {
    type Chunk<'a>: ChunkBuffer
    where
        Self: 'a;
    fn get(&self, dx: i32, dy: i32, dz: i32) -> Option<Self::Chunk<'_>>;
}

/// Holds state of a light spread calculation. Exposed to callers so they can
/// keep a scratchpad around instead of constantly making new allocations.
pub struct LightScratchpad {
    light_buffer: Box<[u8; 48 * 48 * 48]>,
    visit_queue: Vec<(i32, i32, i32, u8)>,
    propagation_cache: Box<bitvec::BitArr!(for 48 * 48 * 48)>,
}
impl LightScratchpad {
    pub fn clear(&mut self) {
        self.light_buffer.fill(0);
        self.visit_queue.clear();
        self.propagation_cache.fill(false);
    }
    /// Returns the light at the given coordinate (center chunk spans 0..16 on
    /// each axis), packed with the night bank in the upper 4 bits and the day
    /// bank in the lower 4 bits.
    #[inline(always)]
    pub fn get_packed(&self, x: i32, y: i32, z: i32) -> PackedLight {
        PackedLight(self.light_buffer[buffer_index(x, y, z)])
    }

    #[inline(always)]
    pub fn get_day_light(&self, x: i32, y: i32, z: i32) -> u8 {
        self.get_packed(x, y, z).day()
    }

    #[inline(always)]
    pub fn get_night_light(&self, x: i32, y: i32, z: i32) -> u8 {
        self.get_packed(x, y, z).night()
    }
}
impl Default for LightScratchpad {
    fn default() -> Self {
        Self {
            light_buffer: Box::new([0; 48 * 48 * 48]),
            visit_queue: Vec::new(),
            propagation_cache: Box::new(bitvec::array::BitArray::ZERO),
        }
    }
}

#[inline(always)]
fn buffer_index(x: i32, y: i32, z: i32) -> usize {
    (x + 16) as usize * 48 * 48 + (z + 16) as usize * 48 + (y + 16) as usize
}

#[inline]
fn check_propagation_and_push<F>(
    queue: &mut Vec<(i32, i32, i32, u8)>,
    light_buffer: &mut [u8; 48 * 48 * 48],
    i: i32,
    j: i32,
    k: i32,
    light_level: u8,
    light_propagation: F,
) where
    F: Fn(i32, i32, i32) -> bool,
{
    if i < -16 || j < -16 || k < -16 || i >= 32 || j >= 32 || k >= 32 {
        return;
    }
    if !light_propagation(i, j, k) {
        return;
    }
    let old_level = light_buffer[buffer_index(i, j, k)];
    // Take the maximum value of the upper and lower nibbles independently.
    // max is commutative, so the fixed point does not depend on visit order.
    let max_level =
        ((old_level & 0xf).max(light_level & 0xf)) | (old_level & 0xf0).max(light_level & 0xf0);
    if max_level == old_level {
        return;
    }

    light_buffer[buffer_index(i, j, k)] = max_level;
    // Prune positions whose remaining reach cannot touch the center chunk.
    let i_dist = (-1 - i).max(i - 16);
    let j_dist = (-1 - j).max(j - 16);
    let k_dist = (-1 - k).max(k - 16);
    let dist = i_dist + j_dist + k_dist;
    let max_level = (light_level >> 4).max(light_level & 0xf);
    if dist < (max_level as i32) {
        queue.push((i, j, k, light_level));
    }
}

/// Fills the scratchpad with light for the center chunk of the neighbor
/// buffer, recomputed from every remaining source in the 3x3x3 neighborhood.
///
/// This is the general multi-source expansion behind torches and light
/// removal: brightening combines sources with a per-bank max and so never
/// decreases an existing value, and because each call starts from a cleared
/// scratchpad, removal of a source can never leave a value that the
/// remaining sources do not justify. Day-bank seeds are the stored day-light
/// values produced by the per-column sunlight pass; night-bank seeds are the
/// node emissions (which also feed the day bank, a torch is lit at noon).
pub fn spread_light(
    neighbors: &impl NeighborBuffer,
    scratchpad: &mut LightScratchpad,
    propagates_light: impl Fn(BlockId) -> bool,
    light_emission: impl Fn(BlockId) -> u8,
) {
    scratchpad.clear();

    // Scan the neighborhood for seeds. Indices are ordered x-major, z, then y
    // to match the chunk layout's cache-friendly order.
    for x_coarse in -1i32..=1 {
        for z_coarse in -1i32..=1 {
            for y_coarse in -1i32..=1 {
                let chunk = match neighbors.get(x_coarse, y_coarse, z_coarse) {
                    Some(chunk) => chunk,
                    None => continue,
                };
                for x_fine in 0u8..16 {
                    for z_fine in 0u8..16 {
                        let x = x_coarse * 16 + x_fine as i32;
                        let z = z_coarse * 16 + z_fine as i32;
                        for y_fine in (0u8..16).rev() {
                            let y = y_coarse * 16 + y_fine as i32;
                            let offset = ChunkOffset::new(x_fine, y_fine, z_fine);
                            let block_id = chunk.block(offset);
                            let propagates = propagates_light(block_id);
                            scratchpad
                                .propagation_cache
                                .set(buffer_index(x, y, z), propagates);

                            let emission = light_emission(block_id).min(LIGHT_MAX);
                            let day_seed = chunk.day_light(offset).max(emission);
                            let seed = PackedLight::new(day_seed, emission);
                            if seed.0 != 0 {
                                check_propagation_and_push(
                                    &mut scratchpad.visit_queue,
                                    &mut scratchpad.light_buffer,
                                    x,
                                    y,
                                    z,
                                    seed.0,
                                    |_, _, _| true,
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    let propagates_light_check =
        |x: i32, y: i32, z: i32| scratchpad.propagation_cache[buffer_index(x, y, z)];

    // While the visit queue is non-empty, attempt to propagate light to the
    // six neighbors with one diminish step applied per bank.
    while let Some((x, y, z, light_level)) = scratchpad.visit_queue.pop() {
        let day = diminish_light(light_level & 0xf);
        let night = diminish_light(light_level >> 4);
        let decremented = day | (night << 4);
        if decremented == 0 {
            continue;
        }
        for (dx, dy, dz) in [
            (-1, 0, 0),
            (1, 0, 0),
            (0, -1, 0),
            (0, 1, 0),
            (0, 0, -1),
            (0, 0, 1),
        ] {
            check_propagation_and_push(
                &mut scratchpad.visit_queue,
                &mut scratchpad.light_buffer,
                x + dx,
                y + dy,
                z + dz,
                decremented,
                propagates_light_check,
            );
        }
    }
}
