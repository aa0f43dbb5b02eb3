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

use std::cmp::Ordering;
use std::str::FromStr;
use std::{
    fmt::Debug,
    hash::{Hash, Hasher},
    ops::RangeInclusive,
};

use anyhow::bail;
use rustc_hash::FxHasher;

/// A 3D node coordinate in the world.
///
/// Note that the impls of PartialOrd and Ord are meant for tiebreaking (e.g. for sorted data
/// structures) and don't have a lot of semantic meaning on their own.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct BlockCoordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Debug for BlockCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("[{}, {}, {}]", self.x, self.y, self.z))
    }
}
impl BlockCoordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
    #[inline]
    pub const fn offset(&self) -> ChunkOffset {
        // rem_euclid(16) result should always fit into u8.
        ChunkOffset {
            x: self.x.rem_euclid(16) as u8,
            y: self.y.rem_euclid(16) as u8,
            z: self.z.rem_euclid(16) as u8,
        }
    }
    #[inline]
    pub const fn chunk(&self) -> ChunkCoordinate {
        ChunkCoordinate {
            x: self.x.div_euclid(16),
            y: self.y.div_euclid(16),
            z: self.z.div_euclid(16),
        }
    }

    pub fn try_delta(&self, x: i32, y: i32, z: i32) -> Option<BlockCoordinate> {
        let x = self.x.checked_add(x)?;
        let y = self.y.checked_add(y)?;
        let z = self.z.checked_add(z)?;

        Some(BlockCoordinate { x, y, z })
    }
}
impl std::fmt::Display for BlockCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}
impl FromStr for BlockCoordinate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let pieces: Vec<_> = s.split(',').collect();
        if pieces.len() != 3 {
            bail!("Wrong number of components");
        };
        Ok(BlockCoordinate::new(
            pieces[0].parse()?,
            pieces[1].parse()?,
            pieces[2].parse()?,
        ))
    }
}

/// Represents an offset of a node within a chunk.
///
/// The most cache-friendly iteration order has x in the outer loop, z in the middle loop, and y
/// in the innermost loop.
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct ChunkOffset {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}
impl ChunkOffset {
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }

    #[cfg(debug_assertions)]
    #[inline(always)]
    fn debug_check(&self) {
        debug_assert!(self.x < 16);
        debug_assert!(self.y < 16);
        debug_assert!(self.z < 16);
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn debug_check(&self) {}

    #[inline]
    pub fn as_index(&self) -> usize {
        self.debug_check();
        // The unusual order here is to provide a cache-friendly iteration order
        // for innermost loops that traverse vertically (since that is a common pattern for
        // lighting calculations).
        256 * (self.x as usize) + 16 * (self.z as usize) + (self.y as usize)
    }
    #[inline]
    pub fn from_index(index: usize) -> ChunkOffset {
        assert!(index < 4096);
        ChunkOffset {
            y: (index % 16) as u8,
            z: ((index / 16) % 16) as u8,
            x: ((index / 256) % 16) as u8,
        }
    }
    pub fn try_delta(&self, x: i8, y: i8, z: i8) -> Option<ChunkOffset> {
        let x = self.x as i8 + x;
        let y = self.y as i8 + y;
        let z = self.z as i8 + z;
        if !(0..16).contains(&x) || !(0..16).contains(&y) || !(0..16).contains(&z) {
            None
        } else {
            Some(ChunkOffset {
                x: x as u8,
                y: y as u8,
                z: z as u8,
            })
        }
    }
}
impl Debug for ChunkOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Δ({}, {}, {})", self.x, self.y, self.z))
    }
}
impl PartialOrd<Self> for ChunkOffset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkOffset {
    fn cmp(&self, other: &Self) -> Ordering {
        self.x
            .cmp(&other.x)
            .then(self.z.cmp(&other.z))
            .then(self.y.cmp(&other.y))
    }
}

/// Represents a location of a map chunk; the unit of storage, generation and lighting.
///
/// Each coordinate spans 16 nodes, covering the range [chunk_coord.x * 16, chunk_coord.x * 16 + 15].
/// e.g. chunk 0,1,2 covers x:[0, 15], y:[16, 31], z:[32, 47]
///
/// PartialOrd/Ord give a total order (x, then y, then z) so that sorted containers keyed by
/// chunk coordinates iterate deterministically.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct ChunkCoordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}
impl ChunkCoordinate {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        let result = Self { x, y, z };
        debug_assert!(result.is_in_bounds());
        result
    }

    pub fn try_new(x: i32, y: i32, z: i32) -> Option<Self> {
        let result = Self { x, y, z };
        if result.is_in_bounds() {
            Some(result)
        } else {
            None
        }
    }

    /// Returns a new node coordinate with the given offset within this chunk.
    #[inline]
    pub fn with_offset(&self, offset: ChunkOffset) -> BlockCoordinate {
        offset.debug_check();
        BlockCoordinate {
            x: self.x * 16 + (offset.x as i32),
            y: self.y * 16 + (offset.y as i32),
            z: self.z * 16 + (offset.z as i32),
        }
    }
    /// Returns the Manhattan distance between the two coordinates
    pub fn manhattan_distance(&self, other: ChunkCoordinate) -> u32 {
        self.x
            .abs_diff(other.x)
            .saturating_add(self.y.abs_diff(other.y))
            .saturating_add(self.z.abs_diff(other.z))
    }
    /// Returns true if the coordinate is in-bounds. Because *node* coordinates need to
    /// fit into an i32, not every possible chunk coordinate is actually in-bounds.
    pub fn is_in_bounds(&self) -> bool {
        const BOUNDS_RANGE: RangeInclusive<i32> = (i32::MIN / 16)..=(i32::MAX / 16);
        BOUNDS_RANGE.contains(&self.x)
            && BOUNDS_RANGE.contains(&self.y)
            && BOUNDS_RANGE.contains(&self.z)
    }
    /// Adds the given offset to the coordinate, and returns it, if it is in-bounds.
    pub fn try_delta(&self, x: i32, y: i32, z: i32) -> Option<ChunkCoordinate> {
        let x = self.x.checked_add(x)?;
        let y = self.y.checked_add(y)?;
        let z = self.z.checked_add(z)?;
        let candidate = ChunkCoordinate { x, y, z };
        if candidate.is_in_bounds() {
            Some(candidate)
        } else {
            None
        }
    }
    /// A hash function for ChunkCoordinate that keeps close coordinates together,
    /// and does not consider the y coordinate. All chunks in a vertical stack are
    /// guaranteed to have the same hash *within a process*. No guarantees are made
    /// for serialized hashes.
    pub fn coarse_hash_no_y(&self) -> u64 {
        let mut hasher = FxHasher::default();
        (self.x >> 4).hash(&mut hasher);
        (self.z >> 4).hash(&mut hasher);
        hasher.finish()
    }
}
impl Debug for ChunkCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("chunk({}, {}, {})", self.x, self.y, self.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_round_trips_through_index() {
        for index in 0..4096 {
            assert_eq!(ChunkOffset::from_index(index).as_index(), index);
        }
    }

    #[test]
    fn chunk_and_offset_recover_block_coordinate() {
        for &coord in &[
            BlockCoordinate::new(0, 0, 0),
            BlockCoordinate::new(-1, -16, -17),
            BlockCoordinate::new(15, 16, 17),
            BlockCoordinate::new(-123456, 789, -1),
        ] {
            assert_eq!(coord.chunk().with_offset(coord.offset()), coord);
        }
    }

    #[test]
    fn chunk_ordering_is_total_and_deterministic() {
        let mut coords = vec![
            ChunkCoordinate::new(1, 0, 0),
            ChunkCoordinate::new(0, 1, 0),
            ChunkCoordinate::new(0, 0, 1),
            ChunkCoordinate::new(-1, 5, 5),
        ];
        coords.sort();
        assert_eq!(coords[0], ChunkCoordinate::new(-1, 5, 5));
        assert_eq!(coords[1], ChunkCoordinate::new(0, 0, 1));
        assert_eq!(coords[2], ChunkCoordinate::new(0, 1, 0));
        assert_eq!(coords[3], ChunkCoordinate::new(1, 0, 0));
    }
}
