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

use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, ensure, Context, Error, Result};
use integer_encoding::{VarIntReader, VarIntWriter};
use log::error;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use tracy_client::span;

use orestone_core::{
    block_id::BlockId,
    constants::CHUNK_VOLUME,
    coordinates::{BlockCoordinate, ChunkCoordinate, ChunkOffset},
    lighting::{ChunkBuffer, LightBank, LightScratchpad, NeighborBuffer, PackedLight},
};

use crate::database::{GameDatabase, KeySpace};

use super::{
    blocks::BlockTypeManager,
    sunlight::{self, RelightMode, VerticalNeighbors},
};

trait AsDbKey
where
    Self: Sized,
{
    fn as_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

impl AsDbKey for ChunkCoordinate {
    fn as_bytes(&self) -> Vec<u8> {
        let mut result = Vec::new();
        result
            .write_varint(self.x)
            .expect("varint write should not fail");
        result
            .write_varint(self.y)
            .expect("varint write should not fail");
        result
            .write_varint(self.z)
            .expect("varint write should not fail");
        result
    }

    fn from_bytes(bytes: &[u8]) -> Result<ChunkCoordinate> {
        let len = bytes.len();
        let mut bytes = std::io::Cursor::new(bytes);
        let x = bytes.read_varint()?;
        let y = bytes.read_varint()?;
        let z = bytes.read_varint()?;
        ensure!(
            bytes.position() == len as u64,
            "Trailing data after provided bytes"
        );
        Ok(ChunkCoordinate { x, y, z })
    }
}

// Serialized chunk layout, after the format byte: one flags byte, varint
// timestamp, CHUNK_VOLUME varint block ids, CHUNK_VOLUME raw light bytes.
const CHUNK_FORMAT_SNAPPY: u8 = 0x01;
const FLAG_IS_UNDERGROUND: u8 = 1 << 0;
const FLAG_LIGHTING_COMPLETE: u8 = 1 << 1;
const FLAG_DAY_NIGHT_DIFFERS: u8 = 1 << 2;
const FLAG_GENERATED: u8 = 1 << 3;

/// A single in-memory chunk of the map, 16x16x16 nodes.
pub struct MapChunk {
    coord: ChunkCoordinate,
    block_ids: Box<[u32; CHUNK_VOLUME]>,
    lighting: Box<[PackedLight; CHUNK_VOLUME]>,
    /// Heuristic set at generation time; steers sunlight seeding for columns
    /// with no loaded chunk above.
    pub(crate) is_underground: bool,
    /// True once the emerge pipeline has run both lighting passes.
    pub(crate) lighting_complete: bool,
    /// True if any node's day light differs from its night light.
    pub(crate) day_night_differs: bool,
    /// False only for chunks that were loaded but never filled by the mapgen
    /// (not currently produced; loaded chunks from older saves may carry it).
    pub(crate) generated: bool,
    timestamp: u64,
    pub(crate) dirty: bool,
}

impl MapChunk {
    pub(crate) fn new(coord: ChunkCoordinate) -> MapChunk {
        MapChunk {
            coord,
            block_ids: Box::new([0; CHUNK_VOLUME]),
            lighting: Box::new([PackedLight::new(0, 0); CHUNK_VOLUME]),
            is_underground: false,
            lighting_complete: false,
            day_night_differs: false,
            generated: false,
            timestamp: 0,
            dirty: false,
        }
    }

    pub fn coord(&self) -> ChunkCoordinate {
        self.coord
    }

    #[inline]
    pub fn get_block(&self, offset: ChunkOffset) -> BlockId {
        BlockId(self.block_ids[offset.as_index()])
    }

    #[inline]
    pub fn set_block(&mut self, offset: ChunkOffset, block: BlockId) {
        self.block_ids[offset.as_index()] = block.0;
        self.dirty = true;
    }

    #[inline]
    pub fn get_light(&self, offset: ChunkOffset) -> PackedLight {
        self.lighting[offset.as_index()]
    }

    #[inline]
    pub(crate) fn set_light(&mut self, offset: ChunkOffset, light: PackedLight) {
        self.lighting[offset.as_index()] = light;
    }

    pub(crate) fn recompute_day_night_differs(&mut self) {
        self.day_night_differs = self
            .lighting
            .iter()
            .any(|light| light.day() != light.night());
    }

    fn flags_byte(&self) -> u8 {
        let mut flags = 0;
        if self.is_underground {
            flags |= FLAG_IS_UNDERGROUND;
        }
        if self.lighting_complete {
            flags |= FLAG_LIGHTING_COMPLETE;
        }
        if self.day_night_differs {
            flags |= FLAG_DAY_NIGHT_DIFFERS;
        }
        if self.generated {
            flags |= FLAG_GENERATED;
        }
        flags
    }

    pub(crate) fn serialize(&self) -> Result<Vec<u8>> {
        let _span = span!("chunk serialize");
        let mut payload = Vec::with_capacity(CHUNK_VOLUME * 3);
        payload.push(self.flags_byte());
        payload.write_varint(self.timestamp)?;
        for block_id in self.block_ids.iter() {
            payload.write_varint(*block_id)?;
        }
        for light in self.lighting.iter() {
            payload.push(light.0);
        }
        let compressed = snap::raw::Encoder::new().compress_vec(&payload)?;
        let mut result = Vec::with_capacity(compressed.len() + 1);
        result.push(CHUNK_FORMAT_SNAPPY);
        result.extend_from_slice(&compressed);
        Ok(result)
    }

    pub(crate) fn deserialize(coord: ChunkCoordinate, bytes: &[u8]) -> Result<MapChunk> {
        let _span = span!("chunk deserialize");
        ensure!(!bytes.is_empty(), "Empty chunk record for {:?}", coord);
        ensure!(
            bytes[0] == CHUNK_FORMAT_SNAPPY,
            "Unknown chunk format 0x{:x} for {:?}",
            bytes[0],
            coord
        );
        let payload = snap::raw::Decoder::new().decompress_vec(&bytes[1..])?;
        ensure!(!payload.is_empty(), "Empty chunk payload for {:?}", coord);
        let flags = payload[0];

        let mut chunk = MapChunk::new(coord);
        chunk.is_underground = flags & FLAG_IS_UNDERGROUND != 0;
        chunk.lighting_complete = flags & FLAG_LIGHTING_COMPLETE != 0;
        chunk.day_night_differs = flags & FLAG_DAY_NIGHT_DIFFERS != 0;
        chunk.generated = flags & FLAG_GENERATED != 0;

        let mut cursor = std::io::Cursor::new(&payload[1..]);
        chunk.timestamp = cursor.read_varint()?;
        for block_id in chunk.block_ids.iter_mut() {
            *block_id = cursor.read_varint()?;
        }
        for light in chunk.lighting.iter_mut() {
            let mut byte = [0u8];
            std::io::Read::read_exact(&mut cursor, &mut byte)?;
            *light = PackedLight(byte[0]);
        }
        ensure!(
            cursor.position() == (payload.len() - 1) as u64,
            "Trailing data in chunk record for {:?}",
            coord
        );
        Ok(chunk)
    }
}

struct MapChunkInnerGuard<'a> {
    guard: MutexGuard<'a, HolderState>,
}
impl<'a> Deref for MapChunkInnerGuard<'a> {
    type Target = MapChunk;
    fn deref(&self) -> &Self::Target {
        self.guard.unwrap()
    }
}
impl<'a> DerefMut for MapChunkInnerGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.unwrap_mut()
    }
}

enum HolderState {
    Empty,
    Err(anyhow::Error),
    Ok(MapChunk),
}
impl HolderState {
    fn unwrap_mut(&mut self) -> &mut MapChunk {
        if let HolderState::Ok(x) = self {
            x
        } else {
            panic!("HolderState is not Ok");
        }
    }
    fn unwrap(&self) -> &MapChunk {
        if let HolderState::Ok(x) = self {
            x
        } else {
            panic!("HolderState is not Ok");
        }
    }
}

struct MapChunkHolder {
    chunk: Mutex<HolderState>,
    condition: Condvar,
}
impl MapChunkHolder {
    fn new_empty() -> Self {
        Self {
            chunk: Mutex::new(HolderState::Empty),
            condition: Condvar::new(),
        }
    }

    /// Get the chunk, blocking until it's loaded
    fn wait_and_get(&self) -> Result<MapChunkInnerGuard<'_>> {
        let mut guard = self.chunk.lock();
        let _span = span!("wait_and_get");
        loop {
            match &*guard {
                HolderState::Empty => self.condition.wait(&mut guard),
                HolderState::Err(e) => return Err(Error::msg(format!("Chunk load failed: {e:?}"))),
                HolderState::Ok(_) => return Ok(MapChunkInnerGuard { guard }),
            }
        }
    }
    /// Get the chunk, returning None if it's not loaded yet
    fn try_get(&self) -> Result<Option<MapChunkInnerGuard<'_>>> {
        let guard = self.chunk.lock();
        match &*guard {
            HolderState::Empty => Ok(None),
            HolderState::Err(e) => Err(Error::msg(format!("Chunk load failed: {e:?}"))),
            HolderState::Ok(_) => Ok(Some(MapChunkInnerGuard { guard })),
        }
    }
    /// Set the chunk, and notify any threads waiting in wait_and_get.
    /// Returns false, keeping the existing chunk, if one is already present;
    /// concurrent emerge jobs for one coordinate can both produce a chunk and
    /// the first one to land wins.
    fn fill(&self, chunk: MapChunk) -> bool {
        let mut guard = self.chunk.lock();
        if matches!(*guard, HolderState::Ok(_)) {
            return false;
        }
        *guard = HolderState::Ok(chunk);
        self.condition.notify_all();
        true
    }
    /// Set an error, and notify any threads waiting in wait_and_get. Ignored
    /// if a chunk is already present; a loaded chunk outranks a racing
    /// failure.
    fn set_err(&self, err: anyhow::Error) {
        let mut guard = self.chunk.lock();
        if matches!(*guard, HolderState::Ok(_)) {
            return;
        }
        *guard = HolderState::Err(err);
        self.condition.notify_all();
    }
}

const NUM_LOCK_SHARDS: usize = 16;

#[inline]
fn shard_id(coord: ChunkCoordinate) -> usize {
    (coord.coarse_hash_no_y() % NUM_LOCK_SHARDS as u64) as usize
}

#[derive(Default)]
struct MapShard {
    chunks: FxHashMap<ChunkCoordinate, MapChunkHolder>,
}

/// How the emerge pipeline should interpret a coordinate already present in
/// the live map.
pub(crate) enum ChunkReadyState {
    /// A fully loaded chunk is resident.
    Ready,
    /// A previous load or generate attempt left a poisoned holder.
    Failed,
    /// Nothing resident at this coordinate.
    Absent,
}

/// Result of a downward sunlight walk: the chunks whose columns were
/// recomputed (top to bottom), and whether any of them still holds dark,
/// light-propagating nodes that the diffuse spread pass could brighten.
pub(crate) struct SunlightUpdate {
    pub(crate) relit: Vec<ChunkCoordinate>,
    pub(crate) dark_air_left: bool,
}

/// Sampled day-light rows from the chunks vertically adjacent to one being
/// relit, captured under short locks so the sunlight pass runs lock-free with
/// respect to its neighbors.
struct SampledColumns {
    above_day: Option<[u8; 256]>,
    below: Option<[(u8, bool); 256]>,
}
impl VerticalNeighbors for SampledColumns {
    fn above_day_light(&self, x: u8, z: u8) -> Option<u8> {
        self.above_day.map(|row| row[x as usize * 16 + z as usize])
    }
    fn below_day_light(&self, x: u8, z: u8) -> Option<(u8, bool)> {
        self.below.map(|row| row[x as usize * 16 + z as usize])
    }
}

/// Copy of one chunk's blocks and day light, used to run the light spread
/// without holding any map locks.
struct ChunkSnapshot {
    block_ids: Box<[u32; CHUNK_VOLUME]>,
    day_light: Box<[u8; CHUNK_VOLUME]>,
}
impl ChunkBuffer for &ChunkSnapshot {
    #[inline]
    fn block(&self, offset: ChunkOffset) -> BlockId {
        BlockId(self.block_ids[offset.as_index()])
    }
    #[inline]
    fn day_light(&self, offset: ChunkOffset) -> u8 {
        self.day_light[offset.as_index()]
    }
}

struct NeighborhoodSnapshot {
    // x-major, then y, then z, each in -1..=1
    chunks: [Option<ChunkSnapshot>; 27],
}
impl NeighborhoodSnapshot {
    #[inline]
    fn index(dx: i32, dy: i32, dz: i32) -> usize {
        ((dx + 1) * 9 + (dy + 1) * 3 + (dz + 1)) as usize
    }
}
impl NeighborBuffer for NeighborhoodSnapshot {
    type Chunk<'a> = &'a ChunkSnapshot;
    fn get(&self, dx: i32, dy: i32, dz: i32) -> Option<&ChunkSnapshot> {
        self.chunks[Self::index(dx, dy, dz)].as_ref()
    }
}

/// The live chunk map: resident chunks sharded sixteen ways by coarse
/// position hash, backed by a [`GameDatabase`] for persistence.
///
/// The map itself never loads or generates chunks; the emerge pipeline is the
/// only producer. Accessors return errors for non-resident coordinates.
pub struct ServerGameMap {
    database: Arc<dyn GameDatabase>,
    block_types: Arc<BlockTypeManager>,
    live_chunks: [RwLock<MapShard>; NUM_LOCK_SHARDS],
}

impl ServerGameMap {
    pub fn new(
        database: Arc<dyn GameDatabase>,
        block_types: Arc<BlockTypeManager>,
    ) -> Arc<ServerGameMap> {
        Arc::new(ServerGameMap {
            database,
            block_types,
            live_chunks: std::array::from_fn(|_| RwLock::new(MapShard::default())),
        })
    }

    pub fn block_types(&self) -> &BlockTypeManager {
        &self.block_types
    }

    /// Gets a block from the map. Errors if the containing chunk is not
    /// resident; use the emerge pipeline to bring chunks in first.
    pub fn get_block(&self, coord: BlockCoordinate) -> Result<BlockId> {
        let chunk_coord = coord.chunk();
        let shard = self.live_chunks[shard_id(chunk_coord)].read();
        let holder = shard
            .chunks
            .get(&chunk_coord)
            .with_context(|| format!("Chunk {:?} not resident", chunk_coord))?;
        let guard = holder
            .try_get()?
            .with_context(|| format!("Chunk {:?} not resident", chunk_coord))?;
        Ok(guard.get_block(coord.offset()))
    }

    /// Gets the packed light of a block. Same residency rules as
    /// [`get_block`](Self::get_block).
    pub fn get_light(&self, coord: BlockCoordinate) -> Result<PackedLight> {
        let chunk_coord = coord.chunk();
        let shard = self.live_chunks[shard_id(chunk_coord)].read();
        let holder = shard
            .chunks
            .get(&chunk_coord)
            .with_context(|| format!("Chunk {:?} not resident", chunk_coord))?;
        let guard = holder
            .try_get()?
            .with_context(|| format!("Chunk {:?} not resident", chunk_coord))?;
        Ok(guard.get_light(coord.offset()))
    }

    /// Sets a block and repairs lighting: the containing chunk's sunlight is
    /// recomputed from scratch, invalidated chunks below are revisited, and
    /// diffuse light is re-spread over every touched chunk.
    pub fn set_block(&self, coord: BlockCoordinate, block: BlockId) -> Result<()> {
        let _span = span!("map set_block");
        let chunk_coord = coord.chunk();
        {
            let shard = self.live_chunks[shard_id(chunk_coord)].read();
            let holder = shard
                .chunks
                .get(&chunk_coord)
                .with_context(|| format!("Chunk {:?} not resident", chunk_coord))?;
            let mut guard = holder
                .try_get()?
                .with_context(|| format!("Chunk {:?} not resident", chunk_coord))?;
            guard.set_block(coord.offset(), block);
        }

        let mut light_sources = FxHashSet::default();
        let update = self.update_sunlight(
            chunk_coord,
            RelightMode::RemoveAndRecompute,
            &mut light_sources,
        )?;
        // Spread is only needed when a column pass left dark receptive nodes
        // behind or produced sunlit seeds; a fully opaque chunk has neither.
        if update.dark_air_left || !light_sources.is_empty() {
            let mut scratchpad = LightScratchpad::default();
            for relit_coord in update.relit {
                self.spread_chunk_light(relit_coord, &mut scratchpad)?;
            }
        }
        Ok(())
    }

    /// Makes a chunk resident. Returns false, dropping `chunk`, if another
    /// producer already filled the coordinate; the emerge queue dedups
    /// pending requests, but a request arriving while a job for the same
    /// coordinate is mid-flight starts a second producer.
    pub(crate) fn insert_chunk(&self, chunk: MapChunk) -> bool {
        let coord = chunk.coord;
        let shard_idx = shard_id(coord);
        {
            let shard = self.live_chunks[shard_idx].read();
            if let Some(holder) = shard.chunks.get(&coord) {
                return holder.fill(chunk);
            }
        }
        let mut shard = self.live_chunks[shard_idx].write();
        shard
            .chunks
            .entry(coord)
            .or_insert_with(MapChunkHolder::new_empty)
            .fill(chunk)
    }

    /// Poisons a coordinate after a failed load or generate, so readers get a
    /// descriptive error rather than "not resident".
    pub(crate) fn insert_chunk_error(&self, coord: ChunkCoordinate, err: anyhow::Error) {
        let mut shard = self.live_chunks[shard_id(coord)].write();
        shard
            .chunks
            .entry(coord)
            .or_insert_with(MapChunkHolder::new_empty)
            .set_err(err);
    }

    pub(crate) fn chunk_ready_state(&self, coord: ChunkCoordinate) -> ChunkReadyState {
        let shard = self.live_chunks[shard_id(coord)].read();
        match shard.chunks.get(&coord) {
            None => ChunkReadyState::Absent,
            Some(holder) => match holder.wait_and_get() {
                Ok(_) => ChunkReadyState::Ready,
                Err(_) => ChunkReadyState::Failed,
            },
        }
    }

    /// Removes a poisoned holder so the coordinate can be retried.
    pub(crate) fn remove_failed_chunk(&self, coord: ChunkCoordinate) {
        let mut shard = self.live_chunks[shard_id(coord)].write();
        let failed = shard
            .chunks
            .get(&coord)
            .is_some_and(|holder| matches!(&*holder.chunk.lock(), HolderState::Err(_)));
        if failed {
            shard.chunks.remove(&coord);
        }
    }

    pub(crate) fn load_chunk_from_database(
        &self,
        coord: ChunkCoordinate,
    ) -> Result<Option<MapChunk>> {
        let key = KeySpace::MapchunkData.make_key(&coord.as_bytes());
        match self.database.get_nontemporal(&key)? {
            Some(data) => Ok(Some(MapChunk::deserialize(coord, &data)?)),
            None => Ok(None),
        }
    }

    /// Writes a resident chunk back to the database and clears its dirty bit.
    pub(crate) fn persist_chunk(&self, coord: ChunkCoordinate) -> Result<()> {
        let shard = self.live_chunks[shard_id(coord)].read();
        let holder = shard
            .chunks
            .get(&coord)
            .with_context(|| format!("Chunk {:?} not resident", coord))?;
        let mut guard = holder
            .try_get()?
            .with_context(|| format!("Chunk {:?} not resident", coord))?;
        guard.timestamp = now_secs();
        let data = guard.serialize()?;
        self.database
            .put(&KeySpace::MapchunkData.make_key(&coord.as_bytes()), &data)?;
        guard.dirty = false;
        Ok(())
    }

    /// Drops a chunk from memory, writing it back first if dirty.
    pub fn unload_chunk(&self, coord: ChunkCoordinate) -> Result<()> {
        let removed = {
            let mut shard = self.live_chunks[shard_id(coord)].write();
            shard.chunks.remove(&coord)
        };
        if let Some(holder) = removed {
            if let HolderState::Ok(mut chunk) = holder.chunk.into_inner() {
                if chunk.dirty {
                    chunk.timestamp = now_secs();
                    let data = chunk.serialize()?;
                    self.database
                        .put(&KeySpace::MapchunkData.make_key(&coord.as_bytes()), &data)?;
                }
            }
        }
        Ok(())
    }

    /// Writes back every dirty resident chunk and flushes the database.
    pub fn flush(&self) -> Result<()> {
        let _span = span!("map flush");
        let mut dirty_coords = Vec::new();
        for shard in &self.live_chunks {
            let shard = shard.read();
            for (coord, holder) in shard.chunks.iter() {
                if let Ok(Some(guard)) = holder.try_get() {
                    if guard.dirty {
                        dirty_coords.push(*coord);
                    }
                }
            }
        }
        for coord in dirty_coords {
            self.persist_chunk(coord)?;
        }
        self.database.flush()
    }

    pub fn num_resident_chunks(&self) -> usize {
        self.live_chunks.iter().map(|x| x.read().chunks.len()).sum()
    }

    /// Applies `mutator` to a resident chunk under its lock.
    pub(crate) fn mutate_chunk<T>(
        &self,
        coord: ChunkCoordinate,
        mutator: impl FnOnce(&mut MapChunk) -> T,
    ) -> Result<T> {
        let shard = self.live_chunks[shard_id(coord)].read();
        let holder = shard
            .chunks
            .get(&coord)
            .with_context(|| format!("Chunk {:?} not resident", coord))?;
        let mut guard = holder
            .try_get()?
            .with_context(|| format!("Chunk {:?} not resident", coord))?;
        Ok(mutator(&mut guard))
    }

    fn sample_row_above(&self, coord: ChunkCoordinate) -> Option<[u8; 256]> {
        let above = coord.try_delta(0, 1, 0)?;
        let shard = self.live_chunks[shard_id(above)].read();
        let holder = shard.chunks.get(&above)?;
        let guard = holder.try_get().ok().flatten()?;
        let mut row = [0u8; 256];
        for x in 0..16u8 {
            for z in 0..16u8 {
                row[x as usize * 16 + z as usize] = guard
                    .get_light(ChunkOffset::new(x, 0, z))
                    .get(LightBank::Day);
            }
        }
        Some(row)
    }

    fn sample_row_below(&self, coord: ChunkCoordinate) -> Option<[(u8, bool); 256]> {
        let below = coord.try_delta(0, -1, 0)?;
        let shard = self.live_chunks[shard_id(below)].read();
        let holder = shard.chunks.get(&below)?;
        let guard = holder.try_get().ok().flatten()?;
        let mut row = [(0u8, false); 256];
        for x in 0..16u8 {
            for z in 0..16u8 {
                let offset = ChunkOffset::new(x, 15, z);
                row[x as usize * 16 + z as usize] = (
                    guard.get_light(offset).get(LightBank::Day),
                    self.block_types
                        .allows_light_propagation(guard.get_block(offset)),
                );
            }
        }
        Some(row)
    }

    /// Runs the per-column sunlight pass on `start`, then walks downward
    /// through any chunks whose bottom boundary was invalidated. A
    /// non-resident chunk reached by the walk has its stored lighting
    /// expired instead, so its next emerge relights it.
    pub(crate) fn update_sunlight(
        &self,
        start: ChunkCoordinate,
        mode: RelightMode,
        light_sources: &mut FxHashSet<BlockCoordinate>,
    ) -> Result<SunlightUpdate> {
        let _span = span!("map update_sunlight");
        let mut worklist = VecDeque::new();
        worklist.push_back(start);
        let mut update = SunlightUpdate {
            relit: Vec::new(),
            dark_air_left: false,
        };
        while let Some(coord) = worklist.pop_front() {
            // Sample the vertical neighbors first; the sunlight pass then runs
            // with only the current chunk's lock held.
            let samples = SampledColumns {
                above_day: self.sample_row_above(coord),
                below: self.sample_row_below(coord),
            };
            let outcome = {
                let shard = self.live_chunks[shard_id(coord)].read();
                match shard.chunks.get(&coord) {
                    Some(holder) => match holder.try_get() {
                        Ok(Some(mut guard)) => {
                            let outcome = sunlight::propagate_sunlight(
                                &mut guard,
                                &self.block_types,
                                &samples,
                                mode,
                                light_sources,
                            );
                            guard.dirty = true;
                            Some(outcome)
                        }
                        Ok(None) | Err(_) => None,
                    },
                    None => None,
                }
            };
            let outcome = match outcome {
                Some(outcome) => outcome,
                None => {
                    self.expire_stored_lighting(coord)?;
                    continue;
                }
            };
            update.relit.push(coord);
            update.dark_air_left |= outcome.dark_air_left;
            if !outcome.bottom_valid {
                if let Some(below) = coord.try_delta(0, -1, 0) {
                    worklist.push_back(below);
                }
            }
        }
        Ok(update)
    }

    /// Clears the lighting-complete flag on a chunk's stored record. A chunk
    /// that went non-resident before a boundary invalidation reached it would
    /// otherwise reload with stale light and skip its relight.
    fn expire_stored_lighting(&self, coord: ChunkCoordinate) -> Result<()> {
        let key = KeySpace::MapchunkData.make_key(&coord.as_bytes());
        let data = match self.database.get(&key)? {
            Some(data) => data,
            None => return Ok(()),
        };
        let mut chunk = MapChunk::deserialize(coord, &data)?;
        if chunk.lighting_complete {
            chunk.lighting_complete = false;
            self.database.put(&key, &chunk.serialize()?)?;
        }
        Ok(())
    }

    fn snapshot_chunk(&self, coord: ChunkCoordinate) -> Option<ChunkSnapshot> {
        let shard = self.live_chunks[shard_id(coord)].read();
        let holder = shard.chunks.get(&coord)?;
        let guard = holder.try_get().ok().flatten()?;
        let mut day_light = Box::new([0u8; CHUNK_VOLUME]);
        for (dst, src) in day_light.iter_mut().zip(guard.lighting.iter()) {
            *dst = src.day();
        }
        Some(ChunkSnapshot {
            block_ids: guard.block_ids.clone(),
            day_light,
        })
    }

    /// Recomputes the diffuse light of `center` from every light source in its
    /// 3x3x3 neighborhood, then writes both banks back. Sunlight values in the
    /// day bank act as seeds, so this never undoes the column pass.
    pub(crate) fn spread_chunk_light(
        &self,
        center: ChunkCoordinate,
        scratchpad: &mut LightScratchpad,
    ) -> Result<()> {
        let _span = span!("map spread_chunk_light");
        let mut snapshot = NeighborhoodSnapshot {
            chunks: std::array::from_fn(|_| None),
        };
        for dx in -1i32..=1 {
            for dy in -1i32..=1 {
                for dz in -1i32..=1 {
                    let neighbor = match center.try_delta(dx, dy, dz) {
                        Some(x) => x,
                        None => continue,
                    };
                    snapshot.chunks[NeighborhoodSnapshot::index(dx, dy, dz)] =
                        self.snapshot_chunk(neighbor);
                }
            }
        }
        if snapshot.get(0, 0, 0).is_none() {
            bail!("Chunk {:?} not resident", center);
        }

        orestone_core::lighting::spread_light(
            &snapshot,
            scratchpad,
            |id| self.block_types.allows_light_propagation(id),
            |id| self.block_types.light_emission(id),
        );

        self.mutate_chunk(center, |chunk| {
            for index in 0..CHUNK_VOLUME {
                let offset = ChunkOffset::from_index(index);
                chunk.set_light(
                    offset,
                    scratchpad.get_packed(
                        offset.x as i32,
                        offset.y as i32,
                        offset.z as i32,
                    ),
                );
            }
            chunk.recompute_day_night_differs();
            chunk.dirty = true;
        })
    }
}

impl Drop for ServerGameMap {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("Failed to flush map on shutdown: {e:?}");
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|x| x.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_key_round_trip() {
        let coord = ChunkCoordinate::new(-3, 70000, 12);
        let bytes = coord.as_bytes();
        assert_eq!(ChunkCoordinate::from_bytes(&bytes).unwrap(), coord);
    }

    #[test]
    fn test_chunk_serialization_round_trip() {
        let coord = ChunkCoordinate::new(1, -2, 3);
        let mut chunk = MapChunk::new(coord);
        chunk.set_block(ChunkOffset::new(4, 5, 6), BlockId(0x3000));
        chunk.set_light(ChunkOffset::new(4, 6, 6), PackedLight::new(15, 3));
        chunk.is_underground = true;
        chunk.lighting_complete = true;
        chunk.generated = true;
        chunk.recompute_day_night_differs();

        let restored = MapChunk::deserialize(coord, &chunk.serialize().unwrap()).unwrap();
        assert_eq!(
            restored.get_block(ChunkOffset::new(4, 5, 6)),
            BlockId(0x3000)
        );
        assert_eq!(
            restored.get_light(ChunkOffset::new(4, 6, 6)),
            PackedLight::new(15, 3)
        );
        assert!(restored.is_underground);
        assert!(restored.lighting_complete);
        assert!(restored.day_night_differs);
        assert!(restored.generated);
        // Fresh from disk, nothing to write back.
        assert!(!restored.dirty);
    }

    #[test]
    fn test_deserialize_rejects_unknown_format() {
        let coord = ChunkCoordinate::new(0, 0, 0);
        assert!(MapChunk::deserialize(coord, &[0xff, 1, 2, 3]).is_err());
        assert!(MapChunk::deserialize(coord, &[]).is_err());
    }
}
