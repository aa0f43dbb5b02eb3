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

//! The emerge pipeline: brings chunks into memory on request, loading them
//! from storage or generating them with the mapgen on a fixed pool of worker
//! threads.
//!
//! Requests for the same coordinate are coalesced into a single in-flight
//! job; every requester's callback fires exactly once with the same outcome.
//! Admission is bounded by a total queue ceiling plus per-peer quotas, so one
//! fast-moving client cannot starve the rest.

use std::{
    collections::{btree_map, BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracy_client::{plot, span};

use orestone_core::{coordinates::ChunkCoordinate, lighting::LightScratchpad};

use crate::run_handler;

use super::{
    game_map::{ChunkReadyState, MapChunk, ServerGameMap},
    mapgen::MapgenInterface,
    sunlight::RelightMode,
};

/// Request flag: the job may run the mapgen if the chunk is not in storage.
pub const BLOCK_EMERGE_ALLOW_GEN: u16 = 1 << 0;
/// Request flag: bypass the queue ceilings. For engine-internal requests that
/// must not be dropped.
pub const BLOCK_EMERGE_FORCE_QUEUE: u16 = 1 << 1;

/// Peer id for requests not attributable to any connected client. Such
/// requests share a single quota of half the total queue ceiling.
pub const PEER_ID_NONE: u16 = 0;

const MAX_STORAGE_RETRIES: u32 = 3;

/// Outcome of one emerge job, reported to every callback registered for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmergeAction {
    /// The job was dropped before running, e.g. at shutdown.
    Cancelled,
    /// The job ran but could not produce a chunk.
    Errored,
    /// The chunk was already resident.
    FromMemory,
    /// The chunk was loaded from storage.
    FromDisk,
    /// The chunk was newly generated.
    Generated,
}
impl EmergeAction {
    const COUNT: usize = 5;
    fn index(&self) -> usize {
        match self {
            EmergeAction::Cancelled => 0,
            EmergeAction::Errored => 1,
            EmergeAction::FromMemory => 2,
            EmergeAction::FromDisk => 3,
            EmergeAction::Generated => 4,
        }
    }
}

/// Completion callback for one emerge request. Runs on the worker thread that
/// finished the job (or the thread calling [`EmergeManager::stop`] for
/// cancellations), so it should be quick.
pub type EmergeCallback = Box<dyn FnOnce(ChunkCoordinate, EmergeAction) + Send + 'static>;

/// Tuning knobs for the emerge pipeline. Zero means "derive a default from
/// the machine/thread count"; all resolved values are clamped to sane ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergeConfig {
    /// Worker thread count. 0 = all but two hardware threads, minimum one.
    pub num_threads: usize,
    /// Ceiling on total in-flight jobs.
    pub queue_limit_total: u32,
    /// Per-peer quota for load-only requests. 0 = threads * 5 + 1.
    pub queue_limit_diskonly: u32,
    /// Per-peer quota for requests that may generate. 0 = threads + 1.
    pub queue_limit_generate: u32,
}
impl Default for EmergeConfig {
    fn default() -> Self {
        EmergeConfig {
            num_threads: 0,
            queue_limit_total: 256,
            queue_limit_diskonly: 0,
            queue_limit_generate: 0,
        }
    }
}
impl EmergeConfig {
    pub fn from_ron(text: &str) -> Result<EmergeConfig> {
        ron::from_str(text).with_context(|| "Failed to parse emerge config")
    }

    fn resolve(&self) -> ResolvedEmergeConfig {
        let num_threads = if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|x| x.get())
                .unwrap_or(1)
                .saturating_sub(2)
                .max(1)
        } else {
            self.num_threads
        };
        let diskonly = if self.queue_limit_diskonly == 0 {
            num_threads as u32 * 5 + 1
        } else {
            self.queue_limit_diskonly
        };
        let generate = if self.queue_limit_generate == 0 {
            num_threads as u32 + 1
        } else {
            self.queue_limit_generate
        };
        ResolvedEmergeConfig {
            num_threads,
            qlimit_total: self.queue_limit_total.clamp(1, 1_000_000),
            qlimit_diskonly: diskonly.clamp(1, 1_000_000),
            qlimit_generate: generate.clamp(1, 1_000_000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedEmergeConfig {
    num_threads: usize,
    qlimit_total: u32,
    qlimit_diskonly: u32,
    qlimit_generate: u32,
}

/// Counters of finished jobs by outcome, in order of [`EmergeAction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmergeStats {
    pub cancelled: u64,
    pub errored: u64,
    pub from_memory: u64,
    pub from_disk: u64,
    pub generated: u64,
}

struct BlockEmergeData {
    peer_requested: u16,
    flags: u16,
    callbacks: SmallVec<[EmergeCallback; 2]>,
}

struct QueueState {
    /// In-flight jobs by coordinate; presence here is what dedups requests.
    blocks_enqueued: BTreeMap<ChunkCoordinate, BlockEmergeData>,
    peer_queue_count: FxHashMap<u16, u32>,
    /// Per-worker job order. Entries always have a record in
    /// `blocks_enqueued` until popped.
    worker_queues: Vec<VecDeque<ChunkCoordinate>>,
}
impl QueueState {
    /// Admission control and dedup. Returns None when the request is refused
    /// by the queue limits, Some(true) when it was merged into an existing
    /// job, Some(false) when a new job record was created.
    fn push_block_emerge_data(
        &mut self,
        coord: ChunkCoordinate,
        peer_requested: u16,
        flags: u16,
        callback: Option<EmergeCallback>,
        config: &ResolvedEmergeConfig,
    ) -> Option<bool> {
        if flags & BLOCK_EMERGE_FORCE_QUEUE == 0 {
            if self.blocks_enqueued.len() >= config.qlimit_total as usize {
                return None;
            }
            let count_peer = self
                .peer_queue_count
                .get(&peer_requested)
                .copied()
                .unwrap_or(0);
            if peer_requested != PEER_ID_NONE {
                let qlimit_peer = if flags & BLOCK_EMERGE_ALLOW_GEN != 0 {
                    config.qlimit_generate
                } else {
                    config.qlimit_diskonly
                };
                if count_peer >= qlimit_peer {
                    return None;
                }
            } else {
                // Anonymous requests share half of the total ceiling.
                if count_peer * 2 >= config.qlimit_total {
                    return None;
                }
            }
        }

        match self.blocks_enqueued.entry(coord) {
            btree_map::Entry::Occupied(mut entry) => {
                let bedata = entry.get_mut();
                bedata.flags |= flags;
                if let Some(callback) = callback {
                    bedata.callbacks.push(callback);
                }
                Some(true)
            }
            btree_map::Entry::Vacant(entry) => {
                let mut callbacks = SmallVec::new();
                if let Some(callback) = callback {
                    callbacks.push(callback);
                }
                entry.insert(BlockEmergeData {
                    peer_requested,
                    flags,
                    callbacks,
                });
                *self.peer_queue_count.entry(peer_requested).or_insert(0) += 1;
                Some(false)
            }
        }
    }

    /// Removes the job record and releases the requesting peer's quota slot.
    fn pop_block_emerge_data(&mut self, coord: ChunkCoordinate) -> Option<BlockEmergeData> {
        let bedata = self.blocks_enqueued.remove(&coord)?;
        if let Some(count) = self.peer_queue_count.get_mut(&bedata.peer_requested) {
            debug_assert!(*count != 0);
            *count = count.saturating_sub(1);
        }
        Some(bedata)
    }

    /// The worker with the fewest queued jobs; ties go to the lowest index.
    fn optimal_worker(&self) -> usize {
        let mut index = 0;
        let mut lowest = self.worker_queues[0].len();
        for (i, queue) in self.worker_queues.iter().enumerate().skip(1) {
            if queue.len() < lowest {
                index = i;
                lowest = queue.len();
            }
        }
        index
    }
}

struct EmergeShared {
    map: Arc<ServerGameMap>,
    mapgen: Arc<dyn MapgenInterface>,
    config: ResolvedEmergeConfig,
    queue: Mutex<QueueState>,
    /// One wakeup per worker, all paired with `queue`'s mutex.
    wakeups: Vec<Condvar>,
    stopping: AtomicBool,
    completions: [AtomicU64; EmergeAction::COUNT],
}

enum Lifecycle {
    Created,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

/// Owns the emerge worker pool and its request queue. See the module docs.
pub struct EmergeManager {
    shared: Arc<EmergeShared>,
    lifecycle: Mutex<Lifecycle>,
}

impl EmergeManager {
    pub fn new(
        map: Arc<ServerGameMap>,
        mapgen: Arc<dyn MapgenInterface>,
        config: EmergeConfig,
    ) -> Arc<EmergeManager> {
        let config = config.resolve();
        info!(
            "Emerge pipeline: {} threads, queue limits total={} diskonly={} generate={}",
            config.num_threads, config.qlimit_total, config.qlimit_diskonly, config.qlimit_generate
        );
        Arc::new(EmergeManager {
            shared: Arc::new(EmergeShared {
                map,
                mapgen,
                config,
                queue: Mutex::new(QueueState {
                    blocks_enqueued: BTreeMap::new(),
                    peer_queue_count: FxHashMap::default(),
                    worker_queues: (0..config.num_threads).map(|_| VecDeque::new()).collect(),
                }),
                wakeups: (0..config.num_threads).map(|_| Condvar::new()).collect(),
                stopping: AtomicBool::new(false),
                completions: std::array::from_fn(|_| AtomicU64::new(0)),
            }),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Spawns the worker threads. May be called once; a stopped manager
    /// cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => bail!("Emerge workers already running"),
            Lifecycle::Stopped => bail!("Emerge manager was stopped and cannot be restarted"),
        }
        let mut handles = Vec::with_capacity(self.shared.config.num_threads);
        for i in 0..self.shared.config.num_threads {
            let shared = self.shared.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("emerge-{i}"))
                    .spawn(move || worker_loop(shared, i))?,
            );
        }
        *lifecycle = Lifecycle::Running(handles);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Stops the worker pool: workers finish their current job, every job
    /// still queued is popped and reported as [`EmergeAction::Cancelled`].
    /// Idempotent.
    pub fn stop(&self) {
        let handles = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(handles) => handles,
                _ => Vec::new(),
            }
        };
        self.shared.stopping.store(true, Ordering::SeqCst);
        for wakeup in &self.shared.wakeups {
            wakeup.notify_all();
        }
        for handle in handles {
            if handle.join().is_err() {
                error!("Emerge worker panicked outside of a job");
            }
        }

        let cancelled = {
            let mut state = self.shared.queue.lock();
            let coords: Vec<ChunkCoordinate> = state
                .worker_queues
                .iter_mut()
                .flat_map(|queue| queue.drain(..))
                .collect();
            let mut cancelled = Vec::new();
            for coord in coords {
                if let Some(bedata) = state.pop_block_emerge_data(coord) {
                    cancelled.push((coord, bedata));
                }
            }
            debug_assert!(state.blocks_enqueued.is_empty());
            cancelled
        };
        if !cancelled.is_empty() {
            info!("Cancelling {} queued emerge jobs", cancelled.len());
        }
        for (coord, bedata) in cancelled {
            for callback in bedata.callbacks {
                callback(coord, EmergeAction::Cancelled);
            }
            self.shared.completions[EmergeAction::Cancelled.index()]
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Requests that a chunk be brought into memory, without a callback.
    pub fn enqueue_block_emerge(
        &self,
        peer_id: u16,
        coord: ChunkCoordinate,
        allow_generate: bool,
        ignore_queue_limits: bool,
    ) -> bool {
        let mut flags = 0;
        if allow_generate {
            flags |= BLOCK_EMERGE_ALLOW_GEN;
        }
        if ignore_queue_limits {
            flags |= BLOCK_EMERGE_FORCE_QUEUE;
        }
        self.enqueue_block_emerge_ex(coord, peer_id, flags, None)
    }

    /// Requests that a chunk be brought into memory. Returns false if the
    /// request was refused by the queue limits (or the manager is stopping);
    /// returns true if it was queued or merged into an existing job, in which
    /// case `callback` will run exactly once.
    pub fn enqueue_block_emerge_ex(
        &self,
        coord: ChunkCoordinate,
        peer_id: u16,
        flags: u16,
        callback: Option<EmergeCallback>,
    ) -> bool {
        if !coord.is_in_bounds() {
            return false;
        }
        let worker_index = {
            let mut state = self.shared.queue.lock();
            if self.shared.stopping.load(Ordering::SeqCst) {
                return false;
            }
            match state.push_block_emerge_data(
                coord,
                peer_id,
                flags,
                callback,
                &self.shared.config,
            ) {
                None => return false,
                Some(true) => return true,
                Some(false) => {
                    let index = state.optimal_worker();
                    state.worker_queues[index].push_back(coord);
                    plot!(
                        "emerge queue depth",
                        state.blocks_enqueued.len() as f64
                    );
                    index
                }
            }
        };
        self.shared.wakeups[worker_index].notify_one();
        true
    }

    pub fn is_block_in_queue(&self, coord: ChunkCoordinate) -> bool {
        self.shared.queue.lock().blocks_enqueued.contains_key(&coord)
    }

    /// Number of jobs queued but not yet picked up by a worker.
    pub fn queue_size(&self) -> usize {
        self.shared.queue.lock().blocks_enqueued.len()
    }

    pub fn stats(&self) -> EmergeStats {
        let completions = &self.shared.completions;
        EmergeStats {
            cancelled: completions[EmergeAction::Cancelled.index()].load(Ordering::Relaxed),
            errored: completions[EmergeAction::Errored.index()].load(Ordering::Relaxed),
            from_memory: completions[EmergeAction::FromMemory.index()].load(Ordering::Relaxed),
            from_disk: completions[EmergeAction::FromDisk.index()].load(Ordering::Relaxed),
            generated: completions[EmergeAction::Generated.index()].load(Ordering::Relaxed),
        }
    }
}

impl Drop for EmergeManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<EmergeShared>, index: usize) {
    let mut scratchpad = LightScratchpad::default();
    loop {
        let (coord, bedata) = {
            let mut state = shared.queue.lock();
            loop {
                if shared.stopping.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(coord) = state.worker_queues[index].pop_front() {
                    match state.pop_block_emerge_data(coord) {
                        Some(bedata) => break (coord, bedata),
                        // Record already gone; nothing to report to.
                        None => continue,
                    }
                }
                shared.wakeups[index].wait(&mut state);
            }
        };

        let allow_gen = bedata.flags & BLOCK_EMERGE_ALLOW_GEN != 0;
        let action = process_job(&shared, coord, allow_gen, &mut scratchpad);
        for callback in bedata.callbacks {
            callback(coord, action);
        }
        shared.completions[action.index()].fetch_add(1, Ordering::Relaxed);
    }
}

fn process_job(
    shared: &EmergeShared,
    coord: ChunkCoordinate,
    allow_gen: bool,
    scratchpad: &mut LightScratchpad,
) -> EmergeAction {
    let _span = span!("emerge job");
    let map = &shared.map;

    // 1) Already resident?
    match map.chunk_ready_state(coord) {
        ChunkReadyState::Ready => return EmergeAction::FromMemory,
        ChunkReadyState::Failed => {
            // A previous attempt poisoned this coordinate; clear it and retry
            // from storage.
            map.remove_failed_chunk(coord);
        }
        ChunkReadyState::Absent => {}
    }

    // 2) In storage?
    match load_with_retries(shared, coord) {
        Ok(Some(chunk)) => {
            let needs_light = !chunk.lighting_complete;
            if !map.insert_chunk(chunk) {
                // A concurrent job for this coordinate beat us to it.
                return EmergeAction::FromMemory;
            }
            if needs_light {
                // The stored light may be stale, not just incomplete, so it is
                // rebuilt from scratch.
                if let Err(e) = relight(shared, coord, RelightMode::RemoveAndRecompute, scratchpad)
                {
                    warn!("Lighting repair for loaded chunk {:?} failed: {:?}", coord, e);
                }
            }
            return EmergeAction::FromDisk;
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to load chunk {:?}: {:?}", coord, e);
            map.insert_chunk_error(coord, e);
            return EmergeAction::Errored;
        }
    }

    // 3) Generate, if this job is allowed to.
    if !allow_gen {
        return EmergeAction::Errored;
    }
    let mut chunk = MapChunk::new(coord);
    let gen_result = run_handler!(
        || {
            shared.mapgen.fill_chunk(coord, &mut chunk);
            Ok(())
        },
        "mapgen"
    );
    if let Err(e) = gen_result {
        error!("Mapgen failed for chunk {:?}: {:?}", coord, e);
        map.insert_chunk_error(coord, e);
        return EmergeAction::Errored;
    }
    chunk.generated = true;
    chunk.is_underground = (coord.y as i64) * 17 <= shared.mapgen.water_level() as i64;
    chunk.dirty = true;
    if !map.insert_chunk(chunk) {
        // A concurrent job for this coordinate beat us to it.
        return EmergeAction::FromMemory;
    }

    if let Err(e) = relight(shared, coord, RelightMode::KeepBrighter, scratchpad) {
        warn!("Lighting for generated chunk {:?} failed: {:?}", coord, e);
    }
    if let Err(e) = persist_with_retries(shared, coord) {
        // The chunk is still usable in memory; it will be retried by the next
        // flush or unload.
        error!("Failed to persist generated chunk {:?}: {:?}", coord, e);
    }
    EmergeAction::Generated
}

fn load_with_retries(shared: &EmergeShared, coord: ChunkCoordinate) -> Result<Option<MapChunk>> {
    let mut attempt = 0;
    loop {
        match shared.map.load_chunk_from_database(coord) {
            Ok(x) => return Ok(x),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_STORAGE_RETRIES {
                    return Err(e);
                }
                warn!(
                    "Retrying chunk load for {:?} (attempt {}): {:?}",
                    coord, attempt, e
                );
            }
        }
    }
}

fn persist_with_retries(shared: &EmergeShared, coord: ChunkCoordinate) -> Result<()> {
    let mut attempt = 0;
    loop {
        match shared.map.persist_chunk(coord) {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_STORAGE_RETRIES {
                    return Err(e);
                }
                warn!(
                    "Retrying chunk persist for {:?} (attempt {}): {:?}",
                    coord, attempt, e
                );
            }
        }
    }
}

/// Runs both lighting passes over a chunk the pipeline just made resident:
/// the per-column sunlight pass (walking downward through any invalidated
/// chunks), then the diffuse spread over every touched chunk.
fn relight(
    shared: &EmergeShared,
    coord: ChunkCoordinate,
    mode: RelightMode,
    scratchpad: &mut LightScratchpad,
) -> Result<()> {
    let mut light_sources = rustc_hash::FxHashSet::default();
    let update = shared.map.update_sunlight(coord, mode, &mut light_sources)?;
    // A batch with no dark receptive nodes and no sunlit seeds (e.g. solid
    // stone all the way through) has nothing for the spread pass to do.
    if update.dark_air_left || !light_sources.is_empty() {
        for relit_coord in &update.relit {
            shared.map.spread_chunk_light(*relit_coord, scratchpad)?;
        }
    }
    for relit_coord in update.relit {
        shared.map.mutate_chunk(relit_coord, |chunk| {
            chunk.lighting_complete = true;
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ResolvedEmergeConfig {
        ResolvedEmergeConfig {
            num_threads: 3,
            qlimit_total: 4,
            qlimit_diskonly: 2,
            qlimit_generate: 1,
        }
    }

    fn empty_state(num_workers: usize) -> QueueState {
        QueueState {
            blocks_enqueued: BTreeMap::new(),
            peer_queue_count: FxHashMap::default(),
            worker_queues: (0..num_workers).map(|_| VecDeque::new()).collect(),
        }
    }

    fn coord(x: i32) -> ChunkCoordinate {
        ChunkCoordinate::new(x, 0, 0)
    }

    #[test]
    fn test_push_dedups_and_merges_flags() {
        let config = test_config();
        let mut state = empty_state(1);
        assert_eq!(
            state.push_block_emerge_data(coord(0), 1, 0, None, &config),
            Some(false)
        );
        assert_eq!(
            state.push_block_emerge_data(coord(0), 2, BLOCK_EMERGE_ALLOW_GEN, None, &config),
            Some(true)
        );
        let bedata = state.pop_block_emerge_data(coord(0)).unwrap();
        assert_eq!(bedata.peer_requested, 1);
        assert_eq!(bedata.flags, BLOCK_EMERGE_ALLOW_GEN);
        assert!(state.pop_block_emerge_data(coord(0)).is_none());
    }

    #[test]
    fn test_per_peer_quota_depends_on_allow_gen() {
        let config = test_config();
        let mut state = empty_state(1);
        // Generate quota is 1.
        assert_eq!(
            state.push_block_emerge_data(coord(0), 1, BLOCK_EMERGE_ALLOW_GEN, None, &config),
            Some(false)
        );
        assert_eq!(
            state.push_block_emerge_data(coord(1), 1, BLOCK_EMERGE_ALLOW_GEN, None, &config),
            None
        );
        // The diskonly quota is larger, so a load-only request still fits.
        assert_eq!(
            state.push_block_emerge_data(coord(1), 1, 0, None, &config),
            Some(false)
        );
        assert_eq!(
            state.push_block_emerge_data(coord(2), 1, 0, None, &config),
            None
        );
        // Popping releases the slot.
        state.pop_block_emerge_data(coord(0)).unwrap();
        assert_eq!(
            state.push_block_emerge_data(coord(2), 1, 0, None, &config),
            Some(false)
        );
    }

    #[test]
    fn test_anonymous_peer_capped_at_half_total() {
        let config = test_config();
        let mut state = empty_state(1);
        assert_eq!(
            state.push_block_emerge_data(coord(0), PEER_ID_NONE, 0, None, &config),
            Some(false)
        );
        assert_eq!(
            state.push_block_emerge_data(coord(1), PEER_ID_NONE, 0, None, &config),
            Some(false)
        );
        // 2 * 2 >= qlimit_total (4), so the third anonymous request is refused.
        assert_eq!(
            state.push_block_emerge_data(coord(2), PEER_ID_NONE, 0, None, &config),
            None
        );
        // A named peer is not affected.
        assert_eq!(
            state.push_block_emerge_data(coord(2), 5, 0, None, &config),
            Some(false)
        );
    }

    #[test]
    fn test_force_queue_bypasses_all_limits() {
        let config = test_config();
        let mut state = empty_state(1);
        for x in 0..4 {
            assert!(state
                .push_block_emerge_data(coord(x), u16::try_from(x).unwrap() + 1, 0, None, &config)
                .is_some());
        }
        assert_eq!(
            state.push_block_emerge_data(coord(4), 9, 0, None, &config),
            None
        );
        assert_eq!(
            state.push_block_emerge_data(coord(4), 9, BLOCK_EMERGE_FORCE_QUEUE, None, &config),
            Some(false)
        );
    }

    #[test]
    fn test_optimal_worker_prefers_lowest_index_on_ties() {
        let mut state = empty_state(3);
        assert_eq!(state.optimal_worker(), 0);
        state.worker_queues[0].push_back(coord(0));
        assert_eq!(state.optimal_worker(), 1);
        state.worker_queues[1].push_back(coord(1));
        state.worker_queues[2].push_back(coord(2));
        state.worker_queues[2].push_back(coord(3));
        assert_eq!(state.optimal_worker(), 0);
    }
}
