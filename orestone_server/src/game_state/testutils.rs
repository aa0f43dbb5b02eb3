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

use std::sync::{mpsc, Arc, Barrier};
use std::time::Duration;

use orestone_core::{
    block_id::BlockId,
    constants::blocks::AIR,
    coordinates::ChunkCoordinate,
};
use parking_lot::Mutex;

use crate::database::InMemGameDatabase;

use super::{
    blocks::{BlockType, BlockTypeManager},
    emerge::{EmergeAction, EmergeConfig, EmergeManager, BLOCK_EMERGE_ALLOW_GEN},
    game_map::{MapChunk, ServerGameMap},
    mapgen::MapgenInterface,
};

/// Flat-terrain mapgen: solid stone strictly below `surface_y`, air above.
/// Panics on demand for panic-isolation tests, and can stall the first
/// generation of a chosen chunk on a barrier for concurrency tests.
pub(crate) struct FlatMapgen {
    pub(crate) stone: BlockId,
    pub(crate) surface_y: i32,
    pub(crate) water_level: i32,
    pub(crate) panic_at: Mutex<Option<ChunkCoordinate>>,
    pub(crate) hold_first: Mutex<Option<(ChunkCoordinate, Arc<Barrier>)>>,
}
impl MapgenInterface for FlatMapgen {
    fn fill_chunk(&self, coord: ChunkCoordinate, chunk: &mut MapChunk) {
        if *self.panic_at.lock() == Some(coord) {
            panic!("requested mapgen panic at {:?}", coord);
        }
        let gate = {
            let mut hold = self.hold_first.lock();
            if hold.as_ref().is_some_and(|(held, _)| *held == coord) {
                hold.take().map(|(_, barrier)| barrier)
            } else {
                None
            }
        };
        if let Some(barrier) = gate {
            // Rendezvous once to signal we are inside the generator, then
            // again to wait for permission to finish.
            barrier.wait();
            barrier.wait();
        }
        for index in 0..orestone_core::constants::CHUNK_VOLUME {
            let offset = orestone_core::coordinates::ChunkOffset::from_index(index);
            let world_y = coord.y * 16 + offset.y as i32;
            if world_y < self.surface_y {
                chunk.set_block(offset, self.stone);
            }
        }
    }
    fn water_level(&self) -> i32 {
        self.water_level
    }
}

pub(crate) struct TestWorld {
    pub(crate) database: Arc<InMemGameDatabase>,
    pub(crate) map: Arc<ServerGameMap>,
    pub(crate) mapgen: Arc<FlatMapgen>,
    pub(crate) air: BlockId,
    pub(crate) stone: BlockId,
    pub(crate) glass: BlockId,
    pub(crate) torch: BlockId,
}

/// A world with a flat mapgen (surface at y=0) and a handful of block types
/// exercising every lighting behavior: opaque, diminishing-transparent, and
/// emitting. The water level sits far below anything the tests touch so the
/// underground heuristic stays out of the way unless a test asks for it.
pub(crate) fn testonly_make_world() -> TestWorld {
    testonly_make_world_with_database(Arc::new(InMemGameDatabase::new()))
}

/// Same as [`testonly_make_world`], but over an existing database. Block
/// registration order is fixed, so IDs are stable across worlds and persisted
/// chunks remain meaningful.
pub(crate) fn testonly_make_world_with_database(database: Arc<InMemGameDatabase>) -> TestWorld {
    let mut block_types = BlockTypeManager::new();
    let stone = block_types
        .register_block(BlockType::new_solid_opaque("test:stone"))
        .unwrap();
    let glass = block_types
        .register_block(BlockType {
            short_name: "test:glass".to_string(),
            allow_light_propagation: true,
            sunlight_propagates: false,
            light_emission: 0,
            solid: true,
        })
        .unwrap();
    let torch = block_types
        .register_block(BlockType {
            short_name: "test:torch".to_string(),
            allow_light_propagation: true,
            sunlight_propagates: true,
            light_emission: 13,
            solid: false,
        })
        .unwrap();
    let air = block_types.get_by_name(AIR).unwrap();

    let map = ServerGameMap::new(database.clone(), Arc::new(block_types));
    let mapgen = Arc::new(FlatMapgen {
        stone,
        surface_y: 0,
        water_level: -1000,
        panic_at: Mutex::new(None),
        hold_first: Mutex::new(None),
    });
    TestWorld {
        database,
        map,
        mapgen,
        air,
        stone,
        glass,
        torch,
    }
}

pub(crate) fn testonly_make_emerge(world: &TestWorld, config: EmergeConfig) -> Arc<EmergeManager> {
    EmergeManager::new(world.map.clone(), world.mapgen.clone(), config)
}

/// Enqueues an emerge with generation allowed and blocks until its callback
/// reports an outcome.
pub(crate) fn emerge_and_wait(emerge: &EmergeManager, coord: ChunkCoordinate) -> EmergeAction {
    emerge_and_wait_with_flags(emerge, coord, BLOCK_EMERGE_ALLOW_GEN)
}

pub(crate) fn emerge_and_wait_with_flags(
    emerge: &EmergeManager,
    coord: ChunkCoordinate,
    flags: u16,
) -> EmergeAction {
    let (sender, receiver) = mpsc::channel();
    let accepted = emerge.enqueue_block_emerge_ex(
        coord,
        1,
        flags,
        Some(Box::new(move |_, action| {
            sender.send(action).unwrap();
        })),
    );
    assert!(accepted, "emerge request for {:?} was refused", coord);
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("emerge did not complete in time")
}
