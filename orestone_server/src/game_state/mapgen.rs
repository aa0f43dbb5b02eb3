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

use orestone_core::coordinates::ChunkCoordinate;

use super::game_map::MapChunk;

/// Interface for a map generator.
pub trait MapgenInterface: Send + Sync {
    /// Fills the given chunk with initial terrain. The chunk starts out as
    /// all-air; implementations write blocks only, lighting is computed by the
    /// emerge pipeline after this returns.
    ///
    /// This may be called from multiple worker threads concurrently; a panic
    /// here is isolated to the requesting job rather than tearing down the
    /// process.
    fn fill_chunk(&self, coord: ChunkCoordinate, chunk: &mut MapChunk);

    /// The Y level at or below which freshly generated chunks are considered
    /// underground for sunlight seeding purposes.
    fn water_level(&self) -> i32 {
        0
    }
}
