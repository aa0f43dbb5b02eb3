#![cfg(test)]
use crate::block_id::BlockId;
use crate::coordinates::ChunkOffset;
use crate::lighting::{
    blend_light, decode_light, diminish_light, spread_light, ChunkBuffer, LightBank,
    LightScratchpad, NeighborBuffer, PackedLight, LIGHT_MAX, LIGHT_SUN,
};

const AIR: BlockId = BlockId(0);
const STONE: BlockId = BlockId(1 << 12);
const TORCH: BlockId = BlockId(2 << 12);

fn propagates(id: BlockId) -> bool {
    id != STONE
}
fn emission(id: BlockId) -> u8 {
    if id == TORCH {
        13
    } else {
        0
    }
}

#[test]
fn decode_light_is_monotone_and_tops_out_at_255() {
    for stored in 0..LIGHT_SUN {
        assert!(decode_light(stored) <= decode_light(stored + 1));
    }
    assert_eq!(decode_light(LIGHT_SUN), 255);
    assert_eq!(decode_light(LIGHT_MAX), 255);
    // Darkest stored level still renders visibly, unlike a linear ramp
    assert!(decode_light(0) > 0);
}

#[test]
fn blend_light_endpoints_and_monotonicity() {
    for (d, n) in [(15, 0), (0, 15), (9, 3), (3, 9)] {
        assert_eq!(blend_light(0, d, n), n);
        assert_eq!(blend_light(1000, d, n), d);
    }
    // Monotone in the daylight factor when day >= night
    let mut prev = 0;
    for factor in (0..=1000).step_by(50) {
        let blended = blend_light(factor, 14, 2);
        assert!(blended >= prev);
        prev = blended;
    }
    // Out-of-range factors clamp rather than overflow
    assert_eq!(blend_light(40000, 12, 3), 12);
}

#[test]
fn diminish_light_tiers() {
    assert_eq!(diminish_light(0), 0);
    assert_eq!(diminish_light(1), 0);
    assert_eq!(diminish_light(7), 6);
    assert_eq!(diminish_light(LIGHT_MAX), LIGHT_MAX - 1);
    assert_eq!(diminish_light(LIGHT_SUN), LIGHT_MAX - 1);
}

#[test]
fn packed_light_banks_are_independent() {
    let mut light = PackedLight::new(13, 4);
    assert_eq!(light.day(), 13);
    assert_eq!(light.night(), 4);
    light.set(LightBank::Day, 2);
    assert_eq!(light.day(), 2);
    assert_eq!(light.night(), 4);
    light.set(LightBank::Night, 15);
    assert_eq!(light.get(LightBank::Day), 2);
    assert_eq!(light.get(LightBank::Night), 15);
}

/// Neighborhood with only the center chunk present.
struct SingleChunk {
    blocks: Box<[BlockId; 4096]>,
    day_light: Box<[u8; 4096]>,
}
impl SingleChunk {
    fn filled(id: BlockId) -> SingleChunk {
        SingleChunk {
            blocks: Box::new([id; 4096]),
            day_light: Box::new([0; 4096]),
        }
    }
    fn set(&mut self, x: u8, y: u8, z: u8, id: BlockId) {
        self.blocks[ChunkOffset::new(x, y, z).as_index()] = id;
    }
}
struct SingleChunkView<'a>(&'a SingleChunk);
impl ChunkBuffer for SingleChunkView<'_> {
    fn block(&self, offset: ChunkOffset) -> BlockId {
        self.0.blocks[offset.as_index()]
    }
    fn day_light(&self, offset: ChunkOffset) -> u8 {
        self.0.day_light[offset.as_index()]
    }
}
impl NeighborBuffer for SingleChunk {
    type Chunk<'a> = SingleChunkView<'a>;
    fn get(&self, dx: i32, dy: i32, dz: i32) -> Option<Self::Chunk<'_>> {
        if dx == 0 && dy == 0 && dz == 0 {
            Some(SingleChunkView(self))
        } else {
            None
        }
    }
}

#[test]
fn torch_attenuates_one_tier_per_node() {
    let mut chunk = SingleChunk::filled(AIR);
    chunk.set(8, 8, 8, TORCH);
    let mut scratchpad = LightScratchpad::default();
    spread_light(&chunk, &mut scratchpad, propagates, emission);

    assert_eq!(scratchpad.get_night_light(8, 8, 8), 13);
    assert_eq!(scratchpad.get_night_light(9, 8, 8), 12);
    assert_eq!(scratchpad.get_night_light(8, 8, 12), 9);
    // Manhattan distance 13 is the last lit node
    assert_eq!(scratchpad.get_night_light(8 + 6, 8 + 7, 8), 0);
    // The torch also feeds the day bank
    assert_eq!(scratchpad.get_day_light(8, 8, 8), 13);
}

#[test]
fn opaque_wall_shadows_the_far_side() {
    let mut chunk = SingleChunk::filled(AIR);
    chunk.set(4, 8, 8, TORCH);
    for y in 0..16 {
        for z in 0..16 {
            chunk.set(8, y, z, STONE);
        }
    }
    let mut scratchpad = LightScratchpad::default();
    spread_light(&chunk, &mut scratchpad, propagates, emission);
    assert_eq!(scratchpad.get_night_light(8, 8, 8), 0);
    // Directly behind the wall: light has to detour around the chunk-local
    // wall through the missing-neighbor boundary, so nothing arrives.
    assert_eq!(scratchpad.get_night_light(9, 8, 8), 0);
    assert_eq!(scratchpad.get_night_light(7, 8, 8), 10);
}

#[test]
fn spread_is_deterministic_across_runs() {
    let mut chunk = SingleChunk::filled(AIR);
    chunk.set(2, 3, 4, TORCH);
    chunk.set(12, 11, 10, TORCH);
    chunk.set(7, 7, 7, STONE);
    for x in 0..16u8 {
        for z in 0..16u8 {
            chunk.day_light[ChunkOffset::new(x, 15, z).as_index()] = LIGHT_SUN;
        }
    }
    let mut first = LightScratchpad::default();
    spread_light(&chunk, &mut first, propagates, emission);
    let mut second = LightScratchpad::default();
    spread_light(&chunk, &mut second, propagates, emission);
    for x in 0..16 {
        for y in 0..16 {
            for z in 0..16 {
                assert_eq!(first.get_packed(x, y, z), second.get_packed(x, y, z));
            }
        }
    }
}

#[test]
fn removing_a_source_and_respreading_darkens() {
    let mut chunk = SingleChunk::filled(AIR);
    chunk.set(8, 8, 8, TORCH);
    let mut scratchpad = LightScratchpad::default();
    spread_light(&chunk, &mut scratchpad, propagates, emission);
    assert!(scratchpad.get_night_light(10, 8, 8) > 0);

    chunk.set(8, 8, 8, AIR);
    spread_light(&chunk, &mut scratchpad, propagates, emission);
    for x in 0..16 {
        for y in 0..16 {
            for z in 0..16 {
                assert_eq!(scratchpad.get_night_light(x, y, z), 0);
            }
        }
    }
}
