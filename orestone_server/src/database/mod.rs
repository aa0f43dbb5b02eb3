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
pub mod rocksdb;

use anyhow::Result;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::HashMap;

pub enum KeySpace {
    /// Core metadata for the game state, e.g. the block type list.
    /// Should generally contain only hardcoded keys.
    Metadata,
    /// Map chunks, keyed by the chunk coordinate
    MapchunkData,
}
impl KeySpace {
    pub fn make_key(&self, key: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(key.len() + 1);
        result.push(self.identifier());
        result.extend_from_slice(key);
        result
    }

    fn identifier(&self) -> u8 {
        match self {
            KeySpace::Metadata => b'0',
            KeySpace::MapchunkData => b'm',
        }
    }
}

pub trait GameDatabase: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Same as get, but does not keep the value cached in memory.
    ///
    /// Default impl will just call get, ignoring the cache hint.
    fn get_nontemporal(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get(key)
    }
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&self, key: &[u8]) -> Result<()>;
    fn flush(&self) -> Result<()>;

    fn read_prefix(
        &self,
        prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()>;
}

/// Test-only game database
pub struct InMemGameDatabase {
    data: Mutex<FxHashMap<Vec<u8>, Vec<u8>>>,
}
impl InMemGameDatabase {
    pub fn new() -> InMemGameDatabase {
        InMemGameDatabase {
            data: HashMap::default().into(),
        }
    }
}
impl GameDatabase for InMemGameDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn read_prefix(
        &self,
        prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        for (key, value) in self.data.lock().iter() {
            if key.starts_with(prefix) {
                callback(key, value)?;
            }
        }
        Ok(())
    }
}
