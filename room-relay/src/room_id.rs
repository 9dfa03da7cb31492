//! Room id allocation
//!
//! Ids come from a monotonic counter backed by a free-list. Released ids are
//! handed out again, lowest first, before a new id is minted, which keeps
//! ids small under churn.
// Copyright 2025 Francisco F. Pinochet
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


use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Room identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Free-list backed room id allocator
#[derive(Debug, Default)]
pub struct RoomIdAllocator {
    /// Next never-used id
    next: u64,
    /// Ids released by destroyed rooms
    released: BTreeSet<RoomId>,
}

impl RoomIdAllocator {
    /// Create an allocator starting at id 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lowest released id, or mint a new one
    pub fn allocate(&mut self) -> RoomId {
        if let Some(id) = self.released.pop_first() {
            return id;
        }
        let id = RoomId(self.next);
        self.next += 1;
        id
    }

    /// Return an id to the free-list
    ///
    /// Releasing an id that was never allocated, or releasing twice, is
    /// ignored.
    pub fn release(&mut self, id: RoomId) {
        if id.0 < self.next {
            self.released.insert(id);
        }
    }

    /// Number of ids currently handed out
    pub fn in_use(&self) -> usize {
        self.next as usize - self.released.len()
    }
}
