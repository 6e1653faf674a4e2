/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! The per-table shadow store.
//!
//! The driver does not keep the controller-supplied metadata, and reads need
//! a reverse lookup from match key to driver handle, so the frontend mirrors
//! every table entry here: canonical match key → `{handle,
//! controller_metadata}`.  Each table has its own reader-writer lock; a write
//! path holds the exclusive guard across the driver call *and* the store
//! update that follows, a read path holds the shared guard while fetching
//! driver entries and cross-checking the store.  That keeps the mirror exact
//! per table while letting independent tables proceed concurrently.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::driver::EntryHandle;
use crate::match_key::MatchKey;
use crate::p4info::P4InfoHandle;

/// What the shadow remembers about one driver entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryData {
    pub handle: EntryHandle,
    pub controller_metadata: u64,
}

/// The entries of one table, only reachable through that table's lock.
#[derive(Debug, Default)]
pub struct TableEntries {
    entries: HashMap<Vec<u8>, EntryData>,
}

impl TableEntries {
    pub fn add_entry(&mut self, key: &MatchKey, data: EntryData) {
        self.entries.insert(key.canonical().to_vec(), data);
    }

    pub fn get_entry(&self, key: &MatchKey) -> Option<&EntryData> {
        self.entries.get(key.canonical())
    }

    pub fn get_entry_mut(&mut self, key: &MatchKey) -> Option<&mut EntryData> {
        self.entries.get_mut(key.canonical())
    }

    pub fn remove_entry(&mut self, key: &MatchKey) -> Option<EntryData> {
        self.entries.remove(key.canonical())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TableInfoStore {
    tables: HashMap<u32, RwLock<TableEntries>>,
}

impl TableInfoStore {
    /// An empty store knowing about every table in the pipeline.
    pub fn rebuild(p4info: &P4InfoHandle) -> TableInfoStore {
        let tables = p4info
            .tables()
            .map(|t| (t.id, RwLock::new(TableEntries::default())))
            .collect();
        TableInfoStore { tables }
    }

    /// Exclusive guard over one table's entries, for write paths.
    pub fn lock_table(&self, table_id: u32) -> Option<RwLockWriteGuard<'_, TableEntries>> {
        self.tables.get(&table_id).map(|t| t.write().unwrap())
    }

    /// Shared guard over one table's entries, for read paths.
    pub fn lock_table_shared(&self, table_id: u32) -> Option<RwLockReadGuard<'_, TableEntries>> {
        self.tables.get(&table_id).map(|t| t.read().unwrap())
    }

    /// Drops every table; called on pipeline change before the store is
    /// rebuilt from the new schema.
    pub fn reset(&mut self) {
        self.tables.clear();
    }
}
