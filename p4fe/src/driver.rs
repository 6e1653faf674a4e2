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

//! The downward interface to a target-specific PI driver.
//!
//! Everything the frontend needs from a forwarding device is behind the
//! [`PiDriver`] trait: device lifecycle, sessions, table and action-profile
//! manipulation, meters, counters, and packet I/O.  Drivers are synchronous
//! and may be called from any request thread.  Fetch results are returned as
//! owned values the caller iterates.

use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;
use tracing::warn;

use proto::status::Status;

use crate::action_entry::{ActionData, ActionEntry};
use crate::match_key::MatchKey;
use crate::p4info::P4InfoHandle;

pub type DeviceId = u64;
/// Opaque driver reference to a keyed or default table entry.
pub type EntryHandle = u64;
/// Opaque driver reference to an action profile member or group.
pub type IndirectHandle = u64;
pub type SessionHandle = u64;

/// A device target: a device plus the set of pipes addressed.  All pipes of a
/// device are programmed the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DevTgt {
    pub device_id: DeviceId,
    pub pipe_mask: u16,
}

impl DevTgt {
    pub fn all_pipes(device_id: DeviceId) -> DevTgt {
        DevTgt { device_id, pipe_mask: 0xffff }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeterUnit {
    #[default]
    Default,
    Packets,
    Bytes,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeterType {
    #[default]
    Default,
    ColorAware,
    ColorUnaware,
}

/// A two-rate three-color meter configuration in driver form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeterSpec {
    pub cir: u64,
    pub cburst: u32,
    pub pir: u64,
    pub pburst: u32,
    pub unit: MeterUnit,
    pub meter_type: MeterType,
}

bitflags! {
    /// Which units of a counter cell hold valid data.
    pub struct CounterUnits: u32 {
        const PACKETS = 0b01;
        const BYTES = 0b10;
    }
}

bitflags! {
    /// Options for a counter read.
    pub struct CounterFlags: u32 {
        const HW_SYNC = 0b01;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CounterData {
    pub valid: CounterUnits,
    pub packets: u64,
    pub bytes: u64,
}

/// One table entry yielded by a driver fetch.
#[derive(Clone, Debug)]
pub struct FetchedTableEntry {
    pub key: MatchKey,
    /// `None` when the entry has no action attached.
    pub action: Option<ActionEntry>,
    pub handle: EntryHandle,
}

#[derive(Clone, Debug)]
pub struct FetchedMember {
    pub action: ActionData,
    pub handle: IndirectHandle,
}

#[derive(Clone, Debug)]
pub struct FetchedGroup {
    pub handle: IndirectHandle,
    pub members: Vec<IndirectHandle>,
}

/// The result of an action-profile fetch: members first, then groups.
#[derive(Clone, Debug, Default)]
pub struct ActProfFetch {
    pub members: Vec<FetchedMember>,
    pub groups: Vec<FetchedGroup>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("device is not assigned")]
    NotAssigned,
    #[error("duplicate entry")]
    DuplicateEntry,
    #[error("entry not found")]
    EntryNotFound,
    #[error("handle not found")]
    HandleNotFound,
    #[error("resource is in use")]
    InUse,
    #[error("target error: {0}")]
    Target(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

impl From<DriverError> for Status {
    /// The default collapse for a driver failure the frontend has no better
    /// taxonomy for.
    fn from(e: DriverError) -> Status {
        Status::unknown(e.to_string())
    }
}

/// The operations the frontend requires from a PI driver.
///
/// Implementations must be thread-safe: the frontend calls in from multiple
/// request threads, serialized per table and per action profile but not
/// globally.
pub trait PiDriver: Send + Sync {
    fn init(&self, max_devices: usize) -> DriverResult<()>;
    fn destroy(&self) -> DriverResult<()>;

    fn is_device_assigned(&self, device_id: DeviceId) -> bool;
    fn assign_device(&self, device_id: DeviceId, extras: &[(String, String)]) -> DriverResult<()>;
    fn remove_device(&self, device_id: DeviceId) -> DriverResult<()>;
    fn update_device_start(
        &self,
        device_id: DeviceId,
        p4info: &P4InfoHandle,
        device_data: &[u8],
    ) -> DriverResult<()>;
    fn update_device_end(&self, device_id: DeviceId) -> DriverResult<()>;

    fn session_open(&self, batch: bool) -> DriverResult<SessionHandle>;
    fn session_close(&self, session: SessionHandle) -> DriverResult<()>;

    fn entry_add(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        key: &MatchKey,
        action: &ActionEntry,
    ) -> DriverResult<EntryHandle>;
    fn entry_modify_wkey(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        key: &MatchKey,
        action: &ActionEntry,
    ) -> DriverResult<()>;
    fn entry_delete_wkey(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        key: &MatchKey,
    ) -> DriverResult<()>;
    fn default_entry_set(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        table_id: u32,
        action: &ActionEntry,
    ) -> DriverResult<EntryHandle>;
    fn table_entries_fetch(
        &self,
        session: SessionHandle,
        device_id: DeviceId,
        table_id: u32,
    ) -> DriverResult<Vec<FetchedTableEntry>>;

    fn member_create(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        action: &ActionData,
    ) -> DriverResult<IndirectHandle>;
    fn member_modify(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        member: IndirectHandle,
        action: &ActionData,
    ) -> DriverResult<()>;
    fn member_delete(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        member: IndirectHandle,
    ) -> DriverResult<()>;
    fn group_create(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        max_size: usize,
    ) -> DriverResult<IndirectHandle>;
    fn group_delete(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        group: IndirectHandle,
    ) -> DriverResult<()>;
    fn group_add_member(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        group: IndirectHandle,
        member: IndirectHandle,
    ) -> DriverResult<()>;
    fn group_remove_member(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        group: IndirectHandle,
        member: IndirectHandle,
    ) -> DriverResult<()>;
    fn act_prof_entries_fetch(
        &self,
        session: SessionHandle,
        device_id: DeviceId,
        act_prof_id: u32,
    ) -> DriverResult<ActProfFetch>;

    fn meter_set(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        meter_id: u32,
        index: i64,
        spec: &MeterSpec,
    ) -> DriverResult<()>;
    fn meter_set_direct(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        meter_id: u32,
        entry: EntryHandle,
        spec: &MeterSpec,
    ) -> DriverResult<()>;

    fn counter_read(
        &self,
        session: SessionHandle,
        tgt: DevTgt,
        counter_id: u32,
        index: i64,
        flags: CounterFlags,
    ) -> DriverResult<CounterData>;

    fn packet_out_send(&self, device_id: DeviceId, packet: &[u8]) -> DriverResult<()>;
    /// Installs the hook the driver invokes, from its own notification
    /// thread, for every packet punted to the controller.
    fn packet_in_register(&self, device_id: DeviceId, hook: PacketInHook);
}

pub type PacketInHook = Box<dyn Fn(DeviceId, &[u8]) + Send + Sync>;

/// A scoped driver session.  Opens on creation and closes on drop; a batched
/// session groups every mutation issued through it, a non-batched session
/// commits each call as it goes.
pub struct Session {
    driver: Arc<dyn PiDriver>,
    handle: SessionHandle,
}

impl Session {
    pub fn open(driver: Arc<dyn PiDriver>, batch: bool) -> Result<Session, Status> {
        let handle = driver.session_open(batch)?;
        Ok(Session { driver, handle })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.driver.session_close(self.handle) {
            warn!("failed to close driver session {}: {}", self.handle, e);
        }
    }
}
