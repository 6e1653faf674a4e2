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

//! Test scaffolding: an in-memory PI driver and a small fixture pipeline.
//!
//! [`FakeDriver`] implements the full [`PiDriver`] contract against hash
//! maps, with the failure modes a real target exhibits (unassigned device,
//! duplicate entries, members still referenced by groups, groups still
//! referenced by table entries) plus a fail-injection knob for exercising
//! rollback paths.  The fixture pipeline has a direct table `t1`, an
//! indirect table `t2` implemented by action profile `ap1`, and one of each
//! counter and meter flavor.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use proto::p4info::{
    Action as P4Action,
    ActionParam as P4ActionParam,
    ActionProfile,
    ActionRef,
    ControllerPacketMetadata,
    ControllerPacketMetadataField,
    Counter,
    DirectCounter,
    DirectMeter,
    MatchField,
    MatchType,
    Meter,
    P4Info,
    Preamble,
    Table,
};
use proto::p4runtime::{
    Action,
    ActionParam,
    ConfigAction,
    Entity,
    FieldMatch,
    FieldMatchType,
    ForwardingPipelineConfig,
    TableAction,
    TableEntry,
    Update,
    UpdateType,
    WriteRequest,
};
use proto::status::Status;

use crate::action_entry::{ActionData, ActionEntry};
use crate::device_config::DeviceConfig;
use crate::device_mgr::DeviceMgr;
use crate::driver::{
    ActProfFetch,
    CounterData,
    CounterFlags,
    CounterUnits,
    DevTgt,
    DeviceId,
    DriverError,
    DriverResult,
    EntryHandle,
    FetchedGroup,
    FetchedMember,
    FetchedTableEntry,
    IndirectHandle,
    MeterSpec,
    PacketInHook,
    PiDriver,
    SessionHandle,
};
use crate::match_key::MatchKey;
use crate::p4info::P4InfoHandle;

pub const DEVICE_ID: u64 = 1;

pub const TABLE_T1: u32 = 0x0200_0001;
pub const TABLE_T2: u32 = 0x0200_0002;
pub const TABLE_T3: u32 = 0x0200_0003;
pub const ACTION_A1: u32 = 0x0100_0001;
pub const ACT_PROF_AP1: u32 = 0x1100_0001;
pub const COUNTER_C1: u32 = 0x1200_0001;
pub const DIRECT_COUNTER_DC1: u32 = 0x1300_0001;
pub const METER_M1: u32 = 0x1400_0001;
pub const DIRECT_METER_DM1: u32 = 0x1500_0001;
pub const COUNTER_C1_SIZE: i64 = 4;

#[derive(Clone)]
struct FakeTableEntry {
    handle: EntryHandle,
    action: ActionEntry,
}

#[derive(Default)]
struct FakeActProf {
    members: HashMap<IndirectHandle, ActionData>,
    member_order: Vec<IndirectHandle>,
    groups: HashMap<IndirectHandle, Vec<IndirectHandle>>,
    group_order: Vec<IndirectHandle>,
}

#[derive(Default)]
struct FakeDevice {
    started: bool,
    committed: bool,
    extras: Vec<(String, String)>,
    device_data: Vec<u8>,
    /// Keyed entries per table, by canonical match key bytes.
    tables: HashMap<u32, HashMap<Vec<u8>, FakeTableEntry>>,
    default_entries: HashMap<u32, FakeTableEntry>,
    act_profs: HashMap<u32, FakeActProf>,
    meters: HashMap<(u32, i64), MeterSpec>,
    direct_meters: HashMap<(u32, EntryHandle), MeterSpec>,
    counters: HashMap<(u32, i64), (u64, u64)>,
    sent_packets: Vec<Vec<u8>>,
}

#[derive(Default)]
struct FakeState {
    initialized: bool,
    devices: HashMap<DeviceId, FakeDevice>,
    sessions: HashSet<SessionHandle>,
    next_session: SessionHandle,
    next_handle: u64,
    /// When set, the next `fail_group_adds_after` calls to
    /// `group_add_member` succeed and the one after that fails.
    fail_group_adds_after: Option<usize>,
    /// While set, every `group_remove_member` call fails.
    fail_group_removes: bool,
}

impl FakeState {
    fn device(&mut self, device_id: DeviceId) -> DriverResult<&mut FakeDevice> {
        self.devices.get_mut(&device_id).ok_or(DriverError::NotAssigned)
    }

    fn alloc_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
    hooks: Mutex<HashMap<DeviceId, PacketInHook>>,
}

impl FakeDriver {
    pub fn new() -> FakeDriver {
        FakeDriver::default()
    }

    /// Arms the fail-injection knob: the next `n` member additions succeed
    /// and the one after that fails, once.
    pub fn fail_group_add_after(&self, n: usize) {
        self.state.lock().unwrap().fail_group_adds_after = Some(n);
    }

    /// While enabled, every member removal fails, which also defeats
    /// rollback attempts.
    pub fn fail_group_removes(&self, fail: bool) {
        self.state.lock().unwrap().fail_group_removes = fail;
    }

    pub fn set_counter(&self, device_id: DeviceId, counter_id: u32, index: i64, packets: u64, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        if let Ok(device) = state.device(device_id) {
            device.counters.insert((counter_id, index), (packets, bytes));
        }
    }

    pub fn entry_count(&self, device_id: DeviceId, table_id: u32) -> usize {
        let mut state = self.state.lock().unwrap();
        state
            .device(device_id)
            .map(|d| d.tables.get(&table_id).map_or(0, |t| t.len()))
            .unwrap_or(0)
    }

    pub fn member_count(&self, device_id: DeviceId, act_prof_id: u32) -> usize {
        let mut state = self.state.lock().unwrap();
        state
            .device(device_id)
            .map(|d| d.act_profs.get(&act_prof_id).map_or(0, |ap| ap.members.len()))
            .unwrap_or(0)
    }

    pub fn group_count(&self, device_id: DeviceId, act_prof_id: u32) -> usize {
        let mut state = self.state.lock().unwrap();
        state
            .device(device_id)
            .map(|d| d.act_profs.get(&act_prof_id).map_or(0, |ap| ap.groups.len()))
            .unwrap_or(0)
    }

    pub fn meter_spec(&self, device_id: DeviceId, meter_id: u32, index: i64) -> Option<MeterSpec> {
        let mut state = self.state.lock().unwrap();
        state.device(device_id).ok().and_then(|d| d.meters.get(&(meter_id, index)).copied())
    }

    pub fn is_committed(&self, device_id: DeviceId) -> bool {
        let mut state = self.state.lock().unwrap();
        state.device(device_id).map(|d| d.committed).unwrap_or(false)
    }

    pub fn device_extras(&self, device_id: DeviceId) -> Vec<(String, String)> {
        let mut state = self.state.lock().unwrap();
        state.device(device_id).map(|d| d.extras.clone()).unwrap_or_default()
    }

    pub fn device_image(&self, device_id: DeviceId) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        state.device(device_id).map(|d| d.device_data.clone()).unwrap_or_default()
    }

    pub fn sent_packets(&self, device_id: DeviceId) -> Vec<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.device(device_id).map(|d| d.sent_packets.clone()).unwrap_or_default()
    }

    /// Delivers a raw packet as if the target had punted it.
    pub fn inject_packet_in(&self, device_id: DeviceId, raw: &[u8]) {
        let hooks = self.hooks.lock().unwrap();
        if let Some(hook) = hooks.get(&device_id) {
            hook(device_id, raw);
        }
    }
}

impl PiDriver for FakeDriver {
    fn init(&self, _max_devices: usize) -> DriverResult<()> {
        self.state.lock().unwrap().initialized = true;
        Ok(())
    }

    fn destroy(&self) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        *state = FakeState::default();
        Ok(())
    }

    fn is_device_assigned(&self, device_id: DeviceId) -> bool {
        self.state.lock().unwrap().devices.contains_key(&device_id)
    }

    fn assign_device(&self, device_id: DeviceId, extras: &[(String, String)]) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.initialized {
            return Err(DriverError::Target("driver not initialized".into()));
        }
        if state.devices.contains_key(&device_id) {
            return Err(DriverError::Target("device already assigned".into()));
        }
        state.devices.insert(device_id, FakeDevice { extras: extras.to_vec(), ..Default::default() });
        Ok(())
    }

    fn remove_device(&self, device_id: DeviceId) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.devices.remove(&device_id).map(|_| ()).ok_or(DriverError::NotAssigned)
    }

    fn update_device_start(
        &self,
        device_id: DeviceId,
        _p4info: &P4InfoHandle,
        device_data: &[u8],
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(device_id)?;
        // A new program wipes the device's forwarding state.
        device.tables.clear();
        device.default_entries.clear();
        device.act_profs.clear();
        device.meters.clear();
        device.direct_meters.clear();
        device.device_data = device_data.to_vec();
        device.started = true;
        device.committed = false;
        Ok(())
    }

    fn update_device_end(&self, device_id: DeviceId) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(device_id)?;
        if !device.started {
            return Err(DriverError::Target("no update in progress".into()));
        }
        device.committed = true;
        Ok(())
    }

    fn session_open(&self, _batch: bool) -> DriverResult<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        state.next_session += 1;
        let session = state.next_session;
        state.sessions.insert(session);
        Ok(session)
    }

    fn session_close(&self, session: SessionHandle) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.sessions.remove(&session) {
            Ok(())
        } else {
            Err(DriverError::Target("no such session".into()))
        }
    }

    fn entry_add(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        key: &MatchKey,
        action: &ActionEntry,
    ) -> DriverResult<EntryHandle> {
        let mut state = self.state.lock().unwrap();
        let handle = state.alloc_handle();
        let device = state.device(tgt.device_id)?;
        let table = device.tables.entry(key.table_id()).or_default();
        if table.contains_key(key.canonical()) {
            return Err(DriverError::DuplicateEntry);
        }
        table.insert(
            key.canonical().to_vec(),
            FakeTableEntry { handle, action: action.clone() },
        );
        Ok(handle)
    }

    fn entry_modify_wkey(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        key: &MatchKey,
        action: &ActionEntry,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        let entry = device
            .tables
            .get_mut(&key.table_id())
            .and_then(|t| t.get_mut(key.canonical()))
            .ok_or(DriverError::EntryNotFound)?;
        entry.action = action.clone();
        Ok(())
    }

    fn entry_delete_wkey(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        key: &MatchKey,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        device
            .tables
            .get_mut(&key.table_id())
            .and_then(|t| t.remove(key.canonical()))
            .map(|_| ())
            .ok_or(DriverError::EntryNotFound)
    }

    fn default_entry_set(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        table_id: u32,
        action: &ActionEntry,
    ) -> DriverResult<EntryHandle> {
        let mut state = self.state.lock().unwrap();
        let handle = state.alloc_handle();
        let device = state.device(tgt.device_id)?;
        let entry = device
            .default_entries
            .entry(table_id)
            .or_insert_with(|| FakeTableEntry { handle, action: action.clone() });
        entry.action = action.clone();
        Ok(entry.handle)
    }

    fn table_entries_fetch(
        &self,
        _session: SessionHandle,
        device_id: DeviceId,
        table_id: u32,
    ) -> DriverResult<Vec<FetchedTableEntry>> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(device_id)?;
        let mut fetched: Vec<FetchedTableEntry> = device
            .tables
            .get(&table_id)
            .map(|t| {
                t.iter()
                    .map(|(canonical, entry)| FetchedTableEntry {
                        key: MatchKey::from_canonical(table_id, canonical.clone()),
                        action: Some(entry.action.clone()),
                        handle: entry.handle,
                    })
                    .collect()
            })
            .unwrap_or_default();
        // Hash-map iteration order is arbitrary; a real target yields entries
        // in handle order.
        fetched.sort_by_key(|e| e.handle);
        Ok(fetched)
    }

    fn member_create(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        action: &ActionData,
    ) -> DriverResult<IndirectHandle> {
        let mut state = self.state.lock().unwrap();
        let handle = state.alloc_handle();
        let device = state.device(tgt.device_id)?;
        let act_prof = device.act_profs.entry(act_prof_id).or_default();
        act_prof.members.insert(handle, action.clone());
        act_prof.member_order.push(handle);
        Ok(handle)
    }

    fn member_modify(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        member: IndirectHandle,
        action: &ActionData,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        let act_prof = device.act_profs.get_mut(&act_prof_id).ok_or(DriverError::HandleNotFound)?;
        let slot = act_prof.members.get_mut(&member).ok_or(DriverError::HandleNotFound)?;
        *slot = action.clone();
        Ok(())
    }

    fn member_delete(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        member: IndirectHandle,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        let act_prof = device.act_profs.get_mut(&act_prof_id).ok_or(DriverError::HandleNotFound)?;
        if act_prof.groups.values().any(|members| members.contains(&member)) {
            return Err(DriverError::InUse);
        }
        act_prof.members.remove(&member).ok_or(DriverError::HandleNotFound)?;
        act_prof.member_order.retain(|&h| h != member);
        Ok(())
    }

    fn group_create(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        _max_size: usize,
    ) -> DriverResult<IndirectHandle> {
        let mut state = self.state.lock().unwrap();
        let handle = state.alloc_handle();
        let device = state.device(tgt.device_id)?;
        let act_prof = device.act_profs.entry(act_prof_id).or_default();
        act_prof.groups.insert(handle, Vec::new());
        act_prof.group_order.push(handle);
        Ok(handle)
    }

    fn group_delete(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        group: IndirectHandle,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        let referenced = device.tables.values().any(|table| {
            table.values().any(|e| e.action == ActionEntry::IndirectHandle(group))
        });
        if referenced {
            return Err(DriverError::InUse);
        }
        let act_prof = device.act_profs.get_mut(&act_prof_id).ok_or(DriverError::HandleNotFound)?;
        act_prof.groups.remove(&group).ok_or(DriverError::HandleNotFound)?;
        act_prof.group_order.retain(|&h| h != group);
        Ok(())
    }

    fn group_add_member(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        group: IndirectHandle,
        member: IndirectHandle,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.fail_group_adds_after {
            Some(0) => {
                state.fail_group_adds_after = None;
                return Err(DriverError::Target("injected failure".into()));
            }
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        let device = state.device(tgt.device_id)?;
        let act_prof = device.act_profs.get_mut(&act_prof_id).ok_or(DriverError::HandleNotFound)?;
        if !act_prof.members.contains_key(&member) {
            return Err(DriverError::HandleNotFound);
        }
        let members = act_prof.groups.get_mut(&group).ok_or(DriverError::HandleNotFound)?;
        members.push(member);
        Ok(())
    }

    fn group_remove_member(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        act_prof_id: u32,
        group: IndirectHandle,
        member: IndirectHandle,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_group_removes {
            return Err(DriverError::Target("injected failure".into()));
        }
        let device = state.device(tgt.device_id)?;
        let act_prof = device.act_profs.get_mut(&act_prof_id).ok_or(DriverError::HandleNotFound)?;
        let members = act_prof.groups.get_mut(&group).ok_or(DriverError::HandleNotFound)?;
        let before = members.len();
        members.retain(|&h| h != member);
        if members.len() == before {
            return Err(DriverError::HandleNotFound);
        }
        Ok(())
    }

    fn act_prof_entries_fetch(
        &self,
        _session: SessionHandle,
        device_id: DeviceId,
        act_prof_id: u32,
    ) -> DriverResult<ActProfFetch> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(device_id)?;
        let mut fetch = ActProfFetch::default();
        if let Some(act_prof) = device.act_profs.get(&act_prof_id) {
            for &handle in &act_prof.member_order {
                fetch.members.push(FetchedMember {
                    action: act_prof.members[&handle].clone(),
                    handle,
                });
            }
            for &handle in &act_prof.group_order {
                fetch.groups.push(FetchedGroup {
                    handle,
                    members: act_prof.groups[&handle].clone(),
                });
            }
        }
        Ok(fetch)
    }

    fn meter_set(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        meter_id: u32,
        index: i64,
        spec: &MeterSpec,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        device.meters.insert((meter_id, index), *spec);
        Ok(())
    }

    fn meter_set_direct(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        meter_id: u32,
        entry: EntryHandle,
        spec: &MeterSpec,
    ) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        device.direct_meters.insert((meter_id, entry), *spec);
        Ok(())
    }

    fn counter_read(
        &self,
        _session: SessionHandle,
        tgt: DevTgt,
        counter_id: u32,
        index: i64,
        _flags: CounterFlags,
    ) -> DriverResult<CounterData> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(tgt.device_id)?;
        let (packets, bytes) = device.counters.get(&(counter_id, index)).copied().unwrap_or((0, 0));
        Ok(CounterData { valid: CounterUnits::PACKETS | CounterUnits::BYTES, packets, bytes })
    }

    fn packet_out_send(&self, device_id: DeviceId, packet: &[u8]) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let device = state.device(device_id)?;
        device.sent_packets.push(packet.to_vec());
        Ok(())
    }

    fn packet_in_register(&self, device_id: DeviceId, hook: PacketInHook) {
        self.hooks.lock().unwrap().insert(device_id, hook);
    }
}

// ---- fixture pipeline ----

fn preamble(id: u32, name: &str) -> Preamble {
    Preamble { id, name: name.into(), alias: name.into() }
}

fn exact_field(id: u32, name: &str, bitwidth: i32) -> MatchField {
    MatchField { id, name: name.into(), bitwidth, match_type: MatchType::Exact }
}

fn packet_header(id: u32, name: &str) -> ControllerPacketMetadata {
    ControllerPacketMetadata {
        preamble: preamble(id, name),
        metadata: vec![
            ControllerPacketMetadataField { id: 1, name: "port".into(), bitwidth: 9 },
            ControllerPacketMetadataField { id: 2, name: "_pad".into(), bitwidth: 7 },
        ],
    }
}

/// A pipeline with a direct table `t1` (one exact 16-bit field, action `a1`
/// with one 16-bit parameter, a direct counter and a direct meter), an
/// indirect table `t2` implemented by action profile `ap1`, a ternary table
/// `t3`, an indirect counter `c1`, and an indirect meter `m1`.
pub fn sample_p4info() -> P4Info {
    P4Info {
        tables: vec![
            Table {
                preamble: preamble(TABLE_T1, "t1"),
                match_fields: vec![exact_field(1, "f1", 16)],
                action_refs: vec![ActionRef { id: ACTION_A1 }],
                direct_resource_ids: vec![DIRECT_COUNTER_DC1, DIRECT_METER_DM1],
                size: 1024,
                ..Default::default()
            },
            Table {
                preamble: preamble(TABLE_T2, "t2"),
                match_fields: vec![exact_field(1, "f2", 16)],
                action_refs: vec![ActionRef { id: ACTION_A1 }],
                implementation_id: ACT_PROF_AP1,
                size: 1024,
                ..Default::default()
            },
            Table {
                preamble: preamble(TABLE_T3, "t3"),
                match_fields: vec![MatchField {
                    id: 1,
                    name: "f3".into(),
                    bitwidth: 12,
                    match_type: MatchType::Ternary,
                }],
                action_refs: vec![ActionRef { id: ACTION_A1 }],
                size: 1024,
                ..Default::default()
            },
        ],
        actions: vec![P4Action {
            preamble: preamble(ACTION_A1, "a1"),
            params: vec![P4ActionParam { id: 1, name: "p1".into(), bitwidth: 16 }],
        }],
        action_profiles: vec![ActionProfile {
            preamble: preamble(ACT_PROF_AP1, "ap1"),
            table_ids: vec![TABLE_T2],
            with_selector: true,
            size: 16,
        }],
        counters: vec![Counter { preamble: preamble(COUNTER_C1, "c1"), size: COUNTER_C1_SIZE }],
        direct_counters: vec![DirectCounter {
            preamble: preamble(DIRECT_COUNTER_DC1, "dc1"),
            direct_table_id: TABLE_T1,
        }],
        meters: vec![Meter { preamble: preamble(METER_M1, "m1"), size: 4 }],
        direct_meters: vec![DirectMeter {
            preamble: preamble(DIRECT_METER_DM1, "dm1"),
            direct_table_id: TABLE_T1,
        }],
        controller_packet_metadata: vec![
            packet_header(0x0400_0001, "packet_in"),
            packet_header(0x0400_0002, "packet_out"),
        ],
    }
}

/// A second, smaller pipeline (just `t1` and `a1`) for exercising pipeline
/// replacement.
pub fn sample_p4info_v2() -> P4Info {
    P4Info {
        tables: vec![Table {
            preamble: preamble(TABLE_T1, "t1"),
            match_fields: vec![exact_field(1, "f1", 16)],
            action_refs: vec![ActionRef { id: ACTION_A1 }],
            size: 512,
            ..Default::default()
        }],
        actions: vec![P4Action {
            preamble: preamble(ACTION_A1, "a1"),
            params: vec![P4ActionParam { id: 1, name: "p1".into(), bitwidth: 16 }],
        }],
        ..Default::default()
    }
}

// ---- message builders ----

pub fn exact_match(field_id: u32, value: Vec<u8>) -> FieldMatch {
    FieldMatch { field_id, field_match_type: Some(FieldMatchType::Exact { value }) }
}

pub fn action_with_param(action_id: u32, param_id: u32, value: Vec<u8>) -> Action {
    Action { action_id, params: vec![ActionParam { param_id, value }] }
}

/// A keyed entry for `t1`: `f1 == key`, `a1(p1 = param)`.
pub fn t1_entry(key: Vec<u8>, param: Vec<u8>, controller_metadata: u64) -> TableEntry {
    TableEntry {
        table_id: TABLE_T1,
        field_match: vec![exact_match(1, key)],
        action: Some(TableAction::Action(action_with_param(ACTION_A1, 1, param))),
        controller_metadata,
        ..Default::default()
    }
}

pub fn update(update_type: UpdateType, entity: Entity) -> Update {
    Update { update_type, entity: Some(entity) }
}

pub fn write_request(updates: Vec<Update>) -> WriteRequest {
    WriteRequest { device_id: DEVICE_ID, updates }
}

pub fn pipeline_config(p4info: P4Info) -> ForwardingPipelineConfig {
    let device_config = DeviceConfig {
        device_data: b"fixture image".to_vec(),
        reassign: false,
        extras: vec![("port".into(), "9559".into())],
    };
    ForwardingPipelineConfig {
        device_id: DEVICE_ID,
        p4info: Some(p4info),
        p4_device_config: device_config.encode(),
    }
}

/// Commits the fixture pipeline on `mgr`.
pub fn commit_sample_pipeline(mgr: &DeviceMgr) -> Result<(), Status> {
    mgr.pipeline_config_set(ConfigAction::VerifyAndCommit, &pipeline_config(sample_p4info()))
}
