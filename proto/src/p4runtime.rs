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

//! Runtime messages exchanged with the controller: table entries, action
//! profile members and groups, meters, counters, packet I/O, and the
//! `Write`/`Read`/pipeline-config request envelopes.

use crate::p4info::P4Info;

/// The per-kind payload of a field match.  Byte strings are big-endian and
/// must be canonical for the field's declared bitwidth.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldMatchType {
    Exact { value: Vec<u8> },
    Lpm { value: Vec<u8>, prefix_len: i32 },
    Ternary { value: Vec<u8>, mask: Vec<u8> },
    Range { low: Vec<u8>, high: Vec<u8> },
    Valid { value: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldMatch {
    pub field_id: u32,
    pub field_match_type: Option<FieldMatchType>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionParam {
    pub param_id: u32,
    pub value: Vec<u8>,
}

/// Inline action data: an action id plus one value per declared parameter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Action {
    pub action_id: u32,
    pub params: Vec<ActionParam>,
}

/// The action of a table entry.  Indirect variants are only legal on tables
/// whose schema declares an action-profile implementation.
#[derive(Clone, Debug, PartialEq)]
pub enum TableAction {
    Action(Action),
    ActionProfileMemberId(u32),
    ActionProfileGroupId(u32),
}

/// A match-action table entry.  An empty `field_match` designates the
/// table's default entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableEntry {
    pub table_id: u32,
    pub field_match: Vec<FieldMatch>,
    pub action: Option<TableAction>,
    pub priority: i32,
    pub controller_metadata: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionProfileMember {
    pub action_profile_id: u32,
    pub member_id: u32,
    pub action: Option<Action>,
}

/// Reference from a group to one of its members.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupMember {
    pub member_id: u32,
    pub weight: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionProfileGroup {
    pub action_profile_id: u32,
    pub group_id: u32,
    pub members: Vec<GroupMember>,
    pub max_size: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeterConfig {
    pub cir: i64,
    pub cburst: i64,
    pub pir: i64,
    pub pburst: i64,
}

/// An indirect meter cell, addressed by `(meter_id, index)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeterEntry {
    pub meter_id: u32,
    pub index: i64,
    pub config: Option<MeterConfig>,
}

/// A direct meter cell, addressed by the table entry it is attached to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectMeterEntry {
    pub meter_id: u32,
    pub table_entry: Option<TableEntry>,
    pub config: Option<MeterConfig>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterData {
    pub byte_count: i64,
    pub packet_count: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterEntry {
    pub counter_id: u32,
    pub index: i64,
    pub data: Option<CounterData>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectCounterEntry {
    pub counter_id: u32,
    pub table_entry: Option<TableEntry>,
    pub data: Option<CounterData>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternEntry {
    pub extern_type_id: u32,
    pub extern_id: u32,
}

/// The entity cases a `Write` or `Read` request may carry.
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    TableEntry(TableEntry),
    ActionProfileMember(ActionProfileMember),
    ActionProfileGroup(ActionProfileGroup),
    MeterEntry(MeterEntry),
    DirectMeterEntry(DirectMeterEntry),
    CounterEntry(CounterEntry),
    DirectCounterEntry(DirectCounterEntry),
    ExternEntry(ExternEntry),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateType {
    #[default]
    Unspecified,
    Insert,
    Modify,
    Delete,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub update_type: UpdateType,
    pub entity: Option<Entity>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteRequest {
    pub device_id: u64,
    pub updates: Vec<Update>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadRequest {
    pub device_id: u64,
    pub entities: Vec<Entity>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadResponse {
    pub entities: Vec<Entity>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfigAction {
    #[default]
    Unspecified,
    Verify,
    VerifyAndSave,
    VerifyAndCommit,
    Commit,
}

/// The pipeline carried by `SetForwardingPipelineConfig`: the program schema
/// plus an opaque, framed device image (see the frontend's device-config
/// framing for the layout of `p4_device_config`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForwardingPipelineConfig {
    pub device_id: u64,
    pub p4info: Option<P4Info>,
    pub p4_device_config: Vec<u8>,
}

/// One field of a controller packet header, matching the schema's
/// `ControllerPacketMetadata` layout for the packet direction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PacketMetadata {
    pub metadata_id: u32,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PacketOut {
    pub payload: Vec<u8>,
    pub metadata: Vec<PacketMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PacketIn {
    pub payload: Vec<u8>,
    pub metadata: Vec<PacketMetadata>,
}
