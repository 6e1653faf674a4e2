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

//! The compiled P4 program schema (`P4Info`): tables, actions, action
//! profiles, counters, meters, and controller packet metadata, all carrying
//! the numeric ids the runtime messages refer to.

/// Common descriptive fields shared by every top-level P4 object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Preamble {
    pub id: u32,
    pub name: String,
    pub alias: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchType {
    #[default]
    Unspecified,
    Valid,
    Exact,
    Lpm,
    Ternary,
    Range,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchField {
    pub id: u32,
    pub name: String,
    pub bitwidth: i32,
    pub match_type: MatchType,
}

/// Reference from a table to an action it may execute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionRef {
    pub id: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub preamble: Preamble,
    pub match_fields: Vec<MatchField>,
    pub action_refs: Vec<ActionRef>,
    /// Action profile implementing this table, or 0 for a direct table.
    pub implementation_id: u32,
    pub direct_resource_ids: Vec<u32>,
    pub size: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionParam {
    pub id: u32,
    pub name: String,
    pub bitwidth: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Action {
    pub preamble: Preamble,
    pub params: Vec<ActionParam>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionProfile {
    pub preamble: Preamble,
    pub table_ids: Vec<u32>,
    pub with_selector: bool,
    pub size: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Counter {
    pub preamble: Preamble,
    pub size: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectCounter {
    pub preamble: Preamble,
    pub direct_table_id: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Meter {
    pub preamble: Preamble,
    pub size: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectMeter {
    pub preamble: Preamble,
    pub direct_table_id: u32,
}

/// One field of a packet-in or packet-out header.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerPacketMetadataField {
    pub id: u32,
    pub name: String,
    pub bitwidth: i32,
}

/// Layout of the metadata header prepended to controller packets.  The
/// preamble name is `"packet_in"` or `"packet_out"`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerPacketMetadata {
    pub preamble: Preamble,
    pub metadata: Vec<ControllerPacketMetadataField>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct P4Info {
    pub tables: Vec<Table>,
    pub actions: Vec<Action>,
    pub action_profiles: Vec<ActionProfile>,
    pub counters: Vec<Counter>,
    pub direct_counters: Vec<DirectCounter>,
    pub meters: Vec<Meter>,
    pub direct_meters: Vec<DirectMeter>,
    pub controller_packet_metadata: Vec<ControllerPacketMetadata>,
}
