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

//! Validated, indexed view of a parsed `P4Info` schema.
//!
//! A [`P4InfoHandle`] is built once per staged pipeline and then shared
//! read-only by every component that needs schema lookups.  Construction
//! cross-checks the schema (action references, implementations, direct
//! resources); a schema that fails these checks is rejected before it can
//! reach the device.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};

use anyhow::{bail, ensure, Context, Result};
use itertools::Itertools;

use proto::p4info::{MatchType, P4Info};

/// P4Runtime resource-id prefixes: the top 8 bits of an object id encode the
/// kind of object it names.
pub mod resource_type {
    pub const ACTION: u32 = 0x01;
    pub const TABLE: u32 = 0x02;
    pub const ACTION_PROFILE: u32 = 0x11;
    pub const COUNTER: u32 = 0x12;
    pub const DIRECT_COUNTER: u32 = 0x13;
    pub const METER: u32 = 0x14;
    pub const DIRECT_METER: u32 = 0x15;
}

/// The resource kind encoded in an object id.
pub fn resource_type_of(id: u32) -> u32 {
    id >> 24
}

#[derive(Clone, Debug)]
pub struct MatchFieldInfo {
    pub id: u32,
    pub name: String,
    pub bitwidth: i32,
    pub match_type: MatchType,
}

#[derive(Clone, Debug)]
pub struct TableInfo {
    pub id: u32,
    pub name: String,
    pub match_fields: Vec<MatchFieldInfo>,
    action_ids: HashSet<u32>,
    /// Action profile implementing this table, `None` for a direct table.
    pub implementation: Option<u32>,
}

impl TableInfo {
    pub fn is_action_of(&self, action_id: u32) -> bool {
        self.action_ids.contains(&action_id)
    }
}

#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub id: u32,
    pub name: String,
    pub bitwidth: i32,
}

#[derive(Clone, Debug)]
pub struct ActionInfo {
    pub id: u32,
    pub name: String,
    pub params: Vec<ParamInfo>,
}

#[derive(Clone, Debug)]
pub struct ActionProfileInfo {
    pub id: u32,
    pub name: String,
    pub with_selector: bool,
    pub size: i64,
}

#[derive(Clone, Debug)]
pub struct CounterInfo {
    pub id: u32,
    pub name: String,
    pub size: i64,
    /// Table the counter is attached to; `None` for an indirect counter.
    pub direct_table: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct MeterInfo {
    pub id: u32,
    pub name: String,
    pub size: i64,
    pub direct_table: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct PacketMetadataLayout {
    /// Fields in header order, as `(metadata_id, bitwidth)`.
    pub fields: Vec<(u32, i32)>,
}

/// Indexed schema handle.  One per staged or committed pipeline; dropped when
/// superseded.
#[derive(Debug, Default)]
pub struct P4InfoHandle {
    tables: HashMap<u32, TableInfo>,
    table_order: Vec<u32>,
    actions: HashMap<u32, ActionInfo>,
    action_profiles: HashMap<u32, ActionProfileInfo>,
    action_profile_order: Vec<u32>,
    counters: HashMap<u32, CounterInfo>,
    counter_order: Vec<u32>,
    meters: HashMap<u32, MeterInfo>,
    packet_in: PacketMetadataLayout,
    packet_out: PacketMetadataLayout,
}

impl P4InfoHandle {
    /// Builds the handle, validating the schema's internal references.
    pub fn new(p4info: &P4Info) -> Result<P4InfoHandle> {
        let mut handle = P4InfoHandle::default();

        for a in &p4info.actions {
            let id = a.preamble.id;
            ensure!(
                resource_type_of(id) == resource_type::ACTION,
                "action {} has id {:#010x} with a non-action prefix",
                a.preamble.name,
                id
            );
            let info = ActionInfo {
                id,
                name: a.preamble.name.clone(),
                params: a
                    .params
                    .iter()
                    .map(|p| ParamInfo { id: p.id, name: p.name.clone(), bitwidth: p.bitwidth })
                    .collect(),
            };
            if handle.actions.insert(id, info).is_some() {
                bail!("duplicate action id {:#010x}", id);
            }
        }

        for ap in &p4info.action_profiles {
            let id = ap.preamble.id;
            let info = ActionProfileInfo {
                id,
                name: ap.preamble.name.clone(),
                with_selector: ap.with_selector,
                size: ap.size,
            };
            if handle.action_profiles.insert(id, info).is_some() {
                bail!("duplicate action profile id {:#010x}", id);
            }
            handle.action_profile_order.push(id);
        }

        for t in &p4info.tables {
            let id = t.preamble.id;
            let name = &t.preamble.name;
            let mut action_ids = HashSet::new();
            for ar in &t.action_refs {
                ensure!(
                    handle.actions.contains_key(&ar.id),
                    "table {} references unknown action {:#010x}",
                    name,
                    ar.id
                );
                action_ids.insert(ar.id);
            }
            let implementation = match t.implementation_id {
                0 => None,
                ap_id => {
                    ensure!(
                        handle.action_profiles.contains_key(&ap_id),
                        "table {} references unknown action profile {:#010x}",
                        name,
                        ap_id
                    );
                    Some(ap_id)
                }
            };
            let info = TableInfo {
                id,
                name: name.clone(),
                match_fields: t
                    .match_fields
                    .iter()
                    .map(|mf| {
                        ensure!(
                            mf.match_type != MatchType::Unspecified,
                            "table {} field {} has no match type",
                            name,
                            mf.name
                        );
                        Ok(MatchFieldInfo {
                            id: mf.id,
                            name: mf.name.clone(),
                            bitwidth: mf.bitwidth,
                            match_type: mf.match_type,
                        })
                    })
                    .collect::<Result<_>>()?,
                action_ids,
                implementation,
            };
            if handle.tables.insert(id, info).is_some() {
                bail!("duplicate table id {:#010x}", id);
            }
            handle.table_order.push(id);
        }

        for c in &p4info.counters {
            let id = c.preamble.id;
            let info =
                CounterInfo { id, name: c.preamble.name.clone(), size: c.size, direct_table: None };
            if handle.counters.insert(id, info).is_some() {
                bail!("duplicate counter id {:#010x}", id);
            }
            handle.counter_order.push(id);
        }
        for dc in &p4info.direct_counters {
            let id = dc.preamble.id;
            let name = &dc.preamble.name;
            ensure!(
                handle.tables.contains_key(&dc.direct_table_id),
                "direct counter {} attached to unknown table {:#010x}",
                name,
                dc.direct_table_id
            );
            let info = CounterInfo {
                id,
                name: name.clone(),
                size: 0,
                direct_table: Some(dc.direct_table_id),
            };
            if handle.counters.insert(id, info).is_some() {
                bail!("duplicate counter id {:#010x}", id);
            }
            handle.counter_order.push(id);
        }

        for m in &p4info.meters {
            let id = m.preamble.id;
            let info =
                MeterInfo { id, name: m.preamble.name.clone(), size: m.size, direct_table: None };
            if handle.meters.insert(id, info).is_some() {
                bail!("duplicate meter id {:#010x}", id);
            }
        }
        for dm in &p4info.direct_meters {
            let id = dm.preamble.id;
            let name = &dm.preamble.name;
            ensure!(
                handle.tables.contains_key(&dm.direct_table_id),
                "direct meter {} attached to unknown table {:#010x}",
                name,
                dm.direct_table_id
            );
            let info =
                MeterInfo { id, name: name.clone(), size: 0, direct_table: Some(dm.direct_table_id) };
            if handle.meters.insert(id, info).is_some() {
                bail!("duplicate meter id {:#010x}", id);
            }
        }

        for cpm in &p4info.controller_packet_metadata {
            let layout = PacketMetadataLayout {
                fields: cpm.metadata.iter().map(|f| (f.id, f.bitwidth)).collect(),
            };
            match cpm.preamble.name.as_str() {
                "packet_in" => handle.packet_in = layout,
                "packet_out" => handle.packet_out = layout,
                other => bail!("unknown controller packet header {:?}", other),
            }
        }

        Ok(handle)
    }

    /// Builds a handle from a pipeline config's schema, the single entry
    /// point the pipeline state machine uses.
    pub fn from_config(p4info: &P4Info) -> Result<P4InfoHandle> {
        P4InfoHandle::new(p4info).context("invalid P4Info")
    }

    pub fn table(&self, id: u32) -> Option<&TableInfo> {
        self.tables.get(&id)
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> + '_ {
        self.table_order.iter().map(move |id| &self.tables[id])
    }

    pub fn action(&self, id: u32) -> Option<&ActionInfo> {
        self.actions.get(&id)
    }

    pub fn action_profile(&self, id: u32) -> Option<&ActionProfileInfo> {
        self.action_profiles.get(&id)
    }

    /// Action profiles in declaration order.
    pub fn action_profiles(&self) -> impl Iterator<Item = &ActionProfileInfo> + '_ {
        self.action_profile_order.iter().map(move |id| &self.action_profiles[id])
    }

    pub fn counter(&self, id: u32) -> Option<&CounterInfo> {
        self.counters.get(&id)
    }

    /// Counters in declaration order, direct and indirect alike.
    pub fn counters(&self) -> impl Iterator<Item = &CounterInfo> + '_ {
        self.counter_order.iter().map(move |id| &self.counters[id])
    }

    pub fn meter(&self, id: u32) -> Option<&MeterInfo> {
        self.meters.get(&id)
    }

    pub fn packet_in_layout(&self) -> &PacketMetadataLayout {
        &self.packet_in
    }

    pub fn packet_out_layout(&self) -> &PacketMetadataLayout {
        &self.packet_out
    }

    /// I1: `id` names a table in this schema and carries the table prefix.
    pub fn check_table_id(&self, id: u32) -> bool {
        resource_type_of(id) == resource_type::TABLE && self.tables.contains_key(&id)
    }

    pub fn check_action_id(&self, id: u32) -> bool {
        resource_type_of(id) == resource_type::ACTION && self.actions.contains_key(&id)
    }

    pub fn check_action_profile_id(&self, id: u32) -> bool {
        resource_type_of(id) == resource_type::ACTION_PROFILE
            && self.action_profiles.contains_key(&id)
    }

    /// I1 for indirect counters; a direct counter's id carries a different
    /// prefix and fails this check.
    pub fn check_counter_id(&self, id: u32) -> bool {
        resource_type_of(id) == resource_type::COUNTER && self.counters.contains_key(&id)
    }

    pub fn check_meter_id(&self, id: u32) -> bool {
        resource_type_of(id) == resource_type::METER && self.meters.contains_key(&id)
    }

    pub fn check_direct_meter_id(&self, id: u32) -> bool {
        resource_type_of(id) == resource_type::DIRECT_METER && self.meters.contains_key(&id)
    }
}

impl Display for MatchFieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mt = match self.match_type {
            MatchType::Unspecified => "unspecified",
            MatchType::Valid => "valid",
            MatchType::Exact => "exact",
            MatchType::Lpm => "LPM",
            MatchType::Ternary => "ternary",
            MatchType::Range => "range",
        };
        write!(f, "field {}: bit<{}> {}-match", self.name, self.bitwidth, mt)
    }
}

impl Display for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {}:", self.name)?;
        for mf in &self.match_fields {
            write!(f, "\t{}", mf)?;
        }
        // Sort ids so that log lines are stable run to run.
        write!(f, "\tactions [{}]", self.action_ids.iter().sorted().map(|id| format!("{:#010x}", id)).join(", "))?;
        if let Some(ap_id) = self.implementation {
            write!(f, "\timplementation {:#010x}", ap_id)?;
        }
        Ok(())
    }
}
