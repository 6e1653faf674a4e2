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

//! The per-device frontend: pipeline lifecycle, request dispatch, and the
//! consistency glue between the shadow store, the action profile managers,
//! and the PI driver underneath.
//!
//! # Concurrency
//!
//! [`DeviceMgr`] may be called from any number of controller request threads.
//! Data-plane operations (`write`, `read`, packet out) take the device state
//! shared; `set_forwarding_pipeline_config` takes it exclusive while it swaps
//! the shadow store, the action profile managers, and the schema handle.
//! Controllers are expected to quiesce data-plane traffic during a pipeline
//! change anyway; the exclusive lock turns that convention into a guarantee.
//!
//! Within a data-plane operation, at most one table lock and at most one
//! action-profile mutex are ever held at once.  A write that resolves an
//! indirect action takes the profile mutex, releases it, and only then takes
//! the table lock; reads briefly take the profile mutex while already holding
//! a table lock.  Since no path acquires a table lock while holding a profile
//! mutex, the two cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{error, info, span, warn, Level};

use proto::p4info::P4Info;
use proto::p4runtime::{
    ActionProfileGroup,
    ActionProfileMember,
    ConfigAction,
    CounterEntry,
    DirectMeterEntry,
    Entity,
    ForwardingPipelineConfig,
    GroupMember,
    MeterConfig,
    MeterEntry,
    PacketIn,
    PacketOut,
    ReadRequest,
    ReadResponse,
    TableAction,
    TableEntry,
    Update,
    UpdateType,
    WriteRequest,
};
use proto::status::Status;

use crate::action_entry::{action_data_to_proto, validate_action_data, ActionEntry};
use crate::action_prof_mgr::ActionProfMgr;
use crate::device_config::DeviceConfig;
use crate::driver::{
    CounterFlags, CounterUnits, DevTgt, DeviceId, MeterSpec, PiDriver, Session,
};
use crate::match_key::MatchKey;
use crate::p4info::{P4InfoHandle, TableInfo};
use crate::packet_io::PacketIoMgr;
use crate::table_info_store::{EntryData, TableInfoStore};

/// Where the device stands in the pipeline lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfigState {
    #[default]
    Unassigned,
    AssignedNoConfig,
    Staged,
    Committed,
}

#[derive(Default)]
struct DeviceState {
    config_state: ConfigState,
    p4info_proto: P4Info,
    p4info: Option<Arc<P4InfoHandle>>,
    tables: TableInfoStore,
    action_profs: HashMap<u32, ActionProfMgr>,
}

pub struct DeviceMgr {
    device_id: DeviceId,
    device_tgt: DevTgt,
    driver: Arc<dyn PiDriver>,
    packet_io: Arc<PacketIoMgr>,
    state: RwLock<DeviceState>,
}

impl DeviceMgr {
    pub fn new(device_id: DeviceId, driver: Arc<dyn PiDriver>) -> DeviceMgr {
        let packet_io = PacketIoMgr::new(device_id, driver.clone());
        DeviceMgr {
            device_id,
            device_tgt: DevTgt::all_pipes(device_id),
            driver,
            packet_io,
            state: RwLock::new(DeviceState::default()),
        }
    }

    /// One-time driver initialization, before any `DeviceMgr` is created.
    pub fn init(driver: &dyn PiDriver, max_devices: usize) -> Result<(), Status> {
        driver.init(max_devices)?;
        Ok(())
    }

    /// Tears the driver down, after every `DeviceMgr` is gone.
    pub fn destroy(driver: &dyn PiDriver) -> Result<(), Status> {
        driver.destroy()?;
        Ok(())
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn config_state(&self) -> ConfigState {
        self.state.read().unwrap().config_state
    }

    pub fn pipeline_config_set(
        &self,
        action: ConfigAction,
        config: &ForwardingPipelineConfig,
    ) -> Result<(), Status> {
        let _span =
            span!(Level::INFO, "set_forwarding_pipeline_config", device_id = self.device_id)
                .entered();
        let mut state = self.state.write().unwrap();

        let parsed = match action {
            ConfigAction::Unspecified => {
                return Err(Status::invalid_argument("unspecified pipeline config action"))
            }
            ConfigAction::Verify | ConfigAction::VerifyAndSave | ConfigAction::VerifyAndCommit => {
                let p4info_proto = config
                    .p4info
                    .as_ref()
                    .ok_or_else(|| Status::unknown("pipeline config has no p4info"))?;
                let handle = P4InfoHandle::from_config(p4info_proto)
                    .map_err(|e| Status::unknown(format!("{:#}", e)))?;
                Some((p4info_proto, handle))
            }
            ConfigAction::Commit => None,
        };

        if action == ConfigAction::Verify {
            return Ok(());
        }

        if let Some((p4info_proto, handle)) = parsed {
            let device_config = DeviceConfig::parse(&config.p4_device_config)?;

            if self.driver.is_device_assigned(self.device_id) && device_config.reassign {
                info!("reassigning device {}", self.device_id);
                if let Err(e) = self.driver.remove_device(self.device_id) {
                    warn!("failed to remove device {}: {}", self.device_id, e);
                }
                state.tables.reset();
                state.action_profs.clear();
                state.p4info = None;
                state.config_state = ConfigState::Unassigned;
            }
            if !self.driver.is_device_assigned(self.device_id) {
                self.driver.assign_device(self.device_id, &device_config.extras)?;
                state.config_state = ConfigState::AssignedNoConfig;
            }

            self.driver.update_device_start(
                self.device_id,
                &handle,
                &device_config.device_data,
            )?;
            self.p4_change(&mut state, p4info_proto.clone(), Arc::new(handle));
            state.config_state = ConfigState::Staged;
        }

        if matches!(action, ConfigAction::VerifyAndCommit | ConfigAction::Commit) {
            self.driver.update_device_end(self.device_id)?;
            state.config_state = ConfigState::Committed;
            info!("committed pipeline on device {}", self.device_id);
        }

        Ok(())
    }

    /// Swaps in a new pipeline: the shadow store and the action profile
    /// managers are rebuilt empty from the new schema, packet I/O relearns
    /// its header layouts, and the schema handle is installed last so that
    /// no manager ever points at a schema that outlived it.
    fn p4_change(
        &self,
        state: &mut DeviceState,
        p4info_proto: P4Info,
        handle: Arc<P4InfoHandle>,
    ) {
        state.tables = TableInfoStore::rebuild(&handle);
        state.action_profs = handle
            .action_profiles()
            .map(|ap| {
                let mgr = ActionProfMgr::new(
                    self.device_tgt,
                    ap.id,
                    handle.clone(),
                    self.driver.clone(),
                );
                (ap.id, mgr)
            })
            .collect();
        self.packet_io.p4_change(&handle);
        state.p4info = Some(handle);
        state.p4info_proto = p4info_proto;
    }

    /// Returns the active schema and device id.  The device config bytes are
    /// not kept, so they are not returned.
    pub fn pipeline_config_get(&self) -> ForwardingPipelineConfig {
        let state = self.state.read().unwrap();
        ForwardingPipelineConfig {
            device_id: self.device_id,
            p4info: Some(state.p4info_proto.clone()),
            p4_device_config: Vec::new(),
        }
    }

    /// Applies a batch of updates in list order, stopping at the first
    /// failure.  Updates already applied are not rolled back.
    pub fn write(&self, request: &WriteRequest) -> Result<(), Status> {
        let _span = span!(Level::INFO, "write", device_id = request.device_id).entered();
        if request.device_id != self.device_id {
            return Err(Status::not_found(format!("no such device {}", request.device_id)));
        }
        let state = self.state.read().unwrap();
        let session = Session::open(self.driver.clone(), true)?;
        for update in &request.updates {
            self.write_one(&state, update, &session)?;
        }
        Ok(())
    }

    fn write_one(
        &self,
        state: &DeviceState,
        update: &Update,
        session: &Session,
    ) -> Result<(), Status> {
        let entity = update
            .entity
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("update has no entity"))?;
        match entity {
            Entity::TableEntry(entry) => {
                self.table_write(state, update.update_type, entry, session)
            }
            Entity::ActionProfileMember(member) => {
                self.action_profile_member_write(state, update.update_type, member, session)
            }
            Entity::ActionProfileGroup(group) => {
                self.action_profile_group_write(state, update.update_type, group, session)
            }
            Entity::MeterEntry(entry) => {
                self.meter_write(state, update.update_type, entry, session)
            }
            Entity::DirectMeterEntry(entry) => {
                self.direct_meter_write(state, update.update_type, entry, session)
            }
            Entity::CounterEntry(_) | Entity::DirectCounterEntry(_) | Entity::ExternEntry(_) => {
                Err(Status::unimplemented("entity kind not supported in Write"))
            }
        }
    }

    /// Reads each requested entity into `response`.  On failure the response
    /// holds whatever was produced before the failing entity.
    pub fn read(&self, request: &ReadRequest, response: &mut ReadResponse) -> Result<(), Status> {
        let _span = span!(Level::INFO, "read", device_id = request.device_id).entered();
        if request.device_id != self.device_id {
            return Err(Status::not_found(format!("no such device {}", request.device_id)));
        }
        let state = self.state.read().unwrap();
        for entity in &request.entities {
            self.read_one_locked(&state, entity, response)?;
        }
        Ok(())
    }

    pub fn read_one(&self, entity: &Entity, response: &mut ReadResponse) -> Result<(), Status> {
        let state = self.state.read().unwrap();
        self.read_one_locked(&state, entity, response)
    }

    fn read_one_locked(
        &self,
        state: &DeviceState,
        entity: &Entity,
        response: &mut ReadResponse,
    ) -> Result<(), Status> {
        let session = Session::open(self.driver.clone(), false)?;
        match entity {
            Entity::TableEntry(entry) => self.table_read(state, entry, &session, response),
            Entity::ActionProfileMember(member) => {
                self.action_profile_member_read(state, member, &session, response)
            }
            Entity::ActionProfileGroup(group) => {
                self.action_profile_group_read(state, group, &session, response)
            }
            Entity::CounterEntry(entry) => self.counter_read(state, entry, &session, response),
            Entity::MeterEntry(_)
            | Entity::DirectMeterEntry(_)
            | Entity::DirectCounterEntry(_)
            | Entity::ExternEntry(_) => {
                Err(Status::unimplemented("entity kind not supported in Read"))
            }
        }
    }

    pub fn packet_out_send(&self, packet: &PacketOut) -> Result<(), Status> {
        self.packet_io.packet_out_send(packet)
    }

    /// Registers the controller callback invoked for every punted packet.
    /// The callback runs on the driver's notification thread.
    pub fn packet_in_register_cb(
        &self,
        cb: impl Fn(DeviceId, PacketIn) + Send + Sync + 'static,
    ) {
        self.packet_io.packet_in_register_cb(cb);
    }

    fn p4info(state: &DeviceState) -> Result<&Arc<P4InfoHandle>, Status> {
        state
            .p4info
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("no forwarding pipeline config"))
    }

    // ---- table entries ----

    fn table_write(
        &self,
        state: &DeviceState,
        update_type: UpdateType,
        entry: &TableEntry,
        session: &Session,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        if !p4info.check_table_id(entry.table_id) {
            return Err(invalid_p4_id(entry.table_id));
        }
        match update_type {
            UpdateType::Unspecified => Err(Status::invalid_argument("unspecified update type")),
            UpdateType::Insert => self.table_insert(state, entry, session),
            UpdateType::Modify => self.table_modify(state, entry, session),
            UpdateType::Delete => self.table_delete(state, entry, session),
        }
    }

    fn table_insert(
        &self,
        state: &DeviceState,
        entry: &TableEntry,
        session: &Session,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        let key = MatchKey::from_table_entry(p4info, entry)?;
        let action =
            self.build_action_entry(state, p4info, entry.table_id, entry.action.as_ref())?;

        let mut table = state
            .tables
            .lock_table(entry.table_id)
            .ok_or_else(|| invalid_p4_id(entry.table_id))?;
        let handle = if key.is_default() {
            self.driver.default_entry_set(
                session.handle(),
                self.device_tgt,
                entry.table_id,
                &action,
            )?
        } else {
            if table.get_entry(&key).is_some() {
                return Err(Status::already_exists(
                    "an entry with this match key and priority already exists",
                ));
            }
            self.driver.entry_add(session.handle(), self.device_tgt, &key, &action)?
        };
        table.add_entry(&key, EntryData { handle, controller_metadata: entry.controller_metadata });
        Ok(())
    }

    fn table_modify(
        &self,
        state: &DeviceState,
        entry: &TableEntry,
        session: &Session,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        let key = MatchKey::from_table_entry(p4info, entry)?;
        let action =
            self.build_action_entry(state, p4info, entry.table_id, entry.action.as_ref())?;

        let mut table = state
            .tables
            .lock_table(entry.table_id)
            .ok_or_else(|| invalid_p4_id(entry.table_id))?;
        if table.get_entry(&key).is_none() {
            return Err(Status::invalid_argument("no entry with this match key"));
        }
        if key.is_default() {
            self.driver.default_entry_set(
                session.handle(),
                self.device_tgt,
                entry.table_id,
                &action,
            )?;
        } else {
            self.driver.entry_modify_wkey(session.handle(), self.device_tgt, &key, &action)?;
        }
        if let Some(data) = table.get_entry_mut(&key) {
            data.controller_metadata = entry.controller_metadata;
        }
        Ok(())
    }

    fn table_delete(
        &self,
        state: &DeviceState,
        entry: &TableEntry,
        session: &Session,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        let key = MatchKey::from_table_entry(p4info, entry)?;

        let mut table = state
            .tables
            .lock_table(entry.table_id)
            .ok_or_else(|| invalid_p4_id(entry.table_id))?;
        if key.is_default() {
            // There is no way to clear a default entry yet.
            return Err(Status::unimplemented("cannot delete the default entry"));
        }
        self.driver.entry_delete_wkey(session.handle(), self.device_tgt, &key)?;
        table.remove_entry(&key);
        Ok(())
    }

    /// Builds the driver form of a table action, enforcing the
    /// direct/indirect split: inline action data only on tables without an
    /// implementation, member/group references only on tables with one.
    fn build_action_entry(
        &self,
        state: &DeviceState,
        p4info: &P4InfoHandle,
        table_id: u32,
        table_action: Option<&TableAction>,
    ) -> Result<ActionEntry, Status> {
        let table = p4info.table(table_id).ok_or_else(|| invalid_p4_id(table_id))?;
        let action = table_action
            .ok_or_else(|| Status::invalid_argument("table entry has no action"))?;
        match action {
            TableAction::Action(action) => {
                if table.implementation.is_some() {
                    return Err(Status::invalid_argument(format!(
                        "table {} is implemented by an action profile; inline action data is not allowed",
                        table.name
                    )));
                }
                if !p4info.check_action_id(action.action_id) {
                    return Err(invalid_p4_id(action.action_id));
                }
                if !table.is_action_of(action.action_id) {
                    return Err(Status::invalid_argument("invalid action for table"));
                }
                Ok(ActionEntry::Data(validate_action_data(p4info, action)?))
            }
            TableAction::ActionProfileMemberId(member_id) => {
                let mgr = self.indirect_mgr(state, table)?;
                let handle = mgr.retrieve_member_handle(*member_id).ok_or_else(|| {
                    Status::invalid_argument(format!("no such member {}", member_id))
                })?;
                Ok(ActionEntry::IndirectHandle(handle))
            }
            TableAction::ActionProfileGroupId(group_id) => {
                let mgr = self.indirect_mgr(state, table)?;
                let handle = mgr.retrieve_group_handle(*group_id).ok_or_else(|| {
                    Status::invalid_argument(format!("no such group {}", group_id))
                })?;
                Ok(ActionEntry::IndirectHandle(handle))
            }
        }
    }

    fn indirect_mgr<'a>(
        &self,
        state: &'a DeviceState,
        table: &TableInfo,
    ) -> Result<&'a ActionProfMgr, Status> {
        let ap_id = table.implementation.ok_or_else(|| {
            Status::invalid_argument(format!(
                "table {} takes inline action data, not member or group references",
                table.name
            ))
        })?;
        state.action_profs.get(&ap_id).ok_or_else(|| invalid_p4_id(ap_id))
    }

    fn table_read(
        &self,
        state: &DeviceState,
        entry: &TableEntry,
        session: &Session,
        response: &mut ReadResponse,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        if entry.table_id == 0 {
            // A zero table id reads every table in the pipeline.
            for table in p4info.tables() {
                self.table_read_one(state, table.id, session, response)?;
            }
            Ok(())
        } else {
            if !p4info.check_table_id(entry.table_id) {
                return Err(invalid_p4_id(entry.table_id));
            }
            self.table_read_one(state, entry.table_id, session, response)
        }
    }

    fn table_read_one(
        &self,
        state: &DeviceState,
        table_id: u32,
        session: &Session,
        response: &mut ReadResponse,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        let table_info = p4info.table(table_id).ok_or_else(|| invalid_p4_id(table_id))?;
        let table = state
            .tables
            .lock_table_shared(table_id)
            .ok_or_else(|| invalid_p4_id(table_id))?;
        let fetched =
            self.driver.table_entries_fetch(session.handle(), self.device_id, table_id)?;
        for fe in fetched {
            let mut table_entry = TableEntry { table_id, ..Default::default() };
            let priority = fe.key.priority();
            if priority > 0 {
                table_entry.priority = priority;
            }
            table_entry.field_match = fe.key.to_field_matches(table_info)?;
            table_entry.action = self.parse_action_entry(state, table_info, fe.action.as_ref())?;
            match table.get_entry(&fe.key) {
                Some(data) => table_entry.controller_metadata = data.controller_metadata,
                None => {
                    // The per-table lock keeps the shadow in sync with the
                    // device; a miss here is a bug, not a request error.
                    debug_assert!(false, "table {} entry missing from shadow store", table_id);
                    error!("table {:#010x} entry missing from shadow store", table_id);
                    return Err(Status::unknown("shadow store does not mirror device state"));
                }
            }
            response.entities.push(Entity::TableEntry(table_entry));
        }
        Ok(())
    }

    fn parse_action_entry(
        &self,
        state: &DeviceState,
        table_info: &TableInfo,
        action: Option<&ActionEntry>,
    ) -> Result<Option<TableAction>, Status> {
        match action {
            None => Ok(None),
            Some(ActionEntry::Data(data)) => {
                Ok(Some(TableAction::Action(action_data_to_proto(data))))
            }
            Some(ActionEntry::IndirectHandle(handle)) => {
                let mgr = self.indirect_mgr(state, table_info).map_err(|_| {
                    Status::unknown("driver returned an indirect action for a direct table")
                })?;
                if let Some(member_id) = mgr.retrieve_member_id(*handle) {
                    return Ok(Some(TableAction::ActionProfileMemberId(member_id)));
                }
                match mgr.retrieve_group_id(*handle) {
                    Some(group_id) => Ok(Some(TableAction::ActionProfileGroupId(group_id))),
                    None => Err(Status::unknown(format!(
                        "indirect handle {:#x} maps to no member or group",
                        handle
                    ))),
                }
            }
        }
    }

    // ---- action profiles ----

    fn action_prof_mgr<'a>(
        &self,
        state: &'a DeviceState,
        act_prof_id: u32,
    ) -> Result<&'a ActionProfMgr, Status> {
        let p4info = Self::p4info(state)?;
        if !p4info.check_action_profile_id(act_prof_id) {
            return Err(invalid_p4_id(act_prof_id));
        }
        state.action_profs.get(&act_prof_id).ok_or_else(|| invalid_p4_id(act_prof_id))
    }

    fn action_profile_member_write(
        &self,
        state: &DeviceState,
        update_type: UpdateType,
        member: &ActionProfileMember,
        session: &Session,
    ) -> Result<(), Status> {
        let mgr = self.action_prof_mgr(state, member.action_profile_id)?;
        match update_type {
            UpdateType::Unspecified => Err(Status::invalid_argument("unspecified update type")),
            UpdateType::Insert => mgr.member_create(member, session),
            UpdateType::Modify => mgr.member_modify(member, session),
            UpdateType::Delete => mgr.member_delete(member, session),
        }
    }

    fn action_profile_group_write(
        &self,
        state: &DeviceState,
        update_type: UpdateType,
        group: &ActionProfileGroup,
        session: &Session,
    ) -> Result<(), Status> {
        let mgr = self.action_prof_mgr(state, group.action_profile_id)?;
        match update_type {
            UpdateType::Unspecified => Err(Status::invalid_argument("unspecified update type")),
            UpdateType::Insert => mgr.group_create(group, session),
            UpdateType::Modify => mgr.group_modify(group, session),
            UpdateType::Delete => mgr.group_delete(group, session),
        }
    }

    /// Fetches an action profile from the driver and reverse-maps every
    /// handle to its controller-visible id, appending members, groups, or
    /// both to the response.
    fn action_profile_read_common(
        &self,
        state: &DeviceState,
        act_prof_id: u32,
        session: &Session,
        response: &mut ReadResponse,
        want_members: bool,
        want_groups: bool,
    ) -> Result<(), Status> {
        let mgr = self.action_prof_mgr(state, act_prof_id)?;
        let fetched =
            self.driver.act_prof_entries_fetch(session.handle(), self.device_id, act_prof_id)?;

        if want_members {
            for member in &fetched.members {
                let member_id = mgr.retrieve_member_id(member.handle).ok_or_else(|| {
                    Status::unknown(format!("member handle {:#x} has no id", member.handle))
                })?;
                response.entities.push(Entity::ActionProfileMember(ActionProfileMember {
                    action_profile_id: act_prof_id,
                    member_id,
                    action: Some(action_data_to_proto(&member.action)),
                }));
            }
        }

        if want_groups {
            for group in &fetched.groups {
                let group_id = mgr.retrieve_group_id(group.handle).ok_or_else(|| {
                    Status::unknown(format!("group handle {:#x} has no id", group.handle))
                })?;
                let members = group
                    .members
                    .iter()
                    .map(|&handle| {
                        mgr.retrieve_member_id(handle)
                            .map(|member_id| GroupMember { member_id, weight: 0 })
                            .ok_or_else(|| {
                                Status::unknown(format!("member handle {:#x} has no id", handle))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                response.entities.push(Entity::ActionProfileGroup(ActionProfileGroup {
                    action_profile_id: act_prof_id,
                    group_id,
                    members,
                    max_size: 0,
                }));
            }
        }

        Ok(())
    }

    fn action_profile_member_read(
        &self,
        state: &DeviceState,
        member: &ActionProfileMember,
        session: &Session,
        response: &mut ReadResponse,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        if member.action_profile_id == 0 {
            for ap in p4info.action_profiles() {
                self.action_profile_read_common(state, ap.id, session, response, true, false)?;
            }
            Ok(())
        } else {
            self.action_profile_read_common(
                state,
                member.action_profile_id,
                session,
                response,
                true,
                false,
            )
        }
    }

    fn action_profile_group_read(
        &self,
        state: &DeviceState,
        group: &ActionProfileGroup,
        session: &Session,
        response: &mut ReadResponse,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        if group.action_profile_id == 0 {
            for ap in p4info.action_profiles() {
                self.action_profile_read_common(state, ap.id, session, response, false, true)?;
            }
            Ok(())
        } else {
            self.action_profile_read_common(
                state,
                group.action_profile_id,
                session,
                response,
                false,
                true,
            )
        }
    }

    // ---- meters ----

    fn meter_write(
        &self,
        state: &DeviceState,
        update_type: UpdateType,
        entry: &MeterEntry,
        session: &Session,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        if !p4info.check_meter_id(entry.meter_id) {
            return Err(invalid_p4_id(entry.meter_id));
        }
        match update_type {
            UpdateType::Unspecified => Err(Status::invalid_argument("unspecified update type")),
            UpdateType::Insert | UpdateType::Modify => {
                let spec = meter_spec_from_config(entry.config.as_ref());
                self.driver.meter_set(
                    session.handle(),
                    self.device_tgt,
                    entry.meter_id,
                    entry.index,
                    &spec,
                )?;
                Ok(())
            }
            UpdateType::Delete => {
                // A meter cell is erased by resetting it to the all-zero spec.
                self.driver.meter_set(
                    session.handle(),
                    self.device_tgt,
                    entry.meter_id,
                    entry.index,
                    &MeterSpec::default(),
                )?;
                Ok(())
            }
        }
    }

    fn direct_meter_write(
        &self,
        state: &DeviceState,
        update_type: UpdateType,
        entry: &DirectMeterEntry,
        session: &Session,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        if !p4info.check_direct_meter_id(entry.meter_id) {
            return Err(invalid_p4_id(entry.meter_id));
        }
        let table_entry = entry
            .table_entry
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("direct meter entry has no table entry"))?;
        if !p4info.check_table_id(table_entry.table_id) {
            return Err(invalid_p4_id(table_entry.table_id));
        }

        let key = MatchKey::from_table_entry(p4info, table_entry)?;
        let table = state
            .tables
            .lock_table(table_entry.table_id)
            .ok_or_else(|| invalid_p4_id(table_entry.table_id))?;
        let handle = table
            .get_entry(&key)
            .ok_or_else(|| Status::invalid_argument("no entry with this match key"))?
            .handle;

        match update_type {
            UpdateType::Unspecified => Err(Status::invalid_argument("unspecified update type")),
            UpdateType::Insert | UpdateType::Modify => {
                let spec = meter_spec_from_config(entry.config.as_ref());
                self.driver.meter_set_direct(
                    session.handle(),
                    self.device_tgt,
                    entry.meter_id,
                    handle,
                    &spec,
                )?;
                Ok(())
            }
            UpdateType::Delete => {
                self.driver.meter_set_direct(
                    session.handle(),
                    self.device_tgt,
                    entry.meter_id,
                    handle,
                    &MeterSpec::default(),
                )?;
                Ok(())
            }
        }
    }

    // ---- counters ----

    fn counter_read(
        &self,
        state: &DeviceState,
        entry: &CounterEntry,
        session: &Session,
        response: &mut ReadResponse,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        if entry.counter_id == 0 {
            // A zero counter id reads every indirect counter.
            for counter in p4info.counters() {
                if counter.direct_table.is_some() {
                    continue;
                }
                self.counter_read_one(state, counter.id, entry, session, response)?;
            }
            Ok(())
        } else {
            if !p4info.check_counter_id(entry.counter_id) {
                return Err(invalid_p4_id(entry.counter_id));
            }
            self.counter_read_one(state, entry.counter_id, entry, session, response)
        }
    }

    fn counter_read_one(
        &self,
        state: &DeviceState,
        counter_id: u32,
        entry: &CounterEntry,
        session: &Session,
        response: &mut ReadResponse,
    ) -> Result<(), Status> {
        let p4info = Self::p4info(state)?;
        let info = p4info.counter(counter_id).ok_or_else(|| invalid_p4_id(counter_id))?;
        // Direct counters never reach this path: the id check and the
        // all-counters iteration both exclude them.
        debug_assert!(info.direct_table.is_none());
        if info.direct_table.is_some() {
            return Err(Status::unimplemented("direct counter cells cannot be read by counter id"));
        }

        if entry.index != 0 {
            let data = self.counter_read_one_index(session, counter_id, entry.index)?;
            response.entities.push(Entity::CounterEntry(CounterEntry {
                counter_id,
                index: entry.index,
                data: Some(data),
            }));
            return Ok(());
        }
        // A zero index reads the whole array.
        for index in 0..info.size {
            let data = self.counter_read_one_index(session, counter_id, index)?;
            response.entities.push(Entity::CounterEntry(CounterEntry {
                counter_id,
                index,
                data: Some(data),
            }));
        }
        Ok(())
    }

    fn counter_read_one_index(
        &self,
        session: &Session,
        counter_id: u32,
        index: i64,
    ) -> Result<proto::p4runtime::CounterData, Status> {
        let data = self.driver.counter_read(
            session.handle(),
            self.device_tgt,
            counter_id,
            index,
            CounterFlags::empty(),
        )?;
        let mut out = proto::p4runtime::CounterData::default();
        if data.valid.contains(CounterUnits::PACKETS) {
            out.packet_count = data.packets as i64;
        }
        if data.valid.contains(CounterUnits::BYTES) {
            out.byte_count = data.bytes as i64;
        }
        Ok(out)
    }
}

impl Drop for DeviceMgr {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        if state.config_state != ConfigState::Unassigned {
            if let Err(e) = self.driver.remove_device(self.device_id) {
                warn!("failed to remove device {}: {}", self.device_id, e);
            }
        }
    }
}

fn invalid_p4_id(id: u32) -> Status {
    Status::invalid_argument(format!("invalid P4 object id {:#010x}", id))
}

fn meter_spec_from_config(config: Option<&MeterConfig>) -> MeterSpec {
    match config {
        Some(config) => MeterSpec {
            cir: config.cir as u64,
            cburst: config.cburst as u32,
            pir: config.pir as u64,
            pburst: config.pburst as u32,
            ..Default::default()
        },
        None => MeterSpec::default(),
    }
}
