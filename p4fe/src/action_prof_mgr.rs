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

//! Per-action-profile manager.
//!
//! Controllers name members and groups by id; the driver names them by
//! opaque indirect handle.  Each profile keeps both directions of that
//! mapping (forward for writes, reverse for reads) plus the recorded group
//! memberships, all under a single mutex held across the driver call and the
//! map update so the two can never diverge.
//!
//! A driver failure after partial success is undone with compensating driver
//! calls.  If compensation itself fails, the maps no longer describe the
//! device; the manager then marks itself degraded and refuses further writes
//! to this profile until the next pipeline commit rebuilds it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, warn};

use proto::p4runtime::{ActionProfileGroup, ActionProfileMember};
use proto::status::Status;

use crate::action_entry::{validate_action_data, ActionData};
use crate::driver::{DevTgt, IndirectHandle, PiDriver, Session};
use crate::p4info::P4InfoHandle;

#[derive(Default)]
struct ActionProfState {
    member_id_to_handle: HashMap<u32, IndirectHandle>,
    handle_to_member_id: HashMap<IndirectHandle, u32>,
    group_id_to_handle: HashMap<u32, IndirectHandle>,
    handle_to_group_id: HashMap<IndirectHandle, u32>,
    /// Recorded membership per group id, mirroring the driver's view.
    group_members: HashMap<u32, BTreeSet<u32>>,
    /// How many groups reference each member.
    member_refcount: HashMap<u32, usize>,
    degraded: bool,
}

pub struct ActionProfMgr {
    device_tgt: DevTgt,
    act_prof_id: u32,
    p4info: Arc<P4InfoHandle>,
    driver: Arc<dyn PiDriver>,
    state: Mutex<ActionProfState>,
}

impl ActionProfMgr {
    pub fn new(
        device_tgt: DevTgt,
        act_prof_id: u32,
        p4info: Arc<P4InfoHandle>,
        driver: Arc<dyn PiDriver>,
    ) -> ActionProfMgr {
        ActionProfMgr {
            device_tgt,
            act_prof_id,
            p4info,
            driver,
            state: Mutex::new(ActionProfState::default()),
        }
    }

    pub fn act_prof_id(&self) -> u32 {
        self.act_prof_id
    }

    fn lock(&self) -> MutexGuard<'_, ActionProfState> {
        self.state.lock().unwrap()
    }

    fn usable(state: &ActionProfState, act_prof_id: u32) -> Result<(), Status> {
        if state.degraded {
            return Err(Status::unknown(format!(
                "action profile {:#010x} is degraded until the next pipeline commit",
                act_prof_id
            )));
        }
        Ok(())
    }

    fn member_action(&self, member: &ActionProfileMember) -> Result<ActionData, Status> {
        let action = member
            .action
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("action profile member has no action"))?;
        validate_action_data(&self.p4info, action)
    }

    pub fn member_create(
        &self,
        member: &ActionProfileMember,
        session: &Session,
    ) -> Result<(), Status> {
        let action = self.member_action(member)?;
        let mut state = self.lock();
        Self::usable(&state, self.act_prof_id)?;
        if state.member_id_to_handle.contains_key(&member.member_id) {
            return Err(Status::already_exists(format!(
                "member {} already exists in action profile {:#010x}",
                member.member_id, self.act_prof_id
            )));
        }
        let handle =
            self.driver
                .member_create(session.handle(), self.device_tgt, self.act_prof_id, &action)?;
        state.member_id_to_handle.insert(member.member_id, handle);
        state.handle_to_member_id.insert(handle, member.member_id);
        state.member_refcount.insert(member.member_id, 0);
        Ok(())
    }

    pub fn member_modify(
        &self,
        member: &ActionProfileMember,
        session: &Session,
    ) -> Result<(), Status> {
        let action = self.member_action(member)?;
        let state = self.lock();
        Self::usable(&state, self.act_prof_id)?;
        let handle = *state.member_id_to_handle.get(&member.member_id).ok_or_else(|| {
            Status::invalid_argument(format!("no such member {}", member.member_id))
        })?;
        self.driver.member_modify(
            session.handle(),
            self.device_tgt,
            self.act_prof_id,
            handle,
            &action,
        )?;
        Ok(())
    }

    pub fn member_delete(
        &self,
        member: &ActionProfileMember,
        session: &Session,
    ) -> Result<(), Status> {
        let mut state = self.lock();
        Self::usable(&state, self.act_prof_id)?;
        let handle = *state.member_id_to_handle.get(&member.member_id).ok_or_else(|| {
            Status::invalid_argument(format!("no such member {}", member.member_id))
        })?;
        if state.member_refcount.get(&member.member_id).copied().unwrap_or(0) > 0 {
            return Err(Status::invalid_argument(format!(
                "member {} is referenced by a group",
                member.member_id
            )));
        }
        self.driver.member_delete(session.handle(), self.device_tgt, self.act_prof_id, handle)?;
        state.member_id_to_handle.remove(&member.member_id);
        state.handle_to_member_id.remove(&handle);
        state.member_refcount.remove(&member.member_id);
        Ok(())
    }

    pub fn group_create(
        &self,
        group: &ActionProfileGroup,
        session: &Session,
    ) -> Result<(), Status> {
        let mut state = self.lock();
        Self::usable(&state, self.act_prof_id)?;
        if state.group_id_to_handle.contains_key(&group.group_id) {
            return Err(Status::already_exists(format!(
                "group {} already exists in action profile {:#010x}",
                group.group_id, self.act_prof_id
            )));
        }

        // Resolve the whole membership before touching the driver.
        let member_ids: BTreeSet<u32> = group.members.iter().map(|m| m.member_id).collect();
        let member_handles = Self::resolve_members(&state, &member_ids)?;

        let max_size =
            if group.max_size > 0 { group.max_size as usize } else { member_ids.len() };
        let group_handle = self.driver.group_create(
            session.handle(),
            self.device_tgt,
            self.act_prof_id,
            max_size,
        )?;

        let mut added = Vec::with_capacity(member_handles.len());
        for &member_handle in &member_handles {
            match self.driver.group_add_member(
                session.handle(),
                self.device_tgt,
                self.act_prof_id,
                group_handle,
                member_handle,
            ) {
                Ok(()) => added.push(member_handle),
                Err(e) => {
                    self.rollback_group_create(&mut state, session, group_handle, &added);
                    return Err(e.into());
                }
            }
        }

        state.group_id_to_handle.insert(group.group_id, group_handle);
        state.handle_to_group_id.insert(group_handle, group.group_id);
        for &id in &member_ids {
            *state.member_refcount.entry(id).or_insert(0) += 1;
        }
        state.group_members.insert(group.group_id, member_ids);
        Ok(())
    }

    pub fn group_modify(
        &self,
        group: &ActionProfileGroup,
        session: &Session,
    ) -> Result<(), Status> {
        let mut state = self.lock();
        Self::usable(&state, self.act_prof_id)?;
        let group_handle = *state.group_id_to_handle.get(&group.group_id).ok_or_else(|| {
            Status::invalid_argument(format!("no such group {}", group.group_id))
        })?;

        let requested: BTreeSet<u32> = group.members.iter().map(|m| m.member_id).collect();
        Self::resolve_members(&state, &requested)?;
        let current = state.group_members.get(&group.group_id).cloned().unwrap_or_default();

        // Apply the set difference, additions first so the group never goes
        // through an emptier intermediate state than it has to.
        let additions: Vec<u32> = requested.difference(&current).copied().collect();
        let removals: Vec<u32> = current.difference(&requested).copied().collect();

        let mut applied_adds = Vec::new();
        let mut applied_removes = Vec::new();
        let result = (|| -> Result<(), Status> {
            for &id in &additions {
                let member_handle = state.member_id_to_handle[&id];
                self.driver.group_add_member(
                    session.handle(),
                    self.device_tgt,
                    self.act_prof_id,
                    group_handle,
                    member_handle,
                )?;
                applied_adds.push(id);
            }
            for &id in &removals {
                let member_handle = state.member_id_to_handle[&id];
                self.driver.group_remove_member(
                    session.handle(),
                    self.device_tgt,
                    self.act_prof_id,
                    group_handle,
                    member_handle,
                )?;
                applied_removes.push(id);
            }
            Ok(())
        })();

        if let Err(e) = result {
            self.rollback_group_modify(
                &mut state,
                session,
                group_handle,
                &applied_adds,
                &applied_removes,
            );
            return Err(e);
        }

        for &id in &additions {
            *state.member_refcount.entry(id).or_insert(0) += 1;
        }
        for &id in &removals {
            if let Some(rc) = state.member_refcount.get_mut(&id) {
                *rc = rc.saturating_sub(1);
            }
        }
        state.group_members.insert(group.group_id, requested);
        Ok(())
    }

    pub fn group_delete(
        &self,
        group: &ActionProfileGroup,
        session: &Session,
    ) -> Result<(), Status> {
        let mut state = self.lock();
        Self::usable(&state, self.act_prof_id)?;
        let group_handle = *state.group_id_to_handle.get(&group.group_id).ok_or_else(|| {
            Status::invalid_argument(format!("no such group {}", group.group_id))
        })?;

        // The driver rejects deleting a group that a table entry still
        // points at.
        if let Err(e) =
            self.driver.group_delete(session.handle(), self.device_tgt, self.act_prof_id, group_handle)
        {
            return Err(Status::invalid_argument(format!(
                "cannot delete group {}: {}",
                group.group_id, e
            )));
        }

        state.group_id_to_handle.remove(&group.group_id);
        state.handle_to_group_id.remove(&group_handle);
        if let Some(members) = state.group_members.remove(&group.group_id) {
            for id in members {
                if let Some(rc) = state.member_refcount.get_mut(&id) {
                    *rc = rc.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    pub fn retrieve_member_handle(&self, member_id: u32) -> Option<IndirectHandle> {
        self.lock().member_id_to_handle.get(&member_id).copied()
    }

    pub fn retrieve_member_id(&self, handle: IndirectHandle) -> Option<u32> {
        self.lock().handle_to_member_id.get(&handle).copied()
    }

    pub fn retrieve_group_handle(&self, group_id: u32) -> Option<IndirectHandle> {
        self.lock().group_id_to_handle.get(&group_id).copied()
    }

    pub fn retrieve_group_id(&self, handle: IndirectHandle) -> Option<u32> {
        self.lock().handle_to_group_id.get(&handle).copied()
    }

    fn resolve_members(
        state: &ActionProfState,
        member_ids: &BTreeSet<u32>,
    ) -> Result<Vec<IndirectHandle>, Status> {
        member_ids
            .iter()
            .map(|id| {
                state
                    .member_id_to_handle
                    .get(id)
                    .copied()
                    .ok_or_else(|| Status::invalid_argument(format!("no such member {}", id)))
            })
            .collect()
    }

    /// Undoes a half-built group: removes the members already added, then
    /// destroys the group itself.
    fn rollback_group_create(
        &self,
        state: &mut ActionProfState,
        session: &Session,
        group_handle: IndirectHandle,
        added: &[IndirectHandle],
    ) {
        warn!(
            "rolling back group creation in action profile {:#010x}",
            self.act_prof_id
        );
        let mut ok = true;
        for &member_handle in added {
            ok &= self
                .driver
                .group_remove_member(
                    session.handle(),
                    self.device_tgt,
                    self.act_prof_id,
                    group_handle,
                    member_handle,
                )
                .is_ok();
        }
        ok &= self
            .driver
            .group_delete(session.handle(), self.device_tgt, self.act_prof_id, group_handle)
            .is_ok();
        if !ok {
            self.mark_degraded(state);
        }
    }

    /// Undoes a half-applied membership change, putting the driver back at
    /// the recorded membership.
    fn rollback_group_modify(
        &self,
        state: &mut ActionProfState,
        session: &Session,
        group_handle: IndirectHandle,
        applied_adds: &[u32],
        applied_removes: &[u32],
    ) {
        warn!(
            "rolling back group membership change in action profile {:#010x}",
            self.act_prof_id
        );
        let mut ok = true;
        for &id in applied_adds {
            let member_handle = state.member_id_to_handle[&id];
            ok &= self
                .driver
                .group_remove_member(
                    session.handle(),
                    self.device_tgt,
                    self.act_prof_id,
                    group_handle,
                    member_handle,
                )
                .is_ok();
        }
        for &id in applied_removes {
            let member_handle = state.member_id_to_handle[&id];
            ok &= self
                .driver
                .group_add_member(
                    session.handle(),
                    self.device_tgt,
                    self.act_prof_id,
                    group_handle,
                    member_handle,
                )
                .is_ok();
        }
        if !ok {
            self.mark_degraded(state);
        }
    }

    fn mark_degraded(&self, state: &mut ActionProfState) {
        error!(
            "compensation failed; action profile {:#010x} no longer mirrors the device",
            self.act_prof_id
        );
        state.degraded = true;
    }
}
