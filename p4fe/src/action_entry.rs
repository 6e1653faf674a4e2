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

//! Driver-level action representations.
//!
//! [`ActionData`] is inline action data (an action id plus one canonical
//! value per declared parameter); [`ActionEntry`] is what actually gets
//! attached to a table entry, either inline data or an opaque indirect
//! handle resolved through an action profile.

use proto::p4runtime::Action;
use proto::status::Status;

use crate::bytestring::check_bytestring;
use crate::driver::IndirectHandle;
use crate::p4info::P4InfoHandle;

/// Inline action data in declaration order, ready for the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionData {
    pub action_id: u32,
    /// `(param_id, value)` in the action's declared parameter order.
    pub params: Vec<(u32, Vec<u8>)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionEntry {
    Data(ActionData),
    IndirectHandle(IndirectHandle),
}

/// Validates controller-supplied action data against the schema and returns
/// the driver form: the action id must name an action, every declared
/// parameter must be present with a canonical value, and no unknown
/// parameter may appear.
pub fn validate_action_data(p4info: &P4InfoHandle, action: &Action) -> Result<ActionData, Status> {
    if !p4info.check_action_id(action.action_id) {
        return Err(Status::invalid_argument(format!(
            "unknown action {:#010x}",
            action.action_id
        )));
    }
    let info = p4info.action(action.action_id).unwrap();

    if action.params.len() != info.params.len() {
        return Err(Status::invalid_argument(format!(
            "action {} expects {} parameter(s), got {}",
            info.name,
            info.params.len(),
            action.params.len()
        )));
    }

    let mut params = Vec::with_capacity(info.params.len());
    for declared in &info.params {
        let provided = action
            .params
            .iter()
            .find(|p| p.param_id == declared.id)
            .ok_or_else(|| {
                Status::invalid_argument(format!(
                    "action {} is missing parameter {}",
                    info.name, declared.name
                ))
            })?;
        check_bytestring(&provided.value, declared.bitwidth)?;
        params.push((declared.id, provided.value.clone()));
    }

    Ok(ActionData { action_id: action.action_id, params })
}

/// Turns fetched driver action data back into the controller message form.
pub fn action_data_to_proto(data: &ActionData) -> Action {
    Action {
        action_id: data.action_id,
        params: data
            .params
            .iter()
            .map(|(param_id, value)| proto::p4runtime::ActionParam {
                param_id: *param_id,
                value: value.clone(),
            })
            .collect(),
    }
}
