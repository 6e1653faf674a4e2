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

//! `p4fe` is a control-plane frontend for programmable data planes that speak
//! a P4Runtime-style contract.  It sits between a controller issuing
//! `Write`/`Read`/`SetForwardingPipelineConfig` requests against logical P4
//! objects (see the `proto` crate) and a target-specific PI driver (the
//! [`driver::PiDriver`] trait) that manipulates match-action tables, action
//! profiles, meters, counters, and packet I/O on the device itself.
//!
//! The entry point is one [`DeviceMgr`] per device.  It stages and commits
//! pipeline configs, validates and dispatches entity requests, and keeps two
//! pieces of state the driver does not: a per-table shadow store of entries
//! keyed by canonical match key (so reads can round-trip controller metadata
//! and writes serialize per table) and, per action profile, the
//! bidirectional mapping between controller ids and driver handles.

pub mod action_entry;
pub mod action_prof_mgr;
pub mod bytestring;
pub mod device_config;
pub mod device_mgr;
pub mod driver;
pub mod match_key;
pub mod p4info;
pub mod packet_io;
pub mod table_info_store;
pub mod testing;

pub use device_config::DeviceConfig;
pub use device_mgr::{ConfigState, DeviceMgr};
pub use driver::{DriverError, PiDriver};
pub use match_key::MatchKey;
pub use p4info::P4InfoHandle;
pub use proto::status::{Code, Status};
