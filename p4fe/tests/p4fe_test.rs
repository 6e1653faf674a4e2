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

//! End-to-end tests driving a `DeviceMgr` against the in-memory fake driver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;

use p4fe::bytestring::encode_value;
use p4fe::testing::*;
use p4fe::{Code, ConfigState, DeviceConfig, DeviceMgr, PiDriver, Status};
use proto::p4runtime::{
    Action,
    ActionParam,
    ActionProfileGroup,
    ActionProfileMember,
    ConfigAction,
    CounterEntry,
    DirectMeterEntry,
    Entity,
    FieldMatch,
    FieldMatchType,
    ForwardingPipelineConfig,
    GroupMember,
    MeterConfig,
    MeterEntry,
    PacketMetadata,
    PacketOut,
    ReadRequest,
    ReadResponse,
    TableAction,
    TableEntry,
    UpdateType,
    WriteRequest,
};

fn new_device() -> (Arc<FakeDriver>, DeviceMgr) {
    let driver = Arc::new(FakeDriver::new());
    DeviceMgr::init(driver.as_ref(), 256).unwrap();
    let mgr = DeviceMgr::new(DEVICE_ID, driver.clone());
    (driver, mgr)
}

fn device_with_pipeline() -> (Arc<FakeDriver>, DeviceMgr) {
    let (driver, mgr) = new_device();
    commit_sample_pipeline(&mgr).unwrap();
    (driver, mgr)
}

fn insert(mgr: &DeviceMgr, entity: Entity) -> Result<(), Status> {
    mgr.write(&write_request(vec![update(UpdateType::Insert, entity)]))
}

fn modify(mgr: &DeviceMgr, entity: Entity) -> Result<(), Status> {
    mgr.write(&write_request(vec![update(UpdateType::Modify, entity)]))
}

fn delete(mgr: &DeviceMgr, entity: Entity) -> Result<(), Status> {
    mgr.write(&write_request(vec![update(UpdateType::Delete, entity)]))
}

fn read_entities(mgr: &DeviceMgr, entity: Entity) -> Vec<Entity> {
    let mut response = ReadResponse::default();
    mgr.read(
        &ReadRequest { device_id: DEVICE_ID, entities: vec![entity] },
        &mut response,
    )
    .unwrap();
    response.entities
}

fn read_table(mgr: &DeviceMgr, table_id: u32) -> Vec<TableEntry> {
    read_entities(mgr, Entity::TableEntry(TableEntry { table_id, ..Default::default() }))
        .into_iter()
        .map(|e| match e {
            Entity::TableEntry(te) => te,
            other => panic!("expected a table entry, got {:?}", other),
        })
        .collect()
}

fn code(result: Result<(), Status>) -> Code {
    result.unwrap_err().code()
}

// ---- table entries ----

#[test]
fn insert_and_read_back() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42))).unwrap();

    let entries = read_table(&mgr, TABLE_T1);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.table_id, TABLE_T1);
    assert_eq!(entry.field_match, vec![exact_match(1, vec![0x00, 0x01])]);
    assert_eq!(
        entry.action,
        Some(TableAction::Action(action_with_param(ACTION_A1, 1, vec![0x00, 0xaa])))
    );
    assert_eq!(entry.controller_metadata, 42);
}

#[test]
fn duplicate_insert_rejected() {
    let (driver, mgr) = device_with_pipeline();
    let entry = t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42);
    insert(&mgr, Entity::TableEntry(entry.clone())).unwrap();
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::AlreadyExists);
    assert_eq!(read_table(&mgr, TABLE_T1).len(), 1);
    assert_eq!(driver.entry_count(DEVICE_ID, TABLE_T1), 1);
}

#[test]
fn modify_entry_rewrites_action_and_metadata() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42))).unwrap();
    modify(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xbb], 7))).unwrap();

    let entries = read_table(&mgr, TABLE_T1);
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].action,
        Some(TableAction::Action(action_with_param(ACTION_A1, 1, vec![0x00, 0xbb])))
    );
    assert_eq!(entries[0].controller_metadata, 7);
}

#[test]
fn modify_missing_entry_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let result = modify(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 0)));
    assert_eq!(code(result), Code::InvalidArgument);
}

#[test]
fn delete_entry() {
    let (driver, mgr) = device_with_pipeline();
    let entry = t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42);
    insert(&mgr, Entity::TableEntry(entry.clone())).unwrap();
    delete(&mgr, Entity::TableEntry(entry)).unwrap();
    assert!(read_table(&mgr, TABLE_T1).is_empty());
    assert_eq!(driver.entry_count(DEVICE_ID, TABLE_T1), 0);
}

#[test]
fn delete_missing_entry_is_driver_error() {
    let (_driver, mgr) = device_with_pipeline();
    let result = delete(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 0)));
    assert_eq!(code(result), Code::Unknown);
}

#[test]
fn default_entry_insert_modify_delete() {
    let (_driver, mgr) = device_with_pipeline();
    let default_entry = |param: Vec<u8>, metadata| TableEntry {
        table_id: TABLE_T1,
        field_match: vec![],
        action: Some(TableAction::Action(action_with_param(ACTION_A1, 1, param))),
        controller_metadata: metadata,
        ..Default::default()
    };
    insert(&mgr, Entity::TableEntry(default_entry(vec![0x00, 0x01], 3))).unwrap();
    modify(&mgr, Entity::TableEntry(default_entry(vec![0x00, 0x02], 4))).unwrap();
    // Clearing a default entry is not supported.
    let result = delete(&mgr, Entity::TableEntry(default_entry(vec![0x00, 0x02], 4)));
    assert_eq!(code(result), Code::Unimplemented);
    // The default entry is not a keyed entry; reads do not return it.
    assert!(read_table(&mgr, TABLE_T1).is_empty());
}

#[test]
fn unspecified_update_type_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let request = write_request(vec![update(
        UpdateType::Unspecified,
        Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 0)),
    )]);
    assert_eq!(code(mgr.write(&request)), Code::InvalidArgument);
}

#[test]
fn unknown_table_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let entry = TableEntry { table_id: 0x0200_00ff, ..Default::default() };
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
}

#[test]
fn write_without_pipeline_rejected() {
    let (_driver, mgr) = new_device();
    let result = insert(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 0)));
    assert_eq!(code(result), Code::InvalidArgument);
}

#[test]
fn wrong_device_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let request = WriteRequest { device_id: DEVICE_ID + 1, updates: vec![] };
    assert_eq!(code(mgr.write(&request)), Code::NotFound);
}

// ---- validation ----

#[test]
fn non_canonical_value_rejected_before_driver() {
    let (driver, mgr) = device_with_pipeline();
    for bad in [vec![0x01], vec![0x00, 0x00, 0x01], vec![]] {
        let entry = t1_entry(bad, vec![0x00, 0xaa], 0);
        assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
    }
    // Spare bits beyond the 12-bit width of t3's field.
    let entry = TableEntry {
        table_id: TABLE_T3,
        field_match: vec![FieldMatch {
            field_id: 1,
            field_match_type: Some(FieldMatchType::Ternary {
                value: vec![0x1f, 0xff],
                mask: vec![],
            }),
        }],
        action: Some(TableAction::Action(action_with_param(ACTION_A1, 1, vec![0x00, 0xaa]))),
        priority: 1,
        ..Default::default()
    };
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
    // None of the rejected entries reached the driver.
    assert_eq!(driver.entry_count(DEVICE_ID, TABLE_T1), 0);
    assert_eq!(driver.entry_count(DEVICE_ID, TABLE_T3), 0);
}

#[test]
fn empty_ternary_mask_collides_with_zero_mask() {
    let (_driver, mgr) = device_with_pipeline();
    let t3_entry = |mask: Vec<u8>| TableEntry {
        table_id: TABLE_T3,
        field_match: vec![FieldMatch {
            field_id: 1,
            field_match_type: Some(FieldMatchType::Ternary { value: vec![0x0a, 0xaa], mask }),
        }],
        action: Some(TableAction::Action(action_with_param(ACTION_A1, 1, vec![0x00, 0xaa]))),
        priority: 10,
        ..Default::default()
    };
    insert(&mgr, Entity::TableEntry(t3_entry(vec![]))).unwrap();
    // The empty mask canonicalizes to the all-zero mask: same key.
    assert_eq!(
        code(insert(&mgr, Entity::TableEntry(t3_entry(vec![0x00, 0x00])))),
        Code::AlreadyExists
    );

    let entries = read_table(&mgr, TABLE_T3);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].priority, 10);
    assert_eq!(
        entries[0].field_match,
        vec![FieldMatch {
            field_id: 1,
            field_match_type: Some(FieldMatchType::Ternary {
                value: vec![0x0a, 0xaa],
                mask: vec![0x00, 0x00],
            }),
        }]
    );
}

#[test]
fn same_key_different_priority_is_distinct() {
    let (_driver, mgr) = device_with_pipeline();
    let t3_entry = |priority| TableEntry {
        table_id: TABLE_T3,
        field_match: vec![FieldMatch {
            field_id: 1,
            field_match_type: Some(FieldMatchType::Ternary {
                value: vec![0x0a, 0xaa],
                mask: vec![0x0f, 0xff],
            }),
        }],
        action: Some(TableAction::Action(action_with_param(ACTION_A1, 1, vec![0x00, 0xaa]))),
        priority,
        ..Default::default()
    };
    insert(&mgr, Entity::TableEntry(t3_entry(1))).unwrap();
    insert(&mgr, Entity::TableEntry(t3_entry(2))).unwrap();
    assert_eq!(read_table(&mgr, TABLE_T3).len(), 2);
}

// ---- indirect coherence ----

fn member(member_id: u32, param: Vec<u8>) -> ActionProfileMember {
    ActionProfileMember {
        action_profile_id: ACT_PROF_AP1,
        member_id,
        action: Some(action_with_param(ACTION_A1, 1, param)),
    }
}

fn group(group_id: u32, member_ids: &[u32]) -> ActionProfileGroup {
    ActionProfileGroup {
        action_profile_id: ACT_PROF_AP1,
        group_id,
        members: member_ids.iter().map(|&member_id| GroupMember { member_id, weight: 0 }).collect(),
        max_size: 0,
    }
}

fn t2_entry(key: Vec<u8>, action: TableAction) -> TableEntry {
    TableEntry {
        table_id: TABLE_T2,
        field_match: vec![exact_match(1, key)],
        action: Some(action),
        ..Default::default()
    }
}

#[test]
fn direct_action_on_indirect_table_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let entry = t2_entry(
        vec![0x00, 0x01],
        TableAction::Action(action_with_param(ACTION_A1, 1, vec![0x00, 0xaa])),
    );
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
}

#[test]
fn indirect_action_on_direct_table_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let entry = TableEntry {
        table_id: TABLE_T1,
        field_match: vec![exact_match(1, vec![0x00, 0x01])],
        action: Some(TableAction::ActionProfileMemberId(1)),
        ..Default::default()
    };
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
    let entry = TableEntry {
        table_id: TABLE_T1,
        field_match: vec![exact_match(1, vec![0x00, 0x01])],
        action: Some(TableAction::ActionProfileGroupId(1)),
        ..Default::default()
    };
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
}

#[test]
fn unknown_member_or_group_reference_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let entry = t2_entry(vec![0x00, 0x01], TableAction::ActionProfileMemberId(77));
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
    let entry = t2_entry(vec![0x00, 0x01], TableAction::ActionProfileGroupId(77));
    assert_eq!(code(insert(&mgr, Entity::TableEntry(entry))), Code::InvalidArgument);
}

// ---- action profiles ----

#[test]
fn member_group_entry_round_trip() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    insert(&mgr, Entity::ActionProfileGroup(group(1, &[1]))).unwrap();
    insert(
        &mgr,
        Entity::TableEntry(t2_entry(vec![0x00, 0x01], TableAction::ActionProfileGroupId(1))),
    )
    .unwrap();

    let entries = read_table(&mgr, TABLE_T2);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, Some(TableAction::ActionProfileGroupId(1)));

    // A zero profile id reads members of every profile.
    let members = read_entities(
        &mgr,
        Entity::ActionProfileMember(ActionProfileMember::default()),
    );
    assert_eq!(
        members,
        vec![Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))]
    );

    let groups = read_entities(
        &mgr,
        Entity::ActionProfileGroup(ActionProfileGroup {
            action_profile_id: ACT_PROF_AP1,
            ..Default::default()
        }),
    );
    assert_eq!(groups, vec![Entity::ActionProfileGroup(group(1, &[1]))]);
}

#[test]
fn member_entry_round_trip() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(5, vec![0x00, 0xcc]))).unwrap();
    insert(
        &mgr,
        Entity::TableEntry(t2_entry(vec![0x00, 0x02], TableAction::ActionProfileMemberId(5))),
    )
    .unwrap();
    let entries = read_table(&mgr, TABLE_T2);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, Some(TableAction::ActionProfileMemberId(5)));
}

#[test]
fn duplicate_member_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    assert_eq!(
        code(insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xbb])))),
        Code::AlreadyExists
    );
}

#[test]
fn member_modify_updates_action() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    modify(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xbb]))).unwrap();
    let members = read_entities(
        &mgr,
        Entity::ActionProfileMember(ActionProfileMember {
            action_profile_id: ACT_PROF_AP1,
            ..Default::default()
        }),
    );
    assert_eq!(members, vec![Entity::ActionProfileMember(member(1, vec![0x00, 0xbb]))]);
}

#[test]
fn member_delete_while_in_group_rejected() {
    let (driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    insert(&mgr, Entity::ActionProfileGroup(group(1, &[1]))).unwrap();

    let result = delete(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa])));
    assert_eq!(code(result), Code::InvalidArgument);
    assert_eq!(driver.member_count(DEVICE_ID, ACT_PROF_AP1), 1);

    let members = read_entities(
        &mgr,
        Entity::ActionProfileMember(ActionProfileMember {
            action_profile_id: ACT_PROF_AP1,
            ..Default::default()
        }),
    );
    assert_eq!(members.len(), 1);
}

#[test]
fn group_with_unknown_member_rejected() {
    let (driver, mgr) = device_with_pipeline();
    let result = insert(&mgr, Entity::ActionProfileGroup(group(1, &[9])));
    assert_eq!(code(result), Code::InvalidArgument);
    assert_eq!(driver.group_count(DEVICE_ID, ACT_PROF_AP1), 0);
}

#[test]
fn group_create_rolls_back_on_driver_failure() {
    let (driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    insert(&mgr, Entity::ActionProfileMember(member(2, vec![0x00, 0xbb]))).unwrap();

    // The first member addition succeeds, the second fails.
    driver.fail_group_add_after(1);
    let result = insert(&mgr, Entity::ActionProfileGroup(group(1, &[1, 2])));
    assert_eq!(code(result), Code::Unknown);
    // The half-built group is gone from the device and from reads.
    assert_eq!(driver.group_count(DEVICE_ID, ACT_PROF_AP1), 0);
    let groups = read_entities(
        &mgr,
        Entity::ActionProfileGroup(ActionProfileGroup {
            action_profile_id: ACT_PROF_AP1,
            ..Default::default()
        }),
    );
    assert!(groups.is_empty());

    // Compensation succeeded, so the profile is still usable.
    insert(&mgr, Entity::ActionProfileGroup(group(1, &[1, 2]))).unwrap();
    assert_eq!(driver.group_count(DEVICE_ID, ACT_PROF_AP1), 1);
}

#[test]
fn failed_rollback_degrades_profile_until_recommit() {
    let (driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    insert(&mgr, Entity::ActionProfileMember(member(2, vec![0x00, 0xbb]))).unwrap();

    // The second member addition fails and so does the compensating
    // removal, so the manager can no longer trust its maps.
    driver.fail_group_add_after(1);
    driver.fail_group_removes(true);
    let result = insert(&mgr, Entity::ActionProfileGroup(group(1, &[1, 2])));
    assert_eq!(code(result), Code::Unknown);

    // Every further write to the profile is refused.
    driver.fail_group_removes(false);
    let result = insert(&mgr, Entity::ActionProfileMember(member(3, vec![0x00, 0xcc])));
    assert_eq!(code(result), Code::Unknown);
    let result = insert(&mgr, Entity::ActionProfileGroup(group(2, &[1])));
    assert_eq!(code(result), Code::Unknown);

    // A fresh pipeline commit rebuilds the manager and clears the latch.
    commit_sample_pipeline(&mgr).unwrap();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
}

#[test]
fn group_modify_applies_membership_diff() {
    let (_driver, mgr) = device_with_pipeline();
    for (id, param) in [(1, 0xaau8), (2, 0xbb), (3, 0xcc)] {
        insert(&mgr, Entity::ActionProfileMember(member(id, vec![0x00, param]))).unwrap();
    }
    insert(&mgr, Entity::ActionProfileGroup(group(1, &[1, 2]))).unwrap();
    modify(&mgr, Entity::ActionProfileGroup(group(1, &[2, 3]))).unwrap();

    let groups = read_entities(
        &mgr,
        Entity::ActionProfileGroup(ActionProfileGroup {
            action_profile_id: ACT_PROF_AP1,
            ..Default::default()
        }),
    );
    assert_eq!(groups, vec![Entity::ActionProfileGroup(group(1, &[2, 3]))]);

    // Member 1 is no longer referenced and may go; member 2 still is.
    delete(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    let result = delete(&mgr, Entity::ActionProfileMember(member(2, vec![0x00, 0xbb])));
    assert_eq!(code(result), Code::InvalidArgument);
}

#[test]
fn group_delete_blocked_by_table_entry() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();
    insert(&mgr, Entity::ActionProfileGroup(group(1, &[1]))).unwrap();
    let entry = t2_entry(vec![0x00, 0x01], TableAction::ActionProfileGroupId(1));
    insert(&mgr, Entity::TableEntry(entry.clone())).unwrap();

    let result = delete(&mgr, Entity::ActionProfileGroup(group(1, &[1])));
    assert_eq!(code(result), Code::InvalidArgument);

    // Once the entry is gone the group can be deleted.
    delete(&mgr, Entity::TableEntry(entry)).unwrap();
    delete(&mgr, Entity::ActionProfileGroup(group(1, &[1]))).unwrap();
}

// ---- batches ----

#[test]
fn batch_applies_in_order_and_stops_at_first_failure() {
    let (_driver, mgr) = device_with_pipeline();
    let good_a = t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 1);
    let bad = t1_entry(vec![0x01], vec![0x00, 0xaa], 2);
    let good_c = t1_entry(vec![0x00, 0x03], vec![0x00, 0xaa], 3);
    let request = write_request(vec![
        update(UpdateType::Insert, Entity::TableEntry(good_a)),
        update(UpdateType::Insert, Entity::TableEntry(bad)),
        update(UpdateType::Insert, Entity::TableEntry(good_c)),
    ]);
    assert_eq!(code(mgr.write(&request)), Code::InvalidArgument);

    // The update before the failure stuck; the one after it was never tried.
    let entries = read_table(&mgr, TABLE_T1);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].controller_metadata, 1);
}

#[test]
fn write_unimplemented_entities() {
    let (_driver, mgr) = device_with_pipeline();
    let entities = [
        Entity::CounterEntry(CounterEntry::default()),
        Entity::DirectCounterEntry(Default::default()),
        Entity::ExternEntry(Default::default()),
    ];
    for entity in entities {
        assert_eq!(code(insert(&mgr, entity)), Code::Unimplemented);
    }
}

#[test]
fn read_unimplemented_entities() {
    let (_driver, mgr) = device_with_pipeline();
    let entities = [
        Entity::MeterEntry(MeterEntry::default()),
        Entity::DirectMeterEntry(Default::default()),
        Entity::DirectCounterEntry(Default::default()),
    ];
    for entity in entities {
        let mut response = ReadResponse::default();
        let result = mgr.read(
            &ReadRequest { device_id: DEVICE_ID, entities: vec![entity] },
            &mut response,
        );
        assert_eq!(result.unwrap_err().code(), Code::Unimplemented);
    }
}

#[test]
fn failed_read_keeps_partial_response() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42))).unwrap();

    let mut response = ReadResponse::default();
    let result = mgr.read(
        &ReadRequest {
            device_id: DEVICE_ID,
            entities: vec![
                Entity::TableEntry(TableEntry { table_id: TABLE_T1, ..Default::default() }),
                Entity::MeterEntry(MeterEntry::default()),
            ],
        },
        &mut response,
    );
    assert_eq!(result.unwrap_err().code(), Code::Unimplemented);
    assert_eq!(response.entities.len(), 1);
}

// ---- meters ----

fn meter_entry(index: i64, config: Option<MeterConfig>) -> MeterEntry {
    MeterEntry { meter_id: METER_M1, index, config }
}

#[test]
fn meter_write_and_erase() {
    let (driver, mgr) = device_with_pipeline();
    let config = MeterConfig { cir: 1000, cburst: 100, pir: 2000, pburst: 200 };
    insert(&mgr, Entity::MeterEntry(meter_entry(3, Some(config.clone())))).unwrap();
    let spec = driver.meter_spec(DEVICE_ID, METER_M1, 3).unwrap();
    assert_eq!((spec.cir, spec.cburst, spec.pir, spec.pburst), (1000, 100, 2000, 200));

    modify(&mgr, Entity::MeterEntry(meter_entry(3, Some(config)))).unwrap();

    // DELETE erases the cell by resetting it to the all-zero spec.
    delete(&mgr, Entity::MeterEntry(meter_entry(3, None))).unwrap();
    let spec = driver.meter_spec(DEVICE_ID, METER_M1, 3).unwrap();
    assert_eq!((spec.cir, spec.cburst, spec.pir, spec.pburst), (0, 0, 0, 0));
}

#[test]
fn meter_unspecified_and_bad_id_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let request = write_request(vec![update(
        UpdateType::Unspecified,
        Entity::MeterEntry(meter_entry(0, None)),
    )]);
    assert_eq!(code(mgr.write(&request)), Code::InvalidArgument);

    let entry = MeterEntry { meter_id: COUNTER_C1, index: 0, config: None };
    assert_eq!(code(insert(&mgr, Entity::MeterEntry(entry))), Code::InvalidArgument);
}

#[test]
fn direct_meter_write_resolves_entry_handle() {
    let (_driver, mgr) = device_with_pipeline();
    let table_entry = t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 0);
    insert(&mgr, Entity::TableEntry(table_entry.clone())).unwrap();

    let direct = DirectMeterEntry {
        meter_id: DIRECT_METER_DM1,
        table_entry: Some(table_entry),
        config: Some(MeterConfig { cir: 10, cburst: 1, pir: 20, pburst: 2 }),
    };
    insert(&mgr, Entity::DirectMeterEntry(direct.clone())).unwrap();
    delete(&mgr, Entity::DirectMeterEntry(direct)).unwrap();

    // No matching table entry, no meter write.
    let missing = DirectMeterEntry {
        meter_id: DIRECT_METER_DM1,
        table_entry: Some(t1_entry(vec![0x00, 0x09], vec![0x00, 0xaa], 0)),
        config: None,
    };
    assert_eq!(code(insert(&mgr, Entity::DirectMeterEntry(missing))), Code::InvalidArgument);
}

// ---- counters ----

#[test]
fn counter_read_single_index() {
    let (driver, mgr) = device_with_pipeline();
    driver.set_counter(DEVICE_ID, COUNTER_C1, 2, 7, 900);

    let entities = read_entities(
        &mgr,
        Entity::CounterEntry(CounterEntry { counter_id: COUNTER_C1, index: 2, data: None }),
    );
    assert_eq!(entities.len(), 1);
    match &entities[0] {
        Entity::CounterEntry(entry) => {
            assert_eq!(entry.index, 2);
            let data = entry.data.as_ref().unwrap();
            assert_eq!((data.packet_count, data.byte_count), (7, 900));
        }
        other => panic!("expected a counter entry, got {:?}", other),
    }
}

#[test]
fn counter_read_all_cells() {
    let (_driver, mgr) = device_with_pipeline();
    let entities = read_entities(
        &mgr,
        Entity::CounterEntry(CounterEntry { counter_id: COUNTER_C1, ..Default::default() }),
    );
    assert_eq!(entities.len() as i64, COUNTER_C1_SIZE);
}

#[test]
fn counter_read_all_counters_skips_direct() {
    let (_driver, mgr) = device_with_pipeline();
    let entities = read_entities(&mgr, Entity::CounterEntry(CounterEntry::default()));
    // Only c1's cells: the direct counter is not readable this way.
    assert_eq!(entities.len() as i64, COUNTER_C1_SIZE);
}

#[test]
fn direct_counter_id_rejected() {
    let (_driver, mgr) = device_with_pipeline();
    let mut response = ReadResponse::default();
    let result = mgr.read(
        &ReadRequest {
            device_id: DEVICE_ID,
            entities: vec![Entity::CounterEntry(CounterEntry {
                counter_id: DIRECT_COUNTER_DC1,
                ..Default::default()
            })],
        },
        &mut response,
    );
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
}

// ---- pipeline lifecycle ----

#[test]
fn pipeline_state_machine() {
    let (driver, mgr) = new_device();
    assert_eq!(mgr.config_state(), ConfigState::Unassigned);

    // A schema with a dangling action reference fails verification and
    // leaves no trace.
    let mut bad = sample_p4info();
    bad.tables[0].action_refs[0].id = 0x0100_00ff;
    let result = mgr.pipeline_config_set(ConfigAction::Verify, &pipeline_config(bad));
    assert_eq!(result.unwrap_err().code(), Code::Unknown);
    assert_eq!(mgr.config_state(), ConfigState::Unassigned);

    // VERIFY of a good pipeline has no side effects either.
    mgr.pipeline_config_set(ConfigAction::Verify, &pipeline_config(sample_p4info())).unwrap();
    assert_eq!(mgr.config_state(), ConfigState::Unassigned);

    mgr.pipeline_config_set(ConfigAction::VerifyAndSave, &pipeline_config(sample_p4info()))
        .unwrap();
    assert_eq!(mgr.config_state(), ConfigState::Staged);
    assert!(!driver.is_committed(DEVICE_ID));

    mgr.pipeline_config_set(ConfigAction::Commit, &ForwardingPipelineConfig::default()).unwrap();
    assert_eq!(mgr.config_state(), ConfigState::Committed);
    assert!(driver.is_committed(DEVICE_ID));
    // The opaque image travelled through the config framing to the driver.
    assert_eq!(driver.device_image(DEVICE_ID), b"fixture image".to_vec());

    insert(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42))).unwrap();
    assert_eq!(read_table(&mgr, TABLE_T1).len(), 1);
}

#[test]
fn recommit_clears_prior_state() {
    let (_driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42))).unwrap();
    insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa]))).unwrap();

    mgr.pipeline_config_set(
        ConfigAction::VerifyAndCommit,
        &pipeline_config(sample_p4info_v2()),
    )
    .unwrap();
    assert_eq!(mgr.config_state(), ConfigState::Committed);
    assert!(read_table(&mgr, TABLE_T1).is_empty());

    // The new pipeline has no action profiles at all.
    let result = insert(&mgr, Entity::ActionProfileMember(member(1, vec![0x00, 0xaa])));
    assert_eq!(code(result), Code::InvalidArgument);

    let config = mgr.pipeline_config_get();
    assert_eq!(config.device_id, DEVICE_ID);
    assert_eq!(config.p4info.unwrap().tables.len(), 1);
    assert!(config.p4_device_config.is_empty());
}

#[test]
fn reassign_tears_down_and_reassigns() {
    let (driver, mgr) = device_with_pipeline();
    insert(&mgr, Entity::TableEntry(t1_entry(vec![0x00, 0x01], vec![0x00, 0xaa], 42))).unwrap();

    let device_config = DeviceConfig {
        device_data: b"new image".to_vec(),
        reassign: true,
        extras: vec![("port".into(), "9560".into())],
    };
    let config = ForwardingPipelineConfig {
        device_id: DEVICE_ID,
        p4info: Some(sample_p4info()),
        p4_device_config: device_config.encode(),
    };
    mgr.pipeline_config_set(ConfigAction::VerifyAndCommit, &config).unwrap();

    assert!(driver.is_device_assigned(DEVICE_ID));
    // The fresh assignment carries the new extras.
    assert_eq!(driver.device_extras(DEVICE_ID), vec![("port".to_string(), "9560".to_string())]);
    assert!(read_table(&mgr, TABLE_T1).is_empty());
    assert_eq!(driver.entry_count(DEVICE_ID, TABLE_T1), 0);
}

#[test]
fn unspecified_config_action_rejected() {
    let (_driver, mgr) = new_device();
    let result = mgr.pipeline_config_set(
        ConfigAction::Unspecified,
        &pipeline_config(sample_p4info()),
    );
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
}

#[test]
fn malformed_device_config_rejected() {
    let (_driver, mgr) = new_device();
    let config = ForwardingPipelineConfig {
        device_id: DEVICE_ID,
        p4info: Some(sample_p4info()),
        // A tag byte with no length word after it.
        p4_device_config: vec![0x01],
    };
    let result = mgr.pipeline_config_set(ConfigAction::VerifyAndCommit, &config);
    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
    assert_eq!(mgr.config_state(), ConfigState::Unassigned);
}

// ---- packet I/O ----

#[test]
fn packet_out_is_framed_with_metadata_header() {
    let (driver, mgr) = device_with_pipeline();
    let packet = PacketOut {
        payload: b"\xde\xad\xbe\xef".to_vec(),
        metadata: vec![
            PacketMetadata { metadata_id: 1, value: encode_value(3, 9) },
            PacketMetadata { metadata_id: 2, value: encode_value(0, 7) },
        ],
    };
    mgr.packet_out_send(&packet).unwrap();

    let sent = driver.sent_packets(DEVICE_ID);
    assert_eq!(sent.len(), 1);
    // Two header bytes (9 + 7 bits) followed by the frame.
    assert_eq!(sent[0].len(), 2 + packet.payload.len());
    assert_eq!(&sent[0][2..], &packet.payload[..]);
}

#[test]
fn packet_in_is_parsed_and_dispatched() {
    let (driver, mgr) = device_with_pipeline();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    mgr.packet_in_register_cb(move |device_id, packet| {
        sink.lock().unwrap().push((device_id, packet));
    });

    // Port 3 in the 9-bit field, zero pad, then the frame.
    let mut raw = vec![0x01, 0x80];
    raw.extend_from_slice(b"frame");
    driver.inject_packet_in(DEVICE_ID, &raw);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (device_id, packet) = &received[0];
    assert_eq!(*device_id, DEVICE_ID);
    assert_eq!(packet.payload, b"frame");
    assert_eq!(
        packet.metadata,
        vec![
            PacketMetadata { metadata_id: 1, value: encode_value(3, 9) },
            PacketMetadata { metadata_id: 2, value: encode_value(0, 7) },
        ]
    );
}

#[test]
fn packet_out_with_wrong_metadata_rejected() {
    let (driver, mgr) = device_with_pipeline();
    let packet = PacketOut { payload: vec![1, 2, 3], metadata: vec![] };
    assert_eq!(code(mgr.packet_out_send(&packet)), Code::InvalidArgument);
    assert!(driver.sent_packets(DEVICE_ID).is_empty());
}

// ---- randomized round trip ----

#[test]
fn random_inserts_round_trip() {
    let (_driver, mgr) = device_with_pipeline();
    let mut rng = rand::thread_rng();

    let mut expected: HashMap<u16, (u16, u64)> = HashMap::new();
    while expected.len() < 64 {
        let key: u16 = rng.gen();
        let param: u16 = rng.gen();
        let metadata: u64 = rng.gen();
        if expected.contains_key(&key) {
            continue;
        }
        insert(
            &mgr,
            Entity::TableEntry(t1_entry(
                encode_value(key as u64, 16),
                encode_value(param as u64, 16),
                metadata,
            )),
        )
        .unwrap();
        expected.insert(key, (param, metadata));
    }

    // Overwrite the metadata of a random subset, last write wins.
    let keys: Vec<u16> = expected.keys().copied().collect();
    for &key in keys.iter().take(16) {
        let param: u16 = rng.gen();
        let metadata: u64 = rng.gen();
        modify(
            &mgr,
            Entity::TableEntry(t1_entry(
                encode_value(key as u64, 16),
                encode_value(param as u64, 16),
                metadata,
            )),
        )
        .unwrap();
        expected.insert(key, (param, metadata));
    }

    let entries = read_table(&mgr, TABLE_T1);
    assert_eq!(entries.len(), expected.len());
    for entry in entries {
        let key = match &entry.field_match[0].field_match_type {
            Some(FieldMatchType::Exact { value }) => {
                u16::from_be_bytes([value[0], value[1]])
            }
            other => panic!("expected an exact match, got {:?}", other),
        };
        let (param, metadata) = expected[&key];
        assert_eq!(
            entry.action,
            Some(TableAction::Action(Action {
                action_id: ACTION_A1,
                params: vec![ActionParam { param_id: 1, value: encode_value(param as u64, 16) }],
            }))
        );
        assert_eq!(entry.controller_metadata, metadata);
    }
}

// ---- concurrency ----

#[test]
fn concurrent_writes_to_disjoint_tables() {
    let (_driver, mgr) = device_with_pipeline();
    let mgr = Arc::new(mgr);

    let t1_writer = {
        let mgr = mgr.clone();
        std::thread::spawn(move || {
            for i in 0..50u64 {
                insert(
                    &mgr,
                    Entity::TableEntry(t1_entry(
                        encode_value(i, 16),
                        encode_value(i, 16),
                        i,
                    )),
                )
                .unwrap();
            }
        })
    };
    let t3_writer = {
        let mgr = mgr.clone();
        std::thread::spawn(move || {
            for i in 0..50u64 {
                let entry = TableEntry {
                    table_id: TABLE_T3,
                    field_match: vec![FieldMatch {
                        field_id: 1,
                        field_match_type: Some(FieldMatchType::Ternary {
                            value: encode_value(i, 12),
                            mask: encode_value(0xfff, 12),
                        }),
                    }],
                    action: Some(TableAction::Action(action_with_param(
                        ACTION_A1,
                        1,
                        encode_value(i, 16),
                    ))),
                    priority: 1,
                    ..Default::default()
                };
                insert(&mgr, Entity::TableEntry(entry)).unwrap();
            }
        })
    };
    t1_writer.join().unwrap();
    t3_writer.join().unwrap();

    assert_eq!(read_table(&mgr, TABLE_T1).len(), 50);
    assert_eq!(read_table(&mgr, TABLE_T3).len(), 50);
}

#[test]
fn concurrent_writes_to_one_table_serialize() {
    let (_driver, mgr) = device_with_pipeline();
    let mgr = Arc::new(mgr);

    let writers: Vec<_> = (0..4u64)
        .map(|t| {
            let mgr = mgr.clone();
            std::thread::spawn(move || {
                for i in 0..25u64 {
                    let key = t * 25 + i;
                    insert(
                        &mgr,
                        Entity::TableEntry(t1_entry(
                            encode_value(key, 16),
                            encode_value(key, 16),
                            key,
                        )),
                    )
                    .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let entries = read_table(&mgr, TABLE_T1);
    assert_eq!(entries.len(), 100);
    // Every entry carries the metadata its writer attached.
    for entry in entries {
        let key = match &entry.field_match[0].field_match_type {
            Some(FieldMatchType::Exact { value }) => {
                u16::from_be_bytes([value[0], value[1]]) as u64
            }
            other => panic!("expected an exact match, got {:?}", other),
        };
        assert_eq!(entry.controller_metadata, key);
    }
}
