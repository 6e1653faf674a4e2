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

//! Canonical match keys.
//!
//! A [`MatchKey`] is the driver-level representation of a table entry's key:
//! a fixed-layout byte sequence so that two semantically equal keys hash and
//! compare identically across requests.  The layout is the entry priority (a
//! big-endian word) followed by one segment per declared match field, in the
//! table's declaration order:
//!
//! * exact: the value;
//! * LPM: the value, then the prefix length as a big-endian word;
//! * ternary: the value, then the mask;
//! * range: the low value, then the high value;
//! * valid: a single 0/1 byte.
//!
//! An empty `field_match` list designates the table's default entry, whose
//! key holds only the priority word.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use proto::p4info::MatchType;
use proto::p4runtime::{FieldMatch, FieldMatchType, TableEntry};
use proto::status::Status;

use crate::bytestring::{check_bytestring, num_bytes};
use crate::p4info::{P4InfoHandle, TableInfo};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MatchKey {
    table_id: u32,
    is_default: bool,
    data: Vec<u8>,
}

impl MatchKey {
    /// Builds the canonical key for `entry`, validating each provided field
    /// against the table's schema.  The number of provided match fields must
    /// equal the number declared by the table, except that an empty match
    /// list designates the default entry.
    pub fn from_table_entry(p4info: &P4InfoHandle, entry: &TableEntry) -> Result<MatchKey, Status> {
        let table = p4info
            .table(entry.table_id)
            .ok_or_else(|| Status::invalid_argument(format!("unknown table {:#010x}", entry.table_id)))?;

        let mut data = Vec::new();
        data.write_u32::<BigEndian>(entry.priority as u32).unwrap();

        if entry.field_match.is_empty() {
            return Ok(MatchKey { table_id: entry.table_id, is_default: true, data });
        }

        if entry.field_match.len() != table.match_fields.len() {
            return Err(Status::invalid_argument(format!(
                "table {} expects {} match field(s), got {}",
                table.name,
                table.match_fields.len(),
                entry.field_match.len()
            )));
        }

        // Canonicalize by walking the schema's field order, not the order the
        // controller happened to send.
        for mf in &table.match_fields {
            let provided = find_field(&entry.field_match, mf.id).ok_or_else(|| {
                Status::invalid_argument(format!(
                    "table {} is missing a match for field {}",
                    table.name, mf.name
                ))
            })?;
            let fm = provided
                .field_match_type
                .as_ref()
                .ok_or_else(|| Status::invalid_argument(format!("empty match for field {}", mf.name)))?;
            append_field(&mut data, table, mf.bitwidth, mf.match_type, &mf.name, fm)?;
        }

        Ok(MatchKey { table_id: entry.table_id, is_default: false, data })
    }

    /// Reassembles a driver key from its canonical bytes, e.g. when a fake or
    /// remote driver hands keys back during a fetch.
    pub fn from_canonical(table_id: u32, data: Vec<u8>) -> MatchKey {
        let is_default = data.len() <= 4;
        MatchKey { table_id, is_default, data }
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    /// True for the table's default entry (no match fields).
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn priority(&self) -> i32 {
        let mut cur = Cursor::new(&self.data);
        cur.read_u32::<BigEndian>().unwrap_or(0) as i32
    }

    /// The canonical byte sequence, including the priority word.  This is the
    /// shadow-store key.
    pub fn canonical(&self) -> &[u8] {
        &self.data
    }

    /// Walks the canonical bytes back into controller-visible field matches,
    /// using the table's declared field list.  The inverse of
    /// [`MatchKey::from_table_entry`] for non-default keys.
    pub fn to_field_matches(&self, table: &TableInfo) -> Result<Vec<FieldMatch>, Status> {
        if self.is_default {
            return Ok(Vec::new());
        }
        let mut cur = Cursor::new(&self.data[4..]);
        let mut fields = Vec::with_capacity(table.match_fields.len());
        for mf in &table.match_fields {
            let nbytes = num_bytes(mf.bitwidth);
            let field_match_type = match mf.match_type {
                MatchType::Exact => FieldMatchType::Exact { value: read_bytes(&mut cur, nbytes)? },
                MatchType::Lpm => {
                    let value = read_bytes(&mut cur, nbytes)?;
                    let prefix_len = cur
                        .read_u32::<BigEndian>()
                        .map_err(|_| truncated_key(table))? as i32;
                    FieldMatchType::Lpm { value, prefix_len }
                }
                MatchType::Ternary => {
                    let value = read_bytes(&mut cur, nbytes)?;
                    let mask = read_bytes(&mut cur, nbytes)?;
                    FieldMatchType::Ternary { value, mask }
                }
                MatchType::Range => {
                    let low = read_bytes(&mut cur, nbytes)?;
                    let high = read_bytes(&mut cur, nbytes)?;
                    FieldMatchType::Range { low, high }
                }
                MatchType::Valid => {
                    let byte = read_bytes(&mut cur, 1)?;
                    FieldMatchType::Valid { value: byte[0] != 0 }
                }
                MatchType::Unspecified => return Err(truncated_key(table)),
            };
            fields.push(FieldMatch { field_id: mf.id, field_match_type: Some(field_match_type) });
        }
        Ok(fields)
    }
}

fn find_field(field_match: &[FieldMatch], field_id: u32) -> Option<&FieldMatch> {
    field_match.iter().find(|fm| fm.field_id == field_id)
}

fn truncated_key(table: &TableInfo) -> Status {
    Status::unknown(format!("driver returned a malformed key for table {}", table.name))
}

fn read_bytes(cur: &mut Cursor<&[u8]>, n: usize) -> Result<Vec<u8>, Status> {
    let pos = cur.position() as usize;
    let data = *cur.get_ref();
    if pos + n > data.len() {
        return Err(Status::unknown("driver returned a truncated match key"));
    }
    cur.set_position((pos + n) as u64);
    Ok(data[pos..pos + n].to_vec())
}

fn append_field(
    data: &mut Vec<u8>,
    table: &TableInfo,
    bitwidth: i32,
    declared: MatchType,
    field_name: &str,
    fm: &FieldMatchType,
) -> Result<(), Status> {
    let mismatch = || {
        Status::invalid_argument(format!(
            "match kind for field {} of table {} does not agree with the schema",
            field_name, table.name
        ))
    };
    match (declared, fm) {
        (MatchType::Exact, FieldMatchType::Exact { value }) => {
            check_bytestring(value, bitwidth)?;
            data.extend_from_slice(value);
        }
        (MatchType::Lpm, FieldMatchType::Lpm { value, prefix_len }) => {
            check_bytestring(value, bitwidth)?;
            if *prefix_len < 0 || *prefix_len > bitwidth {
                return Err(Status::invalid_argument(format!(
                    "prefix length {} out of range for {}-bit field {}",
                    prefix_len, bitwidth, field_name
                )));
            }
            data.extend_from_slice(value);
            data.write_u32::<BigEndian>(*prefix_len as u32).unwrap();
        }
        (MatchType::Ternary, FieldMatchType::Ternary { value, mask }) => {
            check_bytestring(value, bitwidth)?;
            data.extend_from_slice(value);
            if mask.is_empty() {
                // An absent mask is the all-zero mask: the field matches
                // anything.
                data.extend(std::iter::repeat(0u8).take(value.len()));
            } else {
                check_bytestring(mask, bitwidth)?;
                data.extend_from_slice(mask);
            }
        }
        (MatchType::Range, FieldMatchType::Range { low, high }) => {
            check_bytestring(low, bitwidth)?;
            check_bytestring(high, bitwidth)?;
            data.extend_from_slice(low);
            data.extend_from_slice(high);
        }
        (MatchType::Valid, FieldMatchType::Valid { value }) => {
            data.push(*value as u8);
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}
