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

//! Framing of the opaque `p4_device_config` bytes carried by
//! `SetForwardingPipelineConfig`.
//!
//! The frame is a sequence of tag-length-value records: a one-byte tag, a
//! big-endian 32-bit payload length, and the payload.  Records with an
//! unknown tag are skipped, so the frame can grow fields without breaking
//! older frontends.  Known tags:
//!
//! | tag | payload |
//! |-----|---------|
//! | 1   | the device image handed to the driver, verbatim |
//! | 2   | one byte, nonzero to force device reassignment |
//! | 3   | one extra as a 16-bit key length, the key, then the value |

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use proto::status::Status;

const TAG_DEVICE_DATA: u8 = 1;
const TAG_REASSIGN: u8 = 2;
const TAG_EXTRA: u8 = 3;

/// The decoded device configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Opaque driver image.
    pub device_data: Vec<u8>,
    /// Tear the device down and reassign it before updating.
    pub reassign: bool,
    /// Key/value options forwarded to device assignment.
    pub extras: Vec<(String, String)>,
}

impl DeviceConfig {
    /// Decodes a frame.  Any structural problem (truncated record, bad
    /// string, short payload) is a malformed request.
    pub fn parse(bytes: &[u8]) -> Result<DeviceConfig, Status> {
        let mut config = DeviceConfig::default();
        let mut cur = Cursor::new(bytes);
        while (cur.position() as usize) < bytes.len() {
            let tag = cur.read_u8().map_err(|_| malformed())?;
            let len = cur.read_u32::<BigEndian>().map_err(|_| malformed())? as usize;
            let start = cur.position() as usize;
            if start + len > bytes.len() {
                return Err(malformed());
            }
            let payload = &bytes[start..start + len];
            cur.set_position((start + len) as u64);

            match tag {
                TAG_DEVICE_DATA => config.device_data = payload.to_vec(),
                TAG_REASSIGN => {
                    if payload.len() != 1 {
                        return Err(malformed());
                    }
                    config.reassign = payload[0] != 0;
                }
                TAG_EXTRA => {
                    let mut p = Cursor::new(payload);
                    let key_len = p.read_u16::<BigEndian>().map_err(|_| malformed())? as usize;
                    if 2 + key_len > payload.len() {
                        return Err(malformed());
                    }
                    let key = std::str::from_utf8(&payload[2..2 + key_len])
                        .map_err(|_| malformed())?;
                    let value = std::str::from_utf8(&payload[2 + key_len..])
                        .map_err(|_| malformed())?;
                    config.extras.push((key.to_owned(), value.to_owned()));
                }
                // Unknown fields are ignored.
                _ => {}
            }
        }
        Ok(config)
    }

    /// Encodes the frame, for controllers and tests.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_record(&mut out, TAG_DEVICE_DATA, &self.device_data);
        write_record(&mut out, TAG_REASSIGN, &[self.reassign as u8]);
        for (key, value) in &self.extras {
            let mut payload = Vec::with_capacity(2 + key.len() + value.len());
            payload.write_u16::<BigEndian>(key.len() as u16).unwrap();
            payload.extend_from_slice(key.as_bytes());
            payload.extend_from_slice(value.as_bytes());
            write_record(&mut out, TAG_EXTRA, &payload);
        }
        out
    }
}

fn write_record(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    out.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(payload);
}

fn malformed() -> Status {
    Status::invalid_argument("malformed device config")
}
