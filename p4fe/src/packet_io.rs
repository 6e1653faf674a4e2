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

//! Controller packet I/O.
//!
//! Packets exchanged with the controller carry a metadata header whose
//! layout the P4 program declares (`controller_packet_metadata` objects named
//! `packet_in` and `packet_out`): the declared fields, bit-packed in order
//! and padded to a byte boundary, followed by the frame itself.  The
//! [`PacketIoMgr`] serializes packet-out requests into that wire form,
//! parses punted packets back into metadata + payload, and dispatches them
//! to the registered controller callback.
//!
//! Unlike the shadow store and the action profile managers, this component
//! persists across pipeline changes; a change just swaps the header layouts.

use std::sync::{Arc, Mutex};

use tracing::warn;

use proto::p4runtime::{PacketIn, PacketMetadata, PacketOut};
use proto::status::Status;

use crate::bytestring::{check_bytestring, num_bytes};
use crate::driver::{DeviceId, PiDriver};
use crate::p4info::{P4InfoHandle, PacketMetadataLayout};

pub type PacketInCb = dyn Fn(DeviceId, PacketIn) + Send + Sync;

#[derive(Default)]
struct Layouts {
    packet_in: PacketMetadataLayout,
    packet_out: PacketMetadataLayout,
}

pub struct PacketIoMgr {
    device_id: DeviceId,
    driver: Arc<dyn PiDriver>,
    layouts: Mutex<Layouts>,
    callback: Mutex<Option<Arc<PacketInCb>>>,
}

impl PacketIoMgr {
    pub fn new(device_id: DeviceId, driver: Arc<dyn PiDriver>) -> Arc<PacketIoMgr> {
        let mgr = Arc::new(PacketIoMgr {
            device_id,
            driver: driver.clone(),
            layouts: Mutex::new(Layouts::default()),
            callback: Mutex::new(None),
        });
        let hook_mgr = mgr.clone();
        driver.packet_in_register(
            device_id,
            Box::new(move |dev, raw| hook_mgr.handle_packet_in(dev, raw)),
        );
        mgr
    }

    /// Adopts the new pipeline's packet header layouts.
    pub fn p4_change(&self, p4info: &P4InfoHandle) {
        let mut layouts = self.layouts.lock().unwrap();
        layouts.packet_in = p4info.packet_in_layout().clone();
        layouts.packet_out = p4info.packet_out_layout().clone();
    }

    pub fn packet_out_send(&self, packet: &PacketOut) -> Result<(), Status> {
        let raw = {
            let layouts = self.layouts.lock().unwrap();
            serialize_packet(&layouts.packet_out, &packet.metadata, &packet.payload)?
        };
        self.driver.packet_out_send(self.device_id, &raw)?;
        Ok(())
    }

    /// Replaces the controller's packet-in callback.
    pub fn packet_in_register_cb(&self, cb: impl Fn(DeviceId, PacketIn) + Send + Sync + 'static) {
        *self.callback.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Entry point for the driver's notification thread.
    fn handle_packet_in(&self, device_id: DeviceId, raw: &[u8]) {
        let packet = {
            let layouts = self.layouts.lock().unwrap();
            match parse_packet(&layouts.packet_in, raw) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("dropping malformed packet-in on device {}: {}", device_id, e);
                    return;
                }
            }
        };
        let cb = self.callback.lock().unwrap().clone();
        if let Some(cb) = cb {
            cb(device_id, packet);
        }
    }
}

/// Appends the low `bits` bits of `value` (given as a canonical big-endian
/// byte string) to `out` at bit position `*bit_pos`.
fn pack_bits(out: &mut Vec<u8>, bit_pos: &mut usize, value: &[u8], bits: i32) {
    let mut remaining = bits as usize;
    // Skip the padding bits in the value's top byte.
    let mut src_bit = value.len() * 8 - remaining;
    while remaining > 0 {
        if *bit_pos % 8 == 0 {
            out.push(0);
        }
        let byte = value[src_bit / 8];
        let bit = (byte >> (7 - (src_bit % 8))) & 1;
        let dst = out.len() - 1;
        out[dst] |= bit << (7 - (*bit_pos % 8));
        *bit_pos += 1;
        src_bit += 1;
        remaining -= 1;
    }
}

/// Reads `bits` bits starting at `*bit_pos` in `raw` into a canonical
/// big-endian byte string.
fn unpack_bits(raw: &[u8], bit_pos: &mut usize, bits: i32) -> Option<Vec<u8>> {
    let nbytes = num_bytes(bits);
    let mut value = vec![0u8; nbytes];
    let mut dst_bit = nbytes * 8 - bits as usize;
    for _ in 0..bits {
        let byte = raw.get(*bit_pos / 8)?;
        let bit = (byte >> (7 - (*bit_pos % 8))) & 1;
        value[dst_bit / 8] |= bit << (7 - (dst_bit % 8));
        *bit_pos += 1;
        dst_bit += 1;
    }
    Some(value)
}

fn header_bytes(layout: &PacketMetadataLayout) -> usize {
    let bits: usize = layout.fields.iter().map(|&(_, w)| w as usize).sum();
    (bits + 7) / 8
}

fn serialize_packet(
    layout: &PacketMetadataLayout,
    metadata: &[PacketMetadata],
    payload: &[u8],
) -> Result<Vec<u8>, Status> {
    if metadata.len() != layout.fields.len() {
        return Err(Status::invalid_argument(format!(
            "packet header expects {} metadata field(s), got {}",
            layout.fields.len(),
            metadata.len()
        )));
    }
    let mut out = Vec::with_capacity(header_bytes(layout) + payload.len());
    let mut bit_pos = 0;
    for &(id, bitwidth) in &layout.fields {
        let field = metadata.iter().find(|m| m.metadata_id == id).ok_or_else(|| {
            Status::invalid_argument(format!("packet header is missing metadata field {}", id))
        })?;
        check_bytestring(&field.value, bitwidth)?;
        pack_bits(&mut out, &mut bit_pos, &field.value, bitwidth);
    }
    // Pad to the byte boundary, then the frame.
    out.resize(header_bytes(layout), 0);
    out.extend_from_slice(payload);
    Ok(out)
}

fn parse_packet(layout: &PacketMetadataLayout, raw: &[u8]) -> Result<PacketIn, Status> {
    let header_len = header_bytes(layout);
    if raw.len() < header_len {
        return Err(Status::invalid_argument("packet shorter than its metadata header"));
    }
    let mut metadata = Vec::with_capacity(layout.fields.len());
    let mut bit_pos = 0;
    for &(id, bitwidth) in &layout.fields {
        let value = unpack_bits(raw, &mut bit_pos, bitwidth)
            .ok_or_else(|| Status::invalid_argument("packet shorter than its metadata header"))?;
        metadata.push(PacketMetadata { metadata_id: id, value });
    }
    Ok(PacketIn { payload: raw[header_len..].to_vec(), metadata })
}
