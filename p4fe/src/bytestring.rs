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

//! Canonical byte-string handling for match-field values and action
//! parameters.
//!
//! All controller-supplied values are big-endian byte strings.  A value is
//! canonical for a bitwidth `w` when it is exactly `ceil(w/8)` bytes long and
//! any bits in the top byte beyond `w` are zero, so that two semantically
//! equal values compare and hash identically.

use byteorder::{BigEndian, WriteBytesExt};

use proto::status::Status;

/// Number of bytes in the canonical encoding of a `bitwidth`-bit value.
pub fn num_bytes(bitwidth: i32) -> usize {
    ((bitwidth + 7) / 8) as usize
}

/// Checks that `bytes` is the canonical encoding of some `bitwidth`-bit
/// value.  Fails with `InvalidArgument` otherwise, without saying which
/// object the value belongs to; callers add that context.
pub fn check_bytestring(bytes: &[u8], bitwidth: i32) -> Result<(), Status> {
    let nbytes = num_bytes(bitwidth);
    if bytes.is_empty() || bytes.len() != nbytes {
        return Err(Status::invalid_argument(format!(
            "expected {} byte(s) for a {}-bit value, got {}",
            nbytes,
            bitwidth,
            bytes.len()
        )));
    }
    let zero_bits = (nbytes * 8) as i32 - bitwidth;
    if zero_bits > 0 && (bytes[0] >> (8 - zero_bits)) != 0 {
        return Err(Status::invalid_argument(format!(
            "value has bits set beyond its {}-bit width",
            bitwidth
        )));
    }
    Ok(())
}

/// Encodes `value` as the canonical big-endian byte string of a
/// `bitwidth`-bit field.  The value must fit in the bitwidth.
pub fn encode_value(value: u64, bitwidth: i32) -> Vec<u8> {
    let mut enc_val: Vec<u8> = vec![];
    enc_val.write_u64::<BigEndian>(value).unwrap();

    let num_bytes = num_bytes(bitwidth);
    let start_idx = enc_val.len() - num_bytes;
    enc_val[start_idx..].to_vec()
}
