// src/dag/codec.rs

//! Binary wire form of a [`TaskGraph`].
//!
//! ```text
//! nodeCount: varint
//! repeat nodeCount times:
//!   position: varint
//!   doneFlag: 1 byte (0|1)
//!   depCount: varint
//!   depPositions: depCount x varint
//! ```
//!
//! A varint is a header byte followed by 0 to 4 big-endian magnitude bytes.
//! The low nibble of the header holds the number of magnitude bytes, `0x10`
//! flags a negative value, `0x20` alone encodes zero and `0x80` alone
//! encodes `i32::MIN`.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::dag::task_graph::{TaskGraph, TaskNode};
use crate::errors::{JobGridError, Result};
use crate::types::Position;

const SIGN_BIT: u8 = 0x10;
const ZERO_BIT: u8 = 0x20;
const MIN_VALUE_BIT: u8 = 0x80;
const LENGTH_MASK: u8 = 0x0F;

/// Upper bounds (exclusive) of the magnitudes encodable in 1, 2 and 3 bytes.
const INT_MAX_VALUES: [u32; 3] = [128, 128 << 8, 128 << 16];

/// Append `value` as a varint.
pub fn put_var_int(buf: &mut impl BufMut, value: i32) {
    if value == 0 {
        buf.put_u8(ZERO_BIT);
        return;
    }
    if value == i32::MIN {
        buf.put_u8(MIN_VALUE_BIT);
        return;
    }

    let magnitude = value.unsigned_abs();
    let len = INT_MAX_VALUES
        .iter()
        .position(|&max| magnitude < max)
        .map(|i| i + 1)
        .unwrap_or(4);

    let mut header = len as u8;
    if value < 0 {
        header |= SIGN_BIT;
    }
    buf.put_u8(header);
    buf.put_slice(&magnitude.to_be_bytes()[4 - len..]);
}

/// Read a varint written by [`put_var_int`].
pub fn get_var_int(buf: &mut impl Buf) -> Result<i32> {
    let header = take_u8(buf, "varint header")?;
    if header == ZERO_BIT {
        return Ok(0);
    }
    if header == MIN_VALUE_BIT {
        return Ok(i32::MIN);
    }

    let len = (header & LENGTH_MASK) as usize;
    if !(1..=4).contains(&len) {
        return Err(JobGridError::Decode(format!(
            "invalid varint header 0x{header:02x}"
        )));
    }
    if buf.remaining() < len {
        return Err(JobGridError::Decode(format!(
            "varint needs {len} bytes, {} left",
            buf.remaining()
        )));
    }

    let mut magnitude: u32 = 0;
    for _ in 0..len {
        magnitude = (magnitude << 8) | u32::from(buf.get_u8());
    }

    let value = magnitude as i32;
    Ok(if header & SIGN_BIT != 0 { value.wrapping_neg() } else { value })
}

fn take_u8(buf: &mut impl Buf, what: &str) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(JobGridError::Decode(format!("unexpected end of input reading {what}")));
    }
    Ok(buf.get_u8())
}

fn get_non_negative(buf: &mut impl Buf, what: &str) -> Result<u32> {
    let value = get_var_int(buf)?;
    u32::try_from(value)
        .map_err(|_| JobGridError::Decode(format!("negative {what}: {value}")))
}

fn to_wire(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| JobGridError::IllegalState(format!("{what} {value} does not fit the wire form")))
}

impl TaskGraph {
    /// Serialize this graph into its wire form.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(8 + self.len() * 4);
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the wire form of this graph to `buf`.
    pub fn encode_into(&self, buf: &mut impl BufMut) -> Result<()> {
        put_var_int(buf, to_wire(self.len(), "node count")?);

        for node in self.nodes() {
            put_var_int(buf, to_wire(node.position() as usize, "position")?);
            buf.put_u8(u8::from(node.is_done()));
            put_var_int(buf, to_wire(node.dependencies().len(), "dependency count")?);
            for &dep in node.dependencies() {
                put_var_int(buf, to_wire(dep as usize, "position")?);
            }
        }

        Ok(())
    }

    /// Rebuild a graph from its wire form.
    ///
    /// Nodes are materialized first; dependency positions are buffered and
    /// resolved once every node is known, since a dependency may appear in
    /// the stream before its own node.
    pub fn decode(buf: &mut impl Buf) -> Result<TaskGraph> {
        let count = get_non_negative(buf, "node count")? as usize;

        let mut flags: Vec<(Position, bool)> = Vec::with_capacity(count.min(4096));
        let mut dependencies: HashMap<Position, Vec<Position>> = HashMap::new();

        for _ in 0..count {
            let position = get_non_negative(buf, "position")?;
            let done = take_u8(buf, "done flag")? != 0;
            let dep_count = get_non_negative(buf, "dependency count")? as usize;

            let mut deps = Vec::with_capacity(dep_count.min(4096));
            for _ in 0..dep_count {
                deps.push(get_non_negative(buf, "dependency position")?);
            }

            if dependencies.insert(position, deps).is_some() {
                return Err(JobGridError::Decode(format!("duplicate node at position {position}")));
            }
            flags.push((position, done));
        }

        for (position, deps) in &dependencies {
            if let Some(missing) = deps.iter().find(|d| !dependencies.contains_key(*d)) {
                return Err(JobGridError::Decode(format!(
                    "node {position} depends on missing node {missing}"
                )));
            }
        }

        let nodes = flags.into_iter().map(|(position, done)| {
            let deps = dependencies.remove(&position).unwrap_or_default();
            TaskNode::new(position, done, deps)
        });

        TaskGraph::from_nodes(nodes.collect::<Vec<_>>())
    }
}
