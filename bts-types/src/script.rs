//! Output scripts and push-data parsing

use serde::{Deserialize, Serialize};
use std::fmt;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_RETURN: u8 = 0x6a;

/// A single parsed script element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk<'a> {
    /// Non-push opcode
    Op(u8),
    /// Pushed data (opcode 0x00..=0x4e)
    Push(&'a [u8]),
}

impl<'a> Chunk<'a> {
    pub fn data(&self) -> Option<&'a [u8]> {
        match self {
            Chunk::Push(data) => Some(data),
            Chunk::Op(_) => None,
        }
    }
}

/// Iterator over script chunks. Yields `None` after the first malformed push.
pub struct Chunks<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Chunks<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn take_len(&mut self, width: usize) -> Option<usize> {
        let raw = self.take(width)?;
        let mut le = [0u8; 4];
        le[..width].copy_from_slice(raw);
        Some(u32::from_le_bytes(le) as usize)
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let opcode = *self.bytes.get(self.pos)?;
        self.pos += 1;

        let len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => self.take_len(1)?,
            OP_PUSHDATA2 => self.take_len(2)?,
            OP_PUSHDATA4 => self.take_len(4)?,
            OP_0 => return Some(Chunk::Push(&[])),
            op => return Some(Chunk::Op(op)),
        };

        match self.take(len) {
            Some(data) => Some(Chunk::Push(data)),
            None => {
                // Truncated push: stop iterating
                self.pos = self.bytes.len();
                None
            }
        }
    }
}

/// A raw script as carried in transaction inputs and outputs
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script(#[serde(with = "crate::hex_bytes")] Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// `OP_RETURN <data>`, the provably unspendable data-carrier form
    pub fn new_op_return(data: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + 6);
        bytes.push(OP_RETURN);
        push_data(data, &mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            bytes: &self.0,
            pos: 0,
        }
    }

    /// True when the first opcode is `OP_RETURN`
    pub fn is_op_return(&self) -> bool {
        self.0.first() == Some(&OP_RETURN)
    }

    /// Data pushed immediately after `OP_RETURN`.
    ///
    /// `None` if this is not a data-carrier script, or the element after
    /// `OP_RETURN` is missing, malformed or not a push.
    pub fn op_return_payload(&self) -> Option<&[u8]> {
        if !self.is_op_return() {
            return None;
        }
        self.chunks().nth(1)?.data()
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

/// Append a minimal push of `data` to `script`
fn push_data(data: &[u8], script: &mut Vec<u8>) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}
