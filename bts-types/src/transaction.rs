//! Transactions in canonical wire form

use crate::encode::{write_compact_size, write_var_bytes, Decodable, Encodable, Reader};
use crate::error::{Error, Result};
use crate::primitives::{Sha256dHash, Txid};
use crate::script::Script;
use serde::{Deserialize, Serialize};

/// Maximum inputs/outputs accepted when decoding. A block cannot hold more.
const MAX_TX_ELEMENTS: u64 = 100_000;
/// Maximum witness stack items per input
const MAX_WITNESS_ITEMS: u64 = 100_000;

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            txid: Sha256dHash::default(),
            vout: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Witness stack; empty for legacy inputs
    #[serde(default)]
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Value in satoshis
    pub value: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    /// Zero-value `OP_RETURN <data>` output
    pub fn data_carrier(data: &[u8]) -> Self {
        Self {
            value: 0,
            script_pubkey: Script::new_op_return(data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(version: i32) -> Self {
        Self {
            version,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    /// Transaction id: double SHA-256 of the encoding without witness data
    pub fn txid(&self) -> Txid {
        let mut buf = Vec::new();
        self.encode_legacy(&mut buf);
        Sha256dHash::hash(&buf)
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// First output whose script is a data carrier, in output order
    pub fn first_data_output(&self) -> Option<&TxOut> {
        self.outputs
            .iter()
            .find(|output| output.script_pubkey.is_op_return())
    }

    fn encode_legacy(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version.to_le_bytes());
        self.encode_body(buf);
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        write_compact_size(self.inputs.len() as u64, buf);
        for input in &self.inputs {
            buf.extend_from_slice(input.previous_output.txid.as_bytes());
            buf.extend_from_slice(&input.previous_output.vout.to_le_bytes());
            write_var_bytes(input.script_sig.as_bytes(), buf);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(self.outputs.len() as u64, buf);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            write_var_bytes(output.script_pubkey.as_bytes(), buf);
        }
    }
}

impl Encodable for Transaction {
    /// BIP144 encoding when any input carries witness data, legacy otherwise.
    fn consensus_encode(&self, buf: &mut Vec<u8>) {
        if !self.has_witness() {
            self.encode_legacy(buf);
            return;
        }
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(SEGWIT_MARKER);
        buf.push(SEGWIT_FLAG);
        self.encode_body(buf);
        for input in &self.inputs {
            write_compact_size(input.witness.len() as u64, buf);
            for item in &input.witness {
                write_var_bytes(item, buf);
            }
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

fn decode_inputs(reader: &mut Reader<'_>) -> Result<Vec<TxIn>> {
    let count = reader.read_count(MAX_TX_ELEMENTS)?;
    let mut inputs = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let txid = Sha256dHash::new(reader.read_array()?);
        let vout = reader.read_u32()?;
        let script_sig = Script::new(reader.read_var_bytes()?);
        let sequence = reader.read_u32()?;
        inputs.push(TxIn {
            previous_output: OutPoint { txid, vout },
            script_sig,
            sequence,
            witness: Vec::new(),
        });
    }
    Ok(inputs)
}

fn decode_outputs(reader: &mut Reader<'_>) -> Result<Vec<TxOut>> {
    let count = reader.read_count(MAX_TX_ELEMENTS)?;
    let mut outputs = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let value = reader.read_u64()?;
        let script_pubkey = Script::new(reader.read_var_bytes()?);
        outputs.push(TxOut {
            value,
            script_pubkey,
        });
    }
    Ok(outputs)
}

impl Decodable for Transaction {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self> {
        let version = reader.read_i32()?;
        let mut inputs = decode_inputs(reader)?;
        let mut segwit = false;

        // An empty input list followed by a non-zero flag byte is the BIP144 marker
        if inputs.is_empty() {
            let flag = reader.read_u8()?;
            if flag != 0 {
                if flag != SEGWIT_FLAG {
                    return Err(Error::UnknownSegwitFlag(flag));
                }
                segwit = true;
                inputs = decode_inputs(reader)?;
            }
        }

        let outputs = if segwit || !inputs.is_empty() {
            decode_outputs(reader)?
        } else {
            // Legacy zero-input, zero-output transaction: the flag byte read
            // above was the output count.
            Vec::new()
        };

        if segwit {
            for input in inputs.iter_mut() {
                let items = reader.read_count(MAX_WITNESS_ITEMS)?;
                let mut witness = Vec::with_capacity(items.min(64));
                for _ in 0..items {
                    witness.push(reader.read_var_bytes()?);
                }
                input.witness = witness;
            }
            if inputs.iter().all(|input| input.witness.is_empty()) {
                return Err(Error::SuperfluousWitness);
            }
        }

        let lock_time = reader.read_u32()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}
