// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Incremental transaction reader
//!
//! Consumes the legacy (witness-free) transaction serialization a piece at a
//! time. Fixed width fields and varints are only consumed whole, scripts may
//! be consumed across any number of calls.

use bitcoin::{
    absolute::LockTime, consensus::encode::deserialize, transaction::Version, Amount, OutPoint,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};

use ledger_btc_apdu::{helpers::varint, StatusWord};

/// Upper bound for script lengths accepted by the reader
pub const MAX_SCRIPT_LEN: u64 = 10_000;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Field {
    Version,
    InputCount,
    Outpoint,
    ScriptLen,
    Script(usize),
    Sequence,
    OutputCount,
    Value,
    LockTime,
    Done,
}

/// Incremental transaction reader
#[derive(Clone, Debug)]
pub struct TxReader {
    field: Field,
    version: Version,
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
    in_outputs: bool,
    remaining: u64,
    script: Vec<u8>,
    lock_time: LockTime,
}

impl Default for TxReader {
    fn default() -> Self {
        Self {
            field: Field::Version,
            version: Version::ONE,
            inputs: vec![],
            outputs: vec![],
            in_outputs: false,
            remaining: 0,
            script: vec![],
            lock_time: LockTime::ZERO,
        }
    }
}

impl TxReader {
    /// Create a new reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether the whole transaction has been read
    pub fn is_done(&self) -> bool {
        self.field == Field::Done
    }

    /// Fetch the transaction once complete
    pub fn transaction(&self) -> Option<Transaction> {
        if !self.is_done() {
            return None;
        }

        Some(Transaction {
            version: self.version,
            lock_time: self.lock_time,
            input: self.inputs.clone(),
            output: self.outputs.clone(),
        })
    }

    /// Consume up to `limit` bytes of `data`, returning the number consumed
    ///
    /// Data remaining once the transaction is complete is rejected.
    pub fn feed(&mut self, data: &[u8], limit: usize) -> Result<usize, StatusWord> {
        let end = limit.min(data.len());
        let mut index = 0;

        while self.field != Field::Done {
            let d = &data[index..end];

            let n = match self.field {
                Field::Script(rem) => {
                    let n = rem.min(d.len());
                    if n == 0 {
                        break;
                    }

                    self.script.extend_from_slice(&d[..n]);
                    match n == rem {
                        true => self.end_script()?,
                        false => self.field = Field::Script(rem - n),
                    }

                    n
                }
                f => {
                    let n = match width(f, d) {
                        Some(n) if n <= d.len() => n,
                        _ => break,
                    };

                    self.read(f, &d[..n])?;
                    n
                }
            };

            index += n;
        }

        if self.is_done() && index < data.len() {
            return Err(StatusWord::IncorrectData);
        }

        Ok(index)
    }

    fn read(&mut self, f: Field, d: &[u8]) -> Result<(), StatusWord> {
        match f {
            Field::Version => {
                self.version = Version(i32::from_le_bytes(arr(d)?));
                self.field = Field::InputCount;
            }
            Field::InputCount => {
                // Zero inputs is the segwit marker, witness data is not accepted
                let n = count(d)?;
                if n == 0 {
                    return Err(StatusWord::IncorrectData);
                }

                self.remaining = n;
                self.field = Field::Outpoint;
            }
            Field::Outpoint => {
                let previous_output =
                    deserialize::<OutPoint>(d).map_err(|_| StatusWord::IncorrectData)?;

                self.inputs.push(TxIn {
                    previous_output,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                });
                self.field = Field::ScriptLen;
            }
            Field::ScriptLen => {
                let n = count(d)?;
                if n > MAX_SCRIPT_LEN {
                    return Err(StatusWord::IncorrectData);
                }

                self.script.clear();
                match n {
                    0 => self.end_script()?,
                    _ => self.field = Field::Script(n as usize),
                }
            }
            Field::Sequence => {
                let i = self.inputs.last_mut().ok_or(StatusWord::TechnicalProblem)?;
                i.sequence = Sequence(u32::from_le_bytes(arr(d)?));

                self.remaining -= 1;
                self.field = match self.remaining {
                    0 => Field::OutputCount,
                    _ => Field::Outpoint,
                };
            }
            Field::OutputCount => {
                self.in_outputs = true;
                self.remaining = count(d)?;
                self.field = match self.remaining {
                    0 => Field::LockTime,
                    _ => Field::Value,
                };
            }
            Field::Value => {
                self.outputs.push(TxOut {
                    value: Amount::from_sat(u64::from_le_bytes(arr(d)?)),
                    script_pubkey: ScriptBuf::new(),
                });
                self.field = Field::ScriptLen;
            }
            Field::LockTime => {
                self.lock_time = LockTime::from_consensus(u32::from_le_bytes(arr(d)?));
                self.field = Field::Done;
            }
            Field::Script(_) | Field::Done => return Err(StatusWord::TechnicalProblem),
        }

        Ok(())
    }

    fn end_script(&mut self) -> Result<(), StatusWord> {
        let s = ScriptBuf::from_bytes(std::mem::take(&mut self.script));

        match self.in_outputs {
            false => {
                let i = self.inputs.last_mut().ok_or(StatusWord::TechnicalProblem)?;
                i.script_sig = s;
                self.field = Field::Sequence;
            }
            true => {
                let o = self.outputs.last_mut().ok_or(StatusWord::TechnicalProblem)?;
                o.script_pubkey = s;

                self.remaining -= 1;
                self.field = match self.remaining {
                    0 => Field::LockTime,
                    _ => Field::Value,
                };
            }
        }

        Ok(())
    }
}

/// Width of the next field, `None` if a varint prefix is not yet available
fn width(f: Field, d: &[u8]) -> Option<usize> {
    let n = match f {
        Field::Version | Field::Sequence | Field::LockTime => 4,
        Field::Outpoint => 36,
        Field::Value => 8,
        Field::InputCount | Field::ScriptLen | Field::OutputCount => match d.first()? {
            0xfd => 3,
            0xfe => 5,
            0xff => 9,
            _ => 1,
        },
        Field::Script(_) | Field::Done => return None,
    };
    Some(n)
}

fn count(d: &[u8]) -> Result<u64, StatusWord> {
    varint::dec(d)
        .map(|(n, _)| n)
        .map_err(|_| StatusWord::IncorrectData)
}

fn arr<const N: usize>(d: &[u8]) -> Result<[u8; N], StatusWord> {
    d.try_into().map_err(|_| StatusWord::IncorrectLength)
}
