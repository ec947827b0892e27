// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Four-phase protocol handlers
//!
//! A `NEW_SEGWIT` stream followed by finalization caches the transaction
//! skeleton, later `CONTINUE` streams carrying a single input are signed
//! against that cache. `NEW_LEGACY` streams are signed directly and drop the
//! cache.

use bitcoin::{
    absolute::LockTime,
    consensus::encode::deserialize,
    hashes::Hash,
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use encdec::DecodeOwned;
use log::{debug, info};

use ledger_btc_apdu::{
    helpers::{take, take_arr, varint},
    path::{self, Path},
    tx::{
        DerSignature, FinalizeKind, HashInputMode, HashSignReq, InputHeader, RawOutpoint,
        TrustedInput,
    },
    ApduError, Command, StatusWord,
};

use super::{decode, encode, invalid, Engine, TxReader};

/// Previous transaction being streamed for a trusted input
#[derive(Debug)]
struct TrustedStream {
    vout: u32,
    reader: TxReader,
    pending: Vec<u8>,
}

/// Transaction skeleton cached by a `NEW_SEGWIT` stream
#[derive(Clone, Debug)]
struct SegwitCache {
    version: Version,
    inputs: Vec<(OutPoint, Sequence)>,
    outputs: Vec<TxOut>,
}

/// Input parsed from a `HASH_INPUT_START` stream
#[derive(Clone, Debug)]
struct StreamedInput {
    header: InputHeader,
    script: ScriptBuf,
    sequence: Sequence,
}

#[derive(Debug, Default)]
pub(super) struct LegacyState {
    trusted: Option<TrustedStream>,
    stream: Option<(HashInputMode, Vec<u8>)>,
    change: Option<Path>,
    outputs: Vec<u8>,
    finalized: Option<Vec<TxOut>>,
    segwit: Option<SegwitCache>,
}

impl LegacyState {
    pub(super) fn abort(&mut self) {
        *self = Self::default();
    }

    fn reset_stream(&mut self) {
        self.stream = None;
        self.change = None;
        self.outputs.clear();
        self.finalized = None;
    }
}

impl Engine {
    pub(super) fn trusted_input(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        let mut data = &cmd.data[..];

        match cmd.p1 {
            0x00 => {
                if data.len() < 4 {
                    return Err(StatusWord::IncorrectLength);
                }

                let mut index = 0;
                let vout = u32::from_be_bytes(take_arr(data, &mut index).map_err(invalid)?);
                data = &data[index..];

                self.legacy.trusted = Some(TrustedStream {
                    vout,
                    reader: TxReader::new(),
                    pending: vec![],
                });
            }
            0x80 => (),
            _ => return Err(StatusWord::IncorrectP1P2),
        }

        let s = self
            .legacy
            .trusted
            .as_mut()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;

        s.pending.extend_from_slice(data);
        let n = s.reader.feed(&s.pending, usize::MAX)?;
        s.pending.drain(..n);

        let tx = match s.reader.transaction() {
            Some(tx) => tx,
            None => return Ok(vec![]),
        };
        let vout = s.vout;
        self.legacy.trusted = None;

        let out = tx
            .output
            .get(vout as usize)
            .ok_or(StatusWord::IncorrectData)?;

        self.nonce = self.nonce.wrapping_add(1);
        let txid = tx.compute_txid().to_byte_array();
        let nonce = self.nonce.to_be_bytes();
        let amount = out.value.to_sat();

        let t = TrustedInput::new(nonce, txid, vout, amount, [0u8; 8]);
        let t = TrustedInput::new(nonce, txid, vout, amount, self.mac(t.body()));

        debug!("Issued trusted input for {}:{}", tx.compute_txid(), vout);

        encode(&t)
    }

    pub(super) fn hash_input_start(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        let mode = HashInputMode::try_from(cmd.p2).map_err(|_| StatusWord::IncorrectP1P2)?;

        match cmd.p1 {
            0x00 => {
                match mode {
                    HashInputMode::NewLegacy => self.legacy.segwit = None,
                    HashInputMode::NewSegwit => self.legacy.segwit = None,
                    HashInputMode::Continue if self.legacy.segwit.is_none() => {
                        return Err(StatusWord::ConditionsNotSatisfied)
                    }
                    HashInputMode::Continue => (),
                }

                self.legacy.reset_stream();
                self.legacy.stream = Some((mode, cmd.data.clone()));
            }
            0x80 => match &mut self.legacy.stream {
                Some((m, buff)) if *m == mode => buff.extend_from_slice(&cmd.data),
                Some(_) => return Err(StatusWord::IncorrectP1P2),
                None => return Err(StatusWord::ConditionsNotSatisfied),
            },
            _ => return Err(StatusWord::IncorrectP1P2),
        }

        Ok(vec![])
    }

    pub(super) fn hash_finalize(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        let kind = FinalizeKind::try_from(cmd.p1).map_err(|_| StatusWord::IncorrectP1P2)?;

        let mode = match &self.legacy.stream {
            Some((HashInputMode::Continue, _)) | None => {
                return Err(StatusWord::ConditionsNotSatisfied)
            }
            Some((m, _)) => *m,
        };
        if self.legacy.finalized.is_some() {
            return Err(StatusWord::ConditionsNotSatisfied);
        }

        match kind {
            FinalizeKind::ChangePath => {
                let (p, n) = path::dec(&cmd.data).map_err(invalid)?;
                if n != cmd.data.len() {
                    return Err(StatusWord::IncorrectLength);
                }

                self.derive(&p)?;
                self.legacy.change = Some(p);

                return Ok(vec![]);
            }
            FinalizeKind::More => {
                self.legacy.outputs.extend_from_slice(&cmd.data);
                return Ok(vec![]);
            }
            FinalizeKind::Last => self.legacy.outputs.extend_from_slice(&cmd.data),
        }

        let outputs: Vec<TxOut> =
            deserialize(&self.legacy.outputs).map_err(|_| StatusWord::IncorrectData)?;

        if let Some(p) = &self.legacy.change {
            self.check_change(p, &outputs)?;
        }

        info!("Confirming {} outputs", outputs.len());
        self.confirm()?;

        if mode == HashInputMode::NewSegwit {
            let (version, inputs) = self.streamed_inputs()?;

            let inputs = inputs
                .iter()
                .map(|i| match &i.header {
                    InputHeader::Witness { outpoint, .. } => {
                        Ok((outpoint_from(outpoint)?, i.sequence))
                    }
                    _ => Err(StatusWord::IncorrectData),
                })
                .collect::<Result<Vec<_>, _>>()?;

            debug!("Cached segwit transaction ({} inputs)", inputs.len());

            self.legacy.segwit = Some(SegwitCache {
                version,
                inputs,
                outputs,
            });
            self.legacy.reset_stream();

            return Ok(vec![]);
        }

        self.legacy.finalized = Some(outputs);

        Ok(vec![])
    }

    pub(super) fn hash_sign(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        let req: HashSignReq = decode(&cmd.data)?;
        let lock_time = LockTime::from_consensus(req.lock_time);
        let sighash = req.sighash as u32;

        let digest = match &self.legacy.stream {
            Some((HashInputMode::Continue, _)) => self.segwit_digest(lock_time, sighash)?,
            Some((HashInputMode::NewLegacy, _)) if self.legacy.finalized.is_some() => {
                self.legacy_digest(lock_time, sighash)?
            }
            _ => return Err(StatusWord::ConditionsNotSatisfied),
        };
        self.legacy.reset_stream();

        let s = self.sign(&req.path, digest)?;

        // Parity of R is reported in the sequence tag
        let parity = s.serialize_compact()[31] & 1;
        let mut der = s.serialize_der().to_vec();
        der[0] |= parity;

        encode(&DerSignature {
            der,
            sighash: req.sighash,
        })
    }

    fn legacy_digest(&self, lock_time: LockTime, sighash: u32) -> Result<[u8; 32], StatusWord> {
        let (version, streamed) = self.streamed_inputs()?;
        let outputs = self
            .legacy
            .finalized
            .clone()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;

        let mut input = Vec::with_capacity(streamed.len());
        for i in &streamed {
            let outpoint = match &i.header {
                InputHeader::Plain { outpoint } => outpoint_from(outpoint)?,
                InputHeader::Trusted(t) => {
                    if self.mac(t.body()) != t.mac() {
                        return Err(StatusWord::IncorrectData);
                    }
                    outpoint_from(&t.outpoint())?
                }
                InputHeader::Witness { .. } => return Err(StatusWord::IncorrectData),
            };

            input.push(TxIn {
                previous_output: outpoint,
                script_sig: i.script.clone(),
                sequence: i.sequence,
                witness: Witness::new(),
            });
        }

        // The signed input is the only one carrying a script
        let mut signing = input.iter().enumerate().filter(|(_, i)| !i.script_sig.is_empty());
        let (index, script) = match (signing.next(), signing.next()) {
            (Some((n, i)), None) => (n, i.script_sig.clone()),
            _ => return Err(StatusWord::IncorrectData),
        };

        let tx = Transaction {
            version,
            lock_time,
            input,
            output: outputs,
        };

        let h = SighashCache::new(&tx)
            .legacy_signature_hash(index, &script, sighash)
            .map_err(|_| StatusWord::IncorrectData)?;

        Ok(h.to_byte_array())
    }

    fn segwit_digest(&self, lock_time: LockTime, sighash: u32) -> Result<[u8; 32], StatusWord> {
        let cache = self
            .legacy
            .segwit
            .as_ref()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;

        let (_, streamed) = self.streamed_inputs()?;
        let (outpoint, value, script) = match &streamed[..] {
            [StreamedInput {
                header: InputHeader::Witness { outpoint, value },
                script,
                ..
            }] => (outpoint_from(outpoint)?, *value, script),
            _ => return Err(StatusWord::IncorrectData),
        };

        let index = cache
            .inputs
            .iter()
            .position(|(o, _)| *o == outpoint)
            .ok_or(StatusWord::IncorrectData)?;

        let tx = Transaction {
            version: cache.version,
            lock_time,
            input: cache
                .inputs
                .iter()
                .map(|(o, s)| TxIn {
                    previous_output: *o,
                    script_sig: ScriptBuf::new(),
                    sequence: *s,
                    witness: Witness::new(),
                })
                .collect(),
            output: cache.outputs.clone(),
        };

        let ty = EcdsaSighashType::from_standard(sighash).map_err(|_| StatusWord::IncorrectData)?;

        let h = SighashCache::new(&tx)
            .p2wsh_signature_hash(index, script, Amount::from_sat(value), ty)
            .map_err(|_| StatusWord::IncorrectData)?;

        Ok(h.to_byte_array())
    }

    fn streamed_inputs(&self) -> Result<(Version, Vec<StreamedInput>), StatusWord> {
        let (_, buff) = self
            .legacy
            .stream
            .as_ref()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;

        parse_stream(buff).map_err(invalid)
    }

    /// Check a change path pays to one of the standard scripts for its key
    pub(super) fn check_change(&self, p: &Path, outputs: &[TxOut]) -> Result<(), StatusWord> {
        let k = self.derive(p)?;
        let pk = self.compressed_key(&k);

        let scripts = [
            ledger_btc::script::p2pkh(&pk),
            ledger_btc::script::p2wpkh(&pk),
            ledger_btc::script::p2sh(&ledger_btc::script::p2wpkh(&pk)),
        ];

        match outputs.iter().any(|o| scripts.contains(&o.script_pubkey)) {
            true => Ok(()),
            false => Err(StatusWord::IncorrectData),
        }
    }
}

/// Parse `version ‖ varint(n) ‖ (header ‖ varint(len) ‖ script ‖ sequence)*`
fn parse_stream(buff: &[u8]) -> Result<(Version, Vec<StreamedInput>), ApduError> {
    let mut index = 0;

    let version = Version(i32::from_le_bytes(take_arr(buff, &mut index)?));

    let (n, l) = varint::dec(&buff[index..])?;
    index += l;

    let mut inputs = vec![];
    for _ in 0..n {
        let (header, l) = InputHeader::decode_owned(&buff[index..])?;
        index += l;

        let (len, l) = varint::dec(&buff[index..])?;
        index += l;

        let script = ScriptBuf::from_bytes(take(buff, &mut index, len as usize)?.to_vec());
        let sequence = Sequence(u32::from_le_bytes(take_arr(buff, &mut index)?));

        inputs.push(StreamedInput {
            header,
            script,
            sequence,
        });
    }

    if index != buff.len() {
        return Err(ApduError::InvalidLength);
    }

    Ok((version, inputs))
}

fn outpoint_from(raw: &RawOutpoint) -> Result<OutPoint, StatusWord> {
    deserialize(&raw[..]).map_err(|_| StatusWord::IncorrectData)
}
