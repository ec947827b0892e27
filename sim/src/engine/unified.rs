// Copyright (c) 2022-2023 The MobileCoin Foundation

//! `PARSE_TX` / `GET_INPUT_SIGNATURE` handlers

use bitcoin::{
    consensus::encode::{deserialize, serialize},
    hashes::Hash,
    sighash::{EcdsaSighashType, SighashCache},
    Amount, OutPoint, ScriptBuf, Transaction,
};
use encdec::DecodeOwned;
use log::{debug, info};

use ledger_btc_apdu::{
    tx::{CompactSignature, InputSignatureHeader, InputSignatureReq, ParseMeta, ParseTxReq},
    Command, StatusWord,
};

use super::{decode, encode, invalid, Engine, TxReader};

#[derive(Debug, Default)]
pub(super) struct UnifiedState {
    meta: Option<ParseMeta>,
    reader: Option<TxReader>,
    tx: Option<Transaction>,
    request: Option<Vec<u8>>,
}

impl Engine {
    pub(super) fn parse_tx(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        let mut data = &cmd.data[..];

        match cmd.p1 {
            ParseTxReq::P1_FIRST => {
                let (meta, n) = ParseMeta::decode_owned(data).map_err(invalid)?;
                data = &data[n..];

                self.unified = UnifiedState {
                    meta: Some(meta),
                    reader: Some(TxReader::new()),
                    ..Default::default()
                };
            }
            ParseTxReq::P1_NEXT => (),
            _ => return Err(StatusWord::IncorrectP1P2),
        }

        let r = self
            .unified
            .reader
            .as_mut()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;

        let n = r.feed(data, self.parse_limit)?;

        if let Some(tx) = r.transaction() {
            self.unified.reader = None;
            self.check_meta(&tx)?;

            info!(
                "Confirming transaction {} ({} outputs)",
                tx.compute_txid(),
                tx.output.len()
            );
            self.confirm()?;

            self.unified.tx = Some(tx);
        }

        Ok(data[n..].to_vec())
    }

    fn check_meta(&self, tx: &Transaction) -> Result<(), StatusWord> {
        let meta = self
            .unified
            .meta
            .as_ref()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;

        if let Some(c) = &meta.change {
            let o = tx
                .output
                .get(c.index as usize)
                .ok_or(StatusWord::IncorrectData)?;

            self.check_change(&c.path, std::slice::from_ref(o))?;
        }

        for c in &meta.covenants {
            if c.index as usize >= tx.output.len() {
                return Err(StatusWord::IncorrectData);
            }

            debug!("Output {}: {} '{}'", c.index, c.kind, c.name);
        }

        Ok(())
    }

    pub(super) fn input_signature(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        match cmd.p1 & InputSignatureReq::P1_FIRST != 0 {
            true => self.unified.request = Some(cmd.data.clone()),
            false => self
                .unified
                .request
                .as_mut()
                .ok_or(StatusWord::ConditionsNotSatisfied)?
                .extend_from_slice(&cmd.data),
        }

        if cmd.p1 & InputSignatureReq::P1_LAST == 0 {
            return Ok(vec![]);
        }

        let buff = self
            .unified
            .request
            .take()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;
        let h: InputSignatureHeader = decode(&buff)?;

        let tx = self
            .unified
            .tx
            .as_ref()
            .ok_or(StatusWord::ConditionsNotSatisfied)?;

        let outpoint: OutPoint =
            deserialize(&h.outpoint[..]).map_err(|_| StatusWord::IncorrectData)?;
        let index = tx
            .input
            .iter()
            .position(|i| i.previous_output == outpoint)
            .ok_or(StatusWord::IncorrectData)?;

        if tx.input[index].sequence.to_consensus_u32() != h.sequence {
            return Err(StatusWord::IncorrectData);
        }

        if let Some(o) = &h.output {
            match tx.output.get(index) {
                Some(txout) if serialize(txout) == *o => (),
                _ => return Err(StatusWord::IncorrectData),
            }
        }

        let script_code = ScriptBuf::from_bytes(h.script_code.clone());
        let mut cache = SighashCache::new(tx);

        let digest = match h.witness {
            true => {
                let ty = EcdsaSighashType::from_standard(h.sighash)
                    .map_err(|_| StatusWord::IncorrectData)?;

                cache
                    .p2wsh_signature_hash(index, &script_code, Amount::from_sat(h.value), ty)
                    .map_err(|_| StatusWord::IncorrectData)?
                    .to_byte_array()
            }
            false => {
                // Parsed script must match the script being signed
                if tx.input[index].script_sig != script_code {
                    return Err(StatusWord::IncorrectData);
                }

                cache
                    .legacy_signature_hash(index, &script_code, h.sighash)
                    .map_err(|_| StatusWord::IncorrectData)?
                    .to_byte_array()
            }
        };

        debug!("Signing input {} ({})", index, outpoint);

        let s = self.sign(&h.path, digest)?;

        encode(&CompactSignature(s.serialize_compact()))
    }
}

#[cfg(test)]
mod test {
    use bitcoin::{
        absolute::LockTime, transaction::Version, Sequence, TxIn, TxOut, Txid, Witness,
    };
    use encdec::Encode;
    use ledger_btc_apdu::{prelude::*, Protocol};

    use super::{super::test::exchange, *};

    fn engine() -> Engine {
        Engine::new(&[0x22; 32], Protocol::Unified).unwrap()
    }

    fn tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x6a]),
            }],
        }
    }

    fn first_chunk(meta: &ParseMeta, body: &[u8]) -> Vec<u8> {
        let mut d = vec![0u8; meta.encode_len().unwrap()];
        meta.encode(&mut d).unwrap();
        d.extend_from_slice(body);
        d
    }

    #[test]
    fn parse_echoes_remainder() {
        let mut e = engine();
        e.set_parse_limit(10);

        let body = serialize(&tx());
        let data = first_chunk(&ParseMeta::default(), &body);

        let r: ParseTxResp = exchange(&mut e, ParseTxReq::new(true, data)).unwrap();

        // Version and input count only, the outpoint does not fit
        assert_eq!(r.remainder, body[5..].to_vec());

        e.set_parse_limit(usize::MAX);
        let r: ParseTxResp = exchange(&mut e, ParseTxReq::new(false, r.remainder)).unwrap();
        assert!(r.remainder.is_empty());
    }

    #[test]
    fn parse_rejected() {
        let mut e = engine();
        e.set_approve(false);

        let data = first_chunk(&ParseMeta::default(), &serialize(&tx()));
        let r = exchange::<_, ParseTxResp>(&mut e, ParseTxReq::new(true, data));

        assert_eq!(r, Err(StatusWord::ConditionsNotSatisfied.into()));
    }

    #[test]
    fn change_index_out_of_range() {
        let mut e = engine();

        let meta = ParseMeta {
            change: Some(ChangeMeta {
                index: 3,
                path: ledger_btc_apdu::path::path_from(&[0]).unwrap(),
            }),
            covenants: vec![],
        };

        let data = first_chunk(&meta, &serialize(&tx()));
        let r = exchange::<_, ParseTxResp>(&mut e, ParseTxReq::new(true, data));

        assert_eq!(r, Err(StatusWord::IncorrectData.into()));
    }

    #[test]
    fn signature_requires_parse() {
        let mut e = engine();

        let h = InputSignatureHeader {
            witness: true,
            path: ledger_btc_apdu::path::path_from(&[0]).unwrap(),
            sighash: 0x01,
            outpoint: [0u8; 36],
            value: 1_000,
            sequence: 0xffff_ffff,
            script_code: vec![0x51],
            output: None,
        };
        let mut d = vec![0u8; h.encode_len().unwrap()];
        h.encode(&mut d).unwrap();

        let r = exchange::<_, CompactSignature>(&mut e, InputSignatureReq::new(true, true, d));
        assert_eq!(r, Err(StatusWord::ConditionsNotSatisfied.into()));
    }
}
