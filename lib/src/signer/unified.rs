// Copyright (c) 2022-2023 The MobileCoin Foundation

//! `PARSE_TX` / `GET_INPUT_SIGNATURE` signing

use bitcoin::{consensus::encode::serialize, secp256k1::ecdsa, ScriptBuf, Transaction, Witness};
use encdec::Encode;
use log::{debug, trace};

use ledger_btc_apdu::{
    tx::{
        Ack, CompactSignature, InputSignatureHeader, InputSignatureReq, ParseMeta, ParseTxReq,
        ParseTxResp,
    },
    MAX_APDU_DATA,
};

use super::stream::{parse_body, split};
use crate::{
    error::MisuseError,
    input::{apdu_path, LedgerInput, Resolved},
    transport::Exchange,
    DeviceHandle, Error,
};

impl<T: Exchange> DeviceHandle<T> {
    /// Sign a single input with a `PARSE_TX` pass followed by `GET_INPUT_SIGNATURE`
    pub(super) async fn unified_sign(
        &self,
        tx: &Transaction,
        input: &LedgerInput,
        r: &Resolved,
        index: usize,
        meta: &ParseMeta,
    ) -> Result<ecdsa::Signature, Error> {
        let witness = r.kind.is_witness();

        // Legacy digests commit to the current script only, witness digests to none
        let mut t = tx.clone();
        for (j, i) in t.input.iter_mut().enumerate() {
            i.witness = Witness::new();
            i.script_sig = match !witness && j == index {
                true => r.script_code.clone(),
                false => ScriptBuf::new(),
            };
        }

        self.parse_tx(meta, &parse_body(&t)).await?;

        let sighash = input.sighash.to_u32();
        let txin = &tx.input[index];

        let output = match InputSignatureHeader::is_single(sighash) {
            true => Some(serialize(&tx.output[index])),
            false => None,
        };

        let header = InputSignatureHeader {
            witness,
            path: apdu_path(&input.path)?,
            sighash,
            outpoint: super::raw_outpoint(&txin.previous_output),
            value: input.coin.value.to_sat(),
            sequence: txin.sequence.to_consensus_u32(),
            script_code: r.script_code.to_bytes(),
            output,
        };

        self.input_signature(&header).await
    }

    /// Stream a transaction body, resending whatever the device echoes back
    pub(super) async fn parse_tx(&self, meta: &ParseMeta, body: &[u8]) -> Result<(), Error> {
        let mut prefix = vec![0u8; meta.encode_len()?];
        let n = meta.encode(&mut prefix)?;
        prefix.truncate(n);

        debug!("Streaming transaction ({} bytes)", body.len());

        let mut offset = 0;
        let mut carry: Vec<u8> = vec![];
        let mut first = true;

        loop {
            let room = MAX_APDU_DATA.saturating_sub(prefix.len() + carry.len());
            let take = room.min(body.len() - offset);

            let mut chunk = std::mem::take(&mut carry);
            chunk.extend_from_slice(&body[offset..][..take]);
            offset += take;

            let mut data = std::mem::take(&mut prefix);
            data.extend_from_slice(&chunk);

            let resp = self
                .request::<ParseTxResp>(ParseTxReq::new(first, data), self.user_timeout())
                .await?;
            first = false;

            let rem = resp.remainder;
            trace!("Device echoed {} of {} bytes", rem.len(), chunk.len());

            if rem.len() > chunk.len() || !chunk.ends_with(&rem) {
                return Err(Error::UnexpectedResponse);
            }
            if !chunk.is_empty() && rem.len() == chunk.len() {
                return Err(MisuseError::ParseStalled.into());
            }

            carry = rem;

            if offset == body.len() && carry.is_empty() {
                break;
            }
        }

        Ok(())
    }

    /// Stream an input signature request, returning the final signature
    async fn input_signature(
        &self,
        header: &InputSignatureHeader,
    ) -> Result<ecdsa::Signature, Error> {
        let mut data = vec![0u8; header.encode_len()?];
        let n = header.encode(&mut data)?;
        data.truncate(n);

        let chunks = split(&data);
        let last = chunks.len() - 1;

        for (i, c) in chunks.into_iter().enumerate() {
            let req = InputSignatureReq::new(i == 0, i == last, c);

            if i < last {
                self.request::<Ack>(req, self.request_timeout()).await?;
                continue;
            }

            let resp = self
                .request::<CompactSignature>(req, self.user_timeout())
                .await?;

            let mut s = ecdsa::Signature::from_compact(&resp.0)
                .map_err(|_| Error::InvalidSignature)?;
            s.normalize_s();

            return Ok(s);
        }

        Err(Error::UnexpectedResponse)
    }
}
