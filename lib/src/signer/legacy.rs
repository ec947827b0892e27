// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Four-phase signing: trusted inputs, `HASH_INPUT_START`,
//! `HASH_INPUT_FINALIZE_FULL` and `HASH_SIGN`

use bitcoin::{hashes::Hash, secp256k1::ecdsa, ScriptBuf, Transaction};
use log::debug;

use ledger_btc_apdu::tx::{
    Ack, DerSignature, FinalizeKind, HashInputMode, HashInputStartReq, HashOutputFinalizeReq,
    HashSignReq, InputHeader, TrustedInput, TrustedInputReq,
};

use super::{
    stream::{hash_input_chunks, output_chunks, path_bytes, trusted_input_chunks, StreamInput},
    SigningSession,
};
use crate::{
    error::MisuseError,
    input::{apdu_path, LedgerChange, LedgerInput, Resolved},
    transport::Exchange,
    DeviceHandle, Error,
};

impl<T: Exchange> DeviceHandle<T> {
    /// Fetch trusted inputs for non-witness, non-redeem inputs
    pub(super) async fn collect_trusted_inputs(
        &self,
        session: &mut SigningSession,
        inputs: &[LedgerInput],
        resolved: &[Resolved],
    ) -> Result<(), Error> {
        for (input, r) in inputs.iter().zip(resolved) {
            if r.kind.is_witness() || input.redeem.is_some() {
                continue;
            }

            let key = input.key();
            if session.trusted_inputs.contains_key(&key) {
                continue;
            }

            let prev = input
                .prev_tx
                .as_ref()
                .ok_or(MisuseError::MissingPrevTx(key))?;

            let prev_out = prev.output.get(key.vout as usize);
            if prev.compute_txid() != key.txid || prev_out != Some(&input.coin) {
                return Err(MisuseError::PrevTxMismatch(key).into());
            }

            debug!("Fetching trusted input for {}", key);

            let t = self.trusted_input(prev, key.vout).await?;

            if t.txid() != key.txid.to_byte_array() || t.vout() != key.vout {
                return Err(Error::UnexpectedResponse);
            }

            session.trusted_inputs.insert(key, t);
        }

        Ok(())
    }

    /// Stream a previous transaction and fetch the trusted input for `vout`
    async fn trusted_input(&self, prev: &Transaction, vout: u32) -> Result<TrustedInput, Error> {
        let chunks = trusted_input_chunks(prev, vout);
        let n = chunks.len();

        for (i, c) in chunks.into_iter().enumerate() {
            let req = TrustedInputReq::new(i == 0, c);

            if i + 1 < n {
                self.request::<Ack>(req, self.request_timeout()).await?;
            } else {
                return self
                    .request::<TrustedInput>(req, self.request_timeout())
                    .await;
            }
        }

        Err(Error::UnexpectedResponse)
    }

    /// Pre-stream the whole transaction to cache segwit hashing state
    pub(super) async fn segwit_prestream(
        &self,
        session: &mut SigningSession,
        tx: &Transaction,
        inputs: &[LedgerInput],
        change: Option<&LedgerChange>,
    ) -> Result<(), Error> {
        debug!("Pre-streaming transaction for segwit signing");

        let empty = ScriptBuf::new();

        let stream: Vec<_> = tx
            .input
            .iter()
            .map(|i| {
                // Only the signed input's value is committed to, others may be unknown
                let value = inputs
                    .iter()
                    .find(|d| d.outpoint == i.previous_output)
                    .map(|d| d.coin.value.to_sat())
                    .unwrap_or(0);

                StreamInput {
                    header: InputHeader::Witness {
                        outpoint: super::raw_outpoint(&i.previous_output),
                        value,
                    },
                    script: &empty,
                    sequence: i.sequence,
                }
            })
            .collect();

        self.hash_input_start(HashInputMode::NewSegwit, tx, &stream)
            .await?;
        self.finalize_outputs(tx, change).await?;

        session.is_new_tx = false;

        Ok(())
    }

    /// Sign a single input using the four-phase protocol
    #[allow(clippy::too_many_arguments)]
    pub(super) async fn legacy_sign(
        &self,
        session: &mut SigningSession,
        tx: &Transaction,
        inputs: &[LedgerInput],
        input: &LedgerInput,
        r: &Resolved,
        index: usize,
        change: Option<&LedgerChange>,
    ) -> Result<ecdsa::Signature, Error> {
        match r.kind.is_witness() {
            true => {
                // A legacy pass resets device hashing state
                if session.is_new_tx {
                    self.segwit_prestream(session, tx, inputs, change).await?;
                }

                let txin = &tx.input[index];
                let stream = [StreamInput {
                    header: InputHeader::Witness {
                        outpoint: super::raw_outpoint(&txin.previous_output),
                        value: input.coin.value.to_sat(),
                    },
                    script: &r.script_code,
                    sequence: txin.sequence,
                }];

                self.hash_input_start(HashInputMode::Continue, tx, &stream)
                    .await?;
            }
            false => {
                let empty = ScriptBuf::new();

                let stream: Vec<_> = tx
                    .input
                    .iter()
                    .enumerate()
                    .map(|(j, i)| {
                        let key = i.previous_output.into();
                        let header = match session.trusted_inputs.get(&key) {
                            Some(t) => InputHeader::Trusted(*t),
                            None => InputHeader::Plain {
                                outpoint: super::raw_outpoint(&i.previous_output),
                            },
                        };

                        StreamInput {
                            header,
                            script: match j == index {
                                true => &r.script_code,
                                false => &empty,
                            },
                            sequence: i.sequence,
                        }
                    })
                    .collect();

                self.hash_input_start(HashInputMode::NewLegacy, tx, &stream)
                    .await?;
                self.finalize_outputs(tx, change).await?;

                session.is_new_tx = true;
            }
        }

        self.hash_sign(tx, input).await
    }

    async fn hash_input_start(
        &self,
        mode: HashInputMode,
        tx: &Transaction,
        inputs: &[StreamInput<'_>],
    ) -> Result<(), Error> {
        let chunks = hash_input_chunks(&tx.version, inputs)?;

        for (i, c) in chunks.into_iter().enumerate() {
            let req = HashInputStartReq::new(i == 0, mode, c);
            self.request::<Ack>(req, self.request_timeout()).await?;
        }

        Ok(())
    }

    async fn finalize_outputs(
        &self,
        tx: &Transaction,
        change: Option<&LedgerChange>,
    ) -> Result<(), Error> {
        if let Some(c) = change {
            let p = apdu_path(&c.path)?;
            let req = HashOutputFinalizeReq::new(FinalizeKind::ChangePath, path_bytes(&p)?);
            self.request::<Ack>(req, self.request_timeout()).await?;
        }

        let chunks = output_chunks(&tx.output);
        let n = chunks.len();

        for (i, c) in chunks.into_iter().enumerate() {
            // Outputs are confirmed by the user once complete
            let (kind, timeout) = match i + 1 == n {
                true => (FinalizeKind::Last, self.user_timeout()),
                false => (FinalizeKind::More, self.request_timeout()),
            };

            self.request::<Ack>(HashOutputFinalizeReq::new(kind, c), timeout)
                .await?;
        }

        Ok(())
    }

    async fn hash_sign(
        &self,
        tx: &Transaction,
        input: &LedgerInput,
    ) -> Result<ecdsa::Signature, Error> {
        let sighash = input.sighash.to_u32() as u8;

        let req = HashSignReq::new(
            apdu_path(&input.path)?,
            tx.lock_time.to_consensus_u32(),
            sighash,
        );

        let resp = self
            .request::<DerSignature>(req, self.user_timeout())
            .await?;

        if resp.sighash != sighash {
            return Err(Error::UnexpectedResponse);
        }

        let mut s = ecdsa::Signature::from_der(&resp.der).map_err(|_| Error::InvalidSignature)?;
        s.normalize_s();

        Ok(s)
    }
}
