// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction signing
//!
//! A signing call runs through the following phases on a single handle,
//! holding the signing lock throughout:
//!
//! 1. map transaction outpoints and check every descriptor is present
//! 2. fetch public keys for descriptors without one
//! 3. for [Protocol::Legacy], fetch trusted inputs and pre-stream witness transactions
//! 4. request a signature per descriptor, in descriptor order, and template
//!    it into `script_sig` / witness
//!
//! Session state lives for one call only.

use std::collections::{HashMap, HashSet};

use bitcoin::{ecdsa, CompressedPublicKey, OutPoint, Transaction, Witness};
use log::{debug, info};

use ledger_btc_apdu::{
    tx::{InputSignatureHeader, ParseMeta, RawOutpoint, TrustedInput},
    Protocol,
};

use crate::{
    error::MisuseError,
    handle::PublicKeyOptions,
    input::{LedgerChange, LedgerCovenant, LedgerInput, OutpointKey, Resolved, ScriptKind},
    script::{apply_multisig, items_script, script_items},
    transport::Exchange,
    DeviceHandle, Error,
};

mod legacy;
mod stream;
mod unified;

/// Output display metadata for a signing call
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SignOptions {
    /// Change output
    pub change: Option<LedgerChange>,
    /// Name-system covenant outputs (unified protocol)
    pub covenants: Vec<LedgerCovenant>,
}

impl SignOptions {
    fn meta(&self, n_outputs: usize) -> Result<ParseMeta, Error> {
        if let Some(c) = &self.change {
            if c.index as usize >= n_outputs {
                return Err(MisuseError::InvalidIndex(c.index as usize).into());
            }
        }

        for c in &self.covenants {
            if c.index as usize >= n_outputs {
                return Err(MisuseError::InvalidIndex(c.index as usize).into());
            }
        }

        Ok(ParseMeta {
            change: self.change.as_ref().map(|c| c.meta()).transpose()?,
            covenants: self.covenants.iter().map(|c| c.meta()).collect(),
        })
    }
}

/// Signature produced for a single input
#[derive(Clone, Debug, PartialEq)]
pub struct InputSignature {
    /// Outpoint of the signed input
    pub outpoint: OutpointKey,
    /// Input index within the transaction
    pub index: usize,
    /// Signing public key
    pub public_key: CompressedPublicKey,
    /// Signature with sighash type
    pub signature: ecdsa::Signature,
}

/// Per-call signing state
#[derive(Debug)]
pub(crate) struct SigningSession {
    /// Next witness input requires the transaction to be pre-streamed
    is_new_tx: bool,
    has_witness: bool,
    trusted_inputs: HashMap<OutpointKey, TrustedInput>,
    index_by_outpoint: HashMap<OutpointKey, usize>,
    signed: HashSet<OutpointKey>,
}

impl SigningSession {
    fn new(tx: &Transaction) -> Self {
        let index_by_outpoint = tx
            .input
            .iter()
            .enumerate()
            .map(|(i, txin)| (OutpointKey::from(txin.previous_output), i))
            .collect();

        Self {
            is_new_tx: true,
            has_witness: false,
            trusted_inputs: HashMap::new(),
            index_by_outpoint,
            signed: HashSet::new(),
        }
    }

    fn index_of(&self, key: &OutpointKey) -> Result<usize, MisuseError> {
        self.index_by_outpoint
            .get(key)
            .copied()
            .ok_or(MisuseError::UnknownInput(*key))
    }

    fn mark_signed(&mut self, key: OutpointKey) -> Result<(), MisuseError> {
        match self.signed.insert(key) {
            true => Ok(()),
            false => Err(MisuseError::AlreadySigned(key)),
        }
    }
}

pub(crate) fn raw_outpoint(o: &OutPoint) -> RawOutpoint {
    OutpointKey::from(*o).to_raw()
}

impl<T: Exchange> DeviceHandle<T> {
    /// Sign a transaction in place
    ///
    /// Descriptors may be a subset of the transaction inputs. On failure
    /// signatures applied to earlier inputs are left in place.
    pub async fn sign_transaction(
        &self,
        tx: &mut Transaction,
        inputs: &mut [LedgerInput],
    ) -> Result<Vec<InputSignature>, Error> {
        self.sign_transaction_with(tx, inputs, &SignOptions::default())
            .await
    }

    /// Sign a transaction in place with output display metadata
    pub async fn sign_transaction_with(
        &self,
        tx: &mut Transaction,
        inputs: &mut [LedgerInput],
        opts: &SignOptions,
    ) -> Result<Vec<InputSignature>, Error> {
        self.sign_inner(tx, inputs, opts, true).await
    }

    /// Sign a copy of the transaction, leaving the original untouched
    pub async fn signed_transaction(
        &self,
        tx: &Transaction,
        inputs: &mut [LedgerInput],
    ) -> Result<Transaction, Error> {
        self.signed_transaction_with(tx, inputs, &SignOptions::default())
            .await
    }

    /// Sign a copy of the transaction with output display metadata
    pub async fn signed_transaction_with(
        &self,
        tx: &Transaction,
        inputs: &mut [LedgerInput],
        opts: &SignOptions,
    ) -> Result<Transaction, Error> {
        let mut t = tx.clone();
        self.sign_inner(&mut t, inputs, opts, true).await?;
        Ok(t)
    }

    /// Fetch signatures without applying them to the transaction
    pub async fn transaction_signatures(
        &self,
        tx: &Transaction,
        inputs: &mut [LedgerInput],
    ) -> Result<Vec<InputSignature>, Error> {
        self.transaction_signatures_with(tx, inputs, &SignOptions::default())
            .await
    }

    /// Fetch signatures with output display metadata, without applying them
    pub async fn transaction_signatures_with(
        &self,
        tx: &Transaction,
        inputs: &mut [LedgerInput],
        opts: &SignOptions,
    ) -> Result<Vec<InputSignature>, Error> {
        let mut t = tx.clone();
        self.sign_inner(&mut t, inputs, opts, false).await
    }

    async fn sign_inner(
        &self,
        tx: &mut Transaction,
        inputs: &mut [LedgerInput],
        opts: &SignOptions,
        apply: bool,
    ) -> Result<Vec<InputSignature>, Error> {
        // One signing session at a time, released on drop
        let _guard = self.signing.lock().await;

        let protocol = self.config.protocol;
        info!(
            "Signing {} of {} inputs ({} protocol)",
            inputs.len(),
            tx.input.len(),
            protocol
        );

        let mut session = SigningSession::new(tx);
        for i in inputs.iter() {
            session.index_of(&i.key())?;
        }

        let meta = opts.meta(tx.output.len())?;

        // Collect public keys
        for i in inputs.iter_mut() {
            if i.public_key.is_none() {
                let info = self
                    .public_key(&i.path, PublicKeyOptions::default())
                    .await?;
                i.public_key = Some(info.public_key);
            }
        }

        let mut resolved = Vec::with_capacity(inputs.len());
        for i in inputs.iter() {
            let pk = i.public_key.ok_or(Error::InvalidKey)?;
            resolved.push(i.resolve(&pk)?);
        }

        session.has_witness = resolved.iter().any(|r| r.kind.is_witness());

        // Auxiliary caching
        if protocol == Protocol::Legacy {
            self.collect_trusted_inputs(&mut session, inputs, &resolved)
                .await?;

            if session.has_witness {
                self.segwit_prestream(&mut session, tx, inputs, opts.change.as_ref())
                    .await?;
            }
        }

        // Per-input signing
        let mut signatures = Vec::with_capacity(inputs.len());

        for (input, r) in inputs.iter().zip(&resolved) {
            let key = input.key();
            let index = session.index_of(&key)?;

            session.mark_signed(key)?;

            if InputSignatureHeader::is_single(input.sighash.to_u32()) && index >= tx.output.len()
            {
                return Err(MisuseError::MissingOutput(key).into());
            }

            debug!("Signing input {} ({}, {})", index, key, r.kind);

            let signature = match protocol {
                Protocol::Legacy => {
                    self.legacy_sign(
                        &mut session,
                        tx,
                        inputs,
                        input,
                        r,
                        index,
                        opts.change.as_ref(),
                    )
                    .await?
                }
                Protocol::Unified => self.unified_sign(tx, input, r, index, &meta).await?,
            };

            let s = InputSignature {
                outpoint: key,
                index,
                public_key: r.public_key,
                signature: ecdsa::Signature {
                    signature,
                    sighash_type: input.sighash,
                },
            };

            if apply {
                apply_signature(tx, r, &s)?;
            }

            signatures.push(s);
        }

        debug!("Signing complete");

        Ok(signatures)
    }
}

/// Template a signature into the input's `script_sig` / witness
fn apply_signature(tx: &mut Transaction, r: &Resolved, s: &InputSignature) -> Result<(), Error> {
    let txin = &mut tx.input[s.index];

    let sig = s.signature.to_vec();
    let pk = r.public_key.to_bytes().to_vec();

    match (r.kind, r.multisig) {
        (ScriptKind::P2pkh, _) => {
            txin.script_sig = items_script(&[sig, pk])?;
        }
        (ScriptKind::P2wpkh | ScriptKind::P2shP2wpkh, _) => {
            txin.witness = Witness::from_slice(&[sig, pk]);
        }
        (ScriptKind::P2sh, Some((m, n, key_index))) => {
            let stack = script_items(&txin.script_sig).unwrap_or_default();
            let stack = apply_multisig(&stack, &r.script_code, m, n, key_index, sig);
            txin.script_sig = items_script(&stack)?;
        }
        (ScriptKind::P2wsh | ScriptKind::P2shP2wsh, Some((m, n, key_index))) => {
            let stack = txin.witness.to_vec();
            let stack = apply_multisig(&stack, &r.script_code, m, n, key_index, sig);
            txin.witness = Witness::from_slice(&stack);
        }
        (_, None) => return Err(MisuseError::UnsupportedScript(s.outpoint).into()),
    }

    if let Some(program) = r.nested_program() {
        txin.script_sig = items_script(&[program.to_bytes()])?;
    }

    Ok(())
}
