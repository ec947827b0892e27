// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wallet keys, transaction builders and signature checks shared by tests

use std::str::FromStr;

use bitcoin::{
    absolute::LockTime,
    bip32::{DerivationPath, Xpriv, Xpub},
    hashes::Hash,
    secp256k1::{All, Message, Secp256k1, SecretKey},
    sighash::SighashCache,
    transaction::Version,
    Amount, CompressedPublicKey, NetworkKind, OutPoint, Script, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};

use ledger_btc::{script::p2wpkh, InputSignature, LedgerChange};

/// Mnemonic shared between tests and the device under test (BIP39 test vector)
pub const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Reference wallet derived from the same mnemonic as the device
pub struct Wallet {
    master: Xpriv,
    secp: Secp256k1<All>,
}

impl Wallet {
    /// Derive a wallet from a BIP39 phrase (no passphrase)
    pub fn from_phrase(phrase: &str) -> anyhow::Result<Self> {
        let m = bip39::Mnemonic::from_phrase(phrase, bip39::Language::English)?;
        let seed = bip39::Seed::new(&m, "");

        let master = Xpriv::new_master(NetworkKind::Main, seed.as_bytes())?;

        Ok(Self {
            master,
            secp: Secp256k1::new(),
        })
    }

    /// Extended public key for a path
    pub fn xpub(&self, path: &DerivationPath) -> anyhow::Result<Xpub> {
        let k = self.master.derive_priv(&self.secp, path)?;
        Ok(Xpub::from_priv(&self.secp, &k))
    }

    /// Compressed public key for a path
    pub fn public_key(&self, path: &DerivationPath) -> anyhow::Result<CompressedPublicKey> {
        Ok(CompressedPublicKey(self.xpub(path)?.public_key))
    }
}

/// Parse a derivation path
pub fn path(s: &str) -> anyhow::Result<DerivationPath> {
    Ok(DerivationPath::from_str(s)?)
}

/// Key outside the wallet, for multisig co-signers and destinations
pub fn foreign_key(i: u8) -> CompressedPublicKey {
    let secp = Secp256k1::signing_only();
    let sk = SecretKey::from_slice(&[i; 32]).expect("valid secret key");
    CompressedPublicKey(sk.public_key(&secp))
}

/// Transaction funding a single output, distinguished by `nonce`
pub fn funding_tx(script_pubkey: ScriptBuf, value: u64, nonce: u8) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([nonce; 32]), nonce as u32),
            script_sig: ScriptBuf::from_bytes(vec![0x51]),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        }],
    }
}

/// Outpoint and coin for output zero of a funding transaction
pub fn coin(prev: &Transaction) -> (OutPoint, TxOut) {
    (
        OutPoint::new(prev.compute_txid(), 0),
        prev.output[0].clone(),
    )
}

/// Unsigned transaction spending the provided outpoints
pub fn spend_tx(outpoints: &[OutPoint], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(800_000),
        input: outpoints
            .iter()
            .map(|o| TxIn {
                previous_output: *o,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}

/// Destination and change outputs for `total`, with change metadata
pub fn outputs(w: &Wallet, total: u64) -> anyhow::Result<(Vec<TxOut>, LedgerChange)> {
    let change_path = path("m/84'/0'/0'/1/0")?;
    let change_key = w.public_key(&change_path)?;

    let sent = total * 3 / 5;
    let outputs = vec![
        TxOut {
            value: Amount::from_sat(sent),
            script_pubkey: p2wpkh(&foreign_key(0x42)),
        },
        TxOut {
            value: Amount::from_sat(total - sent - 1_000),
            script_pubkey: p2wpkh(&change_key),
        },
    ];

    Ok((outputs, LedgerChange::new(1, change_path)?))
}

/// Run every input of `tx` through the consensus script interpreter
pub fn verify_spend(tx: &Transaction, coins: &[(OutPoint, TxOut)]) -> anyhow::Result<()> {
    tx.verify(|o| coins.iter().find(|(p, _)| p == o).map(|(_, c)| c.clone()))
        .map_err(|e| anyhow::anyhow!("script verification failed: {:?}", e))
}

/// Verify a signature over input `s.index` against the provided script code
pub fn verify(
    tx: &Transaction,
    s: &InputSignature,
    script_code: &Script,
    value: Amount,
    witness: bool,
) -> anyhow::Result<()> {
    let mut c = SighashCache::new(tx);

    let digest = match witness {
        true => c
            .p2wsh_signature_hash(s.index, script_code, value, s.signature.sighash_type)?
            .to_byte_array(),
        false => c
            .legacy_signature_hash(s.index, script_code, s.signature.sighash_type.to_u32())?
            .to_byte_array(),
    };

    Secp256k1::verification_only().verify_ecdsa(
        &Message::from_digest(digest),
        &s.signature.signature,
        &s.public_key.0,
    )?;

    Ok(())
}
