// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Per-input signing descriptors and output display metadata
//!
//! A [LedgerInput] bundles what the signer needs to request a signature for
//! one transaction input. [LedgerChange] and [LedgerCovenant] describe outputs
//! for on-device display and carry no signing authority.

use std::fmt::Display;

use bitcoin::{
    bip32::DerivationPath, consensus::encode::serialize, CompressedPublicKey, EcdsaSighashType,
    OutPoint, ScriptBuf, Transaction, TxOut, Txid,
};

use ledger_btc_apdu::{
    path::{path_from, Path},
    tx::{ChangeMeta, CovenantKind, CovenantMeta, RawOutpoint},
};

use crate::{
    error::MisuseError,
    script::{p2pkh, p2sh, p2wpkh, p2wsh, parse_multisig},
    Error,
};

/// Outpoint map key (`txid ‖ vout`)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutpointKey {
    pub txid: Txid,
    pub vout: u32,
}

impl OutpointKey {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// Consensus encoded outpoint
    pub fn to_raw(&self) -> RawOutpoint {
        let mut b = [0u8; 36];
        b.copy_from_slice(&serialize(&OutPoint::from(*self)));
        b
    }
}

impl Display for OutpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl From<OutPoint> for OutpointKey {
    fn from(o: OutPoint) -> Self {
        Self::new(o.txid, o.vout)
    }
}

impl From<OutpointKey> for OutPoint {
    fn from(k: OutpointKey) -> Self {
        OutPoint::new(k.txid, k.vout)
    }
}

/// Input script kinds supported for signing
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ScriptKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2shP2wpkh,
    P2wsh,
    P2shP2wsh,
}

impl ScriptKind {
    /// Input is signed with a segwit (BIP143) digest
    pub fn is_witness(&self) -> bool {
        matches!(
            self,
            Self::P2wpkh | Self::P2shP2wpkh | Self::P2wsh | Self::P2shP2wsh
        )
    }

    /// Input spends a multisig redeem / witness script
    pub fn is_multisig(&self) -> bool {
        matches!(self, Self::P2sh | Self::P2wsh | Self::P2shP2wsh)
    }

    /// Witness program nested in a P2SH output
    pub fn is_nested(&self) -> bool {
        matches!(self, Self::P2shP2wpkh | Self::P2shP2wsh)
    }
}

/// Descriptor for a single input to be signed by the device
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerInput {
    /// Derivation path of the signing key
    pub path: DerivationPath,
    /// Outpoint being spent
    pub outpoint: OutPoint,
    /// Coin being spent (value and script)
    pub coin: TxOut,
    /// Previous transaction, required for trusted inputs
    pub prev_tx: Option<Transaction>,
    /// Redeem (P2SH) or witness (P2WSH) script
    pub redeem: Option<ScriptBuf>,
    /// Signature hash type
    pub sighash: EcdsaSighashType,
    /// Cached public key for `path`
    pub public_key: Option<CompressedPublicKey>,
}

/// Signing information resolved from a [LedgerInput] and its key
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Resolved {
    pub kind: ScriptKind,
    pub public_key: CompressedPublicKey,
    /// Script committed to by the signature
    pub script_code: ScriptBuf,
    /// Multisig threshold, key count and signer position
    pub multisig: Option<(usize, usize, usize)>,
}

impl LedgerInput {
    /// Create a new input descriptor with `SIGHASH_ALL`
    pub fn new(path: DerivationPath, outpoint: OutPoint, coin: TxOut) -> Self {
        Self {
            path,
            outpoint,
            coin,
            prev_tx: None,
            redeem: None,
            sighash: EcdsaSighashType::All,
            public_key: None,
        }
    }

    /// Attach the previous transaction
    pub fn with_prev_tx(mut self, tx: Transaction) -> Self {
        self.prev_tx = Some(tx);
        self
    }

    /// Attach a redeem or witness script
    pub fn with_redeem(mut self, redeem: ScriptBuf) -> Self {
        self.redeem = Some(redeem);
        self
    }

    /// Set the signature hash type
    pub fn with_sighash(mut self, sighash: EcdsaSighashType) -> Self {
        self.sighash = sighash;
        self
    }

    /// Pre-populate the public key cache
    pub fn with_public_key(mut self, pk: CompressedPublicKey) -> Self {
        self.public_key = Some(pk);
        self
    }

    /// Outpoint key for this input
    pub fn key(&self) -> OutpointKey {
        OutpointKey::from(self.outpoint)
    }

    /// Resolve the script kind from the coin, redeem script and cached key
    pub fn kind(&self) -> Result<ScriptKind, MisuseError> {
        let key = self.key();
        let spk = &self.coin.script_pubkey;

        if spk.is_p2pkh() {
            return Ok(ScriptKind::P2pkh);
        }

        if spk.is_p2wpkh() {
            return Ok(ScriptKind::P2wpkh);
        }

        if spk.is_p2wsh() {
            let r = self
                .redeem
                .as_ref()
                .ok_or(MisuseError::MissingRedeemScript(key))?;

            return match p2wsh(r) == *spk {
                true => Ok(ScriptKind::P2wsh),
                false => Err(MisuseError::RedeemMismatch(key)),
            };
        }

        if spk.is_p2sh() {
            return match (&self.redeem, &self.public_key) {
                (Some(r), _) if p2sh(r) == *spk && r.is_p2wpkh() => Ok(ScriptKind::P2shP2wpkh),
                (Some(r), _) if p2sh(r) == *spk => Ok(ScriptKind::P2sh),
                (Some(r), _) if p2sh(&p2wsh(r)) == *spk => Ok(ScriptKind::P2shP2wsh),
                (Some(_), _) => Err(MisuseError::RedeemMismatch(key)),
                (None, Some(pk)) if p2sh(&p2wpkh(pk)) == *spk => Ok(ScriptKind::P2shP2wpkh),
                (None, _) => Err(MisuseError::MissingRedeemScript(key)),
            };
        }

        Err(MisuseError::UnsupportedScript(key))
    }

    /// Check whether this input is signed with a segwit digest
    pub fn is_witness(&self) -> Result<bool, MisuseError> {
        self.kind().map(|k| k.is_witness())
    }

    /// Resolve the script code and key position for signing with `pk`
    pub(crate) fn resolve(&self, pk: &CompressedPublicKey) -> Result<Resolved, MisuseError> {
        let key = self.key();
        let kind = self.kind()?;

        let (script_code, multisig) = match kind {
            ScriptKind::P2pkh => {
                if p2pkh(pk) != self.coin.script_pubkey {
                    return Err(MisuseError::KeyNotInScript(key));
                }
                (self.coin.script_pubkey.clone(), None)
            }
            ScriptKind::P2wpkh | ScriptKind::P2shP2wpkh => {
                let expected = match kind {
                    ScriptKind::P2wpkh => p2wpkh(pk),
                    _ => p2sh(&p2wpkh(pk)),
                };
                if expected != self.coin.script_pubkey {
                    return Err(MisuseError::KeyNotInScript(key));
                }
                (p2pkh(pk), None)
            }
            ScriptKind::P2sh | ScriptKind::P2wsh | ScriptKind::P2shP2wsh => {
                let redeem = self
                    .redeem
                    .as_ref()
                    .ok_or(MisuseError::MissingRedeemScript(key))?;

                let (m, keys) =
                    parse_multisig(redeem).ok_or(MisuseError::UnsupportedScript(key))?;
                let index = keys
                    .iter()
                    .position(|k| k == pk)
                    .ok_or(MisuseError::KeyNotInScript(key))?;

                (redeem.clone(), Some((m, keys.len(), index)))
            }
        };

        Ok(Resolved {
            kind,
            public_key: *pk,
            script_code,
            multisig,
        })
    }
}

impl Resolved {
    /// Witness program pushed into `script_sig` for nested inputs
    pub fn nested_program(&self) -> Option<ScriptBuf> {
        match self.kind {
            ScriptKind::P2shP2wpkh => Some(p2wpkh(&self.public_key)),
            ScriptKind::P2shP2wsh => Some(p2wsh(&self.script_code)),
            _ => None,
        }
    }
}

/// Change output display metadata
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerChange {
    /// Output index
    pub index: u8,
    /// Derivation path of the change key
    pub path: DerivationPath,
}

impl LedgerChange {
    /// Create change metadata, the index must fit a single byte
    pub fn new(index: usize, path: DerivationPath) -> Result<Self, MisuseError> {
        let index = u8::try_from(index).map_err(|_| MisuseError::InvalidIndex(index))?;
        Ok(Self { index, path })
    }

    pub(crate) fn meta(&self) -> Result<ChangeMeta, Error> {
        Ok(ChangeMeta {
            index: self.index,
            path: apdu_path(&self.path)?,
        })
    }
}

/// Maximum covenant name length
pub const MAX_NAME_LEN: usize = 63;

/// Name-system covenant display metadata
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerCovenant {
    /// Output index
    pub index: u8,
    /// Covenant type
    pub kind: CovenantKind,
    /// Name the covenant applies to
    pub name: String,
}

impl LedgerCovenant {
    /// Create covenant metadata, validating the index and name
    pub fn new(index: usize, kind: CovenantKind, name: &str) -> Result<Self, MisuseError> {
        let index = u8::try_from(index).map_err(|_| MisuseError::InvalidIndex(index))?;

        if !name_valid(name) {
            return Err(MisuseError::InvalidName(name.to_string()));
        }

        Ok(Self {
            index,
            kind,
            name: name.to_string(),
        })
    }

    pub(crate) fn meta(&self) -> CovenantMeta {
        CovenantMeta {
            index: self.index,
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

/// Names are 1-63 bytes of `[a-z0-9-_]` and may not start or end with `-` or `_`
fn name_valid(name: &str) -> bool {
    let b = name.as_bytes();

    if b.is_empty() || b.len() > MAX_NAME_LEN {
        return false;
    }

    if !b
        .iter()
        .all(|c| matches!(c, b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_'))
    {
        return false;
    }

    let edge = |c: &u8| *c == b'-' || *c == b'_';
    !(b.first().map(edge).unwrap_or(false) || b.last().map(edge).unwrap_or(false))
}

/// Convert a BIP32 derivation path to the bounded APDU form
pub(crate) fn apdu_path(p: &DerivationPath) -> Result<Path, Error> {
    let c: Vec<u32> = p.into_iter().map(|c| u32::from(*c)).collect();
    let p = path_from(&c)?;
    Ok(p)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::{
        hashes::Hash,
        secp256k1::{Secp256k1, SecretKey},
        Amount,
    };

    use super::*;
    use crate::script::multisig;

    fn key(i: u8) -> CompressedPublicKey {
        let sk = SecretKey::from_slice(&[i; 32]).unwrap();
        CompressedPublicKey(sk.public_key(&Secp256k1::new()))
    }

    fn input(script_pubkey: ScriptBuf) -> LedgerInput {
        LedgerInput::new(
            DerivationPath::from_str("m/44'/0'/0'/0/0").unwrap(),
            OutPoint::new(Txid::all_zeros(), 1),
            TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey,
            },
        )
    }

    #[test]
    fn outpoint_key() {
        let k = OutpointKey::new(Txid::all_zeros(), 0x0102);
        let raw = k.to_raw();

        assert_eq!(&raw[..32], &[0u8; 32]);
        assert_eq!(&raw[32..], &[0x02, 0x01, 0x00, 0x00]);
        assert!(k.to_string().ends_with(":258"));
    }

    #[test]
    fn single_key_kinds() {
        let pk = key(1);

        let i = input(p2pkh(&pk));
        assert_eq!(i.kind(), Ok(ScriptKind::P2pkh));
        assert_eq!(i.resolve(&pk).unwrap().script_code, p2pkh(&pk));
        assert_eq!(
            i.resolve(&key(2)),
            Err(MisuseError::KeyNotInScript(i.key()))
        );

        let i = input(p2wpkh(&pk));
        assert_eq!(i.kind(), Ok(ScriptKind::P2wpkh));
        assert_eq!(i.resolve(&pk).unwrap().script_code, p2pkh(&pk));

        // Nested without a redeem script needs the key
        let i = input(p2sh(&p2wpkh(&pk)));
        assert_eq!(i.kind(), Err(MisuseError::MissingRedeemScript(i.key())));

        let i = i.with_public_key(pk);
        assert_eq!(i.kind(), Ok(ScriptKind::P2shP2wpkh));
        assert_eq!(i.resolve(&pk).unwrap().nested_program(), Some(p2wpkh(&pk)));
    }

    #[test]
    fn multisig_kinds() {
        let keys = [key(1), key(2), key(3)];
        let r = multisig(2, &keys);

        let i = input(p2sh(&r));
        assert_eq!(i.kind(), Err(MisuseError::MissingRedeemScript(i.key())));

        let i = i.with_redeem(r.clone());
        assert_eq!(i.kind(), Ok(ScriptKind::P2sh));
        assert_eq!(i.resolve(&keys[1]).unwrap().multisig, Some((2, 3, 1)));
        assert_eq!(
            i.resolve(&key(4)),
            Err(MisuseError::KeyNotInScript(i.key()))
        );

        let i = input(p2wsh(&r)).with_redeem(r.clone());
        assert_eq!(i.kind(), Ok(ScriptKind::P2wsh));

        let i = input(p2sh(&p2wsh(&r))).with_redeem(r.clone());
        assert_eq!(i.kind(), Ok(ScriptKind::P2shP2wsh));

        let i = input(p2wsh(&r)).with_redeem(multisig(1, &keys));
        assert_eq!(i.kind(), Err(MisuseError::RedeemMismatch(i.key())));
    }

    #[test]
    fn change_index() {
        let p = DerivationPath::from_str("m/44'/0'/0'/1/0").unwrap();

        assert!(LedgerChange::new(255, p.clone()).is_ok());
        assert_eq!(
            LedgerChange::new(256, p),
            Err(MisuseError::InvalidIndex(256))
        );
    }

    #[test]
    fn covenant_names() {
        for n in ["a", "name", "my-name_2", &"x".repeat(63)] {
            assert!(LedgerCovenant::new(0, CovenantKind::Open, n).is_ok(), "{n}");
        }

        for n in ["", "-name", "name_", "Name", "na.me", &"x".repeat(64)] {
            assert!(LedgerCovenant::new(0, CovenantKind::Open, n).is_err(), "{n}");
        }

        assert_eq!(
            LedgerCovenant::new(300, CovenantKind::Bid, "name"),
            Err(MisuseError::InvalidIndex(300))
        );
    }

    #[test]
    fn path_conversion() {
        let p = DerivationPath::from_str("m/84'/1'/0'/0/7").unwrap();
        let a = apdu_path(&p).unwrap();

        assert_eq!(&a[..], &[0x8000_0054, 0x8000_0001, 0x8000_0000, 0, 7]);
    }
}
