// Copyright (c) 2022-2023 The MobileCoin Foundation

//! The [Engine] emulates the Ledger Bitcoin application.
//!
//! This consumes raw APDU commands and returns raw answers (payload followed
//! by the status word), speaking either the legacy four-phase protocol or the
//! unified `PARSE_TX` / `GET_INPUT_SIGNATURE` protocol as configured.
//! Malformed or out-of-order commands are answered with a status word and
//! abort any operation in progress.

use bitcoin::{
    bip32::{ChildNumber, DerivationPath, Xpriv},
    hashes::{sha256, Hash},
    secp256k1::{ecdsa, All, Message, Secp256k1},
    Address, CompressedPublicKey, Network, NetworkKind, Script,
};
use encdec::{DecodeOwned, Encode};
use log::{debug, warn};

use ledger_btc_apdu::{
    app_info::{AppVersion, FirmwareFlags, FirmwareVersion},
    encode_answer,
    path::{self, Path},
    public_key::{
        AddressFormat, KeyMode, NetworkSelector, PublicKeyResp, WalletPublicKeyResp, P1_CONFIRM,
    },
    Answer, ApduError, Command, Instruction, LegacyInstruction, Protocol, StatusWord,
    BTC_APDU_CLA,
};

mod legacy;
use legacy::LegacyState;

mod reader;
pub use reader::TxReader;

mod unified;
use unified::UnifiedState;

/// Default application version reported by the emulator
pub const DEFAULT_VERSION: AppVersion = AppVersion::new(2, 1, 0);

/// Default per-chunk byte limit for `PARSE_TX` parsing
pub const DEFAULT_PARSE_LIMIT: usize = 160;

/// Emulated Bitcoin application
pub struct Engine {
    protocol: Protocol,
    version: AppVersion,

    master: Xpriv,
    secp: Secp256k1<All>,
    mac_key: [u8; 32],

    approve: bool,
    parse_limit: usize,
    nonce: u16,

    instructions: Vec<u8>,

    legacy: LegacyState,
    unified: UnifiedState,
}

impl Engine {
    /// Create a new engine from a BIP32 seed
    pub fn new(seed: &[u8], protocol: Protocol) -> Result<Self, bitcoin::bip32::Error> {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(NetworkKind::Main, seed)?;

        // Trusted input MAC key, bound to the seed
        let mut k = b"trusted-input".to_vec();
        k.extend_from_slice(&master.private_key.secret_bytes());
        let mac_key = sha256::Hash::hash(&k).to_byte_array();

        Ok(Self {
            protocol,
            version: DEFAULT_VERSION,
            master,
            secp,
            mac_key,
            approve: true,
            parse_limit: DEFAULT_PARSE_LIMIT,
            nonce: 0,
            instructions: vec![],
            legacy: LegacyState::default(),
            unified: UnifiedState::default(),
        })
    }

    /// Create a new engine from a BIP39 mnemonic phrase (no passphrase)
    pub fn from_mnemonic(phrase: &str, protocol: Protocol) -> anyhow::Result<Self> {
        let m = bip39::Mnemonic::from_phrase(phrase, bip39::Language::English)?;
        let seed = bip39::Seed::new(&m, "");

        let e = Self::new(seed.as_bytes(), protocol)?;
        Ok(e)
    }

    /// Protocol spoken by this engine
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Set whether on-device confirmations are approved
    pub fn set_approve(&mut self, approve: bool) {
        self.approve = approve;
    }

    /// Limit the number of transaction bytes consumed per `PARSE_TX` chunk
    pub fn set_parse_limit(&mut self, limit: usize) {
        self.parse_limit = limit;
    }

    /// Set the reported application version
    pub fn set_version(&mut self, version: AppVersion) {
        self.version = version;
    }

    /// Instruction codes handled so far, in order
    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    /// Count handled commands with the provided instruction code
    pub fn count(&self, ins: u8) -> usize {
        self.instructions.iter().filter(|i| **i == ins).count()
    }

    /// Handle a raw APDU, returning the raw answer
    pub fn handle(&mut self, apdu: &[u8]) -> Vec<u8> {
        let a = match Command::decode(apdu) {
            Ok(cmd) => {
                self.instructions.push(cmd.ins);

                match self.update(&cmd) {
                    Ok(payload) => Answer::ok(payload),
                    Err(s) => {
                        warn!("Command {:02x} failed: {}", cmd.ins, s.message());
                        self.abort();
                        Answer::status(s)
                    }
                }
            }
            Err(_) => Answer::status(StatusWord::IncorrectLength),
        };

        a.encode()
    }

    /// Handle a decoded command, returning the answer payload
    pub fn update(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        debug!(
            "cmd: {:02x} {:02x} {:02x} ({} bytes)",
            cmd.ins,
            cmd.p1,
            cmd.p2,
            cmd.data.len()
        );

        if cmd.cla != BTC_APDU_CLA {
            return Err(StatusWord::ClaNotSupported);
        }

        match self.protocol {
            Protocol::Unified => match Instruction::try_from(cmd.ins) {
                Ok(Instruction::GetAppVersion) => encode(&self.version),
                Ok(Instruction::GetPublicKey) => self.public_key(cmd),
                Ok(Instruction::ParseTx) => self.parse_tx(cmd),
                Ok(Instruction::GetInputSignature) => self.input_signature(cmd),
                Err(_) => Err(StatusWord::InsNotSupported),
            },
            Protocol::Legacy => match LegacyInstruction::try_from(cmd.ins) {
                Ok(LegacyInstruction::GetFirmwareVersion) => encode(&FirmwareVersion {
                    flags: FirmwareFlags::SCREEN_BUTTON,
                    arch: 0x30,
                    version: self.version,
                }),
                Ok(LegacyInstruction::GetWalletPublicKey) => self.wallet_public_key(cmd),
                Ok(LegacyInstruction::GetTrustedInput) => self.trusted_input(cmd),
                Ok(LegacyInstruction::HashInputStart) => self.hash_input_start(cmd),
                Ok(LegacyInstruction::HashInputFinalizeFull) => self.hash_finalize(cmd),
                Ok(LegacyInstruction::HashSign) => self.hash_sign(cmd),
                Err(_) => Err(StatusWord::InsNotSupported),
            },
        }
    }

    /// Abort any operation in progress
    fn abort(&mut self) {
        self.legacy.abort();
        self.unified = UnifiedState::default();
    }

    fn confirm(&self) -> Result<(), StatusWord> {
        match self.approve {
            true => Ok(()),
            false => Err(StatusWord::ConditionsNotSatisfied),
        }
    }

    /// Derive the extended private key for a path
    fn derive(&self, p: &Path) -> Result<Xpriv, StatusWord> {
        let components: Vec<ChildNumber> = p.iter().map(|c| ChildNumber::from(*c)).collect();
        let dp = DerivationPath::from(components);

        self.master
            .derive_priv(&self.secp, &dp)
            .map_err(|_| StatusWord::IncorrectData)
    }

    fn compressed_key(&self, k: &Xpriv) -> CompressedPublicKey {
        CompressedPublicKey(k.private_key.public_key(&self.secp))
    }

    /// Sign a digest with the key at `p`
    fn sign(&self, p: &Path, digest: [u8; 32]) -> Result<ecdsa::Signature, StatusWord> {
        let k = self.derive(p)?;
        let m = Message::from_digest(digest);
        Ok(self.secp.sign_ecdsa(&m, &k.private_key))
    }

    /// Compute the truncated MAC for a trusted input body
    fn mac(&self, body: &[u8]) -> [u8; 8] {
        let mut d = self.mac_key.to_vec();
        d.extend_from_slice(body);
        let h = sha256::Hash::hash(&d).to_byte_array();

        let mut m = [0u8; 8];
        m.copy_from_slice(&h[..8]);
        m
    }

    /// Unified protocol public key request
    fn public_key(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        let (p, n) = path::dec(&cmd.data).map_err(invalid)?;
        if n != cmd.data.len() {
            return Err(StatusWord::IncorrectLength);
        }

        let confirm = cmd.p1 & P1_CONFIRM != 0;
        let network = NetworkSelector::try_from(cmd.p1 & !P1_CONFIRM)
            .map_err(|_| StatusWord::IncorrectP1P2)?;
        let mode = KeyMode::from_bits(cmd.p2).ok_or(StatusWord::IncorrectP1P2)?;

        if confirm {
            self.confirm()?;
        }

        let k = self.derive(&p)?;
        let pk = self.compressed_key(&k);

        let mut r = PublicKeyResp::new(pk.to_bytes());

        if mode.contains(KeyMode::XPUB) {
            let mut cc = [0u8; 32];
            cc.copy_from_slice(&k.chain_code[..]);
            let mut fp = [0u8; 4];
            fp.copy_from_slice(&k.parent_fingerprint[..]);

            r.chain_code = Some(cc);
            r.fingerprint = Some(fp);
        }

        if mode.contains(KeyMode::ADDRESS) {
            let script = ledger_btc::script::p2wpkh(&pk);
            r.address = Some(address(&script, network_for(network))?);
        }

        encode(&r)
    }

    /// Legacy protocol wallet public key request
    fn wallet_public_key(&mut self, cmd: &Command) -> Result<Vec<u8>, StatusWord> {
        let (p, n) = path::dec(&cmd.data).map_err(invalid)?;
        if n != cmd.data.len() {
            return Err(StatusWord::IncorrectLength);
        }

        let format = AddressFormat::try_from(cmd.p2).map_err(|_| StatusWord::IncorrectP1P2)?;
        match cmd.p1 {
            0 => (),
            1 => self.confirm()?,
            _ => return Err(StatusWord::IncorrectP1P2),
        }

        let k = self.derive(&p)?;
        let pk = self.compressed_key(&k);

        let script = match format {
            AddressFormat::Legacy => ledger_btc::script::p2pkh(&pk),
            AddressFormat::P2shP2wpkh => {
                ledger_btc::script::p2sh(&ledger_btc::script::p2wpkh(&pk))
            }
            AddressFormat::Bech32 => ledger_btc::script::p2wpkh(&pk),
        };

        let mut cc = [0u8; 32];
        cc.copy_from_slice(&k.chain_code[..]);

        encode(&WalletPublicKeyResp {
            public_key: pk.0.serialize_uncompressed().to_vec(),
            address: address(&script, Network::Bitcoin)?,
            chain_code: cc,
        })
    }
}

/// Encode a response object to an answer payload
fn encode<E: Encode<Error = ApduError>>(r: &E) -> Result<Vec<u8>, StatusWord> {
    encode_answer(r)
        .map(|a| a.payload)
        .map_err(|_| StatusWord::TechnicalProblem)
}

/// Decode a request object, requiring the whole buffer to be consumed
fn decode<D: DecodeOwned<Output = D, Error = ApduError>>(buff: &[u8]) -> Result<D, StatusWord> {
    let (d, n) = D::decode_owned(buff).map_err(invalid)?;
    match n == buff.len() {
        true => Ok(d),
        false => Err(StatusWord::IncorrectLength),
    }
}

/// Map APDU decode errors to status words
fn invalid(e: ApduError) -> StatusWord {
    match e {
        ApduError::InvalidLength => StatusWord::IncorrectLength,
        _ => StatusWord::IncorrectData,
    }
}

fn network_for(n: NetworkSelector) -> Network {
    match n {
        NetworkSelector::Main => Network::Bitcoin,
        NetworkSelector::Testnet => Network::Testnet,
        NetworkSelector::Regtest => Network::Regtest,
        NetworkSelector::Simnet => Network::Signet,
    }
}

fn address(script: &Script, network: Network) -> Result<String, StatusWord> {
    Address::from_script(script, network)
        .map(|a| a.to_string())
        .map_err(|_| StatusWord::TechnicalProblem)
}

#[cfg(test)]
mod test {
    use ledger_btc_apdu::{
        path::{path_from, HARDENED},
        prelude::*,
        ApduReq,
    };

    use super::*;

    const SEED: [u8; 32] = [0x5a; 32];

    pub(crate) fn exchange<R: ApduReq, A>(e: &mut Engine, req: R) -> Result<A, StatusError>
    where
        A: DecodeOwned<Output = A, Error = ApduError>,
    {
        let cmd = Command::from_req(&req).unwrap();
        let raw = e.handle(&cmd.encode());
        let a = Answer::from_bytes(&raw).unwrap();
        let p = a.check()?;
        Ok(A::decode_owned(p).unwrap().0)
    }

    #[test]
    fn versions() {
        let mut e = Engine::new(&SEED, Protocol::Unified).unwrap();
        let v: AppVersion = exchange(&mut e, AppVersionReq {}).unwrap();
        assert_eq!(v, DEFAULT_VERSION);

        let mut e = Engine::new(&SEED, Protocol::Legacy).unwrap();
        let v: FirmwareVersion = exchange(&mut e, FirmwareVersionReq {}).unwrap();
        assert_eq!(v.version, DEFAULT_VERSION);
    }

    #[test]
    fn unknown_instruction() {
        let mut e = Engine::new(&SEED, Protocol::Unified).unwrap();

        let raw = e.handle(&[0xe0, 0x48, 0x00, 0x00, 0x00]);
        assert_eq!(raw, vec![0x6d, 0x00]);

        let raw = e.handle(&[0xb0, 0x40, 0x00, 0x00, 0x00]);
        assert_eq!(raw, vec![0x6e, 0x00]);

        let raw = e.handle(&[0xe0, 0x40]);
        assert_eq!(raw, vec![0x67, 0x00]);
    }

    #[test]
    fn public_key_modes() {
        let mut e = Engine::new(&SEED, Protocol::Unified).unwrap();
        let p = path_from(&[84 | HARDENED, HARDENED, HARDENED, 0, 0]).unwrap();

        let r: PublicKeyResp = exchange(
            &mut e,
            PublicKeyReq::new(p.clone(), NetworkSelector::Main, KeyMode::empty(), false),
        )
        .unwrap();
        assert!(r.chain_code.is_none() && r.address.is_none());

        let r2: PublicKeyResp = exchange(
            &mut e,
            PublicKeyReq::new(p.clone(), NetworkSelector::Regtest, KeyMode::all(), false),
        )
        .unwrap();
        assert_eq!(r.public_key, r2.public_key);
        assert!(r2.chain_code.is_some());
        assert!(r2.address.unwrap().starts_with("bcrt1q"));

        // Declined confirmation
        e.set_approve(false);
        let r = exchange::<_, PublicKeyResp>(
            &mut e,
            PublicKeyReq::new(p, NetworkSelector::Main, KeyMode::empty(), true),
        );
        assert_eq!(r, Err(StatusWord::ConditionsNotSatisfied.into()));
    }

    #[test]
    fn wallet_public_key() {
        let mut e = Engine::new(&SEED, Protocol::Legacy).unwrap();
        let p = path_from(&[44 | HARDENED, HARDENED, HARDENED, 0, 0]).unwrap();

        let r: WalletPublicKeyResp =
            exchange(&mut e, WalletPublicKeyReq::new(p, AddressFormat::Bech32, false)).unwrap();

        assert_eq!(r.public_key.len(), 65);
        assert!(r.address.starts_with("bc1q"));
    }
}
