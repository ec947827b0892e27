// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Handle for connected ledger devices
//!
//! This provides methods for interacting with the device
//! and is generic over [Exchange] transports.

use std::{sync::Arc, time::Duration};

use bitcoin::{
    bip32::{ChainCode, ChildNumber, DerivationPath, Fingerprint, Xpub},
    secp256k1, CompressedPublicKey, NetworkKind,
};
use encdec::DecodeOwned;
use log::{debug, trace};
use tokio::sync::Mutex;

use ledger_btc_apdu::{
    prelude::{
        AddressFormat, AppVersion, AppVersionReq, FirmwareVersion, FirmwareVersionReq, KeyMode,
        NetworkSelector, PublicKeyReq, PublicKeyResp, WalletPublicKeyReq, WalletPublicKeyResp,
    },
    Answer, ApduError, ApduReq, Command, Protocol,
};

use crate::{input::apdu_path, transport::Exchange, Error};

/// Device handle configuration
#[derive(Clone, Debug, PartialEq)]
pub struct HandleConfig {
    /// Timeout for APDU requests
    pub request_timeout: Duration,
    /// Timeout for requests awaiting user confirmation
    pub user_timeout: Duration,
    /// Signing protocol spoken by the device application
    pub protocol: Protocol,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            user_timeout: Duration::from_secs(30),
            protocol: Protocol::default(),
        }
    }
}

/// Bitcoin handle for a connected ledger device.
///
/// This is generic over [Exchange] types to support different
/// underlying transports. Clones share the transport and signing lock.
pub struct DeviceHandle<T: Exchange> {
    /// Transport for communication, locked per exchange
    pub(crate) t: Arc<Mutex<T>>,
    /// Signing lock, held for the duration of a signing call
    pub(crate) signing: Arc<Mutex<()>>,
    /// Handle configuration
    pub(crate) config: HandleConfig,
}

impl<T: Exchange> Clone for DeviceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            t: self.t.clone(),
            signing: self.signing.clone(),
            config: self.config.clone(),
        }
    }
}

/// Create a [DeviceHandle] wrapper from a type implementing [Exchange]
impl<T: Exchange> From<T> for DeviceHandle<T> {
    fn from(t: T) -> Self {
        Self::new(t, HandleConfig::default())
    }
}

/// Options for public key requests
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PublicKeyOptions {
    /// Network for address display
    pub network: NetworkSelector,
    /// Require on-device confirmation
    pub confirm: bool,
    /// Request chain code and parent fingerprint
    pub xpub: bool,
    /// Request an address
    pub address: bool,
    /// Address format (legacy protocol)
    pub format: AddressFormat,
}

/// Public key information returned by the device
#[derive(Clone, Debug, PartialEq)]
pub struct PublicKeyInfo {
    /// Compressed public key
    pub public_key: CompressedPublicKey,
    /// BIP32 chain code
    pub chain_code: Option<[u8; 32]>,
    /// Parent key fingerprint
    pub parent_fingerprint: Option<[u8; 4]>,
    /// Device-rendered address
    pub address: Option<String>,
}

impl PublicKeyInfo {
    /// Build an extended public key for the provided derivation path
    ///
    /// Requires a chain code, the parent fingerprint defaults to zero where
    /// the device does not report one.
    pub fn to_xpub(&self, network: impl Into<NetworkKind>, path: &DerivationPath) -> Option<Xpub> {
        let chain_code = self.chain_code?;
        let components: &[ChildNumber] = path.as_ref();

        Some(Xpub {
            network: network.into(),
            depth: u8::try_from(components.len()).ok()?,
            parent_fingerprint: Fingerprint::from(self.parent_fingerprint.unwrap_or_default()),
            child_number: components
                .last()
                .copied()
                .unwrap_or(ChildNumber::Normal { index: 0 }),
            public_key: self.public_key.0,
            chain_code: ChainCode::from(chain_code),
        })
    }
}

impl<T: Exchange> DeviceHandle<T> {
    /// Create a new handle with the provided configuration
    pub fn new(t: T, config: HandleConfig) -> Self {
        Self {
            t: Arc::new(Mutex::new(t)),
            signing: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Fetch handle configuration
    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    /// Helper to fetch user interaction timeout
    pub(crate) fn user_timeout(&self) -> Duration {
        self.config.user_timeout
    }

    /// Helper to fetch APDU request timeout
    pub(crate) fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Close and re-open the underlying transport, clearing poisoned state
    pub async fn reopen(&self) -> Result<(), Error> {
        let mut t = self.t.lock().await;

        debug!("Re-opening transport");

        t.close().await?;
        t.open().await
    }

    /// Issue a request and decode the response, failing on non-success status words
    pub async fn request<RESP>(
        &self,
        req: impl ApduReq + Send,
        timeout: Duration,
    ) -> Result<RESP, Error>
    where
        RESP: DecodeOwned<Output = RESP, Error = ApduError>,
    {
        let cmd = Command::from_req(&req)?;

        debug!("Request: {:?}", req);
        let raw = cmd.encode();
        trace!("tx: {}", hex::encode(&raw));

        let resp = {
            let mut t = self.t.lock().await;
            t.exchange(&raw, timeout).await?
        };
        trace!("rx: {}", hex::encode(&resp));

        let answer = Answer::from_bytes(&resp)?;
        let payload = answer.check()?;

        let (r, _n) = RESP::decode_owned(payload)?;

        Ok(r)
    }

    /// Fetch ledger application version
    pub async fn app_version(&self) -> Result<AppVersion, Error> {
        debug!("Requesting app version ({})", self.config.protocol);

        let v = match self.config.protocol {
            Protocol::Unified => {
                self.request::<AppVersion>(AppVersionReq {}, self.request_timeout())
                    .await?
            }
            Protocol::Legacy => {
                self.request::<FirmwareVersion>(FirmwareVersionReq {}, self.request_timeout())
                    .await?
                    .version
            }
        };

        Ok(v)
    }

    /// Fetch a public key for the provided derivation path
    pub async fn public_key(
        &self,
        path: &DerivationPath,
        opts: PublicKeyOptions,
    ) -> Result<PublicKeyInfo, Error> {
        debug!("Requesting public key for path: {}", path);

        let p = apdu_path(path)?;
        let timeout = match opts.confirm {
            true => self.user_timeout(),
            false => self.request_timeout(),
        };

        match self.config.protocol {
            Protocol::Unified => {
                let mut mode = KeyMode::empty();
                mode.set(KeyMode::XPUB, opts.xpub);
                mode.set(KeyMode::ADDRESS, opts.address);

                let req = PublicKeyReq::new(p, opts.network, mode, opts.confirm);
                let resp = self.request::<PublicKeyResp>(req, timeout).await?;

                let public_key = CompressedPublicKey::from_slice(&resp.public_key)
                    .map_err(|_| Error::InvalidKey)?;

                Ok(PublicKeyInfo {
                    public_key,
                    chain_code: resp.chain_code,
                    parent_fingerprint: resp.fingerprint,
                    address: resp.address,
                })
            }
            Protocol::Legacy => {
                let req = WalletPublicKeyReq::new(p, opts.format, opts.confirm);
                let resp = self.request::<WalletPublicKeyResp>(req, timeout).await?;

                // Legacy firmware returns uncompressed keys
                let pk = secp256k1::PublicKey::from_slice(&resp.public_key)
                    .map_err(|_| Error::InvalidKey)?;

                Ok(PublicKeyInfo {
                    public_key: CompressedPublicKey(pk),
                    chain_code: Some(resp.chain_code),
                    parent_fingerprint: None,
                    address: Some(resp.address),
                })
            }
        }
    }
}
