// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger Bitcoin API Library (and CLI)
//!
//! Provides [DeviceHandle] for public key requests and transaction signing
//! against the Ledger Bitcoin application, generic over [Exchange] transports.
//! See [LedgerProvider] for device discovery.

use std::fmt::Debug;

use async_trait::async_trait;

#[cfg(feature = "transport_hid")]
use hidapi::HidApi;

/// Re-export transports for consumer use
pub mod transport;
use transport::*;
pub use transport::Exchange;

/// Re-export `ledger-btc-apdu` for consumers
pub use ledger_btc_apdu::{self as apdu};

mod handle;
pub use handle::{DeviceHandle, HandleConfig, PublicKeyInfo, PublicKeyOptions};

mod error;
pub use error::{Error, MisuseError};

mod input;
pub use input::{
    LedgerChange, LedgerCovenant, LedgerInput, OutpointKey, ScriptKind, MAX_NAME_LEN,
};

pub mod script;

mod signer;
pub use signer::{InputSignature, SignOptions};

/// Ledger provider manages ledger devices and connections
pub struct LedgerProvider {
    #[cfg(feature = "transport_hid")]
    hid_api: HidApi,
}

/// Device discovery filter
#[derive(Copy, Clone, Debug, PartialEq, clap::ValueEnum, strum::Display)]
#[non_exhaustive]
pub enum Filter {
    /// List all devices available using supported transport
    Any,
    /// List only HID devices
    Hid,
    /// List only TCP devices
    Tcp,
}

/// Ledger device information for listing, used by connect
#[derive(Debug)]
pub enum LedgerInfo {
    #[cfg(feature = "transport_hid")]
    Hid(hidapi::DeviceInfo),
    #[cfg(feature = "transport_tcp")]
    Tcp(TcpOptions),
}

impl LedgerProvider {
    /// Create a new ledger provider
    /// NOTE: only one provider may exist at a time (workaround for global HID context errors on macos/m1)
    pub fn new() -> Result<Self, Error> {
        #[cfg(feature = "transport_hid")]
        return Ok(Self {
            hid_api: HidApi::new()?,
        });

        #[cfg(not(feature = "transport_hid"))]
        return Ok(Self {});
    }

    /// List available ledger devices
    pub async fn list_devices(&self, filter: Filter) -> Vec<LedgerInfo> {
        let mut devices = vec![];

        #[cfg(feature = "transport_hid")]
        if filter == Filter::Any || filter == Filter::Hid {
            NativeHid::list_ledgers(&self.hid_api)
                .cloned()
                .for_each(|d| {
                    devices.push(LedgerInfo::Hid(d));
                });
        }

        #[cfg(feature = "transport_tcp")]
        if filter == Filter::Any || filter == Filter::Tcp {
            // Try connecting to default speculos port
            let o = TcpOptions::default();
            if let Ok(_t) = tokio::net::TcpStream::connect(o.socket_addr()).await {
                // Return default port if connection succeeded
                devices.push(LedgerInfo::Tcp(o));
            };
        }

        log::debug!("Found {} devices: {:?}", devices.len(), devices);

        devices
    }
}

/// Generic ledger device handle (abstract over transport types)
pub type GenericHandle = DeviceHandle<GenericTransport>;

impl GenericHandle {
    /// Create a new generic device handle with default configuration
    pub fn generic(d: impl Into<GenericTransport>) -> Self {
        Self::from(d.into())
    }
}

impl std::fmt::Display for LedgerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "transport_hid")]
            LedgerInfo::Hid(hid_info) => {
                write!(
                    f,
                    "{:16} (USB, {:04x}:{:04x}, {})",
                    hid_info.product_string().unwrap_or("UNKNOWN"),
                    hid_info.vendor_id(),
                    hid_info.product_id(),
                    hid_info.serial_number().unwrap_or("UNKNOWN"),
                )
            }
            #[cfg(feature = "transport_tcp")]
            LedgerInfo::Tcp(tcp_info) => {
                write!(
                    f,
                    "{:16} (TCP, {}:{})",
                    "Speculos", tcp_info.addr, tcp_info.port
                )
            }
            #[cfg(not(any(feature = "transport_hid", feature = "transport_tcp")))]
            _ => Ok(()),
        }
    }
}

/// Connect trait for supported transports
#[async_trait]
pub trait Connect<T: Exchange> {
    type Options: Debug;

    /// Connect to the specified device
    async fn connect(
        &self,
        opts: &Self::Options,
        config: HandleConfig,
    ) -> Result<DeviceHandle<T>, Error>;
}

/// Generic connect implementation
#[cfg(any(feature = "transport_hid", feature = "transport_tcp"))]
#[async_trait]
impl Connect<GenericTransport> for LedgerProvider {
    type Options = LedgerInfo;

    async fn connect(
        &self,
        opts: &Self::Options,
        config: HandleConfig,
    ) -> Result<DeviceHandle<GenericTransport>, Error> {
        let t = match opts {
            #[cfg(feature = "transport_hid")]
            LedgerInfo::Hid(hid_info) => {
                let t = NativeHid::open_device(&self.hid_api, hid_info)?;
                GenericTransport::Hid(t)
            }
            #[cfg(feature = "transport_tcp")]
            LedgerInfo::Tcp(tcp_info) => {
                let t = TcpTransport::new(tcp_info.clone()).await?;
                GenericTransport::Tcp(t)
            }
        };

        Ok(DeviceHandle::new(t, config))
    }
}

/// Connect implementation for HID devices
#[cfg(feature = "transport_hid")]
#[async_trait]
impl Connect<HidTransport<NativeHid>> for LedgerProvider {
    type Options = hidapi::DeviceInfo;

    async fn connect(
        &self,
        opts: &Self::Options,
        config: HandleConfig,
    ) -> Result<DeviceHandle<HidTransport<NativeHid>>, Error> {
        let t = NativeHid::open_device(&self.hid_api, opts)?;

        Ok(DeviceHandle::new(t, config))
    }
}

/// Connect implementation for TCP devices
#[cfg(feature = "transport_tcp")]
#[async_trait]
impl Connect<TcpTransport> for LedgerProvider {
    type Options = TcpOptions;

    async fn connect(
        &self,
        opts: &Self::Options,
        config: HandleConfig,
    ) -> Result<DeviceHandle<TcpTransport>, Error> {
        let t = TcpTransport::new(opts.clone()).await?;

        Ok(DeviceHandle::new(t, config))
    }
}
