// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device transports
//!
//! [Exchange] abstracts over the byte-level link to a device: one encoded
//! APDU command out, one raw answer (payload followed by the status word)
//! back, bounded by a deadline. [GenericTransport] hides the concrete
//! transport types for consumers that discover devices at runtime.

use std::time::Duration;

use async_trait::async_trait;
use strum::Display;

use crate::Error;

mod hid;
pub use hid::{HidDevice, HidTransport};

#[cfg(feature = "transport_hid")]
pub use hid::NativeHid;

#[cfg(feature = "transport_tcp")]
mod tcp;
#[cfg(feature = "transport_tcp")]
pub use tcp::{TcpOptions, TcpTransport};

/// Raw APDU exchange with a device
#[async_trait]
pub trait Exchange: Send {
    /// Open (or re-open) the transport, clearing any poisoned state
    async fn open(&mut self) -> Result<(), Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Error>;

    /// Send an encoded APDU and await the raw answer within `timeout`
    async fn exchange(&mut self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>, Error>;
}

/// Generic ledger transport (abstract over transport types)
#[derive(Display)]
#[non_exhaustive]
pub enum GenericTransport {
    #[cfg(feature = "transport_hid")]
    Hid(HidTransport<NativeHid>),
    #[cfg(feature = "transport_tcp")]
    Tcp(TcpTransport),
}

/// Convert a HID transport into a generic transport
#[cfg(feature = "transport_hid")]
impl From<HidTransport<NativeHid>> for GenericTransport {
    fn from(t: HidTransport<NativeHid>) -> Self {
        Self::Hid(t)
    }
}

/// Convert a TCP transport into a generic transport
#[cfg(feature = "transport_tcp")]
impl From<TcpTransport> for GenericTransport {
    fn from(t: TcpTransport) -> Self {
        Self::Tcp(t)
    }
}

/// Implementation of [Exchange] for [GenericTransport]
#[async_trait]
impl Exchange for GenericTransport {
    async fn open(&mut self) -> Result<(), Error> {
        match self {
            #[cfg(feature = "transport_hid")]
            Self::Hid(t) => t.open().await,
            #[cfg(feature = "transport_tcp")]
            Self::Tcp(t) => t.open().await,
            #[cfg(not(any(feature = "transport_hid", feature = "transport_tcp")))]
            _ => Err(Error::NoDevice),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        match self {
            #[cfg(feature = "transport_hid")]
            Self::Hid(t) => t.close().await,
            #[cfg(feature = "transport_tcp")]
            Self::Tcp(t) => t.close().await,
            #[cfg(not(any(feature = "transport_hid", feature = "transport_tcp")))]
            _ => Err(Error::NoDevice),
        }
    }

    async fn exchange(&mut self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        match self {
            #[cfg(feature = "transport_hid")]
            Self::Hid(t) => t.exchange(apdu, timeout).await,
            #[cfg(feature = "transport_tcp")]
            Self::Tcp(t) => t.exchange(apdu, timeout).await,
            #[cfg(not(any(feature = "transport_hid", feature = "transport_tcp")))]
            _ => Err(Error::NoDevice),
        }
    }
}
