// Copyright (c) 2022-2023 The MobileCoin Foundation

//! TCP transport for Speculos-compatible APDU sockets
//!
//! Requests are sent as `len (u32 big-endian) ‖ apdu`, answers are
//! received as `len (u32 big-endian) ‖ data ‖ status word` where `len`
//! excludes the status word.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::Exchange;
use crate::Error;

/// Default Speculos APDU port
pub const DEFAULT_TCP_PORT: u16 = 9999;

/// Upper bound on answer length
const MAX_ANSWER_LEN: usize = 64 * 1024;

/// TCP transport options
#[derive(Clone, Debug, PartialEq, clap::Parser)]
pub struct TcpOptions {
    /// Speculos / simulator address
    #[clap(long, default_value = "127.0.0.1")]
    pub addr: IpAddr,

    /// Speculos / simulator APDU port
    #[clap(long, default_value_t = DEFAULT_TCP_PORT)]
    pub port: u16,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl TcpOptions {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// TCP transport
pub struct TcpTransport {
    opts: TcpOptions,
    stream: Option<TcpStream>,
    poisoned: bool,
}

impl TcpTransport {
    /// Connect to a TCP device
    pub async fn new(opts: TcpOptions) -> Result<Self, Error> {
        debug!("Connecting to {}", opts.socket_addr());

        let stream = TcpStream::connect(opts.socket_addr()).await?;

        Ok(Self {
            opts,
            stream: Some(stream),
            poisoned: false,
        })
    }

    /// Check whether the transport has been poisoned
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    async fn exchange_inner(stream: &mut TcpStream, apdu: &[u8]) -> Result<Vec<u8>, Error> {
        let mut req = Vec::with_capacity(apdu.len() + 4);
        req.extend_from_slice(&(apdu.len() as u32).to_be_bytes());
        req.extend_from_slice(apdu);

        stream.write_all(&req).await?;

        let len = stream.read_u32().await? as usize;
        if len > MAX_ANSWER_LEN {
            return Err(Error::Transport(format!("invalid answer length {len}")));
        }

        let mut resp = vec![0u8; len + 2];
        stream.read_exact(&mut resp).await?;

        Ok(resp)
    }
}

#[async_trait]
impl Exchange for TcpTransport {
    async fn open(&mut self) -> Result<(), Error> {
        // Reconnect to discard any in-flight answer
        self.stream = None;

        let stream = TcpStream::connect(self.opts.socket_addr()).await?;
        self.stream = Some(stream);
        self.poisoned = false;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(mut s) = self.stream.take() {
            s.shutdown().await?;
        }
        Ok(())
    }

    async fn exchange(&mut self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        if self.poisoned {
            return Err(Error::TransportPoisoned);
        }

        let stream = self.stream.as_mut().ok_or(Error::TransportClosed)?;

        let r = match tokio::time::timeout(timeout, Self::exchange_inner(stream, apdu)).await {
            Ok(r) => r,
            Err(e) => Err(Error::from(e)),
        };

        if let Err(e) = &r {
            warn!("TCP exchange failed ({}), poisoning transport", e);
            self.poisoned = true;
        }

        r
    }
}
