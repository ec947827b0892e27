// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Speculos-compatible APDU socket
//!
//! Commands arrive as `len (u32 big-endian) ‖ apdu`, answers are written as
//! `len (u32 big-endian) ‖ data ‖ status word` with `len` excluding the
//! status word. Connections share the engine behind a [SimControl].

use std::io::{Error as IoError, ErrorKind};

use log::{debug, info};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::SimControl;

/// Upper bound on accepted command length
const MAX_COMMAND_LEN: usize = 4 * 1024;

/// Serve APDU connections until the listener fails
pub async fn serve(listener: TcpListener, control: SimControl) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("Accepted connection from {}", addr);

        let c = control.clone();
        tokio::spawn(async move {
            match connection(stream, c).await {
                Ok(_) => debug!("Connection {} closed", addr),
                Err(e) => debug!("Connection {} failed: {}", addr, e),
            }
        });
    }
}

async fn connection(mut stream: TcpStream, control: SimControl) -> std::io::Result<()> {
    loop {
        let len = match stream.read_u32().await {
            Ok(n) => n as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        if len > MAX_COMMAND_LEN {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("command length {len} exceeds limit"),
            ));
        }

        let mut apdu = vec![0u8; len];
        stream.read_exact(&mut apdu).await?;

        // Swallowed commands are never answered
        let answer = match control.process(&apdu) {
            (Some(a), _) => a,
            (None, _) => continue,
        };

        if answer.len() < 2 {
            return Err(IoError::new(ErrorKind::InvalidData, "answer missing status"));
        }

        let (data, sw) = answer.split_at(answer.len() - 2);

        stream.write_u32(data.len() as u32).await?;
        stream.write_all(data).await?;
        stream.write_all(sw).await?;
    }
}

#[cfg(test)]
mod test {
    use std::{net::Ipv4Addr, time::Duration};

    use ledger_btc::{
        transport::{TcpOptions, TcpTransport},
        DeviceHandle, Error, HandleConfig,
    };
    use ledger_btc_apdu::{prelude::AppVersion, Protocol};

    use super::*;
    use crate::{Engine, Fault};

    async fn setup() -> (DeviceHandle<TcpTransport>, SimControl) {
        let port = portpicker::pick_unused_port().expect("no free ports");
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await.unwrap();

        let c = SimControl::new(Engine::new(&[0x44; 32], Protocol::Unified).unwrap());
        tokio::spawn(serve(listener, c.clone()));

        let t = TcpTransport::new(TcpOptions {
            addr: Ipv4Addr::LOCALHOST.into(),
            port,
        })
        .await
        .unwrap();

        let config = HandleConfig {
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        };

        (DeviceHandle::new(t, config), c)
    }

    #[tokio::test]
    async fn tcp_app_version() {
        let (h, _c) = setup().await;

        let v = h.app_version().await.unwrap();
        assert_eq!(v, AppVersion::new(2, 1, 0));
    }

    #[tokio::test]
    async fn tcp_stall_poisons() {
        let (h, c) = setup().await;

        c.set_fault(Fault::Stall);
        assert!(matches!(h.app_version().await, Err(Error::RequestTimeout)));
        assert!(matches!(
            h.app_version().await,
            Err(Error::TransportPoisoned)
        ));

        h.reopen().await.unwrap();
        h.app_version().await.unwrap();
    }
}
