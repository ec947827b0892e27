// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::net::IpAddr;

use clap::Parser;
use log::{debug, info, LevelFilter};
use tokio::net::TcpListener;

use ledger_btc_apdu::Protocol;
use ledger_btc_sim::*;

/// Ledger Bitcoin application emulator
///
/// Serves the emulated application over a Speculos-compatible APDU socket
/// for use with `ledger-btc-cli --target tcp` or the TCP transport.
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct Args {
    /// BIP39 mnemonic for key derivation
    #[clap(long, env = "MNEMONIC", default_value = DEFAULT_MNEMONIC)]
    mnemonic: String,

    /// Signing protocol to emulate (legacy, unified)
    #[clap(long, value_parser = parse_protocol, default_value = "unified")]
    protocol: Protocol,

    /// Listen address
    #[clap(long, default_value = "127.0.0.1")]
    addr: IpAddr,

    /// Listen port
    #[clap(long, default_value = "9999")]
    port: u16,

    /// Decline all on-device confirmations
    #[clap(long)]
    reject: bool,

    /// Log level
    #[clap(long, default_value = "debug")]
    log_level: LevelFilter,
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    s.parse()
        .map_err(|_| format!("unknown protocol '{s}' (expected legacy or unified)"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    let _ = simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default());

    info!("Starting emulator ({} protocol)", args.protocol);

    let mut engine = Engine::from_mnemonic(&args.mnemonic, args.protocol)?;
    engine.set_approve(!args.reject);

    let control = SimControl::new(engine);
    let listener = TcpListener::bind((args.addr, args.port)).await?;

    // Serve until exit signal
    tokio::select!(
        r = serve(listener, control) => {
            r?;
        }
        // Exit on ctrl + c
        _ = tokio::signal::ctrl_c() => {
            debug!("Exit!");
        },
    );

    Ok(())
}
