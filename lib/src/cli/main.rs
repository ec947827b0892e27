// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for interacting with the Ledger Bitcoin application

use std::time::Duration;

use bitcoin::{bip32::DerivationPath, NetworkKind};
use clap::Parser;
use log::{debug, error, info, LevelFilter};
use serde_json::json;

use ledger_btc::{
    apdu::{
        prelude::{AddressFormat, NetworkSelector},
        Protocol,
    },
    transport::GenericTransport,
    Connect, DeviceHandle, Exchange, Filter, HandleConfig, LedgerProvider, PublicKeyOptions,
};

mod helpers;
use helpers::*;

/// Ledger command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Supported transports for ledger discovery
    #[clap(long, value_enum, default_value = "any")]
    target: Filter,

    /// Device index (where more than one device is available)
    #[clap(long, default_value = "0")]
    device_index: usize,

    /// Signing protocol spoken by the device application (legacy, unified)
    #[clap(long, value_parser = parse_protocol, default_value = "unified")]
    protocol: Protocol,

    /// APDU request timeout (seconds)
    #[clap(long, value_parser = parse_secs, default_value = "2")]
    request_timeout: Duration,

    /// User confirmation timeout (seconds)
    #[clap(long, value_parser = parse_secs, default_value = "30")]
    user_timeout: Duration,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Fetch application version
    AppVersion,

    /// Fetch a public key (and optionally address / xpub) for a derivation path
    PublicKey {
        /// BIP32 derivation path
        #[clap(long, default_value = "m/84'/0'/0'/0/0")]
        path: DerivationPath,

        /// Network for address rendering (main, testnet, regtest, simnet)
        #[clap(long, value_parser = parse_network, default_value = "main")]
        network: NetworkSelector,

        /// Address format for the legacy protocol (legacy, p2sh_p2wpkh, bech32)
        #[clap(long, value_parser = parse_format, default_value = "legacy")]
        format: AddressFormat,

        /// Request the address
        #[clap(long)]
        address: bool,

        /// Request and display the extended public key
        #[clap(long)]
        xpub: bool,

        /// Require on-device confirmation
        #[clap(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default())?;

    // Connect to ledger device
    let p = LedgerProvider::new()?;

    debug!("Using transport: {:?}", args.target);

    // List available devices
    let devices = p.list_devices(args.target).await;
    if devices.is_empty() {
        return Err(anyhow::anyhow!("No devices found"));
    }

    // Handle list command
    if args.cmd == Actions::List {
        info!("Devices:");
        for (i, d) in devices.iter().enumerate() {
            info!("  {}: {}", i, d);
        }

        return Ok(());
    }

    // Select device by index
    if args.device_index >= devices.len() {
        return Err(anyhow::anyhow!(
            "Invalid device index: {} (max: {})",
            args.device_index,
            devices.len() - 1
        ));
    }

    debug!(
        "Using device {}: {}",
        args.device_index, devices[args.device_index]
    );

    let config = HandleConfig {
        request_timeout: args.request_timeout,
        user_timeout: args.user_timeout,
        protocol: args.protocol,
    };

    // Connect to device
    let t = match Connect::<GenericTransport>::connect(&p, &devices[args.device_index], config)
        .await
    {
        Ok(v) => v,
        Err(e) => {
            error!(
                "Failed to connect to device: {}",
                devices[args.device_index]
            );
            return Err(e.into());
        }
    };

    // Execute command
    execute(t, args.cmd).await?;

    Ok(())
}

/// Execute a command with the provided transport
async fn execute<T: Exchange>(t: DeviceHandle<T>, cmd: Actions) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    let v = match cmd {
        Actions::AppVersion => {
            let v = t.app_version().await?;

            json!({ "version": v.to_string() })
        }
        Actions::PublicKey {
            path,
            network,
            format,
            address,
            xpub,
            confirm,
        } => {
            info!("Requesting public key for path: {}", path);

            let opts = PublicKeyOptions {
                network,
                confirm,
                xpub,
                address,
                format,
            };

            let i = t.public_key(&path, opts).await?;

            let kind = match network {
                NetworkSelector::Main => NetworkKind::Main,
                _ => NetworkKind::Test,
            };

            json!({
                "path": path.to_string(),
                "public_key": hex::encode(i.public_key.to_bytes()),
                "chain_code": i.chain_code.map(hex::encode),
                "parent_fingerprint": i.parent_fingerprint.map(hex::encode),
                "address": i.address,
                "xpub": i.to_xpub(kind, &path).map(|x| x.to_string()),
            })
        }
        Actions::List => unreachable!(),
    };

    println!("{}", serde_json::to_string_pretty(&v)?);

    Ok(())
}
