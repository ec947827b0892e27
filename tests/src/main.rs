// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{debug, info, LevelFilter};
use strum::Display;

use ledger_btc::{
    transport::GenericTransport, Connect, DeviceHandle, Exchange, Filter, HandleConfig,
    LedgerProvider,
};
use ledger_btc_apdu::Protocol;
use ledger_btc_tests::{
    fixtures::{Wallet, MNEMONIC},
    sign::Multisig,
};

/// Test CLI arguments
#[derive(Clone, Debug, Parser)]
pub struct Opts {
    #[clap(subcommand)]
    pub test: Tests,

    /// Target for test execution
    #[clap(long, value_enum, default_value = "tcp", env)]
    pub target: Target,

    /// Signing protocol spoken by the device application
    #[clap(long, default_value = "unified", env)]
    pub protocol: Protocol,

    /// bip39 Mnemonic (must be shared between test util and target)
    #[clap(long, env, default_value = MNEMONIC)]
    pub mnemonic: String,

    /// User confirmation timeout (seconds)
    #[clap(long, default_value = "60")]
    pub user_timeout: u64,

    /// Log level
    #[clap(long, default_value = "debug", env)]
    pub log_level: LevelFilter,

    /// Enable logging for transports
    #[clap(long)]
    pub log_transports: bool,
}

/// Test modes
#[derive(Clone, PartialEq, Debug, Parser, Display)]
pub enum Tests {
    /// Fetch the application version
    Version,
    /// Test public key derivation
    PublicKeys,
    /// Test P2PKH signing
    SignLegacy,
    /// Test P2WPKH signing with a change output
    SignSegwit,
    /// Test P2SH-P2WPKH signing
    SignNested,
    /// Test signing P2PKH and P2WPKH inputs together
    SignMixed,
    /// Test signing witness, legacy and witness inputs in order
    SignInterleaved,
    /// Test 2-of-3 multisig co-signing
    SignMultisig {
        /// Multisig output wrapping
        #[clap(long, value_enum, default_value = "p2sh")]
        kind: Multisig,
    },
    /// Run all tests
    All,
}

/// Test target connection
#[derive(Clone, Copy, PartialEq, Debug, ValueEnum, Display)]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum Target {
    /// USB-HID connection for physical ledger devices
    Hid,
    /// TCP connection for emulators
    Tcp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load command line options
    let opts = Opts::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    if !opts.log_transports {
        c.add_filter_ignore_str("ledger_btc::transport");
    }

    let _ = simplelog::SimpleLogger::init(opts.log_level, c.build());

    debug!("options: {:?}", opts);

    info!(
        "Running test '{}' via {} ({} protocol)",
        opts.test, opts.target, opts.protocol
    );

    let config = HandleConfig {
        protocol: opts.protocol,
        user_timeout: Duration::from_secs(opts.user_timeout),
        ..Default::default()
    };

    let filter = match opts.target {
        Target::Hid => Filter::Hid,
        Target::Tcp => Filter::Tcp,
    };

    // Connect to target and execute test
    let p = LedgerProvider::new()?;

    let devices = p.list_devices(filter).await;
    debug!("Found devices: {:?}", devices);

    let d = match devices.first() {
        Some(d) => d,
        None => return Err(anyhow::anyhow!("no {} devices found", opts.target)),
    };

    info!("Using device: {}", d);

    let h: DeviceHandle<GenericTransport> = p.connect(d, config).await?;

    execute(&h, &opts).await?;

    log::info!("Test OK!");

    Ok(())
}

/// Execute a test with the provided device handle
async fn execute<T: Exchange>(h: &DeviceHandle<T>, opts: &Opts) -> anyhow::Result<()> {
    use ledger_btc_tests::*;

    let wallet = Wallet::from_phrase(&opts.mnemonic)?;

    match &opts.test {
        Tests::Version => {
            keys::version(h).await?;
        }
        Tests::PublicKeys => keys::test(h, &wallet).await?,
        Tests::SignLegacy => sign::legacy(h, &wallet).await?,
        Tests::SignSegwit => sign::segwit(h, &wallet).await?,
        Tests::SignNested => sign::nested(h, &wallet).await?,
        Tests::SignMixed => sign::mixed(h, &wallet).await?,
        Tests::SignInterleaved => sign::interleaved(h, &wallet).await?,
        Tests::SignMultisig { kind } => sign::multisig(h, &wallet, *kind).await?,
        Tests::All => {
            keys::version(h).await?;
            keys::test(h, &wallet).await?;
            sign::legacy(h, &wallet).await?;
            sign::segwit(h, &wallet).await?;
            sign::nested(h, &wallet).await?;
            sign::mixed(h, &wallet).await?;
            sign::interleaved(h, &wallet).await?;
            for kind in [Multisig::P2sh, Multisig::P2wsh, Multisig::P2shP2wsh] {
                sign::multisig(h, &wallet, kind).await?;
            }
        }
    }

    Ok(())
}
