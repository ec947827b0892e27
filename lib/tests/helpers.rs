// Copyright (c) 2022-2023 The MobileCoin Foundation

#![allow(unused)]

use std::{str::FromStr, time::Duration};

use log::LevelFilter;
use simplelog::SimpleLogger;

use ledger_btc::{transport::HidTransport, DeviceHandle, HandleConfig};
use ledger_btc_apdu::Protocol;
use ledger_btc_sim::{Engine, SimControl, SimDevice};
use ledger_btc_tests::fixtures::{Wallet, MNEMONIC};

/// Handle type for emulated devices
pub type SimHandle = DeviceHandle<HidTransport<SimDevice>>;

/// Request timeout for emulated devices, short so stalls fail fast
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(250);

/// Setup logging from the `LOG_LEVEL` environment variable
pub fn init_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Info,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Setup an emulated device speaking `protocol`, returning a handle,
/// a control for approvals / faults, and the matching reference wallet
pub fn setup(protocol: Protocol) -> (SimHandle, SimControl, Wallet) {
    init_logging();

    let engine = Engine::from_mnemonic(MNEMONIC, protocol).expect("engine setup failed");
    let device = SimDevice::new(engine);
    let control = device.control();

    let config = HandleConfig {
        request_timeout: REQUEST_TIMEOUT,
        user_timeout: REQUEST_TIMEOUT * 4,
        protocol,
    };

    let h = DeviceHandle::new(HidTransport::new(device), config);
    let w = Wallet::from_phrase(MNEMONIC).expect("wallet setup failed");

    (h, control, w)
}
