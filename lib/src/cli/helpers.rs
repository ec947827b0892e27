// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::time::Duration;

use ledger_btc::apdu::{
    prelude::{AddressFormat, NetworkSelector},
    Protocol,
};

/// Parse a signing protocol by name
pub fn parse_protocol(s: &str) -> Result<Protocol, String> {
    s.parse()
        .map_err(|_| format!("unknown protocol '{s}' (expected legacy or unified)"))
}

/// Parse a network selector by name
pub fn parse_network(s: &str) -> Result<NetworkSelector, String> {
    s.parse()
        .map_err(|_| format!("unknown network '{s}' (expected main, testnet, regtest or simnet)"))
}

/// Parse a legacy address format by name
pub fn parse_format(s: &str) -> Result<AddressFormat, String> {
    s.parse()
        .map_err(|_| format!("unknown address format '{s}'"))
}

/// Parse a duration in seconds
pub fn parse_secs(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("invalid duration '{s}': {e}"))
}
