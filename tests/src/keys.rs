// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Application version and public key tests

use log::info;

use ledger_btc::{DeviceHandle, Exchange, PublicKeyOptions};
use ledger_btc_apdu::{prelude::AppVersion, Protocol};

use crate::fixtures::{path, Wallet};

/// Paths checked against the reference wallet
pub const PATHS: &[&str] = &[
    "m/44'/0'/0'/0/0",
    "m/49'/0'/0'/0/3",
    "m/84'/0'/0'/1/7",
    "m/48'/1'/0'/2'/0/1",
];

/// Fetch the application version
pub async fn version<T: Exchange>(h: &DeviceHandle<T>) -> anyhow::Result<AppVersion> {
    let v = h.app_version().await?;

    info!("application version: {}", v);

    Ok(v)
}

/// Fetch public keys and check these match the reference wallet
pub async fn test<T: Exchange>(h: &DeviceHandle<T>, wallet: &Wallet) -> anyhow::Result<()> {
    for p in PATHS {
        let path = path(p)?;

        let expected = wallet.xpub(&path)?;
        info!("expected public key for {}: {}", p, expected.public_key);

        let opts = PublicKeyOptions {
            xpub: true,
            ..Default::default()
        };
        let i = h.public_key(&path, opts).await?;

        info!("received public key for {}: {}", p, i.public_key);

        assert_eq!(i.public_key.0, expected.public_key);
        assert_eq!(i.chain_code.as_ref().map(|c| &c[..]), Some(&expected.chain_code[..]));

        // Only the unified protocol reports parent fingerprints
        if h.config().protocol == Protocol::Unified {
            assert_eq!(i.to_xpub(expected.network, &path), Some(expected));
        }
    }

    Ok(())
}
