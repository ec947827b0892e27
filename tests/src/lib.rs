// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Tests for bitcoin wallet integration.
//!
//! Generic over [ledger_btc::Exchange] for reuse against the emulator
//! or a physical device.
//!

pub mod fixtures;

pub mod keys;

pub mod sign;
