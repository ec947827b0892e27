// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Software emulator for the Ledger Bitcoin application
//!
//! [Engine] answers raw APDUs for either signing protocol using keys derived
//! from a BIP39 mnemonic. [SimDevice] exposes the engine as an in-process HID
//! device for use with `ledger_btc::transport::HidTransport`, and [serve]
//! provides a Speculos-compatible TCP socket. Both are driven through a
//! [SimControl] for approvals and fault injection.

mod engine;
pub use engine::{Engine, TxReader, DEFAULT_PARSE_LIMIT, DEFAULT_VERSION};

mod device;
pub use device::{Fault, SimControl, SimDevice};

mod server;
pub use server::serve;

/// Mnemonic used where none is provided (BIP39 test vector, never use with funds)
pub const DEFAULT_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
