// Copyright (c) 2022-2023 The MobileCoin Foundation

use ledger_btc_apdu::{framing::FramingError, ApduError, StatusError};
use tokio::time::error::Elapsed;

use crate::input::OutpointKey;

/// Ledger Bitcoin API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HID packet framing error
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// APDU encoding / decoding error
    #[error("APDU error: {0}")]
    Apdu(#[from] ApduError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HID driver error
    #[cfg(feature = "transport_hid")]
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// Other transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport not open
    #[error("Transport closed")]
    TransportClosed,

    /// Transport poisoned by an earlier failure, close and re-open to recover
    #[error("Transport poisoned (close and re-open to recover)")]
    TransportPoisoned,

    /// Request timeout
    #[error("Timeout waiting for device response")]
    RequestTimeout,

    /// No matching device found
    #[error("No device found")]
    NoDevice,

    /// Device returned a non-success status word
    #[error("Device error: {0}")]
    Device(#[from] StatusError),

    /// Caller or orchestrator misuse
    #[error("{0}")]
    Misuse(#[from] MisuseError),

    /// Unexpected APDU response
    #[error("Unexpected APDU response")]
    UnexpectedResponse,

    /// Invalid key in response
    #[error("Invalid key object")]
    InvalidKey,

    /// Invalid signature in response
    #[error("Invalid signature object")]
    InvalidSignature,

    /// Script push too large
    #[error("Script push error: {0}")]
    Push(#[from] bitcoin::script::PushBytesError),
}

impl Error {
    /// Fetch the device status error, if this is one
    pub fn status(&self) -> Option<StatusError> {
        match self {
            Error::Device(s) => Some(*s),
            _ => None,
        }
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::RequestTimeout
    }
}

/// Signing invariant violations, raised before or instead of device interaction
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MisuseError {
    /// Input signed twice within one signing session
    #[error("Input {0} already signed in this session")]
    AlreadySigned(OutpointKey),

    /// Input descriptor not present in the transaction
    #[error("Input {0} not found in transaction")]
    UnknownInput(OutpointKey),

    /// Script-hash coin without redeem script
    #[error("Input {0} requires a redeem script")]
    MissingRedeemScript(OutpointKey),

    /// Redeem script does not hash to the coin script
    #[error("Input {0} redeem script does not match coin")]
    RedeemMismatch(OutpointKey),

    /// Previous transaction required for trusted input
    #[error("Input {0} requires the previous transaction")]
    MissingPrevTx(OutpointKey),

    /// Previous transaction does not match the outpoint
    #[error("Input {0} previous transaction does not match outpoint")]
    PrevTxMismatch(OutpointKey),

    /// Signing key not found in the coin or redeem script
    #[error("Input {0} signing key not found in script")]
    KeyNotInScript(OutpointKey),

    /// Coin script kind not supported
    #[error("Input {0} has an unsupported script")]
    UnsupportedScript(OutpointKey),

    /// `SIGHASH_SINGLE` without a corresponding output
    #[error("Input {0} uses SIGHASH_SINGLE without a matching output")]
    MissingOutput(OutpointKey),

    /// Device made no progress consuming a transaction stream
    #[error("Device made no progress parsing transaction")]
    ParseStalled,

    /// Output index does not fit a byte
    #[error("Output index {0} out of range")]
    InvalidIndex(usize),

    /// Covenant name invalid
    #[error("Invalid covenant name '{0}'")]
    InvalidName(String),
}
