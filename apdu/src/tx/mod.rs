// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction related APDUs, used to stream a transaction to the device
//! and request per-input signatures.
//!
//! Legacy protocol: [TrustedInputReq], [HashInputStartReq],
//! [HashOutputFinalizeReq], [HashSignReq].
//!
//! Unified protocol: [ParseTxReq], [InputSignatureReq].

use encdec::{DecodeOwned, Encode};

use crate::{helpers::put, ApduError};

mod trusted_input;
pub use trusted_input::*;

mod hash_input;
pub use hash_input::*;

mod hash_sign;
pub use hash_sign::*;

mod parse;
pub use parse::*;

mod input_signature;
pub use input_signature::*;

/// Acknowledgement for intermediate chunks
///
/// Any trailing confirmation bytes are ignored.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Ack;

impl Encode for Ack {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

impl DecodeOwned for Ack {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(_buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((Self, 0))
    }
}

/// Outpoint in consensus encoding (`txid ‖ vout` little-endian)
pub type RawOutpoint = [u8; 36];

/// Encode a raw data chunk
fn enc_chunk(data: &[u8], buff: &mut [u8]) -> Result<usize, ApduError> {
    let mut index = 0;
    put(buff, &mut index, data)?;
    Ok(index)
}
