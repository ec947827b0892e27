// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};

use super::enc_chunk;
use crate::{ApduError, ApduStatic, LegacyInstruction, BTC_APDU_CLA};

/// Trusted input token length
pub const TRUSTED_INPUT_LEN: usize = 56;

/// Trusted input magic byte
pub const TRUSTED_INPUT_MAGIC: u8 = 0x32;

/// Fetch trusted input APDU, streams a previous transaction in chunks
///
/// The first chunk is `vout (u32 big-endian) ‖ version ‖ varint(input count)`,
/// subsequent chunks carry inputs, outputs and the lock time.
#[derive(Clone, PartialEq, Debug)]
pub struct TrustedInputReq {
    pub first: bool,
    pub data: Vec<u8>,
}

impl TrustedInputReq {
    pub fn new(first: bool, data: Vec<u8>) -> Self {
        Self { first, data }
    }
}

impl ApduStatic for TrustedInputReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Get trusted input is legacy instruction `0x42`
    const INS: u8 = LegacyInstruction::GetTrustedInput as u8;

    fn p1(&self) -> u8 {
        match self.first {
            true => 0x00,
            false => 0x80,
        }
    }
}

impl Encode for TrustedInputReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        enc_chunk(&self.data, buff)
    }
}

/// Trusted input, an opaque device-authenticated reference to a previous output
///
/// ## Encoding
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   MAGIC (32)  |      0x00     |             NONCE             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                          TXID (32 bytes)                      /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      VOUT (u32 little-endian)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     AMOUNT (u64 little-endian)                |
/// +                                                               +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          MAC (8 bytes)                        |
/// +                                                               +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TrustedInput([u8; TRUSTED_INPUT_LEN]);

impl TrustedInput {
    /// Offset of the MAC, preceding bytes are authenticated
    pub const MAC_OFFSET: usize = 48;

    /// Build a trusted input from its fields
    pub fn new(nonce: [u8; 2], txid: [u8; 32], vout: u32, amount: u64, mac: [u8; 8]) -> Self {
        let mut b = [0u8; TRUSTED_INPUT_LEN];

        b[0] = TRUSTED_INPUT_MAGIC;
        b[2..4].copy_from_slice(&nonce);
        b[4..36].copy_from_slice(&txid);
        b[36..40].copy_from_slice(&vout.to_le_bytes());
        b[40..48].copy_from_slice(&amount.to_le_bytes());
        b[48..56].copy_from_slice(&mac);

        Self(b)
    }

    /// Previous transaction id (consensus byte order)
    pub fn txid(&self) -> [u8; 32] {
        let mut d = [0u8; 32];
        d.copy_from_slice(&self.0[4..36]);
        d
    }

    /// Previous output index
    pub fn vout(&self) -> u32 {
        let mut d = [0u8; 4];
        d.copy_from_slice(&self.0[36..40]);
        u32::from_le_bytes(d)
    }

    /// Previous output amount in satoshis
    pub fn amount(&self) -> u64 {
        let mut d = [0u8; 8];
        d.copy_from_slice(&self.0[40..48]);
        u64::from_le_bytes(d)
    }

    /// Outpoint in consensus encoding
    pub fn outpoint(&self) -> super::RawOutpoint {
        let mut d = [0u8; 36];
        d.copy_from_slice(&self.0[4..40]);
        d
    }

    /// Authenticated portion of the token
    pub fn body(&self) -> &[u8] {
        &self.0[..Self::MAC_OFFSET]
    }

    pub fn mac(&self) -> [u8; 8] {
        let mut d = [0u8; 8];
        d.copy_from_slice(&self.0[Self::MAC_OFFSET..]);
        d
    }

    pub fn as_bytes(&self) -> &[u8; TRUSTED_INPUT_LEN] {
        &self.0
    }
}

impl Encode for TrustedInput {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(TRUSTED_INPUT_LEN)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < TRUSTED_INPUT_LEN {
            return Err(ApduError::InvalidLength);
        }

        buff[..TRUSTED_INPUT_LEN].copy_from_slice(&self.0);

        Ok(TRUSTED_INPUT_LEN)
    }
}

impl DecodeOwned for TrustedInput {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < TRUSTED_INPUT_LEN {
            return Err(ApduError::InvalidLength);
        }
        if buff[0] != TRUSTED_INPUT_MAGIC || buff[1] != 0x00 {
            return Err(ApduError::InvalidEncoding);
        }

        let mut b = [0u8; TRUSTED_INPUT_LEN];
        b.copy_from_slice(&buff[..TRUSTED_INPUT_LEN]);

        Ok((Self(b), TRUSTED_INPUT_LEN))
    }
}
