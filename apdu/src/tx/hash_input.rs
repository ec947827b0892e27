// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};
use num_enum::TryFromPrimitive;
use strum::Display;

use super::{enc_chunk, RawOutpoint, TrustedInput, TRUSTED_INPUT_LEN};
use crate::{
    helpers::{put, take, take_arr},
    ApduError, ApduStatic, LegacyInstruction, BTC_APDU_CLA,
};

/// Hash input start mode, carried in `p2`
#[derive(Copy, Clone, PartialEq, Debug, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum HashInputMode {
    /// Begin a new legacy (non-witness) transaction
    NewLegacy = 0x00,
    /// Begin a new segwit transaction
    NewSegwit = 0x02,
    /// Continue the previously started transaction
    Continue = 0x80,
}

/// Hash input start APDU, streams transaction version and inputs
///
/// `p1 = 0x00` for the first chunk, `0x80` for subsequent chunks.
/// Each input is sent as an [InputHeader] followed by `varint(script_len)`,
/// then `script ‖ sequence` in chunks.
#[derive(Clone, PartialEq, Debug)]
pub struct HashInputStartReq {
    pub first: bool,
    pub mode: HashInputMode,
    pub data: Vec<u8>,
}

impl HashInputStartReq {
    pub fn new(first: bool, mode: HashInputMode, data: Vec<u8>) -> Self {
        Self { first, mode, data }
    }
}

impl ApduStatic for HashInputStartReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Hash input start is legacy instruction `0x44`
    const INS: u8 = LegacyInstruction::HashInputStart as u8;

    fn p1(&self) -> u8 {
        match self.first {
            true => 0x00,
            false => 0x80,
        }
    }

    fn p2(&self) -> u8 {
        self.mode as u8
    }
}

impl Encode for HashInputStartReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        enc_chunk(&self.data, buff)
    }
}

/// Per-input header for [HashInputStartReq]
///
/// ```text
/// WITNESS:  0x02 ‖ OUTPOINT (36) ‖ VALUE (u64 little-endian)
/// TRUSTED:  0x01 ‖ LEN (56) ‖ TRUSTED_INPUT
/// PLAIN:    0x00 ‖ OUTPOINT (36)
/// ```
#[derive(Clone, PartialEq, Debug)]
pub enum InputHeader {
    Plain { outpoint: RawOutpoint },
    Trusted(TrustedInput),
    Witness { outpoint: RawOutpoint, value: u64 },
}

impl InputHeader {
    pub const PLAIN: u8 = 0x00;
    pub const TRUSTED: u8 = 0x01;
    pub const WITNESS: u8 = 0x02;
}

impl Encode for InputHeader {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let n = match self {
            InputHeader::Plain { .. } => 1 + 36,
            InputHeader::Trusted(_) => 2 + TRUSTED_INPUT_LEN,
            InputHeader::Witness { .. } => 1 + 36 + 8,
        };
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut index = 0;

        match self {
            InputHeader::Plain { outpoint } => {
                put(buff, &mut index, &[Self::PLAIN])?;
                put(buff, &mut index, outpoint)?;
            }
            InputHeader::Trusted(t) => {
                put(buff, &mut index, &[Self::TRUSTED, TRUSTED_INPUT_LEN as u8])?;
                put(buff, &mut index, t.as_bytes())?;
            }
            InputHeader::Witness { outpoint, value } => {
                put(buff, &mut index, &[Self::WITNESS])?;
                put(buff, &mut index, outpoint)?;
                put(buff, &mut index, &value.to_le_bytes())?;
            }
        }

        Ok(index)
    }
}

impl DecodeOwned for InputHeader {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut index = 0;

        let h = match take(buff, &mut index, 1)?[0] {
            Self::PLAIN => InputHeader::Plain {
                outpoint: take_arr(buff, &mut index)?,
            },
            Self::TRUSTED => {
                if take(buff, &mut index, 1)?[0] as usize != TRUSTED_INPUT_LEN {
                    return Err(ApduError::InvalidLength);
                }
                let (t, n) = TrustedInput::decode_owned(&buff[index..])?;
                index += n;
                InputHeader::Trusted(t)
            }
            Self::WITNESS => InputHeader::Witness {
                outpoint: take_arr(buff, &mut index)?,
                value: u64::from_le_bytes(take_arr(buff, &mut index)?),
            },
            _ => return Err(ApduError::InvalidEncoding),
        };

        Ok((h, index))
    }
}

/// Output finalize chunk kind, carried in `p1`
#[derive(Copy, Clone, PartialEq, Debug, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum FinalizeKind {
    /// More output chunks follow
    More = 0x00,
    /// Final output chunk
    Last = 0x80,
    /// Change output derivation path (sent before outputs)
    ChangePath = 0xff,
}

/// Hash input finalize full APDU, streams `varint(output count) ‖ outputs`
#[derive(Clone, PartialEq, Debug)]
pub struct HashOutputFinalizeReq {
    pub kind: FinalizeKind,
    pub data: Vec<u8>,
}

impl HashOutputFinalizeReq {
    pub fn new(kind: FinalizeKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }
}

impl ApduStatic for HashOutputFinalizeReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Hash input finalize full is legacy instruction `0x4a`
    const INS: u8 = LegacyInstruction::HashInputFinalizeFull as u8;

    fn p1(&self) -> u8 {
        self.kind as u8
    }
}

impl Encode for HashOutputFinalizeReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        enc_chunk(&self.data, buff)
    }
}
