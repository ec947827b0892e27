// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};

use super::{enc_chunk, RawOutpoint};
use crate::{
    helpers::{put, take, take_arr, varint},
    path::{self, Path},
    ApduError, ApduStatic, Instruction, BTC_APDU_CLA,
};

/// Sighash base type mask
pub const SIGHASH_BASE_MASK: u32 = 0x1f;

/// `SIGHASH_SINGLE` base type
pub const SIGHASH_SINGLE: u32 = 0x03;

/// Get input signature APDU, streams an [InputSignatureHeader] in chunks
///
/// `p1 = first (0x01) | last (0x80)`. Intermediate chunks are answered with
/// an empty acknowledgement, the final chunk with a [CompactSignature].
#[derive(Clone, PartialEq, Debug)]
pub struct InputSignatureReq {
    pub first: bool,
    pub last: bool,
    pub data: Vec<u8>,
}

impl InputSignatureReq {
    pub const P1_FIRST: u8 = 0x01;
    pub const P1_LAST: u8 = 0x80;

    pub fn new(first: bool, last: bool, data: Vec<u8>) -> Self {
        Self { first, last, data }
    }
}

impl ApduStatic for InputSignatureReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Get input signature is instruction `0x44`
    const INS: u8 = Instruction::GetInputSignature as u8;

    fn p1(&self) -> u8 {
        let mut p1 = 0;
        if self.first {
            p1 |= Self::P1_FIRST;
        }
        if self.last {
            p1 |= Self::P1_LAST;
        }
        p1
    }
}

impl Encode for InputSignatureReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        enc_chunk(&self.data, buff)
    }
}

/// Input signature request payload
///
/// ## Encoding
///
/// ```text
/// FLAGS (witness = 0x01)
/// PATH (depth ‖ u32be...)
/// SIGHASH (u32 little-endian)
/// OUTPOINT (txid ‖ vout, 36 bytes)
/// VALUE (u64 little-endian)
/// SEQUENCE (u32 little-endian)
/// VARINT(script_len) ‖ SCRIPT_CODE
/// [OUTPUT] (consensus encoded, base sighash SINGLE only)
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct InputSignatureHeader {
    pub witness: bool,
    pub path: Path,
    pub sighash: u32,
    pub outpoint: RawOutpoint,
    pub value: u64,
    pub sequence: u32,
    pub script_code: Vec<u8>,
    pub output: Option<Vec<u8>>,
}

impl InputSignatureHeader {
    pub const FLAG_WITNESS: u8 = 0x01;

    /// Check whether the sighash base type commits to a single output
    pub fn is_single(sighash: u32) -> bool {
        sighash & SIGHASH_BASE_MASK == SIGHASH_SINGLE
    }
}

impl Encode for InputSignatureHeader {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut n = 1 + path::enc_len(&self.path)? + 4 + 36 + 8 + 4;
        n += varint::len(self.script_code.len() as u64) + self.script_code.len();
        n += self.output.as_ref().map(|o| o.len()).unwrap_or(0);
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if Self::is_single(self.sighash) != self.output.is_some() {
            return Err(ApduError::InvalidEncoding);
        }

        let mut index = 0;

        let flags = match self.witness {
            true => Self::FLAG_WITNESS,
            false => 0,
        };
        put(buff, &mut index, &[flags])?;

        index += path::enc(&self.path, &mut buff[index..])?;

        put(buff, &mut index, &self.sighash.to_le_bytes())?;
        put(buff, &mut index, &self.outpoint)?;
        put(buff, &mut index, &self.value.to_le_bytes())?;
        put(buff, &mut index, &self.sequence.to_le_bytes())?;

        let (v, l) = varint::to_bytes(self.script_code.len() as u64);
        put(buff, &mut index, &v[..l])?;
        put(buff, &mut index, &self.script_code)?;

        if let Some(o) = &self.output {
            put(buff, &mut index, o)?;
        }

        Ok(index)
    }
}

impl DecodeOwned for InputSignatureHeader {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut index = 0;

        let witness = match take(buff, &mut index, 1)?[0] {
            0x00 => false,
            Self::FLAG_WITNESS => true,
            _ => return Err(ApduError::InvalidEncoding),
        };

        let (path, n) = path::dec(&buff[index..])?;
        index += n;

        let sighash = u32::from_le_bytes(take_arr(buff, &mut index)?);
        let outpoint = take_arr(buff, &mut index)?;
        let value = u64::from_le_bytes(take_arr(buff, &mut index)?);
        let sequence = u32::from_le_bytes(take_arr(buff, &mut index)?);

        let (script_len, n) = varint::dec(&buff[index..])?;
        index += n;
        let script_code = take(buff, &mut index, script_len as usize)?.to_vec();

        let output = match Self::is_single(sighash) {
            true => {
                let rest = buff.len() - index;
                let o = take(buff, &mut index, rest)?;
                if o.is_empty() {
                    return Err(ApduError::InvalidLength);
                }
                Some(o.to_vec())
            }
            false => None,
        };

        Ok((
            Self {
                witness,
                path,
                sighash,
                outpoint,
                value,
                sequence,
                script_code,
                output,
            },
            index,
        ))
    }
}

/// Compact (`r ‖ s`) signature response
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct CompactSignature(pub [u8; 64]);

impl Encode for CompactSignature {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(64)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut index = 0;
        put(buff, &mut index, &self.0)?;
        Ok(index)
    }
}

impl DecodeOwned for CompactSignature {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() != 64 {
            return Err(ApduError::InvalidLength);
        }

        let mut index = 0;
        Ok((Self(take_arr(buff, &mut index)?), index))
    }
}
