// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::{string::String, vec::Vec};

use encdec::{DecodeOwned, Encode};
use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString};

use super::enc_chunk;
use crate::{
    helpers::{put, take},
    path::{self, Path},
    ApduError, ApduStatic, Instruction, BTC_APDU_CLA,
};

/// Parse transaction APDU, streams the transaction body for hashing
///
/// `p1 = 0x01` for the first chunk (which begins with a [ParseMeta] prefix),
/// `0x00` for subsequent chunks. The device answers each chunk with a
/// [ParseTxResp] echoing any bytes it could not yet consume, these are
/// resent at the head of the next chunk.
#[derive(Clone, PartialEq, Debug)]
pub struct ParseTxReq {
    pub first: bool,
    pub data: Vec<u8>,
}

impl ParseTxReq {
    pub const P1_FIRST: u8 = 0x01;
    pub const P1_NEXT: u8 = 0x00;

    pub fn new(first: bool, data: Vec<u8>) -> Self {
        Self { first, data }
    }
}

impl ApduStatic for ParseTxReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Parse TX is instruction `0x46`
    const INS: u8 = Instruction::ParseTx as u8;

    fn p1(&self) -> u8 {
        match self.first {
            true => Self::P1_FIRST,
            false => Self::P1_NEXT,
        }
    }
}

impl Encode for ParseTxReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        enc_chunk(&self.data, buff)
    }
}

/// Parse transaction response, unconsumed bytes from the last chunk
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ParseTxResp {
    pub remainder: Vec<u8>,
}

impl Encode for ParseTxResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.remainder.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        enc_chunk(&self.remainder, buff)
    }
}

impl DecodeOwned for ParseTxResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((
            Self {
                remainder: buff.to_vec(),
            },
            buff.len(),
        ))
    }
}

/// Name-system covenant types
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, EnumIter, TryFromPrimitive)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum CovenantKind {
    Claim = 1,
    Open = 2,
    Bid = 3,
    Reveal = 4,
    Redeem = 5,
    Register = 6,
    Update = 7,
    Renew = 8,
    Transfer = 9,
    Finalize = 10,
    Revoke = 11,
}

bitflags::bitflags! {
    /// Metadata sections present in a [ParseMeta] prefix
    #[derive(Default)]
    pub struct ParseFlags: u8 {
        const CHANGE = 0x01;
        const COVENANTS = 0x02;
    }
}

/// Change output display metadata
#[derive(Clone, PartialEq, Debug)]
pub struct ChangeMeta {
    pub index: u8,
    pub path: Path,
}

/// Covenant output display metadata
#[derive(Clone, PartialEq, Debug)]
pub struct CovenantMeta {
    pub index: u8,
    pub kind: CovenantKind,
    pub name: String,
}

/// Metadata prefix for the first [ParseTxReq] chunk
///
/// ## Encoding
///
/// ```text
/// FLAGS
/// [CHANGE]     INDEX ‖ PATH
/// [COVENANTS]  COUNT ‖ (INDEX ‖ KIND ‖ NAME_LEN ‖ NAME)...
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ParseMeta {
    pub change: Option<ChangeMeta>,
    pub covenants: Vec<CovenantMeta>,
}

impl ParseMeta {
    pub fn flags(&self) -> ParseFlags {
        let mut f = ParseFlags::empty();
        f.set(ParseFlags::CHANGE, self.change.is_some());
        f.set(ParseFlags::COVENANTS, !self.covenants.is_empty());
        f
    }
}

impl Encode for ParseMeta {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut n = 1;
        if let Some(c) = &self.change {
            n += 1 + path::enc_len(&c.path)?;
        }
        if !self.covenants.is_empty() {
            n += 1;
            n += self
                .covenants
                .iter()
                .map(|c| 3 + c.name.len())
                .sum::<usize>();
        }
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut index = 0;

        put(buff, &mut index, &[self.flags().bits()])?;

        if let Some(c) = &self.change {
            put(buff, &mut index, &[c.index])?;
            index += path::enc(&c.path, &mut buff[index..])?;
        }

        if !self.covenants.is_empty() {
            if self.covenants.len() > u8::MAX as usize {
                return Err(ApduError::InvalidLength);
            }
            put(buff, &mut index, &[self.covenants.len() as u8])?;

            for c in &self.covenants {
                if c.name.len() > u8::MAX as usize {
                    return Err(ApduError::InvalidLength);
                }
                put(
                    buff,
                    &mut index,
                    &[c.index, c.kind as u8, c.name.len() as u8],
                )?;
                put(buff, &mut index, c.name.as_bytes())?;
            }
        }

        Ok(index)
    }
}

impl DecodeOwned for ParseMeta {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut index = 0;

        let flags = ParseFlags::from_bits(take(buff, &mut index, 1)?[0])
            .ok_or(ApduError::InvalidEncoding)?;

        let mut m = ParseMeta::default();

        if flags.contains(ParseFlags::CHANGE) {
            let i = take(buff, &mut index, 1)?[0];
            let (path, n) = path::dec(&buff[index..])?;
            index += n;
            m.change = Some(ChangeMeta { index: i, path });
        }

        if flags.contains(ParseFlags::COVENANTS) {
            let count = take(buff, &mut index, 1)?[0];
            for _ in 0..count {
                let h = take(buff, &mut index, 3)?;
                let (i, kind, len) = (h[0], h[1], h[2] as usize);

                let kind = CovenantKind::try_from(kind).map_err(|_| ApduError::InvalidEncoding)?;
                let name = core::str::from_utf8(take(buff, &mut index, len)?)
                    .map_err(|_| ApduError::InvalidUtf8)?;

                m.covenants.push(CovenantMeta {
                    index: i,
                    kind,
                    name: String::from(name),
                });
            }
        }

        Ok((m, index))
    }
}

#[cfg(test)]
mod test {
    use alloc::vec;

    use super::*;
    use crate::{path::path_from, test::encode_decode_resp, Command};

    #[test]
    fn parse_meta_empty() {
        let m = ParseMeta::default();
        assert_eq!(encode_decode_resp(&m), 1);
    }

    #[test]
    fn parse_meta_full() {
        let m = ParseMeta {
            change: Some(ChangeMeta {
                index: 1,
                path: path_from(&[0x8000_002c, 0x8000_0000, 0x8000_0000, 1, 0]).unwrap(),
            }),
            covenants: vec![
                CovenantMeta {
                    index: 0,
                    kind: CovenantKind::Open,
                    name: String::from("example"),
                },
                CovenantMeta {
                    index: 2,
                    kind: CovenantKind::Register,
                    name: String::from("my-name_2"),
                },
            ],
        };

        assert_eq!(m.flags(), ParseFlags::CHANGE | ParseFlags::COVENANTS);
        encode_decode_resp(&m);
    }

    #[test]
    fn parse_tx_req() {
        let c = Command::from_req(&ParseTxReq::new(true, vec![0x00, 0x02])).unwrap();
        assert_eq!(c.encode(), hex::decode("e0460100020002").unwrap());

        let c = Command::from_req(&ParseTxReq::new(false, vec![])).unwrap();
        assert_eq!(c.p1, ParseTxReq::P1_NEXT);
    }
}
