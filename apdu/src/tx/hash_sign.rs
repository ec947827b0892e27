// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};

use crate::{
    helpers::{put, take, take_arr},
    path::{self, Path},
    ApduError, ApduStatic, LegacyInstruction, BTC_APDU_CLA,
};

/// Hash sign APDU, requests a signature over the transaction hashed so far
///
/// ## Encoding
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                     PATH (depth ‖ u32be...)                   /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      0x00     |            LOCK_TIME (u32 big-endian)         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               |    SIGHASH    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The `0x00` byte is the (unused) user validation code length.
#[derive(Clone, PartialEq, Debug)]
pub struct HashSignReq {
    pub path: Path,
    pub lock_time: u32,
    pub sighash: u8,
}

impl HashSignReq {
    pub fn new(path: Path, lock_time: u32, sighash: u8) -> Self {
        Self {
            path,
            lock_time,
            sighash,
        }
    }
}

impl ApduStatic for HashSignReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Hash sign is legacy instruction `0x48`
    const INS: u8 = LegacyInstruction::HashSign as u8;
}

impl Encode for HashSignReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(path::enc_len(&self.path)? + 1 + 4 + 1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut index = path::enc(&self.path, buff)?;

        put(buff, &mut index, &[0x00])?;
        put(buff, &mut index, &self.lock_time.to_be_bytes())?;
        put(buff, &mut index, &[self.sighash])?;

        Ok(index)
    }
}

impl DecodeOwned for HashSignReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (path, mut index) = path::dec(buff)?;

        if take(buff, &mut index, 1)?[0] != 0x00 {
            return Err(ApduError::InvalidEncoding);
        }
        let lock_time = u32::from_be_bytes(take_arr(buff, &mut index)?);
        let sighash = take(buff, &mut index, 1)?[0];

        Ok((
            Self {
                path,
                lock_time,
                sighash,
            },
            index,
        ))
    }
}

/// DER signature response, followed by the sighash byte
///
/// Devices may set the low bit of the first DER byte to signal the
/// `R` parity, this is masked on decode.
#[derive(Clone, PartialEq, Debug)]
pub struct DerSignature {
    pub der: Vec<u8>,
    pub sighash: u8,
}

impl DerSignature {
    /// DER sequence tag
    pub const SEQUENCE: u8 = 0x30;
}

impl Encode for DerSignature {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.der.len() + 1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut index = 0;
        put(buff, &mut index, &self.der)?;
        put(buff, &mut index, &[self.sighash])?;
        Ok(index)
    }
}

impl DecodeOwned for DerSignature {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let (der, sighash) = buff.split_at(buff.len() - 1);

        let mut der = der.to_vec();
        der[0] &= 0xfe;

        if der[0] != Self::SEQUENCE {
            return Err(ApduError::InvalidEncoding);
        }

        Ok((
            Self {
                der,
                sighash: sighash[0],
            },
            buff.len(),
        ))
    }
}

#[cfg(test)]
mod test {
    use alloc::{borrow::ToOwned, vec};

    use super::*;
    use crate::{path::path_from, test::encode_decode_resp, Command};

    #[test]
    fn hash_sign_req() {
        let req = HashSignReq::new(path_from(&[0x8000_0000, 1]).unwrap(), 0x0102_0304, 0x01);

        let c = Command::from_req(&req).unwrap();
        assert_eq!(
            hex::encode(c.encode()),
            "e04800000f".to_owned() + "028000000000000001" + "00" + "01020304" + "01"
        );

        let (decoded, n) = HashSignReq::decode_owned(&c.data).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(n, c.data.len());
    }

    #[test]
    fn der_parity_masked() {
        let mut raw = vec![0x31, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01];
        raw.push(0x01);

        let (s, _) = DerSignature::decode_owned(&raw).unwrap();
        assert_eq!(s.der[0], 0x30);
        assert_eq!(s.sighash, 0x01);

        encode_decode_resp(&s);
    }

    #[test]
    fn der_rejects_garbage() {
        assert_eq!(
            DerSignature::decode_owned(&[0x10, 0x00, 0x01]),
            Err(ApduError::InvalidEncoding)
        );
        assert_eq!(
            DerSignature::decode_owned(&[0x01]),
            Err(ApduError::InvalidLength)
        );
    }
}
