// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Public key APDUs
//!
//! [PublicKeyReq] / [PublicKeyResp] for the unified protocol,
//! [WalletPublicKeyReq] / [WalletPublicKeyResp] for the legacy protocol.

use alloc::{string::String, vec::Vec};

use encdec::{DecodeOwned, Encode};
use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString};

use crate::{
    helpers::{put, take, take_arr},
    path::{self, Path},
    ApduError, ApduStatic, Instruction, LegacyInstruction, BTC_APDU_CLA,
};

/// Network selector bits, carried in `p1` for public key requests
#[derive(Copy, Clone, PartialEq, Debug, Display, EnumString, EnumIter, TryFromPrimitive)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum NetworkSelector {
    Main = 0x00,
    Testnet = 0x02,
    Regtest = 0x04,
    Simnet = 0x06,
}

impl Default for NetworkSelector {
    fn default() -> Self {
        Self::Main
    }
}

/// Confirm-on-device flag for `p1`
pub const P1_CONFIRM: u8 = 0x01;

bitflags::bitflags! {
    /// Optional public key response fields, carried in `p2`
    #[derive(Default)]
    pub struct KeyMode: u8 {
        /// Include chain code and parent fingerprint
        const XPUB = 0x01;
        /// Include the address for the key
        const ADDRESS = 0x02;
    }
}

/// Fetch public key APDU
///
/// ## Encoding
///
/// `p1 = confirm | network`, `p2 = mode`, data is the derivation path.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     DEPTH     |          PATH[0] (u32 big-endian)             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               |          ...                                  /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct PublicKeyReq {
    pub path: Path,
    pub confirm: bool,
    pub network: NetworkSelector,
    pub mode: KeyMode,
}

impl PublicKeyReq {
    pub fn new(path: Path, network: NetworkSelector, mode: KeyMode, confirm: bool) -> Self {
        Self {
            path,
            confirm,
            network,
            mode,
        }
    }
}

impl ApduStatic for PublicKeyReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Get public key is instruction `0x42`
    const INS: u8 = Instruction::GetPublicKey as u8;

    fn p1(&self) -> u8 {
        let c = match self.confirm {
            true => P1_CONFIRM,
            false => 0,
        };
        c | self.network as u8
    }

    fn p2(&self) -> u8 {
        self.mode.bits()
    }
}

impl Encode for PublicKeyReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        path::enc_len(&self.path)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        path::enc(&self.path, buff)
    }
}

/// Public key response APDU
///
/// Absent optional fields are encoded as zero length markers.
///
/// ## Encoding
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /               PUBLIC_KEY (33 bytes, compressed)               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    CC_LEN     |          CHAIN_CODE (0 or 32 bytes)           /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    FP_LEN     |          FINGERPRINT (0 or 4 bytes)           /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   ADDR_LEN    |          ADDRESS (ASCII)                      /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct PublicKeyResp {
    pub public_key: [u8; 33],
    pub chain_code: Option<[u8; 32]>,
    pub fingerprint: Option<[u8; 4]>,
    pub address: Option<String>,
}

impl PublicKeyResp {
    pub fn new(public_key: [u8; 33]) -> Self {
        Self {
            public_key,
            chain_code: None,
            fingerprint: None,
            address: None,
        }
    }
}

impl Encode for PublicKeyResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut n = 33 + 3;
        n += self.chain_code.map(|c| c.len()).unwrap_or(0);
        n += self.fingerprint.map(|f| f.len()).unwrap_or(0);
        n += self.address.as_ref().map(|a| a.len()).unwrap_or(0);
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut index = 0;

        put(buff, &mut index, &self.public_key)?;

        let cc = self.chain_code.as_ref().map(|c| &c[..]).unwrap_or(&[]);
        put(buff, &mut index, &[cc.len() as u8])?;
        put(buff, &mut index, cc)?;

        let fp = self.fingerprint.as_ref().map(|f| &f[..]).unwrap_or(&[]);
        put(buff, &mut index, &[fp.len() as u8])?;
        put(buff, &mut index, fp)?;

        let addr = self.address.as_deref().unwrap_or("");
        if addr.len() > u8::MAX as usize {
            return Err(ApduError::InvalidLength);
        }
        put(buff, &mut index, &[addr.len() as u8])?;
        put(buff, &mut index, addr.as_bytes())?;

        Ok(index)
    }
}

impl DecodeOwned for PublicKeyResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut index = 0;

        let public_key = take_arr::<33>(buff, &mut index)?;

        let chain_code = match take(buff, &mut index, 1)?[0] {
            0 => None,
            32 => Some(take_arr::<32>(buff, &mut index)?),
            _ => return Err(ApduError::InvalidEncoding),
        };

        let fingerprint = match take(buff, &mut index, 1)?[0] {
            0 => None,
            4 => Some(take_arr::<4>(buff, &mut index)?),
            _ => return Err(ApduError::InvalidEncoding),
        };

        let address = match take(buff, &mut index, 1)?[0] as usize {
            0 => None,
            n => {
                let a = take(buff, &mut index, n)?;
                let s = core::str::from_utf8(a).map_err(|_| ApduError::InvalidUtf8)?;
                Some(String::from(s))
            }
        };

        Ok((
            Self {
                public_key,
                chain_code,
                fingerprint,
                address,
            },
            index,
        ))
    }
}

/// Address format for legacy wallet public key requests, carried in `p2`
#[derive(Copy, Clone, PartialEq, Debug, Display, EnumString, EnumIter, TryFromPrimitive)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum AddressFormat {
    Legacy = 0x00,
    P2shP2wpkh = 0x01,
    Bech32 = 0x02,
}

impl Default for AddressFormat {
    fn default() -> Self {
        Self::Legacy
    }
}

/// Fetch wallet public key APDU (legacy protocol)
///
/// `p1 = confirm`, `p2 = address format`, data is the derivation path.
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKeyReq {
    pub path: Path,
    pub confirm: bool,
    pub format: AddressFormat,
}

impl WalletPublicKeyReq {
    pub fn new(path: Path, format: AddressFormat, confirm: bool) -> Self {
        Self {
            path,
            confirm,
            format,
        }
    }
}

impl ApduStatic for WalletPublicKeyReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Get wallet public key is legacy instruction `0x40`
    const INS: u8 = LegacyInstruction::GetWalletPublicKey as u8;

    fn p1(&self) -> u8 {
        self.confirm as u8
    }

    fn p2(&self) -> u8 {
        self.format as u8
    }
}

impl Encode for WalletPublicKeyReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        path::enc_len(&self.path)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        path::enc(&self.path, buff)
    }
}

/// Wallet public key response APDU (legacy protocol)
///
/// ## Encoding
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    PK_LEN     |      PUBLIC_KEY (65 bytes, uncompressed)      /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   ADDR_LEN    |      ADDRESS (ASCII)                          /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                      CHAIN_CODE (32 bytes)                    /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKeyResp {
    pub public_key: Vec<u8>,
    pub address: String,
    pub chain_code: [u8; 32],
}

impl Encode for WalletPublicKeyResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(2 + self.public_key.len() + self.address.len() + 32)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if self.public_key.len() > u8::MAX as usize || self.address.len() > u8::MAX as usize {
            return Err(ApduError::InvalidLength);
        }

        let mut index = 0;
        put(buff, &mut index, &[self.public_key.len() as u8])?;
        put(buff, &mut index, &self.public_key)?;
        put(buff, &mut index, &[self.address.len() as u8])?;
        put(buff, &mut index, self.address.as_bytes())?;
        put(buff, &mut index, &self.chain_code)?;

        Ok(index)
    }
}

impl DecodeOwned for WalletPublicKeyResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut index = 0;

        let n = take(buff, &mut index, 1)?[0] as usize;
        let public_key = take(buff, &mut index, n)?.to_vec();

        let n = take(buff, &mut index, 1)?[0] as usize;
        let a = take(buff, &mut index, n)?;
        let address = core::str::from_utf8(a).map_err(|_| ApduError::InvalidUtf8)?;

        let chain_code = take_arr::<32>(buff, &mut index)?;

        Ok((
            Self {
                public_key,
                address: String::from(address),
                chain_code,
            },
            index,
        ))
    }
}
