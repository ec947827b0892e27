// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / APDU definitions for Bitcoin hardware wallet communication
//!
//! This module provides the command codec and transport framing used to talk to
//! Bitcoin signing apps on Ledger-style secure elements.
//!
//! Two command tables exist for the same class byte: the four-phase [LegacyInstruction]
//! protocol (trusted inputs, `HASH_INPUT_START`, `HASH_INPUT_FINALIZE_FULL`, `HASH_SIGN`)
//! and the later [Instruction] protocol where a transaction is streamed with `PARSE_TX`
//! and each input signed with `GET_INPUT_SIGNATURE`. A client targets exactly one of
//! these, see [Protocol].
//!
//! Unlike the rest of the protocol, transaction fields (outpoints, amounts, scripts)
//! use Bitcoin consensus encoding (little-endian), while APDU-level integers such as
//! derivation path components and lock times are big-endian.
//!

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt::{Debug, Display};

use encdec::Encode;
use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString};

pub mod app_info;
pub mod framing;
pub mod helpers;
pub mod path;
pub mod prelude;
pub mod public_key;
pub mod status;
pub mod tx;

pub use status::{StatusError, StatusWord};

/// Maximum APDU data length (single byte length field)
pub const MAX_APDU_DATA: usize = 255;

/// APDU class bytes
#[derive(Copy, Clone, Debug, PartialEq, Display, EnumIter, TryFromPrimitive)]
#[repr(u8)]
pub enum Class {
    /// General class used by all Bitcoin app commands
    General = 0xe0,
}

/// Bitcoin APDU class
pub const BTC_APDU_CLA: u8 = Class::General as u8;

/// Instruction codes for the unified (`PARSE_TX` / `GET_INPUT_SIGNATURE`) protocol
#[derive(Copy, Clone, Debug, PartialEq, Display, EnumIter, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// Fetch application version
    GetAppVersion = 0x40,

    /// Fetch a public key (and optionally chain code / address)
    GetPublicKey = 0x42,

    /// Request a signature for a single input
    GetInputSignature = 0x44,

    /// Stream a transaction body for hashing
    ParseTx = 0x46,
}

/// Instruction codes for the four-phase legacy protocol
#[derive(Copy, Clone, Debug, PartialEq, Display, EnumIter, TryFromPrimitive)]
#[repr(u8)]
pub enum LegacyInstruction {
    /// Fetch wallet public key, address and chain code
    GetWalletPublicKey = 0x40,

    /// Fetch a trusted input for a previous transaction output
    GetTrustedInput = 0x42,

    /// Start streaming a transaction for hashing
    HashInputStart = 0x44,

    /// Sign the transaction hashed so far
    HashSign = 0x48,

    /// Stream transaction outputs and finalize hashing
    HashInputFinalizeFull = 0x4a,

    /// Fetch firmware / application version
    GetFirmwareVersion = 0xc4,
}

/// Signing protocol spoken by the device application
///
/// These are mutually incompatible, a client must be configured for one.
#[derive(Copy, Clone, Debug, PartialEq, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Protocol {
    /// Trusted input / hash input start / finalize / hash sign
    Legacy,
    /// Parse TX / get input signature
    #[default]
    Unified,
}

/// APDU encoding / decoding errors
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ApduError {
    /// Buffer or field length invalid
    InvalidLength,
    /// Field encoding invalid
    InvalidEncoding,
    /// String field not valid UTF8
    InvalidUtf8,
    /// Derivation path too long
    InvalidPath,
}

impl Display for ApduError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ApduError::InvalidLength => write!(f, "invalid length"),
            ApduError::InvalidEncoding => write!(f, "invalid encoding"),
            ApduError::InvalidUtf8 => write!(f, "invalid utf8"),
            ApduError::InvalidPath => write!(f, "invalid derivation path"),
        }
    }
}

impl core::error::Error for ApduError {}

impl From<encdec::Error> for ApduError {
    fn from(e: encdec::Error) -> Self {
        match e {
            encdec::Error::Length => ApduError::InvalidLength,
            _ => ApduError::InvalidEncoding,
        }
    }
}

/// Static APDU header information for request objects
pub trait ApduStatic {
    /// Class byte
    const CLA: u8;

    /// Instruction byte
    const INS: u8;

    /// First parameter, defaults to zero
    fn p1(&self) -> u8 {
        0
    }

    /// Second parameter, defaults to zero
    fn p2(&self) -> u8 {
        0
    }
}

/// Request object, encodable into a [Command]
pub trait ApduReq: ApduStatic + Encode<Error = ApduError> + Debug {}

impl<T: ApduStatic + Encode<Error = ApduError> + Debug> ApduReq for T {}

/// Raw APDU command
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      CLA      |      INS      |      P1       |      P2       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    DATA_LEN   |                                               |
/// +-+-+-+-+-+-+-+-+                                               +
/// /                      DATA (DATA_LEN bytes)                    /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct Command {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Command {
    /// Header length preceding command data
    pub const HEADER_LEN: usize = 5;

    /// Create a new command, checking the data length fits a single byte
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self, ApduError> {
        if data.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }

        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    /// Build a command from a request object
    pub fn from_req<R: ApduReq>(req: &R) -> Result<Self, ApduError> {
        let n = req.encode_len()?;
        if n > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }

        let mut data = alloc::vec![0u8; n];
        let m = req.encode(&mut data)?;
        data.truncate(m);

        Self::new(R::CLA, R::INS, req.p1(), req.p2(), data)
    }

    /// Encode command to wire format
    pub fn encode(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(Self::HEADER_LEN + self.data.len());
        b.extend_from_slice(&[
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            self.data.len() as u8,
        ]);
        b.extend_from_slice(&self.data);
        b
    }

    /// Decode command from wire format
    pub fn decode(buff: &[u8]) -> Result<Self, ApduError> {
        if buff.len() < Self::HEADER_LEN {
            return Err(ApduError::InvalidLength);
        }

        let n = buff[4] as usize;
        if buff.len() != Self::HEADER_LEN + n {
            return Err(ApduError::InvalidLength);
        }

        Self::new(buff[0], buff[1], buff[2], buff[3], buff[5..].to_vec())
    }
}

/// Raw APDU answer, payload followed by a big-endian status word
#[derive(Clone, PartialEq, Debug)]
pub struct Answer {
    pub status: u16,
    pub payload: Vec<u8>,
}

impl Answer {
    /// Create a new answer
    pub fn new(status: u16, payload: Vec<u8>) -> Self {
        Self { status, payload }
    }

    /// Create a successful answer with the provided payload
    pub fn ok(payload: Vec<u8>) -> Self {
        Self::new(StatusWord::Success as u16, payload)
    }

    /// Create an answer with a status and no payload
    pub fn status(status: StatusWord) -> Self {
        Self::new(status as u16, Vec::new())
    }

    /// Parse an answer from raw device bytes
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ApduError> {
        if raw.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let (payload, sw) = raw.split_at(raw.len() - 2);
        let status = u16::from_be_bytes([sw[0], sw[1]]);

        Ok(Self {
            status,
            payload: payload.to_vec(),
        })
    }

    /// Encode answer to wire format
    pub fn encode(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.payload.len() + 2);
        b.extend_from_slice(&self.payload);
        b.extend_from_slice(&self.status.to_be_bytes());
        b
    }

    /// Check the status word, returning the payload on success
    pub fn check(&self) -> Result<&[u8], StatusError> {
        match self.status == StatusWord::Success as u16 {
            true => Ok(&self.payload),
            false => Err(StatusError::new(self.status)),
        }
    }
}

/// Encode a response object into a successful [Answer]
pub fn encode_answer<E: Encode<Error = ApduError>>(resp: &E) -> Result<Answer, ApduError> {
    let mut payload = alloc::vec![0u8; resp.encode_len()?];
    let n = resp.encode(&mut payload)?;
    payload.truncate(n);
    Ok(Answer::ok(payload))
}
