// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Application / firmware version APDUs

use core::fmt::Display;

use encdec::{DecodeOwned, Encode};

use super::{ApduError, ApduStatic, Instruction, LegacyInstruction, BTC_APDU_CLA};

/// Fetch application version APDU
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct AppVersionReq {}

impl ApduStatic for AppVersionReq {
    /// Bitcoin commands use class `0xe0`
    const CLA: u8 = BTC_APDU_CLA;

    /// Get app version is instruction `0x40`
    const INS: u8 = Instruction::GetAppVersion as u8;
}

impl Encode for AppVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

/// Application version response APDU
///
/// ## Encoding
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     MAJOR     |     MINOR     |     PATCH     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct AppVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl AppVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Display for AppVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Encode for AppVersion {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(3)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < 3 {
            return Err(ApduError::InvalidLength);
        }

        buff[..3].copy_from_slice(&[self.major, self.minor, self.patch]);

        Ok(3)
    }
}

impl DecodeOwned for AppVersion {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 3 {
            return Err(ApduError::InvalidLength);
        }

        Ok((Self::new(buff[0], buff[1], buff[2]), 3))
    }
}

/// Fetch firmware version APDU (legacy protocol)
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct FirmwareVersionReq {}

impl ApduStatic for FirmwareVersionReq {
    const CLA: u8 = BTC_APDU_CLA;

    /// Get firmware version is legacy instruction `0xc4`
    const INS: u8 = LegacyInstruction::GetFirmwareVersion as u8;
}

impl Encode for FirmwareVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

bitflags::bitflags! {
    /// Firmware feature flags
    pub struct FirmwareFlags: u8 {
        /// Public keys are returned in compressed form
        const COMPRESSED_KEYS = 1 << 0;
        /// Self screen button (Nano)
        const SCREEN_BUTTON = 1 << 1;
    }
}

/// Firmware version response APDU
///
/// ## Encoding
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAGS     |      ARCH     |     MAJOR     |     MINOR     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     PATCH     |
/// +-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FirmwareVersion {
    pub flags: FirmwareFlags,
    pub arch: u8,
    pub version: AppVersion,
}

impl Encode for FirmwareVersion {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(5)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < 5 {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = self.flags.bits();
        buff[1] = self.arch;
        self.version.encode(&mut buff[2..])?;

        Ok(5)
    }
}

impl DecodeOwned for FirmwareVersion {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 5 {
            return Err(ApduError::InvalidLength);
        }

        let (version, _) = AppVersion::decode_owned(&buff[2..])?;

        Ok((
            Self {
                flags: FirmwareFlags::from_bits_truncate(buff[0]),
                arch: buff[1],
                version,
            },
            5,
        ))
    }
}
