// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device status words
//!
//! The final two bytes of every device reply. Anything other than
//! [StatusWord::Success] aborts the current operation.

use core::fmt::Display;

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter};

/// Message used for status codes missing from the [StatusWord] table
pub const UNKNOWN_STATUS: &str = "Unknown status code";

/// Known device status words
#[derive(Copy, Clone, PartialEq, Debug, Display, EnumIter, TryFromPrimitive)]
#[repr(u16)]
pub enum StatusWord {
    Success = 0x9000,
    DeviceLocked = 0x5515,
    IncorrectLength = 0x6700,
    SecurityStatusNotSatisfied = 0x6982,
    ConditionsNotSatisfied = 0x6985,
    IncorrectData = 0x6a80,
    FileNotFound = 0x6a82,
    NotEnoughMemory = 0x6a84,
    IncorrectP1P2 = 0x6b00,
    InsNotSupported = 0x6d00,
    ClaNotSupported = 0x6e00,
    AppNotOpen = 0x6e01,
    TechnicalProblem = 0x6f00,
    Halted = 0x6faa,
}

impl StatusWord {
    /// Human readable message for a status word
    pub const fn message(&self) -> &'static str {
        match self {
            StatusWord::Success => "Success",
            StatusWord::DeviceLocked => "Device is locked",
            StatusWord::IncorrectLength => "Incorrect length",
            StatusWord::SecurityStatusNotSatisfied => {
                "Security status not satisfied (canceled by user)"
            }
            StatusWord::ConditionsNotSatisfied => {
                "Conditions of use not satisfied (rejected by user)"
            }
            StatusWord::IncorrectData => "Invalid data",
            StatusWord::FileNotFound => "File not found",
            StatusWord::NotEnoughMemory => "Not enough memory space",
            StatusWord::IncorrectP1P2 => "Incorrect parameter P1 or P2",
            StatusWord::InsNotSupported => "Incorrect parameter INS",
            StatusWord::ClaNotSupported => "Incorrect parameter CLA",
            StatusWord::AppNotOpen => "App not open",
            StatusWord::TechnicalProblem => "Technical problem (internal error, please report)",
            StatusWord::Halted => "Ledger device halted",
        }
    }
}

/// Non-success status returned by the device
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StatusError {
    /// Raw status word
    pub code: u16,
}

impl StatusError {
    pub const fn new(code: u16) -> Self {
        Self { code }
    }

    /// Resolve the status word from the table, if known
    pub fn status(&self) -> Option<StatusWord> {
        StatusWord::try_from(self.code).ok()
    }

    /// Human readable message, falling back to [UNKNOWN_STATUS]
    pub fn message(&self) -> &'static str {
        match self.status() {
            Some(s) => s.message(),
            None => UNKNOWN_STATUS,
        }
    }

    /// Check whether this status indicates the user declined on-device
    pub fn is_user_rejection(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusWord::ConditionsNotSatisfied | StatusWord::SecurityStatusNotSatisfied)
        )
    }
}

impl From<StatusWord> for StatusError {
    fn from(s: StatusWord) -> Self {
        Self::new(s as u16)
    }
}

impl Display for StatusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} (0x{:04x})", self.message(), self.code)
    }
}

impl core::error::Error for StatusError {}

#[cfg(test)]
mod test {
    use alloc::string::ToString;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_status_has_message() {
        for s in StatusWord::iter() {
            let e = StatusError::from(s);
            assert_eq!(e.status(), Some(s));
            assert!(!e.message().is_empty());
            assert_ne!(e.message(), UNKNOWN_STATUS);
        }
    }

    #[test]
    fn unknown_status_falls_back() {
        for code in [0x0000, 0x1234, 0x6a81, 0xffff] {
            let e = StatusError::new(code);
            assert_eq!(e.status(), None);
            assert_eq!(e.message(), UNKNOWN_STATUS);
        }
    }

    #[test]
    fn status_display_includes_hex() {
        let e = StatusError::new(0x6985);
        assert_eq!(
            e.to_string(),
            "Conditions of use not satisfied (rejected by user) (0x6985)"
        );
        assert!(e.is_user_rejection());
    }
}
