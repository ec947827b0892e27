// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Prelude to simplify downstream use of APDU objects
//!

pub use crate::{
    app_info::{AppVersion, AppVersionReq, FirmwareFlags, FirmwareVersion, FirmwareVersionReq},
    framing::{Framer, FramingError, Reassembler},
    path::{Path, HARDENED},
    public_key::{
        AddressFormat, KeyMode, NetworkSelector, PublicKeyReq, PublicKeyResp, WalletPublicKeyReq,
        WalletPublicKeyResp,
    },
    status::{StatusError, StatusWord},
    tx::{
        Ack, ChangeMeta, CompactSignature, CovenantKind, CovenantMeta, DerSignature,
        FinalizeKind, HashInputMode, HashInputStartReq, HashOutputFinalizeReq, HashSignReq,
        InputHeader, InputSignatureHeader, InputSignatureReq, ParseMeta, ParseTxReq,
        ParseTxResp, TrustedInput, TrustedInputReq,
    },
    Answer, ApduError, ApduReq, ApduStatic, Command, Protocol,
};
