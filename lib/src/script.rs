// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Script construction and signature templating helpers
//!
//! Stacks are modelled as `Vec<Vec<u8>>` so the same templating applies to
//! `script_sig` pushes and witness elements.

use bitcoin::{
    hashes::{hash160, sha256, Hash},
    opcodes::{
        all::{OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160},
        OP_0,
    },
    script::{Builder, Instruction, PushBytesBuf, PushBytesError},
    CompressedPublicKey, PublicKey, Script, ScriptBuf,
};

/// First `OP_PUSHNUM_N` opcode (`OP_1`)
const OP_PUSHNUM_BASE: u8 = 0x50;

/// Pay to public key hash script for a compressed key
pub fn p2pkh(pk: &CompressedPublicKey) -> ScriptBuf {
    let h = hash160::Hash::hash(&pk.to_bytes()).to_byte_array();

    Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(h)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Version 0 pay to witness public key hash program
pub fn p2wpkh(pk: &CompressedPublicKey) -> ScriptBuf {
    let h = hash160::Hash::hash(&pk.to_bytes()).to_byte_array();

    Builder::new().push_opcode(OP_0).push_slice(h).into_script()
}

/// Pay to script hash for the provided redeem script
pub fn p2sh(redeem: &Script) -> ScriptBuf {
    let h = hash160::Hash::hash(redeem.as_bytes()).to_byte_array();

    Builder::new()
        .push_opcode(OP_HASH160)
        .push_slice(h)
        .push_opcode(OP_EQUAL)
        .into_script()
}

/// Version 0 pay to witness script hash program
pub fn p2wsh(witness_script: &Script) -> ScriptBuf {
    let h = sha256::Hash::hash(witness_script.as_bytes()).to_byte_array();

    Builder::new().push_opcode(OP_0).push_slice(h).into_script()
}

/// Build an `m`-of-`n` bare multisig script
pub fn multisig(m: usize, keys: &[CompressedPublicKey]) -> ScriptBuf {
    let mut b = Builder::new().push_int(m as i64);

    for k in keys {
        b = b.push_key(&PublicKey::new(k.0));
    }

    b.push_int(keys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Parse a bare multisig script, returning the threshold and keys
pub fn parse_multisig(script: &Script) -> Option<(usize, Vec<CompressedPublicKey>)> {
    let mut items = vec![];
    for i in script.instructions() {
        items.push(i.ok()?);
    }

    // m ‖ keys... ‖ n ‖ OP_CHECKMULTISIG
    if items.len() < 4 {
        return None;
    }

    let m = small_int(&items[0])?;
    let n = small_int(&items[items.len() - 2])?;

    match items.last() {
        Some(Instruction::Op(op)) if *op == OP_CHECKMULTISIG => (),
        _ => return None,
    }

    let mut keys = Vec::with_capacity(n);
    for i in &items[1..items.len() - 2] {
        match i {
            Instruction::PushBytes(b) => {
                keys.push(CompressedPublicKey::from_slice(b.as_bytes()).ok()?)
            }
            _ => return None,
        }
    }

    if m == 0 || m > n || keys.len() != n {
        return None;
    }

    Some((m, keys))
}

fn small_int(i: &Instruction) -> Option<usize> {
    match i {
        Instruction::Op(op) => match op.to_u8() {
            v @ 0x51..=0x60 => Some((v - OP_PUSHNUM_BASE) as usize),
            _ => None,
        },
        _ => None,
    }
}

/// Split a push-only script into its pushed items
///
/// `OP_0` yields an empty item.
pub fn script_items(script: &Script) -> Option<Vec<Vec<u8>>> {
    let mut items = vec![];

    for i in script.instructions() {
        match i.ok()? {
            Instruction::PushBytes(b) => items.push(b.as_bytes().to_vec()),
            Instruction::Op(op) => match small_int(&Instruction::Op(op)) {
                Some(v) => items.push(vec![v as u8]),
                None => return None,
            },
        }
    }

    Some(items)
}

/// Build a push-only script from stack items
pub fn items_script(items: &[Vec<u8>]) -> Result<ScriptBuf, PushBytesError> {
    let mut b = Builder::new();

    for i in items {
        b = b.push_slice(PushBytesBuf::try_from(i.clone())?);
    }

    Ok(b.into_script())
}

/// Place a signature into a multisig stack
///
/// Fresh stacks start as `[OP_0, slot_1..slot_n, redeem]` with an empty slot per
/// key. Once `m` slots are filled the stack collapses to `[OP_0, sig..., redeem]`
/// in key order. Stacks already collapsed are returned unchanged.
pub fn apply_multisig(
    stack: &[Vec<u8>],
    redeem: &Script,
    m: usize,
    n: usize,
    key_index: usize,
    signature: Vec<u8>,
) -> Vec<Vec<u8>> {
    let redeem = redeem.as_bytes().to_vec();

    let templated = stack.len() == n + 2 && stack[0].is_empty() && stack[n + 1] == redeem;
    let collapsed = !templated && stack.len() >= 2 && stack.last() == Some(&redeem);

    if collapsed {
        return stack.to_vec();
    }

    let mut slots = match templated {
        true => stack[1..n + 1].to_vec(),
        false => vec![vec![]; n],
    };

    slots[key_index] = signature;

    let filled: Vec<_> = slots.iter().filter(|s| !s.is_empty()).cloned().collect();

    let mut out = vec![vec![]];
    match filled.len() >= m {
        true => out.extend(filled.into_iter().take(m)),
        false => out.extend(slots),
    }
    out.push(redeem);

    out
}
