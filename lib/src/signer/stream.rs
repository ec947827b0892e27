// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Chunk builders for streaming transactions to the device
//!
//! Each builder returns APDU-sized data chunks in send order, field boundaries
//! follow what the device parser expects.

use bitcoin::{consensus::encode::serialize, Script, Sequence, Transaction, TxOut};
use encdec::Encode;

use ledger_btc_apdu::{
    helpers::varint,
    path::{self, Path},
    tx::InputHeader,
    ApduError, MAX_APDU_DATA,
};

/// Split data into chunks of at most [MAX_APDU_DATA] bytes
pub(crate) fn split(data: &[u8]) -> Vec<Vec<u8>> {
    match data.is_empty() {
        true => vec![vec![]],
        false => data.chunks(MAX_APDU_DATA).map(|c| c.to_vec()).collect(),
    }
}

fn varint_vec(n: usize) -> Vec<u8> {
    let (b, len) = varint::to_bytes(n as u64);
    b[..len].to_vec()
}

/// `script ‖ sequence` split into chunks
fn script_chunks(script: &Script, sequence: Sequence) -> Vec<Vec<u8>> {
    let mut d = script.as_bytes().to_vec();
    d.extend_from_slice(&sequence.to_consensus_u32().to_le_bytes());
    split(&d)
}

/// Previous transaction chunks for a trusted input request
///
/// `vout(u32be) ‖ version ‖ varint(n_in)`, then per input `outpoint ‖
/// varint(script_len)` followed by `script ‖ sequence`, then `varint(n_out)`,
/// per output `value ‖ varint(script_len)` followed by the script, and finally
/// the lock time.
pub(crate) fn trusted_input_chunks(prev: &Transaction, vout: u32) -> Vec<Vec<u8>> {
    let mut chunks = vec![];

    let mut first = vout.to_be_bytes().to_vec();
    first.extend_from_slice(&serialize(&prev.version));
    first.extend_from_slice(&varint_vec(prev.input.len()));
    chunks.push(first);

    for i in &prev.input {
        let mut h = serialize(&i.previous_output);
        h.extend_from_slice(&varint_vec(i.script_sig.len()));
        chunks.push(h);

        chunks.extend(script_chunks(&i.script_sig, i.sequence));
    }

    chunks.push(varint_vec(prev.output.len()));

    for o in &prev.output {
        let mut h = serialize(&o.value);
        h.extend_from_slice(&varint_vec(o.script_pubkey.len()));
        chunks.push(h);

        if !o.script_pubkey.is_empty() {
            chunks.extend(split(o.script_pubkey.as_bytes()));
        }
    }

    chunks.push(serialize(&prev.lock_time));

    chunks
}

/// Input streamed with `HASH_INPUT_START`
pub(crate) struct StreamInput<'a> {
    pub header: InputHeader,
    pub script: &'a Script,
    pub sequence: Sequence,
}

/// Transaction chunks for `HASH_INPUT_START`
///
/// `version ‖ varint(n_in)`, then per input `header ‖ varint(script_len)`
/// followed by `script ‖ sequence`.
pub(crate) fn hash_input_chunks(
    version: &bitcoin::transaction::Version,
    inputs: &[StreamInput],
) -> Result<Vec<Vec<u8>>, ApduError> {
    let mut chunks = vec![];

    let mut first = serialize(version);
    first.extend_from_slice(&varint_vec(inputs.len()));
    chunks.push(first);

    for i in inputs {
        let mut h = vec![0u8; i.header.encode_len()?];
        let n = i.header.encode(&mut h)?;
        h.truncate(n);
        h.extend_from_slice(&varint_vec(i.script.len()));
        chunks.push(h);

        chunks.extend(script_chunks(i.script, i.sequence));
    }

    Ok(chunks)
}

/// Output chunks for `HASH_INPUT_FINALIZE_FULL`, `varint(n_out) ‖ outputs...`
pub(crate) fn output_chunks(outputs: &[TxOut]) -> Vec<Vec<u8>> {
    let mut d = varint_vec(outputs.len());
    for o in outputs {
        d.extend_from_slice(&serialize(o));
    }
    split(&d)
}

/// Encode a derivation path
pub(crate) fn path_bytes(p: &Path) -> Result<Vec<u8>, ApduError> {
    let mut b = vec![0u8; path::enc_len(p)?];
    let n = path::enc(p, &mut b)?;
    b.truncate(n);
    Ok(b)
}

/// Transaction body for `PARSE_TX`, without witness data
pub(crate) fn parse_body(tx: &Transaction) -> Vec<u8> {
    let mut t = tx.clone();
    for i in t.input.iter_mut() {
        i.witness.clear();
    }
    serialize(&t)
}

#[cfg(test)]
mod test {
    use bitcoin::{
        absolute::LockTime, hashes::Hash, transaction::Version, Amount, OutPoint, ScriptBuf,
        TxIn, Txid, Witness,
    };

    use super::*;

    fn tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 7),
                script_sig: ScriptBuf::from_bytes(vec![0x51; 300]),
                sequence: Sequence::MAX,
                witness: Witness::from_slice(&[vec![0x01]]),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x6a]),
            }],
        }
    }

    #[test]
    fn split_limits() {
        assert_eq!(split(&[]), vec![Vec::<u8>::new()]);
        assert_eq!(split(&[0u8; 255]).len(), 1);
        assert_eq!(split(&[0u8; 256]).len(), 2);
    }

    #[test]
    fn trusted_input_layout() {
        let t = tx();
        let c = trusted_input_chunks(&t, 1);

        // vout be ‖ version ‖ n_in
        assert_eq!(c[0], vec![0, 0, 0, 1, 2, 0, 0, 0, 1]);
        // outpoint ‖ varint(300)
        assert_eq!(c[1].len(), 36 + 3);
        // 300 byte script + sequence over two chunks
        assert_eq!(c[2].len() + c[3].len(), 304);
        // n_out, value ‖ script len, script, lock time
        assert_eq!(c[4], vec![1]);
        assert_eq!(c[5], vec![0xe8, 0x03, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(c[6], vec![0x6a]);
        assert_eq!(c[7], vec![0, 0, 0, 0]);

        // Chunks minus the vout prefix re-assemble the legacy serialization
        let joined: Vec<u8> = c.concat();
        assert_eq!(&joined[4..], &parse_body(&t)[..]);
    }

    #[test]
    fn parse_body_strips_witness() {
        let t = tx();
        let b = parse_body(&t);

        // No segwit marker after the version
        assert_eq!(b[4], 0x01);
    }
}
