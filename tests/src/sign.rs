// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction signing tests
//!
//! Each test builds funding and spending transactions for keys held by the
//! reference [Wallet], signs on the device, and checks both the signatures
//! and the resulting `script_sig` / witness stacks.

use bitcoin::{Script, ScriptBuf, Transaction};
use log::info;

use ledger_btc::{
    script::{items_script, multisig as multisig_script, p2pkh, p2sh, p2wpkh, p2wsh, script_items},
    DeviceHandle, Exchange, InputSignature, LedgerInput, SignOptions,
};

use crate::fixtures::{
    coin, foreign_key, funding_tx, outputs, path, spend_tx, verify, verify_spend, Wallet,
};

/// Multisig output wrapping
#[derive(Clone, Copy, PartialEq, Debug, strum::Display, strum::EnumIter, clap::ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum Multisig {
    /// Bare P2SH
    P2sh,
    /// Native P2WSH
    P2wsh,
    /// P2WSH nested in P2SH
    P2shP2wsh,
}

impl Multisig {
    /// Output script paying to `redeem`
    pub fn script_pubkey(&self, redeem: &Script) -> ScriptBuf {
        match self {
            Self::P2sh => p2sh(redeem),
            Self::P2wsh => p2wsh(redeem),
            Self::P2shP2wsh => p2sh(&p2wsh(redeem)),
        }
    }

    /// Signatures are carried in the witness
    pub fn is_witness(&self) -> bool {
        !matches!(self, Self::P2sh)
    }
}

/// Spend a single P2PKH output
pub async fn legacy<T: Exchange>(h: &DeviceHandle<T>, wallet: &Wallet) -> anyhow::Result<()> {
    let path = path("m/44'/0'/0'/0/0")?;
    let pk = wallet.public_key(&path)?;

    let prev = funding_tx(p2pkh(&pk), 100_000, 1);
    let (outpoint, txout) = coin(&prev);

    let (outs, _change) = outputs(wallet, 100_000)?;
    let mut tx = spend_tx(&[outpoint], outs);

    let mut inputs =
        [LedgerInput::new(path, outpoint, txout.clone()).with_prev_tx(prev.clone())];

    let sigs = h.sign_transaction(&mut tx, &mut inputs).await?;
    info!("signed {} input(s)", sigs.len());

    assert_eq!(sigs.len(), 1);
    let s = &sigs[0];

    info!("signature: {}", hex::encode(s.signature.to_vec()));

    assert_eq!(s.index, 0);
    assert_eq!(s.public_key, pk);
    verify(&tx, s, &txout.script_pubkey, txout.value, false)?;
    verify_spend(&tx, &[(outpoint, txout)])?;

    assert_eq!(
        script_items(&tx.input[0].script_sig),
        Some(vec![s.signature.to_vec(), pk.to_bytes().to_vec()])
    );
    assert!(tx.input[0].witness.is_empty());

    Ok(())
}

/// Spend a single P2WPKH output, flagging the change output
pub async fn segwit<T: Exchange>(h: &DeviceHandle<T>, wallet: &Wallet) -> anyhow::Result<()> {
    let path = path("m/84'/0'/0'/0/0")?;
    let pk = wallet.public_key(&path)?;

    let prev = funding_tx(p2wpkh(&pk), 250_000, 2);
    let (outpoint, txout) = coin(&prev);

    let (outs, change) = outputs(wallet, 250_000)?;
    let mut tx = spend_tx(&[outpoint], outs);

    let mut inputs = [LedgerInput::new(path, outpoint, txout.clone())];
    let opts = SignOptions {
        change: Some(change),
        ..Default::default()
    };

    let sigs = h.sign_transaction_with(&mut tx, &mut inputs, &opts).await?;

    assert_eq!(sigs.len(), 1);
    let s = &sigs[0];

    verify(&tx, s, &p2pkh(&pk), txout.value, true)?;
    verify_spend(&tx, &[(outpoint, txout)])?;

    assert!(tx.input[0].script_sig.is_empty());
    assert_eq!(
        tx.input[0].witness.to_vec(),
        vec![s.signature.to_vec(), pk.to_bytes().to_vec()]
    );

    Ok(())
}

/// Spend a P2SH-wrapped P2WPKH output
pub async fn nested<T: Exchange>(h: &DeviceHandle<T>, wallet: &Wallet) -> anyhow::Result<()> {
    let path = path("m/49'/0'/0'/0/0")?;
    let pk = wallet.public_key(&path)?;
    let program = p2wpkh(&pk);

    let prev = funding_tx(p2sh(&program), 75_000, 3);
    let (outpoint, txout) = coin(&prev);

    let (outs, _change) = outputs(wallet, 75_000)?;
    let mut tx = spend_tx(&[outpoint], outs);

    let mut inputs = [LedgerInput::new(path, outpoint, txout.clone())];
    let sigs = h.sign_transaction(&mut tx, &mut inputs).await?;

    assert_eq!(sigs.len(), 1);
    let s = &sigs[0];

    verify(&tx, s, &p2pkh(&pk), txout.value, true)?;
    verify_spend(&tx, &[(outpoint, txout)])?;

    assert_eq!(
        tx.input[0].script_sig,
        items_script(&[program.to_bytes()])?
    );
    assert_eq!(
        tx.input[0].witness.to_vec(),
        vec![s.signature.to_vec(), pk.to_bytes().to_vec()]
    );

    Ok(())
}

/// Spend P2PKH and P2WPKH outputs in a single transaction
pub async fn mixed<T: Exchange>(h: &DeviceHandle<T>, wallet: &Wallet) -> anyhow::Result<()> {
    let legacy_path = path("m/44'/0'/0'/0/1")?;
    let legacy_key = wallet.public_key(&legacy_path)?;
    let segwit_path = path("m/84'/0'/0'/0/1")?;
    let segwit_key = wallet.public_key(&segwit_path)?;

    let legacy_prev = funding_tx(p2pkh(&legacy_key), 40_000, 4);
    let segwit_prev = funding_tx(p2wpkh(&segwit_key), 60_000, 5);
    let (legacy_outpoint, legacy_coin) = coin(&legacy_prev);
    let (segwit_outpoint, segwit_coin) = coin(&segwit_prev);

    let (outs, change) = outputs(wallet, 100_000)?;
    let mut tx = spend_tx(&[legacy_outpoint, segwit_outpoint], outs);

    // Descriptor order differs from input order
    let mut inputs = [
        LedgerInput::new(segwit_path, segwit_outpoint, segwit_coin.clone()),
        LedgerInput::new(legacy_path, legacy_outpoint, legacy_coin.clone())
            .with_prev_tx(legacy_prev.clone()),
    ];
    let opts = SignOptions {
        change: Some(change),
        ..Default::default()
    };

    let sigs = h.sign_transaction_with(&mut tx, &mut inputs, &opts).await?;

    assert_eq!(sigs.len(), 2);
    assert_eq!(sigs[0].index, 1);
    assert_eq!(sigs[1].index, 0);

    verify(&tx, &sigs[0], &p2pkh(&segwit_key), segwit_coin.value, true)?;
    verify(&tx, &sigs[1], &legacy_coin.script_pubkey, legacy_coin.value, false)?;
    verify_spend(
        &tx,
        &[(legacy_outpoint, legacy_coin), (segwit_outpoint, segwit_coin)],
    )?;

    assert_eq!(
        script_items(&tx.input[0].script_sig),
        Some(vec![sigs[1].signature.to_vec(), legacy_key.to_bytes().to_vec()])
    );
    assert_eq!(
        tx.input[1].witness.to_vec(),
        vec![sigs[0].signature.to_vec(), segwit_key.to_bytes().to_vec()]
    );

    Ok(())
}

/// Spend witness, legacy and witness inputs in that order
///
/// The legacy input in the middle resets segwit hashing state on legacy
/// devices, so the final witness input needs the transaction streamed again.
pub async fn interleaved<T: Exchange>(
    h: &DeviceHandle<T>,
    wallet: &Wallet,
) -> anyhow::Result<()> {
    let paths = [
        path("m/84'/0'/0'/0/6")?,
        path("m/44'/0'/0'/0/6")?,
        path("m/84'/0'/0'/0/7")?,
    ];
    let keys = [
        wallet.public_key(&paths[0])?,
        wallet.public_key(&paths[1])?,
        wallet.public_key(&paths[2])?,
    ];

    let prevs = [
        funding_tx(p2wpkh(&keys[0]), 20_000, 11),
        funding_tx(p2pkh(&keys[1]), 30_000, 12),
        funding_tx(p2wpkh(&keys[2]), 50_000, 13),
    ];
    let coins: Vec<_> = prevs.iter().map(coin).collect();
    let outpoints: Vec<_> = coins.iter().map(|(o, _)| *o).collect();

    let (outs, _change) = outputs(wallet, 100_000)?;
    let mut tx = spend_tx(&outpoints, outs);

    let mut inputs = [
        LedgerInput::new(paths[0].clone(), coins[0].0, coins[0].1.clone()),
        LedgerInput::new(paths[1].clone(), coins[1].0, coins[1].1.clone())
            .with_prev_tx(prevs[1].clone()),
        LedgerInput::new(paths[2].clone(), coins[2].0, coins[2].1.clone()),
    ];

    let sigs = h.sign_transaction(&mut tx, &mut inputs).await?;
    assert_eq!(sigs.len(), 3);

    for (i, s) in sigs.iter().enumerate() {
        assert_eq!(s.index, i);
        assert_eq!(s.public_key, keys[i]);
    }

    verify(&tx, &sigs[2], &p2pkh(&keys[2]), coins[2].1.value, true)?;
    verify_spend(&tx, &coins)?;

    Ok(())
}

/// Co-sign a 2-of-3 multisig output over two signing calls
///
/// The first call templates the stack with an empty slot per key, the second
/// fills the threshold and collapses it to `[OP_0, sig_1, sig_2, redeem]`.
/// The spend only passes script verification once both signatures are in.
pub async fn multisig<T: Exchange>(
    h: &DeviceHandle<T>,
    wallet: &Wallet,
    kind: Multisig,
) -> anyhow::Result<()> {
    let paths = [path("m/48'/0'/0'/2'/0/0")?, path("m/48'/0'/0'/2'/0/1")?];
    let keys = [
        wallet.public_key(&paths[0])?,
        wallet.public_key(&paths[1])?,
        foreign_key(0x07),
    ];

    let redeem = multisig_script(2, &keys);
    let witness = kind.is_witness();

    let prev = funding_tx(kind.script_pubkey(&redeem), 500_000, 6);
    let (outpoint, txout) = coin(&prev);
    let coins = [(outpoint, txout.clone())];

    let (outs, _change) = outputs(wallet, 500_000)?;
    let mut tx = spend_tx(&[outpoint], outs);

    let stack = |tx: &Transaction| -> Option<Vec<Vec<u8>>> {
        match witness {
            true => Some(tx.input[0].witness.to_vec()),
            false => script_items(&tx.input[0].script_sig),
        }
    };

    let mut signatures: Vec<InputSignature> = vec![];

    for (i, p) in paths.iter().enumerate() {
        info!("co-signing {} with key {}", kind, i);

        let mut inputs = [LedgerInput::new(p.clone(), outpoint, txout.clone())
            .with_redeem(redeem.clone())];

        let mut sigs = h.sign_transaction(&mut tx, &mut inputs).await?;
        assert_eq!(sigs.len(), 1);

        let s = sigs.remove(0);
        assert_eq!(s.public_key, keys[i]);
        verify(&tx, &s, &redeem, txout.value, witness)?;

        signatures.push(s);

        let expected = match i {
            0 => vec![
                vec![],
                signatures[0].signature.to_vec(),
                vec![],
                vec![],
                redeem.to_bytes(),
            ],
            _ => vec![
                vec![],
                signatures[0].signature.to_vec(),
                signatures[1].signature.to_vec(),
                redeem.to_bytes(),
            ],
        };

        assert_eq!(stack(&tx), Some(expected));

        match i {
            0 => assert!(
                verify_spend(&tx, &coins).is_err(),
                "{kind}: spend verified with a single signature"
            ),
            _ => verify_spend(&tx, &coins)?,
        }
    }

    match kind {
        Multisig::P2sh => assert!(tx.input[0].witness.is_empty()),
        Multisig::P2wsh => assert!(tx.input[0].script_sig.is_empty()),
        Multisig::P2shP2wsh => assert_eq!(
            tx.input[0].script_sig,
            items_script(&[p2wsh(&redeem).to_bytes()])?
        ),
    }

    Ok(())
}
