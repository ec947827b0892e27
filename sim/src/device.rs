// Copyright (c) 2022-2023 The MobileCoin Foundation

//! In-process HID device backed by an [Engine]
//!
//! [SimDevice] implements [HidDevice] so the real [HidTransport](ledger_btc::transport::HidTransport)
//! framing and deadline handling is exercised in tests. [SimControl] drives
//! user approval and one-shot faults from the test side.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, warn};

use ledger_btc::{transport::HidDevice, Error};
use ledger_btc_apdu::framing::{Framer, Reassembler, DEFAULT_CHANNEL, PACKET_SIZE, TAG_APDU};

use crate::Engine;

/// One-shot fault applied to the next complete command
#[derive(Copy, Clone, Debug, PartialEq, strum::Display)]
pub enum Fault {
    /// Swallow the command without answering
    Stall,
    /// Answer with an out-of-order packet sequence number
    BadSequence,
    /// Answer with the provided status word
    Reject(u16),
}

struct Shared {
    engine: Engine,
    fault: Option<Fault>,
}

/// Control handle for a [SimDevice]
#[derive(Clone)]
pub struct SimControl {
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // Poisoning only follows a panic elsewhere in the test
    match shared.lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

impl SimControl {
    /// Create a control handle owning the provided engine
    pub fn new(engine: Engine) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                engine,
                fault: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    /// Handle a raw APDU, applying any armed fault
    ///
    /// Returns `None` where the command is swallowed, along with any fault
    /// left for the framing layer.
    pub(crate) fn process(&self, apdu: &[u8]) -> (Option<Vec<u8>>, Option<Fault>) {
        let mut g = self.lock();

        match g.fault.take() {
            Some(Fault::Stall) => {
                warn!("Stalling command");
                (None, None)
            }
            Some(Fault::Reject(sw)) => {
                warn!("Rejecting command with status {:04x}", sw);
                (Some(sw.to_be_bytes().to_vec()), None)
            }
            f => (Some(g.engine.handle(apdu)), f),
        }
    }

    /// Approve (or decline) subsequent on-device confirmations
    pub fn set_approve(&self, approve: bool) {
        self.lock().engine.set_approve(approve);
    }

    /// Arm a fault for the next command
    pub fn set_fault(&self, fault: Fault) {
        self.lock().fault = Some(fault);
    }

    /// Limit bytes consumed per `PARSE_TX` chunk
    pub fn set_parse_limit(&self, limit: usize) {
        self.lock().engine.set_parse_limit(limit);
    }

    /// Instruction codes handled so far
    pub fn instructions(&self) -> Vec<u8> {
        self.lock().engine.instructions().to_vec()
    }

    /// Count handled commands with the provided instruction code
    pub fn count(&self, ins: u8) -> usize {
        self.lock().engine.count(ins)
    }
}

/// Emulated HID device
pub struct SimDevice {
    control: SimControl,
    channel: u16,
    rx: VecDeque<Vec<u8>>,
    reassembler: Reassembler,
    open: bool,
}

impl SimDevice {
    /// Create a new device wrapping the provided engine
    pub fn new(engine: Engine) -> Self {
        Self::with_control(SimControl::new(engine))
    }

    /// Create a new device sharing engine state with an existing control handle
    pub fn with_control(control: SimControl) -> Self {
        Self {
            control,
            channel: DEFAULT_CHANNEL,
            rx: VecDeque::new(),
            reassembler: Reassembler::new(DEFAULT_CHANNEL, TAG_APDU),
            open: true,
        }
    }

    /// Fetch a control handle for this device
    pub fn control(&self) -> SimControl {
        self.control.clone()
    }

    fn process(&mut self, apdu: &[u8]) -> Result<(), Error> {
        let (answer, fault) = match self.control.process(apdu) {
            (Some(a), f) => (a, f),
            (None, _) => return Ok(()),
        };

        let mut packets = Framer::new(self.channel, TAG_APDU).encode(&answer)?;

        if let (Some(Fault::BadSequence), Some(p)) = (fault, packets.first_mut()) {
            warn!("Corrupting answer sequence");
            p[3..5].copy_from_slice(&1u16.to_be_bytes());
        }

        for mut p in packets {
            p.resize(PACKET_SIZE, 0);
            self.rx.push_back(p);
        }

        Ok(())
    }
}

#[async_trait]
impl HidDevice for SimDevice {
    async fn open(&mut self) -> Result<(), Error> {
        debug!("Opening emulated device");

        self.rx.clear();
        self.reassembler = Reassembler::new(self.channel, TAG_APDU);
        self.open = true;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.open = false;
        Ok(())
    }

    async fn write(&mut self, packet: &[u8]) -> Result<(), Error> {
        if !self.open {
            return Err(Error::TransportClosed);
        }

        if !self.reassembler.push(packet)? {
            return Ok(());
        }

        let r = std::mem::replace(
            &mut self.reassembler,
            Reassembler::new(self.channel, TAG_APDU),
        );

        self.process(&r.into_payload())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
        if !self.open {
            return Err(Error::TransportClosed);
        }

        match self.rx.pop_front() {
            Some(p) => Ok(p),
            None => {
                tokio::time::sleep(timeout).await;
                Err(Error::RequestTimeout)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use ledger_btc::{
        transport::{Exchange, HidTransport},
        DeviceHandle, HandleConfig,
    };
    use ledger_btc_apdu::Protocol;

    use super::*;

    fn device() -> SimDevice {
        SimDevice::new(Engine::new(&[0x33; 32], Protocol::Unified).unwrap())
    }

    #[tokio::test]
    async fn exchange_version() {
        let mut t = HidTransport::new(device());

        let raw = t
            .exchange(&[0xe0, 0x40, 0x00, 0x00, 0x00], Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(raw, vec![2, 1, 0, 0x90, 0x00]);
    }

    #[tokio::test]
    async fn faults_are_one_shot() {
        let d = device();
        let c = d.control();
        let h = DeviceHandle::new(HidTransport::new(d), HandleConfig::default());

        c.set_fault(Fault::Reject(0x6a80));
        let r = h.app_version().await;
        assert_eq!(r.unwrap_err().status().map(|s| s.code), Some(0x6a80));

        h.app_version().await.unwrap();

        // Rejected command never reached the engine
        assert_eq!(c.instructions(), vec![0x40]);
    }
}
