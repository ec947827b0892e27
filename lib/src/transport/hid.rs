// Copyright (c) 2022-2023 The MobileCoin Foundation

//! HID transport, framing APDUs over fixed-size HID reports
//!
//! [HidTransport] is generic over [HidDevice] so the same framing and
//! deadline handling drives both native USB devices ([NativeHid]) and
//! in-process emulators.

use std::time::Duration;

use async_trait::async_trait;
use log::{trace, warn};
use tokio::time::Instant;

use ledger_btc_apdu::framing::{Framer, Reassembler, DEFAULT_CHANNEL, PACKET_SIZE, TAG_APDU};

use super::Exchange;
use crate::Error;

/// Packet-level HID device
#[async_trait]
pub trait HidDevice: Send {
    /// Open the device, discarding any stale reports
    async fn open(&mut self) -> Result<(), Error>;

    /// Close the device
    async fn close(&mut self) -> Result<(), Error>;

    /// Write a single (padded) report
    async fn write(&mut self, packet: &[u8]) -> Result<(), Error>;

    /// Read a single report, failing with [Error::RequestTimeout] once `timeout` elapses
    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, Error>;
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum HidState {
    Closed,
    Open,
    Poisoned,
}

/// HID transport over a [HidDevice]
pub struct HidTransport<D: HidDevice> {
    device: D,
    channel: u16,
    state: HidState,
}

impl<D: HidDevice> HidTransport<D> {
    /// Create a transport over an already open device, using the default channel
    pub fn new(device: D) -> Self {
        Self::with_channel(device, DEFAULT_CHANNEL)
    }

    /// Create a transport over an already open device with the provided channel
    pub fn with_channel(device: D, channel: u16) -> Self {
        Self {
            device,
            channel,
            state: HidState::Open,
        }
    }

    /// Check whether the transport has been poisoned
    pub fn is_poisoned(&self) -> bool {
        self.state == HidState::Poisoned
    }

    /// Access the underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the underlying device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    async fn write_apdu(&mut self, apdu: &[u8]) -> Result<(), Error> {
        let packets = Framer::new(self.channel, TAG_APDU).encode(apdu)?;

        for mut p in packets {
            p.resize(PACKET_SIZE, 0);
            self.device.write(&p).await?;
        }

        Ok(())
    }

    async fn read_answer(&mut self, deadline: Instant) -> Result<Vec<u8>, Error> {
        let mut r = Reassembler::new(self.channel, TAG_APDU);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::RequestTimeout);
            }

            let packet = self.device.read(remaining).await?;
            trace!("rx packet: {}", hex::encode(&packet));

            if r.push(&packet)? {
                return Ok(r.into_payload());
            }
        }
    }
}

#[async_trait]
impl<D: HidDevice> Exchange for HidTransport<D> {
    async fn open(&mut self) -> Result<(), Error> {
        self.device.open().await?;
        self.state = HidState::Open;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.state = HidState::Closed;
        self.device.close().await
    }

    async fn exchange(&mut self, apdu: &[u8], timeout: Duration) -> Result<Vec<u8>, Error> {
        match self.state {
            HidState::Open => (),
            HidState::Closed => return Err(Error::TransportClosed),
            HidState::Poisoned => return Err(Error::TransportPoisoned),
        }

        let deadline = Instant::now() + timeout;

        let r = match self.write_apdu(apdu).await {
            Ok(_) => self.read_answer(deadline).await,
            Err(e) => Err(e),
        };

        // Stale or partial reports may remain, block reuse until reopened
        if let Err(e) = &r {
            warn!("HID exchange failed ({}), poisoning transport", e);
            self.state = HidState::Poisoned;
        }

        r
    }
}

#[cfg(feature = "transport_hid")]
pub use native::NativeHid;

#[cfg(feature = "transport_hid")]
mod native {
    use std::time::Duration;

    use async_trait::async_trait;
    use hidapi::{DeviceInfo, HidApi, HidDevice as RawHidDevice};
    use log::debug;

    use ledger_btc_apdu::framing::PACKET_SIZE;

    use super::{HidDevice, HidTransport};
    use crate::Error;

    /// Ledger USB vendor ID
    pub const LEDGER_VID: u16 = 0x2c97;

    /// Ledger HID usage page
    pub const LEDGER_USAGE_PAGE: u16 = 0xffa0;

    /// Native USB HID device via `hidapi`
    pub struct NativeHid {
        device: RawHidDevice,
    }

    impl NativeHid {
        /// List connected ledger devices
        pub fn list_ledgers(api: &HidApi) -> impl Iterator<Item = &DeviceInfo> {
            api.device_list().filter(|d| {
                d.vendor_id() == LEDGER_VID
                    && (d.usage_page() == LEDGER_USAGE_PAGE || d.interface_number() == 0)
            })
        }

        /// Open a device and wrap it in a [HidTransport]
        pub fn open_device(api: &HidApi, info: &DeviceInfo) -> Result<HidTransport<Self>, Error> {
            debug!(
                "Opening HID device {:04x}:{:04x}",
                info.vendor_id(),
                info.product_id()
            );

            let device = info.open_device(api)?;
            device.set_blocking_mode(true)?;

            Ok(HidTransport::new(Self { device }))
        }

        fn drain(&self) -> Result<(), Error> {
            let mut buff = [0u8; PACKET_SIZE];
            while self.device.read_timeout(&mut buff, 0)? > 0 {}
            Ok(())
        }
    }

    #[async_trait]
    impl HidDevice for NativeHid {
        async fn open(&mut self) -> Result<(), Error> {
            self.drain()
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }

        async fn write(&mut self, packet: &[u8]) -> Result<(), Error> {
            // Prefix report ID
            let mut b = Vec::with_capacity(packet.len() + 1);
            b.push(0x00);
            b.extend_from_slice(packet);

            let n = self.device.write(&b)?;
            if n < packet.len() {
                return Err(Error::Transport(format!(
                    "short HID write ({n} of {} bytes)",
                    packet.len()
                )));
            }

            Ok(())
        }

        async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
            let mut buff = [0u8; PACKET_SIZE];

            let ms = timeout.as_millis().clamp(1, i32::MAX as u128) as i32;
            match self.device.read_timeout(&mut buff, ms)? {
                0 => Err(Error::RequestTimeout),
                n => Ok(buff[..n].to_vec()),
            }
        }
    }
}
