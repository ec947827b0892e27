// Copyright (c) 2022-2023 The MobileCoin Foundation

//! HID packet framing
//!
//! APDUs are split into fixed size HID reports, each prefixed with a channel
//! identifier, a tag and a sequence number. The first packet additionally
//! carries the total payload length.
//!
//! ## Packet encoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            CHANNEL            |      TAG      |   SEQUENCE    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  SEQUENCE     |   TOTAL_LEN (first packet only)   |           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+           +
//! /                         PAYLOAD...                            /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All header fields are big-endian.

use alloc::vec::Vec;
use core::fmt::Display;

use byteorder::{BigEndian, ByteOrder};

#[cfg(feature = "log")]
use log::trace;

/// HID report size
pub const PACKET_SIZE: usize = 64;

/// Header length (channel, tag, sequence)
pub const HEADER_LEN: usize = 5;

/// Payload carried by the first packet
pub const FIRST_PAYLOAD: usize = PACKET_SIZE - HEADER_LEN - 2;

/// Payload carried by subsequent packets
pub const NEXT_PAYLOAD: usize = PACKET_SIZE - HEADER_LEN;

/// Default session channel
pub const DEFAULT_CHANNEL: u16 = 0x0101;

/// Tag for APDU packets
pub const TAG_APDU: u8 = 0x05;

/// Tag for keep-alive packets
pub const TAG_PING: u8 = 0x02;

/// Packet framing errors
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FramingError {
    /// Packet too short to contain a header
    ShortPacket(usize),
    /// Packet received on an unexpected channel
    ChannelMismatch { expected: u16, actual: u16 },
    /// Packet received with an unexpected tag
    TagMismatch { expected: u8, actual: u8 },
    /// Sequence number gap
    SequenceMismatch { expected: u16, actual: u16 },
    /// Payload exceeds the maximum framed length
    PayloadTooLong(usize),
    /// Packet received after the payload was completed
    UnexpectedPacket,
}

impl Display for FramingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FramingError::ShortPacket(n) => write!(f, "packet too short ({n} bytes)"),
            FramingError::ChannelMismatch { expected, actual } => write!(
                f,
                "channel mismatch (expected 0x{expected:04x}, got 0x{actual:04x})"
            ),
            FramingError::TagMismatch { expected, actual } => write!(
                f,
                "tag mismatch (expected 0x{expected:02x}, got 0x{actual:02x})"
            ),
            FramingError::SequenceMismatch { expected, actual } => {
                write!(f, "sequence mismatch (expected {expected}, got {actual})")
            }
            FramingError::PayloadTooLong(n) => write!(f, "payload too long ({n} bytes)"),
            FramingError::UnexpectedPacket => write!(f, "unexpected packet after completion"),
        }
    }
}

impl core::error::Error for FramingError {}

/// Number of packets required to frame a payload of `len` bytes
pub const fn packet_count(len: usize) -> usize {
    let n = (len + 2 + NEXT_PAYLOAD - 1) / NEXT_PAYLOAD;
    if n == 0 {
        1
    } else {
        n
    }
}

/// Splits payloads into unpadded packets
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Framer {
    channel: u16,
    tag: u8,
}

impl Framer {
    pub const fn new(channel: u16, tag: u8) -> Self {
        Self { channel, tag }
    }

    /// Split a payload into packets, padding is left to the transport
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        if payload.len() > u16::MAX as usize {
            return Err(FramingError::PayloadTooLong(payload.len()));
        }

        let count = packet_count(payload.len());
        let mut packets = Vec::with_capacity(count);
        let mut offset = 0;

        for seq in 0..count {
            let mut p = Vec::with_capacity(PACKET_SIZE);
            let mut h = [0u8; HEADER_LEN];
            BigEndian::write_u16(&mut h[0..], self.channel);
            h[2] = self.tag;
            BigEndian::write_u16(&mut h[3..], seq as u16);
            p.extend_from_slice(&h);

            let max = match seq {
                0 => {
                    let mut l = [0u8; 2];
                    BigEndian::write_u16(&mut l, payload.len() as u16);
                    p.extend_from_slice(&l);
                    FIRST_PAYLOAD
                }
                _ => NEXT_PAYLOAD,
            };

            let n = max.min(payload.len() - offset);
            p.extend_from_slice(&payload[offset..][..n]);
            offset += n;

            packets.push(p);
        }

        #[cfg(feature = "log")]
        trace!("framed {} bytes into {} packets", payload.len(), packets.len());

        Ok(packets)
    }
}

/// Incrementally reassembles a payload from packets
#[derive(Clone, Debug, PartialEq)]
pub struct Reassembler {
    channel: u16,
    tag: u8,
    seq: u16,
    total: Option<usize>,
    payload: Vec<u8>,
}

impl Reassembler {
    pub fn new(channel: u16, tag: u8) -> Self {
        Self {
            channel,
            tag,
            seq: 0,
            total: None,
            payload: Vec::new(),
        }
    }

    /// Check whether the full payload has been received
    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(t) if self.payload.len() == t)
    }

    /// Consume a packet, returning `true` once the payload is complete
    pub fn push(&mut self, packet: &[u8]) -> Result<bool, FramingError> {
        if packet.len() < HEADER_LEN {
            return Err(FramingError::ShortPacket(packet.len()));
        }

        let channel = BigEndian::read_u16(&packet[0..]);
        if channel != self.channel {
            return Err(FramingError::ChannelMismatch {
                expected: self.channel,
                actual: channel,
            });
        }

        let tag = packet[2];
        if tag == TAG_PING && tag != self.tag {
            #[cfg(feature = "log")]
            trace!("skipping keep-alive packet");
            return Ok(false);
        }
        if tag != self.tag {
            return Err(FramingError::TagMismatch {
                expected: self.tag,
                actual: tag,
            });
        }

        if self.is_complete() {
            return Err(FramingError::UnexpectedPacket);
        }

        let seq = BigEndian::read_u16(&packet[3..]);
        if seq != self.seq {
            return Err(FramingError::SequenceMismatch {
                expected: self.seq,
                actual: seq,
            });
        }

        let body = match self.total {
            None => {
                if packet.len() < HEADER_LEN + 2 {
                    return Err(FramingError::ShortPacket(packet.len()));
                }
                let total = BigEndian::read_u16(&packet[HEADER_LEN..]) as usize;
                self.total = Some(total);
                self.payload.reserve(total);
                &packet[HEADER_LEN + 2..]
            }
            Some(_) => &packet[HEADER_LEN..],
        };

        let remaining = self.total.unwrap_or(0) - self.payload.len();
        let n = remaining.min(body.len());
        self.payload.extend_from_slice(&body[..n]);

        self.seq = self.seq.wrapping_add(1);

        Ok(self.is_complete())
    }

    /// Fetch the reassembled payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the reassembler, returning the payload
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod test {
    use alloc::vec;

    use rand::random;

    use super::*;

    #[test]
    fn frame_fixture() {
        let packets = Framer::new(0x0101, TAG_APDU).encode(b"1234").unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(hex::encode(&packets[0]), "0101050000000431323334");
    }

    #[test]
    fn empty_payload_single_packet() {
        let packets = Framer::new(DEFAULT_CHANNEL, TAG_APDU).encode(&[]).unwrap();

        assert_eq!(packets, vec![vec![0x01, 0x01, 0x05, 0x00, 0x00, 0x00, 0x00]]);

        let mut r = Reassembler::new(DEFAULT_CHANNEL, TAG_APDU);
        assert_eq!(r.push(&packets[0]), Ok(true));
        assert!(r.payload().is_empty());
    }

    #[test]
    fn frame_boundaries() {
        let lengths = [0, 1, 57, 58, 59, 64, 65, 115, 116, 117, 200];

        for len in lengths {
            let payload: Vec<u8> = (0..len).map(|_| random()).collect();

            let packets = Framer::new(DEFAULT_CHANNEL, TAG_APDU)
                .encode(&payload)
                .unwrap();

            let expected = core::cmp::max(1, (len + 2 + 58) / 59);
            assert_eq!(packets.len(), expected, "packet count for {len} bytes");
            assert_eq!(packets.len(), packet_count(len));

            // No empty trailing packets
            if packets.len() > 1 {
                assert!(packets.last().unwrap().len() > HEADER_LEN);
            }

            // Reassemble with transport padding applied
            let mut r = Reassembler::new(DEFAULT_CHANNEL, TAG_APDU);
            for (i, p) in packets.iter().enumerate() {
                let mut padded = p.clone();
                padded.resize(PACKET_SIZE, 0);

                let done = r.push(&padded).unwrap();
                assert_eq!(done, i == packets.len() - 1);
            }

            assert_eq!(r.into_payload(), payload, "round trip for {len} bytes");
        }
    }

    #[test]
    fn reassembly_errors() {
        let payload = [0xabu8; 100];
        let packets = Framer::new(DEFAULT_CHANNEL, TAG_APDU)
            .encode(&payload)
            .unwrap();

        // Wrong channel
        let mut r = Reassembler::new(0x0202, TAG_APDU);
        assert_eq!(
            r.push(&packets[0]),
            Err(FramingError::ChannelMismatch {
                expected: 0x0202,
                actual: DEFAULT_CHANNEL
            })
        );

        // Wrong tag
        let mut r = Reassembler::new(DEFAULT_CHANNEL, 0x03);
        assert!(matches!(
            r.push(&packets[0]),
            Err(FramingError::TagMismatch { .. })
        ));

        // Sequence gap
        let mut r = Reassembler::new(DEFAULT_CHANNEL, TAG_APDU);
        assert_eq!(
            r.push(&packets[1]),
            Err(FramingError::SequenceMismatch {
                expected: 0,
                actual: 1
            })
        );

        // Short packet
        let mut r = Reassembler::new(DEFAULT_CHANNEL, TAG_APDU);
        assert_eq!(r.push(&[0x01, 0x01]), Err(FramingError::ShortPacket(2)));
    }

    #[test]
    fn reassembly_skips_keep_alive() {
        let packets = Framer::new(DEFAULT_CHANNEL, TAG_APDU)
            .encode(b"hello")
            .unwrap();
        let ping = Framer::new(DEFAULT_CHANNEL, TAG_PING).encode(&[]).unwrap();

        let mut r = Reassembler::new(DEFAULT_CHANNEL, TAG_APDU);
        assert_eq!(r.push(&ping[0]), Ok(false));
        assert_eq!(r.push(&packets[0]), Ok(true));
        assert_eq!(r.payload(), b"hello");
    }

    #[test]
    fn oversized_payload() {
        let payload = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(
            Framer::new(DEFAULT_CHANNEL, TAG_APDU).encode(&payload),
            Err(FramingError::PayloadTooLong(payload.len()))
        );
    }
}
