//! ElkSmart bulk format: "mangled" header bytes plus a two-entry pulse dictionary.
//!
//! Message layout before fragmentation:
//!
//! ```text
//! FF FF FF FF | m(f>>16) m(f>>8) m(f) | m(len>>8) m(len) | compressed pulses
//! ```
//!
//! where `f = frequency + 0x7FFFF` and `m` is [`mangle_byte`]. The message is cut
//! into 62-byte chunks; full chunks get a 63rd checksum byte.

use super::{drain_input, WireFrame, WireProtocol};
use crate::error::{IrBlasterError, Result};
use crate::pattern::{to_pulses, Pulse};
use crate::usb::{Endpoint, UsbConnection};
use log::{debug, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const CHUNK_LEN: usize = 62;
const FREQUENCY_OFFSET: u32 = 0x7FFFF;
/// The compressed length travels as two bytes.
pub const MAX_BODY_LEN: usize = 0xFFFF;
const SMALL_VALUE_MAX_US: u32 = 2032;
const IDENTIFY: [u8; 4] = [0xFC; 4];
const HANDSHAKE_DEADLINE: Duration = Duration::from_millis(400);

/// Reverses the bits of the low byte of `value`, then inverts them.
pub fn mangle_byte(value: u32) -> u8 {
    !(value as u8).reverse_bits()
}

/// Appends one duration in the dongle's small-value encoding.
///
/// Up to 2032µs a duration is a single byte of 16µs units, never below 2. Longer
/// durations are a little-endian base-128 varint of the raw microseconds.
pub fn push_small_value(out: &mut Vec<u8>, value_us: u32) {
    if value_us <= SMALL_VALUE_MAX_US {
        out.push(((value_us + 8) / 16).max(2) as u8);
        return;
    }

    let mut v = value_us;
    loop {
        let mut b = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
}

/// The two most frequent pulses, most frequent first. Ties keep first-seen order.
fn dominant_pulses(pulses: &[Pulse]) -> Option<(Pulse, Pulse)> {
    let mut counts: HashMap<Pulse, usize> = HashMap::with_capacity(pulses.len());
    let mut order: Vec<Pulse> = Vec::new();
    for &p in pulses {
        let count = counts.entry(p).or_insert(0);
        if *count == 0 {
            order.push(p);
        }
        *count += 1;
    }

    // sort_by is stable, so equal counts stay in encounter order
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    let p1 = *order.first()?;
    let p2 = order.get(1).copied().unwrap_or(p1);
    Some((p1, p2))
}

pub fn compress_pulses(pulses: &[Pulse]) -> Vec<u8> {
    let Some((p1, p2)) = dominant_pulses(pulses) else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(pulses.len() + 11);
    for v in [p2.on_us, p2.off_us, p1.on_us, p1.off_us] {
        push_small_value(&mut out, v);
    }
    out.extend_from_slice(&[0xFF, 0xFF, 0xFF]);

    for &p in pulses {
        if p == p1 {
            out.push(0x00);
        } else if p == p2 {
            out.push(0x01);
        } else {
            push_small_value(&mut out, p.on_us);
            push_small_value(&mut out, p.off_us);
        }
    }
    out
}

fn checksum(chunk: &[u8]) -> u8 {
    let sum: u32 = chunk.iter().map(|&b| b as u32).sum();
    mangle_byte((sum & 0xF0) | ((sum >> 8) & 0x0F))
}

#[derive(Debug, Default)]
pub struct MangledFrequencyProtocol;

impl MangledFrequencyProtocol {
    pub fn new() -> Self {
        Self
    }

    pub fn build_message(frequency_hz: u32, pattern: &[u32]) -> Result<Vec<u8>> {
        let body = compress_pulses(&to_pulses(pattern));
        if body.len() > MAX_BODY_LEN {
            warn!(
                "elksmart_bulk: compressed pattern is {} bytes, length field holds {}",
                body.len(),
                MAX_BODY_LEN
            );
            return Err(IrBlasterError::InvalidPattern(format!(
                "pattern too long: {} compressed bytes exceed {}",
                body.len(),
                MAX_BODY_LEN
            )));
        }

        let f = frequency_hz.wrapping_add(FREQUENCY_OFFSET);
        let len = body.len() as u32;

        let mut msg = Vec::with_capacity(9 + body.len());
        msg.extend_from_slice(&[0xFF; 4]);
        msg.extend_from_slice(&[mangle_byte(f >> 16), mangle_byte(f >> 8), mangle_byte(f)]);
        msg.extend_from_slice(&[mangle_byte(len >> 8), mangle_byte(len)]);
        msg.extend_from_slice(&body);
        Ok(msg)
    }
}

impl WireProtocol for MangledFrequencyProtocol {
    fn name(&self) -> &'static str {
        "elksmart_bulk"
    }

    fn strict_handshake(&self) -> bool {
        true
    }

    fn wants_background_reader(&self) -> bool {
        false
    }

    fn inter_frame_delay(&self) -> Duration {
        Duration::from_millis(2)
    }

    fn open_handshake(&self, connection: &dyn UsbConnection, input: &Endpoint, output: &Endpoint) -> bool {
        drain_input(connection, input, Duration::from_millis(10));

        match connection.bulk_write(output, &IDENTIFY, Duration::from_millis(150)) {
            Ok(n) if n == IDENTIFY.len() => {}
            Ok(n) => {
                warn!("{}: identify write was short ({} bytes)", self.name(), n);
                return false;
            }
            Err(e) => {
                warn!("{}: identify write failed: {}", self.name(), e);
                return false;
            }
        }

        let mut resp = [0u8; 64];
        let mut got = 0;
        let deadline = Instant::now() + HANDSHAKE_DEADLINE;
        while Instant::now() < deadline {
            match connection.bulk_read(input, &mut resp, Duration::from_millis(120)) {
                Ok(n) if n > 0 => {
                    got = n;
                    break;
                }
                Ok(_) => {}
                Err(e) => debug!("{}: identify read failed: {}", self.name(), e),
            }
        }

        if got < 6 {
            warn!("{}: no identify reply ({} bytes)", self.name(), got);
            return false;
        }

        let ok = resp[..4] == IDENTIFY && resp[4] == 0x70 && resp[5] == 0x01;
        if !ok {
            warn!("{}: unexpected identify reply {:02x?}", self.name(), &resp[..got]);
        }
        ok
    }

    fn encode(&self, frequency_hz: u32, pattern: &[u32]) -> Result<Vec<WireFrame>> {
        let frames = Self::build_message(frequency_hz, pattern)?
            .chunks(CHUNK_LEN)
            .map(|chunk| {
                let mut frame = chunk.to_vec();
                if chunk.len() == CHUNK_LEN {
                    frame.push(checksum(chunk));
                }
                WireFrame::new(frame)
            })
            .collect();
        Ok(frames)
    }

    fn post_transmit_delay(&self, _pattern: &[u32]) -> Duration {
        Duration::from_millis(2)
    }

    fn drain_after_transmit(&self, connection: &dyn UsbConnection, input: &Endpoint) {
        let mut buf = vec![0u8; input.read_buffer_len()];
        if let Err(e) = connection.bulk_read(input, &mut buf, Duration::from_millis(10)) {
            debug!("{}: post-transmit drain failed: {}", self.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::MockConnection;
    use crate::usb::Direction;

    fn endpoints() -> (Endpoint, Endpoint) {
        (
            Endpoint::bulk(0x81, Direction::In, 64),
            Endpoint::bulk(0x01, Direction::Out, 64),
        )
    }

    #[test]
    fn test_mangle_byte() {
        for x in 0..=255u32 {
            let mut reversed = 0u8;
            for bit in 0..8 {
                if x & (1 << bit) != 0 {
                    reversed |= 0x80 >> bit;
                }
            }
            assert_eq!(mangle_byte(x), !reversed);
        }
        assert_eq!(mangle_byte(0x01), 0x7F);
        assert_eq!(mangle_byte(0x00), 0xFF);
        assert_eq!(mangle_byte(0x1FF), mangle_byte(0xFF));
    }

    #[test]
    fn test_small_values() {
        let encode = |v| {
            let mut out = Vec::new();
            push_small_value(&mut out, v);
            out
        };
        assert_eq!(encode(0), vec![2]);
        assert_eq!(encode(16), vec![2]);
        assert_eq!(encode(40), vec![3]);
        assert_eq!(encode(560), vec![35]);
        assert_eq!(encode(2032), vec![127]);
        // 2033 = 15 * 128 + 113
        assert_eq!(encode(2033), vec![0x80 | 113, 15]);
        // 9000 = 70 * 128 + 40
        assert_eq!(encode(9000), vec![0x80 | 40, 70]);
    }

    #[test]
    fn test_dictionary_prefers_most_frequent_then_first_seen() {
        let a = Pulse { on_us: 560, off_us: 560 };
        let b = Pulse { on_us: 560, off_us: 1690 };
        let c = Pulse { on_us: 9000, off_us: 4500 };
        assert_eq!(dominant_pulses(&[c, a, b, b, a]), Some((a, b)));
        assert_eq!(dominant_pulses(&[c, a, b, b]), Some((b, c)));
        assert_eq!(dominant_pulses(&[a]), Some((a, a)));
        assert_eq!(dominant_pulses(&[]), None);
    }

    #[test]
    fn test_compressed_stream() {
        // pulses: (9000,4500) (560,560) (560,1690) (560,560) (560,0)
        let pattern = [9000, 4500, 560, 560, 560, 1690, 560, 560, 560];
        let body = compress_pulses(&to_pulses(&pattern));
        // p1 = (560,560) twice; p2 = (9000,4500), first-seen among singles.
        let expected = vec![
            0x80 | 40, 70, // p2.on 9000
            0x80 | 20, 35, // p2.off 4500 = 35 * 128 + 20
            35, 35, // p1
            0xFF, 0xFF, 0xFF,
            0x01, 0x00,
            35, 106, // (560,1690)
            0x00,
            35, 2, // (560,0)
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn test_message_header() {
        let pattern = [560, 560];
        let msg = MangledFrequencyProtocol::build_message(38000, &pattern).unwrap();
        let f = 38000 + 0x7FFFF;
        assert_eq!(&msg[..4], &[0xFF; 4]);
        assert_eq!(msg[4], mangle_byte(f >> 16));
        assert_eq!(msg[5], mangle_byte(f >> 8));
        assert_eq!(msg[6], mangle_byte(f));
        let body_len = msg.len() - 9;
        assert_eq!(msg[7], mangle_byte((body_len >> 8) as u32));
        assert_eq!(msg[8], mangle_byte(body_len as u32));
    }

    #[test]
    fn test_fragments_carry_checksum_only_when_full() {
        let protocol = MangledFrequencyProtocol::new();
        let pattern: Vec<u32> = (0..120).map(|i| 600 + i * 20).collect();
        let message = MangledFrequencyProtocol::build_message(38000, &pattern).unwrap();
        let frames = protocol.encode(38000, &pattern).unwrap();

        let full = message.len() / CHUNK_LEN;
        assert_eq!(frames.len(), message.len().div_ceil(CHUNK_LEN));
        for (i, frame) in frames.iter().enumerate() {
            let chunk = &message[i * CHUNK_LEN..((i + 1) * CHUNK_LEN).min(message.len())];
            let bytes = frame.as_bytes();
            if i < full {
                assert_eq!(bytes.len(), CHUNK_LEN + 1);
                assert_eq!(&bytes[..CHUNK_LEN], chunk);
                let sum: u32 = chunk.iter().map(|&b| b as u32).sum();
                assert_eq!(bytes[CHUNK_LEN], mangle_byte((sum & 0xF0) | ((sum >> 8) & 0x0F)));
            } else {
                assert_eq!(bytes, chunk);
            }
        }
    }

    #[test]
    fn test_body_longer_than_length_field_is_rejected() {
        let protocol = MangledFrequencyProtocol::new();
        // 35000 pulses drawn from 500 distinct shapes; all but the two dictionary
        // entries cost 4 bytes (two 2-byte varints)
        let pattern: Vec<u32> = (0..70_000).map(|i| 3000 + (i % 1000)).collect();
        assert!(compress_pulses(&to_pulses(&pattern)).len() > MAX_BODY_LEN);
        assert!(matches!(
            protocol.encode(38000, &pattern),
            Err(IrBlasterError::InvalidPattern(_))
        ));

        let fits: Vec<u32> = (0..20_000).map(|i| 3000 + (i % 1000)).collect();
        let message = MangledFrequencyProtocol::build_message(38000, &fits).unwrap();
        let body_len = message.len() - 9;
        assert!(body_len <= MAX_BODY_LEN);
        assert_eq!(message[7], mangle_byte((body_len >> 8) as u32));
    }

    #[test]
    fn test_handshake_accepts_identify_reply() {
        let protocol = MangledFrequencyProtocol::new();
        let conn = MockConnection::with_reply_on_write(&[0xFC, 0xFC, 0xFC, 0xFC, 0x70, 0x01, 0x00]);
        conn.pending_reads.lock().unwrap().push_back(vec![0x11, 0x22]);
        let (input, output) = endpoints();

        assert!(protocol.open_handshake(&conn, &input, &output));
        assert_eq!(conn.written(), vec![vec![0xFC; 4]]);
    }

    #[test]
    fn test_handshake_rejects_bad_reply() {
        let protocol = MangledFrequencyProtocol::new();
        let (input, output) = endpoints();

        let wrong_id = MockConnection::with_reply_on_write(&[0xFC, 0xFC, 0xFC, 0xFC, 0x71, 0x01]);
        assert!(!protocol.open_handshake(&wrong_id, &input, &output));

        let short = MockConnection::with_reply_on_write(&[0xFC, 0xFC, 0xFC, 0xFC, 0x70]);
        assert!(!protocol.open_handshake(&short, &input, &output));

        let silent = MockConnection::new();
        let started = Instant::now();
        assert!(!protocol.open_handshake(&silent, &input, &output));
        assert!(started.elapsed() >= HANDSHAKE_DEADLINE);
    }
}
