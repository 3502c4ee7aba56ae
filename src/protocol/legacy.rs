//! "ST...EN" run-length bulk format used by TIQIAA-style dongles.
//!
//! A transmit payload is `S T <f> D 0x00 <body> E N`, where every body byte is a run of
//! up to 127 sixteen-microsecond units with bit 7 marking an ON run. The payload is cut
//! into 56-byte fragments, each wrapped as `0x02 <len+3> <e> <total> <index> <chunk>`.

use super::{drain_input, WireFrame, WireProtocol};
use crate::error::{IrBlasterError, Result};
use crate::pattern::total_duration_us;
use crate::usb::{Endpoint, UsbConnection};
use log::{debug, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const MAX_FRAGMENT: usize = 56;
pub const FRAME_HEADER_LEN: usize = 5;
/// Fragment count and index are single header bytes.
pub const MAX_FRAGMENTS: usize = 0xFF;
const PAYLOAD_OVERHEAD: usize = 7;
const UNIT_US: u32 = 16;
const MAX_RUN: u32 = 0x7F;
const TAIL_TRIM_US: u32 = 3000;
const SHORT_TAIL_US: u32 = 10;

#[derive(Debug)]
struct Counters {
    epoch: u8,
    frame_tag: u8,
}

#[derive(Debug)]
pub struct LegacyBulkProtocol {
    counters: Mutex<Counters>,
}

impl LegacyBulkProtocol {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters { epoch: 1, frame_tag: 0 }),
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Epoch counter, cycling 1..=15.
    fn next_epoch(&self) -> u8 {
        let mut c = self.counters();
        c.epoch = if c.epoch < 0x0F { c.epoch + 1 } else { 0x01 };
        c.epoch
    }

    /// Frame tag counter, cycling 1..=127.
    fn next_frame_tag(&self) -> u8 {
        let mut c = self.counters();
        c.frame_tag = if c.frame_tag < 0x7F { c.frame_tag + 1 } else { 0x01 };
        c.frame_tag
    }

    fn handshake_frame(&self) -> WireFrame {
        let epoch = self.next_epoch();
        let tag = self.next_frame_tag();
        WireFrame::new(vec![
            0x02, 0x09, epoch, 0x01, 0x01, b'S', b'T', tag, b'S', b'E', b'N',
        ])
    }
}

impl Default for LegacyBulkProtocol {
    fn default() -> Self {
        Self::new()
    }
}

/// Shortens the trailing gap of an even-length pattern; the dongle misbehaves on long tails.
pub fn normalize_pattern(pattern: &[u32]) -> Vec<u32> {
    let mut out = pattern.to_vec();
    if out.len() % 2 != 0 {
        return out;
    }
    if let Some(last) = out.last_mut() {
        *last = if *last > TAIL_TRIM_US {
            *last - TAIL_TRIM_US
        } else {
            SHORT_TAIL_US
        };
    }
    out
}

fn encode_body(out: &mut Vec<u8>, pattern: &[u32]) {
    for (i, &duration) in pattern.iter().enumerate() {
        let mut units = (duration / UNIT_US).max(1);
        let on_flag = if i % 2 == 0 { 0x80 } else { 0x00 };
        while units > 0 {
            let run = units.min(MAX_RUN);
            units -= run;
            out.push(run as u8 | on_flag);
        }
    }
}

impl WireProtocol for LegacyBulkProtocol {
    fn name(&self) -> &'static str {
        "legacy_bulk_st"
    }

    fn strict_handshake(&self) -> bool {
        false
    }

    fn wants_background_reader(&self) -> bool {
        true
    }

    fn inter_frame_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn open_handshake(&self, connection: &dyn UsbConnection, input: &Endpoint, output: &Endpoint) -> bool {
        drain_input(connection, input, Duration::from_millis(10));

        let frame = self.handshake_frame();
        match connection.bulk_write(output, frame.as_bytes(), Duration::from_millis(250)) {
            Ok(n) if n > 0 => {}
            Ok(_) => {
                warn!("{}: handshake write accepted no bytes", self.name());
                return false;
            }
            Err(e) => {
                warn!("{}: handshake write failed: {}", self.name(), e);
                return false;
            }
        }

        let mut buf = vec![0u8; input.read_buffer_len()];
        let deadline = Instant::now() + Duration::from_millis(250);
        while Instant::now() < deadline {
            match connection.bulk_read(input, &mut buf, Duration::from_millis(20)) {
                Ok(n) if n > 0 => debug!("{}: drained {} bytes after handshake", self.name(), n),
                _ => break,
            }
        }

        true
    }

    fn encode(&self, _frequency_hz: u32, pattern: &[u32]) -> Result<Vec<WireFrame>> {
        let pattern = normalize_pattern(pattern);

        let mut body = Vec::with_capacity(pattern.len() * 2);
        encode_body(&mut body, &pattern);

        let total = (body.len() + PAYLOAD_OVERHEAD).div_ceil(MAX_FRAGMENT);
        if total > MAX_FRAGMENTS {
            warn!(
                "{}: pattern needs {} fragments, header allows {}",
                self.name(),
                total,
                MAX_FRAGMENTS
            );
            return Err(IrBlasterError::InvalidPattern(format!(
                "pattern too long: {} fragments exceed {}",
                total, MAX_FRAGMENTS
            )));
        }

        let mut payload = Vec::with_capacity(body.len() + PAYLOAD_OVERHEAD);
        payload.extend_from_slice(&[b'S', b'T', self.next_frame_tag(), b'D', 0x00]);
        payload.extend_from_slice(&body);
        payload.extend_from_slice(&[b'E', b'N']);

        let epoch = self.next_epoch();

        let frames = payload
            .chunks(MAX_FRAGMENT)
            .enumerate()
            .map(|(i, chunk)| {
                let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + chunk.len());
                frame.extend_from_slice(&[
                    0x02,
                    (chunk.len() + 3) as u8,
                    epoch,
                    total as u8,
                    (i + 1) as u8,
                ]);
                frame.extend_from_slice(chunk);
                WireFrame::new(frame)
            })
            .collect();
        Ok(frames)
    }

    fn post_transmit_delay(&self, pattern: &[u32]) -> Duration {
        Duration::from_millis(total_duration_us(pattern) / 1000 + 2)
    }
}
