//! Vendor wire formats for USB IR dongles.

pub mod legacy;
pub mod mangled;

pub use legacy::LegacyBulkProtocol;
pub use mangled::MangledFrequencyProtocol;

use crate::error::Result;
use crate::usb::{Endpoint, UsbConnection};
use std::time::Duration;

/// One bulk transfer's worth of bytes, produced by an encoder and written once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame(Vec<u8>);

impl WireFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for WireFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Capabilities every dongle protocol provides to the transmitter session.
pub trait WireProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// When set, a failed handshake aborts session creation.
    fn strict_handshake(&self) -> bool;

    /// When set, the session keeps draining the IN endpoint for a while after each write.
    fn wants_background_reader(&self) -> bool;

    fn inter_frame_delay(&self) -> Duration;

    /// Brings the device into a ready state. Returns false on any failure.
    fn open_handshake(&self, connection: &dyn UsbConnection, input: &Endpoint, output: &Endpoint) -> bool;

    /// Builds the frames for one transmit. Fails when the pattern cannot be framed.
    fn encode(&self, frequency_hz: u32, pattern: &[u32]) -> Result<Vec<WireFrame>>;

    /// Time to wait after the last frame so the emission finishes before the next transmit.
    fn post_transmit_delay(&self, pattern: &[u32]) -> Duration;

    fn drain_after_transmit(&self, _connection: &dyn UsbConnection, _input: &Endpoint) {}
}

/// Which wire format a session speaks, fixed when the session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    LegacyBulk,
    MangledFrequency,
}

impl ProtocolKind {
    pub fn build(self) -> Box<dyn WireProtocol> {
        match self {
            ProtocolKind::LegacyBulk => Box::new(LegacyBulkProtocol::new()),
            ProtocolKind::MangledFrequency => Box::new(MangledFrequencyProtocol::new()),
        }
    }
}

/// Reads `input` until a read returns nothing or fails.
pub(crate) fn drain_input(connection: &dyn UsbConnection, input: &Endpoint, timeout: Duration) {
    let mut buf = vec![0u8; input.read_buffer_len()];
    while let Ok(n) = connection.bulk_read(input, &mut buf, timeout) {
        if n == 0 {
            break;
        }
    }
}
