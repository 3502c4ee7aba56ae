use super::{find_bulk_pair, DeviceDescriptor, DeviceFamily, Endpoint, InterfaceDescriptor, UsbConnection};
use crate::error::{IrBlasterError, Result};
use crate::protocol::{WireFrame, WireProtocol};
use crate::transmitter::IrTransmitter;
use crate::{BULK_WRITE_TIMEOUT_MS, READER_IO_TIMEOUT_MS, READER_WINDOW_MS};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Point in time until which the background reader keeps draining, stored as
/// milliseconds since `origin` so writers can move it without a lock.
#[derive(Debug)]
struct ReadDeadline {
    origin: Instant,
    until_ms: AtomicU64,
}

impl ReadDeadline {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            until_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn extend(&self, window: Duration) {
        self.until_ms
            .store(self.now_ms() + window.as_millis() as u64, Ordering::SeqCst);
    }

    fn expired(&self) -> bool {
        self.until_ms.load(Ordering::SeqCst) <= self.now_ms()
    }
}

struct Shared<C> {
    connection: C,
    input: Endpoint,
    closed: AtomicBool,
    deadline: ReadDeadline,
}

/// An open USB IR dongle speaking one wire protocol.
///
/// Transmits are serialized; concurrent callers wait for each other. The session
/// owns the connection and claimed interface until [`UsbTransmitter::close`].
pub struct UsbTransmitter<C: UsbConnection + 'static> {
    shared: Arc<Shared<C>>,
    interface: InterfaceDescriptor,
    output: Endpoint,
    protocol: Box<dyn WireProtocol>,
    tx_lock: Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<C: UsbConnection + 'static> UsbTransmitter<C> {
    /// Wraps an already-claimed interface and runs the protocol handshake once.
    ///
    /// A failed handshake is fatal only for protocols that demand a strict one; in
    /// that case the interface is released and the connection closed.
    pub fn create(
        connection: C,
        interface: InterfaceDescriptor,
        output: Endpoint,
        input: Endpoint,
        protocol: Box<dyn WireProtocol>,
    ) -> Result<Self> {
        let tx = Self {
            shared: Arc::new(Shared {
                connection,
                input,
                closed: AtomicBool::new(false),
                deadline: ReadDeadline::new(),
            }),
            interface,
            output,
            protocol,
            tx_lock: Mutex::new(()),
            reader: Mutex::new(None),
        };

        let handshake_ok = tx.protocol.open_handshake(
            &tx.shared.connection,
            &tx.shared.input,
            &tx.output,
        );

        if !handshake_ok {
            if tx.protocol.strict_handshake() {
                warn!("{}: handshake failed, closing device", tx.protocol.name());
                let name = tx.protocol.name();
                tx.close();
                return Err(IrBlasterError::HandshakeFailed(name));
            }
            warn!("{}: handshake failed, continuing best-effort", tx.protocol.name());
        }

        Ok(tx)
    }

    /// Classifies the device, finds its bulk endpoints, claims the interface and opens a session.
    pub fn open_device(connection: C, device: &DeviceDescriptor) -> Result<Self> {
        info!(
            "Opening {} ({}) with {} interfaces",
            device.product_name.as_deref().unwrap_or("unknown"),
            device.id,
            device.interfaces.len()
        );

        let Some(family) = DeviceFamily::classify(device.id) else {
            warn!("Device {} is not a supported IR dongle", device.id);
            return Err(IrBlasterError::TransportUnavailable);
        };

        let Some(pair) = find_bulk_pair(device) else {
            warn!("No interface offers both bulk OUT and bulk IN endpoints");
            return Err(IrBlasterError::TransportUnavailable);
        };

        if let Err(e) = connection.claim_interface(&pair.interface) {
            warn!("Claiming interface {} failed: {}", pair.interface.id, e);
            if let Err(e) = connection.close() {
                debug!("Closing connection failed: {}", e);
            }
            return Err(IrBlasterError::PermissionRequired);
        }

        info!(
            "Selected interface {} OUT(mps={}) IN(mps={}) as {:?}",
            pair.interface.id, pair.output.max_packet_size, pair.input.max_packet_size, family
        );

        Self::create(connection, pair.interface, pair.output, pair.input, family.protocol().build())
    }

    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Encodes and sends one pattern, then waits out the emission.
    pub fn transmit(&self, frequency_hz: u32, pattern: &[u32]) -> Result<()> {
        let _guard = lock(&self.tx_lock);

        if self.is_closed() {
            return Err(IrBlasterError::SessionClosed);
        }
        if pattern.is_empty() {
            return Err(IrBlasterError::NoPattern);
        }

        let frames = self.protocol.encode(frequency_hz, pattern)?;
        let delay = self.protocol.inter_frame_delay();
        for (i, frame) in frames.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                thread::sleep(delay);
            }
            self.send_frame(frame)?;
        }

        let post = self.protocol.post_transmit_delay(pattern);
        if !post.is_zero() {
            thread::sleep(post);
        }

        self.protocol
            .drain_after_transmit(&self.shared.connection, &self.shared.input);

        Ok(())
    }

    fn send_frame(&self, frame: &WireFrame) -> Result<()> {
        if self.is_closed() {
            return Err(IrBlasterError::SessionClosed);
        }

        let written = self
            .shared
            .connection
            .bulk_write(
                &self.output,
                frame.as_bytes(),
                Duration::from_millis(BULK_WRITE_TIMEOUT_MS),
            )
            .map_err(|e| {
                error!("bulk write failed: {}", e);
                IrBlasterError::TransmitFailed(e.to_string())
            })?;

        if written == 0 {
            warn!("bulk write accepted no bytes (len={})", frame.len());
            return Err(IrBlasterError::TransmitFailed(format!(
                "bulk transfer returned 0 for a {}-byte frame",
                frame.len()
            )));
        }

        if self.protocol.wants_background_reader() {
            self.shared
                .deadline
                .extend(Duration::from_millis(READER_WINDOW_MS));
            self.ensure_reader();
        }

        Ok(())
    }

    fn ensure_reader(&self) {
        let mut reader = lock(&self.reader);
        if reader.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        *reader = Some(thread::spawn(move || run_reader(&shared)));
    }

    /// Stops the background reader, releases the interface and closes the connection.
    ///
    /// Safe to call more than once; teardown errors are logged and dropped.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = lock(&self.reader).take() {
            if handle.join().is_err() {
                debug!("background reader panicked");
            }
        }

        if let Err(e) = self.shared.connection.release_interface(&self.interface) {
            debug!("release_interface failed: {}", e);
        }
        if let Err(e) = self.shared.connection.close() {
            debug!("connection close failed: {}", e);
        }
    }
}

fn run_reader<C: UsbConnection>(shared: &Shared<C>) {
    let mut buf = vec![0u8; shared.input.read_buffer_len()];
    let timeout = Duration::from_millis(READER_IO_TIMEOUT_MS);

    while !shared.closed.load(Ordering::SeqCst) && !shared.deadline.expired() {
        match shared.connection.bulk_read(&shared.input, &mut buf, timeout) {
            Ok(_) => thread::sleep(Duration::from_millis(1)),
            Err(e) => {
                error!("Background reader error: {}", e);
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

impl<C: UsbConnection + 'static> Drop for UsbTransmitter<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: UsbConnection + 'static> IrTransmitter for UsbTransmitter<C> {
    fn transmit_raw(&self, frequency_hz: u32, pattern: &[u32]) -> Result<()> {
        self.transmit(frequency_hz, pattern)
    }
}
