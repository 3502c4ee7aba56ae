//! USB transport seam and the transmitter session built on top of it.
//!
//! The platform layer owns enumeration and permissions. It hands this module an
//! open [`UsbConnection`] plus the device's descriptors.

pub mod device;
pub mod session;

pub use device::*;
pub use session::*;

use std::io;
use std::time::Duration;

/// Blocking bulk I/O on an open device connection.
///
/// Implementations must tolerate a read on the IN endpoint running on one thread
/// while another thread writes to the OUT endpoint.
pub trait UsbConnection: Send + Sync {
    /// Writes `data` to a bulk OUT endpoint, returning the number of bytes accepted.
    fn bulk_write(&self, endpoint: &Endpoint, data: &[u8], timeout: Duration) -> io::Result<usize>;

    /// Reads from a bulk IN endpoint. `Ok(0)` means nothing arrived before the timeout.
    fn bulk_read(&self, endpoint: &Endpoint, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn claim_interface(&self, interface: &InterfaceDescriptor) -> io::Result<()>;

    fn release_interface(&self, interface: &InterfaceDescriptor) -> io::Result<()>;

    fn close(&self) -> io::Result<()>;
}
