use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrBlasterError {
    #[error("No pattern provided")]
    NoPattern,

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("No supported transmitter is available")]
    TransportUnavailable,

    #[error("Permission required or device not ready")]
    PermissionRequired,

    #[error("Transmit failed: {0}")]
    TransmitFailed(String),

    #[error("Handshake failed for protocol {0}")]
    HandshakeFailed(&'static str),

    #[error("Session closed")]
    SessionClosed,

    #[error("Audio device error: {0}")]
    AudioDevice(String),
}

pub type Result<T> = std::result::Result<T, IrBlasterError>;
