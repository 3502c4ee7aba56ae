use crate::error::{IrBlasterError, Result};
use crate::pattern::{clamp_carrier, validate_pattern};
use log::warn;

/// Anything that can emit a raw IR pattern.
pub trait IrTransmitter {
    fn transmit_raw(&self, frequency_hz: u32, pattern: &[u32]) -> Result<()>;
}

/// What the platform layer currently knows about the selected transport.
pub enum TransmitterState<'a> {
    /// No device or emitter is attached.
    Absent,
    /// A device is attached but cannot be used yet (no permission, not opened).
    NotReady,
    Ready(&'a dyn IrTransmitter),
}

/// Validates a caller's request, clamps the carrier and hands it to the transport.
pub fn transmit_raw(state: TransmitterState<'_>, frequency_hz: i64, pattern: &[i64]) -> Result<()> {
    let pattern = validate_pattern(pattern)?;
    let frequency = clamp_carrier(frequency_hz);

    match state {
        TransmitterState::Absent => Err(IrBlasterError::TransportUnavailable),
        TransmitterState::NotReady => Err(IrBlasterError::PermissionRequired),
        TransmitterState::Ready(tx) => tx.transmit_raw(frequency, &pattern),
    }
}

/// A phone's built-in IR LED, as exposed by the platform.
pub trait ConsumerIrEmitter {
    fn has_emitter(&self) -> bool;

    fn transmit(&self, frequency_hz: u32, pattern: &[u32]) -> std::io::Result<()>;

    /// Supported carrier ranges as (min, max) Hz. Empty when the platform cannot say.
    fn carrier_frequencies(&self) -> Vec<(u32, u32)> {
        Vec::new()
    }
}

pub struct BuiltinTransmitter<E: ConsumerIrEmitter> {
    emitter: Option<E>,
}

impl<E: ConsumerIrEmitter> BuiltinTransmitter<E> {
    pub fn new(emitter: Option<E>) -> Self {
        Self { emitter }
    }

    pub fn carrier_frequencies(&self) -> Vec<(u32, u32)> {
        self.emitter
            .as_ref()
            .map(|e| e.carrier_frequencies())
            .unwrap_or_default()
    }
}

impl<E: ConsumerIrEmitter> IrTransmitter for BuiltinTransmitter<E> {
    fn transmit_raw(&self, frequency_hz: u32, pattern: &[u32]) -> Result<()> {
        let emitter = match &self.emitter {
            Some(e) if e.has_emitter() => e,
            _ => return Err(IrBlasterError::TransportUnavailable),
        };
        if pattern.is_empty() {
            return Err(IrBlasterError::NoPattern);
        }

        emitter.transmit(frequency_hz, pattern).map_err(|e| {
            warn!("Built-in IR transmit failed: {}", e);
            IrBlasterError::TransmitFailed(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<(u32, Vec<u32>)>>,
    }

    impl IrTransmitter for Recorder {
        fn transmit_raw(&self, frequency_hz: u32, pattern: &[u32]) -> Result<()> {
            self.sent.borrow_mut().push((frequency_hz, pattern.to_vec()));
            Ok(())
        }
    }

    struct FakeEmitter {
        present: bool,
        fail: bool,
    }

    impl ConsumerIrEmitter for FakeEmitter {
        fn has_emitter(&self) -> bool {
            self.present
        }

        fn transmit(&self, _frequency_hz: u32, _pattern: &[u32]) -> std::io::Result<()> {
            if self.fail {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "hal error"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_failure_kinds() {
        let rec = Recorder::default();
        assert!(matches!(
            transmit_raw(TransmitterState::Ready(&rec), 38000, &[]),
            Err(IrBlasterError::NoPattern)
        ));
        assert!(matches!(
            transmit_raw(TransmitterState::Ready(&rec), 38000, &[9000, 0]),
            Err(IrBlasterError::InvalidPattern(_))
        ));
        assert!(matches!(
            transmit_raw(TransmitterState::Absent, 38000, &[9000]),
            Err(IrBlasterError::TransportUnavailable)
        ));
        assert!(matches!(
            transmit_raw(TransmitterState::NotReady, 38000, &[9000]),
            Err(IrBlasterError::PermissionRequired)
        ));
        assert!(rec.sent.borrow().is_empty());
    }

    #[test]
    fn test_carrier_is_clamped_before_delegating() {
        let rec = Recorder::default();
        transmit_raw(TransmitterState::Ready(&rec), 100_000, &[9000, 4500]).unwrap();
        transmit_raw(TransmitterState::Ready(&rec), 36000, &[560]).unwrap();
        assert_eq!(
            *rec.sent.borrow(),
            vec![(60000, vec![9000, 4500]), (36000, vec![560])]
        );
    }

    #[test]
    fn test_builtin_transmitter() {
        let missing: BuiltinTransmitter<FakeEmitter> = BuiltinTransmitter::new(None);
        assert!(matches!(
            missing.transmit_raw(38000, &[500]),
            Err(IrBlasterError::TransportUnavailable)
        ));
        assert!(missing.carrier_frequencies().is_empty());

        let no_led = BuiltinTransmitter::new(Some(FakeEmitter { present: false, fail: false }));
        assert!(matches!(
            no_led.transmit_raw(38000, &[500]),
            Err(IrBlasterError::TransportUnavailable)
        ));

        let broken = BuiltinTransmitter::new(Some(FakeEmitter { present: true, fail: true }));
        assert!(matches!(
            broken.transmit_raw(38000, &[500]),
            Err(IrBlasterError::TransmitFailed(_))
        ));

        let ok = BuiltinTransmitter::new(Some(FakeEmitter { present: true, fail: false }));
        assert!(ok.transmit_raw(38000, &[500]).is_ok());
    }
}
