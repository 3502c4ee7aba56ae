use crate::error::{IrBlasterError, Result};
use crate::{MAX_CARRIER_HZ, MIN_CARRIER_HZ};

/// One ON/OFF pair of a pulse pattern, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pulse {
    pub on_us: u32,
    pub off_us: u32,
}

/// Pairs up an ON/OFF pattern. An odd trailing ON gets a zero OFF.
pub fn to_pulses(pattern: &[u32]) -> Vec<Pulse> {
    pattern
        .chunks(2)
        .map(|pair| Pulse {
            on_us: pair[0],
            off_us: pair.get(1).copied().unwrap_or(0),
        })
        .collect()
}

pub fn total_duration_us(pattern: &[u32]) -> u64 {
    pattern.iter().map(|&d| d as u64).sum()
}

/// Checks a caller-supplied pattern before it reaches any transport.
///
/// Empty patterns and patterns containing a non-positive duration are rejected.
pub fn validate_pattern(raw: &[i64]) -> Result<Vec<u32>> {
    if raw.is_empty() {
        return Err(IrBlasterError::NoPattern);
    }

    raw.iter()
        .enumerate()
        .map(|(i, &d)| {
            if d <= 0 {
                Err(IrBlasterError::InvalidPattern(format!(
                    "All durations must be > 0 µs (index {} is {})",
                    i, d
                )))
            } else {
                u32::try_from(d).map_err(|_| {
                    IrBlasterError::InvalidPattern(format!("Duration too large at index {}: {}", i, d))
                })
            }
        })
        .collect()
}

pub fn clamp_carrier(frequency_hz: i64) -> u32 {
    frequency_hz.clamp(MIN_CARRIER_HZ as i64, MAX_CARRIER_HZ as i64) as u32
}
