use serde_derive::{Deserialize, Serialize};
use tracing::debug;

/// Raw register values at or above this are sentinel/overflow codes from the
/// inverter (e.g. 0xFFFFFFFF for "not available") and decode to zero.
pub const SANITY_CEILING: u64 = 1_000_000;

/// One string's electrical reading. All fields are non-negative and finite.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "watts")]
    pub power: f64,
    #[serde(rename = "volts")]
    pub voltage: f64,
    #[serde(rename = "amps")]
    pub current: f64,
}

impl Measurement {
    pub const ZERO: Measurement = Measurement {
        power: 0.0,
        voltage: 0.0,
        current: 0.0,
    };

    /// Negative or non-finite inputs are stored as zero.
    pub fn new(current: f64, voltage: f64, power: f64) -> Self {
        Self {
            power: sanitize(power),
            voltage: sanitize(voltage),
            current: sanitize(current),
        }
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Where a quantity lives on the device and how many decimal places the raw
/// integer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub register: u16,
    pub decimals: u8,
}

impl RegisterSpec {
    /// Every quantity is an unsigned 32 bit value spread over two registers.
    pub const WORDS: u16 = 2;

    pub const fn new(register: u16, decimals: u8) -> Self {
        Self { register, decimals }
    }

    pub fn decode(&self, words: &[u16]) -> f64 {
        scale(words_to_u64(words), self.decimals)
    }
}

/// Interprets register words as one big-endian unsigned integer.
pub fn words_to_u64(words: &[u16]) -> u64 {
    words
        .iter()
        .fold(0u64, |acc, word| (acc << 16) | u64::from(*word))
}

/// Applies the decimal scale, zeroing anything at or above the sanity ceiling.
pub fn scale(raw: u64, decimals: u8) -> f64 {
    if raw >= SANITY_CEILING {
        debug!(raw, "raw register value over sanity ceiling, treating as zero");
        return 0.0;
    }
    raw as f64 / 10f64.powi(i32::from(decimals))
}

/// Parses a gateway channel value. Empty or unparsable strings read as zero.
pub fn parse_channel_value(value: &str) -> f64 {
    let value = value.trim();
    if value.is_empty() {
        return 0.0;
    }
    match value.parse::<f64>() {
        Ok(parsed) => sanitize(parsed),
        Err(e) => {
            debug!("Unparsable channel value '{value}': {e}");
            0.0
        }
    }
}
