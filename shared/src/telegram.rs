/*!
LMDscandata telegram decoding.

A scan telegram payload is a run of whitespace-separated ASCII tokens. After the
distance channel marker (`DIST1`) the fields are positional:

| Offset | Field         | Encoding                                   |
|--------|---------------|--------------------------------------------|
| +1     | scale factor  | 8 hex digits, big-endian IEEE-754 `f32`    |
| +2     | scale offset  | reserved, ignored                          |
| +3     | start angle   | hex, signed 32-bit, 1/10000 degree         |
| +4     | angular step  | hex, signed 32-bit, 1/10000 degree         |
| +5     | sample count  | hex                                        |
| +6..   | samples       | hex, unsigned, 0 = no return               |
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use crate::protocol::{ANGLE_UNITS_PER_DEGREE, DISTANCE_CHANNEL, RANGE_UNITS_PER_METER, SCAN_MESSAGE_TYPE};

/// Errors that can occur while decoding a telegram
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelegramError {
    #[error("Not a scan-data telegram")]
    NotScanData,

    #[error("Channel marker {0} not found")]
    MissingChannel(String),

    #[error("Missing {0} field")]
    MissingField(&'static str),

    #[error("Invalid hex in {field}: {token:?}")]
    InvalidHex { field: &'static str, token: String },
}

/// Decoded contents of one scan telegram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Multiplier applied to raw samples
    pub scale_factor: f32,
    /// Angle of the first sample in degrees
    pub start_angle_deg: f64,
    /// Angle between consecutive samples in degrees
    pub angle_step_deg: f64,
    /// Sample count announced by the telegram, capped at the samples present
    pub declared_count: usize,
    /// Raw samples, zero meaning no return
    pub samples: Vec<u32>,
}

/// One valid sample in polar form
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarSample {
    pub range_m: f64,
    pub angle_rad: f64,
}

impl ScanRecord {
    /// Iterate the samples with a return, converted to metres and radians
    pub fn polar_samples(&self) -> impl Iterator<Item = PolarSample> + '_ {
        let scale = self.scale_factor as f64;
        self.samples
            .iter()
            .enumerate()
            .filter(|&(_, &raw)| raw > 0)
            .map(move |(k, &raw)| PolarSample {
                range_m: raw as f64 * scale / RANGE_UNITS_PER_METER,
                angle_rad: (self.start_angle_deg + k as f64 * self.angle_step_deg).to_radians(),
            })
    }

    /// Number of samples with a return
    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|&&raw| raw > 0).count()
    }

    /// Render this record as an LMDscandata payload on the default channel
    pub fn to_payload(&self) -> String {
        let start = (self.start_angle_deg * ANGLE_UNITS_PER_DEGREE).round() as i32;
        let step = (self.angle_step_deg * ANGLE_UNITS_PER_DEGREE).round() as i32;

        let mut payload = format!(
            "sSN {} 1 1 89A27F 0 0 0 0 0 0 0 0 0 0 1 {} {} 00000000 {:X} {:X} {:X}",
            SCAN_MESSAGE_TYPE,
            DISTANCE_CHANNEL,
            hex::encode_upper(self.scale_factor.to_be_bytes()),
            start as u32,
            step as u32,
            self.samples.len(),
        );
        for sample in &self.samples {
            payload.push_str(&format!(" {:X}", sample));
        }
        payload.push_str(" 0 0 0 0 0 0");
        payload
    }
}

/// Decoder for scan telegrams on one distance channel
#[derive(Debug, Clone)]
pub struct TelegramDecoder {
    channel: String,
}

impl TelegramDecoder {
    /// Create a decoder for the default `DIST1` channel
    pub fn new() -> Self {
        Self::with_channel(DISTANCE_CHANNEL)
    }

    /// Create a decoder for a specific distance channel
    pub fn with_channel(channel: impl Into<String>) -> Self {
        Self { channel: channel.into() }
    }

    /// Channel this decoder reads
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Decode a payload, returning `None` for anything that is not a usable scan
    pub fn decode(&self, payload: &[u8]) -> Option<ScanRecord> {
        match self.decode_strict(payload) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping telegram: {}", e);
                None
            }
        }
    }

    /// Decode a payload, reporting why it was rejected
    pub fn decode_strict(&self, payload: &[u8]) -> Result<ScanRecord, TelegramError> {
        let tokens: Vec<&[u8]> = payload
            .split(|b| b.is_ascii_whitespace())
            .filter(|token| !token.is_empty())
            .collect();

        if !tokens.iter().any(|&token| token == SCAN_MESSAGE_TYPE.as_bytes()) {
            return Err(TelegramError::NotScanData);
        }

        let channel = tokens
            .iter()
            .position(|&token| token == self.channel.as_bytes())
            .ok_or_else(|| TelegramError::MissingChannel(self.channel.clone()))?;
        let fields = &tokens[channel + 1..];

        let field = |index: usize, name: &'static str| {
            fields.get(index).copied().ok_or(TelegramError::MissingField(name))
        };

        let scale_factor = parse_scale(field(0, "scale factor")?)?;
        let start = parse_hex(field(2, "start angle")?, "start angle")? as i32;
        let step = parse_hex(field(3, "angle step")?, "angle step")? as i32;
        let declared_count = parse_hex(field(4, "sample count")?, "sample count")? as usize;

        let samples = fields[5..]
            .iter()
            .take(declared_count)
            .map(|token| parse_hex(token, "sample"))
            .collect::<Result<Vec<u32>, _>>()?;

        if samples.len() < declared_count {
            debug!("Telegram declares {} samples but carries {}", declared_count, samples.len());
        }

        Ok(ScanRecord {
            scale_factor,
            start_angle_deg: start as f64 / ANGLE_UNITS_PER_DEGREE,
            angle_step_deg: step as f64 / ANGLE_UNITS_PER_DEGREE,
            declared_count: samples.len(),
            samples,
        })
    }
}

impl Default for TelegramDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_error(field: &'static str, token: &[u8]) -> TelegramError {
    TelegramError::InvalidHex {
        field,
        token: String::from_utf8_lossy(token).into_owned(),
    }
}

/// Parse a hex token as a 32-bit word; signed fields reinterpret the bits
fn parse_hex(token: &[u8], field: &'static str) -> Result<u32, TelegramError> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|text| u32::from_str_radix(text, 16).ok())
        .ok_or_else(|| hex_error(field, token))
}

fn parse_scale(token: &[u8]) -> Result<f32, TelegramError> {
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(token, &mut bytes).map_err(|_| hex_error("scale factor", token))?;
    Ok(f32::from_be_bytes(bytes))
}
