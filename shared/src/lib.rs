/*!
# Shared LMDscandata Types and Utilities

This crate contains the protocol layer shared by the scan client components:
turning a raw TCP byte stream from a 2D rangefinder into oriented Cartesian
point sets.

## Core Types

- [`FrameAssembler`] - STX/ETX telegram reassembly over a byte stream
- [`TelegramDecoder`] - LMDscandata payload decoding
- [`ScanRecord`] - Decoded scan contents
- [`MountingRotation`] - Per-sensor yaw alignment into the shared frame
- [`PointSet`] - One scan's points, tagged with the sensor identifier

## Modules

- [`framing`] - Byte-stream telegram framing
- [`telegram`] - Telegram tokenizing and field decoding
- [`geometry`] - Polar to Cartesian conversion and frame alignment
- [`error`] - Common error types
*/

pub mod framing;
pub mod telegram;
pub mod geometry;
pub mod error;

// Re-export commonly used types
pub use framing::FrameAssembler;
pub use telegram::{ScanRecord, TelegramDecoder, TelegramError, PolarSample};
pub use geometry::{Point2D, PointSet, MountingRotation};
pub use error::{SharedError, Result};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Start-of-telegram marker
    pub const STX: u8 = 0x02;

    /// End-of-telegram marker
    pub const ETX: u8 = 0x03;

    /// Message type token of scan-data telegrams
    pub const SCAN_MESSAGE_TYPE: &str = "LMDscandata";

    /// Default distance channel token
    pub const DISTANCE_CHANNEL: &str = "DIST1";

    /// Commands sent in order after connecting
    pub const START_COMMANDS: [&str; 3] = [
        "sMN LMCstartmeas",
        "sMN Run",
        "sEN LMDscandata 1",
    ];

    /// Command that disables scan-data streaming
    pub const STOP_COMMAND: &str = "sEN LMDscandata 0";

    /// Angle fields are expressed in 1/10000 degree
    pub const ANGLE_UNITS_PER_DEGREE: f64 = 10_000.0;

    /// Raw range units (after scaling) per metre
    pub const RANGE_UNITS_PER_METER: f64 = 1_000.0;

    /// Wrap a plain-text command between the telegram markers
    pub fn frame_command(command: &str) -> Vec<u8> {
        let mut telegram = Vec::with_capacity(command.len() + 2);
        telegram.push(STX);
        telegram.extend_from_slice(command.as_bytes());
        telegram.push(ETX);
        telegram
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_frame_command() {
            assert_eq!(frame_command("sMN Run"), b"\x02sMN Run\x03".to_vec());
        }
    }
}
