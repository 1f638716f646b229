/*!
Synthetic rangefinder for running the client without hardware.

The simulator listens on TCP, acknowledges the startup commands and, once
scan-data output is enabled, streams LMDscandata telegrams of a rectangular
room at a fixed rate. Output stops on `sEN LMDscandata 0` or when the client
disconnects.
*/

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use lmd_shared::protocol::{frame_command, SCAN_MESSAGE_TYPE};
use lmd_shared::{FrameAssembler, ScanRecord};

/// Samples per synthetic scan (270° at 1/3° resolution)
const SAMPLES_PER_SCAN: usize = 811;
const START_ANGLE_DEG: f64 = -45.0;
const ANGLE_STEP_DEG: f64 = 0.3333;

/// Room walls around the sensor, in metres
const ROOM_MIN_X: f64 = -3.0;
const ROOM_MAX_X: f64 = 6.0;
const ROOM_HALF_WIDTH: f64 = 4.0;

/// Every n-th sample reports no return
const DROPOUT_PERIOD: usize = 37;

/// TCP server emulating one scan-data sensor
pub struct SyntheticSensor {
    listener: TcpListener,
    scan_interval: Duration,
}

impl SyntheticSensor {
    /// Bind the listening socket
    pub async fn bind(addr: &str, rate_hz: f64) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let rate_hz = if rate_hz.is_finite() && rate_hz > 0.0 { rate_hz } else { 15.0 };

        Ok(Self {
            listener,
            scan_interval: Duration::from_secs_f64(1.0 / rate_hz),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients one at a time until the running flag is cleared
    pub async fn serve(self, running: Arc<AtomicBool>) -> io::Result<()> {
        info!("🧪 Synthetic sensor listening on {}", self.local_addr()?);

        while running.load(Ordering::SeqCst) {
            // Time out to check the running flag periodically
            let accepted = tokio::time::timeout(Duration::from_millis(100), self.listener.accept()).await;
            match accepted {
                Ok(Ok((stream, peer))) => {
                    info!("🧪 Client connected from {}", peer);
                    match self.serve_client(stream, &running).await {
                        Ok(scans) => info!("🧪 Client {} finished after {} scans", peer, scans),
                        Err(e) => warn!("⚠️ Client {} failed: {}", peer, e),
                    }
                }
                Ok(Err(e)) => warn!("⚠️ Accept failed: {}", e),
                Err(_) => continue,
            }
        }

        info!("🧪 Synthetic sensor stopped");
        Ok(())
    }

    async fn serve_client(&self, mut stream: TcpStream, running: &AtomicBool) -> io::Result<u64> {
        let mut assembler = FrameAssembler::new();
        let mut buf = vec![0u8; 1024];
        let mut ticker = tokio::time::interval(self.scan_interval);
        let mut streaming = false;
        let mut scans = 0u64;

        loop {
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let bytes_read = read?;
                    if bytes_read == 0 {
                        return Ok(scans);
                    }
                    for payload in assembler.push(&buf[..bytes_read]) {
                        let command = String::from_utf8_lossy(&payload).into_owned();
                        debug!("🧪 Received command '{}'", command);

                        if let Some(reply) = acknowledgement(&command) {
                            stream.write_all(&frame_command(&reply)).await?;
                        }
                        match command.trim() {
                            "sEN LMDscandata 1" => streaming = true,
                            "sEN LMDscandata 0" => return Ok(scans),
                            _ => {}
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !running.load(Ordering::SeqCst) {
                        return Ok(scans);
                    }
                    if streaming {
                        scans += 1;
                        let telegram = frame_command(&synthetic_scan(scans).to_payload());
                        stream.write_all(&telegram).await?;
                    }
                }
            }
        }
    }
}

/// Reply the sensor sends for a command, if any
fn acknowledgement(command: &str) -> Option<String> {
    let mut tokens = command.split_whitespace();
    match (tokens.next()?, tokens.next()?) {
        ("sMN", name) => Some(format!("sAN {} 0", name)),
        ("sEN", SCAN_MESSAGE_TYPE) => Some(format!("sEA {} {}", SCAN_MESSAGE_TYPE, tokens.next().unwrap_or("0"))),
        _ => None,
    }
}

/// Scan of a rectangular room, with periodic dropouts that move between scans
pub fn synthetic_scan(scan_number: u64) -> ScanRecord {
    let phase = (scan_number as usize) % DROPOUT_PERIOD;

    let samples = (0..SAMPLES_PER_SCAN)
        .map(|k| {
            if k % DROPOUT_PERIOD == phase {
                return 0;
            }
            let angle = (START_ANGLE_DEG + k as f64 * ANGLE_STEP_DEG).to_radians();
            (distance_to_wall(angle) * 1000.0).round() as u32
        })
        .collect::<Vec<u32>>();

    ScanRecord {
        scale_factor: 1.0,
        start_angle_deg: START_ANGLE_DEG,
        angle_step_deg: ANGLE_STEP_DEG,
        declared_count: samples.len(),
        samples,
    }
}

/// Distance from the origin to the room boundary along a ray
fn distance_to_wall(angle: f64) -> f64 {
    let (dy, dx) = angle.sin_cos();

    let along_x = if dx > 1e-9 {
        ROOM_MAX_X / dx
    } else if dx < -1e-9 {
        ROOM_MIN_X / dx
    } else {
        f64::INFINITY
    };
    let along_y = if dy.abs() > 1e-9 { ROOM_HALF_WIDTH / dy.abs() } else { f64::INFINITY };

    along_x.min(along_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmd_shared::{MountingRotation, TelegramDecoder};

    #[test]
    fn test_synthetic_scan_decodes() {
        let scan = synthetic_scan(1);
        let payload = scan.to_payload();
        let decoded = TelegramDecoder::new().decode(payload.as_bytes()).unwrap();

        assert_eq!(decoded.samples.len(), SAMPLES_PER_SCAN);
        assert_eq!(decoded.samples[1], 0);
        assert!(decoded.valid_count() < SAMPLES_PER_SCAN);
    }

    #[test]
    fn test_synthetic_points_lie_inside_room() {
        let points = MountingRotation::identity().project(&synthetic_scan(3));
        assert!(!points.is_empty());
        for point in points {
            assert!(point.x >= ROOM_MIN_X - 0.01 && point.x <= ROOM_MAX_X + 0.01, "{:?}", point);
            assert!(point.y.abs() <= ROOM_HALF_WIDTH + 0.01, "{:?}", point);
        }
    }

    #[test]
    fn test_acknowledgements() {
        assert_eq!(acknowledgement("sMN Run"), Some("sAN Run 0".to_string()));
        assert_eq!(acknowledgement("sEN LMDscandata 1"), Some("sEA LMDscandata 1".to_string()));
        assert_eq!(acknowledgement("sRN Unknown"), None);
        assert_eq!(acknowledgement(""), None);
    }
}
