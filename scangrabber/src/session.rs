/*!
Device session: one rangefinder's TCP connection and its poll pipeline.

A session connects once, sends the startup commands and then drains the socket
without blocking on every poll tick. Received bytes go through the telegram
assembler, the decoder and the mounting rotation. A failed connect or a broken
stream leaves the session disconnected for the rest of the run; there is no
automatic reconnect.
*/

use std::io;
use std::time::{Duration, Instant};
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};
use lmd_shared::protocol::{frame_command, START_COMMANDS, STOP_COMMAND};
use lmd_shared::{FrameAssembler, MountingRotation, PointSet, SharedError, TelegramDecoder};
use crate::config::{DeviceConfig, ScannerConfig};

/// Mutable health state of one session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub connected: bool,
    pub last_error: Option<String>,
    /// Scan telegrams decoded
    pub frames: u64,
    /// Telegrams that were not usable scans (acks, malformed data)
    pub skipped_telegrams: u64,
    pub bytes_received: u64,
    pub started_at: DateTime<Local>,
    start_instant: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connected: false,
            last_error: None,
            frames: 0,
            skipped_telegrams: 0,
            bytes_received: 0,
            started_at: Local::now(),
            start_instant: Instant::now(),
        }
    }

    /// Time since the session was created
    pub fn elapsed(&self) -> Duration {
        self.start_instant.elapsed()
    }
}

/// Read-only snapshot of a session for reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub connected: bool,
    pub last_error: Option<String>,
    pub frames: u64,
    pub skipped_telegrams: u64,
    pub bytes_received: u64,
    pub resyncs: u64,
    pub started_at: String,
    pub elapsed_secs: f64,
}

/// One sensor connection
pub struct DeviceSession {
    device: DeviceConfig,
    settings: ScannerConfig,
    stream: Option<TcpStream>,
    assembler: FrameAssembler,
    decoder: TelegramDecoder,
    rotation: MountingRotation,
    read_buf: Vec<u8>,
    state: SessionState,
}

impl DeviceSession {
    /// Create a disconnected session for a device
    pub fn new(device: DeviceConfig, settings: &ScannerConfig) -> Self {
        Self {
            rotation: MountingRotation::from_degrees(device.yaw_deg),
            assembler: FrameAssembler::with_limit(settings.max_buffered_bytes),
            decoder: TelegramDecoder::with_channel(settings.distance_channel.clone()),
            read_buf: vec![0u8; settings.read_chunk_size.max(1)],
            device,
            settings: settings.clone(),
            stream: None,
            state: SessionState::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    /// Connect and run the startup handshake. Failures are recorded, not retried.
    pub async fn connect(&mut self) -> bool {
        info!("🔌 Connecting to {} at {}", self.device.name, self.device.endpoint());

        match self.open().await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state.connected = true;
                self.state.last_error = None;
                info!("✅ [CONNECTED] {} active, reading channel {}", self.device.name, self.decoder.channel());
                true
            }
            Err(e) => {
                error!("❌ [FAILED] {} at {}: {}", self.device.name, self.device.endpoint(), e);
                self.state.connected = false;
                self.state.last_error = Some(e.to_string());
                false
            }
        }
    }

    async fn open(&self) -> lmd_shared::Result<TcpStream> {
        let endpoint = self.device.endpoint();
        let timeout = self.settings.connect_timeout();

        let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(&endpoint)).await {
            Ok(result) => result?,
            Err(_) => return Err(SharedError::connect_timeout(endpoint, self.settings.connect_timeout_ms)),
        };

        stream.set_nodelay(true)?;
        let sock_ref = socket2::SockRef::from(&stream);
        sock_ref.set_recv_buffer_size(self.settings.recv_buffer_size)?;
        sock_ref.set_keepalive(true)?;

        for command in START_COMMANDS {
            match tokio::time::timeout(timeout, stream.write_all(&frame_command(command))).await {
                Ok(Ok(())) => debug!("Sent '{}' to {}", command, self.device.name),
                Ok(Err(e)) => {
                    return Err(SharedError::handshake(format!("sending '{}': {}", command, e)));
                }
                Err(_) => {
                    return Err(SharedError::handshake(format!("sending '{}' timed out", command)));
                }
            }
            // The device acknowledges commands one at a time
            tokio::time::sleep(self.settings.command_delay()).await;
        }

        Ok(stream)
    }

    /// Drain the socket and return one point set per decoded scan, in arrival order
    pub fn poll(&mut self) -> Vec<PointSet> {
        if !self.state.connected {
            return Vec::new();
        }
        let Some(stream) = self.stream.as_ref() else {
            return Vec::new();
        };

        let mut payloads = Vec::new();
        let mut failure = None;
        loop {
            match stream.try_read(&mut self.read_buf) {
                Ok(0) => {
                    failure = Some("connection closed by device".to_string());
                    break;
                }
                Ok(bytes_read) => {
                    self.state.bytes_received += bytes_read as u64;
                    payloads.extend(self.assembler.push(&self.read_buf[..bytes_read]));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(format!("read failed: {}", e));
                    break;
                }
            }
        }

        // Scans that arrived before a failure are still delivered
        let point_sets = payloads
            .into_iter()
            .filter_map(|payload| self.handle_telegram(payload))
            .collect();

        if let Some(reason) = failure {
            self.disconnect(reason);
        }

        point_sets
    }

    fn handle_telegram(&mut self, payload: Bytes) -> Option<PointSet> {
        let Some(scan) = self.decoder.decode(&payload) else {
            self.state.skipped_telegrams += 1;
            return None;
        };

        self.state.frames += 1;
        let points = self.rotation.project(&scan);
        Some(PointSet::new(self.device.id.clone(), self.state.frames, points))
    }

    fn disconnect(&mut self, reason: String) {
        error!("❌ {} stream failed: {}", self.device.name, reason);
        self.state.connected = false;
        self.state.last_error = Some(reason);
        self.stream = None;
    }

    /// Ask the device to stop streaming and close the connection.
    /// Failures are logged and otherwise ignored.
    pub async fn shutdown(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        let stop = frame_command(STOP_COMMAND);
        match tokio::time::timeout(self.settings.connect_timeout(), stream.write_all(&stop)).await {
            Ok(Ok(())) => info!("🛑 Sent stop command to {}", self.device.name),
            Ok(Err(e)) => warn!("⚠️ Failed to send stop command to {}: {}", self.device.name, e),
            Err(_) => warn!("⚠️ Timed out sending stop command to {}", self.device.name),
        }

        if let Err(e) = stream.shutdown().await {
            debug!("Close of {} failed: {}", self.device.name, e);
        }
    }

    /// Snapshot of the session for reporting
    pub fn stats(&self) -> SessionStats {
        let (_, resyncs) = self.assembler.stats();
        SessionStats {
            id: self.device.id.clone(),
            name: self.device.name.clone(),
            endpoint: self.device.endpoint(),
            connected: self.state.connected,
            last_error: self.state.last_error.clone(),
            frames: self.state.frames,
            skipped_telegrams: self.state.skipped_telegrams,
            bytes_received: self.state.bytes_received,
            resyncs,
            started_at: self.state.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            elapsed_secs: self.state.elapsed().as_secs_f64(),
        }
    }
}
