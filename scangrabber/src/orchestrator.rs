/*!
Session orchestration: one cooperative poll loop over every configured device.

Sessions are created and connected once at startup. Each tick polls every
session in order; polls never block, so an idle or failed device cannot hold up
the others. Shutdown stops every session and produces the end-of-run summary.
*/

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use lmd_shared::PointSet;
use crate::config::AppConfig;
use crate::session::{DeviceSession, SessionStats};

/// Elapsed times below this report a zero rate
const MIN_ELAPSED_SECS: f64 = 1e-3;

/// Drives all device sessions
pub struct SessionOrchestrator {
    sessions: Vec<DeviceSession>,
    poll_interval: Duration,
    stats_interval: Duration,
}

impl SessionOrchestrator {
    /// Create one disconnected session per configured device
    pub fn new(config: &AppConfig) -> Self {
        let sessions = config.devices
            .iter()
            .map(|device| DeviceSession::new(device.clone(), &config.scanner))
            .collect();

        Self {
            sessions,
            poll_interval: config.scanner.poll_interval(),
            stats_interval: Duration::from_secs(config.scanner.stats_interval_seconds.max(1)),
        }
    }

    /// Connect every session in configuration order; returns how many succeeded
    pub async fn connect_all(&mut self) -> usize {
        for session in &mut self.sessions {
            session.connect().await;
        }
        let connected = self.sessions.iter().filter(|session| session.is_connected()).count();

        info!("📡 {} of {} devices connected", connected, self.sessions.len());
        connected
    }

    /// Poll every session once
    pub fn tick(&mut self) -> Vec<PointSet> {
        self.sessions
            .iter_mut()
            .flat_map(|session| session.poll())
            .collect()
    }

    /// Tick at the poll interval until the running flag is cleared, forwarding
    /// point sets to the consumer without ever waiting on it
    pub async fn run(&mut self, running: Arc<AtomicBool>, sink: &Sender<PointSet>) -> RunStats {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats = RunStats::default();
        let mut last_report = Instant::now();

        while running.load(Ordering::SeqCst) {
            interval.tick().await;
            stats.ticks += 1;

            for point_set in self.tick() {
                match sink.try_send(point_set) {
                    Ok(()) => stats.delivered += 1,
                    Err(TrySendError::Full(point_set)) => {
                        error!("Point channel full, dropping scan {} from {}! The consumer can't keep up.",
                               point_set.scan_number, point_set.device_id);
                        stats.dropped += 1;
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("Point consumer has stopped, discarding scans");
                        stats.dropped += 1;
                    }
                }
            }

            if last_report.elapsed() >= self.stats_interval {
                for session in self.stats() {
                    info!("📊 {}: connected={}, frames={}, skipped={}, resyncs={}, {:.1} KB received since {}",
                          session.name, session.connected, session.frames, session.skipped_telegrams,
                          session.resyncs, session.bytes_received as f64 / 1024.0, session.started_at);
                }
                last_report = Instant::now();
            }
        }

        info!("📈 Poll loop stopped after {} ticks ({} scans delivered, {} dropped)",
              stats.ticks, stats.delivered, stats.dropped);
        stats
    }

    /// Snapshot of every session
    pub fn stats(&self) -> Vec<SessionStats> {
        self.sessions.iter().map(DeviceSession::stats).collect()
    }

    /// Stop every session and summarise the run
    pub async fn shutdown(mut self) -> SessionSummary {
        // Rates are measured up to the moment shutdown starts
        let devices = self.stats().iter().map(DeviceSummary::from_stats).collect();

        for session in &mut self.sessions {
            session.shutdown().await;
        }

        SessionSummary { devices }
    }
}

/// Counters of one poll loop run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub ticks: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

/// Average scan rate over a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanRate {
    pub per_second: f64,
    pub per_minute: u64,
}

impl ScanRate {
    /// `frames / elapsed`, or zero when almost no time has passed
    pub fn compute(frames: u64, elapsed_secs: f64) -> Self {
        if !(elapsed_secs >= MIN_ELAPSED_SECS) {
            return Self { per_second: 0.0, per_minute: 0 };
        }

        let per_second = frames as f64 / elapsed_secs;
        Self {
            per_second,
            per_minute: (per_second * 60.0) as u64,
        }
    }
}

/// Final report line for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub status: DeviceStatus,
    /// Why the device is disconnected
    pub reason: Option<String>,
    /// Scans counted toward the run; zero for disconnected devices
    pub frames: u64,
    /// Scans a disconnected device decoded before its stream failed
    pub frames_before_failure: Option<u64>,
    /// `None` for disconnected devices
    pub rate: Option<ScanRate>,
}

impl DeviceSummary {
    pub fn from_stats(stats: &SessionStats) -> Self {
        let (status, rate) = if stats.connected {
            (DeviceStatus::Connected, Some(ScanRate::compute(stats.frames, stats.elapsed_secs)))
        } else {
            (DeviceStatus::Disconnected, None)
        };

        Self {
            id: stats.id.clone(),
            name: stats.name.clone(),
            endpoint: stats.endpoint.clone(),
            status,
            reason: if stats.connected { None } else { stats.last_error.clone() },
            frames: if stats.connected { stats.frames } else { 0 },
            frames_before_failure: (!stats.connected && stats.frames > 0).then_some(stats.frames),
            rate,
        }
    }
}

/// End-of-run summary over all devices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub devices: Vec<DeviceSummary>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(48);
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:^48}", "FINAL SESSION SUMMARY")?;
        writeln!(f, "{}", rule)?;

        for device in &self.devices {
            writeln!(f, "Device: {} [{}]", device.name, device.endpoint)?;
            writeln!(f, "Status: {}", device.status)?;
            if let Some(reason) = &device.reason {
                writeln!(f, "Reason: {}", reason)?;
            }
            writeln!(f, "Frames: {}", device.frames)?;
            if let Some(frames) = device.frames_before_failure {
                writeln!(f, "Frames before failure: {}", frames)?;
            }
            match &device.rate {
                Some(rate) => writeln!(f, "Avg Rate: {:.2} Hz ({} FPM)", rate.per_second, rate.per_minute)?,
                None => writeln!(f, "Avg Rate: N/A")?,
            }
            writeln!(f, "{}", "-".repeat(48))?;
        }

        Ok(())
    }
}
