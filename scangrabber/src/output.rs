/*!
Point set consumer.

Runs on its own thread, fed by the poll loop through a bounded channel. In live
mode every scan is written to stdout as one JSON line; otherwise scans are only
counted.
*/

use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info};
use lmd_shared::PointSet;

/// What the consumer saw over a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerStats {
    pub scans: u64,
    pub points: u64,
    pub write_errors: u64,
}

/// Start the consumer thread; it exits once every sender is dropped
pub fn spawn_consumer(
    point_rx: Receiver<PointSet>,
    live_output: bool,
    decimation: usize,
    stats_interval: Duration,
) -> thread::JoinHandle<ConsumerStats> {
    thread::spawn(move || {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        consume(&point_rx, &mut out, live_output, decimation, stats_interval)
    })
}

fn consume<W: Write>(
    point_rx: &Receiver<PointSet>,
    out: &mut W,
    live_output: bool,
    decimation: usize,
    stats_interval: Duration,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    let mut last_report = Instant::now();
    let mut scans_since_report = 0u64;

    loop {
        match point_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(mut point_set) => {
                stats.scans += 1;
                stats.points += point_set.len() as u64;
                scans_since_report += 1;

                if live_output {
                    if let Err(e) = write_point_set(out, &mut point_set, decimation) {
                        error!("❌ Failed to write scan {} from {}: {:#}",
                               point_set.scan_number, point_set.device_id, e);
                        stats.write_errors += 1;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("Point channel disconnected - poll loop has stopped");
                break;
            }
        }

        let elapsed = last_report.elapsed();
        if elapsed >= stats_interval {
            info!("📊 Consumer: {:.1} scans/s, {} scans, {} points total",
                  scans_since_report as f64 / elapsed.as_secs_f64(), stats.scans, stats.points);
            scans_since_report = 0;
            last_report = Instant::now();
        }
    }

    stats
}

/// Write one scan as a JSON line
pub fn write_point_set<W: Write>(out: &mut W, point_set: &mut PointSet, decimation: usize) -> Result<()> {
    point_set.decimate(decimation);
    let line = point_set.to_json_line()
        .with_context(|| format!("Failed to encode scan {}", point_set.scan_number))?;

    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmd_shared::Point2D;

    fn point_set(scan_number: u64) -> PointSet {
        PointSet::new("front", scan_number, vec![
            Point2D::new(1.0, 0.0),
            Point2D::new(0.0, 1.0),
            Point2D::new(-1.0, 0.0),
            Point2D::new(0.0, -1.0),
        ])
    }

    #[test]
    fn test_write_point_set_line() {
        let mut out = Vec::new();
        let mut set = point_set(3);
        write_point_set(&mut out, &mut set, 2).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["scan_number"], 3);
        assert_eq!(value["num_points"], 2);
        assert_eq!(value["x"], serde_json::json!([1.0, -1.0]));
    }

    #[test]
    fn test_consume_until_disconnected() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(point_set(1)).unwrap();
        tx.send(point_set(2)).unwrap();
        drop(tx);

        let mut out = Vec::new();
        let stats = consume(&rx, &mut out, true, 1, Duration::from_secs(60));

        assert_eq!(stats, ConsumerStats { scans: 2, points: 8, write_errors: 0 });
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_counting_mode_writes_nothing() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(point_set(1)).unwrap();
        drop(tx);

        let mut out = Vec::new();
        let stats = consume(&rx, &mut out, false, 1, Duration::from_secs(60));
        assert_eq!(stats.scans, 1);
        assert!(out.is_empty());
    }
}
