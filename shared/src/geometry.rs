/*!
Scan geometry: polar samples to Cartesian points in the shared reference frame.

Each sensor reports points in its own frame. A fixed mounting yaw rotates them
into the frame shared by every sensor, so a rear-facing unit (yaw 180°) lands
its points behind the front unit's origin.
*/

use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::telegram::{PolarSample, ScanRecord};

/// A point in metres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert a range/angle pair to sensor-local coordinates
    pub fn from_polar(range_m: f64, angle_rad: f64) -> Self {
        Self::new(range_m * angle_rad.cos(), range_m * angle_rad.sin())
    }
}

impl From<PolarSample> for Point2D {
    fn from(sample: PolarSample) -> Self {
        Self::from_polar(sample.range_m, sample.angle_rad)
    }
}

/// Fixed rotation from a sensor's frame into the shared frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountingRotation {
    cos: f64,
    sin: f64,
}

impl MountingRotation {
    /// Build the rotation for a yaw in degrees; the trig terms are cached
    pub fn from_degrees(yaw_deg: f64) -> Self {
        let yaw_rad = yaw_deg.to_radians();
        Self {
            cos: yaw_rad.cos(),
            sin: yaw_rad.sin(),
        }
    }

    /// The identity rotation
    pub fn identity() -> Self {
        Self::from_degrees(0.0)
    }

    /// Rotate one point
    pub fn apply(&self, point: Point2D) -> Point2D {
        Point2D {
            x: self.cos * point.x - self.sin * point.y,
            y: self.sin * point.x + self.cos * point.y,
        }
    }

    /// Convert every valid sample of a scan into shared-frame points
    pub fn project(&self, scan: &ScanRecord) -> Vec<Point2D> {
        scan.polar_samples()
            .map(|sample| self.apply(Point2D::from(sample)))
            .collect()
    }
}

impl Default for MountingRotation {
    fn default() -> Self {
        Self::identity()
    }
}

/// Points of one decoded scan, tagged with the sensor that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    pub device_id: String,
    /// Per-device scan counter, starting at 1
    pub scan_number: u64,
    pub points: Vec<Point2D>,
}

impl PointSet {
    pub fn new(device_id: impl Into<String>, scan_number: u64, points: Vec<Point2D>) -> Self {
        Self {
            device_id: device_id.into(),
            scan_number,
            points,
        }
    }

    /// Get the number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the scan produced no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Keep every `factor`-th point
    pub fn decimate(&mut self, factor: usize) {
        if factor <= 1 {
            return;
        }

        self.points = self.points
            .iter()
            .step_by(factor)
            .copied()
            .collect();
    }

    /// Serialize as one JSON object with separate `x` and `y` arrays
    pub fn to_json_line(&self) -> Result<String> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = self.points.iter().map(|p| (p.x, p.y)).unzip();

        let json_output = serde_json::json!({
            "device_id": self.device_id,
            "scan_number": self.scan_number,
            "num_points": self.points.len(),
            "x": xs,
            "y": ys,
        });

        Ok(serde_json::to_string(&json_output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn assert_close(actual: Point2D, expected: Point2D) {
        assert!((actual.x - expected.x).abs() < TOLERANCE, "{:?} != {:?}", actual, expected);
        assert!((actual.y - expected.y).abs() < TOLERANCE, "{:?} != {:?}", actual, expected);
    }

    #[test]
    fn test_rear_mount_rotation() {
        let rotation = MountingRotation::from_degrees(180.0);
        assert_close(rotation.apply(Point2D::new(3.0, 4.0)), Point2D::new(-3.0, -4.0));
    }

    #[test]
    fn test_zero_yaw_is_identity() {
        let rotation = MountingRotation::identity();
        for point in [Point2D::new(3.0, 4.0), Point2D::new(-1.5, 0.25), Point2D::new(0.0, 0.0)] {
            assert_eq!(rotation.apply(point), point);
        }
    }

    #[test]
    fn test_quarter_turn() {
        let rotation = MountingRotation::from_degrees(90.0);
        assert_close(rotation.apply(Point2D::new(1.0, 0.0)), Point2D::new(0.0, 1.0));
        assert_close(rotation.apply(Point2D::new(0.0, 2.0)), Point2D::new(-2.0, 0.0));
    }

    #[test]
    fn test_project_drops_missing_returns() {
        let scan = ScanRecord {
            scale_factor: 1.0,
            start_angle_deg: 0.0,
            angle_step_deg: 90.0,
            declared_count: 4,
            samples: vec![1000, 0, 2000, 500],
        };

        let local = MountingRotation::identity().project(&scan);
        assert_eq!(local.len(), 3);
        assert_close(local[0], Point2D::new(1.0, 0.0));
        assert_close(local[1], Point2D::new(-2.0, 0.0));
        assert_close(local[2], Point2D::new(0.0, -0.5));

        let rear = MountingRotation::from_degrees(180.0).project(&scan);
        assert_close(rear[0], Point2D::new(-1.0, 0.0));
        assert_close(rear[1], Point2D::new(2.0, 0.0));
        assert_close(rear[2], Point2D::new(0.0, 0.5));
    }

    #[test]
    fn test_empty_scan_projects_to_nothing() {
        let scan = ScanRecord {
            scale_factor: 1.0,
            start_angle_deg: -45.0,
            angle_step_deg: 0.5,
            declared_count: 0,
            samples: Vec::new(),
        };
        assert!(MountingRotation::from_degrees(30.0).project(&scan).is_empty());
    }

    #[test]
    fn test_point_set_json_and_decimation() {
        let mut set = PointSet::new("front", 7, vec![
            Point2D::new(1.0, 2.0),
            Point2D::new(3.0, 4.0),
            Point2D::new(5.0, 6.0),
        ]);
        set.decimate(2);
        assert_eq!(set.len(), 2);

        let value: serde_json::Value = serde_json::from_str(&set.to_json_line().unwrap()).unwrap();
        assert_eq!(value["device_id"], "front");
        assert_eq!(value["scan_number"], 7);
        assert_eq!(value["num_points"], 2);
        assert_eq!(value["x"], serde_json::json!([1.0, 5.0]));
        assert_eq!(value["y"], serde_json::json!([2.0, 6.0]));
    }
}
