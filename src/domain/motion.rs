//! Motion Processor
//!
//! Derives orientation and a coarse motion state from the phone's motion
//! sensor feed. The cut-offs are heuristics, so every one of them lives in
//! [`MotionThresholds`] and can be tuned from the settings file.
//!
//! This is library API: the `smartbot-link` console has no motion feed, so
//! nothing in the binary builds a processor. Embedders pass
//! `Settings::motion` to [`MotionProcessor::new`].

use crate::domain::collaborators::{MotionAxis, MotionSample};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotionThresholds {
    /// Gyro magnitude (rad/s) above which the device counts as rotating
    #[serde(default = "default_rotating")]
    pub rotating: f32,
    /// Acceleration magnitudes (m/s²), checked from the top down
    #[serde(default = "default_shaking")]
    pub shaking: f32,
    #[serde(default = "default_running")]
    pub running: f32,
    #[serde(default = "default_walking")]
    pub walking: f32,
    /// Below this the reading is not plausible for a device at rest
    #[serde(default = "default_gravity_floor")]
    pub gravity_floor: f32,
    /// |z| above this means the screen faces straight up or down
    #[serde(default = "default_flat_axis")]
    pub flat_axis: f32,
}

fn default_rotating() -> f32 {
    2.0
}
fn default_shaking() -> f32 {
    15.0
}
fn default_running() -> f32 {
    12.0
}
fn default_walking() -> f32 {
    10.5
}
fn default_gravity_floor() -> f32 {
    9.0
}
fn default_flat_axis() -> f32 {
    8.0
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self {
            rotating: default_rotating(),
            shaking: default_shaking(),
            running: default_running(),
            walking: default_walking(),
            gravity_floor: default_gravity_floor(),
            flat_axis: default_flat_axis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Stationary,
    Walking,
    Running,
    Shaking,
    Rotating,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSnapshot {
    pub timestamp_ms: u64,
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub magnetic: [f32; 3],
    pub total_acceleration: f32,
    pub total_rotation: f32,
    pub orientation: DeviceOrientation,
    pub state: MotionState,
}

/// Folds samples from a [`MotionFeed`](crate::domain::collaborators::MotionFeed)
/// into a running [`MotionSnapshot`]
pub struct MotionProcessor {
    thresholds: MotionThresholds,
    snapshot: MotionSnapshot,
}

impl MotionProcessor {
    pub fn new(thresholds: MotionThresholds) -> Self {
        Self {
            thresholds,
            snapshot: MotionSnapshot::default(),
        }
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        self.snapshot
    }

    pub fn process(&mut self, sample: &MotionSample) -> MotionSnapshot {
        let values = [sample.x, sample.y, sample.z];
        match sample.axis {
            MotionAxis::Accelerometer => self.snapshot.accel = values,
            MotionAxis::Gyroscope => self.snapshot.gyro = values,
            MotionAxis::Magnetometer => self.snapshot.magnetic = values,
        }

        let snapshot = &mut self.snapshot;
        snapshot.timestamp_ms = sample.timestamp_ms;
        snapshot.total_acceleration = magnitude(snapshot.accel);
        snapshot.total_rotation = magnitude(snapshot.gyro);
        snapshot.orientation = classify_orientation(snapshot.accel, &self.thresholds);
        snapshot.state = classify_motion(
            snapshot.total_acceleration,
            snapshot.total_rotation,
            &self.thresholds,
        );
        *snapshot
    }

    /// Drop accumulated readings
    pub fn reset(&mut self) {
        self.snapshot = MotionSnapshot::default();
        tracing::info!("Motion baseline reset");
    }
}

fn magnitude([x, y, z]: [f32; 3]) -> f32 {
    (x * x + y * y + z * z).sqrt()
}

pub fn classify_orientation([x, y, z]: [f32; 3], thresholds: &MotionThresholds) -> DeviceOrientation {
    if z.abs() > thresholds.flat_axis {
        if z > 0.0 {
            DeviceOrientation::FaceDown
        } else {
            DeviceOrientation::FaceUp
        }
    } else if y.abs() > x.abs() {
        if y > 0.0 {
            DeviceOrientation::PortraitUpsideDown
        } else {
            DeviceOrientation::Portrait
        }
    } else if x > 0.0 {
        DeviceOrientation::LandscapeLeft
    } else if x < 0.0 {
        DeviceOrientation::LandscapeRight
    } else {
        DeviceOrientation::Unknown
    }
}

pub fn classify_motion(
    total_acceleration: f32,
    total_rotation: f32,
    thresholds: &MotionThresholds,
) -> MotionState {
    if total_rotation > thresholds.rotating {
        MotionState::Rotating
    } else if total_acceleration > thresholds.shaking {
        MotionState::Shaking
    } else if total_acceleration > thresholds.running {
        MotionState::Running
    } else if total_acceleration > thresholds.walking {
        MotionState::Walking
    } else if total_acceleration >= thresholds.gravity_floor {
        MotionState::Stationary
    } else {
        MotionState::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collaborators::MotionFeed;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ScriptedFeed {
        samples: Vec<MotionSample>,
        interval: Option<Duration>,
    }

    impl MotionFeed for ScriptedFeed {
        fn start(&mut self, interval: Duration) -> mpsc::Receiver<MotionSample> {
            self.interval = Some(interval);
            let (tx, rx) = mpsc::channel(self.samples.len().max(1));
            for sample in self.samples.drain(..) {
                let _ = tx.try_send(sample);
            }
            rx
        }

        fn stop(&mut self) {
            self.interval = None;
        }
    }

    fn sample(axis: MotionAxis, timestamp_ms: u64, x: f32, y: f32, z: f32) -> MotionSample {
        MotionSample {
            axis,
            timestamp_ms,
            x,
            y,
            z,
        }
    }

    #[test]
    fn test_resting_phone_is_face_up_and_stationary() {
        let mut processor = MotionProcessor::new(MotionThresholds::default());
        let snapshot = processor.process(&sample(MotionAxis::Accelerometer, 1, 0.1, 0.2, -9.8));

        assert_eq!(snapshot.orientation, DeviceOrientation::FaceUp);
        assert_eq!(snapshot.state, MotionState::Stationary);
        assert!((snapshot.total_acceleration - 9.8).abs() < 0.05);
    }

    #[test]
    fn test_motion_bands() {
        let t = MotionThresholds::default();
        assert_eq!(classify_motion(9.8, 3.0, &t), MotionState::Rotating);
        assert_eq!(classify_motion(16.0, 0.0, &t), MotionState::Shaking);
        assert_eq!(classify_motion(13.0, 0.0, &t), MotionState::Running);
        assert_eq!(classify_motion(11.0, 0.0, &t), MotionState::Walking);
        assert_eq!(classify_motion(4.0, 0.0, &t), MotionState::Unknown);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let t = MotionThresholds {
            walking: 10.0,
            ..MotionThresholds::default()
        };
        assert_eq!(classify_motion(10.2, 0.0, &t), MotionState::Walking);
    }

    #[test]
    fn test_orientation() {
        let t = MotionThresholds::default();
        assert_eq!(classify_orientation([0.0, -9.8, 0.0], &t), DeviceOrientation::Portrait);
        assert_eq!(
            classify_orientation([0.0, 9.8, 0.0], &t),
            DeviceOrientation::PortraitUpsideDown
        );
        assert_eq!(classify_orientation([9.8, 0.0, 0.0], &t), DeviceOrientation::LandscapeLeft);
        assert_eq!(classify_orientation([-9.8, 0.0, 0.0], &t), DeviceOrientation::LandscapeRight);
        assert_eq!(classify_orientation([0.0, 0.0, 9.8], &t), DeviceOrientation::FaceDown);
        assert_eq!(classify_orientation([0.0, 0.0, 0.0], &t), DeviceOrientation::Unknown);
    }

    #[tokio::test]
    async fn test_processes_feed() {
        let mut feed = ScriptedFeed {
            samples: vec![
                sample(MotionAxis::Accelerometer, 10, 0.0, -9.8, 0.0),
                sample(MotionAxis::Gyroscope, 20, 0.0, 0.0, 2.5),
            ],
            interval: None,
        };
        let mut rx = feed.start(Duration::from_millis(20));
        assert_eq!(feed.interval, Some(Duration::from_millis(20)));

        let mut processor = MotionProcessor::new(MotionThresholds::default());
        while let Ok(s) = rx.try_recv() {
            processor.process(&s);
        }
        feed.stop();

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.timestamp_ms, 20);
        assert_eq!(snapshot.orientation, DeviceOrientation::Portrait);
        assert_eq!(snapshot.state, MotionState::Rotating);

        processor.reset();
        assert_eq!(processor.snapshot(), MotionSnapshot::default());
    }
}
