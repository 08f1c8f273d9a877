//! Raw interaction and motion event types.
//!
//! These are the samples the UI layer and motion sensors push into the
//! pipeline. They live only as long as the window that buffers them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which motion sensor produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionKind {
    Accelerometer,
    Gyroscope,
}

/// One accelerometer (g) or gyroscope (rad/s) reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the reading.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Pointer-down or pointer-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchPhase {
    Start,
    End,
}

/// A touch occurrence in screen pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouchEvent {
    pub timestamp: DateTime<Utc>,
    pub phase: TouchPhase,
    pub x: f64,
    pub y: f64,
    /// Contact pressure in [0, 1]; 0 when the device does not report it
    pub pressure: f64,
    pub tag: Option<String>,
}

impl TouchEvent {
    pub fn new(phase: TouchPhase, x: f64, y: f64, pressure: f64, tag: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            x,
            y,
            pressure,
            tag,
        }
    }

    /// Straight-line distance to another touch point.
    pub fn distance_to(&self, other: &TouchEvent) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// A vertical scroll delta (positive = down).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollEvent {
    pub timestamp: DateTime<Utc>,
    pub delta_y: f64,
    pub tag: Option<String>,
}

impl ScrollEvent {
    pub fn new(delta_y: f64, tag: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            delta_y,
            tag,
        }
    }
}

/// A single keystroke. Only timing is kept, never key content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub timestamp: DateTime<Utc>,
    pub tag: Option<String>,
}

impl KeyEvent {
    pub fn new(tag: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            tag,
        }
    }
}

/// Unified raw event carried from the sink to the window scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawEvent {
    Motion {
        kind: MotionKind,
        sample: MotionSample,
    },
    Touch(TouchEvent),
    Scroll(ScrollEvent),
    Key(KeyEvent),
}

impl RawEvent {
    /// Timestamp of interaction events. Motion samples are ordered by
    /// arrival only.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            RawEvent::Motion { .. } => None,
            RawEvent::Touch(e) => Some(e.timestamp),
            RawEvent::Scroll(e) => Some(e.timestamp),
            RawEvent::Key(e) => Some(e.timestamp),
        }
    }

    /// Diagnostic tag attached by the UI, if any.
    pub fn tag(&self) -> Option<&str> {
        match self {
            RawEvent::Motion { .. } => None,
            RawEvent::Touch(e) => e.tag.as_deref(),
            RawEvent::Scroll(e) => e.tag.as_deref(),
            RawEvent::Key(e) => e.tag.as_deref(),
        }
    }

    /// Whether this is a UI interaction (touch, scroll or key).
    pub fn is_interaction(&self) -> bool {
        !matches!(self, RawEvent::Motion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_magnitude() {
        let sample = MotionSample::new(3.0, 4.0, 0.0);
        assert!((sample.magnitude() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_touch_distance() {
        let a = TouchEvent::new(TouchPhase::Start, 10.0, 10.0, 0.0, None);
        let b = TouchEvent::new(TouchPhase::End, 13.0, 14.0, 0.0, None);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_raw_event_accessors() {
        let motion = RawEvent::Motion {
            kind: MotionKind::Gyroscope,
            sample: MotionSample::default(),
        };
        assert!(motion.timestamp().is_none());
        assert!(!motion.is_interaction());

        let key = RawEvent::Key(KeyEvent::new(Some("pin_entry".to_string())));
        assert!(key.timestamp().is_some());
        assert_eq!(key.tag(), Some("pin_entry"));
        assert!(key.is_interaction());
    }
}
