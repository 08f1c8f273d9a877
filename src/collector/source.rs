//! Sensor subscriptions.
//!
//! Motion sensors and platform listeners are external collaborators. They
//! are attached through [`SensorSource`] and detached by dropping the
//! returned [`Subscription`], so stopping the agent cannot leak a listener.

use crate::collector::sink::EventSink;
use crate::collector::types::{MotionKind, MotionSample};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Errors raised while attaching a sensor source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to spawn sensor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Guard for an active sensor listener. Dropping it unsubscribes.
pub struct Subscription {
    name: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Name of the source this subscription belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unsubscribe now.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            tracing::debug!(source = %self.name, "Sensor subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A push-based producer of raw samples.
pub trait SensorSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start pushing samples into `sink` until the subscription is dropped.
    fn subscribe(&self, sink: EventSink) -> Result<Subscription, SourceError>;
}

/// Generates accelerometer and gyroscope readings of a device at rest,
/// with a little hand tremor. Used by the CLI and for desktop testing.
#[derive(Debug, Clone)]
pub struct SyntheticMotionSource {
    interval: Duration,
}

impl SyntheticMotionSource {
    /// Default sampling interval (20 Hz).
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for SyntheticMotionSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}

impl SensorSource for SyntheticMotionSource {
    fn name(&self) -> &str {
        "synthetic-motion"
    }

    fn subscribe(&self, sink: EventSink) -> Result<Subscription, SourceError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("synthetic-motion".to_string())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                while flag.load(Ordering::SeqCst) {
                    let tremor = |rng: &mut rand::rngs::ThreadRng| rng.gen_range(-0.02..0.02);
                    sink.on_motion(
                        MotionKind::Accelerometer,
                        MotionSample::new(tremor(&mut rng), tremor(&mut rng), 1.0 + tremor(&mut rng)),
                    );
                    sink.on_motion(
                        MotionKind::Gyroscope,
                        MotionSample::new(tremor(&mut rng), tremor(&mut rng), tremor(&mut rng)),
                    );
                    thread::sleep(interval);
                }
            })?;

        Ok(Subscription::new(self.name(), move || {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
        }))
    }
}
