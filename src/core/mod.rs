//! Core pipeline stages.
//!
//! This module contains:
//! - Window management for collecting events into time windows
//! - The scheduler thread that opens and closes windows
//! - Feature extraction and its normalization bounds

pub mod features;
pub mod normalize;
pub mod scheduler;
pub mod windowing;

// Re-export commonly used types
pub use features::{classify_touch, extract, FeatureVector, TouchKind};
pub use normalize::{Bound, BOUNDS, FEATURE_DIM};
pub use scheduler::{ClosedWindow, SchedulerConfig, SchedulerError, WindowScheduler};
pub use windowing::{EventWindow, SchedulerState, WindowManager};
