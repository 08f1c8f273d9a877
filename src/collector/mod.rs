//! Raw event collection.
//!
//! This module provides the ingestion surface for touch, scroll, keystroke
//! and motion samples, the ambient context they are interpreted against,
//! and the seams for external sensor and device-info collaborators.

pub mod context;
pub mod device;
pub mod sink;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use context::{ContextSnapshot, ContextState, Orientation, SharedContext};
pub use device::{DeviceContext, DeviceInfoProvider, HostDeviceInfo, ProbeError};
pub use sink::{raw_event_channel, EventSink};
pub use source::{SensorSource, SourceError, Subscription, SyntheticMotionSource};
pub use types::{
    KeyEvent, MotionKind, MotionSample, RawEvent, ScrollEvent, TouchEvent, TouchPhase,
};
