//! Transparency module.
//!
//! Tracks and exposes counts of what the telemetry pipeline collects and
//! transmits, so users can audit it.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
