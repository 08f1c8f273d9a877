//! Transparency log of what the pipeline collected and transmitted.
//!
//! Only counters are kept: no coordinates, tags or vectors are stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collection counters for the current process.
#[derive(Debug)]
pub struct TransparencyLog {
    touch_events: AtomicU64,
    scroll_events: AtomicU64,
    key_events: AtomicU64,
    motion_samples: AtomicU64,
    /// Raw samples dropped because the ingestion channel was full
    dropped_events: AtomicU64,
    windows_completed: AtomicU64,
    envelopes_sent: AtomicU64,
    envelopes_queued: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            touch_events: AtomicU64::new(0),
            scroll_events: AtomicU64::new(0),
            key_events: AtomicU64::new(0),
            motion_samples: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            windows_completed: AtomicU64::new(0),
            envelopes_sent: AtomicU64::new(0),
            envelopes_queued: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that resumes from, and saves to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "Could not load previous transparency stats");
        }

        log
    }

    pub fn record_touch_event(&self) {
        self.touch_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scroll_event(&self) {
        self.scroll_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_event(&self) {
        self.key_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_motion_sample(&self) {
        self.motion_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_event(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_completed(&self) {
        self.windows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_envelope_sent(&self) {
        self.envelopes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_envelope_queued(&self) {
        self.envelopes_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            touch_events: self.touch_events.load(Ordering::Relaxed),
            scroll_events: self.scroll_events.load(Ordering::Relaxed),
            key_events: self.key_events.load(Ordering::Relaxed),
            motion_samples: self.motion_samples.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            envelopes_sent: self.envelopes_sent.load(Ordering::Relaxed),
            envelopes_queued: self.envelopes_queued.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Touch events: {}\n\
             - Scroll events: {}\n\
             - Keystrokes: {}\n\
             - Motion samples: {}\n\
             - Dropped samples: {}\n\
             - Windows completed: {}\n\
             - Envelopes sent: {}\n\
             - Envelopes queued: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No key content captured\n\
             - Raw samples discarded after each window\n\
             - Only the 48-value feature vector leaves the device",
            stats.touch_events,
            stats.scroll_events,
            stats.key_events,
            stats.motion_samples,
            stats.dropped_events,
            stats.windows_completed,
            stats.envelopes_sent,
            stats.envelopes_queued,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                touch_events: stats.touch_events,
                scroll_events: stats.scroll_events,
                key_events: stats.key_events,
                motion_samples: stats.motion_samples,
                dropped_events: stats.dropped_events,
                windows_completed: stats.windows_completed,
                envelopes_sent: stats.envelopes_sent,
                envelopes_queued: stats.envelopes_queued,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.touch_events
                    .store(persisted.touch_events, Ordering::Relaxed);
                self.scroll_events
                    .store(persisted.scroll_events, Ordering::Relaxed);
                self.key_events.store(persisted.key_events, Ordering::Relaxed);
                self.motion_samples
                    .store(persisted.motion_samples, Ordering::Relaxed);
                self.dropped_events
                    .store(persisted.dropped_events, Ordering::Relaxed);
                self.windows_completed
                    .store(persisted.windows_completed, Ordering::Relaxed);
                self.envelopes_sent
                    .store(persisted.envelopes_sent, Ordering::Relaxed);
                self.envelopes_queued
                    .store(persisted.envelopes_queued, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub touch_events: u64,
    pub scroll_events: u64,
    pub key_events: u64,
    pub motion_samples: u64,
    pub dropped_events: u64,
    pub windows_completed: u64,
    pub envelopes_sent: u64,
    pub envelopes_queued: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    touch_events: u64,
    scroll_events: u64,
    key_events: u64,
    motion_samples: u64,
    #[serde(default)]
    dropped_events: u64,
    windows_completed: u64,
    envelopes_sent: u64,
    envelopes_queued: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
