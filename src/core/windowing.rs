//! Window management for accumulating raw events into time windows.
//!
//! Exactly one window is open at a time. Closing a window swaps in a fresh
//! empty one and hands the closed window (and ownership of its buffers) to
//! the caller, so a window instance is never read and written concurrently.

use crate::collector::types::{
    KeyEvent, MotionKind, MotionSample, RawEvent, ScrollEvent, TouchEvent,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A time window containing buffered raw events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventWindow {
    /// Start time of the window
    pub start: DateTime<Utc>,
    /// Configured window length
    pub duration: Duration,
    pub accel: Vec<MotionSample>,
    pub gyro: Vec<MotionSample>,
    pub touches: Vec<TouchEvent>,
    pub scrolls: Vec<ScrollEvent>,
    pub keys: Vec<KeyEvent>,
    /// Merged touch/scroll/key timestamps, in arrival order
    pub event_times: Vec<DateTime<Utc>>,
    /// Most recent diagnostic tag supplied with an interaction
    pub last_event_tag: Option<String>,
}

impl EventWindow {
    /// Create a new empty window starting at the given time.
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            duration,
            accel: Vec::new(),
            gyro: Vec::new(),
            touches: Vec::new(),
            scrolls: Vec::new(),
            keys: Vec::new(),
            event_times: Vec::new(),
            last_event_tag: None,
        }
    }

    /// Append an event to the matching buffer.
    pub fn add_event(&mut self, event: RawEvent) {
        if let Some(ts) = event.timestamp() {
            self.event_times.push(ts);
        }
        if let Some(tag) = event.tag() {
            self.last_event_tag = Some(tag.to_string());
        }

        match event {
            RawEvent::Motion {
                kind: MotionKind::Accelerometer,
                sample,
            } => self.accel.push(sample),
            RawEvent::Motion {
                kind: MotionKind::Gyroscope,
                sample,
            } => self.gyro.push(sample),
            RawEvent::Touch(e) => self.touches.push(e),
            RawEvent::Scroll(e) => self.scrolls.push(e),
            RawEvent::Key(e) => self.keys.push(e),
        }
    }

    /// Check if the window has any events.
    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    /// Number of touch, scroll and key events.
    pub fn interaction_count(&self) -> usize {
        self.touches.len() + self.scrolls.len() + self.keys.len()
    }

    /// Total number of buffered events, motion included.
    pub fn event_count(&self) -> usize {
        self.interaction_count() + self.accel.len() + self.gyro.len()
    }

    /// Window length in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration.num_milliseconds() as f64
    }

    /// Window length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms() / 1000.0
    }

    /// Milliseconds from window start to `ts`, never negative.
    pub fn offset_ms(&self, ts: DateTime<Utc>) -> f64 {
        ((ts - self.start).num_milliseconds() as f64).max(0.0)
    }
}

/// Lifecycle of the window scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not yet started
    Idle,
    /// A window is accumulating
    Open,
    /// A closed window is being extracted, signed or sent while the next
    /// one accumulates
    Closing,
    /// Terminal
    Stopped,
}

/// Owns the open window and decides when it closes.
///
/// A window closes when its configured length has elapsed, or early when it
/// already holds `max_window_events` interaction events, whichever comes
/// first.
#[derive(Debug)]
pub struct WindowManager {
    window_duration: Duration,
    max_window_events: usize,
    current: Option<EventWindow>,
    state: SchedulerState,
    last_emit: Option<DateTime<Utc>>,
}

impl WindowManager {
    pub fn new(window_duration: std::time::Duration, max_window_events: usize) -> Self {
        Self {
            window_duration: Duration::milliseconds(window_duration.as_millis() as i64),
            max_window_events: max_window_events.max(1),
            current: None,
            state: SchedulerState::Idle,
            last_emit: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Timestamp of the most recent close, if any.
    pub fn last_emit(&self) -> Option<DateTime<Utc>> {
        self.last_emit
    }

    /// The window currently accumulating.
    pub fn current(&self) -> Option<&EventWindow> {
        self.current.as_ref()
    }

    /// Open the first window. Only valid from `Idle`.
    pub fn open(&mut self, now: DateTime<Utc>) {
        if self.state == SchedulerState::Idle {
            self.current = Some(EventWindow::new(now, self.window_duration));
            self.state = SchedulerState::Open;
        }
    }

    /// Buffer an event into the open window.
    ///
    /// Returns `true` once the window has reached the event threshold and
    /// should be closed early. Events outside `Open` are ignored.
    pub fn ingest(&mut self, event: RawEvent) -> bool {
        match self.current.as_mut() {
            Some(window) if self.state == SchedulerState::Open => {
                window.add_event(event);
                window.interaction_count() >= self.max_window_events
            }
            _ => false,
        }
    }

    /// Whether the open window has reached its configured length.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.current.as_ref() {
            Some(window) if self.state == SchedulerState::Open => {
                now - window.start >= self.window_duration
            }
            _ => false,
        }
    }

    /// Swap in a fresh window starting at `now` and return the closed one.
    pub fn close(&mut self, now: DateTime<Utc>) -> Option<EventWindow> {
        if self.state != SchedulerState::Open {
            return None;
        }

        let fresh = EventWindow::new(now, self.window_duration);
        self.last_emit = Some(now);
        self.current.replace(fresh)
    }

    /// Enter the terminal state, discarding the open window.
    pub fn stop(&mut self) {
        self.current = None;
        self.state = SchedulerState::Stopped;
    }
}
