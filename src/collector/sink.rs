//! Raw event sink: the non-blocking ingestion surface for UI and sensors.
//!
//! Every call timestamps the sample, pushes it onto the bounded raw event
//! channel that feeds the window scheduler, and returns immediately. A full
//! channel drops the sample and counts the drop; nothing here can fail.

use crate::collector::context::SharedContext;
use crate::collector::types::{
    KeyEvent, MotionKind, MotionSample, RawEvent, ScrollEvent, TouchEvent, TouchPhase,
};
use crate::transparency::SharedTransparencyLog;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Create the bounded raw event channel.
pub fn raw_event_channel(capacity: usize) -> (Sender<RawEvent>, Receiver<RawEvent>) {
    bounded(capacity.max(1))
}

/// Cloneable handle given to the UI layer and sensor sources.
#[derive(Clone)]
pub struct EventSink {
    sender: Sender<RawEvent>,
    context: SharedContext,
    log: SharedTransparencyLog,
    active: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(sender: Sender<RawEvent>, context: SharedContext, log: SharedTransparencyLog) -> Self {
        Self {
            sender,
            context,
            log,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Accept or ignore subsequent samples. Inactive sinks are no-ops.
    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Whether samples are currently accepted.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Ingest one accelerometer or gyroscope reading.
    pub fn on_motion(&self, kind: MotionKind, sample: MotionSample) {
        self.push(RawEvent::Motion { kind, sample });
    }

    /// Ingest a pointer-down or pointer-up.
    pub fn on_touch(&self, phase: TouchPhase, x: f64, y: f64, pressure: f64, tag: Option<&str>) {
        self.push(RawEvent::Touch(TouchEvent::new(
            phase,
            x,
            y,
            pressure,
            tag.map(str::to_string),
        )));
    }

    /// Ingest a scroll delta in pixels (positive = down).
    pub fn on_scroll(&self, delta_y: f64, tag: Option<&str>) {
        self.push(RawEvent::Scroll(ScrollEvent::new(
            delta_y,
            tag.map(str::to_string),
        )));
    }

    /// Ingest one keystroke occurrence.
    pub fn on_key(&self, tag: Option<&str>) {
        self.push(RawEvent::Key(KeyEvent::new(tag.map(str::to_string))));
    }

    /// Screen dimensions changed (rotation, split screen).
    pub fn on_screen_size(&self, width: f64, height: f64) {
        self.context.set_screen_size(width, height);
    }

    /// Battery level changed; `None` when the platform cannot report it.
    pub fn on_battery_level(&self, level: Option<f64>) {
        self.context.set_battery_level(level);
    }

    /// App moved to the foreground or background.
    pub fn on_app_state(&self, foreground: bool) {
        self.context.set_foreground(foreground);
    }

    fn push(&self, event: RawEvent) {
        if !self.is_active() {
            return;
        }

        let interaction = event.is_interaction();
        let kind = match &event {
            RawEvent::Motion { .. } => EventKind::Motion,
            RawEvent::Touch(_) => EventKind::Touch,
            RawEvent::Scroll(_) => EventKind::Scroll,
            RawEvent::Key(_) => EventKind::Key,
        };

        match self.sender.try_send(event) {
            Ok(()) => match kind {
                EventKind::Motion => self.log.record_motion_sample(),
                EventKind::Touch => self.log.record_touch_event(),
                EventKind::Scroll => self.log.record_scroll_event(),
                EventKind::Key => self.log.record_key_event(),
            },
            Err(TrySendError::Full(_)) => {
                self.log.record_dropped_event();
                if interaction {
                    tracing::debug!("Raw event channel full, dropping interaction event");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[derive(Clone, Copy)]
enum EventKind {
    Motion,
    Touch,
    Scroll,
    Key,
}
