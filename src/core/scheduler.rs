//! Window scheduler: drives the window lifecycle on a dedicated thread.
//!
//! The thread drains the raw event channel into the open window and wakes
//! on a periodic tick to check the window length. Closed windows are handed
//! to the async emission task over an unbounded channel, in close order.

use crate::collector::types::RawEvent;
use crate::core::windowing::{EventWindow, SchedulerState, WindowManager};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Window length `W`
    pub window_duration: Duration,
    /// Period of the expiry check
    pub tick_period: Duration,
    /// Interaction events that close a window early
    pub max_window_events: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_duration: Duration::from_secs(10),
            tick_period: Duration::from_secs(1),
            max_window_events: 512,
        }
    }
}

/// Errors that can occur when starting the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,
    #[error("Scheduler has been stopped")]
    Stopped,
    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A closed window on its way through extraction, signing and sending.
///
/// The scheduler reports `Closing` until every `ClosedWindow` it produced
/// has been dropped by the consumer.
#[derive(Debug)]
pub struct ClosedWindow {
    pub window: EventWindow,
    _in_flight: InFlight,
}

#[derive(Debug)]
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the scheduler thread.
pub struct WindowScheduler {
    config: SchedulerConfig,
    state: Arc<Mutex<SchedulerState>>,
    in_flight: Arc<AtomicUsize>,
    last_emit: Arc<Mutex<Option<DateTime<Utc>>>>,
    shutdown: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WindowScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_emit: Arc::new(Mutex::new(None)),
            shutdown: None,
            thread_handle: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        let state = *self.state.lock();
        if state == SchedulerState::Open && self.in_flight.load(Ordering::SeqCst) > 0 {
            SchedulerState::Closing
        } else {
            state
        }
    }

    /// When the most recent window closed, if any has.
    pub fn last_emit(&self) -> Option<DateTime<Utc>> {
        *self.last_emit.lock()
    }

    /// Open the first window and start the tick thread.
    ///
    /// Samples already waiting in `events` predate the window and are
    /// discarded.
    pub fn start(
        &mut self,
        events: Receiver<RawEvent>,
        closed: UnboundedSender<ClosedWindow>,
    ) -> Result<(), SchedulerError> {
        match *self.state.lock() {
            SchedulerState::Idle => {}
            SchedulerState::Stopped => return Err(SchedulerError::Stopped),
            SchedulerState::Open | SchedulerState::Closing => {
                return Err(SchedulerError::AlreadyRunning)
            }
        }

        while events.try_recv().is_ok() {}
        *self.state.lock() = SchedulerState::Open;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let config = self.config.clone();
        let state = self.state.clone();
        let in_flight = self.in_flight.clone();
        let last_emit = self.last_emit.clone();

        let spawned = thread::Builder::new()
            .name("window-scheduler".to_string())
            .spawn(move || {
                run_loop(
                    config,
                    events,
                    closed,
                    shutdown_rx,
                    state,
                    in_flight,
                    last_emit,
                )
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                *self.state.lock() = SchedulerState::Idle;
                return Err(e.into());
            }
        };

        self.shutdown = Some(shutdown_tx);
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the tick and discard the open window. Safe from any state.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the shutdown channel
        self.shutdown.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        *self.state.lock() = SchedulerState::Stopped;
    }
}

impl Drop for WindowScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    config: SchedulerConfig,
    events: Receiver<RawEvent>,
    closed: UnboundedSender<ClosedWindow>,
    shutdown: Receiver<()>,
    state: Arc<Mutex<SchedulerState>>,
    in_flight: Arc<AtomicUsize>,
    last_emit: Arc<Mutex<Option<DateTime<Utc>>>>,
) {
    let mut manager = WindowManager::new(config.window_duration, config.max_window_events);
    manager.open(Utc::now());

    let ticker = tick(config.tick_period);
    tracing::info!(
        window_ms = config.window_duration.as_millis() as u64,
        tick_ms = config.tick_period.as_millis() as u64,
        "Window scheduler started"
    );

    let emit = |manager: &mut WindowManager, reason: &str| -> bool {
        let now = Utc::now();
        match manager.close(now) {
            Some(window) => {
                *last_emit.lock() = manager.last_emit();
                tracing::debug!(
                    reason,
                    events = window.event_count(),
                    interactions = window.interaction_count(),
                    "Window closed"
                );
                let item = ClosedWindow {
                    window,
                    _in_flight: InFlight::acquire(&in_flight),
                };
                closed.send(item).is_ok()
            }
            None => true,
        }
    };

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(events) -> msg => match msg {
                Ok(event) => {
                    let burst = manager.ingest(event);
                    let due = manager.is_due(Utc::now());
                    if (burst || due) && !emit(&mut manager, if burst { "burst" } else { "elapsed" }) {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(ticker) -> _ => {
                if manager.is_due(Utc::now()) && !emit(&mut manager, "elapsed") {
                    break;
                }
            }
        }
    }

    manager.stop();
    *state.lock() = SchedulerState::Stopped;
    tracing::info!("Window scheduler stopped");
}
