//! cbsa-telemetry - Behavioral-biometric telemetry pipeline.
//!
//! Touch, scroll, keystroke and motion samples are accumulated into fixed
//! time windows, reduced to a 48-value normalized feature vector, wrapped
//! in a signed envelope and streamed to a backend over a WebSocket that
//! survives disconnects.
//!
//! # Privacy Guarantees
//!
//! - **No key content**: keystrokes are recorded as occurrences, never as characters
//! - **No raw export**: raw samples live only until their window closes
//! - **Tags stay diagnostic**: event tags never feed into a feature
//! - **Transparency**: all collection is counted and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        TelemetryAgent                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌─────────┐ │
//! │  │ EventSink │──▶│ Scheduler  │──▶│ Features  │──▶│ Signer  │ │
//! │  │ (bounded) │   │ (windows)  │   │  (48-D)   │   │ (HMAC)  │ │
//! │  └───────────┘   └────────────┘   └───────────┘   └─────────┘ │
//! │        │                                               │      │
//! │        ▼                                               ▼      │
//! │  ┌─────────────┐                              ┌─────────────┐ │
//! │  │Transparency │                              │  Transport  │ │
//! │  │    Log      │                              │ (WebSocket) │ │
//! │  └─────────────┘                              └─────────────┘ │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cbsa_telemetry::{agent::TelemetryAgent, collector::TouchPhase, config::Config};
//!
//! # async fn demo() {
//! let mut agent = TelemetryAgent::new(Config::default());
//! agent.login("user-123").await;
//!
//! let sink = agent.sink();
//! sink.on_touch(TouchPhase::Start, 120.0, 640.0, 0.4, Some("pay_button"));
//! sink.on_touch(TouchPhase::End, 122.0, 641.0, 0.4, None);
//!
//! agent.logout();
//! # }
//! ```

pub mod agent;
pub mod collector;
pub mod config;
pub mod core;
pub mod envelope;
pub mod transparency;
pub mod transport;

// Re-export key types at crate root for convenience
pub use agent::{AgentStatus, TelemetryAgent};
pub use collector::{EventSink, MotionKind, MotionSample, TouchPhase};
pub use config::{Config, ConfigError};
pub use crate::core::{extract, FeatureVector, FEATURE_DIM};
pub use envelope::{EnvelopeSigner, Payload, PlatformSigner, SignedEnvelope, SoftwareSigner};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};
pub use transport::{ConnectionState, SendStatus, Transport, TransportConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║             CBSA TELEMETRY - PRIVACY DECLARATION                 ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent measures how you interact, not what you do.          ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE:                                              ║
║    • Touch timing, pressure and gesture geometry                 ║
║    • Scroll speed and direction                                  ║
║    • When keys are pressed (timing only)                         ║
║    • Device motion (accelerometer and gyroscope)                 ║
║                                                                  ║
║  ✗ WHAT WE NEVER CAPTURE:                                        ║
║    • Which keys you press (no PINs, passwords or messages)       ║
║    • Any screen content                                          ║
║    • Raw samples beyond the current window                       ║
║                                                                  ║
║  Every 10 seconds the window is reduced to 48 numbers, signed    ║
║  and sent. Raw samples are then discarded.                       ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    cbsa-telemetry status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
