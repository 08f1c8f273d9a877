//! The telemetry agent: one object that owns the whole pipeline.
//!
//! ```text
//! UI / sensors ──▶ EventSink ──▶ WindowScheduler ──▶ emitter task ──▶ Transport
//!                  (bounded)     (tick thread)       extract, sign      (queue)
//! ```
//!
//! The embedding application creates one `TelemetryAgent` per session
//! controller and drives it with `login` and `logout`.

use crate::collector::context::{ContextState, SharedContext};
use crate::collector::device::{
    probe_with_timeout, DeviceContext, DeviceInfoProvider, HostDeviceInfo,
};
use crate::collector::sink::{raw_event_channel, EventSink};
use crate::collector::source::{SensorSource, Subscription};
use crate::collector::types::RawEvent;
use crate::config::Config;
use crate::core::features::extract;
use crate::core::scheduler::{ClosedWindow, WindowScheduler};
use crate::core::windowing::SchedulerState;
use crate::envelope::{EnvelopeSigner, Payload, PlatformSigner, SignedEnvelope, SoftwareSigner};
use crate::transparency::{create_shared_log, SharedTransparencyLog, TransparencyStats};
use crate::transport::{
    ConnectionState, InboundMessage, InboundStatus, SendStatus, Transport,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;

/// Upper bound on the device probe at start.
const DEVICE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of the agent.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub running: bool,
    pub scheduler: SchedulerState,
    /// Close time of the latest window in the current run
    pub last_emit: Option<DateTime<Utc>>,
    pub connection: ConnectionState,
    pub queued_messages: usize,
    pub stats: TransparencyStats,
}

/// Everything that only exists between `start` and `stop`.
struct Running {
    scheduler: WindowScheduler,
    subscriptions: Vec<Subscription>,
    emitter: JoinHandle<()>,
}

/// Pipeline owner and lifecycle controller.
pub struct TelemetryAgent {
    config: Config,
    log: SharedTransparencyLog,
    context: SharedContext,
    sink: EventSink,
    events: Receiver<RawEvent>,
    transport: Transport,
    fallback_signer: SoftwareSigner,
    signer: Arc<EnvelopeSigner>,
    device: Arc<dyn DeviceInfoProvider>,
    /// First successful probe, reused for the rest of the process
    device_info: Option<DeviceContext>,
    sources: Vec<Arc<dyn SensorSource>>,
    running: Option<Running>,
}

impl TelemetryAgent {
    /// Build an idle agent. Nothing is collected until `start`.
    pub fn new(config: Config) -> Self {
        Self::with_log(config, create_shared_log())
    }

    /// Build an idle agent that reports into an existing transparency log.
    pub fn with_log(config: Config, log: SharedTransparencyLog) -> Self {
        let context: SharedContext = Arc::new(ContextState::new());
        let (sender, events) = raw_event_channel(config.event_buffer_capacity);
        let sink = EventSink::new(sender, context.clone(), log.clone());

        let transport = Transport::new(config.transport_config());
        transport.on_message(handle_inbound);

        let fallback_signer = SoftwareSigner::for_device(&local_device_id());
        let signer = Arc::new(EnvelopeSigner::software(fallback_signer.clone()));

        Self {
            config,
            log,
            context,
            sink,
            events,
            transport,
            fallback_signer,
            signer,
            device: Arc::new(HostDeviceInfo),
            device_info: None,
            sources: Vec::new(),
            running: None,
        }
    }

    /// Use a platform signing backend instead of the software fallback.
    pub fn with_platform_signer(mut self, platform: Arc<dyn PlatformSigner>) -> Self {
        self.signer = Arc::new(EnvelopeSigner::new(
            Some(platform),
            self.fallback_signer.clone(),
        ));
        self
    }

    /// Replace the device metadata provider.
    pub fn with_device_info(mut self, provider: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device = provider;
        self.device_info = None;
        self
    }

    /// Add a sensor that is subscribed on every `start`.
    pub fn with_source(mut self, source: Arc<dyn SensorSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Handle for the UI layer. Samples pushed while stopped are ignored.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            running: self.is_running(),
            scheduler: self
                .running
                .as_ref()
                .map_or(SchedulerState::Idle, |r| r.scheduler.state()),
            last_emit: self.running.as_ref().and_then(|r| r.scheduler.last_emit()),
            connection: self.transport.state(),
            queued_messages: self.transport.queued_len(),
            stats: self.log.stats(),
        }
    }

    /// Bind the pipeline to `user_id` and start it.
    pub async fn login(&mut self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        tracing::info!(user_id = %user_id, "Login, starting telemetry");
        self.transport.set_user_id(Some(user_id));
        self.start().await;
    }

    /// Stop the pipeline and forget the user.
    pub fn logout(&mut self) {
        tracing::info!("Logout, stopping telemetry");
        self.stop();
        self.transport.set_user_id(None);
    }

    /// Start collecting, windowing and streaming. No-op while running.
    pub async fn start(&mut self) {
        if self.running.is_some() {
            tracing::debug!("Telemetry already running");
            return;
        }

        self.signer.init().await;
        let device_info = self.cached_device_info().await;

        let (closed_tx, closed_rx) = unbounded_channel();
        let mut scheduler = WindowScheduler::new(self.config.scheduler_config());
        if let Err(e) = scheduler.start(self.events.clone(), closed_tx) {
            tracing::error!(error = %e, "Could not start window scheduler");
            return;
        }
        self.sink.set_active(true);

        let mut subscriptions = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.subscribe(self.sink.clone()) {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Sensor unavailable")
                }
            }
        }

        let emitter = tokio::spawn(run_emitter(
            closed_rx,
            Emitter {
                context: self.context.clone(),
                signer: self.signer.clone(),
                transport: self.transport.clone(),
                log: self.log.clone(),
                device_info,
                event_type: self.config.event_type.clone(),
            },
        ));

        self.transport.connect();

        self.running = Some(Running {
            scheduler,
            subscriptions,
            emitter,
        });
        tracing::info!(
            window_secs = self.config.window_duration.as_secs(),
            sources = self.sources.len(),
            "Telemetry started"
        );
    }

    /// Cached device metadata, probing on first use. A failed probe is not
    /// cached, so the next start tries again.
    async fn cached_device_info(&mut self) -> DeviceContext {
        if let Some(info) = &self.device_info {
            return info.clone();
        }
        match probe_with_timeout(self.device.clone(), DEVICE_PROBE_TIMEOUT).await {
            Some(info) => {
                self.device_info = Some(info.clone());
                info
            }
            None => DeviceContext::minimal(),
        }
    }

    /// Tear down sensors, timers and the connection. No-op when stopped.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        self.sink.set_active(false);
        running.subscriptions.clear();
        running.scheduler.stop();
        running.emitter.abort();
        self.transport.disconnect();

        if let Err(e) = self.log.save() {
            tracing::warn!(error = %e, "Could not save transparency stats");
        }
        tracing::info!("Telemetry stopped");
    }
}

impl Drop for TelemetryAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State the emitter task needs per window.
struct Emitter {
    context: SharedContext,
    signer: Arc<EnvelopeSigner>,
    transport: Transport,
    log: SharedTransparencyLog,
    device_info: DeviceContext,
    event_type: String,
}

/// Extract, sign and send each closed window, in close order.
async fn run_emitter(mut closed: UnboundedReceiver<ClosedWindow>, emitter: Emitter) {
    while let Some(item) = closed.recv().await {
        let snapshot = emitter.context.snapshot();
        let vector = extract(&item.window, &snapshot);
        emitter.log.record_window_completed();

        let payload = Payload::new(
            vector,
            item.window.last_event_tag.clone(),
            emitter.device_info.clone(),
        );
        let envelope = emitter.signer.sign(payload).await;
        let event_type = wire_event_type(&envelope, &emitter.event_type);

        match emitter
            .transport
            .send_event(event_type, envelope.to_event_data())
        {
            SendStatus::Sent => emitter.log.record_envelope_sent(),
            SendStatus::Queued => emitter.log.record_envelope_queued(),
            SendStatus::Dropped => {}
        }
        tracing::debug!(
            interactions = item.window.interaction_count(),
            "Window emitted"
        );
    }
}

/// The window's tag travels as the message `event_type`; untagged windows
/// use the configured default.
fn wire_event_type<'a>(envelope: &'a SignedEnvelope, default: &'a str) -> &'a str {
    envelope.payload.event_type.as_deref().unwrap_or(default)
}

fn handle_inbound(message: InboundMessage) {
    match message.status {
        InboundStatus::Error => tracing::warn!(
            reason = message.message.as_deref().unwrap_or(""),
            errors = ?message.errors,
            "Backend rejected event"
        ),
        InboundStatus::Received => {
            tracing::debug!(message_id = ?message.message_id, "Backend acknowledged event")
        }
    }
}

/// Stable identifier of this machine, used to derive the fallback key.
fn local_device_id() -> String {
    match hostname::get() {
        Ok(name) => format!("host-{}", name.to_string_lossy()),
        Err(e) => {
            tracing::warn!(error = %e, "Hostname unavailable, using generic device id");
            "host-unknown".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::device::ProbeError;
    use crate::collector::types::TouchPhase;
    use crate::core::features::FeatureVector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that fails its first `failures` probes, then succeeds.
    struct CountingProvider {
        calls: AtomicUsize,
        failures: usize,
    }

    impl CountingProvider {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DeviceInfoProvider for CountingProvider {
        fn probe(&self) -> Result<DeviceContext, ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProbeError::Unavailable("not ready".to_string()));
            }
            Ok(DeviceContext {
                device_id: Some("device-42".to_string()),
                ..DeviceContext::default()
            })
        }
    }

    fn offline_config(window: Duration) -> Config {
        let mut config = Config::default();
        config.window_duration = window;
        config.tick_period = Duration::from_millis(10);
        config.backend.host = "127.0.0.1".to_string();
        config.backend.port = 9;
        config.transport.reconnect_delay_ms = 60_000;
        config
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let mut agent = TelemetryAgent::new(offline_config(Duration::from_secs(10)));
        assert!(!agent.is_running());
        assert!(!agent.sink().is_active());

        agent.start().await;
        agent.start().await;
        assert!(agent.is_running());
        assert!(agent.sink().is_active());
        assert_eq!(agent.status().scheduler, SchedulerState::Open);

        agent.stop();
        agent.stop();
        assert!(!agent.is_running());
        assert!(!agent.sink().is_active());
        assert_eq!(agent.transport().state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_samples_while_stopped_are_ignored() {
        let mut agent = TelemetryAgent::new(offline_config(Duration::from_secs(10)));
        let sink = agent.sink();

        sink.on_key(None);
        assert_eq!(agent.status().stats.key_events, 0);

        agent.start().await;
        sink.on_key(None);
        assert_eq!(agent.status().stats.key_events, 1);
        agent.stop();
    }

    #[tokio::test]
    async fn test_closed_windows_become_queued_envelopes() {
        let mut agent = TelemetryAgent::new(offline_config(Duration::from_millis(50)));
        agent.login("user-1").await;

        let sink = agent.sink();
        sink.on_touch(TouchPhase::Start, 10.0, 10.0, 0.4, Some("pay_button"));
        sink.on_touch(TouchPhase::End, 15.0, 15.0, 0.4, None);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = agent.status();
        assert!(status.stats.windows_completed >= 1);
        assert!(status.stats.envelopes_queued >= 1);
        assert!(status.last_emit.is_some());
        assert!(status.queued_messages >= 1);

        agent.logout();
        assert!(agent.transport().user_id().is_none());
    }

    #[tokio::test]
    async fn test_device_info_is_fetched_once_across_restarts() {
        let provider = CountingProvider::new(0);
        let mut agent = TelemetryAgent::new(offline_config(Duration::from_secs(10)))
            .with_device_info(provider.clone());

        agent.start().await;
        agent.stop();
        agent.start().await;
        agent.stop();

        assert_eq!(provider.calls(), 1);
        assert_eq!(
            agent.cached_device_info().await.device_id.as_deref(),
            Some("device-42")
        );
    }

    #[tokio::test]
    async fn test_failed_device_lookup_is_retried_on_next_start() {
        let provider = CountingProvider::new(1);
        let mut agent = TelemetryAgent::new(offline_config(Duration::from_secs(10)))
            .with_device_info(provider.clone());

        agent.start().await;
        agent.stop();
        assert_eq!(provider.calls(), 1);

        agent.start().await;
        agent.stop();
        agent.start().await;
        agent.stop();
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn test_window_tag_becomes_wire_event_type() {
        let tagged = SignedEnvelope {
            payload: Payload::new(
                FeatureVector::zeros(),
                Some("send_money".to_string()),
                DeviceContext::default(),
            ),
            signature: "00".to_string(),
        };
        assert_eq!(wire_event_type(&tagged, "BEHAVIORAL_VECTOR"), "send_money");

        let untagged = SignedEnvelope {
            payload: Payload::new(FeatureVector::zeros(), None, DeviceContext::default()),
            signature: "00".to_string(),
        };
        assert_eq!(
            wire_event_type(&untagged, "BEHAVIORAL_VECTOR"),
            "BEHAVIORAL_VECTOR"
        );
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let mut agent = TelemetryAgent::new(offline_config(Duration::from_secs(10)));
        agent.start().await;
        agent.stop();
        agent.start().await;
        assert!(agent.is_running());
        assert_eq!(agent.status().scheduler, SchedulerState::Open);
        agent.stop();
    }
}
