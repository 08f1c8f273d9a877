//! Device, network and coarse-location metadata attached to each envelope.
//!
//! The actual probes (battery, carrier, location, ...) belong to the
//! embedding platform. This module only defines the record and the
//! provider seam, plus a host-based provider for desktop runs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Side-channel device metadata. Every field is optional: a failed probe
/// leaves it `None` and serializes as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceContext {
    pub device_id: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub model_id: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub os_build_id: Option<String>,
    pub total_memory: Option<u64>,
    pub is_device: Option<bool>,
    pub is_rooted: Option<bool>,

    // Network
    pub network_type: Option<String>,
    pub network_state: Option<String>,
    pub is_internet_reachable: Option<bool>,
    pub ip_address: Option<String>,

    // Cellular
    pub carrier: Option<String>,
    pub iso_country_code: Option<String>,
    pub mobile_country_code: Option<String>,
    pub mobile_network_code: Option<String>,
    pub allows_voip: Option<bool>,

    // Coarse location
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_accuracy: Option<f64>,
    pub location_timestamp: Option<i64>,
}

impl DeviceContext {
    /// Minimal record used when the probe fails outright.
    pub fn minimal() -> Self {
        Self {
            os_name: Some(std::env::consts::OS.to_string()),
            ..Self::default()
        }
    }
}

/// Errors a device probe may report. They never abort an emission.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Probe unavailable: {0}")]
    Unavailable(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// External collaborator that produces a [`DeviceContext`] on demand.
///
/// Probes may block (platform APIs, permission prompts); callers run them
/// off the async executor.
pub trait DeviceInfoProvider: Send + Sync {
    fn probe(&self) -> Result<DeviceContext, ProbeError>;
}

/// Provider that reports what a desktop host knows about itself.
#[derive(Debug, Default, Clone)]
pub struct HostDeviceInfo;

impl DeviceInfoProvider for HostDeviceInfo {
    fn probe(&self) -> Result<DeviceContext, ProbeError> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        Ok(DeviceContext {
            device_id: Some(format!("host-{hostname}")),
            model_name: Some(hostname),
            os_name: Some(std::env::consts::OS.to_string()),
            is_device: Some(false),
            ..DeviceContext::default()
        })
    }
}

/// Run a probe on the blocking pool, bounded by `timeout`. Failures are
/// logged and reported as `None`.
pub async fn probe_with_timeout(
    provider: Arc<dyn DeviceInfoProvider>,
    timeout: Duration,
) -> Option<DeviceContext> {
    let task = tokio::task::spawn_blocking(move || provider.probe());
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(info))) => Some(info),
        Ok(Ok(Err(e))) => {
            tracing::warn!(error = %e, "Device probe failed");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Device probe panicked");
            None
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Device probe timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProbe;

    impl DeviceInfoProvider for FailingProbe {
        fn probe(&self) -> Result<DeviceContext, ProbeError> {
            Err(ProbeError::PermissionDenied("location".to_string()))
        }
    }

    #[test]
    fn test_missing_fields_serialize_as_null() {
        let json = serde_json::to_value(DeviceContext::default()).unwrap();
        assert!(json["deviceId"].is_null());
        assert!(json["latitude"].is_null());
        assert!(json["isInternetReachable"].is_null());
    }

    #[tokio::test]
    async fn test_failed_lookup_reports_none() {
        let info = probe_with_timeout(Arc::new(FailingProbe), Duration::from_secs(1)).await;
        assert!(info.is_none());
        assert!(DeviceContext::minimal().os_name.is_some());
    }
}
