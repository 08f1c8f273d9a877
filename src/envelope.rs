//! Signed envelopes around feature vectors.
//!
//! A [`Payload`] is serialized to its canonical JSON bytes and signed once.
//! Signing prefers a platform signer (secure hardware, OS keystore) and
//! falls back to an HMAC-SHA256 keyed with a per-device secret when the
//! platform signer is missing or failing, so emission never stalls on it.

use crate::collector::device::DeviceContext;
use crate::core::features::FeatureVector;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Mixed with the device id to derive the fallback signing key.
const KEY_DERIVATION_PREFIX: &str = "cbsa_telemetry_envelope_v1_";

/// Errors from a signer backend. They never reach the caller of
/// [`EnvelopeSigner::sign`].
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Signer unavailable: {0}")]
    Unavailable(String),
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The signed content of one emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Emission time, unix milliseconds
    pub timestamp: i64,
    /// Random per-payload value
    pub nonce: String,
    pub vector: FeatureVector,
    /// Diagnostic tag of the last interaction in the window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub device_info: DeviceContext,
}

impl Payload {
    pub fn new(vector: FeatureVector, event_type: Option<String>, device_info: DeviceContext) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            nonce: Uuid::new_v4().simple().to_string(),
            vector,
            event_type,
            device_info,
        }
    }

    /// The exact bytes that get signed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, SignerError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A payload together with its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    pub payload: Payload,
    pub signature: String,
}

impl SignedEnvelope {
    /// Body of the `event_data` field on the wire.
    pub fn to_event_data(&self) -> EventData {
        EventData {
            timestamp: self.payload.timestamp,
            nonce: self.payload.nonce.clone(),
            vector: self.payload.vector,
            device_info: self.payload.device_info.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// Wire form of a signed envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub timestamp: i64,
    pub nonce: String,
    pub vector: FeatureVector,
    pub device_info: DeviceContext,
    pub signature: String,
}

/// A signing backend. Calls may block, so [`EnvelopeSigner`] runs them on
/// the blocking pool.
pub trait PlatformSigner: Send + Sync {
    fn name(&self) -> &str;

    /// Create the per-device key if it does not exist yet.
    fn generate_key_if_needed(&self) -> Result<(), SignerError>;

    /// Sign `data`, returning an encoded signature.
    fn sign(&self, data: &[u8]) -> Result<String, SignerError>;
}

/// Keyed-digest signer: HMAC-SHA256 over the payload bytes, hex encoded.
#[derive(Clone)]
pub struct SoftwareSigner {
    key: Vec<u8>,
}

impl SoftwareSigner {
    /// Derive the key from a stable device identifier.
    pub fn for_device(device_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DERIVATION_PREFIX.as_bytes());
        hasher.update(device_id.as_bytes());
        Self {
            key: hasher.finalize().to_vec(),
        }
    }

    pub fn from_key(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn mac(&self, data: &[u8]) -> Result<String, SignerError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        mac.update(data);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for SoftwareSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSigner").finish_non_exhaustive()
    }
}

impl PlatformSigner for SoftwareSigner {
    fn name(&self) -> &str {
        "software-hmac"
    }

    fn generate_key_if_needed(&self) -> Result<(), SignerError> {
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> Result<String, SignerError> {
        self.mac(data)
    }
}

/// Signs payloads, one at a time, in call order.
pub struct EnvelopeSigner {
    platform: Option<Arc<dyn PlatformSigner>>,
    fallback: SoftwareSigner,
    initialized: OnceCell<()>,
    platform_usable: AtomicBool,
    fallback_logged: AtomicBool,
    slot: Mutex<()>,
}

impl EnvelopeSigner {
    pub fn new(platform: Option<Arc<dyn PlatformSigner>>, fallback: SoftwareSigner) -> Self {
        let platform_usable = platform.is_some();
        Self {
            platform,
            fallback,
            initialized: OnceCell::new(),
            platform_usable: AtomicBool::new(platform_usable),
            fallback_logged: AtomicBool::new(false),
            slot: Mutex::new(()),
        }
    }

    /// Signer with no platform backend.
    pub fn software(fallback: SoftwareSigner) -> Self {
        Self::new(None, fallback)
    }

    /// Whether signatures currently come from the platform backend.
    pub fn uses_platform(&self) -> bool {
        self.platform.is_some() && self.platform_usable.load(Ordering::SeqCst)
    }

    /// Prepare the device key. Runs once; later calls return immediately.
    pub async fn init(&self) {
        self.initialized
            .get_or_init(|| async {
                let Some(platform) = self.platform.clone() else {
                    self.note_fallback("no platform signer");
                    return;
                };

                let name = platform.name().to_string();
                let result =
                    tokio::task::spawn_blocking(move || platform.generate_key_if_needed()).await;
                match result {
                    Ok(Ok(())) => tracing::info!(signer = %name, "Signing key ready"),
                    Ok(Err(e)) => self.disable_platform(&e.to_string()),
                    Err(e) => self.disable_platform(&e.to_string()),
                }
            })
            .await;
    }

    /// Sign a payload. Never fails: backend errors degrade to the keyed
    /// digest fallback.
    pub async fn sign(&self, payload: Payload) -> SignedEnvelope {
        self.init().await;

        let bytes = match payload.canonical_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Could not serialize payload for signing");
                Vec::new()
            }
        };

        let _slot = self.slot.lock().await;
        let signature = match self.platform.clone() {
            Some(platform) if self.platform_usable.load(Ordering::SeqCst) => {
                let data = bytes.clone();
                match tokio::task::spawn_blocking(move || platform.sign(&data)).await {
                    Ok(Ok(signature)) => signature,
                    Ok(Err(e)) => {
                        self.disable_platform(&e.to_string());
                        self.sign_fallback(&bytes)
                    }
                    Err(e) => {
                        self.disable_platform(&e.to_string());
                        self.sign_fallback(&bytes)
                    }
                }
            }
            _ => self.sign_fallback(&bytes),
        };

        SignedEnvelope { payload, signature }
    }

    fn sign_fallback(&self, bytes: &[u8]) -> String {
        match self.fallback.mac(bytes) {
            Ok(signature) => signature,
            Err(e) => {
                tracing::error!(error = %e, "Keyed digest failed, using plain digest");
                hex::encode(Sha256::digest(bytes))
            }
        }
    }

    fn disable_platform(&self, reason: &str) {
        self.platform_usable.store(false, Ordering::SeqCst);
        self.note_fallback(reason);
    }

    fn note_fallback(&self, reason: &str) {
        if !self.fallback_logged.swap(true, Ordering::SeqCst) {
            tracing::warn!(reason, "Platform signing unavailable, using software fallback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    struct FlakySigner {
        key_calls: AtomicUsize,
        fail_sign: bool,
    }

    impl PlatformSigner for FlakySigner {
        fn name(&self) -> &str {
            "flaky"
        }

        fn generate_key_if_needed(&self) -> Result<(), SignerError> {
            self.key_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn sign(&self, _data: &[u8]) -> Result<String, SignerError> {
            if self.fail_sign {
                Err(SignerError::Unavailable("keystore locked".to_string()))
            } else {
                Ok("platform-signature".to_string())
            }
        }
    }

    fn sample_payload() -> Payload {
        Payload {
            timestamp: 1_700_000_000_000,
            nonce: "0f3c".to_string(),
            vector: FeatureVector::zeros(),
            event_type: Some("card_tap".to_string()),
            device_info: DeviceContext::minimal(),
        }
    }

    #[test]
    fn test_software_signature_is_deterministic() {
        let signer = SoftwareSigner::from_key(b"device-secret".to_vec());
        let bytes = sample_payload().canonical_bytes().unwrap();

        let first = signer.sign(&bytes).unwrap();
        let second = signer.sign(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let mut altered = bytes.clone();
        altered[0] ^= 0x01;
        assert_ne!(signer.sign(&altered).unwrap(), first);
    }

    #[test]
    fn test_device_keys_differ() {
        let bytes = b"same payload";
        let a = SoftwareSigner::for_device("device-a").sign(bytes).unwrap();
        let b = SoftwareSigner::for_device("device-b").sign(bytes).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_payload_wire_shape() {
        let json = serde_json::to_value(sample_payload()).unwrap();
        assert_eq!(json["eventType"], "card_tap");
        assert_eq!(json["vector"].as_array().map(Vec::len), Some(48));
        assert!(json.get("deviceInfo").is_some());

        let untagged = Payload {
            event_type: None,
            ..sample_payload()
        };
        let json = serde_json::to_value(untagged).unwrap();
        assert!(json.get("eventType").is_none());
    }

    #[test]
    fn test_event_data_fields() {
        let envelope = SignedEnvelope {
            payload: sample_payload(),
            signature: "abc".to_string(),
        };
        let json = serde_json::to_value(envelope.to_event_data()).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["deviceInfo", "nonce", "signature", "timestamp", "vector"]
        );
    }

    #[tokio::test]
    async fn test_software_only_signer_matches_fallback() {
        let signer = EnvelopeSigner::software(SoftwareSigner::from_key(b"k".to_vec()));
        let payload = sample_payload();
        let expected = SoftwareSigner::from_key(b"k".to_vec())
            .sign(&payload.canonical_bytes().unwrap())
            .unwrap();

        let envelope = signer.sign(payload).await;
        assert_eq!(envelope.signature, expected);
        assert!(!signer.uses_platform());
    }

    #[tokio::test]
    async fn test_init_runs_once() {
        let platform = Arc::new(FlakySigner {
            key_calls: AtomicUsize::new(0),
            fail_sign: false,
        });
        let signer = EnvelopeSigner::new(
            Some(platform.clone()),
            SoftwareSigner::from_key(b"k".to_vec()),
        );

        signer.init().await;
        signer.init().await;
        let envelope = signer.sign(sample_payload()).await;

        assert_eq!(platform.key_calls.load(Ordering::SeqCst), 1);
        assert_eq!(envelope.signature, "platform-signature");
        assert!(signer.uses_platform());
    }

    #[tokio::test]
    async fn test_platform_failure_falls_back() {
        let platform = Arc::new(FlakySigner {
            key_calls: AtomicUsize::new(0),
            fail_sign: true,
        });
        let signer = EnvelopeSigner::new(Some(platform), SoftwareSigner::from_key(b"k".to_vec()));

        let first = signer.sign(sample_payload()).await;
        let second = signer.sign(sample_payload()).await;

        assert_eq!(first.signature, second.signature);
        assert_eq!(first.signature.len(), 64);
        assert!(!signer.uses_platform());
    }
}
