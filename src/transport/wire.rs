//! JSON messages exchanged with the backend.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One outbound frame.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage<T> {
    pub user_id: Option<String>,
    pub session_id: String,
    /// Send time, unix seconds
    pub timestamp: f64,
    pub event_type: String,
    pub event_data: T,
}

impl<T: Serialize> OutboundMessage<T> {
    pub fn new(
        user_id: Option<String>,
        session_id: impl Into<String>,
        event_type: impl Into<String>,
        event_data: T,
    ) -> Self {
        Self {
            user_id,
            session_id: session_id.into(),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            event_type: event_type.into(),
            event_data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundStatus {
    Received,
    Error,
}

/// Acknowledgement or error report from the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    pub status: InboundStatus,
    #[serde(default)]
    pub message_id: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// `sess_<unix millis in base 36>_<7 random base-36 chars>`
pub fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..7)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    format!("sess_{}_{}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
