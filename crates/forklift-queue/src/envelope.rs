//! Job envelope and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::keys::Bucket;

/// A unit of work as it is stored in a queue bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message ID.
    pub id: Uuid,
    /// Queue the message belongs to.
    pub queue: String,
    /// Job type, used to pick the handler.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Handler input.
    pub payload: Value,
    /// Deduplication fingerprint.
    pub fingerprint: String,
    /// Failed attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Failed attempts allowed before the message is dead-lettered.
    pub max_retries: u32,
    /// Earliest time the message may be processed.
    pub due_at: DateTime<Utc>,
    /// When the message was first enqueued. Kept unchanged across retries.
    pub created_at: DateTime<Utc>,
    /// Reason for the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Envelope {
    pub(crate) fn new(
        queue: &str,
        job_type: &str,
        payload: Value,
        fingerprint: String,
        max_retries: u32,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            payload,
            fingerprint,
            attempts: 0,
            max_retries,
            due_at,
            created_at: now,
            last_error: None,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Whether the message has retries left after its recorded failures.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// Where a message is in its lifecycle.
///
/// ```text
/// Scheduled -> Ready -> InFlight -> Dropped
///                          |-> Scheduled   (retry)
///                          '-> Dead -> Ready   (operator requeue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Scheduled,
    Ready,
    InFlight,
    Dropped,
    Dead,
}

impl MessageState {
    pub fn can_transition_to(self, next: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Scheduled, Ready)
                | (Ready, InFlight)
                | (InFlight, Dropped)
                | (InFlight, Scheduled)
                | (InFlight, Dead)
                | (Dead, Ready)
        )
    }

    /// The store bucket holding messages in this state, if any.
    pub fn bucket(self) -> Option<Bucket> {
        match self {
            MessageState::Scheduled => Some(Bucket::Scheduled),
            MessageState::Ready => Some(Bucket::Ready),
            MessageState::Dead => Some(Bucket::Dead),
            MessageState::InFlight | MessageState::Dropped => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Dropped)
    }
}

/// How an in-flight message was finalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Dropped,
    Rescheduled { due_at: DateTime<Utc>, attempts: u32 },
    DeadLettered { attempts: u32 },
}

impl Resolution {
    pub fn state(&self) -> MessageState {
        match self {
            Resolution::Dropped => MessageState::Dropped,
            Resolution::Rescheduled { .. } => MessageState::Scheduled,
            Resolution::DeadLettered { .. } => MessageState::Dead,
        }
    }
}

/// Hex SHA-256 over the queue, job type and canonical payload.
///
/// Object keys are sorted before hashing, so payloads that differ only in
/// key order share a fingerprint.
pub fn fingerprint(queue: &str, job_type: &str, payload: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(payload, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(queue.as_bytes());
    hasher.update([0u8]);
    hasher.update(job_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> Envelope {
        let now = Utc::now();
        Envelope::new(
            "jobs",
            "webhook",
            json!({"url": "http://localhost/hook"}),
            "fp".to_string(),
            3,
            now,
            now,
        )
    }

    #[test]
    fn test_new_envelope() {
        let env = envelope();
        assert_eq!(env.attempts, 0);
        assert_eq!(env.queue, "jobs");
        assert!(env.last_error.is_none());
        assert!(env.is_due(env.created_at));
    }

    #[test]
    fn test_serialized_field_names() {
        let env = envelope();
        let value: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "webhook");
        assert!(value.get("job_type").is_none());
        assert!(value.get("last_error").is_none());

        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"id": "x"}"#).is_err());
    }

    #[test]
    fn test_can_retry() {
        let mut env = envelope();
        env.max_retries = 2;
        env.attempts = 1;
        assert!(env.can_retry());
        env.attempts = 2;
        assert!(!env.can_retry());

        env.max_retries = 0;
        env.attempts = 0;
        assert!(!env.can_retry());
    }

    #[test]
    fn test_state_transitions() {
        use MessageState::*;
        assert!(Scheduled.can_transition_to(Ready));
        assert!(Ready.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Scheduled));
        assert!(InFlight.can_transition_to(Dead));
        assert!(Dead.can_transition_to(Ready));

        assert!(!Ready.can_transition_to(Dead));
        assert!(!Scheduled.can_transition_to(InFlight));
        assert!(!Dropped.can_transition_to(Ready));
        assert!(Dropped.is_terminal());
        assert_eq!(InFlight.bucket(), None);
        assert_eq!(Dead.bucket(), Some(Bucket::Dead));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = fingerprint("jobs", "webhook", &json!({"a": 1, "b": {"y": 2, "x": [1, 2]}}));
        let b = fingerprint("jobs", "webhook", &json!({"b": {"x": [1, 2], "y": 2}, "a": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        let payload = json!({"id": 7});
        let base = fingerprint("jobs", "webhook", &payload);
        assert_ne!(base, fingerprint("other", "webhook", &payload));
        assert_ne!(base, fingerprint("jobs", "alert", &payload));
        assert_ne!(base, fingerprint("jobs", "webhook", &json!({"id": 8})));
        assert_ne!(base, fingerprint("jobs", "webhook", &json!([1, 2])));
        assert_ne!(
            fingerprint("jobs", "webhook", &json!([1, 2])),
            fingerprint("jobs", "webhook", &json!([2, 1]))
        );
    }
}
