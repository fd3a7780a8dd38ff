//! Wire envelope: `{"type": "...", "delay": <secs>?, ...payload}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::work_item::WorkItem;
use crate::error::ProcessingError;

/// A decoded queue message body.
///
/// The payload stays as loose JSON until the scope knows which concrete
/// type to build from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemEnvelope {
    #[serde(rename = "type")]
    work_item_type: String,

    /// Informational only: the delay the producer asked for, in seconds.
    /// Visibility is controlled by the queue, not by this field.
    /// A value that is not a whole number of seconds is dropped.
    #[serde(
        default,
        deserialize_with = "lenient_delay",
        skip_serializing_if = "Option::is_none"
    )]
    delay: Option<u64>,

    #[serde(flatten)]
    payload: Map<String, Value>,
}

fn lenient_delay<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_u64))
}

impl WorkItemEnvelope {
    /// Wrap a typed payload. Fails if the payload is not a JSON object.
    pub fn wrap<T: WorkItem>(item: &T, delay: Option<u64>) -> Result<Self, serde_json::Error> {
        let payload = match serde_json::to_value(item)? {
            Value::Object(mut fields) => {
                fields.remove("type");
                fields.remove("delay");
                fields
            }
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "work item {} must serialize to a JSON object, got {other}",
                    T::TYPE
                )));
            }
        };

        Ok(Self {
            work_item_type: T::TYPE.to_string(),
            delay,
            payload,
        })
    }

    /// Parse a raw message body. A missing or empty `type` is rejected.
    pub fn parse(body: &str) -> Result<Self, ProcessingError> {
        let envelope: Self =
            serde_json::from_str(body).map_err(|source| ProcessingError::MalformedEnvelope {
                reason: source.to_string(),
            })?;

        if envelope.work_item_type.trim().is_empty() {
            return Err(ProcessingError::MalformedEnvelope {
                reason: "missing work item type".to_string(),
            });
        }

        Ok(envelope)
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn work_item_type(&self) -> &str {
        &self.work_item_type
    }

    pub fn delay(&self) -> Option<u64> {
        self.delay
    }

    /// The payload as a JSON object, ready for typed deserialization.
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}
