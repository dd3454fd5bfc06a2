use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::util::now_ms;

// ════════════════════════════════════════════════════════════════
//  Payload
// ════════════════════════════════════════════════════════════════

/// How the payload bytes are rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    #[default]
    Json,
    Text,
    Raw,
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFormat::Json => write!(f, "json"),
            DataFormat::Text => write!(f, "text"),
            DataFormat::Raw => write!(f, "raw"),
        }
    }
}

/// Opaque event payload with format metadata.
///
/// The engine never looks inside. `Bytes` keeps fan-out clones cheap:
/// every subscriber queue holds the same allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    bytes: Bytes,
    format: DataFormat,
}

impl Payload {
    pub fn new(bytes: impl Into<Bytes>, format: DataFormat) -> Self {
        Self { bytes: bytes.into(), format }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(s.into().into_bytes(), DataFormat::Text)
    }

    /// Classify raw bytes: valid JSON → `json`, valid UTF-8 → `text`, else `raw`.
    pub fn detect(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let format = if serde_json::from_slice::<serde::de::IgnoredAny>(&bytes).is_ok() {
            DataFormat::Json
        } else if std::str::from_utf8(&bytes).is_ok() {
            DataFormat::Text
        } else {
            DataFormat::Raw
        };
        Self { bytes, format }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Serialize for Payload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{Error, SerializeStruct};
        let mut s = serializer.serialize_struct("Payload", 2)?;
        s.serialize_field("format", &self.format)?;
        match self.format {
            DataFormat::Json => {
                let value: serde_json::Value =
                    serde_json::from_slice(&self.bytes).map_err(S::Error::custom)?;
                s.serialize_field("data", &value)?;
            }
            DataFormat::Text => {
                let text = std::str::from_utf8(&self.bytes).map_err(S::Error::custom)?;
                s.serialize_field("data", text)?;
            }
            DataFormat::Raw => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
                s.serialize_field("data", &encoded)?;
            }
        }
        s.end()
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        // Accepted shapes:
        // 1. {"format":"json","data":{...}}
        // 2. {"format":"text","data":"..."} / {"format":"raw","data":"base64..."}
        // 3. any other JSON value, taken as a json payload
        let raw = serde_json::Value::deserialize(deserializer)?;

        if let serde_json::Value::Object(ref map) = raw {
            if map.len() == 2 {
                if let (Some(fmt_val), Some(data_val)) = (map.get("format"), map.get("data")) {
                    if let Ok(format) = DataFormat::deserialize(fmt_val) {
                        return match format {
                            DataFormat::Json => {
                                let bytes = serde_json::to_vec(data_val).map_err(D::Error::custom)?;
                                Ok(Payload::new(bytes, DataFormat::Json))
                            }
                            DataFormat::Text => {
                                let text = data_val
                                    .as_str()
                                    .ok_or_else(|| D::Error::custom("expected string for text payload"))?;
                                Ok(Payload::text(text))
                            }
                            DataFormat::Raw => {
                                let b64 = data_val
                                    .as_str()
                                    .ok_or_else(|| D::Error::custom("expected base64 string for raw payload"))?;
                                let bytes = base64::engine::general_purpose::STANDARD
                                    .decode(b64)
                                    .map_err(D::Error::custom)?;
                                Ok(Payload::new(bytes, DataFormat::Raw))
                            }
                        };
                    }
                }
            }
        }

        let bytes = serde_json::to_vec(&raw).map_err(D::Error::custom)?;
        Ok(Payload::new(bytes, DataFormat::Json))
    }
}

// ════════════════════════════════════════════════════════════════
//  Change / Event
// ════════════════════════════════════════════════════════════════

/// A normalized change emitted by an event source, before sequencing.
#[derive(Clone, Debug)]
pub struct Change {
    pub payload: Payload,
    /// Unix ms at which the source observed the change.
    pub ts_ms: i64,
}

impl Change {
    pub fn new(payload: Payload) -> Self {
        Self { payload, ts_ms: now_ms() }
    }
}

/// An immutable, sequenced event on a topic.
///
/// `sequence` starts at 1, grows by one per event and is never reused
/// within a topic. It is the cursor clients resume from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub topic: String,
    pub payload: Payload,
    #[serde(rename = "timestamp")]
    pub ts_ms: i64,
}
