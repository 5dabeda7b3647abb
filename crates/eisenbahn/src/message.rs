use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Suffix appended to a request topic to form its reply topic.
pub const REPLY_SUFFIX: &str = ".reply";

/// Wire-format message envelope exchanged between the scheduler and sites.
///
/// Messages are serialized with MessagePack. The `topic` field selects the
/// handler on the receiving side (resource check, resource cancel, job
/// events), while `correlation_id` pairs a reply with its request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Routing topic (e.g. "eisenbahn.resource.check").
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// When this message was created.
    pub timestamp: DateTime<Utc>,

    /// Correlation ID pairing a reply with its request.
    pub correlation_id: Uuid,

    /// Schema version for forward-compatible evolution.
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a new message, serializing the payload with MessagePack.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::with_correlation(topic, payload, Uuid::new_v4())
    }

    /// Create a message with an explicit correlation ID.
    pub fn with_correlation<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec_named(payload)?,
            timestamp: Utc::now(),
            correlation_id,
            version: 1,
        })
    }

    /// Build the reply to this message: same correlation ID, topic suffixed with `.reply`.
    pub fn reply<T: Serialize>(&self, payload: &T) -> Result<Self, rmp_serde::encode::Error> {
        Self::with_correlation(
            format!("{}{REPLY_SUFFIX}", self.topic),
            payload,
            self.correlation_id,
        )
    }

    /// Copy of this message carrying a new correlation ID.
    ///
    /// Used when the same request is fanned out to several sites so that each
    /// reply can be matched independently.
    pub fn recorrelated(&self) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    /// Serialize this entire message envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a message envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
