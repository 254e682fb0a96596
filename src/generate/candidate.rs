//! Candidate type and per-attempt event accumulation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::wire::TokenUsage;
use crate::backend::StreamEvent;
use crate::error::GenerationError;

/// Remaining request allowance reported by the provider. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    /// Requests left in the current window
    #[serde(default)]
    pub remaining: u64,
    /// Size of the window
    #[serde(default)]
    pub limit: u64,
    /// When the window resets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

/// One generated message, either final or a streaming partial.
///
/// Partials share the `slot_id` of the final candidate they precede.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Sanitized message text
    pub content: String,
    /// Stable id of the slot this candidate belongs to
    pub slot_id: String,
    /// Model that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Cost in USD reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Wall-clock time of the successful attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_duration_ms: Option<u64>,
    /// Provider-side id of the generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    /// Quota snapshot attached to this response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaInfo>,
    /// Token usage of the final response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Whether more text is still coming
    #[serde(default)]
    pub is_partial: bool,
    /// Position the producer intended this candidate for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_index: Option<usize>,
}

/// Fields pulled out of a `provider-metadata` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderDetails {
    /// Cost in USD
    pub cost: Option<f64>,
    /// Provider generation id
    pub generation_id: Option<String>,
    /// Quota snapshot
    pub quota: Option<QuotaInfo>,
}

impl ProviderDetails {
    /// Read cost, generation id and quota from the payload root, falling back
    /// to objects nested one level down (providers often namespace them).
    #[must_use]
    pub fn from_metadata(metadata: &Value) -> Self {
        let nested: Vec<&Value> = metadata
            .as_object()
            .map(|map| map.values().filter(|v| v.is_object()).collect())
            .unwrap_or_default();
        let lookup = |key: &str| {
            std::iter::once(metadata)
                .chain(nested.iter().copied())
                .find_map(|obj| obj.get(key))
        };

        Self {
            cost: lookup("cost").and_then(Value::as_f64),
            generation_id: lookup("generationId")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            quota: lookup("quota").and_then(|q| serde_json::from_value(q.clone()).ok()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Content,
    Usage,
    Done,
}

/// Folds one attempt's events while enforcing the wire ordering.
#[derive(Debug, Default)]
pub struct GenerationAccumulator {
    phase: Phase,
    text: String,
    usage: Option<TokenUsage>,
    details: ProviderDetails,
}

impl GenerationAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event. Returns `true` when the text changed.
    pub fn process(&mut self, event: &StreamEvent) -> Result<bool, GenerationError> {
        if self.phase == Phase::Done {
            return Err(GenerationError::Protocol(
                "event after provider metadata".to_string(),
            ));
        }

        match event {
            StreamEvent::Content { text } => {
                if self.phase != Phase::Content {
                    return Err(GenerationError::Protocol(
                        "content after usage metadata".to_string(),
                    ));
                }
                if text.is_empty() || *text == self.text {
                    return Ok(false);
                }
                self.text.clone_from(text);
                Ok(true)
            }
            StreamEvent::UsageMetadata { usage } => {
                if self.phase != Phase::Content {
                    return Err(GenerationError::Protocol(
                        "duplicate usage metadata".to_string(),
                    ));
                }
                self.usage = Some(*usage);
                self.phase = Phase::Usage;
                Ok(false)
            }
            StreamEvent::ProviderMetadata { metadata } => {
                if self.phase != Phase::Usage {
                    return Err(GenerationError::Protocol(
                        "provider metadata before usage metadata".to_string(),
                    ));
                }
                self.details = ProviderDetails::from_metadata(metadata);
                self.phase = Phase::Done;
                Ok(false)
            }
            StreamEvent::Error { message, .. } => Err(GenerationError::Backend(message.clone())),
        }
    }

    /// Last non-empty text seen, unsanitized
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Token usage, once reported
    #[must_use]
    pub const fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }

    /// Provider details, once reported
    #[must_use]
    pub const fn details(&self) -> &ProviderDetails {
        &self.details
    }
}
