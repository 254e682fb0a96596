//! Wire framing for generation events
//!
//! Events travel as server-sent-event style blocks, one per
//! `data: <json>\n\n`. A successful stream is zero or more
//! `commit-message` events (each a complete-so-far replacement, not a
//! delta), exactly one `usage`, then exactly one `provider-metadata`. A
//! failed stream is a single `error` event.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Token counts reported at the end of a successful stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
}

/// A decoded wire event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Complete-so-far message text
    #[serde(rename = "commit-message")]
    Content {
        /// The text generated so far
        #[serde(rename = "commitMessage")]
        text: String,
    },
    /// Terminal token usage
    #[serde(rename = "usage")]
    UsageMetadata {
        /// Token counts
        usage: TokenUsage,
    },
    /// Provider-specific terminal metadata (cost, generation id, quota)
    #[serde(rename = "provider-metadata")]
    ProviderMetadata {
        /// Raw provider payload
        #[serde(rename = "providerMetadata")]
        metadata: Value,
    },
    /// Failure; nothing follows it
    #[serde(rename = "error")]
    Error {
        /// Human-readable message
        message: String,
        /// Machine-readable error class, see [`crate::error`]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

/// Parse the JSON payload of a single `data:` block.
///
/// Returns `None` if the payload is empty, not valid JSON, or of an unknown
/// event type.
#[must_use]
pub fn parse_event(payload: &str) -> Option<StreamEvent> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(error = %err, "skipping undecodable wire event");
            None
        }
    }
}

/// Encode an event as one wire frame.
pub fn encode_event(event: &StreamEvent) -> serde_json::Result<String> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Reassembles frames from bytes that arrive in arbitrary pieces.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event whose frame is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            events.extend(decode_frame(&frame[..end]));
        }
        events
    }

    /// Decode whatever is left once the byte stream ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_frame(&rest).into_iter().collect()
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn decode_frame(frame: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(frame);
    let payload: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if payload.is_empty() {
        return None;
    }
    parse_event(&payload.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_empty_payload_returns_none() {
        assert!(parse_event("").is_none());
        assert!(parse_event("   ").is_none());
    }

    #[test]
    fn test_parse_invalid_json_returns_none() {
        assert!(parse_event("not json").is_none());
        assert!(parse_event("{invalid").is_none());
    }

    #[test]
    fn test_parse_commit_message() {
        let event = parse_event(r#"{"type":"commit-message","commitMessage":"feat: add x"}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Content {
                text: "feat: add x".to_string()
            })
        );
    }

    #[test]
    fn test_parse_usage() {
        let event = parse_event(r#"{"type":"usage","usage":{"inputTokens":120,"outputTokens":14}}"#);
        assert_eq!(
            event,
            Some(StreamEvent::UsageMetadata {
                usage: TokenUsage {
                    input_tokens: 120,
                    output_tokens: 14
                }
            })
        );
    }

    #[test]
    fn test_parse_provider_metadata() {
        let event =
            parse_event(r#"{"type":"provider-metadata","providerMetadata":{"cost":0.0012}}"#);
        match event {
            Some(StreamEvent::ProviderMetadata { metadata }) => {
                assert_eq!(metadata["cost"], json!(0.0012));
            }
            other => panic!("Expected ProviderMetadata, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_with_and_without_code() {
        assert_eq!(
            parse_event(r#"{"type":"error","message":"no credit","code":"balance_exhausted"}"#),
            Some(StreamEvent::Error {
                message: "no credit".to_string(),
                code: Some("balance_exhausted".to_string()),
            })
        );
        assert_eq!(
            parse_event(r#"{"type":"error","message":"boom"}"#),
            Some(StreamEvent::Error {
                message: "boom".to_string(),
                code: None,
            })
        );
    }

    #[test]
    fn test_parse_unknown_type_returns_none() {
        assert!(parse_event(r#"{"type":"heartbeat"}"#).is_none());
        assert!(parse_event(r#"{"data":"no type field"}"#).is_none());
    }

    #[test]
    fn test_encode_produces_one_frame() {
        let frame = encode_event(&StreamEvent::Content {
            text: "fix: y".to_string(),
        })
        .unwrap();
        assert_eq!(
            frame,
            "data: {\"type\":\"commit-message\",\"commitMessage\":\"fix: y\"}\n\n"
        );
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let events = [
            StreamEvent::Content {
                text: "feat: a".to_string(),
            },
            StreamEvent::UsageMetadata {
                usage: TokenUsage {
                    input_tokens: 1,
                    output_tokens: 2,
                },
            },
        ];
        let wire: String = events.iter().map(|e| encode_event(e).unwrap()).collect();

        for split in 0..=wire.len() {
            let (a, b) = wire.as_bytes().split_at(split);
            let mut decoder = FrameDecoder::new();
            let mut decoded = decoder.push(a);
            decoded.extend(decoder.push(b));
            decoded.extend(decoder.finish());
            assert_eq!(decoded, events, "split at {split}");
        }
    }

    #[test]
    fn test_decoder_tolerates_crlf_and_missing_space() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(b"data:{\"type\":\"error\",\"message\":\"x\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_decoder_finish_decodes_unterminated_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder
            .push(b"data: {\"type\":\"commit-message\",\"commitMessage\":\"x\"}")
            .is_empty());
        assert_eq!(decoder.finish().len(), 1);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_decoder_keeps_multibyte_text_intact() {
        let wire = encode_event(&StreamEvent::Content {
            text: "docs: café ☕".to_string(),
        })
        .unwrap();
        let bytes = wire.as_bytes();
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in bytes {
            decoded.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(
            decoded,
            vec![StreamEvent::Content {
                text: "docs: café ☕".to_string()
            }]
        );
    }
}
