//! Generation error taxonomy
//!
//! Distinguishes the errors that are retried, the ones that abort a whole
//! multi-model run, and the soft ones that only take out a single model.

use crate::backend::GenerationRequest;

/// Wire error code for an account whose balance is used up.
pub const CODE_BALANCE_EXHAUSTED: &str = "balance_exhausted";
/// Wire error code for a model the account may not use.
pub const CODE_UNSUPPORTED_MODEL: &str = "unsupported_model";
/// Wire error code for a session id the upstream has not acknowledged yet.
pub const CODE_SESSION_NOT_TRACKED: &str = "session_not_tracked";

/// Why a single model's generation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The operator or the host cancelled the generation
    #[error("generation cancelled")]
    Cancelled,
    /// The upstream has not durably recorded the session id yet; retried
    #[error("session {session_id} is not tracked upstream yet")]
    SessionNotTracked {
        /// The session id the request was correlated with
        session_id: String,
    },
    /// The requested model is not available to this account
    #[error("model '{model}' is not supported (allowed: {})", .allowed.join(", "))]
    UnsupportedModel {
        /// The rejected model id
        model: String,
        /// Models the account may use, if known
        allowed: Vec<String>,
    },
    /// No credit left; continuing with other models would keep spending
    #[error("account balance exhausted")]
    BalanceExhausted,
    /// Any other backend failure
    #[error("backend error: {0}")]
    Backend(String),
    /// The event stream broke the wire ordering rules
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The stream finished without any usable text
    #[error("model '{model}' returned an empty response")]
    EmptyResponse {
        /// The model that produced nothing
        model: String,
    },
}

impl GenerationError {
    /// Build an error from a wire `error` event.
    #[must_use]
    pub fn from_wire(
        message: &str,
        code: Option<&str>,
        request: &GenerationRequest,
        allowed_models: &[String],
    ) -> Self {
        match code {
            Some(CODE_BALANCE_EXHAUSTED) => Self::BalanceExhausted,
            Some(CODE_UNSUPPORTED_MODEL) => Self::UnsupportedModel {
                model: request.model.clone(),
                allowed: allowed_models.to_vec(),
            },
            Some(CODE_SESSION_NOT_TRACKED) => Self::SessionNotTracked {
                session_id: request.session_id.clone(),
            },
            _ => Self::Backend(message.to_string()),
        }
    }

    /// Whether the retry loop may re-issue the request.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SessionNotTracked { .. })
    }

    /// Whether this error must stop every other model as well.
    #[must_use]
    pub const fn aborts_run(&self) -> bool {
        matches!(self, Self::UnsupportedModel { .. } | Self::BalanceExhausted)
    }

    /// Whether this is a cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            session_id: "sess-1".to_string(),
            input_text: "diff".to_string(),
            model: "model-a".to_string(),
            guide_hint: None,
        }
    }

    #[test]
    fn test_from_wire_maps_known_codes() {
        let req = request();
        assert_eq!(
            GenerationError::from_wire("no credit", Some("balance_exhausted"), &req, &[]),
            GenerationError::BalanceExhausted
        );
        assert_eq!(
            GenerationError::from_wire("later", Some("session_not_tracked"), &req, &[]),
            GenerationError::SessionNotTracked {
                session_id: "sess-1".to_string()
            }
        );
        assert_eq!(
            GenerationError::from_wire("boom", None, &req, &[]),
            GenerationError::Backend("boom".to_string())
        );
    }

    #[test]
    fn test_unsupported_model_lists_allowed_models() {
        let allowed = vec!["model-b".to_string(), "model-c".to_string()];
        let err =
            GenerationError::from_wire("nope", Some("unsupported_model"), &request(), &allowed);
        assert_eq!(
            err.to_string(),
            "model 'model-a' is not supported (allowed: model-b, model-c)"
        );
        assert!(err.aborts_run());
    }

    #[test]
    fn test_classification() {
        assert!(GenerationError::SessionNotTracked {
            session_id: String::new()
        }
        .is_transient());
        assert!(!GenerationError::BalanceExhausted.is_transient());
        assert!(GenerationError::BalanceExhausted.aborts_run());
        assert!(!GenerationError::Backend("x".to_string()).aborts_run());
        assert!(GenerationError::Cancelled.is_cancellation());
    }
}
