//! Backend client error taxonomy.

/// Failures from the clinical backend client.
///
/// `Transport`, `Http` and `Unauthorized` are one failure class as far as
/// the session state machines are concerned: the service could not be
/// used. `MalformedResponse` drives the same failed states but is logged
/// distinctly, since it signals contract drift rather than an outage.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Service unreachable, connection refused, or timed out.
    #[error("Backend unreachable: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("Backend returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// 401/403 from a credentialed endpoint.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// 2xx response whose body does not match the contract.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// The request could not be constructed at all.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Outage-class failure: unreachable, non-2xx or rejected credential.
    pub fn is_transport_class(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(_) | ApiError::Http { .. } | ApiError::Unauthorized(_)
        )
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, ApiError::MalformedResponse(_))
    }
}

/// Logs a backend failure with the right severity: malformed responses
/// point at contract drift and go to `error`, outage-class failures to
/// `warn`, and a request that never left gets its own `warn` message.
pub(crate) fn log_failure(stage: &str, e: &ApiError) {
    if e.is_malformed() {
        tracing::error!(error = %e, "{} returned a malformed response", stage);
    } else if e.is_transport_class() {
        tracing::warn!(error = %e, "{} failed", stage);
    } else {
        tracing::warn!(error = %e, "{} could not issue its request", stage);
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Transport(format!("request timed out: {e}"))
        } else if e.is_connect() {
            ApiError::Transport(format!("connection failed: {e}"))
        } else if e.is_builder() {
            ApiError::InvalidRequest(e.to_string())
        } else if e.is_decode() {
            ApiError::MalformedResponse(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class_covers_outages_but_not_contract_drift() {
        assert!(ApiError::Transport("refused".into()).is_transport_class());
        assert!(ApiError::Http {
            status: 500,
            detail: "boom".into()
        }
        .is_transport_class());
        assert!(ApiError::Unauthorized("token expired".into()).is_transport_class());
        assert!(!ApiError::MalformedResponse("missing field".into()).is_transport_class());
    }

    #[test]
    fn malformed_predicate_matches_only_malformed() {
        assert!(ApiError::MalformedResponse("no report field".into()).is_malformed());
        assert!(!ApiError::Transport("down".into()).is_malformed());
    }

    #[test]
    fn builder_failures_map_to_invalid_request() {
        // An empty host never produces a sendable request.
        let err = reqwest::Client::new().post("http://").build().unwrap_err();
        match ApiError::from(err) {
            ApiError::InvalidRequest(_) => {}
            other => panic!("Expected InvalidRequest, got: {other}"),
        }
    }
}
