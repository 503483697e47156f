use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("provider returned an empty completion")]
    EmptyCompletion,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Whether a retry can reasonably succeed.
    ///
    /// Typed transport failures classify directly; the substring matcher
    /// adapts provider error text at the network boundary only.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::RequestFailed(e) => {
                e.is_timeout() || e.is_connect() || message_is_transient(&e.to_string())
            }
            AiError::ProviderStatus { status, body } => {
                *status >= 500 || *status == 429 || message_is_transient(body)
            }
            AiError::EmptyCompletion | AiError::InvalidResponse(_) => false,
        }
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "EOF",
    "timeout",
    "connection reset",
    "connection refused",
    "forcibly closed",
    "temporary failure",
    "no such host",
    "broken pipe",
    "network unreachable",
];

fn message_is_transient(message: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

pub type AiResult<T> = Result<T, AiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_5xx_is_transient() {
        let err = AiError::ProviderStatus {
            status: 503,
            body: "upstream busy".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn transient_markers_match_provider_text() {
        for marker in [
            "unexpected EOF",
            "read timeout exceeded",
            "connection reset by peer",
            "connection refused",
            "existing connection was forcibly closed",
            "temporary failure in name resolution",
            "dial tcp: no such host",
            "write: broken pipe",
            "network unreachable",
        ] {
            let err = AiError::ProviderStatus {
                status: 400,
                body: marker.to_string(),
            };
            assert!(err.is_transient(), "{marker} should classify as transient");
        }
    }

    #[test]
    fn parse_class_errors_are_fatal() {
        assert!(!AiError::EmptyCompletion.is_transient());
        assert!(!AiError::InvalidResponse("not json".to_string()).is_transient());
        let err = AiError::ProviderStatus {
            status: 401,
            body: "invalid api key".to_string(),
        };
        assert!(!err.is_transient());
    }
}
