use std::fmt;

use thiserror::Error;

/// Failure classes the processor logs and alerts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Store or queue temporarily unreachable.
    TransientInfra,
    /// Network, timeout or provider rejection. Eligible for the retry budget.
    TransientGateway,
    /// Malformed message or invalid amount. Dropped, never retried.
    PermanentInput,
    /// Retry budget used up. Kept for audit only.
    PermanentExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientInfra => "transient_infra",
            ErrorKind::TransientGateway => "transient_gateway",
            ErrorKind::PermanentInput => "permanent_input",
            ErrorKind::PermanentExhausted => "permanent_exhausted",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientInfra | ErrorKind::TransientGateway)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid payment input: {0}")]
    InvalidInput(String),

    #[error("failed to acquire access token: {0}")]
    Credentials(String),

    #[error("request to payment provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("payment provider rejected request (code {code}): {description}")]
    Rejected { code: String, description: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidInput(_) => ErrorKind::PermanentInput,
            _ => ErrorKind::TransientGateway,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_input_is_permanent() {
        assert_eq!(
            GatewayError::InvalidInput("amount".into()).kind(),
            ErrorKind::PermanentInput
        );
        assert_eq!(
            GatewayError::Rejected {
                code: "1".into(),
                description: "insufficient balance".into()
            }
            .kind(),
            ErrorKind::TransientGateway
        );
        assert_eq!(
            GatewayError::Decode("eof".into()).kind(),
            ErrorKind::TransientGateway
        );
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(ErrorKind::PermanentExhausted.to_string(), "permanent_exhausted");
        assert!(ErrorKind::TransientInfra.is_retryable());
        assert!(!ErrorKind::PermanentInput.is_retryable());
    }
}
