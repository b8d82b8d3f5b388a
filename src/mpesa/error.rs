use serde_json::{json, Value as JsonValue};
use thiserror::Error;

pub type MpesaResult<T> = Result<T, MpesaError>;

#[derive(Debug, Clone, Error)]
pub enum MpesaError {
    #[error("Auth error: {message}")]
    Auth { message: String },

    #[error("Transport error {error_code}: {error_message}")]
    Transport {
        error_code: i64,
        error_message: String,
    },

    #[error("Provider error {error_code}: {error_message}")]
    Provider {
        error_code: String,
        error_message: String,
    },

    #[error("Order not found")]
    OrderNotFound,

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    #[error("Credential error: {message}")]
    Credential { message: String },
}

impl MpesaError {
    pub fn transport(message: impl Into<String>) -> Self {
        MpesaError::Transport {
            error_code: 1,
            error_message: message.into(),
        }
    }

    /// The `{errorCode, errorMessage}` body Daraja callers expect. Webhook
    /// handlers must answer with this instead of an HTTP error status.
    pub fn fault_body(&self) -> JsonValue {
        match self {
            MpesaError::Transport {
                error_code,
                error_message,
            } => json!({ "errorCode": error_code, "errorMessage": error_message }),
            MpesaError::Provider {
                error_code,
                error_message,
            } => json!({ "errorCode": error_code, "errorMessage": error_message }),
            other => json!({ "errorCode": 1, "errorMessage": other.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_fault_body_matches_wire_shape() {
        let err = MpesaError::transport("connection refused");
        let body = err.fault_body();
        assert_eq!(body["errorCode"], 1);
        assert_eq!(body["errorMessage"], "connection refused");
    }

    #[test]
    fn provider_fault_body_keeps_provider_code() {
        let err = MpesaError::Provider {
            error_code: "400.002.02".to_string(),
            error_message: "Bad Request - Invalid Timestamp".to_string(),
        };
        assert_eq!(err.fault_body()["errorCode"], "400.002.02");
    }

    #[test]
    fn credential_errors_never_carry_secrets() {
        let err = MpesaError::Credential {
            message: "certificate not found at certs/live/cert.cer".to_string(),
        };
        assert!(!err.to_string().contains("password"));
    }
}
