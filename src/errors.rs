use crate::validation::ValidationError;

/// Failure taxonomy for the booking and conversation paths.
///
/// Validation errors are produced before any external call and never retried.
/// `SlotUnavailable` and `HoldExpired` are arbitration outcomes surfaced back
/// into the conversation as a retry prompt. `Service` wraps external-service
/// failures after the adapter's own retry policy has run out.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("slot {0} is unavailable")]
    SlotUnavailable(String),

    #[error("hold has expired or belongs to another conversation")]
    HoldExpired,

    #[error("reschedule incomplete: event {event_id} was cancelled but the new event could not be created: {reason}")]
    RescheduleIncomplete { event_id: String, reason: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Error from an external service call, split by whether retrying can help.
///
/// Timeouts, connection failures and 408/429/5xx responses are transient;
/// everything else (validation, authentication, not-found) is permanent and
/// must never be retried.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service}: transient failure: {message}")]
    Transient {
        service: &'static str,
        message: String,
    },

    #[error("{service}: request rejected: {message}")]
    Permanent {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn transient(service: &'static str, message: impl ToString) -> Self {
        Self::Transient {
            service,
            message: message.to_string(),
        }
    }

    pub fn permanent(service: &'static str, message: impl ToString) -> Self {
        Self::Permanent {
            service,
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::transient(service, err)
        } else {
            Self::permanent(service, err)
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(service: &'static str, status: reqwest::StatusCode, body: &str) -> Self {
        let mut message = format!("HTTP {status}");
        if !body.is_empty() {
            let snippet: String = body.chars().take(200).collect();
            message.push_str(": ");
            message.push_str(&snippet);
        }
        let retryable = status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error();
        if retryable {
            Self::Transient { service, message }
        } else {
            Self::Permanent { service, message }
        }
    }
}
