//! API error taxonomy.
//!
//! Every HTTP-level outcome is classified into one of four buckets that the
//! rest of the system keys off: rate limits feed the backoff controller and
//! never cost an item a retry, not-found is terminal for the item, transient
//! errors consume a retry, and fatal errors abort the whole run.

use thiserror::Error;

/// Classification of an API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// HTTP 429. Handled by the rate limiter, invisible to retry budgets.
    RateLimited,
    /// HTTP 404. Terminal for the item; a 404 will not become a 200.
    NotFound,
    /// Timeouts, 5xx, network failures. Consumes one retry.
    Transient,
    /// Auth failure, quota exhaustion, disk exhaustion. Aborts the run.
    Fatal,
}

/// An error from the remote API or the transport beneath it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited => ErrorClass::RateLimited,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Transient(_) => ErrorClass::Transient,
            Self::Fatal(_) => ErrorClass::Fatal,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        // Anything the network or server did wrong is worth retrying;
        // request construction bugs are not.
        if e.is_builder() {
            ApiError::Fatal(e.to_string())
        } else {
            ApiError::Transient(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(ApiError::RateLimited.class(), ErrorClass::RateLimited);
        assert_eq!(
            ApiError::NotFound("x".into()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            ApiError::Transient("t".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(ApiError::Fatal("f".into()).class(), ErrorClass::Fatal);
    }
}
