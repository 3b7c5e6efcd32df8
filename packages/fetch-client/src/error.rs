use thiserror::Error;

/// Failure to obtain a usable response.
///
/// `RateLimited`, `Server` and `Network` are transient and absorbed by the
/// retry loop; callers see them only inside [`FetchError::Exhausted`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by {url}")]
    RateLimited { url: String },

    #[error("server error {status} from {url}")]
    Server { url: String, status: u16 },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("no usable response from {url} after {attempts} attempts")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Option<Box<FetchError>>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

impl FetchError {
    /// Whether the retry loop would try again after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::Server { .. } | FetchError::Network { .. }
        )
    }

    /// The "no usable response" signal returned once retries run out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FetchError::Exhausted { .. })
    }
}

/// A non-success status that must not be retried (403, 404, ...).
#[derive(Debug, Error)]
#[error("HTTP {status} for {url}")]
pub struct TerminalFetchError {
    pub url: String,
    pub status: u16,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let url = "https://example.com".to_string();
        assert!(FetchError::RateLimited { url: url.clone() }.is_transient());
        assert!(FetchError::Server { url: url.clone(), status: 502 }.is_transient());
        assert!(FetchError::Network { url: url.clone(), message: "reset".into() }.is_transient());

        let exhausted = FetchError::Exhausted { url, attempts: 3, last: None };
        assert!(!exhausted.is_transient());
        assert!(exhausted.is_exhausted());
        assert!(!FetchError::InvalidRequest("bad".into()).is_transient());
    }
}
