use thiserror::Error;

/// Failure to produce a rate for one feed in one cycle.
///
/// Never fatal: the feed is skipped until the next cycle.
#[derive(Debug, Error)]
pub enum RateFetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("rate for {key} missing from response")]
    MissingRate { key: String },

    #[error("invalid price {value:?}")]
    InvalidPrice { value: String },
}

impl RateFetchError {
    pub(crate) fn from_request(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Http {
                url: url.to_string(),
                source,
            }
        }
    }

    pub(crate) fn from_body(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Parse {
                url: url.to_string(),
                source,
            }
        }
    }
}
