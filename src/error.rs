//! Error types for the collection pipeline.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! | Error | Scope | Handling |
//! |-------|-------|----------|
//! | [`PolicyError`] | robots.txt lookup | recovered inside the cache (fail-open) |
//! | [`ProviderError`] | rewrite / translation call | recovered as a degraded [`Outcome`](crate::models::Outcome) |
//! | [`FetchError`], [`ExtractionError`], [`PersistenceError`] | one item | caught by the orchestrator, counted as an error |
//! | [`ConfigError`] | process | aborts before any run starts |

use thiserror::Error;

/// Failure to obtain a robots.txt policy. Never leaves the policy cache.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("robots.txt request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("robots.txt returned status {status}")]
    Status { status: u16 },

    #[error("cannot derive robots.txt location from {url}")]
    InvalidUrl { url: String },
}

/// Page download failed.
#[derive(Debug, Error)]
#[error("failed to fetch article from {url}: {source}")]
pub struct FetchError {
    pub url: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl FetchError {
    pub fn new(url: &str, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            url: url.to_string(),
            source: source.into(),
        }
    }
}

/// A required field could not be extracted from the page.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("could not extract title from {url}")]
    MissingTitle { url: String },

    #[error("could not extract content from {url}")]
    MissingBody { url: String },

    #[error("no extraction rules for site `{site}`")]
    NoRules { site: String },
}

/// A rewrite or translation provider did not produce a usable answer.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider response is missing `{field}`")]
    MissingField { field: &'static str },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("invalid {field}: {value}")]
    Validation { field: &'static str, value: String },

    #[error("article already stored: {source_url}")]
    Duplicate { source_url: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Startup configuration problems. Fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid cron schedule `{expression}`: {reason}")]
    Schedule { expression: String, reason: String },

    #[error("unknown timezone `{0}`")]
    Timezone(String),

    #[error("cannot read source list {path}: {source}")]
    SourceFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid source list: {0}")]
    SourceFormat(#[from] serde_yaml::Error),

    #[error("source {url} uses unknown site `{site}`")]
    UnknownSite { url: String, site: String },

    #[error("invalid source url `{url}`: {reason}")]
    SourceUrl { url: String, reason: String },

    #[error("invalid selector `{selector}` in rules for `{site}`")]
    Selector { site: String, selector: String },

    #[error("invalid {field} `{value}`")]
    Invalid { field: &'static str, value: String },

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Anything that ends a single item as an error.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ItemError {
    /// Stage label used in log events.
    pub fn stage(&self) -> &'static str {
        match self {
            ItemError::Fetch(_) => "fetch",
            ItemError::Extraction(_) => "extract",
            ItemError::Persistence(_) => "persist",
        }
    }
}
