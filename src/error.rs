//! Typed failure kinds raised by the pipeline stages

use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a run, plus the one non-fatal browser failure.
///
/// Stages return `crate::Result`, so these travel inside `anyhow::Error`;
/// callers that care about the kind use `downcast_ref::<PipelineError>()`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("API returned an error: {0}")]
    Api(String),

    #[error("no usable rows left after {stage}")]
    EmptyResult { stage: &'static str },

    #[error(
        "cannot partition {countries} countries into {clusters} clusters; \
         at least {clusters} countries with complete data are required"
    )]
    TooFewCountries { countries: usize, clusters: usize },

    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not open {} in a browser: {reason}", path.display())]
    BrowserLaunch { path: PathBuf, reason: String },
}

impl PipelineError {
    /// Whether the run can still be considered successful after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::BrowserLaunch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_browser_launch_is_non_fatal() {
        let launch = PipelineError::BrowserLaunch {
            path: PathBuf::from("map.html"),
            reason: "no display".to_string(),
        };
        assert!(!launch.is_fatal());

        let empty = PipelineError::EmptyResult { stage: "join" };
        assert!(empty.is_fatal());
        assert!(PipelineError::Api("bad".into()).is_fatal());
    }

    #[test]
    fn test_too_few_countries_message_names_both_counts() {
        let err = PipelineError::TooFewCountries {
            countries: 2,
            clusters: 5,
        };
        let message = err.to_string();
        assert!(message.contains("2 countries"));
        assert!(message.contains("5 clusters"));
    }
}
