//! Domain error types.
//!
//! Only configuration problems are fatal. Everything the pipeline meets at
//! runtime (missing plots, empty rate responses, zero integrals) degrades to a
//! neutral result and is logged where it happens.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid rate interval settings: {0}")]
    InvalidRates(String),

    #[error("invalid settings for plot \"{plot}\": {reason}")]
    InvalidPlot { plot: String, reason: String },

    #[error("session id must not be empty")]
    EmptySessionId,
}

/// Errors raised while reading an external data source file.
///
/// These never abort a session: the caller logs them and skips the source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed source {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("inconsistent histogram in {path}: {reason}")]
    BadHistogram { path: PathBuf, reason: String },
}

/// Reasons a histogram operation cannot be carried out.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistogramError {
    #[error("binning mismatch: {left} bins on [{left_min}, {left_max}) vs {right} bins on [{right_min}, {right_max})")]
    BinningMismatch {
        left: usize,
        left_min: f64,
        left_max: f64,
        right: usize,
        right_min: f64,
        right_max: f64,
    },

    #[error("expected {expected} entries, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("axis must have at least one bin and x_min < x_max")]
    InvalidAxis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::InvalidPlot {
            plot: "TPC/Tracks/hEta".to_string(),
            reason: "check_threshold must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid settings for plot \"TPC/Tracks/hEta\": check_threshold must be positive"
        );
        assert_eq!(
            ConfigError::EmptySessionId.to_string(),
            "session id must not be empty"
        );
    }

    #[test]
    fn test_histogram_error_message() {
        let err = HistogramError::LengthMismatch {
            expected: 4,
            found: 3,
        };
        assert_eq!(err.to_string(), "expected 4 entries, found 3");
    }
}
