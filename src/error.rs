// Error types shared across the mission engine

use thiserror::Error;

/// Invalid Keplerian element set.
#[derive(Debug, Error, PartialEq)]
pub enum ElementsError {
    #[error("{body}: semi-major axis must be positive (got {value})")]
    SemiMajorAxis { body: &'static str, value: f64 },

    #[error("{body}: eccentricity must lie in [0, 1) (got {value})")]
    Eccentricity { body: &'static str, value: f64 },

    #[error("{body}: sidereal period must be positive (got {value})")]
    Period { body: &'static str, value: f64 },

    #[error("{body}: element '{field}' is not finite")]
    NonFinite {
        body: &'static str,
        field: &'static str,
    },
}

/// Timeline construction failure.
#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    #[error("phase '{phase}' has invalid duration {duration} days")]
    InvalidDuration { phase: &'static str, duration: f64 },

    #[error("timeline has no phases")]
    Empty,
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}' as a number")]
    Parse { key: &'static str, value: String },

    #[error("{key}: {reason} (got {value})")]
    OutOfRange {
        key: &'static str,
        value: f64,
        reason: &'static str,
    },
}

/// Rejected operator command. Every variant maps to an `error` reply.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("malformed command payload: {0}")]
    Malformed(String),

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("command '{command}': parameter '{parameter}' is not a number")]
    InvalidParameter {
        command: &'static str,
        parameter: &'static str,
    },
}

/// Top-level failure surfaced to the binary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("orbital elements error: {0}")]
    Elements(#[from] ElementsError),

    #[error("timeline error: {0}")]
    Timeline(#[from] TimelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("simulation loop is no longer running")]
    LoopClosed,
}
