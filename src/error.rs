//! Error types for takepick.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TakepickError {
    // Configuration errors (fatal at startup)
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    Configuration { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Per-candidate errors
    #[error("Feature extraction failed for chunk {chunk_index} v{version}: {message}")]
    Extraction {
        chunk_index: u32,
        version: u32,
        message: String,
    },

    #[error("Audio decode failed for {path}: {message}")]
    AudioDecode { path: String, message: String },

    #[error("Gate {gate} could not evaluate feature {feature}: {message}")]
    GateEvaluation {
        gate: String,
        feature: String,
        message: String,
    },

    // Per-chunk errors
    #[error("Chunk {chunk_index} has no acceptable candidates after {rounds} top-up rounds")]
    EmptyPool { chunk_index: u32, rounds: u32 },

    #[error("Chunk {chunk_index} cannot {action} while {state}")]
    InvalidTransition {
        chunk_index: u32,
        state: String,
        action: String,
    },

    #[error("Synthesis request failed{}: {message}", transient_tag(.transient))]
    Synthesis { message: String, transient: bool },

    // Session-level errors
    #[error("Session {session} not found under {root}")]
    SessionNotFound { session: String, root: String },

    #[error("Session store error: {message}")]
    Store { message: String },

    #[error("Session run cancelled before chunk {next_chunk}")]
    Cancelled { next_chunk: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TakepickError {
    /// Shorthand for a configuration error on `key`.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        TakepickError::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TakepickError::Synthesis {
                transient: true,
                ..
            }
        )
    }
}

fn transient_tag(transient: &bool) -> &'static str {
    if *transient { " (transient)" } else { "" }
}

pub type Result<T> = std::result::Result<T, TakepickError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_configuration_display() {
        let error = TakepickError::config("weights.echo", "must be non-negative");
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for weights.echo: must be non-negative"
        );
    }

    #[test]
    fn test_extraction_display() {
        let error = TakepickError::Extraction {
            chunk_index: 4,
            version: 2,
            message: "audio shorter than 250 ms".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Feature extraction failed for chunk 4 v2: audio shorter than 250 ms"
        );
    }

    #[test]
    fn test_empty_pool_display() {
        let error = TakepickError::EmptyPool {
            chunk_index: 7,
            rounds: 3,
        };
        assert_eq!(
            error.to_string(),
            "Chunk 7 has no acceptable candidates after 3 top-up rounds"
        );
    }

    #[test]
    fn test_synthesis_display_marks_transient() {
        let transient = TakepickError::Synthesis {
            message: "timeout".to_string(),
            transient: true,
        };
        assert_eq!(
            transient.to_string(),
            "Synthesis request failed (transient): timeout"
        );

        let permanent = TakepickError::Synthesis {
            message: "bad request".to_string(),
            transient: false,
        };
        assert_eq!(permanent.to_string(), "Synthesis request failed: bad request");
    }

    #[test]
    fn test_is_transient_only_for_transient_synthesis() {
        assert!(
            TakepickError::Synthesis {
                message: String::new(),
                transient: true
            }
            .is_transient()
        );
        assert!(
            !TakepickError::Synthesis {
                message: String::new(),
                transient: false
            }
            .is_transient()
        );
        assert!(!TakepickError::Other("x".to_string()).is_transient());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: TakepickError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: TakepickError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: TakepickError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<TakepickError>();
        assert_sync::<TakepickError>();
    }
}
