//! Error types for heartmula-rs.

use std::fmt;
use std::path::PathBuf;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor error raised by the pipeline itself.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer load or encode error.
    #[error("tokenizer: {0}")]
    Tokenizer(TokenizerError),

    /// A checkpoint artifact is not where the layout says it should be.
    #[error("missing {artifact}: expected {} but it was not found", path.display())]
    MissingArtifact {
        artifact: &'static str,
        path: PathBuf,
    },

    /// Invalid configuration (device, dtype, version, output format).
    #[error("config: {0}")]
    Config(String),

    /// A feature the loaded models do not offer, e.g. reference-audio conditioning.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Caller input rejected for this invocation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Failure inside a sequence or codec model call.
    #[error("model execution failed during {stage}: {source}")]
    ModelExecution {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Audio encoding error (WAV, OGG, MP3).
    #[error("audio: {0}")]
    Audio(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Generation manager channel error.
    #[error("manager: {0}")]
    Manager(String),
}

/// Coarse failure taxonomy callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised before any model is touched; fix the setup and retry.
    Configuration,
    /// The inputs of one invocation were unusable.
    InputValidation,
    /// A model call failed.
    ModelExecution,
    /// Tensor, filesystem or encoder failure in the pipeline itself.
    Runtime,
}

impl Error {
    /// Wrap a failure from a model capability call.
    pub fn model_execution(stage: &'static str) -> impl FnOnce(Error) -> Error {
        move |source| Error::ModelExecution {
            stage,
            source: Box::new(source),
        }
    }

    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingArtifact { .. }
            | Error::Config(_)
            | Error::Unsupported(_)
            | Error::Tokenizer(_)
            | Error::Json(_) => ErrorKind::Configuration,
            Error::InvalidInput(_) => ErrorKind::InputValidation,
            Error::ModelExecution { .. } => ErrorKind::ModelExecution,
            Error::Candle(_) | Error::Audio(_) | Error::Io(_) | Error::Manager(_) => {
                ErrorKind::Runtime
            }
        }
    }
}

/// Wrapper for tokenizer errors (tokenizers::Error doesn't impl std::error::Error).
#[derive(Debug)]
pub struct TokenizerError(pub String);

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<tokenizers::Error> for Error {
    fn from(error: tokenizers::Error) -> Self {
        Error::Tokenizer(TokenizerError(error.to_string()))
    }
}

impl From<hound::Error> for Error {
    fn from(error: hound::Error) -> Self {
        Error::Audio(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact_names_path() {
        let error = Error::MissingArtifact {
            artifact: "codec checkpoint",
            path: PathBuf::from("/ckpt/HeartCodec-oss"),
        };
        let msg = error.to_string();
        assert!(msg.contains("/ckpt/HeartCodec-oss"), "{msg}");
        assert!(msg.contains("codec checkpoint"), "{msg}");
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_model_execution_keeps_source() {
        let wrap = Error::model_execution("generate_frame");
        let error = wrap(Error::Candle(candle_core::Error::Msg("shape mismatch".into())));
        assert_eq!(error.kind(), ErrorKind::ModelExecution);
        assert!(error.to_string().contains("generate_frame"));
        assert!(error.to_string().contains("shape mismatch"));
    }

    #[test]
    fn test_input_validation_kind() {
        assert_eq!(
            Error::InvalidInput("empty".into()).kind(),
            ErrorKind::InputValidation
        );
        assert_eq!(Error::Manager("gone".into()).kind(), ErrorKind::Runtime);
    }
}
