//! Crate-level error type and `Result` alias. Every error at this layer is
//! fatal: it surfaces to the CLI with a readable message and a non-zero exit,
//! with no retry or partial-result salvage.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Missing credential: {name}. Provide it on the command line, set the \
         environment variable, or add a netrc entry for the host"
    )]
    MissingCredential { name: &'static str },

    #[error("Unknown workflow: {name}. Recognized workflows: hyp3_autorift, s1_correction")]
    UnknownWorkflow { name: String },

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}
