use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source error: {0}")]
    Source(#[from] anyhow::Error),

    #[error("Unable to connect to inventory source: {0}")]
    SourceConnect(String),

    #[error("Extraction failed for {entity}: {reason}")]
    Extract { entity: String, reason: String },

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pipeline state: expected {expected}, found {found}")]
    State {
        expected: &'static str,
        found: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PipelineError {
    pub fn extract(entity: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Extract {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }

    /// Only a failed inventory source connection stops a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::SourceConnect(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
