use thiserror::Error;

pub type CrmResult<T> = Result<T, CrmError>;

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rule validation error: {0}")]
    Validation(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for CrmError {
    fn from(err: config::ConfigError) -> Self {
        CrmError::Config(err.to_string())
    }
}
