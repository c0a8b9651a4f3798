use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynacronError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DynacronError {
    /// Short error code, logged alongside the message by the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            DynacronError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DynacronError>;
