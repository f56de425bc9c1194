use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionStreamError {
    #[error("Unknown camera: {0}")]
    UnknownCamera(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, VisionStreamError>;
