use shared::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown room {0}")]
    UnknownRoom(u16),
}

pub type Result<T> = std::result::Result<T, ServerError>;
