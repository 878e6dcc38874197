use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2pError>;

#[derive(Error, Debug)]
pub enum P2pError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Message too large: {0} bytes")]
    TooLarge(usize),

    #[error("Unknown message type: {0}")]
    UnknownType(u8),

    #[error("Buffer too short: need {needed} bytes, got {got}")]
    ShortBuffer { needed: usize, got: usize },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer is not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl From<std::io::Error> for P2pError {
    fn from(err: std::io::Error) -> Self {
        P2pError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2pError {
    fn from(err: serde_json::Error) -> Self {
        P2pError::DecodeError(err.to_string())
    }
}
