use switchboard_core::StatusError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("{}", match .0 { Some(err) => format!("channel failed: {err}"), None => "channel closed".to_string() })]
    ChannelClosed(Option<StatusError>),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for StatusError {
    /// Status errors keep their code and a failed channel unwraps to its
    /// cause. Everything else is reported as `Internal`.
    fn from(err: Error) -> Self {
        match err {
            Error::Status(status) => status,
            Error::ChannelClosed(Some(status)) => status,
            other => StatusError::internal(other.to_string()),
        }
    }
}
