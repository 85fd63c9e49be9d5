/// Errors produced while talking to an OhmOnWifi device or relaying commands to it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection refused, timeout, DNS failure or a non-success HTTP status.
    #[error("{0}")]
    Transport(String),

    /// The device answered, but the payload is missing a required field or is not parseable.
    #[error("{0}")]
    MalformedResponse(String),

    /// The device acknowledged a command with something other than "ok".
    #[error("device rejected command: {0}")]
    Device(String),

    /// The caller asked for something outside the currently configured bounds.
    #[error("{0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::MalformedResponse(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }
}

impl From<Error> for crate::engine::CommandError {
    fn from(e: Error) -> Self {
        match e {
            Error::Validation(message) => crate::engine::CommandError::Rejected(message),
            other => crate::engine::CommandError::Device(other.to_string()),
        }
    }
}
