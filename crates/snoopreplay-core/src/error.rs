use thiserror::Error;

use crate::frame::Frame;

#[derive(Error, Debug)]
pub enum Error {
    /// The capture document is not an array of session objects.
    #[error("malformed capture: {0}")]
    MalformedCapture(String),

    #[error("recorded response {response} for command {command} is not valid hex")]
    InvalidResponse { command: Frame, response: Frame },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedCapture(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
