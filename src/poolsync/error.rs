use thiserror::Error;

/// Failure talking to the PoolSync hub.
///
/// Every variant is produced at the client boundary; callers never see a raw
/// `reqwest::Error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// Connection refused, DNS failure, timeout. Reported as HTTP status 0.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The hub answered with something other than `200 OK`.
    #[error("device returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// `200 OK` whose body is not the expected JSON structure.
    #[error("malformed response (HTTP {status}): {body}")]
    MalformedResponse { status: u16, body: String },
}

impl DeviceError {
    /// HTTP status of the failed call, `0` when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            Self::Transport { .. } => 0,
            Self::HttpStatus { status, .. } | Self::MalformedResponse { status, .. } => *status,
        }
    }

    /// Raw response body, or the transport error text.
    pub fn body(&self) -> &str {
        match self {
            Self::Transport { message } => message,
            Self::HttpStatus { body, .. } | Self::MalformedResponse { body, .. } => body,
        }
    }
}
