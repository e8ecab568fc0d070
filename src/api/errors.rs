use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{control::CommandError, coordinator::UpdateFailed, poolsync::DeviceError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The hub rejected or never answered a request.
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Refresh(#[from] UpdateFailed),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Device(_) | Self::Refresh(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CommandError> for AppError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::UnknownEntity(_) => Self::NotFound(e.to_string()),
            CommandError::Device(device) => Self::Device(device),
            CommandError::UnknownAction(_)
            | CommandError::Unsupported { .. }
            | CommandError::InvalidValue(_)
            | CommandError::OutOfRange { .. } => Self::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_errors_map_to_status() {
        let cases = [
            (CommandError::UnknownEntity("x".into()), StatusCode::NOT_FOUND),
            (CommandError::UnknownAction("x".into()), StatusCode::BAD_REQUEST),
            (
                CommandError::OutOfRange { value: 50.0, min: 5.0, max: 40.0 },
                StatusCode::BAD_REQUEST,
            ),
            (
                CommandError::Device(DeviceError::Transport { message: "refused".into() }),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_errors_are_500() {
        let err = AppError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
