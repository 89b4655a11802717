use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::access::AccessError;
use crate::workflows::accreditation::{AccreditationError, TemplateImportError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Accreditation(AccreditationError),
    Access(AccessError),
    TemplateImport(TemplateImportError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Accreditation(err) => write!(f, "accreditation error: {}", err),
            AppError::Access(err) => write!(f, "access error: {}", err),
            AppError::TemplateImport(err) => write!(f, "template import error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Accreditation(err) => Some(err),
            AppError::Access(err) => Some(err),
            AppError::TemplateImport(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Accreditation(err) => err.status_code(),
            AppError::Access(AccessError::AuthenticationFailure) => StatusCode::UNAUTHORIZED,
            AppError::Access(AccessError::AuthorizationFailure { .. }) => StatusCode::FORBIDDEN,
            AppError::Access(_) | AppError::TemplateImport(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<AccreditationError> for AppError {
    fn from(value: AccreditationError) -> Self {
        Self::Accreditation(value)
    }
}

impl From<AccessError> for AppError {
    fn from(value: AccessError) -> Self {
        Self::Access(value)
    }
}

impl From<TemplateImportError> for AppError {
    fn from(value: TemplateImportError) -> Self {
        Self::TemplateImport(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_failures_keep_their_status() {
        let response = AppError::from(AccessError::AuthenticationFailure).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = AppError::from(AccreditationError::NotFound("application app-9".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
