//! API error responses.
//!
//! Every failure leaves the server as `{"error": {"code", "message", "details?"}}`
//! with a status code derived from the error code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::geo::BoundsError;

/// What went wrong, as reported in `error.code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PayloadTooLarge,
    UnsupportedMediaType,
    UnprocessableEntity,
    TooManyRequests,
    /// One or more request fields failed validation (400)
    ValidationError,
    InternalError,
}

impl ErrorCode {
    const TABLE: [(ErrorCode, StatusCode, &'static str); 11] = [
        (ErrorCode::BadRequest, StatusCode::BAD_REQUEST, "bad_request"),
        (ErrorCode::Unauthorized, StatusCode::UNAUTHORIZED, "unauthorized"),
        (ErrorCode::Forbidden, StatusCode::FORBIDDEN, "forbidden"),
        (ErrorCode::NotFound, StatusCode::NOT_FOUND, "not_found"),
        (ErrorCode::Conflict, StatusCode::CONFLICT, "conflict"),
        (ErrorCode::PayloadTooLarge, StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
        (
            ErrorCode::UnsupportedMediaType,
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
        ),
        (
            ErrorCode::UnprocessableEntity,
            StatusCode::UNPROCESSABLE_ENTITY,
            "unprocessable_entity",
        ),
        (ErrorCode::TooManyRequests, StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
        (ErrorCode::ValidationError, StatusCode::BAD_REQUEST, "validation_error"),
        (ErrorCode::InternalError, StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    ];

    fn entry(self) -> (StatusCode, &'static str) {
        Self::TABLE
            .iter()
            .find(|(code, _, _)| *code == self)
            .map(|(_, status, name)| (*status, *name))
            .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, "internal_error"))
    }

    pub fn status_code(self) -> StatusCode {
        self.entry().0
    }

    pub fn as_str(self) -> &'static str {
        self.entry().1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Messages per offending field
    Fields(HashMap<String, Vec<String>>),
    /// Anything else worth returning, e.g. `retry_after`
    Extra(HashMap<String, serde_json::Value>),
}

/// Body of every error response. The typed client decodes it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<ErrorDetails>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// No valid session (401)
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Valid session, insufficient role (403)
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PayloadTooLarge, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedMediaType, message)
    }

    /// A required parameter is missing (422)
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnprocessableEntity, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// 400 carrying every failed field. A lone failure becomes the message.
    pub fn validation(fields: HashMap<String, Vec<String>>) -> Self {
        let message = match fields.len() {
            1 => fields
                .values()
                .next()
                .and_then(|messages| messages.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string()),
            n => format!("Validation failed for {} fields", n),
        };
        Self::new(ErrorCode::ValidationError, message)
            .with_details(ErrorDetails::Fields(fields))
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        Self::validation(HashMap::from([(field.to_string(), vec![message.into()])]))
    }

    /// 429 telling the caller how many seconds to wait
    pub fn rate_limited(retry_after: u64) -> Self {
        Self::new(
            ErrorCode::TooManyRequests,
            format!("Too many requests. Retry after {} seconds.", retry_after),
        )
        .with_details(ErrorDetails::Extra(HashMap::from([(
            "retry_after".to_string(),
            serde_json::json!(retry_after),
        )])))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
                details: self.details,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return ApiError::not_found("Resource not found");
        }
        let constraint = match &err {
            sqlx::Error::Database(db_err) => Some(db_err.message().to_string()),
            _ => None,
        };
        match constraint.as_deref() {
            Some(msg) if msg.contains("UNIQUE constraint failed") => {
                ApiError::conflict("A resource with this identifier already exists")
            }
            Some(msg) if msg.contains("FOREIGN KEY constraint failed") => {
                ApiError::bad_request("Referenced resource does not exist")
            }
            _ => {
                tracing::error!(error = %err, "Database error");
                ApiError::internal("A database error occurred")
            }
        }
    }
}

impl From<BoundsError> for ApiError {
    fn from(err: BoundsError) -> Self {
        ApiError::validation_field("bounds", err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!(error = %err, "Filesystem error");
        ApiError::internal("A storage error occurred")
    }
}

/// Collects field errors so a request reports all of them at once.
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    fields: HashMap<String, Vec<String>>,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error from a field validator, if any
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.fields))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::UnprocessableEntity.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::TooManyRequests.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_validation_error_single_field() {
        let err = ApiError::validation_field("icao", "ICAO code must be 3 or 4 letters or digits");
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("ICAO"));
    }

    #[test]
    fn test_validation_error_builder() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("latitude", "Latitude must be between -90 and 90");
        builder.check("name", Err("Name is required".to_string()));
        builder.check("longitude", Ok(()));
        builder.add("latitude", "Latitude is required");

        let err = builder.finish().unwrap_err();
        assert!(err.message().contains("2 fields"));
        match &err.details {
            Some(ErrorDetails::Fields(errors)) => {
                assert_eq!(errors["latitude"].len(), 2);
                assert!(!errors.contains_key("longitude"));
            }
            other => panic!("Expected validation details, got {:?}", other),
        }
    }

    #[test]
    fn test_bounds_error_becomes_validation_error() {
        let err: ApiError = crate::geo::Bounds::parse("1,2,3").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_every_code_has_a_distinct_name() {
        let names: std::collections::HashSet<_> =
            ErrorCode::TABLE.iter().map(|(code, _, _)| code.as_str()).collect();
        assert_eq!(names.len(), ErrorCode::TABLE.len());
        assert_eq!(
            ErrorCode::UnsupportedMediaType.status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(ErrorCode::InternalError.as_str(), "internal_error");
    }

    #[test]
    fn test_empty_builder_passes() {
        let mut builder = ValidationErrorBuilder::new();
        builder.check("icao", Ok(()));
        assert!(builder.finish().is_ok());
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_response_envelope() {
        let response = ApiError::conflict("Airport already exists").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error.code, "conflict");
        assert_eq!(parsed.error.message, "Airport already exists");
        assert!(parsed.error.details.is_none());
    }
}
