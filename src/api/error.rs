//! Shared error handling for API endpoints.

use axum::{
    Json,
    extract::{
        FromRequest, FromRequestParts,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, error};

pub const INTERNAL_ERROR_NOTIFICATION: &str = "Oops! Something went wrong on our end. Please try again later or contact our support team for assistance.";

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }

    pub fn internal() -> Self {
        Self::Internal(INTERNAL_ERROR_NOTIFICATION.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::internal()
    }

    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}

/// `fail` for client errors, `error` for server errors.
fn classification(status: StatusCode) -> &'static str {
    if status.is_server_error() {
        "error"
    } else {
        "fail"
    }
}

#[derive(Serialize)]
struct FailureBody<'a> {
    status: &'static str,
    notification: &'a str,
}

/// The failure envelope every error response is written in.
pub fn failure_response(status: StatusCode, notification: &str) -> Response {
    (
        status,
        Json(FailureBody {
            status: classification(status),
            notification,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        failure_response(status, &message)
    }
}

#[derive(Serialize)]
struct NotificationBody<'a> {
    status: &'static str,
    notification: &'a str,
}

/// `{"status": "success", "notification": ...}`
pub fn success_notification(notification: &str) -> Response {
    Json(NotificationBody {
        status: "success",
        notification,
    })
    .into_response()
}

const INVALID_BODY_NOTIFICATION: &str = "The request body is missing or invalid.";
const INVALID_PATH_NOTIFICATION: &str = "The requested path is invalid.";
const INVALID_QUERY_NOTIFICATION: &str = "The query parameters are invalid.";

/// `Json` that rejects with the failure envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Path` that rejects with the failure envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// `Query` that rejects with the failure envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

// Parser details stay in the log.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(status = %rejection.status(), error = %rejection.body_text(), "Rejected request body");
        Self::bad_request(INVALID_BODY_NOTIFICATION)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        debug!(status = %rejection.status(), error = %rejection.body_text(), "Rejected path");
        Self::bad_request(INVALID_PATH_NOTIFICATION)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(status = %rejection.status(), error = %rejection.body_text(), "Rejected query");
        Self::bad_request(INVALID_QUERY_NOTIFICATION)
    }
}

/// Validate a UUID string format.
pub fn validate_uuid(uuid: &str) -> Result<(), ApiError> {
    if uuid.is_empty() {
        return Err(ApiError::bad_request("UUID cannot be empty"));
    }
    if uuid.len() > 36 {
        return Err(ApiError::bad_request("UUID is too long"));
    }
    if uuid::Uuid::parse_str(uuid).is_err() {
        return Err(ApiError::bad_request("Invalid UUID format"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_envelope_classification() {
        let response = ApiError::not_found("gone").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["status"], "fail");
        assert_eq!(body["notification"], "gone");

        let response = ApiError::db_error("Failed to load", "disk on fire").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["notification"], INTERNAL_ERROR_NOTIFICATION);
    }

    #[tokio::test]
    async fn test_body_rejection_uses_envelope() {
        #[derive(Debug, serde::Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            email: String,
        }

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{not json"))
            .unwrap();
        let Err(error) = ApiJson::<Payload>::from_request(request, &()).await else {
            panic!("malformed body was accepted");
        };

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], "fail");
        assert_eq!(body["notification"], INVALID_BODY_NOTIFICATION);
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid(&uuid::Uuid::new_v4().to_string()).is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
        assert!(validate_uuid(&"a".repeat(40)).is_err());
    }
}
