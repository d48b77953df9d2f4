// Mapping of domain errors onto HTTP responses.
//
// Every non-2xx response carries the same body: `{"code", "message"}` plus
// `field` for validation errors.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use guildhall_core::Error;
use serde::Serialize;
use tracing::error;

#[derive(Debug)]
pub struct ApiError(pub Error);

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(Error::validation("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(Error::validation("query", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(Error::validation("path", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let field = match &self.0 {
            Error::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            error!(code = self.0.code(), "request failed: {}", self.0);
            "internal server error".to_string()
        };
        let body = ErrorBody {
            code: self.0.code(),
            message,
            field,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: Error) -> (StatusCode, serde_json::Value) {
        let response = ApiError(err).into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn status_codes_follow_taxonomy() {
        assert_eq!(ApiError(Error::validation("x", "y")).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(Error::Unauthenticated).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError(Error::forbidden("no")).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError(Error::not_found("post", 1)).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(Error::Conflict("dup".into())).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError(Error::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn validation_body_names_field() {
        let (status, body) = body_json(Error::validation("title", "must not be empty")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["field"], "title");
        assert_eq!(body["message"], "invalid `title`: must not be empty");
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) = body_json(Error::Internal("secret path /etc".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "internal server error");
        assert!(body.get("field").is_none());
    }
}
