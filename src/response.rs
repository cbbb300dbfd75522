use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::{auth::jwt::TokenError, users::services::ServiceError};

/// Body shape shared by every response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Successful payload, wrapped as `{code: 200, message: "success", data}`.
pub struct ApiResponse<T>(pub T);

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            data: Some(self.0),
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body: Envelope<()> = Envelope {
            code: status.as_u16(),
            message: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(msg) => ApiError::BadRequest(msg),
            ServiceError::DuplicateUsername | ServiceError::DuplicateEmail => {
                ApiError::Conflict(e.to_string())
            }
            ServiceError::NotFound => ApiError::NotFound(e.to_string()),
            ServiceError::InvalidCredentials => {
                ApiError::Unauthorized("invalid username or password".into())
            }
            ServiceError::Hash(inner) => {
                error!(error = %inner, "password hashing failed");
                ApiError::Internal
            }
            ServiceError::Store(inner) => {
                error!(error = %inner, "storage call failed");
                ApiError::Internal
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => ApiError::Unauthorized("token expired".into()),
            TokenError::Malformed(_) | TokenError::SignatureInvalid | TokenError::Issuer => {
                ApiError::Unauthorized("invalid token".into())
            }
            TokenError::Sign(inner) => {
                error!(error = %inner, "jwt signing failed");
                ApiError::Internal
            }
        }
    }
}

/// `Json` extractor whose rejection is rendered inside the envelope.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                warn!(error = %rejection.body_text(), "rejected request body");
                Err(json_rejection(rejection))
            }
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(format!(
        "invalid request parameters: {}",
        rejection.body_text()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo::StoreError;

    #[test]
    fn success_envelope_carries_data() {
        let env = Envelope {
            code: 200,
            message: "success".into(),
            data: Some(serde_json::json!({ "user_id": 1 })),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["code"], 200);
        assert_eq!(v["data"]["user_id"], 1);
    }

    #[test]
    fn error_envelope_omits_data() {
        let env: Envelope<()> = Envelope {
            code: 404,
            message: "user not found".into(),
            data: None,
        };
        let v = serde_json::to_value(&env).unwrap();
        assert!(v.get("data").is_none());
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::DuplicateUsername, StatusCode::CONFLICT, "username already exists"),
            (ServiceError::DuplicateEmail, StatusCode::CONFLICT, "email already in use"),
            (ServiceError::NotFound, StatusCode::NOT_FOUND, "user not found"),
            (
                ServiceError::InvalidCredentials,
                StatusCode::UNAUTHORIZED,
                "invalid username or password",
            ),
            (
                ServiceError::Validation("username is required".into()),
                StatusCode::BAD_REQUEST,
                "username is required",
            ),
        ];
        for (err, status, message) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.to_string(), message);
        }
    }

    #[test]
    fn internal_errors_hide_detail() {
        let api = ApiError::from(ServiceError::Store(StoreError::Unavailable(
            "connection refused at 10.0.0.3".into(),
        )));
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.to_string(), "internal server error");
    }

    #[test]
    fn token_errors_are_unauthorized() {
        assert_eq!(ApiError::from(TokenError::Expired).to_string(), "token expired");
        assert_eq!(
            ApiError::from(TokenError::SignatureInvalid).to_string(),
            "invalid token"
        );
        assert_eq!(
            ApiError::from(TokenError::Sign("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
