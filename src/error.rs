use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::rules::RuleError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Rule(rule) => rule.status_code(),
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "message": message }))
    }
}

impl ResponseError for RuleError {
    fn status_code(&self) -> StatusCode {
        match self {
            RuleError::NotPermitted(_) => StatusCode::FORBIDDEN,
            RuleError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "message": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn rule_errors_map_to_client_statuses() {
        let resp = AppError::from(RuleError::NotPermitted("admin only".into())).error_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = AppError::from(RuleError::InvalidTransition {
            action: "submit".into(),
            status: "approved".into(),
        })
        .error_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::from(RuleError::ReasonRequired).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "A reason is required for this edit");
    }

    #[actix_web::test]
    async fn internal_failures_are_server_errors() {
        let resp = AppError::Internal("Password could not be hashed".into()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "Password could not be hashed");
    }

    #[actix_web::test]
    async fn database_errors_hide_details() {
        let resp = AppError::from(sqlx::Error::RowNotFound).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "Internal Server Error");
    }
}
