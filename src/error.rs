// src/error.rs
use log::error;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Rejection, Reply};

/// A single failed input check, rendered inside `{ "errors": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub param: String,
    pub msg: String,
}

impl FieldError {
    pub fn new(param: &str, msg: &str) -> Self {
        FieldError {
            param: param.to_string(),
            msg: msg.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    NotFound(String),

    #[error("Comment does not exist")]
    CommentNotFound,

    #[error("You already voted")]
    AlreadyVoted,

    #[error("User not authorized")]
    Forbidden,

    #[error("{0}")]
    Unauthorized(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(param: &str, msg: &str) -> Self {
        ApiError::Validation(vec![FieldError::new(param, msg)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::AlreadyVoted => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::CommentNotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden | ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            ApiError::Validation(errors) => json!({ "errors": errors }),
            ApiError::Storage(_) | ApiError::Internal(_) => json!({ "message": "Server error" }),
            other => json!({ "message": other.to_string() }),
        }
    }
}

impl Reject for ApiError {}

/// Turns every rejection coming out of the route tree into a JSON response.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, body) = if let Some(e) = err.find::<ApiError>() {
        (e.status(), e.body())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, json!({ "message": "Not found" }))
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (
            StatusCode::BAD_REQUEST,
            json!({ "errors": [FieldError::new("body", &e.to_string())] }),
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({ "message": "Payload too large" }),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            json!({ "message": "Content-Length required" }),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "message": "Method not allowed" }),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "message": "Server error" }),
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
