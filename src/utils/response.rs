use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::models::Event;
use crate::spec::FieldIssue;

/// Shape shared by every error response: always an `error` key, plus
/// whichever of `message`, `details`, or `path` the error class carries.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldIssue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorBody {
    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
            details: None,
            path: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: Vec<FieldIssue>) -> Self {
        Self {
            error: error.into(),
            message: None,
            details: Some(details),
            path: None,
        }
    }

    pub fn with_path(error: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            details: None,
            path: Some(path.into()),
        }
    }
}

pub fn error(status: StatusCode, body: ErrorBody) -> Response {
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
pub struct EventListBody {
    pub events: Vec<Event>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EventCreatedBody {
    pub id: String,
    pub message: String,
    pub event: Event,
}

#[derive(Debug, Serialize)]
pub struct EventBody {
    pub event: Event,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EventUpdatedBody {
    pub id: String,
    pub message: String,
    pub event: Event,
}

#[derive(Debug, Serialize)]
pub struct EventDeletedBody {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ApiInfoBody {
    pub message: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}
