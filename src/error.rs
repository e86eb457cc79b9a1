//! Error taxonomy shared by every operation of the core.
//!
//! Four families: validation, not-found, conflict (busy / double review /
//! double analysis) and upstream (a collaborator failed). Each variant maps to
//! a stable, machine-matchable `code()` used by the action envelope.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

use crate::actions::Envelope;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid decision '{value}'. Must be one of: {}", .allowed.join(", "))]
    InvalidDecision {
        value: String,
        allowed: Vec<&'static str>,
    },

    #[error("learning queue item {0} has already been reviewed")]
    AlreadyReviewed(String),

    #[error("missed opportunity {0} has already been analyzed")]
    AlreadyAnalyzed(String),

    #[error("learning queue item {id} cannot be materialized: {reason}")]
    NotMaterializable { id: String, reason: String },

    #[error("baseline runner is busy; a run is already in progress")]
    RunnerBusy,

    #[error("{message}")]
    Upstream { code: &'static str, message: String },

    #[error("Unsupported action: {action}")]
    UnsupportedAction {
        action: String,
        supported: Vec<&'static str>,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn missing(code: &'static str, field: &str) -> Self {
        CoreError::Validation {
            code,
            message: format!("{field} is required"),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Translate a collaborator failure. An error with an empty message is
    /// reported with `fallback` instead.
    pub fn upstream(code: &'static str, fallback: &str, err: &anyhow::Error) -> Self {
        let msg = err.to_string();
        let message = if msg.trim().is_empty() {
            fallback.to_string()
        } else {
            msg
        };
        CoreError::Upstream { code, message }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { code, .. } => *code,
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::InvalidDecision { .. } => "INVALID_DECISION",
            CoreError::AlreadyReviewed(_) => "ALREADY_REVIEWED",
            CoreError::AlreadyAnalyzed(_) => "ALREADY_ANALYZED",
            CoreError::NotMaterializable { .. } => "NOT_MATERIALIZABLE",
            CoreError::RunnerBusy => "RUNNER_BUSY",
            CoreError::Upstream { code, .. } => *code,
            CoreError::UnsupportedAction { .. } => "UNSUPPORTED_ACTION",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            CoreError::UnsupportedAction { supported, .. } => {
                Some(json!({ "supportedActions": supported }))
            }
            CoreError::InvalidDecision { allowed, .. } => {
                Some(json!({ "allowedDecisions": allowed }))
            }
            CoreError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            _ => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation { .. }
            | CoreError::InvalidDecision { .. }
            | CoreError::UnsupportedAction { .. } => StatusCode::BAD_REQUEST,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::AlreadyReviewed(_)
            | CoreError::AlreadyAnalyzed(_)
            | CoreError::NotMaterializable { .. }
            | CoreError::RunnerBusy => StatusCode::CONFLICT,
            CoreError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Same envelope shape as a failed action.
impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(Envelope::failure(&self))).into_response()
    }
}
