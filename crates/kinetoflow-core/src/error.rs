//! Domain error kinds and their transport mapping.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::db::DbError;

/// Errors surfaced by every clinic operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClinicError {
    /// Field constraint failure, with per-field messages
    #[error("{message}")]
    Validation {
        message: String,
        details: BTreeMap<String, String>,
    },

    /// Business precondition violated
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    /// Referenced entity absent or not visible; carries the resource noun
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

pub type ClinicResult<T> = Result<T, ClinicError>;

impl ClinicError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ClinicError::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ClinicError::Forbidden(message.into())
    }

    pub fn not_found(noun: impl Into<String>) -> Self {
        ClinicError::NotFound(noun.into())
    }

    /// Single-field validation failure.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut details = BTreeMap::new();
        details.insert(field.to_string(), message.clone());
        ClinicError::Validation { message, details }
    }

    /// Stable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            ClinicError::Validation { .. } => "VALIDATION",
            ClinicError::BadRequest(_) => "BAD_REQUEST",
            ClinicError::Unauthenticated(_) => "UNAUTHENTICATED",
            ClinicError::Forbidden(_) => "FORBIDDEN",
            ClinicError::NotFound(_) => "NOT_FOUND",
            ClinicError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ClinicError::Validation { .. } | ClinicError::BadRequest(_) => 400,
            ClinicError::Unauthenticated(_) => 401,
            ClinicError::Forbidden(_) => 403,
            ClinicError::NotFound(_) => 404,
            ClinicError::Internal(_) => 500,
        }
    }

    /// Serializable response body.
    pub fn to_body(&self, timestamp: DateTime<Utc>) -> ErrorBody {
        let details = match self {
            ClinicError::Validation { details, .. } if !details.is_empty() => {
                Some(details.clone())
            }
            _ => None,
        };
        ErrorBody {
            timestamp,
            status: self.status(),
            error: reason_phrase(self.status()).to_string(),
            message: self.to_string(),
            details,
        }
    }
}

/// Error response body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

impl From<DbError> for ClinicError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => ClinicError::NotFound(what),
            other => {
                error!(error = %other, "Database failure");
                ClinicError::Internal("An unexpected error occurred".to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ClinicError {
    fn from(e: serde_json::Error) -> Self {
        error!(error = %e, "Serialization failure");
        ClinicError::Internal("An unexpected error occurred".to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        error!(error = %e, "Lock poisoned");
        ClinicError::Internal("An unexpected error occurred".to_string())
    }
}

/// Collects per-field validation failures.
#[derive(Debug, Default)]
pub struct Violations {
    details: BTreeMap<String, String>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `field` when `failed` holds. First message per field wins.
    pub fn check(&mut self, failed: bool, field: &str, message: &str) -> &mut Self {
        if failed {
            self.details
                .entry(field.to_string())
                .or_insert_with(|| message.to_string());
        }
        self
    }

    pub fn into_result(self) -> ClinicResult<()> {
        if self.details.is_empty() {
            Ok(())
        } else {
            Err(ClinicError::Validation {
                message: "Validation failed".to_string(),
                details: self.details,
            })
        }
    }
}
