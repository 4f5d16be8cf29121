use serde::{Deserialize, Serialize};

use fleet_core::ValidationError;
use fleet_persist::StoreError;
use fleet_search::SearchError;

/// Coarse response class for whatever transport sits in front of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    Conflict,
    Timeout,
    Server,
}

impl ErrorClass {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorClass::BadRequest => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Timeout => 504,
            ErrorClass::Server => 500,
        }
    }
}

/// API errors suitable for transport over RPC later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApiError {
    /// Client input problem. `fields` names the offending filter fields, if any.
    #[error("validation: {message}")]
    Validation { message: String, fields: Vec<String> },
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation { message: message.into(), fields: Vec::new() }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Validation { .. } => ErrorClass::BadRequest,
            ApiError::NotFound(_) => ErrorClass::NotFound,
            ApiError::Conflict(_) => ErrorClass::Conflict,
            ApiError::Cancelled(_) => ErrorClass::Timeout,
            ApiError::Internal(_) => ErrorClass::Server,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::validation(e.to_string())
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        let fields = match &e {
            SearchError::Parse { .. } => Vec::new(),
            SearchError::InvalidField { fields } => fields.clone(),
            SearchError::InvalidConditionType(t) => vec![format!("{}{}", fleet_search::fields::CONDITION_PREFIX, t)],
            SearchError::InvalidConditionStatus { field, .. }
            | SearchError::UnsupportedOperator { field, .. }
            | SearchError::InvalidValue { field, .. }
            | SearchError::ConditionInDisjunction(field) => vec![field.clone()],
        };
        ApiError::Validation { message: e.to_string(), fields }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            StoreError::Cancelled => ApiError::Cancelled("request cancelled or deadline exceeded".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
