use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ChangeType;

/// Error body the server sends alongside a failing HTTP status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorBody {
    pub error_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("change without key")]
    MissingKey,
    #[error("{} change for '{key}' carries no model", kind.as_str())]
    MissingModel { key: String, kind: ChangeType },
}
