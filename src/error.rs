use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Failures of the stream session core
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Camera not found: {0}")]
    NotFound(String),

    /// Malformed connection attributes. The resolver currently always
    /// produces an address, so nothing raises this yet.
    #[allow(dead_code)]
    #[error("Cannot resolve source address: {0}")]
    Resolution(String),

    #[error("Encoder not available on this host: {0}")]
    ToolUnavailable(String),

    #[error("Failed to launch encoder: {0}")]
    SpawnFailure(String),

    /// Advisory only; logged by the engine, never returned from a start
    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("Encoder exited with {}", exit_label(.code))]
    ProcessCrashed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Insufficient system memory ({0} KB available)")]
    InsufficientResources(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

impl StreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::NotFound(_) => "not_found",
            StreamError::Resolution(_) => "resolution_error",
            StreamError::ToolUnavailable(_) => "tool_unavailable",
            StreamError::SpawnFailure(_) => "spawn_failure",
            StreamError::SourceUnreachable(_) => "source_unreachable",
            StreamError::ProcessCrashed { .. } => "process_crashed",
            StreamError::InsufficientResources(_) => "insufficient_resources",
            StreamError::Io(_) => "io",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StreamError::NotFound(_) => StatusCode::NOT_FOUND,
            StreamError::Resolution(_) => StatusCode::BAD_REQUEST,
            StreamError::SourceUnreachable(_) | StreamError::ProcessCrashed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            StreamError::InsufficientResources(_) => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::ToolUnavailable(_)
            | StreamError::SpawnFailure(_)
            | StreamError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let diagnostics = match &self {
            StreamError::ProcessCrashed { diagnostics, .. } if !diagnostics.is_empty() => {
                Some(diagnostics.clone())
            }
            _ => None,
        };

        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "diagnostics": diagnostics,
        });

        (self.status_code(), Json(body)).into_response()
    }
}
