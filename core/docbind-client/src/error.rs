//! Error types for the client layer.

use crate::protocol::{Method, Response};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;
use thiserror::Error;

/// Result type for connector operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised while performing an exchange.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The exchange could not be completed.
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connector does not implement the requested capability.
    #[error("unsupported by this connector: {0}")]
    Unsupported(&'static str),

    #[error("connector closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A response the protocol classifies as a failure.
///
/// Built from the server's error body when present:
/// `{"message", "className", "reason", "data", "stackTrace", "cause"}`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{class_name} ({status}): {message}")]
pub struct CommunicationError {
    /// HTTP status; `0` when no response was received.
    pub status: u16,
    pub message: String,
    /// Server-side exception class, `CommunicationError` by default.
    pub class_name: String,
    pub reason: String,
    pub data: Option<Value>,
    /// Server-side exception chain, outermost first.
    pub server_causes: Vec<ServerCause>,
}

/// One server-side exception in a cause chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerCause {
    pub class_name: String,
    pub message: String,
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub method_name: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub line_number: i64,
}

impl CommunicationError {
    /// HTTP status of a failed conditional write.
    pub const PRECONDITION_FAILED: u16 = 412;

    /// Builds the error for a failed exchange of `method path`.
    pub fn from_response(method: Method, path: &str, response: &Response) -> Self {
        let body = response.body.as_ref().filter(|b| b.is_object());
        let field = |name: &str| {
            body.and_then(|b| b.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let phase = if response.status == 0 {
            "Request"
        } else {
            "Response"
        };
        let message = field("message").unwrap_or_else(|| {
            format!("Handling the {phase} for {} {path}", method.as_str())
        });

        let mut server_causes = Vec::new();
        let mut cause = body;
        while let Some(current) = cause {
            let Some(trace) = current.get("stackTrace").and_then(Value::as_array) else {
                break;
            };
            server_causes.push(ServerCause {
                class_name: string_field(current, "className"),
                message: string_field(current, "message"),
                frames: trace
                    .iter()
                    .filter_map(|f| serde_json::from_value(f.clone()).ok())
                    .collect(),
            });
            cause = current.get("cause").filter(|c| c.is_object());
        }

        Self {
            status: response.status,
            message,
            class_name: field("className").unwrap_or_else(|| "CommunicationError".to_string()),
            reason: field("reason").unwrap_or_else(|| "Communication failed".to_string()),
            data: body.and_then(|b| b.get("data")).cloned(),
            server_causes,
        }
    }

    /// Whether a conditional write lost against a newer server version.
    pub fn is_precondition_failed(&self) -> bool {
        self.status == Self::PRECONDITION_FAILED
    }

    /// Renders the server-side cause chain, one
    /// `Serverside Caused by: <class> <message>` block per cause.
    pub fn server_trace(&self) -> String {
        let mut out = String::new();
        for cause in &self.server_causes {
            let _ = write!(
                out,
                "\nServerside Caused by: {} {}",
                cause.class_name, cause.message
            );
            for frame in &cause.frames {
                let _ = write!(
                    out,
                    "\n    at {}.{} ({}:{})",
                    frame.class_name, frame.method_name, frame.file_name, frame.line_number
                );
            }
        }
        out
    }
}

fn string_field(value: &Value, name: &str) -> String {
    value
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
