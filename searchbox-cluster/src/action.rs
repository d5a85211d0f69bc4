//! Requests the client can execute and the results they produce

use reqwest::{Method, StatusCode};
use serde_json::Value;

/// A REST request against one cluster server.
///
/// `uri` is relative to the server URL the client picks.
pub trait Action: Send + Sync {
    fn method(&self) -> Method {
        Method::GET
    }

    fn uri(&self) -> String;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Node info request restricted to the HTTP section (`GET /_nodes/<filter>/http`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodesInfoAction {
    filter: Option<String>,
}

impl NodesInfoAction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_filter(filter: Option<String>) -> Self {
        Self { filter }
    }
}

impl Action for NodesInfoAction {
    fn uri(&self) -> String {
        format!("_nodes/{}/http", self.filter.as_deref().unwrap_or("_all"))
    }

    fn name(&self) -> &'static str {
        "nodes_info"
    }
}

/// Outcome of an executed action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    succeeded: bool,
    response_code: u16,
    json: Value,
    error_message: Option<String>,
}

impl ActionResult {
    /// Successful result carrying `json`
    #[must_use]
    pub const fn success(json: Value) -> Self {
        Self {
            succeeded: true,
            response_code: 200,
            json,
            error_message: None,
        }
    }

    /// Failed result with the given status and message
    #[must_use]
    pub fn failure(response_code: u16, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            response_code,
            json: Value::Null,
            error_message: Some(message.into()),
        }
    }

    /// Build a result from a raw HTTP response.
    ///
    /// A body that is not JSON yields `Value::Null`. Non-2xx responses
    /// take their message from the body's `error` field when present.
    #[must_use]
    pub fn from_response(response_code: u16, body: &[u8]) -> Self {
        let json = serde_json::from_slice(body).unwrap_or(Value::Null);
        let succeeded = (200..300).contains(&response_code);

        let error_message = if succeeded {
            None
        } else {
            Some(Self::extract_error(response_code, &json))
        };

        Self {
            succeeded,
            response_code,
            json,
            error_message,
        }
    }

    fn extract_error(response_code: u16, json: &Value) -> String {
        match json.get("error") {
            Some(Value::String(message)) => message.clone(),
            Some(error @ Value::Object(_)) => error
                .get("reason")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), ToString::to_string),
            _ => StatusCode::from_u16(response_code)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("unknown error")
                .to_string(),
        }
    }

    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.succeeded
    }

    #[must_use]
    pub const fn response_code(&self) -> u16 {
        self.response_code
    }

    /// Response body as a JSON tree
    #[must_use]
    pub const fn json(&self) -> &Value {
        &self.json
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}
