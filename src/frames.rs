//! Wire frames exchanged with the remote service
//!
//! Every message on either socket is a single JSON text frame. The request
//! socket carries [`RequestFrame`]/[`ResponseFrame`] pairs correlated by
//! `requestID`; the event socket carries server-pushed [`EventFrame`]s.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DroverError, Result};

/// Operations understood by the request socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    RetrieveMany,
    Retrieve,
    Create,
    Update,
    Delete,
    Info,
}

/// A request frame sent on the request socket
///
/// The `request_id` is unique among all in-flight requests on a connection;
/// the server echoes it on the matching response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    #[serde(rename = "requestID")]
    pub request_id: String,

    pub namespace: String,

    pub operation: Operation,

    pub identity: String,

    #[serde(rename = "objectID", skip_serializing_if = "Option::is_none", default)]
    pub object_id: Option<String>,

    pub username: String,

    pub password: String,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub parameters: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<Value>,
}

impl RequestFrame {
    /// Create a frame with a fresh unique request ID
    pub fn new(
        operation: Operation,
        namespace: impl Into<String>,
        identity: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            namespace: namespace.into(),
            operation,
            identity: identity.into(),
            object_id: None,
            username: username.into(),
            password: password.into(),
            parameters: HashMap::new(),
            body: None,
        }
    }

    /// Serialize an object into the frame body
    pub fn encode_body<T: Serialize>(&mut self, object: &T) -> Result<()> {
        self.body = Some(
            serde_json::to_value(object).map_err(|e| DroverError::CannotMarshal(e.to_string()))?,
        );
        Ok(())
    }
}

/// The originating-request reference echoed inside a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestRef {
    #[serde(rename = "requestID", default)]
    pub request_id: String,
}

/// One error reported by the server in a non-2xx response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub description: String,
}

/// A response frame received on the request socket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(default)]
    pub request: RequestRef,

    #[serde(rename = "statusCode", default)]
    pub status_code: u16,

    #[serde(default)]
    pub total: u64,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub errors: Option<Vec<ErrorDescriptor>>,
}

impl ResponseFrame {
    /// Success iff the status code is in [200, 300)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Deserialize the response body
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.body.clone().unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| DroverError::CannotUnmarshal(e.to_string()))
    }
}

/// Translate a non-2xx response into the most specific error kind
pub fn decode_errors(response: &ResponseFrame) -> DroverError {
    let errors = response.errors.clone().unwrap_or_default();

    let description = if errors.is_empty() {
        format!("server returned status {}", response.status_code)
    } else {
        errors
            .iter()
            .map(|e| e.description.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let code = errors
        .first()
        .map(|e| e.code)
        .unwrap_or(i64::from(response.status_code));

    match code {
        404 => DroverError::ObjectNotFound(description),
        409 => DroverError::ConstraintViolation(description),
        _ => DroverError::CannotExecuteQuery(description),
    }
}

/// Kinds of entity events pushed on the event socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// A server-pushed event frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub identity: String,

    pub entity: Value,

    #[serde(rename = "type")]
    pub kind: EventKind,
}
