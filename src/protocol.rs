//! JSON-RPC 2.0 and LSP wire types.
//!
//! These structs match the JSON exchanged with gopls over stdio. They use
//! serde for (de)serialization; everything position-related is zero-based
//! per the LSP specification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: Value, id: i64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
///
/// The id is kept as a raw `Value` because servers may echo it back with a
/// different numeric representation than the one sent (e.g. float instead
/// of integer after a generic decode). Use [`normalize_id`] before matching
/// against the pending-request table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A message received from the server, classified by shape.
///
/// Frames with a `method` field are server-initiated traffic (a Request if
/// they also carry an id, a Notification otherwise); everything else is a
/// Response to one of our requests.
#[derive(Debug)]
pub enum Message {
    /// Server-initiated request (id + method). gopls uses these for e.g.
    /// `workspace/configuration`; we do not service them.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// Server notification (method only), e.g. `window/logMessage`.
    Notification { method: String, params: Value },
    /// Response to one of our requests.
    Response(JsonRpcResponse),
}

impl Message {
    /// Classify a decoded JSON frame, or `None` for frames that are not
    /// JSON-RPC shaped at all.
    pub fn classify(value: Value) -> Option<Message> {
        if !value.is_object() {
            return None;
        }

        let method = value.get("method").and_then(|m| m.as_str());

        match method {
            Some(method) => {
                let method = method.to_string();
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                match value.get("id") {
                    Some(id) if !id.is_null() => Some(Message::Request {
                        id: id.clone(),
                        method,
                        params,
                    }),
                    _ => Some(Message::Notification { method, params }),
                }
            }
            None => serde_json::from_value::<JsonRpcResponse>(value)
                .ok()
                .map(Message::Response),
        }
    }
}

/// Normalize a response id to the `i64` space used by the request registry.
///
/// JSON decoding may hand an integral id back as u64 or f64; both are
/// folded into i64 here. Non-integral or non-numeric ids yield `None` and
/// will never match a pending request.
pub fn normalize_id(id: &Value) -> Option<i64> {
    match id {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if let Some(u) = n.as_u64() {
                i64::try_from(u).ok()
            } else {
                n.as_f64().and_then(|f| {
                    if f.fract() == 0.0 && f.is_finite() {
                        Some(f as i64)
                    } else {
                        None
                    }
                })
            }
        }
        _ => None,
    }
}

/// LSP position: zero-based line and character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// LSP range: half-open `[start, end)` in character terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A single text replacement within one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    #[serde(rename = "newText")]
    pub new_text: String,
}

/// Identifies the document a [`TextDocumentEdit`] batch applies to.
///
/// The version field is accepted but unused; gopls sends it as null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

/// A per-document batch of edits (the preferred WorkspaceEdit form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocumentEdit {
    #[serde(rename = "textDocument")]
    pub text_document: TextDocumentIdentifier,
    pub edits: Vec<TextEdit>,
}

/// A structured multi-document edit returned by a refactoring request.
///
/// Servers may use the legacy `changes` map, the preferred
/// `documentChanges` list, or both. [`WorkspaceEdit::normalized`] flattens
/// either form into one sequence of per-document batches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<HashMap<String, Vec<TextEdit>>>,
    #[serde(
        rename = "documentChanges",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub document_changes: Option<Vec<TextDocumentEdit>>,
}

impl WorkspaceEdit {
    /// Flatten both wire forms into `(uri, edits)` batches.
    ///
    /// The legacy `changes` map comes first (sorted by URI for determinism),
    /// followed by `documentChanges` batches in server order.
    pub fn normalized(&self) -> Vec<(String, Vec<TextEdit>)> {
        let mut batches = Vec::new();

        if let Some(changes) = &self.changes {
            let mut uris: Vec<&String> = changes.keys().collect();
            uris.sort();
            for uri in uris {
                batches.push((uri.clone(), changes[uri].clone()));
            }
        }

        if let Some(doc_changes) = &self.document_changes {
            for doc_change in doc_changes {
                batches.push((
                    doc_change.text_document.uri.clone(),
                    doc_change.edits.clone(),
                ));
            }
        }

        batches
    }

    /// True when the edit touches no documents at all.
    pub fn is_empty(&self) -> bool {
        self.normalized().iter().all(|(_, edits)| edits.is_empty())
    }
}
