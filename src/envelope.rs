//! JSON-RPC envelope types, correlation ids, and the header peek scanner.

use std::fmt;
use std::sync::{Arc, OnceLock};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A correlation id: an unbiased-random, lowercase-hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// The empty id, used as a sentinel meaning "not yet assigned".
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Borrow the id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a correlation id from `id_bytes` cryptographically-seeded random
/// bytes, rendered as lowercase hex.
pub fn generate_id(id_bytes: usize) -> RequestId {
    let mut raw = vec![0u8; id_bytes];
    rand::rng().fill(raw.as_mut_slice());
    let mut hex = String::with_capacity(id_bytes * 2);
    for byte in raw {
        hex.push_str(&format!("{byte:02x}"));
    }
    RequestId(hex)
}

static EMPTY_PARAMS: OnceLock<Arc<[Value]>> = OnceLock::new();

/// The process-wide immutable empty parameter list. Never mutate the
/// returned value's contents through interior mutability — it is shared by
/// every request that omits `params`.
pub fn empty_params() -> Arc<[Value]> {
    EMPTY_PARAMS
        .get_or_init(|| Arc::from(Vec::<Value>::new()))
        .clone()
}

/// The `error` object carried by a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsError {
    /// JSON-RPC-style numeric error code.
    pub code: i32,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// An outbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id; generated by the client façade if left empty.
    pub id: RequestId,
    /// Wire field `async`; omitted when `None`.
    #[serde(rename = "async", skip_serializing_if = "Option::is_none", default)]
    pub is_async: Option<bool>,
    /// RPC method name.
    pub method: String,
    /// Ordered parameter list; omitted when empty.
    #[serde(skip_serializing_if = "params_is_empty", default = "empty_params")]
    pub params: Arc<[Value]>,
}

fn params_is_empty(params: &Arc<[Value]>) -> bool {
    params.is_empty()
}

impl Request {
    /// Build a request with an unassigned id and no explicit `async` flag.
    /// An empty `params` uses the shared immutable sentinel.
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: RequestId::empty(),
            is_async: None,
            method: method.into(),
            params: if params.is_empty() {
                empty_params()
            } else {
                Arc::from(params)
            },
        }
    }
}

/// An inbound response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id echoing the originating request.
    pub id: RequestId,
    /// Present when the server reports a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
    /// The RPC result; `null` when absent.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
}

impl Response {
    /// A default/empty response for a given id, used when registration
    /// collides and no real dispatch can occur.
    pub fn empty(id: RequestId) -> Self {
        Self {
            id,
            error: None,
            result: Value::Null,
        }
    }
}

/// A server-initiated notify envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notify {
    /// Correlation id (subscription id for persistent waiters).
    pub id: RequestId,
    /// RPC method name.
    pub method: String,
    /// Ordered parameter list.
    #[serde(default)]
    pub params: Vec<Value>,
}

/// The routing metadata parsed from the leading bytes of an envelope,
/// without a full JSON parse.
#[derive(Debug, Clone, Default)]
pub struct WsHeader {
    /// Correlation id, if located.
    pub id: Option<String>,
    /// Method name, if located (present only on notify-shaped messages).
    pub method: Option<String>,
    /// Error object, if located and non-null.
    pub error: Option<WsError>,
}

impl WsHeader {
    /// Scan `window` — the first `header_bytes_max` bytes of a message, or
    /// fewer if the message is shorter — for the `id`, `method`, and `error`
    /// fields, without requiring `window` to be complete, valid JSON.
    pub fn parse(window: &[u8]) -> Self {
        Self {
            id: find_string_field(window, "id"),
            method: find_string_field(window, "method"),
            error: find_error_field(window),
        }
    }

    /// A notify-shaped header carries a `method`.
    pub fn is_notify_shape(&self) -> bool {
        self.method.is_some()
    }

    /// A response-shaped header carries an `id` and no `method`.
    pub fn is_response_shape(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }

    /// Neither shape is present — malformed.
    pub fn is_malformed(&self) -> bool {
        self.id.is_none() && self.method.is_none()
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Find `"key":"value"` within `window` and return `value`, unescaping basic
/// JSON string escapes. Returns `None` if the key is absent, the value isn't
/// a string, or the string isn't closed within `window` (treated the same
/// as "not found" — malformed/truncated headers are indistinguishable from
/// unknown ids per the dispatch contract).
fn find_string_field(window: &[u8], key: &str) -> Option<String> {
    let pattern = format!("\"{key}\"");
    let pos = find_subslice(window, pattern.as_bytes())?;
    let mut i = pos + pattern.len();

    while i < window.len() && (window[i] == b' ' || window[i] == b':' || window[i] == b'\t') {
        i += 1;
    }
    if i >= window.len() || window[i] != b'"' {
        return None;
    }
    i += 1;
    let start = i;
    while i < window.len() {
        match window[i] {
            b'\\' => i += 2,
            b'"' => break,
            _ => i += 1,
        }
    }
    if i >= window.len() {
        return None;
    }
    let raw = window.get(start..i)?;
    let quoted = format!("\"{}\"", std::str::from_utf8(raw).ok()?);
    serde_json::from_str::<String>(&quoted).ok()
}

/// Find `"error": { ... }` (or `"error": null`) within `window` via brace
/// counting, returning `Some` only for a complete, non-null object found
/// entirely inside the window.
fn find_error_field(window: &[u8]) -> Option<WsError> {
    let pos = find_subslice(window, b"\"error\"")?;
    let mut i = pos + 7;
    while i < window.len() && (window[i] == b' ' || window[i] == b':' || window[i] == b'\t') {
        i += 1;
    }
    if i >= window.len() {
        return None;
    }
    if window[i..].starts_with(b"null") {
        return None;
    }
    if window[i] != b'{' {
        return None;
    }

    let start = i;
    let mut depth = 0i32;
    let mut in_string = false;
    while i < window.len() {
        let c = window[i];
        if in_string {
            match c {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match c {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        i += 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    if depth != 0 {
        return None;
    }
    serde_json::from_slice::<WsError>(&window[start..i]).ok()
}
