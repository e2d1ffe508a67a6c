//! Request/response wire types and the codec.
//!
//! `params` and `result` are raw JSON fragments: the server carries them
//! byte-for-byte between the socket and the handler and never re-parses
//! them. `serde_json::value::RawValue` gives exactly that guarantee.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::CodecError;

/// An opaque binary blob transmitted out-of-band with a response.
pub type Attachment = Vec<u8>;

/// A JSON body paired with its ordered attachment list.
///
/// Handlers return one of these (result fragment + attachments); the
/// pipeline returns one (full response + attachments).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Packet {
    pub json: String,
    pub attachments: Vec<Attachment>,
}

impl Packet {
    pub fn new(json: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            json: json.into(),
            attachments,
        }
    }
}

/// An inbound request. All fields are defaulted so a structurally valid
/// JSON object always decodes; partially populated fields survive for
/// diagnostics (`id` echo on malformed requests).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Request {
    pub id: String,
    pub method: String,
    // `deserialize_with` keeps an explicit `"params": null` as a present
    // fragment; only a missing field becomes `None`.
    #[serde(deserialize_with = "present_fragment")]
    pub params: Option<Box<RawValue>>,
}

fn present_fragment<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

impl Request {
    /// A request is well-formed iff all three fields are present and
    /// non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.id.is_empty()
            && !self.method.is_empty()
            && self.params.as_ref().is_some_and(|p| !p.get().is_empty())
    }

    /// The raw params fragment, or `"null"` when absent.
    pub fn params_fragment(&self) -> &str {
        self.params.as_ref().map_or("null", |p| p.get())
    }
}

/// An outbound response. `error` is omitted from the wire when unset; its
/// presence signals failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default = "null_fragment")]
    pub result: Box<RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            id: String::new(),
            result: null_fragment(),
            error: None,
        }
    }
}

impl Response {
    /// A response is valid iff `id` is non-empty and it carries a result
    /// or an error.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && (!self.result.get().is_empty() || self.error.is_some())
    }

    /// Replace `result` with a raw JSON fragment, validating that the
    /// fragment is a single well-formed JSON value.
    pub fn set_result(&mut self, fragment: &str) -> Result<(), CodecError> {
        self.result =
            RawValue::from_string(fragment.to_owned()).map_err(CodecError::Fragment)?;
        Ok(())
    }
}

fn null_fragment() -> Box<RawValue> {
    RawValue::from_string("null".to_owned()).expect("literal null")
}

/// Decode a raw text frame into a [`Request`].
pub fn decode_request(raw: &str) -> Result<Request, CodecError> {
    serde_json::from_str(raw).map_err(CodecError::Decode)
}

/// Encode a [`Response`] for the wire.
pub fn encode_response(response: &Response) -> Result<String, CodecError> {
    serde_json::to_string(response).map_err(CodecError::Encode)
}

/// Best-effort recovery of the request `id` from an arbitrary payload,
/// for correlating error responses. Returns `None` unless the payload is
/// a JSON object whose `id` is a non-empty string.
pub fn recover_id(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

/// Diagnostic for unavailable methods and internal errors: the method
/// name, double-quoted.
pub fn quoted(method: &str) -> String {
    format!("\"{method}\"")
}
