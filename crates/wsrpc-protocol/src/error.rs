//! Wire error tags and the codec error type.

use thiserror::Error;

/// Tags prefixing wire-visible diagnostics. The grammar is
/// `"<tag> : <diagnostic>"`; clients match on the prefix.
pub const INVALID_REQUEST: &str = "Invalid Request";
pub const INVALID_RESPONSE: &str = "Invalid Response";
// Historical spelling, kept for wire compatibility.
pub const METHOD_UNAVAIABLE: &str = "Method Unavaiable";
pub const INVALID_PARAMS: &str = "Invalid Params";
pub const INTERNAL_ERROR: &str = "Internal Error";

/// Format a wire error string from a tag and a diagnostic.
pub fn format(tag: &str, msg: impl AsRef<str>) -> String {
    format!("{} : {}", tag, msg.as_ref())
}

/// Errors produced while decoding requests or encoding responses.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("request decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("response encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid JSON fragment: {0}")]
    Fragment(#[source] serde_json::Error),
}
