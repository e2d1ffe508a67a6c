//! wsrpc protocol types
//!
//! JSON wire types for the wsrpc request/response protocol. This crate is
//! the single source of truth for the message shapes, the error-string
//! grammar, and the codec that moves them on and off the wire.

pub mod error;
pub mod message;

pub use error::{format, CodecError};
pub use message::{
    decode_request, encode_response, quoted, recover_id, Attachment, Packet, Request, Response,
};
