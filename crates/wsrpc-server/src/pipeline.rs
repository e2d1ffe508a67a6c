//! The request→response pipeline.
//!
//! `process` turns one inbound text frame into one outbound packet. Every
//! failure mode maps onto a well-formed error response; a caller never
//! sees a bare failure.

use std::time::Instant;

use tracing::{debug, error};
use wsrpc_protocol::{
    decode_request, encode_response, error, recover_id, Packet, Response,
};

use crate::app::App;

/// Run one raw inbound frame through decode → dispatch → encode.
///
/// The returned packet's `json` always decodes into a valid response:
/// either the request `id` with a result, or an `error` string carrying
/// one of the wire tags (with the `id` echoed when it could be
/// recovered). Attachments are only ever attached to success responses.
pub fn process(app: &App, raw: &str) -> Packet {
    let started = Instant::now();
    let mut response = Response::default();

    let attachments = match decode_request(raw) {
        Ok(request) if request.is_well_formed() => {
            response.id = request.id.clone();
            match app.dispatch(&request.method, request.params_fragment()) {
                Ok(result) => match response.set_result(&result.json) {
                    Ok(()) => result.attachments,
                    Err(e) => return invalid_response(response, e),
                },
                Err(err) => {
                    error!("Error calling {raw}: {err}");
                    response.error = Some(err);
                    Vec::new()
                }
            }
        }
        Ok(request) => {
            // Parsed but failed the well-formedness predicate; echo
            // whatever id made it through.
            response.id = request.id;
            let msg = error::format(error::INVALID_REQUEST, "field invalid");
            error!("{msg}");
            response.error = Some(msg);
            Vec::new()
        }
        Err(e) => {
            if let Some(id) = recover_id(raw) {
                response.id = id;
            }
            let msg = error::format(error::INVALID_REQUEST, e.to_string());
            error!("{msg}");
            response.error = Some(msg);
            Vec::new()
        }
    };

    let packet = match encode_response(&response) {
        Ok(json) => Packet::new(json, attachments),
        Err(e) => return invalid_response(response, e),
    };
    debug!("process took {:.3?}", started.elapsed());
    packet
}

/// Fallback for a response that failed to encode: keep the id, report the
/// encode diagnostic, drop the attachments. The fallback carries only
/// plain strings, so re-encoding cannot fail.
fn invalid_response(failed: Response, cause: wsrpc_protocol::CodecError) -> Packet {
    let msg = error::format(error::INVALID_RESPONSE, cause.to_string());
    error!("{msg}");
    let fallback = Response {
        id: failed.id,
        error: Some(msg),
        ..Response::default()
    };
    Packet::new(
        encode_response(&fallback).expect("fallback response encodes"),
        Vec::new(),
    )
}
