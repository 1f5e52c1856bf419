//! Catch-all object handler
//!
//! Every request lands here regardless of path. The body is collected, the
//! request is turned into an [`ObjectRequest`] and the protocol runs on the
//! blocking pool since range locks may wait indefinitely.

use actix_web::error::{ErrorInternalServerError, ErrorPayloadTooLarge};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::protocol::{ObjectRequest, ObjectResponse, ResponseBody, Verb};

/// Handle one object request of any verb
pub async fn object_handler(
    req: HttpRequest,
    mut payload: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let verb = Verb::from_method(req.method().as_str())?;

    let limit = app_state.config.server.max_payload_size;
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Error reading payload chunk: {}", e);
            ErrorInternalServerError("Error reading payload")
        })?;
        if body.len() + chunk.len() > limit {
            warn!("Payload for {} exceeds {} bytes", req.path(), limit);
            return Err(ErrorPayloadTooLarge(format!("payload exceeds {} bytes", limit)));
        }
        body.extend_from_slice(&chunk);
    }

    let request = object_request(&req, verb, body.freeze());
    let protocol = Arc::clone(&app_state.protocol);
    let response = web::block(move || {
        log_mdc::insert("method", request.verb().to_string());
        log_mdc::insert("path", request.path());
        let result = protocol.handle(&request);
        log_mdc::clear();
        result
    })
    .await
    .map_err(|e| ErrorInternalServerError(format!("request worker failed: {}", e)))??;

    Ok(into_http_response(response))
}

fn object_request(req: &HttpRequest, verb: Verb, body: Bytes) -> ObjectRequest {
    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();

    let mut request = ObjectRequest::new(verb, req.path())
        .with_query_map(query)
        .with_body(body);
    for (name, value) in req.headers() {
        match value.to_str() {
            Ok(value) => request = request.with_header(name.as_str(), value),
            Err(_) => debug!("Skipping non-text header {}", name),
        }
    }
    request
}

/// Build the actix response for a protocol outcome
pub fn into_http_response(response: ObjectResponse) -> HttpResponse {
    let mut builder = HttpResponse::build(response.status);
    for (name, value) in &response.headers {
        builder.append_header((name.as_str(), value.as_str()));
    }
    match response.body {
        ResponseBody::Text(text) => builder.body(text),
        ResponseBody::Stream { reader, length } => builder
            .no_chunking(length)
            .streaming(futures::stream::iter(reader)),
        ResponseBody::Omitted { length } => builder
            .no_chunking(length)
            .streaming(futures::stream::empty::<Result<Bytes, io::Error>>()),
    }
}
