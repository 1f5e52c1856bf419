//! Request Protocol
//!
//! Turns one verb-tagged request into an operation over the file store and
//! the metadata store. The types here are independent of the HTTP framework
//! so each operation is a plain function of (request, stores) -> response;
//! the actix binding lives in [`crate::api`].

pub mod headers;
mod read;
mod write;

use crate::error::StoreError;
use crate::metadata::{MetadataRecord, MetadataStore};
use crate::storage::{ChunkedFileStore, RangeReader};
use actix_web::http::StatusCode;
use bytes::Bytes;
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use std::fmt;

pub use headers::PassthroughHeaders;

/// Closed set of verbs the store understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    /// Map an HTTP method name; anything else is `MethodNotAllowed`
    pub fn from_method(method: &str) -> Result<Self, StoreError> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Ok(Verb::Get),
            "HEAD" => Ok(Verb::Head),
            "POST" => Ok(Verb::Post),
            "PUT" => Ok(Verb::Put),
            "PATCH" => Ok(Verb::Patch),
            "DELETE" => Ok(Verb::Delete),
            _ => Err(StoreError::MethodNotAllowed),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// An inbound request with its body fully received
#[derive(Debug, Clone)]
pub struct ObjectRequest {
    verb: Verb,
    path: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
}

impl ObjectRequest {
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header; repeated names are joined with `, `
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_query_map(mut self, query: HashMap<String, String>) -> Self {
        self.query.extend(query);
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// All headers, names lower-cased
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Length declared by the client, if it sent a usable `Content-Length`
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }
}

/// What a response carries after its headers
#[derive(Debug)]
pub enum ResponseBody {
    Text(String),
    /// Raw object bytes, produced lazily with a known total length
    Stream { reader: RangeReader, length: u64 },
    /// A body of `length` bytes that is described but not sent (HEAD)
    Omitted { length: u64 },
}

/// Outcome of a successful operation
#[derive(Debug)]
pub struct ObjectResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ObjectResponse {
    pub fn new(status: StatusCode, body: ResponseBody) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// `200 OK` with the literal body `OK`
    pub fn ok() -> Self {
        Self::new(StatusCode::OK, ResponseBody::Text("OK".to_string()))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Seconds since the epoch with microsecond precision, as sent in `x-start`/`x-end`
pub(crate) fn timestamp() -> String {
    let now = Utc::now();
    format!("{:.6}", now.timestamp_micros() as f64 / 1_000_000.0)
}

/// Dispatches requests to the read and write operations
pub struct ObjectProtocol {
    files: ChunkedFileStore,
    metadata: MetadataStore,
    passthrough: PassthroughHeaders,
}

impl ObjectProtocol {
    pub fn new(files: ChunkedFileStore, metadata: MetadataStore, passthrough: PassthroughHeaders) -> Self {
        Self {
            files,
            metadata,
            passthrough,
        }
    }

    pub fn files(&self) -> &ChunkedFileStore {
        &self.files
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Run one request to completion.
    ///
    /// May block on range locks; call it from a thread that is allowed to.
    pub fn handle(&self, request: &ObjectRequest) -> Result<ObjectResponse, StoreError> {
        debug!("Dispatching {} {}", request.verb(), request.path());
        match request.verb() {
            Verb::Get => self.get(request, false),
            Verb::Head => self.get(request, true),
            Verb::Post | Verb::Put => self.post(request),
            Verb::Patch => self.patch(request),
            Verb::Delete => self.delete(request),
        }
    }

    /// Attach `x-parts` and the header echo when metadata is live
    fn with_metadata(&self, mut response: ObjectResponse, record: &MetadataRecord) -> ObjectResponse {
        if record.is_disabled() {
            return response;
        }
        response.headers.push(("x-parts".to_string(), record.parts_header()));
        response.headers.extend(self.passthrough.echo(record.headers()));
        response
    }
}
