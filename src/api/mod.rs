//! HTTP binding of the object protocol

pub mod handlers;

pub use handlers::{into_http_response, object_handler};
