//! Custom header capture and echo

use crate::metadata::HeaderRecord;
use crate::protocol::ObjectRequest;
use std::collections::HashSet;

/// Prefix marking a request header as custom object metadata
pub const CUSTOM_HEADER_PREFIX: &str = "x-head-";

/// Per-deployment allowlist of header names stored and echoed verbatim
#[derive(Debug, Clone, Default)]
pub struct PassthroughHeaders {
    names: HashSet<String>,
}

impl PassthroughHeaders {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| name.as_ref().trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }

    /// Custom headers carried by a request.
    ///
    /// `x-head-<name>` is captured as `<name>`; allowlisted names are
    /// captured under their own name.
    pub fn extract(&self, request: &ObjectRequest) -> HeaderRecord {
        request
            .headers()
            .filter_map(|(name, value)| match name.strip_prefix(CUSTOM_HEADER_PREFIX) {
                Some(custom) if !custom.is_empty() => Some((custom.to_string(), value.to_string())),
                Some(_) => None,
                None if self.contains(name) => Some((name.to_string(), value.to_string())),
                None => None,
            })
            .collect()
    }

    /// Response headers for persisted custom headers
    pub fn echo(&self, headers: &HeaderRecord) -> Vec<(String, String)> {
        headers
            .iter()
            .map(|(name, value)| {
                if self.contains(name) {
                    (name.clone(), value.clone())
                } else {
                    (format!("{}{}", CUSTOM_HEADER_PREFIX, name), value.clone())
                }
            })
            .collect()
    }
}
