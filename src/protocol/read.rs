//! GET and HEAD

use crate::byte_range::{self, parse_range_header};
use crate::error::StoreError;
use crate::protocol::{ObjectProtocol, ObjectRequest, ObjectResponse, ResponseBody};
use crate::storage::{checksum, ChecksumAlgorithm, ObjectPath};
use actix_web::http::StatusCode;
use log::debug;

impl ObjectProtocol {
    /// Serve a whole object or a byte range of it, or a digest of that range.
    ///
    /// With live metadata only the contiguous-from-zero prefix is readable.
    pub(crate) fn get(&self, request: &ObjectRequest, head_only: bool) -> Result<ObjectResponse, StoreError> {
        let path = ObjectPath::parse(request.path())?;
        let requested = request.header("range").and_then(parse_range_header);
        let (first, mut last) = requested.unwrap_or((0, None));

        let record = self.metadata.fetch(&path);
        if !record.is_disabled() {
            if request.header("x-no-gaps").is_some() {
                let gaps = byte_range::sum_gaps(record.parts());
                if gaps > 0 {
                    return Err(StoreError::BadRequest(format!(
                        "{} is missing {} bytes between its written parts",
                        path, gaps
                    )));
                }
            }
            if !byte_range::starts_at_zero(record.parts()) {
                return Err(StoreError::NotFound(format!(
                    "{} has no bytes written from offset 0",
                    path
                )));
            }
            let contiguous = byte_range::last_contiguous_byte(record.parts());
            last = Some(last.map_or(contiguous, |l| l.min(contiguous)));
        }

        let object = self.files.open(&path)?;
        let size = object.size();
        // Exclusive end of the selection, clamped to the file
        let end = last.map_or(size, |l| l.saturating_add(1)).min(size);
        if first >= end {
            if requested.is_some() || size > 0 {
                return Err(StoreError::RangeNotSatisfiable {
                    first,
                    available: end,
                });
            }
            debug!("{} is empty", path);
        }
        let length = end.saturating_sub(first);
        let reader = object.read_range(first, length)?;

        let mut response = match request.header("x-checksum") {
            Some(name) => {
                let algorithm = ChecksumAlgorithm::from_name(name);
                let digest = checksum(reader, algorithm)?;
                debug!("{:?} digest of {} bytes of {}: {}", algorithm, length, path, digest);
                let response = if head_only {
                    let length = digest.len() as u64;
                    ObjectResponse::new(StatusCode::OK, ResponseBody::Omitted { length })
                        .with_header("x-checksum", digest)
                } else {
                    ObjectResponse::new(StatusCode::OK, ResponseBody::Text(digest))
                };
                response.with_header("Content-Type", "text/plain")
            }
            None => {
                let content_type = mime_guess::from_path(path.as_str()).first_or_octet_stream();
                let body = if head_only {
                    ResponseBody::Omitted { length }
                } else {
                    ResponseBody::Stream { reader, length }
                };
                ObjectResponse::new(StatusCode::OK, body).with_header("Content-Type", content_type.to_string())
            }
        };

        if requested.is_some() {
            response.status = StatusCode::PARTIAL_CONTENT;
            response.headers.push(("Accept-Ranges".to_string(), "bytes".to_string()));
            response.headers.push((
                "Content-Range".to_string(),
                format!("bytes {}-{}/{}", first, end.saturating_sub(1), size),
            ));
        }

        Ok(self.with_metadata(response, &record))
    }
}
