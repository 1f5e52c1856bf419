//! POST/PUT, PATCH and DELETE

use crate::byte_range::ByteRange;
use crate::error::StoreError;
use crate::metadata::{MetadataRecord, MetadataUpdate};
use crate::protocol::{timestamp, ObjectProtocol, ObjectRequest, ObjectResponse};
use crate::storage::{ChecksumAlgorithm, ObjectPath};
use log::{debug, info};

/// Reject a body whose digest differs from the client's `x-checksum`.
///
/// Runs before anything is written, so a mismatch leaves disk and metadata
/// untouched.
fn verify_body_checksum(request: &ObjectRequest) -> Result<(), StoreError> {
    let Some(expected) = request.header("x-checksum") else {
        return Ok(());
    };
    let algorithm = request
        .header("x-checksum-type")
        .map(ChecksumAlgorithm::from_name)
        .unwrap_or_default();
    let actual = algorithm.digest(request.body());
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(StoreError::ChecksumMismatch {
            expected: expected.trim().to_string(),
            actual,
        })
    }
}

fn written_part(offset: u64, written: u64) -> Vec<ByteRange> {
    ByteRange::from_offset_len(offset, written).into_iter().collect()
}

impl ObjectProtocol {
    /// Create or overwrite an object, or copy one server-side with `x-source`
    pub(crate) fn post(&self, request: &ObjectRequest) -> Result<ObjectResponse, StoreError> {
        let path = ObjectPath::parse(request.path())?;
        let start = timestamp();

        let record = match request.header("x-source") {
            Some(source) => self.copy_object(request, source, &path)?,
            None => {
                verify_body_checksum(request)?;
                self.remove_file(&path)?;

                let mut body: &[u8] = request.body();
                let length = body.len() as u64;
                let outcome = self.files.write_chunk(&path, &mut body, 0, Some(length))?;
                info!("Stored {} ({} bytes)", path, outcome.written);
                self.metadata.upsert(
                    &path,
                    MetadataUpdate::default()
                        .with_headers(self.passthrough.extract(request))
                        .with_parts(written_part(0, outcome.written))
                        .reset(),
                )
            }
        };

        Ok(self.write_response(start, &record))
    }

    fn copy_object(
        &self,
        request: &ObjectRequest,
        source: &str,
        destination: &ObjectPath,
    ) -> Result<MetadataRecord, StoreError> {
        if !source.starts_with('/') {
            return Err(StoreError::BadRequest(format!("invalid source {}", source)));
        }
        let source = ObjectPath::parse(source)?;
        if self.files.same_file(&source, destination) {
            return Err(StoreError::BadRequest(format!(
                "source and destination are the same object: {}",
                source
            )));
        }

        let copied = self.files.copy(&source, destination)?;
        info!("Copied {} to {} ({} bytes)", source, destination, copied);

        let source_record = self.metadata.fetch(&source);
        let mut headers = source_record.headers().clone();
        headers.extend(self.passthrough.extract(request));

        Ok(self.metadata.upsert(
            destination,
            MetadataUpdate::default()
                .with_headers(headers)
                .with_parts(source_record.parts().to_vec())
                .reset(),
        ))
    }

    /// Write one chunk at `?offset=` (default 0) and record it as a part
    pub(crate) fn patch(&self, request: &ObjectRequest) -> Result<ObjectResponse, StoreError> {
        let path = ObjectPath::parse(request.path())?;
        let start = timestamp();
        let offset = request
            .query("offset")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0);

        verify_body_checksum(request)?;

        let mut body: &[u8] = request.body();
        let outcome = self.files.write_chunk(&path, &mut body, offset, request.content_length())?;
        debug!(
            "Patched {} bytes of {} at offset {} (file size {})",
            outcome.written, path, offset, outcome.file_size
        );

        let record = self.metadata.upsert(
            &path,
            MetadataUpdate::default()
                .with_headers(self.passthrough.extract(request))
                .with_parts(written_part(offset, outcome.written)),
        );

        Ok(self.write_response(start, &record))
    }

    /// Remove an object and clear its metadata
    pub(crate) fn delete(&self, request: &ObjectRequest) -> Result<ObjectResponse, StoreError> {
        let path = ObjectPath::parse(request.path())?;
        self.remove_file(&path)?;
        self.metadata.upsert(&path, MetadataUpdate::default().reset());
        info!("Deleted {}", path);
        Ok(ObjectResponse::ok())
    }

    fn remove_file(&self, path: &ObjectPath) -> Result<(), StoreError> {
        if self.files.delete(path) {
            Ok(())
        } else {
            Err(StoreError::Internal(format!("path still exists: {}", path)))
        }
    }

    fn write_response(&self, start: String, record: &MetadataRecord) -> ObjectResponse {
        let response = ObjectResponse::ok()
            .with_header("x-start", start)
            .with_header("x-end", timestamp());
        self.with_metadata(response, record)
    }
}
