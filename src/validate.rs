//! Header-only plausibility check for spreadsheet responses.

use crate::error::FetchError;
use crate::transport::HttpResponse;

/// Rejects HTML/text payloads and declared lengths below `min_size`.
///
/// Absent or zero `Content-Length` passes: streamed responses often omit it
/// and the body is size-checked after download anyway.
pub fn validate_headers(content_type: &str, content_length: Option<u64>, min_size: u64) -> Result<(), FetchError> {
    let content_type = content_type.to_lowercase();
    if content_type.contains("html") || content_type.contains("text") {
        return Err(FetchError::NotASpreadsheet { content_type });
    }

    if let Some(size) = content_length {
        if size > 0 && size < min_size {
            return Err(FetchError::SuspiciouslySmall { size });
        }
    }

    Ok(())
}

pub fn validate_response(resp: &HttpResponse, min_size: u64) -> Result<(), FetchError> {
    validate_headers(&resp.content_type(), resp.content_length(), min_size)
}
