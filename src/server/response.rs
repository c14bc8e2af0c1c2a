//! Response construction helpers.

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use std::convert::Infallible;
use tracing::warn;

use super::streaming::ChunkFrameStream;

/// Body type shared by buffered and streaming responses.
pub type ResponseBody = BoxBody<Bytes, Infallible>;

/// Fixed body for commands that failed without output capture.
pub const COMMAND_FAILED_BODY: &str =
    "Error occurred while executing the hook's command. Please check logs for more details.";

/// Fixed body for requests whose trigger rule did not match.
pub const RULES_NOT_SATISFIED_BODY: &str = "Hook rules were not satisfied.";

/// Fixed body for unknown hook IDs.
pub const HOOK_NOT_FOUND_BODY: &str = "Hook not found.";

/// Fixed body for evaluation failures.
pub const RULES_ERROR_BODY: &str = "Error occurred while evaluating hook rules.";

/// Wrap a byte body.
pub fn full_body(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into()).boxed()
}

/// Wrap a chunk stream into a response body.
pub fn stream_body(stream: ChunkFrameStream) -> ResponseBody {
    StreamBody::new(stream).boxed()
}

/// Build a plain-text response with the given status and default headers.
pub fn text_response(
    status: StatusCode,
    headers: &[(String, String)],
    body: impl Into<Bytes>,
) -> Response<ResponseBody> {
    let mut builder = Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8");

    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(full_body(body))
        .unwrap_or_else(|_| fallback_response())
}

/// Map a configured status code onto a usable one: zero means unset and
/// collapses to 200, as do codes HTTP does not know about.
pub fn sanitize_status(code: u16) -> StatusCode {
    if code == 0 {
        return StatusCode::OK;
    }

    match StatusCode::from_u16(code) {
        Ok(status) if status.canonical_reason().is_some() => status,
        _ => {
            warn!(
                configured_code = code,
                actual_code = 200,
                "hook got matched, but configured return code is unknown, using default"
            );
            StatusCode::OK
        }
    }
}

fn fallback_response() -> Response<ResponseBody> {
    let mut response = Response::new(full_body(""));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_status() {
        assert_eq!(sanitize_status(0), StatusCode::OK);
        assert_eq!(sanitize_status(200), StatusCode::OK);
        assert_eq!(sanitize_status(204), StatusCode::NO_CONTENT);
        assert_eq!(sanitize_status(404), StatusCode::NOT_FOUND);
        // Unknown codes collapse to 200.
        assert_eq!(sanitize_status(299), StatusCode::OK);
        assert_eq!(sanitize_status(999), StatusCode::OK);
    }
}
