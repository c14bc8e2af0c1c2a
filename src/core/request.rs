//! Normalized view of an inbound HTTP request.

use bytes::Bytes;
use http::HeaderMap;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

/// Normalized request handed through the hook pipeline.
///
/// Headers and query parameters are stored as JSON-like mappings so that
/// parse-parameters-as-json substitution can replace string leaves with
/// decoded objects, and so the parameter resolver can walk them with the
/// same dotted-path traversal it uses for the payload.
///
/// Multi-valued headers and query parameters collapse to their first value.
#[derive(Debug, Default)]
pub struct HookRequest {
    /// Correlation ID attached to every log line for this request.
    pub id: String,
    /// Headers keyed by canonical MIME header name.
    pub headers: Map<String, Value>,
    /// Query parameters keyed by raw name.
    pub query: Map<String, Value>,
    /// Parsed body payload, if any.
    pub payload: Option<Value>,
    /// Raw request body (empty for multipart requests).
    pub body: Bytes,
    /// Effective content type (hook override wins over the header).
    pub content_type: String,
    /// Remote address in `ip:port` form.
    pub remote_addr: String,
    /// HTTP method.
    pub method: String,
    /// Soften signature-mismatch errors inside `or` rules; set per hook
    /// before rule evaluation.
    pub allow_signature_errors: bool,
}

impl HookRequest {
    /// Create a request with its correlation ID and connection metadata.
    pub fn new(id: impl Into<String>, method: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            remote_addr: remote_addr.into(),
            ..Default::default()
        }
    }

    /// Populate the header mapping from an HTTP header map.
    ///
    /// Keys are canonicalized; only the first value of a repeated header is
    /// observable through the mapping.
    pub fn parse_headers(&mut self, headers: &HeaderMap) {
        for name in headers.keys() {
            if let Some(value) = headers.get(name) {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                self.headers.insert(
                    canonical_mime_header_key(name.as_str()),
                    Value::String(value),
                );
            }
        }
    }

    /// Populate the query mapping from the raw query string.
    ///
    /// The first value of a repeated parameter wins.
    pub fn parse_query(&mut self, query: Option<&str>) {
        let Some(query) = query else { return };

        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }

            let (key, value) = match pair.find('=') {
                Some(pos) => (&pair[..pos], &pair[pos + 1..]),
                None => (pair, ""),
            };

            if key.is_empty() {
                continue;
            }

            let key = form_decode(key);
            if !self.query.contains_key(&key) {
                self.query.insert(key, Value::String(form_decode(value)));
            }
        }
    }

    /// Look up a header by its wire name, returning string values only.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&canonical_mime_header_key(name))
            .and_then(|v| v.as_str())
    }
}

/// Percent-decode a query/form component, treating `+` as space.
pub fn form_decode(s: &str) -> String {
    if s.contains('+') {
        let s = s.replace('+', " ");
        percent_decode_str(&s).decode_utf8_lossy().into_owned()
    } else if s.contains('%') {
        percent_decode_str(s).decode_utf8_lossy().into_owned()
    } else {
        s.to_string()
    }
}

/// Canonicalize a MIME header key: first letter and every letter following
/// a dash uppercased, the rest lowercased (`x-hub-signature` becomes
/// `X-Hub-Signature`). Keys containing non-token bytes are returned
/// unchanged.
pub fn canonical_mime_header_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for b in name.bytes() {
        let b = if upper {
            b.to_ascii_uppercase()
        } else {
            b.to_ascii_lowercase()
        };
        out.push(b as char);
        upper = b == b'-';
    }
    out
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_mime_header_key() {
        assert_eq!(canonical_mime_header_key("x-hub-signature"), "X-Hub-Signature");
        assert_eq!(canonical_mime_header_key("CONTENT-TYPE"), "Content-Type");
        assert_eq!(canonical_mime_header_key("date"), "Date");
        // Non-token bytes leave the key untouched
        assert_eq!(canonical_mime_header_key("bad key"), "bad key");
    }

    #[test]
    fn test_parse_headers_first_value_wins() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "first".parse().unwrap());
        headers.append("x-tag", "second".parse().unwrap());

        let mut req = HookRequest::default();
        req.parse_headers(&headers);

        assert_eq!(req.header("X-Tag"), Some("first"));
        assert_eq!(req.header("x-tag"), Some("first"));
    }

    #[test]
    fn test_parse_query() {
        let mut req = HookRequest::default();
        req.parse_query(Some("branch=master&branch=dev&msg=hello+world&empty"));

        assert_eq!(req.query.get("branch"), Some(&Value::String("master".into())));
        assert_eq!(
            req.query.get("msg"),
            Some(&Value::String("hello world".into()))
        );
        assert_eq!(req.query.get("empty"), Some(&Value::String("".into())));
    }

    #[test]
    fn test_form_decode() {
        assert_eq!(form_decode("a%20b"), "a b");
        assert_eq!(form_decode("a+b"), "a b");
        assert_eq!(form_decode("plain"), "plain");
    }
}
