//! HMAC and Scalr-style signature verification over the raw request body.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use super::error::{HookError, SignatureError};
use crate::core::request::HookRequest;

/// Maximum allowed clock skew for Scalr signatures, in seconds.
const SCALR_DATE_WINDOW_SECS: i64 = 300;

/// Format of the Scalr `Date` header, minus the trailing zone token,
/// e.g. `Fri 08 Sep 2017 11:24:32 UTC`.
const SCALR_DATE_FORMAT: &str = "%a %d %b %Y %H:%M:%S";

/// Extract the values carrying the given prefix from a comma-separated
/// header value, with the prefix stripped.
pub fn extract_comma_separated_values(source: &str, prefix: &str) -> Vec<String> {
    source
        .split(',')
        .filter_map(|part| part.strip_prefix(prefix))
        .map(|s| s.to_string())
        .collect()
}

/// Extract all candidate signatures from a header value.
///
/// A comma means multiple candidates; otherwise the prefix (if present) is
/// stripped and the value returned as a single candidate.
pub fn extract_signatures(source: &str, prefix: &str) -> Vec<String> {
    if source.contains(',') {
        return extract_comma_separated_values(source, prefix);
    }

    vec![source.strip_prefix(prefix).unwrap_or(source).to_string()]
}

/// Compute the hex-encoded MAC of the payload and test it against each
/// candidate with constant-time equality. Returns the computed digest on
/// a match.
fn validate_mac<M: Mac>(
    payload: &[u8],
    mut mac: M,
    signatures: Vec<String>,
) -> Result<String, HookError> {
    mac.update(payload);
    let actual = hex::encode(mac.finalize().into_bytes());

    for signature in &signatures {
        if bool::from(signature.as_bytes().ct_eq(actual.as_bytes())) {
            return Ok(actual);
        }
    }

    Err(HookError::Signature(SignatureError {
        signatures,
        empty_payload: payload.is_empty(),
    }))
}

/// Verify an HMAC-SHA1 signature of the payload.
pub fn check_payload_signature(
    payload: &[u8],
    secret: &str,
    signature: &str,
) -> Result<String, HookError> {
    let mac = new_mac::<Hmac<Sha1>>(secret)?;
    validate_mac(payload, mac, extract_signatures(signature, "sha1="))
}

/// Verify an HMAC-SHA256 signature of the payload.
pub fn check_payload_signature_256(
    payload: &[u8],
    secret: &str,
    signature: &str,
) -> Result<String, HookError> {
    let mac = new_mac::<Hmac<Sha256>>(secret)?;
    validate_mac(payload, mac, extract_signatures(signature, "sha256="))
}

/// Verify an HMAC-SHA512 signature of the payload.
pub fn check_payload_signature_512(
    payload: &[u8],
    secret: &str,
    signature: &str,
) -> Result<String, HookError> {
    let mac = new_mac::<Hmac<Sha512>>(secret)?;
    validate_mac(payload, mac, extract_signatures(signature, "sha512="))
}

fn new_mac<M: Mac + hmac::digest::KeyInit>(secret: &str) -> Result<M, HookError> {
    if secret.is_empty() {
        return Err(HookError::other(
            "signature validation secret can not be empty",
        ));
    }

    <M as hmac::digest::KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|e| HookError::other(format!("invalid HMAC key: {}", e)))
}

/// Verify a Scalr-style signature: HMAC-SHA1 over `body || Date header`,
/// with an optional freshness check of the `Date` header against a
/// five-minute window.
///
/// Returns `Ok(false)` (not an error) when the required headers are absent.
pub fn check_scalr_signature(
    req: &HookRequest,
    signing_key: &str,
    check_date: bool,
) -> Result<bool, HookError> {
    let Some(provided) = req.headers.get("X-Signature").and_then(|v| v.as_str()) else {
        return Ok(false);
    };
    let Some(date_header) = req.headers.get("Date").and_then(|v| v.as_str()) else {
        return Ok(false);
    };

    if signing_key.is_empty() {
        return Err(HookError::other(
            "signature validation signing key can not be empty",
        ));
    }

    let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
        .map_err(|e| HookError::other(format!("invalid HMAC key: {}", e)))?;
    mac.update(&req.body);
    mac.update(date_header.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(HookError::Signature(SignatureError {
            signatures: vec![provided.to_string()],
            empty_payload: req.body.is_empty(),
        }));
    }

    if !check_date {
        return Ok(true);
    }

    let date = parse_scalr_date(date_header)?;
    let delta = (Utc::now() - date).num_seconds().abs();
    if delta > SCALR_DATE_WINDOW_SECS {
        return Err(HookError::Signature(SignatureError {
            signatures: vec!["outdated".to_string()],
            empty_payload: false,
        }));
    }

    Ok(true)
}

/// Parse the Scalr `Date` header. Only zero-offset zone tokens are
/// accepted, which is what Scalr emits.
fn parse_scalr_date(value: &str) -> Result<DateTime<Utc>, HookError> {
    let (datetime_part, zone) = value
        .rsplit_once(' ')
        .ok_or_else(|| HookError::Parse(format!("invalid date header: {}", value)))?;

    if zone != "UTC" && zone != "GMT" {
        return Err(HookError::Parse(format!(
            "unsupported time zone in date header: {}",
            zone
        )));
    }

    let naive = NaiveDateTime::parse_from_str(datetime_part, SCALR_DATE_FORMAT)
        .map_err(|e| HookError::Parse(format!("invalid date header '{}': {}", value, e)))?;

    Ok(Utc.from_utc_datetime(&naive))
}
