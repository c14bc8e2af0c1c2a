//! Trigger rule trees: boolean composition over request predicates.

use std::net::IpAddr;

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::argument::Argument;
use super::error::HookError;
use super::signature::{
    check_payload_signature, check_payload_signature_256, check_payload_signature_512,
    check_scalr_signature,
};
use crate::core::request::HookRequest;

// Leaf predicate kinds.
pub const MATCH_VALUE: &str = "value";
pub const MATCH_REGEX: &str = "regex";
pub const MATCH_HMAC_SHA1: &str = "payload-hmac-sha1";
pub const MATCH_HMAC_SHA256: &str = "payload-hmac-sha256";
pub const MATCH_HMAC_SHA512: &str = "payload-hmac-sha512";
pub const MATCH_HASH_SHA1: &str = "payload-hash-sha1";
pub const MATCH_HASH_SHA256: &str = "payload-hash-sha256";
pub const MATCH_HASH_SHA512: &str = "payload-hash-sha512";
pub const MATCH_IP_WHITELIST: &str = "ip-whitelist";
pub const MATCH_SCALR_SIGNATURE: &str = "scalr-signature";

/// Evaluation outcome: the verdict plus the first error worth surfacing.
///
/// A `not` node inverts the verdict while still carrying the child's
/// error, and an enclosing `or` may suppress that error and keep the
/// inverted verdict, so both halves travel together.
pub type RuleOutcome = (bool, Option<HookError>);

/// A rule node. Exactly one variant is populated; a node with none set
/// evaluates to false.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Rules>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Rules>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Rules>>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_rule: Option<MatchRule>,
}

impl Rules {
    /// Evaluate the first populated variant.
    pub fn evaluate(&self, req: &HookRequest) -> RuleOutcome {
        if let Some(and) = &self.and {
            return evaluate_and(and, req);
        }
        if let Some(or) = &self.or {
            return evaluate_or(or, req);
        }
        if let Some(not) = &self.not {
            let (value, err) = not.evaluate(req);
            return (!value, err);
        }
        if let Some(match_rule) = &self.match_rule {
            return match_rule.evaluate(req);
        }

        (false, None)
    }
}

/// True if and only if every child is true; short-circuits on the first
/// false child. Errors abort evaluation.
fn evaluate_and(children: &[Rules], req: &HookRequest) -> RuleOutcome {
    for child in children {
        let (value, err) = child.evaluate(req);
        if err.is_some() {
            return (false, err);
        }
        if !value {
            return (false, None);
        }
    }

    (true, None)
}

/// True if any child is true; short-circuits on the first true child.
///
/// Missing-parameter errors are suppressed. Signature errors are suppressed
/// when the request allows signature soft failures. Anything else aborts
/// evaluation. An `or` whose children all fail with suppressible errors is
/// simply "did not match".
fn evaluate_or(children: &[Rules], req: &HookRequest) -> RuleOutcome {
    let mut result = false;

    for child in children {
        let (value, err) = child.evaluate(req);
        if let Some(err) = err {
            if !err.is_parameter_node()
                && (!req.allow_signature_errors || !err.is_signature())
            {
                return (false, Some(err));
            }
        }

        result = result || value;
        if result {
            return (true, None);
        }
    }

    (false, None)
}

/// A leaf predicate evaluating one boolean test against the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRule {
    #[serde(rename = "type")]
    pub kind: String,
    pub regex: String,
    pub secret: String,
    pub value: String,
    pub parameter: Argument,
    #[serde(rename = "ip-range")]
    pub ip_range: String,
}

impl MatchRule {
    /// Evaluate the predicate against the request.
    pub fn evaluate(&self, req: &HookRequest) -> RuleOutcome {
        if self.kind == MATCH_IP_WHITELIST {
            return match check_ip_whitelist(&req.remote_addr, &self.ip_range) {
                Ok(value) => (value, None),
                Err(err) => (false, Some(err)),
            };
        }
        if self.kind == MATCH_SCALR_SIGNATURE {
            return match check_scalr_signature(req, &self.secret, true) {
                Ok(value) => (value, None),
                Err(err) => (false, Some(err)),
            };
        }

        let arg = match self.parameter.get(req) {
            Ok(arg) => arg,
            Err(err) => return (false, Some(err)),
        };

        match self.kind.as_str() {
            MATCH_VALUE => (compare(&arg, &self.value), None),

            MATCH_REGEX => match Regex::new(&self.regex) {
                Ok(re) => (re.is_match(&arg), None),
                Err(e) => (false, Some(HookError::other(e.to_string()))),
            },

            MATCH_HASH_SHA1 | MATCH_HMAC_SHA1 => {
                if self.kind == MATCH_HASH_SHA1 {
                    warn!("use of deprecated option payload-hash-sha1; use payload-hmac-sha1 instead");
                }
                signature_outcome(check_payload_signature(&req.body, &self.secret, &arg))
            }

            MATCH_HASH_SHA256 | MATCH_HMAC_SHA256 => {
                if self.kind == MATCH_HASH_SHA256 {
                    warn!("use of deprecated option payload-hash-sha256; use payload-hmac-sha256 instead");
                }
                signature_outcome(check_payload_signature_256(&req.body, &self.secret, &arg))
            }

            MATCH_HASH_SHA512 | MATCH_HMAC_SHA512 => {
                if self.kind == MATCH_HASH_SHA512 {
                    warn!("use of deprecated option payload-hash-sha512; use payload-hmac-sha512 instead");
                }
                signature_outcome(check_payload_signature_512(&req.body, &self.secret, &arg))
            }

            _ => (false, None),
        }
    }
}

fn signature_outcome(result: Result<String, HookError>) -> RuleOutcome {
    match result {
        Ok(_) => (true, None),
        Err(err) => (false, Some(err)),
    }
}

/// Constant-time string comparison.
fn compare(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Check whether the remote address (of the form `ip:port`) falls inside
/// any of the whitespace-separated CIDR ranges. A bare IP is treated as a
/// single-address range.
pub fn check_ip_whitelist(remote_addr: &str, ip_range: &str) -> Result<bool, HookError> {
    // IPv6 addresses are usually bracketed; strip brackets and the port.
    let mut ip = remote_addr.trim_matches([' ', '[', ']']);
    if let Some(i) = ip.rfind(':') {
        ip = ip[..i].trim_matches([' ', '[', ']']);
    }

    let parsed: IpAddr = ip.parse().map_err(|_| {
        HookError::other(format!(
            "invalid IP address found in remote address '{}'",
            remote_addr
        ))
    })?;

    for range in ip_range.split_whitespace() {
        let cidr = if range.contains('/') {
            range.to_string()
        } else if parsed.is_ipv4() {
            format!("{}/32", range)
        } else {
            format!("{}/128", range)
        };

        let net: IpNet = cidr
            .parse()
            .map_err(|e| HookError::other(format!("invalid IP range '{}': {}", range, e)))?;

        if net.contains(&parsed) {
            return Ok(true);
        }
    }

    Ok(false)
}
