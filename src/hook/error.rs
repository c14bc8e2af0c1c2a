//! Errors produced while resolving parameters and evaluating trigger rules.

use std::fmt;

use super::argument::Argument;

/// Signature verification failure.
///
/// Carries the candidate signatures that were tested so the mismatch can be
/// logged without exposing the secret.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureError {
    /// Candidate signatures extracted from the request.
    pub signatures: Vec<String>,
    /// Whether the payload was empty, a common misconfiguration symptom.
    pub empty_payload: bool,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let empty = if self.empty_payload {
            " on empty payload"
        } else {
            ""
        };

        if self.signatures.len() == 1 {
            write!(f, "invalid payload signature {}{}", self.signatures[0], empty)
        } else {
            write!(
                f,
                "invalid payload signatures {:?}{}",
                self.signatures, empty
            )
        }
    }
}

/// Error produced by the parameter resolver, rule engine or signature
/// verifiers.
#[derive(Debug, Clone, PartialEq)]
pub enum HookError {
    /// A dotted path did not resolve against the request; suppressed inside
    /// `or` rules.
    ParameterNode { key: String },
    /// Signature verification failed; suppressed inside `or` rules when the
    /// hook allows signature soft failures.
    Signature(SignatureError),
    /// An argument named a source that is not valid for the operation.
    InvalidSource { argument: Argument },
    /// User input could not be decoded.
    Parse(String),
    /// Wraps a resolver failure with the argument that caused it.
    Argument {
        argument: Argument,
        cause: Box<HookError>,
    },
    /// Anything else: empty secrets, bad request keys, invalid patterns.
    Other(String),
}

impl HookError {
    pub fn parameter_node(key: impl Into<String>) -> Self {
        HookError::ParameterNode { key: key.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        HookError::Other(message.into())
    }

    /// Whether this is a missing-parameter error, looking through argument
    /// wrappers.
    pub fn is_parameter_node(&self) -> bool {
        match self {
            HookError::ParameterNode { .. } => true,
            HookError::Argument { cause, .. } => cause.is_parameter_node(),
            _ => false,
        }
    }

    /// Whether this is a signature mismatch. Signature errors surface
    /// unwrapped from the verifiers, so wrappers are not traversed.
    pub fn is_signature(&self) -> bool {
        matches!(self, HookError::Signature(_))
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::ParameterNode { key } => {
                write!(f, "parameter node not found: {}", key)
            }
            HookError::Signature(e) => write!(f, "{}", e),
            HookError::InvalidSource { argument } => {
                write!(f, "invalid source for argument {:?}", argument)
            }
            HookError::Parse(msg) => write!(f, "{}", msg),
            HookError::Argument { argument, cause } => write!(
                f,
                "couldn't retrieve argument for {:?}: {}",
                argument, cause
            ),
            HookError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for HookError {}

/// An accumulator for errors that should be reported jointly instead of
/// failing fast.
#[derive(Debug, Default)]
pub struct Errors(Vec<HookError>);

impl Errors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: HookError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HookError> {
        self.0.iter()
    }

    /// Convert into a `Result`, keeping the accumulated errors on failure.
    pub fn into_result(self) -> Result<(), Errors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}
