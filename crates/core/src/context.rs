//! Stack contexts
//!
//! A [`StackContext`] is a snapshot of a stack's bindings plus its current
//! contents. It is how a shared bootstrap environment is transplanted into
//! every fresh stack the scheduler builds.
//!
//! # Encoding
//!
//! Contexts are encoded with bincode behind a one-byte format version. Since
//! macros are plain data (step lists, operator names), every value is
//! encodable, macros included.
//!
//! Bindings are written through a `BTreeMap` so the same logical context
//! always encodes to identical bytes.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Current encoding version (first byte of an encoded context)
pub const CONTEXT_FORMAT_VERSION: u8 = 1;

/// Error while encoding or decoding a context
#[derive(Debug)]
pub enum ContextError {
    /// Input was empty
    Empty,
    /// Encoded with an unknown format version
    UnsupportedVersion(u8),
    /// Bincode encoding/decoding error (preserves original error for debugging)
    Bincode(Box<bincode::Error>),
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Empty => write!(f, "empty context"),
            ContextError::UnsupportedVersion(v) => {
                write!(f, "unsupported context format version {}", v)
            }
            ContextError::Bincode(e) => write!(f, "bincode error: {}", e),
        }
    }
}

impl std::error::Error for ContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContextError::Bincode(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<bincode::Error> for ContextError {
    fn from(e: bincode::Error) -> Self {
        ContextError::Bincode(Box::new(e))
    }
}

/// Snapshot of a stack's bindings and contents (bottom first)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackContext {
    pub bindings: HashMap<String, Value>,
    pub values: Vec<Value>,
}

#[derive(Serialize)]
struct EncodedRef<'a> {
    bindings: BTreeMap<&'a str, &'a Value>,
    values: &'a [Value],
}

#[derive(Deserialize)]
struct Encoded {
    bindings: BTreeMap<String, Value>,
    values: Vec<Value>,
}

impl StackContext {
    pub fn new(bindings: HashMap<String, Value>, values: Vec<Value>) -> Self {
        Self { bindings, values }
    }

    /// Encode to the versioned binary form
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContextError> {
        let encoded = EncodedRef {
            bindings: self
                .bindings
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
            values: &self.values,
        };
        let mut out = vec![CONTEXT_FORMAT_VERSION];
        bincode::serialize_into(&mut out, &encoded)?;
        Ok(out)
    }

    /// Decode from the versioned binary form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        let (version, body) = bytes.split_first().ok_or(ContextError::Empty)?;
        if *version != CONTEXT_FORMAT_VERSION {
            return Err(ContextError::UnsupportedVersion(*version));
        }
        let decoded: Encoded = bincode::deserialize(body)?;
        Ok(Self {
            bindings: decoded.bindings.into_iter().collect(),
            values: decoded.values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::{Macro, Step};

    fn sample() -> StackContext {
        let mut bindings = HashMap::new();
        bindings.insert("answer".to_string(), Value::Int(42));
        bindings.insert(
            "square".to_string(),
            Value::macro_value(Macro::new(vec![Step::call("DUP"), Step::call("*")])),
        );
        StackContext::new(bindings, vec![Value::text("left"), Value::Float(0.5)])
    }

    #[test]
    fn test_encode_decode_preserves_macros() {
        let ctx = sample();
        let bytes = ctx.to_bytes().unwrap();
        assert_eq!(bytes[0], CONTEXT_FORMAT_VERSION);
        assert_eq!(StackContext::from_bytes(&bytes).unwrap(), ctx);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = sample().to_bytes().unwrap();
        let b = sample().to_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            StackContext::from_bytes(&[]),
            Err(ContextError::Empty)
        ));
        assert!(matches!(
            StackContext::from_bytes(&[99, 0, 0]),
            Err(ContextError::UnsupportedVersion(99))
        ));
        assert!(matches!(
            StackContext::from_bytes(&[CONTEXT_FORMAT_VERSION, 0xff]),
            Err(ContextError::Bincode(_))
        ));
    }
}
