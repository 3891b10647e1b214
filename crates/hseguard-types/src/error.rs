//! Common error types

use thiserror::Error;

/// Error parsing a stored or user-supplied value into a domain type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown enum variant
    #[error("invalid {kind}: {value}")]
    UnknownVariant {
        /// Name of the type being parsed
        kind: &'static str,
        /// Offending input
        value: String,
    },

    /// Feature code does not satisfy the naming rules
    #[error("invalid feature code '{0}': {1}")]
    InvalidFeatureCode(String, &'static str),
}

impl ParseError {
    pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.to_string(),
        }
    }
}
