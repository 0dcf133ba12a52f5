//! Errors raised while constructing fundamental types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("expected 64 hex characters, got {0}")]
    InvalidHexLength(usize),

    #[error("invalid hex character")]
    InvalidHexChar,
}
