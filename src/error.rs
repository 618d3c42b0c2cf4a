//! Error types for the translator.
//!
//! Recoverable problems become [`Diagnostic`]s accumulated in the translation
//! context; this enum covers the failures that abort translation outright.
//!
//! [`Diagnostic`]: crate::context::Diagnostic

use thiserror::Error;

use crate::bitstream::BitstreamError;

/// Fatal translation failures.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error(transparent)]
    Bitstream(#[from] BitstreamError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// First diagnostic encountered while running in fail-fast mode.
    #[error("{0}")]
    FailFast(String),

    /// Structurally unrecoverable input, independent of the recovery flag.
    #[error("{0}")]
    Fatal(String),

    #[error("object emission failed: {0}")]
    Object(String),
}

/// Result alias used throughout the translator.
pub type TranslateResult<T> = Result<T, TranslateError>;
