// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for reedtree operations.
//!
//! Provides the `ReedResult<T>` pattern used across all modules, together
//! with the coarse error codes callers match on (`ErrorCode`) and the
//! process-global fatal hook.

use once_cell::sync::OnceCell;
use thiserror::Error;

/// Standard Result type for all reedtree operations.
pub type ReedResult<T> = Result<T, ReedError>;

/// Coarse error category, stable across error messages.
///
/// Mirrors the last-error codes of the public API: callers that only need
/// to distinguish "absent key" from "real failure" match on this instead of
/// on the full error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Operation illegal in the current state (closed, read-only, in
    /// transaction, already tuned, …).
    Invalid,
    /// The requested record does not exist.
    NoRecord,
    /// A keep-mode store refused to overwrite an existing record.
    Keep,
    /// Header or page data failed validation.
    Meta,
    /// Internal inconsistency (e.g. a cache entry vanished).
    Misc,
    /// Read, write or lock failure of the underlying file.
    Io,
    /// Synchronisation primitive failure.
    Thread,
    /// Renaming the database file failed.
    Rename,
    /// Unlinking the database file failed.
    Unlink,
}

/// Error types for reedtree operations.
#[derive(Debug, Clone, Error)]
pub enum ReedError {
    /// Operation not permitted in the current object state.
    #[error("Invalid state for operation '{operation}': {reason}")]
    InvalidState { operation: String, reason: String },

    /// Expected absence: the key has no record.
    #[error("No record found")]
    NoRecord,

    /// Policy rejection of a keep-mode put on an existing key.
    #[error("Existing record kept")]
    KeepExisting,

    /// Data integrity failure in the header, a page or a record.
    #[error("Metadata corrupted: {reason}")]
    MetaCorrupted { reason: String },

    /// Internal inconsistency that does not fit another category.
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    /// Compression or decompression of a record payload failed.
    #[error("Compression failed: {reason}")]
    CompressionFailed { reason: String },

    /// File system or I/O operation error.
    #[error("I/O error during '{operation}' on '{path}': {reason}")]
    IoError {
        operation: String,
        path: String,
        reason: String,
    },

    /// Synchronisation primitive failure (poisoned lock).
    #[error("Thread error: {reason}")]
    ThreadError { reason: String },

    /// Rename of the database file failed.
    #[error("Rename failed on '{path}': {reason}")]
    RenameError { path: String, reason: String },

    /// Unlink of the database file failed.
    #[error("Unlink failed on '{path}': {reason}")]
    UnlinkError { path: String, reason: String },
}

impl ReedError {
    /// Returns the coarse error code of this error.
    ///
    /// ## Output
    /// - `ErrorCode`: stable category for programmatic matching
    ///
    /// ## Example Usage
    /// ```
    /// use reedtree::error::{ErrorCode, ReedError};
    ///
    /// let err = ReedError::NoRecord;
    /// assert_eq!(err.code(), ErrorCode::NoRecord);
    /// ```
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidState { .. } => ErrorCode::Invalid,
            Self::NoRecord => ErrorCode::NoRecord,
            Self::KeepExisting => ErrorCode::Keep,
            Self::MetaCorrupted { .. } => ErrorCode::Meta,
            Self::Internal { .. } => ErrorCode::Misc,
            Self::CompressionFailed { .. } => ErrorCode::Misc,
            Self::IoError { .. } => ErrorCode::Io,
            Self::ThreadError { .. } => ErrorCode::Thread,
            Self::RenameError { .. } => ErrorCode::Rename,
            Self::UnlinkError { .. } => ErrorCode::Unlink,
        }
    }
}

// == CONVENIENCE CONSTRUCTORS ==

/// Creates an InvalidState error.
pub fn invalid_state(operation: impl Into<String>, reason: impl Into<String>) -> ReedError {
    ReedError::InvalidState {
        operation: operation.into(),
        reason: reason.into(),
    }
}

/// Creates a NoRecord error.
pub fn no_record() -> ReedError {
    ReedError::NoRecord
}

/// Creates a MetaCorrupted error.
pub fn meta_corrupted(reason: impl Into<String>) -> ReedError {
    ReedError::MetaCorrupted {
        reason: reason.into(),
    }
}

/// Creates an Internal error.
pub fn internal(reason: impl Into<String>) -> ReedError {
    ReedError::Internal {
        reason: reason.into(),
    }
}

/// Creates a CompressionFailed error.
pub fn compression_failed(reason: impl Into<String>) -> ReedError {
    ReedError::CompressionFailed {
        reason: reason.into(),
    }
}

/// Creates an IoError.
pub fn io_error(
    operation: impl Into<String>,
    path: impl Into<String>,
    reason: impl Into<String>,
) -> ReedError {
    ReedError::IoError {
        operation: operation.into(),
        path: path.into(),
        reason: reason.into(),
    }
}

/// Creates a ThreadError.
pub fn thread_error(reason: impl Into<String>) -> ReedError {
    ReedError::ThreadError {
        reason: reason.into(),
    }
}

/// Creates a RenameError.
pub fn rename_error(path: impl Into<String>, reason: impl Into<String>) -> ReedError {
    ReedError::RenameError {
        path: path.into(),
        reason: reason.into(),
    }
}

/// Creates an UnlinkError.
pub fn unlink_error(path: impl Into<String>, reason: impl Into<String>) -> ReedError {
    ReedError::UnlinkError {
        path: path.into(),
        reason: reason.into(),
    }
}

/// Automatic conversion from std::io::Error.
impl From<std::io::Error> for ReedError {
    fn from(err: std::io::Error) -> Self {
        ReedError::IoError {
            operation: "io".to_string(),
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

// == FATAL HOOK ==

static FATAL_HOOK: OnceCell<Box<dyn Fn(&str) + Send + Sync>> = OnceCell::new();

/// Registers the process-global fatal handler.
///
/// The handler runs once, immediately before the process panics on an
/// unrecoverable internal inconsistency. Registration is first-come:
/// a second call returns false and leaves the original handler in place.
///
/// ## Input
/// - `hook`: callback receiving the fatal message
///
/// ## Output
/// - `bool`: whether the handler was installed
pub fn set_fatal_hook<F>(hook: F) -> bool
where
    F: Fn(&str) + Send + Sync + 'static,
{
    FATAL_HOOK.set(Box::new(hook)).is_ok()
}

/// Reports an unrecoverable condition and terminates.
///
/// Invokes the registered fatal hook (if any), then panics. Never returns.
pub fn fatal(message: &str) -> ! {
    if let Some(hook) = FATAL_HOOK.get() {
        hook(message);
    }
    panic!("reedtree fatal: {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(no_record().code(), ErrorCode::NoRecord);
        assert_eq!(ReedError::KeepExisting.code(), ErrorCode::Keep);
        assert_eq!(meta_corrupted("bad magic").code(), ErrorCode::Meta);
        assert_eq!(
            invalid_state("put", "database not open").code(),
            ErrorCode::Invalid
        );
        assert_eq!(io_error("read", "/tmp/x", "eof").code(), ErrorCode::Io);
        assert_eq!(rename_error("/tmp/x", "exdev").code(), ErrorCode::Rename);
        assert_eq!(unlink_error("/tmp/x", "eperm").code(), ErrorCode::Unlink);
    }

    #[test]
    fn test_io_error_display() {
        let err = io_error("write", "/data/tree.rtd", "disk full");
        let text = err.to_string();
        assert!(text.contains("write"));
        assert!(text.contains("/data/tree.rtd"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn test_from_std_io_error() {
        let std_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: ReedError = std_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }
}
