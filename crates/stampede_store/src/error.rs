// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache store operations.

use std::fmt;

/// The store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Reading a value.
    Get,
    /// Writing a value with a TTL.
    Set,
    /// Removing a value.
    Delete,
    /// Opening the connection to the store.
    Connect,
}

impl StoreOperation {
    /// Returns the operation name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Connect => "connect",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a cache store.
///
/// Callers in `stampede` treat every variant as a degraded cache: the failure is
/// logged and the request proceeds as if the value were absent.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached or rejected the command.
    #[error("cache store unavailable during {operation}: {source}")]
    Unavailable {
        /// The operation that failed.
        operation: StoreOperation,
        /// The underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A value was written with a zero TTL, which could never be served.
    #[error("cache entries require a non-zero ttl")]
    InvalidTtl,
}

impl StoreError {
    /// Creates an [`StoreError::Unavailable`] from any error-like cause.
    ///
    /// # Examples
    ///
    /// ```
    /// use stampede_store::{StoreError, StoreOperation};
    ///
    /// let error = StoreError::unavailable(StoreOperation::Get, "connection refused");
    /// assert!(error.to_string().contains("connection refused"));
    /// ```
    pub fn unavailable(operation: StoreOperation, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unavailable {
            operation,
            source: cause.into(),
        }
    }

    /// Returns the failed operation, if the error is tied to one.
    #[must_use]
    pub fn operation(&self) -> Option<StoreOperation> {
        match self {
            Self::Unavailable { operation, .. } => Some(*operation),
            Self::InvalidTtl => Some(StoreOperation::Set),
        }
    }
}

/// A specialized [`Result`] type for cache store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display_contains_operation_and_cause() {
        let error = StoreError::unavailable(StoreOperation::Set, "broken pipe");
        let display = error.to_string();
        assert!(display.contains("set"), "got: {display}");
        assert!(display.contains("broken pipe"), "got: {display}");
    }

    #[test]
    fn unavailable_exposes_source() {
        let error = StoreError::unavailable(StoreOperation::Get, "timeout");
        let source = std::error::Error::source(&error).expect("source should be set");
        assert_eq!(source.to_string(), "timeout");
    }

    #[test]
    fn invalid_ttl_is_a_set_failure() {
        assert_eq!(StoreError::InvalidTtl.operation(), Some(StoreOperation::Set));
    }

    #[test]
    fn operation_names() {
        assert_eq!(StoreOperation::Get.as_str(), "get");
        assert_eq!(StoreOperation::Set.as_str(), "set");
        assert_eq!(StoreOperation::Delete.to_string(), "delete");
        assert_eq!(StoreOperation::Connect.to_string(), "connect");
    }
}
