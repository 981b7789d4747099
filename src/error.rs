//! [`Error`] types returned by [`LurchTable`](super::LurchTable) operations.

use thiserror::Error;

/// [`Error`] types.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// The key already exists in the table.
    #[error("an entry with the same key already exists")]
    DuplicateKey,

    /// The key does not exist in the table.
    #[error("the given key was not present in the table")]
    KeyNotFound,

    /// An argument is out of its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Name of the argument.
        name: &'static str,
        /// Why the argument was rejected.
        reason: &'static str,
    },

    /// A dynamically typed argument is not of the expected type.
    #[error("argument `{name}` is not of type `{expected}`")]
    TypeMismatch {
        /// Name of the argument.
        name: &'static str,
        /// The expected type name.
        expected: &'static str,
    },
}

/// A specialized [`Result`](std::result::Result) type for table operations.
pub type Result<T> = std::result::Result<T, Error>;
