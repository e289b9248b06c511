use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use crate::Digest;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a tarsink-related operation.
pub type TarsinkResult<T> = Result<T, TarsinkError>;

/// An error that occurred during layer ingestion, storage or collection.
#[derive(Debug, Error)]
pub enum TarsinkError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// The input stream is not a valid layer archive.
    ///
    /// Ingestion aborts without committing a blob or changing any reference
    /// count.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// An unknown whiteout dialect was requested.
    #[error("unsupported whiteout dialect: {0}")]
    UnsupportedWhiteoutDialect(String),

    /// Bytes committed to the store do not hash to the asserted digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the caller asserted.
        expected: Digest,

        /// The digest the bytes actually hash to.
        actual: Digest,
    },

    /// A reference decrement would take a count below zero.
    ///
    /// This indicates a caller bug, never a normal runtime condition.
    #[error("reference underflow for {digest}: count is {count}, removing {removing}")]
    RefUnderflow {
        /// The digest whose count would underflow.
        digest: Digest,

        /// The current reference count.
        count: u64,

        /// The number of references being removed.
        removing: u64,
    },

    /// No blob is stored under the given digest.
    #[error("blob not found: {0}")]
    NotFound(Digest),

    /// A digest string could not be parsed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TarsinkError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> TarsinkError {
        TarsinkError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `TarsinkResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> TarsinkResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
