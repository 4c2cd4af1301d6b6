//! Error types shared across reef crates.

/// The result type used throughout reef-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by reef-core primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier could not be parsed.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },
}
