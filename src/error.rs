//! Crate error type.

use thiserror::Error;

/// Errors surfaced to callers of the proxies and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A key, value or element cannot be adapted to the descriptor's shape.
    /// The container is left unchanged.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The proxy (or the host buffer it views) has already been released.
    #[error("operation on a released proxy")]
    InvalidHandle,

    /// The host holds a conflicting borrow of the buffer a proxy views.
    #[error("host buffer is borrowed elsewhere")]
    BufferBusy,

    /// No descriptor implementation exists for the requested type tag.
    #[error("unsupported element type `{0}`")]
    UnsupportedElementType(String),

    /// Object-typed keys, values and elements need their class up front.
    #[error("object element type requires a class")]
    MissingObjectClass,
}

impl Error {
    pub(crate) fn mismatch(expected: &'static str, found: &'static str) -> Self {
        Error::TypeMismatch { expected, found }
    }
}
