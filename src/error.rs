//! Error types for the pipeline engine.

use thiserror::Error;

use crate::ipa::IpaError;
use crate::video::DeviceError;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No free internal buffer of the named role was available when a
    /// request was admitted.
    #[error("no free {0} buffer available")]
    BufferUnderrun(&'static str),

    /// The request does not carry a buffer for the stream it was queued on.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A kernel device operation failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// No IPA implementation could be located.
    #[error("no IPA implementation available")]
    IpaLoad,

    /// The IPA transport reported a failure.
    #[error("IPA error: {0}")]
    Ipa(#[from] IpaError),

    /// A frame referenced by an event is not tracked (already completed or
    /// never existed).
    #[error("frame {0} is not tracked")]
    NotFound(u32),

    /// The supplied camera configuration cannot be applied.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A dma-buf plane binding was rejected.
    #[error("invalid plane: {0}")]
    InvalidPlane(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}
