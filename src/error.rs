//! Error types for parvid

use thiserror::Error;

/// Result type alias for parvid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for parvid
#[derive(Error, Debug)]
pub enum Error {
    /// The pool has no free frame and no freeable frame to evict.
    ///
    /// Recoverable: the caller can release references, reduce decode
    /// concurrency, or construct a larger pool. A pool that hits this
    /// during steady-state decoding is undersized for the stream's
    /// reference window.
    #[error("out of frames: pool of {num_frames} has no free or freeable frame")]
    OutOfFrames {
        /// Total capacity of the pool that was exhausted
        num_frames: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A deadline-bearing wait expired before the frame was rendered
    #[error("timed out waiting for a rendered frame")]
    WaitTimeout,

    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an initialization error
    pub fn init<S: Into<String>>(msg: S) -> Self {
        Error::Init(msg.into())
    }
}
