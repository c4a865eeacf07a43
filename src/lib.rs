//! parvid - parallel MPEG-style video decoding primitives
//!
//! parvid provides the shared-frame machinery a multithreaded
//! MPEG-style decoder is built around: a bounded pool of pre-allocated
//! YCbCr rasters, rented to decoder workers through per-picture handles,
//! pinned while later pictures predict from them, and reclaimed (or
//! resurrected) when demand swings.
//!
//! # Architecture
//!
//! - `pool`: the frame buffer pool, pooled frames and their lifecycle
//!   state machine, frame handles, intrusive membership lists
//! - `decode`: decode-side collaborators (pictures and their prediction
//!   state)
//! - `error`: error types
//!
//! # Example
//!
//! ```
//! use parvid::decode::Picture;
//! use parvid::pool::BufferPool;
//!
//! let pool = BufferPool::new(4, 45, 36)?; // 720x576
//! let picture = Picture::intra(&pool);
//!
//! picture.handle().acquire()?;
//! let frame = picture.handle().frame().unwrap();
//! // ... slice workers write frame.pixels_mut() ...
//! frame.set_rendered();
//! // ... consumers read between wait_rendered and release ...
//! picture.handle().release();
//! # Ok::<(), parvid::Error>(())
//! ```

pub mod decode;
pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use pool::{BufferPool, Frame, FrameHandle, FrameState, PoolConfig, PoolStats};

/// parvid version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the parvid library
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of decoder worker threads
    pub max_threads: Option<usize>,
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: None,
            verbose: false,
            debug: false,
        }
    }
}

/// Initialize the parvid library with the given configuration
///
/// Sets up the global worker thread pool the slice decoders run on and,
/// if requested, a logging subscriber.
pub fn init(config: Config) -> Result<()> {
    if let Some(threads) = config.max_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| Error::init(format!("failed to initialize thread pool: {}", e)))?;
    }

    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt().with_env_filter(level).init();
    }

    Ok(())
}
