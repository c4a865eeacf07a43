//! Bounded frame buffer pool
//!
//! The pool owns every raster the decoder will ever touch: `num_frames`
//! frames allocated up front, rented to picture handles, held while later
//! pictures still predict from them, and reclaimed when nobody does.
//! Two intrusive lists track reclaimable frames:
//!
//! - `free`: unbound frames, rentable immediately;
//! - `freeable`: rendered frames whose handles are idle. Still bound and
//!   resurrectable by their owner, but first in line for eviction when
//!   the free list runs dry. Eviction order is FIFO.
//!
//! A frame on neither list is rented out. The pool mutex is held across
//! the whole get-free-or-evict decision, and taking a frame off a list
//! under that mutex is the claim on it: two renters cannot evict the
//! same frame, and eviction and resurrection of a given frame exclude
//! each other.

pub mod frame;
pub mod handle;
mod list;

pub use frame::{Frame, FrameState, SliceRow};
pub use handle::FrameHandle;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use list::FrameList;

/// Sizing parameters for a [`BufferPool`]
///
/// Frame dimensions are given in macroblocks (16x16 pixel units) and are
/// fixed for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of frames to allocate
    pub num_frames: usize,
    /// Frame width in macroblocks
    pub mb_width: u32,
    /// Frame height in macroblocks
    pub mb_height: u32,
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new(num_frames: usize, mb_width: u32, mb_height: u32) -> Self {
        PoolConfig {
            num_frames,
            mb_width,
            mb_height,
        }
    }

    /// Set the number of frames
    pub fn with_num_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    /// Check the configuration for zero-sized dimensions or an empty pool
    pub fn validate(&self) -> Result<()> {
        if self.num_frames == 0 {
            return Err(Error::config("pool must hold at least one frame"));
        }
        if self.mb_width == 0 || self.mb_height == 0 {
            return Err(Error::config(format!(
                "frame dimensions must be nonzero, got {}x{} macroblocks",
                self.mb_width, self.mb_height
            )));
        }
        Ok(())
    }

    /// Total bytes of raster the pool will allocate
    pub fn raster_bytes(&self) -> usize {
        let width = 16 * self.mb_width as usize;
        let height = 16 * self.mb_height as usize;
        self.num_frames * (3 * width * height / 2)
    }
}

impl fmt::Display for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames of {}x{} px",
            self.num_frames,
            16 * self.mb_width,
            16 * self.mb_height
        )
    }
}

/// Usage counters for a [`BufferPool`]
///
/// Maintained under the pool mutex, read via [`BufferPool::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Frames handed out by the rent path
    pub rents: u64,
    /// Idle bindings brought back to RENDERED without a new rent
    pub resurrections: u64,
    /// Parked frames reclaimed from their handle to satisfy a rent
    pub evictions: u64,
    /// Rents that failed because both lists were empty
    pub exhaustions: u64,
    /// Frames currently on neither list
    pub in_use: usize,
    /// High-water mark of `in_use`
    pub peak_in_use: usize,
}

impl PoolStats {
    /// Total successful bind operations, rented or resurrected
    pub fn total_binds(&self) -> u64 {
        self.rents + self.resurrections
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolStats {{ rents: {}, resurrections: {}, evictions: {}, exhaustions: {}, in_use: {}, peak: {} }}",
            self.rents, self.resurrections, self.evictions, self.exhaustions, self.in_use, self.peak_in_use
        )
    }
}

/// Fixed arena of decoder frames with rent, park and evict semantics
///
/// The pool is the sole owner of its frames; handles and callers only
/// ever borrow them. All frames and their rasters are allocated in the
/// constructor, nothing is allocated on bind.
///
/// # Thread safety
///
/// Safe to share across decoder workers via `Arc`. Lock order is
/// handle, then pool, then frame, then list; eviction notifies the
/// *evicted* handle only after its frame has been claimed and the pool
/// mutex released, so no pool or frame lock sits above a handle mutex
/// during the detach.
pub struct BufferPool {
    config: PoolConfig,
    frames: Vec<Arc<Frame>>,
    free: FrameList,
    freeable: FrameList,
    /// Pool mutex: orders list-choice decisions and guards the counters.
    stats: Mutex<PoolStats>,
    /// Notified when a frame is parked. No rent path blocks on it today;
    /// kept so an embedder-facing blocking rent can be layered on.
    new_freeable: Condvar,
}

impl BufferPool {
    /// Create a pool of `num_frames` frames of `mb_width` x `mb_height`
    /// macroblocks, all initially free.
    pub fn new(num_frames: usize, mb_width: u32, mb_height: u32) -> Result<Arc<Self>> {
        Self::with_config(PoolConfig::new(num_frames, mb_width, mb_height))
    }

    /// Create a pool from a validated [`PoolConfig`].
    pub fn with_config(config: PoolConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let frames: Vec<Arc<Frame>> = (0..config.num_frames)
            .map(|index| Arc::new(Frame::new(index, config.mb_width, config.mb_height)))
            .collect();

        let free = FrameList::new(config.num_frames);
        for frame in &frames {
            free.push_back(frame.index());
        }

        debug!(%config, raster_bytes = config.raster_bytes(), "frame pool allocated");

        Ok(Arc::new(BufferPool {
            config,
            frames,
            free,
            freeable: FrameList::new(config.num_frames),
            stats: Mutex::new(PoolStats::default()),
            new_freeable: Condvar::new(),
        }))
    }

    /// Rent a frame: pop the free list, or evict the oldest parked frame,
    /// or fail with [`Error::OutOfFrames`].
    ///
    /// The returned frame is FREE and unbound; the caller must lock it
    /// immediately. The whole choice happens under the pool mutex, and
    /// the list pop is the claim on the frame: once a frame is off the
    /// freeable list no resurrection can touch it, so the evicted
    /// handle's detach runs after the pool mutex is released and cannot
    /// deadlock against an owner stuck in its own acquire.
    pub(crate) fn get_free_frame(&self) -> Result<Arc<Frame>> {
        let (frame, evicted) = {
            let mut stats = self.stats.lock().unwrap();

            let (index, evicted) = match self.free.pop_front() {
                Some(index) => (index, false),
                None => match self.freeable.pop_front() {
                    Some(index) => {
                        stats.evictions += 1;
                        (index, true)
                    }
                    None => {
                        stats.exhaustions += 1;
                        warn!(num_frames = self.config.num_frames, "frame pool exhausted");
                        return Err(Error::OutOfFrames {
                            num_frames: self.config.num_frames,
                        });
                    }
                },
            };

            stats.rents += 1;
            stats.in_use += 1;
            stats.peak_in_use = stats.peak_in_use.max(stats.in_use);
            (Arc::clone(&self.frames[index]), evicted)
        };

        if evicted {
            debug!(frame = frame.index(), "evicting parked frame");
            frame.evict();
        }
        Ok(frame)
    }

    /// Park a rendered frame whose handle just went idle.
    pub(crate) fn make_freeable(&self, frame: &Frame) {
        let mut stats = self.stats.lock().unwrap();
        self.freeable.push_back(frame.index());
        stats.in_use -= 1;
        self.new_freeable.notify_all();
    }

    /// Return a never-rendered frame to the free list.
    pub(crate) fn make_free(&self, frame: &Frame) {
        let mut stats = self.stats.lock().unwrap();
        self.free.push_back(frame.index());
        stats.in_use -= 1;
    }

    /// Pull a parked frame off the freeable list so its owning handle can
    /// resurrect it.
    ///
    /// Returns whether the claim won: `false` means a concurrent rent
    /// already popped the frame for eviction, and the caller must let
    /// the detach land instead of relocking. The membership check and
    /// the unlink share the pool mutex with the rent path, so exactly
    /// one side claims any given frame.
    pub(crate) fn remove_from_freeable(&self, frame: &Frame) -> bool {
        let mut stats = self.stats.lock().unwrap();
        if !self.freeable.contains(frame.index()) {
            return false;
        }
        self.freeable.unlink(frame.index());
        stats.resurrections += 1;
        stats.in_use += 1;
        stats.peak_in_use = stats.peak_in_use.max(stats.in_use);
        true
    }

    /// Snapshot of the usage counters
    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().unwrap()
    }

    /// Number of frames on the free list
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of frames on the freeable list
    pub fn freeable_len(&self) -> usize {
        self.freeable.len()
    }

    /// Whether `frame` currently sits on the free list
    pub fn is_free(&self, frame: &Frame) -> bool {
        self.free.contains(frame.index())
    }

    /// Whether `frame` currently sits on the freeable list
    pub fn is_freeable(&self, frame: &Frame) -> bool {
        self.freeable.contains(frame.index())
    }

    /// Total number of frames owned by the pool
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Frame dimensions in pixels
    pub fn frame_dimensions(&self) -> (u32, u32) {
        (16 * self.config.mb_width, 16 * self.config.mb_height)
    }

    /// All frames in slot order, for inspection
    pub fn frames(&self) -> &[Arc<Frame>] {
        &self.frames
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        for frame in &self.frames {
            let state = frame.state();
            assert!(
                state != FrameState::Locked && state != FrameState::Rendered,
                "frame {}: pool dropped while frame is {state}",
                frame.index()
            );
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.config)
            .field("free", &self.free_len())
            .field("freeable", &self.freeable_len())
            .finish()
    }
}
