//! Pooled raster frames and their lifecycle state machine
//!
//! A [`Frame`] owns one YCbCr 4:2:0 raster allocated at pool construction
//! and reused for the pool's whole lifetime. Which picture the raster
//! currently belongs to is tracked by a four-state machine:
//!
//! ```text
//!            lock                set_rendered
//!   FREE ----------> LOCKED ----------------> RENDERED
//!    ^                  |                      |    ^
//!    |   free_locked    |         set_freeable |    | relock
//!    +------------------+                      v    |
//!    +----------------------------------- FREEABLE -+
//!                     evict
//! ```
//!
//! Every transition happens under the frame mutex and any other
//! transition is a bug in the caller, reported by panicking with the
//! frame index and the offending state. Waiters on [`Frame::wait_rendered`]
//! are woken by broadcast, never single-signal: several slice workers may
//! sleep on the same reference frame.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::decode::Picture;
use crate::error::{Error, Result};
use crate::pool::handle::FrameHandle;

/// Lifecycle state of a pooled frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// On the pool's free list, bound to no handle
    Free,
    /// Bound to a handle, pixels not yet valid
    Locked,
    /// Bound to a handle, pixels valid, at least one lock outstanding
    Rendered,
    /// Bound but unreferenced; on the freeable list, eligible for eviction
    Freeable,
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameState::Free => write!(f, "free"),
            FrameState::Locked => write!(f, "locked"),
            FrameState::Rendered => write!(f, "rendered"),
            FrameState::Freeable => write!(f, "freeable"),
        }
    }
}

/// Per-macroblock-row decoder scratch state
///
/// Slice workers decode one macroblock row at a time; the prediction
/// parameters they need are latched here from the owning picture when the
/// frame is locked and are not re-read afterwards. Rows lock
/// independently so workers on different rows never contend.
pub struct SliceRow {
    row: u32,
    f_code_fv: i32,
    f_code_bv: i32,
    forward: Option<Arc<Picture>>,
    backward: Option<Arc<Picture>>,
}

impl SliceRow {
    fn new(row: u32) -> Self {
        SliceRow {
            row,
            f_code_fv: 0,
            f_code_bv: 0,
            forward: None,
            backward: None,
        }
    }

    fn init(
        &mut self,
        f_code_fv: i32,
        f_code_bv: i32,
        forward: Option<Arc<Picture>>,
        backward: Option<Arc<Picture>>,
    ) {
        self.f_code_fv = f_code_fv;
        self.f_code_bv = f_code_bv;
        self.forward = forward;
        self.backward = backward;
    }

    /// Macroblock row index within the frame
    pub fn row(&self) -> u32 {
        self.row
    }

    /// Forward motion-vector range code
    pub fn f_code_fv(&self) -> i32 {
        self.f_code_fv
    }

    /// Backward motion-vector range code
    pub fn f_code_bv(&self) -> i32 {
        self.f_code_bv
    }

    /// Forward prediction reference, if any
    pub fn forward(&self) -> Option<&Arc<Picture>> {
        self.forward.as_ref()
    }

    /// Backward prediction reference, if any
    pub fn backward(&self) -> Option<&Arc<Picture>> {
        self.backward.as_ref()
    }
}

struct Shared {
    state: FrameState,
    /// Handle currently owning this frame. Non-owning: the pool is the
    /// sole owner of frames, handles only borrow them.
    handle: Option<Weak<FrameHandle>>,
}

/// One pooled raster frame
///
/// Created by the pool at construction time and never deallocated while
/// the pool lives. The pixel buffer is a single contiguous allocation:
/// Y plane (`width * height` bytes) followed by Cb and Cr
/// (`width * height / 4` bytes each).
pub struct Frame {
    index: usize,
    width: u32,
    height: u32,
    pixels: RwLock<Vec<u8>>,
    slice_rows: Vec<Mutex<SliceRow>>,
    shared: Mutex<Shared>,
    activity: Condvar,
}

impl Frame {
    pub(crate) fn new(index: usize, mb_width: u32, mb_height: u32) -> Self {
        let width = 16 * mb_width;
        let height = 16 * mb_height;
        let pixel_len = (3 * width * height / 2) as usize;

        Frame {
            index,
            width,
            height,
            pixels: RwLock::new(vec![0u8; pixel_len]),
            slice_rows: (0..mb_height).map(|row| Mutex::new(SliceRow::new(row))).collect(),
            shared: Mutex::new(Shared {
                state: FrameState::Free,
                handle: None,
            }),
            activity: Condvar::new(),
        }
    }

    /// Slot index of this frame within its pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Frame width in pixels (a multiple of 16)
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels (a multiple of 16)
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Height in macroblock rows
    pub fn mb_height(&self) -> u32 {
        self.height / 16
    }

    /// Length of the luma plane in bytes
    pub fn y_plane_len(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Length of one chroma plane in bytes
    pub fn chroma_plane_len(&self) -> usize {
        (self.width * self.height / 4) as usize
    }

    /// Read access to the raster. Only meaningful between a successful
    /// `wait_rendered` and the matching release on the owning handle.
    pub fn pixels(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.pixels.read().unwrap()
    }

    /// Write access to the raster, for the slice decoder filling a
    /// locked frame.
    pub fn pixels_mut(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.pixels.write().unwrap()
    }

    /// Scratch state for one macroblock row
    pub fn slice_row(&self, row: usize) -> &Mutex<SliceRow> {
        &self.slice_rows[row]
    }

    /// Current lifecycle state
    pub fn state(&self) -> FrameState {
        self.shared.lock().unwrap().state
    }

    /// Handle currently owning this frame, if the binding is live
    pub fn handle(&self) -> Option<Arc<FrameHandle>> {
        self.shared
            .lock()
            .unwrap()
            .handle
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Bind a free frame to a handle and latch the prediction parameters
    /// into every slice row. FREE -> LOCKED.
    pub(crate) fn lock(
        &self,
        handle: &Arc<FrameHandle>,
        f_code_fv: i32,
        f_code_bv: i32,
        forward: Option<Arc<Picture>>,
        backward: Option<Arc<Picture>>,
    ) {
        let mut shared = self.shared.lock().unwrap();

        assert!(
            shared.handle.is_none(),
            "frame {}: locking a frame that is still bound",
            self.index
        );
        match shared.state {
            FrameState::Free => {}
            other => panic!("frame {}: cannot lock while {other}", self.index),
        }

        shared.handle = Some(Arc::downgrade(handle));
        shared.state = FrameState::Locked;
        trace!(frame = self.index, "free -> locked");

        for row in &self.slice_rows {
            row.lock()
                .unwrap()
                .init(f_code_fv, f_code_bv, forward.clone(), backward.clone());
        }
    }

    /// Mark the raster valid. LOCKED -> RENDERED, waking all waiters.
    ///
    /// Called by the slice decoder once the last macroblock row has been
    /// written.
    pub fn set_rendered(&self) {
        let mut shared = self.shared.lock().unwrap();

        match shared.state {
            FrameState::Locked => {}
            other => panic!("frame {}: cannot render while {other}", self.index),
        }

        shared.state = FrameState::Rendered;
        trace!(frame = self.index, "locked -> rendered");
        self.activity.notify_all();
    }

    /// Resurrect an unreferenced frame for its owning handle.
    /// FREEABLE -> RENDERED, waking all waiters.
    pub(crate) fn relock(&self) {
        let mut shared = self.shared.lock().unwrap();

        match shared.state {
            FrameState::Freeable => {}
            other => panic!("frame {}: cannot relock while {other}", self.index),
        }

        shared.state = FrameState::Rendered;
        trace!(frame = self.index, "freeable -> rendered");
        self.activity.notify_all();
    }

    /// Park a rendered frame whose last lock was just released.
    /// RENDERED -> FREEABLE. The handle binding survives.
    pub(crate) fn set_freeable(&self) {
        let mut shared = self.shared.lock().unwrap();

        match shared.state {
            FrameState::Rendered => {}
            other => panic!("frame {}: cannot park while {other}", self.index),
        }

        shared.state = FrameState::Freeable;
        trace!(frame = self.index, "rendered -> freeable");
    }

    /// Return a never-rendered frame to the pool. LOCKED -> FREE.
    ///
    /// The releasing handle clears its own side of the binding.
    pub(crate) fn free_locked(&self) {
        let mut shared = self.shared.lock().unwrap();

        match shared.state {
            FrameState::Locked => {}
            other => panic!("frame {}: cannot free while {other}", self.index),
        }

        shared.handle = None;
        shared.state = FrameState::Free;
        trace!(frame = self.index, "locked -> free");
    }

    /// Reclaim a freeable frame for a new renter. FREEABLE -> FREE.
    ///
    /// Detaches the evicted handle by storing `None` into it under the
    /// handle's own mutex, so its next acquire re-materializes on a
    /// fresh frame.
    pub(crate) fn evict(&self) {
        let handle = {
            let mut shared = self.shared.lock().unwrap();

            match shared.state {
                FrameState::Freeable => {}
                other => panic!("frame {}: cannot evict while {other}", self.index),
            }

            shared.state = FrameState::Free;
            trace!(frame = self.index, "freeable -> free");
            shared.handle.take().and_then(|weak| weak.upgrade())
        };

        // The caller already claimed this frame off the freeable list,
        // so no resurrection can race the transition, and the new
        // renter only sees the frame once the detach has completed.
        if let Some(handle) = handle {
            handle.set_frame(None);
        }
    }

    /// Block until the raster is valid.
    ///
    /// Tolerates spurious wakeups; returns only in RENDERED. Does not
    /// return on FREEABLE: a parked frame's pixels are valid but nothing
    /// holds a lock, so the caller must go through the handle.
    pub fn wait_rendered(&self) {
        let mut shared = self.shared.lock().unwrap();
        while shared.state != FrameState::Rendered {
            shared = self.activity.wait(shared).unwrap();
        }
    }

    /// Like [`Frame::wait_rendered`] but gives up after `timeout`.
    pub fn wait_rendered_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_rendered_deadline(Instant::now() + timeout)
    }

    pub(crate) fn wait_rendered_deadline(&self, deadline: Instant) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        while shared.state != FrameState::Rendered {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::WaitTimeout);
            }
            let (guard, _) = self
                .activity
                .wait_timeout(shared, deadline - now)
                .unwrap();
            shared = guard;
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_layout() {
        let frame = Frame::new(0, 2, 3);
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 48);
        assert_eq!(frame.mb_height(), 3);
        assert_eq!(frame.y_plane_len(), 32 * 48);
        assert_eq!(frame.chroma_plane_len(), 32 * 48 / 4);
        // Y + Cb + Cr, contiguous
        assert_eq!(
            frame.pixels().len(),
            frame.y_plane_len() + 2 * frame.chroma_plane_len()
        );
    }

    #[test]
    fn test_new_frame_is_free_and_unbound() {
        let frame = Frame::new(0, 2, 2);
        assert_eq!(frame.state(), FrameState::Free);
        assert!(frame.handle().is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FrameState::Free.to_string(), "free");
        assert_eq!(FrameState::Freeable.to_string(), "freeable");
    }

    #[test]
    #[should_panic(expected = "cannot render while free")]
    fn test_render_free_frame_panics() {
        let frame = Frame::new(0, 1, 1);
        frame.set_rendered();
    }

    #[test]
    #[should_panic(expected = "cannot relock while free")]
    fn test_relock_free_frame_panics() {
        let frame = Frame::new(3, 1, 1);
        frame.relock();
    }

    #[test]
    #[should_panic(expected = "cannot evict while free")]
    fn test_evict_free_frame_panics() {
        let frame = Frame::new(1, 1, 1);
        frame.evict();
    }

    #[test]
    fn test_wait_rendered_timeout_expires() {
        let frame = Frame::new(0, 1, 1);
        let result = frame.wait_rendered_timeout(Duration::from_millis(10));
        assert!(matches!(result, Err(Error::WaitTimeout)));
    }
}
