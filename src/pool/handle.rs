//! Reference-counted indirection between a picture and its pooled frame
//!
//! A picture never owns a raster directly. It owns a [`FrameHandle`], and
//! the handle borrows a [`Frame`] from the pool for as long as anyone
//! holds a lock on it. The indirection is what makes eviction possible:
//! the pool can take a parked frame away from an idle handle, and the
//! handle will transparently rent a fresh one on its next acquire.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::decode::Picture;
use crate::error::{Error, Result};
use crate::pool::frame::{Frame, FrameState};
use crate::pool::BufferPool;

struct Shared {
    frame: Option<Arc<Frame>>,
    locks: u32,
}

/// Rentable binding from one picture to at most one pooled frame
///
/// Lock-count semantics: `locks > 0` means the bound frame is pinned
/// (LOCKED or RENDERED) and its raster may be produced or consumed;
/// `locks == 0` means the handle is idle and its frame, if still bound,
/// is parked as FREEABLE and may be evicted at any time.
pub struct FrameHandle {
    pool: Arc<BufferPool>,
    picture: Weak<Picture>,
    shared: Mutex<Shared>,
    activity: Condvar,
}

impl FrameHandle {
    /// Create an unbound handle for `picture`.
    ///
    /// Normally called through [`Picture`] construction; the picture and
    /// its handle are created together and the handle holds only a
    /// non-owning back-reference.
    pub fn new(pool: Arc<BufferPool>, picture: Weak<Picture>) -> Arc<Self> {
        Arc::new(FrameHandle {
            pool,
            picture,
            shared: Mutex::new(Shared {
                frame: None,
                locks: 0,
            }),
            activity: Condvar::new(),
        })
    }

    /// Pin a frame for this handle's picture, renting one if necessary.
    ///
    /// Three cases:
    /// - already bound and pinned: the lock count just goes up;
    /// - bound but idle: the frame is claimed off the freeable list and
    ///   resurrected (FREEABLE -> RENDERED) before the count goes up.
    ///   If a concurrent rent claimed the frame for eviction first, the
    ///   call waits for the detach to land and rents afresh;
    /// - unbound: a frame is rented from the pool, which may evict a
    ///   parked frame belonging to another handle, and the prediction
    ///   parameters of the owning picture are latched into it.
    ///
    /// Fails with [`Error::OutOfFrames`](crate::Error::OutOfFrames) when
    /// the pool is exhausted; the handle is left unbound in that case.
    pub fn acquire(self: &Arc<Self>) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();

        loop {
            if let Some(frame) = shared.frame.clone() {
                if shared.locks > 0 {
                    shared.locks += 1;
                    return Ok(());
                }
                // Idle binding: the claim under the pool mutex is what
                // excludes a concurrent eviction of this frame; relock
                // asserts it was still FREEABLE once claimed.
                if self.pool.remove_from_freeable(&frame) {
                    frame.relock();
                    shared.locks += 1;
                    return Ok(());
                }
                // An eviction claimed the frame first and is blocked on
                // this mutex to detach us. Sleeping releases the mutex
                // so the detach can land; re-dispatch on the binding it
                // leaves behind.
                shared = self.activity.wait(shared).unwrap();
            } else {
                assert!(
                    shared.locks == 0,
                    "handle holds {} locks with no frame bound",
                    shared.locks
                );

                let frame = self.pool.get_free_frame()?;
                let picture = match self.picture.upgrade() {
                    Some(picture) => picture,
                    None => panic!("frame {}: handle outlived its picture", frame.index()),
                };
                frame.lock(
                    self,
                    picture.f_code_fv(),
                    picture.f_code_bv(),
                    picture.forward().cloned(),
                    picture.backward().cloned(),
                );
                shared.frame = Some(frame);
                shared.locks = 1;
                // Waiters parked in wait_rendered need to see the binding.
                self.activity.notify_all();
                return Ok(());
            }
        }
    }

    /// Drop one lock. On the last release the frame either parks as
    /// FREEABLE (rendered, binding retained for resurrection) or goes
    /// straight back to the free list (never rendered, binding cleared).
    pub fn release(&self) {
        let mut shared = self.shared.lock().unwrap();

        assert!(shared.locks > 0, "releasing a handle with no locks held");
        shared.locks -= 1;
        if shared.locks > 0 {
            return;
        }

        let frame = match shared.frame.clone() {
            Some(frame) => frame,
            None => panic!("handle reached zero locks with no frame bound"),
        };
        match frame.state() {
            FrameState::Rendered => {
                self.pool.make_freeable(&frame);
                frame.set_freeable();
            }
            FrameState::Locked => {
                self.pool.make_free(&frame);
                frame.free_locked();
                shared.frame = None;
            }
            other => panic!(
                "frame {}: released while {other}",
                frame.index()
            ),
        }
    }

    /// Block until this picture's raster is readable.
    ///
    /// Waits first for a frame to be bound (an `acquire` on some thread),
    /// then for that frame to reach RENDERED. The handle mutex stays held
    /// across the nested frame wait, so the binding cannot be cleared
    /// from under the waiter; only the frame mutex is released while
    /// sleeping on the frame's condvar.
    pub fn wait_rendered(&self) {
        let mut shared = self.shared.lock().unwrap();

        let frame = loop {
            if let Some(frame) = &shared.frame {
                break Arc::clone(frame);
            }
            shared = self.activity.wait(shared).unwrap();
        };

        frame.wait_rendered();
    }

    /// Like [`FrameHandle::wait_rendered`] but gives up after `timeout`,
    /// whether the wait was for a binding or for the render itself.
    pub fn wait_rendered_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.shared.lock().unwrap();

        let frame = loop {
            if let Some(frame) = &shared.frame {
                break Arc::clone(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::WaitTimeout);
            }
            let (guard, _) = self.activity.wait_timeout(shared, deadline - now).unwrap();
            shared = guard;
        };

        frame.wait_rendered_deadline(deadline)
    }

    /// Rebind the handle, normally to `None` when the pool evicts its
    /// parked frame. Only legal while idle.
    pub(crate) fn set_frame(&self, frame: Option<Arc<Frame>>) {
        let mut shared = self.shared.lock().unwrap();

        assert!(
            shared.locks == 0,
            "rebinding a handle with {} locks held",
            shared.locks
        );
        shared.frame = frame;
        self.activity.notify_all();
    }

    /// Currently bound frame, if any
    pub fn frame(&self) -> Option<Arc<Frame>> {
        self.shared.lock().unwrap().frame.clone()
    }

    /// Number of outstanding locks
    pub fn locks(&self) -> u32 {
        self.shared.lock().unwrap().locks
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        let shared = self.shared.lock().unwrap();
        if shared.locks != 0 && !std::thread::panicking() {
            panic!("handle dropped with {} locks outstanding", shared.locks);
        }
    }
}
