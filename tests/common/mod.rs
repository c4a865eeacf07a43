//! Common test utilities for parvid integration tests

use std::sync::Arc;

use parvid::decode::Picture;
use parvid::pool::{BufferPool, Frame};

/// Create a pool of `num_frames` 32x32 px frames (2x2 macroblocks).
pub fn small_pool(num_frames: usize) -> Arc<BufferPool> {
    BufferPool::new(num_frames, 2, 2).expect("pool construction")
}

/// Acquire a frame for `picture` and mark it rendered, leaving one lock
/// outstanding. Returns the bound frame.
pub fn acquire_rendered(picture: &Arc<Picture>) -> Arc<Frame> {
    picture.handle().acquire().expect("acquire");
    let frame = picture.handle().frame().expect("frame bound");
    frame.set_rendered();
    frame
}

/// Acquire, render and release, leaving the picture's frame parked on
/// the freeable list. Returns the (still bound) frame.
pub fn park_rendered(picture: &Arc<Picture>) -> Arc<Frame> {
    let frame = acquire_rendered(picture);
    picture.handle().release();
    frame
}
