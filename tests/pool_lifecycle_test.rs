//! Frame pool lifecycle tests
//!
//! Single-threaded coverage of the rent / render / park / resurrect /
//! evict cycle, list-state coherence, and the failure paths.

use std::sync::Arc;
use std::time::Duration;

use parvid::decode::Picture;
use parvid::pool::{BufferPool, FrameState};
use parvid::Error;

mod common;
use common::*;

// ============================================================================
// Rent and return
// ============================================================================

#[test]
fn test_rent_render_release_parks_frame() {
    let pool = small_pool(2);
    let p1 = Picture::intra(&pool);

    p1.handle().acquire().unwrap();
    let frame = p1.handle().frame().unwrap();
    assert_eq!(frame.state(), FrameState::Locked);
    assert_eq!(p1.handle().locks(), 1);
    assert_eq!(pool.free_len(), 1);

    frame.set_rendered();
    assert_eq!(frame.state(), FrameState::Rendered);

    p1.handle().release();
    assert_eq!(p1.handle().locks(), 0);
    assert_eq!(frame.state(), FrameState::Freeable);
    assert_eq!(pool.freeable_len(), 1);
    assert!(pool.is_freeable(&frame));
    assert_eq!(pool.free_len(), 1);

    // The binding survives parking so a later acquire can resurrect.
    assert!(Arc::ptr_eq(&p1.handle().frame().unwrap(), &frame));
}

#[test]
fn test_unrendered_release_frees_frame() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);

    p1.handle().acquire().unwrap();
    let frame = p1.handle().frame().unwrap();
    p1.handle().release();

    assert_eq!(frame.state(), FrameState::Free);
    assert!(p1.handle().frame().is_none());
    assert_eq!(pool.free_len(), 1);
    assert!(pool.is_free(&frame));
    assert_eq!(pool.freeable_len(), 0);
}

#[test]
fn test_nested_locks_release_in_order() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);

    p1.handle().acquire().unwrap();
    let frame = acquire_rendered(&p1); // second lock on the same handle
    assert_eq!(p1.handle().locks(), 2);

    p1.handle().release();
    assert_eq!(p1.handle().locks(), 1);
    assert_eq!(frame.state(), FrameState::Rendered);
    assert_eq!(pool.freeable_len(), 0);

    p1.handle().release();
    assert_eq!(frame.state(), FrameState::Freeable);
    assert_eq!(pool.freeable_len(), 1);
}

// ============================================================================
// Resurrection
// ============================================================================

#[test]
fn test_resurrection_reuses_same_frame() {
    let pool = small_pool(2);
    let p1 = Picture::intra(&pool);
    let parked = park_rendered(&p1);

    p1.handle().acquire().unwrap();

    let frame = p1.handle().frame().unwrap();
    assert!(Arc::ptr_eq(&frame, &parked));
    assert_eq!(frame.state(), FrameState::Rendered);
    assert_eq!(pool.freeable_len(), 0);
    assert_eq!(p1.handle().locks(), 1);

    p1.handle().release();
    assert_eq!(frame.state(), FrameState::Freeable);
}

#[test]
fn test_resurrection_after_eviction_binds_fresh_frame() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);
    park_rendered(&p1);

    // Another picture steals the only frame.
    let p2 = Picture::intra(&pool);
    p2.handle().acquire().unwrap();
    assert!(p1.handle().frame().is_none());
    p2.handle().release();

    // p1's next acquire gets a frame again, freshly locked rather than
    // resurrected: the old raster is gone.
    p1.handle().acquire().unwrap();
    let frame = p1.handle().frame().unwrap();
    assert_eq!(frame.state(), FrameState::Locked);
    assert_eq!(p1.handle().locks(), 1);
    p1.handle().release();
}

// ============================================================================
// Eviction
// ============================================================================

#[test]
fn test_eviction_detaches_idle_handle() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);
    let parked = park_rendered(&p1);

    let p2 = Picture::intra(&pool);
    p2.handle().acquire().unwrap();

    let frame = p2.handle().frame().unwrap();
    assert!(Arc::ptr_eq(&frame, &parked));
    assert_eq!(frame.state(), FrameState::Locked);
    assert!(Arc::ptr_eq(&frame.handle().unwrap(), p2.handle()));
    assert!(p1.handle().frame().is_none());
    assert_eq!(pool.freeable_len(), 0);

    p2.handle().release();
}

#[test]
fn test_eviction_is_fifo_across_parked_frames() {
    let pool = small_pool(2);
    let p1 = Picture::intra(&pool);
    let p2 = Picture::intra(&pool);
    let first_parked = park_rendered(&p1);
    let second_parked = park_rendered(&p2);

    // Free list is empty; the next two rents must evict in park order.
    let p3 = Picture::intra(&pool);
    p3.handle().acquire().unwrap();
    assert!(Arc::ptr_eq(&p3.handle().frame().unwrap(), &first_parked));
    assert!(p1.handle().frame().is_none());
    assert!(p2.handle().frame().is_some());

    let p4 = Picture::intra(&pool);
    p4.handle().acquire().unwrap();
    assert!(Arc::ptr_eq(&p4.handle().frame().unwrap(), &second_parked));
    assert!(p2.handle().frame().is_none());

    p3.handle().release();
    p4.handle().release();
}

#[test]
fn test_out_of_frames_when_all_locked() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);
    p1.handle().acquire().unwrap();

    let p2 = Picture::intra(&pool);
    let result = p2.handle().acquire();
    assert!(matches!(result, Err(Error::OutOfFrames { num_frames: 1 })));
    assert!(p2.handle().frame().is_none());
    assert_eq!(p2.handle().locks(), 0);

    // The failed acquire must not have disturbed p1's rental.
    assert_eq!(p1.handle().locks(), 1);
    p1.handle().release();
}

// ============================================================================
// State / list coherence
// ============================================================================

/// Frames are free iff on the free list, freeable iff on the freeable
/// list, and on neither list iff rented out.
fn assert_coherent(pool: &BufferPool) {
    let mut rented = 0;
    for frame in pool.frames() {
        match frame.state() {
            FrameState::Free => {
                assert!(pool.is_free(frame), "free frame off the free list");
                assert!(!pool.is_freeable(frame));
            }
            FrameState::Freeable => {
                assert!(pool.is_freeable(frame), "freeable frame off the freeable list");
                assert!(!pool.is_free(frame));
            }
            FrameState::Locked | FrameState::Rendered => {
                assert!(!pool.is_free(frame));
                assert!(!pool.is_freeable(frame));
                rented += 1;
            }
        }
    }
    assert_eq!(
        pool.free_len() + pool.freeable_len() + rented,
        pool.num_frames()
    );
    assert!(rented <= pool.num_frames());
}

#[test]
fn test_lists_and_states_stay_coherent() {
    let pool = small_pool(3);
    assert_coherent(&pool);

    let p1 = Picture::intra(&pool);
    let p2 = Picture::intra(&pool);
    let p3 = Picture::intra(&pool);

    p1.handle().acquire().unwrap();
    assert_coherent(&pool);

    acquire_rendered(&p2);
    assert_coherent(&pool);

    p2.handle().release();
    assert_coherent(&pool);

    p3.handle().acquire().unwrap();
    acquire_rendered(&p3);
    assert_coherent(&pool);

    p1.handle().release();
    p3.handle().release();
    p3.handle().release();
    assert_coherent(&pool);

    assert_eq!(pool.free_len() + pool.freeable_len(), 3);
    assert_eq!(pool.stats().in_use, 0);
}

#[test]
fn test_locked_frame_points_back_at_its_handle() {
    let pool = small_pool(2);
    let p1 = Picture::intra(&pool);

    p1.handle().acquire().unwrap();
    let frame = p1.handle().frame().unwrap();
    assert!(Arc::ptr_eq(&frame.handle().unwrap(), p1.handle()));

    frame.set_rendered();
    assert!(Arc::ptr_eq(&frame.handle().unwrap(), p1.handle()));
    p1.handle().release();
}

// ============================================================================
// Raster access and slice rows
// ============================================================================

#[test]
fn test_raster_roundtrip_through_pool() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);
    p1.handle().acquire().unwrap();
    let frame = p1.handle().frame().unwrap();

    {
        let mut pixels = frame.pixels_mut();
        pixels[0] = 0x10; // first luma sample
        let y_len = frame.y_plane_len();
        pixels[y_len] = 0x80; // first Cb sample
    }
    frame.set_rendered();

    p1.handle().wait_rendered();
    let pixels = frame.pixels();
    assert_eq!(pixels[0], 0x10);
    assert_eq!(pixels[frame.y_plane_len()], 0x80);
    drop(pixels);

    p1.handle().release();
}

#[test]
fn test_slice_rows_latch_prediction_state() {
    let pool = small_pool(3);
    let past = Picture::intra(&pool);
    let future = Picture::predicted(&pool, 2, Arc::clone(&past));
    let b = Picture::bidirectional(&pool, 3, 4, Arc::clone(&past), Arc::clone(&future));

    b.handle().acquire().unwrap();
    let frame = b.handle().frame().unwrap();

    for mb_row in 0..frame.mb_height() {
        let row = frame.slice_row(mb_row as usize).lock().unwrap();
        assert_eq!(row.row(), mb_row);
        assert_eq!(row.f_code_fv(), 3);
        assert_eq!(row.f_code_bv(), 4);
        assert!(Arc::ptr_eq(row.forward().unwrap(), &past));
        assert!(Arc::ptr_eq(row.backward().unwrap(), &future));
    }

    b.handle().release();
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_wait_rendered_timeout_on_unbound_handle() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);

    let result = p1.handle().wait_rendered_timeout(Duration::from_millis(20));
    assert!(matches!(result, Err(Error::WaitTimeout)));
}

#[test]
#[should_panic(expected = "locks outstanding")]
fn test_dropping_locked_handle_panics() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);
    p1.handle().acquire().unwrap();
    drop(p1);
}

#[test]
#[should_panic(expected = "no locks held")]
fn test_release_without_acquire_panics() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);
    p1.handle().release();
}

// ============================================================================
// Stats
// ============================================================================

#[test]
fn test_stats_follow_the_lifecycle() {
    let pool = small_pool(1);
    let p1 = Picture::intra(&pool);

    park_rendered(&p1); // rent
    p1.handle().acquire().unwrap(); // resurrect
    p1.handle().release();

    let p2 = Picture::intra(&pool);
    p2.handle().acquire().unwrap(); // rent, evicting p1's parked frame
    let _ = Picture::intra(&pool).handle().acquire(); // exhaustion
    p2.handle().release();

    let stats = pool.stats();
    assert_eq!(stats.rents, 2);
    assert_eq!(stats.resurrections, 1);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.exhaustions, 1);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.peak_in_use, 1);
    assert_eq!(stats.total_binds(), 3);
}
