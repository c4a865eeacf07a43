//! Decoded picture state and its frame binding
//!
//! One `Picture` per coded picture in the stream. The picture carries the
//! prediction parameters the slice decoder latches into a frame at lock
//! time, references to the pictures it predicts from, and exactly one
//! [`FrameHandle`] through which its raster is rented.

use std::fmt;
use std::sync::Arc;

use crate::pool::{BufferPool, FrameHandle};

/// Picture coding type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    /// Intra coded, no prediction references
    I,
    /// Forward predicted
    P,
    /// Bidirectionally predicted
    B,
}

impl PictureType {
    /// Can later pictures predict from this one?
    pub fn is_reference(&self) -> bool {
        matches!(self, PictureType::I | PictureType::P)
    }
}

impl fmt::Display for PictureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PictureType::I => write!(f, "I"),
            PictureType::P => write!(f, "P"),
            PictureType::B => write!(f, "B"),
        }
    }
}

/// One decoded picture's worth of bitstream state
///
/// Owns its frame handle; the handle holds only a non-owning
/// back-reference, so picture and handle form no ownership cycle.
/// Forward and backward references keep the predicted-from pictures
/// alive for as long as this picture exists.
pub struct Picture {
    pict_type: PictureType,
    f_code_fv: i32,
    f_code_bv: i32,
    forward: Option<Arc<Picture>>,
    backward: Option<Arc<Picture>>,
    handle: Arc<FrameHandle>,
}

impl Picture {
    /// Create a picture with explicit prediction state.
    pub fn new(
        pool: &Arc<BufferPool>,
        pict_type: PictureType,
        f_code_fv: i32,
        f_code_bv: i32,
        forward: Option<Arc<Picture>>,
        backward: Option<Arc<Picture>>,
    ) -> Arc<Picture> {
        Arc::new_cyclic(|weak| Picture {
            pict_type,
            f_code_fv,
            f_code_bv,
            forward,
            backward,
            handle: FrameHandle::new(Arc::clone(pool), weak.clone()),
        })
    }

    /// Create an intra picture: no references, no motion vectors.
    pub fn intra(pool: &Arc<BufferPool>) -> Arc<Picture> {
        Self::new(pool, PictureType::I, 0, 0, None, None)
    }

    /// Create a forward-predicted picture.
    pub fn predicted(
        pool: &Arc<BufferPool>,
        f_code_fv: i32,
        forward: Arc<Picture>,
    ) -> Arc<Picture> {
        Self::new(pool, PictureType::P, f_code_fv, 0, Some(forward), None)
    }

    /// Create a bidirectionally-predicted picture.
    pub fn bidirectional(
        pool: &Arc<BufferPool>,
        f_code_fv: i32,
        f_code_bv: i32,
        forward: Arc<Picture>,
        backward: Arc<Picture>,
    ) -> Arc<Picture> {
        Self::new(
            pool,
            PictureType::B,
            f_code_fv,
            f_code_bv,
            Some(forward),
            Some(backward),
        )
    }

    /// Coding type
    pub fn pict_type(&self) -> PictureType {
        self.pict_type
    }

    /// Forward motion-vector range code
    pub fn f_code_fv(&self) -> i32 {
        self.f_code_fv
    }

    /// Backward motion-vector range code
    pub fn f_code_bv(&self) -> i32 {
        self.f_code_bv
    }

    /// Forward prediction reference
    pub fn forward(&self) -> Option<&Arc<Picture>> {
        self.forward.as_ref()
    }

    /// Backward prediction reference
    pub fn backward(&self) -> Option<&Arc<Picture>> {
        self.backward.as_ref()
    }

    /// The handle through which this picture's raster is rented
    pub fn handle(&self) -> &Arc<FrameHandle> {
        &self.handle
    }
}

impl fmt::Debug for Picture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Picture")
            .field("pict_type", &self.pict_type)
            .field("f_code_fv", &self.f_code_fv)
            .field("f_code_bv", &self.f_code_bv)
            .finish()
    }
}
