//! Decode-side collaborators of the frame pool

pub mod picture;

pub use picture::{Picture, PictureType};
