// Pixel pipeline: format decode, geometry, signal detection.

pub mod convert;
pub mod decoder;
pub mod signal;
pub mod transform;
