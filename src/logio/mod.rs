//! On-disk frame log: record a live session, replay it later.
//!
//! Each record is `kind: u8`, `timestamp: f64`, `pose: [f32; 16]`
//! (column-major), `len: u32` and `len` bytes of JPEG, all little-endian.

pub mod reader;
pub mod writer;

pub use reader::LogPlayback;
pub use writer::{FrameLogWriter, Recording};

pub(crate) const FRAME_RECORD: u8 = 1;
pub(crate) const JPEG_QUALITY: i32 = 90;
