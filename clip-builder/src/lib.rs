//! Clip extraction for the capture engine.
//!
//! Produces a standalone MP4 from a run of CMAF segments by stream-copy
//! concatenation (init segment + media segments through ffmpeg's concat
//! demuxer, `-c copy`, no re-encode), with an optional second copy pass that
//! trims the head and tail down to the requested wall-clock window.
//!
//! Builds are serialized per channel and never leave a partial file at the
//! final clip path: all work happens on intermediate names and the finished
//! clip is moved into place with a rename.

pub mod builder;
pub mod error;

pub use builder::{ClipBuilder, ClipResult};
pub use error::ClipError;
