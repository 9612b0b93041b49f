//! Segment ring buffer for the capture engine.
//!
//! Indexes CMAF media segments by sequence number and wall-clock time,
//! enforces a bounded retention window on disk, and survives process
//! restarts by persisting a JSON index next to the segment files.
//!
//! Layered in two pieces:
//!
//! - [`SegmentStore`]: the durable layout and index. Synchronous, no
//!   locking of its own.
//! - [`RingBuffer`]: wraps the store with a reader-writer lock, segment and
//!   open-boundary callbacks, the periodic eviction loop, and opportunistic
//!   index persistence.
//!
//! Open boundaries ("in-progress clips") are tracked by [`BoundaryTracker`]:
//! every segment admitted while a boundary is open is recorded against it,
//! and closing the boundary returns the captured sequence list.

pub mod buffer;
pub mod error;
pub mod segment;
pub mod store;
pub mod tracker;

pub use buffer::{BufferConfig, BufferStatus, RingBuffer};
pub use error::StoreError;
pub use segment::{Segment, SegmentIndex};
pub use store::SegmentStore;
pub use tracker::{BoundaryError, BoundaryTracker, ClosedBoundary};
