//! Capture engine: channels and their supervisor.
//!
//! A [`Channel`] binds one encoder subprocess, one segment ring buffer and
//! one boundary tracker into an independent capture pipeline, and exposes the
//! clip, boundary, playlist and status operations the control surface needs.
//! The [`Supervisor`] owns N channels, starts and stops them together and
//! answers aggregate health queries. Channels never hold a reference back to
//! the supervisor.

pub mod channel;
pub mod config;
pub mod error;
pub mod playlist;
pub mod supervisor;

pub use channel::{BoundaryClipOutcome, Channel, ChannelStatus};
pub use config::{CaptureConfig, ChannelConfig, ConfigError};
pub use error::EngineError;
pub use supervisor::Supervisor;
