//! `arsync-middleware` – the telemetry path.
//!
//! Carries raw device telemetry from ingest to subscribers: each AR session
//! gets one [`UpdateStream`] that converts positions into the world frame,
//! smooths and batches them, and fans the batches out.
//!
//! # Modules
//!
//! - [`buffer`] – [`UpdateBuffer`]: size- or time-triggered batching.
//! - [`interpolator`] – [`Interpolator`]: fills gaps inside a batch and
//!   answers "where was the device at time t".
//! - [`predictor`] – [`Predictor`]: dead-reckoning extrapolation.
//! - [`subscriber`] – the [`Subscriber`] contract plus bounded per-subscriber
//!   delivery queues.
//! - [`stream`] – [`UpdateStream`]: the per-session pipeline and its
//!   periodic flush task.
//! - [`manager`] – [`StreamManager`]: session → stream registry and
//!   device-level broadcast.

pub mod buffer;
pub mod interpolator;
pub mod manager;
pub mod predictor;
pub mod stream;
pub mod subscriber;

pub use buffer::UpdateBuffer;
pub use interpolator::Interpolator;
pub use manager::StreamManager;
pub use predictor::Predictor;
pub use stream::{StreamConfig, StreamStats, UpdateStream};
pub use subscriber::{ChannelSubscriber, Subscriber};
