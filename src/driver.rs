//! Device driver capability implemented by every backend
//!
//! The three platform synchronization shapes (kernel-blocking write loops,
//! event-driven buffer queues, asynchronous voice callbacks) are unified
//! behind this one interface. The playback engine drives it from a single
//! worker thread: wait for space, submit a filled period, recover transient
//! underruns. Teardown happens in `Drop`, on the same thread.

use std::time::Duration;

use crate::error::Result;

/// Outcome of waiting for the device to accept another period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceEvent {
    /// The device can take one more period buffer
    Ready,
    /// The device ran dry; a transient condition, recovered in place
    Starved,
    /// The bounded wait elapsed with no progress
    TimedOut,
}

/// One period-submission cycle of a platform device.
///
/// Implementations are created, driven and dropped on the engine's worker
/// thread, so they may own handles that cannot leave it.
pub trait DeviceDriver {
    /// Block until the device can accept another period, reports an
    /// underrun, or `timeout` elapses.
    fn wait_for_space(&mut self, timeout: Duration) -> Result<SpaceEvent>;

    /// Queue one filled period of interleaved stereo samples. Only called
    /// after `wait_for_space` returned [`SpaceEvent::Ready`].
    fn submit(&mut self, samples: &[i16]) -> Result<()>;

    /// Re-prepare the device after a transient underrun, without tearing the
    /// stream down.
    fn recover(&mut self) -> Result<()>;

    /// Begin consuming queued periods. Called once, after the primed periods
    /// have been submitted.
    fn start(&mut self) -> Result<()>;
}

/// Backend factory split across threads: rate validation runs on the
/// caller's thread, device acquisition on the engine's worker thread.
pub trait DriverSetup: Send + 'static {
    type Driver: DeviceDriver;

    /// Whether the backend can drive the device at `rate` Hz.
    fn supports_rate(&self, rate: u32) -> bool;

    /// Acquire and configure the device.
    fn open(self, sample_rate: u32) -> Result<Self::Driver>;
}
