//! # Playout
//!
//! Low-latency, callback-driven stereo playback: supply a producer that
//! fills interleaved stereo periods on demand, and the engine drives a
//! device backend that consumes them in real time without glitches.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     caller's thread                          │
//! │  OutputStream::open ──► validate rate ──► prime pool ──┐     │
//! │  OutputStream::close ◄────────── join ◄──────────────┐ │     │
//! └──────────────────────────────────────────────────────┼─┼─────┘
//!                                              one-shot  │ │ spawn
//! ┌──────────────────────────────────────────────────────┼─▼─────┐
//! │                  playback worker (engine)            │       │
//! │   acquire device ─► queue primed periods ─► ready ───┘       │
//! │   loop: wait_for_space ─► producer.fill ─► submit            │
//! └──────────────────────────────▲───────────────────────────────┘
//!                                │ DeviceDriver
//!            ┌───────────────────┴──────────────────┐
//!            │                                      │
//!     CpalOutput (hardware,                  PacedSink (wall-clock
//!     buffer-queue bridge)                   blocking-write model)
//! ```
//!
//! One engine loop serves every backend; the platform differences live
//! behind the [`driver::DeviceDriver`] capability. Buffers rotate in fixed
//! order through the pool, the producer is never invoked concurrently with
//! itself, and `open`/`close` block until the outcome is certain.
//!
//! ## Example
//!
//! ```no_run
//! use playout::backend::CpalOutput;
//! use playout::{FloatProducer, OutputStream};
//!
//! let mut angle = 0.0f32;
//! let producer = FloatProducer::new(move |samples: &mut [f32], _frames: usize| {
//!     for frame in samples.chunks_mut(2) {
//!         let value = angle.sin();
//!         frame[0] = value;
//!         frame[1] = value;
//!         angle += 2.0 * std::f32::consts::PI * 440.0 / 44_100.0;
//!     }
//! });
//!
//! let stream = OutputStream::open(CpalOutput::default_device(), 44_100, producer)?;
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! stream.close();
//! # Ok::<(), playout::AudioError>(())
//! ```

pub mod backend;
pub mod driver;
pub mod error;
pub mod pool;
pub mod producer;
pub mod stream;

pub use error::{AudioError, Result};
pub use producer::{FloatProducer, SampleProducer};
pub use stream::OutputStream;

/// Engine-wide constants
pub mod constants {
    use std::time::Duration;

    /// Frames the producer fills per invocation
    pub const FRAMES_PER_PERIOD: usize = 2048;

    /// Interleaved output channels (fixed stereo contract)
    pub const CHANNELS: usize = 2;

    /// Period buffers kept in rotation per stream
    pub const PERIOD_BUFFERS: usize = 2;

    /// Bounded wait for device readiness on each engine cycle
    pub const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Consecutive timed-out waits before the stream is declared stalled
    pub const MAX_WAIT_TIMEOUTS: u32 = 3;

    /// Sample rates accepted by backends without their own device query
    pub const STANDARD_SAMPLE_RATES: &[u32] = &[
        8_000, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 88_200, 96_000, 176_400, 192_000,
    ];
}
