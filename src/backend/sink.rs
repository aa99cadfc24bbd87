//! Wall-clock paced sink backend
//!
//! Models the kernel-blocking device family without hardware: the sink
//! "plays" periods at real-time rate and `wait_for_space` blocks until the
//! modeled device buffer has room for one more, exactly like a blocking PCM
//! write loop. Periods can be rendered to a WAV file or discarded, which
//! makes the sink useful for headless rendering and for exercising a full
//! stream without an audio device.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::{FRAMES_PER_PERIOD, PERIOD_BUFFERS, STANDARD_SAMPLE_RATES};
use crate::driver::{DeviceDriver, DriverSetup, SpaceEvent};
use crate::error::{AudioError, Result};

enum SinkTarget {
    Discard,
    Wav(PathBuf),
}

/// Setup for the paced sink.
///
/// A render target must be supplied before the stream opens: construct with
/// [`PacedSink::discard`] or [`PacedSink::to_wav`]. A sink left unconfigured
/// (via [`PacedSink::new`]) fails `open` with `MissingPrerequisite`.
pub struct PacedSink {
    target: Option<SinkTarget>,
}

impl PacedSink {
    /// Unconfigured sink; a target must still be chosen
    pub fn new() -> Self {
        Self { target: None }
    }

    /// Play periods at real-time rate and discard the samples
    pub fn discard() -> Self {
        Self {
            target: Some(SinkTarget::Discard),
        }
    }

    /// Render played periods to a 16-bit stereo WAV file
    pub fn to_wav(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Some(SinkTarget::Wav(path.into())),
        }
    }
}

impl Default for PacedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverSetup for PacedSink {
    type Driver = SinkDriver;

    fn supports_rate(&self, rate: u32) -> bool {
        STANDARD_SAMPLE_RATES.contains(&rate)
    }

    fn open(self, sample_rate: u32) -> Result<SinkDriver> {
        let target = self.target.ok_or_else(|| {
            AudioError::MissingPrerequisite(
                "paced sink has no render target; use discard() or to_wav()".to_string(),
            )
        })?;

        let writer = match target {
            SinkTarget::Discard => None,
            SinkTarget::Wav(path) => {
                let spec = WavSpec {
                    channels: 2,
                    sample_rate,
                    bits_per_sample: 16,
                    sample_format: SampleFormat::Int,
                };
                Some(
                    WavWriter::create(&path, spec)
                        .map_err(|e| AudioError::DeviceAcquisition(e.to_string()))?,
                )
            }
        };

        let period = Duration::from_secs_f64(FRAMES_PER_PERIOD as f64 / f64::from(sample_rate));
        Ok(SinkDriver {
            writer,
            period,
            capacity: period * PERIOD_BUFFERS as u32,
            queued: Duration::ZERO,
            last_update: Instant::now(),
            state: PcmState::Prepared,
            consuming: false,
        })
    }
}

#[derive(PartialEq, Eq)]
enum PcmState {
    /// (Re-)prepared; consumption starts once a period is queued
    Prepared,
    Running,
    Underrun,
}

/// Blocking-write driver over a modeled N-period device buffer
pub struct SinkDriver {
    writer: Option<WavWriter<BufWriter<File>>>,
    /// Duration of one period at the stream rate
    period: Duration,
    /// Modeled device buffer size
    capacity: Duration,
    /// Audio queued but not yet drained by the clock
    queued: Duration,
    last_update: Instant,
    state: PcmState,
    consuming: bool,
}

impl SinkDriver {
    fn drain(&mut self) {
        let now = Instant::now();
        let elapsed = now - self.last_update;
        self.last_update = now;
        self.queued = self.queued.saturating_sub(elapsed);
    }
}

impl DeviceDriver for SinkDriver {
    fn wait_for_space(&mut self, timeout: Duration) -> Result<SpaceEvent> {
        if self.consuming {
            match self.state {
                PcmState::Prepared => {
                    if !self.queued.is_zero() {
                        self.state = PcmState::Running;
                        self.last_update = Instant::now();
                    }
                }
                PcmState::Running => {
                    self.drain();
                    if self.queued.is_zero() {
                        // The caller fell behind real time.
                        self.state = PcmState::Underrun;
                        return Ok(SpaceEvent::Starved);
                    }
                }
                PcmState::Underrun => return Ok(SpaceEvent::Starved),
            }
        }

        let free = self.capacity.saturating_sub(self.queued);
        if free >= self.period {
            return Ok(SpaceEvent::Ready);
        }

        // Sleep until the clock has drained one period's worth of room.
        let wait = self.period - free;
        if wait > timeout {
            thread::sleep(timeout);
            return Ok(SpaceEvent::TimedOut);
        }
        thread::sleep(wait);
        if self.state == PcmState::Running {
            self.drain();
        }
        Ok(SpaceEvent::Ready)
    }

    fn submit(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| AudioError::DeviceLost(e.to_string()))?;
            }
        }
        self.queued += self.period;
        Ok(())
    }

    fn recover(&mut self) -> Result<()> {
        self.queued = Duration::ZERO;
        self.state = PcmState::Prepared;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.consuming = true;
        self.last_update = Instant::now();
        Ok(())
    }
}

impl Drop for SinkDriver {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                tracing::error!("failed to finalize wav render: {e}");
            }
        }
    }
}
