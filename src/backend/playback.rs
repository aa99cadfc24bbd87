//! cpal output backend
//!
//! The platform pulls samples on its own real-time callback thread; this
//! backend bridges that pull model to the engine's push loop with a pair of
//! bounded channels that circulate the period buffers. The device callback
//! only copies samples and never invokes the producer, keeping caller code
//! off the real-time thread; a spent period handed back on the free channel
//! is the buffer-end notification that wakes the engine worker to refill and
//! resubmit it. The same periods go back and forth for the life of the
//! stream, so the steady state allocates nothing.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::device::{default_output_device, get_output_device, OutputDevice};
use crate::constants::{FRAMES_PER_PERIOD, PERIOD_BUFFERS};
use crate::driver::{DeviceDriver, DriverSetup, SpaceEvent};
use crate::error::{AudioError, Result};

/// Setup for playback through a cpal output device
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    /// Play through the system default output device
    pub fn default_device() -> Self {
        Self { device_name: None }
    }

    /// Play through a specific output device, resolved by name at open time
    pub fn device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    fn resolve(&self) -> Result<OutputDevice> {
        match &self.device_name {
            Some(name) => get_output_device(name),
            None => default_output_device(),
        }
    }
}

impl DriverSetup for CpalOutput {
    type Driver = CpalDriver;

    fn supports_rate(&self, rate: u32) -> bool {
        // Device resolution failures are deferred to open(), where they
        // surface as DeviceAcquisition instead of an unsupported rate.
        match self.resolve() {
            Ok(device) => device.supports_rate(rate),
            Err(_) => true,
        }
    }

    fn open(self, sample_rate: u32) -> Result<CpalDriver> {
        let device = self.resolve()?;
        let sample_format = device
            .inner()
            .default_output_config()
            .map_err(|e| AudioError::DeviceAcquisition(e.to_string()))?
            .sample_format();
        let device = device.into_inner();

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (filled_tx, filled_rx) = bounded::<Box<[i16]>>(PERIOD_BUFFERS);
        let (free_tx, free_rx) = bounded::<Box<[i16]>>(PERIOD_BUFFERS);
        for _ in 0..PERIOD_BUFFERS {
            free_tx
                .send(vec![0i16; FRAMES_PER_PERIOD * 2].into_boxed_slice())
                .map_err(|_| {
                    AudioError::DeviceAcquisition("period transport setup failed".to_string())
                })?;
        }

        let starved = Arc::new(AtomicBool::new(false));
        let mut feed = CallbackFeed {
            filled_rx,
            free_tx,
            current: None,
            offset: 0,
            starved: starved.clone(),
        };

        let err_fn = |err: cpal::StreamError| tracing::error!("output stream error: {err}");
        let stream = match sample_format {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| feed.fill_i16(data),
                err_fn,
                None,
            ),
            // Anything else goes through the float path; the device converts
            // or rejects it.
            _ => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.fill_f32(data),
                err_fn,
                None,
            ),
        }
        .map_err(|e| AudioError::DeviceAcquisition(e.to_string()))?;

        Ok(CpalDriver {
            stream,
            filled_tx,
            free_rx,
            pending: None,
            starved,
        })
    }
}

/// Consumer side of the period transport, owned by the device callback
struct CallbackFeed {
    filled_rx: Receiver<Box<[i16]>>,
    free_tx: Sender<Box<[i16]>>,
    /// Period currently being consumed, with the read offset into it. The
    /// platform's callback sizes do not line up with our period length.
    current: Option<Box<[i16]>>,
    offset: usize,
    starved: Arc<AtomicBool>,
}

impl CallbackFeed {
    fn next_sample(&mut self) -> Option<i16> {
        loop {
            if let Some(buffer) = &self.current {
                if self.offset < buffer.len() {
                    let sample = buffer[self.offset];
                    self.offset += 1;
                    return Some(sample);
                }
                // Period consumed: hand it back to the engine worker.
                if let Some(spent) = self.current.take() {
                    let _ = self.free_tx.try_send(spent);
                }
                self.offset = 0;
            }
            match self.filled_rx.try_recv() {
                Ok(buffer) => self.current = Some(buffer),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    self.starved.store(true, Ordering::Release);
                    return None;
                }
            }
        }
    }

    fn fill_i16(&mut self, data: &mut [i16]) {
        for slot in data.iter_mut() {
            *slot = self.next_sample().unwrap_or(0);
        }
    }

    fn fill_f32(&mut self, data: &mut [f32]) {
        for slot in data.iter_mut() {
            *slot = self
                .next_sample()
                .map(|s| f32::from(s) / 32768.0)
                .unwrap_or(0.0);
        }
    }
}

/// Driver half of the cpal bridge, living on the engine worker thread
pub struct CpalDriver {
    stream: cpal::Stream,
    filled_tx: Sender<Box<[i16]>>,
    free_rx: Receiver<Box<[i16]>>,
    /// Free period claimed by wait_for_space, consumed by the next submit
    pending: Option<Box<[i16]>>,
    starved: Arc<AtomicBool>,
}

impl DeviceDriver for CpalDriver {
    fn wait_for_space(&mut self, timeout: Duration) -> Result<SpaceEvent> {
        if self.starved.swap(false, Ordering::AcqRel) {
            return Ok(SpaceEvent::Starved);
        }
        if self.pending.is_some() {
            return Ok(SpaceEvent::Ready);
        }
        match self.free_rx.recv_timeout(timeout) {
            Ok(buffer) => {
                self.pending = Some(buffer);
                Ok(SpaceEvent::Ready)
            }
            Err(RecvTimeoutError::Timeout) => Ok(SpaceEvent::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(AudioError::DeviceLost(
                "output callback dropped its buffers".to_string(),
            )),
        }
    }

    fn submit(&mut self, samples: &[i16]) -> Result<()> {
        let mut buffer = self.pending.take().ok_or_else(|| {
            AudioError::DeviceLost("submit without a free period".to_string())
        })?;
        buffer.copy_from_slice(samples);
        match self.filled_tx.try_send(buffer) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => Err(
                AudioError::DeviceLost("output stream stopped accepting periods".to_string()),
            ),
        }
    }

    fn recover(&mut self) -> Result<()> {
        // The callback plays silence while starved and resumes on the next
        // filled period; there is no device state to re-prepare.
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::DeviceAcquisition(e.to_string()))
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        let _ = self.stream.pause();
    }
}
