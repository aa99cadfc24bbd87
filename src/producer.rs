//! Sample producer contract and format conversion
//!
//! The producer is the only caller-supplied code the engine ever runs. It is
//! invoked once per buffer period, always from the stream's playback thread
//! (never the caller's control thread once the stream is running), and never
//! concurrently with itself.

/// Producer of interleaved stereo samples.
///
/// `fill` must write exactly `frames` stereo frames, i.e. `frames * 2`
/// samples, into `samples`. It must not block indefinitely: every invocation
/// stands between the device and its next period.
pub trait SampleProducer: Send + 'static {
    fn fill(&mut self, samples: &mut [i16], frames: usize);
}

impl<F> SampleProducer for F
where
    F: FnMut(&mut [i16], usize) + Send + 'static,
{
    fn fill(&mut self, samples: &mut [i16], frames: usize) {
        self(samples, frames)
    }
}

/// Adapter for producers that emit normalized floating-point samples (±1.0).
///
/// Conversion to the fixed-point wire format happens here, at the boundary:
/// each sample is scaled by 32768 and clamped to the 16-bit signed range.
/// The clamp saturates, it never wraps.
pub struct FloatProducer<F> {
    inner: F,
    /// Scratch buffer (reused to avoid allocations)
    scratch: Vec<f32>,
}

impl<F> FloatProducer<F>
where
    F: FnMut(&mut [f32], usize) + Send + 'static,
{
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
        }
    }
}

impl<F> SampleProducer for FloatProducer<F>
where
    F: FnMut(&mut [f32], usize) + Send + 'static,
{
    fn fill(&mut self, samples: &mut [i16], frames: usize) {
        self.scratch.resize(samples.len(), 0.0);
        (self.inner)(&mut self.scratch, frames);
        for (dst, src) in samples.iter_mut().zip(&self.scratch) {
            *dst = saturate_to_i16(*src);
        }
    }
}

/// Scale a normalized sample by 32768 and saturate to the i16 range.
#[inline]
pub fn saturate_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
