//! Fixed ring of period buffers rotated between producer and device
//!
//! Ownership of a buffer transfers exclusively and sequentially: pool →
//! device queue → pool. Exactly one buffer is being filled at any time, so
//! the sample data itself needs no locking.

use crate::producer::SampleProducer;

/// Small fixed set of interleaved stereo period buffers, recycled in strict
/// rotation order 0, 1, .., N-1, 0, ..
pub struct BufferPool {
    buffers: Vec<Box<[i16]>>,
    frames: usize,
    next: usize,
    /// Buffers still holding their priming fill
    primed: usize,
}

impl BufferPool {
    /// Create a pool of `count` buffers of `frames` stereo frames each
    pub fn new(count: usize, frames: usize) -> Self {
        assert!(count >= 2, "pool needs at least two buffers");
        let buffers = (0..count)
            .map(|_| vec![0i16; frames * 2].into_boxed_slice())
            .collect();
        Self {
            buffers,
            frames,
            next: 0,
            primed: 0,
        }
    }

    /// Fill every buffer once, so playback never starts from silence or
    /// uninitialized periods. Runs on the caller's thread during stream open.
    pub fn prime(&mut self, producer: &mut dyn SampleProducer) {
        for buffer in &mut self.buffers {
            producer.fill(buffer, self.frames);
        }
        self.primed = self.buffers.len();
    }

    /// Hand out the next buffer in rotation, refilled by the producer unless
    /// it still holds its priming period.
    pub fn next_period(&mut self, producer: &mut dyn SampleProducer) -> &[i16] {
        let index = self.next;
        self.next = (self.next + 1) % self.buffers.len();
        if self.primed > 0 {
            self.primed -= 1;
        } else {
            producer.fill(&mut self.buffers[index], self.frames);
        }
        &self.buffers[index]
    }

    /// Number of buffers in the rotation
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Frames per period buffer
    pub fn frames(&self) -> usize {
        self.frames
    }
}
