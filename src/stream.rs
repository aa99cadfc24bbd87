//! Playback stream lifecycle and the shared engine loop
//!
//! Every backend is driven by the same worker loop. The caller's thread is
//! only used to open and close the stream, and blocks during both until the
//! outcome is certain: `open` waits on a one-shot channel for the worker to
//! confirm the device is ready, `close` joins the worker so the device is
//! closed before it returns. In between, the worker is self-sustaining:
//! wait for space, fill the next pool buffer, submit, repeat.

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::constants::{FRAMES_PER_PERIOD, MAX_WAIT_TIMEOUTS, PERIOD_BUFFERS, WAIT_TIMEOUT};
use crate::driver::{DeviceDriver, DriverSetup, SpaceEvent};
use crate::error::{AudioError, Result};
use crate::pool::BufferPool;
use crate::producer::SampleProducer;

/// State shared between the stream handle and its worker
struct Shared {
    /// Raised by `close`; observed by the worker with acquire ordering
    shutdown: AtomicBool,
    running: AtomicBool,
    /// Most recent steady-state failure, last write wins
    error: Mutex<Option<AudioError>>,
}

impl Shared {
    fn record_error(&self, error: AudioError) {
        *self.error.lock() = Some(error);
    }
}

/// Handle to an active playback stream
///
/// Created by [`OutputStream::open`]. Playback runs on a dedicated worker
/// thread until [`OutputStream::close`] is called or the handle is dropped;
/// both block until the worker has exited and the device is released.
pub struct OutputStream {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl OutputStream {
    /// Open the device, prime the buffer pool and start playback.
    ///
    /// The sample rate is validated against the backend before anything else
    /// happens. The pool is then primed by invoking the producer once per
    /// buffer on the calling thread, and the worker is spawned to acquire
    /// the device, queue the primed periods and start consumption. `open`
    /// blocks until the worker reports the device ready, so `Ok` means audio
    /// is flowing and `Err` means every partially acquired resource has been
    /// released.
    pub fn open<S>(setup: S, sample_rate: u32, producer: impl SampleProducer) -> Result<Self>
    where
        S: DriverSetup,
    {
        if !setup.supports_rate(sample_rate) {
            return Err(AudioError::UnsupportedRate(sample_rate));
        }

        let mut producer: Box<dyn SampleProducer> = Box::new(producer);
        let mut pool = BufferPool::new(PERIOD_BUFFERS, FRAMES_PER_PERIOD);
        pool.prime(producer.as_mut());

        let shared = Arc::new(Shared {
            shutdown: AtomicBool::new(false),
            running: AtomicBool::new(false),
            error: Mutex::new(None),
        });

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let mut driver = match setup.open(sample_rate) {
                    Ok(driver) => driver,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = queue_primed(&mut driver, &mut pool, producer.as_mut()) {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                if let Err(e) = driver.start() {
                    let _ = ready_tx.send(Err(e));
                    return;
                }

                worker_shared.running.store(true, Ordering::Release);
                let _ = ready_tx.send(Ok(()));
                tracing::debug!(sample_rate, "playback worker running");

                run(&mut driver, &mut pool, producer.as_mut(), &worker_shared);

                drop(driver);
                worker_shared.running.store(false, Ordering::Release);
                tracing::debug!("playback worker exited");
            })
            .map_err(|e| AudioError::DeviceAcquisition(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                worker: Some(worker),
                sample_rate,
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(AudioError::DeviceAcquisition(
                    "playback worker exited during startup".to_string(),
                ))
            }
        }
    }

    /// Stop playback and release the device.
    ///
    /// Blocks until the worker has fully exited; no producer invocation
    /// happens after this returns. Dropping the stream has the same effect.
    pub fn close(mut self) {
        self.shutdown_and_join();
    }

    /// Whether the worker is still driving the device. Turns false after
    /// `close`, and also when a steady-state fault killed the stream.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Most recent steady-state failure, if any. Never blocks.
    ///
    /// Faults on the playback thread are not delivered to the caller
    /// mid-flight; poll this (or notice `is_running` turning false) to learn
    /// of them.
    pub fn last_error(&self) -> Option<AudioError> {
        self.shared.error.lock().clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn shutdown_and_join(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Submit the primed periods so the device starts with full buffers.
///
/// Each submit is preceded by a wait that actually yielded `Ready`: a
/// transient underrun or an isolated timeout during startup is handled the
/// same way as in steady state, not turned into an open failure.
fn queue_primed<D: DeviceDriver>(
    driver: &mut D,
    pool: &mut BufferPool,
    producer: &mut dyn SampleProducer,
) -> Result<()> {
    for _ in 0..pool.len() {
        let mut timeouts = 0u32;
        loop {
            match driver.wait_for_space(WAIT_TIMEOUT)? {
                SpaceEvent::Ready => break,
                SpaceEvent::Starved => driver.recover()?,
                SpaceEvent::TimedOut => {
                    timeouts += 1;
                    if timeouts >= MAX_WAIT_TIMEOUTS {
                        return Err(AudioError::StreamStall(
                            "device not ready during startup".to_string(),
                        ));
                    }
                }
            }
        }
        driver.submit(pool.next_period(producer))?;
    }
    Ok(())
}

/// The steady-state engine loop, shared by all backends.
fn run<D: DeviceDriver>(
    driver: &mut D,
    pool: &mut BufferPool,
    producer: &mut dyn SampleProducer,
    shared: &Shared,
) {
    let mut timeouts = 0u32;
    while !shared.shutdown.load(Ordering::Acquire) {
        match driver.wait_for_space(WAIT_TIMEOUT) {
            Ok(SpaceEvent::Ready) => {
                timeouts = 0;
                if let Err(e) = driver.submit(pool.next_period(producer)) {
                    tracing::error!("period submit failed: {e}");
                    shared.record_error(e);
                    break;
                }
            }
            Ok(SpaceEvent::Starved) => {
                // Transient underrun: re-prepare in place and keep playing.
                // Not reported as an error.
                timeouts = 0;
                tracing::warn!("device underrun, re-preparing");
                if let Err(e) = driver.recover() {
                    tracing::error!("underrun recovery failed: {e}");
                    shared.record_error(e);
                    break;
                }
            }
            Ok(SpaceEvent::TimedOut) => {
                timeouts += 1;
                if timeouts >= MAX_WAIT_TIMEOUTS {
                    let e = AudioError::StreamStall(format!(
                        "device not ready after {timeouts} consecutive waits"
                    ));
                    tracing::error!("{e}");
                    shared.record_error(e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("device wait failed: {e}");
                shared.record_error(e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Observable side of the fake device family
    #[derive(Default)]
    struct FakeState {
        /// First sample of each submitted period, in submission order
        submitted: Mutex<Vec<i16>>,
        submissions: AtomicUsize,
        recovers: AtomicUsize,
        starts: AtomicUsize,
        /// Device handles currently held (incremented on open, decremented
        /// when the driver is dropped)
        open_devices: AtomicUsize,
    }

    struct FakeDriver {
        state: Arc<FakeState>,
        script: Vec<SpaceEvent>,
        pos: usize,
        /// Space granted by the last Ready wait, consumed by submit. Mirrors
        /// backends that hand out a free period from wait_for_space.
        space_claimed: bool,
    }

    impl DeviceDriver for FakeDriver {
        fn wait_for_space(&mut self, _timeout: Duration) -> Result<SpaceEvent> {
            // Pace the loop a little so tests sleeping in parallel see a
            // bounded number of cycles.
            thread::sleep(Duration::from_micros(200));
            let event = self
                .script
                .get(self.pos)
                .copied()
                .unwrap_or(SpaceEvent::Ready);
            self.pos += 1;
            if event == SpaceEvent::Ready {
                self.space_claimed = true;
            }
            Ok(event)
        }

        fn submit(&mut self, samples: &[i16]) -> Result<()> {
            if !self.space_claimed {
                return Err(AudioError::DeviceLost(
                    "submit without a free period".to_string(),
                ));
            }
            self.space_claimed = false;
            self.state.submitted.lock().push(samples[0]);
            self.state.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn recover(&mut self) -> Result<()> {
            self.state.recovers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            self.state.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FakeDriver {
        fn drop(&mut self) {
            self.state.open_devices.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct FakeSetup {
        state: Arc<FakeState>,
        rates: Vec<u32>,
        script: Vec<SpaceEvent>,
        fail_open: bool,
    }

    impl FakeSetup {
        fn new(state: Arc<FakeState>) -> Self {
            Self {
                state,
                rates: vec![44_100, 48_000],
                script: Vec::new(),
                fail_open: false,
            }
        }

        fn with_script(mut self, script: Vec<SpaceEvent>) -> Self {
            self.script = script;
            self
        }
    }

    impl DriverSetup for FakeSetup {
        type Driver = FakeDriver;

        fn supports_rate(&self, rate: u32) -> bool {
            self.rates.contains(&rate)
        }

        fn open(self, _sample_rate: u32) -> Result<FakeDriver> {
            if self.fail_open {
                return Err(AudioError::DeviceAcquisition("no device".to_string()));
            }
            self.state.open_devices.fetch_add(1, Ordering::SeqCst);
            Ok(FakeDriver {
                state: self.state,
                script: self.script,
                pos: 0,
                space_claimed: false,
            })
        }
    }

    /// Producer that stamps an invocation sequence number into the first
    /// sample of each period and records the frame counts it was given.
    fn counting_producer(
        fills: Arc<AtomicUsize>,
        frame_counts: Arc<Mutex<Vec<usize>>>,
    ) -> impl SampleProducer {
        move |samples: &mut [i16], frames: usize| {
            let seq = fills.fetch_add(1, Ordering::SeqCst);
            samples[0] = seq as i16;
            frame_counts.lock().push(frames);
        }
    }

    fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn unsupported_rate_is_rejected_before_priming() {
        let state = Arc::new(FakeState::default());
        let fills = Arc::new(AtomicUsize::new(0));
        let counts = Arc::new(Mutex::new(Vec::new()));

        let result = OutputStream::open(
            FakeSetup::new(state.clone()),
            22_050,
            counting_producer(fills.clone(), counts),
        );

        assert_eq!(result.err(), Some(AudioError::UnsupportedRate(22_050)));
        assert_eq!(fills.load(Ordering::SeqCst), 0);
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_device_open_releases_everything() {
        let state = Arc::new(FakeState::default());
        let mut setup = FakeSetup::new(state.clone());
        setup.fail_open = true;

        let result = OutputStream::open(setup, 44_100, |_: &mut [i16], _: usize| {});
        assert!(matches!(result, Err(AudioError::DeviceAcquisition(_))));
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn producer_fills_whole_periods_in_order() {
        let state = Arc::new(FakeState::default());
        let fills = Arc::new(AtomicUsize::new(0));
        let counts = Arc::new(Mutex::new(Vec::new()));

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()),
            44_100,
            counting_producer(fills.clone(), counts.clone()),
        )
        .expect("open");

        assert!(stream.is_running());
        assert_eq!(state.starts.load(Ordering::SeqCst), 1);

        // At least 100 full cycles.
        assert!(wait_until(Duration::from_secs(5), || {
            state.submissions.load(Ordering::SeqCst) >= 100
        }));
        stream.close();

        let counts = counts.lock();
        assert!(counts.len() >= 100);
        assert!(counts.iter().all(|&frames| frames == FRAMES_PER_PERIOD));

        // Periods reach the device in the exact order they were filled,
        // starting with the primed ones.
        let submitted = state.submitted.lock();
        for (i, &stamp) in submitted.iter().take(100).enumerate() {
            assert_eq!(stamp, i as i16);
        }
    }

    #[test]
    fn close_quiesces_the_producer() {
        let state = Arc::new(FakeState::default());
        let fills = Arc::new(AtomicUsize::new(0));
        let counts = Arc::new(Mutex::new(Vec::new()));

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()),
            48_000,
            counting_producer(fills.clone(), counts),
        )
        .expect("open");

        assert!(wait_until(Duration::from_secs(5), || {
            state.submissions.load(Ordering::SeqCst) >= 10
        }));
        stream.close();

        let after_close = fills.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fills.load(Ordering::SeqCst), after_close);
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn immediate_close_neither_deadlocks_nor_leaks() {
        let state = Arc::new(FakeState::default());

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()),
            44_100,
            |_: &mut [i16], _: usize| {},
        )
        .expect("open");
        // The primed periods are queued before open returns.
        assert!(state.submissions.load(Ordering::SeqCst) >= PERIOD_BUFFERS);
        stream.close();
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);

        // The device can be acquired again right away.
        let stream = OutputStream::open(
            FakeSetup::new(state.clone()),
            44_100,
            |_: &mut [i16], _: usize| {},
        )
        .expect("reopen");
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 1);
        stream.close();
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn startup_underrun_is_tolerated() {
        let state = Arc::new(FakeState::default());
        // The device reports an underrun before the first primed period is
        // queued (callback-driven devices may start pulling immediately).
        let script = vec![SpaceEvent::Starved, SpaceEvent::Ready, SpaceEvent::Ready];

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()).with_script(script),
            44_100,
            |_: &mut [i16], _: usize| {},
        )
        .expect("open survives a startup underrun");

        assert!(stream.is_running());
        assert_eq!(state.recovers.load(Ordering::SeqCst), 1);
        assert_eq!(stream.last_error(), None);
        stream.close();
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn startup_timeout_is_tolerated() {
        let state = Arc::new(FakeState::default());
        let script = vec![SpaceEvent::TimedOut, SpaceEvent::Ready, SpaceEvent::Ready];

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()).with_script(script),
            44_100,
            |_: &mut [i16], _: usize| {},
        )
        .expect("open survives an isolated startup timeout");

        assert!(stream.is_running());
        assert_eq!(stream.last_error(), None);
        stream.close();
    }

    #[test]
    fn repeated_startup_timeouts_fail_open() {
        let state = Arc::new(FakeState::default());
        let script = vec![SpaceEvent::TimedOut; MAX_WAIT_TIMEOUTS as usize];

        let result = OutputStream::open(
            FakeSetup::new(state.clone()).with_script(script),
            44_100,
            |_: &mut [i16], _: usize| {},
        );

        assert!(matches!(result, Err(AudioError::StreamStall(_))));
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_underrun_recovers_in_place() {
        let state = Arc::new(FakeState::default());
        // Two Ready events cover the primed submissions, then one underrun.
        let script = vec![SpaceEvent::Ready, SpaceEvent::Ready, SpaceEvent::Starved];

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()).with_script(script),
            44_100,
            |_: &mut [i16], _: usize| {},
        )
        .expect("open");

        assert!(wait_until(Duration::from_secs(5), || {
            state.recovers.load(Ordering::SeqCst) == 1
                && state.submissions.load(Ordering::SeqCst) >= 10
        }));
        // Still playing, and no error was reported.
        assert!(stream.is_running());
        assert_eq!(stream.last_error(), None);
        stream.close();
    }

    #[test]
    fn isolated_wait_timeouts_are_tolerated() {
        let state = Arc::new(FakeState::default());
        let script = vec![
            SpaceEvent::Ready,
            SpaceEvent::Ready,
            SpaceEvent::TimedOut,
            SpaceEvent::Ready,
            SpaceEvent::TimedOut,
        ];

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()).with_script(script),
            44_100,
            |_: &mut [i16], _: usize| {},
        )
        .expect("open");

        assert!(wait_until(Duration::from_secs(5), || {
            state.submissions.load(Ordering::SeqCst) >= 10
        }));
        assert!(stream.is_running());
        assert_eq!(stream.last_error(), None);
        stream.close();
    }

    #[test]
    fn repeated_stall_is_fatal_and_releases_the_device() {
        let state = Arc::new(FakeState::default());
        let mut script = vec![SpaceEvent::Ready, SpaceEvent::Ready];
        script.extend([SpaceEvent::TimedOut; MAX_WAIT_TIMEOUTS as usize]);

        let stream = OutputStream::open(
            FakeSetup::new(state.clone()).with_script(script),
            44_100,
            |_: &mut [i16], _: usize| {},
        )
        .expect("open");

        assert!(wait_until(Duration::from_secs(5), || !stream.is_running()));
        assert!(matches!(
            stream.last_error(),
            Some(AudioError::StreamStall(_))
        ));
        assert_eq!(state.open_devices.load(Ordering::SeqCst), 0);

        // close after a fatal stall is still safe.
        stream.close();
    }
}
