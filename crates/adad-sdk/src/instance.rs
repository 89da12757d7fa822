//! Per-instance lifecycle state machine and worker handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::error;

use adad_protocol::{
    AudioDeviceDescriptor, BufferExchange, DeviceError, DeviceId, Direction, InstanceId,
};

use crate::io::DeviceDriver;
use crate::worker::{self, WorkerContext};

/// Lifecycle state of a device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Exists, holds no thread, has not moved data since creation.
    Created,
    /// Worker live, one buffer moving per cadence tick.
    Running,
    /// Worker live and on cadence, no data moving.
    Paused,
    /// Worker exited; the instance may start again or reset.
    Stopped,
    /// Terminal. Every further operation is refused.
    Destroyed,
}

impl InstanceState {
    /// States in which a worker stays scheduled.
    pub fn is_schedulable(self) -> bool {
        matches!(self, InstanceState::Running | InstanceState::Paused)
    }
}

/// Snapshot of an instance's transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceStats {
    /// Exchange cycles completed while `Running`.
    pub buffers_exchanged: u64,
    /// Transfers that moved fewer samples than requested.
    pub short_transfers: u64,
    /// Transfers the engine refused outright.
    pub transfer_errors: u64,
}

/// State shared between an instance's control side and its worker thread.
///
/// The worker only ever reads the lifecycle state; every transition is made
/// by the control side under the same mutex the worker parks on.
pub(crate) struct InstanceShared {
    state: Mutex<InstanceState>,
    wake: Condvar,
    buffers_exchanged: AtomicU64,
    short_transfers: AtomicU64,
    transfer_errors: AtomicU64,
}

impl InstanceShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(InstanceState::Created),
            wake: Condvar::new(),
            buffers_exchanged: AtomicU64::new(0),
            short_transfers: AtomicU64::new(0),
            transfer_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn current_state(&self) -> InstanceState {
        *self.state.lock()
    }

    /// Parks the worker until `deadline`, waking early on control notifies.
    /// Returns `false` once the instance leaves the schedulable states.
    pub(crate) fn park_until(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        loop {
            if !state.is_schedulable() {
                return false;
            }
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                return state.is_schedulable();
            }
        }
    }

    pub(crate) fn note_cycle(&self) {
        self.buffers_exchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_short_transfer(&self) {
        self.short_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_transfer_error(&self) {
        self.transfer_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> InstanceStats {
        InstanceStats {
            buffers_exchanged: self.buffers_exchanged.load(Ordering::Relaxed),
            short_transfers: self.short_transfers.load(Ordering::Relaxed),
            transfer_errors: self.transfer_errors.load(Ordering::Relaxed),
        }
    }

    fn clear_stats(&self) {
        self.buffers_exchanged.store(0, Ordering::Relaxed);
        self.short_transfers.store(0, Ordering::Relaxed);
        self.transfer_errors.store(0, Ordering::Relaxed);
    }
}

/// One live instance of an application-defined device.
///
/// Control operations take `&mut self`; the runtime serializes them per
/// instance, so the only concurrency here is between a control call and the
/// worker thread, mediated by [`InstanceShared`].
pub struct DeviceInstance {
    device: DeviceId,
    id: InstanceId,
    direction: Direction,
    samples_per_buffer: usize,
    cadence: Duration,
    exchange: Arc<dyn BufferExchange>,
    driver: Arc<dyn DeviceDriver>,
    shared: Arc<InstanceShared>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceInstance {
    /// Builds an instance in the `Created` state. No thread exists until
    /// [`DeviceInstance::start`].
    pub fn new(
        device: DeviceId,
        id: InstanceId,
        descriptor: &AudioDeviceDescriptor,
        exchange: Arc<dyn BufferExchange>,
        driver: Arc<dyn DeviceDriver>,
    ) -> Self {
        Self {
            device,
            id,
            direction: descriptor.direction,
            samples_per_buffer: descriptor.samples_per_buffer(),
            cadence: descriptor.cadence(),
            exchange,
            driver,
            shared: Arc::new(InstanceShared::new()),
            worker: None,
        }
    }

    /// Launches the exchange worker. Legal from `Created` and `Stopped`.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                InstanceState::Created | InstanceState::Stopped => {
                    *state = InstanceState::Running;
                }
                _ => return Err(DeviceError::InvalidOperation),
            }
        }

        let context = WorkerContext {
            device: self.device,
            instance: self.id,
            direction: self.direction,
            samples_per_buffer: self.samples_per_buffer,
            cadence: self.cadence,
            exchange: Arc::clone(&self.exchange),
            shared: Arc::clone(&self.shared),
            source: self
                .direction
                .has_capture()
                .then(|| self.driver.open_source()),
            sink: self
                .direction
                .has_playback()
                .then(|| self.driver.open_sink()),
        };

        let spawned = thread::Builder::new()
            .name(format!("adad-exchange-{}", self.id))
            .spawn(move || worker::run(context));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                *self.shared.state.lock() = InstanceState::Stopped;
                error!(instance = %self.id, ?err, "failed to spawn exchange worker");
                Err(DeviceError::General)
            }
        }
    }

    /// Halts the worker and waits for it to exit. Stopping an instance that
    /// never ran, or one already stopped, is a successful no-op.
    pub fn stop(&mut self) -> Result<(), DeviceError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                InstanceState::Running | InstanceState::Paused => {
                    *state = InstanceState::Stopped;
                    self.shared.wake.notify_all();
                }
                InstanceState::Created | InstanceState::Stopped => return Ok(()),
                InstanceState::Destroyed => return Err(DeviceError::InvalidOperation),
            }
        }
        self.join_worker();
        Ok(())
    }

    /// Keeps the worker on cadence but suspends sample movement.
    pub fn pause(&mut self) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock();
        match *state {
            InstanceState::Running => {
                *state = InstanceState::Paused;
                Ok(())
            }
            _ => Err(DeviceError::InvalidOperation),
        }
    }

    /// Resumes sample movement after [`DeviceInstance::pause`].
    ///
    /// No wakeup is sent; the worker notices at its next tick, so the
    /// cadence does not drift across a pause.
    pub fn resume(&mut self) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock();
        match *state {
            InstanceState::Paused => {
                *state = InstanceState::Running;
                Ok(())
            }
            _ => Err(DeviceError::InvalidOperation),
        }
    }

    /// Returns the instance to its just-created state and zeroes the
    /// counters. Legal from `Created` and `Stopped`.
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock();
        match *state {
            InstanceState::Created | InstanceState::Stopped => {
                *state = InstanceState::Created;
                self.shared.clear_stats();
                Ok(())
            }
            _ => Err(DeviceError::InvalidOperation),
        }
    }

    /// Stop followed by start in one request.
    pub fn restart(&mut self) -> Result<(), DeviceError> {
        self.stop()?;
        self.start()
    }

    /// Final transition. Halts the worker if one is live; afterwards every
    /// operation fails with `InvalidOperation`.
    pub fn destroy(&mut self) -> Result<(), DeviceError> {
        {
            let mut state = self.shared.state.lock();
            if *state == InstanceState::Destroyed {
                return Err(DeviceError::InvalidOperation);
            }
            let was_live = state.is_schedulable();
            *state = InstanceState::Destroyed;
            if was_live {
                self.shared.wake.notify_all();
            }
        }
        self.join_worker();
        Ok(())
    }

    /// Device this instance belongs to.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Handle of this instance.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Transfer direction inherited from the device descriptor.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.shared.current_state()
    }

    /// Snapshot of the worker's transfer counters.
    pub fn stats(&self) -> InstanceStats {
        self.shared.stats()
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(instance = %self.id, "exchange worker panicked");
            }
        }
    }
}

impl Drop for DeviceInstance {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.is_schedulable() {
                *state = InstanceState::Stopped;
                self.shared.wake.notify_all();
            }
        }
        self.join_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingExchange {
        reads: AtomicU64,
        writes: AtomicU64,
    }

    impl BufferExchange for CountingExchange {
        fn write_buffer(
            &self,
            _device: DeviceId,
            _instance: InstanceId,
            samples: &[i16],
        ) -> Result<usize, DeviceError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(samples.len())
        }

        fn read_buffer(
            &self,
            _device: DeviceId,
            _instance: InstanceId,
            samples: &mut [i16],
        ) -> Result<usize, DeviceError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            samples.fill(0);
            Ok(samples.len())
        }
    }

    struct TestDriver;

    impl DeviceDriver for TestDriver {}

    fn descriptor(direction: Direction) -> AudioDeviceDescriptor {
        AudioDeviceDescriptor {
            sampling_rate: 8_000,
            ms_per_buffer: 5,
            channels: 1,
            direction,
            ..Default::default()
        }
    }

    fn instance(direction: Direction) -> (DeviceInstance, Arc<CountingExchange>) {
        let exchange = Arc::new(CountingExchange::default());
        let instance = DeviceInstance::new(
            DeviceId::new(9).unwrap(),
            InstanceId::new(40).unwrap(),
            &descriptor(direction),
            exchange.clone(),
            Arc::new(TestDriver),
        );
        (instance, exchange)
    }

    fn wait_for(counter: &AtomicU64, at_least: u64) {
        for _ in 0..1_000 {
            if counter.load(Ordering::Relaxed) >= at_least {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("worker made no progress");
    }

    #[test]
    fn begins_in_created() {
        let (instance, _) = instance(Direction::Output);
        assert_eq!(instance.state(), InstanceState::Created);
        assert_eq!(instance.stats(), InstanceStats::default());
    }

    #[test]
    fn walks_the_legal_lifecycle() {
        let (mut instance, _) = instance(Direction::Output);

        instance.start().unwrap();
        assert_eq!(instance.state(), InstanceState::Running);

        instance.pause().unwrap();
        assert_eq!(instance.state(), InstanceState::Paused);

        instance.resume().unwrap();
        assert_eq!(instance.state(), InstanceState::Running);

        instance.stop().unwrap();
        assert_eq!(instance.state(), InstanceState::Stopped);

        instance.reset().unwrap();
        assert_eq!(instance.state(), InstanceState::Created);

        instance.start().unwrap();
        instance.stop().unwrap();

        instance.destroy().unwrap();
        assert_eq!(instance.state(), InstanceState::Destroyed);
    }

    #[test]
    fn rejects_illegal_transitions() {
        let (mut instance, _) = instance(Direction::Output);

        assert_eq!(instance.pause(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.resume(), Err(DeviceError::InvalidOperation));

        instance.start().unwrap();
        assert_eq!(instance.start(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.resume(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.reset(), Err(DeviceError::InvalidOperation));

        instance.pause().unwrap();
        assert_eq!(instance.pause(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.reset(), Err(DeviceError::InvalidOperation));

        instance.stop().unwrap();
        instance.destroy().unwrap();

        assert_eq!(instance.start(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.stop(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.pause(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.resume(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.reset(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.restart(), Err(DeviceError::InvalidOperation));
        assert_eq!(instance.destroy(), Err(DeviceError::InvalidOperation));
    }

    #[test]
    fn stop_is_idempotent_and_cancels_created() {
        let (mut instance, _) = instance(Direction::Input);

        assert_eq!(instance.stop(), Ok(()));
        assert_eq!(instance.state(), InstanceState::Created);

        instance.start().unwrap();
        instance.stop().unwrap();
        assert_eq!(instance.stop(), Ok(()));
        assert_eq!(instance.state(), InstanceState::Stopped);
    }

    #[test]
    fn restart_from_created_behaves_like_start() {
        let (mut instance, _) = instance(Direction::Output);
        instance.restart().unwrap();
        assert_eq!(instance.state(), InstanceState::Running);
        instance.stop().unwrap();
    }

    #[test]
    fn reset_clears_counters() {
        let (mut instance, exchange) = instance(Direction::Output);

        instance.start().unwrap();
        wait_for(&exchange.reads, 2);
        instance.stop().unwrap();
        assert!(instance.stats().buffers_exchanged >= 2);

        instance.reset().unwrap();
        assert_eq!(instance.stats(), InstanceStats::default());
    }

    #[test]
    fn drop_joins_a_live_worker() {
        let (mut instance, exchange) = instance(Direction::Output);
        instance.start().unwrap();
        wait_for(&exchange.reads, 1);
        drop(instance);
    }
}
