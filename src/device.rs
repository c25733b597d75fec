//! Driver owner and the accel/gyro front-ends
//!
//! One [`Icm20602`] owns the shared state: the [`DriverCore`] behind a mutex,
//! the data-ready condition variables and the sampler. [`AccelNode`] and
//! [`GyroNode`] hold only a weak reference and delegate every call, so they
//! fail with [`DriverError::NotRunning`] once the owner is gone.
//!
//! All access to the core goes through one critical section
//! ([`Shared::with_core`]). Beyond the pipeline state it guards the three
//! things reconfiguration changes under the sampler's feet: the timer period
//! (`call_interval_us`), the filter coefficients and the queue capacities.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info};

use crate::bus::RegisterBus;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{DriverConfig, MAX_POLL_RATE_HZ, DEFAULT_POLL_RATE_HZ, GYRO_RANGE_DPS};
use crate::core::{Channel, CycleOutcome, DriverCore, DriverInfo, DriverStats};
use crate::error::{DriverError, Result};
use crate::publish::{NullPublisher, ReportPublisher};
use crate::report::{AccelReport, Calibration, GyroReport};
use crate::sampler::Sampler;

/// Requested polling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollRate {
    /// No periodic sampling; reads measure on demand
    Manual,
    /// Externally triggered sampling (not supported)
    External,
    /// Fastest supported rate
    Max,
    /// Driver default rate
    Default,
    Hz(u32),
}

pub(crate) struct Shared {
    core: Mutex<DriverCore>,
    accel_ready: Condvar,
    gyro_ready: Condvar,
    sampler: Mutex<Option<Sampler>>,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, DriverCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the sampler excluded
    ///
    /// Waiters are woken for every integration window `f` closed, whether it
    /// ran from the sampler, a manual read or an explicit measurement.
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut DriverCore) -> R) -> R {
        let mut core = self.lock_core();
        let accel_before = core.windows(Channel::Accel);
        let gyro_before = core.windows(Channel::Gyro);
        let result = f(&mut core);
        let accel_closed = core.windows(Channel::Accel) != accel_before;
        let gyro_closed = core.windows(Channel::Gyro) != gyro_before;
        drop(core);

        if accel_closed {
            self.accel_ready.notify_all();
        }
        if gyro_closed {
            self.gyro_ready.notify_all();
        }
        result
    }

    /// One scheduled cycle; returns the poll interval for the next one
    fn tick(&self) -> u64 {
        let (outcome, interval) = self.with_core(|core| (core.measure(), core.call_interval_us()));
        if let Err(e) = outcome {
            debug!("Cycle failed: {}", e);
        }
        interval
    }

    /// Block until the channel's next integration window closes
    fn wait_for_window(&self, channel: Channel, timeout: Duration) -> bool {
        let core = self.lock_core();
        let start = core.windows(channel);
        let ready = match channel {
            Channel::Accel => &self.accel_ready,
            Channel::Gyro => &self.gyro_ready,
        };
        let (_core, result) = ready
            .wait_timeout_while(core, timeout, |core| core.windows(channel) == start)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    fn sampler(&self) -> MutexGuard<'_, Option<Sampler>> {
        self.sampler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// (Re)start periodic sampling with fresh duplicate latch and queues
fn start_sampling(shared: &Arc<Shared>) -> Result<()> {
    stop_sampling(shared);
    shared.with_core(|core| core.clear_sampling_state());

    let context = Arc::downgrade(shared);
    let sampler = Sampler::spawn(move || {
        let shared = context.upgrade()?;
        Some(shared.tick())
    })?;
    *shared.sampler() = Some(sampler);
    Ok(())
}

/// Cancel periodic sampling and discard unread reports
fn stop_sampling(shared: &Arc<Shared>) {
    let sampler = shared.sampler().take();
    if let Some(mut sampler) = sampler {
        sampler.stop();
        shared.with_core(|core| core.clear_sampling_state());
    }
}

fn set_poll_rate(shared: &Arc<Shared>, rate: PollRate) -> Result<()> {
    let hz = match rate {
        PollRate::Manual => {
            stop_sampling(shared);
            return shared.with_core(|core| core.set_call_interval(0));
        }
        PollRate::External => {
            return Err(DriverError::InvalidArgument(
                "external polling is not supported".into(),
            ))
        }
        PollRate::Max => MAX_POLL_RATE_HZ,
        PollRate::Default => DEFAULT_POLL_RATE_HZ,
        PollRate::Hz(0) => {
            return Err(DriverError::InvalidArgument("poll rate must be > 0 Hz".into()))
        }
        PollRate::Hz(hz) => hz,
    };

    let ticks = 1_000_000 / hz as u64;
    // the chip cannot produce fresh data faster than 1 kHz
    if ticks < 1_000_000 / MAX_POLL_RATE_HZ as u64 {
        return Err(DriverError::InvalidArgument(format!(
            "poll rate {} Hz above {} Hz",
            hz, MAX_POLL_RATE_HZ
        )));
    }

    let was_manual = shared.with_core(|core| -> Result<bool> {
        let was_manual = core.call_interval_us() == 0;
        core.set_call_interval(ticks)?;
        Ok(was_manual)
    })?;

    let running = shared.sampler().as_ref().is_some_and(Sampler::is_running);
    if was_manual || !running {
        start_sampling(shared)?;
    }
    Ok(())
}

fn poll_rate(shared: &Shared) -> PollRate {
    match shared.with_core(|core| core.call_interval_us()) {
        0 => PollRate::Manual,
        interval => PollRate::Hz((1_000_000 / interval) as u32),
    }
}

/// ICM-20602 driver instance
///
/// Dropping it stops sampling; outstanding nodes then report
/// [`DriverError::NotRunning`].
///
/// # Example
/// ```no_run
/// use icm20602_driver::{DriverConfig, Icm20602, PollRate, SimulatedIcm20602};
/// use std::time::Duration;
///
/// let sensor = Icm20602::new(SimulatedIcm20602::new(), DriverConfig::default())?;
/// let accel = sensor.accel();
/// accel.set_poll_rate(PollRate::Hz(500))?;
///
/// if accel.wait_for_data(Duration::from_millis(100))? {
///     for report in accel.read(4)? {
///         println!("{:?}", report.filtered);
///     }
/// }
/// # Ok::<(), icm20602_driver::DriverError>(())
/// ```
pub struct Icm20602 {
    shared: Arc<Shared>,
}

impl Icm20602 {
    /// Bring up a sensor on `bus` with the wall clock and no publisher
    ///
    /// # Returns
    /// * `Ok(Icm20602)` - Sensor configured, sampling in manual mode
    /// * `Err(DriverError)` - Probe or reset failed
    pub fn new<B: RegisterBus + 'static>(bus: B, config: DriverConfig) -> Result<Self> {
        Self::with_parts(
            Box::new(bus),
            Arc::new(MonotonicClock::new()),
            Box::new(NullPublisher),
            config,
        )
    }

    /// Bring up a sensor with an explicit clock and publisher
    pub fn with_parts(
        bus: Box<dyn RegisterBus>,
        clock: Arc<dyn Clock>,
        publisher: Box<dyn ReportPublisher>,
        config: DriverConfig,
    ) -> Result<Self> {
        let mut core = DriverCore::new(bus, clock, publisher, config);
        core.init()?;

        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                accel_ready: Condvar::new(),
                gyro_ready: Condvar::new(),
                sampler: Mutex::new(None),
            }),
        })
    }

    pub fn accel(&self) -> AccelNode {
        AccelNode {
            link: Link::new(&self.shared),
        }
    }

    pub fn gyro(&self) -> GyroNode {
        GyroNode {
            link: Link::new(&self.shared),
        }
    }

    /// Start periodic sampling at the default poll rate
    pub fn start(&self) -> Result<()> {
        set_poll_rate(&self.shared, PollRate::Default)?;
        info!("Sampling at {:?}", poll_rate(&self.shared));
        Ok(())
    }

    /// Stop periodic sampling and switch to manual reads
    pub fn stop(&self) -> Result<()> {
        set_poll_rate(&self.shared, PollRate::Manual)
    }

    pub fn is_sampling(&self) -> bool {
        self.shared.sampler().as_ref().is_some_and(Sampler::is_running)
    }

    pub fn set_poll_rate(&self, rate: PollRate) -> Result<()> {
        set_poll_rate(&self.shared, rate)
    }

    pub fn poll_rate(&self) -> PollRate {
        poll_rate(&self.shared)
    }

    /// Run one measurement cycle now
    pub fn measure(&self) -> Result<CycleOutcome> {
        self.shared.with_core(|core| core.measure())
    }

    /// Re-run bring-up
    pub fn reset(&self) -> Result<()> {
        self.shared.with_core(|core| core.reset())
    }

    pub fn info(&self) -> DriverInfo {
        self.shared.with_core(|core| core.info())
    }

    pub fn stats(&self) -> DriverStats {
        self.shared.with_core(|core| core.stats())
    }

    pub fn register_dump(&self) -> Result<Vec<(u8, u8)>> {
        self.shared.with_core(|core| core.register_dump())
    }

    /// Provoke a slow data read inside the test window, then dump registers
    pub fn test_error(&self) -> Result<Vec<(u8, u8)>> {
        self.shared.with_core(|core| core.test_error())
    }

    pub fn set_publication_blocked(&self, blocked: bool) {
        self.shared.with_core(|core| core.set_publication_blocked(blocked))
    }

    pub fn device_id(&self) -> u32 {
        self.shared.with_core(|core| core.device_id())
    }

    pub fn is_external(&self) -> bool {
        self.shared.with_core(|core| core.is_external())
    }
}

impl Drop for Icm20602 {
    fn drop(&mut self) {
        stop_sampling(&self.shared);
    }
}

/// Non-owning back-reference shared by both nodes
#[derive(Clone)]
struct Link {
    shared: Weak<Shared>,
}

impl Link {
    fn new(shared: &Arc<Shared>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
        }
    }

    fn upgrade(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(DriverError::NotRunning)
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut DriverCore) -> R) -> Result<R> {
        Ok(self.upgrade()?.with_core(f))
    }
}

/// Linear-acceleration front-end
#[derive(Clone)]
pub struct AccelNode {
    link: Link,
}

impl AccelNode {
    /// Up to `max` queued reports, oldest first
    ///
    /// In manual mode one fresh measurement is taken first.
    pub fn read(&self, max: usize) -> Result<Vec<AccelReport>> {
        self.link.with_core(|core| core.read_accel(max))?
    }

    pub fn set_poll_rate(&self, rate: PollRate) -> Result<()> {
        set_poll_rate(&self.link.upgrade()?, rate)
    }

    pub fn poll_rate(&self) -> Result<PollRate> {
        let shared = self.link.upgrade()?;
        Ok(poll_rate(&shared))
    }

    pub fn set_queue_depth(&self, depth: usize) -> Result<()> {
        self.link.with_core(|core| core.set_queue_depth(Channel::Accel, depth))?
    }

    pub fn queue_depth(&self) -> Result<usize> {
        self.link.with_core(|core| core.queue_depth(Channel::Accel))
    }

    pub fn set_sample_rate(&self, hz: u32) -> Result<()> {
        self.link.with_core(|core| core.set_sample_rate(hz))?
    }

    /// Effective internal sample rate in Hz
    pub fn sample_rate(&self) -> Result<u32> {
        self.link.with_core(|core| core.sample_rate().effective_hz)
    }

    pub fn set_low_pass(&self, cutoff_hz: f32) -> Result<()> {
        self.link.with_core(|core| core.set_low_pass(Channel::Accel, cutoff_hz))?
    }

    pub fn low_pass(&self) -> Result<f32> {
        self.link.with_core(|core| core.low_pass(Channel::Accel))
    }

    /// Rejected (and the old calibration kept) unless the scales sum to
    /// between 2 and 4
    pub fn set_calibration(&self, cal: Calibration) -> Result<()> {
        self.link.with_core(|core| core.set_accel_calibration(cal))?
    }

    pub fn calibration(&self) -> Result<Calibration> {
        self.link.with_core(|core| core.accel_calibration())
    }

    pub fn set_range(&self, max_g: u32) -> Result<()> {
        self.link.with_core(|core| core.set_accel_range(max_g))?
    }

    /// Full scale in g
    pub fn range(&self) -> Result<u32> {
        self.link.with_core(|core| core.accel_range().g())
    }

    pub fn self_test(&self) -> Result<bool> {
        self.link.with_core(|core| core.accel_self_test())
    }

    pub fn reset(&self) -> Result<()> {
        self.link.with_core(|core| core.reset())?
    }

    pub fn device_id(&self) -> Result<u32> {
        self.link.with_core(|core| core.device_id())
    }

    pub fn is_external(&self) -> Result<bool> {
        self.link.with_core(|core| core.is_external())
    }

    /// Wait for the next accel publication; false on timeout
    pub fn wait_for_data(&self, timeout: Duration) -> Result<bool> {
        Ok(self.link.upgrade()?.wait_for_window(Channel::Accel, timeout))
    }

    pub fn set_publication_blocked(&self, blocked: bool) -> Result<()> {
        self.link.with_core(|core| core.set_publication_blocked(blocked))
    }
}

/// Angular-rate front-end
#[derive(Clone)]
pub struct GyroNode {
    link: Link,
}

impl GyroNode {
    /// Up to `max` queued reports, oldest first
    pub fn read(&self, max: usize) -> Result<Vec<GyroReport>> {
        self.link.with_core(|core| core.read_gyro(max))?
    }

    pub fn set_poll_rate(&self, rate: PollRate) -> Result<()> {
        set_poll_rate(&self.link.upgrade()?, rate)
    }

    pub fn poll_rate(&self) -> Result<PollRate> {
        let shared = self.link.upgrade()?;
        Ok(poll_rate(&shared))
    }

    pub fn set_queue_depth(&self, depth: usize) -> Result<()> {
        self.link.with_core(|core| core.set_queue_depth(Channel::Gyro, depth))?
    }

    pub fn queue_depth(&self) -> Result<usize> {
        self.link.with_core(|core| core.queue_depth(Channel::Gyro))
    }

    pub fn set_sample_rate(&self, hz: u32) -> Result<()> {
        self.link.with_core(|core| core.set_sample_rate(hz))?
    }

    pub fn sample_rate(&self) -> Result<u32> {
        self.link.with_core(|core| core.sample_rate().effective_hz)
    }

    pub fn set_low_pass(&self, cutoff_hz: f32) -> Result<()> {
        self.link.with_core(|core| core.set_low_pass(Channel::Gyro, cutoff_hz))?
    }

    pub fn low_pass(&self) -> Result<f32> {
        self.link.with_core(|core| core.low_pass(Channel::Gyro))
    }

    /// Not validated
    pub fn set_calibration(&self, cal: Calibration) -> Result<()> {
        self.link.with_core(|core| core.set_gyro_calibration(cal))
    }

    pub fn calibration(&self) -> Result<Calibration> {
        self.link.with_core(|core| core.gyro_calibration())
    }

    /// Fixed full scale in deg/s
    pub fn range(&self) -> Result<u32> {
        self.link.upgrade()?;
        Ok(GYRO_RANGE_DPS as u32)
    }

    pub fn self_test(&self) -> Result<bool> {
        self.link.with_core(|core| core.gyro_self_test())
    }

    pub fn reset(&self) -> Result<()> {
        self.link.with_core(|core| core.reset())?
    }

    pub fn device_id(&self) -> Result<u32> {
        self.link.with_core(|core| core.device_id())
    }

    pub fn is_external(&self) -> Result<bool> {
        self.link.with_core(|core| core.is_external())
    }

    /// Wait for the next gyro publication; false on timeout
    pub fn wait_for_data(&self, timeout: Duration) -> Result<bool> {
        Ok(self.link.upgrade()?.wait_for_window(Channel::Gyro, timeout))
    }

    pub fn set_publication_blocked(&self, blocked: bool) -> Result<()> {
        self.link.with_core(|core| core.set_publication_blocked(blocked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use crate::sim::SimulatedIcm20602;

    fn sensor() -> Icm20602 {
        Icm20602::new(SimulatedIcm20602::new(), DriverConfig::default()).unwrap()
    }

    #[test]
    fn test_manual_mode_reads_on_demand() {
        let sensor = sensor();
        assert_eq!(sensor.poll_rate(), PollRate::Manual);
        let reports = sensor.accel().read(2).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!sensor.is_sampling());
    }

    #[test]
    fn test_poll_rate_validation() {
        let sensor = sensor();
        let accel = sensor.accel();
        assert!(matches!(
            accel.set_poll_rate(PollRate::Hz(0)),
            Err(DriverError::InvalidArgument(_))
        ));
        assert!(matches!(
            accel.set_poll_rate(PollRate::External),
            Err(DriverError::InvalidArgument(_))
        ));
        assert!(matches!(
            accel.set_poll_rate(PollRate::Hz(2000)),
            Err(DriverError::InvalidArgument(_))
        ));
        assert_eq!(accel.poll_rate().unwrap(), PollRate::Manual);
    }

    #[test]
    fn test_node_poll_rate_follows_driver() {
        let sensor = sensor();
        let accel = sensor.accel();
        let gyro = sensor.gyro();
        gyro.set_poll_rate(PollRate::Hz(250)).unwrap();
        assert_eq!(accel.poll_rate().unwrap(), PollRate::Hz(250));
        assert_eq!(gyro.poll_rate().unwrap(), PollRate::Hz(250));
        accel.set_poll_rate(PollRate::Manual).unwrap();
        assert_eq!(gyro.poll_rate().unwrap(), PollRate::Manual);
        drop(sensor);
        assert!(matches!(gyro.poll_rate(), Err(DriverError::NotRunning)));
    }

    #[test]
    fn test_max_and_default_map_to_1khz() {
        let sensor = sensor();
        sensor.set_poll_rate(PollRate::Max).unwrap();
        assert_eq!(sensor.poll_rate(), PollRate::Hz(1000));
        sensor.set_poll_rate(PollRate::Default).unwrap();
        assert_eq!(sensor.poll_rate(), PollRate::Hz(1000));
        sensor.stop().unwrap();
        assert_eq!(sensor.poll_rate(), PollRate::Manual);
    }

    #[test]
    fn test_sampling_wakes_waiters() {
        let sensor = sensor();
        let gyro = sensor.gyro();
        gyro.set_poll_rate(PollRate::Hz(500)).unwrap();
        assert!(sensor.is_sampling());
        assert!(gyro.wait_for_data(Duration::from_secs(1)).unwrap());
        assert!(!gyro.read(10).unwrap().is_empty());
        sensor.stop().unwrap();
        assert!(!sensor.is_sampling());
    }

    #[test]
    fn test_manual_measure_wakes_waiters() {
        let sensor = sensor();
        let accel = sensor.accel();
        let gyro = sensor.gyro();
        assert!(!sensor.is_sampling());

        let accel_waiter = thread::spawn(move || accel.wait_for_data(Duration::from_secs(2)));
        let gyro_waiter = thread::spawn(move || gyro.wait_for_data(Duration::from_secs(2)));
        // let both waiters block before any window can close
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        for _ in 0..20 {
            let _ = sensor.measure();
            thread::sleep(Duration::from_millis(1));
        }

        assert!(accel_waiter.join().unwrap().unwrap());
        assert!(gyro_waiter.join().unwrap().unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_manual_read_wakes_waiters() {
        let sensor = sensor();
        let gyro = sensor.gyro();
        let waiter = {
            let gyro = gyro.clone();
            thread::spawn(move || gyro.wait_for_data(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(20));

        for _ in 0..20 {
            let _ = gyro.read(1);
            thread::sleep(Duration::from_millis(1));
        }
        assert!(waiter.join().unwrap().unwrap());
    }

    #[test]
    fn test_stop_flushes_queues() {
        let sensor = sensor();
        let accel = sensor.accel();
        accel.set_queue_depth(10).unwrap();
        sensor.start().unwrap();
        accel.wait_for_data(Duration::from_secs(1)).unwrap();
        sensor.stop().unwrap();
        let info = sensor.info();
        assert_eq!(info.accel_queue_len, 0);
        assert_eq!(info.gyro_queue_len, 0);
        assert_eq!(info.accel_queue_depth, 10);
    }

    #[test]
    fn test_nodes_outlive_driver() {
        let sensor = sensor();
        let accel = sensor.accel();
        let gyro = sensor.gyro();
        drop(sensor);
        assert!(matches!(accel.read(1), Err(DriverError::NotRunning)));
        assert!(matches!(gyro.range(), Err(DriverError::NotRunning)));
    }

    #[test]
    fn test_gyro_range_and_passthrough() {
        let sensor = sensor();
        let gyro = sensor.gyro();
        assert_eq!(gyro.range().unwrap(), 2000);
        assert_eq!(gyro.device_id().unwrap(), sensor.device_id());
        assert!(!gyro.is_external().unwrap());
        assert_eq!(sensor.accel().range().unwrap(), 8);
    }

    #[test]
    fn test_per_channel_queue_depth() {
        let sensor = sensor();
        sensor.accel().set_queue_depth(5).unwrap();
        assert_eq!(sensor.accel().queue_depth().unwrap(), 5);
        assert_eq!(sensor.gyro().queue_depth().unwrap(), 2);
        assert!(sensor.gyro().set_queue_depth(0).is_err());
    }
}
