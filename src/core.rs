//! Driver core shared by the accel and gyro front-ends
//!
//! Owns the bus, the register shadow, filters, integrators and report
//! queues. Every method takes `&mut self`; callers serialize access (see
//! [`crate::device`]).

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, trace, warn};

use crate::bus::{BusSpeed, RegisterBus};
use crate::clock::Clock;
use crate::config::*;
use crate::error::{DriverError, Result};
use crate::filter::LowPassFilter2p;
use crate::health::{HealthMonitor, Recovery};
use crate::integrator::Integrator;
use crate::publish::ReportPublisher;
use crate::queue::ReportQueue;
use crate::registers::*;
use crate::report::{temperature_celsius, AccelReport, Calibration, GyroReport};

/// Bring-up attempts before the sensor is declared unavailable
pub const RESET_ATTEMPTS: u32 = 4;

const RESET_SETTLE_US: u64 = 10_000;
const CLOCK_SETTLE_US: u64 = 1_000;
const RESET_RETRY_US: u64 = 2_000;
const CONFIG_SETTLE_US: u64 = 1_000;

/// Which output stream an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Accel,
    Gyro,
}

/// Event counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Measurement cycles that reached the bus
    pub cycles: u64,
    pub accel_reads: u64,
    pub gyro_reads: u64,
    pub bad_transfers: u64,
    pub bad_registers: u64,
    pub good_transfers: u64,
    pub reset_retries: u64,
    pub duplicates: u64,
}

impl DriverStats {
    /// Value carried in every report's `error_count`
    pub fn error_count(&self) -> u64 {
        self.bad_transfers + self.bad_registers
    }
}

/// What one call to [`DriverCore::measure`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Factory-test window or recovery cooldown; no bus traffic
    Skipped,
    /// Accel data unchanged since the previous cycle
    Duplicate,
    /// Good transfer withheld while recovering from a register mismatch
    Settling,
    /// Reports queued; a closed window means they were also published
    Sampled {
        accel_window_closed: bool,
        gyro_window_closed: bool,
    },
}

/// Last accel bytes seen, used to drop samples the chip has not refreshed
#[derive(Debug, Clone, Copy, Default)]
struct DuplicateLatch {
    last_accel: [u8; 6],
    got_duplicate: bool,
}

impl DuplicateLatch {
    /// Only the first repeat is dropped, so a truly constant signal still
    /// gets through every other cycle
    fn is_duplicate(&mut self, accel: &[u8]) -> bool {
        if !self.got_duplicate && accel == self.last_accel {
            self.got_duplicate = true;
            return true;
        }
        self.last_accel.copy_from_slice(accel);
        self.got_duplicate = false;
        false
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

fn be_i16(block: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([block[offset], block[offset + 1]])
}

fn be_triplet(block: &[u8], offset: usize) -> [i16; 3] {
    [
        be_i16(block, offset),
        be_i16(block, offset + 2),
        be_i16(block, offset + 4),
    ]
}

/// Sensor-to-board axis fix-up: x' = y, y' = -x
///
/// Negating `i16::MIN` saturates to `i16::MAX`.
pub fn board_axes(v: [i16; 3]) -> [i16; 3] {
    let y = if v[0] == i16::MIN { i16::MAX } else { -v[0] };
    [v[1], y, v[2]]
}

fn to_f32(v: [i16; 3]) -> [f32; 3] {
    [v[0] as f32, v[1] as f32, v[2] as f32]
}

fn make_filters(sample_rate_hz: f32, cutoff_hz: f32) -> [LowPassFilter2p; 3] {
    std::array::from_fn(|_| LowPassFilter2p::new(sample_rate_hz, cutoff_hz))
}

fn apply_filters(filters: &mut [LowPassFilter2p; 3], v: [f32; 3]) -> [f32; 3] {
    [filters[0].apply(v[0]), filters[1].apply(v[1]), filters[2].apply(v[2])]
}

/// A checked register whose content differs from its shadow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMismatch {
    pub register: u8,
    pub expected: u8,
    pub actual: u8,
}

/// Diagnostic snapshot
#[derive(Debug, Clone)]
pub struct DriverInfo {
    pub stats: DriverStats,
    pub poll_interval_us: u64,
    pub accel_queue_len: usize,
    pub accel_queue_depth: usize,
    pub gyro_queue_len: usize,
    pub gyro_queue_depth: usize,
    /// Reports evicted unread since bring-up
    pub accel_overwritten: u64,
    pub gyro_overwritten: u64,
    pub checked_cursor: usize,
    pub register_wait: u32,
    /// End of the last recovery cooldown (0 when none was armed)
    pub recovery_deadline_us: u64,
    pub mismatches: Vec<RegisterMismatch>,
    pub temperature: f32,
}

impl fmt::Display for DriverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(f, "cycles:          {}", s.cycles)?;
        writeln!(f, "accel reads:     {}", s.accel_reads)?;
        writeln!(f, "gyro reads:      {}", s.gyro_reads)?;
        writeln!(f, "bad transfers:   {}", s.bad_transfers)?;
        writeln!(f, "bad registers:   {}", s.bad_registers)?;
        writeln!(f, "good transfers:  {}", s.good_transfers)?;
        writeln!(f, "reset retries:   {}", s.reset_retries)?;
        writeln!(f, "duplicates:      {}", s.duplicates)?;
        if self.poll_interval_us == 0 {
            writeln!(f, "poll:            manual")?;
        } else {
            writeln!(f, "poll interval:   {} us", self.poll_interval_us)?;
        }
        writeln!(
            f,
            "accel queue:     {}/{} ({} overwritten)",
            self.accel_queue_len, self.accel_queue_depth, self.accel_overwritten
        )?;
        writeln!(
            f,
            "gyro queue:      {}/{} ({} overwritten)",
            self.gyro_queue_len, self.gyro_queue_depth, self.gyro_overwritten
        )?;
        writeln!(f, "checked_next:    {}", self.checked_cursor)?;
        writeln!(f, "register wait:   {}", self.register_wait)?;
        if self.recovery_deadline_us > 0 {
            writeln!(f, "recovery until:  {} us", self.recovery_deadline_us)?;
        }
        for m in &self.mismatches {
            writeln!(
                f,
                "reg 0x{:02X} is 0x{:02X} should be 0x{:02X}",
                m.register, m.actual, m.expected
            )?;
        }
        write!(f, "temperature:     {:.1} C", self.temperature)
    }
}

/// Stateful heart of the driver
pub struct DriverCore {
    bus: Box<dyn RegisterBus>,
    clock: Arc<dyn Clock>,
    publisher: Box<dyn ReportPublisher>,
    config: DriverConfig,

    monitor: HealthMonitor,
    stats: DriverStats,
    latch: DuplicateLatch,

    sample_rate: SampleRate,
    dlpf: DlpfBucket,
    accel_range: AccelRange,
    accel_range_scale: f32,
    gyro_range_scale: f32,

    accel_cal: Calibration,
    gyro_cal: Calibration,

    accel_filters: [LowPassFilter2p; 3],
    gyro_filters: [LowPassFilter2p; 3],
    accel_integrator: Integrator,
    gyro_integrator: Integrator,

    accel_queue: ReportQueue<AccelReport>,
    gyro_queue: ReportQueue<GyroReport>,

    /// Sampling period in µs, 0 while in manual mode
    call_interval_us: u64,
    in_factory_test: bool,
    publication_blocked: bool,
    last_temperature: f32,
    accel_windows: u64,
    gyro_windows: u64,
}

impl DriverCore {
    /// Create an unconfigured core; call [`init`](Self::init) before use
    pub fn new(
        bus: Box<dyn RegisterBus>,
        clock: Arc<dyn Clock>,
        publisher: Box<dyn ReportPublisher>,
        config: DriverConfig,
    ) -> Self {
        let default_rate = DEFAULT_POLL_RATE_HZ as f32;
        let accel_range = AccelRange::for_max_g(config.accel_range_g);

        Self {
            accel_filters: make_filters(default_rate, config.accel_filter_hz),
            gyro_filters: make_filters(default_rate, config.gyro_filter_hz),
            accel_integrator: Integrator::new(config.integration_interval_us, false),
            gyro_integrator: Integrator::new(config.integration_interval_us, true),
            accel_queue: ReportQueue::new(config.queue_depth),
            gyro_queue: ReportQueue::new(config.queue_depth),
            sample_rate: SampleRate::from_hz(config.sample_rate_hz),
            dlpf: DlpfBucket::from_cutoff(config.onchip_filter_hz),
            accel_range,
            accel_range_scale: accel_range.scale(),
            gyro_range_scale: gyro_scale(),
            accel_cal: Calibration::IDENTITY,
            gyro_cal: Calibration::IDENTITY,
            monitor: HealthMonitor::new(),
            stats: DriverStats::default(),
            latch: DuplicateLatch::default(),
            call_interval_us: 0,
            in_factory_test: false,
            publication_blocked: false,
            last_temperature: 0.0,
            accel_windows: 0,
            gyro_windows: 0,
            bus,
            clock,
            publisher,
            config,
        }
    }

    /// Probe the sensor and bring it into the configured operating mode
    pub fn init(&mut self) -> Result<()> {
        self.probe()?;
        self.reset()?;
        info!(
            "ICM-20602 ready: {} Hz, +/-{} g, DLPF {:?}",
            self.sample_rate.effective_hz,
            self.accel_range.g(),
            self.dlpf
        );
        Ok(())
    }

    /// Verify WHO_AM_I
    pub fn probe(&mut self) -> Result<()> {
        let who_am_i = self.read_reg(REG_WHO_AM_I, BusSpeed::Low)?;
        if who_am_i != WHO_AM_I_VALUE {
            return Err(DriverError::InvalidDeviceId(who_am_i));
        }
        debug!("WHO_AM_I 0x{:02X}", who_am_i);
        Ok(())
    }

    /// Full bring-up: chip reset, clock selection, then rate, filter, range
    /// and interrupt configuration
    ///
    /// # Returns
    /// * `Ok(())` - Sensor configured, recovery state cleared
    /// * `Err(DriverError::HardwareUnavailable)` - Reset never took
    pub fn reset(&mut self) -> Result<()> {
        if !self.bring_up_clock() {
            error!(
                "Sensor did not come out of reset after {} attempts",
                RESET_ATTEMPTS
            );
            return Err(DriverError::HardwareUnavailable {
                attempts: RESET_ATTEMPTS,
            });
        }

        self.write_checked(REG_USER_CTRL, 0x00)?;
        self.clock.delay_us(CONFIG_SETTLE_US);

        self.program_sample_rate(self.config.sample_rate_hz)?;
        self.clock.delay_us(CONFIG_SETTLE_US);

        self.program_dlpf(self.config.onchip_filter_hz)?;
        self.clock.delay_us(CONFIG_SETTLE_US);

        self.write_checked(REG_GYRO_CONFIG, BITS_FS_2000DPS)?;
        self.gyro_range_scale = gyro_scale();
        self.clock.delay_us(CONFIG_SETTLE_US);

        self.program_accel_range(self.config.accel_range_g)?;
        self.clock.delay_us(CONFIG_SETTLE_US);

        self.write_checked(REG_INT_ENABLE, BIT_DATA_RDY_INT_EN)?;
        self.clock.delay_us(CONFIG_SETTLE_US);
        self.write_checked(REG_INT_PIN_CFG, BIT_INT_ANYRD_2CLEAR)?;
        self.clock.delay_us(2 * CONFIG_SETTLE_US);

        self.monitor.clear_recovery();
        Ok(())
    }

    /// Reset attempts; true once the chip runs from the PLL
    fn bring_up_clock(&mut self) -> bool {
        for attempt in 1..=RESET_ATTEMPTS {
            match self.try_reset_once() {
                Ok(true) => {
                    debug!("Reset took on attempt {}", attempt);
                    return true;
                }
                Ok(false) => warn!("Reset attempt {} did not take", attempt),
                Err(e) => warn!("Reset attempt {} failed: {}", attempt, e),
            }
            self.stats.reset_retries += 1;
            self.clock.delay_us(RESET_RETRY_US);
        }
        false
    }

    fn try_reset_once(&mut self) -> Result<bool> {
        self.write_reg(REG_PWR_MGMT_1, BIT_H_RESET)?;
        // the chip starts asleep and takes a while to answer
        self.clock.delay_us(RESET_SETTLE_US);

        if self.read_reg(REG_PWR_MGMT_1, BusSpeed::High)? & BIT_H_RESET != 0 {
            return Ok(false);
        }

        self.write_checked(REG_PWR_MGMT_1, BITS_BESTCLOCK_PLL3)?;
        self.clock.delay_us(CLOCK_SETTLE_US);

        Ok(self.read_reg(REG_PWR_MGMT_1, BusSpeed::Low)? == BITS_BESTCLOCK_PLL3)
    }

    fn read_reg(&mut self, reg: u8, speed: BusSpeed) -> Result<u8> {
        let mut buf = [0u8; 1];
        let n = self.bus.read(reg, speed, &mut buf)?;
        if n != 1 {
            return Err(DriverError::TransferError {
                expected: 1,
                actual: n,
            });
        }
        Ok(buf[0])
    }

    /// Raw write; the shadow is left alone
    fn write_reg(&mut self, reg: u8, value: u8) -> Result<()> {
        self.bus.write(reg, value)
    }

    /// Write and record the value as the register's expected content
    fn write_checked(&mut self, reg: u8, value: u8) -> Result<()> {
        self.bus.write(reg, value)?;
        self.monitor.shadow_mut().record(reg, value);
        Ok(())
    }

    fn program_sample_rate(&mut self, hz: u32) -> Result<()> {
        let rate = SampleRate::from_hz(hz);
        self.write_checked(REG_SMPLRT_DIV, rate.register_value())?;
        self.sample_rate = rate;
        Ok(())
    }

    fn program_dlpf(&mut self, cutoff_hz: u16) -> Result<()> {
        let bucket = DlpfBucket::from_cutoff(cutoff_hz);
        self.write_checked(REG_CONFIG, bucket.register_bits())?;
        self.dlpf = bucket;
        self.config.onchip_filter_hz = cutoff_hz;
        Ok(())
    }

    fn program_accel_range(&mut self, max_g: u32) -> Result<()> {
        let range = AccelRange::for_max_g(max_g);
        self.write_checked(REG_ACCEL_CONFIG, range.register_bits())?;
        self.accel_range = range;
        self.accel_range_scale = range.scale();
        self.config.accel_range_g = range.g();
        Ok(())
    }

    /// One pass of the measurement pipeline
    ///
    /// Bus faults are returned as errors for this cycle only; the next
    /// cycle starts clean.
    pub fn measure(&mut self) -> Result<CycleOutcome> {
        if self.in_factory_test || self.monitor.in_cooldown(self.clock.now_us()) {
            return Ok(CycleOutcome::Skipped);
        }

        if self.monitor.needs_wake() {
            // full reset left the chip asleep; get the clock source back
            // before anything else is checked
            let value = self
                .monitor
                .shadow()
                .expected(REG_PWR_MGMT_1)
                .unwrap_or(BITS_BESTCLOCK_PLL3);
            self.write_reg(REG_PWR_MGMT_1, value)?;
            self.monitor.take_pending_wake();
        }

        self.stats.cycles += 1;

        let mut block = [0u8; DATA_BLOCK_LEN];
        let n = match self.bus.read(REG_INT_STATUS, BusSpeed::High, &mut block) {
            Ok(n) => n,
            Err(e) => {
                self.stats.bad_transfers += 1;
                return Err(e);
            }
        };
        if n != DATA_BLOCK_LEN {
            self.stats.bad_transfers += 1;
            return Err(DriverError::TransferError {
                expected: DATA_BLOCK_LEN,
                actual: n,
            });
        }

        if self.config.check_registers {
            self.check_registers();
        }

        if self
            .latch
            .is_duplicate(&block[BLOCK_ACCEL..BLOCK_ACCEL + 6])
        {
            self.stats.duplicates += 1;
            trace!("Duplicate accel sample");
            return Ok(CycleOutcome::Duplicate);
        }

        let accel = be_triplet(&block, BLOCK_ACCEL);
        let temperature_raw = be_i16(&block, BLOCK_TEMP);
        let gyro = be_triplet(&block, BLOCK_GYRO);

        if accel == [0; 3] && temperature_raw == 0 && gyro == [0; 3] {
            // probably a bus glitch; a reset is too costly to take here
            self.stats.bad_transfers += 1;
            debug!("All-zero sample");
            return Err(DriverError::ZeroSample);
        }

        self.stats.good_transfers += 1;

        if self.monitor.settle() {
            return Ok(CycleOutcome::Settling);
        }

        let accel = board_axes(accel);
        let gyro = board_axes(gyro);

        let timestamp_us = self.clock.now_us();
        let error_count = self.stats.error_count();

        let rotation = self.config.rotation;
        let accel_cal = self
            .accel_cal
            .apply(rotation.apply(to_f32(accel)), self.accel_range_scale);
        let gyro_cal = self
            .gyro_cal
            .apply(rotation.apply(to_f32(gyro)), self.gyro_range_scale);

        let accel_filtered = apply_filters(&mut self.accel_filters, accel_cal);
        let gyro_filtered = apply_filters(&mut self.gyro_filters, gyro_cal);

        let accel_window = self.accel_integrator.put(timestamp_us, accel_cal);
        let gyro_window = self.gyro_integrator.put(timestamp_us, gyro_cal);

        self.last_temperature = temperature_celsius(temperature_raw);

        let (accel_integral, accel_dt) = accel_window.unwrap_or(([0.0; 3], 0));
        let accel_report = AccelReport {
            timestamp_us,
            error_count,
            raw: accel,
            calibrated: accel_cal,
            filtered: accel_filtered,
            integral: accel_integral,
            integral_dt_us: accel_dt,
            scaling: self.accel_range_scale,
            range_m_s2: self.accel_range.range_m_s2(),
            temperature_raw,
            temperature: self.last_temperature,
        };

        let (gyro_integral, gyro_dt) = gyro_window.unwrap_or(([0.0; 3], 0));
        let gyro_report = GyroReport {
            timestamp_us,
            error_count,
            raw: gyro,
            calibrated: gyro_cal,
            filtered: gyro_filtered,
            integral: gyro_integral,
            integral_dt_us: gyro_dt,
            scaling: self.gyro_range_scale,
            range_rad_s: gyro_range_rad_s(),
        };

        self.accel_queue.force(accel_report);
        self.gyro_queue.force(gyro_report);

        let accel_window_closed = accel_window.is_some();
        let gyro_window_closed = gyro_window.is_some();

        if accel_window_closed {
            self.accel_windows += 1;
            if !self.publication_blocked {
                self.publisher.publish_accel(&accel_report);
            }
        }
        if gyro_window_closed {
            self.gyro_windows += 1;
            if !self.publication_blocked {
                self.publisher.publish_gyro(&gyro_report);
            }
        }

        Ok(CycleOutcome::Sampled {
            accel_window_closed,
            gyro_window_closed,
        })
    }

    /// Verify the checked register at the cursor and start recovery on a
    /// mismatch
    fn check_registers(&mut self) {
        let (register, _) = self.monitor.shadow().current();
        let value = match self.read_reg(register, BusSpeed::High) {
            Ok(v) => v,
            Err(e) => {
                // nothing learned about the register; retry next cycle
                debug!("Checked read of 0x{:02X} failed: {}", register, e);
                self.stats.bad_transfers += 1;
                return;
            }
        };

        let now = self.clock.now_us();
        let Some(recovery) = self.monitor.check(value, now) else {
            return;
        };
        self.stats.bad_registers += 1;

        let result = match recovery {
            Recovery::FullReset { deadline_us } => {
                warn!(
                    "Register 0x{:02X} read 0x{:02X}: full reset, holding until {} us",
                    register, value, deadline_us
                );
                self.write_reg(REG_PWR_MGMT_1, BIT_H_RESET)
            }
            Recovery::Patch {
                register,
                value: expected,
                deadline_us,
            } => {
                warn!(
                    "Register 0x{:02X} read 0x{:02X}, rewriting 0x{:02X}, holding until {} us",
                    register, value, expected, deadline_us
                );
                self.write_reg(register, expected)
            }
        };

        if let Err(e) = result {
            warn!("Recovery write failed: {}", e);
        }
    }

    /// Pop up to `max` accel reports
    ///
    /// In manual mode the queue is flushed and one fresh measurement taken
    /// first.
    pub fn read_accel(&mut self, max: usize) -> Result<Vec<AccelReport>> {
        if max == 0 {
            return Err(DriverError::BufferTooSmall);
        }
        if self.call_interval_us == 0 {
            self.accel_queue.flush();
            self.measure()?;
        }
        self.stats.accel_reads += 1;

        let reports: Vec<_> = std::iter::from_fn(|| self.accel_queue.get())
            .take(max)
            .collect();
        if reports.is_empty() {
            return Err(DriverError::NoData);
        }
        Ok(reports)
    }

    /// Pop up to `max` gyro reports (see [`read_accel`](Self::read_accel))
    pub fn read_gyro(&mut self, max: usize) -> Result<Vec<GyroReport>> {
        if max == 0 {
            return Err(DriverError::BufferTooSmall);
        }
        if self.call_interval_us == 0 {
            self.gyro_queue.flush();
            self.measure()?;
        }
        self.stats.gyro_reads += 1;

        let reports: Vec<_> = std::iter::from_fn(|| self.gyro_queue.get())
            .take(max)
            .collect();
        if reports.is_empty() {
            return Err(DriverError::NoData);
        }
        Ok(reports)
    }

    /// Set the sampling period and re-derive both channels' filters for it
    ///
    /// `interval_us == 0` selects manual mode and leaves the filters alone.
    pub fn set_call_interval(&mut self, interval_us: u64) -> Result<()> {
        self.call_interval_us = interval_us;
        if interval_us == 0 {
            return Ok(());
        }

        let sample_hz = 1.0e6 / interval_us as f32;
        let accel_cutoff = self.accel_filters[0].cutoff_freq();
        let gyro_cutoff = self.gyro_filters[0].cutoff_freq();
        for f in &mut self.accel_filters {
            f.set_cutoff_frequency(sample_hz, accel_cutoff);
        }
        for f in &mut self.gyro_filters {
            f.set_cutoff_frequency(sample_hz, gyro_cutoff);
        }
        // the chip has one DLPF for both sensors; the gyro setting wins
        // buckets take whole hertz; fractions are dropped
        self.program_dlpf(gyro_cutoff as u16)
    }

    pub fn call_interval_us(&self) -> u64 {
        self.call_interval_us
    }

    /// Rate the software filters are designed for
    fn filter_sample_hz(&self) -> f32 {
        if self.call_interval_us > 0 {
            1.0e6 / self.call_interval_us as f32
        } else {
            self.sample_rate.effective_hz as f32
        }
    }

    /// Reprogram the on-chip DLPF and the channel's software filters
    pub fn set_low_pass(&mut self, channel: Channel, cutoff_hz: f32) -> Result<()> {
        if cutoff_hz.is_nan() || cutoff_hz < 0.0 {
            return Err(DriverError::InvalidArgument(format!(
                "Low-pass cutoff must be >= 0 Hz, got {}",
                cutoff_hz
            )));
        }
        self.program_dlpf(cutoff_hz as u16)?;

        let sample_hz = self.filter_sample_hz();
        let filters = match channel {
            Channel::Accel => &mut self.accel_filters,
            Channel::Gyro => &mut self.gyro_filters,
        };
        for f in filters.iter_mut() {
            f.set_cutoff_frequency(sample_hz, cutoff_hz);
        }
        match channel {
            Channel::Accel => self.config.accel_filter_hz = cutoff_hz,
            Channel::Gyro => self.config.gyro_filter_hz = cutoff_hz,
        }
        Ok(())
    }

    pub fn low_pass(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Accel => self.accel_filters[0].cutoff_freq(),
            Channel::Gyro => self.gyro_filters[0].cutoff_freq(),
        }
    }

    pub fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        self.program_sample_rate(hz)?;
        self.config.sample_rate_hz = hz;
        Ok(())
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn dlpf(&self) -> DlpfBucket {
        self.dlpf
    }

    pub fn set_accel_range(&mut self, max_g: u32) -> Result<()> {
        self.program_accel_range(max_g)
    }

    pub fn accel_range(&self) -> AccelRange {
        self.accel_range
    }

    /// Resize one channel's report queue (1-100); unread reports are lost
    pub fn set_queue_depth(&mut self, channel: Channel, depth: usize) -> Result<()> {
        match channel {
            Channel::Accel => self.accel_queue.resize(depth),
            Channel::Gyro => self.gyro_queue.resize(depth),
        }
    }

    pub fn queue_depth(&self, channel: Channel) -> usize {
        match channel {
            Channel::Accel => self.accel_queue.capacity(),
            Channel::Gyro => self.gyro_queue.capacity(),
        }
    }

    /// Accept accel calibration only if the axis scales sum to more than 2
    /// and less than 4; otherwise the current calibration stays
    pub fn set_accel_calibration(&mut self, cal: Calibration) -> Result<()> {
        let sum = cal.x_scale + cal.y_scale + cal.z_scale;
        if sum > 2.0 && sum < 4.0 {
            self.accel_cal = cal;
            Ok(())
        } else {
            Err(DriverError::InvalidArgument(format!(
                "Accel scale sum {} outside (2, 4)",
                sum
            )))
        }
    }

    pub fn accel_calibration(&self) -> Calibration {
        self.accel_cal
    }

    /// Stored as given, no validation
    pub fn set_gyro_calibration(&mut self, cal: Calibration) {
        self.gyro_cal = cal;
    }

    pub fn gyro_calibration(&self) -> Calibration {
        self.gyro_cal
    }

    /// Make sure at least one cycle reached the bus
    fn ensure_sampled(&mut self) -> bool {
        if self.stats.cycles == 0 {
            if let Err(e) = self.measure() {
                debug!("Self-test measurement failed: {}", e);
            }
        }
        self.stats.cycles > 0
    }

    /// Sanity check of the stored accel calibration
    ///
    /// An offset of exactly zero or a scale of exactly one means the axis
    /// was never calibrated.
    pub fn accel_self_test(&mut self) -> bool {
        if !self.ensure_sampled() {
            return false;
        }
        let cal = self.accel_cal;
        let offsets_ok = cal.offsets().iter().all(|o| o.abs() >= 1e-6);
        let scales_ok = cal.scales().iter().all(|s| {
            let dev = (s - 1.0).abs();
            dev <= 0.4 && dev >= 1e-6
        });
        offsets_ok && scales_ok
    }

    /// Sanity check of the stored gyro calibration
    pub fn gyro_self_test(&mut self) -> bool {
        if !self.ensure_sampled() {
            return false;
        }
        let cal = self.gyro_cal;
        let offsets = cal.offsets();
        let offsets_ok = offsets.iter().all(|o| o.abs() <= 0.34);
        let scales_ok = cal.scales().iter().all(|s| (s - 1.0).abs() <= 0.3);
        let calibrated = !offsets.iter().all(|o| o.abs() < 1e-6);
        offsets_ok && scales_ok && calibrated
    }

    /// Forget sampling history; used when periodic sampling stops or starts
    pub fn clear_sampling_state(&mut self) {
        self.latch.clear();
        self.accel_queue.flush();
        self.gyro_queue.flush();
    }

    pub fn set_publication_blocked(&mut self, blocked: bool) {
        self.publication_blocked = blocked;
    }

    pub fn publication_blocked(&self) -> bool {
        self.publication_blocked
    }

    /// Registers 0..=108 as (register, value)
    pub fn register_dump(&mut self) -> Result<Vec<(u8, u8)>> {
        (0..=REG_DUMP_LAST)
            .map(|reg| Ok((reg, self.read_reg(reg, BusSpeed::Low)?)))
            .collect()
    }

    /// Read the data block at the slow clock while sampling is held off,
    /// then dump the registers
    pub fn test_error(&mut self) -> Result<Vec<(u8, u8)>> {
        self.in_factory_test = true;
        let mut block = [0u8; DATA_BLOCK_LEN];
        let result = self.bus.read(REG_INT_STATUS, BusSpeed::Low, &mut block);
        self.in_factory_test = false;

        let n = result?;
        info!("Low-speed data block ({} bytes): {:02X?}", n, &block[..n]);
        self.register_dump()
    }

    /// Diagnostic snapshot, including a live comparison of every checked
    /// register against its shadow
    pub fn info(&mut self) -> DriverInfo {
        let expected: Vec<(u8, u8)> = self.monitor.shadow().iter().collect();
        let mut mismatches = Vec::new();
        for (register, expected) in expected {
            match self.read_reg(register, BusSpeed::Low) {
                Ok(actual) if actual != expected => mismatches.push(RegisterMismatch {
                    register,
                    expected,
                    actual,
                }),
                Ok(_) => {}
                Err(e) => warn!("Could not read 0x{:02X}: {}", register, e),
            }
        }

        DriverInfo {
            stats: self.stats,
            poll_interval_us: self.call_interval_us,
            accel_queue_len: self.accel_queue.len(),
            accel_queue_depth: self.accel_queue.capacity(),
            gyro_queue_len: self.gyro_queue.len(),
            gyro_queue_depth: self.gyro_queue.capacity(),
            accel_overwritten: self.accel_queue.overwritten(),
            gyro_overwritten: self.gyro_queue.overwritten(),
            checked_cursor: self.monitor.shadow().cursor(),
            register_wait: self.monitor.register_wait(),
            recovery_deadline_us: self.monitor.reset_wait_us(),
            mismatches,
            temperature: self.last_temperature,
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Last die temperature in degrees Celsius
    pub fn temperature(&self) -> f32 {
        self.last_temperature
    }

    /// Closed integration windows so far
    pub fn windows(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Accel => self.accel_windows,
            Channel::Gyro => self.gyro_windows,
        }
    }

    pub fn device_id(&self) -> u32 {
        self.bus.device_id()
    }

    pub fn is_external(&self) -> bool {
        self.bus.is_external()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::{FULL_RESET_WAIT_US, REGISTER_WAIT_CYCLES};
    use crate::publish::{ChannelPublisher, NullPublisher, SensorReport};
    use crate::sim::{RawSample, SimHandle, SimulatedIcm20602};

    fn setup(config: DriverConfig) -> (DriverCore, SimHandle, Arc<ManualClock>) {
        let sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        let clock = Arc::new(ManualClock::new(1_000));
        let mut core = DriverCore::new(
            Box::new(sim),
            clock.clone(),
            Box::new(NullPublisher),
            config,
        );
        core.init().unwrap();
        (core, handle, clock)
    }

    fn step(core: &mut DriverCore, clock: &ManualClock) -> Result<CycleOutcome> {
        clock.advance(1_000);
        core.measure()
    }

    #[test]
    fn test_bring_up_programs_configuration() {
        let (core, sim, _) = setup(DriverConfig {
            accel_range_g: 16,
            sample_rate_hz: 500,
            ..Default::default()
        });
        assert_eq!(sim.register(REG_PWR_MGMT_1), BITS_BESTCLOCK_PLL3);
        assert_eq!(sim.register(REG_SMPLRT_DIV), 1);
        assert_eq!(sim.register(REG_CONFIG), BITS_DLPF_CFG_42HZ);
        assert_eq!(sim.register(REG_GYRO_CONFIG), BITS_FS_2000DPS);
        assert_eq!(sim.register(REG_ACCEL_CONFIG), 0x18);
        assert_eq!(sim.register(REG_INT_ENABLE), BIT_DATA_RDY_INT_EN);
        assert_eq!(sim.register(REG_INT_PIN_CFG), BIT_INT_ANYRD_2CLEAR);
        assert_eq!(core.accel_range(), AccelRange::G16);
        assert_eq!(core.sample_rate().effective_hz, 500);
        assert_eq!(core.stats().reset_retries, 0);
    }

    #[test]
    fn test_bring_up_retries_stuck_reset() {
        let sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        handle.fail_resets(2);
        let mut core = DriverCore::new(
            Box::new(sim),
            Arc::new(ManualClock::new(1)),
            Box::new(NullPublisher),
            DriverConfig::default(),
        );
        core.init().unwrap();
        assert_eq!(core.stats().reset_retries, 2);
        assert_eq!(handle.reset_count(), 3);
    }

    #[test]
    fn test_bring_up_gives_up() {
        let sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        handle.fail_resets(10);
        let mut core = DriverCore::new(
            Box::new(sim),
            Arc::new(ManualClock::new(1)),
            Box::new(NullPublisher),
            DriverConfig::default(),
        );
        assert!(matches!(
            core.init(),
            Err(DriverError::HardwareUnavailable { attempts: 4 })
        ));
        assert_eq!(core.stats().reset_retries, 4);
        assert_eq!(handle.reset_count(), 4);
    }

    #[test]
    fn test_probe_rejects_wrong_id() {
        let sim = SimulatedIcm20602::new();
        sim.handle().corrupt_register(REG_WHO_AM_I, 0x68);
        let mut core = DriverCore::new(
            Box::new(sim),
            Arc::new(ManualClock::new(1)),
            Box::new(NullPublisher),
            DriverConfig::default(),
        );
        assert!(matches!(core.probe(), Err(DriverError::InvalidDeviceId(0x68))));
    }

    #[test]
    fn test_measure_scales_gravity() {
        let (mut core, sim, clock) = setup(DriverConfig::default());
        // sensor frame: gravity on z, 100 counts on x
        sim.push_sample(RawSample::new([100, 0, 4096], 0, [0, 0, 0]));
        clock.advance(1_000);

        // manual mode: the read takes the measurement itself
        let report = core.read_accel(1).unwrap()[0];
        assert_eq!(report.raw, [0, -100, 4096]);
        assert!((report.calibrated[2] - ONE_G).abs() < 1e-4);
        assert!((report.range_m_s2 - 8.0 * ONE_G).abs() < 1e-3);
        assert_eq!(report.temperature, 25.0);
    }

    #[test]
    fn test_duplicate_is_dropped_once() {
        let (mut core, sim, clock) = setup(DriverConfig::default());
        let sample = RawSample::new([1, 2, 3], 10, [4, 5, 6]);
        sim.push_sample(sample);
        sim.push_sample(sample);
        sim.push_sample(sample);

        assert!(matches!(step(&mut core, &clock), Ok(CycleOutcome::Sampled { .. })));
        assert_eq!(step(&mut core, &clock).unwrap(), CycleOutcome::Duplicate);
        assert!(matches!(step(&mut core, &clock), Ok(CycleOutcome::Sampled { .. })));
        assert_eq!(core.stats().duplicates, 1);
    }

    #[test]
    fn test_zero_sample_is_transient() {
        let (mut core, sim, clock) = setup(DriverConfig::default());
        step(&mut core, &clock).unwrap();
        sim.inject_zero_samples(1);
        assert!(matches!(step(&mut core, &clock), Err(DriverError::ZeroSample)));
        assert_eq!(core.stats().bad_transfers, 1);
        assert_eq!(sim.reset_count(), 1);
        assert!(matches!(step(&mut core, &clock), Ok(CycleOutcome::Sampled { .. })));
    }

    #[test]
    fn test_short_transfer_counts_as_bad() {
        let (mut core, sim, clock) = setup(DriverConfig::default());
        sim.inject_short_reads(1);
        assert!(matches!(
            step(&mut core, &clock),
            Err(DriverError::TransferError { expected: 15, actual: 14 })
        ));
        assert_eq!(core.stats().error_count(), 1);
    }

    #[test]
    fn test_full_reset_recovery_restores_clock() {
        let (mut core, sim, clock) = setup(DriverConfig::default());
        sim.corrupt_register(REG_PWR_MGMT_1, 0x01);
        step(&mut core, &clock).unwrap();
        assert_eq!(core.stats().bad_registers, 1);
        assert_eq!(sim.reset_count(), 2);

        // cooldown: no bus traffic
        sim.clear_log();
        assert_eq!(step(&mut core, &clock).unwrap(), CycleOutcome::Skipped);
        assert!(sim.log().is_empty());

        clock.advance(10_000);
        core.measure().unwrap();
        assert_eq!(sim.register(REG_PWR_MGMT_1), BITS_BESTCLOCK_PLL3);
    }

    #[test]
    fn test_recovery_converges() {
        let (mut core, sim, clock) = setup(DriverConfig::default());
        sim.corrupt_register(REG_PWR_MGMT_1, 0x01);

        let mut published = false;
        for _ in 0..200 {
            if let Ok(CycleOutcome::Sampled { .. }) = step(&mut core, &clock) {
                published = true;
                break;
            }
        }
        assert!(published);
        assert!(core.info().mismatches.is_empty());
        assert_eq!(core.health().register_wait(), 0);
    }

    #[test]
    fn test_mismatch_arms_settle_counter() {
        let (mut core, sim, clock) = setup(DriverConfig {
            check_registers: false,
            ..Default::default()
        });
        step(&mut core, &clock).unwrap();
        assert_eq!(core.health().register_wait(), 0);

        core.config.check_registers = true;
        sim.corrupt_register(REG_PWR_MGMT_1, 0x00);
        assert_eq!(step(&mut core, &clock).unwrap(), CycleOutcome::Settling);
        // the cycle that found the mismatch already counts as one good transfer
        assert_eq!(core.health().register_wait(), REGISTER_WAIT_CYCLES - 1);
    }

    #[test]
    fn test_publication_follows_integration_window() {
        let sim = SimulatedIcm20602::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let (publisher, rx) = ChannelPublisher::channel();
        let mut core = DriverCore::new(
            Box::new(sim),
            clock.clone(),
            Box::new(publisher),
            DriverConfig::default(),
        );
        core.init().unwrap();

        for _ in 0..10 {
            let _ = step(&mut core, &clock);
        }
        let published: Vec<SensorReport> = rx.try_iter().collect();
        assert!(!published.is_empty());
        for report in &published {
            match report {
                SensorReport::Accel(r) => assert!(r.integral_dt_us >= 3_571),
                SensorReport::Gyro(r) => assert!(r.integral_dt_us >= 3_571),
            }
        }

        core.set_publication_blocked(true);
        for _ in 0..10 {
            let _ = step(&mut core, &clock);
        }
        assert_eq!(rx.try_iter().count(), 0);
        assert!(core.windows(Channel::Accel) > 0);
    }

    #[test]
    fn test_manual_read_measures() {
        let (mut core, sim, _) = setup(DriverConfig::default());
        let before = sim.data_reads();
        let reports = core.read_gyro(4).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(sim.data_reads(), before + 1);
        assert!(matches!(core.read_gyro(0), Err(DriverError::BufferTooSmall)));
    }

    #[test]
    fn test_calibration_rejection_keeps_previous() {
        let (mut core, _, _) = setup(DriverConfig::default());
        let good = Calibration {
            x_scale: 1.01,
            y_scale: 0.99,
            z_scale: 1.0,
            ..Calibration::IDENTITY
        };
        core.set_accel_calibration(good).unwrap();

        let bad = Calibration {
            x_scale: 2.0,
            y_scale: 2.0,
            z_scale: 1.0,
            ..Calibration::IDENTITY
        };
        assert!(matches!(
            core.set_accel_calibration(bad),
            Err(DriverError::InvalidArgument(_))
        ));
        assert_eq!(core.accel_calibration(), good);

        // gyro setter takes anything
        core.set_gyro_calibration(bad);
        assert_eq!(core.gyro_calibration(), bad);
    }

    #[test]
    fn test_self_tests() {
        let (mut core, _, _) = setup(DriverConfig::default());
        // identity calibration means never calibrated
        assert!(!core.accel_self_test());
        assert!(!core.gyro_self_test());
        assert_eq!(core.stats().cycles, 1);

        core.set_accel_calibration(Calibration {
            x_offset: 0.1,
            x_scale: 1.02,
            y_offset: -0.05,
            y_scale: 0.98,
            z_offset: 0.2,
            z_scale: 1.01,
        })
        .unwrap();
        assert!(core.accel_self_test());

        core.set_gyro_calibration(Calibration {
            x_offset: 0.01,
            ..Calibration::IDENTITY
        });
        assert!(core.gyro_self_test());

        core.set_gyro_calibration(Calibration {
            x_offset: 0.5,
            ..Calibration::IDENTITY
        });
        assert!(!core.gyro_self_test());
    }

    #[test]
    fn test_low_pass_programs_dlpf_and_filters() {
        let (mut core, sim, _) = setup(DriverConfig::default());
        core.set_low_pass(Channel::Accel, 15.0).unwrap();
        assert_eq!(core.dlpf(), DlpfBucket::Hz20);
        assert_eq!(sim.register(REG_CONFIG), BITS_DLPF_CFG_20HZ);
        assert_eq!(core.low_pass(Channel::Accel), 15.0);
        assert_eq!(core.low_pass(Channel::Gyro), DEFAULT_DRIVER_FILTER_HZ);
    }

    #[test]
    fn test_fractional_cutoff_is_truncated() {
        let (mut core, sim, _) = setup(DriverConfig::default());
        core.set_low_pass(Channel::Gyro, 5.6).unwrap();
        assert_eq!(core.dlpf(), DlpfBucket::Hz5);
        assert_eq!(sim.register(REG_CONFIG), BITS_DLPF_CFG_5HZ);

        core.set_low_pass(Channel::Gyro, 10.9).unwrap();
        assert_eq!(sim.register(REG_CONFIG), BITS_DLPF_CFG_10HZ);

        // the gyro cutoff is reapplied when the poll interval changes
        core.set_call_interval(1_000).unwrap();
        assert_eq!(sim.register(REG_CONFIG), BITS_DLPF_CFG_10HZ);
    }

    #[test]
    fn test_register_dump_and_test_error() {
        let (mut core, _, _) = setup(DriverConfig::default());
        let dump = core.register_dump().unwrap();
        assert_eq!(dump.len(), 109);
        assert!(dump.contains(&(REG_PWR_MGMT_1, BITS_BESTCLOCK_PLL3)));

        let dump = core.test_error().unwrap();
        assert_eq!(dump.len(), 109);
        assert!(!core.in_factory_test);
    }

    #[test]
    fn test_info_reports_mismatch() {
        let (mut core, sim, _) = setup(DriverConfig::default());
        sim.corrupt_register(REG_GYRO_CONFIG, 0x00);
        let info = core.info();
        assert_eq!(
            info.mismatches,
            vec![RegisterMismatch {
                register: REG_GYRO_CONFIG,
                expected: BITS_FS_2000DPS,
                actual: 0x00
            }]
        );
        assert!(info.to_string().contains("reg 0x1B is 0x00 should be 0x18"));
    }

    #[test]
    fn test_info_counts_overwritten_reports() {
        let (mut core, _, clock) = setup(DriverConfig::default());
        core.set_queue_depth(Channel::Accel, 1).unwrap();

        let mut sampled = 0;
        for _ in 0..5 {
            if let Ok(CycleOutcome::Sampled { .. }) = step(&mut core, &clock) {
                sampled += 1;
            }
        }
        assert!(sampled >= 3);

        let info = core.info();
        assert_eq!(info.accel_queue_len, 1);
        assert_eq!(info.accel_overwritten, sampled - 1);
        assert_eq!(info.gyro_overwritten, sampled - DEFAULT_QUEUE_DEPTH as u64);
        assert!(info
            .to_string()
            .contains(&format!("accel queue:     1/1 ({} overwritten)", sampled - 1)));
    }

    #[test]
    fn test_info_reports_recovery_deadline() {
        let (mut core, sim, clock) = setup(DriverConfig::default());
        assert_eq!(core.info().recovery_deadline_us, 0);
        assert!(!core.info().to_string().contains("recovery until"));

        sim.corrupt_register(REG_PWR_MGMT_1, 0x01);
        step(&mut core, &clock).unwrap();
        let info = core.info();
        // the reset itself waits on the clock, so the deadline is already
        // partly consumed
        assert!(info.recovery_deadline_us > clock.now_us());
        assert!(info.recovery_deadline_us <= clock.now_us() + FULL_RESET_WAIT_US);
        assert!(info.to_string().contains("recovery until"));
    }
}
