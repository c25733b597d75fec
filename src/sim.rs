//! Simulated ICM-20602 on an in-process register bus
//!
//! Models the register file closely enough to run bring-up, the health
//! monitor and the measurement pipeline without hardware: a full-reset
//! command restores power-on defaults, the data block is served from a
//! script of samples (or synthesized), and faults can be injected through a
//! [`SimHandle`] while the bus itself is owned by the driver.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bus::{BusSpeed, RegisterBus};
use crate::config::AccelRange;
use crate::error::{DriverError, Result};
use crate::registers::*;

const REGISTER_COUNT: usize = 128;

/// Most recent bus transactions kept in the log; older ones are dropped
pub const LOG_CAPACITY: usize = 4096;

/// Power-on value of PWR_MGMT_1: asleep, internal oscillator
pub const PWR_MGMT_1_RESET_VALUE: u8 = BIT_SLEEP | 0x01;

/// One recorded bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read { reg: u8, speed: BusSpeed, len: usize },
    Write { reg: u8, value: u8 },
}

/// Sensor-frame sample as the chip would report it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub accel: [i16; 3],
    pub temperature: i16,
    pub gyro: [i16; 3],
}

impl RawSample {
    pub fn new(accel: [i16; 3], temperature: i16, gyro: [i16; 3]) -> Self {
        Self {
            accel,
            temperature,
            gyro,
        }
    }

    /// Big-endian image of the 14 data bytes following INT_STATUS
    fn to_block(self) -> [u8; DATA_BLOCK_LEN - 1] {
        let mut bytes = [0u8; DATA_BLOCK_LEN - 1];
        let words = [
            self.accel[0],
            self.accel[1],
            self.accel[2],
            self.temperature,
            self.gyro[0],
            self.gyro[1],
            self.gyro[2],
        ];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }
}

#[derive(Debug)]
struct SimState {
    registers: [u8; REGISTER_COUNT],
    log: VecDeque<BusOp>,
    data_reads: usize,
    script: VecDeque<RawSample>,
    synth_counter: u16,
    zero_samples: u32,
    short_reads: u32,
    stuck_resets: u32,
    unresponsive: bool,
    external: bool,
    resets: u32,
}

impl SimState {
    fn new(external: bool) -> Self {
        let mut state = Self {
            registers: [0; REGISTER_COUNT],
            log: VecDeque::with_capacity(LOG_CAPACITY),
            data_reads: 0,
            script: VecDeque::new(),
            synth_counter: 0,
            zero_samples: 0,
            short_reads: 0,
            stuck_resets: 0,
            unresponsive: false,
            external,
            resets: 0,
        };
        state.power_on_defaults();
        state
    }

    fn record(&mut self, op: BusOp) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(op);
    }

    fn power_on_defaults(&mut self) {
        self.registers = [0; REGISTER_COUNT];
        self.registers[REG_PWR_MGMT_1 as usize] = PWR_MGMT_1_RESET_VALUE;
        self.registers[REG_WHO_AM_I as usize] = WHO_AM_I_VALUE;
    }

    fn accel_range(&self) -> AccelRange {
        match (self.registers[REG_ACCEL_CONFIG as usize] >> 3) & 0x03 {
            0 => AccelRange::G2,
            1 => AccelRange::G4,
            2 => AccelRange::G8,
            _ => AccelRange::G16,
        }
    }

    /// Level board: 1 g on z, x ramps so consecutive samples differ
    fn synthesize(&mut self) -> RawSample {
        self.synth_counter = self.synth_counter.wrapping_add(1);
        let ramp = (self.synth_counter % 64) as i16 - 32;
        RawSample {
            accel: [ramp, 0, self.accel_range().lsb_per_g() as i16],
            temperature: 1634,
            gyro: [0, ramp / 4, 0],
        }
    }

    fn load_next_sample(&mut self) {
        let block = if self.zero_samples > 0 {
            self.zero_samples -= 1;
            [0u8; DATA_BLOCK_LEN - 1]
        } else {
            let sample = match self.script.pop_front() {
                Some(sample) => sample,
                None => self.synthesize(),
            };
            sample.to_block()
        };

        self.registers[REG_INT_STATUS as usize] = BIT_DATA_RDY_INT_EN;
        let start = REG_ACCEL_XOUT_H as usize;
        self.registers[start..start + block.len()].copy_from_slice(&block);
    }
}

/// Simulated sensor implementing [`RegisterBus`]
pub struct SimulatedIcm20602 {
    state: Arc<Mutex<SimState>>,
}

/// Inspection and fault-injection handle sharing state with a
/// [`SimulatedIcm20602`]
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedIcm20602 {
    /// Simulated sensor on the internal bus, in its power-on state
    pub fn new() -> Self {
        Self::with_placement(false)
    }

    pub fn with_placement(external: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(external))),
        }
    }

    /// Handle for tests and demos to inspect or disturb the sensor
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedIcm20602 {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for SimulatedIcm20602 {
    fn read(&mut self, reg: u8, speed: BusSpeed, buf: &mut [u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        state.record(BusOp::Read {
            reg,
            speed,
            len: buf.len(),
        });

        if state.unresponsive {
            return Err(DriverError::Bus("no response from sensor".into()));
        }

        let is_data_read = reg == REG_INT_STATUS && buf.len() > 1;
        if is_data_read {
            state.data_reads += 1;
            state.load_next_sample();
        }

        let start = reg as usize;
        let available = REGISTER_COUNT.saturating_sub(start).min(buf.len());
        buf[..available].copy_from_slice(&state.registers[start..start + available]);

        if is_data_read && state.short_reads > 0 {
            state.short_reads -= 1;
            return Ok(available.saturating_sub(1));
        }

        Ok(available)
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        let mut state = lock(&self.state);
        state.record(BusOp::Write { reg, value });

        if state.unresponsive {
            return Err(DriverError::Bus("no response from sensor".into()));
        }

        match reg {
            REG_PWR_MGMT_1 if value & BIT_H_RESET != 0 => {
                state.resets += 1;
                state.power_on_defaults();
                if state.stuck_resets > 0 {
                    state.stuck_resets -= 1;
                    state.registers[REG_PWR_MGMT_1 as usize] |= BIT_H_RESET;
                }
            }
            REG_WHO_AM_I | REG_INT_STATUS => {}
            r if (r as usize) < REGISTER_COUNT => state.registers[r as usize] = value,
            _ => {
                return Err(DriverError::Bus(format!(
                    "register 0x{:02X} out of range",
                    reg
                )))
            }
        }
        Ok(())
    }

    fn is_external(&self) -> bool {
        lock(&self.state).external
    }

    fn device_id(&self) -> u32 {
        let bus = if self.is_external() { 1 } else { 0 };
        encode_device_id(BusType::Simulated, bus, 0, DEVTYPE_ICM20602)
    }
}

impl SimHandle {
    /// Current content of a register (not logged)
    pub fn register(&self, reg: u8) -> u8 {
        lock(&self.state).registers[reg as usize]
    }

    /// Overwrite a register behind the driver's back
    pub fn corrupt_register(&self, reg: u8, value: u8) {
        lock(&self.state).registers[reg as usize] = value;
    }

    /// Queue a sample for the next data-block read
    pub fn push_sample(&self, sample: RawSample) {
        lock(&self.state).script.push_back(sample);
    }

    /// Next `count` data-block reads return all zeros
    pub fn inject_zero_samples(&self, count: u32) {
        lock(&self.state).zero_samples = count;
    }

    /// Next `count` data-block reads come back one byte short
    pub fn inject_short_reads(&self, count: u32) {
        lock(&self.state).short_reads = count;
    }

    /// Next `count` reset commands leave the reset bit set
    pub fn fail_resets(&self, count: u32) {
        lock(&self.state).stuck_resets = count;
    }

    /// Make every transfer fail with a bus error
    pub fn set_unresponsive(&self, unresponsive: bool) {
        lock(&self.state).unresponsive = unresponsive;
    }

    /// Full-reset commands received so far
    pub fn reset_count(&self) -> u32 {
        lock(&self.state).resets
    }

    /// Transaction log since creation or the last [`clear_log`](Self::clear_log),
    /// limited to the latest [`LOG_CAPACITY`] entries
    pub fn log(&self) -> Vec<BusOp> {
        lock(&self.state).log.iter().copied().collect()
    }

    pub fn clear_log(&self) {
        lock(&self.state).log.clear();
    }

    /// Values written to `reg` still in the log, oldest first
    pub fn writes_to(&self, reg: u8) -> Vec<u8> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(|op| match *op {
                BusOp::Write { reg: r, value } if r == reg => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Number of data-block fetches since creation
    pub fn data_reads(&self) -> usize {
        lock(&self.state).data_reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_state() {
        let mut sim = SimulatedIcm20602::new();
        let mut buf = [0u8; 1];
        sim.read(REG_WHO_AM_I, BusSpeed::Low, &mut buf).unwrap();
        assert_eq!(buf[0], WHO_AM_I_VALUE);
        sim.read(REG_PWR_MGMT_1, BusSpeed::Low, &mut buf).unwrap();
        assert_eq!(buf[0], PWR_MGMT_1_RESET_VALUE);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        sim.write(REG_CONFIG, BITS_DLPF_CFG_20HZ).unwrap();
        sim.write(REG_PWR_MGMT_1, BIT_H_RESET).unwrap();
        assert_eq!(handle.register(REG_CONFIG), 0);
        assert_eq!(handle.register(REG_PWR_MGMT_1), PWR_MGMT_1_RESET_VALUE);
        assert_eq!(handle.reset_count(), 1);
    }

    #[test]
    fn test_stuck_reset_bit() {
        let mut sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        handle.fail_resets(1);
        sim.write(REG_PWR_MGMT_1, BIT_H_RESET).unwrap();
        assert_ne!(handle.register(REG_PWR_MGMT_1) & BIT_H_RESET, 0);
        sim.write(REG_PWR_MGMT_1, BIT_H_RESET).unwrap();
        assert_eq!(handle.register(REG_PWR_MGMT_1) & BIT_H_RESET, 0);
    }

    #[test]
    fn test_scripted_sample_is_big_endian() {
        let mut sim = SimulatedIcm20602::new();
        sim.handle()
            .push_sample(RawSample::new([0x0102, -2, 3], 0x0405, [6, 7, -32768]));

        let mut block = [0u8; DATA_BLOCK_LEN];
        let n = sim.read(REG_INT_STATUS, BusSpeed::High, &mut block).unwrap();
        assert_eq!(n, DATA_BLOCK_LEN);
        assert_eq!(&block[BLOCK_ACCEL..BLOCK_ACCEL + 4], &[0x01, 0x02, 0xFF, 0xFE]);
        assert_eq!(&block[BLOCK_TEMP..BLOCK_TEMP + 2], &[0x04, 0x05]);
        assert_eq!(&block[BLOCK_GYRO + 4..], &[0x80, 0x00]);
    }

    #[test]
    fn test_zero_and_short_injection() {
        let mut sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        handle.inject_zero_samples(1);
        handle.inject_short_reads(1);

        let mut block = [0xAAu8; DATA_BLOCK_LEN];
        let n = sim.read(REG_INT_STATUS, BusSpeed::High, &mut block).unwrap();
        assert_eq!(n, DATA_BLOCK_LEN - 1);
        assert!(block[BLOCK_ACCEL..].iter().all(|&b| b == 0));

        let n = sim.read(REG_INT_STATUS, BusSpeed::High, &mut block).unwrap();
        assert_eq!(n, DATA_BLOCK_LEN);
        assert_eq!(handle.data_reads(), 2);
    }

    #[test]
    fn test_unresponsive() {
        let mut sim = SimulatedIcm20602::new();
        sim.handle().set_unresponsive(true);
        let mut buf = [0u8; 1];
        assert!(sim.read(REG_WHO_AM_I, BusSpeed::Low, &mut buf).is_err());
        assert!(sim.write(REG_CONFIG, 0).is_err());
    }

    #[test]
    fn test_transaction_log() {
        let mut sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        sim.write(REG_SMPLRT_DIV, 4).unwrap();
        let mut buf = [0u8; 1];
        sim.read(REG_SMPLRT_DIV, BusSpeed::High, &mut buf).unwrap();
        assert_eq!(
            handle.log(),
            vec![
                BusOp::Write {
                    reg: REG_SMPLRT_DIV,
                    value: 4
                },
                BusOp::Read {
                    reg: REG_SMPLRT_DIV,
                    speed: BusSpeed::High,
                    len: 1
                },
            ]
        );
        assert_eq!(handle.writes_to(REG_SMPLRT_DIV), vec![4]);
    }

    #[test]
    fn test_log_keeps_latest_transactions() {
        let mut sim = SimulatedIcm20602::new();
        let handle = sim.handle();
        let mut block = [0u8; DATA_BLOCK_LEN];
        for _ in 0..LOG_CAPACITY * 3 {
            sim.read(REG_INT_STATUS, BusSpeed::High, &mut block).unwrap();
        }
        sim.write(REG_SMPLRT_DIV, 9).unwrap();

        let log = handle.log();
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(
            log.last(),
            Some(&BusOp::Write {
                reg: REG_SMPLRT_DIV,
                value: 9
            })
        );
        // the fetch count is not limited by the log
        assert_eq!(handle.data_reads(), LOG_CAPACITY * 3);
        assert_eq!(handle.writes_to(REG_SMPLRT_DIV), vec![9]);
    }

    #[test]
    fn test_device_id_and_placement() {
        let sim = SimulatedIcm20602::with_placement(true);
        assert!(sim.is_external());
        let id = sim.device_id();
        assert_eq!(id & 0x07, BusType::Simulated as u32);
        assert_eq!((id >> 16) & 0xFF, DEVTYPE_ICM20602 as u32);
    }
}
