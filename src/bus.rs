//! Register bus abstraction
//!
//! The driver talks to the sensor only through [`RegisterBus`]. Transfers are
//! bounded-time: an implementation must return (with data or an error) and
//! never block indefinitely, since the pipeline calls it from the sampling
//! context.

use std::fmt;

use crate::error::Result;

/// Bus clock selection for a transfer
///
/// The ICM-20602 only tolerates the fast clock on the sensor data and
/// interrupt status registers; configuration registers are written slowly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusSpeed {
    /// 1 MHz, valid for every register
    Low,
    /// 20 MHz, data/status registers
    High,
}

impl BusSpeed {
    /// SPI clock in Hz for this speed
    pub fn clock_hz(self) -> u32 {
        match self {
            BusSpeed::Low => 1_000_000,
            BusSpeed::High => 20_000_000,
        }
    }
}

/// Which physical bus a driver instance lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusId {
    /// Sensor on the main board
    Internal,
    /// Sensor on an external connector
    External,
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusId::Internal => write!(f, "internal"),
            BusId::External => write!(f, "external"),
        }
    }
}

/// Raw register access to the sensor
pub trait RegisterBus: Send {
    /// Read `buf.len()` consecutive registers starting at `reg`
    ///
    /// Returns the number of bytes actually transferred.
    fn read(&mut self, reg: u8, speed: BusSpeed, buf: &mut [u8]) -> Result<usize>;

    /// Write one register (always at low speed)
    fn write(&mut self, reg: u8, value: u8) -> Result<()>;

    /// True if the sensor is not on the main board
    fn is_external(&self) -> bool;

    /// Encoded device id (bus type, bus, address, devtype)
    fn device_id(&self) -> u32;
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn read(&mut self, reg: u8, speed: BusSpeed, buf: &mut [u8]) -> Result<usize> {
        (**self).read(reg, speed, buf)
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        (**self).write(reg, value)
    }

    fn is_external(&self) -> bool {
        (**self).is_external()
    }

    fn device_id(&self) -> u32 {
        (**self).device_id()
    }
}
