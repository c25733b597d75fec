//! At most one driver per bus

use std::collections::HashMap;

use log::info;

use crate::bus::BusId;
use crate::device::{AccelNode, GyroNode, Icm20602};
use crate::error::{DriverError, Result};

/// Running drivers keyed by the bus they sit on
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<BusId, Icm20602>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct, start and register a driver for `bus`
    ///
    /// `factory` only runs when no driver is registered for the bus yet.
    pub fn start<F>(&mut self, bus: BusId, factory: F) -> Result<&Icm20602>
    where
        F: FnOnce() -> Result<Icm20602>,
    {
        if self.drivers.contains_key(&bus) {
            return Err(DriverError::AlreadyStarted(bus));
        }

        let driver = factory()?;
        driver.start()?;
        info!("Started driver on {} bus", bus);
        Ok(self.drivers.entry(bus).or_insert(driver))
    }

    pub fn get(&self, bus: BusId) -> Option<&Icm20602> {
        self.drivers.get(&bus)
    }

    /// Stop and drop the driver for `bus`
    pub fn stop(&mut self, bus: BusId) -> Result<()> {
        let driver = self.drivers.remove(&bus).ok_or(DriverError::NotRunning)?;
        driver.stop()?;
        info!("Stopped driver on {} bus", bus);
        Ok(())
    }

    pub fn running(&self) -> Vec<BusId> {
        let mut buses: Vec<_> = self.drivers.keys().copied().collect();
        buses.sort_by_key(|bus| matches!(bus, BusId::External));
        buses
    }

    pub fn accel(&self, bus: BusId) -> Result<AccelNode> {
        self.get(bus).map(Icm20602::accel).ok_or(DriverError::NotRunning)
    }

    pub fn gyro(&self, bus: BusId) -> Result<GyroNode> {
        self.get(bus).map(Icm20602::gyro).ok_or(DriverError::NotRunning)
    }
}
