//! ICM-20602 6-axis IMU acquisition driver
//!
//! This library brings an ICM-20602 out of reset, samples it periodically over
//! a register bus (an FT232H SPI channel via libMPSSE, or the in-process
//! simulator), and turns each sample into calibrated, filtered and integrated
//! accel and gyro reports. A register health monitor verifies the chip
//! configuration while sampling and repairs it when it drifts.
//!
//! # Quick Start
//!
//! ## On-demand reads
//! ```no_run
//! use icm20602_driver::{DriverConfig, Icm20602, SimulatedIcm20602};
//!
//! let sensor = Icm20602::new(SimulatedIcm20602::new(), DriverConfig::default())?;
//!
//! // Without periodic sampling every read takes one fresh measurement
//! let report = sensor.accel().read(1)?[0];
//! println!("Accel: {:?} m/s^2 at {:.1} C", report.calibrated, report.temperature);
//! # Ok::<(), icm20602_driver::DriverError>(())
//! ```
//!
//! ## Periodic sampling
//! ```no_run
//! use icm20602_driver::{DriverConfig, Icm20602, PollRate, SimulatedIcm20602};
//! use std::time::Duration;
//!
//! let sensor = Icm20602::new(SimulatedIcm20602::new(), DriverConfig::default())?;
//! let gyro = sensor.gyro();
//! gyro.set_queue_depth(10)?;
//! gyro.set_poll_rate(PollRate::Hz(1000))?;
//!
//! while gyro.wait_for_data(Duration::from_millis(50))? {
//!     for report in gyro.read(10)? {
//!         println!("{} us: {:?} rad/s", report.timestamp_us, report.filtered);
//!     }
//! }
//! # Ok::<(), icm20602_driver::DriverError>(())
//! ```
//!
//! ## Subscribing to published reports
//! ```no_run
//! use icm20602_driver::{
//!     ChannelPublisher, DriverConfig, Icm20602, MonotonicClock, SensorReport, SimulatedIcm20602,
//! };
//! use std::sync::Arc;
//!
//! let (publisher, reports) = ChannelPublisher::channel();
//! let sensor = Icm20602::with_parts(
//!     Box::new(SimulatedIcm20602::new()),
//!     Arc::new(MonotonicClock::new()),
//!     Box::new(publisher),
//!     DriverConfig::default(),
//! )?;
//! sensor.start()?;
//!
//! for report in reports.iter().take(100) {
//!     if let SensorReport::Accel(accel) = report {
//!         println!("dv over {} us: {:?}", accel.integral_dt_us, accel.integral);
//!     }
//! }
//! # Ok::<(), icm20602_driver::DriverError>(())
//! ```

pub mod bus;
pub mod clock;
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod filter;
pub mod health;
pub mod integrator;
pub mod publish;
pub mod queue;
pub mod registers;
pub mod registry;
pub mod report;
pub mod rotation;
pub mod sampler;
pub mod sim;

#[cfg(feature = "ftdi")]
mod ffi;
#[cfg(feature = "ftdi")]
pub mod ftdi;

#[cfg(feature = "record")]
pub mod hdf5_format;

// Re-export public API
pub use bus::{BusId, BusSpeed, RegisterBus};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{AccelRange, DriverConfig};
pub use crate::core::{Channel, CycleOutcome, DriverInfo, DriverStats};
pub use device::{AccelNode, GyroNode, Icm20602, PollRate};
pub use error::{DriverError, Result};
pub use publish::{ChannelPublisher, NullPublisher, ReportPublisher, SensorReport};
pub use registry::DriverRegistry;
pub use report::{AccelReport, Calibration, GyroReport};
pub use rotation::Rotation;
pub use sim::{RawSample, SimHandle, SimulatedIcm20602};

#[cfg(feature = "ftdi")]
pub use ftdi::FtdiSpiBus;

#[cfg(feature = "record")]
pub use hdf5_format::Hdf5Writer;
