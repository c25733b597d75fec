//! Error types for the ICM-20602 acquisition driver

use thiserror::Error;

use crate::bus::BusId;
#[cfg(feature = "ftdi")]
use crate::ffi::{status_to_string, FT_STATUS};

/// Error type for driver operations
#[derive(Error, Debug)]
pub enum DriverError {
    /// Bus transport failure reported by the register bus
    #[error("Bus error: {0}")]
    Bus(String),

    /// FTDI driver error
    #[cfg(feature = "ftdi")]
    #[error("FTDI error: {status} ({description})")]
    FtdiError {
        status: FT_STATUS,
        description: String,
    },

    /// No SPI channels found
    #[cfg(feature = "ftdi")]
    #[error("No SPI channels found")]
    NoChannelsFound,

    /// Invalid channel index
    #[cfg(feature = "ftdi")]
    #[error("Invalid channel index: {0}")]
    InvalidChannel(u32),

    /// Short or oversized bus transfer
    #[error("Data transfer error: expected {expected} bytes, transferred {actual}")]
    TransferError { expected: usize, actual: usize },

    /// Every field of a fetched sample decoded to zero (transient bus fault)
    #[error("All-zero sample, probable bus error")]
    ZeroSample,

    /// Reset protocol exhausted its attempts
    #[error("Sensor did not come out of reset after {attempts} attempts")]
    HardwareUnavailable { attempts: u32 },

    /// Invalid WHO_AM_I response
    #[error("Invalid WHO_AM_I response: expected 0x12, got 0x{0:02X}")]
    InvalidDeviceId(u8),

    /// Rejected parameter or calibration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No report available to read
    #[error("No data available")]
    NoData,

    /// Caller asked for zero reports
    #[error("Read buffer too small")]
    BufferTooSmall,

    /// A driver is already running on this bus
    #[error("Driver already started on {0} bus")]
    AlreadyStarted(BusId),

    /// The driver behind a handle is gone
    #[error("Driver not running")]
    NotRunning,

    /// Operation not supported by this sensor or bus
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Recording backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Host I/O failure (thread spawn, output files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "ftdi")]
impl From<FT_STATUS> for DriverError {
    fn from(status: FT_STATUS) -> Self {
        DriverError::FtdiError {
            status,
            description: status_to_string(status).to_string(),
        }
    }
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;
