//! Register bus over an FT232H SPI channel (libMPSSE)

use std::ptr;

use log::debug;

use crate::bus::{BusSpeed, RegisterBus};
use crate::error::{DriverError, Result};
use crate::ffi::*;
use crate::registers::{encode_device_id, BusType, DEVTYPE_ICM20602, DIR_READ};

/// ICM-20602 wired to an FT232H MPSSE channel in SPI mode 3
pub struct FtdiSpiBus {
    handle: FT_HANDLE,
    channel: u32,
    speed: BusSpeed,
    external: bool,
}

// The handle is only ever used through `&mut self`.
unsafe impl Send for FtdiSpiBus {}

impl FtdiSpiBus {
    /// Open and initialize an SPI channel at the low bus clock
    ///
    /// # Arguments
    /// * `channel_index` - Index of the SPI channel to use (usually 0)
    /// * `external` - Sensor sits off the main board
    ///
    /// # Returns
    /// * `Ok(FtdiSpiBus)` - Channel ready for register transfers
    /// * `Err(DriverError)` - No channel, or the FTDI driver refused
    pub fn open(channel_index: u32, external: bool) -> Result<Self> {
        let mut num_channels: DWORD = 0;
        let status = unsafe { SPI_GetNumChannels(&mut num_channels) };
        if status != FT_OK {
            return Err(status.into());
        }

        if num_channels == 0 {
            return Err(DriverError::NoChannelsFound);
        }

        if channel_index >= num_channels {
            return Err(DriverError::InvalidChannel(channel_index));
        }

        let mut handle: FT_HANDLE = ptr::null_mut();
        let status = unsafe { SPI_OpenChannel(channel_index, &mut handle) };
        if status != FT_OK {
            return Err(status.into());
        }

        let mut config = ChannelConfig::mode3(BusSpeed::Low.clock_hz());
        let status = unsafe { SPI_InitChannel(handle, &mut config) };
        if status != FT_OK {
            unsafe { SPI_CloseChannel(handle) };
            return Err(status.into());
        }

        debug!("SPI channel {} open at {} Hz", channel_index, config.ClockRate);

        Ok(Self {
            handle,
            channel: channel_index,
            speed: BusSpeed::Low,
            external,
        })
    }

    /// Re-clock the channel if the transfer needs a different speed
    fn set_speed(&mut self, speed: BusSpeed) -> Result<()> {
        if speed == self.speed {
            return Ok(());
        }
        let mut config = ChannelConfig::mode3(speed.clock_hz());
        let status = unsafe { SPI_InitChannel(self.handle, &mut config) };
        if status != FT_OK {
            return Err(status.into());
        }
        self.speed = speed;
        Ok(())
    }
}

impl RegisterBus for FtdiSpiBus {
    fn read(&mut self, reg: u8, speed: BusSpeed, buf: &mut [u8]) -> Result<usize> {
        self.set_speed(speed)?;

        let len = buf.len() + 1;
        let mut tx = vec![0u8; len];
        let mut rx = vec![0u8; len];
        tx[0] = reg | DIR_READ;
        let mut transferred: DWORD = 0;

        let options = SPI_TRANSFER_OPTIONS_SIZE_IN_BYTES
            | SPI_TRANSFER_OPTIONS_CHIPSELECT_ENABLE
            | SPI_TRANSFER_OPTIONS_CHIPSELECT_DISABLE;

        let status = unsafe {
            SPI_ReadWrite(
                self.handle,
                rx.as_mut_ptr(),
                tx.as_mut_ptr(),
                len as DWORD,
                &mut transferred,
                options,
            )
        };
        if status != FT_OK {
            return Err(status.into());
        }

        // first byte clocked in while the address went out
        let data = (transferred as usize).saturating_sub(1).min(buf.len());
        buf[..data].copy_from_slice(&rx[1..1 + data]);
        Ok(data)
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        self.set_speed(BusSpeed::Low)?;

        let mut buffer = [reg & !DIR_READ, value];
        let mut transferred: DWORD = 0;

        let options = SPI_TRANSFER_OPTIONS_SIZE_IN_BYTES
            | SPI_TRANSFER_OPTIONS_CHIPSELECT_ENABLE
            | SPI_TRANSFER_OPTIONS_CHIPSELECT_DISABLE;

        let status = unsafe {
            SPI_Write(
                self.handle,
                buffer.as_mut_ptr(),
                2,
                &mut transferred,
                options,
            )
        };
        if status != FT_OK {
            return Err(status.into());
        }

        if transferred != 2 {
            return Err(DriverError::TransferError {
                expected: 2,
                actual: transferred as usize,
            });
        }
        Ok(())
    }

    fn is_external(&self) -> bool {
        self.external
    }

    fn device_id(&self) -> u32 {
        encode_device_id(BusType::Spi, self.channel as u8, 0, DEVTYPE_ICM20602)
    }
}

impl Drop for FtdiSpiBus {
    fn drop(&mut self) {
        unsafe {
            SPI_CloseChannel(self.handle);
        }
    }
}
