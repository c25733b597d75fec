//! ICM-20602 register map and bit definitions

// Register addresses
pub const REG_SMPLRT_DIV: u8 = 0x19; // Sample rate divider
pub const REG_CONFIG: u8 = 0x1A; // DLPF configuration
pub const REG_GYRO_CONFIG: u8 = 0x1B;
pub const REG_ACCEL_CONFIG: u8 = 0x1C;
pub const REG_INT_PIN_CFG: u8 = 0x37;
pub const REG_INT_ENABLE: u8 = 0x38;
pub const REG_INT_STATUS: u8 = 0x3A; // First byte of the data block
pub const REG_ACCEL_XOUT_H: u8 = 0x3B;
pub const REG_TEMP_OUT_H: u8 = 0x41;
pub const REG_GYRO_XOUT_H: u8 = 0x43;
pub const REG_USER_CTRL: u8 = 0x6A;
pub const REG_PWR_MGMT_1: u8 = 0x6B;
pub const REG_WHO_AM_I: u8 = 0x75;

/// Highest register included in a register dump
pub const REG_DUMP_LAST: u8 = 108;

// PWR_MGMT_1 bits
pub const BIT_H_RESET: u8 = 0x80;
pub const BIT_SLEEP: u8 = 0x40;
/// Auto-select the best available clock source (PLL if ready)
pub const BITS_BESTCLOCK_PLL3: u8 = 0x03;

// GYRO_CONFIG full scale
pub const BITS_FS_2000DPS: u8 = 0x18;

// CONFIG DLPF_CFG values
pub const BITS_DLPF_CFG_250HZ_NOLPF: u8 = 0x00;
pub const BITS_DLPF_CFG_188HZ: u8 = 0x01;
pub const BITS_DLPF_CFG_98HZ: u8 = 0x02;
pub const BITS_DLPF_CFG_42HZ: u8 = 0x03;
pub const BITS_DLPF_CFG_20HZ: u8 = 0x04;
pub const BITS_DLPF_CFG_10HZ: u8 = 0x05;
pub const BITS_DLPF_CFG_5HZ: u8 = 0x06;
pub const BITS_DLPF_CFG_3600HZ_NOLPF: u8 = 0x07;

// Interrupt configuration
pub const BIT_DATA_RDY_INT_EN: u8 = 0x01;
pub const BIT_INT_ANYRD_2CLEAR: u8 = 0x10;

/// Expected WHO_AM_I value
pub const WHO_AM_I_VALUE: u8 = 0x12;

/// Device type tag used when composing the device id
pub const DEVTYPE_ICM20602: u8 = 0x2D;

/// SPI read flag OR-ed into the register address
pub const DIR_READ: u8 = 0x80;

/// Status byte + accel(6) + temp(2) + gyro(6)
pub const DATA_BLOCK_LEN: usize = 15;

/// Byte offsets inside the data block read from `REG_INT_STATUS`
pub const BLOCK_ACCEL: usize = 1;
pub const BLOCK_TEMP: usize = 7;
pub const BLOCK_GYRO: usize = 9;

/// Transport types carried in the device id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusType {
    Unknown = 0,
    I2c = 1,
    Spi = 2,
    Simulated = 3,
}

/// Pack a device id: bus type (3 bits), bus index (5 bits), address, devtype
pub fn encode_device_id(bus_type: BusType, bus: u8, address: u8, devtype: u8) -> u32 {
    (bus_type as u32 & 0x07)
        | ((bus as u32 & 0x1F) << 3)
        | ((address as u32) << 8)
        | ((devtype as u32) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_fields() {
        let id = encode_device_id(BusType::Spi, 1, 4, DEVTYPE_ICM20602);
        assert_eq!(id & 0x07, 2);
        assert_eq!((id >> 3) & 0x1F, 1);
        assert_eq!((id >> 8) & 0xFF, 4);
        assert_eq!((id >> 16) & 0xFF, DEVTYPE_ICM20602 as u32);
    }

    #[test]
    fn test_data_block_layout() {
        assert_eq!(BLOCK_GYRO + 6, DATA_BLOCK_LEN);
        assert_eq!(REG_INT_STATUS + BLOCK_ACCEL as u8, REG_ACCEL_XOUT_H);
        assert_eq!(REG_INT_STATUS + BLOCK_TEMP as u8, REG_TEMP_OUT_H);
        assert_eq!(REG_INT_STATUS + BLOCK_GYRO as u8, REG_GYRO_XOUT_H);
    }
}
