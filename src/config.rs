//! Calibration & range configuration
//!
//! Maps requested physical settings (g range, sample rate, cutoff) onto the
//! discrete buckets the hardware supports, and carries the driver defaults.

use crate::registers::*;
use crate::rotation::Rotation;

/// Standard gravity in m/s^2
pub const ONE_G: f32 = 9.80665;

/// Base output rate of the gyro/accel pipeline with DLPF enabled
pub const BASE_SAMPLE_RATE_HZ: u32 = 1000;
pub const MAX_DIVIDER: u32 = 200;

/// Fixed gyro full scale
pub const GYRO_RANGE_DPS: f32 = 2000.0;

pub const DEFAULT_ACCEL_RANGE_G: u32 = 8;
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 1000;
pub const DEFAULT_POLL_RATE_HZ: u32 = 1000;
pub const MAX_POLL_RATE_HZ: u32 = 1000;
pub const DEFAULT_ONCHIP_FILTER_HZ: u16 = 42;
pub const DEFAULT_DRIVER_FILTER_HZ: f32 = 30.0;
/// Integrated deltas are published at most this often
pub const MAX_OUTPUT_RATE_HZ: u64 = 280;
pub const DEFAULT_QUEUE_DEPTH: usize = 2;
pub const MAX_QUEUE_DEPTH: usize = 100;

/// Accelerometer full-scale bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    /// Smallest bucket covering `max_g`
    pub fn for_max_g(max_g: u32) -> Self {
        if max_g > 8 {
            AccelRange::G16
        } else if max_g > 4 {
            AccelRange::G8
        } else if max_g > 2 {
            AccelRange::G4
        } else {
            AccelRange::G2
        }
    }

    pub fn g(self) -> u32 {
        match self {
            AccelRange::G2 => 2,
            AccelRange::G4 => 4,
            AccelRange::G8 => 8,
            AccelRange::G16 => 16,
        }
    }

    pub fn lsb_per_g(self) -> f32 {
        match self {
            AccelRange::G2 => 16384.0,
            AccelRange::G4 => 8192.0,
            AccelRange::G8 => 4096.0,
            AccelRange::G16 => 2048.0,
        }
    }

    /// AFS_SEL field for ACCEL_CONFIG
    pub fn register_bits(self) -> u8 {
        let afs_sel = match self {
            AccelRange::G2 => 0,
            AccelRange::G4 => 1,
            AccelRange::G8 => 2,
            AccelRange::G16 => 3,
        };
        afs_sel << 3
    }

    /// m/s^2 per LSB
    pub fn scale(self) -> f32 {
        ONE_G / self.lsb_per_g()
    }

    /// Full range in m/s^2
    pub fn range_m_s2(self) -> f32 {
        self.g() as f32 * ONE_G
    }
}

/// Gyro scale in rad/s per LSB at 2000 deg/s
pub fn gyro_scale() -> f32 {
    (std::f32::consts::PI / 180.0) * (GYRO_RANGE_DPS / 32768.0)
}

/// Gyro full range in rad/s
pub fn gyro_range_rad_s() -> f32 {
    GYRO_RANGE_DPS.to_radians()
}

/// Sample-rate divider and the rate it actually yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRate {
    pub divider: u32,
    pub effective_hz: u32,
}

impl SampleRate {
    /// Quantize a requested rate; 0 selects the default rate
    pub fn from_hz(requested_hz: u32) -> Self {
        let requested_hz = if requested_hz == 0 {
            DEFAULT_SAMPLE_RATE_HZ
        } else {
            requested_hz
        };

        let divider = (BASE_SAMPLE_RATE_HZ as f32 / requested_hz as f32).round() as u32;
        let divider = divider.clamp(1, MAX_DIVIDER);

        Self {
            divider,
            effective_hz: BASE_SAMPLE_RATE_HZ / divider,
        }
    }

    /// Value for SMPLRT_DIV (rate = base / (1 + SMPLRT_DIV))
    pub fn register_value(self) -> u8 {
        (self.divider - 1) as u8
    }
}

/// On-chip digital low-pass filter bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlpfBucket {
    Hz5,
    Hz10,
    Hz20,
    Hz42,
    Hz98,
    Hz188,
    /// Filter bypassed
    WideOpen,
}

impl DlpfBucket {
    /// Next supported cutoff at or above the request; 0 disables the filter
    pub fn from_cutoff(frequency_hz: u16) -> Self {
        match frequency_hz {
            0 => DlpfBucket::WideOpen,
            1..=5 => DlpfBucket::Hz5,
            6..=10 => DlpfBucket::Hz10,
            11..=20 => DlpfBucket::Hz20,
            21..=42 => DlpfBucket::Hz42,
            43..=98 => DlpfBucket::Hz98,
            99..=188 => DlpfBucket::Hz188,
            _ => DlpfBucket::WideOpen,
        }
    }

    pub fn register_bits(self) -> u8 {
        match self {
            DlpfBucket::Hz5 => BITS_DLPF_CFG_5HZ,
            DlpfBucket::Hz10 => BITS_DLPF_CFG_10HZ,
            DlpfBucket::Hz20 => BITS_DLPF_CFG_20HZ,
            DlpfBucket::Hz42 => BITS_DLPF_CFG_42HZ,
            DlpfBucket::Hz98 => BITS_DLPF_CFG_98HZ,
            DlpfBucket::Hz188 => BITS_DLPF_CFG_188HZ,
            DlpfBucket::WideOpen => BITS_DLPF_CFG_3600HZ_NOLPF,
        }
    }

    /// Nominal cutoff, `None` when bypassed
    pub fn cutoff_hz(self) -> Option<u16> {
        match self {
            DlpfBucket::Hz5 => Some(5),
            DlpfBucket::Hz10 => Some(10),
            DlpfBucket::Hz20 => Some(20),
            DlpfBucket::Hz42 => Some(42),
            DlpfBucket::Hz98 => Some(98),
            DlpfBucket::Hz188 => Some(188),
            DlpfBucket::WideOpen => None,
        }
    }
}

/// Driver start-up settings
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Sensor-to-body rotation applied after the board axis fix-up
    pub rotation: Rotation,
    /// Requested accel range in g
    pub accel_range_g: u32,
    /// Requested internal sample rate in Hz
    pub sample_rate_hz: u32,
    /// On-chip DLPF request programmed at reset
    pub onchip_filter_hz: u16,
    pub accel_filter_hz: f32,
    pub gyro_filter_hz: f32,
    pub queue_depth: usize,
    /// Width of the integration window
    pub integration_interval_us: u64,
    /// Verify one shadowed register on every measurement cycle
    pub check_registers: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rotation: Rotation::None,
            accel_range_g: DEFAULT_ACCEL_RANGE_G,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            onchip_filter_hz: DEFAULT_ONCHIP_FILTER_HZ,
            accel_filter_hz: DEFAULT_DRIVER_FILTER_HZ,
            gyro_filter_hz: DEFAULT_DRIVER_FILTER_HZ,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            integration_interval_us: 1_000_000 / MAX_OUTPUT_RATE_HZ,
            check_registers: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divider_500hz() {
        let rate = SampleRate::from_hz(500);
        assert_eq!(rate.divider, 2);
        assert_eq!(rate.effective_hz, 500);
        assert_eq!(rate.register_value(), 1);
    }

    #[test]
    fn test_divider_clamps_low_rates() {
        let rate = SampleRate::from_hz(1);
        assert_eq!(rate.divider, 200);
        assert_eq!(rate.effective_hz, 5);
    }

    #[test]
    fn test_divider_clamps_high_rates() {
        let rate = SampleRate::from_hz(8000);
        assert_eq!(rate.divider, 1);
        assert_eq!(rate.effective_hz, 1000);
    }

    #[test]
    fn test_divider_non_divisor_rate() {
        // 1000/300 rounds to 3, which is only approximately 300 Hz
        let rate = SampleRate::from_hz(300);
        assert_eq!(rate.divider, 3);
        assert_eq!(rate.effective_hz, 333);
    }

    #[test]
    fn test_zero_rate_selects_default() {
        assert_eq!(SampleRate::from_hz(0).effective_hz, DEFAULT_SAMPLE_RATE_HZ);
    }

    #[test]
    fn test_range_selection_rounds_up() {
        let range = AccelRange::for_max_g(10);
        assert_eq!(range, AccelRange::G16);
        assert!((range.scale() - ONE_G / 2048.0).abs() < 1e-9);
        assert!((range.range_m_s2() - 16.0 * ONE_G).abs() < 1e-4);

        assert_eq!(AccelRange::for_max_g(0), AccelRange::G2);
        assert_eq!(AccelRange::for_max_g(2), AccelRange::G2);
        assert_eq!(AccelRange::for_max_g(3), AccelRange::G4);
        assert_eq!(AccelRange::for_max_g(8), AccelRange::G8);
        assert_eq!(AccelRange::for_max_g(16), AccelRange::G16);
        assert_eq!(AccelRange::G16.register_bits(), 0x18);
    }

    #[test]
    fn test_dlpf_quantization() {
        assert_eq!(DlpfBucket::from_cutoff(15), DlpfBucket::Hz20);
        assert_eq!(DlpfBucket::from_cutoff(0), DlpfBucket::WideOpen);
        assert_eq!(DlpfBucket::from_cutoff(5), DlpfBucket::Hz5);
        assert_eq!(DlpfBucket::from_cutoff(42), DlpfBucket::Hz42);
        assert_eq!(DlpfBucket::from_cutoff(43), DlpfBucket::Hz98);
        assert_eq!(DlpfBucket::from_cutoff(188), DlpfBucket::Hz188);
        assert_eq!(DlpfBucket::from_cutoff(189), DlpfBucket::WideOpen);
        assert_eq!(DlpfBucket::Hz20.register_bits(), BITS_DLPF_CFG_20HZ);
    }

    #[test]
    fn test_gyro_scale() {
        let expected = (std::f32::consts::PI / 180.0) * (2000.0 / 32768.0);
        assert!((gyro_scale() - expected).abs() < 1e-9);
        assert!((gyro_range_rad_s() - 34.906585).abs() < 1e-4);
    }

    #[test]
    fn test_default_integration_window() {
        assert_eq!(DriverConfig::default().integration_interval_us, 3571);
    }
}
