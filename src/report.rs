//! Output report records and calibration blobs

/// Per-axis offset and scale
///
/// Calibrated value = (raw * range_scale - offset) * scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub x_offset: f32,
    pub x_scale: f32,
    pub y_offset: f32,
    pub y_scale: f32,
    pub z_offset: f32,
    pub z_scale: f32,
}

impl Calibration {
    /// Zero offset, unit scale
    pub const IDENTITY: Calibration = Calibration {
        x_offset: 0.0,
        x_scale: 1.0,
        y_offset: 0.0,
        y_scale: 1.0,
        z_offset: 0.0,
        z_scale: 1.0,
    };

    pub fn offsets(&self) -> [f32; 3] {
        [self.x_offset, self.y_offset, self.z_offset]
    }

    pub fn scales(&self) -> [f32; 3] {
        [self.x_scale, self.y_scale, self.z_scale]
    }

    /// Apply to a rotated raw vector already in sensor counts
    pub fn apply(&self, raw: [f32; 3], range_scale: f32) -> [f32; 3] {
        let offsets = self.offsets();
        let scales = self.scales();
        [
            (raw[0] * range_scale - offsets[0]) * scales[0],
            (raw[1] * range_scale - offsets[1]) * scales[1],
            (raw[2] * range_scale - offsets[2]) * scales[2],
        ]
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One linear-acceleration sample as published
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccelReport {
    /// Microseconds, shared with the matching gyro report
    pub timestamp_us: u64,
    /// Bad transfers + bad register reads since start
    pub error_count: u64,
    /// Board-frame raw counts after axis fix-up
    pub raw: [i16; 3],
    /// Calibrated m/s^2 before the low-pass filter
    pub calibrated: [f32; 3],
    /// Filtered m/s^2
    pub filtered: [f32; 3],
    /// Velocity delta over the last closed window (m/s)
    pub integral: [f32; 3],
    pub integral_dt_us: u64,
    /// m/s^2 per LSB
    pub scaling: f32,
    pub range_m_s2: f32,
    pub temperature_raw: i16,
    /// Degrees Celsius
    pub temperature: f32,
}

/// One angular-rate sample as published
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GyroReport {
    pub timestamp_us: u64,
    pub error_count: u64,
    pub raw: [i16; 3],
    /// Calibrated rad/s before the low-pass filter
    pub calibrated: [f32; 3],
    /// Filtered rad/s
    pub filtered: [f32; 3],
    /// Angle delta over the last closed window (rad)
    pub integral: [f32; 3],
    pub integral_dt_us: u64,
    /// rad/s per LSB
    pub scaling: f32,
    pub range_rad_s: f32,
}

/// Die temperature from the raw TEMP_OUT word
pub fn temperature_celsius(raw: i16) -> f32 {
    raw as f32 / 326.8 + 25.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_conversion() {
        assert_eq!(temperature_celsius(0), 25.0);
        assert!((temperature_celsius(3268) - 35.0).abs() < 1e-4);
        assert!((temperature_celsius(-3268) - 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_calibration_apply() {
        let cal = Calibration {
            x_offset: 0.5,
            x_scale: 2.0,
            ..Calibration::IDENTITY
        };
        let out = cal.apply([100.0, -100.0, 0.0], 0.01);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] + 1.0).abs() < 1e-6);
        assert_eq!(out[2], 0.0);
    }
}
