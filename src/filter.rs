//! Second-order low-pass filter applied per axis after calibration

/// 2-pole Butterworth low-pass filter
///
/// A cutoff of zero (or at/above Nyquist) disables the filter and `apply`
/// passes samples through unchanged.
#[derive(Debug, Clone)]
pub struct LowPassFilter2p {
    cutoff_hz: f32,

    // Normalized coefficients
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,

    // Direct Form II delay line
    d1: f32,
    d2: f32,

    enabled: bool,
}

impl LowPassFilter2p {
    pub fn new(sample_rate_hz: f32, cutoff_hz: f32) -> Self {
        let mut filter = Self {
            cutoff_hz,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            d1: 0.0,
            d2: 0.0,
            enabled: false,
        };
        filter.set_cutoff_frequency(sample_rate_hz, cutoff_hz);
        filter
    }

    /// Re-derive coefficients; history is cleared
    pub fn set_cutoff_frequency(&mut self, sample_rate_hz: f32, cutoff_hz: f32) {
        self.cutoff_hz = cutoff_hz;
        self.d1 = 0.0;
        self.d2 = 0.0;

        if !(cutoff_hz > 0.0) || !(sample_rate_hz > 0.0) || cutoff_hz >= sample_rate_hz / 2.0 {
            self.enabled = false;
            return;
        }

        let fr = sample_rate_hz / cutoff_hz;
        let ohm = (std::f32::consts::PI / fr).tan();
        let c = 1.0 + 2.0 * std::f32::consts::FRAC_1_SQRT_2 * ohm + ohm * ohm;

        self.b0 = ohm * ohm / c;
        self.b1 = 2.0 * self.b0;
        self.b2 = self.b0;
        self.a1 = 2.0 * (ohm * ohm - 1.0) / c;
        self.a2 = (1.0 - 2.0 * std::f32::consts::FRAC_1_SQRT_2 * ohm + ohm * ohm) / c;
        self.enabled = true;
    }

    pub fn cutoff_freq(&self) -> f32 {
        self.cutoff_hz
    }

    /// Filter one sample
    pub fn apply(&mut self, sample: f32) -> f32 {
        if !self.enabled || !sample.is_finite() {
            return sample;
        }

        // d0 = x[n] - a1*d[n-1] - a2*d[n-2]
        let mut d0 = sample - self.d1 * self.a1 - self.d2 * self.a2;

        if !d0.is_finite() {
            // don't allow bad values to propagate
            d0 = sample;
        }

        let output = d0 * self.b0 + self.d1 * self.b1 + self.d2 * self.b2;

        self.d2 = self.d1;
        self.d1 = d0;

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 1000.0;
    const CUTOFF: f32 = 30.0;

    #[test]
    fn test_dc_passthrough() {
        let mut filter = LowPassFilter2p::new(SAMPLE_RATE, CUTOFF);

        for _ in 0..500 {
            filter.apply(9.81);
        }

        let output = filter.apply(9.81);
        assert!((output - 9.81).abs() < 0.01, "DC should pass through: got {}", output);
    }

    #[test]
    fn test_high_frequency_attenuation() {
        let mut filter = LowPassFilter2p::new(SAMPLE_RATE, CUTOFF);

        let freq = 300.0;
        let mut max_output: f32 = 0.0;

        for i in 0..2000 {
            let t = i as f32 / SAMPLE_RATE;
            let output = filter.apply((2.0 * std::f32::consts::PI * freq * t).sin());
            if i > 1000 {
                max_output = max_output.max(output.abs());
            }
        }

        assert!(max_output < 0.05, "300Hz should be attenuated: got peak {}", max_output);
    }

    #[test]
    fn test_zero_cutoff_disables() {
        let mut filter = LowPassFilter2p::new(SAMPLE_RATE, 0.0);
        // a step passes through untouched, with no settling
        assert_eq!(filter.apply(0.0), 0.0);
        assert_eq!(filter.apply(3.5), 3.5);
        assert_eq!(filter.apply(3.5), 3.5);
    }

    #[test]
    fn test_cutoff_above_nyquist_disables() {
        let mut filter = LowPassFilter2p::new(50.0, 30.0);
        assert_eq!(filter.apply(0.0), 0.0);
        assert_eq!(filter.apply(-1.25), -1.25);
        assert_eq!(filter.cutoff_freq(), 30.0);
    }

    #[test]
    fn test_enabled_filter_lags_a_step() {
        let mut filter = LowPassFilter2p::new(SAMPLE_RATE, CUTOFF);
        filter.apply(0.0);
        let out = filter.apply(2.0);
        assert!(out < 1.0, "step should be smoothed: got {}", out);
    }

    #[test]
    fn test_non_finite_input_does_not_poison_state() {
        let mut filter = LowPassFilter2p::new(SAMPLE_RATE, CUTOFF);
        filter.apply(f32::NAN);
        for _ in 0..500 {
            filter.apply(1.0);
        }
        assert!(filter.apply(1.0).is_finite());
    }
}
