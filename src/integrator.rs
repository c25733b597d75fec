//! Fixed-window integrator producing delta vectors between publications

/// Trapezoidal integrator over a fixed time window
///
/// Feed calibrated samples with [`put`](Integrator::put); once at least
/// `interval_us` has passed since the window opened, the accumulated delta
/// and the window length are returned and a new window starts.
#[derive(Debug, Clone)]
pub struct Integrator {
    interval_us: u64,
    coning_correction: bool,

    last_integration_us: u64,
    last_reset_us: u64,
    last_val: [f32; 3],

    alpha: [f32; 3],
    // coning state
    beta: [f32; 3],
    last_alpha: [f32; 3],
    last_delta_alpha: [f32; 3],
}

impl Integrator {
    /// `coning_correction` is meant for angular rates
    pub fn new(interval_us: u64, coning_correction: bool) -> Self {
        Self {
            interval_us,
            coning_correction,
            last_integration_us: 0,
            last_reset_us: 0,
            last_val: [0.0; 3],
            alpha: [0.0; 3],
            beta: [0.0; 3],
            last_alpha: [0.0; 3],
            last_delta_alpha: [0.0; 3],
        }
    }

    /// Add a sample taken at `timestamp_us`
    ///
    /// Returns `Some((delta, dt_us))` when the window closed.
    pub fn put(&mut self, timestamp_us: u64, val: [f32; 3]) -> Option<([f32; 3], u64)> {
        if self.last_integration_us == 0 {
            // first sample only primes the time base
            self.last_integration_us = timestamp_us;
            self.last_reset_us = timestamp_us;
            self.last_val = val;
            return None;
        }

        let dt_us = timestamp_us.saturating_sub(self.last_integration_us);
        self.last_integration_us = timestamp_us;
        let dt = dt_us as f32 * 1e-6;

        let mut delta_alpha = [0.0f32; 3];
        for i in 0..3 {
            delta_alpha[i] = (val[i] + self.last_val[i]) * dt * 0.5;
        }
        self.last_val = val;

        if self.coning_correction {
            let lead = [
                self.last_alpha[0] + self.last_delta_alpha[0] / 6.0,
                self.last_alpha[1] + self.last_delta_alpha[1] / 6.0,
                self.last_alpha[2] + self.last_delta_alpha[2] / 6.0,
            ];
            let c = cross(lead, delta_alpha);
            for i in 0..3 {
                self.beta[i] += c[i] * 0.5;
            }
            self.last_delta_alpha = delta_alpha;
            self.last_alpha = self.alpha;
        }

        for i in 0..3 {
            self.alpha[i] += delta_alpha[i];
        }

        if self.interval_us > 0 && timestamp_us.saturating_sub(self.last_reset_us) >= self.interval_us {
            return Some(self.take());
        }

        None
    }

    /// Close the current window regardless of its length
    pub fn take(&mut self) -> ([f32; 3], u64) {
        let mut delta = self.alpha;
        if self.coning_correction {
            for i in 0..3 {
                delta[i] += self.beta[i];
            }
        }
        let dt_us = self.last_integration_us.saturating_sub(self.last_reset_us);

        self.alpha = [0.0; 3];
        self.beta = [0.0; 3];
        self.last_alpha = [0.0; 3];
        self.last_delta_alpha = [0.0; 3];
        self.last_reset_us = self.last_integration_us;

        (delta, dt_us)
    }
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_primes() {
        let mut integrator = Integrator::new(3_000, false);
        assert!(integrator.put(1_000, [1.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_constant_input_integrates_over_window() {
        let mut integrator = Integrator::new(3_000, false);
        let mut t = 1_000;
        assert!(integrator.put(t, [2.0, -1.0, 0.5]).is_none());

        let mut result = None;
        for _ in 0..3 {
            t += 1_000;
            result = integrator.put(t, [2.0, -1.0, 0.5]);
        }

        let (delta, dt_us) = result.expect("window should close after 3 ms");
        assert_eq!(dt_us, 3_000);
        assert!((delta[0] - 0.006).abs() < 1e-6);
        assert!((delta[1] + 0.003).abs() < 1e-6);
        assert!((delta[2] - 0.0015).abs() < 1e-6);
    }

    #[test]
    fn test_window_restarts_after_close() {
        let mut integrator = Integrator::new(2_000, false);
        integrator.put(1_000, [1.0; 3]);
        integrator.put(2_000, [1.0; 3]);
        assert!(integrator.put(3_000, [1.0; 3]).is_some());
        assert!(integrator.put(4_000, [1.0; 3]).is_none());
        let (delta, dt_us) = integrator.put(5_000, [1.0; 3]).unwrap();
        assert_eq!(dt_us, 2_000);
        assert!((delta[0] - 0.002).abs() < 1e-6);
    }

    #[test]
    fn test_coning_correction_zero_for_single_axis() {
        let mut integrator = Integrator::new(3_000, true);
        let mut t = 1_000;
        integrator.put(t, [0.0, 0.0, 1.0]);
        let mut result = None;
        for _ in 0..3 {
            t += 1_000;
            result = integrator.put(t, [0.0, 0.0, 1.0]);
        }
        let (delta, _) = result.unwrap();
        assert!(delta[0].abs() < 1e-9);
        assert!(delta[1].abs() < 1e-9);
        assert!((delta[2] - 0.003).abs() < 1e-6);
    }
}
