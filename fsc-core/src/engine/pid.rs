//! PID control law with a setpoint dead band

use crate::constants::pwm;

use super::profile::Controller;

/// Proportional-integral-derivative controller
///
/// The output is only recomputed while the input is outside
/// `[setpoint - negative_hysteresis, setpoint + positive_hysteresis]`.
#[derive(Debug, Clone)]
pub struct PidProfile {
    setpoint: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    positive_hysteresis: f64,
    negative_hysteresis: f64,
    integral: f64,
    prev_error: Option<f64>,
    last_output: Option<f64>,
}

impl PidProfile {
    pub fn new(setpoint: f64, kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            setpoint,
            kp,
            ki,
            kd,
            positive_hysteresis: 0.0,
            negative_hysteresis: 0.0,
            integral: 0.0,
            prev_error: None,
            last_output: None,
        }
    }

    pub fn with_hysteresis(mut self, positive: f64, negative: f64) -> Self {
        self.positive_hysteresis = positive.max(0.0);
        self.negative_hysteresis = negative.max(0.0);
        self
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Reset controller state
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
        self.last_output = None;
    }

    fn in_band(&self, input: f64) -> bool {
        input >= self.setpoint - self.negative_hysteresis
            && input <= self.setpoint + self.positive_hysteresis
    }

    fn compute(&mut self, measurement: f64, dt: f64) -> f64 {
        let error = self.setpoint - measurement;

        let p = self.kp * error;

        self.integral += error * dt;
        let i = self.ki * self.integral;

        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => (error - prev) / dt,
            _ => 0.0,
        };
        let d = self.kd * derivative;

        self.prev_error = Some(error);

        let raw = p + i + d;

        // Anti-windup: drop this step only if it drives further into saturation
        let push = self.ki * error;
        if (raw > pwm::MAX_PERCENT && push > 0.0) || (raw < pwm::MIN_PERCENT && push < 0.0) {
            self.integral -= error * dt;
        }

        raw.clamp(pwm::MIN_PERCENT, pwm::MAX_PERCENT)
    }
}

impl Controller for PidProfile {
    fn run(&mut self, value: f64, dt: f64) -> Option<f64> {
        if !self.in_band(value) {
            self.last_output = Some(self.compute(value, dt));
        }
        self.last_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_inside_band_before_first_output() {
        let mut pid = PidProfile::new(50.0, -2.0, 0.0, 0.0).with_hysteresis(2.0, 2.0);
        assert_eq!(pid.run(51.0, 1.0), None);
    }

    #[test]
    fn test_proportional_response() {
        // Negative gain: hotter than the setpoint drives the fans up
        let mut pid = PidProfile::new(50.0, -2.0, 0.0, 0.0);
        assert_eq!(pid.run(60.0, 1.0), Some(20.0));
    }

    #[test]
    fn test_holds_output_inside_band() {
        let mut pid = PidProfile::new(50.0, -2.0, 0.0, 0.0).with_hysteresis(3.0, 3.0);
        assert_eq!(pid.run(60.0, 1.0), Some(20.0));
        assert_eq!(pid.run(52.0, 1.0), Some(20.0));
    }

    #[test]
    fn test_output_clamped() {
        let mut pid = PidProfile::new(50.0, -20.0, 0.0, 0.0);
        assert_eq!(pid.run(90.0, 1.0), Some(100.0));
        assert_eq!(pid.run(10.0, 1.0), Some(0.0));
    }

    #[test]
    fn test_integral_accumulates_with_dt() {
        let mut pid = PidProfile::new(50.0, 0.0, -1.0, 0.0);
        assert_eq!(pid.run(55.0, 2.0), Some(10.0));
        assert_eq!(pid.run(55.0, 2.0), Some(20.0));
    }

    #[test]
    fn test_anti_windup() {
        let mut pid = PidProfile::new(50.0, 0.0, -10.0, 0.0);
        assert_eq!(pid.run(70.0, 1.0), Some(100.0));
        assert_eq!(pid.run(70.0, 1.0), Some(100.0));
        // Integral was not wound up past saturation
        assert_eq!(pid.run(51.0, 1.0), Some(10.0));
    }

    #[test]
    fn test_integral_unwinds_while_saturated() {
        // Proportional term saturates high while the integral term pulls down
        let mut pid = PidProfile::new(50.0, 20.0, -1.0, 0.0);
        assert_eq!(pid.run(45.0, 1.0), Some(95.0));
        assert_eq!(pid.run(44.0, 1.0), Some(100.0));
        // The step taken at saturation was kept: integral is 16, not 10
        assert_eq!(pid.run(45.0, 1.0), Some(84.0));
    }

    #[test]
    fn test_derivative_term() {
        let mut pid = PidProfile::new(50.0, 0.0, 0.0, -1.0);
        assert_eq!(pid.run(55.0, 1.0), Some(0.0));
        assert_eq!(pid.run(60.0, 1.0), Some(5.0));
    }
}
