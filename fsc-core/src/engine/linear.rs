//! Threshold-table control law
//!
//! Maps an input (usually a temperature) to a duty cycle by stepping through
//! a table of `(threshold, out)` points.
//!
//! # Hysteresis
//!
//! Once an output has been produced, the input has to rise by at least
//! `positive_hysteresis` or fall by at least `negative_hysteresis` relative
//! to the input that produced it before the table is consulted again.
//! Inside that band the previous output is returned unchanged.

use super::profile::Controller;

/// Stepped threshold table with asymmetric hysteresis
#[derive(Debug, Clone)]
pub struct LinearProfile {
    points: Vec<(f64, f64)>,
    positive_hysteresis: f64,
    negative_hysteresis: f64,
    last_input: Option<f64>,
    last_output: Option<f64>,
}

impl LinearProfile {
    /// Create a profile from `(threshold, out)` points in any order
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            points,
            positive_hysteresis: 0.0,
            negative_hysteresis: 0.0,
            last_input: None,
            last_output: None,
        }
    }

    pub fn with_hysteresis(mut self, positive: f64, negative: f64) -> Self {
        self.positive_hysteresis = positive.max(0.0);
        self.negative_hysteresis = negative.max(0.0);
        self
    }

    /// Table output for `input` without touching the hysteresis state
    ///
    /// - Below the first threshold: the first point's output
    /// - Otherwise: the output of the highest threshold not above `input`
    pub fn preview(&self, input: f64) -> Option<f64> {
        let (_, first_out) = self.points.first()?;
        let mut out = *first_out;
        for (threshold, value) in &self.points {
            if input >= *threshold {
                out = *value;
            } else {
                break;
            }
        }
        Some(out)
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    fn outside_band(&self, input: f64) -> bool {
        match self.last_input {
            None => true,
            Some(prev) => {
                input >= prev + self.positive_hysteresis || input <= prev - self.negative_hysteresis
            }
        }
    }
}

impl Controller for LinearProfile {
    fn run(&mut self, value: f64, _dt: f64) -> Option<f64> {
        if self.outside_band(value) {
            self.last_input = Some(value);
            self.last_output = self.preview(value);
        }
        self.last_output
    }
}
