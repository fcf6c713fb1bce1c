//! Setpoint trajectories.
//!
//! Pure generators for the ordered setpoint sequences a run walks through:
//! the damped alternating degauss ramp and the descending hysteresis sweep.
//! A [`Trajectory`] is built once per run and consumed in order.

use std::f64::consts::PI;

/// Last setpoint of a degauss ramp. Some supplies drop their output stage at
/// exactly zero, so the ramp parks just above it.
pub const DEGAUSS_TERMINAL_SETPOINT: f64 = 1e-7;

/// Decay exponent reached by the last degauss point (`e^-5` of the start amplitude)
pub const DEGAUSS_DECAY_SPAN: f64 = 5.0;

/// Ordered, immutable sequence of setpoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory(Vec<f64>);

impl Trajectory {
    pub fn new(points: Vec<f64>) -> Self {
        Self(points)
    }

    pub fn points(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.0.iter()
    }
}

impl From<Vec<f64>> for Trajectory {
    fn from(points: Vec<f64>) -> Self {
        Self(points)
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
///
/// `n == 0` gives an empty vector, `n == 1` gives `[start]`, and the last
/// value is exactly `stop` otherwise.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n - 1).map(|i| start + step * i as f64).collect();
            values.push(stop);
            values
        }
    }
}

/// Damped, alternating-sign current ramp for demagnetizing the sample.
///
/// Point `i` is `max_amplitude * e^{-s_i} * (-1)^i` with `s_i` evenly spaced
/// over `[0, 5]`, followed by [`DEGAUSS_TERMINAL_SETPOINT`].
///
/// # Example
///
/// ```rust
/// use daq_experiment::trajectory::degauss_ramp;
///
/// let ramp = degauss_ramp(1.0, 5);
/// assert_eq!(ramp.len(), 6);
/// assert_eq!(ramp.points()[0], 1.0);
/// assert!(ramp.points()[1] < 0.0);
/// ```
pub fn degauss_ramp(max_amplitude: f64, cycle_count: usize) -> Trajectory {
    let mut points: Vec<f64> = linspace(0.0, DEGAUSS_DECAY_SPAN, cycle_count)
        .into_iter()
        .enumerate()
        .map(|(i, s)| max_amplitude * (-s).exp() * (i as f64 * PI).cos().round())
        .collect();
    points.push(DEGAUSS_TERMINAL_SETPOINT);
    Trajectory(points)
}

/// Descending hysteresis branch with the default point counts.
///
/// Equivalent to `HysteresisSweep::new(high, low).build()`.
pub fn hysteresis_sweep(high: f64, low: f64) -> Trajectory {
    HysteresisSweep::new(high, low).build()
}

/// Builder for a descending hysteresis branch.
///
/// The branch approaches `low` coarsely from `high`, then sweeps finely from
/// `low` through zero to `-high`. The seam point `low` appears once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisSweep {
    high: f64,
    low: f64,
    approach_points: usize,
    sweep_points: usize,
}

impl HysteresisSweep {
    pub fn new(high: f64, low: f64) -> Self {
        Self {
            high,
            low,
            approach_points: 5,
            sweep_points: 80,
        }
    }

    /// Points in the coarse `high -> low` segment, both ends included
    pub fn approach_points(mut self, n: usize) -> Self {
        self.approach_points = n;
        self
    }

    /// Points in the fine `low -> -high` segment, both ends included
    pub fn sweep_points(mut self, n: usize) -> Self {
        self.sweep_points = n;
        self
    }

    pub fn build(&self) -> Trajectory {
        let mut points = linspace(self.high, self.low, self.approach_points);
        points.extend(
            linspace(self.low, -self.high, self.sweep_points)
                .into_iter()
                .skip(1),
        );
        Trajectory(points)
    }
}

impl Default for HysteresisSweep {
    fn default() -> Self {
        Self::new(0.6, 0.15)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace_edges() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(3.0, 7.0, 1), vec![3.0]);
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(*linspace(0.15, -0.6, 80).last().unwrap(), -0.6);
    }

    #[test]
    fn test_degauss_alternates_and_decays() {
        let ramp = degauss_ramp(1.0, 5);
        let points = ramp.points();
        assert_eq!(points.len(), 6);

        for pair in points[..5].windows(2) {
            assert!(pair[0] * pair[1] < 0.0, "signs must alternate: {:?}", pair);
        }
        for pair in points.windows(2) {
            assert!(pair[1].abs() <= pair[0].abs());
        }

        let terminal = points[5];
        assert!(terminal != 0.0);
        assert!(terminal.abs() < 1e-6);
        assert!((points[4] - (-5.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_degauss_zero_cycles_parks_at_terminal() {
        assert_eq!(degauss_ramp(2.0, 0).points(), &[DEGAUSS_TERMINAL_SETPOINT]);
    }

    #[test]
    fn test_default_hysteresis_shape() {
        let sweep = hysteresis_sweep(0.6, 0.15);
        let points = sweep.points();

        assert_eq!(points.len(), 84);
        assert_eq!(points[0], 0.6);
        assert_eq!(points[4], 0.15);
        assert_eq!(*points.last().unwrap(), -0.6);
        for pair in points.windows(2) {
            assert!(pair[1] < pair[0], "not strictly decreasing at {:?}", pair);
        }
        assert_eq!(points.iter().filter(|p| **p == 0.15).count(), 1);
    }

    #[test]
    fn test_builder_point_counts() {
        let sweep = HysteresisSweep::new(1.0, 0.5)
            .approach_points(3)
            .sweep_points(4)
            .build();
        assert_eq!(sweep.len(), 6);
        assert_eq!(sweep, HysteresisSweep::new(1.0, 0.5).approach_points(3).sweep_points(4).build());
        assert_eq!(HysteresisSweep::default().build(), hysteresis_sweep(0.6, 0.15));
    }
}
