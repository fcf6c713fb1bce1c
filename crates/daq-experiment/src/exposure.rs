//! Closed-loop exposure correction.
//!
//! The detector response is treated as linear in integration time, so the
//! exposure that would put the brightest pixel at `target_peak` is the current
//! exposure scaled by `target_peak / measured_peak`. Detector exposure is
//! written in milliseconds while the sequencer works in seconds, hence the
//! `/ 1000` in the result.

use daq_core::error::FeedbackError;

/// Peak count the correction aims for (just below 16-bit saturation)
pub const DEFAULT_TARGET_PEAK: f64 = 58_000.0;

/// Longest exposure the detector accepts, in seconds
pub const DEFAULT_MAX_EXPOSURE_S: f64 = 30.0;

/// Rescale an exposure so the next frame peaks near `target_peak`.
///
/// # Arguments
/// * `current_exposure_ms` - exposure the measured frame was taken with
/// * `measured_peak` - maximum pixel value of that frame
/// * `target_peak` - desired maximum pixel value
/// * `max_exposure_s` - device ceiling
///
/// # Returns
/// The corrected exposure in **seconds**.
///
/// # Errors
/// - [`FeedbackError::Division`] when `measured_peak` is zero, negative or NaN
/// - [`FeedbackError::Range`] when the result is non-finite, non-positive or
///   above `max_exposure_s`
///
/// # Example
///
/// ```rust
/// use daq_experiment::exposure::correct_exposure;
///
/// let next = correct_exposure(100.0, 29_000.0, 58_000.0, 30.0).unwrap();
/// assert!((next - 0.2).abs() < 1e-12);
/// ```
pub fn correct_exposure(
    current_exposure_ms: f64,
    measured_peak: f64,
    target_peak: f64,
    max_exposure_s: f64,
) -> Result<f64, FeedbackError> {
    if measured_peak.is_nan() || measured_peak <= 0.0 {
        return Err(FeedbackError::Division { measured_peak });
    }

    let corrected = current_exposure_ms * target_peak / measured_peak / 1000.0;
    if !corrected.is_finite() || corrected <= 0.0 || corrected > max_exposure_s {
        return Err(FeedbackError::Range {
            value: corrected,
            max: max_exposure_s,
        });
    }
    Ok(corrected)
}

/// Exposure-feedback controller with a fixed target and ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureFeedbackController {
    pub target_peak: f64,
    pub max_exposure_s: f64,
}

impl ExposureFeedbackController {
    pub fn new(target_peak: f64, max_exposure_s: f64) -> Self {
        Self {
            target_peak,
            max_exposure_s,
        }
    }

    /// Corrected exposure in seconds; see [`correct_exposure`]
    pub fn correct(&self, current_exposure_ms: f64, measured_peak: f64) -> Result<f64, FeedbackError> {
        correct_exposure(
            current_exposure_ms,
            measured_peak,
            self.target_peak,
            self.max_exposure_s,
        )
    }
}

impl Default for ExposureFeedbackController {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_PEAK, DEFAULT_MAX_EXPOSURE_S)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_peak_is_division_error() {
        let controller = ExposureFeedbackController::default();
        assert_eq!(
            controller.correct(100.0, 0.0),
            Err(FeedbackError::Division { measured_peak: 0.0 })
        );
        assert!(matches!(
            controller.correct(100.0, -5.0),
            Err(FeedbackError::Division { .. })
        ));
        assert!(matches!(
            controller.correct(100.0, f64::NAN),
            Err(FeedbackError::Division { .. })
        ));
    }

    #[test]
    fn test_scales_to_target() {
        let controller = ExposureFeedbackController::default();
        let next = controller.correct(50.0, 58_000.0).unwrap();
        assert!((next - 0.05).abs() < 1e-12);

        let next = controller.correct(50.0, 14_500.0).unwrap();
        assert!((next - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_monotonic_in_peak_and_exposure() {
        let controller = ExposureFeedbackController::default();
        let peaks = [10.0, 100.0, 1_000.0, 20_000.0, 65_535.0];
        for pair in peaks.windows(2) {
            let low = controller.correct(100.0, pair[0]).unwrap();
            let high = controller.correct(100.0, pair[1]).unwrap();
            assert!(high < low, "peak {} -> {} should shorten exposure", pair[0], pair[1]);
        }

        let exposures = [1.0, 10.0, 100.0, 1_000.0];
        for pair in exposures.windows(2) {
            let short = controller.correct(pair[0], 20_000.0).unwrap();
            let long = controller.correct(pair[1], 20_000.0).unwrap();
            assert!(long > short);
        }
    }

    #[test]
    fn test_ceiling_is_range_error() {
        let controller = ExposureFeedbackController::new(DEFAULT_TARGET_PEAK, 1.0);
        let err = controller.correct(1_000.0, 100.0).unwrap_err();
        assert!(matches!(err, FeedbackError::Range { max, .. } if max == 1.0));
    }

    #[test]
    fn test_non_positive_result_is_range_error() {
        let err = correct_exposure(-10.0, 100.0, DEFAULT_TARGET_PEAK, 30.0).unwrap_err();
        assert!(matches!(err, FeedbackError::Range { .. }));

        let err = correct_exposure(f64::INFINITY, 100.0, DEFAULT_TARGET_PEAK, f64::INFINITY)
            .unwrap_err();
        assert!(matches!(err, FeedbackError::Range { .. }));
    }
}
