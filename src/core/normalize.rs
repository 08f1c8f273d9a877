//! Fixed per-feature normalization bounds.
//!
//! Every raw feature is mapped into [0, 1] by one bound from [`BOUNDS`].
//! Bounds are constants, so equal physical inputs always normalize to equal
//! outputs. Non-finite values normalize to 0.

/// Length of the feature vector.
pub const FEATURE_DIM: usize = 48;

/// How one raw feature maps into [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    /// Already in [0, 1]; clamp only
    Unit,
    /// `value / ceiling`
    Ceiling(f64),
    /// `|value| / ceiling`
    AbsCeiling(f64),
    /// `(value - min) / (max - min)`
    Range(f64, f64),
    /// Pixel coordinate divided by the reported screen width
    ScreenWidth,
    /// Pixel coordinate divided by the reported screen height
    ScreenHeight,
}

/// Accelerometer means, in g.
pub const ACCEL_RAW_RANGE: (f64, f64) = (-2.0, 2.0);
/// Gyroscope means, in rad/s.
pub const GYRO_RAW_RANGE: (f64, f64) = (-10.0, 10.0);
/// Touch and scroll velocities, in px/s.
pub const VELOCITY_CEILING_PX_S: f64 = 5_000.0;
/// Millisecond-valued timings (time in window, pauses, gaps).
pub const TIMING_CEILING_MS: f64 = 10_000.0;
/// Mean touch dwell, in ms.
pub const DWELL_CEILING_MS: f64 = 2_000.0;
/// Histogram entropies, in bits.
pub const ENTROPY_CEILING_BITS: f64 = 5.0;

/// Bound for each position of the feature vector.
pub const BOUNDS: [Bound; FEATURE_DIM] = [
    // 1-6 touch raw
    Bound::ScreenWidth,
    Bound::ScreenHeight,
    Bound::Unit,
    Bound::Ceiling(TIMING_CEILING_MS),
    Bound::Ceiling(2.0), // touch kind code 0/1/2
    Bound::Ceiling(30.0), // touches per window
    // 7-9 accelerometer raw
    Bound::Range(ACCEL_RAW_RANGE.0, ACCEL_RAW_RANGE.1),
    Bound::Range(ACCEL_RAW_RANGE.0, ACCEL_RAW_RANGE.1),
    Bound::Range(ACCEL_RAW_RANGE.0, ACCEL_RAW_RANGE.1),
    // 10-12 gyroscope raw
    Bound::Range(GYRO_RAW_RANGE.0, GYRO_RAW_RANGE.1),
    Bound::Range(GYRO_RAW_RANGE.0, GYRO_RAW_RANGE.1),
    Bound::Range(GYRO_RAW_RANGE.0, GYRO_RAW_RANGE.1),
    // 13-16 context flags
    Bound::Unit,
    Bound::Unit,
    Bound::Unit,
    Bound::Unit,
    // 17-24 touch derived
    Bound::Ceiling(DWELL_CEILING_MS),
    Bound::Ceiling(VELOCITY_CEILING_PX_S),
    Bound::Range(-180.0, 180.0), // degrees
    Bound::Ceiling(500_000.0), // mean |dv/dt| between touch pairs, px/s^2
    Bound::Unit,
    Bound::Ceiling(15.0), // touches/s
    Bound::Ceiling(3_000.0), // px
    Bound::Ceiling(ENTROPY_CEILING_BITS),
    // 25-30 accelerometer dynamics
    Bound::Ceiling(3.0),
    Bound::Ceiling(3.0),
    Bound::Ceiling(2.0),
    Bound::Ceiling(2.0),
    Bound::Ceiling(10.0),
    Bound::Ceiling(50.0),
    // 31-36 gyroscope dynamics
    Bound::Ceiling(15.0),
    Bound::Ceiling(15.0),
    Bound::Ceiling(50.0),
    Bound::Ceiling(10.0),
    Bound::Ceiling(500.0),
    Bound::Ceiling(50.0),
    // 37-40 scroll derived
    Bound::Ceiling(VELOCITY_CEILING_PX_S),
    Bound::Range(-1.0, 1.0),
    Bound::AbsCeiling(20_000.0), // px/s^2
    Bound::Ceiling(TIMING_CEILING_MS),
    // 41-44 temporal
    Bound::Ceiling(TIMING_CEILING_MS),
    Bound::Ceiling(500.0), // gap std-dev, ms
    Bound::Ceiling(ENTROPY_CEILING_BITS),
    Bound::Unit,
    // 45-48 reserved
    Bound::Unit,
    Bound::Unit,
    Bound::Unit,
    Bound::Unit,
];

/// Clamp into [0, 1]; non-finite input maps to 0.
pub fn clamp01(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

/// Linear map of `[min, max]` onto [0, 1], clamped.
pub fn norm_range(x: f64, min: f64, max: f64) -> f64 {
    if !x.is_finite() || max == min {
        return 0.0;
    }
    clamp01((x - min) / (max - min))
}

impl Bound {
    /// Apply this bound. `screen` is the reported (width, height) in pixels.
    pub fn apply(&self, value: f64, screen: (f64, f64)) -> f64 {
        match *self {
            Bound::Unit => clamp01(value),
            Bound::Ceiling(c) => clamp01(value / c),
            Bound::AbsCeiling(c) => clamp01(value.abs() / c),
            Bound::Range(min, max) => norm_range(value, min, max),
            Bound::ScreenWidth => ratio(value, screen.0),
            Bound::ScreenHeight => ratio(value, screen.1),
        }
    }
}

fn ratio(value: f64, extent: f64) -> f64 {
    if extent > 0.0 && extent.is_finite() {
        clamp01(value / extent)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp01_handles_non_finite() {
        assert_eq!(clamp01(f64::NAN), 0.0);
        assert_eq!(clamp01(f64::INFINITY), 0.0);
        assert_eq!(clamp01(f64::NEG_INFINITY), 0.0);
        assert_eq!(clamp01(1.7), 1.0);
        assert_eq!(clamp01(-0.2), 0.0);
    }

    #[test]
    fn test_norm_range() {
        assert_eq!(norm_range(0.0, -2.0, 2.0), 0.5);
        assert_eq!(norm_range(-5.0, -2.0, 2.0), 0.0);
        assert_eq!(norm_range(1.0, 3.0, 3.0), 0.0);
    }

    #[test]
    fn test_bounds_are_monotonic() {
        for (i, bound) in BOUNDS.iter().enumerate() {
            let lo = bound.apply(0.1, (1000.0, 1000.0));
            let hi = bound.apply(0.2, (1000.0, 1000.0));
            assert!(hi >= lo, "bound {i} is not monotonic");
        }
    }

    #[test]
    fn test_screen_bounds_without_dimensions() {
        assert_eq!(Bound::ScreenWidth.apply(120.0, (0.0, 0.0)), 0.0);
        assert_eq!(Bound::ScreenHeight.apply(500.0, (400.0, 1000.0)), 0.5);
    }
}
