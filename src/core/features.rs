//! Feature computation from event windows.
//!
//! Reduces one closed window to a fixed 48-value vector. Every value comes
//! from timing, geometry and motion magnitude only; tags never feed into a
//! feature.
//!
//! Raw values are computed per group, then mapped into [0, 1] by the fixed
//! bounds in [`crate::core::normalize`]. A group with no samples in the
//! window contributes zeros.

use crate::collector::context::{ContextSnapshot, Orientation};
use crate::collector::types::{MotionSample, TouchEvent, TouchPhase};
use crate::core::normalize::{BOUNDS, FEATURE_DIM};
use crate::core::windowing::EventWindow;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::ops::Index;

/// Positions of individual features in the vector (0-based).
pub mod index {
    pub const TOUCH_X: usize = 0;
    pub const TOUCH_Y: usize = 1;
    pub const TOUCH_PRESSURE: usize = 2;
    pub const TOUCH_TIME_IN_WINDOW: usize = 3;
    pub const TOUCH_KIND: usize = 4;
    pub const TOUCH_COUNT: usize = 5;
    pub const ACCEL_MEAN: usize = 6;
    pub const GYRO_MEAN: usize = 9;
    pub const ORIENTATION: usize = 12;
    pub const SCREEN_ON: usize = 13;
    pub const BATTERY: usize = 14;
    pub const FOREGROUND: usize = 15;
    pub const TOUCH_DWELL: usize = 16;
    pub const TOUCH_VELOCITY: usize = 17;
    pub const TOUCH_DIRECTION: usize = 18;
    pub const TOUCH_JERK: usize = 19;
    pub const TOUCH_MEAN_PRESSURE: usize = 20;
    pub const TOUCH_FREQUENCY: usize = 21;
    pub const TOUCH_PATH_LENGTH: usize = 22;
    pub const TOUCH_STEP_ENTROPY: usize = 23;
    /// Start of the six accelerometer dynamics values
    pub const ACCEL_DYNAMICS: usize = 24;
    /// Start of the six gyroscope dynamics values
    pub const GYRO_DYNAMICS: usize = 30;
    pub const SCROLL_VELOCITY: usize = 36;
    pub const SCROLL_DIRECTION: usize = 37;
    pub const SCROLL_ACCELERATION: usize = 38;
    pub const SCROLL_PAUSE: usize = 39;
    pub const GAP_MEAN: usize = 40;
    pub const GAP_RHYTHM: usize = 41;
    pub const GAP_ENTROPY: usize = 42;
    pub const STABILITY: usize = 43;
    pub const RESERVED: usize = 44;
}

/// Width of one histogram bin for entropy features.
const ENTROPY_BIN_WIDTH: f64 = 50.0;

/// Long-press: held longer than this...
const LONG_PRESS_MIN_MS: f64 = 500.0;
/// ...while moving less than this.
const LONG_PRESS_MAX_TRAVEL_PX: f64 = 10.0;
/// Swipe: moved further than this.
const SWIPE_MIN_TRAVEL_PX: f64 = 25.0;

/// Deviation from the mean magnitude that counts as a motion peak.
const MOTION_PEAK_THRESHOLD: f64 = 0.5;

/// Floor for time deltas used as divisors, in milliseconds.
const MIN_DT_MS: f64 = 1.0;

/// Normalized 48-value summary of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_DIM])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        FEATURE_DIM
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::zeros()
    }
}

impl Index<usize> for FeatureVector {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.0[i]
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

/// Gesture class of one start/end touch pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchKind {
    Tap,
    Swipe,
    LongPress,
}

impl TouchKind {
    pub fn code(self) -> f64 {
        match self {
            TouchKind::Tap => 0.0,
            TouchKind::Swipe => 1.0,
            TouchKind::LongPress => 2.0,
        }
    }
}

/// Classify a gesture by how long it was held and how far it travelled.
pub fn classify_touch(duration_ms: f64, travel_px: f64) -> TouchKind {
    if duration_ms > LONG_PRESS_MIN_MS && travel_px < LONG_PRESS_MAX_TRAVEL_PX {
        TouchKind::LongPress
    } else if travel_px > SWIPE_MIN_TRAVEL_PX {
        TouchKind::Swipe
    } else {
        TouchKind::Tap
    }
}

/// Raw touch-derived values for a window.
#[derive(Debug, Clone, Default)]
struct TouchFeatures {
    last_x: f64,
    last_y: f64,
    last_pressure: f64,
    time_in_window_ms: f64,
    count: f64,
    /// Only set once at least one start/end pair exists
    kind: Option<TouchKind>,
    dwell_mean_ms: f64,
    /// Speed of the latest gesture, in px/s
    velocity: f64,
    direction_deg: Option<f64>,
    jerk: f64,
    mean_pressure: f64,
    /// Gestures started per second of window
    frequency: f64,
    path_length: f64,
    step_entropy: f64,
}

/// Raw statistics of one motion sensor for a window.
#[derive(Debug, Clone, Default)]
struct MotionFeatures {
    mean: [f64; 3],
    /// Magnitude of the latest sample
    magnitude: f64,
    magnitude_mean: f64,
    variance: f64,
    std_dev: f64,
    energy: f64,
    peaks: f64,
}

#[derive(Debug, Clone, Default)]
struct ScrollFeatures {
    velocity: f64,
    direction: f64,
    acceleration: f64,
    pause_ms: f64,
}

#[derive(Debug, Clone, Default)]
struct TemporalFeatures {
    gap_mean_ms: f64,
    rhythm_ms: f64,
    gap_entropy: f64,
    stability: f64,
}

/// One start followed by its matching end.
#[derive(Debug, Clone, Copy)]
struct TouchPair<'a> {
    start: &'a TouchEvent,
    end: &'a TouchEvent,
}

impl TouchPair<'_> {
    fn duration_ms(&self) -> f64 {
        ms_between(self.start.timestamp, self.end.timestamp)
    }

    fn travel_px(&self) -> f64 {
        finite_or_zero(self.start.distance_to(self.end))
    }

    fn velocity(&self) -> f64 {
        self.travel_px() / (self.duration_ms().max(MIN_DT_MS) / 1000.0)
    }
}

/// Reduce a closed window to its normalized feature vector.
///
/// Pure: the same window and context always give the same vector.
pub fn extract(window: &EventWindow, context: &ContextSnapshot) -> FeatureVector {
    let mut raw: [Option<f64>; FEATURE_DIM] = [None; FEATURE_DIM];

    if let Some(touch) = compute_touch_features(window) {
        raw[index::TOUCH_X] = Some(touch.last_x);
        raw[index::TOUCH_Y] = Some(touch.last_y);
        raw[index::TOUCH_PRESSURE] = Some(touch.last_pressure);
        raw[index::TOUCH_TIME_IN_WINDOW] = Some(touch.time_in_window_ms);
        raw[index::TOUCH_KIND] = touch.kind.map(TouchKind::code);
        raw[index::TOUCH_COUNT] = Some(touch.count);
        raw[index::TOUCH_DWELL] = Some(touch.dwell_mean_ms);
        raw[index::TOUCH_VELOCITY] = Some(touch.velocity);
        raw[index::TOUCH_DIRECTION] = touch.direction_deg;
        raw[index::TOUCH_JERK] = Some(touch.jerk);
        raw[index::TOUCH_MEAN_PRESSURE] = Some(touch.mean_pressure);
        raw[index::TOUCH_FREQUENCY] = Some(touch.frequency);
        raw[index::TOUCH_PATH_LENGTH] = Some(touch.path_length);
        raw[index::TOUCH_STEP_ENTROPY] = Some(touch.step_entropy);
    }

    if let Some(accel) = compute_motion_features(&window.accel) {
        fill_motion(&mut raw, index::ACCEL_MEAN, index::ACCEL_DYNAMICS, &accel);
    }
    if let Some(gyro) = compute_motion_features(&window.gyro) {
        fill_motion(&mut raw, index::GYRO_MEAN, index::GYRO_DYNAMICS, &gyro);
    }

    raw[index::ORIENTATION] = Some(match context.orientation {
        Orientation::Portrait => 0.0,
        Orientation::Landscape => 1.0,
    });
    raw[index::SCREEN_ON] = Some(flag(context.screen_on));
    raw[index::BATTERY] = Some(context.battery_level);
    raw[index::FOREGROUND] = Some(flag(context.foreground));

    if let Some(scroll) = compute_scroll_features(window) {
        raw[index::SCROLL_VELOCITY] = Some(scroll.velocity);
        raw[index::SCROLL_DIRECTION] = Some(scroll.direction);
        raw[index::SCROLL_ACCELERATION] = Some(scroll.acceleration);
        raw[index::SCROLL_PAUSE] = Some(scroll.pause_ms);
    }

    let temporal = compute_temporal_features(&window.event_times);
    raw[index::GAP_MEAN] = Some(temporal.gap_mean_ms);
    raw[index::GAP_RHYTHM] = Some(temporal.rhythm_ms);
    raw[index::GAP_ENTROPY] = Some(temporal.gap_entropy);
    raw[index::STABILITY] = Some(temporal.stability);

    let screen = (context.screen_width, context.screen_height);
    let mut values = [0.0; FEATURE_DIM];
    for (i, value) in values.iter_mut().enumerate() {
        *value = raw[i].map_or(0.0, |v| BOUNDS[i].apply(v, screen));
    }
    FeatureVector(values)
}

fn fill_motion(
    raw: &mut [Option<f64>; FEATURE_DIM],
    mean_at: usize,
    dynamics_at: usize,
    features: &MotionFeatures,
) {
    for (axis, mean) in features.mean.iter().enumerate() {
        raw[mean_at + axis] = Some(*mean);
    }
    let dynamics = [
        features.magnitude,
        features.magnitude_mean,
        features.variance,
        features.std_dev,
        features.energy,
        features.peaks,
    ];
    for (offset, value) in dynamics.into_iter().enumerate() {
        raw[dynamics_at + offset] = Some(value);
    }
}

fn compute_touch_features(window: &EventWindow) -> Option<TouchFeatures> {
    let touches = &window.touches;
    let last = touches.last()?;

    let pairs = pair_touches(touches);

    // Longest-held gesture decides the kind; ties go to the later one
    let kind = pairs
        .iter()
        .max_by(|a, b| a.duration_ms().total_cmp(&b.duration_ms()))
        .map(|p| classify_touch(p.duration_ms(), p.travel_px()));

    let dwell_mean_ms = mean(&pairs.iter().map(TouchPair::duration_ms).collect::<Vec<_>>());

    let (velocity, direction_deg) = match pairs.last() {
        Some(p) => {
            let dx = p.end.x - p.start.x;
            let dy = p.end.y - p.start.y;
            (p.velocity(), Some(finite_or_zero(dy.atan2(dx).to_degrees())))
        }
        None => (0.0, None),
    };

    let pressures: Vec<f64> = touches.iter().map(|t| finite_or_zero(t.pressure)).collect();

    let starts = touches
        .iter()
        .filter(|t| t.phase == TouchPhase::Start)
        .count() as f64;
    let window_secs = window.duration_secs();
    let frequency = if window_secs > 0.0 {
        starts / window_secs
    } else {
        0.0
    };

    let steps: Vec<f64> = touches
        .windows(2)
        .map(|w| finite_or_zero(w[0].distance_to(&w[1])))
        .collect();

    Some(TouchFeatures {
        last_x: last.x,
        last_y: last.y,
        last_pressure: last.pressure,
        time_in_window_ms: window.offset_ms(last.timestamp),
        count: touches.len() as f64,
        kind,
        dwell_mean_ms,
        velocity,
        direction_deg,
        jerk: touch_jerk(&pairs),
        mean_pressure: mean(&pressures),
        frequency,
        path_length: steps.iter().sum(),
        step_entropy: entropy(&steps),
    })
}

/// Match each start with the next end. An unmatched start is superseded
/// by a later start; an end with no open start is ignored.
fn pair_touches(touches: &[TouchEvent]) -> Vec<TouchPair<'_>> {
    let mut pairs = Vec::new();
    let mut open: Option<&TouchEvent> = None;

    for touch in touches {
        match touch.phase {
            TouchPhase::Start => open = Some(touch),
            TouchPhase::End => {
                if let Some(start) = open.take() {
                    pairs.push(TouchPair { start, end: touch });
                }
            }
        }
    }

    pairs
}

/// Mean absolute change in gesture velocity between consecutive pairs,
/// in px/s^2. Needs at least two pairs.
fn touch_jerk(pairs: &[TouchPair<'_>]) -> f64 {
    if pairs.len() < 2 {
        return 0.0;
    }

    let jerks: Vec<f64> = pairs
        .windows(2)
        .map(|w| {
            let dt_secs =
                ms_between(w[0].start.timestamp, w[1].start.timestamp).max(MIN_DT_MS) / 1000.0;
            (w[1].velocity() - w[0].velocity()).abs() / dt_secs
        })
        .collect();

    mean(&jerks)
}

fn compute_motion_features(samples: &[MotionSample]) -> Option<MotionFeatures> {
    let last = samples.last()?;

    let axis = |f: fn(&MotionSample) -> f64| -> f64 {
        mean(&samples.iter().map(|s| finite_or_zero(f(s))).collect::<Vec<_>>())
    };
    let magnitudes: Vec<f64> = samples
        .iter()
        .map(|s| finite_or_zero(s.magnitude()))
        .collect();

    let magnitude_mean = mean(&magnitudes);
    let variance = population_variance(&magnitudes);
    let energy = mean(&magnitudes.iter().map(|m| m * m).collect::<Vec<_>>());
    let peaks = magnitudes
        .iter()
        .filter(|m| (*m - magnitude_mean).abs() > MOTION_PEAK_THRESHOLD)
        .count() as f64;

    Some(MotionFeatures {
        mean: [axis(|s| s.x), axis(|s| s.y), axis(|s| s.z)],
        magnitude: finite_or_zero(last.magnitude()),
        magnitude_mean,
        variance,
        std_dev: variance.sqrt(),
        energy,
        peaks,
    })
}

/// Scroll dynamics need at least two scroll events.
fn compute_scroll_features(window: &EventWindow) -> Option<ScrollFeatures> {
    let scrolls = &window.scrolls;
    if scrolls.len() < 2 {
        return None;
    }

    let gaps_ms: Vec<f64> = scrolls
        .windows(2)
        .map(|w| ms_between(w[0].timestamp, w[1].timestamp))
        .collect();

    let velocities: Vec<f64> = scrolls
        .windows(2)
        .zip(&gaps_ms)
        .map(|(w, gap)| finite_or_zero(w[1].delta_y) / gap.max(MIN_DT_MS) * 1000.0)
        .collect();

    let acceleration = match (velocities.len(), gaps_ms.last()) {
        (n, Some(gap)) if n >= 2 => {
            (velocities[n - 1] - velocities[n - 2]) / (gap.max(MIN_DT_MS) / 1000.0)
        }
        _ => 0.0,
    };

    let net: f64 = scrolls.iter().map(|s| finite_or_zero(s.delta_y)).sum();

    Some(ScrollFeatures {
        velocity: mean(&velocities.iter().map(|v| v.abs()).collect::<Vec<_>>()),
        direction: if net > 0.0 {
            1.0
        } else if net < 0.0 {
            -1.0
        } else {
            0.0
        },
        acceleration,
        pause_ms: gaps_ms.last().copied().unwrap_or(0.0),
    })
}

fn compute_temporal_features(times: &[DateTime<Utc>]) -> TemporalFeatures {
    if times.len() < 2 {
        return TemporalFeatures {
            stability: 1.0,
            ..Default::default()
        };
    }

    let mut sorted = times.to_vec();
    sorted.sort_unstable();
    let gaps: Vec<f64> = sorted.windows(2).map(|w| ms_between(w[0], w[1])).collect();
    let variance = population_variance(&gaps);
    // Stability is scored on gaps in seconds so ordinary jitter stays visible
    let gap_secs: Vec<f64> = gaps.iter().map(|g| g / 1000.0).collect();

    TemporalFeatures {
        gap_mean_ms: mean(&gaps),
        rhythm_ms: variance.sqrt(),
        gap_entropy: entropy(&gaps),
        stability: 1.0 / (1.0 + population_variance(&gap_secs)),
    }
}

/// Shannon entropy, in bits, of values binned into fixed-width buckets.
pub fn entropy(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut bins: HashMap<i64, usize> = HashMap::new();
    for v in values.iter().filter(|v| v.is_finite()) {
        *bins.entry((v / ENTROPY_BIN_WIDTH).floor() as i64).or_insert(0) += 1;
    }

    let total = bins.values().sum::<usize>() as f64;
    if total == 0.0 {
        return 0.0;
    }

    bins.values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    finite_or_zero(values.iter().mean())
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    finite_or_zero(values.iter().population_variance())
}

fn ms_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    ((b - a).num_milliseconds() as f64).max(0.0)
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}
