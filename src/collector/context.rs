//! Ambient device context consumed by the feature extractor.
//!
//! Orientation, battery and foreground state change rarely and arrive from
//! platform callbacks, so they are kept in a shared cell instead of being
//! buffered per window.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Screen orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    /// Landscape when the screen is wider than it is tall.
    pub fn from_dimensions(width: f64, height: f64) -> Self {
        if height >= width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }
}

/// Point-in-time view of the ambient context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub orientation: Orientation,
    pub screen_on: bool,
    /// Battery charge in [0, 1]
    pub battery_level: f64,
    pub foreground: bool,
    /// Window width in pixels (0 when unknown)
    pub screen_width: f64,
    /// Window height in pixels (0 when unknown)
    pub screen_height: f64,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self {
            orientation: Orientation::Portrait,
            screen_on: true,
            battery_level: 1.0,
            foreground: true,
            screen_width: 0.0,
            screen_height: 0.0,
        }
    }
}

/// Shared, thread-safe context cell.
#[derive(Debug, Default)]
pub struct ContextState {
    inner: RwLock<ContextSnapshot>,
}

impl ContextState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current context.
    pub fn snapshot(&self) -> ContextSnapshot {
        *self.inner.read()
    }

    /// Record new screen dimensions; orientation follows.
    pub fn set_screen_size(&self, width: f64, height: f64) {
        let mut ctx = self.inner.write();
        ctx.screen_width = width;
        ctx.screen_height = height;
        ctx.orientation = Orientation::from_dimensions(width, height);
    }

    /// Record a battery reading. `None` (unavailable) keeps the last level.
    pub fn set_battery_level(&self, level: Option<f64>) {
        if let Some(level) = level.filter(|l| l.is_finite()) {
            self.inner.write().battery_level = level.clamp(0.0, 1.0);
        }
    }

    /// Record app foreground state. Screen-on is approximated by foreground.
    pub fn set_foreground(&self, foreground: bool) {
        let mut ctx = self.inner.write();
        ctx.foreground = foreground;
        ctx.screen_on = foreground;
    }
}

/// Context shared between the sink and the scheduler.
pub type SharedContext = Arc<ContextState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_follows_dimensions() {
        let ctx = ContextState::new();
        ctx.set_screen_size(390.0, 844.0);
        assert_eq!(ctx.snapshot().orientation, Orientation::Portrait);

        ctx.set_screen_size(844.0, 390.0);
        assert_eq!(ctx.snapshot().orientation, Orientation::Landscape);
    }

    #[test]
    fn test_battery_unavailable_keeps_last_level() {
        let ctx = ContextState::new();
        ctx.set_battery_level(Some(0.4));
        ctx.set_battery_level(None);
        ctx.set_battery_level(Some(f64::NAN));
        assert_eq!(ctx.snapshot().battery_level, 0.4);
    }

    #[test]
    fn test_background_turns_screen_off() {
        let ctx = ContextState::new();
        ctx.set_foreground(false);
        let snap = ctx.snapshot();
        assert!(!snap.foreground);
        assert!(!snap.screen_on);
    }
}
