use std::fmt;

pub const MIN_WINDOW_SIZE: usize = 1;
pub const MAX_CONFIDENCE_THRESHOLD: u8 = 15;
pub const MIN_SPATIAL_SIGMA: f32 = 1.0;
pub const MIN_RANGE_SIGMA: f32 = 0.01;
pub const RANGE_SIGMA_STEP: f32 = 0.01;

/// Frame-to-frame smoothing applied by the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporalFilter {
    #[default]
    None,
    /// Supported by the capture side but not part of the keyboard cycle.
    Median,
    Average,
}

impl TemporalFilter {
    /// Next mode in the keyboard cycle: none → average → none.
    ///
    /// `Median` is left out of the cycle; if it was configured some other
    /// way the cycle falls back to `None`.
    pub fn cycle(self) -> Self {
        match self {
            TemporalFilter::None => TemporalFilter::Average,
            TemporalFilter::Average | TemporalFilter::Median => TemporalFilter::None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TemporalFilter::None => "off",
            TemporalFilter::Median => "median",
            TemporalFilter::Average => "average",
        }
    }
}

impl fmt::Display for TemporalFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bilateral filter sigmas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilateralParams {
    /// Spatial sigma, in pixels of the organized cloud.
    pub sigma_s: f32,
    /// Range sigma, in meters of depth.
    pub sigma_r: f32,
}

impl Default for BilateralParams {
    fn default() -> Self {
        Self {
            sigma_s: 5.0,
            sigma_r: 0.05,
        }
    }
}

/// Operator-tunable state of the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub temporal_filter: TemporalFilter,
    pub window_size: usize,
    pub confidence_threshold: u8,
    pub bilateral_enabled: bool,
    pub bilateral: BilateralParams,
    pub recording: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temporal_filter: TemporalFilter::None,
            window_size: 3,
            confidence_threshold: 6,
            bilateral_enabled: false,
            bilateral: BilateralParams::default(),
            recording: false,
        }
    }
}

impl Settings {
    pub fn step_window_size(&mut self, up: bool) {
        self.window_size = if up {
            self.window_size.saturating_add(1)
        } else {
            self.window_size.saturating_sub(1).max(MIN_WINDOW_SIZE)
        };
    }

    pub fn step_confidence_threshold(&mut self, up: bool) {
        self.confidence_threshold = if up {
            (self.confidence_threshold + 1).min(MAX_CONFIDENCE_THRESHOLD)
        } else {
            self.confidence_threshold.saturating_sub(1)
        };
    }

    pub fn cycle_temporal_filter(&mut self) {
        self.temporal_filter = self.temporal_filter.cycle();
    }

    pub fn toggle_bilateral(&mut self) {
        self.bilateral_enabled = !self.bilateral_enabled;
    }

    pub fn step_spatial_sigma(&mut self, up: bool) {
        let s = self.bilateral.sigma_s + if up { 1.0 } else { -1.0 };
        self.bilateral.sigma_s = s.max(MIN_SPATIAL_SIGMA);
    }

    pub fn step_range_sigma(&mut self, up: bool) {
        let r = self.bilateral.sigma_r + if up { RANGE_SIGMA_STEP } else { -RANGE_SIGMA_STEP };
        self.bilateral.sigma_r = r.max(MIN_RANGE_SIGMA);
    }

    /// Sigmas to filter with, `None` when bilateral filtering is off.
    pub fn active_bilateral(&self) -> Option<BilateralParams> {
        self.bilateral_enabled.then_some(self.bilateral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.window_size, 3);
        assert_eq!(s.confidence_threshold, 6);
        assert_eq!(s.temporal_filter, TemporalFilter::None);
        assert!(!s.bilateral_enabled);
        assert_eq!(s.bilateral.sigma_s, 5.0);
        assert!(!s.recording);
    }

    #[test]
    fn window_size_floors_at_one() {
        let mut s = Settings::default();
        for _ in 0..10 {
            s.step_window_size(false);
        }
        assert_eq!(s.window_size, 1);
        s.step_window_size(true);
        assert_eq!(s.window_size, 2);
    }

    #[test]
    fn confidence_threshold_is_clamped() {
        let mut s = Settings::default();
        for _ in 0..20 {
            s.step_confidence_threshold(true);
        }
        assert_eq!(s.confidence_threshold, 15);
        for _ in 0..20 {
            s.step_confidence_threshold(false);
        }
        assert_eq!(s.confidence_threshold, 0);
    }

    #[test]
    fn sigmas_respect_floors() {
        let mut s = Settings::default();
        for _ in 0..10 {
            s.step_spatial_sigma(false);
            s.step_range_sigma(false);
        }
        assert_eq!(s.bilateral.sigma_s, MIN_SPATIAL_SIGMA);
        assert_eq!(s.bilateral.sigma_r, MIN_RANGE_SIGMA);
        s.step_range_sigma(true);
        assert!((s.bilateral.sigma_r - 0.02).abs() < 1e-6);
    }

    #[test]
    fn temporal_cycle_skips_median() {
        let start = TemporalFilter::None;
        assert_eq!(start.cycle(), TemporalFilter::Average);
        assert_eq!(start.cycle().cycle(), TemporalFilter::None);
        assert_eq!(TemporalFilter::Median.cycle(), TemporalFilter::None);
    }

    #[test]
    fn active_bilateral_follows_toggle() {
        let mut s = Settings::default();
        assert_eq!(s.active_bilateral(), None);
        s.toggle_bilateral();
        assert_eq!(s.active_bilateral(), Some(BilateralParams::default()));
    }
}
