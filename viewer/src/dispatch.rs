//! Keyboard commands.
//!
//! A key press mutates [`Settings`] and yields the single [`Action`] the
//! control loop has to carry out so the new values reach the capture device,
//! the frame processor or the recorder.

use realsense_viewer_common::settings::{BilateralParams, Settings, TemporalFilter};
use tracing::info;

/// Side effect of a handled key press.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Push temporal filter mode and window size to the capture device.
    PushTemporal(TemporalFilter, usize),
    /// Push the confidence threshold to the capture device.
    PushConfidence(u8),
    /// Replace the post-filter of the frame processor.
    UpdatePostFilter(Option<BilateralParams>),
    /// Save the most recently displayed frame.
    SaveSnapshot,
    StartRecording,
    StopRecording,
}

/// Keys with a binding, for the `--help` text.
pub const KEY_BINDINGS: &[(&str, &str)] = &[
    ("w / W", "increase / decrease temporal filtering window size"),
    ("t / T", "increase / decrease confidence threshold"),
    ("k", "cycle temporal filtering mode (off, average)"),
    ("b", "toggle bilateral filtering"),
    ("a / A", "increase / decrease bilateral filter spatial sigma"),
    ("z / Z", "increase / decrease bilateral filter range sigma"),
    ("p", "save the displayed point cloud"),
    ("s", "toggle stream recording"),
];

/// Apply key `key` to `settings`. Returns `None` for unbound keys, which
/// leave the settings untouched.
pub fn dispatch(settings: &mut Settings, key: char) -> Option<Action> {
    let action = match key {
        'w' | 'W' => {
            settings.step_window_size(key == 'w');
            info!(window_size = settings.window_size, "temporal filtering window size");
            Action::PushTemporal(settings.temporal_filter, settings.window_size)
        }
        't' | 'T' => {
            settings.step_confidence_threshold(key == 't');
            info!(threshold = settings.confidence_threshold, "confidence threshold");
            Action::PushConfidence(settings.confidence_threshold)
        }
        'k' => {
            settings.cycle_temporal_filter();
            info!(mode = %settings.temporal_filter, "temporal filtering");
            Action::PushTemporal(settings.temporal_filter, settings.window_size)
        }
        'b' => {
            settings.toggle_bilateral();
            info!(enabled = settings.bilateral_enabled, "bilateral filtering");
            Action::UpdatePostFilter(settings.active_bilateral())
        }
        'a' | 'A' => {
            settings.step_spatial_sigma(key == 'a');
            info!(sigma_s = settings.bilateral.sigma_s, "bilateral filter spatial sigma");
            Action::UpdatePostFilter(settings.active_bilateral())
        }
        'z' | 'Z' => {
            settings.step_range_sigma(key == 'z');
            info!(sigma_r = settings.bilateral.sigma_r, "bilateral filter range sigma");
            Action::UpdatePostFilter(settings.active_bilateral())
        }
        'p' => Action::SaveSnapshot,
        's' => {
            settings.recording = !settings.recording;
            info!(recording = settings.recording, "record stream");
            if settings.recording {
                Action::StartRecording
            } else {
                Action::StopRecording
            }
        }
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;
    use realsense_viewer_common::settings::{MAX_CONFIDENCE_THRESHOLD, MIN_RANGE_SIGMA, MIN_SPATIAL_SIGMA};

    /// Map arbitrary bytes onto presses of `keys`.
    fn press_all(keys: &[char], presses: &[u8], mut holds: impl FnMut(&Settings) -> bool) -> bool {
        let mut settings = Settings::default();
        presses.iter().all(|b| {
            dispatch(&mut settings, keys[*b as usize % keys.len()]);
            holds(&settings)
        })
    }

    quickcheck! {
        fn window_size_never_below_one(presses: Vec<u8>) -> bool {
            press_all(&['w', 'W', 'W'], &presses, |s| s.window_size >= 1)
        }

        fn confidence_threshold_stays_in_range(presses: Vec<u8>) -> bool {
            press_all(&['t', 'T'], &presses, |s| s.confidence_threshold <= MAX_CONFIDENCE_THRESHOLD)
        }

        fn sigmas_respect_their_floors(presses: Vec<u8>) -> bool {
            press_all(&['a', 'A', 'A', 'z', 'Z', 'Z'], &presses, |s| {
                s.bilateral.sigma_s >= MIN_SPATIAL_SIGMA && s.bilateral.sigma_r >= MIN_RANGE_SIGMA
            })
        }
    }

    #[test]
    fn confidence_threshold_saturates() {
        let mut s = Settings::default();
        for _ in 0..20 {
            dispatch(&mut s, 't');
        }
        assert_eq!(s.confidence_threshold, 15);
        for _ in 0..20 {
            dispatch(&mut s, 'T');
        }
        assert_eq!(s.confidence_threshold, 0);
    }

    #[test]
    fn k_cycles_between_off_and_average() {
        let mut s = Settings::default();
        assert_eq!(
            dispatch(&mut s, 'k'),
            Some(Action::PushTemporal(TemporalFilter::Average, 3))
        );
        assert_eq!(
            dispatch(&mut s, 'k'),
            Some(Action::PushTemporal(TemporalFilter::None, 3))
        );
        for _ in 0..50 {
            dispatch(&mut s, 'k');
            assert_ne!(s.temporal_filter, TemporalFilter::Median);
        }
    }

    #[test]
    fn window_changes_push_current_mode() {
        let mut s = Settings::default();
        dispatch(&mut s, 'k');
        assert_eq!(
            dispatch(&mut s, 'w'),
            Some(Action::PushTemporal(TemporalFilter::Average, 4))
        );
    }

    #[test]
    fn sigma_changes_only_filter_when_enabled() {
        let mut s = Settings::default();
        assert_eq!(dispatch(&mut s, 'a'), Some(Action::UpdatePostFilter(None)));
        assert_eq!(s.bilateral.sigma_s, 6.0);
        let Some(Action::UpdatePostFilter(Some(params))) = dispatch(&mut s, 'b') else {
            panic!("bilateral toggle did not enable the filter");
        };
        assert_eq!(params.sigma_s, 6.0);
        assert_eq!(dispatch(&mut s, 'b'), Some(Action::UpdatePostFilter(None)));
    }

    #[test]
    fn s_toggles_recording() {
        let mut s = Settings::default();
        assert_eq!(dispatch(&mut s, 's'), Some(Action::StartRecording));
        assert!(s.recording);
        assert_eq!(dispatch(&mut s, 's'), Some(Action::StopRecording));
        assert!(!s.recording);
    }

    #[test]
    fn unbound_keys_change_nothing() {
        let mut s = Settings::default();
        for key in ['x', 'K', 'S', 'P', 'B', ' ', '1', 'q'] {
            assert_eq!(dispatch(&mut s, key), None);
        }
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn snapshot_leaves_settings_alone() {
        let mut s = Settings::default();
        assert_eq!(dispatch(&mut s, 'p'), Some(Action::SaveSnapshot));
        assert_eq!(s, Settings::default());
    }
}
