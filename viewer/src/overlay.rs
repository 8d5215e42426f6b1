use realsense_viewer_common::settings::{Settings, TemporalFilter};

const MARGIN_X: f32 = 5.0;
const MARGIN_Y: f32 = 14.0;
const FONT_SIZE: f32 = 10.0;
const LINE_SPACING: f32 = 2.0;

/// One line of the status overlay, in window pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// Status overlay for the current settings and measured frame rate.
pub fn status_lines(settings: &Settings, fps: f32) -> Vec<OverlayLine> {
    let temporal = match settings.temporal_filter {
        TemporalFilter::None => settings.temporal_filter.label().to_string(),
        mode => format!("{}, window size {}", mode.label(), settings.window_size),
    };
    let bilateral = match settings.active_bilateral() {
        Some(p) => format!("spatial sigma {:.0}, range sigma {:.2}", p.sigma_s, p.sigma_r),
        None => "off".to_string(),
    };
    let entries = [
        format!("framerate: {fps:.1}"),
        format!("confidence threshold: {}", settings.confidence_threshold),
        format!("temporal filtering: {temporal}"),
        format!("bilateral filtering: {bilateral}"),
        format!("save stream: {}", if settings.recording { "on" } else { "off" }),
    ];

    entries
        .into_iter()
        .enumerate()
        .map(|(i, text)| OverlayLine {
            text,
            x: MARGIN_X,
            y: MARGIN_Y + i as f32 * (FONT_SIZE + LINE_SPACING),
            size: FONT_SIZE,
        })
        .collect()
}
