//! Backend-independent acquisition processing.
//!
//! Every backend hands raw depth images to [`DepthProcessor`], which applies
//! the confidence threshold and temporal filter the operator selected and
//! deprojects the result into an organized point cloud.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use realsense_viewer_common::frame::{PointCloudFrame, PointFormat};
use realsense_viewer_common::settings::{TemporalFilter, MAX_CONFIDENCE_THRESHOLD};
use tracing::debug;

use crate::CaptureError;

/// One depth image as delivered by a backend.
#[derive(Debug, Clone)]
pub struct RawDepthFrame {
    pub width: u32,
    pub height: u32,
    /// Depth in device units, 0 means "no measurement".
    pub depth: Vec<u16>,
    /// Per-pixel confidence 0-15, when the device reports it.
    pub confidence: Option<Vec<u8>>,
    /// Per-pixel RGB on the depth image grid.
    pub color: Option<Vec<[u8; 3]>>,
    pub stamp_us: u64,
}

/// Pinhole intrinsics of the depth stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    /// Meters per depth unit.
    pub depth_scale: f32,
}

impl Intrinsics {
    /// Intrinsics for a sensor with the given horizontal field of view.
    pub fn from_fov(width: u32, height: u32, hfov_deg: f32, depth_scale: f32) -> Self {
        let fx = width as f32 * 0.5 / (hfov_deg.to_radians() * 0.5).tan();
        Self {
            fx,
            fy: fx,
            cx: (width as f32 - 1.0) * 0.5,
            cy: (height as f32 - 1.0) * 0.5,
            depth_scale,
        }
    }

    /// Back-project pixel (`u`, `v`) at `depth_m` meters.
    #[inline]
    pub fn deproject(&self, u: u32, v: u32, depth_m: f32) -> [f32; 3] {
        [
            (u as f32 - self.cx) * depth_m / self.fx,
            (v as f32 - self.cy) * depth_m / self.fy,
            depth_m,
        ]
    }
}

/// Nearest-neighbour resample of a `src_w` x `src_h` color image onto the
/// depth image grid. Color and depth imagers share a field of view closely
/// enough for display; this is not a registration.
pub fn resample_color(src: &[[u8; 3]], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Option<Vec<[u8; 3]>> {
    if src_w == 0 || src_h == 0 || src.len() != src_w as usize * src_h as usize {
        return None;
    }
    if (src_w, src_h) == (dst_w, dst_h) {
        return Some(src.to_vec());
    }
    let mut out = Vec::with_capacity(dst_w as usize * dst_h as usize);
    for v in 0..dst_h {
        let sv = (v as u64 * src_h as u64 / dst_h as u64) as usize;
        for u in 0..dst_w {
            let su = (u as u64 * src_w as u64 / dst_w as u64) as usize;
            out.push(src[sv * src_w as usize + su]);
        }
    }
    Some(out)
}

/// Last value pushed to a device option, so the option is only written
/// when the operator changes it.
#[derive(Debug, Default)]
pub struct AppliedOption<T> {
    applied: Option<T>,
}

impl<T: Copy + PartialEq> AppliedOption<T> {
    /// Returns `current` when it differs from the last applied value and
    /// records it as applied.
    pub fn update(&mut self, current: T) -> Option<T> {
        if self.applied == Some(current) {
            return None;
        }
        self.applied = Some(current);
        Some(current)
    }
}

/// Acquisition-time controls, shared between the device handle and its
/// capture thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionControls {
    pub confidence_threshold: u8,
    pub temporal_filter: TemporalFilter,
    pub window_size: usize,
}

impl Default for AcquisitionControls {
    fn default() -> Self {
        Self {
            confidence_threshold: 6,
            temporal_filter: TemporalFilter::None,
            window_size: 1,
        }
    }
}

/// Thread-safe holder for [`AcquisitionControls`].
#[derive(Debug, Default)]
pub struct SharedControls(Mutex<AcquisitionControls>);

impl SharedControls {
    pub fn get(&self) -> AcquisitionControls {
        *self.0.lock()
    }

    pub fn set_confidence_threshold(&self, threshold: u8) {
        self.0.lock().confidence_threshold = threshold.min(MAX_CONFIDENCE_THRESHOLD);
    }

    pub fn set_temporal_filter(&self, filter: TemporalFilter, window_size: usize) {
        let mut controls = self.0.lock();
        controls.temporal_filter = filter;
        controls.window_size = window_size.max(1);
    }
}

/// Per-pixel ring of the last `window` depth images.
#[derive(Debug, Default)]
struct TemporalHistory {
    frames: VecDeque<Vec<u16>>,
    dims: (u32, u32),
}

impl TemporalHistory {
    fn push(&mut self, raw: &RawDepthFrame, depth: Vec<u16>, window: usize) {
        if self.dims != (raw.width, raw.height) {
            self.frames.clear();
            self.dims = (raw.width, raw.height);
        }
        self.frames.push_back(depth);
        while self.frames.len() > window {
            self.frames.pop_front();
        }
    }

    fn clear(&mut self) {
        self.frames.clear();
    }

    fn reduce(&self, filter: TemporalFilter, len: usize) -> Vec<u16> {
        let mut scratch = Vec::with_capacity(self.frames.len());
        (0..len)
            .map(|i| {
                scratch.clear();
                scratch.extend(self.frames.iter().map(|f| f[i]).filter(|d| *d != 0));
                if scratch.is_empty() {
                    return 0;
                }
                match filter {
                    TemporalFilter::Average => {
                        let sum: u32 = scratch.iter().map(|d| *d as u32).sum();
                        (sum as f32 / scratch.len() as f32).round() as u16
                    }
                    TemporalFilter::Median => {
                        scratch.sort_unstable();
                        scratch[scratch.len() / 2]
                    }
                    TemporalFilter::None => *scratch.last().unwrap_or(&0),
                }
            })
            .collect()
    }
}

/// Turns raw depth images into point-cloud frames.
#[derive(Debug)]
pub struct DepthProcessor {
    intrinsics: Intrinsics,
    format: PointFormat,
    history: TemporalHistory,
    last_controls: Option<AcquisitionControls>,
    seq: u64,
}

impl DepthProcessor {
    pub fn new(intrinsics: Intrinsics, format: PointFormat) -> Self {
        Self {
            intrinsics,
            format,
            history: TemporalHistory::default(),
            last_controls: None,
            seq: 0,
        }
    }

    pub fn process(
        &mut self,
        raw: &RawDepthFrame,
        controls: AcquisitionControls,
    ) -> Result<PointCloudFrame, CaptureError> {
        let n = raw.width as usize * raw.height as usize;
        if raw.depth.len() != n {
            return Err(CaptureError::Backend(format!(
                "depth buffer has {} samples for a {}x{} image",
                raw.depth.len(),
                raw.width,
                raw.height
            )));
        }

        if self.last_controls.map(|c| (c.temporal_filter, c.window_size))
            != Some((controls.temporal_filter, controls.window_size))
        {
            debug!(
                filter = %controls.temporal_filter,
                window = controls.window_size,
                "temporal filter changed, history reset"
            );
            self.history.clear();
        }
        self.last_controls = Some(controls);

        let mut depth = raw.depth.clone();
        if let Some(confidence) = &raw.confidence {
            for (d, c) in depth.iter_mut().zip(confidence) {
                if *c < controls.confidence_threshold {
                    *d = 0;
                }
            }
        }

        let depth = match controls.temporal_filter {
            TemporalFilter::None => depth,
            filter => {
                self.history.push(raw, depth, controls.window_size);
                self.history.reduce(filter, n)
            }
        };

        let mut points = Vec::with_capacity(n);
        for v in 0..raw.height {
            for u in 0..raw.width {
                let d = depth[(v * raw.width + u) as usize];
                if d == 0 {
                    points.push([f32::NAN; 3]);
                } else {
                    let z = d as f32 * self.intrinsics.depth_scale;
                    points.push(self.intrinsics.deproject(u, v, z));
                }
            }
        }

        self.seq += 1;
        let frame = PointCloudFrame::organized(points, raw.width, raw.height, raw.stamp_us, self.seq)
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        match (self.format, &raw.color) {
            (PointFormat::XyzRgba, Some(color)) => frame
                .with_colors(color.iter().map(|c| [c[0], c[1], c[2], 255]).collect())
                .map_err(|e| CaptureError::Backend(e.to_string())),
            (PointFormat::XyzRgba, None) => {
                let white = vec![[255, 255, 255, 255]; n];
                frame
                    .with_colors(white)
                    .map_err(|e| CaptureError::Backend(e.to_string()))
            }
            (PointFormat::Xyz, _) => Ok(frame),
        }
    }
}

/// Frame rate over a sliding window of arrival times.
#[derive(Debug)]
pub struct FrequencyCounter {
    window: usize,
    arrivals: VecDeque<Instant>,
}

impl FrequencyCounter {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            arrivals: VecDeque::with_capacity(window),
        }
    }

    pub fn event(&mut self, at: Instant) {
        self.arrivals.push_back(at);
        while self.arrivals.len() > self.window {
            self.arrivals.pop_front();
        }
    }

    pub fn frequency(&self) -> f32 {
        match (self.arrivals.front(), self.arrivals.back()) {
            (Some(first), Some(last)) if self.arrivals.len() >= 2 => {
                let span = last.duration_since(*first).as_secs_f32();
                if span > 0.0 {
                    (self.arrivals.len() - 1) as f32 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

impl Default for FrequencyCounter {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 2.0,
            fy: 2.0,
            cx: 1.0,
            cy: 1.0,
            depth_scale: 0.001,
        }
    }

    fn raw(depth: Vec<u16>, confidence: Option<Vec<u8>>) -> RawDepthFrame {
        RawDepthFrame {
            width: 2,
            height: 2,
            depth,
            confidence,
            color: None,
            stamp_us: 42,
        }
    }

    fn controls(threshold: u8, filter: TemporalFilter, window: usize) -> AcquisitionControls {
        AcquisitionControls {
            confidence_threshold: threshold,
            temporal_filter: filter,
            window_size: window,
        }
    }

    #[test]
    fn deprojects_through_pinhole() {
        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::Xyz);
        let frame = proc
            .process(&raw(vec![1000, 1000, 0, 2000], None), controls(0, TemporalFilter::None, 1))
            .unwrap();
        assert_eq!(frame.points[0], [-0.5, -0.5, 1.0]);
        assert!(frame.points[2][2].is_nan());
        assert_eq!(frame.points[3], [0.0, 0.0, 2.0]);
        assert_eq!(frame.stamp_us, 42);
        assert_eq!(frame.seq, 1);
    }

    #[test]
    fn low_confidence_samples_are_dropped() {
        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::Xyz);
        let input = raw(vec![1000; 4], Some(vec![2, 6, 7, 15]));
        let frame = proc.process(&input, controls(7, TemporalFilter::None, 1)).unwrap();
        assert_eq!(frame.valid_count(), 2);
        let frame = proc.process(&input, controls(0, TemporalFilter::None, 1)).unwrap();
        assert_eq!(frame.valid_count(), 4);
    }

    #[test]
    fn average_filter_smooths_over_window() {
        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::Xyz);
        let c = controls(0, TemporalFilter::Average, 2);
        proc.process(&raw(vec![1000; 4], None), c).unwrap();
        let frame = proc.process(&raw(vec![2000, 2000, 0, 2000], None), c).unwrap();
        assert!((frame.points[3][2] - 1.5).abs() < 1e-6);
        // A hole in the newest image is filled from the window.
        assert!((frame.points[2][2] - 1.0).abs() < 1e-6);
        // The oldest image falls out of a window of two.
        let frame = proc.process(&raw(vec![3000; 4], None), c).unwrap();
        assert!((frame.points[3][2] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn median_filter_rejects_outliers() {
        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::Xyz);
        let c = controls(0, TemporalFilter::Median, 3);
        proc.process(&raw(vec![1000; 4], None), c).unwrap();
        proc.process(&raw(vec![9000; 4], None), c).unwrap();
        let frame = proc.process(&raw(vec![1100; 4], None), c).unwrap();
        assert!((frame.points[0][2] - 1.1).abs() < 1e-6);
    }

    #[test]
    fn changing_filter_resets_history() {
        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::Xyz);
        proc.process(&raw(vec![1000; 4], None), controls(0, TemporalFilter::Average, 3))
            .unwrap();
        let frame = proc
            .process(&raw(vec![3000; 4], None), controls(0, TemporalFilter::Average, 4))
            .unwrap();
        assert!((frame.points[0][2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn color_format_attaches_rgba() {
        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::XyzRgba);
        let mut input = raw(vec![1000; 4], None);
        input.color = Some(vec![[10, 20, 30]; 4]);
        let frame = proc.process(&input, AcquisitionControls::default()).unwrap();
        assert_eq!(frame.colors.unwrap()[0], [10, 20, 30, 255]);
    }

    #[test]
    fn color_is_resampled_onto_depth_grid() {
        let src: Vec<[u8; 3]> = (0..16).map(|i| [i as u8, 0, 0]).collect();
        let out = resample_color(&src, 4, 4, 2, 2).unwrap();
        assert_eq!(out, vec![[0, 0, 0], [2, 0, 0], [8, 0, 0], [10, 0, 0]]);
        assert_eq!(resample_color(&src, 4, 4, 4, 4).unwrap(), src);
        assert!(resample_color(&src[..15], 4, 4, 2, 2).is_none());

        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::XyzRgba);
        let mut input = raw(vec![1000; 4], None);
        input.color = resample_color(&src, 4, 4, 2, 2);
        let frame = proc.process(&input, AcquisitionControls::default()).unwrap();
        assert_eq!(frame.colors.unwrap()[3], [10, 0, 0, 255]);
    }

    #[test]
    fn option_is_pushed_only_on_change() {
        let mut threshold = AppliedOption::default();
        assert_eq!(threshold.update(6u8), Some(6));
        assert_eq!(threshold.update(6), None);
        assert_eq!(threshold.update(7), Some(7));
        assert_eq!(threshold.update(7), None);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let mut proc = DepthProcessor::new(intrinsics(), PointFormat::Xyz);
        assert!(proc
            .process(&raw(vec![1000; 3], None), AcquisitionControls::default())
            .is_err());
    }

    #[test]
    fn shared_controls_clamp_inputs() {
        let shared = SharedControls::default();
        shared.set_confidence_threshold(40);
        shared.set_temporal_filter(TemporalFilter::Average, 0);
        let c = shared.get();
        assert_eq!(c.confidence_threshold, 15);
        assert_eq!(c.window_size, 1);
    }

    #[test]
    fn frequency_over_regular_arrivals() {
        let mut counter = FrequencyCounter::new(10);
        assert_eq!(counter.frequency(), 0.0);
        let start = Instant::now();
        for i in 0..5 {
            counter.event(start + Duration::from_millis(100 * i));
        }
        assert!((counter.frequency() - 10.0).abs() < 0.01);
    }
}
