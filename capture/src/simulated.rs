//! Simulated depth camera.
//!
//! Renders a back wall with a sphere swinging in front of it, adds depth
//! noise and a per-pixel confidence that degrades towards the image border
//! and on grazing surfaces, then runs the shared acquisition processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use realsense_viewer_common::config::CaptureConfig;
use realsense_viewer_common::frame::PointFormat;
use realsense_viewer_common::settings::{TemporalFilter, MAX_CONFIDENCE_THRESHOLD};
use tracing::{debug, error, info};

use crate::acquisition::{DepthProcessor, FrequencyCounter, Intrinsics, RawDepthFrame, SharedControls};
use crate::device::{CaptureDevice, FrameCallback};
use crate::{CaptureError, DeviceId};

const HFOV_DEG: f32 = 70.0;
/// One depth unit is a millimeter.
const DEPTH_SCALE: f32 = 0.001;
const WALL_DISTANCE_M: f32 = 1.5;
const SPHERE_RADIUS_M: f32 = 0.25;
const SPHERE_DISTANCE_M: f32 = 1.0;
const SWING_AMPLITUDE_M: f32 = 0.3;
const SWING_PERIOD_S: f32 = 4.0;
const NOISE_MM: f32 = 3.0;

pub fn serial_for(index: usize) -> String {
    format!("SIM-{index:04}")
}

/// Synthetic scene generator.
#[derive(Debug)]
pub struct SimulatedScene {
    width: u32,
    height: u32,
    intrinsics: Intrinsics,
    rng: SmallRng,
}

impl SimulatedScene {
    pub fn new(width: u32, height: u32, seed: u64) -> Self {
        Self {
            width,
            height,
            intrinsics: Intrinsics::from_fov(width, height, HFOV_DEG, DEPTH_SCALE),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    /// Render the scene `t` seconds after streaming started.
    pub fn render(&mut self, t: f32, stamp_us: u64) -> RawDepthFrame {
        let n = self.width as usize * self.height as usize;
        let mut depth = Vec::with_capacity(n);
        let mut confidence = Vec::with_capacity(n);
        let mut color = Vec::with_capacity(n);

        let phase = t * std::f32::consts::TAU / SWING_PERIOD_S;
        let center = [SWING_AMPLITUDE_M * phase.sin(), 0.0, SPHERE_DISTANCE_M];
        let c_sq = center.iter().map(|c| c * c).sum::<f32>();
        let half_w = self.width as f32 * 0.5;
        let half_h = self.height as f32 * 0.5;

        for v in 0..self.height {
            for u in 0..self.width {
                let ray = [
                    (u as f32 - self.intrinsics.cx) / self.intrinsics.fx,
                    (v as f32 - self.intrinsics.cy) / self.intrinsics.fy,
                    1.0,
                ];
                let d_sq = ray.iter().map(|r| r * r).sum::<f32>();
                let d_c = ray[0] * center[0] + ray[1] * center[1] + ray[2] * center[2];
                let disc = d_c * d_c - d_sq * (c_sq - SPHERE_RADIUS_M * SPHERE_RADIUS_M);

                // Ray z component is 1, so the ray parameter is the depth.
                let (z, grazing, rgb) = if disc >= 0.0 {
                    let t_hit = (d_c - disc.sqrt()) / d_sq;
                    let grazing = 1.0 - (disc.sqrt() / (d_c.abs() + f32::EPSILON)).min(1.0);
                    (t_hit, grazing, [220, 90, 40])
                } else {
                    let shade = (200.0 - 40.0 * (v as f32 / self.height as f32)) as u8;
                    (WALL_DISTANCE_M, 0.0, [shade, shade, shade])
                };

                let noise = self.rng.gen_range(-NOISE_MM..=NOISE_MM);
                depth.push(((z / DEPTH_SCALE) + noise).max(0.0) as u16);

                let du = (u as f32 - half_w).abs() / half_w;
                let dv = (v as f32 - half_h).abs() / half_h;
                let falloff = du.max(dv).powi(2) * 8.0 + grazing * 10.0;
                let jitter = self.rng.gen_range(-2.0..=2.0);
                let c = (MAX_CONFIDENCE_THRESHOLD as f32 - falloff + jitter)
                    .clamp(0.0, MAX_CONFIDENCE_THRESHOLD as f32);
                confidence.push(c as u8);
                color.push(rgb);
            }
        }

        RawDepthFrame {
            width: self.width,
            height: self.height,
            depth,
            confidence: Some(confidence),
            color: Some(color),
            stamp_us,
        }
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A simulated device streaming on its own thread.
pub struct SimulatedDevice {
    serial: String,
    index: usize,
    config: CaptureConfig,
    format: PointFormat,
    controls: Arc<SharedControls>,
    fps: Arc<Mutex<FrequencyCounter>>,
    worker: Option<Worker>,
}

impl SimulatedDevice {
    pub fn open(config: &CaptureConfig, id: &DeviceId, format: PointFormat) -> Result<Self, CaptureError> {
        let count = config.simulated_devices;
        let index = match id {
            DeviceId::First if count > 0 => 1,
            DeviceId::Index(i) if *i >= 1 && *i <= count => *i,
            DeviceId::Serial(serial) => (1..=count)
                .find(|i| serial_for(*i) == *serial)
                .ok_or_else(|| CaptureError::DeviceNotFound(id.clone()))?,
            _ => return Err(CaptureError::DeviceNotFound(id.clone())),
        };
        Ok(Self {
            serial: serial_for(index),
            index,
            config: config.clone(),
            format,
            controls: Arc::new(SharedControls::default()),
            fps: Arc::new(Mutex::new(FrequencyCounter::default())),
            worker: None,
        })
    }
}

impl CaptureDevice for SimulatedDevice {
    fn serial_number(&self) -> &str {
        &self.serial
    }

    fn frames_per_second(&self) -> f32 {
        self.fps.lock().frequency()
    }

    fn set_confidence_threshold(&self, threshold: u8) {
        self.controls.set_confidence_threshold(threshold);
    }

    fn enable_temporal_filtering(&self, filter: TemporalFilter, window_size: usize) {
        self.controls.set_temporal_filter(filter, window_size);
    }

    fn start(&mut self, mut callback: FrameCallback) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        let stop = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs_f64(1.0 / self.config.fps);
        let mut scene = SimulatedScene::new(self.config.width, self.config.height, self.index as u64);
        let mut processor = DepthProcessor::new(scene.intrinsics(), self.format);
        let controls = Arc::clone(&self.controls);
        let fps = Arc::clone(&self.fps);
        let thread_stop = Arc::clone(&stop);
        let serial = self.serial.clone();

        let handle = std::thread::Builder::new()
            .name(format!("capture-{serial}"))
            .spawn(move || {
                info!(serial, "simulated capture started");
                let started = Instant::now();
                let mut next = started;
                while !thread_stop.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now < next {
                        std::thread::sleep(next - now);
                    }
                    next += period;

                    let stamp_us = Utc::now().timestamp_micros().max(0) as u64;
                    let raw = scene.render(started.elapsed().as_secs_f32(), stamp_us);
                    match processor.process(&raw, controls.get()) {
                        Ok(frame) => {
                            fps.lock().event(Instant::now());
                            callback(Arc::new(frame));
                        }
                        Err(e) => error!(error = %e, serial, "dropping simulated frame"),
                    }
                }
                debug!(serial, "simulated capture stopped");
            })
            .map_err(CaptureError::Spawn)?;

        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                error!(serial = self.serial, "capture thread panicked");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn config() -> CaptureConfig {
        CaptureConfig {
            width: 64,
            height: 48,
            fps: 200.0,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn scene_has_sphere_in_front_of_wall() {
        let mut scene = SimulatedScene::new(64, 48, 7);
        let raw = scene.render(0.0, 0);
        assert_eq!(raw.depth.len(), 64 * 48);
        // At t = 0 the sphere is centered on the optical axis.
        let center = raw.depth[(24 * 64 + 32) as usize];
        let corner = raw.depth[0];
        assert!((740..=760).contains(&center), "center depth {center}");
        assert!((1490..=1510).contains(&corner), "corner depth {corner}");
    }

    #[test]
    fn confidence_drops_towards_border() {
        let mut scene = SimulatedScene::new(64, 48, 7);
        let raw = scene.render(1.0, 0);
        let confidence = raw.confidence.unwrap();
        assert!(confidence.iter().all(|c| *c <= 15));
        assert!(confidence[0] < confidence[(24 * 64 + 20) as usize]);
    }

    #[test]
    fn streams_frames_until_stopped() {
        let mut device = SimulatedDevice::open(&config(), &DeviceId::First, PointFormat::XyzRgba).unwrap();
        let (tx, rx) = mpsc::channel();
        device
            .start(Box::new(move |frame| {
                let _ = tx.send(frame);
            }))
            .unwrap();
        assert!(device.is_running());
        assert!(matches!(device.start(Box::new(|_| {})), Err(CaptureError::AlreadyRunning)));

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(second.seq > first.seq);
        assert!(first.colors.is_some());
        assert_eq!((first.width, first.height), (64, 48));

        device.stop();
        assert!(!device.is_running());
    }

    #[test]
    fn threshold_changes_apply_while_streaming() {
        let mut device = SimulatedDevice::open(&config(), &DeviceId::First, PointFormat::Xyz).unwrap();
        device.set_confidence_threshold(15);
        let (tx, rx) = mpsc::channel();
        device
            .start(Box::new(move |frame| {
                let _ = tx.send(frame.valid_count());
            }))
            .unwrap();
        let strict = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        device.set_confidence_threshold(0);
        // Drain frames produced before the change reached the thread.
        let relaxed = (0..20)
            .filter_map(|_| rx.recv_timeout(Duration::from_secs(2)).ok())
            .max()
            .unwrap();
        device.stop();
        assert!(relaxed > strict);
        assert_eq!(relaxed, 64 * 48);
    }
}
