//! Physical RealSense devices through librealsense.
//!
//! Depth comes from the Z16 stream and is deprojected with the intrinsics of
//! its stream profile. In XYZRGBA mode the RGB8 color stream is enabled too and
//! resampled onto the depth grid. The confidence threshold is written to every
//! sensor that exposes `Rs2Option::ConfidenceThreshold`.

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use realsense_rust::{
    config::Config,
    context::Context,
    device::Device,
    frame::{ColorFrame, DepthFrame, FrameEx, PixelKind},
    kind::{Rs2CameraInfo, Rs2Format, Rs2Option, Rs2StreamKind},
    pipeline::InactivePipeline,
};
use realsense_viewer_common::config::CaptureConfig;
use realsense_viewer_common::frame::PointFormat;
use realsense_viewer_common::settings::TemporalFilter;
use tracing::{debug, error, info, warn};

use crate::acquisition::{
    resample_color, AppliedOption, DepthProcessor, FrequencyCounter, Intrinsics, RawDepthFrame, SharedControls,
};
use crate::device::{CaptureDevice, FrameCallback};
use crate::{CaptureError, DeviceId};

/// Horizontal field of view of the D400 depth imagers, used only when the
/// stream profile carries no intrinsics.
const FALLBACK_HFOV_DEG: f32 = 87.0;
const WAIT_TIMEOUT: Duration = Duration::from_millis(500);

fn backend(e: impl std::fmt::Display) -> CaptureError {
    CaptureError::Backend(e.to_string())
}

/// Serial numbers of the connected devices, in SDK order.
fn connected_serials() -> Result<Vec<String>, CaptureError> {
    let context = Context::new().map_err(backend)?;
    Ok(context
        .query_devices(HashSet::new())
        .iter()
        .filter_map(|device| device.info(Rs2CameraInfo::SerialNumber))
        .map(|serial| serial.to_string_lossy().into_owned())
        .collect())
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct RealSenseDevice {
    serial: String,
    config: CaptureConfig,
    format: PointFormat,
    controls: Arc<SharedControls>,
    fps: Arc<Mutex<FrequencyCounter>>,
    worker: Option<Worker>,
}

impl RealSenseDevice {
    pub fn open(config: &CaptureConfig, id: &DeviceId, format: PointFormat) -> Result<Self, CaptureError> {
        let serials = connected_serials()?;
        let serial = match id {
            DeviceId::First => serials.first().cloned(),
            DeviceId::Index(i) => serials.get(i.saturating_sub(1)).cloned(),
            DeviceId::Serial(s) => serials.iter().find(|x| *x == s).cloned(),
        }
        .ok_or_else(|| CaptureError::DeviceNotFound(id.clone()))?;
        info!(serial, "opened RealSense device");
        Ok(Self {
            serial,
            config: config.clone(),
            format,
            controls: Arc::new(SharedControls::default()),
            fps: Arc::new(Mutex::new(FrequencyCounter::default())),
            worker: None,
        })
    }
}

fn depth_intrinsics(frame: &DepthFrame, scale: f32) -> Intrinsics {
    let (width, height) = (frame.width() as u32, frame.height() as u32);
    match frame.stream_profile().intrinsics() {
        Ok(k) => Intrinsics {
            fx: k.fx(),
            fy: k.fy(),
            cx: k.ppx(),
            cy: k.ppy(),
            depth_scale: scale,
        },
        Err(e) => {
            warn!(error = %e, hfov = FALLBACK_HFOV_DEG, "depth profile has no intrinsics, assuming nominal field of view");
            Intrinsics::from_fov(width, height, FALLBACK_HFOV_DEG, scale)
        }
    }
}

/// Write the confidence threshold to every sensor that supports it.
fn push_confidence_threshold(device: &Device, threshold: u8) {
    let mut applied = false;
    for mut sensor in device.sensors() {
        if !sensor.supports_option(Rs2Option::ConfidenceThreshold) {
            continue;
        }
        match sensor.set_option(Rs2Option::ConfidenceThreshold, threshold as f32) {
            Ok(()) => applied = true,
            Err(e) => warn!(error = %e, threshold, "failed to set confidence threshold"),
        }
    }
    if applied {
        debug!(threshold, "confidence threshold pushed to device");
    } else {
        debug!(threshold, "device has no confidence threshold option");
    }
}

fn color_image(frame: &ColorFrame) -> (u32, u32, Vec<[u8; 3]>) {
    let pixels = frame
        .iter()
        .map(|px| match px {
            PixelKind::Rgb8 { r, g, b } | PixelKind::Bgr8 { r, g, b } => [*r, *g, *b],
            _ => [255; 3],
        })
        .collect();
    (frame.width() as u32, frame.height() as u32, pixels)
}

fn stream(
    serial: &str,
    config: &CaptureConfig,
    format: PointFormat,
    controls: &SharedControls,
    fps: &Mutex<FrequencyCounter>,
    stop: &AtomicBool,
    callback: &mut FrameCallback,
) -> Result<(), CaptureError> {
    let context = Context::new().map_err(backend)?;
    let pipeline = InactivePipeline::try_from(&context).map_err(backend)?;
    let serial_c = CString::new(serial).map_err(backend)?;
    let (width, height, rate) = (config.width as usize, config.height as usize, config.fps.round() as usize);
    let mut rs_config = Config::new();
    rs_config
        .enable_device_from_serial(&serial_c)
        .map_err(backend)?
        .disable_all_streams()
        .map_err(backend)?
        .enable_stream(Rs2StreamKind::Depth, None, width, height, Rs2Format::Z16, rate)
        .map_err(backend)?;
    if format == PointFormat::XyzRgba {
        rs_config
            .enable_stream(Rs2StreamKind::Color, None, 0, 0, Rs2Format::Rgb8, 0)
            .map_err(backend)?;
    }
    let mut pipeline = pipeline.start(Some(rs_config)).map_err(backend)?;

    let mut processor: Option<DepthProcessor> = None;
    let mut threshold = AppliedOption::default();
    while !stop.load(Ordering::Acquire) {
        let current = controls.get();
        if let Some(value) = threshold.update(current.confidence_threshold) {
            push_confidence_threshold(pipeline.profile().device(), value);
        }

        let frames = match pipeline.wait(Some(WAIT_TIMEOUT)) {
            Ok(frames) => frames,
            Err(e) => {
                debug!(error = %e, serial, "no frame within timeout");
                continue;
            }
        };
        let color = frames.frames_of_type::<ColorFrame>().last().map(color_image);
        for frame in frames.frames_of_type::<DepthFrame>() {
            let (width, height) = (frame.width() as u32, frame.height() as u32);
            let scale = frame.depth_units().map_err(backend)?;
            let processor = processor.get_or_insert_with(|| {
                let intrinsics = depth_intrinsics(&frame, scale);
                info!(fx = intrinsics.fx, fy = intrinsics.fy, cx = intrinsics.cx, cy = intrinsics.cy, "depth intrinsics");
                DepthProcessor::new(intrinsics, format)
            });
            let depth = frame
                .iter()
                .map(|px| match px {
                    PixelKind::Z16 { depth } => *depth,
                    _ => 0,
                })
                .collect();
            let raw = RawDepthFrame {
                width,
                height,
                depth,
                confidence: None,
                color: color
                    .as_ref()
                    .and_then(|(cw, ch, pixels)| resample_color(pixels, *cw, *ch, width, height)),
                stamp_us: (frame.timestamp() * 1000.0).max(0.0) as u64,
            };
            match processor.process(&raw, current) {
                Ok(cloud) => {
                    fps.lock().event(Instant::now());
                    callback(Arc::new(cloud));
                }
                Err(e) => warn!(error = %e, serial, "dropping depth frame"),
            }
        }
    }
    pipeline.stop();
    Ok(())
}

impl CaptureDevice for RealSenseDevice {
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
        let thread_stop = Arc::clone(&stop);
        let controls = Arc::clone(&self.controls);
        let fps = Arc::clone(&self.fps);
        let serial = self.serial.clone();
        let config = self.config.clone();
        let format = self.format;

        let handle = std::thread::Builder::new()
            .name(format!("capture-{serial}"))
            .spawn(move || {
                if let Err(e) = stream(&serial, &config, format, &controls, &fps, &thread_stop, &mut callback) {
                    error!(error = %e, serial, "RealSense streaming failed");
                }
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

impl Drop for RealSenseDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
