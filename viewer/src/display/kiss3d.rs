use std::rc::Rc;
use std::sync::Arc;

use kiss3d::camera::ArcBall;
use kiss3d::event::WindowEvent;
use kiss3d::light::Light;
use kiss3d::nalgebra::{Point2, Point3};
use kiss3d::text::Font;
use kiss3d::window::Window;
use realsense_viewer_common::config::ViewerConfig;
use realsense_viewer_common::frame::{is_valid, PointCloudFrame};
use tracing::debug;

use super::Display;
use crate::overlay::OverlayLine;

/// kiss3d text is rendered in physical pixels; overlay layout is logical.
const TEXT_SCALE: f32 = 2.0;
/// Viewing distance when the cloud has no valid point.
const DEFAULT_DISTANCE: f32 = 1.0;

// Camera frame: X right, Y down, Z forward.
// kiss3d:       X right, Y up,   Z toward the viewer.
fn to_display(p: &[f32; 3]) -> Point3<f32> {
    Point3::new(p[0], -p[1], -p[2])
}

pub struct Kiss3dDisplay {
    window: Window,
    camera: ArcBall,
    font: Rc<Font>,
    cloud: Option<Arc<PointCloudFrame>>,
    overlay: Vec<OverlayLine>,
    stopped: bool,
}

impl Kiss3dDisplay {
    pub fn new(config: &ViewerConfig) -> Self {
        let mut window = Window::new(&config.window_title);
        window.set_light(Light::StickToCamera);
        window.set_background_color(0.0, 0.0, 0.0);
        window.set_point_size(config.point_size);
        let camera = ArcBall::new(Point3::origin(), Point3::new(0.0, 0.0, -DEFAULT_DISTANCE));
        Self {
            window,
            camera,
            font: Font::default(),
            cloud: None,
            overlay: Vec::new(),
            stopped: false,
        }
    }

    fn draw_cloud(&mut self) {
        let Some(cloud) = &self.cloud else {
            return;
        };
        let white = [255u8; 4];
        for (i, p) in cloud.points.iter().enumerate() {
            if !is_valid(p) {
                continue;
            }
            let c = cloud.colors.as_ref().and_then(|c| c.get(i)).unwrap_or(&white);
            let color = Point3::new(c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0);
            self.window.draw_point(&to_display(p), &color);
        }
    }

    fn draw_overlay(&mut self) {
        let white = Point3::new(1.0, 1.0, 1.0);
        for line in &self.overlay {
            self.window.draw_text(
                &line.text,
                &Point2::new(line.x * TEXT_SCALE, line.y * TEXT_SCALE),
                line.size * TEXT_SCALE,
                &self.font,
                &white,
            );
        }
    }
}

impl Display for Kiss3dDisplay {
    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn update_cloud(&mut self, frame: &Arc<PointCloudFrame>) -> bool {
        if self.cloud.is_none() {
            return false;
        }
        self.cloud = Some(Arc::clone(frame));
        true
    }

    fn add_cloud(&mut self, frame: &Arc<PointCloudFrame>) {
        self.cloud = Some(Arc::clone(frame));
    }

    fn reset_camera(&mut self) {
        let at = self
            .cloud
            .as_ref()
            .and_then(|c| c.centroid())
            .map(|c| to_display(&c))
            .unwrap_or_else(|| Point3::new(0.0, 0.0, -DEFAULT_DISTANCE));
        debug!(x = at.x, y = at.y, z = at.z, "camera reset");
        self.camera.look_at(Point3::origin(), at);
    }

    fn set_overlay(&mut self, lines: &[OverlayLine]) {
        self.overlay = lines.to_vec();
    }

    fn spin_once(&mut self) -> Vec<char> {
        if self.stopped {
            return Vec::new();
        }
        self.draw_cloud();
        self.draw_overlay();
        if !self.window.render_with_camera(&mut self.camera) {
            self.stopped = true;
            return Vec::new();
        }
        let mut keys = Vec::new();
        for event in self.window.events().iter() {
            if let WindowEvent::Char(c) = event.value {
                keys.push(c);
            }
        }
        keys
    }
}
