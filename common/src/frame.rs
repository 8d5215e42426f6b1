/// Point representation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFormat {
    /// Geometry only.
    Xyz,
    /// Geometry plus packed RGBA color.
    XyzRgba,
}

/// An immutable point-cloud snapshot produced by a capture device.
///
/// Clouds coming from a depth camera are organized: `points` is laid out
/// row-major as `height` rows of `width` points, and invalid samples are
/// kept in place with NaN coordinates so pixel neighborhoods survive.
/// An unorganized cloud has `height == 1`.
#[derive(Debug, Clone)]
pub struct PointCloudFrame {
    pub points: Vec<[f32; 3]>,
    /// Per-point RGBA, present for [`PointFormat::XyzRgba`] frames.
    pub colors: Option<Vec<[u8; 4]>>,
    pub width: u32,
    pub height: u32,
    /// Capture timestamp, microseconds since the Unix epoch.
    pub stamp_us: u64,
    pub seq: u64,
}

impl PointCloudFrame {
    /// Create an organized geometry-only frame.
    pub fn organized(
        points: Vec<[f32; 3]>,
        width: u32,
        height: u32,
        stamp_us: u64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if points.len() != expected {
            return Err(FrameError::SizeMismatch {
                got: points.len(),
                expected,
            });
        }
        Ok(Self {
            points,
            colors: None,
            width,
            height,
            stamp_us,
            seq,
        })
    }

    /// Create an unorganized geometry-only frame.
    pub fn unorganized(points: Vec<[f32; 3]>, stamp_us: u64, seq: u64) -> Self {
        let width = points.len() as u32;
        Self {
            points,
            colors: None,
            width,
            height: 1,
            stamp_us,
            seq,
        }
    }

    /// Attach per-point colors, turning this into an XYZRGBA frame.
    pub fn with_colors(mut self, colors: Vec<[u8; 4]>) -> Result<Self, FrameError> {
        if colors.len() != self.points.len() {
            return Err(FrameError::SizeMismatch {
                got: colors.len(),
                expected: self.points.len(),
            });
        }
        self.colors = Some(colors);
        Ok(self)
    }

    pub fn format(&self) -> PointFormat {
        if self.colors.is_some() {
            PointFormat::XyzRgba
        } else {
            PointFormat::Xyz
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn is_organized(&self) -> bool {
        self.height > 1
    }

    /// Point at column `u`, row `v` of an organized frame.
    pub fn at(&self, u: u32, v: u32) -> Option<&[f32; 3]> {
        if u >= self.width || v >= self.height {
            return None;
        }
        self.points.get((v * self.width + u) as usize)
    }

    /// Number of points with finite coordinates.
    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| is_valid(p)).count()
    }

    /// Mean of the valid points, `None` when the frame has none.
    pub fn centroid(&self) -> Option<[f32; 3]> {
        let mut sum = [0.0f64; 3];
        let mut n = 0usize;
        for p in self.points.iter().filter(|p| is_valid(p)) {
            sum[0] += p[0] as f64;
            sum[1] += p[1] as f64;
            sum[2] += p[2] as f64;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        let n = n as f64;
        Some([(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32])
    }

    /// Copy of this frame with new point coordinates, keeping colors and metadata.
    pub fn with_points(&self, points: Vec<[f32; 3]>) -> Result<Self, FrameError> {
        if points.len() != self.points.len() {
            return Err(FrameError::SizeMismatch {
                got: points.len(),
                expected: self.points.len(),
            });
        }
        Ok(Self {
            points,
            colors: self.colors.clone(),
            width: self.width,
            height: self.height,
            stamp_us: self.stamp_us,
            seq: self.seq,
        })
    }
}

/// A point is valid when all three coordinates are finite.
#[inline]
pub fn is_valid(p: &[f32; 3]) -> bool {
    p[0].is_finite() && p[1].is_finite() && p[2].is_finite()
}

/// Pack RGBA into the PCL `rgba` layout: `a << 24 | r << 16 | g << 8 | b`.
#[inline]
pub fn pack_rgba(c: [u8; 4]) -> u32 {
    (c[3] as u32) << 24 | (c[0] as u32) << 16 | (c[1] as u32) << 8 | c[2] as u32
}

#[inline]
pub fn unpack_rgba(v: u32) -> [u8; 4] {
    [(v >> 16) as u8, (v >> 8) as u8, v as u8, (v >> 24) as u8]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer length mismatch: got {got} elements, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}
