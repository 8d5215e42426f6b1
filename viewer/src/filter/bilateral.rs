//! Edge-preserving smoothing of organized depth clouds.
//!
//! Implements the bilateral grid approximation (Paris & Durand): depth
//! samples are splatted into a coarse (x, y, z) grid whose cells are
//! `sigma_s` pixels wide and `sigma_r` meters deep, the grid is blurred with
//! a separable [1 2 1] kernel, and every pixel reads its smoothed depth back
//! by trilinear interpolation. Points keep their pixel ray: only the
//! distance along the ray changes.
//!
//! The grid size is bounded: large images or deep scenes widen the cells
//! rather than grow the grid.

use realsense_viewer_common::frame::{is_valid, PointCloudFrame};
use realsense_viewer_common::settings::{BilateralParams, MIN_RANGE_SIGMA, MIN_SPATIAL_SIGMA};
use tracing::{debug, warn};

use super::traits::PostFilter;

const PADDING_XY: usize = 2;
const PADDING_Z: usize = 2;
const BLUR_ITERATIONS: usize = 2;
/// Upper bound on depth bins; a wider depth range coarsens the range sigma.
const MAX_DEPTH_BINS: usize = 1024;
/// Upper bound on cells along x and y; wider images coarsen the spatial sigma.
const MAX_SPATIAL_CELLS: usize = 256;
/// Upper bound on the whole grid (64 MiB of cells).
const MAX_GRID_CELLS: usize = 1 << 23;

/// Cell sizes and grid dimensions for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridLayout {
    sigma_s: f32,
    sigma_r: f32,
    dims: [usize; 3],
}

impl GridLayout {
    /// Fit a `width` x `height` image spanning `delta` meters of depth into a
    /// bounded grid, widening the sigmas where the requested ones would not fit.
    fn new(width: usize, height: usize, delta: f32, params: BilateralParams) -> Self {
        let extent = width.max(height).saturating_sub(1) as f32;
        let sigma_s = params.sigma_s.max(extent / MAX_SPATIAL_CELLS as f32);
        let nx = ((width.saturating_sub(1)) as f32 / sigma_s) as usize + 1 + 2 * PADDING_XY;
        let ny = ((height.saturating_sub(1)) as f32 / sigma_s) as usize + 1 + 2 * PADDING_XY;

        let budget = (MAX_GRID_CELLS / (nx * ny)).min(MAX_DEPTH_BINS + 1 + 2 * PADDING_Z);
        let bins = budget.saturating_sub(1 + 2 * PADDING_Z).max(1);
        let sigma_r = params.sigma_r.max(delta / bins as f32);
        let nz = (delta / sigma_r) as usize + 1 + 2 * PADDING_Z;

        Self {
            sigma_s,
            sigma_r,
            dims: [nx, ny, nz],
        }
    }
}

/// Grid of accumulated (depth sum, weight) pairs.
struct Grid {
    cells: Vec<[f32; 2]>,
    dims: [usize; 3],
}

impl Grid {
    fn new(dims: [usize; 3]) -> Self {
        Self {
            cells: vec![[0.0; 2]; dims[0] * dims[1] * dims[2]],
            dims,
        }
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.dims[1] + y) * self.dims[2] + z
    }

    fn strides(&self) -> [usize; 3] {
        [self.dims[1] * self.dims[2], self.dims[2], 1]
    }

    /// One [1 2 1] / 4 pass along `axis`, leaving the border cells untouched.
    /// Each line is copied into `line` first so updates don't feed forward.
    fn blur(&mut self, axis: usize, line: &mut Vec<[f32; 2]>) {
        let strides = self.strides();
        let (a, b) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        let (off, n) = (strides[axis], self.dims[axis]);
        for i in 1..self.dims[a] - 1 {
            for j in 1..self.dims[b] - 1 {
                let base = i * strides[a] + j * strides[b];
                line.clear();
                line.extend((0..n).map(|k| self.cells[base + k * off]));
                for k in 1..n - 1 {
                    let (p, c, q) = (line[k - 1], line[k], line[k + 1]);
                    self.cells[base + k * off] = [
                        (p[0] + q[0] + 2.0 * c[0]) * 0.25,
                        (p[1] + q[1] + 2.0 * c[1]) * 0.25,
                    ];
                }
            }
        }
    }

    fn trilinear(&self, x: f32, y: f32, z: f32) -> [f32; 2] {
        let clamp = |v: f32, dim: usize| -> (usize, usize, f32) {
            let v = v.max(0.0);
            let i = (v as usize).min(dim - 1);
            let j = (i + 1).min(dim - 1);
            (i, j, v - i as f32)
        };
        let (x0, x1, ax) = clamp(x, self.dims[0]);
        let (y0, y1, ay) = clamp(y, self.dims[1]);
        let (z0, z1, az) = clamp(z, self.dims[2]);

        let mut out = [0.0f32; 2];
        for (xi, wx) in [(x0, 1.0 - ax), (x1, ax)] {
            for (yi, wy) in [(y0, 1.0 - ay), (y1, ay)] {
                for (zi, wz) in [(z0, 1.0 - az), (z1, az)] {
                    let w = wx * wy * wz;
                    let cell = self.cells[self.index(xi, yi, zi)];
                    out[0] += w * cell[0];
                    out[1] += w * cell[1];
                }
            }
        }
        out
    }
}

/// Bilateral-grid smoothing over the depth of organized clouds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastBilateralFilter {
    params: BilateralParams,
}

impl FastBilateralFilter {
    pub fn new(params: BilateralParams) -> Self {
        Self {
            params: BilateralParams {
                sigma_s: params.sigma_s.max(MIN_SPATIAL_SIGMA),
                sigma_r: params.sigma_r.max(MIN_RANGE_SIGMA),
            },
        }
    }

    #[cfg(test)]
    pub fn params(&self) -> BilateralParams {
        self.params
    }
}

impl PostFilter for FastBilateralFilter {
    fn apply(&self, frame: &PointCloudFrame) -> PointCloudFrame {
        if !frame.is_organized() {
            warn!(points = frame.len(), "bilateral filter needs an organized cloud, passing through");
            return frame.clone();
        }

        let (min_z, max_z) = frame
            .points
            .iter()
            .filter(|p| is_valid(p))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| (lo.min(p[2]), hi.max(p[2])));
        if min_z > max_z {
            debug!(seq = frame.seq, "no finite depth, nothing to filter");
            return frame.clone();
        }

        let (width, height) = (frame.width as usize, frame.height as usize);
        let layout = GridLayout::new(width, height, max_z - min_z, self.params);
        if layout.sigma_s > self.params.sigma_s {
            debug!(requested = self.params.sigma_s, used = layout.sigma_s, "spatial sigma coarsened to bound the grid");
        }
        let GridLayout { sigma_s, sigma_r, dims } = layout;
        let mut grid = Grid::new(dims);

        for v in 0..height {
            for u in 0..width {
                let p = &frame.points[v * width + u];
                if !is_valid(p) {
                    continue;
                }
                let gx = (u as f32 / sigma_s + 0.5) as usize + PADDING_XY;
                let gy = (v as f32 / sigma_s + 0.5) as usize + PADDING_XY;
                let gz = ((p[2] - min_z) / sigma_r + 0.5) as usize + PADDING_Z;
                let i = grid.index(gx, gy, gz);
                grid.cells[i][0] += p[2];
                grid.cells[i][1] += 1.0;
            }
        }

        let mut line = Vec::with_capacity(dims.iter().copied().max().unwrap_or(0));
        for axis in 0..3 {
            for _ in 0..BLUR_ITERATIONS {
                grid.blur(axis, &mut line);
            }
        }

        let mut points = frame.points.clone();
        for v in 0..height {
            for u in 0..width {
                let p = &mut points[v * width + u];
                if !is_valid(p) || p[2] == 0.0 {
                    continue;
                }
                let [sum, weight] = grid.trilinear(
                    u as f32 / sigma_s + PADDING_XY as f32,
                    v as f32 / sigma_s + PADDING_XY as f32,
                    (p[2] - min_z) / sigma_r + PADDING_Z as f32,
                );
                if weight <= f32::EPSILON {
                    continue;
                }
                let scale = (sum / weight) / p[2];
                *p = [p[0] * scale, p[1] * scale, p[2] * scale];
            }
        }

        // Same length as the input, so this cannot fail.
        frame.with_points(points).unwrap_or_else(|_| frame.clone())
    }

    fn name(&self) -> &str {
        "fast-bilateral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_image(width: u32, height: u32, depth: impl Fn(u32, u32) -> f32) -> PointCloudFrame {
        let points = (0..height)
            .flat_map(|v| (0..width).map(move |u| (u, v)))
            .map(|(u, v)| {
                let z = depth(u, v);
                [(u as f32 - width as f32 / 2.0) * z / 100.0, (v as f32 - height as f32 / 2.0) * z / 100.0, z]
            })
            .collect();
        PointCloudFrame::organized(points, width, height, 5, 9).unwrap()
    }

    fn filter() -> FastBilateralFilter {
        FastBilateralFilter::new(BilateralParams {
            sigma_s: 3.0,
            sigma_r: 0.05,
        })
    }

    #[test]
    fn flat_surface_is_unchanged() {
        let frame = depth_image(40, 30, |_, _| 1.2);
        let out = filter().apply(&frame);
        for (a, b) in frame.points.iter().zip(&out.points) {
            assert!((a[2] - b[2]).abs() < 1e-4);
        }
        assert_eq!(out.seq, 9);
        assert_eq!(out.stamp_us, 5);
    }

    #[test]
    fn noise_is_reduced() {
        // Deterministic checkerboard noise of +/- 5 mm around 1 m.
        let frame = depth_image(40, 30, |u, v| if (u + v) % 2 == 0 { 1.005 } else { 0.995 });
        let out = filter().apply(&frame);
        let spread = |f: &PointCloudFrame| {
            let inner = (10..20).flat_map(|v| (10..30).map(move |u| (u, v)));
            inner.map(|(u, v)| (f.at(u, v).unwrap()[2] - 1.0).abs()).fold(0.0f32, f32::max)
        };
        assert!(spread(&out) < spread(&frame) * 0.5, "{} vs {}", spread(&out), spread(&frame));
    }

    #[test]
    fn depth_edges_are_preserved() {
        // Foreground at 1 m on the left half, background at 2 m on the right.
        let frame = depth_image(40, 30, |u, _| if u < 20 { 1.0 } else { 2.0 });
        let out = filter().apply(&frame);
        let near = out.at(18, 15).unwrap()[2];
        let far = out.at(21, 15).unwrap()[2];
        assert!((near - 1.0).abs() < 0.02, "near side drifted to {near}");
        assert!((far - 2.0).abs() < 0.02, "far side drifted to {far}");
    }

    #[test]
    fn invalid_points_stay_invalid() {
        let mut frame = depth_image(20, 20, |_, _| 1.0);
        frame.points[45] = [f32::NAN; 3];
        let out = filter().apply(&frame);
        assert!(!is_valid(&out.points[45]));
        assert_eq!(out.valid_count(), 399);
    }

    #[test]
    fn points_stay_on_their_pixel_ray() {
        let frame = depth_image(30, 30, |u, v| 1.0 + 0.001 * ((u * 7 + v * 3) % 5) as f32);
        let out = filter().apply(&frame);
        let (a, b) = (frame.at(3, 4).unwrap(), out.at(3, 4).unwrap());
        assert!((a[0] / a[2] - b[0] / b[2]).abs() < 1e-5);
        assert!((a[1] / a[2] - b[1] / b[2]).abs() < 1e-5);
    }

    #[test]
    fn unorganized_cloud_passes_through() {
        let frame = PointCloudFrame::unorganized(vec![[0.0, 0.0, 1.0], [0.0, 0.0, 3.0]], 0, 0);
        let out = filter().apply(&frame);
        assert_eq!(out.points, frame.points);
    }

    #[test]
    fn fine_sigmas_keep_the_grid_bounded() {
        let fine = BilateralParams {
            sigma_s: MIN_SPATIAL_SIGMA,
            sigma_r: MIN_RANGE_SIGMA,
        };
        let layout = GridLayout::new(640, 480, 8.0, fine);
        let [nx, ny, nz] = layout.dims;
        assert!(nx <= MAX_SPATIAL_CELLS + 1 + 2 * PADDING_XY);
        assert!(ny <= MAX_SPATIAL_CELLS + 1 + 2 * PADDING_XY);
        assert!(nx * ny * nz <= MAX_GRID_CELLS, "{:?}", layout.dims);
        assert!(layout.sigma_s > MIN_SPATIAL_SIGMA);
        assert!(layout.sigma_r > MIN_RANGE_SIGMA);

        // Small frames keep the requested sigmas.
        let layout = GridLayout::new(40, 30, 1.0, filter().params());
        assert_eq!((layout.sigma_s, layout.sigma_r), (3.0, 0.05));
    }

    #[test]
    fn blur_spreads_a_cell_along_one_axis() {
        let mut grid = Grid::new([5, 5, 5]);
        let center = grid.index(2, 2, 2);
        grid.cells[center] = [4.0, 4.0];
        grid.blur(2, &mut Vec::new());
        assert_eq!(grid.cells[grid.index(2, 2, 1)], [1.0, 1.0]);
        assert_eq!(grid.cells[grid.index(2, 2, 2)], [2.0, 2.0]);
        assert_eq!(grid.cells[grid.index(2, 2, 3)], [1.0, 1.0]);
        assert_eq!(grid.cells[grid.index(2, 1, 2)], [0.0, 0.0]);
        assert_eq!(grid.cells[grid.index(1, 2, 2)], [0.0, 0.0]);
    }

    #[test]
    fn sigmas_are_floored() {
        let f = FastBilateralFilter::new(BilateralParams {
            sigma_s: 0.2,
            sigma_r: 0.0,
        });
        assert_eq!(f.params().sigma_s, MIN_SPATIAL_SIGMA);
        assert_eq!(f.params().sigma_r, MIN_RANGE_SIGMA);
    }
}
