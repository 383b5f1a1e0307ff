//! Scattered point interpolation onto a raster grid
//!
//! Sparse samples are spread over the grid tile by tile. Each pixel takes a
//! thin-plate spline value when it lies inside the convex hull of the
//! samples and the nearest sample's value otherwise, so the output never
//! has holes.

use crate::types::{block_windows, AtmoError, AtmoResult, BandImage, GeoTransform};
use nalgebra::{DMatrix, DVector};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Value known at a map location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSample {
    pub easting: f64,
    pub northing: f64,
    pub value: f64,
}

/// Interpolation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpolationParams {
    pub tile_size: usize,        // Tile edge in pixels
    pub not_negative: bool,      // Clamp results below `floor`
    pub floor: f32,              // Lower bound when clamping
    pub smoothing: f64,          // Spline regularisation, 0 interpolates exactly
}

impl Default for InterpolationParams {
    fn default() -> Self {
        Self {
            tile_size: 200,
            not_negative: true,
            floor: 0.0,
            smoothing: 0.0,
        }
    }
}

/// Whole band statistics, gathered once after all tiles are written
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl BandStatistics {
    pub fn from_band(band: &BandImage) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        let mut count = 0u64;
        for &v in band.iter().filter(|v| v.is_finite()) {
            let v = v as f64;
            count += 1;
            min = min.min(v);
            max = max.max(v);
            let delta = v - mean;
            mean += delta / count as f64;
            m2 += delta * (v - mean);
        }
        if count == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        Self {
            min,
            max,
            mean,
            std_dev: (m2 / count as f64).sqrt(),
        }
    }
}

/// Samples moved to a centred, unit scaled frame
struct Frame {
    cx: f64,
    cy: f64,
    scale: f64,
}

impl Frame {
    fn fit(samples: &[PointSample]) -> Self {
        let n = samples.len().max(1) as f64;
        let cx = samples.iter().map(|s| s.easting).sum::<f64>() / n;
        let cy = samples.iter().map(|s| s.northing).sum::<f64>() / n;
        let scale = samples
            .iter()
            .map(|s| (s.easting - cx).abs().max((s.northing - cy).abs()))
            .fold(0.0, f64::max);
        Self {
            cx,
            cy,
            scale: if scale > 0.0 { scale } else { 1.0 },
        }
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.cx) / self.scale, (y - self.cy) / self.scale)
    }
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Counter-clockwise convex hull (monotone chain), collinear points dropped
fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

fn inside_hull(hull: &[(f64, f64)], p: (f64, f64)) -> bool {
    const TOLERANCE: f64 = 1e-12;
    if hull.len() < 3 {
        return false;
    }
    (0..hull.len()).all(|i| cross(hull[i], hull[(i + 1) % hull.len()], p) >= -TOLERANCE)
}

fn thin_plate_kernel(r2: f64) -> f64 {
    if r2 <= 0.0 {
        0.0
    } else {
        0.5 * r2 * r2.ln()
    }
}

/// Thin-plate spline restricted to the convex hull of its nodes
struct ThinPlateSpline {
    frame: Frame,
    nodes: Vec<(f64, f64)>,
    weights: Vec<f64>,
    affine: [f64; 3],
    hull: Vec<(f64, f64)>,
}

impl ThinPlateSpline {
    /// Minimum number of nodes for a planar spline with a linear term
    const MIN_NODES: usize = 4;

    /// `None` when the samples cannot support a spline (too few, collinear
    /// or singular system); callers then fall back to nearest neighbour.
    fn fit(samples: &[PointSample], smoothing: f64) -> Option<Self> {
        if samples.len() < Self::MIN_NODES {
            return None;
        }
        let frame = Frame::fit(samples);
        let nodes: Vec<(f64, f64)> = samples.iter().map(|s| frame.apply(s.easting, s.northing)).collect();
        let hull = convex_hull(&nodes);
        if hull.len() < 3 {
            return None;
        }

        let n = nodes.len();
        let mut a = DMatrix::<f64>::zeros(n + 3, n + 3);
        let mut b = DVector::<f64>::zeros(n + 3);
        for i in 0..n {
            for j in 0..n {
                let dx = nodes[i].0 - nodes[j].0;
                let dy = nodes[i].1 - nodes[j].1;
                a[(i, j)] = thin_plate_kernel(dx * dx + dy * dy);
            }
            a[(i, i)] += smoothing;
            a[(i, n)] = 1.0;
            a[(i, n + 1)] = nodes[i].0;
            a[(i, n + 2)] = nodes[i].1;
            a[(n, i)] = 1.0;
            a[(n + 1, i)] = nodes[i].0;
            a[(n + 2, i)] = nodes[i].1;
            b[i] = samples[i].value;
        }

        let solution = a.lu().solve(&b)?;
        if solution.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self {
            frame,
            weights: solution.rows(0, n).iter().copied().collect(),
            affine: [solution[n], solution[n + 1], solution[n + 2]],
            nodes,
            hull,
        })
    }

    /// NaN outside the hull
    fn evaluate(&self, x: f64, y: f64) -> f64 {
        let p = self.frame.apply(x, y);
        if !inside_hull(&self.hull, p) {
            return f64::NAN;
        }
        let mut value = self.affine[0] + self.affine[1] * p.0 + self.affine[2] * p.1;
        for (node, w) in self.nodes.iter().zip(self.weights.iter()) {
            let dx = p.0 - node.0;
            let dy = p.1 - node.1;
            value += w * thin_plate_kernel(dx * dx + dy * dy);
        }
        value
    }
}

/// Value of the closest sample; the first one wins ties
fn nearest_value(samples: &[PointSample], x: f64, y: f64) -> f64 {
    let mut best = f64::INFINITY;
    let mut value = f64::NAN;
    for s in samples {
        let dx = s.easting - x;
        let dy = s.northing - y;
        let d = dx * dx + dy * dy;
        if d < best {
            best = d;
            value = s.value;
        }
    }
    value
}

/// Spreads point samples over a raster grid
#[derive(Debug, Clone, Default)]
pub struct PointInterpolator {
    params: InterpolationParams,
}

impl PointInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: InterpolationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &InterpolationParams {
        &self.params
    }

    /// Interpolate `samples` onto a `shape` (rows, cols) grid georeferenced
    /// by `geo`. Values are evaluated at pixel centres.
    pub fn interpolate(
        &self,
        samples: &[PointSample],
        geo: &GeoTransform,
        shape: (usize, usize),
    ) -> AtmoResult<(BandImage, BandStatistics)> {
        if samples.is_empty() {
            return Err(AtmoError::InvalidParameter(
                "Interpolation needs at least one sample point".to_string(),
            ));
        }
        let (height, width) = shape;
        log::debug!(
            "Interpolating {} samples onto a {}x{} grid in {} pixel tiles",
            samples.len(),
            width,
            height,
            self.params.tile_size
        );

        let spline = ThinPlateSpline::fit(samples, self.params.smoothing);
        if spline.is_none() {
            log::warn!(
                "Samples do not support a spline surface ({} points), using nearest neighbour only",
                samples.len()
            );
        }

        let mut output = Array2::<f32>::zeros((height, width));
        for window in block_windows(height, width, self.params.tile_size) {
            let mut tile = output.slice_mut(s![
                window.row..window.row + window.height,
                window.col..window.col + window.width
            ]);

            let kernel = |(i, j): (usize, usize), out: &mut f32| {
                let (x, y) = geo.pixel_centre(window.row + i, window.col + j);
                let smooth = spline.as_ref().map(|s| s.evaluate(x, y)).unwrap_or(f64::NAN);
                let value = if smooth.is_finite() {
                    smooth
                } else {
                    nearest_value(samples, x, y)
                };
                let mut value = value as f32;
                if self.params.not_negative && value < self.params.floor {
                    value = self.params.floor;
                }
                *out = value;
            };

            #[cfg(feature = "parallel")]
            Zip::indexed(&mut tile).par_for_each(kernel);
            #[cfg(not(feature = "parallel"))]
            Zip::indexed(&mut tile).for_each(kernel);
        }

        let stats = BandStatistics::from_band(&output);
        log::debug!("Interpolated surface statistics: {:?}", stats);
        Ok((output, stats))
    }
}
