//! Raster segmentation and zonal statistics
//!
//! Histograms, percentiles, 4-connected clumping, small object removal,
//! per-object statistics and spatial selection of objects on a coarse grid.

use crate::types::{AtmoError, AtmoResult, GeoTransform, LabelImage};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Fixed width histogram over `[min, min + counts.len() * bin_width)`
#[derive(Debug, Clone)]
pub struct Histogram {
    pub min: f64,
    pub bin_width: f64,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Histogram with fixed bin width; values outside `[min, max]` are ignored
    pub fn with_bin_width<I>(values: I, min: f64, max: f64, bin_width: f64) -> AtmoResult<Self>
    where
        I: IntoIterator<Item = f32>,
    {
        if bin_width <= 0.0 || max < min {
            return Err(AtmoError::InvalidParameter(format!(
                "Invalid histogram range [{}, {}] with bin width {}",
                min, max, bin_width
            )));
        }
        let n_bins = (((max - min) / bin_width).ceil() as usize).max(1);
        Ok(Self::fill(values, min, max, bin_width, n_bins))
    }

    /// Histogram with a fixed number of bins spanning `[min, max]`
    pub fn with_bins<I>(values: I, min: f64, max: f64, n_bins: usize) -> AtmoResult<Self>
    where
        I: IntoIterator<Item = f32>,
    {
        if n_bins == 0 || max <= min {
            return Err(AtmoError::InvalidParameter(format!(
                "Invalid histogram range [{}, {}] with {} bins",
                min, max, n_bins
            )));
        }
        let bin_width = (max - min) / n_bins as f64;
        Ok(Self::fill(values, min, max, bin_width, n_bins))
    }

    fn fill<I>(values: I, min: f64, max: f64, bin_width: f64, n_bins: usize) -> Self
    where
        I: IntoIterator<Item = f32>,
    {
        let mut counts = vec![0u64; n_bins];
        for v in values {
            let v = v as f64;
            if !v.is_finite() || v < min || v > max {
                continue;
            }
            let idx = (((v - min) / bin_width).floor() as usize).min(n_bins - 1);
            counts[idx] += 1;
        }
        Self {
            min,
            bin_width,
            counts,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Lower edge of bin `i` (the upper edge of bin `i - 1`)
    pub fn edge(&self, i: usize) -> f64 {
        self.min + i as f64 * self.bin_width
    }
}

/// Value at the given fraction (0..1) of the sorted valid pixels.
///
/// Pixels equal to `no_data` and non-finite pixels are skipped. Returns
/// `None` if no valid pixel remains.
pub fn percentile(band: &ArrayView2<f32>, fraction: f64, no_data: Option<f32>) -> Option<f32> {
    let mut values: Vec<f32> = band
        .iter()
        .copied()
        .filter(|v| v.is_finite() && Some(*v) != no_data)
        .collect();
    if values.is_empty() {
        return None;
    }
    let fraction = fraction.clamp(0.0, 1.0);
    let rank = ((fraction * values.len() as f64).ceil() as usize).max(1) - 1;
    let (_, value, _) = values.select_nth_unstable_by(rank, |a, b| {
        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
    });
    Some(*value)
}

fn find_root(parents: &mut [u32], label: u32) -> u32 {
    let mut current = label;
    while current != parents[current as usize] {
        parents[current as usize] = parents[parents[current as usize] as usize];
        current = parents[current as usize];
    }
    current
}

fn union_labels(parents: &mut [u32], a: u32, b: u32) {
    let root_a = find_root(parents, a);
    let root_b = find_root(parents, b);
    if root_a < root_b {
        parents[root_b as usize] = root_a;
    } else if root_b < root_a {
        parents[root_a as usize] = root_b;
    }
}

/// Label 4-connected regions of a mask with consecutive ids starting at 1.
///
/// Returns the label image and the number of objects.
pub fn clump(mask: &Array2<bool>) -> (LabelImage, usize) {
    let (height, width) = mask.dim();
    let mut labels: LabelImage = Array2::zeros((height, width));
    let mut parents: Vec<u32> = vec![0];

    for i in 0..height {
        for j in 0..width {
            if !mask[[i, j]] {
                continue;
            }
            let up = if i > 0 { labels[[i - 1, j]] } else { 0 };
            let left = if j > 0 { labels[[i, j - 1]] } else { 0 };

            labels[[i, j]] = match (up, left) {
                (0, 0) => {
                    let next = parents.len() as u32;
                    parents.push(next);
                    next
                }
                (l, 0) | (0, l) => l,
                (u, l) => {
                    if u != l {
                        union_labels(&mut parents, u, l);
                    }
                    u.min(l)
                }
            };
        }
    }

    // Resolve equivalences into consecutive ids in scan order
    let mut mapping = vec![0u32; parents.len()];
    let mut next_label = 0u32;
    for label in 1..parents.len() as u32 {
        let root = find_root(&mut parents, label);
        if mapping[root as usize] == 0 {
            next_label += 1;
            mapping[root as usize] = next_label;
        }
        mapping[label as usize] = mapping[root as usize];
    }

    labels.mapv_inplace(|l| mapping[l as usize]);
    (labels, next_label as usize)
}

/// Pixel count per label, index 0 holds the background
pub fn object_sizes(labels: &LabelImage, n_objects: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; n_objects + 1];
    for &l in labels.iter() {
        if (l as usize) <= n_objects {
            sizes[l as usize] += 1;
        }
    }
    sizes
}

/// Remove objects with fewer than `min_size` pixels and relabel the rest
/// to consecutive ids.
pub fn remove_small_clumps(labels: &LabelImage, n_objects: usize, min_size: usize) -> (LabelImage, usize) {
    let sizes = object_sizes(labels, n_objects);
    let mut mapping = vec![0u32; n_objects + 1];
    let mut next_label = 0u32;
    for label in 1..=n_objects {
        if sizes[label] >= min_size {
            next_label += 1;
            mapping[label] = next_label;
        }
    }
    let relabelled = labels.mapv(|l| mapping.get(l as usize).copied().unwrap_or(0));
    (relabelled, next_label as usize)
}

/// Zonal statistics of one object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Mean pixel-centre easting
    pub easting: f64,
    /// Mean pixel-centre northing
    pub northing: f64,
}

impl Default for ObjectStats {
    fn default() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            easting: 0.0,
            northing: 0.0,
        }
    }
}

/// Per object statistics of `values` within each label.
///
/// The returned table is indexed by label; entry 0 is the background.
pub fn object_statistics(
    labels: &LabelImage,
    n_objects: usize,
    values: &ArrayView2<f32>,
    geo: &GeoTransform,
) -> AtmoResult<Vec<ObjectStats>> {
    if labels.dim() != values.dim() {
        return Err(AtmoError::Processing(format!(
            "Label image {:?} and value image {:?} differ in shape",
            labels.dim(),
            values.dim()
        )));
    }

    let mut stats = vec![ObjectStats::default(); n_objects + 1];
    let mut sums = vec![(0.0f64, 0.0f64, 0.0f64); n_objects + 1];

    for ((i, j), &label) in labels.indexed_iter() {
        let label = label as usize;
        if label > n_objects {
            continue;
        }
        let v = values[[i, j]] as f64;
        let (x, y) = geo.pixel_centre(i, j);
        let s = &mut stats[label];
        s.count += 1;
        s.min = s.min.min(v);
        s.max = s.max.max(v);
        let acc = &mut sums[label];
        acc.0 += v;
        acc.1 += x;
        acc.2 += y;
    }

    for (s, acc) in stats.iter_mut().zip(sums.iter()) {
        if s.count > 0 {
            let n = s.count as f64;
            s.mean = acc.0 / n;
            s.easting = acc.1 / n;
            s.northing = acc.2 / n;
        } else {
            s.min = 0.0;
            s.max = 0.0;
        }
    }
    Ok(stats)
}

/// Pick at most one object per cell of a `rows x cols` grid laid over the
/// image extent, keeping the object with the lowest `metric`.
///
/// Objects are assigned to cells by their centroid. Returns the chosen
/// labels in ascending order.
pub fn select_objects_on_grid<F>(
    stats: &[ObjectStats],
    selected: &[bool],
    geo: &GeoTransform,
    shape: (usize, usize),
    grid: (usize, usize),
    metric: F,
) -> Vec<u32>
where
    F: Fn(&ObjectStats) -> f64,
{
    let (height, width) = shape;
    let (grid_rows, grid_cols) = (grid.0.max(1), grid.1.max(1));
    let (x0, y0) = geo.pixel_corner(0, 0);
    let (x1, y1) = geo.pixel_corner(height, width);
    let (min_x, max_x) = (x0.min(x1), x0.max(x1));
    let (min_y, max_y) = (y0.min(y1), y0.max(y1));
    let cell_w = (max_x - min_x) / grid_cols as f64;
    let cell_h = (max_y - min_y) / grid_rows as f64;

    let mut best: Vec<Option<(u32, f64)>> = vec![None; grid_rows * grid_cols];

    for (label, s) in stats.iter().enumerate().skip(1) {
        if !selected.get(label).copied().unwrap_or(false) || s.count == 0 {
            continue;
        }
        let col = if cell_w > 0.0 {
            (((s.easting - min_x) / cell_w).floor() as isize).clamp(0, grid_cols as isize - 1) as usize
        } else {
            0
        };
        let row = if cell_h > 0.0 {
            (((max_y - s.northing) / cell_h).floor() as isize).clamp(0, grid_rows as isize - 1) as usize
        } else {
            0
        };
        let value = metric(s);
        let cell = &mut best[row * grid_cols + col];
        match cell {
            Some((_, current)) if *current <= value => {}
            _ => *cell = Some((label as u32, value)),
        }
    }

    let mut chosen: Vec<u32> = best.into_iter().flatten().map(|(l, _)| l).collect();
    chosen.sort_unstable();
    chosen
}

/// Extreme points of an object in map coordinates.
///
/// `min_x_*` is the pixel with the smallest easting, `max_y_*` the one with
/// the largest northing and so on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectExtent {
    pub min_x_x: f64,
    pub min_x_y: f64,
    pub max_x_x: f64,
    pub max_x_y: f64,
    pub min_y_x: f64,
    pub min_y_y: f64,
    pub max_y_x: f64,
    pub max_y_y: f64,
}

/// Extreme points of every object, indexed by label - 1
pub fn object_extents(labels: &LabelImage, n_objects: usize, geo: &GeoTransform) -> Vec<ObjectExtent> {
    let mut extents: Vec<Option<ObjectExtent>> = vec![None; n_objects];

    for ((i, j), &label) in labels.indexed_iter() {
        if label == 0 || label as usize > n_objects {
            continue;
        }
        let (x, y) = geo.pixel_centre(i, j);
        let e = extents[label as usize - 1].get_or_insert(ObjectExtent {
            min_x_x: x,
            min_x_y: y,
            max_x_x: x,
            max_x_y: y,
            min_y_x: x,
            min_y_y: y,
            max_y_x: x,
            max_y_y: y,
        });
        if x < e.min_x_x {
            e.min_x_x = x;
            e.min_x_y = y;
        }
        if x > e.max_x_x {
            e.max_x_x = x;
            e.max_x_y = y;
        }
        if y < e.min_y_y {
            e.min_y_x = x;
            e.min_y_y = y;
        }
        if y > e.max_y_y {
            e.max_y_x = x;
            e.max_y_y = y;
        }
    }

    extents.into_iter().flatten().collect()
}
