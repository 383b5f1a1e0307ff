//! Dark target extraction
//!
//! Finds clusters of the darkest pixels of a band, either against one
//! histogram threshold for the whole band or against thresholds computed
//! block by block, and reduces them to a spatially thinned set of point
//! samples carrying each object's minimum reflectance.

use crate::core::interpolate::PointSample;
use crate::core::segmentation::{
    clump, object_statistics, remove_small_clumps, select_objects_on_grid, Histogram,
};
use crate::types::{block_windows, AtmoError, AtmoResult, GeoTransform, LabelImage, Window};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Location and representative minimum reflectance of one dark object
pub type DarkTargetSample = PointSample;

/// How candidate dark pixels are thresholded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdMode {
    /// One histogram threshold over the whole band
    Global,
    /// Independent thresholds per block
    Local,
}

/// Dark target extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkTargetParams {
    pub percentile: f64,               // Fraction of pixels treated as dark
    pub min_object_size: usize,        // Objects below this many pixels are dropped
    pub hist_bin_width: f64,           // Histogram bin width (reflectance units)
    pub hist_min: f64,                 // Histogram range of valid values
    pub hist_max: f64,
    pub min_objects: usize,            // Need more objects than this to accept a threshold
    pub max_percentile_retries: usize, // Percentile doublings before giving up
    pub grid_rows: usize,              // Selection grid over the image extent
    pub grid_cols: usize,
    pub block_size: usize,             // Local thresholding block edge in pixels
    pub min_block_range: f64,          // Blocks flatter than this are skipped
    pub min_block_fill: f64,           // Fraction of non-zero pixels a block needs
}

impl Default for DarkTargetParams {
    fn default() -> Self {
        Self {
            percentile: 0.01,
            min_object_size: 5,
            hist_bin_width: 1.0,
            hist_min: 1.0,
            hist_max: 10000.0,
            min_objects: 10,
            max_percentile_retries: 8,
            grid_rows: 20,
            grid_cols: 20,
            block_size: 200,
            min_block_range: 5.0,
            min_block_fill: 0.1,
        }
    }
}

/// Result of dark target extraction for one band
#[derive(Debug, Clone)]
pub struct DarkTargets {
    pub samples: Vec<DarkTargetSample>,
    /// Dark objects after size filtering, 0 is background
    pub objects: LabelImage,
    pub object_count: usize,
    /// Percentile that produced enough objects
    pub percentile: f64,
    /// Global threshold, `None` for block-wise thresholding
    pub threshold: Option<f64>,
}

/// Extracts dark object samples from TOA reflectance bands
#[derive(Debug, Clone, Default)]
pub struct DarkTargetExtractor {
    params: DarkTargetParams,
}

impl DarkTargetExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: DarkTargetParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DarkTargetParams {
        &self.params
    }

    /// Threshold below which `percentile` of the histogrammed pixels fall.
    ///
    /// Bins are walked upwards while the cumulative count stays below the
    /// target; the threshold is the value range those bins cover, measured
    /// from one bin below the histogram minimum.
    pub fn global_threshold(&self, band: &ArrayView2<f32>, percentile: f64) -> AtmoResult<f64> {
        let p = &self.params;
        let hist = Histogram::with_bin_width(band.iter().copied(), p.hist_min, p.hist_max, p.hist_bin_width)?;
        let target = hist.total() as f64 * percentile;

        let mut cumulative = 0u64;
        let mut bins_below = 0usize;
        for &count in &hist.counts {
            cumulative += count;
            if (cumulative as f64) < target {
                bins_below += 1;
            } else {
                break;
            }
        }
        Ok(hist.edge(bins_below) - p.hist_bin_width)
    }

    /// Mask of non-zero pixels at or below the global threshold
    pub fn global_dark_pixels(&self, band: &ArrayView2<f32>, percentile: f64) -> AtmoResult<(Array2<bool>, f64)> {
        let threshold = self.global_threshold(band, percentile)?;
        log::debug!("Dark pixel threshold {} at percentile {}", threshold, percentile);
        let mask = band.mapv(|v| v != 0.0 && (v as f64) <= threshold);
        Ok((mask, threshold))
    }

    /// Dark pixels from independent per-block thresholds
    pub fn local_dark_pixels(&self, band: &ArrayView2<f32>, percentile: f64) -> AtmoResult<Array2<bool>> {
        let p = &self.params;
        let (height, width) = band.dim();
        let mut mask = Array2::from_elem((height, width), false);
        let mut used_blocks = 0usize;

        let windows = block_windows(height, width, p.block_size);
        let block_of = move |w: &Window| band.slice(s![w.row..w.row + w.height, w.col..w.col + w.width]);

        #[cfg(feature = "parallel")]
        let thresholds: Vec<Option<f64>> = {
            use rayon::prelude::*;
            windows
                .par_iter()
                .map(|w| self.block_threshold(&block_of(w), percentile))
                .collect::<AtmoResult<_>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let thresholds: Vec<Option<f64>> = windows
            .iter()
            .map(|w| self.block_threshold(&block_of(w), percentile))
            .collect::<AtmoResult<_>>()?;

        for (window, threshold) in windows.iter().zip(thresholds) {
            let Some(threshold) = threshold else {
                continue;
            };
            used_blocks += 1;
            let block = block_of(window);
            let mut out = mask.slice_mut(s![
                window.row..window.row + window.height,
                window.col..window.col + window.width
            ]);
            ndarray::Zip::from(&mut out).and(&block).for_each(|m, &v| {
                *m = v > 0.0 && (v as f64) <= threshold;
            });
        }

        log::debug!("Local dark pixel thresholds found in {} blocks", used_blocks);
        Ok(mask)
    }

    /// Percentile threshold of one block, `None` if the block is too flat
    /// or too empty to judge.
    ///
    /// The range gate covers the whole block, zeros included; the fill gate
    /// counts against a full `block_size` square, also for edge blocks.
    fn block_threshold(&self, block: &ArrayView2<f32>, percentile: f64) -> AtmoResult<Option<f64>> {
        let p = &self.params;
        let (block_min, block_max) = block
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if block_max < block_min || ((block_max - block_min) as f64) <= p.min_block_range {
            return Ok(None);
        }

        let values: Vec<f32> = block.iter().copied().filter(|v| *v != 0.0 && v.is_finite()).collect();
        let full_block = (p.block_size * p.block_size) as f64;
        if values.is_empty() || (values.len() as f64) <= full_block * p.min_block_fill {
            return Ok(None);
        }
        let min = values.iter().copied().fold(f32::INFINITY, f32::min) as f64;
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;

        let n_bins = ((max - min).ceil() / p.hist_bin_width) as usize + 1;
        // A single valued block gets a unit wide range around its value
        let (lo, hi) = if max > min { (min, max) } else { (min - 0.5, max + 0.5) };
        let n_values = values.len();
        let hist = Histogram::with_bins(values, lo, hi, n_bins)?;
        let target = (n_values as f64 * percentile).floor() as u64;

        let mut cumulative = 0u64;
        let mut threshold = None;
        for (i, &count) in hist.counts.iter().enumerate() {
            if cumulative + count > target {
                break;
            }
            cumulative += count;
            threshold = Some(hist.edge(i + 1));
        }
        Ok(threshold)
    }

    /// Dark object samples of one band.
    ///
    /// When too few objects survive the size filter the percentile is
    /// doubled and thresholding starts again, at most
    /// `max_percentile_retries` times.
    pub fn extract(
        &self,
        band: &ArrayView2<f32>,
        geo: &GeoTransform,
        band_index: usize,
        mode: ThresholdMode,
    ) -> AtmoResult<DarkTargets> {
        let p = &self.params;
        let mut percentile = p.percentile;
        let mut attempts = 0usize;

        while attempts <= p.max_percentile_retries && percentile <= 1.0 {
            attempts += 1;
            let (mask, threshold) = match mode {
                ThresholdMode::Global => {
                    let (mask, threshold) = self.global_dark_pixels(band, percentile)?;
                    (mask, Some(threshold))
                }
                ThresholdMode::Local => (self.local_dark_pixels(band, percentile)?, None),
            };

            let (labels, n_raw) = clump(&mask);
            let (objects, object_count) = remove_small_clumps(&labels, n_raw, p.min_object_size);
            log::debug!(
                "Band {}: {} dark objects ({} before size filter) at percentile {}",
                band_index + 1,
                object_count,
                n_raw,
                percentile
            );

            if object_count > p.min_objects {
                let samples = self.spatial_samples(&objects, object_count, band, geo)?;
                log::info!(
                    "Band {}: {} dark target samples from {} objects (percentile {})",
                    band_index + 1,
                    samples.len(),
                    object_count,
                    percentile
                );
                return Ok(DarkTargets {
                    samples,
                    objects,
                    object_count,
                    percentile,
                    threshold,
                });
            }

            log::info!(
                "Band {}: only {} dark objects at percentile {}, doubling",
                band_index + 1,
                object_count,
                percentile
            );
            percentile *= 2.0;
        }

        Err(AtmoError::DarkTargetsNotFound {
            band: band_index + 1,
            attempts,
            percentile,
        })
    }

    /// One sample per selection grid cell: the object with the lowest mean
    /// reflectance, at its centroid, valued at its minimum reflectance
    fn spatial_samples(
        &self,
        objects: &LabelImage,
        object_count: usize,
        band: &ArrayView2<f32>,
        geo: &GeoTransform,
    ) -> AtmoResult<Vec<DarkTargetSample>> {
        let stats = object_statistics(objects, object_count, band, geo)?;
        let mut selected = vec![true; object_count + 1];
        selected[0] = false;

        let chosen = select_objects_on_grid(
            &stats,
            &selected,
            geo,
            band.dim(),
            (self.params.grid_rows, self.params.grid_cols),
            |s| s.mean,
        );

        Ok(chosen
            .into_iter()
            .map(|label| {
                let s = &stats[label as usize];
                DarkTargetSample {
                    easting: s.easting,
                    northing: s.northing,
                    value: s.min,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bright band with `n` dark 3x3 squares spread over distinct grid cells
    fn band_with_dark_squares(n: usize, dark: f32) -> Array2<f32> {
        let mut band = Array2::from_elem((200, 200), 500.0f32);
        for k in 0..n {
            let row = (k / 5) * 40 + 5;
            let col = (k % 5) * 40 + 5;
            for i in row..row + 3 {
                for j in col..col + 3 {
                    band[[i, j]] = dark + (i + j - row - col) as f32;
                }
            }
        }
        band
    }

    #[test]
    fn test_global_threshold() {
        let band = band_with_dark_squares(20, 50.0);
        let extractor = DarkTargetExtractor::new();
        let threshold = extractor.global_threshold(&band.view(), 0.01).unwrap();
        // 180 dark pixels are under the 400 pixel target, 500 is not
        assert_eq!(threshold, 499.0);
    }

    #[test]
    fn test_samples_below_threshold() {
        let band = band_with_dark_squares(20, 50.0);
        let geo = GeoTransform::north_up(0.0, 6000.0, 30.0, 30.0);
        let extractor = DarkTargetExtractor::new();
        let targets = extractor
            .extract(&band.view(), &geo, 0, ThresholdMode::Global)
            .unwrap();

        assert_eq!(targets.object_count, 20);
        assert_eq!(targets.samples.len(), 20);
        let threshold = targets.threshold.unwrap();
        assert!(targets.samples.iter().all(|s| s.value <= threshold));
        assert!(targets.samples.iter().all(|s| s.value == 50.0));
    }

    #[test]
    fn test_retry_cap_terminates() {
        // A uniform band never yields more than one object
        let band = Array2::from_elem((50, 50), 300.0f32);
        let geo = GeoTransform::north_up(0.0, 1500.0, 30.0, 30.0);
        let params = DarkTargetParams {
            max_percentile_retries: 3,
            ..DarkTargetParams::default()
        };
        let result = DarkTargetExtractor::with_params(params).extract(&band.view(), &geo, 2, ThresholdMode::Global);
        match result {
            Err(AtmoError::DarkTargetsNotFound { band, attempts, .. }) => {
                assert_eq!(band, 3);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected result: {:?}", other.map(|t| t.object_count)),
        }
    }

    #[test]
    fn test_percentile_doubles_until_enough_objects() {
        // 12 dark objects holding 108 of 40000 pixels; a 0.001 percentile
        // only reaches part of the darkest value range
        let mut band = Array2::from_elem((200, 200), 500.0f32);
        for k in 0..12 {
            let row = (k / 4) * 60 + 10;
            let col = (k % 4) * 50 + 10;
            for i in row..row + 3 {
                for j in col..col + 3 {
                    band[[i, j]] = 20.0 + 10.0 * k as f32;
                }
            }
        }
        let geo = GeoTransform::north_up(0.0, 6000.0, 30.0, 30.0);
        let params = DarkTargetParams {
            percentile: 0.001,
            ..DarkTargetParams::default()
        };
        let targets = DarkTargetExtractor::with_params(params)
            .extract(&band.view(), &geo, 0, ThresholdMode::Global)
            .unwrap();
        assert!(targets.percentile > 0.001);
        assert_eq!(targets.object_count, 12);
    }

    #[test]
    fn test_local_thresholds_follow_haze_gradient() {
        // Two halves with different haze levels, each with its own dark objects
        let mut band = Array2::from_elem((100, 200), 0.0f32);
        for ((i, j), v) in band.indexed_iter_mut() {
            let base = if j < 100 { 300.0 } else { 900.0 };
            *v = base + ((i * 7 + j * 3) % 50) as f32;
        }
        for k in 0..6 {
            for half in 0..2 {
                let row = (k / 3) * 40 + 10;
                let col = half * 100 + (k % 3) * 30 + 10;
                let dark = if half == 0 { 100.0 } else { 700.0 };
                for i in row..row + 3 {
                    for j in col..col + 3 {
                        band[[i, j]] = dark;
                    }
                }
            }
        }

        let params = DarkTargetParams {
            block_size: 100,
            ..DarkTargetParams::default()
        };
        let extractor = DarkTargetExtractor::with_params(params);
        let mask = extractor.local_dark_pixels(&band.view(), 0.01).unwrap();

        // The hazy half's dark objects are found even though they are
        // brighter than the clear half's background
        assert!(mask[[11, 111]]);
        assert!(mask[[11, 11]]);
        assert!(!mask[[0, 150]]);
        assert!(!mask[[0, 50]]);

        let geo = GeoTransform::north_up(0.0, 3000.0, 30.0, 30.0);
        let targets = extractor
            .extract(&band.view(), &geo, 0, ThresholdMode::Local)
            .unwrap();
        assert_eq!(targets.object_count, 12);
        assert!(targets.threshold.is_none());
    }

    #[test]
    fn test_block_range_includes_nodata_zeros() {
        // Valid pixels only span 50..53, the zeros around them widen the
        // block range past the gate
        let mut band = Array2::from_elem((200, 200), 0.0f32);
        band.slice_mut(s![0..60, 0..100]).fill(52.0);
        band.slice_mut(s![59, 0..100]).fill(53.0);
        band.slice_mut(s![0, 0..50]).fill(50.0);

        let extractor = DarkTargetExtractor::new();
        let mask = extractor.local_dark_pixels(&band.view(), 0.01).unwrap();
        assert!(mask[[0, 10]]);
        assert!(!mask[[30, 30]]);
        assert!(!mask[[100, 100]]);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 50);
    }

    #[test]
    fn test_edge_block_fill_uses_full_block_size() {
        // 200 x 215 band: the right edge block is 200 x 15 = 3000 pixels,
        // below 10% of a full 200 x 200 block even though it has no zeros
        let mut band = Array2::from_elem((200, 215), 0.0f32);
        for ((i, j), v) in band.indexed_iter_mut() {
            *v = 100.0 + ((i * 7 + j * 3) % 50) as f32;
        }
        band.slice_mut(s![10..13, 10..13]).fill(20.0);
        band.slice_mut(s![10..13, 205..208]).fill(20.0);

        let extractor = DarkTargetExtractor::new();
        let mask = extractor.local_dark_pixels(&band.view(), 0.01).unwrap();
        assert!(mask[[11, 11]]);
        assert!(!mask[[11, 206]]);
        assert!(mask.slice(s![.., 200..]).iter().all(|&m| !m));
    }

    #[test]
    fn test_flat_or_empty_blocks_are_skipped() {
        let extractor = DarkTargetExtractor::new();
        let zeros = Array2::from_elem((200, 200), 0.0f32);
        assert_eq!(extractor.block_threshold(&zeros.view(), 0.01).unwrap(), None);
        let flat = Array2::from_elem((200, 200), 300.0f32);
        assert_eq!(extractor.block_threshold(&flat.view(), 0.01).unwrap(), None);
    }
}
