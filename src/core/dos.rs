//! Dark object subtraction
//!
//! Turns TOA reflectance into approximate surface reflectance by removing a
//! per band offset, either one scalar per band (simple DOS) or a surface
//! interpolated from dark targets (spatially varying DOS).

use crate::core::dark_targets::{DarkTargetExtractor, DarkTargetParams, DarkTargets, ThresholdMode};
use crate::core::interpolate::{InterpolationParams, PointInterpolator};
use crate::core::segmentation::percentile;
use crate::types::{AtmoError, AtmoResult, BandImage, PixelType, Raster};
use ndarray::{Array3, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Dark object subtraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DosParams {
    pub dos_out_refl: f32,            // Reflectance assigned to dark objects (floor)
    pub simple_percentile: f64,       // Per band offset percentile for simple DOS
    pub threshold_mode: ThresholdMode,
    pub dark_targets: DarkTargetParams,
    pub interpolation: InterpolationParams,
}

impl Default for DosParams {
    fn default() -> Self {
        Self {
            dos_out_refl: 20.0,
            simple_percentile: 0.01,
            threshold_mode: ThresholdMode::Global,
            dark_targets: DarkTargetParams::default(),
            interpolation: InterpolationParams::default(),
        }
    }
}

/// Subtract `offset` from one TOA pixel.
///
/// Nodata (0) stays 0; valid pixels never drop below `floor` (nor below 1).
#[inline]
pub fn subtract_offset(toa: f32, offset: f32, floor: f32) -> f32 {
    if toa == 0.0 {
        return 0.0;
    }
    let lowest = floor.max(1.0);
    (toa - offset + floor).max(lowest)
}

/// Offset surfaces with the dark targets they were built from
#[derive(Debug, Clone)]
pub struct OffsetSurfaces {
    /// One band per input band
    pub offsets: Raster,
    pub targets: Vec<DarkTargets>,
}

/// Dark object subtraction engine
#[derive(Debug, Clone, Default)]
pub struct DosEngine {
    params: DosParams,
}

impl DosEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: DosParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DosParams {
        &self.params
    }

    /// Per band offsets at the simple DOS percentile, ignoring nodata
    pub fn simple_offsets(&self, toa: &Raster) -> AtmoResult<Vec<f32>> {
        let mut offsets = Vec::with_capacity(toa.band_count());
        for index in 0..toa.band_count() {
            let band = toa.band(index)?;
            let offset = percentile(&band, self.params.simple_percentile, Some(0.0)).unwrap_or(0.0);
            log::debug!("Band {} simple DOS offset: {}", index + 1, offset);
            offsets.push(offset);
        }
        Ok(offsets)
    }

    /// Subtract one scalar offset per band
    pub fn apply_single_offsets(&self, toa: &Raster, offsets: &[f32]) -> AtmoResult<Raster> {
        if offsets.len() != toa.band_count() {
            return Err(AtmoError::InvalidParameter(format!(
                "{} offsets given for {} bands",
                offsets.len(),
                toa.band_count()
            )));
        }
        let floor = self.params.dos_out_refl;
        let mut data = toa.data.clone();
        for (mut band, &offset) in data.axis_iter_mut(Axis(0)).zip(offsets.iter()) {
            band.mapv_inplace(|v| subtract_offset(v, offset, floor));
        }
        Ok(self.finish(toa, data))
    }

    /// Simple DOS: percentile offsets then subtraction
    pub fn simple_dos(&self, toa: &Raster) -> AtmoResult<(Raster, Vec<f32>)> {
        log::info!("Applying simple dark object subtraction");
        let offsets = self.simple_offsets(toa)?;
        let corrected = self.apply_single_offsets(toa, &offsets)?;
        Ok((corrected, offsets))
    }

    /// Simple DOS of one band; returns the single band result and its offset
    pub fn simple_band_dos(&self, toa: &Raster, band_index: usize) -> AtmoResult<(Raster, f32)> {
        let band = toa.band(band_index)?;
        let offset = percentile(&band, self.params.simple_percentile, Some(0.0)).unwrap_or(0.0);
        log::info!("Band {} offset = {}", band_index + 1, offset);
        let floor = self.params.dos_out_refl;
        let corrected = band.mapv(|v| subtract_offset(v, offset, floor));
        let raster = Raster::from_band(corrected, toa)
            .with_pixel_type(PixelType::UInt16)
            .with_no_data(0.0);
        Ok((raster, offset))
    }

    /// Offset surface of one band from its dark targets
    pub fn band_offset_surface(&self, toa: &Raster, band_index: usize) -> AtmoResult<(BandImage, DarkTargets)> {
        let extractor = DarkTargetExtractor::with_params(self.params.dark_targets.clone());
        let interpolator = PointInterpolator::with_params(self.params.interpolation.clone());
        let shape = (toa.height(), toa.width());

        let band = toa.band(band_index)?;
        let found = extractor.extract(&band, &toa.geo_transform, band_index, self.params.threshold_mode)?;
        if found.samples.is_empty() {
            return Err(AtmoError::InsufficientSamples {
                band: band_index + 1,
                found: 0,
            });
        }
        let (surface, stats) = interpolator.interpolate(&found.samples, &toa.geo_transform, shape)?;
        log::info!(
            "Band {} offset surface from {} samples: min {:.2}, max {:.2}, mean {:.2}",
            band_index + 1,
            found.samples.len(),
            stats.min,
            stats.max,
            stats.mean
        );
        Ok((surface, found))
    }

    /// Spatially varying DOS of one band
    pub fn band_dos(&self, toa: &Raster, band_index: usize) -> AtmoResult<(Raster, DarkTargets)> {
        let (surface, found) = self.band_offset_surface(toa, band_index)?;
        let floor = self.params.dos_out_refl;
        let mut corrected = toa.band(band_index)?.to_owned();
        Zip::from(&mut corrected)
            .and(&surface)
            .for_each(|v, &offset| *v = subtract_offset(*v, offset, floor));
        let raster = Raster::from_band(corrected, toa)
            .with_pixel_type(PixelType::UInt16)
            .with_no_data(0.0);
        Ok((raster, found))
    }

    /// Offset surface per band from dark targets
    pub fn offset_surfaces(&self, toa: &Raster) -> AtmoResult<OffsetSurfaces> {
        let shape = (toa.height(), toa.width());
        let mut surfaces = Array3::<f32>::zeros((toa.band_count(), shape.0, shape.1));
        let mut targets = Vec::with_capacity(toa.band_count());

        for index in 0..toa.band_count() {
            let (surface, found) = self.band_offset_surface(toa, index)?;
            surfaces.index_axis_mut(Axis(0), index).assign(&surface);
            targets.push(found);
        }

        let offsets = toa
            .like(surfaces)
            .with_pixel_type(PixelType::Float32)
            .with_band_names(&toa.band_names);
        Ok(OffsetSurfaces { offsets, targets })
    }

    /// Subtract per pixel offsets held in `offsets` (one band per TOA band)
    pub fn apply_offset_surfaces(&self, toa: &Raster, offsets: &Raster) -> AtmoResult<Raster> {
        toa.check_same_grid(offsets)?;
        if offsets.band_count() != toa.band_count() {
            return Err(AtmoError::InvalidParameter(format!(
                "Offset raster has {} bands, TOA raster has {}",
                offsets.band_count(),
                toa.band_count()
            )));
        }
        let floor = self.params.dos_out_refl;
        let mut data = toa.data.clone();
        Zip::from(&mut data)
            .and(&offsets.data)
            .for_each(|v, &offset| *v = subtract_offset(*v, offset, floor));
        Ok(self.finish(toa, data))
    }

    /// Spatially varying DOS
    pub fn spatial_dos(&self, toa: &Raster) -> AtmoResult<(Raster, OffsetSurfaces)> {
        log::info!(
            "Applying spatially varying dark object subtraction ({:?} thresholds)",
            self.params.threshold_mode
        );
        let surfaces = self.offset_surfaces(toa)?;
        let corrected = self.apply_offset_surfaces(toa, &surfaces.offsets)?;
        Ok((corrected, surfaces))
    }

    fn finish(&self, toa: &Raster, data: Array3<f32>) -> Raster {
        toa.like(data)
            .with_pixel_type(PixelType::UInt16)
            .with_no_data(0.0)
            .with_band_names(&toa.band_names)
    }
}
