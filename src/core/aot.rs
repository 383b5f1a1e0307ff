//! Scene AOT from a dark object
//!
//! The largest near-black object left after simple DOS is taken as a
//! target of known reflectance. Candidate AOTs are stepped across the
//! search range and the one whose predicted radiance best matches the
//! observed radiance over that object wins.

use crate::core::dos::{DosEngine, DosParams};
use crate::core::segmentation::{clump, object_statistics, remove_small_clumps};
use crate::core::sixs::{step_span, LutBuilder, RadiativeTransfer, SixSCoefficients, SpectralBand};
use crate::types::{AtmoError, AtmoResult, BandImage, Raster};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// AOT search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AotSearchParams {
    pub aot_min: f64,
    pub aot_max: f64,
    pub aot_step: f64,
    pub min_object_size: usize, // Dark objects smaller than this are dropped
    pub dark_margin: f32,       // Dark ROI is (0, dos_out_refl + margin)
    pub reflectance_scale: f64, // TOA values are reflectance * scale
    pub dos: DosParams,
}

impl Default for AotSearchParams {
    fn default() -> Self {
        Self {
            aot_min: 0.05,
            aot_max: 0.5,
            aot_step: 0.05,
            min_object_size: 5,
            dark_margin: 5.0,
            reflectance_scale: 1000.0,
            dos: DosParams::default(),
        }
    }
}

/// Result of one AOT search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AotEstimate {
    pub aot: f64,
    /// Radiance mismatch at `aot`
    pub discrepancy: f64,
    /// Surface reflectance assumed for the target, in [0, 1]
    pub reflectance: f64,
    pub mean_radiance: f64,
    pub mean_toa: f64,
    /// Mean target elevation in metres
    pub elevation: f64,
    pub band_offset: f32,
    pub object_pixels: usize,
}

/// Absolute difference between observed radiance and the radiance the
/// coefficients predict for `reflectance`
pub fn radiance_discrepancy(coefficients: &SixSCoefficients, reflectance: f64, observed: f64) -> f64 {
    (observed - coefficients.radiance(reflectance)).abs()
}

/// Number of AOT candidates: `ceil((max - min) / step) + 1`
pub fn aot_candidate_count(min: f64, max: f64, step: f64) -> AtmoResult<usize> {
    Ok(step_span(min, max, step)? + 1)
}

/// Single scene AOT estimation from a DOS dark target
#[derive(Debug, Clone, Default)]
pub struct AotEstimator {
    params: AotSearchParams,
}

/// Mean observation over the chosen dark target
struct DarkTarget {
    pixels: usize,
    mean_toa: f64,
    mean_radiance: f64,
    mean_elevation: f64,
}

impl AotEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: AotSearchParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AotSearchParams {
        &self.params
    }

    /// Largest dark object of the DOS corrected band with its mean values
    fn dark_target(
        &self,
        dos_band: &BandImage,
        toa: &Raster,
        radiance: &Raster,
        band_index: usize,
        dem: &BandImage,
    ) -> AtmoResult<DarkTarget> {
        let limit = self.params.dos.dos_out_refl + self.params.dark_margin;
        let roi: Array2<bool> = dos_band.mapv(|v| v != 0.0 && v < limit);
        let (labels, n) = clump(&roi);
        let (labels, n) = remove_small_clumps(&labels, n, self.params.min_object_size);
        log::debug!("{} dark objects of at least {} pixels", n, self.params.min_object_size);
        if n == 0 {
            return Err(AtmoError::InsufficientSamples {
                band: band_index + 1,
                found: 0,
            });
        }

        let geo = &toa.geo_transform;
        let toa_stats = object_statistics(&labels, n, &toa.band(band_index)?, geo)?;
        let rad_stats = object_statistics(&labels, n, &radiance.band(band_index)?, geo)?;
        let dem_stats = object_statistics(&labels, n, &dem.view(), geo)?;

        let mut largest = 1;
        for label in 2..=n {
            if toa_stats[label].count > toa_stats[largest].count {
                largest = label;
            }
        }

        Ok(DarkTarget {
            pixels: toa_stats[largest].count,
            mean_toa: toa_stats[largest].mean,
            mean_radiance: rad_stats[largest].mean,
            mean_elevation: dem_stats[largest].mean,
        })
    }

    /// Estimate one AOT for the scene from band `band_index`.
    ///
    /// `radiance` and `toa` must share a grid with `dem`; `builder` supplies
    /// the solver parameterisation and `band` the spectral response.
    pub fn estimate_from_dos<S: RadiativeTransfer + ?Sized>(
        &self,
        solver: &S,
        builder: &LutBuilder,
        band: &SpectralBand,
        radiance: &Raster,
        toa: &Raster,
        band_index: usize,
        dem: &BandImage,
    ) -> AtmoResult<AotEstimate> {
        let p = &self.params;
        let candidates = aot_candidate_count(p.aot_min, p.aot_max, p.aot_step)?;
        if candidates < 2 {
            return Err(AtmoError::InvalidParameter(format!(
                "AOT range {} to {} gives {} candidate(s), at least 2 are needed",
                p.aot_min, p.aot_max, candidates
            )));
        }
        toa.check_same_grid(radiance)?;
        if dem.dim() != (toa.height(), toa.width()) {
            return Err(AtmoError::Processing(format!(
                "DEM is {}x{}, image is {}x{}",
                dem.ncols(),
                dem.nrows(),
                toa.width(),
                toa.height()
            )));
        }

        let dos = DosEngine::with_params(p.dos.clone());
        let (dos_raster, band_offset) = dos.simple_band_dos(toa, band_index)?;
        let dos_band = dos_raster.band(0)?.to_owned();

        let target = self.dark_target(&dos_band, toa, radiance, band_index, dem)?;
        let reflectance =
            (target.mean_toa - band_offset as f64).max(p.dos.dos_out_refl as f64) / p.reflectance_scale;
        log::info!(
            "Dark target: {} pixels, TOA {:.2}, radiance {:.3}, elevation {:.1} m, reflectance {:.4}",
            target.pixels,
            target.mean_toa,
            target.mean_radiance,
            target.mean_elevation,
            reflectance
        );

        let mut best: Option<(f64, f64)> = None;
        for j in 0..candidates {
            let aot = p.aot_min + j as f64 * p.aot_step;
            let request = builder.request(band, target.mean_elevation, aot);
            let coefficients = solver.run(&request)?;
            let discrepancy = radiance_discrepancy(&coefficients, reflectance, target.mean_radiance);
            log::debug!("AOT {:.3}: discrepancy {:.5}", aot, discrepancy);
            match best {
                Some((_, d)) if discrepancy >= d => {}
                _ => best = Some((aot, discrepancy)),
            }
        }

        let (aot, discrepancy) = best.ok_or_else(|| {
            AtmoError::Processing("AOT search evaluated no candidates".to_string())
        })?;
        log::info!("Identified AOT {:.3} (discrepancy {:.5})", aot, discrepancy);

        Ok(AotEstimate {
            aot,
            discrepancy,
            reflectance,
            mean_radiance: target.mean_radiance,
            mean_toa: target.mean_toa,
            elevation: target.mean_elevation,
            band_offset,
            object_pixels: target.pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sixs::{SixSGeometry, SixSParams, SixSRequest};
    use crate::types::GeoTransform;
    use ndarray::{s, Array3};
    use std::cell::RefCell;

    fn scene() -> (Raster, Raster, BandImage) {
        let mut toa = Array3::from_elem((1, 20, 20), 500.0f32);
        toa.slice_mut(s![0, 2..6, 2..6]).fill(30.0);
        // Too small to survive
        toa.slice_mut(s![0, 15, 15..18]).fill(30.0);
        let mut rad = Array3::from_elem((1, 20, 20), 90.0f32);
        rad.slice_mut(s![0, 2..6, 2..6]).fill(32.0);
        let mut dem = Array2::from_elem((20, 20), 100.0f32);
        dem.slice_mut(s![2..6, 2..6]).fill(500.0);
        (
            Raster::new(toa, GeoTransform::default(), ""),
            Raster::new(rad, GeoTransform::default(), ""),
            dem,
        )
    }

    fn builder() -> LutBuilder {
        let geometry = SixSGeometry {
            month: 6,
            day: 15,
            gmt_decimal_hour: 10.0,
            latitude: 0.0,
            longitude: 0.0,
        };
        LutBuilder::new(SixSParams::default(), geometry, vec![])
    }

    #[test]
    fn test_estimate_from_dos() {
        let (toa, rad, dem) = scene();
        let seen = RefCell::new(Vec::new());
        // L = (rho + aot) * 100
        let solver = |request: &SixSRequest| -> AtmoResult<SixSCoefficients> {
            seen.borrow_mut().push((request.altitude_km, request.aot550));
            Ok(SixSCoefficients { xa: 0.01, xb: request.aot550, xc: 0.0 })
        };
        let band = SpectralBand::Predefined("LANDSAT_MSS_B1".to_string());

        let estimate = AotEstimator::new()
            .estimate_from_dos(&solver, &builder(), &band, &rad, &toa, 0, &dem)
            .unwrap();

        assert!((estimate.aot - 0.3).abs() < 1e-9);
        assert_eq!(estimate.object_pixels, 16);
        assert_eq!(estimate.band_offset, 30.0);
        assert!((estimate.reflectance - 0.02).abs() < 1e-12);
        assert!((estimate.elevation - 500.0).abs() < 1e-9);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 10);
        assert!(seen.iter().all(|&(alt, _)| (alt - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_ties_keep_lowest_aot() {
        let (toa, rad, dem) = scene();
        let flat = |_: &SixSRequest| -> AtmoResult<SixSCoefficients> {
            Ok(SixSCoefficients { xa: 0.01, xb: 0.0, xc: 0.0 })
        };
        let band = SpectralBand::Predefined("b".to_string());
        let estimate = AotEstimator::new()
            .estimate_from_dos(&flat, &builder(), &band, &rad, &toa, 0, &dem)
            .unwrap();
        assert!((estimate.aot - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_narrow_range_rejected() {
        let (toa, rad, dem) = scene();
        let params = AotSearchParams {
            aot_min: 0.2,
            aot_max: 0.2,
            ..AotSearchParams::default()
        };
        let solver = |_: &SixSRequest| -> AtmoResult<SixSCoefficients> {
            Ok(SixSCoefficients { xa: 1.0, xb: 0.0, xc: 0.0 })
        };
        let band = SpectralBand::Predefined("b".to_string());
        let err = AotEstimator::with_params(params)
            .estimate_from_dos(&solver, &builder(), &band, &rad, &toa, 0, &dem)
            .unwrap_err();
        assert!(matches!(err, AtmoError::InvalidParameter(_)));
    }

    #[test]
    fn test_no_dark_object() {
        // Only the single darkest pixel falls inside the dark range
        let data = Array3::from_shape_fn((1, 10, 10), |(_, i, j)| ((i * 10 + j) * 10 + 100) as f32);
        let toa = Raster::new(data, GeoTransform::default(), "");
        let rad = toa.clone();
        let dem = Array2::zeros((10, 10));
        let solver = |_: &SixSRequest| -> AtmoResult<SixSCoefficients> {
            Ok(SixSCoefficients { xa: 1.0, xb: 0.0, xc: 0.0 })
        };
        let band = SpectralBand::Predefined("b".to_string());
        let err = AotEstimator::new()
            .estimate_from_dos(&solver, &builder(), &band, &rad, &toa, 0, &dem)
            .unwrap_err();
        assert!(matches!(err, AtmoError::InsufficientSamples { band: 1, .. }));
    }
}
