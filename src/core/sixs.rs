//! 6S radiative-transfer requests and coefficient lookup tables
//!
//! The solver itself is a collaborator behind [`RadiativeTransfer`]. This
//! module fixes how it is parameterised and walks the elevation and
//! elevation x AOT grids, calling it once per band per grid point.

use crate::types::{AtmoError, AtmoResult};
use serde::{Deserialize, Serialize};

/// Standard atmosphere profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtmosProfile {
    Tropical,
    MidlatitudeSummer,
    MidlatitudeWinter,
    SubarcticSummer,
    SubarcticWinter,
    UsStandard1962,
}

/// Aerosol models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AerosolProfile {
    NoAerosols,
    Continental,
    Maritime,
    Urban,
    Desert,
    BiomassBurning,
    Stratospheric,
}

/// Ground reflectance model used by the solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GroundReflectance {
    GreenVegetation,
    ClearWater,
    LakeWater,
    Sand,
    /// Constant reflectance in [0, 1]
    Homogeneous(f64),
}

/// Spectral band handed to the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpectralBand {
    /// Response function known to the solver by name (e.g. "LANDSAT_MSS_B1")
    Predefined(String),
    /// Flat response between two wavelengths in micrometres
    Range { start_um: f64, end_um: f64 },
}

/// Solver configuration shared by every call of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SixSParams {
    pub atmos_profile: AtmosProfile,
    pub aerosol_profile: AerosolProfile,
    pub ground_reflectance: GroundReflectance,
    pub use_brdf: bool,
    pub input_radiance: f64, // Radiance the correction coefficients are derived from
}

impl Default for SixSParams {
    fn default() -> Self {
        Self {
            atmos_profile: AtmosProfile::MidlatitudeSummer,
            aerosol_profile: AerosolProfile::Continental,
            ground_reflectance: GroundReflectance::GreenVegetation,
            use_brdf: false,
            input_radiance: 200.0,
        }
    }
}

/// Acquisition geometry passed to the solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SixSGeometry {
    pub month: u32,
    pub day: u32,
    pub gmt_decimal_hour: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// One solver invocation
#[derive(Debug, Clone, PartialEq)]
pub struct SixSRequest {
    pub params: SixSParams,
    pub geometry: SixSGeometry,
    /// Target altitude in kilometres
    pub altitude_km: f64,
    pub aot550: f64,
    pub band: SpectralBand,
}

/// Atmospheric correction coefficients for one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SixSCoefficients {
    pub xa: f64,
    pub xb: f64,
    pub xc: f64,
}

impl SixSCoefficients {
    /// Surface reflectance in [0, 1] from at-sensor radiance
    pub fn reflectance(&self, radiance: f64) -> f64 {
        let y = self.xa * radiance - self.xb;
        y / (1.0 + self.xc * y)
    }

    /// At-sensor radiance expected for a surface reflectance in [0, 1]
    pub fn radiance(&self, reflectance: f64) -> f64 {
        let y = reflectance / (1.0 - self.xc * reflectance);
        (y + self.xb) / self.xa
    }
}

/// Radiative-transfer solver
///
/// Implementations must be deterministic: equal requests give equal
/// coefficients. Their errors are surfaced as [`AtmoError::Solver`].
pub trait RadiativeTransfer {
    fn run(&self, request: &SixSRequest) -> AtmoResult<SixSCoefficients>;
}

impl<F> RadiativeTransfer for F
where
    F: Fn(&SixSRequest) -> AtmoResult<SixSCoefficients>,
{
    fn run(&self, request: &SixSRequest) -> AtmoResult<SixSCoefficients> {
        self(request)
    }
}

/// Coefficients of every band at one elevation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationLutEntry {
    pub elevation: f64,
    pub coefficients: Vec<SixSCoefficients>,
}

/// Coefficients of every band at one AOT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AotLutEntry {
    pub aot: f64,
    pub coefficients: Vec<SixSCoefficients>,
}

/// AOT sweep at one elevation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationAotLutEntry {
    pub elevation: f64,
    pub aot_entries: Vec<AotLutEntry>,
}

/// Grid spacing of the lookup tables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LutParams {
    pub elevation_step: f64, // Metres
    pub aot_step: f64,
}

impl Default for LutParams {
    fn default() -> Self {
        Self {
            elevation_step: 100.0,
            aot_step: 0.05,
        }
    }
}

/// `ceil((max - min) / step)`, treating float noise on exact multiples as exact
pub fn step_span(min: f64, max: f64, step: f64) -> AtmoResult<usize> {
    if step.is_nan() || step <= 0.0 || !min.is_finite() || !max.is_finite() {
        return Err(AtmoError::InvalidParameter(format!(
            "Cannot step from {} to {} by {}",
            min, max, step
        )));
    }
    if max < min {
        return Err(AtmoError::InvalidParameter(format!(
            "Range maximum {} is below minimum {}",
            max, min
        )));
    }
    let ratio = (max - min) / step;
    let nearest = ratio.round();
    let span = if (ratio - nearest).abs() < 1e-9 { nearest } else { ratio.ceil() };
    Ok(span as usize)
}

/// Number of elevations in a 1D table: `ceil((max - min) / step) + 1`
pub fn elevation_step_count(min: f64, max: f64, step: f64) -> AtmoResult<usize> {
    Ok(step_span(min, max, step)? + 1)
}

/// Number of AOTs per elevation in a 2D table: `ceil((max - min) / step) + 2`
pub fn aot_lut_step_count(min: f64, max: f64, step: f64) -> AtmoResult<usize> {
    Ok(step_span(min, max, step)? + 2)
}

/// Walks the lookup-table grids for a fixed set of bands
#[derive(Debug, Clone)]
pub struct LutBuilder {
    params: SixSParams,
    geometry: SixSGeometry,
    bands: Vec<SpectralBand>,
    lut_params: LutParams,
}

impl LutBuilder {
    pub fn new(params: SixSParams, geometry: SixSGeometry, bands: Vec<SpectralBand>) -> Self {
        Self {
            params,
            geometry,
            bands,
            lut_params: LutParams::default(),
        }
    }

    pub fn with_lut_params(mut self, lut_params: LutParams) -> Self {
        self.lut_params = lut_params;
        self
    }

    pub fn params(&self) -> &SixSParams {
        &self.params
    }

    pub fn bands(&self) -> &[SpectralBand] {
        &self.bands
    }

    /// Request for one band at an altitude (metres) and AOT
    pub fn request(&self, band: &SpectralBand, elevation: f64, aot550: f64) -> SixSRequest {
        SixSRequest {
            params: self.params.clone(),
            geometry: self.geometry,
            altitude_km: elevation / 1000.0,
            aot550,
            band: band.clone(),
        }
    }

    /// One solver call per band
    pub fn coefficients<S: RadiativeTransfer + ?Sized>(
        &self,
        solver: &S,
        elevation: f64,
        aot550: f64,
    ) -> AtmoResult<Vec<SixSCoefficients>> {
        self.bands
            .iter()
            .map(|band| solver.run(&self.request(band, elevation, aot550)))
            .collect()
    }

    /// Elevation-only table at a fixed AOT
    pub fn build_elevation_lut<S: RadiativeTransfer + ?Sized>(
        &self,
        solver: &S,
        aot550: f64,
        min_elevation: f64,
        max_elevation: f64,
    ) -> AtmoResult<Vec<ElevationLutEntry>> {
        let step = self.lut_params.elevation_step;
        let count = elevation_step_count(min_elevation, max_elevation, step)?;
        log::info!(
            "Building elevation LUT: {} elevations from {} to {} (AOT {})",
            count,
            min_elevation,
            max_elevation,
            aot550
        );

        let mut lut = Vec::with_capacity(count);
        for i in 0..count {
            let elevation = min_elevation + i as f64 * step;
            log::debug!("Elevation LUT entry {} of {}: {} m", i + 1, count, elevation);
            lut.push(ElevationLutEntry {
                elevation,
                coefficients: self.coefficients(solver, elevation, aot550)?,
            });
        }
        Ok(lut)
    }

    /// Elevation x AOT table
    pub fn build_elevation_aot_lut<S: RadiativeTransfer + ?Sized>(
        &self,
        solver: &S,
        min_elevation: f64,
        max_elevation: f64,
        min_aot: f64,
        max_aot: f64,
    ) -> AtmoResult<Vec<ElevationAotLutEntry>> {
        let elevation_step = self.lut_params.elevation_step;
        let aot_step = self.lut_params.aot_step;
        let elevation_count = elevation_step_count(min_elevation, max_elevation, elevation_step)?;
        let aot_count = aot_lut_step_count(min_aot, max_aot, aot_step)?;
        log::info!(
            "Building elevation x AOT LUT: {} elevations x {} AOTs",
            elevation_count,
            aot_count
        );

        let mut lut = Vec::with_capacity(elevation_count);
        for i in 0..elevation_count {
            let elevation = min_elevation + i as f64 * elevation_step;
            let mut aot_entries = Vec::with_capacity(aot_count);
            for j in 0..aot_count {
                let aot = min_aot + j as f64 * aot_step;
                aot_entries.push(AotLutEntry {
                    aot,
                    coefficients: self.coefficients(solver, elevation, aot)?,
                });
            }
            log::debug!("Elevation {} m: {} AOT entries", elevation, aot_entries.len());
            lut.push(ElevationAotLutEntry { elevation, aot_entries });
        }
        Ok(lut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn geometry() -> SixSGeometry {
        SixSGeometry {
            month: 6,
            day: 15,
            gmt_decimal_hour: 10.5,
            latitude: 9.5,
            longitude: -69.5,
        }
    }

    fn bands() -> Vec<SpectralBand> {
        vec![
            SpectralBand::Predefined("LANDSAT_MSS_B1".to_string()),
            SpectralBand::Predefined("LANDSAT_MSS_B2".to_string()),
        ]
    }

    fn solver(request: &SixSRequest) -> AtmoResult<SixSCoefficients> {
        Ok(SixSCoefficients {
            xa: 0.002 + request.altitude_km * 1e-4,
            xb: 0.05 + request.aot550,
            xc: 0.1,
        })
    }

    #[test]
    fn test_step_counts() {
        assert_eq!(elevation_step_count(0.0, 1000.0, 100.0).unwrap(), 11);
        assert_eq!(elevation_step_count(0.0, 1050.0, 100.0).unwrap(), 12);
        assert_eq!(elevation_step_count(200.0, 200.0, 100.0).unwrap(), 1);
        assert_eq!(aot_lut_step_count(0.05, 0.5, 0.05).unwrap(), 11);
        assert!(elevation_step_count(100.0, 0.0, 100.0).is_err());
        assert!(aot_lut_step_count(0.0, 0.5, 0.0).is_err());
    }

    #[test]
    fn test_elevation_lut() {
        let builder = LutBuilder::new(SixSParams::default(), geometry(), bands());
        let calls = Cell::new(0usize);
        let counting = |request: &SixSRequest| {
            calls.set(calls.get() + 1);
            solver(request)
        };

        let lut = builder.build_elevation_lut(&counting, 0.25, -30.0, 1234.0).unwrap();
        assert_eq!(lut.len(), 14);
        assert_eq!(calls.get(), 14 * 2);
        for pair in lut.windows(2) {
            assert!((pair[1].elevation - pair[0].elevation - 100.0).abs() < 1e-9);
        }
        assert!(lut[lut.len() - 1].elevation >= 1234.0);
        assert_eq!(lut[0].coefficients.len(), 2);
        assert!((lut[10].coefficients[0].xa - (0.002 + 0.97 * 1e-4)).abs() < 1e-12);
    }

    #[test]
    fn test_elevation_aot_lut() {
        let builder = LutBuilder::new(SixSParams::default(), geometry(), bands());
        let lut = builder
            .build_elevation_aot_lut(&solver, 0.0, 250.0, 0.05, 0.5)
            .unwrap();
        assert_eq!(lut.len(), 4);
        for entry in &lut {
            assert_eq!(entry.aot_entries.len(), 11);
            assert!((entry.aot_entries[1].aot - 0.1).abs() < 1e-12);
        }

        let again = builder
            .build_elevation_aot_lut(&solver, 0.0, 250.0, 0.05, 0.5)
            .unwrap();
        assert_eq!(lut, again);
    }

    #[test]
    fn test_solver_error_propagates() {
        let builder = LutBuilder::new(SixSParams::default(), geometry(), bands());
        let failing = |_: &SixSRequest| -> AtmoResult<SixSCoefficients> {
            Err(AtmoError::Solver("6S exited with status 1".to_string()))
        };
        let err = builder.build_elevation_lut(&failing, 0.1, 0.0, 100.0).unwrap_err();
        assert_eq!(err.to_string(), "6S exited with status 1");
    }

    #[test]
    fn test_reflectance_radiance_inverse() {
        let coeffs = SixSCoefficients { xa: 0.003, xb: 0.1, xc: 0.15 };
        let rho = coeffs.reflectance(80.0);
        assert!((coeffs.radiance(rho) - 80.0).abs() < 1e-9);
    }
}
