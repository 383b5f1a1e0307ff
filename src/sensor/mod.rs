//! Sensor abstraction
//!
//! Every supported sensor implements [`Sensor`]. A sensor is built once
//! from its header into an immutable [`SensorState`] which every later
//! step reads. Steps a sensor cannot perform return
//! [`AtmoError::Unsupported`].

pub mod epsg;
pub mod landsat1_mss;
pub mod metadata;

use crate::core::aot::{AotEstimate, AotEstimator, AotSearchParams};
use crate::core::clear_sky::{ClearSkyClassifier, ClearSkyParams};
use crate::core::calibrate::ReflectanceScaling;
use crate::core::dos::{DosEngine, DosParams};
use crate::core::segmentation::{clump, object_extents, ObjectExtent};
use crate::core::sixs::{
    ElevationAotLutEntry, ElevationLutEntry, LutBuilder, RadiativeTransfer, SixSCoefficients, SixSGeometry,
    SixSParams, SpectralBand,
};
use crate::core::terrain_shadow::{topographic_shadow_mask, ShadowMaskParams};
use crate::io::footprint::{FootprintFeature, FootprintSink};
use crate::io::projection::{GdalPointTransform, PointTransform, SrsDefinition};
use crate::io::raster::RasterStore;
use crate::io::scratch::ScratchDir;
use crate::types::{AtmoError, AtmoResult, Raster};
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use landsat1_mss::Landsat1Mss;
pub use metadata::{MetadataInputs, SoftwareInfo};

/// A point in either geographic (x = lon, y = lat) or projected space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub x: f64,
    pub y: f64,
}

/// Scene corners
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Corners {
    pub tl: Corner,
    pub tr: Corner,
    pub bl: Corner,
    pub br: Corner,
}

impl Corners {
    /// Midpoint of the TL/BR diagonal
    pub fn centre(&self) -> Corner {
        Corner {
            x: self.tl.x + (self.br.x - self.tl.x) / 2.0,
            y: self.br.y + (self.tl.y - self.br.y) / 2.0,
        }
    }
}

/// Scene description filled in by header parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub sensor: String,
    pub acquisition_time: NaiveDateTime,
    pub geographic: Corners,
    pub projected: Corners,
    pub lat_centre: f64,
    pub lon_centre: f64,
    pub x_centre: f64,
    pub y_centre: f64,
    pub solar_zenith: f64,
    pub solar_azimuth: f64,
    pub sensor_zenith: f64,
    pub sensor_azimuth: f64,
    /// EPSG code of the product projection, if known
    pub epsg: Option<u32>,
    /// User supplied WKT, overrides `epsg`
    pub in_wkt: Option<String>,
    pub header_path: PathBuf,
    pub debug: bool,
}

impl SensorState {
    pub fn new(sensor: &str) -> Self {
        Self {
            sensor: sensor.to_string(),
            acquisition_time: NaiveDateTime::default(),
            geographic: Corners::default(),
            projected: Corners::default(),
            lat_centre: 0.0,
            lon_centre: 0.0,
            x_centre: 0.0,
            y_centre: 0.0,
            solar_zenith: 0.0,
            solar_azimuth: 0.0,
            sensor_zenith: 0.0,
            sensor_azimuth: 0.0,
            epsg: None,
            in_wkt: None,
            header_path: PathBuf::new(),
            debug: false,
        }
    }

    /// Set both centres from the corner diagonals
    pub fn update_centres(&mut self) {
        let geo = self.geographic.centre();
        self.lon_centre = geo.x;
        self.lat_centre = geo.y;
        let proj = self.projected.centre();
        self.x_centre = proj.x;
        self.y_centre = proj.y;
    }

    pub fn day_of_year(&self) -> u32 {
        self.acquisition_time.ordinal()
    }

    /// Solver geometry at the scene centre
    pub fn sixs_geometry(&self) -> SixSGeometry {
        let t = &self.acquisition_time;
        SixSGeometry {
            month: t.month(),
            day: t.day(),
            gmt_decimal_hour: t.hour() as f64 + t.minute() as f64 / 60.0,
            latitude: self.lat_centre,
            longitude: self.lon_centre,
        }
    }

    /// Projection of the input imagery
    pub fn source_srs(&self) -> AtmoResult<SrsDefinition> {
        match (&self.in_wkt, self.epsg) {
            (Some(wkt), _) => Ok(SrsDefinition::Wkt(wkt.clone())),
            (None, Some(code)) => Ok(SrsDefinition::Epsg(code)),
            (None, None) => Err(AtmoError::InvalidFormat(format!(
                "No projection known for {} scene",
                self.sensor
            ))),
        }
    }
}

/// Reprojected, grid snapped scene bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReprojBBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Co-registered scene rasters used by AOT estimation
#[derive(Debug, Clone, Copy)]
pub struct SceneRasters<'a> {
    pub radiance: &'a Raster,
    pub toa: &'a Raster,
    pub dem: &'a Raster,
}

/// Destination for debug intermediates
pub struct Intermediates<'a> {
    pub scratch: &'a ScratchDir,
    pub store: &'a mut dyn RasterStore,
}

impl Intermediates<'_> {
    pub fn keep(&mut self, name: &str, raster: &Raster) -> AtmoResult<()> {
        self.scratch.keep(self.store, name, raster)
    }
}

pub fn unsupported(sensor: &str, operation: &str) -> AtmoError {
    AtmoError::Unsupported {
        sensor: sensor.to_string(),
        operation: operation.to_string(),
    }
}

/// Value rounded to two decimals with sign and decimal point removed,
/// e.g. -69.5 -> "695", 10.0 -> "100"
pub fn position_token(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let text = if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    };
    text.replace(['.', '-'], "")
}

/// `{sensor}_{YYYYMMDD}_lat{lat}lon{lon}`
pub fn default_base_name(state: &SensorState) -> String {
    format!(
        "{}_{}_lat{}lon{}",
        state.sensor,
        state.acquisition_time.format("%Y%m%d"),
        position_token(state.lat_centre),
        position_token(state.lon_centre)
    )
}

/// Extreme points of each connected valid-data region
pub fn footprint_extents(valid_mask: &Raster) -> AtmoResult<Vec<ObjectExtent>> {
    let mask = valid_mask.band(0)?.mapv(|v| v > 0.0);
    let (labels, n) = clump(&mask);
    Ok(object_extents(&labels, n, &valid_mask.geo_transform))
}

/// Closed footprint ring: leftmost, bottom-most, rightmost, top-most
pub fn footprint_ring(e: &ObjectExtent) -> Vec<(f64, f64)> {
    vec![
        (e.min_x_x, e.min_x_y),
        (e.min_y_x, e.min_y_y),
        (e.max_x_x, e.max_x_y),
        (e.max_y_x, e.max_y_y),
        (e.min_x_x, e.min_x_y),
    ]
}

/// Reproject the TL and BR corners and snap outward to the pixel grid
pub fn reproject_bbox(
    state: &SensorState,
    transform: &dyn PointTransform,
    x_res: f64,
    y_res: f64,
) -> AtmoResult<ReprojBBox> {
    let y_res = y_res.abs();
    if x_res <= 0.0 || y_res == 0.0 {
        return Err(AtmoError::InvalidParameter(format!(
            "Pixel resolution must be non-zero, got ({}, {})",
            x_res, y_res
        )));
    }
    let (tl_x, tl_y) = transform.transform(state.projected.tl.x, state.projected.tl.y)?;
    let (br_x, br_y) = transform.transform(state.projected.br.x, state.projected.br.y)?;
    let bbox = ReprojBBox {
        min_x: (tl_x / x_res).floor() * x_res,
        max_y: (tl_y / y_res).ceil() * y_res,
        max_x: (br_x / x_res).ceil() * x_res,
        min_y: (br_y / y_res).floor() * y_res,
    };
    log::debug!(
        "Reprojected TL ({}, {}) BR ({}, {}) -> {:?}",
        tl_x,
        tl_y,
        br_x,
        br_y,
        bbox
    );
    Ok(bbox)
}

/// Behaviour every sensor provides
pub trait Sensor {
    fn state(&self) -> &SensorState;

    fn sensor_id(&self) -> &str {
        &self.state().sensor
    }

    // Input checks and preparation

    /// True when every input file the header names is present
    fn expected_image_data_present(&self) -> bool;

    fn check_input_image_valid(&self) -> AtmoResult<()> {
        if !self.expected_image_data_present() {
            return Err(AtmoError::Precondition(format!(
                "Not all of the {} input images are present",
                self.sensor_id()
            )));
        }
        Ok(())
    }

    fn mask_input_images(&self) -> bool {
        false
    }

    fn img_need_mosaicking(&self) -> bool {
        false
    }

    fn has_thermal(&self) -> bool {
        false
    }

    fn mosaic_image_tiles(&self, store: &mut dyn RasterStore, output_dir: &Path) -> AtmoResult<()>;

    fn apply_image_data_mask(&self, image: &Raster, mask: &Raster) -> AtmoResult<Raster>;

    fn generate_output_base_name(&self) -> String {
        default_base_name(self.state())
    }

    // Radiometry

    /// Reflective bands as at-sensor radiance
    fn convert_image_to_radiance(&self, store: &dyn RasterStore) -> AtmoResult<Raster>;

    fn generate_image_saturation_mask(&self, store: &dyn RasterStore) -> AtmoResult<Raster>;

    /// Mask of pixels with data in every band, when the sensor defines one
    fn generate_valid_image_data_mask(&self, _radiance: &Raster) -> AtmoResult<Option<Raster>> {
        Ok(None)
    }

    fn convert_thermal_to_brightness(&self, thermal_radiance: &Raster, scale: f64) -> AtmoResult<Raster>;

    fn convert_image_to_toa_refl(&self, radiance: &Raster, scale: f64) -> AtmoResult<Raster>;

    fn generate_cloud_mask(
        &self,
        toa: &Raster,
        saturation: &Raster,
        thermal: Option<&Raster>,
        valid: Option<&Raster>,
        scale: f64,
    ) -> AtmoResult<Raster>;

    // Atmospheric correction

    /// Spectral response of each reflective band, in band order
    fn spectral_bands(&self) -> Vec<SpectralBand>;

    fn lut_builder(&self, params: &SixSParams) -> LutBuilder {
        LutBuilder::new(params.clone(), self.state().sixs_geometry(), self.spectral_bands())
    }

    /// One solver run per band at a target altitude in metres
    fn calc_6s_coefficients(
        &self,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        altitude: f64,
        aot: f64,
    ) -> AtmoResult<Vec<SixSCoefficients>> {
        self.lut_builder(params).coefficients(solver, altitude, aot)
    }

    fn build_elevation_lut(
        &self,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        aot: f64,
        min_elevation: f64,
        max_elevation: f64,
    ) -> AtmoResult<Vec<ElevationLutEntry>> {
        self.lut_builder(params)
            .build_elevation_lut(solver, aot, min_elevation, max_elevation)
    }

    fn build_elevation_aot_lut(
        &self,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        elevation_range: (f64, f64),
        aot_range: (f64, f64),
    ) -> AtmoResult<Vec<ElevationAotLutEntry>> {
        self.lut_builder(params).build_elevation_aot_lut(
            solver,
            elevation_range.0,
            elevation_range.1,
            aot_range.0,
            aot_range.1,
        )
    }

    fn convert_image_to_surface_refl_sgl_param(
        &self,
        radiance: &Raster,
        coefficients: &[SixSCoefficients],
        scaling: &ReflectanceScaling,
    ) -> AtmoResult<Raster>;

    fn convert_image_to_surface_refl_dem_elev_lut(
        &self,
        radiance: &Raster,
        dem: &Raster,
        lut: &[ElevationLutEntry],
        scaling: &ReflectanceScaling,
    ) -> AtmoResult<Raster>;

    fn convert_image_to_surface_refl_aot_dem_elev_lut(
        &self,
        radiance: &Raster,
        dem: &Raster,
        aot: &Raster,
        lut: &[ElevationAotLutEntry],
        scaling: &ReflectanceScaling,
    ) -> AtmoResult<Raster>;

    // Dark object subtraction

    /// DOS with the sensor's own choice of offsets; `offsets` replaces the
    /// dark-target surfaces when given
    fn convert_image_to_reflectance_dark_subtract(
        &self,
        toa: &Raster,
        dos: &DosParams,
        offsets: Option<&Raster>,
        intermediates: Option<&mut Intermediates>,
    ) -> AtmoResult<Raster>;

    /// Scalar offset per band, from the image when `offsets` is `None`
    fn convert_image_to_reflectance_simple_dark_subtract(
        &self,
        toa: &Raster,
        dos: &DosParams,
        offsets: Option<&[f32]>,
    ) -> AtmoResult<Raster> {
        let engine = DosEngine::with_params(dos.clone());
        match offsets {
            Some(offsets) => engine.apply_single_offsets(toa, offsets),
            None => Ok(engine.simple_dos(toa)?.0),
        }
    }

    /// Simple DOS of a single band with the offset used
    fn convert_image_band_to_reflectance_simple_dark_subtract(
        &self,
        toa: &Raster,
        dos: &DosParams,
        band_index: usize,
    ) -> AtmoResult<(Raster, f32)> {
        DosEngine::with_params(dos.clone()).simple_band_dos(toa, band_index)
    }

    /// Dark-target DOS of a single band, thresholded as `dos` says
    fn perform_dos_on_single_band(&self, toa: &Raster, dos: &DosParams, band_index: usize) -> AtmoResult<Raster> {
        let (mut band, targets) = DosEngine::with_params(dos.clone()).band_dos(toa, band_index)?;
        log::info!(
            "Band {}: {} dark targets at percentile {}",
            band_index + 1,
            targets.samples.len(),
            targets.percentile
        );
        if let Some(name) = toa.band_names.get(band_index) {
            band.band_names = vec![name.clone()];
        }
        Ok(band)
    }

    // Aerosol optical thickness

    fn find_ddv_targets(&self, toa: &Raster) -> AtmoResult<Raster>;

    fn estimate_image_to_aod_using_ddv(
        &self,
        scene: SceneRasters,
        shadow: Option<&Raster>,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        search: &AotSearchParams,
    ) -> AtmoResult<Raster>;

    fn estimate_image_to_aod_using_dos(
        &self,
        scene: SceneRasters,
        shadow: Option<&Raster>,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        search: &AotSearchParams,
    ) -> AtmoResult<Raster>;

    /// One AOT for the whole scene
    fn estimate_single_aot_from_dos(
        &self,
        scene: SceneRasters,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        search: &AotSearchParams,
    ) -> AtmoResult<f64>;

    /// Single AOT from the dark target of one band
    fn estimate_single_aot_from_dos_band(
        &self,
        scene: SceneRasters,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        search: &AotSearchParams,
        band_index: usize,
    ) -> AtmoResult<AotEstimate> {
        let bands = self.spectral_bands();
        let band = bands.get(band_index).ok_or_else(|| {
            AtmoError::InvalidParameter(format!(
                "{} has no band {}",
                self.sensor_id(),
                band_index + 1
            ))
        })?;
        let dem = scene.dem.band(0)?.to_owned();
        AotEstimator::with_params(search.clone()).estimate_from_dos(
            solver,
            &self.lut_builder(params),
            band,
            scene.radiance,
            scene.toa,
            band_index,
            &dem,
        )
    }

    // Outputs

    fn set_band_names(&self, image: &mut Raster) -> AtmoResult<()>;

    fn generate_metadata(&self, inputs: &MetadataInputs, valid_mask: Option<&Raster>) -> AtmoResult<serde_json::Value> {
        let extents = valid_mask.map(footprint_extents).transpose()?;
        Ok(metadata::build_metadata(
            self.state(),
            &self.generate_output_base_name(),
            extents.as_deref(),
            inputs,
        ))
    }

    fn generate_metadata_file(&self, path: &Path, inputs: &MetadataInputs, valid_mask: Option<&Raster>) -> AtmoResult<()> {
        let doc = self.generate_metadata(inputs, valid_mask)?;
        metadata::write_metadata_file(path, &doc)
    }

    /// One polygon per connected region of the valid mask; returns the count
    fn generate_image_footprint(&self, valid_mask: &Raster, sink: &mut dyn FootprintSink) -> AtmoResult<usize> {
        log::info!("Creating vector footprint");
        let state = self.state();
        let t = &state.acquisition_time;
        let base_name = self.generate_output_base_name();
        let features: Vec<FootprintFeature> = footprint_extents(valid_mask)?
            .iter()
            .map(|e| FootprintFeature {
                ring: footprint_ring(e),
                year: t.year(),
                month: t.month() as i32,
                day: t.day() as i32,
                base_name: base_name.clone(),
                sol_zen: state.solar_zenith,
                sol_azi: state.solar_azimuth,
                sen_zen: state.sensor_zenith,
                sen_azi: state.sensor_azimuth,
                cen_lat: state.lat_centre,
                cen_lon: state.lon_centre,
            })
            .collect();
        sink.write_footprints(&valid_mask.projection, &features)?;
        Ok(features.len())
    }

    fn generate_topo_direct_shadow_mask(&self, dem: &Raster, params: &ShadowMaskParams) -> AtmoResult<Raster> {
        let state = self.state();
        topographic_shadow_mask(dem, state.solar_zenith, state.solar_azimuth, params)
    }

    fn generate_clear_sky_mask(
        &self,
        classifier: &dyn ClearSkyClassifier,
        clouds: &Raster,
        valid: &Raster,
        params: &ClearSkyParams,
    ) -> AtmoResult<Raster> {
        classifier.classify(clouds, valid, params)
    }

    fn reproj_bbox(&self, transform: &dyn PointTransform, x_res: f64, y_res: f64) -> AtmoResult<ReprojBBox> {
        reproject_bbox(self.state(), transform, x_res, y_res)
    }

    /// OSR transform from the scene projection into `target`
    fn reprojection_transform(&self, target: &SrsDefinition) -> AtmoResult<GdalPointTransform> {
        GdalPointTransform::new(&self.state().source_srs()?, target)
    }

    fn clean_follow_processing(&self) -> AtmoResult<()> {
        Ok(())
    }
}

/// Options shared by all sensor constructors
#[derive(Debug, Clone, Default)]
pub struct SensorOptions {
    pub header: PathBuf,
    /// Overrides the projection derived from the header
    pub wkt: Option<String>,
    pub debug: bool,
}

pub type SensorConstructor = fn(&SensorOptions) -> AtmoResult<Box<dyn Sensor>>;

/// Sensor identifiers mapped to header driven constructors
#[derive(Clone, Default)]
pub struct SensorRegistry {
    constructors: BTreeMap<String, SensorConstructor>,
}

impl SensorRegistry {
    /// Registry with no sensors
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in sensor
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("ls1mss", landsat1_mss::construct);
        registry.register("LS1MSS", landsat1_mss::construct);
        registry
    }

    pub fn register(&mut self, id: &str, constructor: SensorConstructor) {
        self.constructors.insert(id.to_string(), constructor);
    }

    pub fn ids(&self) -> Vec<&str> {
        self.constructors.keys().map(|k| k.as_str()).collect()
    }

    pub fn create(&self, id: &str, options: &SensorOptions) -> AtmoResult<Box<dyn Sensor>> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| AtmoError::InvalidParameter(format!("Unknown sensor: {}", id)))?;
        log::info!("Creating {} sensor from {}", id, options.header.display());
        constructor(options)
    }
}
