//! Landsat-1 Multispectral Scanner
//!
//! Reads the Landsat MTL header of a Level-1 MSS product. The four
//! reflective bands (MSS 4 to 7) are exposed as Green, Red, NIR1 and NIR2.

use crate::core::aot::AotSearchParams;
use crate::core::calibrate::{
    apply_elevation_aot_lut, apply_elevation_lut, apply_single_coefficients, dn_to_radiance, radiance_to_toa,
    saturation_mask, valid_data_mask, RadianceScaling, ReflectanceScaling,
};
use crate::core::dos::{DosEngine, DosParams};
use crate::core::sixs::{
    ElevationAotLutEntry, ElevationLutEntry, RadiativeTransfer, SixSCoefficients, SixSParams, SpectralBand,
};
use crate::io::header::KeyValueHeader;
use crate::io::raster::RasterStore;
use crate::sensor::epsg::{utm_epsg, Hemisphere};
use crate::sensor::{
    default_base_name, unsupported, Corner, Corners, Intermediates, SceneRasters, Sensor, SensorOptions, SensorState,
};
use crate::types::{AtmoError, AtmoResult, BandImage, Raster};
use std::path::{Path, PathBuf};

pub const SENSOR_NAME: &str = "LS1MSS";

/// Output band names, MSS bands 4 to 7
pub const BAND_NAMES: [&str; 4] = ["Green", "Red", "NIR1", "NIR2"];

/// Exo-atmospheric solar irradiance per band (W m-2 um-1)
pub const SOLAR_IRRADIANCE: [f64; 4] = [1823.0, 1559.0, 1276.0, 880.1];

const SPECTRAL_BANDS: [&str; 4] = ["LANDSAT_MSS_B1", "LANDSAT_MSS_B2", "LANDSAT_MSS_B3", "LANDSAT_MSS_B4"];

/// Header numbering of the reflective bands
const HEADER_BANDS: [u32; 4] = [4, 5, 6, 7];

/// One reflective band of the product
#[derive(Debug, Clone, PartialEq)]
pub struct MssBand {
    pub file: PathBuf,
    pub scaling: RadianceScaling,
}

/// Landsat-1 MSS scene
#[derive(Debug, Clone)]
pub struct Landsat1Mss {
    state: SensorState,
    row: u32,
    path: u32,
    bands: Vec<MssBand>,
}

pub(crate) fn construct(options: &SensorOptions) -> AtmoResult<Box<dyn Sensor>> {
    Ok(Box::new(Landsat1Mss::from_options(options)?))
}

fn corner(header: &KeyValueHeader, x_key: &str, y_key: &str) -> AtmoResult<Corner> {
    Ok(Corner {
        x: header.parse_value(x_key)?,
        y: header.parse_value(y_key)?,
    })
}

impl Landsat1Mss {
    pub fn from_options(options: &SensorOptions) -> AtmoResult<Self> {
        let header = KeyValueHeader::from_file(&options.header)?;
        let mut sensor = Self::from_header(&header, &options.header)?;
        sensor.state.in_wkt = options.wkt.clone();
        sensor.state.debug = options.debug;
        Ok(sensor)
    }

    /// Build the scene from parsed MTL fields; band files are resolved
    /// against the directory of `header_path`
    pub fn from_header(header: &KeyValueHeader, header_path: &Path) -> AtmoResult<Self> {
        log::info!("Extracting Landsat-1 MSS header values");
        let spacecraft = header.get("SPACECRAFT_ID")?;
        let instrument = header.get("SENSOR_ID")?;
        if spacecraft != "LANDSAT_1" || instrument != "MSS" {
            return Err(AtmoError::InvalidFormat(format!(
                "Unrecognised spacecraft and sensor combination: {} {}",
                spacecraft, instrument
            )));
        }

        let mut state = SensorState::new(SENSOR_NAME);
        state.header_path = header_path.to_path_buf();
        let row: u32 = header.parse_value("WRS_ROW")?;
        let path: u32 = header.parse_value("WRS_PATH")?;

        let date = header.date("DATE_ACQUIRED")?;
        let time = header.time("SCENE_CENTER_TIME")?;
        state.acquisition_time = date.and_time(time);

        let sun_elevation: f64 = header.parse_value("SUN_ELEVATION")?;
        state.solar_zenith = 90.0 - sun_elevation;
        state.solar_azimuth = header.parse_value("SUN_AZIMUTH")?;

        state.geographic = Corners {
            tl: corner(header, "CORNER_UL_LON_PRODUCT", "CORNER_UL_LAT_PRODUCT")?,
            tr: corner(header, "CORNER_UR_LON_PRODUCT", "CORNER_UR_LAT_PRODUCT")?,
            bl: corner(header, "CORNER_LL_LON_PRODUCT", "CORNER_LL_LAT_PRODUCT")?,
            br: corner(header, "CORNER_LR_LON_PRODUCT", "CORNER_LR_LAT_PRODUCT")?,
        };
        state.projected = Corners {
            tl: corner(header, "CORNER_UL_PROJECTION_X_PRODUCT", "CORNER_UL_PROJECTION_Y_PRODUCT")?,
            tr: corner(header, "CORNER_UR_PROJECTION_X_PRODUCT", "CORNER_UR_PROJECTION_Y_PRODUCT")?,
            bl: corner(header, "CORNER_LL_PROJECTION_X_PRODUCT", "CORNER_LL_PROJECTION_Y_PRODUCT")?,
            br: corner(header, "CORNER_LR_PROJECTION_X_PRODUCT", "CORNER_LR_PROJECTION_Y_PRODUCT")?,
        };

        let projection = header.get("MAP_PROJECTION")?;
        let datum = header.get("DATUM")?;
        let ellipsoid = header.get("ELLIPSOID")?;
        if projection != "UTM" || datum != "WGS84" || ellipsoid != "WGS84" {
            return Err(AtmoError::InvalidFormat(format!(
                "Expecting UTM with datum and ellipsoid WGS84, got {} / {} / {}",
                projection, datum, ellipsoid
            )));
        }
        let zone: u32 = header.parse_value("UTM_ZONE")?;
        state.epsg = Some(utm_epsg(zone, Hemisphere::North)?);

        let p = &state.projected;
        if !(p.tl.x == p.bl.x && p.tl.y == p.tr.y && p.tr.x == p.br.x && p.bl.y == p.br.y) {
            return Err(AtmoError::InvalidFormat(
                "Image is not square in projected coordinates".to_string(),
            ));
        }
        state.update_centres();

        let dir = header_path.parent().unwrap_or_else(|| Path::new(""));
        let bands = HEADER_BANDS
            .iter()
            .zip(BAND_NAMES)
            .map(|(&n, name)| -> AtmoResult<MssBand> {
                Ok(MssBand {
                    file: dir.join(header.get(&format!("FILE_NAME_BAND_{}", n))?),
                    scaling: RadianceScaling {
                        name: name.to_string(),
                        qcal_min: header.parse_value(&format!("QUANTIZE_CAL_MIN_BAND_{}", n))?,
                        qcal_max: header.parse_value(&format!("QUANTIZE_CAL_MAX_BAND_{}", n))?,
                        l_min: header.parse_value(&format!("RADIANCE_MINIMUM_BAND_{}", n))?,
                        l_max: header.parse_value(&format!("RADIANCE_MAXIMUM_BAND_{}", n))?,
                    },
                })
            })
            .collect::<AtmoResult<Vec<_>>>()?;

        log::info!(
            "{} scene r{} p{} acquired {}, solar zenith {:.2}",
            SENSOR_NAME,
            row,
            path,
            state.acquisition_time,
            state.solar_zenith
        );
        Ok(Self { state, row, path, bands })
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn path(&self) -> u32 {
        self.path
    }

    pub fn bands(&self) -> &[MssBand] {
        &self.bands
    }

    fn scalings(&self) -> Vec<RadianceScaling> {
        self.bands.iter().map(|b| b.scaling.clone()).collect()
    }

    /// Stack the first band of every band file
    fn read_dn(&self, store: &dyn RasterStore) -> AtmoResult<Raster> {
        let first = store.read(&self.bands[0].file)?;
        let mut layers: Vec<BandImage> = Vec::with_capacity(self.bands.len());
        for band in &self.bands {
            let raster = store.read(&band.file)?;
            first.check_same_grid(&raster)?;
            layers.push(raster.band(0)?.to_owned());
        }
        Ok(Raster::from_bands(&layers, &first)?.with_band_names(&BAND_NAMES))
    }

    fn named(&self, mut image: Raster) -> AtmoResult<Raster> {
        self.set_band_names(&mut image)?;
        Ok(image)
    }

    fn first_band(raster: &Raster) -> AtmoResult<BandImage> {
        Ok(raster.band(0)?.to_owned())
    }
}

impl Sensor for Landsat1Mss {
    fn state(&self) -> &SensorState {
        &self.state
    }

    fn expected_image_data_present(&self) -> bool {
        self.bands.iter().all(|b| b.file.exists())
    }

    fn mosaic_image_tiles(&self, _store: &mut dyn RasterStore, _output_dir: &Path) -> AtmoResult<()> {
        Err(unsupported(SENSOR_NAME, "Mosaicking image tiles"))
    }

    fn apply_image_data_mask(&self, _image: &Raster, _mask: &Raster) -> AtmoResult<Raster> {
        Err(unsupported(SENSOR_NAME, "Applying an image data mask"))
    }

    fn generate_output_base_name(&self) -> String {
        format!("{}_r{}p{}", default_base_name(&self.state), self.row, self.path)
    }

    fn convert_image_to_radiance(&self, store: &dyn RasterStore) -> AtmoResult<Raster> {
        log::info!("Converting to radiance");
        let dn = self.read_dn(store)?;
        dn_to_radiance(&dn, &self.scalings())
    }

    fn generate_image_saturation_mask(&self, store: &dyn RasterStore) -> AtmoResult<Raster> {
        log::info!("Generating saturation mask");
        let dn = self.read_dn(store)?;
        let limits: Vec<f64> = self.bands.iter().map(|b| b.scaling.qcal_max).collect();
        Ok(saturation_mask(&dn, &limits)?.with_band_names(&BAND_NAMES))
    }

    fn generate_valid_image_data_mask(&self, radiance: &Raster) -> AtmoResult<Option<Raster>> {
        log::info!("Generating valid image data mask");
        valid_data_mask(radiance).map(Some)
    }

    fn convert_thermal_to_brightness(&self, _thermal_radiance: &Raster, _scale: f64) -> AtmoResult<Raster> {
        Err(unsupported(SENSOR_NAME, "Thermal brightness conversion"))
    }

    fn convert_image_to_toa_refl(&self, radiance: &Raster, scale: f64) -> AtmoResult<Raster> {
        log::info!("Converting to TOA reflectance");
        let toa = radiance_to_toa(
            radiance,
            &SOLAR_IRRADIANCE,
            self.state.solar_zenith,
            self.state.day_of_year(),
            scale,
        )?;
        self.named(toa)
    }

    fn generate_cloud_mask(
        &self,
        _toa: &Raster,
        _saturation: &Raster,
        _thermal: Option<&Raster>,
        _valid: Option<&Raster>,
        _scale: f64,
    ) -> AtmoResult<Raster> {
        Err(unsupported(SENSOR_NAME, "Cloud masking"))
    }

    fn spectral_bands(&self) -> Vec<SpectralBand> {
        SPECTRAL_BANDS
            .iter()
            .map(|b| SpectralBand::Predefined(b.to_string()))
            .collect()
    }

    fn convert_image_to_surface_refl_sgl_param(
        &self,
        radiance: &Raster,
        coefficients: &[SixSCoefficients],
        scaling: &ReflectanceScaling,
    ) -> AtmoResult<Raster> {
        log::info!("Converting to surface reflectance");
        self.named(apply_single_coefficients(radiance, coefficients, scaling)?)
    }

    fn convert_image_to_surface_refl_dem_elev_lut(
        &self,
        radiance: &Raster,
        dem: &Raster,
        lut: &[ElevationLutEntry],
        scaling: &ReflectanceScaling,
    ) -> AtmoResult<Raster> {
        log::info!("Converting to surface reflectance with an elevation LUT");
        let dem = Self::first_band(dem)?;
        self.named(apply_elevation_lut(radiance, &dem, lut, scaling)?)
    }

    fn convert_image_to_surface_refl_aot_dem_elev_lut(
        &self,
        radiance: &Raster,
        dem: &Raster,
        aot: &Raster,
        lut: &[ElevationAotLutEntry],
        scaling: &ReflectanceScaling,
    ) -> AtmoResult<Raster> {
        log::info!("Converting to surface reflectance with an elevation and AOT LUT");
        let dem = Self::first_band(dem)?;
        let aot = Self::first_band(aot)?;
        self.named(apply_elevation_aot_lut(radiance, &dem, &aot, lut, scaling)?)
    }

    fn convert_image_to_reflectance_dark_subtract(
        &self,
        toa: &Raster,
        dos: &DosParams,
        offsets: Option<&Raster>,
        intermediates: Option<&mut Intermediates>,
    ) -> AtmoResult<Raster> {
        let engine = DosEngine::with_params(dos.clone());
        let corrected = match offsets {
            Some(offsets) => {
                log::info!("Subtracting user supplied offsets");
                engine.apply_offset_surfaces(toa, offsets)?
            }
            None => {
                let (corrected, surfaces) = engine.spatial_dos(toa)?;
                if let Some(keep) = intermediates {
                    keep.keep("dos_offsets", &surfaces.offsets)?;
                    for (index, targets) in surfaces.targets.iter().enumerate() {
                        let labels = targets.objects.mapv(|l| l as f32);
                        keep.keep(&format!("dark_objects_b{}", index + 1), &Raster::from_band(labels, toa))?;
                    }
                }
                corrected
            }
        };
        self.named(corrected)
    }

    fn find_ddv_targets(&self, _toa: &Raster) -> AtmoResult<Raster> {
        Err(unsupported(SENSOR_NAME, "Finding DDV targets"))
    }

    fn estimate_image_to_aod_using_ddv(
        &self,
        _scene: SceneRasters,
        _shadow: Option<&Raster>,
        _solver: &dyn RadiativeTransfer,
        _params: &SixSParams,
        _search: &AotSearchParams,
    ) -> AtmoResult<Raster> {
        Err(unsupported(SENSOR_NAME, "AOD image estimation from DDV targets"))
    }

    fn estimate_image_to_aod_using_dos(
        &self,
        _scene: SceneRasters,
        _shadow: Option<&Raster>,
        _solver: &dyn RadiativeTransfer,
        _params: &SixSParams,
        _search: &AotSearchParams,
    ) -> AtmoResult<Raster> {
        Err(unsupported(SENSOR_NAME, "AOD image estimation from DOS"))
    }

    fn estimate_single_aot_from_dos(
        &self,
        scene: SceneRasters,
        solver: &dyn RadiativeTransfer,
        params: &SixSParams,
        search: &AotSearchParams,
    ) -> AtmoResult<f64> {
        // Green band
        let estimate = self.estimate_single_aot_from_dos_band(scene, solver, params, search, 0)?;
        log::info!(
            "Scene AOT {:.3} from {} dark pixels (discrepancy {:.4})",
            estimate.aot,
            estimate.object_pixels,
            estimate.discrepancy
        );
        Ok(estimate.aot)
    }

    fn set_band_names(&self, image: &mut Raster) -> AtmoResult<()> {
        if image.band_count() != BAND_NAMES.len() {
            return Err(AtmoError::InvalidParameter(format!(
                "{} images have {} bands, got {}",
                SENSOR_NAME,
                BAND_NAMES.len(),
                image.band_count()
            )));
        }
        image.band_names = BAND_NAMES.iter().map(|n| n.to_string()).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::MemoryRasterStore;
    use crate::types::GeoTransform;
    use chrono::{Datelike, Timelike};
    use ndarray::Array3;

    fn mtl_text() -> String {
        let mut text = String::from(
            r#"GROUP = L1_METADATA_FILE
  GROUP = PRODUCT_METADATA
    SPACECRAFT_ID = "LANDSAT_1"
    SENSOR_ID = "MSS"
    WRS_PATH = 15
    WRS_ROW = 30
    DATE_ACQUIRED = 1972-08-15
    SCENE_CENTER_TIME = "15:12:34.1230000Z"
    CORNER_UL_LAT_PRODUCT = 10.0
    CORNER_UL_LON_PRODUCT = -70.0
    CORNER_UR_LAT_PRODUCT = 10.0
    CORNER_UR_LON_PRODUCT = -69.0
    CORNER_LL_LAT_PRODUCT = 9.0
    CORNER_LL_LON_PRODUCT = -70.0
    CORNER_LR_LAT_PRODUCT = 9.0
    CORNER_LR_LON_PRODUCT = -69.0
    CORNER_UL_PROJECTION_X_PRODUCT = 500000.0
    CORNER_UL_PROJECTION_Y_PRODUCT = 1100000.0
    CORNER_UR_PROJECTION_X_PRODUCT = 610000.0
    CORNER_UR_PROJECTION_Y_PRODUCT = 1100000.0
    CORNER_LL_PROJECTION_X_PRODUCT = 500000.0
    CORNER_LL_PROJECTION_Y_PRODUCT = 990000.0
    CORNER_LR_PROJECTION_X_PRODUCT = 610000.0
    CORNER_LR_PROJECTION_Y_PRODUCT = 990000.0
  END_GROUP = PRODUCT_METADATA
  GROUP = IMAGE_ATTRIBUTES
    SUN_AZIMUTH = 120.5
    SUN_ELEVATION = 50.0
  END_GROUP = IMAGE_ATTRIBUTES
  GROUP = PROJECTION_PARAMETERS
    MAP_PROJECTION = "UTM"
    DATUM = "WGS84"
    ELLIPSOID = "WGS84"
    UTM_ZONE = 19
  END_GROUP = PROJECTION_PARAMETERS
"#,
        );
        for n in 4..=7 {
            text.push_str(&format!("    FILE_NAME_BAND_{n} = \"LM1_B{n}.TIF\"\n"));
            text.push_str(&format!("    QUANTIZE_CAL_MIN_BAND_{n} = 1\n"));
            text.push_str(&format!("    QUANTIZE_CAL_MAX_BAND_{n} = 127\n"));
            text.push_str(&format!("    RADIANCE_MINIMUM_BAND_{n} = 0.0\n"));
            text.push_str(&format!("    RADIANCE_MAXIMUM_BAND_{n} = 252.0\n"));
        }
        text.push_str("END_GROUP = L1_METADATA_FILE\nEND\n");
        text
    }

    fn scene() -> Landsat1Mss {
        let header = KeyValueHeader::parse(&mtl_text()).unwrap();
        Landsat1Mss::from_header(&header, Path::new("/data/LM1_MTL.txt")).unwrap()
    }

    fn store_with_dn(sensor: &Landsat1Mss) -> MemoryRasterStore {
        let mut store = MemoryRasterStore::new();
        let geo = GeoTransform::north_up(500_000.0, 1_100_000.0, 60.0, 60.0);
        for (index, band) in sensor.bands().iter().enumerate() {
            let mut data = Array3::from_elem((1, 4, 4), 64.0f32 + index as f32);
            data[[0, 0, 0]] = 0.0;
            data[[0, 3, 3]] = 127.0;
            store.insert(band.file.clone(), Raster::new(data, geo, "WKT"));
        }
        store
    }

    #[test]
    fn test_header_values() {
        let s = scene();
        let state = s.state();
        assert_eq!((s.row(), s.path()), (30, 15));
        assert_eq!(state.acquisition_time.year(), 1972);
        assert_eq!(state.acquisition_time.second(), 34);
        assert_eq!(state.solar_zenith, 40.0);
        assert_eq!(state.solar_azimuth, 120.5);
        assert_eq!(state.epsg, Some(32619));
        assert_eq!(state.x_centre, 555_000.0);
        assert_eq!(state.y_centre, 1_045_000.0);
        assert_eq!(state.lat_centre, 9.5);
        assert_eq!(s.bands()[0].file, PathBuf::from("/data/LM1_B4.TIF"));
        assert_eq!(s.bands()[3].scaling.name, "NIR2");
        assert_eq!(s.bands()[2].scaling.qcal_max, 127.0);
    }

    #[test]
    fn test_base_name_has_row_path() {
        assert_eq!(scene().generate_output_base_name(), "LS1MSS_19720815_lat95lon695_r30p15");
    }

    #[test]
    fn test_rejects_other_spacecraft() {
        let text = mtl_text().replace("LANDSAT_1", "LANDSAT_2");
        let header = KeyValueHeader::parse(&text).unwrap();
        let err = Landsat1Mss::from_header(&header, Path::new("MTL.txt")).unwrap_err();
        assert!(matches!(err, AtmoError::InvalidFormat(_)));
    }

    #[test]
    fn test_rejects_non_square_footprint() {
        let text = mtl_text().replace(
            "CORNER_LL_PROJECTION_X_PRODUCT = 500000.0",
            "CORNER_LL_PROJECTION_X_PRODUCT = 499000.0",
        );
        let header = KeyValueHeader::parse(&text).unwrap();
        assert!(matches!(
            Landsat1Mss::from_header(&header, Path::new("MTL.txt")),
            Err(AtmoError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_other_projection() {
        let text = mtl_text().replace("MAP_PROJECTION = \"UTM\"", "MAP_PROJECTION = \"PS\"");
        let header = KeyValueHeader::parse(&text).unwrap();
        assert!(Landsat1Mss::from_header(&header, Path::new("MTL.txt")).is_err());
    }

    #[test]
    fn test_missing_band_files() {
        let s = scene();
        assert!(!s.expected_image_data_present());
        assert!(matches!(s.check_input_image_valid(), Err(AtmoError::Precondition(_))));
    }

    #[test]
    fn test_radiance_and_saturation() {
        let s = scene();
        let store = store_with_dn(&s);
        let radiance = s.convert_image_to_radiance(&store).unwrap();
        assert_eq!(radiance.band_count(), 4);
        assert_eq!(radiance.band_names, BAND_NAMES.to_vec());
        assert_eq!(radiance.data[[0, 0, 0]], 0.0);
        // gain 2, qcal_min 1
        assert_eq!(radiance.data[[0, 1, 1]], 126.0);
        assert_eq!(radiance.data[[1, 1, 1]], 128.0);

        let saturation = s.generate_image_saturation_mask(&store).unwrap();
        assert_eq!(saturation.data[[2, 3, 3]], 1.0);
        assert_eq!(saturation.data[[2, 1, 1]], 0.0);

        let valid = s.generate_valid_image_data_mask(&radiance).unwrap().unwrap();
        assert_eq!(valid.data[[0, 0, 0]], 0.0);
        assert_eq!(valid.data[[0, 2, 2]], 1.0);
    }

    #[test]
    fn test_toa_keeps_band_names() {
        let s = scene();
        let radiance = s.convert_image_to_radiance(&store_with_dn(&s)).unwrap();
        let toa = s.convert_image_to_toa_refl(&radiance, 1000.0).unwrap();
        assert_eq!(toa.band_names[3], "NIR2");
        assert_eq!(toa.data[[0, 0, 0]], 0.0);
        assert!(toa.data[[0, 1, 1]] > 0.0);
    }

    #[test]
    fn test_set_band_names_needs_four_bands() {
        let s = scene();
        let mut image = Raster::new(Array3::zeros((3, 2, 2)), GeoTransform::north_up(0.0, 0.0, 1.0, 1.0), "");
        assert!(s.set_band_names(&mut image).is_err());
        let mut image = image.like(Array3::zeros((4, 2, 2)));
        s.set_band_names(&mut image).unwrap();
        assert_eq!(image.band_names[0], "Green");
    }

    #[test]
    fn test_unsupported_operations() {
        let s = scene();
        let image = Raster::new(Array3::zeros((4, 2, 2)), GeoTransform::north_up(0.0, 0.0, 1.0, 1.0), "");
        let err = s.generate_cloud_mask(&image, &image, None, None, 1000.0).unwrap_err();
        assert!(matches!(err, AtmoError::Unsupported { ref sensor, .. } if sensor == "LS1MSS"));
        assert!(s.find_ddv_targets(&image).is_err());
        assert!(s.convert_thermal_to_brightness(&image, 1000.0).is_err());
        assert!(s.apply_image_data_mask(&image, &image).is_err());
        assert!(!s.has_thermal());
        assert!(!s.img_need_mosaicking());
    }

    #[test]
    fn test_spectral_bands() {
        let bands = scene().spectral_bands();
        assert_eq!(bands.len(), 4);
        assert_eq!(bands[0], SpectralBand::Predefined("LANDSAT_MSS_B1".to_string()));
    }
}
