#![allow(dead_code)]

use atmocorr::io::MemoryRasterStore;
use atmocorr::{GeoTransform, Raster};
use ndarray::Array3;
use std::path::{Path, PathBuf};

pub const ROWS: usize = 40;
pub const COLS: usize = 40;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn grid() -> GeoTransform {
    GeoTransform::north_up(500_000.0, 1_100_000.0, 60.0, 60.0)
}

/// Landsat-1 MSS MTL header for a 40 x 40 pixel test scene
pub fn mtl_text() -> String {
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
    CORNER_UR_PROJECTION_X_PRODUCT = 502400.0
    CORNER_UR_PROJECTION_Y_PRODUCT = 1100000.0
    CORNER_LL_PROJECTION_X_PRODUCT = 500000.0
    CORNER_LL_PROJECTION_Y_PRODUCT = 1097600.0
    CORNER_LR_PROJECTION_X_PRODUCT = 502400.0
    CORNER_LR_PROJECTION_Y_PRODUCT = 1097600.0
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
  GROUP = MIN_MAX_RADIANCE
"#,
    );
    for n in 4..=7 {
        text.push_str(&format!("    FILE_NAME_BAND_{n} = \"LM1_B{n}.TIF\"\n"));
        text.push_str(&format!("    QUANTIZE_CAL_MIN_BAND_{n} = 1\n"));
        text.push_str(&format!("    QUANTIZE_CAL_MAX_BAND_{n} = 127\n"));
        text.push_str(&format!("    RADIANCE_MINIMUM_BAND_{n} = 0.0\n"));
        text.push_str(&format!("    RADIANCE_MAXIMUM_BAND_{n} = 252.0\n"));
    }
    text.push_str("  END_GROUP = MIN_MAX_RADIANCE\nEND_GROUP = L1_METADATA_FILE\nEND\n");
    text
}

/// DN image: a textured scene with a 5 x 5 block of DN 5 at rows/cols 10..15
pub fn scene_dn() -> Array3<f32> {
    let mut data = Array3::zeros((1, ROWS, COLS));
    for ((_, i, j), v) in data.indexed_iter_mut() {
        *v = if (10..15).contains(&i) && (10..15).contains(&j) {
            5.0
        } else {
            20.0 + ((i * 7 + j * 3) % 50) as f32
        };
    }
    data
}

/// Write the header and empty band files into `dir`, and put the band
/// rasters into a memory store under the same paths
pub fn write_scene(dir: &Path) -> anyhow::Result<(PathBuf, MemoryRasterStore)> {
    let header = dir.join("LM1_MTL.txt");
    std::fs::write(&header, mtl_text())?;

    let mut store = MemoryRasterStore::new();
    for n in 4..=7 {
        let path = dir.join(format!("LM1_B{}.TIF", n));
        std::fs::write(&path, b"")?;
        store.insert(path, Raster::new(scene_dn(), grid(), ""));
    }
    Ok((header, store))
}

pub fn flat_dem() -> Raster {
    Raster::new(Array3::zeros((1, ROWS, COLS)), grid(), "")
}
