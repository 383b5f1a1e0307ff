mod common;

use atmocorr::io::AffinePointTransform;
use atmocorr::sensor::metadata::read_metadata_file;
use atmocorr::sensor::{MetadataInputs, Sensor};
use atmocorr::{KeyValueHeader, Landsat1Mss, Raster};
use ndarray::{s, Array3};
use serde_json::json;
use tempfile::TempDir;

fn sensor(dir: &TempDir) -> anyhow::Result<Landsat1Mss> {
    let (header, _store) = common::write_scene(dir.path())?;
    let parsed = KeyValueHeader::from_file(&header)?;
    Ok(Landsat1Mss::from_header(&parsed, &header)?)
}

#[test]
fn test_metadata_from_header_corners() -> anyhow::Result<()> {
    common::init_logging();
    let dir = TempDir::new()?;
    let sensor = sensor(&dir)?;

    let inputs = MetadataInputs::new("RAD,TOA,SREF")
        .with_value("AOT", 0.2)
        .with_file("TOA", dir.path().join("scene_toa.kea"));
    let path = dir.path().join("scene_meta.json");
    sensor.generate_metadata_file(&path, &inputs, None)?;

    let doc = read_metadata_file(&path)?;
    let date = &doc["AcquasitionInfo"]["Date"];
    assert_eq!(date, &json!({ "Year": 1972, "Month": 8, "Day": 15 }));
    let time = &doc["AcquasitionInfo"]["Time"];
    assert_eq!(time, &json!({ "Hour": 15, "Minute": 12, "Second": 34 }));
    assert_eq!(doc["AcquasitionInfo"]["SolarZenith"], 40.0);

    assert_eq!(doc["FileInfo"]["FileBaseName"], "LS1MSS_19720815_lat95lon695_r30p15");
    assert_eq!(doc["FileInfo"]["TOA"], "scene_toa.kea");
    assert_eq!(doc["SensorInfo"]["ARCSISensorName"], "LS1MSS");
    assert_eq!(doc["ProductsInfo"]["AOT"], 0.2);

    let projected = &doc["LocationInfo"]["Projected"];
    assert_eq!(projected["BBOX"]["TLX"], 500_000.0);
    assert_eq!(projected["BBOX"]["BRY"], 1_097_600.0);
    assert_eq!(projected["CentreX"], 501_200.0);
    let geographic = &doc["LocationInfo"]["Geographical"];
    assert_eq!(geographic["CentreLat"], 9.5);
    assert_eq!(geographic["BBOX"]["TLLon"], -70.0);

    assert_eq!(doc["SoftwareInfo"]["Name"], "atmocorr");
    Ok(())
}

#[test]
fn test_metadata_from_valid_mask() -> anyhow::Result<()> {
    common::init_logging();
    let dir = TempDir::new()?;
    let sensor = sensor(&dir)?;

    let mut mask = Array3::zeros((1, common::ROWS, common::COLS));
    mask.slice_mut(s![0, 5..35, 2..38]).fill(1.0f32);
    let mask = Raster::new(mask, common::grid(), "");

    let inputs = MetadataInputs::new("TOA");
    let path = dir.path().join("masked_meta.json");
    sensor.generate_metadata_file(&path, &inputs, Some(&mask))?;
    let first = read_metadata_file(&path)?;
    let bbox = &first["LocationInfo"]["Projected"]["BBOX"];
    // Pixel centres of the masked block
    assert_eq!(bbox["TLX"], 500_150.0);
    assert_eq!(bbox["TLY"], 1_099_670.0);
    assert_eq!(bbox["BRX"], 502_250.0);
    assert_eq!(bbox["BRY"], 1_097_930.0);

    // Writing again from the same state reproduces the same document apart
    // from the processing time
    sensor.generate_metadata_file(&path, &inputs, Some(&mask))?;
    let second = read_metadata_file(&path)?;
    assert_eq!(first["LocationInfo"], second["LocationInfo"]);
    assert_eq!(first["AcquasitionInfo"], second["AcquasitionInfo"]);

    // Two separate regions leave the projected block empty
    let mut split = Array3::zeros((1, common::ROWS, common::COLS));
    split.slice_mut(s![0, 0..5, 0..5]).fill(1.0f32);
    split.slice_mut(s![0, 30..35, 30..35]).fill(1.0f32);
    let split = Raster::new(split, common::grid(), "");
    let doc = sensor.generate_metadata(&inputs, Some(&split))?;
    assert_eq!(doc["LocationInfo"]["Projected"], json!({}));
    Ok(())
}

#[test]
fn test_reprojected_bbox_snaps_to_resolution() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let sensor = sensor(&dir)?;

    let shift = AffinePointTransform::shift(1_000_007.0, -2_000_011.0);
    let bbox = sensor.reproj_bbox(&shift, 30.0, -30.0)?;
    // TL -> (1500007, -900011), BR -> (1502407, -902411)
    assert_eq!(bbox.min_x, 1_500_000.0);
    assert_eq!(bbox.max_y, -900_000.0);
    assert_eq!(bbox.max_x, 1_502_430.0);
    assert_eq!(bbox.min_y, -902_430.0);
    for v in [bbox.min_x, bbox.max_x, bbox.min_y, bbox.max_y] {
        assert_eq!(v % 30.0, 0.0);
    }
    Ok(())
}
