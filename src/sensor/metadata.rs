//! Scene metadata JSON
//!
//! Top level keys are `FileInfo`, `SensorInfo`, `AcquasitionInfo`,
//! `LocationInfo`, `ProductsInfo` and `SoftwareInfo`. Keys are written
//! sorted with a four space indent; non-ASCII text is kept as UTF-8.

use crate::core::segmentation::ObjectExtent;
use crate::sensor::SensorState;
use crate::types::AtmoResult;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Software block of the metadata file
#[derive(Debug, Clone, PartialEq)]
pub struct SoftwareInfo {
    pub name: String,
    pub url: String,
    pub version: String,
}

impl Default for SoftwareInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            url: env!("CARGO_PKG_REPOSITORY").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Run specific content of the metadata file
#[derive(Debug, Clone)]
pub struct MetadataInputs {
    /// Comma separated list of generated products
    pub products: String,
    /// Values computed during the run (e.g. an estimated AOT)
    pub calculated: Map<String, Value>,
    /// Output files by product key; only file names are recorded
    pub out_files: BTreeMap<String, PathBuf>,
    pub process_time: NaiveDateTime,
    pub software: SoftwareInfo,
}

impl MetadataInputs {
    pub fn new(products: impl Into<String>) -> Self {
        Self {
            products: products.into(),
            calculated: Map::new(),
            out_files: BTreeMap::new(),
            process_time: chrono::Local::now().naive_local(),
            software: SoftwareInfo::default(),
        }
    }

    pub fn with_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.calculated.insert(key.to_string(), value.into());
        self
    }

    pub fn with_file(mut self, key: &str, path: impl Into<PathBuf>) -> Self {
        self.out_files.insert(key.to_string(), path.into());
        self
    }
}

fn date_block(t: &NaiveDateTime) -> Value {
    json!({ "Year": t.year(), "Month": t.month(), "Day": t.day() })
}

fn time_block(t: &NaiveDateTime) -> Value {
    json!({ "Hour": t.hour(), "Minute": t.minute(), "Second": t.second() })
}

fn projected_from_extent(e: &ObjectExtent) -> Value {
    json!({
        "BBOX": {
            "TLX": e.min_x_x, "TLY": e.max_y_y,
            "TRX": e.max_x_x, "TRY": e.max_y_y,
            "BLX": e.min_x_x, "BLY": e.min_y_y,
            "BRX": e.max_x_x, "BRY": e.min_y_y,
        },
        "CentreX": e.min_x_x + (e.max_x_x - e.min_x_x) / 2.0,
        "CentreY": e.min_y_y + (e.max_y_y - e.min_y_y) / 2.0,
        "VPOLY": {
            "MinXX": e.min_x_x, "MinXY": e.min_x_y,
            "MaxYX": e.max_y_x, "MaxYY": e.max_y_y,
            "MaxXX": e.max_x_x, "MaxXY": e.max_x_y,
            "MinYX": e.min_y_x, "MinYY": e.min_y_y,
        },
    })
}

fn projected_from_state(state: &SensorState) -> Value {
    let p = &state.projected;
    json!({
        "CentreX": state.x_centre,
        "CentreY": state.y_centre,
        "BBOX": {
            "TLX": p.tl.x, "TLY": p.tl.y,
            "TRX": p.tr.x, "TRY": p.tr.y,
            "BLX": p.bl.x, "BLY": p.bl.y,
            "BRX": p.br.x, "BRY": p.br.y,
        },
    })
}

/// Assemble the metadata document.
///
/// With `footprint` the projected block comes from the valid-data extents
/// (filled only when there is exactly one footprint object); without it the
/// stored projected corners are used.
pub fn build_metadata(
    state: &SensorState,
    base_name: &str,
    footprint: Option<&[ObjectExtent]>,
    inputs: &MetadataInputs,
) -> Value {
    let mut files = Map::new();
    files.insert("FileBaseName".to_string(), json!(base_name));
    for (key, path) in &inputs.out_files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.insert(key.clone(), json!(name));
    }

    let t = &state.acquisition_time;
    let acquisition = json!({
        "Date": date_block(t),
        "Time": time_block(t),
        "SolarZenith": state.solar_zenith,
        "SolarAzimuth": state.solar_azimuth,
        "SenorZenith": state.sensor_zenith,
        "SenorAzimuth": state.sensor_azimuth,
    });

    let g = &state.geographic;
    let geographic = json!({
        "CentreLat": state.lat_centre,
        "CentreLon": state.lon_centre,
        "BBOX": {
            "TLLat": g.tl.y, "TLLon": g.tl.x,
            "TRLat": g.tr.y, "TRLon": g.tr.x,
            "BLLat": g.bl.y, "BLLon": g.bl.x,
            "BRLat": g.br.y, "BRLon": g.br.x,
        },
    });

    let projected = match footprint {
        Some([single]) => projected_from_extent(single),
        Some(_) => Value::Object(Map::new()),
        None => projected_from_state(state),
    };

    let mut products = Map::new();
    products.insert("ARCSIProducts".to_string(), json!(inputs.products));
    products.insert("ProcessDate".to_string(), date_block(&inputs.process_time));
    products.insert("ProcessTime".to_string(), time_block(&inputs.process_time));
    for (key, value) in &inputs.calculated {
        products.insert(key.clone(), value.clone());
    }

    json!({
        "FileInfo": files,
        "SensorInfo": { "ARCSISensorName": state.sensor },
        "AcquasitionInfo": acquisition,
        "LocationInfo": { "Geographical": geographic, "Projected": projected },
        "ProductsInfo": products,
        "SoftwareInfo": {
            "Name": inputs.software.name,
            "URL": inputs.software.url,
            "Version": inputs.software.version,
        },
    })
}

/// Serialise with sorted keys and a four space indent
pub fn to_json_string(value: &Value) -> AtmoResult<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

pub fn write_metadata_file(path: &Path, value: &Value) -> AtmoResult<()> {
    log::info!("Writing metadata to {}", path.display());
    std::fs::write(path, to_json_string(value)?)?;
    Ok(())
}

pub fn read_metadata_file(path: &Path) -> AtmoResult<Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
