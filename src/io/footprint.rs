//! Scene footprint polygon output

use crate::types::{AtmoError, AtmoResult};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldDefn, FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType};
use gdal::DriverManager;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One footprint polygon and its attribute record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintFeature {
    /// Closed ring in the mask's projection
    pub ring: Vec<(f64, f64)>,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub base_name: String,
    pub sol_zen: f64,
    pub sol_azi: f64,
    pub sen_zen: f64,
    pub sen_azi: f64,
    pub cen_lat: f64,
    pub cen_lon: f64,
}

impl FootprintFeature {
    pub fn to_wkt(&self) -> String {
        let coords: Vec<String> = self.ring.iter().map(|(x, y)| format!("{} {}", x, y)).collect();
        format!("POLYGON (({}))", coords.join(", "))
    }
}

/// Receives the footprint polygons of a scene
pub trait FootprintSink {
    fn write_footprints(&mut self, srs_wkt: &str, features: &[FootprintFeature]) -> AtmoResult<()>;
}

/// Keeps footprints in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryFootprintSink {
    pub srs_wkt: String,
    pub features: Vec<FootprintFeature>,
}

impl FootprintSink for MemoryFootprintSink {
    fn write_footprints(&mut self, srs_wkt: &str, features: &[FootprintFeature]) -> AtmoResult<()> {
        self.srs_wkt = srs_wkt.to_string();
        self.features.extend_from_slice(features);
        Ok(())
    }
}

/// Writes footprints to an ESRI Shapefile through OGR
#[derive(Debug, Clone)]
pub struct ShapefileFootprintWriter {
    path: PathBuf,
}

impl ShapefileFootprintWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn layer_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "footprint".to_string())
    }
}

impl FootprintSink for ShapefileFootprintWriter {
    fn write_footprints(&mut self, srs_wkt: &str, features: &[FootprintFeature]) -> AtmoResult<()> {
        log::info!("Writing {} footprint polygons to {}", features.len(), self.path.display());

        let driver = DriverManager::get_driver_by_name("ESRI Shapefile")?;
        if self.path.exists() {
            for ext in ["shp", "shx", "dbf", "prj", "cpg"] {
                let part = self.path.with_extension(ext);
                if part.exists() {
                    std::fs::remove_file(part)?;
                }
            }
        }

        let mut dataset = driver.create_vector_only(&self.path)?;
        let srs = if srs_wkt.is_empty() {
            None
        } else {
            Some(SpatialRef::from_wkt(srs_wkt)?)
        };
        let layer_name = self.layer_name();
        let mut layer = dataset.create_layer(LayerOptions {
            name: &layer_name,
            srs: srs.as_ref(),
            ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
            options: None,
        })?;

        for name in ["Year", "Month", "Day"] {
            let field = FieldDefn::new(name, OGRFieldType::OFTInteger)?;
            field.set_width(6);
            field.add_to_layer(&layer)?;
        }
        let field = FieldDefn::new("BaseName", OGRFieldType::OFTString)?;
        field.set_width(254);
        field.add_to_layer(&layer)?;
        for name in ["SolZen", "SolAzi", "SenZen", "SenAzi", "CenLat", "CenLon"] {
            let field = FieldDefn::new(name, OGRFieldType::OFTReal)?;
            field.set_width(10);
            field.set_precision(6);
            field.add_to_layer(&layer)?;
        }

        let field_names = [
            "Year", "Month", "Day", "BaseName", "SolZen", "SolAzi", "SenZen", "SenAzi", "CenLat", "CenLon",
        ];
        for feature in features {
            if feature.ring.len() < 4 {
                return Err(AtmoError::Processing(format!(
                    "Footprint ring has only {} vertices",
                    feature.ring.len()
                )));
            }
            let geometry = Geometry::from_wkt(&feature.to_wkt())?;
            let values = [
                FieldValue::IntegerValue(feature.year),
                FieldValue::IntegerValue(feature.month),
                FieldValue::IntegerValue(feature.day),
                FieldValue::StringValue(feature.base_name.clone()),
                FieldValue::RealValue(feature.sol_zen),
                FieldValue::RealValue(feature.sol_azi),
                FieldValue::RealValue(feature.sen_zen),
                FieldValue::RealValue(feature.sen_azi),
                FieldValue::RealValue(feature.cen_lat),
                FieldValue::RealValue(feature.cen_lon),
            ];
            layer.create_feature_fields(geometry, &field_names, &values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_wkt() {
        let feature = FootprintFeature {
            ring: vec![(0.0, 10.0), (0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)],
            year: 2001,
            month: 6,
            day: 15,
            base_name: "ls1mss_20010615".to_string(),
            sol_zen: 30.0,
            sol_azi: 120.0,
            sen_zen: 0.0,
            sen_azi: 0.0,
            cen_lat: 9.5,
            cen_lon: -69.5,
        };
        assert_eq!(feature.to_wkt(), "POLYGON ((0 10, 0 0, 10 0, 10 10, 0 10))");

        let mut sink = MemoryFootprintSink::default();
        sink.write_footprints("WKT", &[feature.clone()]).unwrap();
        assert_eq!(sink.features, vec![feature]);
        assert_eq!(sink.srs_wkt, "WKT");
    }
}
