//! Coordinate transformation between spatial reference systems

use crate::types::{AtmoError, AtmoResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use std::path::Path;

/// Maps a point from one coordinate reference system to another
pub trait PointTransform {
    fn transform(&self, x: f64, y: f64) -> AtmoResult<(f64, f64)>;
}

/// Definition of a spatial reference system
#[derive(Debug, Clone, PartialEq)]
pub enum SrsDefinition {
    Epsg(u32),
    Wkt(String),
    Proj4(String),
}

impl SrsDefinition {
    /// Read a definition from a WKT file
    pub fn wkt_file(path: &Path) -> AtmoResult<Self> {
        Ok(SrsDefinition::Wkt(std::fs::read_to_string(path)?.trim().to_string()))
    }

    /// Read a definition from a PROJ.4 string file
    pub fn proj4_file(path: &Path) -> AtmoResult<Self> {
        Ok(SrsDefinition::Proj4(std::fs::read_to_string(path)?.trim().to_string()))
    }

    pub fn to_spatial_ref(&self) -> AtmoResult<SpatialRef> {
        let srs = match self {
            SrsDefinition::Epsg(code) => SpatialRef::from_epsg(*code)?,
            SrsDefinition::Wkt(wkt) => SpatialRef::from_wkt(wkt)?,
            SrsDefinition::Proj4(proj4) => SpatialRef::from_proj4(proj4)?,
        };
        srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        Ok(srs)
    }

    pub fn to_wkt(&self) -> AtmoResult<String> {
        match self {
            SrsDefinition::Wkt(wkt) => Ok(wkt.clone()),
            _ => Ok(self.to_spatial_ref()?.to_wkt()?),
        }
    }
}

/// OSR backed transform, always in easting/northing (lon/lat) axis order
pub struct GdalPointTransform {
    transform: CoordTransform,
}

impl GdalPointTransform {
    pub fn new(source: &SrsDefinition, target: &SrsDefinition) -> AtmoResult<Self> {
        let source = source.to_spatial_ref()?;
        let target = target.to_spatial_ref()?;
        Ok(Self {
            transform: CoordTransform::new(&source, &target)?,
        })
    }
}

impl PointTransform for GdalPointTransform {
    fn transform(&self, x: f64, y: f64) -> AtmoResult<(f64, f64)> {
        let mut xs = [x];
        let mut ys = [y];
        let mut zs = [0.0];
        self.transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
        if !xs[0].is_finite() || !ys[0].is_finite() {
            return Err(AtmoError::Processing(format!(
                "Coordinate ({}, {}) could not be transformed",
                x, y
            )));
        }
        Ok((xs[0], ys[0]))
    }
}

/// Scale and shift transform; handy for grids that differ by an offset
#[derive(Debug, Clone, Copy)]
pub struct AffinePointTransform {
    pub scale_x: f64,
    pub offset_x: f64,
    pub scale_y: f64,
    pub offset_y: f64,
}

impl AffinePointTransform {
    pub fn shift(offset_x: f64, offset_y: f64) -> Self {
        Self {
            scale_x: 1.0,
            offset_x,
            scale_y: 1.0,
            offset_y,
        }
    }
}

impl PointTransform for AffinePointTransform {
    fn transform(&self, x: f64, y: f64) -> AtmoResult<(f64, f64)> {
        Ok((x * self.scale_x + self.offset_x, y * self.scale_y + self.offset_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_shift() {
        let t = AffinePointTransform::shift(100.0, -50.0);
        assert_eq!(t.transform(1.0, 2.0).unwrap(), (101.0, -48.0));
    }

    #[test]
    fn test_definition_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.proj4");
        std::fs::write(&path, "+proj=longlat +datum=WGS84 +no_defs\n").unwrap();
        let def = SrsDefinition::proj4_file(&path).unwrap();
        assert_eq!(def, SrsDefinition::Proj4("+proj=longlat +datum=WGS84 +no_defs".to_string()));
    }
}
