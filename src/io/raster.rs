//! Raster storage backends
//!
//! The correction pipeline works on in-memory [`Raster`] values; a
//! [`RasterStore`] moves them to and from persistent storage. The GDAL
//! backend writes through any GDAL driver named by a format identifier
//! (for example "KEA" or "GTiff").

use crate::types::{AtmoError, AtmoResult, GeoTransform, PixelType, Raster};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array3;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reads and writes whole rasters
pub trait RasterStore {
    /// Read every band of the raster at `path`
    fn read(&self, path: &Path) -> AtmoResult<Raster>;

    /// Write `raster`, replacing anything already at `path`
    fn write(&mut self, path: &Path, raster: &Raster) -> AtmoResult<()>;

    /// Delete the raster at `path` if it exists
    fn remove(&mut self, path: &Path) -> AtmoResult<()>;

    fn exists(&self, path: &Path) -> bool;

    /// File extension (without dot) used for rasters of this store
    fn extension(&self) -> &str;

    /// `dir/name.ext` for this store's format
    fn output_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.{}", name, self.extension()))
    }
}

/// Raster store backed by a hash map, used for tests and chained runs
#[derive(Debug, Default, Clone)]
pub struct MemoryRasterStore {
    rasters: HashMap<PathBuf, Raster>,
}

impl MemoryRasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, raster: Raster) {
        self.rasters.insert(path.into(), raster);
    }

    pub fn get(&self, path: &Path) -> Option<&Raster> {
        self.rasters.get(path)
    }

    pub fn len(&self) -> usize {
        self.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.is_empty()
    }

    pub fn paths(&self) -> Vec<&Path> {
        let mut paths: Vec<&Path> = self.rasters.keys().map(|p| p.as_path()).collect();
        paths.sort();
        paths
    }
}

impl RasterStore for MemoryRasterStore {
    fn read(&self, path: &Path) -> AtmoResult<Raster> {
        self.rasters
            .get(path)
            .cloned()
            .ok_or_else(|| AtmoError::Precondition(format!("Raster not found: {}", path.display())))
    }

    fn write(&mut self, path: &Path, raster: &Raster) -> AtmoResult<()> {
        let mut stored = raster.clone();
        let pixel_type = stored.pixel_type;
        stored.data.mapv_inplace(|v| pixel_type.quantize(v));
        self.rasters.insert(path.to_path_buf(), stored);
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> AtmoResult<()> {
        self.rasters.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.rasters.contains_key(path)
    }

    fn extension(&self) -> &str {
        "mem"
    }
}

/// Raster store writing through a GDAL driver
#[derive(Debug, Clone)]
pub struct GdalRasterStore {
    driver_name: String,
    extension: String,
}

impl GdalRasterStore {
    /// Store for a GDAL driver short name, e.g. "KEA" or "GTiff"
    pub fn new(driver_name: &str) -> Self {
        Self {
            driver_name: driver_name.to_string(),
            extension: Self::default_extension(driver_name).to_string(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    fn default_extension(driver_name: &str) -> &'static str {
        match driver_name.to_ascii_uppercase().as_str() {
            "KEA" => "kea",
            "GTIFF" => "tif",
            "HFA" => "img",
            "ENVI" => "envi",
            "NETCDF" => "nc",
            _ => "img",
        }
    }

    fn write_band<T: GdalType + Copy>(
        dataset: &Dataset,
        index: usize,
        raster: &Raster,
        convert: impl Fn(f32) -> T,
    ) -> AtmoResult<()> {
        let (width, height) = (raster.width(), raster.height());
        let band = raster.band(index)?;
        let flat_data: Vec<T> = band
            .iter()
            .map(|&v| convert(raster.pixel_type.quantize(v)))
            .collect();

        let mut rasterband = dataset.rasterband(index as isize + 1)?;
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(no_data) = raster.no_data {
            rasterband.set_no_data_value(Some(no_data))?;
        }
        if let Some(name) = raster.band_names.get(index) {
            rasterband.set_description(name)?;
        }
        Ok(())
    }
}

impl RasterStore for GdalRasterStore {
    fn read(&self, path: &Path) -> AtmoResult<Raster> {
        log::debug!("Reading raster from: {}", path.display());

        let dataset = Dataset::open(path)?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count().max(0) as usize;

        log::debug!("Raster size: {}x{} with {} bands", width, height, band_count);

        let mut data = Vec::with_capacity(band_count * width * height);
        let mut band_names = Vec::with_capacity(band_count);
        let mut no_data = None;
        for index in 1..=band_count {
            let rasterband = dataset.rasterband(index as isize)?;
            let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            data.extend_from_slice(&buffer.data);
            band_names.push(rasterband.description().unwrap_or_default());
            if no_data.is_none() {
                no_data = rasterband.no_data_value();
            }
        }

        let data = Array3::from_shape_vec((band_count, height, width), data)
            .map_err(|e| AtmoError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        let mut raster = Raster::new(data, GeoTransform::from_gdal(geo_transform), dataset.projection());
        raster.band_names = band_names;
        raster.no_data = no_data;
        Ok(raster)
    }

    fn write(&mut self, path: &Path, raster: &Raster) -> AtmoResult<()> {
        log::debug!(
            "Writing {} band raster ({:?}) to: {}",
            raster.band_count(),
            raster.pixel_type,
            path.display()
        );

        if path.exists() {
            self.remove(path)?;
        }

        let driver = DriverManager::get_driver_by_name(&self.driver_name)?;
        let (width, height) = (raster.width() as isize, raster.height() as isize);
        let bands = raster.band_count() as isize;

        let mut dataset = match raster.pixel_type {
            PixelType::UInt8 => driver.create_with_band_type::<u8, _>(path, width, height, bands)?,
            PixelType::UInt16 => driver.create_with_band_type::<u16, _>(path, width, height, bands)?,
            PixelType::Float32 => driver.create_with_band_type::<f32, _>(path, width, height, bands)?,
        };

        dataset.set_geo_transform(&raster.geo_transform.to_gdal())?;
        if !raster.projection.is_empty() {
            dataset.set_projection(&raster.projection)?;
        }

        for index in 0..raster.band_count() {
            match raster.pixel_type {
                PixelType::UInt8 => Self::write_band(&dataset, index, raster, |v| v as u8)?,
                PixelType::UInt16 => Self::write_band(&dataset, index, raster, |v| v as u16)?,
                PixelType::Float32 => Self::write_band(&dataset, index, raster, |v| v)?,
            }
        }
        Ok(())
    }

    /// Deletes through the driver that owns the file, so sidecar files
    /// (.aux.xml, ENVI .hdr, overviews) go with it
    fn remove(&mut self, path: &Path) -> AtmoResult<()> {
        if !path.exists() {
            return Ok(());
        }
        let driver = match Dataset::open(path) {
            Ok(dataset) => dataset.driver(),
            Err(_) => DriverManager::get_driver_by_name(&self.driver_name)?,
        };
        log::debug!("Deleting {} with the {} driver", path.display(), driver.short_name());
        driver.delete(path)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn extension(&self) -> &str {
        &self.extension
    }
}
