use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};

/// Real-valued single band image (rows x cols)
pub type BandImage = Array2<f32>;

/// Object label image produced by clumping, 0 is background
pub type LabelImage = Array2<u32>;

/// Geospatial transformation parameters (GDAL affine ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Build from the six GDAL coefficients
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// North-up transform with square-ish pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_centre(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Map coordinates of the top-left corner of pixel (row, col)
    pub fn pixel_corner(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64;
        let r = row as f64;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Ground distance covered by one pixel step along x and y
    pub fn pixel_spacing(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.rotation_y),
            self.pixel_height.hypot(self.rotation_x),
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0, 1.0)
    }
}

/// Rectangular pixel window of a raster grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    pub height: usize,
    pub width: usize,
}

/// Split a `height x width` grid into blocks of at most `block_size`
/// pixels on a side, in row-major order. Edge blocks are truncated.
pub fn block_windows(height: usize, width: usize, block_size: usize) -> Vec<Window> {
    let block_size = block_size.max(1);
    let mut windows = Vec::new();
    for row in (0..height).step_by(block_size) {
        for col in (0..width).step_by(block_size) {
            windows.push(Window {
                row,
                col,
                height: block_size.min(height - row),
                width: block_size.min(width - col),
            });
        }
    }
    windows
}

/// Storage type used when a raster is written out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelType {
    UInt8,
    UInt16,
    Float32,
}

impl PixelType {
    /// Clamp and round a value into the representable range
    pub fn quantize(&self, value: f32) -> f32 {
        match self {
            PixelType::UInt8 => value.round().clamp(0.0, u8::MAX as f32),
            PixelType::UInt16 => value.round().clamp(0.0, u16::MAX as f32),
            PixelType::Float32 => value,
        }
    }
}

/// Multi-band raster held in memory as (band, row, col)
#[derive(Debug, Clone)]
pub struct Raster {
    pub data: Array3<f32>,
    pub geo_transform: GeoTransform,
    pub projection: String,
    pub band_names: Vec<String>,
    pub pixel_type: PixelType,
    pub no_data: Option<f64>,
}

impl Raster {
    pub fn new(data: Array3<f32>, geo_transform: GeoTransform, projection: impl Into<String>) -> Self {
        Self {
            data,
            geo_transform,
            projection: projection.into(),
            band_names: Vec::new(),
            pixel_type: PixelType::Float32,
            no_data: None,
        }
    }

    /// Single band raster on the same grid as `like`
    pub fn from_band(band: BandImage, like: &Raster) -> Self {
        let data = band.insert_axis(Axis(0));
        Self::new(data, like.geo_transform, like.projection.clone())
    }

    /// Stack equally sized bands onto the grid of `like`
    pub fn from_bands(bands: &[BandImage], like: &Raster) -> AtmoResult<Self> {
        let views: Vec<ArrayView2<f32>> = bands.iter().map(|b| b.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| AtmoError::Processing(format!("Failed to stack bands: {}", e)))?;
        Ok(Self::new(data, like.geo_transform, like.projection.clone()))
    }

    /// New raster sharing this raster's georeferencing
    pub fn like(&self, data: Array3<f32>) -> Self {
        Self::new(data, self.geo_transform, self.projection.clone())
    }

    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self
    }

    pub fn with_band_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.band_names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Zero based band view
    pub fn band(&self, index: usize) -> AtmoResult<ArrayView2<'_, f32>> {
        if index >= self.band_count() {
            return Err(AtmoError::InvalidParameter(format!(
                "Band {} requested from a raster with {} bands",
                index,
                self.band_count()
            )));
        }
        Ok(self.data.index_axis(Axis(0), index))
    }

    pub fn band_mut(&mut self, index: usize) -> AtmoResult<ArrayViewMut2<'_, f32>> {
        let count = self.band_count();
        if index >= count {
            return Err(AtmoError::InvalidParameter(format!(
                "Band {} requested from a raster with {} bands",
                index, count
            )));
        }
        Ok(self.data.index_axis_mut(Axis(0), index))
    }

    /// Fails unless both rasters cover the same pixel grid
    pub fn check_same_grid(&self, other: &Raster) -> AtmoResult<()> {
        if self.height() != other.height() || self.width() != other.width() {
            return Err(AtmoError::Processing(format!(
                "Raster grids differ: {}x{} vs {}x{}",
                self.width(),
                self.height(),
                other.width(),
                other.height()
            )));
        }
        Ok(())
    }
}

/// Error types for correction processing
#[derive(Debug, thiserror::Error)]
pub enum AtmoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing input: {0}")]
    Precondition(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Header field not found: {0}")]
    MissingHeaderField(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),

    /// Raised by radiative-transfer implementations, passed on untouched
    #[error("{0}")]
    Solver(String),

    #[error("No dark targets found for band {band} after {attempts} attempts (last percentile {percentile})")]
    DarkTargetsNotFound {
        band: usize,
        attempts: usize,
        percentile: f64,
    },

    #[error("Too few dark target samples for band {band}: {found}")]
    InsufficientSamples { band: usize, found: usize },

    #[error("{operation} is not supported for sensor {sensor}")]
    Unsupported { sensor: String, operation: String },

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for correction operations
pub type AtmoResult<T> = Result<T, AtmoError>;
