//! atmocorr: atmospheric correction of optical satellite imagery
//!
//! Converts Level-1 digital numbers to radiance, top-of-atmosphere
//! reflectance and surface reflectance. Surface reflectance comes from
//! dark object subtraction or from 6S radiative transfer coefficients,
//! optionally varying with elevation and aerosol optical thickness.

pub mod core;
pub mod io;
pub mod sensor;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{AtmoError, AtmoResult, BandImage, GeoTransform, LabelImage, PixelType, Raster};

pub use crate::core::{
    AotEstimate, AotEstimator, AotSearchParams, DosEngine, DosParams, LutBuilder, RadiativeTransfer,
    SixSCoefficients, SixSParams, SixSRequest,
};
pub use io::{GdalRasterStore, KeyValueHeader, MemoryRasterStore, RasterStore, ScratchDir};
pub use sensor::{Landsat1Mss, Sensor, SensorOptions, SensorRegistry, SensorState};
