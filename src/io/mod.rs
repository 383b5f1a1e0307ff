//! I/O modules for rasters, sensor headers, projections and footprints

pub mod footprint;
pub mod header;
pub mod projection;
pub mod raster;
pub mod scratch;

pub use footprint::{FootprintFeature, FootprintSink, MemoryFootprintSink, ShapefileFootprintWriter};
pub use header::KeyValueHeader;
pub use projection::{AffinePointTransform, GdalPointTransform, PointTransform, SrsDefinition};
pub use raster::{GdalRasterStore, MemoryRasterStore, RasterStore};
pub use scratch::ScratchDir;
