//! Core correction modules

pub mod aot;
pub mod calibrate;
pub mod clear_sky;
pub mod dark_targets;
pub mod dos;
pub mod filters;
pub mod interpolate;
pub mod segmentation;
pub mod sixs;
pub mod terrain_shadow;

// Re-export main types
pub use aot::{AotEstimate, AotEstimator, AotSearchParams};
pub use calibrate::{RadianceScaling, ReflectanceScaling};
pub use clear_sky::{ClearSkyClassifier, ClearSkyParams, DistanceClearSkyClassifier};
pub use dark_targets::{DarkTargetExtractor, DarkTargetParams, DarkTargets, ThresholdMode};
pub use dos::{DosEngine, DosParams, OffsetSurfaces};
pub use interpolate::{InterpolationParams, PointInterpolator, PointSample};
pub use sixs::{
    AerosolProfile, AotLutEntry, AtmosProfile, ElevationAotLutEntry, ElevationLutEntry, GroundReflectance,
    LutBuilder, LutParams, RadiativeTransfer, SixSCoefficients, SixSGeometry, SixSParams, SixSRequest,
    SpectralBand,
};
pub use terrain_shadow::{topographic_shadow_mask, ShadowMaskParams};
