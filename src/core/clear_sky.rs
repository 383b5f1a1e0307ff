//! Clear-sky region mask from a cloud mask and a valid-data mask

use crate::core::filters::{distance_to_features, opening};
use crate::core::segmentation::{clump, remove_small_clumps};
use crate::types::{AtmoResult, PixelType, Raster};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Clear-sky classification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearSkyParams {
    pub init_region_distance: f64, // Seed pixels lie this far (map units) from cloud
    pub init_region_min_size: usize, // Pixels
    pub final_region_distance: f64,
    pub morph_size: usize, // Opening window, odd
}

impl Default for ClearSkyParams {
    fn default() -> Self {
        Self {
            init_region_distance: 3000.0,
            init_region_min_size: 3000,
            final_region_distance: 1000.0,
            morph_size: 21,
        }
    }
}

/// Turns cloud and valid masks into a clear-sky mask (1 = clear)
pub trait ClearSkyClassifier {
    fn classify(&self, clouds: &Raster, valid: &Raster, params: &ClearSkyParams) -> AtmoResult<Raster>;
}

/// Region growing classifier driven by distance to cloud
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceClearSkyClassifier;

impl ClearSkyClassifier for DistanceClearSkyClassifier {
    fn classify(&self, clouds: &Raster, valid: &Raster, params: &ClearSkyParams) -> AtmoResult<Raster> {
        clouds.check_same_grid(valid)?;
        log::info!("Generating clear-sky mask");

        let cloud = clouds.band(0)?.mapv(|v| v > 0.0);
        let valid_mask = valid.band(0)?.mapv(|v| v > 0.0);
        let clear: Array2<bool> = Zip::from(&valid_mask).and(&cloud).map_collect(|&v, &c| v && !c);

        let (dx, dy) = clouds.geo_transform.pixel_spacing();
        let pixel_size = (dx.min(dy)) as f32;
        let distance = distance_to_features(&cloud).mapv(|d| d * pixel_size);

        // Seeds: large clear regions well away from any cloud
        let init_distance = params.init_region_distance as f32;
        let seed_candidates = Zip::from(&clear)
            .and(&distance)
            .map_collect(|&c, &d| c && d > init_distance);
        let (labels, n) = clump(&seed_candidates);
        let (seeds, n_seeds) = remove_small_clumps(&labels, n, params.init_region_min_size);
        log::debug!("{} clear-sky seed regions", n_seeds);

        // Final regions: clear pixels beyond the final distance that touch a seed
        let final_distance = params.final_region_distance as f32;
        let candidates = Zip::from(&clear)
            .and(&distance)
            .map_collect(|&c, &d| c && d > final_distance);
        let (regions, n_regions) = clump(&candidates);
        let mut keep = vec![false; n_regions + 1];
        Zip::from(&regions).and(&seeds).for_each(|&r, &s| {
            if s > 0 {
                keep[r as usize] = true;
            }
        });
        keep[0] = false;
        let grown = regions.mapv(|r| keep[r as usize]);

        let opened = opening(&grown, params.morph_size / 2);
        let mask = Zip::from(&opened)
            .and(&valid_mask)
            .map_collect(|&o, &v| if o && v { 1.0f32 } else { 0.0 });
        log::info!(
            "Clear-sky pixels: {} of {}",
            mask.iter().filter(|&&v| v > 0.0).count(),
            mask.len()
        );

        Ok(Raster::from_band(mask, clouds)
            .with_band_names(&["ClearSky"])
            .with_pixel_type(PixelType::UInt8)
            .with_no_data(0.0))
    }
}
