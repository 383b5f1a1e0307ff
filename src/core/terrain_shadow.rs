use crate::core::filters::median_filter;
use crate::types::{AtmoError, AtmoResult, BandImage, GeoTransform, PixelType, Raster};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Topographic shadow mask parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowMaskParams {
    pub median_window: usize,   // Applied to the raw mask, 0 disables
    pub cast_shadows: bool,     // Ray march toward the sun in addition to self shadow
    pub max_ray_pixels: usize,  // Hard limit on the ray length
}

impl Default for ShadowMaskParams {
    fn default() -> Self {
        Self {
            median_window: 3,
            cast_shadows: true,
            max_ray_pixels: 10_000,
        }
    }
}

/// Slope and compass aspect of a DEM, both in radians.
///
/// Aspect is the downslope direction clockwise from north; flat cells get
/// aspect 0. Edge cells copy their inner neighbour.
pub fn slope_aspect(dem: &BandImage, pixel_spacing: (f64, f64)) -> AtmoResult<(BandImage, BandImage)> {
    let (height, width) = dem.dim();
    if height < 3 || width < 3 {
        return Err(AtmoError::InvalidParameter(format!(
            "DEM of {}x{} is too small for slope calculation",
            width, height
        )));
    }
    log::debug!("Calculating slope and aspect from DEM");

    let dx = pixel_spacing.0 as f32;
    let dy = pixel_spacing.1 as f32;
    let mut slope = Array2::zeros((height, width));
    let mut aspect = Array2::zeros((height, width));

    for i in 1..height - 1 {
        for j in 1..width - 1 {
            // Central differences, rows run southward
            let dz_east = (dem[[i, j + 1]] - dem[[i, j - 1]]) / (2.0 * dx);
            let dz_north = (dem[[i - 1, j]] - dem[[i + 1, j]]) / (2.0 * dy);

            slope[[i, j]] = dz_east.hypot(dz_north).atan();
            if dz_east != 0.0 || dz_north != 0.0 {
                let a = (-dz_east).atan2(-dz_north);
                aspect[[i, j]] = if a < 0.0 { a + std::f32::consts::TAU } else { a };
            }
        }
    }

    fill_edge_values(&mut slope);
    fill_edge_values(&mut aspect);
    Ok((slope, aspect))
}

fn fill_edge_values(array: &mut Array2<f32>) {
    let (height, width) = array.dim();
    for j in 0..width {
        array[[0, j]] = array[[1, j]];
        array[[height - 1, j]] = array[[height - 2, j]];
    }
    for i in 0..height {
        array[[i, 0]] = array[[i, 1]];
        array[[i, width - 1]] = array[[i, width - 2]];
    }
}

/// Cosine of the local solar incidence angle
pub fn hillshade(slope: &BandImage, aspect: &BandImage, solar_zenith_deg: f64, solar_azimuth_deg: f64) -> BandImage {
    let zenith = solar_zenith_deg.to_radians() as f32;
    let azimuth = solar_azimuth_deg.to_radians() as f32;
    let (cos_z, sin_z) = (zenith.cos(), zenith.sin());
    Zip::from(slope)
        .and(aspect)
        .map_collect(|&s, &a| cos_z * s.cos() + sin_z * s.sin() * (azimuth - a).cos())
}

/// True where a ray from the pixel toward the sun hits terrain
fn cast_shadow(
    dem: &BandImage,
    geo: &GeoTransform,
    solar_zenith_deg: f64,
    solar_azimuth_deg: f64,
    max_ray_pixels: usize,
) -> Array2<bool> {
    let (height, width) = dem.dim();
    let (dx, dy) = geo.pixel_spacing();
    let step = dx.min(dy);
    let azimuth = solar_azimuth_deg.to_radians();
    // Pixel offsets per step, rows grow southward
    let d_col = azimuth.sin() * step / dx;
    let d_row = -azimuth.cos() * step / dy;
    let rise = step / solar_zenith_deg.to_radians().tan();
    let dem_max = dem.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;

    let mut shadow = Array2::from_elem((height, width), false);
    let kernel = |(i, j): (usize, usize), out: &mut bool| {
        let mut row = i as f64;
        let mut col = j as f64;
        let mut z = dem[[i, j]] as f64;
        for _ in 0..max_ray_pixels {
            row += d_row;
            col += d_col;
            z += rise;
            if z > dem_max {
                break;
            }
            let (r, c) = (row.round(), col.round());
            if r < 0.0 || c < 0.0 || r >= height as f64 || c >= width as f64 {
                break;
            }
            if dem[[r as usize, c as usize]] as f64 > z {
                *out = true;
                break;
            }
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut shadow).par_for_each(kernel);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut shadow).for_each(kernel);

    shadow
}

/// Direct topographic shadow mask (1 = shadow) for the given sun position
pub fn topographic_shadow_mask(
    dem: &Raster,
    solar_zenith_deg: f64,
    solar_azimuth_deg: f64,
    params: &ShadowMaskParams,
) -> AtmoResult<Raster> {
    log::info!(
        "Generating topographic shadow mask (sun zenith {:.2}, azimuth {:.2})",
        solar_zenith_deg,
        solar_azimuth_deg
    );
    let elevation = dem.band(0)?.to_owned();

    let mut shadow = if solar_zenith_deg >= 90.0 {
        log::warn!("Sun at or below the horizon, whole scene is in shadow");
        Array2::from_elem(elevation.dim(), 1.0f32)
    } else {
        let (slope, aspect) = slope_aspect(&elevation, dem.geo_transform.pixel_spacing())?;
        let illumination = hillshade(&slope, &aspect, solar_zenith_deg, solar_azimuth_deg);
        let mut mask = illumination.mapv(|c| if c <= 0.0 { 1.0f32 } else { 0.0 });
        if params.cast_shadows && solar_zenith_deg > 0.0 {
            let cast = cast_shadow(
                &elevation,
                &dem.geo_transform,
                solar_zenith_deg,
                solar_azimuth_deg,
                params.max_ray_pixels,
            );
            Zip::from(&mut mask).and(&cast).for_each(|m, &c| {
                if c {
                    *m = 1.0;
                }
            });
        }
        mask
    };

    if params.median_window > 0 {
        shadow = median_filter(&shadow, params.median_window)?;
    }
    log::info!(
        "Shadowed pixels: {} of {}",
        shadow.iter().filter(|&&v| v > 0.0).count(),
        shadow.len()
    );

    Ok(Raster::from_band(shadow, dem)
        .with_band_names(&["TopoShadow"])
        .with_pixel_type(PixelType::UInt8)
        .with_no_data(0.0))
}
