use crate::core::sixs::{AotLutEntry, ElevationAotLutEntry, ElevationLutEntry, SixSCoefficients};
use crate::types::{AtmoError, AtmoResult, BandImage, PixelType, Raster};
use ndarray::{Array3, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Linear DN to radiance scaling of one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadianceScaling {
    pub name: String,
    pub qcal_min: f64,
    pub qcal_max: f64,
    pub l_min: f64,
    pub l_max: f64,
}

impl RadianceScaling {
    pub fn gain(&self) -> f64 {
        (self.l_max - self.l_min) / (self.qcal_max - self.qcal_min)
    }

    /// Radiance of one DN; DN 0 is nodata and maps to 0
    #[inline]
    pub fn radiance(&self, dn: f32) -> f32 {
        if dn == 0.0 {
            return 0.0;
        }
        (self.gain() * (dn as f64 - self.qcal_min) + self.l_min) as f32
    }
}

/// Integer encoding of reflectance outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectanceScaling {
    pub scale: f64,  // Reflectance 1.0 is stored as `scale`
    pub offset: f64,
}

impl Default for ReflectanceScaling {
    fn default() -> Self {
        Self {
            scale: 1000.0,
            offset: 0.0,
        }
    }
}

impl ReflectanceScaling {
    #[inline]
    fn encode(&self, reflectance: f64) -> f32 {
        (reflectance * self.scale + self.offset) as f32
    }
}

/// Per pixel kernel over one band, row parallel when enabled
fn map_band<F>(band: ArrayView2<f32>, kernel: F) -> BandImage
where
    F: Fn(f32) -> f32 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::from(&band).par_map_collect(|&v| kernel(v))
    }
    #[cfg(not(feature = "parallel"))]
    {
        band.mapv(kernel)
    }
}

/// Two input kernel, radiance plus one co-registered auxiliary band
fn map_band_with<F>(band: ArrayView2<f32>, aux: ArrayView2<f32>, kernel: F) -> BandImage
where
    F: Fn(f32, f32) -> f32 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        Zip::from(&band).and(&aux).par_map_collect(|&v, &a| kernel(v, a))
    }
    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(&band).and(&aux).map_collect(|&v, &a| kernel(v, a))
    }
}

fn check_band_count(raster: &Raster, expected: usize, what: &str) -> AtmoResult<()> {
    if raster.band_count() != expected {
        return Err(AtmoError::InvalidParameter(format!(
            "{} expects {} bands, raster has {}",
            what,
            expected,
            raster.band_count()
        )));
    }
    Ok(())
}

fn check_aux_grid(raster: &Raster, aux: &BandImage, what: &str) -> AtmoResult<()> {
    if aux.dim() != (raster.height(), raster.width()) {
        return Err(AtmoError::Processing(format!(
            "{} is {}x{}, image is {}x{}",
            what,
            aux.ncols(),
            aux.nrows(),
            raster.width(),
            raster.height()
        )));
    }
    Ok(())
}

fn stack_bands(bands: Vec<BandImage>, like: &Raster) -> AtmoResult<Raster> {
    Ok(Raster::from_bands(&bands, like)?.with_band_names(&like.band_names))
}

/// Convert DN to at-sensor radiance, one scaling per band
pub fn dn_to_radiance(dn: &Raster, scalings: &[RadianceScaling]) -> AtmoResult<Raster> {
    check_band_count(dn, scalings.len(), "Radiance conversion")?;
    log::info!("Converting {} bands from DN to radiance", scalings.len());

    let mut bands = Vec::with_capacity(scalings.len());
    for (index, scaling) in scalings.iter().enumerate() {
        log::debug!(
            "{}: gain {:.6}, QCAL [{}, {}], L [{}, {}]",
            scaling.name,
            scaling.gain(),
            scaling.qcal_min,
            scaling.qcal_max,
            scaling.l_min,
            scaling.l_max
        );
        bands.push(map_band(dn.band(index)?, |v| scaling.radiance(v)));
    }

    let names: Vec<&str> = scalings.iter().map(|s| s.name.as_str()).collect();
    Ok(Raster::from_bands(&bands, dn)?
        .with_band_names(&names)
        .with_pixel_type(PixelType::Float32)
        .with_no_data(0.0))
}

/// Earth-Sun distance in astronomical units for a day of year
pub fn earth_sun_distance(day_of_year: u32) -> f64 {
    1.0 - 0.01672 * (0.01720209895 * (day_of_year as f64 - 4.0)).cos()
}

/// Convert radiance to scaled TOA reflectance
///
/// `solar_irradiance` is the exo-atmospheric irradiance (W m-2 um-1) of each band.
pub fn radiance_to_toa(
    radiance: &Raster,
    solar_irradiance: &[f64],
    solar_zenith_deg: f64,
    day_of_year: u32,
    scale: f64,
) -> AtmoResult<Raster> {
    check_band_count(radiance, solar_irradiance.len(), "TOA conversion")?;
    let distance = earth_sun_distance(day_of_year);
    let cos_zenith = solar_zenith_deg.to_radians().cos();
    if cos_zenith <= 0.0 {
        return Err(AtmoError::InvalidParameter(format!(
            "Sun below horizon (zenith {})",
            solar_zenith_deg
        )));
    }
    log::info!(
        "Converting to TOA reflectance (d = {:.5} AU, zenith {:.3})",
        distance,
        solar_zenith_deg
    );

    let mut bands = Vec::with_capacity(solar_irradiance.len());
    for (index, &esun) in solar_irradiance.iter().enumerate() {
        let factor = std::f64::consts::PI * distance * distance / (esun * cos_zenith) * scale;
        bands.push(map_band(radiance.band(index)?, |l| (l as f64 * factor) as f32));
    }

    Ok(stack_bands(bands, radiance)?
        .with_pixel_type(PixelType::UInt16)
        .with_no_data(0.0))
}

#[inline]
fn apply_coefficients(radiance: f32, coefficients: &SixSCoefficients, scaling: &ReflectanceScaling) -> f32 {
    if radiance == 0.0 {
        return 0.0;
    }
    scaling.encode(coefficients.reflectance(radiance as f64))
}

/// Surface reflectance from one coefficient set per band
pub fn apply_single_coefficients(
    radiance: &Raster,
    coefficients: &[SixSCoefficients],
    scaling: &ReflectanceScaling,
) -> AtmoResult<Raster> {
    check_band_count(radiance, coefficients.len(), "6S correction")?;
    log::info!("Applying 6S coefficients to {} bands", coefficients.len());

    let mut bands = Vec::with_capacity(coefficients.len());
    for (index, coeffs) in coefficients.iter().enumerate() {
        log::debug!("Band {}: xa {}, xb {}, xc {}", index + 1, coeffs.xa, coeffs.xb, coeffs.xc);
        bands.push(map_band(radiance.band(index)?, |l| apply_coefficients(l, coeffs, scaling)));
    }
    Ok(stack_bands(bands, radiance)?
        .with_pixel_type(PixelType::UInt16)
        .with_no_data(0.0))
}

/// Index of the entry whose key is closest to `target`, first wins ties
pub fn nearest_index<I>(keys: I, target: f64) -> Option<usize>
where
    I: IntoIterator<Item = f64>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, key) in keys.into_iter().enumerate() {
        let distance = (key - target).abs();
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}

fn check_lut_bands(entries: &[&[SixSCoefficients]], bands: usize) -> AtmoResult<()> {
    if entries.is_empty() {
        return Err(AtmoError::InvalidParameter("Empty lookup table".to_string()));
    }
    if let Some(bad) = entries.iter().find(|c| c.len() != bands) {
        return Err(AtmoError::InvalidParameter(format!(
            "Lookup table entry has {} bands, image has {}",
            bad.len(),
            bands
        )));
    }
    Ok(())
}

/// Surface reflectance with coefficients picked per pixel from the
/// nearest elevation entry
pub fn apply_elevation_lut(
    radiance: &Raster,
    dem: &BandImage,
    lut: &[ElevationLutEntry],
    scaling: &ReflectanceScaling,
) -> AtmoResult<Raster> {
    check_aux_grid(radiance, dem, "DEM")?;
    let entries: Vec<&[SixSCoefficients]> = lut.iter().map(|e| e.coefficients.as_slice()).collect();
    check_lut_bands(&entries, radiance.band_count())?;
    log::info!("Applying elevation LUT with {} entries", lut.len());

    let elevations: Vec<f64> = lut.iter().map(|e| e.elevation).collect();
    let lookup = |z: f32| nearest_index(elevations.iter().copied(), z as f64).unwrap_or(0);

    let mut bands = Vec::with_capacity(radiance.band_count());
    for index in 0..radiance.band_count() {
        let band = map_band_with(radiance.band(index)?, dem.view(), |l, z| {
            apply_coefficients(l, &lut[lookup(z)].coefficients[index], scaling)
        });
        bands.push(band);
    }
    Ok(stack_bands(bands, radiance)?
        .with_pixel_type(PixelType::UInt16)
        .with_no_data(0.0))
}

fn nearest_aot_entry(entries: &[AotLutEntry], aot: f64) -> Option<&AotLutEntry> {
    nearest_index(entries.iter().map(|e| e.aot), aot).map(|i| &entries[i])
}

/// Surface reflectance with coefficients picked per pixel from the
/// nearest elevation and, within it, the nearest AOT
pub fn apply_elevation_aot_lut(
    radiance: &Raster,
    dem: &BandImage,
    aot: &BandImage,
    lut: &[ElevationAotLutEntry],
    scaling: &ReflectanceScaling,
) -> AtmoResult<Raster> {
    check_aux_grid(radiance, dem, "DEM")?;
    check_aux_grid(radiance, aot, "AOT image")?;
    let entries: Vec<&[SixSCoefficients]> = lut
        .iter()
        .flat_map(|e| e.aot_entries.iter().map(|a| a.coefficients.as_slice()))
        .collect();
    check_lut_bands(&entries, radiance.band_count())?;
    if lut.iter().any(|e| e.aot_entries.is_empty()) {
        return Err(AtmoError::InvalidParameter(
            "Lookup table elevation without AOT entries".to_string(),
        ));
    }
    log::info!("Applying elevation x AOT LUT with {} elevations", lut.len());

    let elevations: Vec<f64> = lut.iter().map(|e| e.elevation).collect();
    let (rows, cols) = dem.dim();
    let mut data = Array3::<f32>::zeros((radiance.band_count(), rows, cols));

    for index in 0..radiance.band_count() {
        let band = radiance.band(index)?;
        let mut out = data.index_axis_mut(Axis(0), index);
        let kernel = |o: &mut f32, &l: &f32, &z: &f32, &t: &f32| {
            let row = nearest_index(elevations.iter().copied(), z as f64).unwrap_or(0);
            if let Some(entry) = nearest_aot_entry(&lut[row].aot_entries, t as f64) {
                *o = apply_coefficients(l, &entry.coefficients[index], scaling);
            }
        };
        #[cfg(feature = "parallel")]
        Zip::from(&mut out).and(&band).and(dem).and(aot).par_for_each(kernel);
        #[cfg(not(feature = "parallel"))]
        Zip::from(&mut out).and(&band).and(dem).and(aot).for_each(kernel);
    }

    Ok(radiance
        .like(data)
        .with_band_names(&radiance.band_names)
        .with_pixel_type(PixelType::UInt16)
        .with_no_data(0.0))
}

/// 1 where a band reached its saturation DN, one output band per input band
pub fn saturation_mask(dn: &Raster, saturated_dn: &[f64]) -> AtmoResult<Raster> {
    check_band_count(dn, saturated_dn.len(), "Saturation mask")?;
    let mut bands = Vec::with_capacity(saturated_dn.len());
    for (index, &limit) in saturated_dn.iter().enumerate() {
        let band = map_band(dn.band(index)?, |v| if v as f64 >= limit { 1.0 } else { 0.0 });
        log::debug!(
            "Band {}: {} saturated pixels",
            index + 1,
            band.iter().filter(|&&v| v > 0.0).count()
        );
        bands.push(band);
    }
    Ok(stack_bands(bands, dn)?.with_pixel_type(PixelType::UInt8))
}

/// 1 where every band holds data, 0 elsewhere
pub fn valid_data_mask(image: &Raster) -> AtmoResult<Raster> {
    let mask = image
        .data
        .map_axis(Axis(0), |pixel| if pixel.iter().all(|&v| v != 0.0) { 1.0f32 } else { 0.0 });
    Ok(Raster::from_band(mask, image)
        .with_band_names(&["Valid"])
        .with_pixel_type(PixelType::UInt8)
        .with_no_data(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn raster(bands: usize, value: f32) -> Raster {
        let mut data = Array3::from_elem((bands, 3, 3), value);
        data[[0, 0, 0]] = 0.0;
        Raster::new(data, GeoTransform::default(), "").with_band_names(&vec!["b"; bands])
    }

    #[test]
    fn test_dn_to_radiance() {
        let scaling = RadianceScaling {
            name: "Green".to_string(),
            qcal_min: 1.0,
            qcal_max: 127.0,
            l_min: 0.0,
            l_max: 248.0,
        };
        let out = dn_to_radiance(&raster(1, 64.0), &[scaling]).unwrap();
        assert_eq!(out.data[[0, 0, 0]], 0.0);
        assert_relative_eq!(out.data[[0, 1, 1]], (248.0 / 126.0 * 63.0) as f32, epsilon = 1e-4);
        assert_eq!(out.band_names, vec!["Green".to_string()]);
        assert!(dn_to_radiance(&raster(2, 64.0), &[]).is_err());
    }

    #[test]
    fn test_earth_sun_distance() {
        assert!(earth_sun_distance(4) < 0.984);
        assert!(earth_sun_distance(186) > 1.016);
    }

    #[test]
    fn test_radiance_to_toa() {
        let out = radiance_to_toa(&raster(1, 100.0), &[1823.0], 30.0, 166, 1000.0).unwrap();
        let d = earth_sun_distance(166);
        let expected = std::f64::consts::PI * 100.0 * d * d / (1823.0 * 30f64.to_radians().cos()) * 1000.0;
        assert_relative_eq!(out.data[[0, 2, 2]] as f64, expected, epsilon = 1e-2);
        assert_eq!(out.data[[0, 0, 0]], 0.0);
        assert_eq!(out.pixel_type, PixelType::UInt16);
        assert!(radiance_to_toa(&raster(1, 100.0), &[1823.0], 95.0, 166, 1000.0).is_err());
    }

    #[test]
    fn test_single_coefficients() {
        let coeffs = SixSCoefficients { xa: 0.003, xb: 0.1, xc: 0.2 };
        let out = apply_single_coefficients(&raster(1, 100.0), &[coeffs], &ReflectanceScaling::default()).unwrap();
        let y = 0.003 * 100.0 - 0.1;
        assert_relative_eq!(out.data[[0, 1, 2]] as f64, y / (1.0 + 0.2 * y) * 1000.0, epsilon = 1e-3);
        assert_eq!(out.data[[0, 0, 0]], 0.0);
    }

    #[test]
    fn test_nearest_index() {
        let keys = [0.0, 100.0, 200.0];
        assert_eq!(nearest_index(keys, -50.0), Some(0));
        assert_eq!(nearest_index(keys, 149.0), Some(1));
        assert_eq!(nearest_index(keys, 150.0), Some(1));
        assert_eq!(nearest_index(keys, 5000.0), Some(2));
        assert_eq!(nearest_index(Vec::<f64>::new(), 1.0), None);
    }

    #[test]
    fn test_elevation_lut_picks_nearest() {
        let low = SixSCoefficients { xa: 0.002, xb: 0.0, xc: 0.0 };
        let high = SixSCoefficients { xa: 0.004, xb: 0.0, xc: 0.0 };
        let lut = vec![
            ElevationLutEntry { elevation: 0.0, coefficients: vec![low] },
            ElevationLutEntry { elevation: 100.0, coefficients: vec![high] },
        ];
        let mut dem = Array2::from_elem((3, 3), 10.0f32);
        dem[[2, 2]] = 90.0;
        let out = apply_elevation_lut(&raster(1, 100.0), &dem, &lut, &ReflectanceScaling::default()).unwrap();
        assert_relative_eq!(out.data[[0, 1, 1]], 200.0, epsilon = 1e-3);
        assert_relative_eq!(out.data[[0, 2, 2]], 400.0, epsilon = 1e-3);

        let wrong = Array2::zeros((2, 2));
        assert!(apply_elevation_lut(&raster(1, 100.0), &wrong, &lut, &ReflectanceScaling::default()).is_err());
    }

    #[test]
    fn test_elevation_aot_lut() {
        let entry = |xa: f64| SixSCoefficients { xa, xb: 0.0, xc: 0.0 };
        let lut = vec![ElevationAotLutEntry {
            elevation: 0.0,
            aot_entries: vec![
                AotLutEntry { aot: 0.05, coefficients: vec![entry(0.001)] },
                AotLutEntry { aot: 0.10, coefficients: vec![entry(0.002)] },
            ],
        }];
        let dem = Array2::zeros((3, 3));
        let mut aot = Array2::from_elem((3, 3), 0.05f32);
        aot[[1, 1]] = 0.11;
        let out = apply_elevation_aot_lut(&raster(1, 100.0), &dem, &aot, &lut, &ReflectanceScaling::default())
            .unwrap();
        assert_relative_eq!(out.data[[0, 0, 1]], 100.0, epsilon = 1e-3);
        assert_relative_eq!(out.data[[0, 1, 1]], 200.0, epsilon = 1e-3);
    }

    #[test]
    fn test_masks() {
        let mut dn = raster(2, 50.0);
        dn.data[[1, 2, 2]] = 127.0;
        let saturation = saturation_mask(&dn, &[127.0, 127.0]).unwrap();
        assert_eq!(saturation.data[[1, 2, 2]], 1.0);
        assert_eq!(saturation.data.sum(), 1.0);

        let valid = valid_data_mask(&dn).unwrap();
        assert_eq!(valid.band_count(), 1);
        assert_eq!(valid.data[[0, 0, 0]], 0.0);
        assert_eq!(valid.data[[0, 1, 1]], 1.0);
    }
}
