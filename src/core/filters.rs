//! Neighbourhood filters for masks and single band images

use crate::types::{AtmoError, AtmoResult};
use ndarray::{Array2, Zip};

/// Median over a square window, clipped at the image edges.
///
/// Zero pixels take part in the median so that
/// binary masks keep their meaning.
pub fn median_filter(image: &Array2<f32>, window_size: usize) -> AtmoResult<Array2<f32>> {
    if window_size == 0 || window_size % 2 == 0 {
        return Err(AtmoError::InvalidParameter(format!(
            "Median window must be odd and positive, got {}",
            window_size
        )));
    }
    log::debug!("Applying {}x{} median filter", window_size, window_size);

    let (height, width) = image.dim();
    let half_window = window_size / 2;
    let mut filtered = Array2::zeros((height, width));

    let kernel = |(i, j): (usize, usize), out: &mut f32| {
        let i_start = i.saturating_sub(half_window);
        let i_end = (i + half_window + 1).min(height);
        let j_start = j.saturating_sub(half_window);
        let j_end = (j + half_window + 1).min(width);

        let mut window_values = Vec::with_capacity(window_size * window_size);
        for wi in i_start..i_end {
            for wj in j_start..j_end {
                let v = image[[wi, wj]];
                if v.is_finite() {
                    window_values.push(v);
                }
            }
        }
        *out = if window_values.is_empty() {
            image[[i, j]]
        } else {
            window_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            window_values[window_values.len() / 2]
        };
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut filtered).par_for_each(kernel);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut filtered).for_each(kernel);

    Ok(filtered)
}

/// Binary erosion with a square structuring element of the given radius.
/// Pixels outside the image count as set.
pub fn erode(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    let mut result = mask.clone();
    for _ in 0..radius {
        let (height, width) = result.dim();
        let current = result.clone();
        for i in 0..height {
            for j in 0..width {
                if !current[[i, j]] {
                    continue;
                }
                let i_start = i.saturating_sub(1);
                let i_end = (i + 2).min(height);
                let j_start = j.saturating_sub(1);
                let j_end = (j + 2).min(width);
                'window: for ni in i_start..i_end {
                    for nj in j_start..j_end {
                        if !current[[ni, nj]] {
                            result[[i, j]] = false;
                            break 'window;
                        }
                    }
                }
            }
        }
    }
    result
}

/// Binary dilation with a square structuring element of the given radius
pub fn dilate(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    let mut result = mask.clone();
    for _ in 0..radius {
        let (height, width) = result.dim();
        let current = result.clone();
        for i in 0..height {
            for j in 0..width {
                if !current[[i, j]] {
                    continue;
                }
                for ni in i.saturating_sub(1)..(i + 2).min(height) {
                    for nj in j.saturating_sub(1)..(j + 2).min(width) {
                        result[[ni, nj]] = true;
                    }
                }
            }
        }
    }
    result
}

/// Erosion followed by dilation; removes features narrower than the element
pub fn opening(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    dilate(&erode(mask, radius), radius)
}

/// Approximate Euclidean distance (in pixels) from every pixel to the
/// nearest set pixel of `features`, using a two pass chamfer transform.
///
/// Images without any feature pixel get `f32::INFINITY` everywhere.
pub fn distance_to_features(features: &Array2<bool>) -> Array2<f32> {
    let (height, width) = features.dim();
    let diag = std::f32::consts::SQRT_2;
    let mut dist = features.mapv(|f| if f { 0.0 } else { f32::INFINITY });

    // Forward pass
    for i in 0..height {
        for j in 0..width {
            let mut d = dist[[i, j]];
            if j > 0 {
                d = d.min(dist[[i, j - 1]] + 1.0);
            }
            if i > 0 {
                d = d.min(dist[[i - 1, j]] + 1.0);
                if j > 0 {
                    d = d.min(dist[[i - 1, j - 1]] + diag);
                }
                if j + 1 < width {
                    d = d.min(dist[[i - 1, j + 1]] + diag);
                }
            }
            dist[[i, j]] = d;
        }
    }

    // Backward pass
    for i in (0..height).rev() {
        for j in (0..width).rev() {
            let mut d = dist[[i, j]];
            if j + 1 < width {
                d = d.min(dist[[i, j + 1]] + 1.0);
            }
            if i + 1 < height {
                d = d.min(dist[[i + 1, j]] + 1.0);
                if j + 1 < width {
                    d = d.min(dist[[i + 1, j + 1]] + diag);
                }
                if j > 0 {
                    d = d.min(dist[[i + 1, j - 1]] + diag);
                }
            }
            dist[[i, j]] = d;
        }
    }

    dist
}
