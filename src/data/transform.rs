//! Image preprocessing.
//!
//! `Preprocess` maps a raw sample onto the network's input contract:
//! channel count, spatial resolution, and per-channel normalization.
//! It is a pure function of the input image and is applied identically
//! on the train, eval, and export paths.

use crate::{AfinarError, Result};
use ndarray::Array3;

/// Preprocessing pipeline fixed at startup from the data config.
///
/// Applies, in order: channel normalization (replicate or truncate to
/// the target channel count), bilinear resize to the target resolution,
/// and `(x - mean) / std` per channel.
#[derive(Debug, Clone)]
pub struct Preprocess {
    in_channels: usize,
    target_hw: (usize, usize),
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Preprocess {
    /// Create a preprocessing pipeline.
    ///
    /// # Errors
    ///
    /// Returns a config error when `mean`/`std` lengths do not match
    /// `in_channels` or any std entry is not strictly positive.
    pub fn new(
        in_channels: usize,
        target_hw: (usize, usize),
        mean: Vec<f32>,
        std: Vec<f32>,
    ) -> Result<Self> {
        if mean.len() != in_channels {
            return Err(AfinarError::ConfigValue {
                field: "data.mean".to_string(),
                message: format!("length {} does not match in_channels {in_channels}", mean.len()),
                suggestion: "Provide one mean value per input channel".to_string(),
            });
        }
        if std.len() != in_channels {
            return Err(AfinarError::ConfigValue {
                field: "data.std".to_string(),
                message: format!("length {} does not match in_channels {in_channels}", std.len()),
                suggestion: "Provide one std value per input channel".to_string(),
            });
        }
        if std.iter().any(|&s| s <= 0.0) {
            return Err(AfinarError::ConfigValue {
                field: "data.std".to_string(),
                message: "values must be strictly positive".to_string(),
                suggestion: "Use the dataset's per-channel standard deviation".to_string(),
            });
        }
        Ok(Self { in_channels, target_hw, mean, std })
    }

    /// Shape of every output image as `(channels, height, width)`.
    #[must_use]
    pub fn output_shape(&self) -> (usize, usize, usize) {
        (self.in_channels, self.target_hw.0, self.target_hw.1)
    }

    /// Apply the full pipeline to one image.
    ///
    /// # Panics
    ///
    /// Panics when `image` has a zero dimension. Dataset loading and
    /// batch assembly reject such images before they reach here.
    #[must_use]
    pub fn apply(&self, image: &Array3<f32>) -> Array3<f32> {
        let fitted = fit_channels(image, self.in_channels);
        let mut out = resize_bilinear(&fitted, self.target_hw.0, self.target_hw.1);
        for (c, mut plane) in out.outer_iter_mut().enumerate() {
            let (m, s) = (self.mean[c], self.std[c]);
            plane.mapv_inplace(|v| (v - m) / s);
        }
        out
    }
}

/// Replicate (cycling) or truncate channels to `target_c`.
fn fit_channels(src: &Array3<f32>, target_c: usize) -> Array3<f32> {
    let src_c = src.shape()[0];
    if src_c == target_c {
        return src.clone();
    }
    let (h, w) = (src.shape()[1], src.shape()[2]);
    Array3::from_shape_fn((target_c, h, w), |(c, y, x)| src[[c % src_c, y, x]])
}

/// Bilinear resize with half-pixel centers, edge-clamped.
fn resize_bilinear(src: &Array3<f32>, th: usize, tw: usize) -> Array3<f32> {
    let (c, sh, sw) = (src.shape()[0], src.shape()[1], src.shape()[2]);
    if (sh, sw) == (th, tw) {
        return src.clone();
    }
    let scale_y = sh as f32 / th as f32;
    let scale_x = sw as f32 / tw as f32;
    Array3::from_shape_fn((c, th, tw), |(ch, y, x)| {
        let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (sh - 1) as f32);
        let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (sw - 1) as f32);
        let y0 = sy.floor() as usize;
        let x0 = sx.floor() as usize;
        let y1 = (y0 + 1).min(sh - 1);
        let x1 = (x0 + 1).min(sw - 1);
        let wy = sy - y0 as f32;
        let wx = sx - x0 as f32;
        let top = src[[ch, y0, x0]] * (1.0 - wx) + src[[ch, y0, x1]] * wx;
        let bottom = src[[ch, y1, x0]] * (1.0 - wx) + src[[ch, y1, x1]] * wx;
        top * (1.0 - wy) + bottom * wy
    })
}
