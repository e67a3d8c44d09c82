//! Shared image-plane helpers used by the embedder, extractor, and detector:
//! RGB <-> per-channel float matrix conversion, canonical-size resampling,
//! grayscale conversion, and min-max normalization back to 8-bit.
//!
//! Centralizing these keeps resize/split/normalize behavior identical across
//! every caller instead of drifting slightly between them.

use image::{DynamicImage, GenericImageView, GrayImage, RgbImage};
use nalgebra::DMatrix;

/// The three color channels of an RGB image, each promoted to `f64`.
pub struct RgbChannels {
    pub r: DMatrix<f64>,
    pub g: DMatrix<f64>,
    pub b: DMatrix<f64>,
}

/// Splits an RGB image into three `(height, width)` float matrices.
pub fn split_channels(img: &RgbImage) -> RgbChannels {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let mut r = DMatrix::zeros(h, w);
    let mut g = DMatrix::zeros(h, w);
    let mut b = DMatrix::zeros(h, w);
    for y in 0..h {
        for x in 0..w {
            let px = img.get_pixel(x as u32, y as u32).0;
            r[(y, x)] = f64::from(px[0]);
            g[(y, x)] = f64::from(px[1]);
            b[(y, x)] = f64::from(px[2]);
        }
    }
    RgbChannels { r, g, b }
}

/// Merges three normalized `u8` channel matrices back into an RGB image, in
/// deterministic (R, G, B) order.
pub fn merge_channels(r: &DMatrix<u8>, g: &DMatrix<u8>, b: &DMatrix<u8>) -> RgbImage {
    let (h, w) = r.shape();
    let mut img = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            img.put_pixel(
                x as u32,
                y as u32,
                image::Rgb([r[(y, x)], g[(y, x)], b[(y, x)]]),
            );
        }
    }
    img
}

/// Min-max normalizes a float channel matrix into `[0, 255]` and casts to
/// `u8`. Apply exactly once per channel, only on the final result — running
/// it twice visibly degrades the recovered signal's correlation with the
/// original.
pub fn normalize_to_u8(mat: &DMatrix<f64>) -> DMatrix<u8> {
    let min = mat.iter().copied().fold(f64::INFINITY, f64::min);
    let max = mat.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    mat.map(|v| {
        if range.abs() < f64::EPSILON {
            0u8
        } else {
            (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
        }
    })
}

/// Resizes to the canonical `(width, height)` pair. This is the single
/// resize entry point shared by embed and extract so the two can never
/// disagree on whether a recorded size means `(W, H)` or `(H, W)` — it is
/// always `(width, height)`.
pub fn resize_to(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
}

/// Converts to 8-bit grayscale.
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_then_merge_round_trips_exactly() {
        let mut img = RgbImage::new(4, 3);
        for y in 0..3u32 {
            for x in 0..4u32 {
                img.put_pixel(x, y, image::Rgb([x as u8 * 10, y as u8 * 20, 5]));
            }
        }
        let channels = split_channels(&img);
        let r8 = normalize_to_u8(&channels.r);
        // normalize_to_u8 rescales, so compare shapes rather than exact values here.
        assert_eq!(r8.shape(), (3, 4));
        let merged = merge_channels(
            &normalize_to_u8(&channels.r),
            &normalize_to_u8(&channels.g),
            &normalize_to_u8(&channels.b),
        );
        assert_eq!(merged.dimensions(), img.dimensions());
    }

    #[test]
    fn normalize_constant_matrix_is_zero() {
        let mat = DMatrix::from_element(4, 4, 7.0);
        let n = normalize_to_u8(&mat);
        assert!(n.iter().all(|&v| v == 0));
    }
}
