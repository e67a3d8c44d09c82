//! 64-bit perceptual hash used to auto-match a suspect image against the
//! catalog when no side-info reference is supplied.
//!
//! The 2-D DCT here follows a row/transpose/row/transpose-back structure
//! generalized to an arbitrary square block size so it can run over the
//! 32x32 downsample this algorithm calls for.

use image::{imageops::FilterType, DynamicImage};
use rustdct::DctPlanner;

const DOWNSAMPLE: usize = 32;
const HASH_BLOCK: usize = 8;

/// Applies a forward 2-D DCT-II in place to a single `n x n` block.
fn dct2_inplace(block: &mut [f32], n: usize) {
    let mut planner = DctPlanner::new();
    let dct = planner.plan_dct2(n);

    for row in block.chunks_mut(n) {
        dct.process_dct2(row);
    }

    let mut transposed = vec![0f32; n * n];
    for i in 0..n {
        for j in 0..n {
            transposed[i * n + j] = block[j * n + i];
        }
    }
    for row in transposed.chunks_mut(n) {
        dct.process_dct2(row);
    }
    for i in 0..n {
        for j in 0..n {
            block[j * n + i] = transposed[i * n + j];
        }
    }
}

/// Computes the 64-bit pHash of an image: grayscale -> 32x32 downsample ->
/// 2-D DCT -> top-left 8x8 block (minus DC) -> bit per coefficient vs the
/// median of the rest.
pub fn phash64(img: &DynamicImage) -> u64 {
    let gray = img
        .resize_exact(DOWNSAMPLE as u32, DOWNSAMPLE as u32, FilterType::Triangle)
        .to_luma8();

    let mut block: Vec<f32> = gray.pixels().map(|p| f32::from(p.0[0])).collect();
    dct2_inplace(&mut block, DOWNSAMPLE);

    let mut low = [0f32; HASH_BLOCK * HASH_BLOCK];
    for i in 0..HASH_BLOCK {
        for j in 0..HASH_BLOCK {
            low[i * HASH_BLOCK + j] = block[i * DOWNSAMPLE + j];
        }
    }

    let mut rest: Vec<f32> = low[1..].to_vec();
    rest.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = if rest.len() % 2 == 0 {
        (rest[rest.len() / 2 - 1] + rest[rest.len() / 2]) / 2.0
    } else {
        rest[rest.len() / 2]
    };

    let mut hash: u64 = 0;
    for (i, &v) in low.iter().enumerate().take(64) {
        hash <<= 1;
        if v > median {
            hash |= 1;
        }
    }
    hash
}

/// Hamming distance between two pHashes: population count of the XOR.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_image(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let v = ((x * 255) / w.max(1)) as u8;
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let img = gradient_image(64, 64);
        assert_eq!(hamming(phash64(&img), phash64(&img)), 0);
    }

    #[test]
    fn similar_images_stay_within_threshold() {
        let a = gradient_image(256, 256);
        // simulate mild recompression/resizing by downscaling and back up
        let b = a
            .resize_exact(230, 230, FilterType::Triangle)
            .resize_exact(256, 256, FilterType::Triangle);
        assert!(hamming(phash64(&a), phash64(&b)) <= 12);
    }
}
