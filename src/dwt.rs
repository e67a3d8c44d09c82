//! Single-level 2-D Haar discrete wavelet transform.
//!
//! No wavelet crate appeared in the reference pack, so this is a hand-rolled
//! orthonormal Haar transform: each 1-D step replaces a pair `(x0, x1)` with
//! an averaging coefficient `(x0+x1)/sqrt(2)` and a differencing coefficient
//! `(x0-x1)/sqrt(2)`, applied first along columns, then along rows. Odd
//! dimensions are handled by replicating the last row/column before the
//! transform; the inverse crops back to the caller-supplied target shape.

use nalgebra::DMatrix;
use std::f64::consts::SQRT_2;

/// The four sub-bands produced by one level of 2-D Haar DWT.
pub struct Coeffs {
    pub ll: DMatrix<f64>,
    pub lh: DMatrix<f64>,
    pub hl: DMatrix<f64>,
    pub hh: DMatrix<f64>,
}

/// 1-D Haar step along matrix rows: pairs up rows `(2i, 2i+1)`, returns
/// `(low, high)` each with half as many rows as the (possibly padded) input.
fn haar_rows(mat: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let (h, w) = mat.shape();
    debug_assert_eq!(h % 2, 0);
    let half = h / 2;
    let mut low = DMatrix::zeros(half, w);
    let mut high = DMatrix::zeros(half, w);
    for i in 0..half {
        for j in 0..w {
            let a = mat[(2 * i, j)];
            let b = mat[(2 * i + 1, j)];
            low[(i, j)] = (a + b) / SQRT_2;
            high[(i, j)] = (a - b) / SQRT_2;
        }
    }
    (low, high)
}

/// 1-D Haar step along matrix columns, mirroring [`haar_rows`].
fn haar_cols(mat: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let (h, w) = mat.shape();
    debug_assert_eq!(w % 2, 0);
    let half = w / 2;
    let mut low = DMatrix::zeros(h, half);
    let mut high = DMatrix::zeros(h, half);
    for i in 0..h {
        for j in 0..half {
            let a = mat[(i, 2 * j)];
            let b = mat[(i, 2 * j + 1)];
            low[(i, j)] = (a + b) / SQRT_2;
            high[(i, j)] = (a - b) / SQRT_2;
        }
    }
    (low, high)
}

fn inverse_haar_rows(low: &DMatrix<f64>, high: &DMatrix<f64>) -> DMatrix<f64> {
    let (half, w) = low.shape();
    let mut out = DMatrix::zeros(half * 2, w);
    for i in 0..half {
        for j in 0..w {
            let a = low[(i, j)];
            let d = high[(i, j)];
            out[(2 * i, j)] = (a + d) / SQRT_2;
            out[(2 * i + 1, j)] = (a - d) / SQRT_2;
        }
    }
    out
}

fn inverse_haar_cols(low: &DMatrix<f64>, high: &DMatrix<f64>) -> DMatrix<f64> {
    let (h, half) = low.shape();
    let mut out = DMatrix::zeros(h, half * 2);
    for i in 0..h {
        for j in 0..half {
            let a = low[(i, j)];
            let d = high[(i, j)];
            out[(i, 2 * j)] = (a + d) / SQRT_2;
            out[(i, 2 * j + 1)] = (a - d) / SQRT_2;
        }
    }
    out
}

/// Pads `mat` to even dimensions by replicating the last row/column.
fn pad_to_even(mat: &DMatrix<f64>) -> DMatrix<f64> {
    let (h, w) = mat.shape();
    let ph = h + (h % 2);
    let pw = w + (w % 2);
    if ph == h && pw == w {
        return mat.clone();
    }
    let mut padded = DMatrix::zeros(ph, pw);
    for i in 0..ph {
        let si = i.min(h - 1);
        for j in 0..pw {
            let sj = j.min(w - 1);
            padded[(i, j)] = mat[(si, sj)];
        }
    }
    padded
}

/// One level of 2-D Haar DWT: low-pass/high-pass along columns, then again
/// along rows of each result, producing `LL`, `LH`, `HL`, `HH`.
pub fn dwt2(mat: &DMatrix<f64>) -> Coeffs {
    let padded = pad_to_even(mat);
    let (low, high) = haar_cols(&padded);
    let (ll, lh) = haar_rows(&low);
    let (hl, hh) = haar_rows(&high);
    Coeffs { ll, lh, hl, hh }
}

/// Inverse of [`dwt2`]. `target_shape` is the `(height, width)` of the
/// original (pre-padding) matrix; the reconstruction is cropped to it.
pub fn idwt2(coeffs: &Coeffs, target_shape: (usize, usize)) -> DMatrix<f64> {
    let low = inverse_haar_rows(&coeffs.ll, &coeffs.lh);
    let high = inverse_haar_rows(&coeffs.hl, &coeffs.hh);
    let full = inverse_haar_cols(&low, &high);

    let (th, tw) = target_shape;
    if full.shape() == (th, tw) {
        return full;
    }
    full.rows(0, th).columns(0, tw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_even_dimensions() {
        let mat = DMatrix::from_fn(8, 8, |i, j| (i * 8 + j) as f64);
        let coeffs = dwt2(&mat);
        let back = idwt2(&coeffs, (8, 8));
        for i in 0..8 {
            for j in 0..8 {
                assert!((mat[(i, j)] - back[(i, j)]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn round_trip_odd_dimensions() {
        let mat = DMatrix::from_fn(7, 5, |i, j| (i as f64) * 3.1 + (j as f64));
        let coeffs = dwt2(&mat);
        let back = idwt2(&coeffs, (7, 5));
        assert_eq!(back.shape(), (7, 5));
        for i in 0..7 {
            for j in 0..5 {
                assert!((mat[(i, j)] - back[(i, j)]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn ll_shape_is_half_of_padded_input() {
        let mat = DMatrix::from_fn(6, 10, |_, _| 1.0);
        let coeffs = dwt2(&mat);
        assert_eq!(coeffs.ll.shape(), (3, 5));
    }
}
