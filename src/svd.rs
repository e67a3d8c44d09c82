//! Thin SVD over the LL sub-band, with singular values forced into
//! descending order: callers should never have to trust the decomposition
//! library's native ordering.

use crate::error::{Result, WatermarkError};
use nalgebra::DMatrix;

/// `A = U * diag(s) * Vt`, with `s` sorted descending and `U`/`Vt` permuted
/// to match.
pub struct ThinSvd {
    pub u: DMatrix<f64>,
    pub s: Vec<f64>,
    pub vt: DMatrix<f64>,
}

/// Computes the thin SVD of `mat`, sorting singular values descending.
///
/// # Errors
/// Returns [`WatermarkError::Transform`] if `nalgebra` cannot decompose the
/// matrix (e.g. it is degenerate or contains non-finite values).
pub fn thin_svd(mat: &DMatrix<f64>) -> Result<ThinSvd> {
    if mat.nrows() == 0 || mat.ncols() == 0 {
        return Err(WatermarkError::Transform(
            "cannot take SVD of a zero-area matrix".into(),
        ));
    }

    let svd = nalgebra::linalg::SVD::new(mat.clone(), true, true);
    let u = svd
        .u
        .ok_or_else(|| WatermarkError::Transform("SVD did not produce U".into()))?;
    let vt = svd
        .v_t
        .ok_or_else(|| WatermarkError::Transform("SVD did not produce V^T".into()))?;
    let raw_s: Vec<f64> = svd.singular_values.iter().copied().collect();

    if raw_s.iter().any(|v| !v.is_finite()) {
        return Err(WatermarkError::Transform(
            "SVD produced non-finite singular values".into(),
        ));
    }

    let mut order: Vec<usize> = (0..raw_s.len()).collect();
    order.sort_by(|&a, &b| raw_s[b].partial_cmp(&raw_s[a]).unwrap());

    let s: Vec<f64> = order.iter().map(|&i| raw_s[i]).collect();
    let u_cols: Vec<_> = order.iter().map(|&i| u.column(i).into_owned()).collect();
    let vt_rows: Vec<_> = order.iter().map(|&i| vt.row(i).into_owned()).collect();
    let u = DMatrix::from_columns(&u_cols);
    let vt = DMatrix::from_rows(&vt_rows);

    Ok(ThinSvd { u, s, vt })
}

/// Reconstructs `U * diag(s) * Vt`, truncating all three to length `n` first.
/// Callers use this to rebuild a sub-band from a singular spectrum shorter
/// than the matrix's own rank.
pub fn reconstruct_truncated(svd: &ThinSvd, s: &[f64], n: usize) -> DMatrix<f64> {
    let u = svd.u.columns(0, n).into_owned();
    let vt = svd.vt.rows(0, n).into_owned();
    let diag = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(&s[..n]));
    u * diag * vt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singular_values_are_descending_and_nonnegative() {
        let mat = DMatrix::from_fn(6, 4, |i, j| ((i + 1) * (j + 2)) as f64);
        let svd = thin_svd(&mat).unwrap();
        for w in svd.s.windows(2) {
            assert!(w[0] >= w[1]);
        }
        assert!(svd.s.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn reconstruction_matches_input() {
        let mat = DMatrix::from_fn(5, 5, |i, j| (i as f64) - (j as f64) * 0.5);
        let svd = thin_svd(&mat).unwrap();
        let recon = reconstruct_truncated(&svd, &svd.s, svd.s.len());
        for i in 0..5 {
            for j in 0..5 {
                assert!((mat[(i, j)] - recon[(i, j)]).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn zero_area_matrix_is_rejected() {
        let mat = DMatrix::<f64>::zeros(0, 0);
        assert!(thin_svd(&mat).is_err());
    }
}
