//! Statistical detection: compares an extracted mark against a known
//! original and decides whether they match, plus best-effort persistence of
//! the comparison record.

use crate::error::Result;
use crate::store::ArtifactStore;
use image::{DynamicImage, GenericImageView};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

/// Default absolute-PCC acceptance threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// Whether the match decision uses `|PCC| >= tau` (the default) or the
/// signed `PCC >= tau`.
pub const DEFAULT_USE_ABSOLUTE_PCC: bool = true;

/// The four similarity metrics computed between two equal-sized grayscale
/// images, plus the resulting decision.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub pcc: f64,
    pub pcc_abs: f64,
    pub mse: f64,
    pub ssim: f64,
    pub psnr: f64,
    pub threshold: f64,
    pub is_match: bool,
}

fn to_f64_luma(img: &DynamicImage) -> Vec<f64> {
    img.to_luma8().pixels().map(|p| f64::from(p.0[0])).collect()
}

/// Pearson correlation coefficient between two equal-length samples. Yields
/// `0.0` when either sample has zero variance (undefined correlation).
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

fn mean_squared_error(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / n
}

/// Peak signal-to-noise ratio in dB for 8-bit data. Returns `f64::INFINITY`
/// when the two images are pixel-identical.
fn peak_signal_to_noise_ratio(mse: f64) -> f64 {
    if mse <= f64::EPSILON {
        return f64::INFINITY;
    }
    20.0 * 255.0f64.log10() - 10.0 * mse.log10()
}

/// Single-scale structural similarity over 8-bit grayscale data, matching an
/// unparameterized `skimage.metrics.structural_similarity` call: a 7x7
/// uniform (box-filter) window, `K1 = 0.01`, `K2 = 0.03`, data range 255.
fn structural_similarity(a: &[f64], b: &[f64], width: usize, height: usize) -> f64 {
    const WINDOW: usize = 7;
    const K1: f64 = 0.01;
    const K2: f64 = 0.03;
    const DATA_RANGE: f64 = 255.0;
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    if width < WINDOW || height < WINDOW {
        // Too small for a windowed comparison; fall back to a single
        // whole-image window, matching skimage's behavior of shrinking the
        // window to fit rather than erroring.
        return structural_similarity_window(a, b, 0, 0, width, height, c1, c2);
    }

    let half = WINDOW / 2;
    let mut total = 0.0;
    let mut count = 0usize;
    for cy in half..(height - half) {
        for cx in half..(width - half) {
            total += local_ssim(a, b, width, cx, cy, half, c1, c2);
            count += 1;
        }
    }
    if count == 0 {
        return 1.0;
    }
    total / count as f64
}

#[allow(clippy::too_many_arguments)]
fn local_ssim(
    a: &[f64],
    b: &[f64],
    width: usize,
    cx: usize,
    cy: usize,
    half: usize,
    c1: f64,
    c2: f64,
) -> f64 {
    let mut n = 0usize;
    let mut sum_a = 0.0;
    let mut sum_b = 0.0;
    for dy in -(half as isize)..=(half as isize) {
        for dx in -(half as isize)..=(half as isize) {
            let x = (cx as isize + dx) as usize;
            let y = (cy as isize + dy) as usize;
            let idx = y * width + x;
            sum_a += a[idx];
            sum_b += b[idx];
            n += 1;
        }
    }
    let mean_a = sum_a / n as f64;
    let mean_b = sum_b / n as f64;

    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut cov = 0.0;
    for dy in -(half as isize)..=(half as isize) {
        for dx in -(half as isize)..=(half as isize) {
            let x = (cx as isize + dx) as usize;
            let y = (cy as isize + dy) as usize;
            let idx = y * width + x;
            let da = a[idx] - mean_a;
            let db = b[idx] - mean_b;
            var_a += da * da;
            var_b += db * db;
            cov += da * db;
        }
    }
    var_a /= n as f64;
    var_b /= n as f64;
    cov /= n as f64;

    let numerator = (2.0 * mean_a * mean_b + c1) * (2.0 * cov + c2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + c1) * (var_a + var_b + c2);
    numerator / denominator
}

/// Whole-image fallback window used when the image is smaller than the
/// configured SSIM window in either dimension.
fn structural_similarity_window(
    a: &[f64],
    b: &[f64],
    _ox: usize,
    _oy: usize,
    width: usize,
    height: usize,
    c1: f64,
    c2: f64,
) -> f64 {
    let n = (width * height) as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut cov = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    let numerator = (2.0 * mean_a * mean_b + c1) * (2.0 * cov + c2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + c1) * (var_a + var_b + c2);
    numerator / denominator
}

/// Compares `original` against `extracted` (resized to match `original` if
/// needed) and decides whether they match under `threshold`.
pub fn detect(
    original: &DynamicImage,
    extracted: &DynamicImage,
    threshold: f64,
    use_absolute_pcc: bool,
) -> DetectionResult {
    let (width, height) = original.dimensions();
    let resized_extracted = if extracted.dimensions() == (width, height) {
        extracted.clone()
    } else {
        crate::image_ops::resize_to(extracted, width, height)
    };

    let a = to_f64_luma(original);
    let b = to_f64_luma(&resized_extracted);

    let pcc = pearson(&a, &b);
    let mse = mean_squared_error(&a, &b);
    let psnr = peak_signal_to_noise_ratio(mse);
    let ssim = structural_similarity(&a, &b, width as usize, height as usize);

    let pcc_abs = pcc.abs();
    let score = if use_absolute_pcc { pcc_abs } else { pcc };
    let is_match = score >= threshold;

    DetectionResult {
        pcc,
        pcc_abs,
        mse,
        ssim,
        psnr,
        threshold,
        is_match,
    }
}

/// Byte payloads copied alongside a persisted detection record. Only
/// `original_logo` and `extracted_wm` are expected to always be available;
/// `suspect` and `sideinfo_json` are recorded when the caller has them.
#[derive(Default)]
pub struct DetectionArtifacts<'a> {
    pub original_logo: &'a [u8],
    pub extracted_wm: &'a [u8],
    pub suspect: Option<&'a [u8]>,
    pub sideinfo_json: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Serialize)]
struct DetectionMetrics {
    pcc: f64,
    pcc_abs: f64,
    mse: f64,
    ssim: f64,
    psnr: f64,
}

#[derive(Debug, Clone, Serialize)]
struct DetectionThresholds {
    pcc_abs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
struct DetectionPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    original_logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extracted_wm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suspect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sideinfo_json: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct DetectionRecord {
    id: String,
    created_at: u64,
    metrics: DetectionMetrics,
    thresholds: DetectionThresholds,
    passed: bool,
    paths: DetectionPaths,
}

/// Persists a full detection record under `{record_dir}/{id}/record.json`,
/// copying `artifacts` alongside it so the record's `paths` point at stable
/// locators rather than the caller's original filesystem paths. Returns the
/// generated id. Failure here never changes the caller's already-computed
/// `DetectionResult`; it is only logged by [`try_persist_record`].
pub fn persist_record(
    store: &dyn ArtifactStore,
    record_dir: &str,
    result: &DetectionResult,
    artifacts: &DetectionArtifacts,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let base = format!("{record_dir}/{id}");

    let original_logo = store.put_bytes(&format!("{base}/original_logo.png"), artifacts.original_logo)?;
    let extracted_wm = store.put_bytes(&format!("{base}/extracted_wm.png"), artifacts.extracted_wm)?;
    let suspect = artifacts
        .suspect
        .map(|bytes| store.put_bytes(&format!("{base}/suspect.png"), bytes))
        .transpose()?;
    let sideinfo_json = artifacts
        .sideinfo_json
        .map(|bytes| store.put_bytes(&format!("{base}/sideinfo.json"), bytes))
        .transpose()?;

    let record = DetectionRecord {
        id: id.clone(),
        created_at,
        metrics: DetectionMetrics {
            pcc: result.pcc,
            pcc_abs: result.pcc_abs,
            mse: result.mse,
            ssim: result.ssim,
            psnr: result.psnr,
        },
        thresholds: DetectionThresholds {
            pcc_abs: result.threshold,
        },
        passed: result.is_match,
        paths: DetectionPaths {
            original_logo: Some(original_logo),
            extracted_wm: Some(extracted_wm),
            suspect,
            sideinfo_json,
        },
    };

    store.put_bytes(&format!("{base}/record.json"), &serde_json::to_vec_pretty(&record)?)?;
    Ok(id)
}

/// Convenience wrapper around [`persist_record`] that swallows the error
/// after logging, matching the "best effort" persistence requirement.
pub fn try_persist_record(
    store: &dyn ArtifactStore,
    record_dir: &str,
    result: &DetectionResult,
    artifacts: &DetectionArtifacts,
) {
    if let Err(err) = persist_record(store, record_dir, result, artifacts) {
        warn!(%err, record_dir, "failed to persist detection record");
    }
}
