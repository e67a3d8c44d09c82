//! The extractor and its side-info resolver: resolves a side-info reference
//! (local path, HTTP(S) URL, or opaque catalog key), falls back to pHash
//! catalog matching when no reference is given, and runs the length-guarded
//! per-channel inverse transform.

use crate::dwt;
use crate::embed::WAVELET_HAAR;
use crate::error::{Result, WatermarkError};
use crate::image_ops::{self, RgbChannels};
use crate::phash;
use crate::sideinfo::{self, SideInfo, WatermarkRef};
use crate::store::ArtifactStore;
use crate::svd;
use image::{DynamicImage, RgbImage};
use nalgebra::DMatrix;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default Hamming-distance acceptance threshold for pHash auto-matching.
pub const DEFAULT_PHASH_THRESHOLD: u32 = 12;

/// A side-info reference, modeled as a discriminated sum rather than a
/// stringly-typed overload so each resolution path is unambiguous.
#[derive(Debug, Clone)]
pub enum SideInfoRef {
    LocalPath(PathBuf),
    Url(String),
    CatalogKey(String),
}

impl SideInfoRef {
    /// Convenience classifier for a single opaque string reference coming
    /// from a service boundary: an existing local path wins, then an
    /// `http(s)://` prefix, otherwise it is treated as an opaque catalog
    /// key. Prefer constructing the variant directly when the caller
    /// already knows which kind of reference it holds.
    pub fn classify(raw: &str) -> SideInfoRef {
        if Path::new(raw).exists() {
            SideInfoRef::LocalPath(PathBuf::from(raw))
        } else if raw.to_ascii_lowercase().starts_with("http://")
            || raw.to_ascii_lowercase().starts_with("https://")
        {
            SideInfoRef::Url(raw.to_string())
        } else {
            SideInfoRef::CatalogKey(raw.to_string())
        }
    }
}

/// Pluggable hook for resolving an opaque catalog key to a SideInfo record,
/// e.g. backed by an external watermark-record store.
pub type CatalogFetcher = Box<dyn Fn(&str) -> Option<SideInfo> + Send + Sync>;

/// Resolves a [`SideInfoRef`] to a `(SideInfo, locator-used)` pair, trying
/// local file, then HTTP(S), then the pluggable fetcher.
pub struct SideInfoResolver {
    client: reqwest::blocking::Client,
    fetcher: Option<CatalogFetcher>,
}

impl SideInfoResolver {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            fetcher: None,
        })
    }

    pub fn with_fetcher(fetcher: CatalogFetcher) -> Result<Self> {
        let mut resolver = Self::new()?;
        resolver.fetcher = Some(fetcher);
        Ok(resolver)
    }

    /// Resolves `side_info_ref`, returning a reason string on failure
    /// suitable for `ExtractOutcome::SkipBadMeta`.
    pub fn resolve(&self, side_info_ref: &SideInfoRef) -> std::result::Result<(SideInfo, String), String> {
        match side_info_ref {
            SideInfoRef::LocalPath(path) => {
                let text = fs::read_to_string(path)
                    .map_err(|e| format!("side-info file missing or unreadable: {e}"))?;
                let si = SideInfo::parse(&text)?;
                Ok((si, path.to_string_lossy().to_string()))
            }
            SideInfoRef::Url(url) => {
                let resp = self
                    .client
                    .get(url)
                    .send()
                    .map_err(|e| format!("side-info fetch failed: {e}"))?;
                let text = resp
                    .error_for_status()
                    .map_err(|e| format!("side-info fetch failed: {e}"))?
                    .text()
                    .map_err(|e| format!("side-info fetch failed: {e}"))?;
                let si = SideInfo::parse(&text)?;
                Ok((si, url.clone()))
            }
            SideInfoRef::CatalogKey(key) => {
                let fetcher = self
                    .fetcher
                    .as_ref()
                    .ok_or_else(|| "no catalog fetcher configured".to_string())?;
                let si = fetcher(key).ok_or_else(|| format!("no record for key '{key}'"))?;
                Ok((si, format!("db:{key}")))
            }
        }
    }
}

/// Outcome of a single extract call. The `Skip*` variants are normal
/// branches, not errors.
pub enum ExtractOutcome {
    OkExtracted {
        extracted_mark: RgbImage,
        alpha: f64,
        wavelet: String,
        canonical_size: (u32, u32),
        sideinfo_used: String,
    },
    SkipNoSideinfo,
    SkipBadMeta {
        reason: String,
    },
}

fn load_watermark_ref(wr: &WatermarkRef) -> std::result::Result<DynamicImage, String> {
    match wr {
        WatermarkRef::ImageBase64(b64) => {
            let bytes = sideinfo::decode_base64_image(b64)
                .map_err(|e| format!("invalid watermark_ref base64: {e}"))?;
            image::load_from_memory(&bytes)
                .map_err(|e| format!("watermark image decode failed: {e}"))
        }
        WatermarkRef::Path(path) => {
            if path == "base64_data" {
                return Err("watermark_ref.path is the rejected \"base64_data\" sentinel".into());
            }
            image::open(path).map_err(|e| format!("watermark logo path invalid: {e}"))
        }
    }
}

/// Locates the published watermarked image for a catalog record: prefer
/// `output_path`, else substitute the JSON locator's stem with an image
/// extension.
fn resolve_published_image(
    store: &dyn ArtifactStore,
    json_locator: &str,
    side_info: &SideInfo,
) -> Option<String> {
    if let Some(output_path) = &side_info.output_path {
        if store.exists(output_path) {
            return Some(output_path.clone());
        }
    }
    let stem = json_locator.strip_suffix(".wm.json")?;
    for ext in [".png", ".jpg", ".jpeg"] {
        let candidate = format!("{stem}{ext}");
        if store.exists(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Walks `catalog_dir` in `store`, pHashing each published watermarked image
/// and returning the closest match within `max_hamming`, if any.
pub fn find_best_match(
    store: &dyn ArtifactStore,
    catalog_dir: &str,
    suspect: &DynamicImage,
    max_hamming: u32,
) -> Option<(String, SideInfo)> {
    let suspect_hash = phash::phash64(suspect);
    let mut best: Option<(String, SideInfo, u32)> = None;

    for (locator, _stem) in store.list(catalog_dir).unwrap_or_default() {
        if !locator.ends_with(".wm.json") {
            continue;
        }
        let Ok(bytes) = store.get_bytes(&locator) else {
            continue;
        };
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        let Ok(side_info) = SideInfo::parse(&text) else {
            continue;
        };
        let Some(image_locator) = resolve_published_image(store, &locator, &side_info) else {
            continue;
        };
        let Ok(img_bytes) = store.get_bytes(&image_locator) else {
            continue;
        };
        let Ok(img) = image::load_from_memory(&img_bytes) else {
            continue;
        };

        let distance = phash::hamming(suspect_hash, phash::phash64(&img));
        let better = match &best {
            Some((_, _, current)) => distance < *current,
            None => true,
        };
        if better {
            best = Some((locator, side_info, distance));
        }
    }

    best.filter(|(_, _, d)| *d <= max_hamming)
        .map(|(locator, side_info, _)| (locator, side_info))
}

/// Returns an error once `deadline` has passed. A `None` deadline never
/// expires.
fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(WatermarkError::Transform(
            "extraction deadline exceeded".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Semi-blind per-channel extraction, including the length guard that caps
/// the reconstructed spectrum to the shortest of the three inputs.
fn extract_channel(
    suspect_channel: &DMatrix<f64>,
    mark_channel: &DMatrix<f64>,
    host_s: &[f64],
    alpha: f64,
) -> Result<DMatrix<f64>> {
    let target_shape = suspect_channel.shape();
    let suspect_coeffs = dwt::dwt2(suspect_channel);
    let mark_coeffs = dwt::dwt2(mark_channel);

    let suspect_svd = svd::thin_svd(&suspect_coeffs.ll)?;
    let mark_svd = svd::thin_svd(&mark_coeffs.ll)?;

    let n = suspect_svd.s.len().min(host_s.len()).min(mark_svd.s.len());
    if n == 0 {
        debug!("length guard hit n=0, returning zero-filled channel");
        return Ok(DMatrix::zeros(target_shape.0, target_shape.1));
    }

    let denom = alpha.max(1e-12);
    let s_estimated: Vec<f64> = (0..n)
        .map(|i| (suspect_svd.s[i] - host_s[i]) / denom)
        .collect();
    let ll_estimated = svd::reconstruct_truncated(&mark_svd, &s_estimated, n);

    Ok(dwt::idwt2(
        &dwt::Coeffs {
            ll: ll_estimated,
            lh: mark_coeffs.lh,
            hl: mark_coeffs.hl,
            hh: mark_coeffs.hh,
        },
        target_shape,
    ))
}

fn extract_with_sideinfo(
    suspect: &DynamicImage,
    side_info: &SideInfo,
    sideinfo_used: String,
    deadline: Option<Instant>,
) -> Result<ExtractOutcome> {
    let alpha = side_info.wm_params.alpha;
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Ok(ExtractOutcome::SkipBadMeta {
            reason: format!("invalid wm_params.alpha: {alpha}"),
        });
    }
    if side_info.wm_params.wavelet != WAVELET_HAAR {
        return Ok(ExtractOutcome::SkipBadMeta {
            reason: format!(
                "unsupported wm_params.wavelet '{}'",
                side_info.wm_params.wavelet
            ),
        });
    }

    let mark = match load_watermark_ref(&side_info.watermark_ref) {
        Ok(m) => m,
        Err(reason) => return Ok(ExtractOutcome::SkipBadMeta { reason }),
    };

    let [canonical_w, canonical_h] = side_info.canonical_size;
    let mark_resized = image_ops::resize_to(&mark, canonical_w, canonical_h);
    let suspect_resized = image_ops::resize_to(suspect, canonical_w, canonical_h);

    let mark_rgb = mark_resized.to_rgb8();
    let suspect_rgb = suspect_resized.to_rgb8();

    let RgbChannels {
        r: mr,
        g: mg,
        b: mb,
    } = image_ops::split_channels(&mark_rgb);
    let RgbChannels {
        r: sr,
        g: sg,
        b: sb,
    } = image_ops::split_channels(&suspect_rgb);

    check_deadline(deadline)?;
    let extracted_r = extract_channel(&sr, &mr, &side_info.host_s.r, alpha)?;
    check_deadline(deadline)?;
    let extracted_g = extract_channel(&sg, &mg, &side_info.host_s.g, alpha)?;
    check_deadline(deadline)?;
    let extracted_b = extract_channel(&sb, &mb, &side_info.host_s.b, alpha)?;

    let extracted_mark = image_ops::merge_channels(
        &image_ops::normalize_to_u8(&extracted_r),
        &image_ops::normalize_to_u8(&extracted_g),
        &image_ops::normalize_to_u8(&extracted_b),
    );

    Ok(ExtractOutcome::OkExtracted {
        extracted_mark,
        alpha,
        wavelet: side_info.wm_params.wavelet.clone(),
        canonical_size: (canonical_w, canonical_h),
        sideinfo_used,
    })
}

/// Extracts a candidate mark from `suspect`. `catalog` enables the pHash
/// auto-match branch when `side_info_ref` is `None`. `deadline`, when set,
/// bounds the whole call (side-info resolution plus the per-channel inverse
/// transform); once it passes, extraction aborts with an error. `extract`
/// never writes to disk or to an artifact store itself, so a deadline abort
/// never leaves a partial artifact behind — callers that persist the
/// returned image should only do so after a successful `OkExtracted`.
pub fn extract(
    suspect: &DynamicImage,
    side_info_ref: Option<&SideInfoRef>,
    resolver: &SideInfoResolver,
    catalog: Option<(&dyn ArtifactStore, &str)>,
    deadline: Option<Instant>,
) -> Result<ExtractOutcome> {
    check_deadline(deadline)?;

    let (side_info, sideinfo_used) = match side_info_ref {
        Some(r) => match resolver.resolve(r) {
            Ok(pair) => pair,
            Err(reason) => {
                warn!(%reason, "side-info resolution failed");
                return Ok(ExtractOutcome::SkipBadMeta { reason });
            }
        },
        None => {
            let Some((store, catalog_dir)) = catalog else {
                return Ok(ExtractOutcome::SkipNoSideinfo);
            };
            match find_best_match(store, catalog_dir, suspect, DEFAULT_PHASH_THRESHOLD) {
                Some((locator, si)) => (si, locator),
                None => return Ok(ExtractOutcome::SkipNoSideinfo),
            }
        }
    };

    check_deadline(deadline)?;
    extract_with_sideinfo(suspect, &side_info, sideinfo_used, deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{embed, DEFAULT_ALPHA};
    use crate::sideinfo::WatermarkRef;
    use crate::store::FsArtifactStore;
    use image::Rgb;
    use std::io::Cursor;

    fn gradient(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.put_pixel(
                    x,
                    y,
                    Rgb([((x * 255) / w) as u8, ((y * 255) / h) as u8, 128]),
                );
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn logo(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let on = (x / 8 + y / 8) % 2 == 0;
                let v = if on { 255 } else { 0 };
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn no_sideinfo_and_no_catalog_skips() {
        let suspect = gradient(64, 64);
        let resolver = SideInfoResolver::new().unwrap();
        let outcome = extract(&suspect, None, &resolver, None, None).unwrap();
        assert!(matches!(outcome, ExtractOutcome::SkipNoSideinfo));
    }

    #[test]
    fn bad_meta_reports_alpha_reason() {
        let suspect = gradient(64, 64);
        let resolver = SideInfoResolver::new().unwrap();
        let json = r#"{
            "wm_params": {"alpha": "oops", "wavelet": "haar", "channels": "RGB"},
            "canonical_size": [64, 64],
            "ll_shapes": {"R": [32,32], "G": [32,32], "B": [32,32]},
            "host_S": {"R": [1.0], "G": [1.0], "B": [1.0]},
            "watermark_ref": {"path": "/nonexistent.png"}
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("side.json");
        fs::write(&path, json).unwrap();
        let side_ref = SideInfoRef::LocalPath(path);
        let outcome = extract(&suspect, Some(&side_ref), &resolver, None, None).unwrap();
        match outcome {
            ExtractOutcome::SkipBadMeta { reason } => assert!(reason.contains("alpha")),
            _ => panic!("expected skip_bad_meta"),
        }
    }

    #[test]
    fn embed_then_extract_round_trip_meets_spec_thresholds() {
        let host = gradient(256, 256);
        let mark = logo(256, 256);
        let embedded = embed(&host, &mark, DEFAULT_ALPHA, WatermarkRef::Path("unused".into())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mark_path = dir.path().join("mark.png");
        mark.save(&mark_path).unwrap();
        let mut side_info = embedded.side_info;
        side_info.watermark_ref = WatermarkRef::Path(mark_path.to_string_lossy().to_string());
        let side_info_path = dir.path().join("side.json");
        fs::write(&side_info_path, side_info.to_json().unwrap()).unwrap();

        let suspect = DynamicImage::ImageRgb8(embedded.watermarked_image);
        let side_ref = SideInfoRef::LocalPath(side_info_path);
        let resolver = SideInfoResolver::new().unwrap();
        let outcome = extract(&suspect, Some(&side_ref), &resolver, None, None).unwrap();

        let extracted_mark = match outcome {
            ExtractOutcome::OkExtracted {
                extracted_mark,
                canonical_size,
                ..
            } => {
                assert_eq!(canonical_size, (256, 256));
                extracted_mark
            }
            _ => panic!("expected ok_extracted"),
        };

        let result = crate::detect::detect(
            &mark,
            &DynamicImage::ImageRgb8(extracted_mark),
            crate::detect::DEFAULT_THRESHOLD,
            crate::detect::DEFAULT_USE_ABSOLUTE_PCC,
        );
        assert!(result.pcc_abs >= 0.95, "pcc_abs was {}", result.pcc_abs);
        assert!(result.mse < 2500.0, "mse was {}", result.mse);
        assert!(result.ssim >= 0.85, "ssim was {}", result.ssim);
        assert!(result.is_match);
    }

    #[test]
    fn phash_catalog_auto_match_without_sideinfo_ref() {
        let host = gradient(256, 256);
        let mark = logo(256, 256);
        let embedded = embed(&host, &mark, DEFAULT_ALPHA, WatermarkRef::Path("unused".into())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mark_path = dir.path().join("mark.png");
        mark.save(&mark_path).unwrap();
        let mut side_info = embedded.side_info;
        side_info.watermark_ref = WatermarkRef::Path(mark_path.to_string_lossy().to_string());

        let store = FsArtifactStore::new(dir.path().join("store")).unwrap();
        let image_locator = store
            .put_bytes("catalog/item.png", &encode_png(&embedded.watermarked_image))
            .unwrap();
        side_info.output_path = Some(image_locator);
        store
            .put_bytes("catalog/item.wm.json", side_info.to_json().unwrap().as_bytes())
            .unwrap();

        let suspect = DynamicImage::ImageRgb8(embedded.watermarked_image.clone());
        let resolver = SideInfoResolver::new().unwrap();
        let outcome = extract(&suspect, None, &resolver, Some((&store, "catalog")), None).unwrap();

        match outcome {
            ExtractOutcome::OkExtracted { sideinfo_used, .. } => {
                assert_eq!(sideinfo_used, "catalog/item.wm.json");
            }
            ExtractOutcome::SkipNoSideinfo => panic!("expected a catalog match, got skip_no_sideinfo"),
            ExtractOutcome::SkipBadMeta { reason } => panic!("expected a catalog match, got skip_bad_meta: {reason}"),
        }
    }
}
