//! The embedder: DWT+SVD singular-spectrum mixing. Each RGB channel's host
//! and mark LL sub-bands are decomposed independently, their singular
//! spectra are mixed, and the channel is rebuilt from the mixed spectrum
//! plus the host's own detail sub-bands.

use crate::dwt;
use crate::error::{Result, WatermarkError};
use crate::image_ops::{self, RgbChannels};
use crate::sideinfo::{ChannelTriple, SideInfo, WatermarkRef, WmParams};
use crate::svd;
use image::{DynamicImage, GenericImageView, RgbImage};
use nalgebra::DMatrix;
use tracing::debug;

/// Default watermark scaling factor.
pub const DEFAULT_ALPHA: f64 = 0.6;

/// Wavelet family name recorded in SideInfo; the only one this spec requires.
pub const WAVELET_HAAR: &str = "haar";

fn validate_alpha(alpha: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(WatermarkError::Validation(format!(
            "alpha must be in (0, 1], got {alpha}"
        )));
    }
    Ok(())
}

fn validate_nonzero_area(img: &DynamicImage, label: &str) -> Result<()> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(WatermarkError::Validation(format!(
            "{label} image has zero area ({w}x{h})"
        )));
    }
    Ok(())
}

/// One channel's embed result: the watermarked float channel plus the
/// side-info bookkeeping for it.
struct ChannelResult {
    watermarked: DMatrix<f64>,
    host_s: Vec<f64>,
    ll_shape: [usize; 2],
}

fn embed_channel(host: &DMatrix<f64>, mark: &DMatrix<f64>, alpha: f64) -> Result<ChannelResult> {
    let host_shape = host.shape();
    let host_coeffs = dwt::dwt2(host);
    let mark_coeffs = dwt::dwt2(mark);

    let host_svd = svd::thin_svd(&host_coeffs.ll)?;
    let mark_svd = svd::thin_svd(&mark_coeffs.ll)?;

    let n = host_svd.s.len().min(mark_svd.s.len());
    let s_modified: Vec<f64> = (0..n)
        .map(|i| host_svd.s[i] + alpha * mark_svd.s[i])
        .collect();

    let ll_shape = [host_coeffs.ll.nrows(), host_coeffs.ll.ncols()];
    let ll_modified = svd::reconstruct_truncated(&host_svd, &s_modified, n);

    let watermarked = dwt::idwt2(
        &dwt::Coeffs {
            ll: ll_modified,
            lh: host_coeffs.lh,
            hl: host_coeffs.hl,
            hh: host_coeffs.hh,
        },
        host_shape,
    );

    Ok(ChannelResult {
        watermarked,
        host_s: host_svd.s,
        ll_shape,
    })
}

/// Result of a successful embed call.
pub struct EmbedResult {
    pub watermarked_image: RgbImage,
    pub side_info: SideInfo,
}

/// Embeds `mark` into `host` using scaling factor `alpha`. `watermark_ref`
/// selects whether the original mark is recorded in SideInfo as inline
/// base64 or as a co-located path.
pub fn embed(
    host: &DynamicImage,
    mark: &DynamicImage,
    alpha: f64,
    watermark_ref: WatermarkRef,
) -> Result<EmbedResult> {
    validate_alpha(alpha)?;
    validate_nonzero_area(host, "host")?;
    validate_nonzero_area(mark, "mark")?;

    let (width, height) = host.dimensions();
    let resized_mark = image_ops::resize_to(mark, width, height);

    let host_rgb = host.to_rgb8();
    let mark_rgb = resized_mark.to_rgb8();

    let RgbChannels { r: hr, g: hg, b: hb } = image_ops::split_channels(&host_rgb);
    let RgbChannels { r: mr, g: mg, b: mb } = image_ops::split_channels(&mark_rgb);

    debug!(width, height, alpha, "embedding watermark, channel R");
    let cr = embed_channel(&hr, &mr, alpha)?;
    debug!("embedding watermark, channel G");
    let cg = embed_channel(&hg, &mg, alpha)?;
    debug!("embedding watermark, channel B");
    let cb = embed_channel(&hb, &mb, alpha)?;

    let watermarked_image = image_ops::merge_channels(
        &image_ops::normalize_to_u8(&cr.watermarked),
        &image_ops::normalize_to_u8(&cg.watermarked),
        &image_ops::normalize_to_u8(&cb.watermarked),
    );

    let side_info = SideInfo {
        wm_params: WmParams {
            alpha,
            wavelet: WAVELET_HAAR.to_string(),
            channels: "RGB".to_string(),
        },
        canonical_size: [width, height],
        output_path: None,
        ll_shapes: ChannelTriple::new(cr.ll_shape, cg.ll_shape, cb.ll_shape),
        host_s: ChannelTriple::new(cr.host_s, cg.host_s, cb.host_s),
        watermark_ref,
    };

    Ok(EmbedResult {
        watermarked_image,
        side_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

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

    #[test]
    fn rejects_out_of_range_alpha() {
        let host = gradient(64, 64);
        let mark = logo(64, 64);
        let err = embed(&host, &mark, 0.0, WatermarkRef::Path("x".into())).unwrap_err();
        assert!(matches!(err, WatermarkError::Validation(_)));
    }

    #[test]
    fn produces_side_info_with_matching_shapes() {
        let host = gradient(64, 64);
        let mark = logo(32, 32);
        let result = embed(&host, &mark, DEFAULT_ALPHA, WatermarkRef::Path("x".into())).unwrap();
        assert_eq!(result.side_info.canonical_size, [64, 64]);
        assert_eq!(result.watermarked_image.dimensions(), (64, 64));
        let expected_len = result.side_info.ll_shapes.r[0].min(result.side_info.ll_shapes.r[1]);
        assert_eq!(result.side_info.host_s.r.len(), expected_len);
    }
}
