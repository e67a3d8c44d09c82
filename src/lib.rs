pub mod detect;
pub mod dwt;
pub mod embed;
pub mod error;
pub mod extract;
pub mod image_ops;
pub mod phash;
pub mod sideinfo;
pub mod store;
pub mod svd;

pub use detect::{detect, DetectionResult};
pub use embed::{embed, EmbedResult};
pub use error::{Result, WatermarkError};
pub use extract::{extract, ExtractOutcome, SideInfoRef, SideInfoResolver};
pub use sideinfo::{SideInfo, WatermarkRef};
pub use store::{ArtifactStore, FsArtifactStore};

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                img.put_pixel(x, y, Rgb([((x * 255) / w) as u8, ((y * 255) / h) as u8, 128]));
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
    fn embed_extract_detect_round_trip_is_a_match() {
        // Mirrors the documented reference scenario: a 256x256 gradient host,
        // a 256x256 synthetic logo mark, and the default alpha.
        let host = gradient(256, 256);
        let mark = logo(256, 256);

        let embedded = embed(
            &host,
            &mark,
            embed::DEFAULT_ALPHA,
            WatermarkRef::Path("unused".into()),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mark_path = dir.path().join("mark.png");
        mark.save(&mark_path).unwrap();

        let mut side_info = embedded.side_info;
        side_info.watermark_ref = WatermarkRef::Path(mark_path.to_string_lossy().to_string());
        let side_info_path = dir.path().join("side.json");
        std::fs::write(&side_info_path, side_info.to_json().unwrap()).unwrap();

        let suspect = DynamicImage::ImageRgb8(embedded.watermarked_image);
        let side_ref = SideInfoRef::LocalPath(side_info_path);
        let resolver = SideInfoResolver::new().unwrap();
        let outcome = extract(&suspect, Some(&side_ref), &resolver, None, None).unwrap();

        let extracted_mark = match outcome {
            ExtractOutcome::OkExtracted { extracted_mark, .. } => extracted_mark,
            _ => panic!("expected ok_extracted"),
        };

        let (w, h) = extracted_mark.dimensions();
        assert_eq!((w, h), host.dimensions());

        let result = detect(
            &mark,
            &DynamicImage::ImageRgb8(extracted_mark),
            detect::DEFAULT_THRESHOLD,
            detect::DEFAULT_USE_ABSOLUTE_PCC,
        );
        assert!(result.pcc_abs >= 0.95, "pcc_abs was {}", result.pcc_abs);
        assert!(result.mse < 2500.0, "mse was {}", result.mse);
        assert!(result.ssim >= 0.85, "ssim was {}", result.ssim);
        assert!(result.is_match);
    }
}
