use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info};
use wm_core::sideinfo::WatermarkRef;
use wm_core::{
    detect, embed, extract, store::FsArtifactStore, ArtifactStore, ExtractOutcome, SideInfoRef,
    SideInfoResolver,
};

#[derive(Parser)]
#[command(name = "watermarkctl", about = "DWT+SVD image watermarking toolkit")]
struct Cli {
    /// Directory used as the local artifact store for published images and
    /// side-info records.
    #[arg(long, default_value = "./watermark-store")]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed a watermark into a host image.
    Embed {
        host: PathBuf,
        watermark: PathBuf,
        #[arg(short, long, default_value_t = embed::DEFAULT_ALPHA)]
        alpha: f64,
        #[arg(short, long)]
        output: PathBuf,
        /// Record the watermark inline as base64 instead of a path reference.
        #[arg(long)]
        inline_watermark: bool,
    },
    /// Extract a candidate mark from a suspect image.
    Extract {
        suspect: PathBuf,
        /// Local path, or http(s):// URL, to the side-info JSON record.
        /// When omitted, falls back to pHash catalog matching.
        #[arg(long)]
        sideinfo: Option<String>,
        /// Subdirectory of --store-dir to scan for pHash catalog matching.
        #[arg(long, default_value = "./watermark_catalog")]
        catalog_dir: String,
        /// Abort (and remove any temp output) if extraction runs longer than
        /// this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compare an extracted mark against a known original.
    Detect {
        original: PathBuf,
        extracted: PathBuf,
        #[arg(short, long, default_value_t = detect::DEFAULT_THRESHOLD)]
        threshold: f64,
        /// Suspect image copied into the persisted detection record, if any.
        #[arg(long)]
        suspect: Option<PathBuf>,
        /// Side-info JSON copied into the persisted detection record, if any.
        #[arg(long)]
        sideinfo: Option<PathBuf>,
        /// Subdirectory of --store-dir to persist a full detection record
        /// under. When omitted, nothing is persisted.
        #[arg(long)]
        record_dir: Option<String>,
    },
}

fn run() -> wm_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = FsArtifactStore::new(cli.store_dir)?;

    match cli.command {
        Command::Embed {
            host,
            watermark,
            alpha,
            output,
            inline_watermark,
        } => {
            let host_img = image::open(&host)?;
            let mark_img = image::open(&watermark)?;

            let watermark_ref = if inline_watermark {
                let bytes = std::fs::read(&watermark)?;
                WatermarkRef::ImageBase64(wm_core::sideinfo::encode_base64_image(&bytes))
            } else {
                WatermarkRef::Path(watermark.to_string_lossy().to_string())
            };

            let result = embed::embed(&host_img, &mark_img, alpha, watermark_ref)?;

            // SideInfo is written to a temp name first, then the image, then
            // the temp name is renamed into place: a reader that discovers
            // the side-info record at its canonical path is guaranteed the
            // image it points at is already fully written.
            let json_path = output.with_extension("wm.json");
            let json_tmp_path = output.with_extension("wm.json.tmp");
            std::fs::write(&json_tmp_path, result.side_info.to_json()?)?;
            result.watermarked_image.save(&output)?;
            std::fs::rename(&json_tmp_path, &json_path)?;

            info!(output = %output.display(), sideinfo = %json_path.display(), "embed complete");
        }

        Command::Extract {
            suspect,
            sideinfo,
            catalog_dir,
            deadline_secs,
            output,
        } => {
            let suspect_img = image::open(&suspect)?;
            let resolver = SideInfoResolver::new()?;
            let side_ref = sideinfo.as_deref().map(SideInfoRef::classify);
            let catalog: Option<(&dyn ArtifactStore, &str)> = Some((&store, &catalog_dir));
            let deadline = deadline_secs.map(|s| Instant::now() + Duration::from_secs(s));

            let tmp_output = output.with_extension("tmp");
            let outcome = extract::extract(&suspect_img, side_ref.as_ref(), &resolver, catalog, deadline);
            match outcome {
                Ok(ExtractOutcome::OkExtracted {
                    extracted_mark,
                    sideinfo_used,
                    ..
                }) => {
                    extracted_mark.save(&tmp_output)?;
                    std::fs::rename(&tmp_output, &output)?;
                    info!(output = %output.display(), sideinfo_used, "extract complete");
                }
                Ok(ExtractOutcome::SkipNoSideinfo) => {
                    error!("no side-info reference and no catalog match found; nothing extracted");
                }
                Ok(ExtractOutcome::SkipBadMeta { reason }) => {
                    error!(reason, "side-info record could not be used");
                }
                Err(err) => {
                    // A deadline or transform failure never leaves a
                    // half-written output behind.
                    let _ = std::fs::remove_file(&tmp_output);
                    return Err(err);
                }
            }
        }

        Command::Detect {
            original,
            extracted,
            threshold,
            suspect,
            sideinfo,
            record_dir,
        } => {
            let original_img = image::open(&original)?;
            let extracted_img = image::open(&extracted)?;
            let result = detect::detect(
                &original_img,
                &extracted_img,
                threshold,
                detect::DEFAULT_USE_ABSOLUTE_PCC,
            );

            println!("{}", serde_json::to_string_pretty(&result)?);

            if let Some(record_dir) = record_dir {
                let original_bytes = std::fs::read(&original)?;
                let extracted_bytes = std::fs::read(&extracted)?;
                let suspect_bytes = suspect.as_ref().map(std::fs::read).transpose()?;
                let sideinfo_bytes = sideinfo.as_ref().map(std::fs::read).transpose()?;
                let artifacts = detect::DetectionArtifacts {
                    original_logo: &original_bytes,
                    extracted_wm: &extracted_bytes,
                    suspect: suspect_bytes.as_deref(),
                    sideinfo_json: sideinfo_bytes.as_deref(),
                };
                detect::try_persist_record(&store, &record_dir, &result, &artifacts);
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("watermarkctl: {err}");
            ExitCode::FAILURE
        }
    }
}
