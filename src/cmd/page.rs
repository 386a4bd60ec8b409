//! The `hocr` and `text-only-pdf` subcommands.

use clap::Args;

use crate::{artifacts::Materialized, config::EngineOptions, prelude::*};

use super::engine_from_options;

/// Arguments for `hocr`.
#[derive(Debug, Args)]
pub struct HocrOpts {
    /// The page image to recognize.
    #[clap(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Where to write the hOCR output.
    #[clap(value_name = "HOCR_OUT")]
    pub hocr_path: PathBuf,

    /// Where to write the plain text transcript.
    #[clap(value_name = "TEXT_OUT")]
    pub text_path: PathBuf,

    #[clap(flatten)]
    pub engine: EngineOptions,
}

/// Arguments for `text-only-pdf`.
#[derive(Debug, Args)]
pub struct TextOnlyPdfOpts {
    /// The page image to recognize.
    #[clap(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Where to write the placeholder PDF. The hOCR is written next to it.
    #[clap(value_name = "PDF_OUT")]
    pub pdf_path: PathBuf,

    /// Where to write the plain text transcript.
    #[clap(value_name = "TEXT_OUT")]
    pub text_path: PathBuf,

    #[clap(flatten)]
    pub engine: EngineOptions,
}

/// The `hocr` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_hocr(opts: &HocrOpts) -> Result<()> {
    let engine = engine_from_options(&opts.engine).await?;
    let outcome = engine
        .generate_hocr(&opts.image, &opts.hocr_path, &opts.text_path)
        .await?;
    report(&opts.image, outcome);
    Ok(())
}

/// The `text-only-pdf` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_text_only_pdf(opts: &TextOnlyPdfOpts) -> Result<()> {
    let engine = engine_from_options(&opts.engine).await?;
    let outcome = engine
        .generate_text_only_pdf(&opts.image, &opts.pdf_path, &opts.text_path)
        .await?;
    report(&opts.image, outcome);
    Ok(())
}

fn report(image: &Path, outcome: Materialized) {
    match outcome {
        Materialized::Empty => info!(image = %image.display(), "No text found"),
        Materialized::Words(words) => info!(image = %image.display(), words, "Recognized page"),
    }
}
