//! The `orientation` and `deskew` subcommands.

use clap::Args;

use crate::{config::EngineOptions, prelude::*};

use super::{engine_from_options, write_stdout};

/// Arguments for `orientation` and `deskew`.
#[derive(Debug, Args)]
pub struct GeometryOpts {
    /// The page image to examine.
    #[clap(value_name = "IMAGE")]
    pub image: PathBuf,

    #[clap(flatten)]
    pub engine: EngineOptions,
}

/// Print `angle confidence` for the page.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_orientation(opts: &GeometryOpts) -> Result<()> {
    let engine = engine_from_options(&opts.engine).await?;
    let orientation = engine.get_orientation(&opts.image).await;
    write_stdout(&format!(
        "{} {}\n",
        orientation.angle, orientation.confidence
    ))
    .await
}

/// Print the skew angle of the page, in degrees.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_deskew(opts: &GeometryOpts) -> Result<()> {
    let engine = engine_from_options(&opts.engine).await?;
    let angle = engine.get_deskew(&opts.image).await;
    write_stdout(&format!("{angle}\n")).await
}
