//! The `languages`, `info` and `check-options` subcommands.

use clap::Args;

use crate::{config::EngineOptions, prelude::*};

use super::{engine_from_options, resolve_options, write_stdout};

/// Arguments for subcommands that only need engine options.
#[derive(Debug, Args)]
pub struct InfoOpts {
    #[clap(flatten)]
    pub engine: EngineOptions,
}

/// Print the languages the host pipeline may request, one per line.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_languages(opts: &InfoOpts) -> Result<()> {
    let engine = engine_from_options(&opts.engine).await?;
    let mut out = String::new();
    for language in engine.languages().await {
        out.push_str(&language);
        out.push('\n');
    }
    write_stdout(&out).await
}

/// Print what the engine reports about itself.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_info(opts: &InfoOpts) -> Result<()> {
    let engine = engine_from_options(&opts.engine).await?;
    let available = engine.check_availability().await;
    write_stdout(&format!(
        "name: {}\nversion: {}\ncreator: {}\nlanguages: {}\navailable: {}\n",
        engine.name(),
        engine.version(),
        engine.creator_tag(),
        engine.config().languages,
        available
    ))
    .await
}

/// Validate options and exit.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_check_options(opts: &InfoOpts) -> Result<()> {
    resolve_options(&opts.engine).await?;
    info!("Options are valid");
    Ok(())
}
