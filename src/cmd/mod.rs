//! Command-line entry points.
//!
//! Each subcommand corresponds to one call the host pipeline makes into the
//! engine. Options are resolved and validated before anything else happens.

use tokio::io::AsyncWriteExt as _;

use crate::{
    config::{EngineConfig, EngineOptions},
    engine::VisionOcrEngine,
    prelude::*,
};

pub mod batch;
pub mod geometry;
pub mod info;
pub mod page;

/// Resolve and validate our options, and build an engine.
pub async fn engine_from_options(opts: &EngineOptions) -> Result<VisionOcrEngine> {
    let config = resolve_options(opts).await?;
    Ok(VisionOcrEngine::new(config))
}

/// Resolve and validate our options.
pub async fn resolve_options(opts: &EngineOptions) -> Result<EngineConfig> {
    let config = opts.resolve().await?;
    debug!(?config, "Resolved engine options");
    Ok(config)
}

/// Write `text` to standard output.
pub async fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(text.as_bytes())
        .await
        .context("failed to write to stdout")?;
    stdout.flush().await.context("failed to flush stdout")?;
    Ok(())
}
