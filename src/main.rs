use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod artifacts;
mod async_utils;
mod cmd;
mod config;
mod engine;
mod error;
mod hocr;
mod languages;
mod pdf;
mod prelude;
mod resolution;
mod tesseract;
mod toml_utils;
mod ui;
mod vision;

/// OCR page images with Google Cloud Vision, producing hOCR and text.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - GCV_KEYFILE (optional): Service account key file, same as --keyfile.
  - GOOGLE_APPLICATION_CREDENTIALS (optional): Used to find Application
    Default Credentials when no key file is given.
  - RUST_LOG (optional): Log filter, for example "vision_hocr=debug".

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Recognize one page, writing hOCR and a text transcript.
    Hocr(cmd::page::HocrOpts),
    /// Recognize one page, writing a placeholder PDF, hOCR and a transcript.
    TextOnlyPdf(cmd::page::TextOnlyPdfOpts),
    /// Print the page orientation as "angle confidence" (uses tesseract).
    Orientation(cmd::geometry::GeometryOpts),
    /// Print the page skew angle in degrees (uses tesseract).
    Deskew(cmd::geometry::GeometryOpts),
    /// List languages that may be requested (uses tesseract).
    Languages(cmd::info::InfoOpts),
    /// Print engine name, version and availability.
    Info(cmd::info::InfoOpts),
    /// Validate options and exit.
    CheckOptions(cmd::info::InfoOpts),
    /// Recognize many pages concurrently with a shared session.
    Batch(cmd::batch::BatchOpts),
}

impl Cmd {
    /// Do we show progress bars?
    fn shows_progress(&self) -> bool {
        matches!(self, Cmd::Batch(_))
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    if !opts.subcmd.shows_progress() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Hocr(opts) => cmd::page::cmd_hocr(opts).await,
        Cmd::TextOnlyPdf(opts) => cmd::page::cmd_text_only_pdf(opts).await,
        Cmd::Orientation(opts) => cmd::geometry::cmd_orientation(opts).await,
        Cmd::Deskew(opts) => cmd::geometry::cmd_deskew(opts).await,
        Cmd::Languages(opts) => cmd::info::cmd_languages(opts).await,
        Cmd::Info(opts) => cmd::info::cmd_info(opts).await,
        Cmd::CheckOptions(opts) => cmd::info::cmd_check_options(opts).await,
        Cmd::Batch(opts) => cmd::batch::cmd_batch(ui, opts).await,
    }
}
