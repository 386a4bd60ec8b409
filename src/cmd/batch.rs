//! The `batch` subcommand, which OCRs many pages with one engine.

use std::{collections::HashSet, sync::Arc};

use clap::Args;
use futures::{StreamExt as _, stream};

use crate::{
    artifacts::Materialized,
    config::EngineOptions,
    engine::VisionOcrEngine,
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::engine_from_options;

/// Arguments for `batch`.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// Page images to recognize.
    #[clap(value_name = "IMAGE", required = true)]
    pub images: Vec<PathBuf>,

    /// Directory for `<stem>.hocr` and `<stem>.txt` outputs.
    #[clap(long = "out-dir", value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Max number of pages to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "8")]
    pub job_count: usize,

    /// What portion of pages should we allow to fail? Specified as a number
    /// between 0.0 and 1.0.
    #[clap(long, default_value = "0.0")]
    pub allowed_failure_rate: f32,

    #[clap(flatten)]
    pub engine: EngineOptions,
}

/// Per-batch counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub recognized: usize,
    pub empty: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn total(&self) -> usize {
        self.recognized + self.empty + self.failed
    }

    /// Fail if too many pages failed.
    pub fn check_failure_rate(&self, allowed_failure_rate: f32) -> Result<()> {
        if self.total() == 0 {
            return Ok(());
        }
        let failure_rate = self.failed as f32 / self.total() as f32;
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of pages failed, but only {:.2}% were allowed",
                self.failed,
                self.total(),
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            Ok(())
        }
    }
}

/// The `batch` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<()> {
    if opts.job_count == 0 {
        return Err(anyhow!("--jobs must be at least 1"));
    }
    let engine = Arc::new(engine_from_options(&opts.engine).await?);
    tokio::fs::create_dir_all(&opts.out_dir)
        .await
        .with_context(|| format!("failed to create {:?}", opts.out_dir.display()))?;

    let summary = run_batch(&ui, engine, &opts.images, &opts.out_dir, opts.job_count).await?;
    if summary.empty > 0 {
        ui.display_message("📭", &format!("{} pages had no text", summary.empty));
    }
    if summary.failed > 0 {
        ui.display_message(
            "❌",
            &format!("{} pages could not be processed", summary.failed),
        );
    }
    summary.check_failure_rate(opts.allowed_failure_rate)
}

/// Recognize `images` with up to `job_count` pages in flight.
///
/// Page failures are logged and counted. Other pages carry on.
pub async fn run_batch(
    ui: &Ui,
    engine: Arc<VisionOcrEngine>,
    images: &[PathBuf],
    out_dir: &Path,
    job_count: usize,
) -> Result<BatchSummary> {
    let jobs = plan_outputs(images, out_dir)?;

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "📄",
            msg: "Recognizing pages",
            done_msg: "Recognized pages",
        },
        jobs.len() as u64,
    );
    let results = stream::iter(jobs)
        .map(|job| {
            let engine = engine.clone();
            async move {
                let result = engine
                    .generate_hocr(&job.image, &job.hocr_path, &job.text_path)
                    .await;
                (job, result)
            }
        })
        .buffer_unordered(job_count);
    let mut results = pb.wrap_stream(results);

    let mut summary = BatchSummary::default();
    while let Some((job, result)) = results.next().await {
        match result {
            Ok(Materialized::Words(_)) => summary.recognized += 1,
            Ok(Materialized::Empty) => summary.empty += 1,
            Err(err) if err.is_execution_error() => {
                error!(image = %job.image.display(), "Page failed: {}", err);
                summary.failed += 1;
            }
            // Configuration and environment problems won't fix themselves on
            // the next page.
            Err(err) => return Err(err.into()),
        }
    }
    debug!(?summary, "Batch finished");
    Ok(summary)
}

/// One page and its outputs.
#[derive(Debug)]
struct PageJob {
    image: PathBuf,
    hocr_path: PathBuf,
    text_path: PathBuf,
}

/// Work out output paths, refusing inputs that would overwrite each other.
fn plan_outputs(images: &[PathBuf], out_dir: &Path) -> Result<Vec<PageJob>> {
    let mut seen = HashSet::new();
    images
        .iter()
        .map(|image| {
            let stem = image
                .file_stem()
                .ok_or_else(|| anyhow!("{:?} has no file name", image.display()))?;
            if !seen.insert(stem.to_owned()) {
                return Err(anyhow!(
                    "more than one input is named {:?}; outputs would collide",
                    stem
                ));
            }
            let base = out_dir.join(stem);
            Ok(PageJob {
                image: image.clone(),
                hocr_path: base.with_extension("hocr"),
                text_path: base.with_extension("txt"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        config::EngineConfig,
        vision::{
            AnnotateResponse,
            testing::{FakeConnector, hello_annotation},
        },
    };

    fn write_pages(dir: &Path, count: usize) -> Vec<PathBuf> {
        (1..=count)
            .map(|n| {
                let path = dir.join(format!("page-{n:04}.png"));
                fs::write(&path, b"fake image").unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn plans_outputs_by_stem() {
        let jobs = plan_outputs(
            &[PathBuf::from("in/a.png"), PathBuf::from("in/b.tif")],
            Path::new("out"),
        )
        .unwrap();
        assert_eq!(jobs[0].hocr_path, PathBuf::from("out/a.hocr"));
        assert_eq!(jobs[1].text_path, PathBuf::from("out/b.txt"));

        assert!(
            plan_outputs(
                &[PathBuf::from("x/a.png"), PathBuf::from("y/a.jpg")],
                Path::new("out")
            )
            .is_err()
        );
    }

    #[test]
    fn failure_rate_is_enforced() {
        let summary = BatchSummary {
            recognized: 9,
            empty: 0,
            failed: 1,
        };
        assert!(summary.check_failure_rate(0.1).is_ok());
        assert!(summary.check_failure_rate(0.05).is_err());
        assert!(BatchSummary::default().check_failure_rate(0.0).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shares_one_session_across_pages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let images = write_pages(dir.path(), 12);
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir)?;

        let connector = FakeConnector::responding(AnnotateResponse {
            error_message: None,
            full_text_annotation: Some(hello_annotation()),
        });
        let engine = Arc::new(VisionOcrEngine::with_connector(
            EngineConfig::default(),
            connector.clone(),
        ));

        let summary = run_batch(&Ui::init_for_tests(), engine, &images, &out_dir, 4).await?;
        assert_eq!(
            summary,
            BatchSummary {
                recognized: 12,
                empty: 0,
                failed: 0
            }
        );
        assert_eq!(connector.connect_calls(), 1);
        assert_eq!(
            fs::read_to_string(out_dir.join("page-0007.txt"))?,
            "Hello\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn page_failures_are_counted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut images = write_pages(dir.path(), 2);
        images.push(dir.path().join("missing.png"));
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir)?;

        let engine = Arc::new(VisionOcrEngine::with_connector(
            EngineConfig::default(),
            FakeConnector::responding(AnnotateResponse::default()),
        ));
        let summary = run_batch(&Ui::init_for_tests(), engine, &images, &out_dir, 2).await?;
        assert_eq!(
            summary,
            BatchSummary {
                recognized: 0,
                empty: 2,
                failed: 1
            }
        );
        assert!(summary.check_failure_rate(0.0).is_err());
        Ok(())
    }
}
