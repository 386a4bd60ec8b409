//! The local `tesseract` CLI, used for page geometry and language lists.
//!
//! Google does the actual recognition, but the host pipeline also wants to
//! know which way up a page is, how skewed it is, and which languages it may
//! ask for. Tesseract already answers all three. None of these are essential:
//! if tesseract is missing or fails, we log it and return neutral values.

use std::{collections::BTreeSet, ffi::OsString, io, sync::LazyLock, time::Duration};

use regex::Regex;
use tokio::{process::Command, sync::Semaphore, time};

use crate::{async_utils::check_for_command_failure, languages::LanguageSpec, prelude::*};

/// The default timeout for a single tesseract run, in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 180.0;

/// Limits the number of tesseract processes, each of which wants a whole CPU.
static CPU_SEMAPHORE: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get()));

/// `Orientation in degrees: 270` in `--psm 0` output.
static ORIENTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Orientation in degrees:\s*(\d+)\s*$").expect("failed to compile regex")
});

/// `Orientation confidence: 11.79` in `--psm 0` output.
static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Orientation confidence:\s*([-+0-9.eE]+)\s*$")
        .expect("failed to compile regex")
});

/// `Deskew angle: -0.1234` in `--psm 2` output.
static DESKEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Deskew angle:\s*([-+0-9.eE]+)\s*$").expect("failed to compile regex")
});

/// How far a page is rotated, and how sure tesseract is about it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    /// Clockwise rotation of the page content, in degrees. One of 0, 90, 180
    /// or 270.
    pub angle: u32,
    /// Tesseract's confidence. Not a probability.
    pub confidence: f64,
}

impl Orientation {
    /// No rotation, no confidence.
    pub const NONE: Self = Self {
        angle: 0,
        confidence: 0.0,
    };
}

/// Options passed to every geometry call.
#[derive(Debug, Clone, Copy)]
pub struct TesseractRunOpts {
    /// Tesseract's `--oem` engine mode, if set.
    pub engine_mode: Option<u8>,
    /// Kill tesseract after this long.
    pub timeout: Duration,
}

impl Default for TesseractRunOpts {
    fn default() -> Self {
        Self {
            engine_mode: None,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Captured output of one tesseract run.
#[derive(Debug, Default)]
struct TesseractOutput {
    stdout: String,
    stderr: String,
}

impl TesseractOutput {
    /// Both streams, stdout first. Tesseract prints its `--psm 0` and
    /// `--psm 2` reports to whichever stream its build prefers.
    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// A handle to a `tesseract` executable.
#[derive(Debug, Clone)]
pub struct Tesseract {
    program: PathBuf,
}

impl Tesseract {
    /// Use the tesseract executable at `program` (looked up on `PATH` if it is
    /// a bare name).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Can we run tesseract at all?
    #[instrument(level = "debug", skip_all)]
    pub async fn is_available(&self) -> bool {
        match self
            .run(&[OsString::from("--version")], Duration::from_secs(30))
            .await
        {
            Ok(output) => {
                let version = output.combined();
                debug!(
                    version = version.trim_start().lines().next().unwrap_or(""),
                    "Found tesseract"
                );
                true
            }
            Err(err) => {
                error!(
                    "Tesseract executable not found, but it is needed for auxiliary functions: {:#}",
                    err
                );
                false
            }
        }
    }

    /// Ask tesseract which way up the page is. Returns [`Orientation::NONE`]
    /// on any failure.
    #[instrument(level = "debug", skip_all, fields(image = %image.display()))]
    pub async fn get_orientation(&self, image: &Path, opts: TesseractRunOpts) -> Orientation {
        self.try_get_orientation(image, opts)
            .await
            .unwrap_or_else(|err| {
                log_fallback("Orientation check", &err);
                Orientation::NONE
            })
    }

    /// Ask tesseract how skewed the page is, in degrees. Returns `0.0` on any
    /// failure.
    #[instrument(level = "debug", skip_all, fields(image = %image.display()))]
    pub async fn get_deskew(
        &self,
        image: &Path,
        languages: &LanguageSpec,
        opts: TesseractRunOpts,
    ) -> f64 {
        self.try_get_deskew(image, languages, opts)
            .await
            .unwrap_or_else(|err| {
                log_fallback("Deskew check", &err);
                0.0
            })
    }

    /// List the installed tesseract languages.
    #[instrument(level = "debug", skip_all)]
    pub async fn get_languages(&self) -> Result<BTreeSet<String>> {
        let output = self
            .run(&[OsString::from("--list-langs")], Duration::from_secs(30))
            .await?;
        parse_language_list(&output.stdout)
    }

    async fn try_get_orientation(
        &self,
        image: &Path,
        opts: TesseractRunOpts,
    ) -> Result<Orientation> {
        let args = geometry_args("osd", "0", image, opts);
        let output = self.run(&args, opts.timeout).await?;
        parse_orientation(&output.combined())
    }

    async fn try_get_deskew(
        &self,
        image: &Path,
        languages: &LanguageSpec,
        opts: TesseractRunOpts,
    ) -> Result<f64> {
        let args = geometry_args(&languages.to_string(), "2", image, opts);
        let output = self.run(&args, opts.timeout).await?;
        parse_deskew(&output.combined())
    }

    /// Run tesseract with `args` and capture both output streams.
    async fn run(&self, args: &[OsString], timeout: Duration) -> Result<TesseractOutput> {
        let permit = CPU_SEMAPHORE
            .acquire()
            .await
            .context("could not acquire CPU permit")?;
        let mut cmd = Command::new(&self.program);
        cmd.args(args).kill_on_drop(true);
        let output = time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("tesseract timed out after {:?}", timeout))?
            .with_context(|| format!("cannot run {:?}", self.program.display()))?;
        drop(permit);
        check_for_command_failure("tesseract", &output)?;
        Ok(TesseractOutput {
            stdout: String::from_utf8(output.stdout)
                .context("tesseract output was not valid UTF-8")?,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Arguments for a `--psm` analysis run that prints to stdout.
fn geometry_args(
    languages: &str,
    psm: &str,
    image: &Path,
    opts: TesseractRunOpts,
) -> Vec<OsString> {
    let mut args = vec![OsString::from("-l"), OsString::from(languages)];
    if let Some(oem) = opts.engine_mode {
        args.push("--oem".into());
        args.push(oem.to_string().into());
    }
    args.push("--psm".into());
    args.push(psm.into());
    args.push(image.as_os_str().to_owned());
    args.push("stdout".into());
    args
}

/// Log why we're falling back to a neutral geometry value.
fn log_fallback(what: &str, err: &anyhow::Error) {
    let not_found = err
        .chain()
        .filter_map(|e| e.downcast_ref::<io::Error>())
        .any(|e| e.kind() == io::ErrorKind::NotFound);
    if not_found {
        error!("Tesseract not found. {what} requires tesseract.");
    } else {
        error!("{what} failed, using neutral value: {:#}", err);
    }
}

/// Parse `tesseract --psm 0` output.
fn parse_orientation(output: &str) -> Result<Orientation> {
    let angle = ORIENTATION_RE
        .captures(output)
        .ok_or_else(|| anyhow!("no orientation in tesseract output"))?[1]
        .parse::<u32>()
        .context("bad orientation angle")?;
    if angle % 90 != 0 || angle >= 360 {
        return Err(anyhow!("unexpected orientation angle {}", angle));
    }
    let confidence = CONFIDENCE_RE
        .captures(output)
        .map(|caps| caps[1].parse::<f64>())
        .transpose()
        .context("bad orientation confidence")?
        .unwrap_or(0.0);
    Ok(Orientation { angle, confidence })
}

/// Parse `tesseract --psm 2` output.
fn parse_deskew(output: &str) -> Result<f64> {
    let angle = DESKEW_RE
        .captures(output)
        .ok_or_else(|| anyhow!("no deskew angle in tesseract output"))?[1]
        .parse::<f64>()
        .context("bad deskew angle")?;
    if angle.is_finite() {
        Ok(angle)
    } else {
        Err(anyhow!("deskew angle is not finite"))
    }
}

/// Parse `tesseract --list-langs` output, which starts with a header line.
fn parse_language_list(output: &str) -> Result<BTreeSet<String>> {
    let mut lines = output.lines();
    let header = lines.next().unwrap_or("");
    if !header.starts_with("List of available languages") {
        return Err(anyhow!("unexpected --list-langs header: {:?}", header));
    }
    Ok(lines
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}
