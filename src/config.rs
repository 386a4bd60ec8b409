//! Engine options, from the command line and an optional TOML file.
//!
//! Everything is resolved once, up front, into an [`EngineConfig`]. Code
//! downstream of that never has to wonder whether a value was set.

use std::time::Duration;

use clap::Args;
use toml_span::{DeserError, de_helpers::TableHelper};

use crate::{
    languages::LanguageSpec,
    prelude::*,
    resolution::ResolutionPair,
    tesseract::{DEFAULT_TIMEOUT_SECS, Tesseract, TesseractRunOpts},
    toml_utils::{Number, custom_deser_error, describe_deser_error, from_toml_str},
};

/// The DPI we assume for images that don't declare one.
pub const DEFAULT_IMAGE_DPI: f64 = 300.0;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct EngineOptions {
    /// Google Cloud service account key file (JSON). If not set, Application
    /// Default Credentials are used.
    #[clap(long, env = "GCV_KEYFILE", value_name = "PATH")]
    pub keyfile: Option<PathBuf>,

    /// Languages to hint, as tesseract codes joined with "+" [default: eng].
    #[clap(short = 'l', long, value_name = "LANGS")]
    pub language: Option<String>,

    /// DPI to assume when the image doesn't declare one [default: 300].
    #[clap(long, value_name = "DPI")]
    pub image_dpi: Option<f64>,

    /// Tesseract engine mode, for orientation and deskew checks.
    #[clap(long, value_name = "N")]
    pub tesseract_oem: Option<u8>,

    /// Timeout for each tesseract run, in seconds [default: 180].
    #[clap(long, value_name = "SECONDS")]
    pub tesseract_timeout: Option<f64>,

    /// The tesseract executable [default: tesseract].
    #[clap(long, value_name = "PROGRAM")]
    pub tesseract: Option<PathBuf>,

    /// Read defaults for the options above from this TOML file.
    #[clap(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl EngineOptions {
    /// Merge with the config file (if any), apply defaults and validate.
    #[instrument(level = "debug", skip_all)]
    pub async fn resolve(&self) -> EngineResult<EngineConfig> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path).await?,
            None => ConfigFile::default(),
        };
        let config = self.merge(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with values from a config file. Command-line values win.
    fn merge(&self, file: ConfigFile) -> EngineResult<EngineConfig> {
        let languages = self
            .language
            .clone()
            .or(file.language)
            .unwrap_or_default()
            .parse::<LanguageSpec>()
            .map_err(|err| EngineError::config(format!("{err:#}")))?;

        let dpi = self.image_dpi.or(file.image_dpi).unwrap_or(DEFAULT_IMAGE_DPI);
        let image_dpi = ResolutionPair::uniform(dpi).ok_or_else(|| {
            EngineError::config(format!("image DPI must be positive, got {dpi}"))
        })?;

        let timeout = self
            .tesseract_timeout
            .or(file.tesseract_timeout)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if !(timeout.is_finite() && timeout > 0.0) {
            return Err(EngineError::config(format!(
                "tesseract timeout must be positive, got {timeout}"
            )));
        }
        let timeout = Duration::try_from_secs_f64(timeout).map_err(|_| {
            EngineError::config(format!("tesseract timeout is too large, got {timeout}"))
        })?;

        Ok(EngineConfig {
            keyfile: self.keyfile.clone().or(file.keyfile),
            languages,
            image_dpi,
            tesseract_program: self
                .tesseract
                .clone()
                .or(file.tesseract)
                .unwrap_or_else(|| PathBuf::from("tesseract")),
            tesseract_opts: TesseractRunOpts {
                engine_mode: self.tesseract_oem.or(file.tesseract_oem),
                timeout,
            },
        })
    }
}

/// Fully resolved engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Service account key file, or `None` for Application Default
    /// Credentials.
    pub keyfile: Option<PathBuf>,
    /// Languages to hint.
    pub languages: LanguageSpec,
    /// Fallback resolution for images without one.
    pub image_dpi: ResolutionPair,
    /// The tesseract executable.
    pub tesseract_program: PathBuf,
    /// Options for tesseract geometry checks.
    pub tesseract_opts: TesseractRunOpts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keyfile: None,
            languages: LanguageSpec::default(),
            image_dpi: ResolutionPair::uniform(DEFAULT_IMAGE_DPI)
                .expect("default DPI should be valid"),
            tesseract_program: PathBuf::from("tesseract"),
            tesseract_opts: TesseractRunOpts::default(),
        }
    }
}

impl EngineConfig {
    /// Check settings that depend on the environment.
    ///
    /// A key file that was named but isn't there is a configuration mistake,
    /// not something to silently paper over with ADC.
    pub fn validate(&self) -> EngineResult<()> {
        if let Some(keyfile) = &self.keyfile
            && !keyfile.is_file()
        {
            return Err(EngineError::config(format!(
                "Google Cloud Vision key file {:?} does not exist or is not a file",
                keyfile.display()
            )));
        }
        Ok(())
    }

    /// A handle to our tesseract executable.
    pub fn tesseract(&self) -> Tesseract {
        Tesseract::new(&self.tesseract_program)
    }
}

/// The contents of a `--config` file. Every field is optional.
#[derive(Debug, Default, PartialEq)]
struct ConfigFile {
    keyfile: Option<PathBuf>,
    language: Option<String>,
    image_dpi: Option<f64>,
    tesseract_oem: Option<u8>,
    tesseract_timeout: Option<f64>,
    tesseract: Option<PathBuf>,
}

impl ConfigFile {
    async fn load(path: &Path) -> EngineResult<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|err| {
            EngineError::config(format!("cannot read config file {:?}: {err}", path.display()))
        })?;
        let mut file = Self::parse(&source).map_err(|err| {
            EngineError::config(format!(
                "invalid config file {:?}: {}",
                path.display(),
                describe_deser_error(&source, &err)
            ))
        })?;
        file.resolve_paths(path.parent().unwrap_or(Path::new(".")));
        debug!(path = %path.display(), ?file, "Loaded config file");
        Ok(file)
    }

    fn parse(source: &str) -> Result<Self, DeserError> {
        from_toml_str(source)
    }

    /// Relative paths in a config file are relative to the file itself.
    fn resolve_paths(&mut self, base: &Path) {
        if let Some(keyfile) = &mut self.keyfile
            && keyfile.is_relative()
        {
            *keyfile = base.join(&*keyfile);
        }
        // A bare program name is looked up on `PATH`.
        if let Some(program) = &mut self.tesseract
            && program.components().count() > 1
            && program.is_relative()
        {
            *program = base.join(&*program);
        }
    }
}

impl<'de> toml_span::Deserialize<'de> for ConfigFile {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        let span = value.span;
        let mut th = TableHelper::new(value)?;
        let keyfile = th.optional::<String>("keyfile").map(PathBuf::from);
        let language = th.optional("language");
        let image_dpi = th.optional::<Number>("image_dpi").map(|n| n.0);
        let tesseract_oem = th.optional::<i64>("tesseract_oem");
        let tesseract_timeout = th.optional::<Number>("tesseract_timeout").map(|n| n.0);
        let tesseract = th.optional::<String>("tesseract").map(PathBuf::from);
        th.finalize(None)?;

        let tesseract_oem = tesseract_oem
            .map(|oem| {
                u8::try_from(oem)
                    .map_err(|_| custom_deser_error(span, "tesseract_oem is out of range"))
            })
            .transpose()?;
        Ok(Self {
            keyfile,
            language,
            image_dpi,
            tesseract_oem,
            tesseract_timeout,
            tesseract,
        })
    }
}
