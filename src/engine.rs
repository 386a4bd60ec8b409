//! The OCR engine as the host pipeline sees it.
//!
//! Recognition goes to Google Cloud Vision. Orientation, deskew and the
//! language list come from the local tesseract.

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    artifacts::{Materialized, materialize},
    async_utils::write_atomically,
    config::EngineConfig,
    languages::BASE_LANGUAGE,
    pdf::empty_pdf,
    prelude::*,
    tesseract::{Orientation, Tesseract},
    vision::{CredentialSource, RecognitionClient, VisionConnector, google::GoogleVisionConnector},
};

/// An OCR engine backed by Google Cloud Vision.
///
/// One engine may be shared by many concurrent page jobs. The remote session
/// is created on first use and then reused.
pub struct VisionOcrEngine {
    config: EngineConfig,
    tesseract: Tesseract,
    client: RecognitionClient,
}

impl VisionOcrEngine {
    /// The name we report to the host pipeline.
    pub const NAME: &'static str = "google_vision";

    /// Create an engine that talks to the real Google Cloud Vision service.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_connector(config, Arc::new(GoogleVisionConnector))
    }

    /// Create an engine using a custom connection to the recognition
    /// service.
    pub fn with_connector(config: EngineConfig, connector: Arc<dyn VisionConnector>) -> Self {
        let credentials = CredentialSource::from_keyfile(config.keyfile.as_deref());
        Self {
            tesseract: config.tesseract(),
            client: RecognitionClient::new(connector, credentials),
            config,
        }
    }

    /// Our settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Producer string for PDF metadata.
    pub fn creator_tag(&self) -> String {
        format!("{} {}", env!("CARGO_PKG_NAME"), self.version())
    }

    /// Can we run? We only check for tesseract. Whether Google is reachable
    /// only becomes clear on the first page.
    pub async fn check_availability(&self) -> bool {
        self.tesseract.is_available().await
    }

    /// Languages the host pipeline may ask for: whatever tesseract has
    /// installed, or just English if we can't find out.
    #[instrument(level = "debug", skip_all)]
    pub async fn languages(&self) -> BTreeSet<String> {
        match self.tesseract.get_languages().await {
            Ok(languages) => languages,
            Err(err) => {
                warn!("Could not list tesseract languages: {:#}", err);
                BTreeSet::from([BASE_LANGUAGE.to_owned()])
            }
        }
    }

    pub async fn get_orientation(&self, image: &Path) -> Orientation {
        self.tesseract
            .get_orientation(image, self.config.tesseract_opts)
            .await
    }

    pub async fn get_deskew(&self, image: &Path) -> f64 {
        self.tesseract
            .get_deskew(image, &self.config.languages, self.config.tesseract_opts)
            .await
    }

    /// Recognize `image`, writing hOCR to `hocr_path` and the transcript to
    /// `text_path`.
    #[instrument(level = "debug", skip_all, fields(image = %image.display()))]
    pub async fn generate_hocr(
        &self,
        image: &Path,
        hocr_path: &Path,
        text_path: &Path,
    ) -> EngineResult<Materialized> {
        materialize(
            &self.client,
            image,
            hocr_path,
            text_path,
            &self.config.languages,
            self.config.image_dpi,
        )
        .await
    }

    /// Recognize `image`, writing the transcript to `text_path` and a
    /// placeholder PDF to `pdf_path`.
    ///
    /// We don't build a real text layer here. The hOCR is left next to the
    /// PDF as `<pdf stem>.hocr`, and the PDF itself is a blank page carrying
    /// only metadata. If even that can't be written, we leave a zero-byte
    /// file.
    #[instrument(level = "debug", skip_all, fields(image = %image.display()))]
    pub async fn generate_text_only_pdf(
        &self,
        image: &Path,
        pdf_path: &Path,
        text_path: &Path,
    ) -> EngineResult<Materialized> {
        let hocr_path = pdf_path.with_extension("hocr");
        let outcome = self.generate_hocr(image, &hocr_path, text_path).await?;
        debug!(hocr = %hocr_path.display(), "Kept hOCR next to placeholder PDF");

        let title = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let written = match empty_pdf(&title, &self.creator_tag()) {
            Ok(pdf) => write_atomically(pdf_path, pdf)
                .await
                .map_err(anyhow::Error::from),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!("Could not write placeholder PDF, leaving an empty file: {:#}", err);
            write_atomically(pdf_path, vec![]).await?;
        }
        warn!(
            pdf = %pdf_path.display(),
            "Text-only PDF output is a blank placeholder; use the hOCR output for text placement"
        );
        Ok(outcome)
    }

    /// Same as [`Self::generate_text_only_pdf`]. We never render the image
    /// into the PDF ourselves.
    pub async fn generate_pdf(
        &self,
        image: &Path,
        pdf_path: &Path,
        text_path: &Path,
    ) -> EngineResult<Materialized> {
        self.generate_text_only_pdf(image, pdf_path, text_path)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use super::*;
    use crate::{
        tesseract::TesseractRunOpts,
        vision::{
            AnnotateResponse, Annotation,
            testing::{FakeConnector, hello_annotation},
        },
    };

    fn test_config() -> EngineConfig {
        EngineConfig {
            tesseract_program: PathBuf::from("/nonexistent/bin/tesseract-for-tests"),
            tesseract_opts: TesseractRunOpts {
                engine_mode: None,
                timeout: Duration::from_secs(5),
            },
            ..EngineConfig::default()
        }
    }

    fn engine(connector: Arc<FakeConnector>) -> VisionOcrEngine {
        VisionOcrEngine::with_connector(test_config(), connector)
    }

    fn responding_with(annotation: Annotation) -> Arc<FakeConnector> {
        FakeConnector::responding(AnnotateResponse {
            error_message: None,
            full_text_annotation: Some(annotation),
        })
    }

    #[test]
    fn reports_identity() {
        let engine = engine(responding_with(hello_annotation()));
        assert_eq!(engine.name(), "google_vision");
        assert_eq!(engine.version(), env!("CARGO_PKG_VERSION"));
        assert_eq!(
            engine.creator_tag(),
            format!("vision-hocr {}", env!("CARGO_PKG_VERSION"))
        );
    }

    #[tokio::test]
    async fn missing_tesseract_gives_neutral_answers() {
        let engine = engine(responding_with(hello_annotation()));
        let image = Path::new("page.png");
        assert!(!engine.check_availability().await);
        assert_eq!(engine.get_orientation(image).await, Orientation::NONE);
        assert_eq!(engine.get_deskew(image).await, 0.0);
        assert_eq!(
            engine.languages().await,
            BTreeSet::from(["eng".to_owned()])
        );
    }

    #[tokio::test]
    async fn hocr_from_transcript_without_regions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("scan.png");
        fs::write(&image, b"not really a png")?;
        let annotation = Annotation {
            pages: vec![],
            text: "Just text  \n".to_owned(),
        };
        let engine = engine(responding_with(annotation));
        let (hocr, text) = (dir.path().join("scan.hocr"), dir.path().join("scan.txt"));

        let outcome = engine.generate_hocr(&image, &hocr, &text).await?;
        assert_eq!(outcome, Materialized::Words(0));
        assert_eq!(fs::read_to_string(&text)?, "Just text  \n");
        let hocr = fs::read_to_string(&hocr)?;
        assert!(hocr.contains("class=\"ocr_page\""));
        assert!(!hocr.contains("ocrx_word"));
        Ok(())
    }

    #[tokio::test]
    async fn text_only_pdf_keeps_hocr() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("scan.png");
        fs::write(&image, b"not really a png")?;
        let connector = responding_with(hello_annotation());
        let engine = engine(connector.clone());
        let (pdf, text) = (dir.path().join("out.pdf"), dir.path().join("out.txt"));

        engine.generate_pdf(&image, &pdf, &text).await?;
        let pdf_bytes = fs::read(&pdf)?;
        assert!(pdf_bytes.starts_with(b"%PDF-1.4"));
        assert_eq!(lopdf::Document::load_mem(&pdf_bytes)?.get_pages().len(), 1);
        let hocr = fs::read_to_string(dir.path().join("out.hocr"))?;
        assert!(hocr.contains(">Hello</span>"));
        assert_eq!(fs::read_to_string(&text)?, "Hello\n");
        assert_eq!(connector.connect_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn remote_errors_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("scan.png");
        fs::write(&image, b"not really a png").unwrap();
        let engine = engine(FakeConnector::erroring("quota exceeded"));

        let err = engine
            .generate_text_only_pdf(&image, &dir.path().join("out.pdf"), &dir.path().join("out.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RemoteRecognition { .. }));
        assert!(err.is_execution_error());
        assert!(!dir.path().join("out.pdf").exists());
    }

    #[tokio::test]
    async fn session_failures_are_environment_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("scan.png");
        fs::write(&image, b"not really a png")?;
        let connector = FakeConnector::failing_to_connect(
            1,
            AnnotateResponse {
                error_message: None,
                full_text_annotation: Some(hello_annotation()),
            },
        );
        let engine = engine(connector.clone());
        let (hocr, text) = (dir.path().join("scan.hocr"), dir.path().join("scan.txt"));

        let err = engine.generate_hocr(&image, &hocr, &text).await.unwrap_err();
        assert!(matches!(err, EngineError::Environment { .. }));
        assert!(!err.is_execution_error());

        // The next page tries again.
        engine.generate_hocr(&image, &hocr, &text).await?;
        assert_eq!(connector.connect_calls(), 2);
        Ok(())
    }
}
