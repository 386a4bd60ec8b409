//! Talking to Google Cloud Vision.
//!
//! We keep our own copy of the parts of the response we care about, using the
//! field names of the Vision REST API. This keeps the hOCR code independent of
//! the generated client library, and lets us load recorded responses as JSON.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{
    languages::{LanguageSpec, map_language_hints},
    prelude::*,
};

pub mod google;

/// The Vision feature we always request.
pub const DOCUMENT_TEXT_DETECTION: &str = "DOCUMENT_TEXT_DETECTION";

/// Where our Google Cloud credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// A service account JSON key file.
    KeyFile(PathBuf),
    /// Application Default Credentials (environment, gcloud, metadata server).
    ApplicationDefault,
}

impl CredentialSource {
    /// An explicit key file wins. Otherwise use ADC.
    pub fn from_keyfile(keyfile: Option<&Path>) -> Self {
        match keyfile {
            Some(path) => Self::KeyFile(path.to_owned()),
            None => Self::ApplicationDefault,
        }
    }
}

/// A single annotation request for one page.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    /// Raw image bytes.
    pub content: Vec<u8>,

    /// BCP-47 language hints, highest priority first.
    pub language_hints: Vec<String>,
}

impl RecognitionRequest {
    /// The feature we ask for. There's only ever one.
    pub fn feature(&self) -> &'static str {
        DOCUMENT_TEXT_DETECTION
    }
}

/// What came back from one annotation call, before we decide what it means.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateResponse {
    /// The error message, if Google reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// The full-document text annotation, if any text was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text_annotation: Option<Annotation>,
}

/// The result of a recognition call that didn't fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    /// No text on the page. This is fine.
    Empty,
    /// We found text.
    Text(Annotation),
}

impl AnnotateResponse {
    /// Classify a response. An error message always wins, even if there's also
    /// an annotation. A missing annotation means "no text", not "failure".
    pub fn classify(self) -> EngineResult<RecognitionOutcome> {
        if let Some(message) = self.error_message.filter(|m| !m.is_empty()) {
            return Err(EngineError::remote(message));
        }
        match self.full_text_annotation {
            None => Ok(RecognitionOutcome::Empty),
            Some(annotation) => Ok(RecognitionOutcome::Text(annotation)),
        }
    }
}

/// A full-document text annotation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Annotation {
    /// Detected pages. Google returns one per image.
    pub pages: Vec<TextPage>,

    /// The full transcript, exactly as Google returned it.
    pub text: String,
}

/// A page of detected text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextPage {
    pub property: Option<TextProperty>,
    pub width: u32,
    pub height: u32,
    pub blocks: Vec<TextBlock>,
    pub confidence: f32,
}

/// A block of text, such as a column or a caption.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextBlock {
    pub property: Option<TextProperty>,
    pub bounding_box: Option<BoundingPoly>,
    pub paragraphs: Vec<Paragraph>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paragraph {
    pub property: Option<TextProperty>,
    pub bounding_box: Option<BoundingPoly>,
    pub words: Vec<Word>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Word {
    pub property: Option<TextProperty>,
    pub bounding_box: Option<BoundingPoly>,
    pub symbols: Vec<Symbol>,
    pub confidence: f32,
}

impl Word {
    /// The text of this word.
    pub fn text(&self) -> String {
        self.symbols.iter().map(|s| s.text.as_str()).collect()
    }

    /// The break after this word, taken from its last symbol.
    pub fn trailing_break(&self) -> Option<BreakType> {
        self.symbols
            .last()?
            .property
            .as_ref()?
            .detected_break
            .as_ref()
            .map(|b| b.r#type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Symbol {
    pub property: Option<TextProperty>,
    pub bounding_box: Option<BoundingPoly>,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextProperty {
    pub detected_languages: Vec<DetectedLanguage>,
    pub detected_break: Option<DetectedBreak>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectedLanguage {
    pub language_code: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectedBreak {
    pub r#type: BreakType,
    pub is_prefix: bool,
}

/// The kind of whitespace Google detected after a symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakType {
    #[default]
    Unknown,
    Space,
    SureSpace,
    /// Line-wrapping break.
    EolSureSpace,
    /// End-of-line hyphen that is not present in the text.
    Hyphen,
    /// Line break that ends a paragraph.
    LineBreak,
}

impl BreakType {
    /// Does this break end a line?
    pub fn ends_line(self) -> bool {
        matches!(self, Self::EolSureSpace | Self::Hyphen | Self::LineBreak)
    }
}

/// A polygon in pixel coordinates. Google usually sends four vertices, and
/// omits zero coordinates in JSON.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoundingPoly {
    pub vertices: Vec<Vertex>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
}

/// A session with the remote recognition service.
#[async_trait]
pub trait VisionBackend: Send + Sync + 'static {
    /// Annotate one image. Exactly one remote call, no retries.
    ///
    /// An `Err` here means the call itself failed. Errors reported inside a
    /// successful call are returned in [`AnnotateResponse::error_message`].
    async fn annotate(&self, request: RecognitionRequest) -> Result<AnnotateResponse>;
}

/// Something that can open a [`VisionBackend`] session.
#[async_trait]
pub trait VisionConnector: Send + Sync + 'static {
    /// Authenticate and create a session.
    async fn connect(&self, credentials: &CredentialSource) -> Result<Arc<dyn VisionBackend>>;
}

/// A lazily-connected recognition client.
///
/// The session is created on first use and kept for the lifetime of the
/// client. Concurrent first uses wait on a single connection attempt. A
/// failed attempt is not remembered, so the next call tries again.
pub struct RecognitionClient {
    connector: Arc<dyn VisionConnector>,
    credentials: CredentialSource,
    session: OnceCell<Arc<dyn VisionBackend>>,
}

impl RecognitionClient {
    /// Create a client. This does not touch the network.
    pub fn new(connector: Arc<dyn VisionConnector>, credentials: CredentialSource) -> Self {
        Self {
            connector,
            credentials,
            session: OnceCell::new(),
        }
    }

    /// Have we connected yet?
    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.session.initialized()
    }

    /// Get our session, connecting if necessary.
    #[instrument(level = "debug", skip_all)]
    pub async fn session(&self) -> EngineResult<Arc<dyn VisionBackend>> {
        self.session
            .get_or_try_init(|| async {
                match &self.credentials {
                    CredentialSource::KeyFile(path) => {
                        info!(keyfile = %path.display(), "Using Google Cloud Vision key file")
                    }
                    CredentialSource::ApplicationDefault => {
                        info!("Using Application Default Credentials for Google Cloud Vision")
                    }
                }
                self.connector.connect(&self.credentials).await
            })
            .await
            .cloned()
            .map_err(|source| {
                error!("Failed to initialize Google Cloud Vision client: {:#}", source);
                EngineError::Environment { source }
            })
    }

    /// Recognize the text on one page image.
    #[instrument(level = "debug", skip_all, fields(image = %image.display()))]
    pub async fn recognize(
        &self,
        image: &Path,
        languages: &LanguageSpec,
    ) -> EngineResult<RecognitionOutcome> {
        let session = self.session().await?;

        let content = tokio::fs::read(image)
            .await
            .map_err(|err| EngineError::io(image, err))?;
        let request = RecognitionRequest {
            content,
            language_hints: map_language_hints(languages).hints,
        };

        debug!(feature = request.feature(), "Sending request to Google Cloud Vision");
        let response = session.annotate(request).await.map_err(|err| {
            error!("Google Cloud Vision call failed: {:#}", err);
            EngineError::remote(format!("{err:#}"))
        })?;
        debug!("Received response from Google Cloud Vision");

        let outcome = response.classify().inspect_err(|err| error!("{err}"))?;
        if outcome == RecognitionOutcome::Empty {
            warn!("Google Cloud Vision found no text");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted stand-in for Google Cloud Vision.

    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// A backend that always returns the same response, and records requests.
    pub struct FakeBackend {
        response: Result<AnnotateResponse, String>,
        pub requests: Mutex<Vec<RecognitionRequest>>,
    }

    #[async_trait]
    impl VisionBackend for FakeBackend {
        async fn annotate(&self, request: RecognitionRequest) -> Result<AnnotateResponse> {
            self.requests.lock().unwrap().push(request);
            self.response.clone().map_err(|msg| anyhow!(msg))
        }
    }

    /// A connector that hands out a [`FakeBackend`], optionally failing the
    /// first few attempts.
    pub struct FakeConnector {
        pub backend: Arc<FakeBackend>,
        pub connect_calls: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl FakeConnector {
        /// Always respond with `response`.
        pub fn responding(response: AnnotateResponse) -> Arc<Self> {
            Self::build(Ok(response), 0)
        }

        /// Fail every annotation call at the transport level.
        pub fn erroring(message: &str) -> Arc<Self> {
            Self::build(Err(message.to_owned()), 0)
        }

        /// Fail the first `failures` connection attempts.
        pub fn failing_to_connect(failures: usize, response: AnnotateResponse) -> Arc<Self> {
            Self::build(Ok(response), failures)
        }

        fn build(response: Result<AnnotateResponse, String>, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                backend: Arc::new(FakeBackend {
                    response,
                    requests: Mutex::new(vec![]),
                }),
                connect_calls: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            })
        }

        pub fn connect_calls(&self) -> usize {
            self.connect_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionConnector for FakeConnector {
        async fn connect(
            &self,
            _credentials: &CredentialSource,
        ) -> Result<Arc<dyn VisionBackend>> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent callers a chance to pile up.
            tokio::task::yield_now().await;
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(anyhow!("no credentials found"))
            } else {
                Ok(self.backend.clone() as Arc<dyn VisionBackend>)
            }
        }
    }

    /// An annotation with a single word.
    pub fn hello_annotation() -> Annotation {
        serde_json::from_value(serde_json::json!({
            "text": "Hello\n",
            "pages": [{
                "width": 100,
                "height": 50,
                "blocks": [{
                    "boundingBox": { "vertices": [
                        { "x": 10, "y": 10 }, { "x": 60, "y": 10 },
                        { "x": 60, "y": 30 }, { "x": 10, "y": 30 }
                    ]},
                    "paragraphs": [{
                        "words": [{
                            "boundingBox": { "vertices": [
                                { "x": 10, "y": 10 }, { "x": 60, "y": 10 },
                                { "x": 60, "y": 30 }, { "x": 10, "y": 30 }
                            ]},
                            "confidence": 0.98,
                            "symbols": [
                                { "text": "H" }, { "text": "e" }, { "text": "l" },
                                { "text": "l" },
                                {
                                    "text": "o",
                                    "property": { "detectedBreak": { "type": "LINE_BREAK" } }
                                }
                            ]
                        }]
                    }]
                }]
            }]
        }))
        .unwrap()
    }
}
