//! The real Google Cloud Vision backend.

use std::sync::Arc;

use google_cloud_auth::credentials::service_account;
use google_cloud_gax::error::rpc::Code;
use google_cloud_vision_v1 as vision;
use vision::{
    client::ImageAnnotator,
    model::{self, text_annotation::detected_break::BreakType as GoogleBreakType},
};

use crate::prelude::*;

use super::{
    AnnotateResponse, Annotation, BoundingPoly, BreakType, CredentialSource, DetectedBreak,
    DetectedLanguage, Paragraph, RecognitionRequest, Symbol, TextBlock, TextPage, TextProperty,
    Vertex, VisionBackend, VisionConnector, Word,
};

/// Connects to Google Cloud Vision using the `google-cloud-vision-v1` client.
#[derive(Debug, Default)]
pub struct GoogleVisionConnector;

#[async_trait]
impl VisionConnector for GoogleVisionConnector {
    async fn connect(&self, credentials: &CredentialSource) -> Result<Arc<dyn VisionBackend>> {
        let builder = ImageAnnotator::builder();
        let client = match credentials {
            CredentialSource::KeyFile(path) => {
                let key = tokio::fs::read_to_string(path).await.with_context(|| {
                    format!("failed to read key file {:?}", path.display())
                })?;
                let key = serde_json::from_str::<serde_json::Value>(&key).with_context(|| {
                    format!("key file {:?} is not valid JSON", path.display())
                })?;
                let credentials = service_account::Builder::new(key)
                    .build()
                    .context("failed to load service account credentials")?;
                builder.with_credentials(credentials).build().await
            }
            // The client builder falls back to ADC on its own.
            CredentialSource::ApplicationDefault => builder.build().await,
        }
        .context("failed to create Google Cloud Vision client")?;
        Ok(Arc::new(GoogleVisionBackend { client }))
    }
}

/// An authenticated `ImageAnnotator` session.
#[derive(Debug)]
pub struct GoogleVisionBackend {
    client: ImageAnnotator,
}

#[async_trait]
impl VisionBackend for GoogleVisionBackend {
    #[instrument(level = "trace", skip_all)]
    async fn annotate(&self, request: RecognitionRequest) -> Result<AnnotateResponse> {
        let image_request = model::AnnotateImageRequest::new()
            .set_image(model::Image::new().set_content(request.content))
            .set_features([
                model::Feature::new().set_type(model::feature::Type::DocumentTextDetection)
            ])
            .set_image_context(
                model::ImageContext::new().set_language_hints(request.language_hints),
            );

        let response = self
            .client
            .batch_annotate_images()
            .set_requests([image_request])
            .send()
            .await
            .map_err(call_error)?;
        trace!(?response, "Google Cloud Vision response");

        let response = response
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Google Cloud Vision returned no responses"))?;
        Ok(AnnotateResponse {
            error_message: response.error.map(|status| status.message),
            full_text_annotation: response.full_text_annotation.map(Annotation::from),
        })
    }
}

/// Turn a failed call into an [`anyhow::Error`], with a hint for the most
/// common cause of trouble.
fn call_error(err: vision::Error) -> anyhow::Error {
    if let Some(status) = err.status()
        && matches!(status.code, Code::Unauthenticated | Code::PermissionDenied)
    {
        warn!("Google Cloud Vision rejected our credentials; check the key file or ADC setup");
    }
    anyhow::Error::new(err).context("Google Cloud Vision API call failed")
}

impl From<model::TextAnnotation> for Annotation {
    fn from(annotation: model::TextAnnotation) -> Self {
        Self {
            pages: annotation.pages.into_iter().map(TextPage::from).collect(),
            text: annotation.text,
        }
    }
}

impl From<model::Page> for TextPage {
    fn from(page: model::Page) -> Self {
        Self {
            property: page.property.map(TextProperty::from),
            width: u32::try_from(page.width).unwrap_or(0),
            height: u32::try_from(page.height).unwrap_or(0),
            blocks: page.blocks.into_iter().map(TextBlock::from).collect(),
            confidence: page.confidence,
        }
    }
}

impl From<model::Block> for TextBlock {
    fn from(block: model::Block) -> Self {
        Self {
            property: block.property.map(TextProperty::from),
            bounding_box: block.bounding_box.map(BoundingPoly::from),
            paragraphs: block.paragraphs.into_iter().map(Paragraph::from).collect(),
            confidence: block.confidence,
        }
    }
}

impl From<model::Paragraph> for Paragraph {
    fn from(paragraph: model::Paragraph) -> Self {
        Self {
            property: paragraph.property.map(TextProperty::from),
            bounding_box: paragraph.bounding_box.map(BoundingPoly::from),
            words: paragraph.words.into_iter().map(Word::from).collect(),
            confidence: paragraph.confidence,
        }
    }
}

impl From<model::Word> for Word {
    fn from(word: model::Word) -> Self {
        Self {
            property: word.property.map(TextProperty::from),
            bounding_box: word.bounding_box.map(BoundingPoly::from),
            symbols: word.symbols.into_iter().map(Symbol::from).collect(),
            confidence: word.confidence,
        }
    }
}

impl From<model::Symbol> for Symbol {
    fn from(symbol: model::Symbol) -> Self {
        Self {
            property: symbol.property.map(TextProperty::from),
            bounding_box: symbol.bounding_box.map(BoundingPoly::from),
            text: symbol.text,
            confidence: symbol.confidence,
        }
    }
}

impl From<model::text_annotation::TextProperty> for TextProperty {
    fn from(property: model::text_annotation::TextProperty) -> Self {
        Self {
            detected_languages: property
                .detected_languages
                .into_iter()
                .map(|lang| DetectedLanguage {
                    language_code: lang.language_code,
                    confidence: lang.confidence,
                })
                .collect(),
            detected_break: property.detected_break.map(|b| DetectedBreak {
                r#type: BreakType::from(&b.r#type),
                is_prefix: b.is_prefix,
            }),
        }
    }
}

impl From<&GoogleBreakType> for BreakType {
    fn from(break_type: &GoogleBreakType) -> Self {
        match break_type {
            GoogleBreakType::Space => Self::Space,
            GoogleBreakType::SureSpace => Self::SureSpace,
            GoogleBreakType::EolSureSpace => Self::EolSureSpace,
            GoogleBreakType::Hyphen => Self::Hyphen,
            GoogleBreakType::LineBreak => Self::LineBreak,
            _ => Self::Unknown,
        }
    }
}

impl From<model::BoundingPoly> for BoundingPoly {
    fn from(poly: model::BoundingPoly) -> Self {
        Self {
            vertices: poly
                .vertices
                .into_iter()
                .map(|v| Vertex { x: v.x, y: v.y })
                .collect(),
        }
    }
}
