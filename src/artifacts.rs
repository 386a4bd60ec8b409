//! Turning one page image into an hOCR file and a text transcript.

use crate::{
    async_utils::write_atomically,
    hocr::HocrDocument,
    languages::LanguageSpec,
    prelude::*,
    resolution::{ResolutionPair, read_pixel_size, resolve_or_default},
    vision::{RecognitionClient, RecognitionOutcome},
};

/// What [`materialize`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// No text was found, and both outputs are empty.
    Empty,
    /// We wrote this many words.
    Words(usize),
}

/// Recognize `image` and write `hocr_path` and `text_path`.
///
/// Both outputs are overwritten. If recognition fails, neither is touched.
/// If Google finds no text, both are truncated to zero bytes, which the host
/// pipeline treats as a blank page.
#[instrument(level = "debug", skip_all, fields(image = %image.display()))]
pub async fn materialize(
    client: &RecognitionClient,
    image: &Path,
    hocr_path: &Path,
    text_path: &Path,
    languages: &LanguageSpec,
    default_dpi: ResolutionPair,
) -> EngineResult<Materialized> {
    let (dpi, image_size) = read_page_geometry(image, default_dpi).await?;

    let annotation = match client.recognize(image, languages).await? {
        RecognitionOutcome::Empty => {
            write_atomically(hocr_path, vec![]).await?;
            write_atomically(text_path, vec![]).await?;
            return Ok(Materialized::Empty);
        }
        RecognitionOutcome::Text(annotation) => annotation,
    };

    let page_id = image
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_owned());
    let document = HocrDocument::from_annotation(&annotation, &page_id, dpi, image_size);
    let hocr = document.render().map_err(EngineError::plugin)?;

    write_atomically(hocr_path, hocr.into_bytes()).await?;
    write_atomically(text_path, annotation.text.into_bytes()).await?;
    let words = document.word_count();
    debug!(words, hocr = %hocr_path.display(), text = %text_path.display(), "Wrote OCR output");
    Ok(Materialized::Words(words))
}

/// Read the DPI and pixel size of `image` off the async runtime. Both are
/// file reads that may block on slow storage.
async fn read_page_geometry(
    image: &Path,
    default_dpi: ResolutionPair,
) -> EngineResult<(ResolutionPair, Option<(u32, u32)>)> {
    let image = image.to_owned();
    tokio::task::spawn_blocking(move || {
        (
            resolve_or_default(&image, default_dpi),
            read_pixel_size(&image),
        )
    })
    .await
    .map_err(|err| EngineError::plugin(anyhow!("image header task panicked: {err}")))
}
