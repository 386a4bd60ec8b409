//! Converting a Vision annotation into hOCR.
//!
//! hOCR is XHTML with OCR geometry stuffed into `title` attributes. The host
//! pipeline reads it back to place an invisible text layer over the page
//! image, so what matters most here is the word boxes and `scan_res`.
//!
//! Google gives us blocks, paragraphs, words and symbols, but no lines. We
//! rebuild lines from the breaks Google detected after each word.

use std::{fmt, sync::LazyLock};

use handlebars::Handlebars;
use serde::Serialize;

use crate::{
    prelude::*,
    resolution::ResolutionPair,
    vision::{Annotation, BoundingPoly, Paragraph, TextBlock, TextPage, TextProperty, Word},
};

/// Our hOCR template. All interpolated values are HTML-escaped by Handlebars.
const HOCR_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN"
    "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml"{{#if lang}} xml:lang="{{lang}}" lang="{{lang}}"{{/if}}>
<head>
<title>{{title}}</title>
<meta http-equiv="Content-Type" content="text/html;charset=utf-8" />
<meta name="ocr-system" content="{{system}}" />
<meta name="ocr-capabilities" content="ocr_page ocr_carea ocr_par ocr_line ocrx_word" />
</head>
<body>
{{#each pages}}
<div class="ocr_page" id="{{id}}" title="{{title}}">
{{#each blocks}}
<div class="ocr_carea" id="{{id}}" title="{{title}}">
{{#each paragraphs}}
<p class="ocr_par" id="{{id}}"{{#if lang}} lang="{{lang}}"{{/if}} title="{{title}}">
{{#each lines}}
<span class="ocr_line" id="{{id}}" title="{{title}}">{{#each words}}<span class="ocrx_word" id="{{id}}" title="{{title}}">{{text}}</span>{{#unless @last}} {{/unless}}{{/each}}</span>
{{/each}}
</p>
{{/each}}
</div>
{{/each}}
</div>
{{/each}}
</body>
</html>
"#;

/// Compiled templates.
static TEMPLATES: LazyLock<Handlebars<'static>> = LazyLock::new(|| {
    let mut handlebars = Handlebars::new();
    handlebars
        .register_template_string("hocr", HOCR_TEMPLATE)
        .expect("built-in hOCR template should be valid");
    handlebars
});

/// An axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BBox {
    /// The bounding box of a polygon. Negative coordinates are clamped to 0.
    pub fn from_poly(poly: &BoundingPoly) -> Option<Self> {
        let clamp = |v: i32| u32::try_from(v).unwrap_or(0);
        let xs = poly.vertices.iter().map(|v| clamp(v.x));
        let ys = poly.vertices.iter().map(|v| clamp(v.y));
        Some(Self {
            x0: xs.clone().min()?,
            y0: ys.clone().min()?,
            x1: xs.max()?,
            y1: ys.max()?,
        })
    }

    /// The smallest box containing both boxes.
    pub fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// The union of many boxes, if there are any.
    pub fn union_all(boxes: impl IntoIterator<Item = Self>) -> Option<Self> {
        boxes.into_iter().reduce(Self::union)
    }

    /// A box covering a whole page.
    fn page(width: u32, height: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    /// An empty box at the origin.
    const ZERO: Self = Self {
        x0: 0,
        y0: 0,
        x1: 0,
        y1: 0,
    };
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bbox {} {} {} {}", self.x0, self.y0, self.x1, self.y1)
    }
}

/// A renderable hOCR document for one page image.
#[derive(Debug, Clone, Serialize)]
pub struct HocrDocument {
    title: String,
    system: String,
    lang: Option<String>,
    pages: Vec<HocrPage>,
}

#[derive(Debug, Clone, Serialize)]
struct HocrPage {
    id: String,
    title: String,
    blocks: Vec<HocrBlock>,
}

#[derive(Debug, Clone, Serialize)]
struct HocrBlock {
    id: String,
    title: String,
    paragraphs: Vec<HocrParagraph>,
}

#[derive(Debug, Clone, Serialize)]
struct HocrParagraph {
    id: String,
    title: String,
    lang: Option<String>,
    lines: Vec<HocrLine>,
}

#[derive(Debug, Clone, Serialize)]
struct HocrLine {
    id: String,
    title: String,
    words: Vec<HocrWord>,
}

#[derive(Debug, Clone, Serialize)]
struct HocrWord {
    id: String,
    title: String,
    text: String,
}

/// Running element counters, used to build unique IDs.
#[derive(Debug, Default)]
struct Counters {
    block: usize,
    par: usize,
    line: usize,
    word: usize,
}

impl HocrDocument {
    /// Convert an annotation for the image `page_id`, which was scanned at
    /// `dpi`.
    ///
    /// `image_size` is used for pages where Google didn't report a size, and
    /// for the empty page we emit when there are no pages at all.
    pub fn from_annotation(
        annotation: &Annotation,
        page_id: &str,
        dpi: ResolutionPair,
        image_size: Option<(u32, u32)>,
    ) -> Self {
        let mut pages = annotation
            .pages
            .iter()
            .enumerate()
            .map(|(idx, page)| convert_page(page, idx, page_id, dpi, image_size))
            .collect::<Vec<_>>();
        if pages.is_empty() {
            let bbox = image_size.map(|(w, h)| BBox::page(w, h)).unwrap_or(BBox::ZERO);
            pages.push(HocrPage {
                id: "page_1".to_owned(),
                title: page_title(page_id, bbox, 0, dpi),
                blocks: vec![],
            });
        }
        let lang = annotation
            .pages
            .first()
            .and_then(|page| primary_language(page.property.as_ref()));
        Self {
            title: page_id.to_owned(),
            system: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            lang,
            pages,
        }
    }

    /// Render as an XHTML string.
    pub fn render(&self) -> Result<String> {
        TEMPLATES
            .render("hocr", self)
            .context("failed to render hOCR")
    }

    /// How many words does this document contain?
    pub fn word_count(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|p| &p.blocks)
            .flat_map(|b| &b.paragraphs)
            .flat_map(|p| &p.lines)
            .map(|l| l.words.len())
            .sum()
    }
}

/// Build the `title` of an `ocr_page`.
fn page_title(page_id: &str, bbox: BBox, page_no: usize, dpi: ResolutionPair) -> String {
    format!(
        "image \"{}\"; {}; ppageno {}; scan_res {} {}",
        page_id,
        bbox,
        page_no,
        dpi.x().round(),
        dpi.y().round()
    )
}

/// The first language Google detected, if any.
fn primary_language(property: Option<&TextProperty>) -> Option<String> {
    property?
        .detected_languages
        .first()
        .map(|lang| lang.language_code.clone())
        .filter(|code| !code.is_empty())
}

/// Convert a confidence between 0 and 1 to the integer percentage used by
/// `x_wconf`.
fn wconf(confidence: f32) -> u32 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u32
}

fn convert_page(
    page: &TextPage,
    idx: usize,
    page_id: &str,
    dpi: ResolutionPair,
    image_size: Option<(u32, u32)>,
) -> HocrPage {
    let page_no = idx + 1;
    let mut counters = Counters::default();
    let blocks = page
        .blocks
        .iter()
        .filter_map(|block| convert_block(block, page_no, &mut counters))
        .collect::<Vec<_>>();

    let bbox = if page.width > 0 && page.height > 0 {
        BBox::page(page.width, page.height)
    } else if let Some((w, h)) = image_size {
        BBox::page(w, h)
    } else {
        BBox::ZERO
    };

    HocrPage {
        id: format!("page_{page_no}"),
        title: page_title(page_id, bbox, idx, dpi),
        blocks,
    }
}

/// Convert a block. Blocks without any words are dropped.
fn convert_block(
    block: &TextBlock,
    page_no: usize,
    counters: &mut Counters,
) -> Option<HocrBlock> {
    counters.block += 1;
    let id = format!("block_{}_{}", page_no, counters.block);
    let mut boxes = vec![];
    let paragraphs = block
        .paragraphs
        .iter()
        .filter_map(|par| convert_paragraph(par, page_no, counters, &mut boxes))
        .collect::<Vec<_>>();
    if paragraphs.is_empty() {
        return None;
    }
    let bbox = block
        .bounding_box
        .as_ref()
        .and_then(BBox::from_poly)
        .or_else(|| BBox::union_all(boxes))
        .unwrap_or(BBox::ZERO);
    Some(HocrBlock {
        id,
        title: bbox.to_string(),
        paragraphs,
    })
}

/// Convert a paragraph, splitting it into lines. Records the paragraph's
/// box in `boxes` for the enclosing block.
fn convert_paragraph(
    par: &Paragraph,
    page_no: usize,
    counters: &mut Counters,
    boxes: &mut Vec<BBox>,
) -> Option<HocrParagraph> {
    counters.par += 1;
    let id = format!("par_{}_{}", page_no, counters.par);

    let lines = split_lines(&par.words)
        .into_iter()
        .filter_map(|words| convert_line(&words, page_no, counters))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return None;
    }

    let bbox = par
        .bounding_box
        .as_ref()
        .and_then(BBox::from_poly)
        .or_else(|| BBox::union_all(lines.iter().filter_map(|l| l.bbox)))
        .unwrap_or(BBox::ZERO);
    boxes.push(bbox);
    Some(HocrParagraph {
        id,
        title: bbox.to_string(),
        lang: primary_language(par.property.as_ref()),
        lines: lines.into_iter().map(|l| l.line).collect(),
    })
}

/// Group words into lines, ending a line after any word followed by a
/// line-ending break.
fn split_lines(words: &[Word]) -> Vec<Vec<&Word>> {
    let mut lines = vec![];
    let mut current = vec![];
    for word in words {
        current.push(word);
        if word.trailing_break().is_some_and(|b| b.ends_line()) {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// A line, plus its box (if any of its words had one).
struct ConvertedLine {
    line: HocrLine,
    bbox: Option<BBox>,
}

fn convert_line(
    words: &[&Word],
    page_no: usize,
    counters: &mut Counters,
) -> Option<ConvertedLine> {
    counters.line += 1;
    let id = format!("line_{}_{}", page_no, counters.line);

    let mut boxes = vec![];
    let words = words
        .iter()
        .filter_map(|word| {
            let text = word.text();
            if text.trim().is_empty() {
                return None;
            }
            counters.word += 1;
            let bbox = word.bounding_box.as_ref().and_then(BBox::from_poly);
            boxes.extend(bbox);
            Some(HocrWord {
                id: format!("word_{}_{}", page_no, counters.word),
                title: format!(
                    "{}; x_wconf {}",
                    bbox.unwrap_or(BBox::ZERO),
                    wconf(word.confidence)
                ),
                text,
            })
        })
        .collect::<Vec<_>>();
    if words.is_empty() {
        return None;
    }

    let bbox = BBox::union_all(boxes);
    Some(ConvertedLine {
        line: HocrLine {
            id,
            title: format!("{}; baseline 0 0", bbox.unwrap_or(BBox::ZERO)),
            words,
        },
        bbox,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::vision::testing::hello_annotation;

    fn dpi() -> ResolutionPair {
        ResolutionPair::new(300.0, 200.0).unwrap()
    }

    /// A paragraph with two lines: "Hi there" and "R&D <x>".
    fn two_line_annotation() -> Annotation {
        let word = |text: &str, x: i32, y: i32, brk: &str| {
            json!({
                "boundingBox": { "vertices": [
                    { "x": x, "y": y }, { "x": x + 20, "y": y },
                    { "x": x + 20, "y": y + 10 }, { "x": x, "y": y + 10 }
                ]},
                "confidence": 0.5,
                "symbols": [{
                    "text": text,
                    "property": { "detectedBreak": { "type": brk } }
                }]
            })
        };
        serde_json::from_value(json!({
            "text": "Hi there\nR&D <x>\n",
            "pages": [{
                "width": 200,
                "height": 100,
                "property": { "detectedLanguages": [{ "languageCode": "en" }] },
                "blocks": [{
                    "paragraphs": [{
                        "property": { "detectedLanguages": [{ "languageCode": "en" }] },
                        "words": [
                            word("Hi", 10, 10, "SPACE"),
                            word("there", 40, 12, "EOL_SURE_SPACE"),
                            word("R&D", 10, 40, "SPACE"),
                            word("<x>", 40, 40, "LINE_BREAK"),
                        ]
                    }]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn bbox_from_poly_and_union() {
        let poly: BoundingPoly = serde_json::from_value(json!({
            "vertices": [{ "x": 5, "y": -3 }, { "x": 20 }, { "x": 12, "y": 30 }]
        }))
        .unwrap();
        let bbox = BBox::from_poly(&poly).unwrap();
        assert_eq!(bbox, BBox { x0: 5, y0: 0, x1: 20, y1: 30 });
        assert_eq!(bbox.to_string(), "bbox 5 0 20 30");
        assert_eq!(BBox::from_poly(&BoundingPoly::default()), None);

        let other = BBox { x0: 1, y0: 2, x1: 10, y1: 40 };
        assert_eq!(bbox.union(other), BBox { x0: 1, y0: 0, x1: 20, y1: 40 });
        assert_eq!(BBox::union_all(vec![]), None);
    }

    #[test]
    fn splits_lines_on_line_ending_breaks() {
        let annotation = two_line_annotation();
        let words = &annotation.pages[0].blocks[0].paragraphs[0].words;
        let lines = split_lines(words);
        let texts = lines
            .iter()
            .map(|l| l.iter().map(|w| w.text()).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(texts, [vec!["Hi", "there"], vec!["R&D", "<x>"]]);
    }

    #[test]
    fn renders_page_structure() {
        let doc = HocrDocument::from_annotation(&two_line_annotation(), "page-0001", dpi(), None);
        assert_eq!(doc.word_count(), 4);
        let hocr = doc.render().unwrap();

        assert!(hocr.contains(
            r#"title="image &quot;page-0001&quot;; bbox 0 0 200 100; ppageno 0; scan_res 300 200""#
        ));
        assert!(hocr.contains(r#"lang="en""#));
        assert!(hocr.contains(r#"<div class="ocr_carea" id="block_1_1" title="bbox 10 10 60 50">"#));
        assert!(hocr.contains(r#"<span class="ocr_line" id="line_1_1" title="bbox 10 10 60 22; baseline 0 0">"#));
        assert!(hocr.contains(
            r#"<span class="ocrx_word" id="word_1_2" title="bbox 40 12 60 22; x_wconf 50">there</span>"#
        ));
        assert_eq!(hocr.matches(r#"class="ocr_line""#).count(), 2);
        assert_eq!(hocr.matches(r#"class="ocrx_word""#).count(), 4);
    }

    #[test]
    fn escapes_text() {
        let doc = HocrDocument::from_annotation(&two_line_annotation(), "a<b>", dpi(), None);
        let hocr = doc.render().unwrap();
        assert!(hocr.contains(">R&amp;D</span>"));
        assert!(hocr.contains(">&lt;x&gt;</span>"));
        assert!(hocr.contains("<title>a&lt;b&gt;</title>"));
        assert!(!hocr.contains("<x>"));
    }

    #[test]
    fn annotation_without_pages_renders_an_empty_page() {
        let annotation = Annotation {
            pages: vec![],
            text: "transcript only \n".to_owned(),
        };
        let doc = HocrDocument::from_annotation(&annotation, "p", dpi(), Some((850, 1100)));
        assert_eq!(doc.word_count(), 0);
        let hocr = doc.render().unwrap();
        assert_eq!(hocr.matches(r#"class="ocr_page""#).count(), 1);
        assert!(hocr.contains("bbox 0 0 850 1100; ppageno 0"));
        assert!(!hocr.contains("ocr_carea\""));

        let doc = HocrDocument::from_annotation(&annotation, "p", dpi(), None);
        assert!(doc.render().unwrap().contains("bbox 0 0 0 0; ppageno 0"));
    }

    #[test]
    fn word_confidence_is_a_percentage() {
        let doc = HocrDocument::from_annotation(&hello_annotation(), "p", dpi(), None);
        let hocr = doc.render().unwrap();
        assert!(hocr.contains(r#"title="bbox 10 10 60 30; x_wconf 98">Hello</span>"#));
        assert_eq!(wconf(1.7), 100);
        assert_eq!(wconf(-0.2), 0);
    }

    #[test]
    fn rendering_is_deterministic() {
        let annotation = two_line_annotation();
        let first = HocrDocument::from_annotation(&annotation, "p", dpi(), None).render().unwrap();
        let second = HocrDocument::from_annotation(&annotation, "p", dpi(), None).render().unwrap();
        assert_eq!(first, second);
    }
}
