//! The placeholder PDF for `text-only-pdf`.
//!
//! We can't build a real text-layer PDF without knowing the exact page
//! geometry the host pipeline will use, so `text-only-pdf` produces a blank
//! page and leaves the hOCR next to it.

use lopdf::{Dictionary, Document, Object, StringFormat, dictionary};

use crate::prelude::*;

/// US letter, in points.
const PAGE_SIZE: (i64, i64) = (612, 792);

/// Build a PDF 1.4 document with one blank page.
///
/// `title` and `producer` go into the document Info dictionary.
pub fn empty_pdf(title: &str, producer: &str) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.4");

    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(PAGE_SIZE.0),
            Object::Integer(PAGE_SIZE.1),
        ],
        "Resources" => Dictionary::new(),
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => text_string(title),
        "Producer" => text_string(producer),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).context("failed to serialize PDF")?;
    Ok(out)
}

/// Encode a PDF text string. ASCII stays a literal string. Anything else is
/// UTF-16BE with a byte order mark.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::string_literal(text)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}
