//! Recognition languages.
//!
//! The host pipeline speaks tesseract's language codes (`eng`, `chi_sim`,
//! `deu_frak`), joined with `+` in priority order. Google Cloud Vision wants
//! BCP-47 tags (`en`, `zh-Hans`, `de`) as "language hints". We translate
//! between the two at call time.

use std::{collections::HashMap, fmt, str::FromStr, sync::LazyLock};

use crate::prelude::*;

/// The language we use when nobody asks for anything else.
pub const BASE_LANGUAGE: &str = "eng";

/// Tesseract language codes and the Google Cloud Vision hints we send for
/// them. Historical and script variants map onto their modern language.
const TESSERACT_TO_BCP47: &[(&str, &str)] = &[
    ("afr", "af"),
    ("amh", "am"),
    ("ara", "ar"),
    ("asm", "as"),
    ("aze", "az"),
    ("aze_cyrl", "az-Cyrl"),
    ("bel", "be"),
    ("ben", "bn"),
    ("bod", "bo"),
    ("bos", "bs"),
    ("bre", "br"),
    ("bul", "bg"),
    ("cat", "ca"),
    ("ceb", "ceb"),
    ("ces", "cs"),
    ("chi_sim", "zh-Hans"),
    ("chi_tra", "zh-Hant"),
    ("chr", "chr"),
    ("cos", "co"),
    ("cym", "cy"),
    ("dan", "da"),
    ("dan_frak", "da"),
    ("deu", "de"),
    ("deu_frak", "de"),
    ("deu_latf", "de"),
    ("dzo", "dz"),
    ("ell", "el"),
    ("eng", "en"),
    ("enm", "en"),
    ("epo", "eo"),
    ("est", "et"),
    ("eus", "eu"),
    ("fao", "fo"),
    ("fas", "fa"),
    ("fil", "fil"),
    ("fin", "fi"),
    ("fra", "fr"),
    ("frk", "de"),
    ("frm", "fr"),
    ("fry", "fy"),
    ("gla", "gd"),
    ("gle", "ga"),
    ("glg", "gl"),
    ("grc", "el"),
    ("guj", "gu"),
    ("hat", "ht"),
    ("heb", "he"),
    ("hin", "hi"),
    ("hrv", "hr"),
    ("hun", "hu"),
    ("hye", "hy"),
    ("iku", "iu"),
    ("ind", "id"),
    ("isl", "is"),
    ("ita", "it"),
    ("ita_old", "it"),
    ("jav", "jv"),
    ("jpn", "ja"),
    ("kan", "kn"),
    ("kat", "ka"),
    ("kat_old", "ka"),
    ("kaz", "kk"),
    ("khm", "km"),
    ("kir", "ky"),
    ("kmr", "ku"),
    ("kor", "ko"),
    ("kor_vert", "ko"),
    ("kur", "ku"),
    ("lao", "lo"),
    ("lat", "la"),
    ("lav", "lv"),
    ("lit", "lt"),
    ("ltz", "lb"),
    ("mal", "ml"),
    ("mar", "mr"),
    ("mkd", "mk"),
    ("mlt", "mt"),
    ("mon", "mn"),
    ("mri", "mi"),
    ("msa", "ms"),
    ("mya", "my"),
    ("nep", "ne"),
    ("nld", "nl"),
    ("nor", "no"),
    ("oci", "oc"),
    ("ori", "or"),
    ("pan", "pa"),
    ("pol", "pl"),
    ("por", "pt"),
    ("pus", "ps"),
    ("que", "qu"),
    ("ron", "ro"),
    ("rus", "ru"),
    ("san", "sa"),
    ("sin", "si"),
    ("slk", "sk"),
    ("slk_frak", "sk"),
    ("slv", "sl"),
    ("snd", "sd"),
    ("spa", "es"),
    ("spa_old", "es"),
    ("sqi", "sq"),
    ("srp", "sr-Cyrl"),
    ("srp_latn", "sr-Latn"),
    ("sun", "su"),
    ("swa", "sw"),
    ("swe", "sv"),
    ("syr", "syr"),
    ("tam", "ta"),
    ("tat", "tt"),
    ("tel", "te"),
    ("tgk", "tg"),
    ("tgl", "tl"),
    ("tha", "th"),
    ("tir", "ti"),
    ("ton", "to"),
    ("tur", "tr"),
    ("uig", "ug"),
    ("ukr", "uk"),
    ("urd", "ur"),
    ("uzb", "uz"),
    ("uzb_cyrl", "uz-Cyrl"),
    ("vie", "vi"),
    ("yid", "yi"),
    ("yor", "yo"),
];

/// Lookup table built from [`TESSERACT_TO_BCP47`].
static LANGUAGE_HINTS: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| TESSERACT_TO_BCP47.iter().copied().collect());

/// Look up the Google Cloud Vision hint for a single tesseract code.
pub fn bcp47_for(code: &str) -> Option<&'static str> {
    LANGUAGE_HINTS.get(code).copied()
}

/// An ordered, non-empty list of tesseract language codes. Earlier codes have
/// higher priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    codes: Vec<String>,
}

impl LanguageSpec {
    /// The codes, in priority order.
    pub fn codes(&self) -> &[String] {
        &self.codes
    }
}

impl Default for LanguageSpec {
    fn default() -> Self {
        Self {
            codes: vec![BASE_LANGUAGE.to_owned()],
        }
    }
}

impl FromStr for LanguageSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let codes = s
            .split('+')
            .map(|code| {
                let code = code.trim();
                if code.is_empty() {
                    Err(anyhow!("empty language code in {:?}", s))
                } else {
                    Ok(code.to_owned())
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { codes })
    }
}

impl fmt::Display for LanguageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.codes.join("+"))
    }
}

/// Language hints ready to send to Google Cloud Vision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageHints {
    /// One hint per input code, in the same order.
    pub hints: Vec<String>,

    /// Input codes we had no mapping for, and passed through unchanged.
    pub unmapped: Vec<String>,
}

/// Translate tesseract codes to Google Cloud Vision hints.
///
/// Codes we don't know are passed through as-is, because Google accepts many
/// short codes directly. We never drop or reorder anything.
pub fn map_language_hints(languages: &LanguageSpec) -> LanguageHints {
    let mut hints = Vec::with_capacity(languages.codes.len());
    let mut unmapped = vec![];
    for code in &languages.codes {
        match bcp47_for(code) {
            Some(tag) => hints.push(tag.to_owned()),
            None => {
                hints.push(code.clone());
                unmapped.push(code.clone());
            }
        }
    }
    if !unmapped.is_empty() {
        warn!(
            ?unmapped,
            "Language codes have no Google Cloud Vision mapping, using original codes as hints"
        );
    }
    debug!(%languages, ?hints, "Mapped tesseract languages to language hints");
    LanguageHints { hints, unmapped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plus_joined_codes_in_order() {
        let spec = "deu+eng+chi_sim".parse::<LanguageSpec>().unwrap();
        assert_eq!(spec.codes(), ["deu", "eng", "chi_sim"]);
        assert_eq!(spec.to_string(), "deu+eng+chi_sim");
    }

    #[test]
    fn empty_string_means_base_language() {
        let spec = "".parse::<LanguageSpec>().unwrap();
        assert_eq!(spec, LanguageSpec::default());
        assert_eq!(spec.codes(), [BASE_LANGUAGE]);
    }

    #[test]
    fn rejects_empty_codes() {
        assert!("eng++fra".parse::<LanguageSpec>().is_err());
        assert!("eng+".parse::<LanguageSpec>().is_err());
    }

    #[test]
    fn maps_known_codes() {
        let cases = [
            ("eng", "en"),
            ("chi_sim", "zh-Hans"),
            ("chi_tra", "zh-Hant"),
            ("srp", "sr-Cyrl"),
            ("srp_latn", "sr-Latn"),
            ("deu_frak", "de"),
            ("frk", "de"),
            ("grc", "el"),
        ];
        for (code, tag) in cases {
            let spec = code.parse::<LanguageSpec>().unwrap();
            let mapped = map_language_hints(&spec);
            assert_eq!(mapped.hints, [tag], "mapping {code}");
            assert!(mapped.unmapped.is_empty());
        }
    }

    #[test]
    fn passes_through_unmapped_codes_without_reordering() {
        let spec = "fra+xyz+eng+eng+osd".parse::<LanguageSpec>().unwrap();
        let mapped = map_language_hints(&spec);
        assert_eq!(mapped.hints, ["fr", "xyz", "en", "en", "osd"]);
        assert_eq!(mapped.unmapped, ["xyz", "osd"]);
    }

    #[test]
    fn table_has_no_duplicate_keys() {
        assert_eq!(LANGUAGE_HINTS.len(), TESSERACT_TO_BCP47.len());
    }
}
