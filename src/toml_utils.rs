//! Helper functions for [`toml_span`].

use std::borrow::Cow;

use toml_span::{DeserError, value::ValueInner};

/// Deserialize a TOML string into a value of the specified type.
pub fn from_toml_str<'de, T>(toml_str: &'de str) -> Result<T, DeserError>
where
    T: toml_span::Deserialize<'de>,
{
    let mut value = toml_span::de::parse(toml_str)?;
    T::deserialize(&mut value)
}

/// Format every error in a [`DeserError`] with its line number in `source`.
pub fn describe_deser_error(source: &str, err: &DeserError) -> String {
    err.errors
        .iter()
        .map(|e| {
            let start = e.span.start.min(source.len());
            let line = source.as_bytes()[..start]
                .iter()
                .filter(|&&b| b == b'\n')
                .count()
                + 1;
            format!("line {line}: {e}")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Create a custom [`DeserError`] with a span.
pub fn custom_deser_error(
    span: toml_span::Span,
    msg: impl Into<Cow<'static, str>>,
) -> DeserError {
    let err_kind = toml_span::ErrorKind::Custom(msg.into());
    let err = toml_span::Error::from((err_kind, span));
    DeserError::from(err)
}

/// A number that may be written as either a TOML integer or a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Number(pub f64);

impl<'de> toml_span::Deserialize<'de> for Number {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        match value.take() {
            ValueInner::Integer(i) => Ok(Number(i as f64)),
            ValueInner::Float(f) => Ok(Number(f)),
            _ => Err(custom_deser_error(value.span, "expected a number")),
        }
    }
}
