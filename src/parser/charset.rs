use dicom::encoding::text::{SpecificCharacterSet, TextCodec};

use super::ParseError;

/// Converter for charset-sensitive text, selected by Specific Character Set
#[derive(Clone, Debug)]
pub(crate) struct CharacterSet {
    codec: SpecificCharacterSet,
}

impl CharacterSet {
    /// The default repertoire (ISO-IR 6, 7-bit ASCII)
    pub(crate) fn ascii() -> Self {
        Self {
            codec: SpecificCharacterSet::default(),
        }
    }

    /// Selects a converter from a Specific Character Set value
    ///
    /// Multi-valued terms (code extensions) use the first non-empty term.
    /// An empty value selects the default repertoire.
    pub(crate) fn from_term(value: &str) -> Result<Self, ParseError> {
        let term = value
            .split('\\')
            .map(str::trim)
            .find(|term| !term.is_empty());

        let Some(term) = term else {
            return Ok(Self::ascii());
        };

        SpecificCharacterSet::from_code(term)
            .map(|codec| Self { codec })
            .ok_or_else(|| ParseError::UnsupportedCharacterSet(term.to_string()))
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<String, String> {
        self.codec.decode(bytes).map_err(|err| err.to_string())
    }
}
