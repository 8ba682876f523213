//! Value representation dispatch
//!
//! Every VR maps onto one [`VrKind`], and each kind has exactly one decode
//! rule. Tags whose VR depends on Pixel Representation (the dictionary's
//! `xs` entries) first come out as [`VrResolution::Deferred`] and are
//! resolved against that sibling before decoding.

use dicom::core::dictionary::{DataDictionary, VirtualVr};
use dicom::core::{Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;

use super::ParseError;
use super::charset::CharacterSet;
use crate::enums::ByteOrder;
use crate::tag_set::ParamValue;

const MULTI_VALUE_SEPARATOR: char = '\\';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NumericType {
    F32,
    F64,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
}

impl NumericType {
    fn width(self) -> usize {
        match self {
            NumericType::U16 | NumericType::I16 => 2,
            NumericType::F32 | NumericType::U32 | NumericType::I32 => 4,
            NumericType::F64 | NumericType::U64 | NumericType::I64 => 8,
        }
    }

    fn read(self, chunk: &[u8], order: ByteOrder) -> f64 {
        macro_rules! read {
            ($ty:ty, $n:literal) => {{
                let mut bytes = [0u8; $n];
                bytes.copy_from_slice(chunk);
                match order {
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(bytes),
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(bytes),
                }
            }};
        }
        match self {
            NumericType::F32 => f64::from(read!(f32, 4)),
            NumericType::F64 => read!(f64, 8),
            NumericType::U16 => f64::from(read!(u16, 2)),
            NumericType::I16 => f64::from(read!(i16, 2)),
            NumericType::U32 => f64::from(read!(u32, 4)),
            NumericType::I32 => f64::from(read!(i32, 4)),
            NumericType::U64 => read!(u64, 8) as f64,
            NumericType::I64 => read!(i64, 8) as f64,
        }
    }
}

/// How the value of a VR is decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VrKind {
    AttributeTag,
    Numeric(NumericType),
    DecimalString,
    IntegerString,
    /// Default repertoire text (codes, UIDs, dates, ages)
    Text,
    /// Text subject to Specific Character Set
    CharsetText,
    PersonName,
    /// Opaque binary data, left undecoded
    Bulk,
    Sequence,
}

/// The lookup table from VR to decode rule
pub(crate) fn kind_of(vr: VR) -> VrKind {
    match vr {
        VR::AT => VrKind::AttributeTag,
        VR::FL => VrKind::Numeric(NumericType::F32),
        VR::FD => VrKind::Numeric(NumericType::F64),
        VR::US => VrKind::Numeric(NumericType::U16),
        VR::SS => VrKind::Numeric(NumericType::I16),
        VR::UL => VrKind::Numeric(NumericType::U32),
        VR::SL => VrKind::Numeric(NumericType::I32),
        VR::UV => VrKind::Numeric(NumericType::U64),
        VR::SV => VrKind::Numeric(NumericType::I64),
        VR::DS => VrKind::DecimalString,
        VR::IS => VrKind::IntegerString,
        VR::AE | VR::AS | VR::CS | VR::DA | VR::DT | VR::TM | VR::UI | VR::UR => VrKind::Text,
        VR::LO | VR::LT | VR::SH | VR::ST | VR::UC | VR::UT => VrKind::CharsetText,
        VR::PN => VrKind::PersonName,
        VR::SQ => VrKind::Sequence,
        _ => VrKind::Bulk,
    }
}

/// The VR of an element, possibly still waiting on a sibling element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VrResolution {
    Concrete(VR),
    /// Candidates indexed by Pixel Representation (0 unsigned, 1 signed)
    Deferred(&'static [VR]),
}

const PIXEL_REPRESENTATION_DEPENDENT: &[VR] = &[VR::US, VR::SS];

impl VrResolution {
    /// Determines the VR from the encoded one, falling back to the dictionary
    /// for implicit VR data and for values stored as UN
    pub(crate) fn for_element(tag: Tag, encoded: Option<VR>) -> Self {
        match encoded {
            Some(vr) if vr != VR::UN => VrResolution::Concrete(vr),
            _ => match StandardDataDictionary.by_tag(tag).map(|entry| entry.vr) {
                Some(VirtualVr::Exact(vr)) => VrResolution::Concrete(vr),
                Some(VirtualVr::Xs) => VrResolution::Deferred(PIXEL_REPRESENTATION_DEPENDENT),
                _ => VrResolution::Concrete(VR::UN),
            },
        }
    }

    pub(crate) fn resolve(
        self,
        tag: Tag,
        pixel_representation: Option<u16>,
    ) -> Result<VR, ParseError> {
        match self {
            VrResolution::Concrete(vr) => Ok(vr),
            VrResolution::Deferred(candidates) => pixel_representation
                .and_then(|index| candidates.get(usize::from(index)).copied())
                .ok_or_else(|| ParseError::MalformedValue {
                    tag,
                    reason: format!(
                        "VR depends on Pixel Representation, which is {}",
                        pixel_representation
                            .map(|value| format!("the unexpected value {value}"))
                            .unwrap_or_else(|| "absent".to_string())
                    ),
                }),
        }
    }
}

fn trim_padding(text: &str) -> &str {
    text.trim_matches(|c: char| c == ' ' || c == '\0')
}

fn malformed(tag: Tag, reason: impl Into<String>) -> ParseError {
    ParseError::MalformedValue {
        tag,
        reason: reason.into(),
    }
}

/// Decodes a raw value according to its resolved VR
///
/// Returns `Ok(None)` for empty values and for bulk and sequence data.
pub(crate) fn decode(
    tag: Tag,
    vr: VR,
    raw: &[u8],
    order: ByteOrder,
    charset: &CharacterSet,
) -> Result<Option<ParamValue>, ParseError> {
    if raw.is_empty() {
        return Ok(None);
    }
    match kind_of(vr) {
        VrKind::AttributeTag => decode_attribute_tags(tag, raw, order).map(Some),
        VrKind::Numeric(numeric) => decode_numeric(tag, numeric, raw, order).map(Some),
        VrKind::DecimalString => decode_number_text(tag, raw, |s| s.parse::<f64>().ok()),
        VrKind::IntegerString => {
            decode_number_text(tag, raw, |s| s.parse::<i64>().ok().map(|n| n as f64))
        }
        VrKind::Text => Ok(non_empty(String::from_utf8_lossy(raw).as_ref())),
        VrKind::CharsetText => {
            let text = charset.decode(raw).map_err(|reason| malformed(tag, reason))?;
            Ok(non_empty(&text))
        }
        VrKind::PersonName => {
            let text = charset.decode(raw).map_err(|reason| malformed(tag, reason))?;
            Ok(non_empty(&format_person_name(&text)))
        }
        VrKind::Bulk | VrKind::Sequence => Ok(None),
    }
}

fn non_empty(text: &str) -> Option<ParamValue> {
    let text = trim_padding(text);
    (!text.is_empty()).then(|| ParamValue::Text(text.to_string()))
}

fn decode_attribute_tags(tag: Tag, raw: &[u8], order: ByteOrder) -> Result<ParamValue, ParseError> {
    if raw.len() % 4 != 0 {
        return Err(malformed(tag, format!("AT value of {} bytes", raw.len())));
    }
    let rendered: Vec<String> = raw
        .chunks_exact(4)
        .map(|chunk| {
            let group = NumericType::U16.read(&chunk[0..2], order) as u16;
            let element = NumericType::U16.read(&chunk[2..4], order) as u16;
            format!("{group:04X}{element:04X}")
        })
        .collect();
    Ok(ParamValue::Text(rendered.join("\\")))
}

fn decode_numeric(
    tag: Tag,
    numeric: NumericType,
    raw: &[u8],
    order: ByteOrder,
) -> Result<ParamValue, ParseError> {
    let width = numeric.width();
    if raw.len() % width != 0 {
        return Err(malformed(
            tag,
            format!("{} bytes is not a multiple of {width}", raw.len()),
        ));
    }
    Ok(ParamValue::Numbers(
        raw.chunks_exact(width)
            .map(|chunk| numeric.read(chunk, order))
            .collect(),
    ))
}

fn decode_number_text(
    tag: Tag,
    raw: &[u8],
    parse: impl Fn(&str) -> Option<f64>,
) -> Result<Option<ParamValue>, ParseError> {
    let text = String::from_utf8_lossy(raw);
    let text = trim_padding(&text);
    if text.is_empty() {
        return Ok(None);
    }
    let values = text
        .split(MULTI_VALUE_SEPARATOR)
        .map(|part| {
            let part = part.trim();
            parse(part).ok_or_else(|| malformed(tag, format!("{part:?} is not a number")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(match values.as_slice() {
        [single] => ParamValue::Number(*single),
        _ => ParamValue::Numbers(values),
    }))
}

/// Renders the alphabetic group of a person name, components separated by spaces
pub(crate) fn format_person_name(raw: &str) -> String {
    let group = raw
        .split('=')
        .map(trim_padding)
        .find(|group| !group.is_empty())
        .unwrap_or_default();
    group
        .split('^')
        .map(str::trim)
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
