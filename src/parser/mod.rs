//! Decoding of raw DICOM instances into a [`DicomTagSet`]
//!
//! Only the header region is decoded. The file meta group is read with
//! dicom-rs; the dataset is walked up to Pixel Data, borrowing element values
//! straight out of the input buffer so that VRs which depend on Pixel
//! Representation can be resolved after the walk. Beyond the series and
//! study UIDs every field is best-effort, so a malformed optional value is
//! logged and dropped rather than failing the whole parse.

mod charset;
mod datetime;
mod reader;
mod vr;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use dicom::core::dictionary::DataDictionary;
use dicom::core::Tag;
use dicom::object::meta::FileMetaTable;
use dicom_dictionary_std::{StandardDataDictionary, tags};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::enums::TransferSyntax;
use crate::tag_set::{DicomTagSet, ParamValue, Parameters, PatientInfo, TRANSFER_SYNTAX_UID};

use charset::CharacterSet;
use reader::{DatasetReader, RawElement};
use vr::VrResolution;

const PREAMBLE_LENGTH: usize = 128;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Missing required element {0}")]
    MissingRequiredElement(&'static str),

    #[error("Unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("Unsupported character set {0}")]
    UnsupportedCharacterSet(String),

    #[error("Malformed value in element {tag}: {reason}")]
    MalformedValue { tag: Tag, reason: String },
}

/// Caller-supplied defaults for values the instance may not carry
#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    /// Applied when Timezone Offset From UTC is absent
    pub default_timezone_offset_minutes: i32,
    /// Specific Character Set assumed when the instance names none.
    /// `None` means the default 7-bit repertoire.
    pub default_character_set: Option<String>,
    /// Date against which ages are computed from a birth date. Today if unset.
    pub reference_date: Option<NaiveDate>,
}

/// Parses an instance with default options
pub fn parse(bytes: &[u8]) -> Result<DicomTagSet, ParseError> {
    parse_with(bytes, &ParseOptions::default())
}

/// Parses unrelated instances in parallel
pub fn parse_all<B>(buffers: &[B], options: &ParseOptions) -> Vec<Result<DicomTagSet, ParseError>>
where
    B: AsRef<[u8]> + Sync,
{
    buffers
        .par_iter()
        .map(|buffer| parse_with(buffer.as_ref(), options))
        .collect()
}

/// Parses an instance
///
/// # Errors
///
/// - `MalformedHeader` if the preamble, the file meta group or the
///   element structure cannot be read
/// - `UnsupportedTransferSyntax` for deflated or unknown encodings
/// - `UnsupportedCharacterSet` if the named character set has no converter
/// - `MissingRequiredElement` if the series or study UID is absent
pub fn parse_with(bytes: &[u8], options: &ParseOptions) -> Result<DicomTagSet, ParseError> {
    let (meta, dataset_start) = read_file_meta(bytes)?;
    let uid = trim_uid(&meta.transfer_syntax).to_string();
    if uid.is_empty() {
        return Err(ParseError::MalformedHeader(
            "file meta group lacks a transfer syntax".to_string(),
        ));
    }
    let syntax = TransferSyntax::from_uid(&uid)
        .ok_or_else(|| ParseError::UnsupportedTransferSyntax(uid.clone()))?;

    let mut reader = DatasetReader::new(
        bytes,
        dataset_start,
        syntax.byte_order(),
        syntax.is_explicit_vr(),
    );
    let mut elements = BTreeMap::new();
    while let Some(element) = reader.next_element()? {
        elements.insert(element.tag, element);
    }
    debug!(
        transfer_syntax = %uid,
        elements = elements.len(),
        header_bytes = reader.position(),
        "decoded dataset header"
    );

    let dataset = Dataset::new(elements, &meta, options)?;
    dataset.into_tag_set()
}

/// Reads the preamble and the file meta group; returns the group and the dataset offset
fn read_file_meta(bytes: &[u8]) -> Result<(FileMetaTable, usize), ParseError> {
    let mut rest = bytes.get(PREAMBLE_LENGTH..).ok_or_else(|| {
        ParseError::MalformedHeader("shorter than the 128-byte preamble".to_string())
    })?;
    let meta = FileMetaTable::from_reader(&mut rest)
        .map_err(|err| ParseError::MalformedHeader(format!("invalid file meta group: {err}")))?;
    Ok((meta, bytes.len() - rest.len()))
}

fn trim_uid(uid: &str) -> &str {
    uid.trim_matches(|c: char| c == ' ' || c == '\0')
}

/// Undecoded elements plus the context needed to decode them
struct Dataset<'a, 'o> {
    elements: BTreeMap<Tag, RawElement<'a>>,
    meta: &'o FileMetaTable,
    charset: CharacterSet,
    pixel_representation: Option<u16>,
    options: &'o ParseOptions,
}

impl<'a, 'o> Dataset<'a, 'o> {
    fn new(
        elements: BTreeMap<Tag, RawElement<'a>>,
        meta: &'o FileMetaTable,
        options: &'o ParseOptions,
    ) -> Result<Self, ParseError> {
        let term = match elements.get(&tags::SPECIFIC_CHARACTER_SET) {
            Some(element) => String::from_utf8_lossy(element.value).into_owned(),
            None => options.default_character_set.clone().unwrap_or_default(),
        };

        let mut dataset = Self {
            elements,
            meta,
            charset: CharacterSet::from_term(&term)?,
            pixel_representation: None,
            options,
        };
        // must be known before any US/SS ambiguous element is decoded
        dataset.pixel_representation = dataset
            .number(tags::PIXEL_REPRESENTATION)
            .and_then(|value| u16::try_from(value as i64).ok());
        Ok(dataset)
    }

    /// Resolves the VR of an element and decodes it
    fn value(&self, tag: Tag) -> Result<Option<ParamValue>, ParseError> {
        let Some(element) = self.elements.get(&tag) else {
            return Ok(None);
        };
        let vr = VrResolution::for_element(tag, element.vr)
            .resolve(tag, self.pixel_representation)?;
        vr::decode(tag, vr, element.value, element.order, &self.charset)
    }

    /// Best-effort variant of [`Dataset::value`]: malformed values are logged and dropped
    fn lenient(&self, tag: Tag) -> Option<ParamValue> {
        match self.value(tag) {
            Ok(value) => value,
            Err(err) => {
                warn!(%tag, error = %err, "ignoring malformed element");
                None
            }
        }
    }

    fn text(&self, tag: Tag) -> Option<String> {
        match self.lenient(tag)? {
            ParamValue::Text(text) => Some(text),
            ParamValue::Number(value) => Some(value.to_string()),
            ParamValue::Numbers(_) => None,
        }
    }

    fn number(&self, tag: Tag) -> Option<f64> {
        self.lenient(tag)?.as_f64()
    }

    fn count(&self, tag: Tag) -> Option<u32> {
        let value = self.number(tag)?;
        if value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
            warn!(%tag, value, "ignoring out-of-range count");
            return None;
        }
        Some(value as u32)
    }

    fn date(&self, tag: Tag) -> Option<NaiveDate> {
        let text = self.text(tag)?;
        datetime::parse_date(&text)
            .map_err(|reason| warn!(%tag, %reason, "ignoring malformed date"))
            .ok()
    }

    fn timezone_offset_minutes(&self) -> i32 {
        let Some(text) = self.text(tags::TIMEZONE_OFFSET_FROM_UTC) else {
            return self.options.default_timezone_offset_minutes;
        };
        datetime::parse_offset_minutes(&text).unwrap_or_else(|reason| {
            warn!(%reason, "ignoring malformed timezone offset");
            self.options.default_timezone_offset_minutes
        })
    }

    /// Combines a date element and an optional time element into an instant
    fn instant(&self, date_tag: Tag, time_tag: Tag) -> Option<DateTime<Utc>> {
        let date = self.date(date_tag)?;
        let time = self.text(time_tag).and_then(|text| {
            datetime::parse_time(&text)
                .map_err(|reason| warn!(tag = %time_tag, %reason, "ignoring malformed time"))
                .ok()
        });
        datetime::to_instant(date, time, self.timezone_offset_minutes())
            .map_err(|reason| warn!(tag = %date_tag, %reason, "cannot build instant"))
            .ok()
    }

    fn required_text(&self, tag: Tag, name: &'static str) -> Result<String, ParseError> {
        self.text(tag).ok_or(ParseError::MissingRequiredElement(name))
    }

    fn patient(&self, birth_date: Option<NaiveDate>) -> PatientInfo {
        let explicit_age = self.text(tags::PATIENT_AGE).and_then(|text| {
            datetime::parse_age(&text)
                .map_err(|reason| warn!(%reason, "ignoring malformed patient age"))
                .ok()
        });
        let age = explicit_age.or_else(|| {
            let reference = self
                .options
                .reference_date
                .unwrap_or_else(|| Utc::now().date_naive());
            birth_date.map(|birth| datetime::age_between(birth, reference))
        });

        PatientInfo {
            id: self.text(tags::PATIENT_ID),
            name: self.text(tags::PATIENT_NAME),
            age,
            birth_date,
            sex: self.text(tags::PATIENT_SEX),
            size: self.number(tags::PATIENT_SIZE),
            weight: self.number(tags::PATIENT_WEIGHT),
        }
    }

    /// Every public, decodable element keyed by its dictionary keyword
    fn parameters(&self) -> Parameters {
        let mut parameters = Parameters::default();
        let meta = [
            (TRANSFER_SYNTAX_UID, &self.meta.transfer_syntax),
            ("MediaStorageSOPClassUID", &self.meta.media_storage_sop_class_uid),
            ("MediaStorageSOPInstanceUID", &self.meta.media_storage_sop_instance_uid),
            ("ImplementationClassUID", &self.meta.implementation_class_uid),
        ];
        for (name, uid) in meta {
            let uid = trim_uid(uid);
            if !uid.is_empty() {
                parameters.insert(name.to_string(), ParamValue::Text(uid.to_string()));
            }
        }
        for &tag in self.elements.keys() {
            // private groups and group lengths
            if tag.group() % 2 == 1 || tag.element() == 0x0000 {
                continue;
            }
            let Some(value) = self.lenient(tag) else {
                continue;
            };
            let name = StandardDataDictionary
                .by_tag(tag)
                .map(|entry| entry.alias.to_string())
                .unwrap_or_else(|| format!("{:04X}{:04X}", tag.group(), tag.element()));
            parameters.insert(name, value);
        }
        parameters
    }

    fn into_tag_set(self) -> Result<DicomTagSet, ParseError> {
        let series_uid = self.required_text(tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
        let study_uid = self.required_text(tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
        let birth_date = self.date(tags::PATIENT_BIRTH_DATE);

        Ok(DicomTagSet {
            series_uid,
            study_uid,
            sop_instance_uid: self.text(tags::SOP_INSTANCE_UID),
            width: self.count(tags::COLUMNS),
            height: self.count(tags::ROWS),
            instance_number: self.count(tags::INSTANCE_NUMBER).filter(|&number| number > 0),
            series_date: self.instant(tags::SERIES_DATE, tags::SERIES_TIME),
            study_date: self.instant(tags::STUDY_DATE, tags::STUDY_TIME),
            modality: self.text(tags::MODALITY),
            series_description: self.text(tags::SERIES_DESCRIPTION),
            body_part: self.text(tags::BODY_PART_EXAMINED),
            station_name: self.text(tags::STATION_NAME),
            model_name: self.text(tags::MANUFACTURER_MODEL_NAME),
            manufacturer: self.text(tags::MANUFACTURER),
            patient: self.patient(birth_date),
            parameters: self.parameters(),
        })
    }
}
