//! Structured view of the header of a single DICOM instance

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Keyword under which the patient position vector is kept in [`Parameters`]
pub const IMAGE_POSITION_PATIENT: &str = "ImagePositionPatient";
pub const TRANSFER_SYNTAX_UID: &str = "TransferSyntaxUID";

/// Decoded value of a single element
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Numbers(Vec<f64>),
    Text(String),
}

impl ParamValue {
    /// First numeric value, if the element is numeric
    pub fn as_f64(&self) -> Option<f64> {
        self.as_numbers().and_then(|values| values.first().copied())
    }

    pub fn as_numbers(&self) -> Option<&[f64]> {
        match self {
            ParamValue::Number(value) => Some(std::slice::from_ref(value)),
            ParamValue::Numbers(values) => Some(values),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Additional elements keyed by their dictionary keyword
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, value: ParamValue) {
        self.0.insert(name, value);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Whole years, from Patient's Age or derived from the birth date
    pub age: Option<u32>,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
    /// Metres
    pub size: Option<f64>,
    /// Kilograms
    pub weight: Option<f64>,
}

/// Tags extracted from one instance
///
/// Only the series and study UIDs are guaranteed. Every other field is
/// filled on a best-effort basis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DicomTagSet {
    pub series_uid: String,
    pub study_uid: String,
    pub sop_instance_uid: Option<String>,
    /// Columns
    pub width: Option<u32>,
    /// Rows
    pub height: Option<u32>,
    pub instance_number: Option<u32>,
    pub series_date: Option<DateTime<Utc>>,
    pub study_date: Option<DateTime<Utc>>,
    pub modality: Option<String>,
    pub series_description: Option<String>,
    pub body_part: Option<String>,
    pub station_name: Option<String>,
    pub model_name: Option<String>,
    pub manufacturer: Option<String>,
    pub patient: PatientInfo,
    pub parameters: Parameters,
}

impl DicomTagSet {
    /// Spatial z coordinate of the first voxel, from Image Position (Patient)
    pub fn z_position(&self) -> Option<f64> {
        self.parameters
            .get(IMAGE_POSITION_PATIENT)?
            .as_numbers()?
            .get(2)
            .copied()
    }

    pub fn transfer_syntax(&self) -> Option<&str> {
        self.parameters.get(TRANSFER_SYNTAX_UID)?.as_text()
    }
}
