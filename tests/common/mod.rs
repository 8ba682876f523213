//! Synthetic DICOM instances for integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;

use dicom::core::Tag;
use dicom_dictionary_std::tags;

pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";
pub const JPEG_LOSSLESS: &str = "1.2.840.10008.1.2.4.70";
pub const JPIP_REFERENCED_DEFLATE: &str = "1.2.840.10008.1.2.4.95";
pub const ENCAPSULATED_UNCOMPRESSED: &str = "1.2.840.10008.1.2.1.98";

pub const STUDY_UID: &str = "1.2.826.0.1.3680043.2.1125.1";
pub const SERIES_UID: &str = "1.2.826.0.1.3680043.2.1125.1.2";
const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const IMPLEMENTATION_CLASS_UID: &str = "1.2.826.0.1.3680043.2.1125.99";

fn has_long_length(vr: &[u8; 2]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR"
            | b"UT" | b"UV"
    )
}

fn padding(vr: &[u8; 2]) -> u8 {
    match vr {
        b"UI" | b"OB" | b"UN" => 0,
        _ => b' ',
    }
}

/// Builds a Part 10 file element by element
///
/// Elements are emitted in tag order whatever order they were added in.
#[derive(Clone)]
pub struct DicomWriter {
    transfer_syntax: String,
    big_endian: bool,
    explicit_vr: bool,
    elements: BTreeMap<(u16, u16), Vec<u8>>,
}

impl DicomWriter {
    pub fn new(transfer_syntax: &str) -> Self {
        Self {
            transfer_syntax: transfer_syntax.to_string(),
            big_endian: transfer_syntax == EXPLICIT_VR_BE,
            explicit_vr: transfer_syntax != IMPLICIT_VR_LE,
            elements: BTreeMap::new(),
        }
    }

    fn u16_bytes(&self, value: u16) -> [u8; 2] {
        if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        }
    }

    fn u32_bytes(&self, value: u32) -> [u8; 4] {
        if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        }
    }

    fn header(&self, tag: Tag, vr: &[u8; 2], length: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.u16_bytes(tag.0));
        out.extend_from_slice(&self.u16_bytes(tag.1));
        if self.explicit_vr {
            out.extend_from_slice(vr);
            if has_long_length(vr) {
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&self.u32_bytes(length));
            } else {
                out.extend_from_slice(&self.u16_bytes(length as u16));
            }
        } else {
            out.extend_from_slice(&self.u32_bytes(length));
        }
        out
    }

    /// Adds an element with an already encoded value, padded to even length
    pub fn raw(mut self, tag: Tag, vr: &[u8; 2], value: &[u8]) -> Self {
        let mut value = value.to_vec();
        if value.len() % 2 == 1 {
            value.push(padding(vr));
        }
        let mut encoded = self.header(tag, vr, value.len() as u32);
        encoded.extend_from_slice(&value);
        self.elements.insert((tag.0, tag.1), encoded);
        self
    }

    pub fn str(self, tag: Tag, vr: &[u8; 2], text: &str) -> Self {
        self.raw(tag, vr, text.as_bytes())
    }

    pub fn u16(self, tag: Tag, value: u16) -> Self {
        let bytes = self.u16_bytes(value);
        self.raw(tag, b"US", &bytes)
    }

    /// Adds a sequence of undefined length holding one item of undefined length
    pub fn sequence(mut self, tag: Tag, item: DicomWriter) -> Self {
        let mut encoded = self.header(tag, b"SQ", u32::MAX);
        // items and delimiters never carry a VR
        encoded.extend_from_slice(&self.u16_bytes(0xFFFE));
        encoded.extend_from_slice(&self.u16_bytes(0xE000));
        encoded.extend_from_slice(&self.u32_bytes(u32::MAX));
        for value in item.elements.values() {
            encoded.extend_from_slice(value);
        }
        encoded.extend_from_slice(&self.u16_bytes(0xFFFE));
        encoded.extend_from_slice(&self.u16_bytes(0xE00D));
        encoded.extend_from_slice(&self.u32_bytes(0));
        encoded.extend_from_slice(&self.u16_bytes(0xFFFE));
        encoded.extend_from_slice(&self.u16_bytes(0xE0DD));
        encoded.extend_from_slice(&self.u32_bytes(0));
        self.elements.insert((tag.0, tag.1), encoded);
        self
    }

    pub fn pixel_data(self, bytes: &[u8]) -> Self {
        self.raw(tags::PIXEL_DATA, b"OW", bytes)
    }

    pub fn without(mut self, tag: Tag) -> Self {
        self.elements.remove(&(tag.0, tag.1));
        self
    }

    /// Preamble, file meta group and dataset
    pub fn build(&self) -> Vec<u8> {
        let meta = DicomWriter::new(EXPLICIT_VR_LE)
            .raw(tags::FILE_META_INFORMATION_VERSION, b"OB", &[0, 1])
            .str(tags::MEDIA_STORAGE_SOP_CLASS_UID, b"UI", CT_IMAGE_STORAGE)
            .str(tags::MEDIA_STORAGE_SOP_INSTANCE_UID, b"UI", "1.2.826.0.1.3680043.2.1125.3")
            .str(tags::TRANSFER_SYNTAX_UID, b"UI", &self.transfer_syntax)
            .str(tags::IMPLEMENTATION_CLASS_UID, b"UI", IMPLEMENTATION_CLASS_UID);
        let meta_bytes: Vec<u8> = meta.elements.values().flatten().copied().collect();

        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        out.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, b'U', b'L', 0x04, 0x00]);
        out.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&meta_bytes);
        for value in self.elements.values() {
            out.extend_from_slice(value);
        }
        out
    }
}

/// A minimal CT slice that carries everything an import needs
pub fn ct_slice_writer(series_uid: &str, instance: u32, z: f64) -> DicomWriter {
    DicomWriter::new(EXPLICIT_VR_LE)
        .str(tags::SOP_CLASS_UID, b"UI", CT_IMAGE_STORAGE)
        .str(
            tags::SOP_INSTANCE_UID,
            b"UI",
            &format!("{series_uid}.{instance}"),
        )
        .str(tags::STUDY_DATE, b"DA", "20240115")
        .str(tags::MODALITY, b"CS", "CT")
        .str(tags::PATIENT_NAME, b"PN", "Doe^Jane")
        .str(tags::PATIENT_ID, b"LO", "PAT-001")
        .str(tags::STUDY_INSTANCE_UID, b"UI", STUDY_UID)
        .str(tags::SERIES_INSTANCE_UID, b"UI", series_uid)
        .str(tags::INSTANCE_NUMBER, b"IS", &instance.to_string())
        .str(
            tags::IMAGE_POSITION_PATIENT,
            b"DS",
            &format!("-125.0\\-125.0\\{z}"),
        )
        .u16(tags::ROWS, 2)
        .u16(tags::COLUMNS, 2)
        .u16(tags::BITS_ALLOCATED, 16)
        .u16(tags::PIXEL_REPRESENTATION, 0)
        .pixel_data(&[0; 8])
}

pub fn ct_slice(series_uid: &str, instance: u32, z: f64) -> Vec<u8> {
    ct_slice_writer(series_uid, instance, z).build()
}
