use dicom::encoding::transfer_syntax::{Codec, Endianness, TransferSyntaxIndex};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use serde::{Deserialize, Serialize};

/// Byte order of the encoded dataset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Encoding of the dataset that follows the file meta group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
    ExplicitVrBigEndian,
    /// Compressed pixel data. The dataset itself is explicit VR little endian.
    Encapsulated,
}

impl TransferSyntax {
    /// Classifies a transfer syntax UID through the dicom-rs registry
    ///
    /// Deflated and unknown syntaxes yield `None`.
    pub fn from_uid(uid: &str) -> Option<Self> {
        let ts = TransferSyntaxRegistry.get(uid)?;
        if matches!(ts.codec(), Codec::Dataset(_)) {
            return None;
        }
        Some(match ts.endianness() {
            Endianness::Big => Self::ExplicitVrBigEndian,
            Endianness::Little if ts.uid() == IMPLICIT_VR_LITTLE_ENDIAN.uid() => Self::ImplicitVrLittleEndian,
            Endianness::Little if ts.is_encapsulated_pixel_data() => Self::Encapsulated,
            Endianness::Little => Self::ExplicitVrLittleEndian,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        match self {
            Self::ExplicitVrBigEndian => ByteOrder::BigEndian,
            _ => ByteOrder::LittleEndian,
        }
    }

    pub fn is_explicit_vr(&self) -> bool {
        !matches!(self, Self::ImplicitVrLittleEndian)
    }
}

/// Step direction when walking instance numbers of a partial volume
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Delta {
    #[default]
    Forward,
    Backward,
}

impl Delta {
    pub fn step(&self) -> i8 {
        match self {
            Delta::Forward => 1,
            Delta::Backward => -1,
        }
    }
}

impl From<Delta> for i8 {
    fn from(delta: Delta) -> Self {
        delta.step()
    }
}

impl TryFrom<i8> for Delta {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Delta::Forward),
            -1 => Ok(Delta::Backward),
            other => Err(format!("delta must be 1 or -1, got {other}")),
        }
    }
}
