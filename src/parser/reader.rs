//! Byte-level walk over encoded data elements
//!
//! The reader borrows the input buffer and hands out element values as
//! slices, so nothing but the header region is ever copied. Walking stops
//! at Pixel Data.

use dicom::core::{Tag, VR};
use dicom_dictionary_std::tags;

use super::ParseError;
use crate::enums::ByteOrder;

pub(crate) const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

const ITEM: Tag = Tag(0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);

/// An element whose value has not been decoded yet
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawElement<'a> {
    pub tag: Tag,
    /// `None` for implicit VR encodings
    pub vr: Option<VR>,
    pub value: &'a [u8],
    pub order: ByteOrder,
}

struct ElementHeader {
    tag: Tag,
    vr: Option<VR>,
    length: u32,
}

pub(crate) struct DatasetReader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
    explicit_vr: bool,
}

/// VRs encoded with a reserved field and a 32-bit length in explicit VR
fn has_long_length(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB
            | VR::OD
            | VR::OF
            | VR::OL
            | VR::OV
            | VR::OW
            | VR::SQ
            | VR::SV
            | VR::UC
            | VR::UN
            | VR::UR
            | VR::UT
            | VR::UV
    )
}

impl<'a> DatasetReader<'a> {
    pub(crate) fn new(buf: &'a [u8], pos: usize, order: ByteOrder, explicit_vr: bool) -> Self {
        Self {
            buf,
            pos,
            order,
            explicit_vr,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                ParseError::MalformedHeader(format!(
                    "unexpected end of data at offset {} (needed {} more bytes)",
                    self.pos, len
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u16(&self, bytes: [u8; 2]) -> u16 {
        match self.order {
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
        }
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self.take(2)?;
        Ok(self.read_u16([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        let bytes = [b[0], b[1], b[2], b[3]];
        Ok(match self.order {
            ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
            ByteOrder::BigEndian => u32::from_be_bytes(bytes),
        })
    }

    fn read_header(&mut self) -> Result<ElementHeader, ParseError> {
        let tag = Tag(self.u16()?, self.u16()?);
        // items and delimiters never carry a VR
        if tag.group() == 0xFFFE || !self.explicit_vr {
            let length = self.u32()?;
            return Ok(ElementHeader {
                tag,
                vr: None,
                length,
            });
        }

        let code = self.take(2)?;
        let vr = VR::from_binary([code[0], code[1]]).ok_or_else(|| {
            ParseError::MalformedHeader(format!(
                "invalid VR {:?} in element {}",
                String::from_utf8_lossy(code),
                tag
            ))
        })?;
        let length = if has_long_length(vr) {
            self.take(2)?;
            self.u32()?
        } else {
            u32::from(self.u16()?)
        };
        Ok(ElementHeader {
            tag,
            vr: Some(vr),
            length,
        })
    }

    /// Next top-level element, or `None` at Pixel Data or the end of input
    ///
    /// Elements of undefined length (sequences, and UN values holding
    /// sequences) are skipped over.
    pub(crate) fn next_element(&mut self) -> Result<Option<RawElement<'a>>, ParseError> {
        loop {
            if self.is_at_end() {
                return Ok(None);
            }
            let header = self.read_header()?;
            if header.tag == tags::PIXEL_DATA {
                return Ok(None);
            }
            if header.length == UNDEFINED_LENGTH {
                if header.vr == Some(VR::UN) {
                    self.skip_implicit_sequence()?;
                } else {
                    self.skip_undefined_sequence()?;
                }
                continue;
            }
            if header.vr == Some(VR::SQ) {
                self.take(header.length as usize)?;
                continue;
            }
            let value = self.take(header.length as usize)?;
            return Ok(Some(RawElement {
                tag: header.tag,
                vr: header.vr,
                value,
                order: self.order,
            }));
        }
    }

    /// UN of undefined length holds a sequence in implicit VR little endian
    fn skip_implicit_sequence(&mut self) -> Result<(), ParseError> {
        let (order, explicit_vr) = (self.order, self.explicit_vr);
        self.order = ByteOrder::LittleEndian;
        self.explicit_vr = false;
        let result = self.skip_undefined_sequence();
        self.order = order;
        self.explicit_vr = explicit_vr;
        result
    }

    fn skip_undefined_sequence(&mut self) -> Result<(), ParseError> {
        loop {
            let header = self.read_header()?;
            match header.tag {
                SEQUENCE_DELIMITATION => return Ok(()),
                ITEM if header.length == UNDEFINED_LENGTH => self.skip_undefined_item()?,
                ITEM => {
                    self.take(header.length as usize)?;
                }
                // encapsulated fragments and nested values of undefined length
                other if other.group() != 0xFFFE && header.length != UNDEFINED_LENGTH => {
                    self.take(header.length as usize)?;
                }
                other => {
                    return Err(ParseError::MalformedHeader(format!(
                        "unexpected element {} inside sequence at offset {}",
                        other, self.pos
                    )));
                }
            }
        }
    }

    fn skip_undefined_item(&mut self) -> Result<(), ParseError> {
        loop {
            let header = self.read_header()?;
            if header.tag == ITEM_DELIMITATION {
                return Ok(());
            }
            if header.length == UNDEFINED_LENGTH {
                if header.vr == Some(VR::UN) {
                    self.skip_implicit_sequence()?;
                } else {
                    self.skip_undefined_sequence()?;
                }
            } else {
                self.take(header.length as usize)?;
            }
        }
    }
}
