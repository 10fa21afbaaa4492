//! JPWL marker segment model shared by the encoder and the decoder.
//!
//! A [`Marker`] records one segment inserted into (encoder) or to be removed from
//! (decoder) a codestream. Positions are byte offsets; `pos_in` addresses the
//! unprotected layout and `pos_out` the protected one. `len` always counts the
//! full on-wire span, marker bytes included.

use std::ops::Range;

use crate::codec::RsCode;
use crate::error::JpwlError;
use crate::marker_code::MarkerCode;
use crate::protection::{EPB_HEADER_LEN, EPB_LN, EpbPlacement, MAX_EPBSIZE, Protection};
use crate::stream::{StreamReader, StreamWriter};

pub const MAX_MARKERS: usize = 8096;
/// `Lepc Pcrc DL Pepc`
pub const EPC_LN: usize = 9;
/// `Lesd Cesd Pesd`
pub const ESD_LN: usize = 5;
/// One byte-range interval: `start(4) end(4) sensitivity(1)`.
pub const ESDINT_LN: usize = 9;
/// Informative method id for the interleaving amendment.
pub const INFORMATIVE_INTERLEAVE_ID: u16 = 0x0200;
/// `id Lid Nepb`
pub const INFORMATIVE_HEADER_LEN: usize = 6;
/// `RSepb(4) Lepb(2) Oepb(4)`
pub const INFORMATIVE_ENTRY_LEN: usize = 10;

/// Error protection block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epb {
    pub index: u8,
    /// Set on the last EPB of a header.
    pub last: bool,
    pub placement: EpbPlacement,
    pub protection: Protection,
    pub pre_len: usize,
    pub post_len: usize,
    /// Offset of the first post-data byte in the buffer the EPB lives in.
    pub post_start: usize,
    pub ldp_epb: u32,
    pub lepb: u16,
}

impl Epb {
    pub fn new(
        placement: EpbPlacement,
        index: u8,
        last: bool,
        protection: Protection,
        pre_len: usize,
        post_len: usize,
    ) -> Result<Self, JpwlError> {
        let lepb = EPB_LN + placement.pre_parity_len() + protection.parity_len(placement, post_len);
        if lepb > MAX_EPBSIZE {
            return Err(JpwlError::HeaderTooLarge);
        }
        let ldp_epb = u32::try_from(pre_len + post_len).map_err(|_| JpwlError::HeaderTooLarge)?;
        Ok(Self {
            index,
            last,
            placement,
            protection,
            pre_len,
            post_len,
            post_start: 0,
            ldp_epb,
            lepb: lepb as u16,
        })
    }

    pub fn depb(&self) -> u8 {
        0x80 | (if self.last { 0x40 } else { 0 }) | (self.index & 0x3F)
    }

    pub fn pepb(&self) -> u32 {
        self.protection.pepb()
    }

    /// Code protecting the post-data, `None` for CRC or unprotected post-data.
    pub fn post_code(&self) -> Option<RsCode> {
        self.protection.rs_code(self.placement)
    }

    pub fn pre_parity_len(&self) -> usize {
        self.placement.pre_parity_len()
    }

    pub fn post_parity_len(&self) -> usize {
        self.protection.parity_len(self.placement, self.post_len)
    }

    pub fn segment_len(&self) -> usize {
        usize::from(self.lepb) + 2
    }

    /// Pre-data window and its parity for an EPB whose marker sits at `position`.
    /// The pre-data always ends with the EPB's own marker segment fields.
    pub fn pre_windows(&self, position: usize) -> (Range<usize>, Range<usize>) {
        let parity_start = position + EPB_HEADER_LEN;
        (
            parity_start.saturating_sub(self.pre_len)..parity_start,
            parity_start..parity_start + self.pre_parity_len(),
        )
    }

    /// Post-data blocks and their parity: one entry per RS codeword, a single entry
    /// for CRC, none when unprotected.
    pub fn post_windows(&self, position: usize) -> Vec<(Range<usize>, Range<usize>)> {
        let mut parity = position + EPB_HEADER_LEN + self.pre_parity_len();
        let end = self.post_start + self.post_len;
        match (self.post_code(), self.protection) {
            (Some(code), _) => (self.post_start..end)
                .step_by(code.k())
                .map(|start| {
                    let block = start..end.min(start + code.k());
                    let check = parity..parity + code.parity_len();
                    parity = check.end;
                    (block, check)
                })
                .collect(),
            (None, Protection::Crc16 | Protection::Crc32) => {
                vec![(self.post_start..end, parity..parity + self.post_parity_len())]
            }
            _ => Vec::new(),
        }
    }

    /// Writes marker and fields; parity is filled separately.
    pub fn write(&self, writer: &mut StreamWriter) -> Result<(), JpwlError> {
        writer.write_marker(MarkerCode::ErrorProtectionBlock)?;
        writer.write_u16(self.lepb)?;
        writer.write_byte(self.depb())?;
        writer.write_u32(self.ldp_epb)?;
        writer.write_u32(self.pepb())
    }

    /// Parses the fields following an EPB marker and checks them for consistency.
    pub fn parse(reader: &mut StreamReader, placement: EpbPlacement, pre_len: usize) -> Result<Self, JpwlError> {
        let lepb = reader.read_u16()?;
        let depb = reader.read_u8()?;
        let ldp_epb = reader.read_u32()?;
        let protection = Protection::from_pepb(reader.read_u32()?)?;
        let post_len = (ldp_epb as usize)
            .checked_sub(pre_len)
            .ok_or(JpwlError::MalformedCodestream)?;
        let expected = EPB_LN + placement.pre_parity_len() + protection.parity_len(placement, post_len);
        if usize::from(lepb) != expected {
            return Err(JpwlError::MalformedCodestream);
        }
        Ok(Self {
            index: depb & 0x3F,
            last: depb & 0x40 != 0,
            placement,
            protection,
            pre_len,
            post_len,
            post_start: 0,
            ldp_epb,
            lepb,
        })
    }
}

/// One entry of the interleaving amendment's EPB position map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpbMapEntry {
    pub pepb: u32,
    pub lepb: u16,
    pub offset: u32,
}

/// Error protection capability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Epc {
    pub crc: u16,
    /// `DL`: length of the whole protected codestream.
    pub total_len: u32,
    pub capability_flags: u8,
    /// Present when the interleaving amendment is used.
    pub epb_map: Option<Vec<EpbMapEntry>>,
}

impl Epc {
    pub const ESD_PRESENT: u8 = 0x10;
    pub const RED_PRESENT: u8 = 0x20;
    pub const EPB_PRESENT: u8 = 0x40;
    pub const INFORMATIVE_PRESENT: u8 = 0x80;

    pub fn segment_len(&self) -> usize {
        2 + EPC_LN
            + self
                .epb_map
                .as_ref()
                .map_or(0, |map| INFORMATIVE_HEADER_LEN + INFORMATIVE_ENTRY_LEN * map.len())
    }

    pub fn write(&self, writer: &mut StreamWriter) -> Result<(), JpwlError> {
        writer.write_marker(MarkerCode::ErrorProtectionCapability)?;
        writer.write_u16((self.segment_len() - 2) as u16)?;
        writer.write_u16(self.crc)?;
        writer.write_u32(self.total_len)?;
        writer.write_byte(self.capability_flags)?;
        if let Some(map) = &self.epb_map {
            writer.write_u16(INFORMATIVE_INTERLEAVE_ID)?;
            writer.write_u16((2 + INFORMATIVE_ENTRY_LEN * map.len()) as u16)?;
            writer.write_u16(map.len() as u16)?;
            for entry in map {
                writer.write_u32(entry.pepb)?;
                writer.write_u16(entry.lepb)?;
                writer.write_u32(entry.offset)?;
            }
        }
        Ok(())
    }

    /// Parses the fields following an EPC marker. RED is refused.
    pub fn parse(reader: &mut StreamReader) -> Result<Self, JpwlError> {
        let lepc = usize::from(reader.read_u16()?);
        if lepc < EPC_LN {
            return Err(JpwlError::MalformedCodestream);
        }
        let crc = reader.read_u16()?;
        let total_len = reader.read_u32()?;
        let capability_flags = reader.read_u8()?;
        if capability_flags & Self::RED_PRESENT != 0 {
            return Err(JpwlError::ResidualErrorDescriptorUnsupported);
        }

        let mut epb_map = None;
        if capability_flags & Self::INFORMATIVE_PRESENT != 0 {
            if reader.read_u16()? != INFORMATIVE_INTERLEAVE_ID {
                return Err(JpwlError::UnknownInformativeMethod);
            }
            let lid = usize::from(reader.read_u16()?);
            let count = usize::from(reader.read_u16()?);
            if lid != 2 + INFORMATIVE_ENTRY_LEN * count
                || lepc != EPC_LN + INFORMATIVE_HEADER_LEN + INFORMATIVE_ENTRY_LEN * count
            {
                return Err(JpwlError::MalformedCodestream);
            }
            let mut map = Vec::with_capacity(count);
            for _ in 0..count {
                map.push(EpbMapEntry {
                    pepb: reader.read_u32()?,
                    lepb: reader.read_u16()?,
                    offset: reader.read_u32()?,
                });
            }
            epb_map = Some(map);
        } else {
            reader.skip(lepc - EPC_LN)?;
        }

        Ok(Self {
            crc,
            total_len,
            capability_flags,
            epb_map,
        })
    }
}

/// How an ESD addresses the codestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsdAddressing {
    Packet,
    ByteRange,
    PacketRange,
    Reserved,
}

impl EsdAddressing {
    pub fn from_pesd(pesd: u8) -> Self {
        match pesd >> 6 {
            0 => EsdAddressing::Packet,
            1 => EsdAddressing::ByteRange,
            2 => EsdAddressing::PacketRange,
            _ => EsdAddressing::Reserved,
        }
    }
}

/// Byte range of an ESD, inclusive, relative to the start of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsdRange {
    pub start: u32,
    pub end: u32,
    pub sensitivity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsdBody {
    ByteRanges(Vec<EsdRange>),
    Packets(Vec<u8>),
    /// Body of a received ESD, kept only by length.
    Skipped(usize),
}

/// Error sensitivity descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Esd {
    pub component: u16,
    pub pesd: u8,
    pub body: EsdBody,
}

impl Esd {
    /// Byte-range addressing, relative sensitivity, one byte per value.
    pub const PESD_BYTE_RANGE: u8 = 0x42;
    /// Packet addressing, relative sensitivity, one byte per value.
    pub const PESD_PACKET: u8 = 0x00;

    pub fn byte_ranges(component: u16, ranges: Vec<EsdRange>) -> Self {
        Self {
            component,
            pesd: Self::PESD_BYTE_RANGE,
            body: EsdBody::ByteRanges(ranges),
        }
    }

    pub fn packets(component: u16, sensitivity: Vec<u8>) -> Self {
        Self {
            component,
            pesd: Self::PESD_PACKET,
            body: EsdBody::Packets(sensitivity),
        }
    }

    pub fn addressing(&self) -> EsdAddressing {
        EsdAddressing::from_pesd(self.pesd)
    }

    fn body_len(&self) -> usize {
        match &self.body {
            EsdBody::ByteRanges(ranges) => ESDINT_LN * ranges.len(),
            EsdBody::Packets(values) => values.len(),
            EsdBody::Skipped(len) => *len,
        }
    }

    pub fn segment_len(&self) -> usize {
        2 + ESD_LN + self.body_len()
    }

    pub fn write(&self, writer: &mut StreamWriter) -> Result<(), JpwlError> {
        writer.write_marker(MarkerCode::ErrorSensitivityDescriptor)?;
        writer.write_u16((self.segment_len() - 2) as u16)?;
        writer.write_u16(self.component)?;
        writer.write_byte(self.pesd)?;
        match &self.body {
            EsdBody::ByteRanges(ranges) => {
                for range in ranges {
                    writer.write_u32(range.start)?;
                    writer.write_u32(range.end)?;
                    writer.write_byte(range.sensitivity)?;
                }
                Ok(())
            }
            EsdBody::Packets(values) => writer.write_bytes(values),
            EsdBody::Skipped(_) => Err(JpwlError::InvalidParameter),
        }
    }

    /// Parses the fields following an ESD marker, skipping the body.
    pub fn parse(reader: &mut StreamReader) -> Result<Self, JpwlError> {
        let lesd = usize::from(reader.read_u16()?);
        let body_len = lesd.checked_sub(ESD_LN).ok_or(JpwlError::MalformedCodestream)?;
        let component = reader.read_u16()?;
        let pesd = reader.read_u8()?;
        reader.skip(body_len)?;
        Ok(Self {
            component,
            pesd,
            body: EsdBody::Skipped(body_len),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerSegment {
    Epb(Epb),
    Epc(Epc),
    Esd(Esd),
    /// Span the decoder could not tie to valid structure.
    BadBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub segment: MarkerSegment,
    /// `None` for the main header.
    pub tile_num: Option<u16>,
    pub pos_in: usize,
    pub pos_out: usize,
    pub len: usize,
}

impl Marker {
    pub fn new(segment: MarkerSegment, tile_num: Option<u16>, pos_in: usize) -> Self {
        let len = match &segment {
            MarkerSegment::Epb(epb) => epb.segment_len(),
            MarkerSegment::Epc(epc) => epc.segment_len(),
            MarkerSegment::Esd(esd) => esd.segment_len(),
            MarkerSegment::BadBlock => 0,
        };
        Self {
            segment,
            tile_num,
            pos_in,
            pos_out: pos_in,
            len,
        }
    }

    pub fn bad_block(tile_num: Option<u16>, pos_in: usize, len: usize) -> Self {
        Self {
            len,
            ..Self::new(MarkerSegment::BadBlock, tile_num, pos_in)
        }
    }

    pub fn as_epb(&self) -> Option<&Epb> {
        match &self.segment {
            MarkerSegment::Epb(epb) => Some(epb),
            _ => None,
        }
    }

    /// Refreshes `len` after the segment was resized.
    pub fn update_len(&mut self) {
        if !matches!(self.segment, MarkerSegment::BadBlock) {
            self.len = Self::new(self.segment.clone(), self.tile_num, self.pos_in).len;
        }
    }

    /// Writes the segment at `pos_out`. Bad blocks have no wire form.
    pub fn write(&self, destination: &mut [u8]) -> Result<(), JpwlError> {
        let mut writer = StreamWriter::at(destination, self.pos_out);
        match &self.segment {
            MarkerSegment::Epb(epb) => epb.write(&mut writer),
            MarkerSegment::Epc(epc) => epc.write(&mut writer),
            MarkerSegment::Esd(esd) => esd.write(&mut writer),
            MarkerSegment::BadBlock => Err(JpwlError::InvalidParameter),
        }
    }
}

/// Bounded, insertion-ordered marker list.
#[derive(Debug, Default)]
pub struct MarkerTable {
    markers: Vec<Marker>,
}

impl MarkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, marker: Marker) -> Result<usize, JpwlError> {
        if self.markers.len() >= MAX_MARKERS {
            return Err(JpwlError::MarkerTableFull);
        }
        self.markers.push(marker);
        Ok(self.markers.len() - 1)
    }

    /// Checks that `count` more markers fit.
    pub fn reserve(&self, count: usize) -> Result<(), JpwlError> {
        if self.markers.len() + count > MAX_MARKERS {
            return Err(JpwlError::MarkerTableFull);
        }
        Ok(())
    }

    /// Appends all of `markers` or, when they do not fit, none of them.
    pub fn extend(&mut self, markers: Vec<Marker>) -> Result<(), JpwlError> {
        self.reserve(markers.len())?;
        self.markers.extend(markers);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Marker> {
        self.markers.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Marker> {
        self.markers.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Marker> {
        self.markers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Marker> {
        self.markers.get_mut(index)
    }

    /// Sum of all segment lengths.
    pub fn total_len(&self) -> usize {
        self.markers.iter().map(|m| m.len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epb_depb_and_lengths() {
        let epb = Epb::new(EpbPlacement::TileHeader, 0, false, Protection::Predefined, 25, 30).unwrap();
        assert_eq!(epb.depb(), 0x80);
        // 11 + 55 + 2 * 55
        assert_eq!(epb.lepb, 176);
        assert_eq!(epb.ldp_epb, 55);
        assert_eq!(epb.segment_len(), 178);

        let last = Epb::new(EpbPlacement::Subsequent, 3, true, Protection::Crc32, 13, 1000).unwrap();
        assert_eq!(last.depb(), 0xC3);
        assert_eq!(last.lepb as usize, 11 + 27 + 4);
    }

    #[test]
    fn test_epb_windows() {
        let mut epb = Epb::new(EpbPlacement::TileHeader, 0, false, Protection::Predefined, 25, 30).unwrap();
        epb.post_start = 500;
        let (pre, pre_parity) = epb.pre_windows(112);
        assert_eq!(pre, 100..125);
        assert_eq!(pre_parity, 125..180);
        let post = epb.post_windows(112);
        assert_eq!(post, vec![(500..525, 180..235), (525..530, 235..290)]);

        let mut crc = Epb::new(EpbPlacement::Subsequent, 1, true, Protection::Crc16, 13, 40).unwrap();
        crc.post_start = 1000;
        assert_eq!(crc.pre_windows(900).0, 900..913);
        assert_eq!(crc.post_windows(900), vec![(1000..1040, 940..942)]);

        let none = Epb::new(EpbPlacement::Subsequent, 1, true, Protection::None, 13, 40).unwrap();
        assert!(none.post_windows(0).is_empty());
    }

    #[test]
    fn test_epb_too_large() {
        let result = Epb::new(EpbPlacement::MainHeader, 0, true, Protection::Predefined, 58, 64 * 700);
        assert_eq!(result, Err(JpwlError::HeaderTooLarge));
    }

    #[test]
    fn test_epb_write_parse() {
        let epb = Epb::new(
            EpbPlacement::Subsequent,
            2,
            true,
            Protection::Rs(RsCode::data(48).unwrap()),
            13,
            100,
        )
        .unwrap();
        let mut buffer = vec![0u8; 13];
        epb.write(&mut StreamWriter::new(&mut buffer)).unwrap();
        assert_eq!(&buffer[..2], &[0xFF, 0x66]);
        assert_eq!(buffer[4], 0xC2);
        assert_eq!(&buffer[9..13], &[0x20, 0x00, 0x30, 0x20]);

        let mut reader = StreamReader::at(&buffer, 2);
        let parsed = Epb::parse(&mut reader, EpbPlacement::Subsequent, 13).unwrap();
        assert_eq!(parsed, epb);
    }

    #[test]
    fn test_epb_parse_rejects_inconsistent_length() {
        let buffer = [
            0x00, 0x30, // Lepb: wrong for the declared method
            0xC0, // Depb
            0x00, 0x00, 0x00, 0x20, // LDPepb
            0x10, 0x00, 0x00, 0x00, // Pepb: CRC-16
        ];
        let mut reader = StreamReader::new(&buffer);
        assert_eq!(
            Epb::parse(&mut reader, EpbPlacement::Subsequent, 13),
            Err(JpwlError::MalformedCodestream)
        );
    }

    #[test]
    fn test_epc_with_map() {
        let epc = Epc {
            crc: 0xBEEF,
            total_len: 1234,
            capability_flags: Epc::EPB_PRESENT | Epc::INFORMATIVE_PRESENT,
            epb_map: Some(vec![EpbMapEntry {
                pepb: 0,
                lepb: 77,
                offset: 300,
            }]),
        };
        assert_eq!(epc.segment_len(), 2 + 9 + 6 + 10);
        let mut buffer = vec![0u8; epc.segment_len()];
        epc.write(&mut StreamWriter::new(&mut buffer)).unwrap();
        assert_eq!(&buffer[11..13], &[0x02, 0x00]);
        let mut reader = StreamReader::at(&buffer, 2);
        assert_eq!(Epc::parse(&mut reader), Ok(epc));
        assert_eq!(reader.position(), buffer.len());
    }

    #[test]
    fn test_epc_rejects_red() {
        let buffer = [
            0x00, 0x09, // Lepc
            0x00, 0x00, // Pcrc
            0x00, 0x00, 0x01, 0x00, // DL
            0x60, // Pepc: EPB + RED
        ];
        assert_eq!(
            Epc::parse(&mut StreamReader::new(&buffer)),
            Err(JpwlError::ResidualErrorDescriptorUnsupported)
        );
    }

    #[test]
    fn test_esd_lengths() {
        let ranges = Esd::byte_ranges(
            0,
            vec![EsdRange {
                start: 0,
                end: 99,
                sensitivity: 0xFF,
            }],
        );
        assert_eq!(ranges.segment_len(), 16);
        assert_eq!(ranges.addressing(), EsdAddressing::ByteRange);
        let packets = Esd::packets(1, vec![3, 2, 1, 0]);
        assert_eq!(packets.segment_len(), 11);
        assert_eq!(packets.addressing(), EsdAddressing::Packet);

        let mut buffer = vec![0u8; packets.segment_len()];
        packets.write(&mut StreamWriter::new(&mut buffer)).unwrap();
        let parsed = Esd::parse(&mut StreamReader::at(&buffer, 2)).unwrap();
        assert_eq!(parsed.segment_len(), packets.segment_len());
        assert_eq!(parsed.component, 1);
    }

    #[test]
    fn test_marker_table_capacity() {
        let mut table = MarkerTable::new();
        for i in 0..MAX_MARKERS {
            table.push(Marker::bad_block(None, i, 1)).unwrap();
        }
        assert_eq!(table.push(Marker::bad_block(None, 0, 1)), Err(JpwlError::MarkerTableFull));
        assert_eq!(table.reserve(1), Err(JpwlError::MarkerTableFull));
        assert_eq!(
            table.extend(vec![Marker::bad_block(None, 0, 1)]),
            Err(JpwlError::MarkerTableFull)
        );
        assert_eq!(table.len(), MAX_MARKERS);
        assert_eq!(table.total_len(), MAX_MARKERS);
    }
}
