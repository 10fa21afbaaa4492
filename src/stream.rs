//! Bounds-checked big-endian cursors over codestream buffers.
//!
//! Every multi-byte JPWL and JPEG 2000 field is big-endian. The reader and writer
//! below never index past the end of the slice they wrap: reads fail with
//! [`JpwlError::Truncated`] and writes with [`JpwlError::DestinationTooSmall`].

use std::ops::Range;

use crate::error::JpwlError;
use crate::marker_code::{MARKER_START_BYTE, MarkerCode};

pub struct StreamReader<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self::at(source, 0)
    }

    pub fn at(source: &'a [u8], position: usize) -> Self {
        Self { source, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn remaining(&self) -> usize {
        self.source.len().saturating_sub(self.position)
    }

    pub fn read_u8(&mut self) -> Result<u8, JpwlError> {
        let value = *self.source.get(self.position).ok_or(JpwlError::Truncated)?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, JpwlError> {
        let value = read_u16_be(self.source, self.position)?;
        self.position += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, JpwlError> {
        let value = read_u32_be(self.source, self.position)?;
        self.position += 4;
        Ok(value)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], JpwlError> {
        let end = self.position.checked_add(count).ok_or(JpwlError::Truncated)?;
        let bytes = self.source.get(self.position..end).ok_or(JpwlError::Truncated)?;
        self.position = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), JpwlError> {
        self.read_bytes(count).map(|_| ())
    }

    /// Reads a two-byte marker. Unknown codes are reported as malformed.
    pub fn read_marker(&mut self) -> Result<MarkerCode, JpwlError> {
        if self.read_u8()? != MARKER_START_BYTE {
            return Err(JpwlError::MalformedCodestream);
        }
        MarkerCode::try_from(self.read_u8()?).map_err(|_| JpwlError::MalformedCodestream)
    }

    /// Reads a segment length field and skips the segment body.
    pub fn skip_segment(&mut self) -> Result<u16, JpwlError> {
        let length = self.read_u16()?;
        if length < 2 {
            return Err(JpwlError::MalformedCodestream);
        }
        self.skip(usize::from(length) - 2)?;
        Ok(length)
    }

    /// Walks marker segments until one of `terminators` is reached and returns its
    /// offset. The cursor is left on the terminating marker.
    pub fn skip_to_marker(&mut self, terminators: &[MarkerCode]) -> Result<(usize, MarkerCode), JpwlError> {
        loop {
            let start = self.position;
            let marker = self.read_marker()?;
            if terminators.contains(&marker) {
                self.position = start;
                return Ok((start, marker));
            }
            if marker.is_delimiter() {
                return Err(JpwlError::MalformedCodestream);
            }
            self.skip_segment()?;
        }
    }
}

pub struct StreamWriter<'a> {
    destination: &'a mut [u8],
    position: usize,
}

impl<'a> StreamWriter<'a> {
    pub fn new(destination: &'a mut [u8]) -> Self {
        Self::at(destination, 0)
    }

    pub fn at(destination: &'a mut [u8], position: usize) -> Self {
        Self { destination, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), JpwlError> {
        let slot = self
            .destination
            .get_mut(self.position)
            .ok_or(JpwlError::DestinationTooSmall)?;
        *slot = value;
        self.position += 1;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), JpwlError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), JpwlError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), JpwlError> {
        let end = self
            .position
            .checked_add(bytes.len())
            .ok_or(JpwlError::DestinationTooSmall)?;
        self.destination
            .get_mut(self.position..end)
            .ok_or(JpwlError::DestinationTooSmall)?
            .copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    pub fn write_marker(&mut self, marker: MarkerCode) -> Result<(), JpwlError> {
        self.write_bytes(&marker.to_be_bytes())
    }
}

pub fn read_u16_be(buffer: &[u8], position: usize) -> Result<u16, JpwlError> {
    let end = position.checked_add(2).ok_or(JpwlError::Truncated)?;
    match buffer.get(position..end) {
        Some(&[b0, b1]) => Ok(u16::from_be_bytes([b0, b1])),
        _ => Err(JpwlError::Truncated),
    }
}

pub fn read_u32_be(buffer: &[u8], position: usize) -> Result<u32, JpwlError> {
    let end = position.checked_add(4).ok_or(JpwlError::Truncated)?;
    match buffer.get(position..end) {
        Some(&[b0, b1, b2, b3]) => Ok(u32::from_be_bytes([b0, b1, b2, b3])),
        _ => Err(JpwlError::Truncated),
    }
}

pub fn write_u32_be(buffer: &mut [u8], position: usize, value: u32) -> Result<(), JpwlError> {
    StreamWriter::at(buffer, position).write_u32(value)
}

/// Borrows two non-overlapping ranges of `buffer` mutably at once.
pub fn split_disjoint(
    buffer: &mut [u8],
    first: Range<usize>,
    second: Range<usize>,
) -> Result<(&mut [u8], &mut [u8]), JpwlError> {
    if first.start > first.end || second.start > second.end {
        return Err(JpwlError::InvalidParameter);
    }
    if first.end > buffer.len() || second.end > buffer.len() {
        return Err(JpwlError::Truncated);
    }
    if first.end <= second.start {
        let (left, right) = buffer.split_at_mut(second.start);
        Ok((&mut left[first], &mut right[..second.end - second.start]))
    } else if second.end <= first.start {
        let (left, right) = buffer.split_at_mut(first.start);
        Ok((&mut right[..first.end - first.start], &mut left[second]))
    } else {
        Err(JpwlError::InvalidParameter)
    }
}

/// Plain byte scan for `marker` in `buffer[from..to]`.
pub fn find_marker(buffer: &[u8], from: usize, to: usize, marker: MarkerCode) -> Option<usize> {
    let to = to.min(buffer.len());
    if from >= to {
        return None;
    }
    buffer[from..to]
        .windows(2)
        .position(|pair| pair[0] == MARKER_START_BYTE && pair[1] == u8::from(marker))
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_big_endian() {
        let data = [0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0x01];
        let mut reader = StreamReader::new(&data);
        assert_eq!(reader.read_u16(), Ok(0x1234));
        assert_eq!(reader.read_u32(), Ok(0xDEADBEEF));
        assert_eq!(reader.remaining(), 1);
        assert_eq!(reader.read_u16(), Err(JpwlError::Truncated));
        assert_eq!(reader.read_u8(), Ok(0x01));
        assert_eq!(reader.read_u8(), Err(JpwlError::Truncated));
    }

    #[test]
    fn test_writer_bounds() {
        let mut buffer = [0u8; 5];
        let mut writer = StreamWriter::new(&mut buffer);
        writer.write_marker(MarkerCode::ErrorProtectionBlock).unwrap();
        writer.write_u16(0x0102).unwrap();
        assert_eq!(writer.write_u16(0x0304), Err(JpwlError::DestinationTooSmall));
        writer.write_byte(0x03).unwrap();
        assert_eq!(buffer, [0xFF, 0x66, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_skip_to_marker() {
        let data = [
            0xFF, 0x52, // COD
            0x00, 0x04, // Lcod
            0xAA, 0xBB, // body
            0xFF, 0x64, // COM
            0x00, 0x03, // Lcom
            0xFF, // body
            0xFF, 0x90, // SOT
        ];
        let mut reader = StreamReader::new(&data);
        let found = reader.skip_to_marker(&[MarkerCode::StartOfTile, MarkerCode::EndOfCodestream]);
        assert_eq!(found, Ok((11, MarkerCode::StartOfTile)));
        assert_eq!(reader.position(), 11);
    }

    #[test]
    fn test_skip_to_marker_truncated() {
        let data = [0xFF, 0x52, 0x00, 0x10, 0x00];
        let mut reader = StreamReader::new(&data);
        assert_eq!(
            reader.skip_to_marker(&[MarkerCode::StartOfTile]),
            Err(JpwlError::Truncated)
        );
    }

    #[test]
    fn test_find_marker() {
        let data = [0x00, 0xFF, 0x91, 0x00, 0xFF, 0x91];
        assert_eq!(find_marker(&data, 0, data.len(), MarkerCode::StartOfPacket), Some(1));
        assert_eq!(find_marker(&data, 2, data.len(), MarkerCode::StartOfPacket), Some(4));
        assert_eq!(find_marker(&data, 2, 5, MarkerCode::StartOfPacket), None);
        assert_eq!(find_marker(&data, 9, 3, MarkerCode::StartOfPacket), None);
    }

    #[test]
    fn test_split_disjoint() {
        let mut buffer = [0u8, 1, 2, 3, 4, 5];
        let (a, b) = split_disjoint(&mut buffer, 4..6, 0..2).unwrap();
        assert_eq!(a, &[4, 5]);
        assert_eq!(b, &[0, 1]);
        a[0] = 9;
        assert_eq!(buffer[4], 9);
        assert_eq!(split_disjoint(&mut buffer, 0..3, 2..4).err(), Some(JpwlError::InvalidParameter));
        assert_eq!(split_disjoint(&mut buffer, 0..3, 4..7).err(), Some(JpwlError::Truncated));
    }

    #[test]
    fn test_free_functions() {
        let mut buffer = [0u8; 6];
        write_u32_be(&mut buffer, 2, 0x0A0B0C0D).unwrap();
        assert_eq!(read_u32_be(&buffer, 2), Ok(0x0A0B0C0D));
        assert_eq!(read_u16_be(&buffer, 4), Ok(0x0C0D));
        assert_eq!(read_u16_be(&buffer, 5), Err(JpwlError::Truncated));
        assert_eq!(write_u32_be(&mut buffer, 3, 1), Err(JpwlError::DestinationTooSmall));
    }
}
