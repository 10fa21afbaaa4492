//! Skeleton of an unprotected JPEG 2000 part 1 codestream.
//!
//! Only the structure JPWL needs is recovered: where SIZ ends, where the main header
//! ends, and for every tile-part where its header and data live.

use crate::error::JpwlError;
use crate::marker_code::{MarkerCode, is_marker_at, marker_at};
use crate::stream::{StreamReader, read_u16_be};

pub const MAX_TILES: usize = 1024;
/// `Lsot Isot Psot TPsot TNsot`
pub const SOT_LN: usize = 10;
/// SOT marker plus its fixed-size segment.
pub const SOT_SEGMENT_LEN: usize = SOT_LN + 2;
/// Offset of `Psot` from the SOT marker.
pub const PSOT_OFFSET: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePart {
    /// Offset of the SOT marker.
    pub start: usize,
    /// `Isot`
    pub tile_index: u16,
    /// `Psot` as found; zero means the tile-part runs to the EOC.
    pub psot: u32,
    /// First byte after SOD.
    pub data_start: usize,
    /// One past the last byte of the tile-part (the next SOT or the EOC).
    pub end: usize,
}

impl TilePart {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codestream {
    /// First byte after the SIZ segment.
    pub siz_end: usize,
    pub components: u16,
    /// First SOT, or the EOC of a stream without tiles.
    pub main_header_end: usize,
    pub tiles: Vec<TilePart>,
    /// Offset of the EOC marker.
    pub eoc: usize,
}

impl Codestream {
    pub fn parse(raw: &[u8]) -> Result<Self, JpwlError> {
        if !is_marker_at(raw, 0, MarkerCode::StartOfCodestream) {
            return Err(JpwlError::MissingStartOfCodestream);
        }
        if !is_marker_at(raw, 2, MarkerCode::ImageAndTileSize) {
            return Err(JpwlError::MissingImageSize);
        }
        let lsiz = usize::from(read_u16_be(raw, 4)?);
        // Lsiz Rsiz Xsiz Ysiz XOsiz YOsiz XTsiz YTsiz XTOsiz YTOsiz Csiz
        let components = read_u16_be(raw, 40)?;
        let siz_end = 4 + lsiz;
        if lsiz < 38 || siz_end > raw.len() {
            return Err(JpwlError::MalformedCodestream);
        }

        let mut reader = StreamReader::at(raw, siz_end);
        let (main_header_end, first) =
            reader.skip_to_marker(&[MarkerCode::StartOfTile, MarkerCode::EndOfCodestream])?;

        let mut tiles = Vec::new();
        let mut position = main_header_end;
        let mut marker = first;
        while marker == MarkerCode::StartOfTile {
            if tiles.len() >= MAX_TILES {
                return Err(JpwlError::TooManyTiles);
            }
            let tile = Self::parse_tile_part(raw, position)?;
            tiles.push(tile);
            position = tile.end;
            marker = match marker_at(raw, position) {
                Some(m @ (MarkerCode::StartOfTile | MarkerCode::EndOfCodestream)) => m,
                _ => return Err(JpwlError::MalformedCodestream),
            };
        }

        Ok(Self {
            siz_end,
            components,
            main_header_end,
            tiles,
            eoc: position,
        })
    }

    fn parse_tile_part(raw: &[u8], start: usize) -> Result<TilePart, JpwlError> {
        let mut reader = StreamReader::at(raw, start);
        reader.read_marker()?;
        if usize::from(reader.read_u16()?) != SOT_LN {
            return Err(JpwlError::UnsupportedSotLength);
        }
        let tile_index = reader.read_u16()?;
        let psot = reader.read_u32()?;
        reader.skip(2)?;

        let (sod, _) = reader.skip_to_marker(&[MarkerCode::StartOfData])?;
        let data_start = sod + 2;
        let end = if psot == 0 {
            // Last tile-part runs up to the EOC.
            match raw.len().checked_sub(2) {
                Some(eoc) if is_marker_at(raw, eoc, MarkerCode::EndOfCodestream) => eoc,
                _ => return Err(JpwlError::MalformedCodestream),
            }
        } else {
            start.checked_add(psot as usize).ok_or(JpwlError::MalformedCodestream)?
        };
        if end < data_start || end.saturating_add(2) > raw.len() {
            return Err(JpwlError::MalformedCodestream);
        }
        Ok(TilePart {
            start,
            tile_index,
            psot,
            data_start,
            end,
        })
    }

    /// Length of the codestream through EOC.
    pub fn len(&self) -> usize {
        self.eoc + 2
    }

    /// True when the stream carries no tile-parts.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// One past the last data byte JPWL protects for tile `index`: the last
    /// tile-part's data runs through the EOC marker.
    pub fn data_end(&self, index: usize) -> usize {
        if index + 1 == self.tiles.len() {
            self.len()
        } else {
            self.tiles[index].end
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// SOC, single component SIZ, COD, then `tiles` tile-parts with `data` bytes each, EOC.
    pub(crate) fn sample_codestream(tiles: usize, data: usize) -> Vec<u8> {
        let mut raw = vec![
            0xFF, 0x4F, // SOC
            0xFF, 0x51, // SIZ
            0x00, 0x29, // Lsiz = 41
            0x00, 0x00, // Rsiz
        ];
        raw.extend_from_slice(&[0, 0, 0, 64, 0, 0, 0, 64]); // Xsiz Ysiz
        raw.extend_from_slice(&[0; 8]); // XOsiz YOsiz
        raw.extend_from_slice(&[0, 0, 0, 32, 0, 0, 0, 32]); // XTsiz YTsiz
        raw.extend_from_slice(&[0; 8]); // XTOsiz YTOsiz
        raw.extend_from_slice(&[0x00, 0x01, 0x07, 0x01, 0x01]); // Csiz Ssiz XRsiz YRsiz
        raw.extend_from_slice(&[0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x04, 0x04, 0x00, 0x00]); // COD
        for t in 0..tiles {
            let psot = (14 + data) as u32;
            raw.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
            raw.extend_from_slice(&(t as u16).to_be_bytes());
            raw.extend_from_slice(&psot.to_be_bytes());
            raw.extend_from_slice(&[0x00, 0x01]);
            raw.extend_from_slice(&[0xFF, 0x93]);
            raw.extend((0..data).map(|i| (i % 0x7F) as u8));
        }
        raw.extend_from_slice(&[0xFF, 0xD9]);
        raw
    }

    #[test]
    fn test_parse_tiles() {
        let raw = sample_codestream(3, 20);
        let stream = Codestream::parse(&raw).unwrap();
        assert_eq!(stream.siz_end, 45);
        assert_eq!(stream.components, 1);
        assert_eq!(stream.main_header_end, 59);
        assert_eq!(stream.tiles.len(), 3);
        assert_eq!(stream.tiles[1].start, 59 + 34);
        assert_eq!(stream.tiles[1].tile_index, 1);
        assert_eq!(stream.tiles[1].data_start, 59 + 34 + 14);
        assert_eq!(stream.tiles[2].len(), 34);
        assert_eq!(stream.eoc, raw.len() - 2);
        assert_eq!(stream.data_end(1), stream.tiles[2].start);
        assert_eq!(stream.data_end(2), raw.len());
    }

    #[test]
    fn test_parse_empty_stream() {
        let raw = sample_codestream(0, 0);
        let stream = Codestream::parse(&raw).unwrap();
        assert!(stream.is_empty());
        assert_eq!(stream.main_header_end, stream.eoc);
        assert_eq!(stream.len(), raw.len());
    }

    #[test]
    fn test_parse_psot_zero() {
        let mut raw = sample_codestream(1, 10);
        raw[59 + 6..59 + 10].copy_from_slice(&[0, 0, 0, 0]);
        let stream = Codestream::parse(&raw).unwrap();
        assert_eq!(stream.tiles[0].end, raw.len() - 2);
    }

    #[test]
    fn test_parse_errors() {
        let raw = sample_codestream(1, 10);
        assert_eq!(Codestream::parse(&raw[2..]), Err(JpwlError::MissingStartOfCodestream));

        let mut bad_sot = raw.clone();
        bad_sot[59 + 3] = 0x0B;
        assert_eq!(Codestream::parse(&bad_sot), Err(JpwlError::UnsupportedSotLength));

        let mut bad_psot = raw.clone();
        bad_psot[59 + 9] = 0xF0;
        assert_eq!(Codestream::parse(&bad_psot), Err(JpwlError::MalformedCodestream));

        assert!(Codestream::parse(&raw[..raw.len() - 2]).is_err());
    }
}
