//! Packet sensitivity and the data intervals each tile's EPBs protect.
//!
//! Packets are delimited by SOP markers. Earlier packets of a tile carry coarser
//! resolution/quality layers and get higher sensitivity; with unequal error
//! protection a higher sensitivity maps onto a stronger RS(n,32) code.

use crate::codec::RsCode;
use crate::codestream::{Codestream, TilePart};
use crate::error::JpwlError;
use crate::marker_code::MarkerCode;
use crate::protection::{Protection, max_interval_len, uep_code};
use crate::stream::find_marker;

/// Packet count assumed for tiles without SOP markers.
pub const DEFAULT_PACKETS_PER_TILE: u16 = 31;
pub const MAX_INTERVALS: usize = 6553;

/// Per-tile packet counts and per-packet relative sensitivity (0..=255).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketSensitivity {
    pub tile_packets: Vec<u16>,
    pub sensitivity: Vec<u8>,
}

impl PacketSensitivity {
    /// Derives sensitivities from SOP boundaries: the packets of a tile are ranked
    /// `count - 1` down to `0` in stream order.
    pub fn from_codestream(raw: &[u8]) -> Result<Self, JpwlError> {
        let stream = Codestream::parse(raw)?;
        Ok(Self::from_parsed(raw, &stream))
    }

    pub(crate) fn from_parsed(raw: &[u8], stream: &Codestream) -> Self {
        let mut result = Self::default();
        for tile in &stream.tiles {
            let count = match sop_offsets(raw, tile).len() {
                0 => DEFAULT_PACKETS_PER_TILE,
                n => u16::try_from(n).unwrap_or(u16::MAX),
            };
            result.tile_packets.push(count);
            result
                .sensitivity
                .extend((0..count).rev().map(|rank| rank.min(255) as u8));
        }
        result
    }

    /// Sensitivities of the packets of tile `index`; empty when unknown.
    pub fn tile(&self, index: usize) -> &[u8] {
        let Some(&count) = self.tile_packets.get(index) else {
            return &[];
        };
        let start: usize = self.tile_packets[..index].iter().map(|&c| usize::from(c)).sum();
        self.sensitivity
            .get(start..start + usize::from(count))
            .unwrap_or(&[])
    }
}

fn sop_offsets(raw: &[u8], tile: &TilePart) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut position = tile.data_start;
    while let Some(found) = find_marker(raw, position, tile.end, MarkerCode::StartOfPacket) {
        offsets.push(found);
        position = found + 2;
    }
    offsets
}

/// A protected span of tile data. Offsets are inclusive and relative to the tile start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensitivityInterval {
    pub start: usize,
    pub end: usize,
    pub sensitivity: u8,
    /// `None` for CRC protection.
    pub code: Option<RsCode>,
}

impl SensitivityInterval {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn shifted(self, offset: usize) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            ..self
        }
    }
}

fn mean(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    (values.iter().map(|&v| usize::from(v)).sum::<usize>() / values.len()) as u8
}

/// Splits `raw[tile.data_start..data_end]` into intervals for the data EPBs.
///
/// Under UEP, consecutive packets whose sensitivity selects the same code share an
/// interval; without usable SOP boundaries the whole span takes the mean sensitivity.
/// RS intervals longer than one EPB can carry are split.
pub(crate) fn plan_intervals(
    raw: &[u8],
    tile: &TilePart,
    data_end: usize,
    sensitivity: &[u8],
    data: Protection,
) -> Vec<SensitivityInterval> {
    if data == Protection::None || tile.data_start >= data_end {
        return Vec::new();
    }

    // (start, end exclusive, sensitivity, code), absolute offsets.
    let mut spans: Vec<(usize, usize, u8, Option<RsCode>)> = Vec::new();
    match data {
        Protection::Predefined => {
            let sops = sop_offsets(raw, tile);
            if !sops.is_empty() && sops.len() == sensitivity.len() {
                for (i, &sens) in sensitivity.iter().enumerate() {
                    let start = if i == 0 { tile.data_start } else { sops[i] };
                    let end = sops.get(i + 1).copied().unwrap_or(data_end);
                    let code = Some(uep_code(sens));
                    match spans.last_mut() {
                        Some(last) if last.3 == code => {
                            last.1 = end;
                            last.2 = last.2.max(sens);
                        }
                        _ => spans.push((start, end, sens, code)),
                    }
                }
            } else {
                let sens = mean(sensitivity);
                spans.push((tile.data_start, data_end, sens, Some(uep_code(sens))));
            }
        }
        Protection::Rs(code) => spans.push((tile.data_start, data_end, mean(sensitivity), Some(code))),
        _ => spans.push((tile.data_start, data_end, mean(sensitivity), None)),
    }

    let mut intervals = Vec::new();
    for (start, end, sens, code) in spans {
        let limit = code.map_or(usize::MAX, max_interval_len);
        let mut chunk_start = start;
        while chunk_start < end {
            let chunk_end = end.min(chunk_start.saturating_add(limit));
            intervals.push(SensitivityInterval {
                start: chunk_start - tile.start,
                end: chunk_end - 1 - tile.start,
                sensitivity: sens,
                code,
            });
            chunk_start = chunk_end;
        }
    }
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_with_packets(packets: &[usize]) -> (Vec<u8>, TilePart) {
        let mut raw = vec![0xFF, 0x90, 0x00, 0x0A, 0, 0, 0, 0, 0, 0, 0, 1, 0xFF, 0x93];
        for (i, &len) in packets.iter().enumerate() {
            raw.extend_from_slice(&[0xFF, 0x91, 0x00, 0x04, 0x00, i as u8]);
            raw.extend(std::iter::repeat_n(0x11, len - 6));
        }
        let tile = TilePart {
            start: 0,
            tile_index: 0,
            psot: 0,
            data_start: 14,
            end: raw.len(),
        };
        (raw, tile)
    }

    #[test]
    fn test_tile_slices() {
        let sens = PacketSensitivity {
            tile_packets: vec![2, 3],
            sensitivity: vec![1, 0, 2, 1, 0],
        };
        assert_eq!(sens.tile(0), &[1, 0]);
        assert_eq!(sens.tile(1), &[2, 1, 0]);
        assert!(sens.tile(2).is_empty());
    }

    #[test]
    fn test_uep_groups_packets_by_code() {
        let (raw, tile) = tile_with_packets(&[20, 30, 40]);
        // 0xF0 and 0xF5 select the same code, 0x05 a weaker one.
        let intervals = plan_intervals(&raw, &tile, raw.len(), &[0xF0, 0xF5, 0x05], Protection::Predefined);
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].start, 14);
        assert_eq!(intervals[0].end, 14 + 50 - 1);
        assert_eq!(intervals[0].sensitivity, 0xF5);
        assert_eq!(intervals[0].code.map(RsCode::n), Some(128));
        assert_eq!(intervals[1].start, 64);
        assert_eq!(intervals[1].end, raw.len() - 1);
        assert_eq!(intervals[1].code.map(RsCode::n), Some(37));
    }

    #[test]
    fn test_uep_without_sop_uses_mean() {
        let (raw, tile) = tile_with_packets(&[]);
        let mut raw = raw;
        raw.extend_from_slice(&[0x22; 100]);
        let tile = TilePart { end: raw.len(), ..tile };
        let intervals = plan_intervals(&raw, &tile, raw.len(), &[30, 0], Protection::Predefined);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].sensitivity, 15);
        assert_eq!(intervals[0].code.map(RsCode::n), Some(37));
        assert_eq!(intervals[0].len(), 100);
    }

    #[test]
    fn test_long_span_is_split() {
        let mut raw = vec![0xFF, 0x90, 0x00, 0x0A, 0, 0, 0, 0, 0, 0, 0, 1, 0xFF, 0x93];
        let limit = max_interval_len(RsCode::data(192).unwrap());
        raw.extend(std::iter::repeat_n(0x01, limit + 10));
        let tile = TilePart {
            start: 0,
            tile_index: 0,
            psot: 0,
            data_start: 14,
            end: raw.len(),
        };
        let code = RsCode::data(192).unwrap();
        let intervals = plan_intervals(&raw, &tile, raw.len(), &[], Protection::Rs(code));
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].len(), limit);
        assert_eq!(intervals[1].len(), 10);
        assert_eq!(intervals[1].start, intervals[0].end + 1);
    }

    #[test]
    fn test_crc_and_none() {
        let (raw, tile) = tile_with_packets(&[10]);
        let crc = plan_intervals(&raw, &tile, raw.len(), &[0], Protection::Crc32);
        assert_eq!(crc.len(), 1);
        assert_eq!(crc[0].code, None);
        assert!(plan_intervals(&raw, &tile, raw.len(), &[0], Protection::None).is_empty());
    }

    #[test]
    fn test_sens_create() {
        let mut raw = crate::codestream::tests::sample_codestream(2, 0);
        // Insert three SOP-delimited packets into the second tile-part.
        let stream = Codestream::parse(&raw).unwrap();
        let at = stream.tiles[1].data_start;
        let packets: Vec<u8> = (0..3u8)
            .flat_map(|i| [0xFF, 0x91, 0x00, 0x04, 0x00, i, 0x10, 0x20])
            .collect();
        let tail = raw.split_off(at);
        raw.extend(packets);
        raw.extend(tail);
        let psot_at = stream.tiles[1].start + 6;
        raw[psot_at..psot_at + 4].copy_from_slice(&(14u32 + 24).to_be_bytes());

        let sens = PacketSensitivity::from_codestream(&raw).unwrap();
        assert_eq!(sens.tile_packets, vec![DEFAULT_PACKETS_PER_TILE, 3]);
        assert_eq!(sens.tile(0)[0], 30);
        assert_eq!(sens.tile(0)[30], 0);
        assert_eq!(sens.tile(1), &[2, 1, 0]);
    }
}
