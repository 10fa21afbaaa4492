//! Burst-error interleaving of everything after the main header.
//!
//! The `L` protected bytes are written into an `Nc x Nr` grid (`Nc = ceil(sqrt L)`,
//! `Nr = ceil(L / Nc)`): byte `k = j*Nr + i` lands in cell `i*Nc + j`. Unused cells
//! stay zero. A burst hitting consecutive transmitted bytes is spread over `Nr`
//! bytes apart once transposed back.

use tracing::{trace, warn};

use crate::codestream::{PSOT_OFFSET, SOT_LN};
use crate::error::JpwlError;
use crate::marker_code::MarkerCode;
use crate::segment::EpbMapEntry;
use crate::stream::StreamWriter;

/// Grid dimensions `(Nc, Nr)` for `len` bytes.
pub fn grid(len: usize) -> (usize, usize) {
    if len == 0 {
        return (0, 0);
    }
    let mut columns = (len as f64).sqrt().ceil() as usize;
    while columns * columns < len {
        columns += 1;
    }
    while columns > 1 && (columns - 1) * (columns - 1) >= len {
        columns -= 1;
    }
    (columns, len.div_ceil(columns))
}

/// Forward transpose. The result holds `Nc * Nr` bytes.
pub fn interleave(data: &[u8]) -> Vec<u8> {
    let (columns, rows) = grid(data.len());
    let mut out = vec![0u8; columns * rows];
    for j in 0..columns {
        for i in 0..rows {
            let k = j * rows + i;
            if k >= data.len() {
                return out;
            }
            out[i * columns + j] = data[k];
        }
    }
    out
}

/// Inverse transpose of a grid built for `len` bytes. Cells missing from a
/// truncated `data` read as zero.
pub fn deinterleave(data: &[u8], len: usize) -> Vec<u8> {
    let (columns, rows) = grid(len);
    let mut out = vec![0u8; len];
    for j in 0..columns {
        for i in 0..rows {
            let k = j * rows + i;
            if k >= len {
                return out;
            }
            out[k] = data.get(i * columns + j).copied().unwrap_or(0);
        }
    }
    out
}

/// Interleaves `buffer[start..]` in place, growing the buffer to the full grid.
pub(crate) fn interleave_tail(buffer: &mut Vec<u8>, start: usize) {
    if start >= buffer.len() {
        return;
    }
    let transposed = interleave(&buffer[start..]);
    buffer.truncate(start);
    buffer.extend_from_slice(&transposed);
}

/// Undoes [`interleave_tail`] for a stream whose tail was `len` bytes long.
/// Returns the number of bytes restored, fewer than `len` when `buffer` was cut short.
/// Only the received bytes are materialized, whatever `len` claims.
pub(crate) fn deinterleave_tail(buffer: &mut [u8], start: usize, len: usize) -> usize {
    let Some(tail) = buffer.get_mut(start..) else {
        return 0;
    };
    let count = len.min(tail.len());
    let (columns, rows) = grid(len);
    let restored: Vec<u8> = (0..count)
        .map(|k| tail.get((k % rows) * columns + k / rows).copied().unwrap_or(0))
        .collect();
    tail[..count].copy_from_slice(&restored);
    count
}

/// Rewrites the EPB headers and SOT markers recorded in the EPB map, which may
/// have been hit by errors that the transpose scattered.
///
/// The map lists tile EPBs in stream order. An EPB that does not directly follow
/// the previous one opens a new tile whose SOT sits 12 bytes earlier; each tile's
/// `Psot` becomes the distance to the next SOT, and the last one runs to the EOC.
/// Returns the number of tiles found.
pub fn restore_epb_map(buffer: &mut [u8], map: &[EpbMapEntry], stream_len: usize) -> Result<usize, JpwlError> {
    let stream_len = stream_len.min(buffer.len());
    let mut expected = None;
    let mut previous_sot: Option<usize> = None;
    let mut tiles = 0;

    for entry in map {
        let offset = entry.offset as usize;
        let end = offset + usize::from(entry.lepb) + 2;
        if end > stream_len {
            warn!(offset, "EPB map entry beyond the stream");
            return Err(JpwlError::MalformedCodestream);
        }
        if expected != Some(offset) {
            let sot = offset
                .checked_sub(SOT_LN + 2)
                .ok_or(JpwlError::MalformedCodestream)?;
            if let Some(previous) = previous_sot {
                let psot = sot
                    .checked_sub(previous)
                    .and_then(|len| u32::try_from(len).ok())
                    .ok_or(JpwlError::MalformedCodestream)?;
                StreamWriter::at(buffer, previous + PSOT_OFFSET).write_u32(psot)?;
            }
            let mut writer = StreamWriter::at(buffer, sot);
            writer.write_marker(MarkerCode::StartOfTile)?;
            writer.write_u16(SOT_LN as u16)?;
            previous_sot = Some(sot);
            tiles += 1;
        }

        let mut writer = StreamWriter::at(buffer, offset);
        writer.write_marker(MarkerCode::ErrorProtectionBlock)?;
        writer.write_u16(entry.lepb)?;
        StreamWriter::at(buffer, offset + 9).write_u32(entry.pepb)?;
        expected = Some(end);
    }

    if let Some(previous) = previous_sot {
        // Everything up to the EOC.
        let psot = stream_len
            .checked_sub(previous + 2)
            .and_then(|len| u32::try_from(len).ok())
            .ok_or(JpwlError::MalformedCodestream)?;
        StreamWriter::at(buffer, previous + PSOT_OFFSET).write_u32(psot)?;
    }
    trace!(entries = map.len(), tiles, "EPB map restored");
    Ok(tiles)
}
