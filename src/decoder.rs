//! JPWL decoder: corrects a received codestream with its EPBs, then strips every
//! JPWL segment so that a part-1 decoder can read the result.
//!
//! Decoding never fails as a whole. Only an unrecoverable main header drops the
//! frame; a damaged tile-part is kept with its uncorrected data or skipped as a
//! bad block, and decoding carries on with the next one.

use tracing::{debug, trace, warn};

use crate::codec::{Codec, Crc16, ReedSolomon, RsCode};
use crate::codestream::{PSOT_OFFSET, SOT_LN, SOT_SEGMENT_LEN};
use crate::error::JpwlError;
use crate::interleave;
use crate::marker_code::{MarkerCode, is_marker_at, marker_at};
use crate::protection::{EPB_HEADER_LEN, EpbPlacement, checksum};
use crate::segment::{Epb, Epc, Esd, MAX_MARKERS, Marker, MarkerSegment, MarkerTable};
use crate::stream::{StreamReader, read_u16_be, read_u32_be, split_disjoint, write_u32_be};

/// Shortest span searched for a tile-part: the pre-data codeword of its first EPB.
pub const TILE_MINLENGTH: usize = 80;

/// Main header pre-data lengths for one, two and three components.
const MAIN_HEADER_HYPOTHESES: [usize; 3] = [58, 61, 64];

/// Counters accumulated over every frame decoded by one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Symbols fixed by Reed-Solomon decoding.
    pub corrected_rs_bytes: u64,
    /// Bytes left uncorrected: whole header codewords, and the data bytes of
    /// post-data blocks.
    pub uncorrected_rs_bytes: u64,
    pub fully_restored: u32,
    pub partially_restored: u32,
    pub not_restored: u32,
    pub not_jpwl: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeStatus {
    #[default]
    Restored,
    /// No JPWL main header: the input was copied through unchanged.
    NotJpwl,
    /// The main header could not be corrected; no output.
    HeaderUnrecoverable(JpwlError),
}

/// Result of decoding one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub status: DecodeStatus,
    pub corrected_length: usize,
    pub tiles_fully_restored: usize,
    pub tiles_partially_restored: usize,
    /// Tile-parts whose header could not be corrected. Their bytes count as bad blocks.
    pub tiles_lost: usize,
    pub bad_block_bytes: usize,
    pub main_header_len: usize,
    /// Received bytes of restored and partially restored tile-parts.
    pub tile_bytes: usize,
    /// Received bytes considered: `DL` capped at the input length.
    pub stream_len: usize,
}

impl DecodeReport {
    /// True when every byte was accounted for by a corrected segment.
    pub fn is_clean(&self) -> bool {
        self.status == DecodeStatus::Restored
            && self.tiles_partially_restored == 0
            && self.tiles_lost == 0
            && self.bad_block_bytes == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainHeaderStatus {
    Protected,
    NotJpwl,
}

/// Corrected tile-part header.
#[derive(Debug, Clone)]
pub struct TileHeader {
    pub start: usize,
    pub psot: u32,
    /// One past the last byte of the tile-part.
    pub end: usize,
    /// EPBs with the offset of their marker, in stream order.
    pub epbs: Vec<(usize, Epb)>,
    pub esds: Vec<(usize, Esd)>,
}

impl TileHeader {
    /// Bytes taken by the JPWL segments of this header.
    pub fn segments_len(&self) -> usize {
        self.epbs.iter().map(|(_, epb)| epb.segment_len()).sum::<usize>()
            + self.esds.iter().map(|(_, esd)| esd.segment_len()).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOutcome {
    Restored,
    /// Header intact, `failed` data intervals left uncorrected.
    Partial { failed: usize },
    /// Header unrecoverable; the tile-part becomes a bad block.
    Lost,
}

pub struct DecoderSession<C: Codec = ReedSolomon> {
    codec: C,
    markers: MarkerTable,
    stats: RecoveryStats,
    report: DecodeReport,
    /// Bytes of the input that belong to the protected stream.
    stream_len: usize,
    /// Assembly stops here once the marker table overflowed.
    keep_until: usize,
}

impl DecoderSession {
    pub fn new() -> Self {
        Self::with_codec(ReedSolomon::new())
    }
}

impl Default for DecoderSession {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> DecoderSession<C> {
    pub fn with_codec(codec: C) -> Self {
        Self {
            codec,
            markers: MarkerTable::new(),
            stats: RecoveryStats::default(),
            report: DecodeReport::default(),
            stream_len: 0,
            keep_until: 0,
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RecoveryStats::default();
    }

    /// Segments found in the last decoded frame, in stream order.
    pub fn markers(&self) -> &MarkerTable {
        &self.markers
    }

    /// Corrects `input` in place and writes the unprotected codestream to `out`.
    pub fn decode(&mut self, input: &mut [u8], out: &mut Vec<u8>) -> DecodeReport {
        self.markers.clear();
        self.report = DecodeReport::default();
        self.stream_len = input.len();
        self.keep_until = input.len();
        out.clear();

        if input.is_empty() {
            return self.unrecoverable(JpwlError::EmptyInput, 0);
        }
        match self.correct_main_header(input) {
            Ok(MainHeaderStatus::Protected) => {}
            Ok(MainHeaderStatus::NotJpwl) => {
                out.extend_from_slice(input);
                self.stats.not_jpwl += 1;
                self.report.status = DecodeStatus::NotJpwl;
                self.report.corrected_length = out.len();
                self.report.stream_len = input.len();
                debug!(len = input.len(), "not a JPWL codestream, copied through");
                return self.report;
            }
            Err(error) => return self.unrecoverable(error, input.len()),
        }

        let mut next = self.detect_tile(input, self.report.main_header_len);
        while let Some(start) = next {
            next = match self.correct_tile_header(input, start) {
                Ok(header) => {
                    let outcome = self.correct_tile_data(input, &header);
                    self.advance(input, start, Some(&header), outcome)
                }
                Err(error) => {
                    warn!(start, %error, "tile-part header unrecoverable");
                    self.advance(input, start, None, TileOutcome::Lost)
                }
            };
        }

        self.assemble_output(input, out);
        self.report.corrected_length = out.len();
        if self.report.is_clean() {
            self.stats.fully_restored += 1;
        } else {
            self.stats.partially_restored += 1;
        }
        debug!(
            output = out.len(),
            restored = self.report.tiles_fully_restored,
            partial = self.report.tiles_partially_restored,
            lost = self.report.tiles_lost,
            bad_block_bytes = self.report.bad_block_bytes,
            "frame decoded"
        );
        self.report
    }

    /// Drops the frame: all `input_len` received bytes count as one bad block.
    fn unrecoverable(&mut self, error: JpwlError, input_len: usize) -> DecodeReport {
        warn!(%error, "main header unrecoverable, frame dropped");
        self.markers.clear();
        self.stats.not_restored += 1;
        self.report = DecodeReport {
            status: DecodeStatus::HeaderUnrecoverable(error),
            bad_block_bytes: input_len,
            stream_len: input_len,
            ..DecodeReport::default()
        };
        self.report
    }

    /// Corrects the main header, checks the EPC and undoes interleaving.
    pub fn correct_main_header(&mut self, input: &mut [u8]) -> Result<MainHeaderStatus, JpwlError> {
        let Some(pre_len) = self.locate_main_epb(input) else {
            if is_plain_codestream(input) {
                return Ok(MainHeaderStatus::NotJpwl);
            }
            self.stats.uncorrected_rs_bytes += RsCode::MAIN_HEADER.n() as u64;
            return Err(JpwlError::Uncorrectable);
        };

        let position = pre_len - EPB_HEADER_LEN;
        let mut epb = Epb::parse(
            &mut StreamReader::at(input, position + 2),
            EpbPlacement::MainHeader,
            pre_len,
        )?;
        epb.post_start = position + epb.segment_len();
        self.correct_post_data(input, &epb, position)?;

        let epc_position = epb.post_start;
        if !is_marker_at(input, epc_position, MarkerCode::ErrorProtectionCapability) {
            return Err(JpwlError::MissingEpc);
        }
        let epc = Epc::parse(&mut StreamReader::at(input, epc_position + 2))?;
        let epc_len = epc.segment_len();
        let segment = input
            .get(epc_position..epc_position + epc_len)
            .ok_or(JpwlError::Truncated)?;
        if Crc16::new().update(&segment[..4]).update(&segment[6..]).finish() != epc.crc {
            return Err(JpwlError::CrcMismatch);
        }

        let header_len = epb.post_start + epb.post_len;
        let total_len = epc.total_len as usize;
        if total_len < header_len {
            return Err(JpwlError::MalformedCodestream);
        }
        self.stream_len = total_len.min(input.len());

        let mut markers = vec![
            Marker::new(MarkerSegment::Epb(epb), None, position),
            Marker::new(MarkerSegment::Epc(epc.clone()), None, epc_position),
        ];
        let mut position = epc_position + epc_len;
        while position < header_len && is_marker_at(input, position, MarkerCode::ErrorSensitivityDescriptor) {
            let esd = Esd::parse(&mut StreamReader::at(input, position + 2))?;
            let len = esd.segment_len();
            markers.push(Marker::new(MarkerSegment::Esd(esd), None, position));
            position += len;
        }
        self.markers.extend(markers)?;
        self.report.main_header_len = header_len;
        self.report.stream_len = self.stream_len;

        if let Some(map) = &epc.epb_map {
            let restored = interleave::deinterleave_tail(input, header_len, total_len - header_len);
            trace!(restored, entries = map.len(), "stream deinterleaved");
            if let Err(error) = interleave::restore_epb_map(&mut input[..self.stream_len], map, self.stream_len) {
                warn!(%error, "EPB map not applied");
            }
        }
        debug!(pre_len, header_len, stream_len = self.stream_len, "main header corrected");
        Ok(MainHeaderStatus::Protected)
    }

    /// Tries each pre-data hypothesis on a scratch copy and keeps the first that
    /// decodes to SOC, SIZ and an EPB marker at the matching offsets.
    fn locate_main_epb(&mut self, input: &mut [u8]) -> Option<usize> {
        let code = RsCode::MAIN_HEADER;
        for pre_len in MAIN_HEADER_HYPOTHESES {
            let parity_end = pre_len + code.parity_len();
            if input.len() < parity_end {
                continue;
            }
            let mut data = input[..pre_len].to_vec();
            let mut parity = input[pre_len..parity_end].to_vec();
            let Ok(corrected) = self.codec.decode(code, &mut data, &mut parity) else {
                continue;
            };
            if !main_pre_data_is_consistent(&data) {
                continue;
            }
            input[..pre_len].copy_from_slice(&data);
            input[pre_len..parity_end].copy_from_slice(&parity);
            self.stats.corrected_rs_bytes += corrected as u64;
            trace!(pre_len, corrected, "main header pre-data accepted");
            return Some(pre_len);
        }
        None
    }

    /// Finds the tile-part at `offset`, searching forward when it is damaged.
    /// Skipped bytes become a bad block. `None` once the stream is exhausted.
    pub fn detect_tile(&mut self, input: &mut [u8], offset: usize) -> Option<usize> {
        let remaining = self.stream_len.saturating_sub(offset);
        if remaining <= 2 {
            return None;
        }
        if remaining > TILE_MINLENGTH {
            if self.try_tile_at(input, offset) {
                return Some(offset);
            }
            self.stats.uncorrected_rs_bytes += RsCode::TILE_HEADER.n() as u64;
            warn!(offset, "tile-part not found, resynchronizing");
            let mut candidate = offset + 1;
            while self.stream_len - candidate > TILE_MINLENGTH {
                if is_marker_at(input, candidate, MarkerCode::StartOfTile) && self.try_tile_at(input, candidate) {
                    debug!(offset, candidate, "resynchronized");
                    self.record_bad_block(offset, candidate - offset);
                    return Some(candidate);
                }
                candidate += 1;
            }
        }
        let span = remaining - self.trailer_len(input);
        self.record_bad_block(offset, span);
        None
    }

    /// Trial-decodes the first EPB's pre-data at `position`, committing only a
    /// result that reads as SOT plus EPB.
    fn try_tile_at(&mut self, input: &mut [u8], position: usize) -> bool {
        let code = RsCode::TILE_HEADER;
        let end = position + code.n();
        if end > self.stream_len {
            return false;
        }
        let mut data = input[position..position + code.k()].to_vec();
        let mut parity = input[position + code.k()..end].to_vec();
        match self.codec.decode(code, &mut data, &mut parity) {
            Ok(corrected) if tile_pre_data_is_consistent(&data) => {
                input[position..position + code.k()].copy_from_slice(&data);
                input[position + code.k()..end].copy_from_slice(&parity);
                self.stats.corrected_rs_bytes += corrected as u64;
                true
            }
            _ => false,
        }
    }

    fn trailer_len(&self, input: &[u8]) -> usize {
        match self.stream_len.checked_sub(2) {
            Some(eoc) if is_marker_at(input, eoc, MarkerCode::EndOfCodestream) => 2,
            _ => 0,
        }
    }

    fn record_bad_block(&mut self, position: usize, len: usize) {
        if len == 0 {
            return;
        }
        trace!(position, len, "bad block");
        self.report.bad_block_bytes += len;
        if self.markers.push(Marker::bad_block(None, position, len)).is_err() {
            self.keep_until = self.keep_until.min(position);
        }
    }

    /// End of the tile-part starting at `start` according to its `Psot`.
    fn tile_end(&self, input: &[u8], start: usize) -> usize {
        match read_u32_be(input, start + PSOT_OFFSET) {
            Ok(0) | Err(_) => (self.stream_len - self.trailer_len(input)).max(start + 1),
            Ok(psot) => start.saturating_add(psot as usize).min(self.stream_len),
        }
    }

    /// Walks the EPB chain of the tile-part header at `start`, correcting each
    /// subsequent EPB header, and collects the ESDs that follow it.
    pub fn correct_tile_header(&mut self, input: &mut [u8], start: usize) -> Result<TileHeader, JpwlError> {
        let psot = read_u32_be(input, start + PSOT_OFFSET)?;
        let end = self.tile_end(input, start);
        let mut position = start + SOT_SEGMENT_LEN;
        let mut epb = Epb::parse(
            &mut StreamReader::at(input, position + 2),
            EpbPlacement::TileHeader,
            SOT_SEGMENT_LEN + EPB_HEADER_LEN,
        )?;

        let mut epbs = Vec::new();
        loop {
            let last = epb.last;
            let len = epb.segment_len();
            epbs.push((position, epb));
            position += len;
            if position > end {
                return Err(JpwlError::MissingEpb);
            }
            if last {
                break;
            }
            if epbs.len() >= MAX_MARKERS || position + RsCode::EPB_HEADER.n() > end {
                return Err(JpwlError::MissingEpb);
            }
            self.correct_epb_header(input, position)?;
            epb = Epb::parse(
                &mut StreamReader::at(input, position + 2),
                EpbPlacement::Subsequent,
                EPB_HEADER_LEN,
            )?;
        }

        // Post-data runs on from the end of the chain: the header tail for the
        // first EPB, then one data interval per further EPB.
        let mut post_start = position;
        for (_, epb) in &mut epbs {
            epb.post_start = post_start;
            post_start += epb.post_len;
        }

        let mut esds = Vec::new();
        while position < end && is_marker_at(input, position, MarkerCode::ErrorSensitivityDescriptor) {
            let esd = Esd::parse(&mut StreamReader::at(input, position + 2))?;
            let len = esd.segment_len();
            esds.push((position, esd));
            position += len;
        }
        if position > end {
            return Err(JpwlError::MalformedCodestream);
        }

        trace!(start, epbs = epbs.len(), esds = esds.len(), "tile-part header corrected");
        Ok(TileHeader {
            start,
            psot,
            end,
            epbs,
            esds,
        })
    }

    fn correct_epb_header(&mut self, input: &mut [u8], position: usize) -> Result<(), JpwlError> {
        let code = RsCode::EPB_HEADER;
        let end = position + code.n();
        if end > self.stream_len {
            return Err(JpwlError::Truncated);
        }
        let mut data = input[position..position + code.k()].to_vec();
        let mut parity = input[position + code.k()..end].to_vec();
        match self.codec.decode(code, &mut data, &mut parity) {
            Ok(corrected) if is_marker_at(&data, 0, MarkerCode::ErrorProtectionBlock) => {
                input[position..position + code.k()].copy_from_slice(&data);
                input[position + code.k()..end].copy_from_slice(&parity);
                self.stats.corrected_rs_bytes += corrected as u64;
                Ok(())
            }
            Ok(_) => Err(JpwlError::MissingEpb),
            Err(error) => {
                self.stats.uncorrected_rs_bytes += code.n() as u64;
                Err(error)
            }
        }
    }

    /// Applies the EPB's post-data method. Every block is attempted; the first
    /// failure is returned.
    fn correct_post_data(&mut self, input: &mut [u8], epb: &Epb, position: usize) -> Result<(), JpwlError> {
        let stream = &mut input[..self.stream_len];
        let mut result = Ok(());
        match epb.post_code() {
            Some(code) => {
                for (block, check) in epb.post_windows(position) {
                    let (data, parity) = match split_disjoint(stream, block, check) {
                        Ok(windows) => windows,
                        Err(_) => {
                            result = result.and(Err(JpwlError::Truncated));
                            continue;
                        }
                    };
                    match self.codec.decode(code, data, parity) {
                        Ok(corrected) => self.stats.corrected_rs_bytes += corrected as u64,
                        Err(error) => {
                            self.stats.uncorrected_rs_bytes += data.len() as u64;
                            result = result.and(Err(error));
                        }
                    }
                }
            }
            None => {
                for (block, check) in epb.post_windows(position) {
                    let (Some(span), Some(stored)) = (stream.get(block), stream.get(check)) else {
                        result = result.and(Err(JpwlError::Truncated));
                        continue;
                    };
                    if checksum(epb.protection, span).as_deref() != Some(stored) {
                        result = result.and(Err(JpwlError::CrcMismatch));
                    }
                }
            }
        }
        result
    }

    /// Corrects the header tail, then every data interval in order.
    pub fn correct_tile_data(&mut self, input: &mut [u8], header: &TileHeader) -> TileOutcome {
        let Some(((position, first), data)) = header.epbs.split_first() else {
            return TileOutcome::Lost;
        };
        if let Err(error) = self.correct_post_data(input, first, *position) {
            warn!(start = header.start, %error, "tile-part header tail unrecoverable");
            return TileOutcome::Lost;
        }
        let mut failed = 0;
        for (position, epb) in data {
            if let Err(error) = self.correct_post_data(input, epb, *position) {
                trace!(position, %error, "data interval left uncorrected");
                failed += 1;
            }
        }
        if failed == 0 {
            TileOutcome::Restored
        } else {
            debug!(start = header.start, failed, "tile-part partially restored");
            TileOutcome::Partial { failed }
        }
    }

    /// Records the tile's segments for removal, shrinks its `Psot` accordingly and
    /// moves on to the next tile-part.
    pub fn advance(
        &mut self,
        input: &mut [u8],
        start: usize,
        header: Option<&TileHeader>,
        outcome: TileOutcome,
    ) -> Option<usize> {
        let end = header.map_or_else(|| self.tile_end(input, start), |h| h.end);
        let span = end - start;
        let tile_num = u16::try_from(
            self.report.tiles_fully_restored + self.report.tiles_partially_restored + self.report.tiles_lost,
        )
        .ok();

        match (header, outcome) {
            (Some(header), TileOutcome::Restored | TileOutcome::Partial { .. }) => {
                let markers: Vec<Marker> = header
                    .epbs
                    .iter()
                    .map(|(position, epb)| Marker::new(MarkerSegment::Epb(epb.clone()), tile_num, *position))
                    .chain(
                        header
                            .esds
                            .iter()
                            .map(|(position, esd)| Marker::new(MarkerSegment::Esd(esd.clone()), tile_num, *position)),
                    )
                    .collect();
                if self.markers.extend(markers).is_err() {
                    warn!(start, "marker table full, dropping the rest of the stream");
                    self.keep_until = start;
                    self.report.bad_block_bytes += self.stream_len - self.trailer_len(input) - start;
                    return None;
                }
                if header.psot != 0 {
                    let psot = (span - header.segments_len()) as u32;
                    if let Err(error) = write_u32_be(input, start + PSOT_OFFSET, psot) {
                        warn!(start, %error, "Psot not updated");
                    }
                }
                if outcome == TileOutcome::Restored {
                    self.report.tiles_fully_restored += 1;
                } else {
                    self.report.tiles_partially_restored += 1;
                }
                self.report.tile_bytes += span;
            }
            _ => {
                self.report.tiles_lost += 1;
                self.record_bad_block(start, span);
            }
        }
        self.detect_tile(input, end)
    }

    /// Copies everything but the recorded segments and bad blocks, and appends an
    /// EOC if the stream lost it.
    pub fn assemble_output(&self, input: &[u8], out: &mut Vec<u8>) {
        out.clear();
        let limit = self.keep_until.min(self.stream_len).min(input.len());
        let mut source = 0;
        for marker in self.markers.iter() {
            if marker.pos_in >= limit {
                break;
            }
            if marker.pos_in >= source {
                out.extend_from_slice(&input[source..marker.pos_in]);
            }
            source = (marker.pos_in + marker.len).min(limit);
        }
        if source < limit {
            out.extend_from_slice(&input[source..limit]);
        }
        let eoc = MarkerCode::EndOfCodestream.to_be_bytes();
        if !out.ends_with(&eoc) {
            out.extend_from_slice(&eoc);
        }
    }
}

fn main_pre_data_is_consistent(data: &[u8]) -> bool {
    let pre_len = data.len();
    is_marker_at(data, 0, MarkerCode::StartOfCodestream)
        && is_marker_at(data, 2, MarkerCode::ImageAndTileSize)
        && read_u16_be(data, 4).is_ok_and(|lsiz| usize::from(lsiz) + 4 + EPB_HEADER_LEN == pre_len)
        && is_marker_at(data, pre_len - EPB_HEADER_LEN, MarkerCode::ErrorProtectionBlock)
}

fn tile_pre_data_is_consistent(data: &[u8]) -> bool {
    is_marker_at(data, 0, MarkerCode::StartOfTile)
        && read_u16_be(data, 2) == Ok(SOT_LN as u16)
        && is_marker_at(data, SOT_SEGMENT_LEN, MarkerCode::ErrorProtectionBlock)
}

/// SOC, SIZ and then an ordinary main header segment.
fn is_plain_codestream(input: &[u8]) -> bool {
    if !is_marker_at(input, 0, MarkerCode::StartOfCodestream) || !is_marker_at(input, 2, MarkerCode::ImageAndTileSize) {
        return false;
    }
    read_u16_be(input, 4)
        .ok()
        .and_then(|lsiz| marker_at(input, 4 + usize::from(lsiz)))
        .is_some_and(MarkerCode::is_main_header_segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::Codestream;
    use crate::codestream::tests::sample_codestream;
    use crate::encoder::EncoderSession;
    use crate::params::{EncoderParams, EsdMode};

    fn protect(raw: &[u8], params: EncoderParams) -> Vec<u8> {
        let mut out = Vec::new();
        EncoderSession::new(params).protect(raw, &mut out).unwrap();
        out
    }

    fn decode(session: &mut DecoderSession, input: &[u8]) -> (Vec<u8>, DecodeReport) {
        let mut input = input.to_vec();
        let mut out = Vec::new();
        let report = session.decode(&mut input, &mut out);
        (out, report)
    }

    #[test]
    fn test_round_trip() {
        let raw = sample_codestream(3, 120);
        let protected = protect(&raw, EncoderParams::default());
        let mut session = DecoderSession::new();
        let (out, report) = decode(&mut session, &protected);
        assert_eq!(out, raw);
        assert_eq!(report.status, DecodeStatus::Restored);
        assert_eq!(report.tiles_fully_restored, 3);
        assert_eq!(report.bad_block_bytes, 0);
        assert_eq!(report.corrected_length, raw.len());
        assert_eq!(session.stats().fully_restored, 1);
        assert_eq!(session.stats().corrected_rs_bytes, 0);
    }

    #[test]
    fn test_round_trip_with_esd() {
        let raw = sample_codestream(2, 70);
        for mode in [EsdMode::Packets, EsdMode::ByteRange] {
            let protected = protect(&raw, EncoderParams::default().with_esd(mode));
            let (out, report) = decode(&mut DecoderSession::new(), &protected);
            assert_eq!(out, raw);
            assert!(report.is_clean());
        }
    }

    #[test]
    fn test_corrects_scattered_errors() {
        let raw = sample_codestream(2, 200);
        let mut protected = protect(&raw, EncoderParams::default());
        for position in (10..protected.len()).step_by(97) {
            protected[position] ^= 0x5A;
        }
        let mut session = DecoderSession::new();
        let (out, report) = decode(&mut session, &protected);
        assert_eq!(out, raw);
        assert!(report.is_clean());
        assert!(session.stats().corrected_rs_bytes > 0);
    }

    #[test]
    fn test_not_jpwl_passes_through() {
        let raw = sample_codestream(1, 30);
        let mut session = DecoderSession::new();
        let (out, report) = decode(&mut session, &raw);
        assert_eq!(report.status, DecodeStatus::NotJpwl);
        assert_eq!(out, raw);
        assert_eq!(session.stats().not_jpwl, 1);
    }

    #[test]
    fn test_garbage_is_unrecoverable() {
        let garbage: Vec<u8> = (0..400u32).map(|i| (i * 37 % 251) as u8).collect();
        let mut session = DecoderSession::new();
        let (out, report) = decode(&mut session, &garbage);
        assert_eq!(report.status, DecodeStatus::HeaderUnrecoverable(JpwlError::Uncorrectable));
        assert!(out.is_empty());
        assert_eq!(session.stats().not_restored, 1);
        assert_eq!(report.bad_block_bytes, garbage.len());
        assert_eq!(report.stream_len, garbage.len());
        assert_eq!(report.main_header_len + report.tile_bytes, 0);

        let (_, report) = decode(&mut session, &[]);
        assert_eq!(report.status, DecodeStatus::HeaderUnrecoverable(JpwlError::EmptyInput));
        assert_eq!(report.bad_block_bytes, 0);
        assert_eq!(session.stats().not_restored, 2);
        session.reset_stats();
        assert_eq!(session.stats(), RecoveryStats::default());
    }

    #[test]
    fn test_epc_crc_mismatch() {
        let raw = sample_codestream(1, 30);
        let params = EncoderParams::from_levels(0, 1, 64, false).unwrap();
        let mut protected = protect(&raw, params);
        // Unprotected post-data: corrupt DL inside the EPC.
        let lepb = usize::from(read_u16_be(&protected, 47).unwrap());
        let epc = 45 + 2 + lepb;
        protected[epc + 9] ^= 0x01;
        let (_, report) = decode(&mut DecoderSession::new(), &protected);
        assert_eq!(report.status, DecodeStatus::HeaderUnrecoverable(JpwlError::CrcMismatch));
    }

    #[test]
    fn test_crc_protected_data_mismatch() {
        let raw = sample_codestream(2, 100);
        let params = EncoderParams::from_levels(1, 1, 16, false).unwrap();
        let mut protected = protect(&raw, params);
        let last = protected.len() - 10;
        protected[last] ^= 0xFF;
        let (out, report) = decode(&mut DecoderSession::new(), &protected);
        assert_eq!(report.tiles_fully_restored, 1);
        assert_eq!(report.tiles_partially_restored, 1);
        assert_eq!(report.bad_block_bytes, 0);
        assert_eq!(out.len(), raw.len());
    }

    #[test]
    fn test_lost_tile_and_resync() {
        let raw = sample_codestream(3, 150);
        let mut protected = protect(&raw, EncoderParams::default());
        let mut session = DecoderSession::new();
        let (_, clean) = decode(&mut session, &protected);
        let second = session
            .markers()
            .iter()
            .find(|m| m.tile_num == Some(1))
            .map(|m| m.pos_in - SOT_SEGMENT_LEN)
            .unwrap();
        assert_eq!(clean.tiles_fully_restored, 3);

        // Wipe the whole first EPB codeword of the second tile-part.
        for byte in &mut protected[second..second + 80] {
            *byte = 0;
        }
        let (out, report) = decode(&mut session, &protected);
        assert_eq!(report.status, DecodeStatus::Restored);
        assert_eq!(report.tiles_fully_restored, 2);
        assert!(report.bad_block_bytes > 0);
        assert_eq!(
            report.main_header_len + report.tile_bytes + report.bad_block_bytes + 2,
            report.stream_len
        );
        let tile_len = 14 + 150;
        assert_eq!(out.len(), raw.len() - tile_len);
        assert!(out.ends_with(&[0xFF, 0xD9]));
        assert_eq!(session.stats().partially_restored, 1);
    }

    #[test]
    fn test_truncated_stream_gets_eoc() {
        let raw = sample_codestream(2, 300);
        let protected = protect(&raw, EncoderParams::default());
        let cut = &protected[..protected.len() - 200];
        let (out, report) = decode(&mut DecoderSession::new(), cut);
        assert_eq!(report.status, DecodeStatus::Restored);
        assert!(out.ends_with(&[0xFF, 0xD9]));
        assert_eq!(report.stream_len, cut.len());
        assert!(report.tiles_fully_restored >= 1);
    }

    #[test]
    fn test_interleaved_round_trip() {
        let raw = sample_codestream(2, 250);
        let protected = protect(&raw, EncoderParams::default().with_interleave(true));
        let (out, report) = decode(&mut DecoderSession::new(), &protected);
        assert!(report.is_clean());
        assert_eq!(out.len(), raw.len());
        assert_eq!(out, raw);
    }

    #[test]
    fn test_uncorrectable_short_block_counts_data_bytes() {
        let raw = sample_codestream(1, 40);
        let mut protected = protect(&raw, EncoderParams::default());
        let mut session = DecoderSession::new();
        decode(&mut session, &protected);
        let (block, check) = session
            .markers()
            .iter()
            .filter(|m| m.tile_num == Some(0))
            .filter_map(|m| m.as_epb().map(|epb| epb.post_windows(m.pos_in)))
            .last()
            .and_then(|windows| windows.last().cloned())
            .unwrap();
        assert!(block.len() < 32);

        for (i, position) in block.clone().chain(check).enumerate() {
            protected[position] ^= (i as u8).wrapping_mul(73) | 1;
        }
        let before = session.stats().uncorrected_rs_bytes;
        let (_, report) = decode(&mut session, &protected);
        assert_eq!(report.tiles_partially_restored, 1);
        assert_eq!(session.stats().uncorrected_rs_bytes - before, block.len() as u64);
    }

    #[test]
    fn test_full_marker_table_drops_rest_of_stream() {
        let raw = sample_codestream(2, 60);
        let mut input = protect(&raw, EncoderParams::default());
        let len = input.len();
        let mut session = DecoderSession::new();
        session.stream_len = len;
        session.keep_until = len;
        assert_eq!(session.correct_main_header(&mut input), Ok(MainHeaderStatus::Protected));

        let start = session.report.main_header_len;
        while session.markers.len() < MAX_MARKERS {
            session.markers.push(Marker::bad_block(None, start, 0)).unwrap();
        }
        let header = session.correct_tile_header(&mut input, start).unwrap();
        let outcome = session.correct_tile_data(&mut input, &header);
        assert_eq!(outcome, TileOutcome::Restored);
        assert_eq!(session.advance(&mut input, start, Some(&header), outcome), None);
        assert_eq!(session.keep_until, start);
        assert_eq!(session.report.tiles_fully_restored, 0);
        assert_eq!(session.report.bad_block_bytes, len - 2 - start);
        assert_eq!(
            session.report.main_header_len + session.report.tile_bytes + session.report.bad_block_bytes + 2,
            session.report.stream_len
        );

        let mut out = Vec::new();
        session.assemble_output(&input, &mut out);
        let main_header_end = Codestream::parse(&raw).unwrap().main_header_end;
        assert_eq!(&out[..main_header_end], &raw[..main_header_end]);
        assert_eq!(&out[main_header_end..], &[0xFF, 0xD9]);
    }
}
