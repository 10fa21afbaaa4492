//! JPWL encoder: inserts EPB, EPC and ESD marker segments into a raw part-1
//! codestream and fills in their parity.
//!
//! An [`EncoderSession`] runs the steps in a fixed order, each one building on the
//! state left by the previous:
//!
//! 1. [`init`](EncoderSession::init) parses the raw codestream.
//! 2. [`plan_main_header`](EncoderSession::plan_main_header) and
//!    [`plan_tiles`](EncoderSession::plan_tiles) decide every segment and its size.
//! 3. [`layout`](EncoderSession::layout) assigns output offsets.
//! 4. [`copy_payload`](EncoderSession::copy_payload),
//!    [`write_markers`](EncoderSession::write_markers) and
//!    [`fill_parity`](EncoderSession::fill_parity) produce the protected bytes.
//! 5. [`finalize`](EncoderSession::finalize) seals the EPC and interleaves.
//!
//! [`EncoderSession::encode`] runs all of them.

use tracing::{debug, trace};

use crate::codec::{Codec, Crc16, ReedSolomon, RsCode};
use crate::codestream::{Codestream, PSOT_OFFSET, SOT_SEGMENT_LEN, TilePart};
use crate::error::JpwlError;
use crate::interleave;
use crate::params::{EncoderParams, EsdMode};
use crate::protection::{EPB_HEADER_LEN, EpbPlacement, MAX_EPBSIZE, Protection, checksum};
use crate::segment::{Epb, EpbMapEntry, Epc, Esd, EsdBody, EsdRange, Marker, MarkerSegment, MarkerTable};
use crate::sensitivity::{MAX_INTERVALS, PacketSensitivity, SensitivityInterval, plan_intervals};
use crate::stream::{split_disjoint, write_u32_be};

/// Outcome of one encode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Bytes written, interleaving padding included.
    pub output_len: usize,
    /// Offset of the first SOT (or EOC) in the protected stream.
    pub main_header_len: usize,
    pub tile_count: usize,
    pub epb_count: usize,
}

#[derive(Debug)]
struct TilePlan {
    part: TilePart,
    /// Data intervals, tile relative, in output coordinates.
    intervals: Vec<SensitivityInterval>,
    /// Index of the tile's first marker. EPBs come first, then ESDs.
    first_marker: usize,
    epb_count: usize,
    inserted: usize,
    out_start: usize,
}

pub struct EncoderSession<C: Codec = ReedSolomon> {
    params: EncoderParams,
    codec: C,
    stream: Option<Codestream>,
    markers: MarkerTable,
    tiles: Vec<TilePlan>,
    interleave: bool,
    interval_count: usize,
    esd_count: u16,
    main_epb: usize,
    epc: usize,
    main_esd: Option<usize>,
    main_header_len: usize,
    protected_len: usize,
}

impl EncoderSession {
    pub fn new(params: EncoderParams) -> Self {
        Self::with_codec(params, ReedSolomon::new())
    }
}

impl<C: Codec> EncoderSession<C> {
    pub fn with_codec(params: EncoderParams, codec: C) -> Self {
        Self {
            params,
            codec,
            stream: None,
            markers: MarkerTable::new(),
            tiles: Vec::new(),
            interleave: false,
            interval_count: 0,
            esd_count: 0,
            main_epb: 0,
            epc: 0,
            main_esd: None,
            main_header_len: 0,
            protected_len: 0,
        }
    }

    pub fn params(&self) -> &EncoderParams {
        &self.params
    }

    /// Replaces the parameters used by the next [`init`](Self::init).
    pub fn set_params(&mut self, params: EncoderParams) {
        self.params = params;
    }

    pub fn markers(&self) -> &MarkerTable {
        &self.markers
    }

    /// Whether the planned stream is interleaved. Always false for a stream without tiles.
    pub fn interleaving(&self) -> bool {
        self.interleave
    }

    /// Protects `raw` using packet sensitivities derived from its SOP markers.
    pub fn protect(&mut self, raw: &[u8], out: &mut Vec<u8>) -> Result<EncodeSummary, JpwlError> {
        let sensitivity = PacketSensitivity::from_codestream(raw)?;
        self.encode(raw, &sensitivity, out)
    }

    /// Runs every step and leaves the protected stream in `out`.
    /// On error `out` is left empty.
    pub fn encode(
        &mut self,
        raw: &[u8],
        sensitivity: &PacketSensitivity,
        out: &mut Vec<u8>,
    ) -> Result<EncodeSummary, JpwlError> {
        let result = self.run(raw, sensitivity, out);
        if result.is_err() {
            out.clear();
        }
        result
    }

    fn run(&mut self, raw: &[u8], sensitivity: &PacketSensitivity, out: &mut Vec<u8>) -> Result<EncodeSummary, JpwlError> {
        self.init(raw)?;
        self.plan_main_header()?;
        self.plan_tiles(raw, sensitivity)?;
        let len = self.layout()?;
        out.clear();
        out.resize(len, 0);
        self.copy_payload(raw, out)?;
        self.write_markers(out)?;
        self.fill_parity(out)?;
        let output_len = self.finalize(out)?;

        let summary = EncodeSummary {
            output_len,
            main_header_len: self.main_header_len,
            tile_count: self.tiles.len(),
            epb_count: self.markers.iter().filter(|m| m.as_epb().is_some()).count(),
        };
        debug!(
            input = raw.len(),
            output = summary.output_len,
            tiles = summary.tile_count,
            epbs = summary.epb_count,
            interleave = self.interleave,
            "codestream protected"
        );
        Ok(summary)
    }

    /// Parses `raw` and clears the state of any previous call.
    pub fn init(&mut self, raw: &[u8]) -> Result<(), JpwlError> {
        self.params.validate()?;
        self.markers.clear();
        self.tiles.clear();
        self.interval_count = 0;
        self.esd_count = 0;
        self.main_esd = None;
        self.stream = None;

        let stream = Codestream::parse(raw)?;
        // Without tiles there is nothing to place in the EPB map.
        self.interleave = self.params.interleave && !stream.is_empty();
        self.stream = Some(stream);
        Ok(())
    }

    fn parsed(&self) -> Result<&Codestream, JpwlError> {
        self.stream.as_ref().ok_or(JpwlError::MalformedCodestream)
    }

    fn next_esd(&mut self) -> u16 {
        let component = self.esd_count;
        self.esd_count = self.esd_count.wrapping_add(1);
        component
    }

    /// Plans the main header EPB right after SIZ, the EPC and the optional ESD.
    pub fn plan_main_header(&mut self) -> Result<(), JpwlError> {
        let stream = self.parsed()?;
        let (siz_end, main_header_end) = (stream.siz_end, stream.main_header_end);

        let pre_len = siz_end + EPB_HEADER_LEN;
        if pre_len > RsCode::MAIN_HEADER.k() {
            return Err(JpwlError::HeaderTooLarge);
        }

        let mut capability_flags = Epc::EPB_PRESENT;
        if self.params.esd.is_some() {
            capability_flags |= Epc::ESD_PRESENT;
        }
        if self.interleave {
            capability_flags |= Epc::INFORMATIVE_PRESENT;
        }
        let epc = Epc {
            capability_flags,
            ..Epc::default()
        };
        let esd = if self.params.esd.is_some() {
            let range = EsdRange {
                start: 0,
                end: 0,
                sensitivity: 0xFF,
            };
            Some(Esd::byte_ranges(self.next_esd(), vec![range]))
        } else {
            None
        };

        let post_len = (main_header_end - siz_end) + epc.segment_len() + esd.as_ref().map_or(0, Esd::segment_len);
        let epb = Epb::new(EpbPlacement::MainHeader, 0, true, self.params.main_header, pre_len, post_len)?;

        self.markers.reserve(3)?;
        self.main_epb = self.markers.push(Marker::new(MarkerSegment::Epb(epb), None, siz_end))?;
        self.epc = self.markers.push(Marker::new(MarkerSegment::Epc(epc), None, siz_end))?;
        if let Some(esd) = esd {
            self.main_esd = Some(self.markers.push(Marker::new(MarkerSegment::Esd(esd), None, siz_end))?);
        }
        trace!(pre_len, post_len, "main header EPB planned");
        Ok(())
    }

    /// Plans the EPB chain (and ESDs) of every tile-part header.
    pub fn plan_tiles(&mut self, raw: &[u8], sensitivity: &PacketSensitivity) -> Result<(), JpwlError> {
        let stream = self.parsed()?;
        let parts: Vec<(TilePart, usize)> = stream
            .tiles
            .iter()
            .enumerate()
            .map(|(i, part)| (*part, stream.data_end(i)))
            .collect();
        for (index, (part, data_end)) in parts.into_iter().enumerate() {
            self.plan_tile(raw, index, part, data_end, sensitivity.tile(index))?;
        }
        Ok(())
    }

    fn plan_tile(
        &mut self,
        raw: &[u8],
        index: usize,
        part: TilePart,
        data_end: usize,
        sensitivity: &[u8],
    ) -> Result<(), JpwlError> {
        let params = self.params;
        let tile_num = Some(u16::try_from(index).map_err(|_| JpwlError::TooManyTiles)?);
        let intervals = plan_intervals(raw, &part, data_end, sensitivity, params.data);
        self.interval_count += intervals.len();
        if self.interval_count > MAX_INTERVALS {
            return Err(JpwlError::IntervalTableFull);
        }

        let placeholder = EsdRange {
            start: 0,
            end: 0,
            sensitivity: 0xFF,
        };
        let mut esds = Vec::new();
        match params.esd {
            Some(EsdMode::Packets) => {
                esds.push(Esd::byte_ranges(self.next_esd(), vec![placeholder]));
                esds.push(Esd::packets(self.next_esd(), sensitivity.to_vec()));
            }
            Some(EsdMode::ByteRange) => {
                let ranges = vec![placeholder; intervals.len() + 1];
                esds.push(Esd::byte_ranges(self.next_esd(), ranges));
            }
            None => {}
        }
        if esds.iter().any(|esd| esd.segment_len() - 2 > MAX_EPBSIZE) {
            return Err(JpwlError::HeaderTooLarge);
        }
        let esd_len: usize = esds.iter().map(Esd::segment_len).sum();

        let header_tail = part.data_start - (part.start + SOT_SEGMENT_LEN);
        let mut post_len = header_tail + esd_len;
        if params.tile_header == Protection::None && params.data == Protection::None {
            post_len += data_end - part.data_start;
        }
        let mut epbs = vec![Epb::new(
            EpbPlacement::TileHeader,
            0,
            intervals.is_empty(),
            params.tile_header,
            SOT_SEGMENT_LEN + EPB_HEADER_LEN,
            post_len,
        )?];
        for (i, interval) in intervals.iter().enumerate() {
            let protection = interval.code.map_or(params.data, Protection::Rs);
            epbs.push(Epb::new(
                EpbPlacement::Subsequent,
                ((i + 1) & 0x3F) as u8,
                i + 1 == intervals.len(),
                protection,
                EPB_HEADER_LEN,
                interval.len(),
            )?);
        }

        let epb_count = epbs.len();
        let esd_count = esds.len();
        self.markers.reserve(epb_count + esd_count)?;
        let inserted = epbs.iter().map(Epb::segment_len).sum::<usize>() + esd_len;
        let intervals: Vec<SensitivityInterval> = intervals.into_iter().map(|iv| iv.shifted(inserted)).collect();

        // Byte ranges are relative to the tile start in the protected stream.
        let header_range = EsdRange {
            start: 0,
            end: (part.data_start - 1 - part.start + inserted) as u32,
            sensitivity: 0xFF,
        };
        for esd in &mut esds {
            if let EsdBody::ByteRanges(ranges) = &mut esd.body {
                ranges[0] = header_range;
                for (range, interval) in ranges[1..].iter_mut().zip(&intervals) {
                    *range = EsdRange {
                        start: interval.start as u32,
                        end: interval.end as u32,
                        sensitivity: interval.sensitivity,
                    };
                }
            }
        }

        let pos_in = part.start + SOT_SEGMENT_LEN;
        let mut first_marker = None;
        for segment in epbs
            .into_iter()
            .map(MarkerSegment::Epb)
            .chain(esds.into_iter().map(MarkerSegment::Esd))
        {
            let at = self.markers.push(Marker::new(segment, tile_num, pos_in))?;
            first_marker.get_or_insert(at);
        }

        trace!(tile = index, epbs = epb_count, esds = esd_count, inserted, "tile planned");
        self.tiles.push(TilePlan {
            part,
            intervals,
            first_marker: first_marker.unwrap_or(self.markers.len()),
            epb_count,
            inserted,
            out_start: part.start,
        });
        Ok(())
    }

    /// Assigns output offsets to all planned segments and returns the protected
    /// length (before interleaving).
    pub fn layout(&mut self) -> Result<usize, JpwlError> {
        let stream = self.parsed()?;
        let (siz_end, main_header_end, stream_len) = (stream.siz_end, stream.main_header_end, stream.len());

        if self.interleave {
            let count: usize = self.tiles.iter().map(|t| t.epb_count).sum();
            if let Some(Marker {
                segment: MarkerSegment::Epc(epc),
                ..
            }) = self.markers.get_mut(self.epc)
            {
                epc.epb_map = Some(vec![EpbMapEntry::default(); count]);
                if epc.segment_len() - 2 > MAX_EPBSIZE {
                    return Err(JpwlError::HeaderTooLarge);
                }
            }
            if let Some(marker) = self.markers.get_mut(self.epc) {
                marker.update_len();
            }
        }

        // The main EPB protects the EPC and ESD that follow it.
        let main_segments: usize = self
            .markers
            .iter()
            .enumerate()
            .filter(|(i, m)| *i != self.main_epb && m.tile_num.is_none())
            .map(|(_, m)| m.len)
            .sum();
        let post_len = main_header_end - siz_end + main_segments;
        if let Some(marker) = self.markers.get_mut(self.main_epb) {
            if let MarkerSegment::Epb(epb) = &marker.segment {
                let resized = Epb::new(
                    EpbPlacement::MainHeader,
                    epb.index,
                    epb.last,
                    epb.protection,
                    epb.pre_len,
                    post_len,
                )?;
                marker.segment = MarkerSegment::Epb(resized);
                marker.update_len();
            }
        }

        let mut shift = 0;
        for marker in self.markers.iter_mut() {
            marker.pos_out = marker.pos_in + shift;
            shift += marker.len;
        }
        self.protected_len = stream_len + shift;

        let main_inserted: usize = self.markers.iter().filter(|m| m.tile_num.is_none()).map(|m| m.len).sum();
        self.main_header_len = main_header_end + main_inserted;

        // Post-data offsets.
        if let Some(marker) = self.markers.get_mut(self.main_epb) {
            let start = marker.pos_out + marker.len;
            if let MarkerSegment::Epb(epb) = &mut marker.segment {
                epb.post_start = start;
            }
        }
        let mut before = main_inserted;
        for tile in &mut self.tiles {
            tile.out_start = tile.part.start + before;
            before += tile.inserted;
            let chain: usize = (tile.first_marker..tile.first_marker + tile.epb_count)
                .filter_map(|i| self.markers.get(i))
                .map(|m| m.len)
                .sum();
            for j in 0..tile.epb_count {
                let Some(marker) = self.markers.get_mut(tile.first_marker + j) else {
                    continue;
                };
                let start = if j == 0 {
                    marker.pos_out + chain
                } else {
                    tile.out_start + tile.intervals[j - 1].start
                };
                if let MarkerSegment::Epb(epb) = &mut marker.segment {
                    epb.post_start = start;
                }
            }
        }

        if let Some(Marker {
            segment: MarkerSegment::Esd(esd),
            ..
        }) = self.main_esd.and_then(|i| self.markers.get_mut(i))
        {
            if let EsdBody::ByteRanges(ranges) = &mut esd.body {
                ranges[0].end = (self.main_header_len - 1) as u32;
            }
        }
        if let Some(Marker {
            segment: MarkerSegment::Epc(epc),
            ..
        }) = self.markers.get_mut(self.epc)
        {
            epc.total_len = u32::try_from(self.protected_len).map_err(|_| JpwlError::HeaderTooLarge)?;
        }

        debug!(
            markers = self.markers.len(),
            main_header_len = self.main_header_len,
            protected_len = self.protected_len,
            "layout complete"
        );
        Ok(self.protected_len)
    }

    /// Copies the original bytes around the space reserved for segments.
    pub fn copy_payload(&self, raw: &[u8], out: &mut [u8]) -> Result<(), JpwlError> {
        let stream_len = self.parsed()?.len();
        if raw.len() < stream_len {
            return Err(JpwlError::Truncated);
        }
        if out.len() < self.protected_len {
            return Err(JpwlError::DestinationTooSmall);
        }
        let mut source = 0;
        let mut shift = 0;
        for marker in self.markers.iter() {
            out[source + shift..marker.pos_in + shift].copy_from_slice(&raw[source..marker.pos_in]);
            source = marker.pos_in;
            shift += marker.len;
        }
        out[source + shift..stream_len + shift].copy_from_slice(&raw[source..stream_len]);
        Ok(())
    }

    /// Serializes every segment, fills the EPB map and rewrites `Psot`.
    pub fn write_markers(&mut self, out: &mut [u8]) -> Result<(), JpwlError> {
        if self.interleave {
            let entries: Vec<EpbMapEntry> = self
                .tiles
                .iter()
                .flat_map(|tile| tile.first_marker..tile.first_marker + tile.epb_count)
                .filter_map(|i| self.markers.get(i))
                .filter_map(|m| {
                    m.as_epb().map(|epb| EpbMapEntry {
                        pepb: epb.pepb(),
                        lepb: epb.lepb,
                        offset: m.pos_out as u32,
                    })
                })
                .collect();
            if let Some(Marker {
                segment: MarkerSegment::Epc(epc),
                ..
            }) = self.markers.get_mut(self.epc)
            {
                epc.epb_map = Some(entries);
            }
        }

        for marker in self.markers.iter() {
            marker.write(out)?;
        }

        for tile in &self.tiles {
            // Psot zero keeps meaning "up to the EOC".
            if tile.part.psot != 0 {
                let psot = u32::try_from(tile.part.len() + tile.inserted).map_err(|_| JpwlError::HeaderTooLarge)?;
                write_u32_be(out, tile.out_start + PSOT_OFFSET, psot)?;
            }
        }
        Ok(())
    }

    /// Computes pre-data and post-data parity of every EPB.
    pub fn fill_parity(&mut self, out: &mut [u8]) -> Result<(), JpwlError> {
        let Self { markers, codec, .. } = self;
        for marker in markers.iter() {
            if let Some(epb) = marker.as_epb() {
                protect_epb(codec, out, epb, marker.pos_out)?;
            }
        }
        Ok(())
    }

    /// Seals the EPC CRC, refreshes the main header parity that covers it and
    /// interleaves. Returns the final stream length.
    pub fn finalize(&mut self, out: &mut Vec<u8>) -> Result<usize, JpwlError> {
        let (epc_pos, epc_len) = match self.markers.get(self.epc) {
            Some(marker) => (marker.pos_out, marker.len),
            None => return Err(JpwlError::MissingEpc),
        };
        let segment = out.get(epc_pos..epc_pos + epc_len).ok_or(JpwlError::DestinationTooSmall)?;
        let crc = Crc16::new().update(&segment[..4]).update(&segment[6..]).finish();
        out[epc_pos + 4..epc_pos + 6].copy_from_slice(&crc.to_be_bytes());
        if let Some(Marker {
            segment: MarkerSegment::Epc(epc),
            ..
        }) = self.markers.get_mut(self.epc)
        {
            epc.crc = crc;
        }

        if let Some(marker) = self.markers.get(self.main_epb) {
            if let Some(epb) = marker.as_epb() {
                protect_epb(&mut self.codec, out, epb, marker.pos_out)?;
            }
        }

        if self.interleave {
            interleave::interleave_tail(out, self.main_header_len);
        }
        Ok(out.len())
    }
}

/// Writes the parity of one EPB located at `position` in `out`.
fn protect_epb<C: Codec>(codec: &mut C, out: &mut [u8], epb: &Epb, position: usize) -> Result<(), JpwlError> {
    let (pre, pre_parity) = epb.pre_windows(position);
    let (data, parity) = split_disjoint(out, pre, pre_parity)?;
    codec.encode(epb.placement.pre_code(), data, parity)?;

    match epb.post_code() {
        Some(code) => {
            for (block, check) in epb.post_windows(position) {
                let (data, parity) = split_disjoint(out, block, check)?;
                codec.encode(code, data, parity)?;
            }
        }
        None => {
            for (block, check) in epb.post_windows(position) {
                let span = out.get(block).ok_or(JpwlError::DestinationTooSmall)?;
                if let Some(sum) = checksum(epb.protection, span) {
                    out.get_mut(check)
                        .ok_or(JpwlError::DestinationTooSmall)?
                        .copy_from_slice(&sum);
                }
            }
        }
    }
    Ok(())
}
