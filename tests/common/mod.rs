//! Synthetic JPEG 2000 part 1 codestreams for integration tests.

#![allow(dead_code)]

use jpwl_rs::{DecodeReport, DecoderSession, EncodeSummary, EncoderParams, EncoderSession};

/// SOC, SIZ, COD, QCD, tiles of SOP-delimited packets, EOC.
#[derive(Debug, Clone)]
pub struct CodestreamBuilder {
    components: u16,
    tiles: usize,
    packets: usize,
    packet_len: usize,
    sop: bool,
    psot_zero_last: bool,
}

impl Default for CodestreamBuilder {
    fn default() -> Self {
        Self {
            components: 1,
            tiles: 2,
            packets: 4,
            packet_len: 60,
            sop: true,
            psot_zero_last: false,
        }
    }
}

impl CodestreamBuilder {
    pub fn components(mut self, components: u16) -> Self {
        self.components = components;
        self
    }

    pub fn tiles(mut self, tiles: usize) -> Self {
        self.tiles = tiles;
        self
    }

    pub fn packets(mut self, packets: usize, packet_len: usize) -> Self {
        self.packets = packets;
        self.packet_len = packet_len;
        self
    }

    pub fn without_sop(mut self) -> Self {
        self.sop = false;
        self
    }

    /// Writes `Psot = 0` for the last tile-part.
    pub fn psot_zero_last(mut self) -> Self {
        self.psot_zero_last = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut raw = vec![0xFF, 0x4F];
        self.write_siz(&mut raw);
        // COD: Scod, progression, 1 layer, no MCT, 5 levels, 64x64 blocks, 5-3 wavelet
        raw.extend_from_slice(&[0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x04, 0x04, 0x00, 0x01]);
        // QCD: no quantization, 2 guard bits, one exponent per subband
        raw.extend_from_slice(&[0xFF, 0x5C, 0x00, 0x13, 0x40]);
        raw.extend((0..16u8).map(|b| 0x40 + b));

        for t in 0..self.tiles {
            let body = self.tile_body(t);
            let psot = if self.psot_zero_last && t + 1 == self.tiles {
                0
            } else {
                (14 + body.len()) as u32
            };
            raw.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
            raw.extend_from_slice(&(t as u16).to_be_bytes());
            raw.extend_from_slice(&psot.to_be_bytes());
            raw.extend_from_slice(&[0x00, 0x01]); // TPsot TNsot
            raw.extend_from_slice(&[0xFF, 0x93]);
            raw.extend_from_slice(&body);
        }
        raw.extend_from_slice(&[0xFF, 0xD9]);
        raw
    }

    fn write_siz(&self, raw: &mut Vec<u8>) {
        let lsiz = 38 + 3 * self.components;
        raw.extend_from_slice(&[0xFF, 0x51]);
        raw.extend_from_slice(&lsiz.to_be_bytes());
        raw.extend_from_slice(&[0x00, 0x00]); // Rsiz
        raw.extend_from_slice(&128u32.to_be_bytes()); // Xsiz
        raw.extend_from_slice(&128u32.to_be_bytes()); // Ysiz
        raw.extend_from_slice(&[0; 8]); // XOsiz YOsiz
        raw.extend_from_slice(&64u32.to_be_bytes()); // XTsiz
        raw.extend_from_slice(&64u32.to_be_bytes()); // YTsiz
        raw.extend_from_slice(&[0; 8]); // XTOsiz YTOsiz
        raw.extend_from_slice(&self.components.to_be_bytes());
        for _ in 0..self.components {
            raw.extend_from_slice(&[0x07, 0x01, 0x01]); // Ssiz XRsiz YRsiz
        }
    }

    fn tile_body(&self, tile: usize) -> Vec<u8> {
        let mut body = Vec::new();
        for p in 0..self.packets {
            if self.sop {
                body.extend_from_slice(&[0xFF, 0x91, 0x00, 0x04]);
                body.extend_from_slice(&(p as u16).to_be_bytes());
            }
            // Packet bytes stay below 0x80 so no marker appears by accident.
            body.extend((0..self.packet_len).map(|i| ((i * 7 + p * 13 + tile * 31) % 0x7F) as u8));
        }
        body
    }
}

pub fn protect(raw: &[u8], params: EncoderParams) -> (Vec<u8>, EncodeSummary) {
    let mut out = Vec::new();
    let summary = EncoderSession::new(params)
        .protect(raw, &mut out)
        .expect("encode failed");
    (out, summary)
}

pub fn decode(session: &mut DecoderSession, received: &[u8]) -> (Vec<u8>, DecodeReport) {
    let mut input = received.to_vec();
    let mut out = Vec::new();
    let report = session.decode(&mut input, &mut out);
    (out, report)
}

/// Deterministic xorshift generator for corruption patterns.
pub struct Noise(u64);

impl Noise {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    pub fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }

    /// Nonzero mask, so a flipped byte always changes.
    pub fn mask(&mut self) -> u8 {
        (self.next() % 255) as u8 + 1
    }
}
