//! Protection methods of EPB post-data and their `Pepb` wire encoding.

use crate::codec::{Crc16, RsCode, crc32};
use crate::error::JpwlError;

/// Length of the EPB marker segment fields `Lepb Depb LDPepb Pepb`.
pub const EPB_LN: usize = 11;
/// Marker plus fields: the span covered by the pre-data code of subsequent EPBs.
pub const EPB_HEADER_LEN: usize = EPB_LN + 2;
pub const MAX_EPBSIZE: usize = 65535;

/// Codes selected by UEP, indexed by `sensitivity >> 4`.
pub const UEP_CODES: [RsCode; 16] = [
    RsCode::data_const(37),
    RsCode::data_const(38),
    RsCode::data_const(40),
    RsCode::data_const(43),
    RsCode::data_const(45),
    RsCode::data_const(48),
    RsCode::data_const(51),
    RsCode::data_const(53),
    RsCode::data_const(56),
    RsCode::data_const(64),
    RsCode::data_const(75),
    RsCode::data_const(80),
    RsCode::data_const(85),
    RsCode::data_const(96),
    RsCode::data_const(112),
    RsCode::data_const(128),
];

pub fn uep_code(sensitivity: u8) -> RsCode {
    UEP_CODES[usize::from(sensitivity >> 4)]
}

/// Largest data span one RS(n,32) EPB can protect without overflowing `Lepb`.
pub fn max_interval_len(code: RsCode) -> usize {
    (MAX_EPBSIZE - EPB_LN - RsCode::EPB_HEADER.parity_len()) / code.parity_len() * code.k()
}

/// Where an EPB sits; fixes its pre-data code and what "predefined" means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpbPlacement {
    /// First EPB of the main header, right after SIZ.
    MainHeader,
    /// First EPB of a tile-part header, right after SOT.
    TileHeader,
    /// Any further EPB.
    Subsequent,
}

impl EpbPlacement {
    pub const fn pre_code(self) -> RsCode {
        match self {
            EpbPlacement::MainHeader => RsCode::MAIN_HEADER,
            EpbPlacement::TileHeader => RsCode::TILE_HEADER,
            EpbPlacement::Subsequent => RsCode::EPB_HEADER,
        }
    }

    pub const fn pre_parity_len(self) -> usize {
        self.pre_code().parity_len()
    }
}

/// Post-data protection method of an EPB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    None,
    /// The placement's own code; for tile data this selects UEP.
    Predefined,
    Crc16,
    Crc32,
    Rs(RsCode),
}

impl Protection {
    /// Numeric level convention: 0 none, 1 predefined, 16 CRC-16, 32 CRC-32,
    /// otherwise the `n` of an RS(n,32) catalog code.
    pub fn from_level(level: u8) -> Result<Self, JpwlError> {
        match level {
            0 => Ok(Protection::None),
            1 => Ok(Protection::Predefined),
            16 => Ok(Protection::Crc16),
            32 => Ok(Protection::Crc32),
            n => RsCode::data(n)
                .map(Protection::Rs)
                .map_err(|_| JpwlError::InvalidParameter),
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Protection::None => 0,
            Protection::Predefined => 1,
            Protection::Crc16 => 16,
            Protection::Crc32 => 32,
            Protection::Rs(code) => code.n() as u8,
        }
    }

    pub fn pepb(self) -> u32 {
        match self {
            Protection::None => 0xFFFF_FFFF,
            Protection::Predefined => 0x0000_0000,
            Protection::Crc16 => 0x1000_0000,
            Protection::Crc32 => 0x1000_0001,
            Protection::Rs(code) => 0x2000_0000 | ((code.n() as u32) << 8) | code.k() as u32,
        }
    }

    pub fn from_pepb(pepb: u32) -> Result<Self, JpwlError> {
        match pepb {
            0xFFFF_FFFF => Ok(Protection::None),
            0x0000_0000 => Ok(Protection::Predefined),
            0x1000_0000 => Ok(Protection::Crc16),
            0x1000_0001 => Ok(Protection::Crc32),
            v if v & 0xFFFF_00FF == 0x2000_0000 | u32::from(RsCode::DATA_K) => {
                RsCode::data(((v >> 8) & 0xFF) as u8)
                    .map(Protection::Rs)
                    .map_err(|_| JpwlError::UnknownProtectionMethod)
            }
            _ => Err(JpwlError::UnknownProtectionMethod),
        }
    }

    /// Reed-Solomon code applied to post-data at `placement`, if any.
    pub fn rs_code(self, placement: EpbPlacement) -> Option<RsCode> {
        match self {
            Protection::Predefined => Some(placement.pre_code()),
            Protection::Rs(code) => Some(code),
            _ => None,
        }
    }

    /// Parity bytes needed to protect `post_len` bytes at `placement`.
    pub fn parity_len(self, placement: EpbPlacement, post_len: usize) -> usize {
        match self {
            Protection::None => 0,
            Protection::Crc16 => 2,
            Protection::Crc32 => 4,
            Protection::Predefined | Protection::Rs(_) => self
                .rs_code(placement)
                .map_or(0, |code| code.parity_for(post_len)),
        }
    }
}

/// Checksum of a CRC protected span, big-endian as stored after the EPB header.
pub fn checksum(protection: Protection, span: &[u8]) -> Option<Vec<u8>> {
    match protection {
        Protection::Crc16 => Some(Crc16::new().update(span).finish().to_be_bytes().to_vec()),
        Protection::Crc32 => Some(crc32(span).to_be_bytes().to_vec()),
        _ => None,
    }
}
