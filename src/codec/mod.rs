//! Protection codes used by error protection blocks.
//!
//! JPWL only ever uses a fixed catalog of shortened Reed-Solomon codes over GF(256):
//! three "predefined" codes whose choice depends on where the EPB sits, and the
//! RS(n,32) family used for configurable post-data protection. The [`Codec`] trait
//! is the single seam through which encoder and decoder reach the symbol math.

mod crc;
mod gf;
mod reed_solomon;

pub use crc::{Crc16, crc16, crc32};
pub use reed_solomon::ReedSolomon;

use crate::error::JpwlError;

/// Codeword lengths `n` of the RS(n,32) data protection family.
pub const DATA_CODE_LENGTHS: [u8; 20] = [
    37, 38, 40, 43, 45, 48, 51, 53, 56, 64, 75, 80, 85, 96, 112, 128, 144, 160, 176, 192,
];

/// A Reed-Solomon code from the JPWL catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RsCode {
    n: u8,
    k: u8,
}

impl RsCode {
    /// Pre-data code of the first EPB of the main header.
    pub const MAIN_HEADER: RsCode = RsCode { n: 160, k: 64 };
    /// Pre-data code of the first EPB of a tile-part header.
    pub const TILE_HEADER: RsCode = RsCode { n: 80, k: 25 };
    /// Pre-data code of every other EPB.
    pub const EPB_HEADER: RsCode = RsCode { n: 40, k: 13 };

    pub const DATA_K: u8 = 32;

    /// RS(n,32) data protection code.
    pub fn data(n: u8) -> Result<Self, JpwlError> {
        if DATA_CODE_LENGTHS.contains(&n) {
            Ok(Self { n, k: Self::DATA_K })
        } else {
            Err(JpwlError::UnsupportedCode)
        }
    }

    pub fn new(n: u8, k: u8) -> Result<Self, JpwlError> {
        let code = Self { n, k };
        if Self::catalog().any(|c| c == code) {
            Ok(code)
        } else {
            Err(JpwlError::UnsupportedCode)
        }
    }

    pub fn catalog() -> impl Iterator<Item = RsCode> {
        [Self::MAIN_HEADER, Self::TILE_HEADER, Self::EPB_HEADER]
            .into_iter()
            .chain(DATA_CODE_LENGTHS.iter().map(|&n| RsCode { n, k: Self::DATA_K }))
    }

    /// RS(n,32) without a catalog check, for compile-time tables.
    pub(crate) const fn data_const(n: u8) -> Self {
        Self { n, k: Self::DATA_K }
    }

    pub const fn n(self) -> usize {
        self.n as usize
    }

    pub const fn k(self) -> usize {
        self.k as usize
    }

    pub const fn parity_len(self) -> usize {
        (self.n - self.k) as usize
    }

    /// Number of symbol errors the code corrects.
    pub const fn capacity(self) -> usize {
        self.parity_len() / 2
    }

    /// Parity bytes needed to protect `len` bytes with this code.
    pub const fn parity_for(self, len: usize) -> usize {
        len.div_ceil(self.k()) * self.parity_len()
    }
}

/// Reed-Solomon encode/decode capability over the catalog codes.
///
/// `data` may be shorter than `k`: the missing trailing symbols are taken as zero
/// and never written back. `parity` must hold exactly `n - k` bytes.
pub trait Codec {
    fn encode(&mut self, code: RsCode, data: &[u8], parity: &mut [u8]) -> Result<(), JpwlError>;

    /// Corrects `data` and `parity` in place, returning the number of symbols fixed.
    /// On [`JpwlError::Uncorrectable`] both slices are left untouched.
    fn decode(&mut self, code: RsCode, data: &mut [u8], parity: &mut [u8]) -> Result<usize, JpwlError>;
}
