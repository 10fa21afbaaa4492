use crate::codec::RsCode;
use crate::error::JpwlError;
use crate::protection::Protection;

/// Layout of the ESD segments emitted in tile-part headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsdMode {
    /// A byte-range ESD for the tile header plus a packet ESD with one value per packet.
    Packets,
    /// A single byte-range ESD listing the tile header and every data interval.
    ByteRange,
}

/// Encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    /// Post-data protection of the main header EPB.
    pub main_header: Protection,
    /// Post-data protection of each tile-part header EPB.
    pub tile_header: Protection,
    /// Tile data protection; [`Protection::Predefined`] selects UEP.
    pub data: Protection,
    pub interleave: bool,
    pub esd: Option<EsdMode>,
}

impl Default for EncoderParams {
    fn default() -> Self {
        set_default_params()
    }
}

/// Predefined header protection, RS(64,32) data protection, no interleaving, no ESD.
pub fn set_default_params() -> EncoderParams {
    EncoderParams {
        main_header: Protection::Predefined,
        tile_header: Protection::Predefined,
        data: Protection::Rs(RsCode::data_const(64)),
        interleave: false,
        esd: None,
    }
}

impl EncoderParams {
    /// Builds parameters from numeric levels (see [`Protection::from_level`]).
    pub fn from_levels(main_header: u8, tile_header: u8, data: u8, interleave: bool) -> Result<Self, JpwlError> {
        let params = Self {
            main_header: Protection::from_level(main_header)?,
            tile_header: Protection::from_level(tile_header)?,
            data: Protection::from_level(data)?,
            interleave,
            esd: None,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_esd(mut self, mode: EsdMode) -> Self {
        self.esd = Some(mode);
        self
    }

    pub fn with_interleave(mut self, interleave: bool) -> Self {
        self.interleave = interleave;
        self
    }

    /// Configured RS codes must belong to the RS(n,32) family.
    pub fn validate(&self) -> Result<(), JpwlError> {
        for protection in [self.main_header, self.tile_header, self.data] {
            if let Protection::Rs(code) = protection {
                if RsCode::data(code.n() as u8) != Ok(code) {
                    return Err(JpwlError::InvalidParameter);
                }
            }
        }
        Ok(())
    }

    /// True when tile data is protected per packet sensitivity.
    pub fn uses_uep(&self) -> bool {
        self.data == Protection::Predefined
    }
}
