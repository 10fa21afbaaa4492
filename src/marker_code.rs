use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const MARKER_START_BYTE: u8 = 0xFF;

/// Second byte of the JPEG 2000 part 1 and JPWL (part 11) markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MarkerCode {
    /// SOC: Start of codestream.
    StartOfCodestream = 0x4F,
    /// SIZ: Image and tile size.
    ImageAndTileSize = 0x51,
    /// COD: Coding style default.
    CodingStyleDefault = 0x52,
    /// COC: Coding style component.
    CodingStyleComponent = 0x53,
    /// TLM: Tile-part lengths.
    TilePartLengths = 0x55,
    /// PLM: Packet length, main header.
    PacketLengthMain = 0x57,
    /// PLT: Packet length, tile-part header.
    PacketLengthTile = 0x58,
    /// QCD: Quantization default.
    QuantizationDefault = 0x5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0x5D,
    /// RGN: Region of interest.
    RegionOfInterest = 0x5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0x5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0x60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTile = 0x61,
    /// CRG: Component registration.
    ComponentRegistration = 0x63,
    /// COM: Comment.
    Comment = 0x64,

    /// EPB: Error protection block.
    ErrorProtectionBlock = 0x66,
    /// ESD: Error sensitivity descriptor.
    ErrorSensitivityDescriptor = 0x67,
    /// EPC: Error protection capability.
    ErrorProtectionCapability = 0x68,
    /// RED: Residual error descriptor.
    ResidualErrorDescriptor = 0x69,

    /// SOT: Start of tile-part.
    StartOfTile = 0x90,
    /// SOP: Start of packet.
    StartOfPacket = 0x91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0x92,
    /// SOD: Start of data.
    StartOfData = 0x93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xD9,
}

impl MarkerCode {
    /// Two-byte marker as it appears on the wire.
    pub const fn to_be_bytes(self) -> [u8; 2] {
        [MARKER_START_BYTE, self as u8]
    }

    /// Markers that may legally follow SIZ in a plain part 1 main header.
    pub fn is_main_header_segment(self) -> bool {
        matches!(
            self,
            MarkerCode::CodingStyleDefault
                | MarkerCode::CodingStyleComponent
                | MarkerCode::QuantizationDefault
                | MarkerCode::QuantizationComponent
                | MarkerCode::RegionOfInterest
                | MarkerCode::ProgressionOrderChange
                | MarkerCode::PackedPacketHeadersMain
                | MarkerCode::TilePartLengths
                | MarkerCode::PacketLengthMain
                | MarkerCode::ComponentRegistration
                | MarkerCode::Comment
        )
    }

    /// Markers without a length field.
    pub fn is_delimiter(self) -> bool {
        matches!(
            self,
            MarkerCode::StartOfCodestream
                | MarkerCode::StartOfData
                | MarkerCode::EndOfCodestream
                | MarkerCode::EndOfPacketHeader
        )
    }
}

/// Returns the marker starting at `position`, if the two bytes form a known one.
pub fn marker_at(buffer: &[u8], position: usize) -> Option<MarkerCode> {
    match buffer.get(position..position.checked_add(2)?) {
        Some([MARKER_START_BYTE, code]) => MarkerCode::try_from(*code).ok(),
        _ => None,
    }
}

/// True when `buffer[position..]` starts with `marker`.
pub fn is_marker_at(buffer: &[u8], position: usize, marker: MarkerCode) -> bool {
    marker_at(buffer, position) == Some(marker)
}
