pub mod adaptive;
pub mod codec;
pub mod codestream;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod interleave;
pub mod marker_code;
pub mod params;
pub mod protection;
pub mod segment;
pub mod sensitivity;
pub mod stream;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use adaptive::AdaptiveController;
pub use codec::{Codec, ReedSolomon, RsCode};
pub use decoder::{DecodeReport, DecodeStatus, DecoderSession, RecoveryStats};
pub use encoder::{EncodeSummary, EncoderSession};
pub use error::{ErrorKind, JpwlError};
pub use params::{EncoderParams, EsdMode, set_default_params};
pub use protection::Protection;
pub use sensitivity::PacketSensitivity;
