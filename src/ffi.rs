//! C Foreign Function Interface for jpwl-rs.
//!
//! Opaque encoder, decoder and adaptive controller handles. All buffers are owned
//! by the caller. Functions return `0` on success or the discriminant of the
//! [`JpwlError`] that stopped them.

use std::os::raw::{c_int, c_uchar};
use std::ptr;

use crate::adaptive::AdaptiveController;
use crate::codec::RsCode;
use crate::decoder::{DecodeStatus, DecoderSession};
use crate::encoder::EncoderSession;
use crate::error::JpwlError;
use crate::params::EncoderParams;
use crate::protection::Protection;
use crate::sensitivity::PacketSensitivity;

/// Opaque encoder handle.
#[repr(C)]
pub struct JpwlEncoder {
    _private: [u8; 0],
}

/// Opaque decoder handle.
#[repr(C)]
pub struct JpwlDecoder {
    _private: [u8; 0],
}

/// Opaque adaptive controller handle.
#[repr(C)]
pub struct JpwlAdaptive {
    _private: [u8; 0],
}

/// Outcome of one `jpwl_dec_run` call.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct JpwlDecodeResult {
    /// 0 restored, 1 passed through (not JPWL), 2 main header unrecoverable.
    pub status: c_int,
    pub corrected_length: usize,
    pub tiles_fully_restored: u32,
    pub tiles_partially_restored: u32,
    pub tiles_lost: u32,
    pub bad_block_bytes: usize,
}

/// Counters accumulated by a decoder handle.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct JpwlRecoveryStats {
    pub corrected_rs_bytes: u64,
    pub uncorrected_rs_bytes: u64,
    pub fully_restored: u32,
    pub partially_restored: u32,
    pub not_restored: u32,
    pub not_jpwl: u32,
}

const OK: c_int = 0;

fn error_code(error: JpwlError) -> c_int {
    error as c_int
}

fn count(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Create an encoder from numeric protection levels: 0 none, 1 predefined
/// (UEP for data), 16 CRC-16, 32 CRC-32, otherwise the `n` of RS(n,32).
///
/// Returns null when a level is invalid.
#[unsafe(no_mangle)]
pub extern "C" fn jpwl_enc_new(mh_level: u8, th_level: u8, data_level: u8, interleave: bool) -> *mut JpwlEncoder {
    match EncoderParams::from_levels(mh_level, th_level, data_level, interleave) {
        Ok(params) => Box::into_raw(Box::new(EncoderSession::new(params))) as *mut JpwlEncoder,
        Err(_) => ptr::null_mut(),
    }
}

/// Free an encoder handle.
///
/// # Safety
/// `encoder` must be null or a handle from `jpwl_enc_new` not freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jpwl_enc_free(encoder: *mut JpwlEncoder) {
    if !encoder.is_null() {
        let _ = unsafe { Box::from_raw(encoder as *mut EncoderSession) };
    }
}

/// Protect a part 1 codestream.
///
/// `tile_packets` (`tile_count` entries) and `sensitivity` (one byte per packet)
/// may be null, in which case sensitivities are derived from SOP markers.
///
/// # Safety
/// `encoder` must be a valid handle. `input` must point to `input_len` bytes and
/// `output` to `output_capacity` writable bytes. The array pointers, when not
/// null, must hold the stated number of elements. `output_len` and
/// `main_header_len` must be valid or null.
#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref, clippy::too_many_arguments)]
pub unsafe extern "C" fn jpwl_enc_run(
    encoder: *mut JpwlEncoder,
    input: *const c_uchar,
    input_len: usize,
    tile_packets: *const u16,
    tile_count: usize,
    sensitivity: *const c_uchar,
    sensitivity_len: usize,
    output: *mut c_uchar,
    output_capacity: usize,
    output_len: *mut usize,
    main_header_len: *mut usize,
) -> c_int {
    if encoder.is_null() || input.is_null() || output.is_null() {
        return error_code(JpwlError::InvalidParameter);
    }
    if input_len == 0 {
        return error_code(JpwlError::EmptyInput);
    }

    let session = unsafe { &mut *(encoder as *mut EncoderSession) };
    let raw = unsafe { std::slice::from_raw_parts(input, input_len) };
    let sensitivity = if tile_packets.is_null() || sensitivity.is_null() {
        match PacketSensitivity::from_codestream(raw) {
            Ok(derived) => derived,
            Err(e) => return error_code(e),
        }
    } else {
        PacketSensitivity {
            tile_packets: unsafe { std::slice::from_raw_parts(tile_packets, tile_count) }.to_vec(),
            sensitivity: unsafe { std::slice::from_raw_parts(sensitivity, sensitivity_len) }.to_vec(),
        }
    };

    let mut protected = Vec::new();
    let summary = match session.encode(raw, &sensitivity, &mut protected) {
        Ok(summary) => summary,
        Err(e) => return error_code(e),
    };
    if protected.len() > output_capacity {
        return error_code(JpwlError::DestinationTooSmall);
    }

    let output_slice = unsafe { std::slice::from_raw_parts_mut(output, output_capacity) };
    output_slice[..protected.len()].copy_from_slice(&protected);
    if !output_len.is_null() {
        unsafe { *output_len = summary.output_len };
    }
    if !main_header_len.is_null() {
        unsafe { *main_header_len = summary.main_header_len };
    }
    OK
}

/// Create a decoder with zeroed statistics.
#[unsafe(no_mangle)]
pub extern "C" fn jpwl_dec_new() -> *mut JpwlDecoder {
    Box::into_raw(Box::new(DecoderSession::new())) as *mut JpwlDecoder
}

/// Free a decoder handle.
///
/// # Safety
/// `decoder` must be null or a handle from `jpwl_dec_new` not freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jpwl_dec_free(decoder: *mut JpwlDecoder) {
    if !decoder.is_null() {
        let _ = unsafe { Box::from_raw(decoder as *mut DecoderSession) };
    }
}

/// Correct a protected codestream. The input buffer is corrected in place and
/// the resulting part 1 codestream is copied to `output`.
///
/// Returns `0` when a frame was produced (restored or passed through); the
/// details are in `result`.
///
/// # Safety
/// `decoder` must be a valid handle. `input` must point to `input_len` writable
/// bytes and `output` to `output_capacity` writable bytes. `result` must be valid
/// or null.
#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub unsafe extern "C" fn jpwl_dec_run(
    decoder: *mut JpwlDecoder,
    input: *mut c_uchar,
    input_len: usize,
    output: *mut c_uchar,
    output_capacity: usize,
    result: *mut JpwlDecodeResult,
) -> c_int {
    if decoder.is_null() || input.is_null() || output.is_null() {
        return error_code(JpwlError::InvalidParameter);
    }

    let session = unsafe { &mut *(decoder as *mut DecoderSession) };
    let received = unsafe { std::slice::from_raw_parts_mut(input, input_len) };
    let mut corrected = Vec::new();
    let report = session.decode(received, &mut corrected);

    let (status, code) = match report.status {
        DecodeStatus::Restored => (0, OK),
        DecodeStatus::NotJpwl => (1, OK),
        DecodeStatus::HeaderUnrecoverable(e) => (2, error_code(e)),
    };
    if !result.is_null() {
        unsafe {
            *result = JpwlDecodeResult {
                status,
                corrected_length: report.corrected_length,
                tiles_fully_restored: count(report.tiles_fully_restored),
                tiles_partially_restored: count(report.tiles_partially_restored),
                tiles_lost: count(report.tiles_lost),
                bad_block_bytes: report.bad_block_bytes,
            };
        }
    }
    if code != OK {
        return code;
    }
    if corrected.len() > output_capacity {
        return error_code(JpwlError::DestinationTooSmall);
    }
    let output_slice = unsafe { std::slice::from_raw_parts_mut(output, output_capacity) };
    output_slice[..corrected.len()].copy_from_slice(&corrected);
    OK
}

/// Read the statistics accumulated since the handle was created or reset.
///
/// # Safety
/// `decoder` must be a valid handle and `stats` a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jpwl_dec_stats(decoder: *const JpwlDecoder, stats: *mut JpwlRecoveryStats) -> c_int {
    if decoder.is_null() || stats.is_null() {
        return error_code(JpwlError::InvalidParameter);
    }
    let session = unsafe { &*(decoder as *const DecoderSession) };
    let s = session.stats();
    unsafe {
        *stats = JpwlRecoveryStats {
            corrected_rs_bytes: s.corrected_rs_bytes,
            uncorrected_rs_bytes: s.uncorrected_rs_bytes,
            fully_restored: s.fully_restored,
            partially_restored: s.partially_restored,
            not_restored: s.not_restored,
            not_jpwl: s.not_jpwl,
        };
    }
    OK
}

/// Zero the statistics of a decoder handle.
///
/// # Safety
/// `decoder` must be a valid handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jpwl_dec_reset_stats(decoder: *mut JpwlDecoder) {
    if !decoder.is_null() {
        unsafe { &mut *(decoder as *mut DecoderSession) }.reset_stats();
    }
}

/// Create an adaptive controller starting from RS(`data_level`,32).
///
/// Returns null when `data_level` is not a catalog code.
#[unsafe(no_mangle)]
pub extern "C" fn jpwl_adaptive_new(data_level: u8) -> *mut JpwlAdaptive {
    match RsCode::data(data_level) {
        Ok(code) => Box::into_raw(Box::new(AdaptiveController::new(code))) as *mut JpwlAdaptive,
        Err(_) => ptr::null_mut(),
    }
}

/// Free an adaptive controller handle.
///
/// # Safety
/// `adaptive` must be null or a handle from `jpwl_adaptive_new` not freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jpwl_adaptive_free(adaptive: *mut JpwlAdaptive) {
    if !adaptive.is_null() {
        let _ = unsafe { Box::from_raw(adaptive as *mut AdaptiveController) };
    }
}

/// Feed one observation to the controller and return the `n` of the data code
/// selected for the next frame, or `-1` on a null handle.
///
/// When `encoder` is not null its data protection is switched to that code.
///
/// # Safety
/// `adaptive` must be a valid handle; `encoder` must be valid or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jpwl_select_params_adaptive(
    adaptive: *mut JpwlAdaptive,
    buffer_error_fraction: f32,
    recovered_tile_fraction: f32,
    target_min_tiles_fraction: f32,
    encoder: *mut JpwlEncoder,
) -> c_int {
    if adaptive.is_null() {
        return -1;
    }
    let controller = unsafe { &mut *(adaptive as *mut AdaptiveController) };
    let code = controller.update(buffer_error_fraction, recovered_tile_fraction, target_min_tiles_fraction);
    if !encoder.is_null() {
        let session = unsafe { &mut *(encoder as *mut EncoderSession) };
        let mut params = *session.params();
        params.data = Protection::Rs(code);
        session.set_params(params);
    }
    code.n() as c_int
}
