//! On-media record layout.
//!
//! A page holds back-to-back records without padding, each laid out as
//!
//! ```text
//! +--------+--------+------------------------+-----------+
//! | hdr[0] | hdr[1] | payload (fixed size)   | integrity |
//! +--------+--------+------------------------+-----------+
//! ```
//!
//! The two header bytes carry a magic pattern in one nibble each and the total record length
//! split across the two remaining nibbles. A scanner can therefore recognise a record boundary and
//! skip the record without any index. Unused trailing bytes of a page are left erased (`0xFF`),
//! which never decodes as a header.

use crate::platform::FnCrc32;

pub const HEADER_SIZE: usize = 2;
pub const INTEGRITY_SIZE: usize = 1;
/// The length is stored in 8 bits.
pub const MAX_RECORD_LEN: usize = u8::MAX as usize;

pub(crate) const HEADER_PREFIX: u8 = 0xA0;
pub(crate) const HEADER_SUFFIX: u8 = 0x00;
pub(crate) const ERASED: u8 = 0xFF;

/// Encodes the header for a record of `total_len` bytes, header and integrity byte included.
pub const fn encode_header(total_len: u8) -> [u8; HEADER_SIZE] {
    [(total_len >> 4) | HEADER_PREFIX, (total_len << 4) | HEADER_SUFFIX]
}

/// Returns the total record length if `raw` is a plausible header.
///
/// Both tag nibbles have to match and the length must not be zero. Erased flash and most partially
/// written data fail this test.
pub const fn decode_header(raw: [u8; HEADER_SIZE]) -> Option<u8> {
    let [hi, lo] = raw;
    let total_len = ((hi & 0x0F) << 4) | ((lo & 0xF0) >> 4);
    if hi & 0xF0 == HEADER_PREFIX && lo & 0x0F == HEADER_SUFFIX && total_len > 0 {
        Some(total_len)
    } else {
        None
    }
}

/// Low byte of the CRC32 over header and payload.
pub(crate) fn integrity_byte(crc32: FnCrc32, header_and_payload: &[u8]) -> u8 {
    (crc32(u32::MAX, header_and_payload) & 0xFF) as u8
}
