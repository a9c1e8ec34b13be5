//! ZIP64 volume layer (§4.E, §4.F, §4.G).
//!
//! Shared record layouts and magic numbers live here; `volume` implements
//! the container (central directory scan/rewrite) and `segment` implements
//! a single member's read/write stream. Record shapes and field order are
//! grounded on `examples/original_source/lib/zip.c`'s `struct
//! EndCentralDirectory`, `struct Zip64EndCD`, `struct Zip64CDLocator`,
//! `struct CDFileHeader` and `struct ZipFileHeader`, byte-encoded the way
//! `other_examples/a63ba4f3_..._torrentzip_zip64.rs.rs` writes its headers
//! (`extend_from_slice(&x.to_le_bytes())` rather than `#[repr(C)]` structs,
//! since Rust has no portable guarantee of C's packed layout).

pub mod segment;
pub mod volume;

use chrono::{Datelike, Local, TimeZone, Timelike};

pub(crate) const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
pub(crate) const CD_FILE_HEADER_SIG: u32 = 0x0201_4b50;
pub(crate) const EOCD_SIG: u32 = 0x0605_4b50;
pub(crate) const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
pub(crate) const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
pub(crate) const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;

pub(crate) const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// Values at or above this threshold must be promoted to a 64-bit field,
/// with the 32-bit slot set to the `0xFFFFFFFF` sentinel.
pub(crate) const ZIP64_LIMIT: u64 = 0xFFFF_FFFF;

/// We always request a trailing data descriptor on write, so the local
/// header can be emitted before the compressed size is known.
pub(crate) const FLAG_TRAILING_DESCRIPTOR: u16 = 0x0008;

pub const COMPRESSION_STORED: u16 = 0;
pub const COMPRESSION_DEFLATE: u16 = 8;

/// Encode "now" as an MS-DOS `(date, time)` pair, as written into a local
/// file header / central directory record.
pub(crate) fn dos_datetime_now() -> (u16, u16) {
    let now = Local::now();
    encode_dos_datetime(now.year(), now.month(), now.day(), now.hour(), now.minute(), now.second())
}

pub(crate) fn encode_dos_datetime(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> (u16, u16) {
    let date = (((year - 1980).max(0) as u16) << 9) | ((month as u16) << 5) | day as u16;
    let time = ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 / 2);
    (date, time)
}

/// Inverse of [`dos_datetime_to_unix`], used when rewriting a central
/// directory record for a segment whose timestamp we already resolved.
pub(crate) fn unix_to_dos_datetime(timestamp: i64) -> (u16, u16) {
    match Local.timestamp_opt(timestamp, 0).single() {
        Some(dt) => encode_dos_datetime(dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second()),
        None => (0, 0),
    }
}

/// Decode an MS-DOS `(date, time)` pair into a Unix timestamp, the way
/// `ZipFile_load_from` turns a central directory record's `dosdate`/
/// `dostime` into `AFF4_TIMESTAMP` via `mktime`. Returns `0` if the
/// encoded date is not representable (e.g. all-zero fields).
pub(crate) fn dos_datetime_to_unix(date: u16, time: u16) -> i64 {
    let year = (date >> 9) as i32 + 1980;
    let month = (((date >> 5) & 0xF) as u32).clamp(1, 12);
    let day = ((date & 0x1F) as u32).clamp(1, 31);
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) as u32 * 2).min(59);

    Local
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// Append a ZIP64 extra field (tag `0x0001`) carrying `uncompressed_size`,
/// `compressed_size` and `header_offset` in that fixed order, as specified.
pub(crate) fn encode_zip64_extra(out: &mut Vec<u8>, uncompressed_size: u64, compressed_size: u64, header_offset: u64) {
    out.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&uncompressed_size.to_le_bytes());
    out.extend_from_slice(&compressed_size.to_le_bytes());
    out.extend_from_slice(&header_offset.to_le_bytes());
}

/// The three fields a ZIP64 extra record may carry, resolved against the
/// 32-bit fields already read from the fixed part of the header.
#[derive(Default, Clone, Copy)]
pub(crate) struct Zip64Fields {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
}

/// Parse a `0x0001` extra record, accepting 8/16/24-byte payloads (the
/// original supports a record shorter than the full triple when only the
/// leading fields are present).
pub(crate) fn parse_zip64_extra(extra: &[u8]) -> Zip64Fields {
    let mut fields = Zip64Fields::default();
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let tag = u16::from_le_bytes([extra[i], extra[i + 1]]);
        let rec_len = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        let data_start = i + 4;
        let data_end = (data_start + rec_len).min(extra.len());
        if tag == ZIP64_EXTRA_TAG {
            let data = &extra[data_start..data_end];
            if data.len() >= 8 {
                fields.uncompressed_size = Some(u64::from_le_bytes(data[0..8].try_into().unwrap()));
            }
            if data.len() >= 16 {
                fields.compressed_size = Some(u64::from_le_bytes(data[8..16].try_into().unwrap()));
            }
            if data.len() >= 24 {
                fields.header_offset = Some(u64::from_le_bytes(data[16..24].try_into().unwrap()));
            }
            break;
        }
        i = data_end;
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip64_extra_round_trips() {
        let mut buf = Vec::new();
        encode_zip64_extra(&mut buf, 5_000_000_000, 1_234_567, 9_876_543_210);
        let fields = parse_zip64_extra(&buf);
        assert_eq!(fields.uncompressed_size, Some(5_000_000_000));
        assert_eq!(fields.compressed_size, Some(1_234_567));
        assert_eq!(fields.header_offset, Some(9_876_543_210));
    }

    #[test]
    fn dos_datetime_round_trips_to_a_plausible_timestamp() {
        let (date, time) = encode_dos_datetime(2021, 6, 15, 13, 45, 30);
        let unix = dos_datetime_to_unix(date, time);
        assert!(unix > 0);
    }
}
