//! Reversible ZIP-member-name escaping (§3, §6).
//!
//! A URN's path component may contain characters that are not safe (or not
//! portable) inside a ZIP archive's filename field: `/` would be
//! misinterpreted as a directory separator, control bytes and non-ASCII
//! bytes are unsafe across platforms. The C original hand-rolls a lookup
//! table (`encode_init` / `escape_filename_data`); we use the same
//! percent-encoding approach but delegate the alphabet to the
//! `percent-encoding` crate rather than a bespoke table.

use crate::error::{Aff4Error, Aff4Result};
use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};

/// Bytes that must never appear literally in an escaped segment name:
/// ASCII control characters, `%` (the escape character itself, or it would
/// not be reversible), and `/` (the ZIP path separator).
const RESERVED: &AsciiSet = &CONTROLS.add(b'%').add(b'/');

/// Percent-encode `name` so it is safe to use as a ZIP member filename.
/// Non-ASCII bytes are always escaped by `percent_encode`, independent of
/// `RESERVED`.
pub fn escape_filename(name: &str) -> String {
    percent_encode(name.as_bytes(), RESERVED).to_string()
}

/// Reverse `escape_filename`. Fails with `InvalidFormat` if the escaped
/// name does not decode to valid UTF-8 (a corrupt or foreign archive).
pub fn unescape_filename(escaped: &str) -> Aff4Result<String> {
    percent_decode_str(escaped)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|e| Aff4Error::invalid_format(format!("segment name is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_slashes_and_percent() {
        let name = "data/chunk 1 (100%).dat";
        let escaped = escape_filename(name);
        assert!(!escaped.contains('/'));
        assert_eq!(unescape_filename(&escaped).unwrap(), name);
    }

    #[test]
    fn plain_ascii_name_is_unchanged() {
        let name = "hello";
        assert_eq!(escape_filename(name), "hello");
    }

    #[test]
    fn round_trips_non_ascii() {
        let name = "evidence-münchen";
        let escaped = escape_filename(name);
        assert_eq!(unescape_filename(&escaped).unwrap(), name);
    }
}
