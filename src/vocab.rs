//! Well-known predicate and type URIs (§3, §6).
//!
//! These are plain string constants rather than an enum: the resolver is
//! generic over *any* predicate URI (a caller or the RDF adapter may invent
//! their own), these are simply the ones the core itself reads or writes.

/// Namespace prefix all AFF4 schema predicates live under.
pub const AFF4_NAMESPACE: &str = "http://aff4.org/Schema#";

// --- Persisted predicates (survive RDF serialisation) -----------------

pub const STORED: &str = "http://aff4.org/Schema#stored";
pub const TYPE: &str = "http://aff4.org/Schema#type";
pub const SIZE: &str = "http://aff4.org/Schema#size";
pub const TIMESTAMP: &str = "http://aff4.org/Schema#timestamp";

// --- Volatile predicates (resolver-only, never serialised) -------------

pub const CONTAINS: &str = "http://aff4.org/Schema#contains";
pub const DIRECTORY_OFFSET: &str = "http://aff4.org/Schema#directory_offset";
pub const DIRTY: &str = "http://aff4.org/Schema#dirty";
pub const COMPRESSION: &str = "http://aff4.org/Schema#compression";
pub const COMPRESSED_SIZE: &str = "http://aff4.org/Schema#compressed_size";
pub const CRC: &str = "http://aff4.org/Schema#crc";
pub const HEADER_OFFSET: &str = "http://aff4.org/Schema#header_offset";
pub const FILE_OFFSET: &str = "http://aff4.org/Schema#file_offset";

/// Optional, extension predicate: published only when the `hash` feature
/// is enabled (Design Note 2 / SPEC_FULL.md Open Questions).
pub const HASH: &str = "http://aff4.org/Schema#hash";

/// The complete set of predicates that are *not* persisted into the RDF
/// manifest. Everything else (`stored`, `type`, `size`, `timestamp`) is
/// written out by the serialiser.
pub const VOLATILE_PREDICATES: &[&str] = &[
    CONTAINS,
    DIRECTORY_OFFSET,
    DIRTY,
    COMPRESSION,
    COMPRESSED_SIZE,
    CRC,
    HEADER_OFFSET,
    FILE_OFFSET,
    HASH,
];

/// True if `predicate` must be omitted from a persisted RDF manifest.
pub fn is_volatile(predicate: &str) -> bool {
    VOLATILE_PREDICATES.contains(&predicate)
}

// --- Registered type tags -----------------------------------------------

pub const AFF4_FILE: &str = "http://aff4.org/Schema#FileImage";
pub const AFF4_ZIP_VOLUME: &str = "http://aff4.org/Schema#ZipVolume";
pub const AFF4_SEGMENT: &str = "http://aff4.org/Schema#Segment";

/// Reserved basename prefix identifying the RDF manifest segment
/// (`information.turtle`, `information.rdf`, ...).
pub const INFORMATION_PREFIX: &str = "information.";

/// Default manifest segment name this crate writes on `close_volume`.
pub const INFORMATION_TURTLE: &str = "information.turtle";
