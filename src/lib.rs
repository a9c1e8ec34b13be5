//! Resolver and ZIP64 volume core of an AFF4 evidence-container library.
//!
//! [`Aff4Core`] is the crate's entry point: it owns a [`Resolver`] (the
//! global object/attribute graph, §3-§4.B) and an [`ObjectCache`] (the
//! type-dispatch, refcounted LRU of live artefacts, §4.C), and threads both
//! through the ZIP64 volume/segment layer (§4.E-§4.G) so callers never
//! have to wire the two together by hand. Everything below this facade —
//! [`urn`], [`value`], [`resolver`], [`cache`], [`zip`] — is usable on its
//! own by an embedding application that wants finer control.

pub mod cache;
pub mod error;
pub mod escape;
pub mod object;
pub mod osfile;
pub mod rdf;
pub mod resolver;
pub mod urn;
pub mod value;
pub mod vocab;
pub mod zip;

pub use cache::ObjectCache;
pub use error::{Aff4Error, Aff4Result};
pub use object::{FileLike, Mode};
pub use rdf::{RdfAdapter, TurtleAdapter};
pub use resolver::Resolver;
pub use urn::Urn;
pub use value::Value;
pub use zip::segment::{Segment, WriteSegment};
pub use zip::volume::Volume;

use cache::{CachedObject, Handle};

/// The resolver plus object cache plus RDF adapter, bundled the way an
/// embedding application is expected to use them together: one
/// `Aff4Core` per process, threaded through every volume/segment call.
pub struct Aff4Core {
    pub resolver: Resolver,
    pub cache: ObjectCache,
    rdf: Box<dyn RdfAdapter>,
}

impl Default for Aff4Core {
    fn default() -> Self {
        Self::new()
    }
}

impl Aff4Core {
    /// A fresh core with an empty resolver, the default cache soft limit,
    /// and the built-in Turtle RDF adapter.
    pub fn new() -> Self {
        Aff4Core {
            resolver: Resolver::new(),
            cache: ObjectCache::with_default_limit(),
            rdf: Box::new(TurtleAdapter),
        }
    }

    /// Same as [`Aff4Core::new`], but with a caller-supplied RDF adapter
    /// (e.g. an RDF/XML implementation) instead of the default Turtle one.
    pub fn with_rdf_adapter(rdf: Box<dyn RdfAdapter>) -> Self {
        Aff4Core {
            resolver: Resolver::new(),
            cache: ObjectCache::with_default_limit(),
            rdf,
        }
    }

    /// Create a brand-new volume backed by the local file at `path`,
    /// minting a fresh `aff4://<uuid>` URN for it (§3 "Lifecycle": every
    /// volume/segment is reachable by URN from the moment it is opened).
    /// Returns the minted URN and the open, write-mode volume; the caller
    /// writes segments into it via [`Aff4Core::open_member_write`] and
    /// finishes the session with [`Aff4Core::close_volume`].
    ///
    /// If `path` already holds another (closed) volume's bytes, this mints
    /// an independent second volume positioned right after the existing
    /// one's EOCD rather than reopening it: the fresh URN is never a prior
    /// EOCD comment, so pre-recording `directory_offset = size(F)` here
    /// makes `Volume::load_from`'s idempotence check (§4.E) skip the
    /// backward scan entirely instead of adopting the existing volume's
    /// identity (invariant 6 / scenario S4's "the two CDs coexist").
    pub fn create_volume(&mut self, path: &str) -> Aff4Result<(Urn, Volume)> {
        let volume_urn = Urn::new(format!("aff4://{}", uuid::Uuid::new_v4()));
        let append_at = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        self.resolver
            .set(&volume_urn, vocab::DIRECTORY_OFFSET, Value::from(append_at));
        self.open_volume_as(path, &volume_urn, Mode::Write)
    }

    /// Open the volume backed by the local file at `path` for read,
    /// scanning its central directory (§4.E). The URN passed in is only a
    /// placeholder when the volume's identity is not already known: if the
    /// EOCD carries a well-formed URN comment, the returned volume adopts
    /// it (§4.E step 3) and `Urn` in the returned tuple reflects that.
    pub fn open_volume(&mut self, path: &str) -> Aff4Result<(Urn, Volume)> {
        let placeholder = Urn::new(format!("aff4://unresolved/{path}"));
        self.open_volume_as(path, &placeholder, Mode::Read)
    }

    /// Open (or create) the volume named `urn`, backed by `path`, in
    /// `mode`. Lower-level than [`Aff4Core::create_volume`] /
    /// [`Aff4Core::open_volume`]: use this when the volume's URN is already
    /// known ahead of time (e.g. recorded from a previous session).
    pub fn open_volume_as(&mut self, path: &str, urn: &Urn, mode: Mode) -> Aff4Result<(Urn, Volume)> {
        let storage_urn = Urn::new(format!("file://{path}"));
        self.resolver.set(&storage_urn, vocab::TYPE, Value::from(vocab::AFF4_FILE));
        self.resolver.set(urn, vocab::STORED, Value::from(storage_urn));
        self.resolver.set(urn, vocab::TYPE, Value::from(vocab::AFF4_ZIP_VOLUME));

        let handle = self.cache.open(&mut self.resolver, urn, mode)?;
        self.cache.forget(urn);
        match handle.object {
            CachedObject::Volume(volume) => {
                let urn = volume.urn().clone();
                Ok((urn, volume))
            }
            _ => unreachable!("AFF4_ZIP_VOLUME is always constructed as CachedObject::Volume"),
        }
    }

    /// Write `bytes` into a brand-new member `name` of `volume`, returning
    /// the new segment's URN. A convenience wrapper over
    /// `Volume::open_member_write` for callers who don't need a streaming
    /// writer (§4.F / invariant 1, the round-trip property).
    pub fn write_member(&mut self, volume: &mut Volume, name: &str, bytes: &[u8], compression: u16) -> Aff4Result<Urn> {
        let mut w = volume.open_member_write(&mut self.cache, &mut self.resolver, name, compression)?;
        w.write(bytes)?;
        let urn = w.urn().clone();
        w.close(&mut self.cache, &mut self.resolver)?;
        Ok(urn)
    }

    /// Open `name` (relative to `volume`) for a streaming write; the caller
    /// must call [`WriteSegment::close`] exactly once (§4.G write-mode
    /// destructor discipline).
    pub fn open_member_write(&mut self, volume: &mut Volume, name: &str, compression: u16) -> Aff4Result<WriteSegment> {
        volume.open_member_write(&mut self.cache, &mut self.resolver, name, compression)
    }

    /// Read a whole member's bytes back out, by URN (e.g. one returned
    /// from [`Aff4Core::write_member`]).
    pub fn read_member(&mut self, urn: &Urn) -> Aff4Result<Vec<u8>> {
        let mut segment = Segment::open_read(&mut self.cache, &mut self.resolver, urn)?;
        let mut buf = vec![0u8; segment.size() as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = segment.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Finish a write session on `volume`: serialise the RDF manifest,
    /// rewrite the central directory (a no-op if nothing was written), and
    /// release the backing file (§4.F `close_volume`).
    pub fn close_volume(&mut self, urn: Urn, volume: Volume) -> Aff4Result<()> {
        Volume::close_handle(
            Handle::new(urn, CachedObject::Volume(volume)),
            &mut self.cache,
            &mut self.resolver,
            self.rdf.as_ref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::COMPRESSION_DEFLATE;

    fn tempfile_path(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("aff4_core_facade_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name).to_string_lossy().into_owned()
    }

    /// Scenario S1 (§8): create a volume, write one uncompressed segment,
    /// close, reopen, and confirm the bytes, size and crc all round-trip.
    #[test]
    fn s1_round_trips_an_uncompressed_segment() {
        let path = tempfile_path("s1.aff4");
        let mut core = Aff4Core::new();

        let (volume_urn, mut volume) = core.create_volume(&path).unwrap();
        let member_urn = core
            .write_member(&mut volume, "hello", b"hello world", zip::COMPRESSION_STORED)
            .unwrap();
        core.close_volume(volume_urn.clone(), volume).unwrap();

        let mut core2 = Aff4Core::new();
        let (reopened_urn, _volume2) = core2.open_volume_as(&path, &volume_urn, Mode::Read).unwrap();
        assert_eq!(reopened_urn, volume_urn);

        assert_eq!(
            core2.resolver.resolve(&member_urn, vocab::SIZE).and_then(|v| v.as_u64()),
            Some(11)
        );
        assert_eq!(
            core2.resolver.resolve(&member_urn, vocab::CRC).and_then(|v| v.as_integer()),
            Some(0x0d4a_1185_i64)
        );
        assert_eq!(core2.read_member(&member_urn).unwrap(), b"hello world");
    }

    /// Writing several segments and closing preserves creation order in
    /// `(volume, contains)` (invariant 2).
    #[test]
    fn contains_preserves_segment_creation_order() {
        let path = tempfile_path("ordering.aff4");
        let mut core = Aff4Core::new();
        let (volume_urn, mut volume) = core.create_volume(&path).unwrap();

        let mut expected = Vec::new();
        for name in ["a", "b", "c"] {
            let urn = core
                .write_member(&mut volume, name, name.as_bytes(), COMPRESSION_DEFLATE)
                .unwrap();
            expected.push(urn);
        }
        core.close_volume(volume_urn.clone(), volume).unwrap();

        let mut core2 = Aff4Core::new();
        let (_urn, _volume2) = core2.open_volume_as(&path, &volume_urn, Mode::Read).unwrap();
        // The manifest segment (`information.turtle`) is itself a
        // CONTAINS/SEGMENT entry appended last by close_volume; exclude it
        // here since this test is only about the order of the segments the
        // caller explicitly wrote.
        let contained: Vec<Urn> = core2
            .resolver
            .iter(&volume_urn, vocab::CONTAINS)
            .filter_map(|v| v.as_urn().cloned())
            .filter(|u| {
                core2
                    .resolver
                    .resolve(u, vocab::TYPE)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .as_deref()
                    == Some(vocab::AFF4_SEGMENT)
            })
            .filter(|u| !u.relative_name(&volume_urn).starts_with(vocab::INFORMATION_PREFIX))
            .collect();
        assert_eq!(contained, expected);
    }

    /// Scenario S2 (§8): a multi-megabyte, near-incompressible payload
    /// survives a deflate round-trip with its size and CRC intact, and its
    /// compressed size does not balloon past the uncompressed size plus a
    /// small slack (incompressible input cannot shrink under deflate).
    #[test]
    fn s2_large_incompressible_payload_round_trips_through_deflate() {
        let path = tempfile_path("s2.aff4");
        let mut core = Aff4Core::new();

        // A cheap xorshift64 stand-in for `/dev/urandom` (§8 S2): no crate
        // in this workspace generates randomness, and the scenario only
        // needs bytes that deflate cannot usefully compress.
        let mut payload = vec![0u8; 5 * 1024 * 1024];
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        for chunk in payload.chunks_mut(8) {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            chunk.copy_from_slice(&state.to_le_bytes()[..chunk.len()]);
        }

        let (volume_urn, mut volume) = core.create_volume(&path).unwrap();
        let member_urn = core
            .write_member(&mut volume, "big", &payload, zip::COMPRESSION_DEFLATE)
            .unwrap();
        let crc_before = core.resolver.resolve(&member_urn, vocab::CRC).unwrap();
        core.close_volume(volume_urn.clone(), volume).unwrap();

        let mut core2 = Aff4Core::new();
        core2.open_volume_as(&path, &volume_urn, Mode::Read).unwrap();

        assert_eq!(
            core2.resolver.resolve(&member_urn, vocab::SIZE).and_then(|v| v.as_u64()),
            Some(payload.len() as u64)
        );
        assert_eq!(core2.resolver.resolve(&member_urn, vocab::CRC), Some(crc_before));
        let compressed_size = core2
            .resolver
            .resolve(&member_urn, vocab::COMPRESSED_SIZE)
            .and_then(|v| v.as_u64())
            .unwrap();
        assert!(compressed_size < payload.len() as u64 + 1024);

        assert_eq!(core2.read_member(&member_urn).unwrap(), payload);
    }

    /// Scenario S4 (§8): two independently minted volumes can share one
    /// backing file. Creating the second does not reopen the first (its
    /// segments stay reachable through the resolver that already knows
    /// them); a fresh scan of the whole file lands on the later EOCD and
    /// returns the second volume's own segments (invariant 6).
    #[test]
    fn s4_two_volumes_coexist_in_one_backing_file() {
        let path = tempfile_path("s4.aff4");
        let mut core = Aff4Core::new();

        let (v_urn, mut v) = core.create_volume(&path).unwrap();
        let v_member = core.write_member(&mut v, "v-only", b"from v", zip::COMPRESSION_STORED).unwrap();
        core.close_volume(v_urn.clone(), v).unwrap();

        let (w_urn, mut w) = core.create_volume(&path).unwrap();
        assert_ne!(w_urn, v_urn);
        let w_member = core.write_member(&mut w, "w-only", b"from w", zip::COMPRESSION_STORED).unwrap();
        core.close_volume(w_urn.clone(), w).unwrap();

        // V's segments are still reachable through the resolver that
        // created it; minting W never touched V's entries.
        assert_eq!(core.read_member(&v_member).unwrap(), b"from v");

        // A brand-new process scanning the file from scratch lands on the
        // later EOCD (W's), per the backward scan's "last occurrence wins".
        let mut core2 = Aff4Core::new();
        let (scanned_urn, _volume) = core2.open_volume(&path).unwrap();
        assert_eq!(scanned_urn, w_urn);
        assert_eq!(core2.read_member(&w_member).unwrap(), b"from w");
    }

    /// Scenario S5 (§8): a segment checked out for write makes the backing
    /// volume's storage busy to a concurrent write attempt.
    #[test]
    fn s5_write_mode_segment_makes_storage_busy() {
        let path = tempfile_path("busy.aff4");
        let mut core = Aff4Core::new();
        let (_volume_urn, mut volume) = core.create_volume(&path).unwrap();

        let w = core.open_member_write(&mut volume, "locked", zip::COMPRESSION_STORED).unwrap();
        let storage_urn = volume.storage_urn().clone();
        let second = core.cache.open(&mut core.resolver, &storage_urn, Mode::Write);
        assert!(matches!(second, Err(Aff4Error::Busy(_))));

        w.close(&mut core.cache, &mut core.resolver).unwrap();
    }

    /// Scenario S6 (§8): a truncated/corrupted tail is rejected in read
    /// mode with `NotAZipFile`, while write mode tolerates the absent CD
    /// and is able to start a fresh one.
    #[test]
    fn s6_corrupted_tail_fails_read_but_not_write() {
        let path = tempfile_path("corrupt.aff4");
        let mut core = Aff4Core::new();
        let (volume_urn, mut volume) = core.create_volume(&path).unwrap();
        core.write_member(&mut volume, "x", b"data", zip::COMPRESSION_STORED).unwrap();
        core.close_volume(volume_urn.clone(), volume).unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        let truncated = len.saturating_sub(22);
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(truncated).unwrap();
        drop(file);

        let mut core2 = Aff4Core::new();
        let read_err = core2.open_volume_as(&path, &volume_urn, Mode::Read);
        assert!(matches!(read_err, Err(Aff4Error::NotAZipFile(_))));

        let mut core3 = Aff4Core::new();
        let (volume_urn3, mut volume3) = core3.open_volume_as(&path, &volume_urn, Mode::Write).unwrap();
        core3.write_member(&mut volume3, "y", b"more data", zip::COMPRESSION_STORED).unwrap();
        core3.close_volume(volume_urn3, volume3).unwrap();
    }
}
