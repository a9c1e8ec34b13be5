//! The ZIP64 container itself (§4.E, §4.F), the `AFF4_ZIP_VOLUME`
//! registered type.
//!
//! Grounded on `ZipFile_AFFObject_Con` / `ZipFile_load_from` (read path),
//! `ZipFile_open_member` (write path) and `ZipFile_close` /
//! `dump_volume_properties` (central directory rewrite) in
//! `examples/original_source/lib/zip.c`, with the backward End-Of-Central-
//! Directory scan shaped after the teacher's own (incomplete)
//! `find_legacy_eocd_offset` / `parse_central_directory` in `src/aff4.rs`.
//!
//! Like `Segment`/`OsFile`, a `Volume` instance carries only identity
//! (its own URN, its storage URN, its mode): every attribute a caller might
//! ask for — directory offset, dirty flag, member list — is read from the
//! resolver on demand rather than cached on the struct.

use crate::cache::{CachedObject, Handle, ObjectCache};
use crate::error::{Aff4Error, Aff4Result};
use crate::escape::{escape_filename, unescape_filename};
use crate::object::{FileLike, Mode};
use crate::rdf::RdfAdapter;
use crate::resolver::Resolver;
use crate::urn::Urn;
use crate::value::Value;
use crate::vocab;
use crate::zip::segment::WriteSegment;
use crate::zip::{
    dos_datetime_now, dos_datetime_to_unix, encode_zip64_extra, parse_zip64_extra, unix_to_dos_datetime,
    CD_FILE_HEADER_SIG, EOCD_SIG, FLAG_TRAILING_DESCRIPTOR, LOCAL_FILE_HEADER_SIG, ZIP64_EOCD_SIG, ZIP64_LIMIT,
    ZIP64_LOCATOR_SIG,
};
use std::io::SeekFrom;

pub struct Volume {
    urn: Urn,
    storage_urn: Urn,
    mode: Mode,
}

/// One parsed central-directory record, resolved against its local file
/// header for the true start of its compressed data.
struct CdEntry {
    name: String,
    compression: u16,
    crc: u32,
    size: u64,
    compressed_size: u64,
    header_offset: u64,
    file_offset: u64,
    timestamp: i64,
}

impl Volume {
    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn storage_urn(&self) -> &Urn {
        &self.storage_urn
    }

    /// Open (or create) `urn`'s backing storage and populate the resolver
    /// from whatever central directory it finds, or start a brand-new
    /// volume if the backing store is empty/absent and `mode` is `Write`.
    pub fn load_from(cache: &mut ObjectCache, resolver: &mut Resolver, urn: &Urn, mode: Mode) -> Aff4Result<Volume> {
        let storage_urn = resolver
            .resolve(urn, vocab::STORED)
            .and_then(|v| v.as_urn().cloned())
            .ok_or_else(|| Aff4Error::runtime(format!("no storage configured for volume {urn}")))?;

        let mut handle = cache.open(resolver, &storage_urn, mode)?;
        let outcome = (|| -> Aff4Result<Option<(u64, Vec<CdEntry>, Option<String>)>> {
            let file = handle.object.as_file_like_mut()?;
            let file_size = file.size();

            let already_loaded = resolver
                .resolve(urn, vocab::DIRECTORY_OFFSET)
                .and_then(|v| v.as_u64())
                .is_some_and(|offset| offset <= file_size);
            if already_loaded {
                return Ok(None);
            }

            if file_size == 0 {
                return Ok(Some((0, Vec::new(), None)));
            }

            match scan_central_directory(file, file_size) {
                Ok(scanned) => Ok(Some(scanned)),
                // §4.E corruption handling: a missing/malformed CD is fatal
                // in read mode but tolerated in write mode — the writer
                // just starts a fresh directory at the current end of file,
                // appending after whatever garbage is already there.
                Err(Aff4Error::NotAZipFile(reason)) if mode == Mode::Write => {
                    log::warn!("zip: {reason}; starting a fresh central directory at offset {}", file.size());
                    Ok(Some((file.size(), Vec::new(), None)))
                }
                Err(e) => Err(e),
            }
        })();
        cache.cache_return(handle, resolver);

        // §4.E step 3: an EOCD comment that is a well-formed, nul-terminated
        // URN takes precedence over whatever identity the caller guessed —
        // this is what lets an appended archive be addressed by its own
        // stable URN instead of the one the first volume in the file used.
        let mut urn = urn.clone();
        match outcome? {
            None => {}
            Some((directory_offset, entries, comment_urn)) => {
                if let Some(adopted) = comment_urn {
                    urn.set(adopted);
                }
                resolver.set(&urn, vocab::STORED, Value::from(storage_urn.clone()));
                resolver.add(&storage_urn, vocab::CONTAINS, Value::from(urn.clone()));
                for entry in &entries {
                    publish_entry(resolver, &urn, entry);
                }
                resolver.set(&urn, vocab::DIRECTORY_OFFSET, Value::from(directory_offset));
            }
        }

        let volume = Volume {
            urn,
            storage_urn,
            mode,
        };

        if let Some(info_urn) = find_information_segment(resolver, &volume.urn) {
            load_information_segment(cache, resolver, &info_urn, &volume.urn)?;
        }

        Ok(volume)
    }

    /// Open `name` (relative to this volume) for write: append a local file
    /// header at the current directory offset and return a stream the
    /// caller writes through and must close exactly once.
    pub fn open_member_write(
        &mut self,
        cache: &mut ObjectCache,
        resolver: &mut Resolver,
        name: &str,
        compression: u16,
    ) -> Aff4Result<WriteSegment> {
        let member_urn = self.urn.add(name);
        let directory_offset = resolver
            .resolve(&self.urn, vocab::DIRECTORY_OFFSET)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let mut handle = cache.open(resolver, &self.storage_urn, Mode::Write)?;
        resolver.set(&self.urn, vocab::DIRTY, Value::Integer(1));

        let relative = member_urn.relative_name(&self.urn);
        let escaped = escape_filename(relative);
        let (date, time) = dos_datetime_now();

        let file_offset_result = (|| -> Aff4Result<u64> {
            let file = handle.object.as_file_like_mut()?;
            file.seek(SeekFrom::Start(directory_offset))?;

            let mut header = Vec::with_capacity(30 + escaped.len());
            header.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
            header.extend_from_slice(&0x0014u16.to_le_bytes());
            header.extend_from_slice(&FLAG_TRAILING_DESCRIPTOR.to_le_bytes());
            header.extend_from_slice(&compression.to_le_bytes());
            header.extend_from_slice(&time.to_le_bytes());
            header.extend_from_slice(&date.to_le_bytes());
            header.extend_from_slice(&0u32.to_le_bytes()); // crc32, unknown yet
            header.extend_from_slice(&0u32.to_le_bytes()); // compressed size, unknown yet
            header.extend_from_slice(&0u32.to_le_bytes()); // uncompressed size, unknown yet
            header.extend_from_slice(&(escaped.len() as u16).to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes()); // extra field length
            header.extend_from_slice(escaped.as_bytes());

            write_all(file, &header)?;
            Ok(file.tell())
        })();

        let file_offset = match file_offset_result {
            Ok(offset) => offset,
            Err(e) => {
                cache.cache_return(handle, resolver);
                return Err(e);
            }
        };

        resolver.set(&member_urn, vocab::TYPE, Value::from(vocab::AFF4_SEGMENT));
        resolver.set(&member_urn, vocab::STORED, Value::from(self.urn.clone()));
        resolver.set(&member_urn, vocab::COMPRESSION, Value::from(compression as u64));
        resolver.set(&member_urn, vocab::FILE_OFFSET, Value::from(file_offset));
        resolver.set(&member_urn, vocab::HEADER_OFFSET, Value::from(directory_offset));

        Ok(WriteSegment::new(member_urn, self.urn.clone(), handle, compression, file_offset))
    }

    /// Open `name` (relative to this volume) for read. A thin convenience
    /// wrapper: reading a segment only ever needs resolver state plus the
    /// shared backing file, so this is equivalent to a generic
    /// `cache.open` on the member's URN.
    pub fn open_member_read(&self, cache: &mut ObjectCache, resolver: &mut Resolver, name: &str) -> Aff4Result<Handle> {
        let member_urn = self.urn.add(name);
        cache.open(resolver, &member_urn, Mode::Read)
    }

    /// Rewrite the central directory and EOCD records, consuming `self`.
    /// A no-op if the volume was never marked dirty (nothing was written
    /// to it this session).
    fn close(self, cache: &mut ObjectCache, resolver: &mut Resolver, rdf: &dyn RdfAdapter) -> Aff4Result<()> {
        if resolver.resolve(&self.urn, vocab::DIRTY).is_none() {
            log::debug!("zip: {} was never marked dirty, skipping central directory rewrite", self.urn);
            return Ok(());
        }

        log::info!("zip: rewriting central directory for {}", self.urn);
        write_information_segment(&self.urn, cache, resolver, rdf)?;

        let members: Vec<Urn> = resolver
            .iter(&self.urn, vocab::CONTAINS)
            .filter_map(|v| v.as_urn().cloned())
            .filter(|member_urn| {
                resolver
                    .resolve(member_urn, vocab::TYPE)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .as_deref()
                    == Some(vocab::AFF4_SEGMENT)
            })
            .collect();

        let directory_offset = resolver
            .resolve(&self.urn, vocab::DIRECTORY_OFFSET)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let mut handle = cache.open(resolver, &self.storage_urn, Mode::Write)?;
        let result = (|| -> Aff4Result<()> {
            let file = handle.object.as_file_like_mut()?;
            file.seek(SeekFrom::Start(directory_offset))?;

            let mut count: u32 = 0;
            for member_urn in &members {
                log::debug!("zip: writing central directory record for {member_urn}");
                write_cd_record(file, resolver, &self.urn, member_urn)?;
                count += 1;
            }

            let cd_end = file.tell();
            let cd_size = cd_end - directory_offset;

            if directory_offset > ZIP64_LIMIT || count as u64 > 0xFFFF {
                let zip64_eocd_offset = file.tell();
                let mut zip64_eocd = Vec::with_capacity(56);
                zip64_eocd.extend_from_slice(&ZIP64_EOCD_SIG.to_le_bytes());
                zip64_eocd.extend_from_slice(&44u64.to_le_bytes());
                zip64_eocd.extend_from_slice(&0x002du16.to_le_bytes());
                zip64_eocd.extend_from_slice(&0x002du16.to_le_bytes());
                zip64_eocd.extend_from_slice(&0u32.to_le_bytes());
                zip64_eocd.extend_from_slice(&0u32.to_le_bytes());
                zip64_eocd.extend_from_slice(&(count as u64).to_le_bytes());
                zip64_eocd.extend_from_slice(&(count as u64).to_le_bytes());
                zip64_eocd.extend_from_slice(&cd_size.to_le_bytes());
                zip64_eocd.extend_from_slice(&directory_offset.to_le_bytes());
                write_all(file, &zip64_eocd)?;

                let mut locator = Vec::with_capacity(20);
                locator.extend_from_slice(&ZIP64_LOCATOR_SIG.to_le_bytes());
                locator.extend_from_slice(&0u32.to_le_bytes());
                locator.extend_from_slice(&zip64_eocd_offset.to_le_bytes());
                locator.extend_from_slice(&1u32.to_le_bytes());
                write_all(file, &locator)?;
            }

            // §6: the comment is the volume's URN, nul-terminated, so a
            // later `load_from` can adopt it as this volume's authoritative
            // identity (§4.E step 3) without the caller already knowing it.
            let mut comment = self.urn.value().as_bytes().to_vec();
            comment.push(0);
            let entries_field = if count > 0xFFFF { 0xFFFFu16 } else { count as u16 };
            let mut eocd = Vec::with_capacity(22 + comment.len());
            eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
            eocd.extend_from_slice(&0u16.to_le_bytes());
            eocd.extend_from_slice(&0u16.to_le_bytes());
            eocd.extend_from_slice(&entries_field.to_le_bytes());
            eocd.extend_from_slice(&entries_field.to_le_bytes());
            eocd.extend_from_slice(&(if cd_size > ZIP64_LIMIT { 0xFFFF_FFFFu32 } else { cd_size as u32 }).to_le_bytes());
            eocd.extend_from_slice(
                &(if directory_offset > ZIP64_LIMIT {
                    0xFFFF_FFFFu32
                } else {
                    directory_offset as u32
                })
                .to_le_bytes(),
            );
            eocd.extend_from_slice(&(comment.len() as u16).to_le_bytes());
            eocd.extend_from_slice(&comment);
            write_all(file, &eocd)?;

            Ok(())
        })();

        cache.cache_return(handle, resolver);
        result?;
        log::info!("zip: central directory for {} rewritten at offset {directory_offset}", self.urn);
        resolver.del(&self.urn, Some(vocab::DIRTY));
        Ok(())
    }

    /// Unwrap a checked-out handle into a `Volume` and close it, releasing
    /// the cache's bookkeeping for its URN. The normal way a caller
    /// finishes a session with a volume opened for write.
    pub fn close_handle(
        handle: Handle,
        cache: &mut ObjectCache,
        resolver: &mut Resolver,
        rdf: &dyn RdfAdapter,
    ) -> Aff4Result<()> {
        let urn = handle.object.urn().clone();
        match handle.object {
            CachedObject::Volume(volume) => {
                cache.forget(&urn);
                volume.close(cache, resolver, rdf)
            }
            _ => Err(Aff4Error::runtime(format!("{urn} is not a volume"))),
        }
    }
}

fn write_cd_record(file: &mut dyn FileLike, resolver: &Resolver, volume_urn: &Urn, member_urn: &Urn) -> Aff4Result<()> {
    let relative = member_urn.relative_name(volume_urn);
    let escaped = escape_filename(relative);
    let compression = resolver
        .resolve(member_urn, vocab::COMPRESSION)
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u16;
    let crc = resolver.resolve(member_urn, vocab::CRC).and_then(|v| v.as_integer()).unwrap_or(0) as u32;
    let size = resolver.resolve(member_urn, vocab::SIZE).and_then(|v| v.as_u64()).unwrap_or(0);
    let compressed_size = resolver
        .resolve(member_urn, vocab::COMPRESSED_SIZE)
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let header_offset = resolver
        .resolve(member_urn, vocab::HEADER_OFFSET)
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let timestamp = resolver.resolve(member_urn, vocab::TIMESTAMP).and_then(|v| v.as_integer()).unwrap_or(0);
    let (date, time) = unix_to_dos_datetime(timestamp);

    let need_zip64 = size > ZIP64_LIMIT || compressed_size > ZIP64_LIMIT || header_offset > ZIP64_LIMIT;
    let mut extra = Vec::new();
    if need_zip64 {
        encode_zip64_extra(&mut extra, size, compressed_size, header_offset);
    }

    let mut record = Vec::with_capacity(46 + escaped.len() + extra.len());
    record.extend_from_slice(&CD_FILE_HEADER_SIG.to_le_bytes());
    record.extend_from_slice(&0x0317u16.to_le_bytes());
    record.extend_from_slice(&0x0014u16.to_le_bytes());
    record.extend_from_slice(&FLAG_TRAILING_DESCRIPTOR.to_le_bytes());
    record.extend_from_slice(&compression.to_le_bytes());
    record.extend_from_slice(&time.to_le_bytes());
    record.extend_from_slice(&date.to_le_bytes());
    record.extend_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(&(if compressed_size > ZIP64_LIMIT { 0xFFFF_FFFFu32 } else { compressed_size as u32 }).to_le_bytes());
    record.extend_from_slice(&(if size > ZIP64_LIMIT { 0xFFFF_FFFFu32 } else { size as u32 }).to_le_bytes());
    record.extend_from_slice(&(escaped.len() as u16).to_le_bytes());
    record.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    record.extend_from_slice(&0u16.to_le_bytes()); // comment length
    record.extend_from_slice(&0u16.to_le_bytes()); // disk number start
    record.extend_from_slice(&0u16.to_le_bytes()); // internal file attributes
    record.extend_from_slice(&(0o644u32 << 16).to_le_bytes());
    record.extend_from_slice(&(if header_offset > ZIP64_LIMIT { 0xFFFF_FFFFu32 } else { header_offset as u32 }).to_le_bytes());
    record.extend_from_slice(escaped.as_bytes());
    record.extend_from_slice(&extra);

    write_all(file, &record)
}

fn publish_entry(resolver: &mut Resolver, volume_urn: &Urn, entry: &CdEntry) {
    let filename_urn = volume_urn.add(&entry.name);
    resolver.set(&filename_urn, vocab::STORED, Value::from(volume_urn.clone()));
    resolver.set(&filename_urn, vocab::TYPE, Value::from(vocab::AFF4_SEGMENT));
    resolver.add(volume_urn, vocab::CONTAINS, Value::from(filename_urn.clone()));
    resolver.set(&filename_urn, vocab::TIMESTAMP, Value::Integer(entry.timestamp));
    resolver.set(&filename_urn, vocab::COMPRESSION, Value::from(entry.compression as u64));
    resolver.set(&filename_urn, vocab::CRC, Value::Integer(entry.crc as i64));
    resolver.set(&filename_urn, vocab::SIZE, Value::from(entry.size));
    resolver.set(&filename_urn, vocab::COMPRESSED_SIZE, Value::from(entry.compressed_size));
    resolver.set(&filename_urn, vocab::HEADER_OFFSET, Value::from(entry.header_offset));
    resolver.set(&filename_urn, vocab::FILE_OFFSET, Value::from(entry.file_offset));
}

fn find_information_segment(resolver: &Resolver, volume_urn: &Urn) -> Option<Urn> {
    resolver
        .iter(volume_urn, vocab::CONTAINS)
        .filter_map(|v| v.as_urn().cloned())
        .find(|member_urn| {
            member_urn
                .relative_name(volume_urn)
                .starts_with(vocab::INFORMATION_PREFIX)
        })
}

fn load_information_segment(
    cache: &mut ObjectCache,
    resolver: &mut Resolver,
    info_urn: &Urn,
    volume_urn: &Urn,
) -> Aff4Result<()> {
    use crate::zip::segment::Segment;

    let mut segment = Segment::open_read(cache, resolver, info_urn)?;
    let mut data = vec![0u8; segment.size() as usize];
    let mut filled = 0;
    while filled < data.len() {
        let n = segment.read(&mut data[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);

    let adapter = crate::rdf::TurtleAdapter;
    adapter.parse_into(&data, volume_urn, resolver)
}

fn write_information_segment(
    volume_urn: &Urn,
    cache: &mut ObjectCache,
    resolver: &mut Resolver,
    rdf: &dyn RdfAdapter,
) -> Aff4Result<()> {
    let subjects: Vec<Urn> = std::iter::once(volume_urn.clone())
        .chain(
            resolver
                .iter(volume_urn, vocab::CONTAINS)
                .filter_map(|v| v.as_urn().cloned())
                .filter(|u| {
                    resolver
                        .resolve(u, vocab::TYPE)
                        .and_then(|v| v.as_str().map(str::to_string))
                        .as_deref()
                        != Some(vocab::AFF4_SEGMENT)
                }),
        )
        .collect();
    let turtle = rdf.serialize(resolver, &subjects)?;

    let mut volume = Volume {
        urn: volume_urn.clone(),
        storage_urn: resolver
            .resolve(volume_urn, vocab::STORED)
            .and_then(|v| v.as_urn().cloned())
            .ok_or_else(|| Aff4Error::runtime(format!("{volume_urn}: no storage recorded")))?,
        mode: Mode::Write,
    };
    let mut w = volume.open_member_write(cache, resolver, vocab::INFORMATION_TURTLE, crate::zip::COMPRESSION_DEFLATE)?;
    w.write(&turtle)?;
    w.close(cache, resolver)
}

/// Backward-scan for the legacy EOCD signature, then promote through the
/// ZIP64 locator/EOCD if present, then walk every central directory
/// record. Mirrors `ZipFile_load_from`'s scan loop plus
/// `src/aff4.rs`'s chunked backward search (which this generalises to
/// operate over `FileLike` instead of a raw `std::fs::File`).
fn scan_central_directory(file: &mut dyn FileLike, file_size: u64) -> Aff4Result<(u64, Vec<CdEntry>, Option<String>)> {
    let eocd_offset = find_eocd_offset(file, file_size)?;
    log::info!("zip: end-of-central-directory found at offset {eocd_offset}");
    file.seek(SeekFrom::Start(eocd_offset))?;
    let eocd = read_exact(file, 22)?;
    if u32::from_le_bytes(eocd[0..4].try_into().unwrap()) != EOCD_SIG {
        log::warn!("zip: record at offset {eocd_offset} has the wrong end-of-central-directory signature");
        return Err(Aff4Error::NotAZipFile(
            "end-of-central-directory record has the wrong signature".to_string(),
        ));
    }
    let mut entries_total = u16::from_le_bytes(eocd[10..12].try_into().unwrap()) as u64;
    let mut cd_size = u32::from_le_bytes(eocd[12..16].try_into().unwrap()) as u64;
    let mut cd_offset = u32::from_le_bytes(eocd[16..20].try_into().unwrap()) as u64;
    let comment_len = u16::from_le_bytes(eocd[20..22].try_into().unwrap()) as usize;
    // The comment trails the fixed 22-byte EOCD record; read it now, while
    // the cursor is still positioned right after it, so a ZIP64 promotion
    // below doesn't need to come back for it.
    let comment = read_exact(file, comment_len)?;
    let comment_urn = parse_eocd_comment_urn(&comment);

    let needs_zip64 = entries_total == 0xFFFF || cd_offset == 0xFFFF_FFFF;
    if needs_zip64 {
        log::debug!("zip: eocd fields are sentinel values, promoting to zip64 locator/eocd");
        let locator_offset = eocd_offset
            .checked_sub(20)
            .ok_or_else(|| Aff4Error::NotAZipFile("file too small to contain a zip64 locator".to_string()))?;
        file.seek(SeekFrom::Start(locator_offset))?;
        let locator = read_exact(file, 20)?;
        if u32::from_le_bytes(locator[0..4].try_into().unwrap()) != ZIP64_LOCATOR_SIG {
            log::warn!("zip: record at offset {locator_offset} has the wrong zip64 locator signature");
            return Err(Aff4Error::NotAZipFile("zip64 locator has the wrong signature".to_string()));
        }
        let zip64_eocd_offset = u64::from_le_bytes(locator[8..16].try_into().unwrap());

        file.seek(SeekFrom::Start(zip64_eocd_offset))?;
        let zip64_eocd = read_exact(file, 56)?;
        if u32::from_le_bytes(zip64_eocd[0..4].try_into().unwrap()) != ZIP64_EOCD_SIG {
            log::warn!("zip: record at offset {zip64_eocd_offset} has the wrong zip64 end-of-central-directory signature");
            return Err(Aff4Error::NotAZipFile("zip64 end-of-central-directory has the wrong signature".to_string()));
        }
        entries_total = u64::from_le_bytes(zip64_eocd[32..40].try_into().unwrap());
        cd_size = u64::from_le_bytes(zip64_eocd[40..48].try_into().unwrap());
        cd_offset = u64::from_le_bytes(zip64_eocd[48..56].try_into().unwrap());
    }
    let _ = cd_size;

    log::debug!("zip: reading {entries_total} central directory record(s) from offset {cd_offset}");
    file.seek(SeekFrom::Start(cd_offset))?;
    let mut entries = Vec::with_capacity(entries_total as usize);
    for i in 0..entries_total {
        let entry = read_cd_entry(file)?;
        log::debug!("zip: cd record {i}: {} ({} bytes, compression={})", entry.name, entry.size, entry.compression);
        entries.push(entry);
    }

    Ok((cd_offset, entries, comment_urn))
}

/// §4.E step 3 / §6: the EOCD comment is `<urn>\0`. Adopt it only if it
/// round-trips as a nul-terminated, scheme-qualified URN; anything else
/// (an empty comment, free text left by another tool) is left alone.
fn parse_eocd_comment_urn(comment: &[u8]) -> Option<String> {
    let (body, terminator) = comment.split_last()?;
    if *terminator != 0 {
        return None;
    }
    let text = std::str::from_utf8(body).ok()?;
    text.contains(':').then(|| text.to_string())
}

fn read_cd_entry(file: &mut dyn FileLike) -> Aff4Result<CdEntry> {
    let fixed = read_exact(file, 46)?;
    if u32::from_le_bytes(fixed[0..4].try_into().unwrap()) != CD_FILE_HEADER_SIG {
        log::warn!("zip: central directory record at offset {} has the wrong signature", file.tell().saturating_sub(46));
        return Err(Aff4Error::NotAZipFile("central directory record has the wrong signature".to_string()));
    }
    let compression = u16::from_le_bytes(fixed[10..12].try_into().unwrap());
    let dostime = u16::from_le_bytes(fixed[12..14].try_into().unwrap());
    let dosdate = u16::from_le_bytes(fixed[14..16].try_into().unwrap());
    let crc = u32::from_le_bytes(fixed[16..20].try_into().unwrap());
    let mut compressed_size = u32::from_le_bytes(fixed[20..24].try_into().unwrap()) as u64;
    let mut size = u32::from_le_bytes(fixed[24..28].try_into().unwrap()) as u64;
    let name_len = u16::from_le_bytes(fixed[28..30].try_into().unwrap()) as usize;
    let extra_len = u16::from_le_bytes(fixed[30..32].try_into().unwrap()) as usize;
    let comment_len = u16::from_le_bytes(fixed[32..34].try_into().unwrap()) as usize;
    let mut header_offset = u32::from_le_bytes(fixed[42..46].try_into().unwrap()) as u64;

    let escaped_name = read_exact(file, name_len)?;
    let extra = read_exact(file, extra_len)?;
    file.seek(SeekFrom::Current(comment_len as i64))?;

    let zip64 = parse_zip64_extra(&extra);
    if size == 0xFFFF_FFFF {
        size = zip64.uncompressed_size.unwrap_or(size);
    }
    if compressed_size == 0xFFFF_FFFF {
        compressed_size = zip64.compressed_size.unwrap_or(compressed_size);
    }
    if header_offset == 0xFFFF_FFFF {
        header_offset = zip64.header_offset.unwrap_or(header_offset);
    }

    let resume_at = file.tell();
    let file_offset = resolve_file_offset(file, header_offset)?;
    file.seek(SeekFrom::Start(resume_at))?;

    let name = unescape_filename(&String::from_utf8_lossy(&escaped_name))?;

    Ok(CdEntry {
        name,
        compression,
        crc,
        size,
        compressed_size,
        header_offset,
        file_offset,
        timestamp: dos_datetime_to_unix(dosdate, dostime),
    })
}

/// Read the local file header at `header_offset` to find where the
/// compressed payload actually begins (past the variable-length filename
/// and extra field).
fn resolve_file_offset(file: &mut dyn FileLike, header_offset: u64) -> Aff4Result<u64> {
    file.seek(SeekFrom::Start(header_offset))?;
    let local = read_exact(file, 30)?;
    if u32::from_le_bytes(local[0..4].try_into().unwrap()) != LOCAL_FILE_HEADER_SIG {
        log::warn!("zip: local file header at offset {header_offset} has the wrong signature");
        return Err(Aff4Error::NotAZipFile("local file header has the wrong signature".to_string()));
    }
    let name_len = u16::from_le_bytes(local[26..28].try_into().unwrap()) as u64;
    let extra_len = u16::from_le_bytes(local[28..30].try_into().unwrap()) as u64;
    Ok(header_offset + 30 + name_len + extra_len)
}

fn find_eocd_offset(file: &mut dyn FileLike, file_size: u64) -> Aff4Result<u64> {
    const CHUNK: u64 = 4096;
    let signature = EOCD_SIG.to_le_bytes();
    log::debug!("zip: scanning backward for end-of-central-directory signature, file size {file_size}");
    let mut cursor = file_size;
    loop {
        if cursor == 0 {
            break;
        }
        let start = cursor.saturating_sub(CHUNK);
        let read_len = (cursor - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        let buf = read_exact(file, read_len)?;
        if let Some(pos) = buf.windows(4).rposition(|w| w == signature) {
            return Ok(start + pos as u64);
        }
        if start == 0 {
            break;
        }
        cursor = start + 3;
    }
    log::warn!("zip: no end-of-central-directory signature found in {file_size} byte(s)");
    Err(Aff4Error::NotAZipFile(
        "no end-of-central-directory signature found".to_string(),
    ))
}

/// Read exactly `len` bytes of a central-directory/EOCD record. A short
/// read here means a declared length (`comment_len`, `extra_field_len`,
/// a record's own fixed size, ...) ran past the end of the file — §4.E's
/// "length overflow" corruption case — so this is `NotAZipFile`, not a
/// generic `InvalidFormat`, and write mode is allowed to tolerate it.
fn read_exact(file: &mut dyn FileLike, len: usize) -> Aff4Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            log::warn!("zip parse: expected {len} bytes, got {filled} before end of file");
            return Err(Aff4Error::NotAZipFile(
                "unexpected end of file while reading a zip record".to_string(),
            ));
        }
        filled += n;
    }
    Ok(buf)
}

fn write_all(file: &mut dyn FileLike, mut buf: &[u8]) -> Aff4Result<()> {
    while !buf.is_empty() {
        let n = file.write(buf)?;
        if n == 0 {
            return Err(Aff4Error::runtime("write returned 0 bytes"));
        }
        buf = &buf[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use crate::rdf::TurtleAdapter;
    use crate::zip::COMPRESSION_STORED;

    fn tempfile_urn(name: &str) -> Urn {
        let dir = std::env::temp_dir().join(format!("aff4_core_volume_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Urn::new(format!("file://{}/{name}", dir.to_string_lossy()))
    }

    #[test]
    fn round_trips_a_small_volume_with_one_stored_segment() {
        let mut resolver = Resolver::new();
        let mut cache = ObjectCache::new(10);
        let adapter = TurtleAdapter;

        let storage_urn = tempfile_urn("a.aff4");
        resolver.set(&storage_urn, vocab::TYPE, Value::from(vocab::AFF4_FILE));
        let volume_urn = Urn::new("aff4://22222222-2222-2222-2222-222222222222");
        resolver.set(&volume_urn, vocab::STORED, Value::from(storage_urn.clone()));
        resolver.set(&volume_urn, vocab::TYPE, Value::from(vocab::AFF4_ZIP_VOLUME));

        let handle = cache.open(&mut resolver, &volume_urn, Mode::Write).unwrap();
        let CachedObject::Volume(mut volume) = handle.object else {
            panic!("expected a volume");
        };
        cache.forget(&volume_urn);

        let mut w = volume
            .open_member_write(&mut cache, &mut resolver, "hello.txt", COMPRESSION_STORED)
            .unwrap();
        w.write(b"hello world").unwrap();
        w.close(&mut cache, &mut resolver).unwrap();

        Volume::close_handle(
            crate::cache::Handle::new(volume_urn.clone(), CachedObject::Volume(volume)),
            &mut cache,
            &mut resolver,
            &adapter,
        )
        .unwrap();

        // Re-open from scratch, as a brand new resolver/cache would.
        let mut resolver2 = Resolver::new();
        let mut cache2 = ObjectCache::new(10);
        resolver2.set(&storage_urn, vocab::TYPE, Value::from(vocab::AFF4_FILE));
        let volume_urn2 = Urn::new("aff4://should-be-overwritten-by-eocd-comment");
        resolver2.set(&volume_urn2, vocab::STORED, Value::from(storage_urn.clone()));
        resolver2.set(&volume_urn2, vocab::TYPE, Value::from(vocab::AFF4_ZIP_VOLUME));

        let handle2 = cache2.open(&mut resolver2, &volume_urn2, Mode::Read).unwrap();
        let CachedObject::Volume(volume2) = handle2.object else {
            panic!("expected a volume");
        };

        // The EOCD comment names the volume's real URN, which load_from
        // must adopt over the placeholder we originally guessed (§4.E step
        // 3, invariant 6).
        assert_eq!(volume2.urn(), &volume_urn);

        let member_urn = volume_urn.add("hello.txt");
        assert_eq!(resolver2.resolve(&member_urn, vocab::SIZE).and_then(|v| v.as_u64()), Some(11));

        let mut seg = crate::zip::segment::Segment::open_read(&mut cache2, &mut resolver2, &member_urn).unwrap();
        let mut out = vec![0u8; 11];
        seg.read(&mut out).unwrap();
        assert_eq!(&out, b"hello world");
    }

    /// Scenario S3 (§8): a segment whose header lands past the 32-bit
    /// boundary (simulated via a sparse backing file, as the spec
    /// suggests) gets a ZIP64 extra field on write, and the sentinel +
    /// extra field round-trip back to the true 64-bit offset on reload
    /// (invariant 3).
    #[test]
    fn s3_zip64_promotion_for_header_offset_past_32_bits() {
        let mut resolver = Resolver::new();
        let mut cache = ObjectCache::new(10);

        let storage_urn = tempfile_urn("s3.aff4");
        resolver.set(&storage_urn, vocab::TYPE, Value::from(vocab::AFF4_FILE));
        let volume_urn = Urn::new("aff4://33333333-3333-3333-3333-333333333333");
        resolver.set(&volume_urn, vocab::STORED, Value::from(storage_urn.clone()));
        resolver.set(&volume_urn, vocab::TYPE, Value::from(vocab::AFF4_ZIP_VOLUME));

        let handle = cache.open(&mut resolver, &volume_urn, Mode::Write).unwrap();
        let CachedObject::Volume(mut volume) = handle.object else {
            panic!("expected a volume");
        };
        cache.forget(&volume_urn);

        // Jump the next write past the 32-bit limit, as if earlier (elided)
        // segments already filled the file up to this point.
        const HUGE_OFFSET: u64 = 5 * 1024 * 1024 * 1024;
        resolver.set(&volume_urn, vocab::DIRECTORY_OFFSET, Value::from(HUGE_OFFSET));

        let mut w = volume
            .open_member_write(&mut cache, &mut resolver, "deep", COMPRESSION_STORED)
            .unwrap();
        w.write(b"deep data").unwrap();
        let member_urn = w.urn().clone();
        w.close(&mut cache, &mut resolver).unwrap();

        assert_eq!(
            resolver.resolve(&member_urn, vocab::HEADER_OFFSET).and_then(|v| v.as_u64()),
            Some(HUGE_OFFSET)
        );

        Volume::close_handle(
            crate::cache::Handle::new(volume_urn.clone(), CachedObject::Volume(volume)),
            &mut cache,
            &mut resolver,
            &TurtleAdapter,
        )
        .unwrap();

        // Re-parse the central directory from scratch: the CD sentinel and
        // zip64 extra field must reproduce the same 64-bit header offset.
        let mut resolver2 = Resolver::new();
        let mut cache2 = ObjectCache::new(10);
        resolver2.set(&storage_urn, vocab::TYPE, Value::from(vocab::AFF4_FILE));
        let placeholder = Urn::new("aff4://should-be-overwritten-by-eocd-comment-s3");
        resolver2.set(&placeholder, vocab::STORED, Value::from(storage_urn.clone()));
        resolver2.set(&placeholder, vocab::TYPE, Value::from(vocab::AFF4_ZIP_VOLUME));
        let handle2 = cache2.open(&mut resolver2, &placeholder, Mode::Read).unwrap();
        let CachedObject::Volume(_volume2) = handle2.object else {
            panic!("expected a volume");
        };

        assert_eq!(
            resolver2.resolve(&member_urn, vocab::HEADER_OFFSET).and_then(|v| v.as_u64()),
            Some(HUGE_OFFSET)
        );
        assert_eq!(
            resolver2.resolve(&member_urn, vocab::SIZE).and_then(|v| v.as_u64()),
            Some(9)
        );

        std::fs::remove_file(storage_urn.value().trim_start_matches("file://")).ok();
    }

    #[test]
    fn parse_eocd_comment_urn_requires_nul_terminator_and_scheme() {
        let mut with_nul = b"aff4://11111111-1111-1111-1111-111111111111".to_vec();
        with_nul.push(0);
        assert_eq!(
            parse_eocd_comment_urn(&with_nul),
            Some("aff4://11111111-1111-1111-1111-111111111111".to_string())
        );

        assert_eq!(parse_eocd_comment_urn(b"no terminator"), None);
        assert_eq!(parse_eocd_comment_urn(b"no-scheme-here\0"), None);
        assert_eq!(parse_eocd_comment_urn(b""), None);
    }
}
