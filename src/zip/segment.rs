//! A single ZIP member's byte stream (§4.G), the `AFF4_SEGMENT` registered
//! type.
//!
//! Two halves, grounded on the C original's single `ZipFileStream` class
//! split by mode: `Segment` is the read path (`ZipFileStream_Con` mode
//! `'r'` + `ZipFileStream_read`) — fully decompressed into memory at
//! construction, since AFF4 segments are assumed small enough to buffer
//! whole. `WriteSegment` is the write path (`ZipFile_open_member` mode
//! `'w'` + `ZipFileStream_write` + `ZipFileStream_close`) — streamed
//! through `flate2::Compress` directly onto the locked backing volume file,
//! finished with a CRC-32 (and, behind the `hash` feature, a SHA-256) data
//! descriptor trailer.

use crate::cache::{CachedObject, Handle, ObjectCache};
use crate::error::{Aff4Error, Aff4Result};
use crate::object::{FileLike, Mode};
use crate::resolver::Resolver;
use crate::urn::Urn;
use crate::value::Value;
use crate::vocab;
use crate::zip::{COMPRESSION_DEFLATE, COMPRESSION_STORED, DATA_DESCRIPTOR_SIG, ZIP64_LIMIT};
use flate2::bufread::DeflateDecoder;
use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use std::io::{Read, SeekFrom};

#[cfg(feature = "hash")]
use sha2::{Digest, Sha256};

/// A fully materialised, read-only view of one ZIP member's uncompressed
/// bytes.
pub struct Segment {
    urn: Urn,
    buf: Vec<u8>,
    position: u64,
}

impl Segment {
    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    /// Construct from resolver state alone: resolve the owning volume's
    /// backing storage, read the compressed bytes at `file_offset`, and
    /// inflate them in full.
    pub fn open_read(cache: &mut ObjectCache, resolver: &mut Resolver, urn: &Urn) -> Aff4Result<Segment> {
        let container_urn = resolver
            .resolve(urn, vocab::STORED)
            .and_then(|v| v.as_urn().cloned())
            .ok_or_else(|| Aff4Error::not_found(format!("{urn}: no container volume recorded")))?;
        let storage_urn = resolver
            .resolve(&container_urn, vocab::STORED)
            .and_then(|v| v.as_urn().cloned())
            .ok_or_else(|| Aff4Error::not_found(format!("{container_urn}: no backing storage recorded")))?;

        let compression = resolver
            .resolve(urn, vocab::COMPRESSION)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Aff4Error::runtime(format!("{urn}: compression method not recorded")))? as u16;
        let file_offset = resolver
            .resolve(urn, vocab::FILE_OFFSET)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Aff4Error::runtime(format!("{urn}: file offset not recorded")))?;
        let size = resolver.resolve(urn, vocab::SIZE).and_then(|v| v.as_u64()).unwrap_or(0);
        let compressed_size = resolver
            .resolve(urn, vocab::COMPRESSED_SIZE)
            .and_then(|v| v.as_u64())
            .unwrap_or(size);

        let mut handle = cache.open(resolver, &storage_urn, Mode::Read)?;
        let read_result = (|| -> Aff4Result<Vec<u8>> {
            let file = handle.object.as_file_like_mut()?;
            file.seek(SeekFrom::Start(file_offset))?;
            let mut compressed = vec![0u8; compressed_size as usize];
            read_exact(file, &mut compressed)?;
            Ok(compressed)
        })();
        cache.cache_return(handle, resolver);
        let compressed = read_result?;

        let buf = match compression {
            c if c == COMPRESSION_STORED => compressed,
            c if c == COMPRESSION_DEFLATE => {
                let mut decoder = DeflateDecoder::new(&compressed[..]);
                let mut out = Vec::with_capacity(size as usize);
                decoder.read_to_end(&mut out)?;
                out
            }
            other => {
                return Err(Aff4Error::invalid_format(format!(
                    "{urn}: unsupported compression method {other}"
                )))
            }
        };

        Ok(Segment {
            urn: urn.clone(),
            buf,
            position: 0,
        })
    }
}

impl FileLike for Segment {
    fn read(&mut self, buf: &mut [u8]) -> Aff4Result<usize> {
        let pos = self.position as usize;
        if pos >= self.buf.len() {
            return Ok(0);
        }
        let n = (self.buf.len() - pos).min(buf.len());
        buf[..n].copy_from_slice(&self.buf[pos..pos + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Aff4Result<usize> {
        Err(Aff4Error::runtime("segment opened for read is not writable"))
    }

    fn seek(&mut self, pos: SeekFrom) -> Aff4Result<u64> {
        let size = self.buf.len() as i64;
        let new_pos = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::Current(o) => self.position as i64 + o,
            SeekFrom::End(o) => size + o,
        };
        if new_pos < 0 {
            return Err(Aff4Error::runtime("seek before start of segment"));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }

    fn truncate(&mut self, _offset: u64) -> Aff4Result<()> {
        Err(Aff4Error::runtime("a read-mode segment cannot be truncated"))
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    fn close(&mut self, _resolver: &mut Resolver) -> Aff4Result<()> {
        Ok(())
    }
}

/// A ZIP member open for write. Not part of `CachedObject`: ownership lives
/// entirely with the caller, who must call [`WriteSegment::close`] exactly
/// once. This is the Rust expression of "write-mode destructor discipline"
/// (§4.G): the type system keeps it out of the LRU, and `Drop` logs loudly
/// if it is ever dropped unclosed instead.
pub struct WriteSegment {
    urn: Urn,
    container_urn: Urn,
    handle: Option<Handle>,
    compression: u16,
    file_offset: u64,
    crc: Crc,
    compress: Option<Compress>,
    uncompressed_size: u64,
    compressed_size: u64,
    #[cfg(feature = "hash")]
    hasher: Option<Sha256>,
    closed: bool,
}

impl WriteSegment {
    pub(crate) fn new(urn: Urn, container_urn: Urn, handle: Handle, compression: u16, file_offset: u64) -> Self {
        let compress = (compression == COMPRESSION_DEFLATE)
            .then(|| Compress::new(Compression::new(9), false));
        WriteSegment {
            urn,
            container_urn,
            handle: Some(handle),
            compression,
            file_offset,
            crc: Crc::new(),
            compress,
            uncompressed_size: 0,
            compressed_size: 0,
            #[cfg(feature = "hash")]
            hasher: Some(Sha256::new()),
            closed: false,
        }
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    fn file_mut(&mut self) -> Aff4Result<&mut dyn FileLike> {
        self.handle
            .as_mut()
            .expect("write segment used after close")
            .object
            .as_file_like_mut()
    }

    pub fn write(&mut self, buf: &[u8]) -> Aff4Result<usize> {
        self.crc.update(buf);
        #[cfg(feature = "hash")]
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(buf);
        }
        self.uncompressed_size += buf.len() as u64;

        if self.compression == COMPRESSION_DEFLATE {
            let mut input = buf;
            let mut out = [0u8; 8192];
            loop {
                let compress = self.compress.as_mut().expect("deflate compressor missing");
                let before_in = compress.total_in();
                let before_out = compress.total_out();
                compress
                    .compress(input, &mut out, FlushCompress::None)
                    .map_err(|e| Aff4Error::runtime(format!("deflate error: {e}")))?;
                let consumed = (compress.total_in() - before_in) as usize;
                let produced = (compress.total_out() - before_out) as usize;
                if produced > 0 {
                    self.compressed_size += produced as u64;
                    write_all(self.file_mut()?, &out[..produced])?;
                }
                input = &input[consumed..];
                if input.is_empty() {
                    break;
                }
            }
        } else {
            self.compressed_size += buf.len() as u64;
            write_all(self.file_mut()?, buf)?;
        }
        Ok(buf.len())
    }

    /// Finish the deflate stream (if any), write the trailing data
    /// descriptor, publish final attributes to the resolver, and release
    /// the lock on the backing volume file.
    pub fn close(mut self, cache: &mut ObjectCache, resolver: &mut Resolver) -> Aff4Result<()> {
        if self.compression == COMPRESSION_DEFLATE {
            let mut out = [0u8; 8192];
            loop {
                let compress = self.compress.as_mut().expect("deflate compressor missing");
                let before_out = compress.total_out();
                let status = compress
                    .compress(&[], &mut out, FlushCompress::Finish)
                    .map_err(|e| Aff4Error::runtime(format!("deflate finish error: {e}")))?;
                let produced = (compress.total_out() - before_out) as usize;
                if produced > 0 {
                    self.compressed_size += produced as u64;
                    write_all(self.file_mut()?, &out[..produced])?;
                }
                if status == Status::StreamEnd {
                    break;
                }
            }
        }

        let crc_sum = self.crc.sum();
        let need_zip64 =
            self.file_offset > ZIP64_LIMIT || self.compressed_size > ZIP64_LIMIT || self.uncompressed_size > ZIP64_LIMIT;

        {
            let file = self.file_mut()?;
            write_all(file, &DATA_DESCRIPTOR_SIG.to_le_bytes())?;
            write_all(file, &crc_sum.to_le_bytes())?;
            if need_zip64 {
                write_all(file, &self.compressed_size.to_le_bytes())?;
                write_all(file, &self.uncompressed_size.to_le_bytes())?;
            } else {
                write_all(file, &(self.compressed_size as u32).to_le_bytes())?;
                write_all(file, &(self.uncompressed_size as u32).to_le_bytes())?;
            }
        }
        let new_directory_offset = self.file_mut()?.tell();

        resolver.add(&self.container_urn, vocab::CONTAINS, Value::from(self.urn.clone()));
        resolver.set(&self.urn, vocab::STORED, Value::from(self.container_urn.clone()));
        resolver.set(&self.urn, vocab::TIMESTAMP, Value::Integer(chrono::Local::now().timestamp()));
        resolver.set(&self.urn, vocab::SIZE, Value::from(self.uncompressed_size));
        resolver.set(&self.urn, vocab::COMPRESSED_SIZE, Value::from(self.compressed_size));
        resolver.set(&self.urn, vocab::CRC, Value::Integer(crc_sum as i64));
        resolver.set(&self.container_urn, vocab::DIRECTORY_OFFSET, Value::from(new_directory_offset));

        #[cfg(feature = "hash")]
        if let Some(hasher) = self.hasher.take() {
            resolver.set(&self.urn, vocab::HASH, Value::Bytes(hasher.finalize().to_vec()));
        }

        let handle = self.handle.take().expect("write segment closed twice");
        cache.cache_return(handle, resolver);
        self.closed = true;
        Ok(())
    }
}

impl Drop for WriteSegment {
    fn drop(&mut self) {
        if !self.closed && self.handle.is_some() {
            log::error!(
                "segment {} was dropped without close(): its container's directory is now \
                 inconsistent and its backing volume remains locked",
                self.urn
            );
        }
    }
}

fn read_exact(file: &mut dyn FileLike, buf: &mut [u8]) -> Aff4Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Aff4Error::invalid_format("unexpected end of stream while reading segment data"));
        }
        filled += n;
    }
    Ok(())
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
