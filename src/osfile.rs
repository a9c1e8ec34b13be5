//! OS-backed file artefact (§4.D), the `AFF4_FILE` registered type.
//!
//! Grounded on the C original's `FileBackedObject`: a thin wrapper around a
//! native file descriptor that keeps its own read/write cursor (mirroring
//! `self->readptr`) rather than relying on the OS cursor, since the object
//! can be interleaved with other seeks on the same `fd` by its owner.

use crate::error::{Aff4Error, Aff4Result};
use crate::object::{FileLike, Mode};
use crate::resolver::Resolver;
use crate::urn::Urn;
use crate::vocab;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A single OS file, opened either for read or for read/write/create.
pub struct OsFile {
    urn: Urn,
    mode: Mode,
    file: File,
    position: u64,
}

impl OsFile {
    /// Open the local filesystem path named by `urn` (a `file://` URN).
    ///
    /// `mode == Write` creates the file if it does not exist, mirroring
    /// `O_CREAT | O_RDWR` in `FileBackedObject_AFFObject_Con`.
    pub fn open(urn: &Urn, mode: Mode) -> Aff4Result<Self> {
        let path = local_path(urn)?;
        let file = match mode {
            Mode::Read => OpenOptions::new().read(true).open(path)?,
            Mode::Write => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };
        Ok(OsFile {
            urn: urn.clone(),
            mode,
            file,
            position: 0,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

/// Resolve a `file://` (or bare-path) URN into a filesystem path, rejecting
/// any other scheme the way `FileBackedObject_AFFObject_Con` does.
fn local_path(urn: &Urn) -> Aff4Result<&Path> {
    match urn.scheme() {
        None | Some("file") => {
            let value = urn.value();
            let stripped = value.strip_prefix("file://").unwrap_or(value);
            Ok(Path::new(stripped))
        }
        Some(other) => Err(Aff4Error::runtime(format!(
            "OsFile must be opened with a file:// scheme, got {other}://"
        ))),
    }
}

impl FileLike for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> Aff4Result<usize> {
        self.file.seek(SeekFrom::Start(self.position))?;
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Aff4Result<usize> {
        self.file.seek(SeekFrom::Start(self.position))?;
        let n = self.file.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Aff4Result<u64> {
        // Mirror the C original: a failed seek clamps to 0 rather than
        // propagating, since the cursor is advisory state we fully own.
        self.position = self.file.seek(pos).unwrap_or(0);
        Ok(self.position)
    }

    fn truncate(&mut self, offset: u64) -> Aff4Result<()> {
        self.file.set_len(offset)?;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn close(&mut self, resolver: &mut Resolver) -> Aff4Result<()> {
        self.file.flush()?;
        resolver.set(&self.urn, vocab::SIZE, crate::value::Value::from(self.size()));
        Ok(())
    }
}
