//! The capability set every artefact implements (§3 "Object", §9
//! "Polymorphism").
//!
//! The C original's class hierarchy
//! (`AFFObject → FileLikeObject → {FileBackedObject, ZipFileStream}`) is
//! re-expressed here as a small trait plus a tagged union of concrete
//! variants (`CachedObject`, in `cache.rs`) rather than a `dyn` trait
//! object hierarchy: there are exactly three concrete kinds the resolver's
//! type registry can produce, and matching on an enum is both cheaper and
//! easier to follow than object-oriented dispatch for a closed set this
//! small.

use crate::error::Aff4Result;
use crate::resolver::Resolver;
use std::io::SeekFrom;

/// The mode an object (or a file-like stream) was opened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// Uniform read/write/seek/truncate/close contract (§4.D) implemented by
/// both the OS-backed file and the ZIP segment stream.
///
/// `close` is the one operation that needs the resolver: on close, an
/// object publishes its final attributes (size, crc, ...) back into the
/// triple store. Every other operation is pure local state, so it does not
/// take a resolver parameter.
pub trait FileLike {
    fn read(&mut self, buf: &mut [u8]) -> Aff4Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Aff4Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> Aff4Result<u64>;
    fn truncate(&mut self, offset: u64) -> Aff4Result<()>;
    fn tell(&self) -> u64;
    fn size(&self) -> u64;
    fn close(&mut self, resolver: &mut Resolver) -> Aff4Result<()>;
}
