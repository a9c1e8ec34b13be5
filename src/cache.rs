//! The object cache: a soft-limited LRU of artefact instances, plus the
//! type-dispatch registry that lazily reconstructs an object from whatever
//! the resolver already knows about its URN (§4.C).
//!
//! This is a from-scratch Rust re-expression of the C original's `Cache`
//! and its `oracle, cache_return` checkout convention (`lib/zip.c`). Rust's
//! ownership rules make the "skip entries still in use" scan an intrusive
//! cache list needs unnecessary: a checked-out object is *moved out* of the
//! LRU into the caller's `Handle` and tracked in `checked_out`, so the LRU
//! structure (`lru` crate) only ever contains objects that are safe to
//! evict. `cache_return` moves the object back.

use crate::error::{Aff4Error, Aff4Result};
use crate::object::Mode;
use crate::osfile::OsFile;
use crate::resolver::Resolver;
use crate::urn::Urn;
use crate::vocab;
use crate::zip::segment::Segment;
use crate::zip::volume::Volume;
use lru::LruCache;
use std::collections::HashMap;
use std::collections::HashSet;
use std::num::NonZeroUsize;

/// The concrete kinds a type-registry constructor can produce. A tagged
/// union rather than `Box<dyn FileLike>` because the set of registered
/// types is closed and small (§9 "Polymorphism").
pub enum CachedObject {
    File(OsFile),
    Volume(Volume),
    Segment(Segment),
}

impl CachedObject {
    pub fn urn(&self) -> &Urn {
        match self {
            CachedObject::File(f) => f.urn(),
            CachedObject::Volume(v) => v.urn(),
            CachedObject::Segment(s) => s.urn(),
        }
    }

    /// Borrow this object through the uniform stream contract. Fails for
    /// `Volume`, which is a container rather than a byte stream.
    pub fn as_file_like_mut(&mut self) -> Aff4Result<&mut dyn crate::object::FileLike> {
        match self {
            CachedObject::File(f) => Ok(f),
            CachedObject::Segment(s) => Ok(s),
            CachedObject::Volume(_) => Err(Aff4Error::runtime(
                "a volume is a container, not a file-like stream",
            )),
        }
    }

    /// Flush/publish hook run both on explicit `cache_return`-then-evict and
    /// on whole-cache shutdown. Volumes are not auto-closed this way: a
    /// volume opened for write must be closed explicitly via
    /// `Aff4Core::close_volume` because closing rewrites its central
    /// directory, which is too expensive (and order-sensitive with sibling
    /// segments) to trigger implicitly from an eviction scan.
    fn flush_on_evict(&mut self, resolver: &mut Resolver) -> Aff4Result<()> {
        use crate::object::FileLike;
        match self {
            CachedObject::File(f) => f.close(resolver),
            CachedObject::Volume(_) => Ok(()),
            CachedObject::Segment(s) => s.close(resolver),
        }
    }
}

/// A constructor callback for a registered type: given the cache itself
/// (so e.g. a volume can recursively open its backing storage), the
/// resolver, the URN being instantiated and the requested mode, produce a
/// fresh object.
type Constructor = fn(&mut ObjectCache, &mut Resolver, &Urn, Mode) -> Aff4Result<CachedObject>;

/// A checked-out object, returned by `ObjectCache::open`. Must eventually
/// be handed back via `ObjectCache::cache_return` (or, for a write-mode
/// volume, consumed by `Aff4Core::close_volume`).
pub struct Handle {
    urn: Urn,
    pub object: CachedObject,
}

impl Handle {
    /// Wrap an object the caller already owns (e.g. one it took out of the
    /// cache with [`ObjectCache::forget`]) back into a `Handle`, so it can
    /// be handed to an API that consumes one — such as
    /// [`crate::zip::volume::Volume::close_handle`].
    pub fn new(urn: Urn, object: CachedObject) -> Self {
        Handle { urn, object }
    }
}

pub struct ObjectCache {
    registry: HashMap<&'static str, Constructor>,
    lru: LruCache<Urn, CachedObject>,
    checked_out: HashSet<Urn>,
    soft_limit: usize,
}

impl ObjectCache {
    pub fn new(soft_limit: usize) -> Self {
        let mut registry: HashMap<&'static str, Constructor> = HashMap::new();
        registry.insert(vocab::AFF4_FILE, construct_file);
        registry.insert(vocab::AFF4_ZIP_VOLUME, construct_volume);
        registry.insert(vocab::AFF4_SEGMENT, construct_segment);
        ObjectCache {
            registry,
            lru: LruCache::unbounded(),
            checked_out: HashSet::new(),
            soft_limit,
        }
    }

    /// Register (or override) the constructor for `type_uri`. Exposed so an
    /// embedding application can add its own registered types without
    /// forking the cache.
    pub fn register(&mut self, type_uri: &'static str, ctor: Constructor) {
        self.registry.insert(type_uri, ctor);
    }

    /// Open `urn` for `mode`: reuse it if idle in the cache, reconstruct it
    /// from resolver state if it has been evicted or never instantiated,
    /// or fail with `Busy` if another handle currently holds it.
    pub fn open(&mut self, resolver: &mut Resolver, urn: &Urn, mode: Mode) -> Aff4Result<Handle> {
        if self.checked_out.contains(urn) {
            return Err(Aff4Error::Busy(urn.clone()));
        }
        if let Some(object) = self.lru.pop(urn) {
            self.checked_out.insert(urn.clone());
            return Ok(Handle {
                urn: urn.clone(),
                object,
            });
        }

        let type_value = resolver
            .resolve(urn, vocab::TYPE)
            .ok_or_else(|| Aff4Error::not_found(urn))?;
        let type_str = type_value
            .as_str()
            .ok_or_else(|| Aff4Error::invalid_format(format!("{urn}: {} is not a string", vocab::TYPE)))?
            .to_string();
        let ctor = *self
            .registry
            .get(type_str.as_str())
            .ok_or_else(|| Aff4Error::not_found(format!("no constructor registered for type {type_str}")))?;

        self.checked_out.insert(urn.clone());
        match ctor(self, resolver, urn, mode) {
            Ok(object) => Ok(Handle {
                urn: urn.clone(),
                object,
            }),
            Err(e) => {
                self.checked_out.remove(urn);
                Err(e)
            }
        }
    }

    /// Hand a checked-out object back to the cache, making it eligible for
    /// reuse and eviction again.
    pub fn cache_return(&mut self, handle: Handle, resolver: &mut Resolver) {
        self.checked_out.remove(&handle.urn);
        self.lru.put(handle.urn, handle.object);
        self.evict_if_needed(resolver);
    }

    /// Forget about a checked-out object without returning it to the cache
    /// (used when a caller consumes the object directly, e.g.
    /// `close_volume`).
    pub fn forget(&mut self, urn: &Urn) {
        self.checked_out.remove(urn);
    }

    fn evict_if_needed(&mut self, resolver: &mut Resolver) {
        while self.lru.len() > self.soft_limit {
            match self.lru.pop_lru() {
                Some((_, mut object)) => {
                    let _ = object.flush_on_evict(resolver);
                }
                None => break,
            }
        }
    }
}

impl ObjectCache {
    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_SOFT_LIMIT)
    }
}

const DEFAULT_SOFT_LIMIT: usize = 1000;

fn construct_file(
    _cache: &mut ObjectCache,
    _resolver: &mut Resolver,
    urn: &Urn,
    mode: Mode,
) -> Aff4Result<CachedObject> {
    Ok(CachedObject::File(OsFile::open(urn, mode)?))
}

fn construct_volume(
    cache: &mut ObjectCache,
    resolver: &mut Resolver,
    urn: &Urn,
    mode: Mode,
) -> Aff4Result<CachedObject> {
    Ok(CachedObject::Volume(Volume::load_from(
        cache, resolver, urn, mode,
    )?))
}

fn construct_segment(
    cache: &mut ObjectCache,
    resolver: &mut Resolver,
    urn: &Urn,
    mode: Mode,
) -> Aff4Result<CachedObject> {
    if mode == Mode::Write {
        return Err(Aff4Error::runtime(
            "segments must be opened for write via Volume::open_member, not the generic registry",
        ));
    }
    Ok(CachedObject::Segment(Segment::open_read(
        cache, resolver, urn,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_urn(resolver: &mut Resolver, path: &str) -> Urn {
        let urn = Urn::new(format!("file://{path}"));
        resolver.set(&urn, vocab::TYPE, crate::value::Value::from(vocab::AFF4_FILE));
        urn
    }

    #[test]
    fn second_open_of_checked_out_urn_is_busy() {
        let dir = tempdir_path();
        let mut resolver = Resolver::new();
        let mut cache = ObjectCache::new(10);
        let urn = file_urn(&mut resolver, &format!("{dir}/a.bin"));

        let handle = cache.open(&mut resolver, &urn, Mode::Write).unwrap();
        let second = cache.open(&mut resolver, &urn, Mode::Write);
        assert!(matches!(second, Err(Aff4Error::Busy(_))));
        cache.cache_return(handle, &mut resolver);

        // Once returned, a fresh open succeeds again.
        let handle2 = cache.open(&mut resolver, &urn, Mode::Write).unwrap();
        cache.cache_return(handle2, &mut resolver);
        std::fs::remove_file(format!("{dir}/a.bin")).ok();
    }

    #[test]
    fn eviction_respects_soft_limit_and_skips_checked_out() {
        let dir = tempdir_path();
        let mut resolver = Resolver::new();
        let mut cache = ObjectCache::new(1);

        let urn_a = file_urn(&mut resolver, &format!("{dir}/a.bin"));
        let urn_b = file_urn(&mut resolver, &format!("{dir}/b.bin"));

        let handle_a = cache.open(&mut resolver, &urn_a, Mode::Write).unwrap();
        cache.cache_return(handle_a, &mut resolver);
        let handle_b = cache.open(&mut resolver, &urn_b, Mode::Write).unwrap();
        cache.cache_return(handle_b, &mut resolver);

        // soft_limit=1: urn_a should have been evicted to make room for b.
        assert!(!cache.checked_out.contains(&urn_a));
        assert_eq!(cache.lru.len(), 1);
        assert!(cache.lru.contains(&urn_b));

        std::fs::remove_file(format!("{dir}/a.bin")).ok();
        std::fs::remove_file(format!("{dir}/b.bin")).ok();
    }

    fn tempdir_path() -> String {
        let dir = std::env::temp_dir().join(format!(
            "aff4_core_cache_test_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_string_lossy().into_owned()
    }
}
