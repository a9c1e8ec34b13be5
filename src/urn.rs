//! URN handling (§3, §4.A).
//!
//! A URN is kept as its plain authoritative lexical form (`scheme:path...`);
//! we never decompose it into a richer parsed structure the way the C
//! original's `RDFURN` does with a cached `parser` struct, since the only
//! operations the core needs are textual: `add`, `relative_name`, and byte
//! equality. Anything heavier belongs to the (out-of-scope) RDF layer.

use std::fmt;

/// A Uniform Resource Name identifying an AFF4 artefact.
///
/// Cheap to clone (it is just an owned `String`); cheap to compare (byte
/// equality, per §3).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Urn(String);

impl Urn {
    /// Parse `s` into a URN, preserving it verbatim as the lexical form.
    pub fn new(s: impl Into<String>) -> Self {
        Urn(s.into())
    }

    /// The full lexical value, e.g. `"aff4://...some-uuid.../hello"`.
    pub fn value(&self) -> &str {
        &self.0
    }

    /// `scheme:` prefix, if any (e.g. `"file"`, `"aff4"`).
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once(':').map(|(scheme, _)| scheme)
    }

    /// Overwrite this URN's lexical value in place, mirroring the C
    /// original's `URN::set`. Used when an EOCD comment supplies a more
    /// authoritative identity for an already-allocated volume URN.
    pub fn set(&mut self, s: impl Into<String>) {
        self.0 = s.into();
    }

    /// Return a new URN with `name` appended as a path component,
    /// collapsing any doubled separator at the join point.
    ///
    /// Mirrors `URN::add` / `RDFURN::add`: the suffix is joined with `/`,
    /// and a leading `/` already present on either side is not duplicated.
    pub fn add(&self, name: &str) -> Urn {
        let base = self.0.trim_end_matches('/');
        let suffix = name.trim_start_matches('/');
        if suffix.is_empty() {
            return Urn(base.to_string());
        }
        Urn(format!("{base}/{suffix}"))
    }

    /// Strip `base` (plus the `/` separator) from the front of `self` if
    /// `self` begins with it; otherwise return `self` verbatim.
    ///
    /// This is used to compute a segment's on-disk (relative) name from
    /// its fully-qualified URN and the owning volume's URN.
    pub fn relative_name(&self, base: &Urn) -> &str {
        let base_str = base.0.trim_end_matches('/');
        if let Some(rest) = self.0.strip_prefix(base_str) {
            if let Some(rest) = rest.strip_prefix('/') {
                return rest;
            }
            if rest.is_empty() {
                return "";
            }
        }
        &self.0
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Urn {
    fn from(s: &str) -> Self {
        Urn::new(s)
    }
}

impl From<String> for Urn {
    fn from(s: String) -> Self {
        Urn::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_joins_with_single_slash() {
        let base = Urn::new("aff4://volume");
        assert_eq!(base.add("hello").value(), "aff4://volume/hello");
        assert_eq!(base.add("/hello").value(), "aff4://volume/hello");
    }

    #[test]
    fn add_on_trailing_slash_base_does_not_double() {
        let base = Urn::new("aff4://volume/");
        assert_eq!(base.add("hello").value(), "aff4://volume/hello");
    }

    #[test]
    fn relative_name_strips_prefix_at_separator_boundary() {
        let base = Urn::new("aff4://volume");
        let child = Urn::new("aff4://volume/hello");
        assert_eq!(child.relative_name(&base), "hello");
    }

    #[test]
    fn relative_name_verbatim_when_not_a_prefix() {
        let base = Urn::new("aff4://volume");
        let other = Urn::new("aff4://other/hello");
        assert_eq!(other.relative_name(&base), "aff4://other/hello");
    }

    #[test]
    fn relative_name_does_not_strip_on_partial_segment_match() {
        // "aff4://volumeXYZ" must not be treated as a child of "aff4://volume"
        let base = Urn::new("aff4://volume");
        let lookalike = Urn::new("aff4://volumeXYZ");
        assert_eq!(lookalike.relative_name(&base), "aff4://volumeXYZ");
    }

    #[test]
    fn scheme_extracts_prefix() {
        assert_eq!(Urn::new("file:///tmp/x").scheme(), Some("file"));
        assert_eq!(Urn::new("no-scheme-here").scheme(), None);
    }
}
