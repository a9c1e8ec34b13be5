//! Typed RDF values (§3 "Typed value").
//!
//! The C original has a whole `RDFValue` virtual hierarchy
//! (`XSDInteger`, `XSDString`, `RDFURN`, ...), each serialisable to/from a
//! textual encoding. We collapse that into one tagged union: the resolver
//! only ever needs to move these around, compare them, and hand them to the
//! RDF adapter for textual (de)serialisation.

use crate::urn::Urn;
use std::fmt;

/// A single typed attribute value stored against a `(subject, predicate)`
/// pair in the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// `xsd:integer`-equivalent. Used for sizes, offsets, timestamps, CRCs.
    Integer(i64),
    /// `xsd:string`-equivalent.
    String(String),
    /// A reference to another artefact.
    Urn(Urn),
    /// Opaque binary payload (e.g. a digest) with no textual RDF mapping
    /// beyond hex.
    Bytes(Vec<u8>),
}

impl Value {
    /// Textual round-trip encoding used by the RDF adapter when
    /// serialising a triple's object.
    pub fn to_text(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::String(s) => s.clone(),
            Value::Urn(u) => u.value().to_string(),
            Value::Bytes(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(|i| u64::try_from(i).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_urn(&self) -> Option<&Urn> {
        match self {
            Value::Urn(u) => Some(u),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Urn> for Value {
    fn from(u: Urn) -> Self {
        Value::Urn(u)
    }
}
