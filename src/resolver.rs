//! The resolver: an in-memory, typed, multi-valued triple store (§3, §4.B).
//!
//! Logical schema: `Map<Urn, Map<predicate, Vec<Value>>>` with
//! insertion-ordered value lists. This is the "oracle" of the C original
//! (`CALL(oracle, resolve_value, ...)`, `CALL(oracle, set_value, ...)`,
//! `CALL(oracle, add_value, ...)`) re-expressed as an owned Rust value
//! rather than a process-wide singleton (see SPEC_FULL.md §5).

use crate::urn::Urn;
use crate::value::Value;
use crate::vocab::is_volatile;
use log::trace;
use std::collections::HashMap;

/// The triple store. Cheap to construct (`Resolver::new()`); owned by
/// whoever drives the AFF4 session (typically alongside an `ObjectCache`).
#[derive(Default)]
pub struct Resolver {
    subjects: HashMap<Urn, HashMap<String, Vec<Value>>>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver {
            subjects: HashMap::new(),
        }
    }

    /// Replace the predicate's value list with the single value `v`.
    pub fn set(&mut self, subject: &Urn, predicate: &str, value: Value) {
        trace!("resolver: set({subject}, {predicate}, {value})");
        self.subjects
            .entry(subject.clone())
            .or_default()
            .insert(predicate.to_string(), vec![value]);
    }

    /// Append `v` to the predicate's value list, preserving insertion order.
    pub fn add(&mut self, subject: &Urn, predicate: &str, value: Value) {
        trace!("resolver: add({subject}, {predicate}, {value})");
        self.subjects
            .entry(subject.clone())
            .or_default()
            .entry(predicate.to_string())
            .or_default()
            .push(value);
    }

    /// The first value stored for `(subject, predicate)`, if any.
    pub fn resolve(&self, subject: &Urn, predicate: &str) -> Option<Value> {
        self.subjects
            .get(subject)?
            .get(predicate)?
            .first()
            .cloned()
    }

    /// A snapshot of every value stored for `(subject, predicate)`, in
    /// insertion order. Returned as an owned `Vec` (rather than a live
    /// iterator borrowing `self`) so that later mutation of the resolver
    /// can never observe a half-updated snapshot (§4.B).
    pub fn iter(&self, subject: &Urn, predicate: &str) -> std::vec::IntoIter<Value> {
        self.subjects
            .get(subject)
            .and_then(|preds| preds.get(predicate))
            .cloned()
            .unwrap_or_default()
            .into_iter()
    }

    /// Drop `predicate` for `subject`; if `predicate` is `None`, drop every
    /// predicate for `subject`.
    pub fn del(&mut self, subject: &Urn, predicate: Option<&str>) {
        match predicate {
            Some(p) => {
                if let Some(preds) = self.subjects.get_mut(subject) {
                    preds.remove(p);
                }
            }
            None => {
                self.subjects.remove(subject);
            }
        }
    }

    /// True if the resolver has ever heard of `subject`.
    pub fn has_subject(&self, subject: &Urn) -> bool {
        self.subjects.contains_key(subject)
    }

    /// Every `(predicate, value)` pair for `subject` that is *not* volatile
    /// (§3), in the stable order the RDF serialiser should emit them: this
    /// is the projection `serialise(urns, out)` (§6) operates over.
    pub fn non_volatile_triples(&self, subject: &Urn) -> Vec<(String, Value)> {
        let Some(preds) = self.subjects.get(subject) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (predicate, values) in preds {
            if is_volatile(predicate) {
                continue;
            }
            for value in values {
                out.push((predicate.clone(), value.clone()));
            }
        }
        out
    }
}
