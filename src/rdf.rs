//! Pluggable RDF manifest adapter (§6).
//!
//! The C original links directly against an internal `RDFParser` /
//! `RDFSerializer` pair dispatched by a format-name string (`"turtle"`,
//! `"rdf"`, ...). We express the same seam as a trait so an embedding
//! application can swap in a different RDF library, and ship one default
//! implementation, `TurtleAdapter`, built on the teacher's own (until now
//! unused) `rio_turtle` / `rio_api` dependencies.

use crate::error::{Aff4Error, Aff4Result};
use crate::resolver::Resolver;
use crate::urn::Urn;
use crate::value::Value;
use rio_api::formatter::TriplesFormatter;
use rio_api::model::{Literal, NamedNode, Subject, Term, Triple};
use rio_api::parser::TriplesParser;
use rio_turtle::{TurtleError, TurtleFormatter, TurtleParser};
use std::io::Cursor;

/// The seam between the resolver and a textual RDF manifest. `parse_into`
/// feeds every triple it reads straight into the resolver via `add`;
/// `serialize` walks `resolver.non_volatile_triples` for the given subjects.
pub trait RdfAdapter {
    fn parse_into(&self, data: &[u8], default_base: &Urn, resolver: &mut Resolver) -> Aff4Result<()>;
    fn serialize(&self, resolver: &Resolver, subjects: &[Urn]) -> Aff4Result<Vec<u8>>;
}

/// Default adapter: Turtle syntax via `rio_turtle`.
pub struct TurtleAdapter;

impl RdfAdapter for TurtleAdapter {
    fn parse_into(&self, data: &[u8], default_base: &Urn, resolver: &mut Resolver) -> Aff4Result<()> {
        let mut parser = TurtleParser::new(Cursor::new(data), None);
        let base = default_base.clone();
        parser
            .parse_all(&mut |triple: Triple| -> Result<(), TurtleError> {
                let subject = match triple.subject {
                    Subject::NamedNode(n) => n.iri.to_string(),
                    Subject::BlankNode(b) => format!("_:{}", b.id),
                    _ => return Ok(()),
                };
                let predicate = triple.predicate.iri.to_string();
                let value = match triple.object {
                    Term::NamedNode(n) => Value::Urn(Urn::new(n.iri.to_string())),
                    Term::Literal(Literal::Simple { value }) => Value::String(value.to_string()),
                    Term::Literal(Literal::LanguageTaggedString { value, .. }) => {
                        Value::String(value.to_string())
                    }
                    Term::Literal(Literal::Typed { value, .. }) => Value::String(value.to_string()),
                    _ => return Ok(()),
                };
                resolver.add(&Urn::new(subject), &predicate, value);
                Ok(())
            })
            .map_err(|e| Aff4Error::invalid_format(format!("turtle parse error relative to {base}: {e}")))?;
        Ok(())
    }

    fn serialize(&self, resolver: &Resolver, subjects: &[Urn]) -> Aff4Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut formatter = TurtleFormatter::new(&mut out);
            for urn in subjects {
                let subject_node = NamedNode { iri: urn.value() };
                for (predicate, value) in resolver.non_volatile_triples(urn) {
                    let predicate_node = NamedNode { iri: &predicate };
                    match &value {
                        Value::Urn(u) => {
                            let triple = Triple {
                                subject: Subject::NamedNode(subject_node),
                                predicate: predicate_node,
                                object: Term::NamedNode(NamedNode { iri: u.value() }),
                            };
                            formatter.format(&triple).map_err(Aff4Error::Io)?;
                        }
                        other => {
                            let text = other.to_text();
                            let triple = Triple {
                                subject: Subject::NamedNode(subject_node),
                                predicate: predicate_node,
                                object: Term::Literal(Literal::Simple { value: &text }),
                            };
                            formatter.format(&triple).map_err(Aff4Error::Io)?;
                        }
                    }
                }
            }
            formatter.finish().map_err(Aff4Error::Io)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab;

    #[test]
    fn serialize_then_parse_round_trips_non_volatile_triples() {
        let mut resolver = Resolver::new();
        let subject = Urn::new("aff4://e6cdff.../image.raw");
        resolver.set(&subject, vocab::SIZE, Value::Integer(42));
        resolver.set(&subject, vocab::TYPE, Value::from(vocab::AFF4_FILE));
        // Volatile predicates must never round-trip through the manifest.
        resolver.set(&subject, vocab::DIRTY, Value::Integer(1));

        let adapter = TurtleAdapter;
        let turtle = adapter.serialize(&resolver, &[subject.clone()]).unwrap();

        let mut reparsed = Resolver::new();
        adapter.parse_into(&turtle, &subject, &mut reparsed).unwrap();

        assert_eq!(reparsed.resolve(&subject, vocab::SIZE), Some(Value::String("42".to_string())));
        assert!(reparsed.resolve(&subject, vocab::DIRTY).is_none());
    }
}
