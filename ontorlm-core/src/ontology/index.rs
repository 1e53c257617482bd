//! Ontology metadata index: classes, properties, labels, hierarchy,
//! domains/ranges, and predicate frequency over an in-memory RDF graph.

use super::format::OntologyFormat;
use super::jsonld;
use crate::error::{Error, Result};
use indexmap::{IndexMap, IndexSet};
use oxigraph::io::RdfFormat;
use oxigraph::model::{NamedNodeRef, Quad, Subject, Term};
use oxigraph::store::Store;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const OWL_CLASS: &str = "http://www.w3.org/2002/07/owl#Class";
const OWL_OBJECT_PROPERTY: &str = "http://www.w3.org/2002/07/owl#ObjectProperty";
const OWL_DATATYPE_PROPERTY: &str = "http://www.w3.org/2002/07/owl#DatatypeProperty";
const OWL_ANNOTATION_PROPERTY: &str = "http://www.w3.org/2002/07/owl#AnnotationProperty";
const RDFS_SUBCLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
const RDFS_SUBPROPERTY_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subPropertyOf";
const RDFS_DOMAIN: &str = "http://www.w3.org/2000/01/rdf-schema#domain";
const RDFS_RANGE: &str = "http://www.w3.org/2000/01/rdf-schema#range";
const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";

/// A candidate `rdfs:label` literal observed for a subject, kept until
/// label-preference resolution runs once the whole graph has been walked.
#[derive(Debug, Clone)]
struct LabelCandidate {
    text: String,
    lang: Option<String>,
}

/// Structured view over a parsed RDF ontology.
///
/// All maps preserve first-seen (insertion) order so that re-running
/// [`build_index`] over the same source produces byte-identical
/// [`summary`] output.
pub struct OntologyIndex {
    /// Backing triple store, retained for tool-time SPARQL queries.
    pub graph: Store,
    /// Prefix -> IRI, seeded with common well-known prefixes plus any
    /// caller-supplied `extra_namespaces`.
    pub namespaces: IndexMap<String, String>,
    pub classes: IndexSet<String>,
    pub properties: IndexSet<String>,
    pub labels: IndexMap<String, String>,
    pub by_label: IndexMap<String, Vec<String>>,
    pub subs: IndexMap<String, IndexSet<String>>,
    pub supers: IndexMap<String, IndexSet<String>>,
    pub doms: IndexMap<String, IndexSet<String>>,
    pub rngs: IndexMap<String, IndexSet<String>>,
    pub pred_freq: IndexMap<String, u64>,
    pub triple_count: u64,
    /// Non-fatal issues recorded during construction (e.g. a domain/range
    /// whose object is a literal, not an IRI).
    pub warnings: Vec<String>,
}

impl OntologyIndex {
    /// Direct subclasses unioned transitively downward. Never cached, per
    /// the hierarchy-index design: large schemas would otherwise pay an
    /// unbounded memory cost for closures nobody asked for.
    pub fn subclasses_transitive(&self, iri: &str) -> HashSet<String> {
        transitive_closure(iri, &self.subs)
    }

    /// Direct superclasses unioned transitively upward.
    pub fn superclasses_transitive(&self, iri: &str) -> HashSet<String> {
        transitive_closure(iri, &self.supers)
    }
}

fn transitive_closure(start: &str, edges: &IndexMap<String, IndexSet<String>>) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(iri) = stack.pop() {
        if let Some(neighbors) = edges.get(&iri) {
            for n in neighbors {
                if seen.insert(n.clone()) {
                    stack.push(n.clone());
                }
            }
        }
    }
    seen
}

/// A short deterministic description: triple count, class count, property
/// count, and the sorted prefix list. Re-loading the same source twice
/// yields byte-identical output.
pub fn summary(index: &OntologyIndex) -> String {
    let mut prefixes: Vec<&str> = index.namespaces.keys().map(String::as_str).collect();
    prefixes.sort_unstable();
    format!(
        "triples={} classes={} properties={} prefixes=[{}]",
        index.triple_count,
        index.classes.len(),
        index.properties.len(),
        prefixes.join(",")
    )
}

/// Parse `source` and build an [`OntologyIndex`].
///
/// Fails with [`Error::OntologyParseError`] on malformed input and
/// [`Error::EmptyOntologyError`] if the graph yields zero classes and zero
/// properties.
pub fn build_index(source: &Path, extra_namespaces: &[(String, String)]) -> Result<OntologyIndex> {
    let format = OntologyFormat::from_path(source)?;
    let raw = fs::read_to_string(source)
        .map_err(|e| Error::OntologyParseError(format!("cannot read {:?}: {}", source, e)))?;

    let store = Store::new()
        .map_err(|e| Error::OntologyParseError(format!("failed to allocate RDF store: {}", e)))?;

    match format.as_rdf_format() {
        Some(rdf_format) => {
            store
                .load_from_reader(rdf_format, raw.as_bytes())
                .map_err(|e| Error::OntologyParseError(format!("{:?} parse error: {}", format, e)))?;
        }
        None => {
            // JSON-LD: normalize to N-Quads first, oxigraph has no native reader.
            let nquads = jsonld::to_nquads(&raw)?;
            store
                .load_from_reader(RdfFormat::NQuads, nquads.as_bytes())
                .map_err(|e| Error::OntologyParseError(format!("JSON-LD pre-pass N-Quads invalid: {}", e)))?;
        }
    }

    build_index_from_store(store, extra_namespaces)
}

/// Build an index directly from an already-loaded store (used by tests and
/// callers that assemble the graph themselves, e.g. multi-file loads).
pub fn build_index_from_store(
    store: Store,
    extra_namespaces: &[(String, String)],
) -> Result<OntologyIndex> {
    let mut namespaces = IndexMap::new();
    for (prefix, iri) in default_namespaces() {
        namespaces.insert(prefix.to_string(), iri.to_string());
    }
    for (prefix, iri) in extra_namespaces {
        namespaces.insert(prefix.clone(), iri.clone());
    }

    let mut classes = IndexSet::new();
    let mut properties = IndexSet::new();
    let mut subs: IndexMap<String, IndexSet<String>> = IndexMap::new();
    let mut supers: IndexMap<String, IndexSet<String>> = IndexMap::new();
    let mut doms: IndexMap<String, IndexSet<String>> = IndexMap::new();
    let mut rngs: IndexMap<String, IndexSet<String>> = IndexMap::new();
    let mut pred_freq: IndexMap<String, u64> = IndexMap::new();
    let mut label_candidates: IndexMap<String, Vec<LabelCandidate>> = IndexMap::new();
    let mut warnings = Vec::new();
    let mut triple_count: u64 = 0;

    for quad in store.iter() {
        let quad: Quad = quad
            .map_err(|e| Error::OntologyParseError(format!("store iteration error: {}", e)))?;
        triple_count += 1;

        let subject = match &quad.subject {
            Subject::NamedNode(n) => n.as_str().to_string(),
            _ => continue, // blank-node subjects are not indexed by IRI
        };
        let predicate = quad.predicate.as_str().to_string();
        *pred_freq.entry(predicate.clone()).or_insert(0) += 1;

        match predicate.as_str() {
            RDF_TYPE => {
                if let Term::NamedNode(obj) = &quad.object {
                    match obj.as_str() {
                        OWL_CLASS => {
                            classes.insert(subject.clone());
                        }
                        OWL_OBJECT_PROPERTY | OWL_DATATYPE_PROPERTY | OWL_ANNOTATION_PROPERTY => {
                            properties.insert(subject.clone());
                        }
                        _ => {}
                    }
                }
            }
            RDFS_SUBCLASS_OF => {
                classes.insert(subject.clone());
                if let Term::NamedNode(obj) = &quad.object {
                    let object = obj.as_str().to_string();
                    classes.insert(object.clone());
                    subs.entry(object.clone()).or_default().insert(subject.clone());
                    supers.entry(subject.clone()).or_default().insert(object);
                } else {
                    warnings.push(format!(
                        "rdfs:subClassOf object for {} is not an IRI; skipped",
                        subject
                    ));
                }
            }
            RDFS_SUBPROPERTY_OF => {
                properties.insert(subject.clone());
                if let Term::NamedNode(obj) = &quad.object {
                    properties.insert(obj.as_str().to_string());
                }
            }
            RDFS_DOMAIN => {
                properties.insert(subject.clone());
                if let Term::NamedNode(obj) = &quad.object {
                    let object = obj.as_str().to_string();
                    classes.insert(object.clone());
                    doms.entry(subject.clone()).or_default().insert(object);
                } else {
                    warnings.push(format!("rdfs:domain object for {} is not an IRI", subject));
                }
            }
            RDFS_RANGE => {
                properties.insert(subject.clone());
                if let Term::NamedNode(obj) = &quad.object {
                    let object = obj.as_str().to_string();
                    classes.insert(object.clone());
                    rngs.entry(subject.clone()).or_default().insert(object);
                } else {
                    warnings.push(format!("rdfs:range object for {} is not an IRI", subject));
                }
            }
            RDFS_LABEL => {
                if let Term::Literal(lit) = &quad.object {
                    label_candidates.entry(subject.clone()).or_default().push(LabelCandidate {
                        text: lit.value().to_string(),
                        lang: lit.language().map(str::to_string),
                    });
                }
            }
            _ => {}
        }
    }

    let labels = resolve_labels(label_candidates, &classes, &properties);
    let by_label = invert_labels(&labels);

    if classes.is_empty() && properties.is_empty() {
        return Err(Error::EmptyOntologyError);
    }

    Ok(OntologyIndex {
        graph: store,
        namespaces,
        classes,
        properties,
        labels,
        by_label,
        subs,
        supers,
        doms,
        rngs,
        pred_freq,
        triple_count,
        warnings,
    })
}

/// Prefer an `"en"`-tagged label; tie-break shortest text, then
/// lexicographic order. IRIs with no `rdfs:label` triple are simply absent
/// from the map -- they are never back-filled with a local name here.
///
/// Only IRIs already classified as a class or property are kept: ontology
/// headers (`owl:Ontology`) and named individuals commonly carry
/// `rdfs:label` too, but admitting them here would violate the invariant
/// that every `labels` key is in `classes ∪ properties`.
fn resolve_labels(
    candidates: IndexMap<String, Vec<LabelCandidate>>,
    classes: &IndexSet<String>,
    properties: &IndexSet<String>,
) -> IndexMap<String, String> {
    let mut labels = IndexMap::new();
    for (iri, mut cands) in candidates {
        if cands.is_empty() || !(classes.contains(&iri) || properties.contains(&iri)) {
            continue;
        }
        cands.sort_by(|a, b| {
            let a_en = a.lang.as_deref() == Some("en");
            let b_en = b.lang.as_deref() == Some("en");
            b_en.cmp(&a_en)
                .then_with(|| a.text.len().cmp(&b.text.len()))
                .then_with(|| a.text.cmp(&b.text))
        });
        labels.insert(iri, cands[0].text.clone());
    }
    labels
}

fn invert_labels(labels: &IndexMap<String, String>) -> IndexMap<String, Vec<String>> {
    let mut by_label: IndexMap<String, Vec<String>> = IndexMap::new();
    for (iri, label) in labels {
        by_label.entry(label.to_ascii_lowercase()).or_default().push(iri.clone());
    }
    by_label
}

fn default_namespaces() -> Vec<(&'static str, &'static str)> {
    vec![
        ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
        ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
        ("owl", "http://www.w3.org/2002/07/owl#"),
        ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ]
}

/// Local name (fragment after `#` or last `/`) of an IRI, used by tools for
/// localname-substring matching. Not stored on the index itself.
pub fn local_name(iri: &str) -> &str {
    if let Some(pos) = iri.rfind('#') {
        return &iri[pos + 1..];
    }
    if let Some(pos) = iri.rfind('/') {
        return &iri[pos + 1..];
    }
    iri
}

#[allow(dead_code)]
fn named_node_ref(s: &str) -> Result<NamedNodeRef<'_>> {
    NamedNodeRef::new(s).map_err(|e| Error::OntologyParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;
    use std::io::Write;

    const SAMPLE_TTL: &str = r#"
        @prefix ex: <https://ex.org/> .
        @prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
        @prefix owl: <http://www.w3.org/2002/07/owl#> .

        ex:Animal a owl:Class ;
            rdfs:label "Animal"@en .

        ex:Dog a owl:Class ;
            rdfs:subClassOf ex:Animal ;
            rdfs:label "Dog"@en ;
            rdfs:label "Chien"@fr .

        ex:hasOwner a owl:ObjectProperty ;
            rdfs:domain ex:Dog ;
            rdfs:range ex:Animal ;
            rdfs:label "has owner" .
    "#;

    fn write_ttl(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::with_suffix(".ttl").unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_build_index_basic_counts() {
        let f = write_ttl(SAMPLE_TTL);
        let index = build_index(f.path(), &[]).unwrap();
        assert!(index.classes.contains("https://ex.org/Animal"));
        assert!(index.classes.contains("https://ex.org/Dog"));
        assert!(index.properties.contains("https://ex.org/hasOwner"));
    }

    #[test]
    fn test_labels_exclude_unclassified_iris() {
        const TTL: &str = r#"
            @prefix ex: <https://ex.org/> .
            @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
            @prefix owl: <http://www.w3.org/2002/07/owl#> .

            <https://ex.org/onto> a owl:Ontology ;
                rdfs:label "Example Ontology"@en .

            ex:Animal a owl:Class ;
                rdfs:label "Animal"@en .

            ex:rex a ex:Animal ;
                rdfs:label "Rex"@en .
        "#;
        let f = write_ttl(TTL);
        let index = build_index(f.path(), &[]).unwrap();

        assert!(!index.labels.contains_key("https://ex.org/onto"));
        assert!(!index.labels.contains_key("https://ex.org/rex"));
        assert!(index.labels.contains_key("https://ex.org/Animal"));
        assert!(index
            .labels
            .keys()
            .all(|iri| index.classes.contains(iri) || index.properties.contains(iri)));

        assert!(!index.by_label.values().flatten().any(|iri| iri == "https://ex.org/onto"));
    }

    #[test]
    fn test_hierarchy_symmetry() {
        let f = write_ttl(SAMPLE_TTL);
        let index = build_index(f.path(), &[]).unwrap();
        assert!(index.subs["https://ex.org/Animal"].contains("https://ex.org/Dog"));
        assert!(index.supers["https://ex.org/Dog"].contains("https://ex.org/Animal"));
    }

    #[test]
    fn test_label_prefers_english_tag() {
        let f = write_ttl(SAMPLE_TTL);
        let index = build_index(f.path(), &[]).unwrap();
        assert_eq!(index.labels["https://ex.org/Dog"], "Dog");
    }

    #[test]
    fn test_domains_and_ranges() {
        let f = write_ttl(SAMPLE_TTL);
        let index = build_index(f.path(), &[]).unwrap();
        assert!(index.doms["https://ex.org/hasOwner"].contains("https://ex.org/Dog"));
        assert!(index.rngs["https://ex.org/hasOwner"].contains("https://ex.org/Animal"));
    }

    #[test]
    fn test_empty_ontology_errors() {
        let f = write_ttl("@prefix ex: <https://ex.org/> .\nex:a ex:b ex:c .\n");
        let result = build_index(f.path(), &[]);
        assert!(matches!(result, Err(Error::EmptyOntologyError)));
    }

    #[test]
    fn test_summary_is_deterministic_across_reloads() {
        let f = write_ttl(SAMPLE_TTL);
        let first = summary(&build_index(f.path(), &[]).unwrap());
        let second = summary(&build_index(f.path(), &[]).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_transitive_closure_dedupes_diamond() {
        let ttl = r#"
            @prefix ex: <https://ex.org/> .
            @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
            @prefix owl: <http://www.w3.org/2002/07/owl#> .
            ex:A a owl:Class . ex:B a owl:Class . ex:C a owl:Class . ex:D a owl:Class .
            ex:B rdfs:subClassOf ex:A .
            ex:C rdfs:subClassOf ex:A .
            ex:D rdfs:subClassOf ex:B .
            ex:D rdfs:subClassOf ex:C .
        "#;
        let f = write_ttl(ttl);
        let index = build_index(f.path(), &[]).unwrap();
        let closure = index.subclasses_transitive("https://ex.org/A");
        assert_eq!(closure.len(), 3);
    }

    #[test]
    fn test_local_name_extraction() {
        assert_eq!(local_name("https://ex.org/schema#Dog"), "Dog");
        assert_eq!(local_name("https://ex.org/schema/Dog"), "Dog");
    }
}
