//! Generated-mode sense card: synthesized from the ontology index when no
//! `AGENT_GUIDE.md` is authored.
//!
//! Generated cards are validated by [`validate_grounding`] before being
//! handed to the engine: every entity reference under the `Key classes` and
//! `Key properties` headers must resolve to an IRI present in the index.
//! The `Hints` section may mention vocabulary terms (`rdfs:subClassOf`) that
//! are never themselves indexed entities, so it is out of scope for
//! grounding -- only the two bulleted entity lists are checked.

use crate::ontology::OntologyIndex;

/// Generated sense cards target this size; authored guides are exempt.
pub const GENERATED_CARD_SIZE_TARGET: usize = 2_000;

const MAX_KEY_CLASSES: usize = 8;
const MAX_KEY_PROPERTIES: usize = 8;

/// A single entity reference that failed to resolve against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingError {
    pub iri: String,
}

/// Render `iri` as a `prefix:LocalName` CURIE using the longest matching
/// namespace, or as a bare IRI if no prefix covers it.
fn curie(iri: &str, index: &OntologyIndex) -> String {
    let mut best: Option<(&str, &str)> = None;
    for (prefix, ns) in &index.namespaces {
        if iri.starts_with(ns.as_str()) {
            let is_longer = best.map(|(_, b)| ns.len() > b.len()).unwrap_or(true);
            if is_longer {
                best = Some((prefix, ns));
            }
        }
    }
    match best {
        Some((prefix, ns)) => format!("{prefix}:{}", &iri[ns.len()..]),
        None => iri.to_string(),
    }
}

/// Root classes (no recorded superclass) ranked by label coverage then by
/// first-seen order, capped at [`MAX_KEY_CLASSES`].
fn key_classes(index: &OntologyIndex) -> Vec<&str> {
    let mut roots: Vec<&str> = index
        .classes
        .iter()
        .filter(|c| index.supers.get(c.as_str()).map_or(true, |s| s.is_empty()))
        .map(String::as_str)
        .collect();

    if roots.is_empty() {
        roots = index.classes.iter().map(String::as_str).collect();
    }

    roots.sort_by_key(|c| (index.labels.get(*c).is_none(), *c));
    roots.truncate(MAX_KEY_CLASSES);
    roots
}

/// Properties ranked by observed predicate frequency, capped at
/// [`MAX_KEY_PROPERTIES`].
fn key_properties(index: &OntologyIndex) -> Vec<&str> {
    let mut props: Vec<&str> = index.properties.iter().map(String::as_str).collect();
    props.sort_by_key(|p| std::cmp::Reverse(index.pred_freq.get(*p).copied().unwrap_or(0)));
    props.truncate(MAX_KEY_PROPERTIES);
    props
}

fn sparql_hints(index: &OntologyIndex) -> Vec<&'static str> {
    let mut hints = vec!["SELECT-only: sparql_select rejects CONSTRUCT/DESCRIBE/ASK queries."];
    if index.subs.values().any(|s| !s.is_empty()) {
        hints.push("Class hierarchy is transitive: rdfs:subClassOf chains may need repeated traversal, not a single hop.");
    }
    if index.doms.values().any(|s| !s.is_empty()) || index.rngs.values().any(|s| !s.is_empty()) {
        hints.push("Property domains/ranges constrain which classes a property connects.");
    }
    hints
}

/// Synthesize a grounded sense card from `index`.
pub fn generate_sense_card(index: &OntologyIndex) -> String {
    let mut card = String::new();
    card.push_str("# Ontology sense card\n\n");
    card.push_str(&crate::ontology::summary(index));
    card.push_str("\n\n## Key classes\n");
    for c in key_classes(index) {
        match index.labels.get(c) {
            Some(label) => card.push_str(&format!("- {} (\"{}\")\n", curie(c, index), label)),
            None => card.push_str(&format!("- {}\n", curie(c, index))),
        }
    }
    card.push_str("\n## Key properties\n");
    for p in key_properties(index) {
        match index.labels.get(p) {
            Some(label) => card.push_str(&format!("- {} (\"{}\")\n", curie(p, index), label)),
            None => card.push_str(&format!("- {}\n", curie(p, index))),
        }
    }
    card.push_str("\n## Hints\n");
    for hint in sparql_hints(index) {
        card.push_str(&format!("- {hint}\n"));
    }
    card
}

fn resolve_curie(token: &str, index: &OntologyIndex) -> Option<String> {
    if let Some((prefix, local)) = token.split_once(':') {
        if let Some(ns) = index.namespaces.get(prefix) {
            return Some(format!("{ns}{local}"));
        }
    }
    None
}

fn entity_bullets<'a>(card: &'a str, header: &str) -> Vec<&'a str> {
    let mut lines = Vec::new();
    let mut in_section = false;
    for line in card.lines() {
        if line.trim_start().starts_with("## ") {
            in_section = line.trim() == header;
            continue;
        }
        if in_section {
            if let Some(rest) = line.trim_start().strip_prefix("- ") {
                if let Some(token) = rest.split_whitespace().next() {
                    lines.push(token);
                }
            }
        }
    }
    lines
}

/// Check that every entity reference under `## Key classes` / `## Key
/// properties` resolves to an IRI present in `index`. Returns `[]` iff the
/// card is fully grounded.
pub fn validate_grounding(card: &str, index: &OntologyIndex) -> Vec<GroundingError> {
    let mut errors = Vec::new();
    for header in ["## Key classes", "## Key properties"] {
        for token in entity_bullets(card, header) {
            match resolve_curie(token, index) {
                Some(iri) if index.classes.contains(&iri) || index.properties.contains(&iri) => {}
                Some(iri) => errors.push(GroundingError { iri }),
                None => {
                    if index.classes.contains(token) || index.properties.contains(token) {
                        continue;
                    }
                    errors.push(GroundingError {
                        iri: token.to_string(),
                    });
                }
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::build_index_from_store;
    use oxigraph::io::RdfFormat;
    use oxigraph::store::Store;
    use pretty_assertions::assert_eq;

    const TTL: &str = r#"
        @prefix ex: <https://ex.org/> .
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
        @prefix owl: <http://www.w3.org/2002/07/owl#> .
        ex:Animal a owl:Class ; rdfs:label "Animal"@en .
        ex:Dog a owl:Class ; rdfs:subClassOf ex:Animal ; rdfs:label "Dog"@en .
        ex:hasOwner a owl:ObjectProperty ; rdfs:domain ex:Dog ; rdfs:range ex:Animal .
    "#;

    fn index() -> OntologyIndex {
        let store = Store::new().unwrap();
        store.load_from_reader(RdfFormat::Turtle, TTL.as_bytes()).unwrap();
        build_index_from_store(store, &[]).unwrap()
    }

    #[test]
    fn test_generated_card_is_fully_grounded() {
        let idx = index();
        let card = generate_sense_card(&idx);
        assert_eq!(validate_grounding(&card, &idx), vec![]);
    }

    #[test]
    fn test_generated_card_under_size_target() {
        let card = generate_sense_card(&index());
        assert!(card.len() < GENERATED_CARD_SIZE_TARGET);
    }

    #[test]
    fn test_root_class_ranked_before_subclass() {
        let idx = index();
        let roots = key_classes(&idx);
        assert_eq!(roots[0], "https://ex.org/Animal");
    }

    #[test]
    fn test_validate_grounding_flags_fabricated_entity() {
        let idx = index();
        let card = "# card\n\n## Key classes\n- ex:Unicorn (\"Unicorn\")\n\n## Key properties\n";
        let errors = validate_grounding(card, &idx);
        assert_eq!(errors, vec![GroundingError { iri: "https://ex.org/Unicorn".to_string() }]);
    }

    #[test]
    fn test_hints_section_not_checked_for_grounding() {
        let idx = index();
        let card = "# card\n\n## Key classes\n\n## Key properties\n\n## Hints\n- rdfs:subClassOf chains can be deep.\n";
        assert_eq!(validate_grounding(card, &idx), vec![]);
    }
}
