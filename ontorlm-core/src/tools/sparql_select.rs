//! `sparql_select`: bounded SELECT-only SPARQL execution over the ontology
//! index's triple store.

use crate::error::{Error, Result, SparqlErrorCategory};
use crate::ontology::OntologyIndex;
use indexmap::IndexMap;
use oxigraph::sparql::{Query, QueryResults};
use regex::Regex;
use std::sync::OnceLock;

/// Default `LIMIT` injected when the query specifies none.
pub const DEFAULT_AUTO_LIMIT: u64 = 100;
/// Hard ceiling on an explicit `LIMIT`.
pub const DEFAULT_LIMIT_CEILING: u64 = 1000;

fn preamble_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^(\s*#[^\n]*\n|\s*(PREFIX\s+[A-Za-z0-9_-]*:\s*<[^>]*>|BASE\s*<[^>]*>))*\s*")
            .expect("static regex")
    })
}

fn first_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^([A-Za-z]+)").expect("static regex"))
}

fn limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\b").expect("static regex"))
}

/// Execute a SELECT-only SPARQL query with auto-LIMIT injection and a hard
/// result ceiling, returning one `{var: stringified binding}` map per row.
pub fn sparql_select(
    index: &OntologyIndex,
    query: &str,
    auto_limit: u64,
    limit_ceiling: u64,
) -> Result<Vec<IndexMap<String, String>>> {
    let kind = first_keyword(query).unwrap_or_default();
    if !kind.eq_ignore_ascii_case("SELECT") {
        return Err(Error::UnsupportedQueryKind { kind });
    }

    let dispatched = match existing_limit(query) {
        Some(requested) if requested > limit_ceiling => {
            return Err(Error::LimitExceeded {
                requested,
                ceiling: limit_ceiling,
            });
        }
        Some(_) => query.to_string(),
        None => format!("{}\nLIMIT {}", query, auto_limit),
    };

    let parsed = Query::parse(&dispatched, None).map_err(|e| {
        Error::sparql_execution(SparqlErrorCategory::Syntax, e.to_string())
    })?;

    let results = index
        .graph
        .query(parsed)
        .map_err(|e| Error::sparql_execution(SparqlErrorCategory::Provider, e.to_string()))?;

    match results {
        QueryResults::Solutions(solutions) => {
            let variables: Vec<String> = solutions
                .variables()
                .iter()
                .map(|v| v.as_str().to_string())
                .collect();
            let mut rows = Vec::new();
            for solution in solutions {
                let solution = solution.map_err(|e| {
                    Error::sparql_execution(SparqlErrorCategory::Provider, e.to_string())
                })?;
                let mut row = IndexMap::new();
                for var in &variables {
                    if let Some(term) = solution.get(var.as_str()) {
                        row.insert(var.clone(), term_to_string(term));
                    }
                }
                rows.push(row);
            }
            Ok(rows)
        }
        QueryResults::Boolean(b) => {
            let mut row = IndexMap::new();
            row.insert("result".to_string(), b.to_string());
            Ok(vec![row])
        }
        QueryResults::Graph(_) => Err(Error::UnsupportedQueryKind {
            kind: "CONSTRUCT/DESCRIBE".to_string(),
        }),
    }
}

fn term_to_string(term: &oxigraph::model::Term) -> String {
    use oxigraph::model::Term;
    match term {
        Term::NamedNode(n) => n.as_str().to_string(),
        Term::BlankNode(n) => format!("_:{}", n.as_str()),
        Term::Literal(lit) => lit.value().to_string(),
        Term::Triple(_) => "<<triple>>".to_string(),
    }
}

fn first_keyword(query: &str) -> Option<String> {
    let without_preamble = preamble_re().replace(query, "");
    first_word_re()
        .captures(without_preamble.trim_start())
        .map(|c| c[1].to_uppercase())
}

fn existing_limit(query: &str) -> Option<u64> {
    limit_re().captures(query).and_then(|c| c[1].parse().ok())
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
        @prefix owl: <http://www.w3.org/2002/07/owl#> .
        ex:Dog a owl:Class .
        ex:Cat a owl:Class .
    "#;

    fn index() -> crate::ontology::OntologyIndex {
        let store = Store::new().unwrap();
        store.load_from_reader(RdfFormat::Turtle, TTL.as_bytes()).unwrap();
        build_index_from_store(store, &[]).unwrap()
    }

    #[test]
    fn test_rejects_non_select() {
        let idx = index();
        let err = sparql_select(&idx, "ASK { ?s ?p ?o }", 100, 1000).unwrap_err();
        assert!(matches!(err, Error::UnsupportedQueryKind { .. }));
    }

    #[test]
    fn test_select_with_leading_prefixes_accepted() {
        let idx = index();
        let q = "PREFIX owl: <http://www.w3.org/2002/07/owl#>\nSELECT ?s WHERE { ?s a owl:Class }";
        let rows = sparql_select(&idx, q, 100, 1000).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_missing_limit_is_auto_injected() {
        let idx = index();
        let q = "SELECT ?s WHERE { ?s a <http://www.w3.org/2002/07/owl#Class> }";
        let rows = sparql_select(&idx, q, 1, 1000).unwrap();
        assert_eq!(rows.len(), 1, "auto LIMIT 1 should cap to one row");
    }

    #[test]
    fn test_existing_limit_within_ceiling_passed_through_unmodified() {
        let idx = index();
        let q = "SELECT ?s WHERE { ?s a <http://www.w3.org/2002/07/owl#Class> } LIMIT 1";
        let rows = sparql_select(&idx, q, 100, 1000).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_limit_over_ceiling_rejected() {
        let idx = index();
        let q = "SELECT ?s WHERE { ?s ?p ?o } LIMIT 1001";
        let err = sparql_select(&idx, q, 100, 1000).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { requested: 1001, ceiling: 1000 }));
    }

    #[test]
    fn test_invalid_syntax_wrapped_as_sparql_execution_error() {
        let idx = index();
        let err = sparql_select(&idx, "SELECT WHERE { invalid syntax }", 100, 1000).unwrap_err();
        assert!(matches!(
            err,
            Error::SparqlExecutionError {
                category: SparqlErrorCategory::Syntax,
                ..
            }
        ));
    }
}
