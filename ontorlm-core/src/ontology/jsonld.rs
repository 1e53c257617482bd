//! JSON-LD -> N-Quads pre-pass.
//!
//! oxigraph has no native JSON-LD reader, so a JSON-LD ontology source is
//! normalized to N-Quads here before being handed to
//! [`oxigraph::store::Store::load_from_reader`] with [`oxigraph::io::RdfFormat::NQuads`].
//!
//! This is a conversion step, not a new grammar: it supports the common
//! flattened/expanded node-object shape (a top-level array or `@graph` of
//! objects keyed by absolute IRIs, `@id`, `@type`, `@value`/`@language`).
//! It does not implement full JSON-LD 1.1 context processing (`@context`
//! expansion of compact IRIs/terms, `@reverse`, nested `@list`/`@set`
//! containers beyond one level, or framing) -- ontology sources distributed
//! as JSON-LD for this runtime are expected to already be in expanded form,
//! which is how most OWL/SKOS JSON-LD exports are published.

use crate::error::{Error, Result};
use serde_json::Value;

/// Convert an expanded-form JSON-LD document into N-Quads text.
pub fn to_nquads(input: &str) -> Result<String> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| Error::OntologyParseError(format!("invalid JSON-LD: {}", e)))?;

    let nodes = extract_nodes(&value)?;
    let mut out = String::new();
    for node in &nodes {
        write_node_quads(node, &mut out)?;
    }
    Ok(out)
}

fn extract_nodes(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => {
            if let Some(Value::Array(graph)) = map.get("@graph") {
                Ok(graph.clone())
            } else {
                Ok(vec![value.clone()])
            }
        }
        _ => Err(Error::OntologyParseError(
            "JSON-LD document must be a top-level object or array".to_string(),
        )),
    }
}

fn write_node_quads(node: &Value, out: &mut String) -> Result<()> {
    let Value::Object(map) = node else {
        return Err(Error::OntologyParseError(
            "JSON-LD node must be an object".to_string(),
        ));
    };

    let subject = map
        .get("@id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::OntologyParseError("JSON-LD node missing '@id'".to_string()))?;

    if let Some(types) = map.get("@type") {
        for ty in as_value_list(types) {
            if let Some(ty_iri) = ty.as_str() {
                push_triple(
                    out,
                    subject,
                    "http://www.w3.org/1999/02/22-rdf-syntax-ns#type",
                    &Object::Iri(ty_iri.to_string()),
                );
            }
        }
    }

    for (key, value) in map {
        if key.starts_with('@') || !key.starts_with("http") {
            continue;
        }
        for entry in as_value_list(value) {
            if let Some(obj) = value_to_object(&entry) {
                push_triple(out, subject, key, &obj);
            }
        }
    }

    Ok(())
}

enum Object {
    Iri(String),
    Literal { value: String, lang: Option<String> },
}

fn value_to_object(entry: &Value) -> Option<Object> {
    match entry {
        Value::Object(m) => {
            if let Some(id) = m.get("@id").and_then(Value::as_str) {
                Some(Object::Iri(id.to_string()))
            } else if let Some(v) = m.get("@value") {
                let lang = m.get("@language").and_then(Value::as_str).map(str::to_string);
                Some(Object::Literal {
                    value: scalar_to_string(v),
                    lang,
                })
            } else {
                None
            }
        }
        Value::String(s) => Some(Object::Literal {
            value: s.clone(),
            lang: None,
        }),
        other => Some(Object::Literal {
            value: scalar_to_string(other),
            lang: None,
        }),
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_value_list(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn push_triple(out: &mut String, subject: &str, predicate: &str, object: &Object) {
    let obj_str = match object {
        Object::Iri(iri) => format!("<{}>", escape_iri(iri)),
        Object::Literal { value, lang: None } => format!("\"{}\"", escape_literal(value)),
        Object::Literal {
            value,
            lang: Some(lang),
        } => format!("\"{}\"@{}", escape_literal(value), lang),
    };
    out.push_str(&format!("<{}> <{}> {} .\n", escape_iri(subject), escape_iri(predicate), obj_str));
}

fn escape_iri(iri: &str) -> String {
    iri.replace('>', "%3E").replace('<', "%3C")
}

fn escape_literal(lit: &str) -> String {
    lit.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_node_with_type_and_label() {
        let doc = r#"
        {
            "@id": "https://ex.org/Person",
            "@type": "http://www.w3.org/2002/07/owl#Class",
            "http://www.w3.org/2000/01/rdf-schema#label": {"@value": "Person", "@language": "en"}
        }
        "#;
        let nquads = to_nquads(doc).unwrap();
        assert!(nquads.contains("<https://ex.org/Person>"));
        assert!(nquads.contains("owl#Class"));
        assert!(nquads.contains("\"Person\"@en"));
    }

    #[test]
    fn test_graph_array_with_iri_reference() {
        let doc = r#"
        {
            "@graph": [
                {
                    "@id": "https://ex.org/a",
                    "https://ex.org/relatesTo": {"@id": "https://ex.org/b"}
                }
            ]
        }
        "#;
        let nquads = to_nquads(doc).unwrap();
        assert_eq!(nquads.trim(), "<https://ex.org/a> <https://ex.org/relatesTo> <https://ex.org/b> .");
    }

    #[test]
    fn test_rejects_non_object_document() {
        assert!(to_nquads("42").is_err());
    }
}
