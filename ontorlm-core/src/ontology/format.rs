//! Ontology source format detection.

use crate::error::{Error, Result};
use oxigraph::io::RdfFormat;
use std::path::Path;

/// RDF serialization accepted as an ontology source.
///
/// `.ttl` is always Turtle and must never be parsed as TriG, even though
/// TriG is a syntactic superset of Turtle -- mixing the two would silently
/// accept malformed named-graph syntax in a file meant to be graph-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OntologyFormat {
    Turtle,
    NTriples,
    NQuads,
    TriG,
    RdfXml,
    JsonLd,
}

impl OntologyFormat {
    /// Map a file extension (without the leading dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ttl" => Some(Self::Turtle),
            "nt" => Some(Self::NTriples),
            "nq" => Some(Self::NQuads),
            "trig" => Some(Self::TriG),
            "rdf" | "xml" => Some(Self::RdfXml),
            "jsonld" => Some(Self::JsonLd),
            _ => None,
        }
    }

    /// Derive the format from a file path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                Error::OntologyParseError(format!(
                    "cannot determine ontology format: {:?} has no file extension",
                    path
                ))
            })?;

        Self::from_extension(ext).ok_or_else(|| {
            Error::OntologyParseError(format!(
                "unrecognized ontology file extension '.{}' for {:?}",
                ext, path
            ))
        })
    }

    /// The oxigraph `RdfFormat` this maps to. `JsonLd` has no native oxigraph
    /// reader; callers must run [`crate::ontology::jsonld::to_nquads`] first
    /// and load the result as [`Self::NQuads`].
    pub fn as_rdf_format(&self) -> Option<RdfFormat> {
        match self {
            Self::Turtle => Some(RdfFormat::Turtle),
            Self::NTriples => Some(RdfFormat::NTriples),
            Self::NQuads => Some(RdfFormat::NQuads),
            Self::TriG => Some(RdfFormat::TriG),
            Self::RdfXml => Some(RdfFormat::RdfXml),
            Self::JsonLd => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_ttl_is_always_turtle() {
        assert_eq!(OntologyFormat::from_extension("ttl"), Some(OntologyFormat::Turtle));
        assert_eq!(OntologyFormat::from_extension("TTL"), Some(OntologyFormat::Turtle));
    }

    #[test]
    fn test_canonical_extension_table() {
        assert_eq!(OntologyFormat::from_extension("nt"), Some(OntologyFormat::NTriples));
        assert_eq!(OntologyFormat::from_extension("nq"), Some(OntologyFormat::NQuads));
        assert_eq!(OntologyFormat::from_extension("trig"), Some(OntologyFormat::TriG));
        assert_eq!(OntologyFormat::from_extension("rdf"), Some(OntologyFormat::RdfXml));
        assert_eq!(OntologyFormat::from_extension("xml"), Some(OntologyFormat::RdfXml));
        assert_eq!(OntologyFormat::from_extension("jsonld"), Some(OntologyFormat::JsonLd));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let path = PathBuf::from("ontology.owl");
        assert!(OntologyFormat::from_path(&path).is_err());
    }

    #[test]
    fn test_jsonld_has_no_native_rdf_format() {
        assert!(OntologyFormat::JsonLd.as_rdf_format().is_none());
    }
}
