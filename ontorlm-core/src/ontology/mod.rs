//! Ontology metadata index (C1): parse an RDF ontology into typed indexes
//! used by the bounded tools and the sense-card loader.

mod format;
mod index;
mod jsonld;

pub use format::OntologyFormat;
pub use index::{build_index, build_index_from_store, local_name, summary, OntologyIndex};
