//! Sense-Card Loader (C3): the initial ontology-oriented context appended to
//! the system prompt.
//!
//! Two modes: an authored `AGENT_GUIDE.md` next to the ontology source is
//! used verbatim; otherwise a minimal structured card is generated from the
//! [`OntologyIndex`](crate::ontology::OntologyIndex) and validated as fully
//! grounded before use.

mod generate;
mod guide;

pub use generate::{generate_sense_card, validate_grounding, GroundingError, GENERATED_CARD_SIZE_TARGET};
pub use guide::load_agent_guide;

use crate::ontology::OntologyIndex;
use std::path::Path;

/// The initial context string appended to the system instructions, plus
/// provenance of how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseCard {
    pub text: String,
    pub source: SenseCardSource,
}

/// How a [`SenseCard`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseCardSource {
    /// Loaded verbatim from an authored `AGENT_GUIDE.md`.
    Authored,
    /// Synthesized from the ontology index.
    Generated,
}

/// Errors from sense-card loading or generation.
#[derive(Debug, thiserror::Error)]
pub enum SenseCardError {
    #[error("failed to read AGENT_GUIDE.md at {path}: {source}")]
    GuideRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("generated sense card references {0} ungrounded IRI(s): {1:?}")]
    Ungrounded(usize, Vec<String>),
}

/// Produce the sense card for an ontology: authored guide if present next to
/// `ontology_source`, else a generated-and-validated summary from `index`.
pub fn load_sense_card(
    ontology_source: &Path,
    index: &OntologyIndex,
) -> Result<SenseCard, SenseCardError> {
    if let Some(text) = load_agent_guide(ontology_source)? {
        return Ok(SenseCard {
            text,
            source: SenseCardSource::Authored,
        });
    }

    let text = generate_sense_card(index);
    let errors = validate_grounding(&text, index);
    if !errors.is_empty() {
        let irs = errors.into_iter().map(|e| e.iri).collect::<Vec<_>>();
        return Err(SenseCardError::Ungrounded(irs.len(), irs));
    }

    Ok(SenseCard {
        text,
        source: SenseCardSource::Generated,
    })
}
