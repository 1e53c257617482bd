//! `search_entity`: bounded fuzzy lookup over the ontology index.

use crate::error::{Error, Result};
use crate::ontology::{local_name, OntologyIndex};
use serde::{Deserialize, Serialize};

const MIN_LIMIT: i64 = 1;
const MAX_LIMIT: i64 = 10;
pub const DEFAULT_SEARCH_LIMIT: i64 = 5;

/// Which parts of an entity were searched to find it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    LabelExact,
    LabelSubstring,
    LocalnameSubstring,
    IriSubstring,
}

/// A single `search_entity` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub uri: String,
    pub label: Option<String>,
    pub match_type: MatchType,
}

/// Which fields `search_entity` is allowed to match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Label,
    Iri,
    All,
}

impl SearchScope {
    pub fn parse(s: &str) -> Self {
        match s {
            "label" => Self::Label,
            "iri" => Self::Iri,
            _ => Self::All,
        }
    }

    fn allows_label_tiers(self) -> bool {
        matches!(self, Self::Label | Self::All)
    }

    fn allows_iri_tiers(self) -> bool {
        matches!(self, Self::Iri | Self::All)
    }
}

/// Clamp (or, if `strict` is set, validate) a requested limit into `[1, 10]`.
pub fn clamp_limit(requested: i64, strict: bool) -> Result<i64> {
    if (MIN_LIMIT..=MAX_LIMIT).contains(&requested) {
        return Ok(requested);
    }
    if strict {
        return Err(Error::InvalidSearchLimit { requested });
    }
    Ok(requested.clamp(MIN_LIMIT, MAX_LIMIT))
}

/// Search the index for entities (classes or properties) matching `query`.
///
/// Never raises for "no results" -- an empty list is a normal outcome.
/// `limit` is clamped to `[1, 10]` by default; pass `strict_limits = true`
/// to instead return [`Error::InvalidSearchLimit`] for out-of-range values.
pub fn search_entity(
    index: &OntologyIndex,
    query: &str,
    limit: i64,
    search_in: &str,
    strict_limits: bool,
) -> Result<Vec<EntityMatch>> {
    let limit = clamp_limit(limit, strict_limits)?;
    let scope = SearchScope::parse(search_in);
    let query_lower = query.to_ascii_lowercase();

    let mut best: indexmap::IndexMap<String, EntityMatch> = indexmap::IndexMap::new();

    for iri in index.classes.iter().chain(index.properties.iter()) {
        let label = index.labels.get(iri).cloned();
        let Some(match_type) = classify(iri, label.as_deref(), &query_lower, scope) else {
            continue;
        };
        best.entry(iri.clone())
            .and_modify(|existing| {
                if match_type < existing.match_type {
                    existing.match_type = match_type;
                }
            })
            .or_insert_with(|| EntityMatch {
                uri: iri.clone(),
                label: label.clone(),
                match_type,
            });
    }

    let mut results: Vec<EntityMatch> = best.into_values().collect();
    results.sort_by(|a, b| {
        a.match_type.cmp(&b.match_type).then_with(|| {
            let a_len = a.label.as_deref().map(str::len).unwrap_or(usize::MAX);
            let b_len = b.label.as_deref().map(str::len).unwrap_or(usize::MAX);
            a_len.cmp(&b_len)
        })
    });
    results.truncate(limit as usize);
    Ok(results)
}

fn classify(iri: &str, label: Option<&str>, query_lower: &str, scope: SearchScope) -> Option<MatchType> {
    if scope.allows_label_tiers() {
        if let Some(label) = label {
            let label_lower = label.to_ascii_lowercase();
            if label_lower == query_lower {
                return Some(MatchType::LabelExact);
            }
            if label_lower.contains(query_lower) {
                return Some(MatchType::LabelSubstring);
            }
        }
    }
    if scope.allows_iri_tiers() {
        let local = local_name(iri).to_ascii_lowercase();
        if local.contains(query_lower) {
            return Some(MatchType::LocalnameSubstring);
        }
        if iri.to_ascii_lowercase().contains(query_lower) {
            return Some(MatchType::IriSubstring);
        }
    }
    None
}
