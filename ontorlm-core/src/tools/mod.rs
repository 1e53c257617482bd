//! Bounded Tools (C2): the two capability-limited operations exposed to
//! LLM-generated code (`search_entity`, `sparql_select`).

mod entity_search;
mod sparql_select;

pub use entity_search::{
    clamp_limit, search_entity, EntityMatch, MatchType, SearchScope, DEFAULT_SEARCH_LIMIT,
};
pub use sparql_select::{sparql_select, DEFAULT_AUTO_LIMIT, DEFAULT_LIMIT_CEILING};
