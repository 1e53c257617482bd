//! Error types for ontorlm-core.

use thiserror::Error;

/// Result type alias using ontorlm-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Category preserved from the SPARQL endpoint collaborator when a query fails.
///
/// Mirrors the typed errors an `Endpoint` collaborator is expected to raise
/// (timeout / syntax / network / provider), so graders and the trajectory
/// recorder can discriminate without parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparqlErrorCategory {
    Timeout,
    Syntax,
    Network,
    Provider,
}

impl std::fmt::Display for SparqlErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Syntax => "syntax",
            Self::Network => "network",
            Self::Provider => "provider",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during RLM operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Ontology source could not be parsed (C1). Fatal: the engine is never entered.
    #[error("ontology parse error: {0}")]
    OntologyParseError(String),

    /// Ontology parsed but yielded zero classes and zero properties.
    #[error("ontology contains no classes or properties")]
    EmptyOntologyError,

    /// `sparql_select` received a query whose top-level form is not SELECT.
    #[error("unsupported query kind: expected SELECT, found {kind}")]
    UnsupportedQueryKind { kind: String },

    /// `sparql_select` received (or would dispatch) a LIMIT above the 1000 ceiling.
    #[error("LIMIT {requested} exceeds the maximum of {ceiling}")]
    LimitExceeded { requested: u64, ceiling: u64 },

    /// `search_entity` received a `limit` outside [1, 10] while
    /// `strict_limits` is enabled (default behavior silently clamps instead).
    #[error("search_entity limit {requested} is outside [1, 10]")]
    InvalidSearchLimit { requested: i64 },

    /// The SPARQL endpoint failed; category is preserved from the collaborator.
    #[error("sparql execution error ({category}): {message}")]
    SparqlExecutionError {
        category: SparqlErrorCategory,
        message: String,
    },

    /// REPL execution failed
    #[error("REPL execution error: {message}")]
    ReplExecution {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Subprocess communication error
    #[error("Subprocess communication error: {0}")]
    SubprocessComm(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// LM provider error (network, 5xx, rate limit) after retries are exhausted.
    #[error("LM provider error: {provider} - {message}")]
    LmProviderError { provider: String, message: String },

    /// LLM API error (alias kept for provider-client internals)
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    LLM(String),

    /// Run exhausted its iteration or LM-call budget without a SUBMIT.
    /// Not raised as a propagating error inside the engine loop itself;
    /// represented here so callers of lower-level helpers can report it.
    #[error("budget exceeded: {resource}")]
    BudgetExceeded { resource: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a REPL execution error.
    pub fn repl_execution(message: impl Into<String>) -> Self {
        Self::ReplExecution {
            message: message.into(),
            source: None,
        }
    }

    /// Create a REPL execution error with source.
    pub fn repl_execution_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ReplExecution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an LM provider error (post-retry).
    pub fn lm_provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LmProviderError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a sparql execution error, preserving the collaborator's category.
    pub fn sparql_execution(category: SparqlErrorCategory, message: impl Into<String>) -> Self {
        Self::SparqlExecutionError {
            category,
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// True for error kinds that the engine loop must treat as an in-band
    /// observation (appended to history) rather than a fatal run termination.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedQueryKind { .. }
                | Self::LimitExceeded { .. }
                | Self::InvalidSearchLimit { .. }
                | Self::SparqlExecutionError { .. }
                | Self::ReplExecution { .. }
        )
    }
}
