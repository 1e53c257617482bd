//! Layered configuration for the RLM engine.
//!
//! Follows the same `with_*` consuming-builder idiom as
//! [`crate::llm::ClientConfig`] and [`crate::repl::ReplConfig`]: a
//! `Default` impl provides baseline values, `EngineConfig::from_env` layers
//! `ONTORLM_*` environment variables on top, and builder methods let callers
//! override anything explicitly. Precedence is defaults < env < builder.

use crate::repl::{ReplConfig, DEFAULT_STDOUT_LIMIT};
use std::env;
use std::path::PathBuf;

/// Default cap on interpreter iterations per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 12;

/// Default cap on total LM calls per run (root + sub-LM combined).
pub const DEFAULT_MAX_LLM_CALLS: u32 = 20;

/// Default hard ceiling on a dispatched SPARQL `LIMIT`.
pub const DEFAULT_SPARQL_LIMIT_CEILING: u64 = 1000;

/// Default `LIMIT` injected when a SELECT query has none.
pub const DEFAULT_SPARQL_AUTO_LIMIT: u64 = 100;

/// Engine-wide configuration assembled from defaults, environment
/// variables, and explicit builder overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum interpreter iterations before the run ends with `converged=false`.
    pub max_iterations: u32,
    /// Maximum total LM calls (root + sub-LM) before the run ends with `converged=false`.
    pub max_llm_calls: u32,
    /// Hard ceiling on an explicit SPARQL `LIMIT`; requests above this fail.
    pub sparql_limit_ceiling: u64,
    /// `LIMIT` auto-injected into SELECT queries that specify none.
    pub sparql_auto_limit: u64,
    /// When `true`, `search_entity` raises instead of silently clamping
    /// out-of-range `limit` values. Default `false` (silent clamp).
    pub strict_limits: bool,
    /// Directory trajectory NDJSON files are written under.
    pub trajectory_dir: PathBuf,
    /// Sandboxed namespace interpreter configuration.
    pub repl: ReplConfig,
    /// Default concurrency for `llm_query_batched`.
    pub batch_parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_llm_calls: DEFAULT_MAX_LLM_CALLS,
            sparql_limit_ceiling: DEFAULT_SPARQL_LIMIT_CEILING,
            sparql_auto_limit: DEFAULT_SPARQL_AUTO_LIMIT,
            strict_limits: false,
            trajectory_dir: PathBuf::from("./trajectories"),
            repl: ReplConfig::default(),
            batch_parallelism: crate::llm::DEFAULT_MAX_PARALLEL,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from defaults overlaid with `ONTORLM_*`
    /// environment variables. Unset or unparsable variables fall back to
    /// the default silently (this mirrors the teacher's `ClientConfig`
    /// construction, which never fails on missing env — callers still
    /// need `with_*` overrides or a provider API key set explicitly).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("ONTORLM_MAX_ITERATIONS") {
            if let Ok(n) = v.parse() {
                config.max_iterations = n;
            }
        }
        if let Ok(v) = env::var("ONTORLM_MAX_LLM_CALLS") {
            if let Ok(n) = v.parse() {
                config.max_llm_calls = n;
            }
        }
        if let Ok(v) = env::var("ONTORLM_SPARQL_LIMIT_CEILING") {
            if let Ok(n) = v.parse() {
                config.sparql_limit_ceiling = n;
            }
        }
        if let Ok(v) = env::var("ONTORLM_STRICT_LIMITS") {
            config.strict_limits = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        if let Ok(v) = env::var("ONTORLM_TRAJECTORY_DIR") {
            config.trajectory_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("ONTORLM_REPL_PYTHON") {
            config.repl.python_path = v;
        }
        if let Ok(v) = env::var("ONTORLM_REPL_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                config.repl.timeout_ms = n;
            }
        }
        if let Ok(v) = env::var("ONTORLM_STDOUT_LIMIT") {
            if let Ok(n) = v.parse() {
                config.repl.stdout_limit = n;
            }
        }
        if let Ok(v) = env::var("ONTORLM_BATCH_PARALLELISM") {
            if let Ok(n) = v.parse() {
                config.batch_parallelism = n;
            }
        }

        config
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_llm_calls(mut self, n: u32) -> Self {
        self.max_llm_calls = n;
        self
    }

    pub fn with_sparql_limit_ceiling(mut self, n: u64) -> Self {
        self.sparql_limit_ceiling = n;
        self
    }

    pub fn with_strict_limits(mut self, strict: bool) -> Self {
        self.strict_limits = strict;
        self
    }

    pub fn with_trajectory_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trajectory_dir = dir.into();
        self
    }

    pub fn with_repl(mut self, repl: ReplConfig) -> Self {
        self.repl = repl;
        self
    }

    pub fn with_batch_parallelism(mut self, n: usize) -> Self {
        self.batch_parallelism = n;
        self
    }
}
