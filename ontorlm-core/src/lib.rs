//! # ontorlm-core
//!
//! A Recursive Language Model (RLM) runtime for ontology query-construction
//! agents: a frontier LLM emits Python code into a bounded REPL, the code
//! explores an RDF ontology through a minimal toolset, and the run ends when
//! the code calls `SUBMIT(...)` with a structured answer.
//!
//! ## Core components
//!
//! - **ontology**: metadata index over a parsed RDF graph (classes,
//!   properties, labels, hierarchy, domains/ranges).
//! - **tools**: the two bounded operations (`search_entity`, `sparql_select`)
//!   exposed to generated code.
//! - **sense_card**: initial ontology-oriented prompt context, authored or
//!   generated.
//! - **repl**: sandboxed namespace interpreter (subprocess + JSON-RPC).
//! - **engine**: the iteration loop that ties context, LM, and REPL together.
//! - **trajectory**: append-only run log and grader composition.
//! - **llm**: LM client plumbing (providers, batching, cost tracking).

extern crate self as ontorlm_core;

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod llm;
pub mod ontology;
pub mod repl;
pub mod sense_card;
pub mod tools;
pub mod trajectory;

pub use config::EngineConfig;
pub use context::{ExternalContextProvider, NoExternalContext};
pub use engine::{EngineState, FinalOutput, IterationRecord, RlmEngine, ToolEvent};
pub use error::{Error, Result, SparqlErrorCategory};
pub use llm::{
    AnthropicClient, BatchExecutor, BatchedLLMQuery, BatchedQueryResults, ClientConfig,
    CompletionRequest, CompletionResponse, CostTracker, LLMClient, ModelSpec, ModelTier,
    Provider, TokenUsage,
};
pub use ontology::{OntologyFormat, OntologyIndex};
pub use repl::{ExecuteResult, ReplConfig, ReplHandle};
pub use sense_card::{SenseCard, SenseCardError};
pub use tools::{search_entity, sparql_select, EntityMatch, MatchType};
pub use trajectory::{
    compose_verdict, ConvergenceGrader, GradeReport, GraderVerdict, LlmJudgeGrader,
    OutcomeVerificationGrader, StructuralSparqlGrader, ToolCalledGrader, TrajectoryRecord,
    TrajectoryRecorder,
};
