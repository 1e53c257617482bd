//! RLM Engine (C5): orchestrates one query end-to-end -- context assembly,
//! root-LM calls, sandboxed code execution, tool resolution, and budget
//! enforcement. See the state machine in the module-level test below for the
//! terminal states this loop can reach.

use crate::config::EngineConfig;
use crate::context::{ExternalContextProvider, NoExternalContext};
use crate::error::{Error, Result};
use crate::llm::{BatchExecutor, ChatMessage, CompletionRequest, LLMClient};
use crate::ontology::{summary, OntologyIndex};
use crate::repl::{PendingOperation, ReplHandle};
use crate::sense_card::SenseCard;
use crate::tools::{search_entity, sparql_select};
use crate::trajectory::{TrajectoryRecord, TrajectoryRecorder};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};

/// States of one engine run (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    AwaitLm,
    Executing,
    Observed,
    DoneSubmit,
    DoneBudget,
    DoneFatal,
}

/// One tool invocation observed during execution of a single code block.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolEvent {
    pub call_id: String,
    pub tool_name: String,
    pub inputs: Value,
    pub outputs: Value,
    pub error: Option<String>,
}

/// One iteration-loop turn (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IterationRecord {
    pub index: u32,
    pub reasoning_text: Option<String>,
    pub code: String,
    pub stdout: String,
    pub truncated: bool,
    pub submit_payload: Option<Map<String, Value>>,
    pub lm_call_id: String,
    pub tool_calls: Vec<ToolEvent>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub wall_clock_ms: u64,
}

/// The terminal answer returned to the engine's caller (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FinalOutput {
    pub answer: String,
    pub sparql: String,
    pub evidence: Value,
    pub iterations_used: u32,
    pub converged: bool,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub cost_estimate: Option<f64>,
}

const SYSTEM_INSTRUCTIONS: &str = "\
You are exploring an RDF ontology to answer a query. You work by writing Python \
code into a persistent interpreter; the interpreter's namespace is preserved \
across turns, so variables you assign now are still visible on the next turn.

Two tools are available as plain function calls:
- search_entity(query, limit=5, search_in=\"all\") -> list of {uri, label, match_type}
- sparql_select(query) -> list of {variable: value} dict rows (SELECT-only; a \
missing LIMIT is capped to 100, an explicit LIMIT above 1000 is rejected)

When you have a grounded answer, call SUBMIT(answer=..., sparql=..., evidence=...) \
with keyword arguments. The first SUBMIT call in a turn wins and ends the run; \
code after it in the same block is not considered for the payload. Put your code \
in a single fenced code block per turn.";

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```(?:[A-Za-z0-9_+-]*\n)?(.*?)```").expect("static regex"))
}

/// Extract the first fenced code block from an LM response, and the prose
/// that preceded it (treated as reasoning commentary). If no fenced block is
/// present, the whole trimmed response is treated as code with no reasoning.
fn extract_code(response: &str) -> (Option<String>, String) {
    match code_block_re().captures(response) {
        Some(caps) => {
            let whole = caps.get(0).expect("capture 0 always present");
            let before = response[..whole.start()].trim();
            let code = caps[1].trim().to_string();
            let reasoning = if before.is_empty() { None } else { Some(before.to_string()) };
            (reasoning, code)
        }
        None => (None, response.trim().to_string()),
    }
}

/// Owns one query's end-to-end run: context assembly, the root-LM call loop,
/// C4 execution, tool resolution, and budget enforcement.
pub struct RlmEngine<C: LLMClient> {
    config: EngineConfig,
    index: OntologyIndex,
    sense_card: SenseCard,
    root_lm: Arc<C>,
    sub_lm_executor: Option<BatchExecutor<C>>,
    external_context: Box<dyn ExternalContextProvider>,
    root_model: Option<String>,
}

impl<C: LLMClient + 'static> RlmEngine<C> {
    pub fn new(config: EngineConfig, index: OntologyIndex, sense_card: SenseCard, root_lm: Arc<C>) -> Self {
        Self {
            config,
            index,
            sense_card,
            root_lm,
            sub_lm_executor: None,
            external_context: Box::new(NoExternalContext),
            root_model: None,
        }
    }

    /// Configure a sub-LM handle for `llm_query`/`llm_query_batched`
    /// delegation from inside executed code. Both count against
    /// `max_llm_calls`.
    pub fn with_sub_lm(mut self, client: Arc<C>) -> Self {
        let executor = BatchExecutor::from_arc(client).with_max_parallel(self.config.batch_parallelism);
        self.sub_lm_executor = Some(executor);
        self
    }

    pub fn with_external_context(mut self, provider: Box<dyn ExternalContextProvider>) -> Self {
        self.external_context = provider;
        self
    }

    pub fn with_root_model(mut self, model: impl Into<String>) -> Self {
        self.root_model = Some(model.into());
        self
    }

    /// Context assembly (spec §4.5 step 1): system instructions, sense card,
    /// index summary, optional external context, and the user query.
    fn assemble_context(&self, query: &str) -> String {
        let mut context = String::new();
        context.push_str(SYSTEM_INSTRUCTIONS);
        context.push_str("\n\n");
        context.push_str(&self.sense_card.text);
        context.push_str("\n\n");
        context.push_str(&summary(&self.index));
        if let Some(extra) = self.external_context.context_for(query) {
            context.push_str("\n\n");
            context.push_str(&extra);
        }
        context.push_str("\n\nQuery: ");
        context.push_str(query);
        context
    }

    /// Run one query to completion, returning the final answer and the
    /// trajectory it was recorded into.
    pub async fn run(
        &self,
        query: &str,
        recorder: &mut TrajectoryRecorder,
    ) -> Result<FinalOutput> {
        recorder.record(TrajectoryRecord::run_start(recorder.run_id(), query))?;

        let mut repl = ReplHandle::spawn(self.config.repl.clone())?;
        let mut state = EngineState::Init;
        let mut history = String::new();
        let mut lm_calls: u32 = 0;
        let mut total_in: u64 = 0;
        let mut total_out: u64 = 0;
        let mut total_cost: f64 = 0.0;
        let mut last_stdout = String::new();
        let mut iterations_used: u32 = 0;
        let mut final_error: Option<Error> = None;
        let base_context = self.assemble_context(query);

        let outcome = 'outer: loop {
            for i in 1..=self.config.max_iterations {
                iterations_used = i;
                state = EngineState::AwaitLm;
                recorder.record(TrajectoryRecord::iteration_start(recorder.run_id(), i))?;

                if lm_calls >= self.config.max_llm_calls {
                    state = EngineState::DoneBudget;
                    break 'outer EngineOutcome::Budget;
                }

                let prompt = format!("{base_context}\n\n{history}");
                let mut request = CompletionRequest::new().with_message(ChatMessage::user(prompt.clone()));
                if let Some(model) = &self.root_model {
                    request = request.with_model(model);
                }

                let call_id = uuid::Uuid::new_v4().to_string();
                let started_at = chrono::Utc::now();
                let response = match self.root_lm.complete(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        final_error = Some(e);
                        state = EngineState::DoneFatal;
                        break 'outer EngineOutcome::Fatal;
                    }
                };
                lm_calls += 1;
                total_in += response.usage.input_tokens;
                total_out += response.usage.output_tokens;
                total_cost += response.cost.unwrap_or(0.0);

                recorder.record(TrajectoryRecord::LmCall {
                    run_id: recorder.run_id().to_string(),
                    call_id: call_id.clone(),
                    started_at,
                    ended_at: chrono::Utc::now(),
                    prompt_len: prompt.len(),
                    completion_len: response.content.len(),
                    tokens_in: response.usage.input_tokens,
                    tokens_out: response.usage.output_tokens,
                    model_name: response.model.clone(),
                    sub_lm: false,
                    cost_usd: response.cost,
                    cache_read_tokens: response.usage.cache_read_tokens,
                    cache_creation_tokens: response.usage.cache_creation_tokens,
                })?;

                let (reasoning, code) = extract_code(&response.content);

                state = EngineState::Executing;
                let exec_result = match repl.execute(&code) {
                    Ok(r) => r,
                    Err(e) => {
                        final_error = Some(e);
                        state = EngineState::DoneFatal;
                        break 'outer EngineOutcome::Fatal;
                    }
                };

                let tool_events = self
                    .resolve_pending(&mut repl, recorder, &mut lm_calls)
                    .await?;

                state = EngineState::Observed;

                if let Some(payload) = exec_result.submit_payload.clone() {
                    recorder.record(TrajectoryRecord::iteration_end(recorder.run_id(), i, true))?;
                    state = EngineState::DoneSubmit;
                    break 'outer EngineOutcome::Submitted(payload);
                }

                recorder.record(TrajectoryRecord::iteration_end(recorder.run_id(), i, false))?;

                if !exec_result.stdout.trim().is_empty() {
                    last_stdout = exec_result.stdout.clone();
                }

                history.push_str(&format!("\n--- iteration {i} ---\ncode:\n{code}\n"));
                if let Some(reasoning) = &reasoning {
                    history.push_str(&format!("reasoning: {reasoning}\n"));
                }
                history.push_str(&format!("observation:\n{}\n", exec_result.stdout));
                if let Some(error) = &exec_result.error {
                    history.push_str(&format!("error: {error}\n"));
                }
                for event in &tool_events {
                    history.push_str(&format!(
                        "tool[{}] -> {}\n",
                        event.tool_name,
                        serde_json::to_string(&event.outputs).unwrap_or_default()
                    ));
                }
            }

            state = EngineState::DoneBudget;
            break EngineOutcome::Budget;
        };

        let _ = repl.shutdown();

        match outcome {
            EngineOutcome::Submitted(payload) => {
                let answer = payload
                    .get("answer")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let sparql = payload
                    .get("sparql")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let evidence = payload.get("evidence").cloned().unwrap_or_else(|| json!({}));

                recorder.record(TrajectoryRecord::run_end(
                    recorder.run_id(),
                    true,
                    iterations_used,
                    total_in,
                    total_out,
                    Some(total_cost),
                ))?;

                debug_assert_eq!(state, EngineState::DoneSubmit);

                Ok(FinalOutput {
                    answer,
                    sparql,
                    evidence,
                    iterations_used,
                    converged: true,
                    total_tokens_in: total_in,
                    total_tokens_out: total_out,
                    cost_estimate: Some(total_cost),
                })
            }
            EngineOutcome::Budget => {
                recorder.record(TrajectoryRecord::run_end(
                    recorder.run_id(),
                    false,
                    iterations_used,
                    total_in,
                    total_out,
                    Some(total_cost),
                ))?;

                Ok(FinalOutput {
                    answer: last_stdout,
                    sparql: String::new(),
                    evidence: json!({}),
                    iterations_used,
                    converged: false,
                    total_tokens_in: total_in,
                    total_tokens_out: total_out,
                    cost_estimate: Some(total_cost),
                })
            }
            EngineOutcome::Fatal => {
                recorder.record(TrajectoryRecord::run_end(
                    recorder.run_id(),
                    false,
                    iterations_used,
                    total_in,
                    total_out,
                    Some(total_cost),
                ))?;
                Err(final_error.unwrap_or_else(|| Error::Internal("engine reached DONE_FATAL with no recorded error".to_string())))
            }
        }
    }

    /// Resolve every operation the interpreter left pending after an
    /// `execute()` call: `search_entity`/`sparql_select` are resolved
    /// synchronously against the index; `llm_batch` is resolved through the
    /// sub-LM executor, subject to the remaining `max_llm_calls` budget.
    async fn resolve_pending(
        &self,
        repl: &mut ReplHandle,
        recorder: &mut TrajectoryRecorder,
        lm_calls: &mut u32,
    ) -> Result<Vec<ToolEvent>> {
        let pending = repl.list_pending_operations()?;
        let mut events = Vec::new();

        for operation in pending {
            let call_id = operation.id.clone();
            let (outputs, error) = self.dispatch_operation(&operation, lm_calls).await;

            recorder.record(TrajectoryRecord::tool_start(
                recorder.run_id(),
                call_id.clone(),
                operation.operation_type.clone(),
                json!(operation.params),
            ))?;
            recorder.record(TrajectoryRecord::tool_end(
                recorder.run_id(),
                call_id.clone(),
                operation.operation_type.clone(),
                outputs.clone(),
                error.clone(),
            ))?;

            let resolved_value = match &error {
                Some(message) => json!({ "error": message }),
                None => outputs.clone(),
            };
            repl.resolve_operation(&operation.id, resolved_value)?;

            events.push(ToolEvent {
                call_id,
                tool_name: operation.operation_type,
                inputs: json!(operation.params),
                outputs,
                error,
            });
        }

        Ok(events)
    }

    async fn dispatch_operation(
        &self,
        operation: &PendingOperation,
        lm_calls: &mut u32,
    ) -> (Value, Option<String>) {
        match operation.operation_type.as_str() {
            "search_entity" => {
                let query = operation.params.get("query").and_then(Value::as_str).unwrap_or_default();
                let limit = operation.params.get("limit").and_then(Value::as_i64).unwrap_or(5);
                let search_in = operation
                    .params
                    .get("search_in")
                    .and_then(Value::as_str)
                    .unwrap_or("all");
                match search_entity(&self.index, query, limit, search_in, self.config.strict_limits) {
                    Ok(matches) => (json!(matches), None),
                    Err(e) => (Value::Null, Some(e.to_string())),
                }
            }
            "sparql_select" => {
                let query = operation.params.get("query").and_then(Value::as_str).unwrap_or_default();
                match sparql_select(
                    &self.index,
                    query,
                    self.config.sparql_auto_limit,
                    self.config.sparql_limit_ceiling,
                ) {
                    Ok(rows) => (json!(rows), None),
                    Err(e) => (Value::Null, Some(e.to_string())),
                }
            }
            "llm_batch" => self.dispatch_llm_batch(operation, lm_calls).await,
            other => (
                Value::Null,
                Some(format!("unknown pending operation type: {other}")),
            ),
        }
    }

    async fn dispatch_llm_batch(
        &self,
        operation: &PendingOperation,
        lm_calls: &mut u32,
    ) -> (Value, Option<String>) {
        let Some(executor) = &self.sub_lm_executor else {
            return (Value::Null, Some("no sub-LM configured for llm_query".to_string()));
        };

        let prompt_count = operation
            .params
            .get("prompts")
            .and_then(Value::as_array)
            .map(|a| a.len() as u32)
            .unwrap_or(0);

        if *lm_calls + prompt_count > self.config.max_llm_calls {
            return (Value::Null, Some("llm call budget exceeded".to_string()));
        }

        let prompts: Vec<String> = operation
            .params
            .get("prompts")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let batch = crate::llm::BatchedLLMQuery::from_prompts(prompts);
        match executor.execute(batch).await {
            Ok(results) => {
                *lm_calls += prompt_count;
                (json!(results.responses()), None)
            }
            Err(e) => (Value::Null, Some(e.to_string())),
        }
    }
}

enum EngineOutcome {
    Submitted(Map<String, Value>),
    Budget,
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_code_from_fenced_block_separates_reasoning() {
        let response = "Let me search first.\n```python\nr = search_entity('Dog')\n```";
        let (reasoning, code) = extract_code(response);
        assert_eq!(reasoning.as_deref(), Some("Let me search first."));
        assert_eq!(code, "r = search_entity('Dog')");
    }

    #[test]
    fn test_extract_code_without_fence_treats_whole_response_as_code() {
        let response = "r = search_entity('Dog')";
        let (reasoning, code) = extract_code(response);
        assert_eq!(reasoning, None);
        assert_eq!(code, "r = search_entity('Dog')");
    }

    #[test]
    fn test_extract_code_is_case_insensitive_on_language_tag() {
        let response = "```PYTHON\nx = 1\n```";
        let (_, code) = extract_code(response);
        assert_eq!(code, "x = 1");
    }

    #[test]
    fn test_engine_states_are_distinct() {
        let states = [
            EngineState::Init,
            EngineState::AwaitLm,
            EngineState::Executing,
            EngineState::Observed,
            EngineState::DoneSubmit,
            EngineState::DoneBudget,
            EngineState::DoneFatal,
        ];
        for (i, a) in states.iter().enumerate() {
            for (j, b) in states.iter().enumerate() {
                assert_eq!(i == j, a == b);
            }
        }
    }
}
