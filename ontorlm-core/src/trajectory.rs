//! Trajectory Recorder & Graders (C6).
//!
//! The recorder writes one [`TrajectoryRecord`] per line to an append-only
//! NDJSON file, flushing after each write so a crashed run still leaves a
//! valid, truncated-but-parseable prefix. Graders consume the recorded file
//! plus a [`crate::engine::FinalOutput`] and emit a [`GradeReport`]; the
//! composition policy pins the overall decision on the LLM judge when one is
//! configured, falling back to a logical AND over the other graders.

use crate::engine::FinalOutput;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// One append-only trajectory event. Discriminated by `kind` in the NDJSON
/// wire form (see spec §3 / §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrajectoryRecord {
    RunStart {
        run_id: String,
        query: String,
        timestamp: DateTime<Utc>,
    },
    IterationStart {
        run_id: String,
        index: u32,
        timestamp: DateTime<Utc>,
    },
    LmCall {
        run_id: String,
        call_id: String,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        prompt_len: usize,
        completion_len: usize,
        tokens_in: u64,
        tokens_out: u64,
        model_name: String,
        sub_lm: bool,
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        cache_read_tokens: Option<u64>,
        #[serde(default)]
        cache_creation_tokens: Option<u64>,
    },
    ToolStart {
        run_id: String,
        call_id: String,
        tool_name: String,
        started_at: DateTime<Utc>,
        inputs: Value,
    },
    ToolEnd {
        run_id: String,
        call_id: String,
        tool_name: String,
        ended_at: DateTime<Utc>,
        outputs: Value,
        #[serde(default)]
        error: Option<String>,
    },
    IterationEnd {
        run_id: String,
        index: u32,
        timestamp: DateTime<Utc>,
        submitted: bool,
    },
    RunEnd {
        run_id: String,
        timestamp: DateTime<Utc>,
        converged: bool,
        iterations_used: u32,
        total_tokens_in: u64,
        total_tokens_out: u64,
        #[serde(default)]
        cost_estimate: Option<f64>,
    },
}

impl TrajectoryRecord {
    pub fn run_start(run_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self::RunStart {
            run_id: run_id.into(),
            query: query.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn iteration_start(run_id: impl Into<String>, index: u32) -> Self {
        Self::IterationStart {
            run_id: run_id.into(),
            index,
            timestamp: Utc::now(),
        }
    }

    pub fn iteration_end(run_id: impl Into<String>, index: u32, submitted: bool) -> Self {
        Self::IterationEnd {
            run_id: run_id.into(),
            index,
            timestamp: Utc::now(),
            submitted,
        }
    }

    pub fn tool_start(
        run_id: impl Into<String>,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        inputs: Value,
    ) -> Self {
        Self::ToolStart {
            run_id: run_id.into(),
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            started_at: Utc::now(),
            inputs,
        }
    }

    pub fn tool_end(
        run_id: impl Into<String>,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        outputs: Value,
        error: Option<String>,
    ) -> Self {
        Self::ToolEnd {
            run_id: run_id.into(),
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            ended_at: Utc::now(),
            outputs,
            error,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run_end(
        run_id: impl Into<String>,
        converged: bool,
        iterations_used: u32,
        total_tokens_in: u64,
        total_tokens_out: u64,
        cost_estimate: Option<f64>,
    ) -> Self {
        Self::RunEnd {
            run_id: run_id.into(),
            timestamp: Utc::now(),
            converged,
            iterations_used,
            total_tokens_in,
            total_tokens_out,
            cost_estimate,
        }
    }
}

/// Append-only NDJSON writer for one run's trajectory.
///
/// Flushes after every [`TrajectoryRecorder::record`] call so a crash mid-run
/// leaves a parseable prefix rather than a half-written line.
pub struct TrajectoryRecorder {
    writer: BufWriter<File>,
    run_id: String,
}

impl TrajectoryRecorder {
    /// Create `{dir}/{run_id}.ndjson`, creating `dir` if missing.
    pub fn create(dir: &Path, run_id: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Internal(format!("failed to create trajectory dir: {e}")))?;
        let run_id = run_id.into();
        let path = dir.join(format!("{run_id}.ndjson"));
        let file = File::create(&path)
            .map_err(|e| Error::Internal(format!("failed to create trajectory file: {e}")))?;
        Ok(Self {
            writer: BufWriter::new(file),
            run_id,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Serialize `record` as one NDJSON line and flush immediately.
    pub fn record(&mut self, record: TrajectoryRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        writeln!(self.writer, "{line}")
            .map_err(|e| Error::Internal(format!("failed to write trajectory record: {e}")))?;
        self.writer
            .flush()
            .map_err(|e| Error::Internal(format!("failed to flush trajectory file: {e}")))?;
        Ok(())
    }
}

/// Parse an NDJSON trajectory file back into its records, in emission order.
pub fn read_trajectory(path: &Path) -> Result<Vec<TrajectoryRecord>> {
    let file =
        File::open(path).map_err(|e| Error::Internal(format!("failed to open trajectory: {e}")))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::Internal(format!("failed to read trajectory: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Outcome of a single grader run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderVerdict {
    Passed,
    Failed,
    Errored,
}

impl GraderVerdict {
    fn as_bool(self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// The result of running one grader against a trajectory + final output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    pub grader: String,
    pub verdict: GraderVerdict,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl GradeReport {
    fn passed(grader: &str, reason: impl Into<String>) -> Self {
        Self {
            grader: grader.to_string(),
            verdict: GraderVerdict::Passed,
            reason: reason.into(),
            detail: None,
        }
    }

    fn failed(grader: &str, reason: impl Into<String>) -> Self {
        Self {
            grader: grader.to_string(),
            verdict: GraderVerdict::Failed,
            reason: reason.into(),
            detail: None,
        }
    }
}

/// A non-LLM grader consuming the recorded trajectory plus final output.
pub trait Grader {
    fn name(&self) -> &'static str;
    fn grade(&self, trajectory: &[TrajectoryRecord], output: &FinalOutput) -> GradeReport;
}

/// Passes iff the run converged (SUBMIT was called) within the task's
/// iteration budget. Uses `<=`, not `<`, against `max_iterations`.
pub struct ConvergenceGrader {
    pub max_iterations: u32,
}

impl Grader for ConvergenceGrader {
    fn name(&self) -> &'static str {
        "convergence"
    }

    fn grade(&self, _trajectory: &[TrajectoryRecord], output: &FinalOutput) -> GradeReport {
        if output.converged && output.iterations_used <= self.max_iterations {
            GradeReport::passed(
                self.name(),
                format!(
                    "converged in {} of {} iterations",
                    output.iterations_used, self.max_iterations
                ),
            )
        } else {
            GradeReport::failed(
                self.name(),
                format!(
                    "converged={}, iterations_used={}, max_iterations={}",
                    output.converged, output.iterations_used, self.max_iterations
                ),
            )
        }
    }
}

/// Passes iff every required tool name appears in the tool-call stream;
/// optionally requires the first calls to match `required_tools` in order.
pub struct ToolCalledGrader {
    pub required_tools: Vec<String>,
    pub ordered_prefix: bool,
}

impl ToolCalledGrader {
    fn tool_call_sequence(trajectory: &[TrajectoryRecord]) -> Vec<&str> {
        trajectory
            .iter()
            .filter_map(|r| match r {
                TrajectoryRecord::ToolStart { tool_name, .. } => Some(tool_name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Grader for ToolCalledGrader {
    fn name(&self) -> &'static str {
        "tool_called"
    }

    fn grade(&self, trajectory: &[TrajectoryRecord], _output: &FinalOutput) -> GradeReport {
        let seen = Self::tool_call_sequence(trajectory);

        let missing: Vec<&String> = self
            .required_tools
            .iter()
            .filter(|t| !seen.contains(&t.as_str()))
            .collect();
        if !missing.is_empty() {
            return GradeReport::failed(
                self.name(),
                format!("missing required tool call(s): {missing:?}"),
            );
        }

        if self.ordered_prefix {
            let prefix: Vec<&str> = seen.iter().take(self.required_tools.len()).copied().collect();
            let expected: Vec<&str> = self.required_tools.iter().map(String::as_str).collect();
            if prefix != expected {
                return GradeReport::failed(
                    self.name(),
                    format!("expected ordered prefix {expected:?}, got {prefix:?}"),
                );
            }
        }

        GradeReport::passed(self.name(), "all required tools observed")
    }
}

/// Checks that `FinalOutput.sparql` contains every required substring
/// pattern, case- and whitespace-insensitively. Advisory, not authoritative.
pub struct StructuralSparqlGrader {
    pub required_patterns: Vec<String>,
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase()
}

impl Grader for StructuralSparqlGrader {
    fn name(&self) -> &'static str {
        "structural_sparql"
    }

    fn grade(&self, _trajectory: &[TrajectoryRecord], output: &FinalOutput) -> GradeReport {
        let haystack = normalize_whitespace(&output.sparql);
        let missing: Vec<&String> = self
            .required_patterns
            .iter()
            .filter(|p| !haystack.contains(&normalize_whitespace(p)))
            .collect();

        if missing.is_empty() {
            GradeReport::passed(self.name(), "all required SPARQL patterns present")
        } else {
            GradeReport::failed(self.name(), format!("missing pattern(s): {missing:?}"))
        }
    }
}

/// Checks that `FinalOutput.evidence` contains every required field name.
/// Structurally strict: field names must match exactly.
pub struct OutcomeVerificationGrader {
    pub required_fields: Vec<String>,
}

impl Grader for OutcomeVerificationGrader {
    fn name(&self) -> &'static str {
        "outcome_verification"
    }

    fn grade(&self, _trajectory: &[TrajectoryRecord], output: &FinalOutput) -> GradeReport {
        let obj = output.evidence.as_object();
        let missing: Vec<&String> = self
            .required_fields
            .iter()
            .filter(|f| !obj.map(|o| o.contains_key(f.as_str())).unwrap_or(false))
            .collect();

        if missing.is_empty() {
            GradeReport::passed(self.name(), "all required evidence fields present")
        } else {
            GradeReport::failed(self.name(), format!("missing evidence field(s): {missing:?}"))
        }
    }
}

/// Sends `{query, answer, sparql, evidence}` to a judge LM with a rubric
/// emphasizing semantic correctness and groundedness.
pub struct LlmJudgeGrader<C: LLMClient> {
    client: std::sync::Arc<C>,
    model: Option<String>,
}

impl<C: LLMClient> LlmJudgeGrader<C> {
    pub fn new(client: std::sync::Arc<C>) -> Self {
        Self { client, model: None }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn name(&self) -> &'static str {
        "llm_judge"
    }

    /// Judge the final answer. Unlike the other graders this is async (it
    /// makes an LM call) and is therefore not part of the [`Grader`] trait.
    pub async fn grade(&self, query: &str, output: &FinalOutput) -> GradeReport {
        let rubric = format!(
            "You are grading whether an agent's answer to an ontology query is correct and grounded in the evidence it gathered.\n\n\
             Query: {query}\n\
             Answer: {}\n\
             SPARQL used: {}\n\
             Evidence: {}\n\n\
             Respond with a JSON object: {{\"passed\": bool, \"score\": number between 0 and 1, \"reasoning\": string}}.",
            output.answer,
            output.sparql,
            output.evidence,
        );

        let mut request = CompletionRequest::new().with_message(ChatMessage::user(rubric));
        if let Some(model) = &self.model {
            request = request.with_model(model);
        }

        match self.client.complete(request).await {
            Ok(response) => parse_judge_response(self.name(), &response.content),
            Err(e) => GradeReport {
                grader: self.name().to_string(),
                verdict: GraderVerdict::Errored,
                reason: format!("judge LM call failed: {e}"),
                detail: None,
            },
        }
    }
}

fn parse_judge_response(grader: &str, content: &str) -> GradeReport {
    let parsed: Option<Value> = serde_json::from_str(content).ok().or_else(|| {
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        serde_json::from_str(&content[start..=end]).ok()
    });

    match parsed {
        Some(value) => {
            let passed = value.get("passed").and_then(Value::as_bool).unwrap_or(false);
            let reasoning = value
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or("no reasoning provided")
                .to_string();
            GradeReport {
                grader: grader.to_string(),
                verdict: if passed { GraderVerdict::Passed } else { GraderVerdict::Failed },
                reason: reasoning,
                detail: Some(value),
            }
        }
        None => GradeReport {
            grader: grader.to_string(),
            verdict: GraderVerdict::Errored,
            reason: format!("judge response was not valid JSON: {content}"),
            detail: None,
        },
    }
}

/// Compose the overall pass/fail decision: the LLM judge's verdict wins when
/// present; otherwise fall back to a logical AND over the other reports
/// (an `Errored` report counts as not-passed for that grader only).
pub fn compose_verdict(reports: &[GradeReport], judge: Option<&GradeReport>) -> bool {
    if let Some(judge) = judge {
        return judge.verdict.as_bool();
    }
    reports.iter().all(|r| r.verdict.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FinalOutput;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_output(converged: bool, iterations_used: u32) -> FinalOutput {
        FinalOutput {
            answer: "a golden retriever is a dog".to_string(),
            sparql: "SELECT ?s WHERE { ?s a ex:Dog }".to_string(),
            evidence: json!({"entity": "ex:Dog"}),
            iterations_used,
            converged,
            total_tokens_in: 100,
            total_tokens_out: 50,
            cost_estimate: Some(0.002),
        }
    }

    #[test]
    fn test_record_and_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut recorder = TrajectoryRecorder::create(dir.path(), "run-1").unwrap();
        recorder
            .record(TrajectoryRecord::run_start("run-1", "what is a dog?"))
            .unwrap();
        recorder
            .record(TrajectoryRecord::iteration_start("run-1", 1))
            .unwrap();
        recorder
            .record(TrajectoryRecord::tool_start(
                "run-1",
                "call-1",
                "search_entity",
                json!({"query": "dog"}),
            ))
            .unwrap();
        recorder
            .record(TrajectoryRecord::tool_end(
                "run-1",
                "call-1",
                "search_entity",
                json!([{"uri": "ex:Dog"}]),
                None,
            ))
            .unwrap();

        let path = dir.path().join("run-1.ndjson");
        let records = read_trajectory(&path).unwrap();
        assert_eq!(records.len(), 4);
        assert!(matches!(records[0], TrajectoryRecord::RunStart { .. }));
        assert!(matches!(records[3], TrajectoryRecord::ToolEnd { .. }));
    }

    #[test]
    fn test_tool_start_end_call_ids_pair() {
        let dir = TempDir::new().unwrap();
        let mut recorder = TrajectoryRecorder::create(dir.path(), "run-2").unwrap();
        recorder
            .record(TrajectoryRecord::tool_start("run-2", "c1", "sparql_select", json!({})))
            .unwrap();
        recorder
            .record(TrajectoryRecord::tool_end("run-2", "c1", "sparql_select", json!([]), None))
            .unwrap();

        let records = read_trajectory(&dir.path().join("run-2.ndjson")).unwrap();
        let starts: std::collections::HashSet<&str> = records
            .iter()
            .filter_map(|r| match r {
                TrajectoryRecord::ToolStart { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        let ends: std::collections::HashSet<&str> = records
            .iter()
            .filter_map(|r| match r {
                TrajectoryRecord::ToolEnd { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, ends);
    }

    #[test]
    fn test_convergence_grader_respects_less_equal() {
        let grader = ConvergenceGrader { max_iterations: 5 };
        let output = sample_output(true, 5);
        assert_eq!(grader.grade(&[], &output).verdict, GraderVerdict::Passed);
    }

    #[test]
    fn test_convergence_grader_fails_when_not_converged() {
        let grader = ConvergenceGrader { max_iterations: 5 };
        let output = sample_output(false, 5);
        assert_eq!(grader.grade(&[], &output).verdict, GraderVerdict::Failed);
    }

    #[test]
    fn test_tool_called_grader_passes_when_all_present() {
        let trajectory = vec![
            TrajectoryRecord::tool_start("r", "c1", "search_entity", json!({})),
            TrajectoryRecord::tool_start("r", "c2", "sparql_select", json!({})),
        ];
        let grader = ToolCalledGrader {
            required_tools: vec!["search_entity".to_string(), "sparql_select".to_string()],
            ordered_prefix: false,
        };
        assert_eq!(
            grader.grade(&trajectory, &sample_output(true, 1)).verdict,
            GraderVerdict::Passed
        );
    }

    #[test]
    fn test_tool_called_grader_enforces_ordered_prefix() {
        let trajectory = vec![
            TrajectoryRecord::tool_start("r", "c1", "sparql_select", json!({})),
            TrajectoryRecord::tool_start("r", "c2", "search_entity", json!({})),
        ];
        let grader = ToolCalledGrader {
            required_tools: vec!["search_entity".to_string(), "sparql_select".to_string()],
            ordered_prefix: true,
        };
        assert_eq!(
            grader.grade(&trajectory, &sample_output(true, 1)).verdict,
            GraderVerdict::Failed
        );
    }

    #[test]
    fn test_structural_sparql_grader_whitespace_insensitive() {
        let grader = StructuralSparqlGrader {
            required_patterns: vec!["?s a  ex:Dog".to_string()],
        };
        assert_eq!(
            grader.grade(&[], &sample_output(true, 1)).verdict,
            GraderVerdict::Passed
        );
    }

    #[test]
    fn test_outcome_verification_grader_exact_field_names() {
        let grader = OutcomeVerificationGrader {
            required_fields: vec!["protein".to_string()],
        };
        assert_eq!(
            grader.grade(&[], &sample_output(true, 1)).verdict,
            GraderVerdict::Failed,
            "evidence has 'entity', not 'protein' -- structurally strict"
        );
    }

    #[test]
    fn test_compose_verdict_judge_primary_overrides_failed_others() {
        let failing = GradeReport::failed("structural_sparql", "missing pattern");
        let judge = GradeReport {
            grader: "llm_judge".to_string(),
            verdict: GraderVerdict::Passed,
            reason: "semantically correct".to_string(),
            detail: None,
        };
        assert!(compose_verdict(&[failing], Some(&judge)));
    }

    #[test]
    fn test_compose_verdict_falls_back_to_and_without_judge() {
        let passing = GradeReport::passed("convergence", "ok");
        let failing = GradeReport::failed("tool_called", "missing tool");
        assert!(!compose_verdict(&[passing, failing], None));
    }

    #[test]
    fn test_parse_judge_response_tolerates_surrounding_prose() {
        let content = "Here is my verdict:\n{\"passed\": true, \"score\": 0.9, \"reasoning\": \"grounded\"}\nThanks.";
        let report = parse_judge_response("llm_judge", content);
        assert_eq!(report.verdict, GraderVerdict::Passed);
    }
}
