//! Python REPL subprocess management (C4: Sandboxed Namespace Interpreter).
//!
//! The Rust side spawns a Python subprocess and communicates via JSON-RPC
//! over stdin/stdout. One subprocess is spawned per query and torn down at
//! run end (SPEC_FULL.md §4.4) — no pooling is needed across concurrent
//! queries because the engine runs one query per instance (§5).
//!
//! # SUBMIT semantics
//!
//! `SUBMIT(**kwargs)` is implemented on the Python side as a write to a
//! reserved namespace slot rather than a raised exception, so it is naturally
//! uncatchable by an ordinary `except Exception` block without special-casing
//! the interpreter's own control-flow type (open question in SPEC_FULL.md §9,
//! decided in favor of the namespace-slot approach). The **first** SUBMIT
//! call within one `execute()` wins; later calls in the same block are
//! recorded (`submit_call_count`) for observability but never change the
//! payload.

use crate::error::{Error, Result};
use crate::llm::{BatchExecutor, BatchedLLMQuery, BatchedQueryResults, LLMClient};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SHUTDOWN_GRACE_MS: u64 = 2_000;
const SHUTDOWN_POLL_MS: u64 = 10;

/// Default stdout truncation threshold (SPEC_FULL.md §4.4). Load-bearing for
/// bounding context growth; do not widen silently.
pub const DEFAULT_STDOUT_LIMIT: usize = 10_000;

fn wait_for_exit_with_timeout(child: &mut Child, timeout: Duration, context: &str) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::SubprocessComm(format!(
                        "{context} did not exit within {}ms; process was terminated",
                        timeout.as_millis()
                    )));
                }
                std::thread::sleep(Duration::from_millis(SHUTDOWN_POLL_MS));
            }
            Err(e) => {
                return Err(Error::SubprocessComm(format!(
                    "Failed while waiting for {context} to exit: {e}"
                )));
            }
        }
    }
}

/// Truncate `s` to at most `limit` chars, appending a marked suffix if it overflows.
pub fn truncate_stdout(s: &str, limit: usize) -> (String, bool) {
    if s.chars().count() <= limit {
        return (s.to_string(), false);
    }
    let overflow = s.chars().count() - limit;
    let truncated: String = s.chars().take(limit).collect();
    (
        format!("{truncated}\n...[truncated {overflow} chars]"),
        true,
    )
}

/// JSON-RPC request structure.
#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

impl JsonRpcRequest {
    fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC response structure.
#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<Value>,
    error: Option<JsonRpcError>,
    id: Option<u64>,
}

/// JSON-RPC error structure.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

/// Result of executing one code block in the REPL.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecuteResult {
    /// Whether execution completed without a Python-level exception.
    pub success: bool,
    /// Captured stdout, already truncated to `DEFAULT_STDOUT_LIMIT` (or the
    /// configured limit) by the interpreter process.
    pub stdout: String,
    /// Whether `stdout` was truncated.
    #[serde(default)]
    pub truncated: bool,
    /// Captured stderr (not sent back to the LM; diagnostic only).
    #[serde(default)]
    pub stderr: String,
    /// Compact error message (module/line/short message) if execution failed.
    pub error: Option<String>,
    /// Exception type name, if failed.
    pub error_type: Option<String>,
    /// Execution time in milliseconds.
    pub execution_time_ms: f64,
    /// IDs of pending deferred operations (e.g. unresolved `llm_batch` calls).
    #[serde(default)]
    pub pending_operations: Vec<String>,
    /// The keyword arguments of the *first* `SUBMIT` call in this block, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_payload: Option<Map<String, Value>>,
    /// Total number of `SUBMIT` calls observed in this block (>1 means later
    /// calls were recorded but ignored per the idempotence law).
    #[serde(default)]
    pub submit_call_count: u32,
}

impl ExecuteResult {
    /// True iff this execution resolved the run (a SUBMIT payload is present).
    pub fn is_submitted(&self) -> bool {
        self.submit_payload.is_some()
    }
}

/// A pending deferred operation that needs to be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation ID
    pub id: String,
    /// Type of operation (llm_call, llm_batch, etc.)
    pub operation_type: String,
    /// Operation parameters
    pub params: HashMap<String, Value>,
}

/// Status of the REPL subprocess.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplStatus {
    pub ready: bool,
    pub pending_operations: usize,
    pub variables_count: usize,
    pub memory_usage_bytes: Option<u64>,
}

/// Configuration for the REPL subprocess.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Path to the Python executable (default: "python3")
    pub python_path: String,
    /// Optional directory added to `PYTHONPATH` for importing `ontorlm_repl`.
    pub repl_package_path: Option<String>,
    /// Timeout for REPL operations in milliseconds
    pub timeout_ms: u64,
    /// Maximum memory in bytes (enforced by ulimit on Unix)
    pub max_memory_bytes: Option<u64>,
    /// Maximum CPU time in seconds
    pub max_cpu_seconds: Option<u64>,
    /// Stdout truncation threshold in characters.
    pub stdout_limit: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            python_path: "python3".to_string(),
            repl_package_path: None,
            timeout_ms: 30_000,
            max_memory_bytes: Some(512 * 1024 * 1024), // 512 MB
            max_cpu_seconds: Some(60),
            stdout_limit: DEFAULT_STDOUT_LIMIT,
        }
    }
}

/// Handle to a running REPL subprocess.
pub struct ReplHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    config: ReplConfig,
}

impl ReplHandle {
    /// Spawn a new REPL subprocess running `python3 -m ontorlm_repl`.
    ///
    /// The Python-side `ontorlm_repl` module is an external runtime
    /// assumption, not a file distributed by this crate — analogous to how
    /// the teacher's own integration tests mark the equivalent path
    /// `#[ignore]` pending a Python environment.
    pub fn spawn(config: ReplConfig) -> Result<Self> {
        let startup_context = format!(
            "python_path='{}', entrypoint='-m ontorlm_repl', repl_package_path='{}'",
            config.python_path,
            config.repl_package_path.as_deref().unwrap_or("<none>")
        );

        let mut cmd = Command::new(&config.python_path);
        cmd.arg("-m").arg("ontorlm_repl");

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref path) = config.repl_package_path {
            cmd.env("PYTHONPATH", path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::SubprocessComm(format!(
                "Failed to spawn REPL subprocess ({startup_context}): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::SubprocessComm("Failed to get stdin handle".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SubprocessComm("Failed to get stdout handle".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::SubprocessComm("Failed to get stderr handle".to_string()))?;

        let mut stdout = BufReader::new(stdout);

        if let Err(err) =
            Self::wait_for_ready(&mut child, &mut stdout, &mut stderr, &startup_context)
        {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }

        Ok(Self {
            child,
            stdin,
            stdout,
            next_id: 1,
            config,
        })
    }

    fn wait_for_ready(
        child: &mut Child,
        stdout: &mut BufReader<ChildStdout>,
        stderr: &mut ChildStderr,
        startup_context: &str,
    ) -> Result<()> {
        let mut line = String::new();
        let read_bytes = stdout.read_line(&mut line).map_err(|e| {
            Error::SubprocessComm(format!(
                "Failed to read ready message ({startup_context}): {e}"
            ))
        })?;

        if read_bytes == 0 {
            let mut stderr_output = String::new();
            if matches!(child.try_wait(), Ok(Some(_))) {
                let _ = stderr.read_to_string(&mut stderr_output);
            }

            let stderr_output = stderr_output.trim();
            let stderr_excerpt: String = stderr_output.chars().take(500).collect();
            let truncated = stderr_output.chars().count() > 500;
            let stderr_detail = if stderr_excerpt.is_empty() {
                String::new()
            } else if truncated {
                format!("; stderr: {stderr_excerpt}...")
            } else {
                format!("; stderr: {stderr_excerpt}")
            };

            return Err(Error::SubprocessComm(format!(
                "REPL subprocess exited before sending ready message ({startup_context}){stderr_detail}"
            )));
        }

        let msg: Value = serde_json::from_str(&line).map_err(|e| {
            Error::SubprocessComm(format!(
                "Invalid ready message ({startup_context}): {e}; payload={}",
                line.trim()
            ))
        })?;

        if msg.get("method") != Some(&Value::String("ready".to_string())) {
            return Err(Error::SubprocessComm(format!(
                "Expected ready message ({startup_context}), got: {}",
                line.trim()
            )));
        }

        Ok(())
    }

    fn send_request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = JsonRpcRequest::new(method, params, id);
        let request_json = serde_json::to_string(&request)?;

        writeln!(self.stdin, "{}", request_json)
            .map_err(|e| Error::SubprocessComm(format!("Failed to send request: {}", e)))?;
        self.stdin
            .flush()
            .map_err(|e| Error::SubprocessComm(format!("Failed to flush stdin: {}", e)))?;

        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        loop {
            let mut line = String::new();

            if start.elapsed() > timeout {
                return Err(Error::timeout(self.config.timeout_ms));
            }

            match self.stdout.read_line(&mut line) {
                Ok(0) => {
                    return Err(Error::SubprocessComm(
                        "REPL subprocess closed unexpectedly".to_string(),
                    ));
                }
                Ok(_) => {
                    let response: JsonRpcResponse = serde_json::from_str(&line)?;

                    if response.id == Some(id) {
                        if let Some(error) = response.error {
                            return Err(Error::repl_execution(format!(
                                "{}: {}",
                                error.code, error.message
                            )));
                        }
                        return Ok(response.result.unwrap_or(Value::Null));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(e) => {
                    return Err(Error::SubprocessComm(format!(
                        "Failed to read response: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Execute Python code in the REPL's persistent namespace.
    ///
    /// Stdout is truncated on the Rust side (in addition to whatever the
    /// Python side itself enforces) so the truncation contract holds even if
    /// the interpreter process under-truncates.
    pub fn execute(&mut self, code: &str) -> Result<ExecuteResult> {
        let params = serde_json::json!({
            "code": code,
            "timeout_ms": self.config.timeout_ms,
            "capture_output": true,
            "stdout_limit": self.config.stdout_limit,
        });

        let result = self.send_request("execute", params)?;
        let mut execute_result: ExecuteResult = serde_json::from_value(result)?;

        if !execute_result.truncated {
            let (stdout, truncated) =
                truncate_stdout(&execute_result.stdout, self.config.stdout_limit);
            execute_result.stdout = stdout;
            execute_result.truncated = truncated;
        }

        Ok(execute_result)
    }

    /// Get a variable from the REPL namespace.
    pub fn get_variable(&mut self, name: &str) -> Result<Value> {
        let params = serde_json::json!({ "name": name });
        self.send_request("get_variable", params)
    }

    /// Set a variable in the REPL namespace.
    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<()> {
        let params = serde_json::json!({
            "name": name,
            "value": value,
        });
        self.send_request("set_variable", params)?;
        Ok(())
    }

    /// Resolve a deferred operation (e.g. a batched `llm_query` call).
    pub fn resolve_operation(&mut self, operation_id: &str, result: Value) -> Result<()> {
        let params = serde_json::json!({
            "operation_id": operation_id,
            "result": result,
        });
        self.send_request("resolve_operation", params)?;
        Ok(())
    }

    /// List pending deferred operations with operation metadata.
    pub fn list_pending_operations(&mut self) -> Result<Vec<PendingOperation>> {
        let result = self.send_request("pending_operations", Value::Null)?;
        let operations = result
            .get("operations")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let pending: Vec<PendingOperation> = serde_json::from_value(operations)?;
        Ok(pending)
    }

    /// Resolve all pending `llm_batch` operations using the provided batch executor.
    ///
    /// Returns the number of operations resolved.
    pub async fn resolve_pending_llm_batches<C: LLMClient + 'static>(
        &mut self,
        executor: &BatchExecutor<C>,
    ) -> Result<usize> {
        let pending = self.list_pending_operations()?;
        let mut resolved = 0usize;

        for operation in pending {
            if operation.operation_type != "llm_batch" {
                continue;
            }

            let query = llm_batch_query_from_operation(&operation)?;
            let results = executor.execute(query).await?;
            let payload = llm_batch_results_to_payload(&results);
            self.resolve_operation(&operation.id, payload)?;
            resolved += 1;
        }

        Ok(resolved)
    }

    /// List all variables in the REPL namespace.
    pub fn list_variables(&mut self) -> Result<HashMap<String, String>> {
        let result = self.send_request("list_variables", Value::Null)?;
        let vars: HashMap<String, String> = result
            .get("variables")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        Ok(vars)
    }

    /// Get REPL status.
    pub fn status(&mut self) -> Result<ReplStatus> {
        let result = self.send_request("status", Value::Null)?;
        let status: ReplStatus = serde_json::from_value(result)?;
        Ok(status)
    }

    /// Reset the REPL state (clears the namespace; re-seeds tool handles).
    pub fn reset(&mut self) -> Result<()> {
        self.send_request("reset", Value::Null)?;
        Ok(())
    }

    /// Shutdown the REPL subprocess.
    pub fn shutdown(&mut self) -> Result<()> {
        let request = JsonRpcRequest::new("shutdown", Value::Null, self.next_id);
        self.next_id += 1;
        if let Ok(request_json) = serde_json::to_string(&request) {
            let _ = writeln!(self.stdin, "{}", request_json);
            let _ = self.stdin.flush();
        }

        wait_for_exit_with_timeout(
            &mut self.child,
            Duration::from_millis(SHUTDOWN_GRACE_MS),
            "REPL subprocess",
        )
    }

    /// Check if the subprocess is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for ReplHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn llm_batch_query_from_operation(operation: &PendingOperation) -> Result<BatchedLLMQuery> {
    let prompts_value = operation
        .params
        .get("prompts")
        .ok_or_else(|| Error::repl_execution("llm_batch operation missing 'prompts' parameter"))?;

    let prompts_array = prompts_value
        .as_array()
        .ok_or_else(|| Error::repl_execution("llm_batch operation 'prompts' must be an array"))?;

    let prompts = prompts_array
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| Error::repl_execution("llm_batch prompt values must be strings"))
        })
        .collect::<Result<Vec<_>>>()?;

    let max_parallel = operation
        .params
        .get("max_parallel")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(crate::llm::DEFAULT_MAX_PARALLEL)
        .max(1);

    let contexts = match operation.params.get("contexts") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| {
                value.as_str().map(|s| s.to_string()).ok_or_else(|| {
                    Error::repl_execution("llm_batch context values must be strings")
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(Error::repl_execution(
                "llm_batch operation 'contexts' must be an array or null",
            ))
        }
    };

    let model = operation
        .params
        .get("model")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let max_tokens = operation
        .params
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .map(|n| n.min(u32::MAX as u64) as u32);

    let mut query = BatchedLLMQuery::from_prompts(prompts).with_max_parallel(max_parallel);
    if !contexts.is_empty() {
        query = query.with_contexts(contexts.into_iter().map(Some).collect());
    }
    if let Some(model) = model {
        query = query.with_model(model);
    }
    if let Some(max_tokens) = max_tokens {
        query = query.with_max_tokens(max_tokens);
    }

    Ok(query)
}

fn llm_batch_results_to_payload(results: &BatchedQueryResults) -> Value {
    let entries = results
        .results
        .iter()
        .map(|result| {
            if result.success {
                serde_json::json!({
                    "status": "success",
                    "value": result.response.clone().unwrap_or_default(),
                })
            } else {
                serde_json::json!({
                    "status": "error",
                    "value": result.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                })
            }
        })
        .collect::<Vec<_>>();

    Value::Array(entries)
}

/// Thread-safe REPL pool, retained for hosts that want to reuse subprocesses
/// across sequential queries (spawn cost amortization). The engine itself
/// spawns exactly one handle per query.
pub struct ReplPool {
    config: ReplConfig,
    handles: Arc<Mutex<Vec<ReplHandle>>>,
    max_size: usize,
}

impl ReplPool {
    pub fn new(config: ReplConfig, max_size: usize) -> Self {
        Self {
            config,
            handles: Arc::new(Mutex::new(Vec::new())),
            max_size,
        }
    }

    pub fn acquire(&self) -> Result<ReplHandle> {
        let mut handles = self
            .handles
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock pool: {}", e)))?;

        while let Some(mut handle) = handles.pop() {
            if handle.is_alive() {
                return Ok(handle);
            }
        }

        ReplHandle::spawn(self.config.clone())
    }

    pub fn release(&self, handle: ReplHandle) {
        let mut handles = self.handles.lock().ok();
        if let Some(ref mut handles) = handles {
            if handles.len() < self.max_size {
                handles.push(handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        BatchExecutor, CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse,
        LLMClient, ModelSpec, Provider, TokenUsage,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    fn local_repl_config() -> ReplConfig {
        let mut config = ReplConfig::default();
        let manifest_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));

        let local_python3 = manifest_dir.join("python/.venv/bin/python3");
        let local_python = manifest_dir.join("python/.venv/bin/python");
        if local_python3.exists() {
            config.python_path = local_python3.to_string_lossy().into_owned();
        } else if local_python.exists() {
            config.python_path = local_python.to_string_lossy().into_owned();
        }

        let local_package = manifest_dir.join("python");
        if local_package.exists() {
            config.repl_package_path = Some(local_package.to_string_lossy().into_owned());
        }

        config
    }

    struct MockBatchClient;

    #[async_trait]
    impl LLMClient for MockBatchClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            let prompt = request
                .messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, crate::llm::ChatRole::User))
                .map(|m| m.content.as_str())
                .unwrap_or("");

            if prompt == "q2" {
                return Err(Error::LLM("timeout".to_string()));
            }

            Ok(CompletionResponse {
                id: "mock-1".to_string(),
                model: request.model.unwrap_or_else(|| "mock-model".to_string()),
                content: format!("answer-for-{prompt}"),
                stop_reason: None,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    cache_read_tokens: None,
                    cache_creation_tokens: None,
                },
                timestamp: Utc::now(),
                cost: Some(0.0),
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Err(Error::LLM(
                "embedding not implemented in test mock".to_string(),
            ))
        }

        fn provider(&self) -> Provider {
            Provider::OpenRouter
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![]
        }
    }

    #[test]
    fn test_repl_config_default() {
        let config = ReplConfig::default();
        assert_eq!(config.python_path, "python3");
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.stdout_limit, DEFAULT_STDOUT_LIMIT);
    }

    #[test]
    fn test_json_rpc_request() {
        let request = JsonRpcRequest::new("execute", serde_json::json!({"code": "1+1"}), 1);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("execute"));
        assert!(json.contains("2.0"));
    }

    #[test]
    fn test_truncate_stdout_exact_threshold_not_truncated() {
        let s = "a".repeat(100);
        let (out, truncated) = truncate_stdout(&s, 100);
        assert!(!truncated);
        assert_eq!(out, s);
    }

    #[test]
    fn test_truncate_stdout_one_over_threshold_is_truncated() {
        let s = "a".repeat(101);
        let (out, truncated) = truncate_stdout(&s, 100);
        assert!(truncated);
        assert!(out.contains("[truncated 1 chars]"));
        assert_eq!(out.chars().filter(|c| *c == 'a').count(), 100);
    }

    #[test]
    #[ignore = "requires Python environment with ontorlm-repl installed"]
    fn test_repl_spawn() {
        let mut handle = ReplHandle::spawn(local_repl_config())
            .expect("expected REPL subprocess to start in dev or packaged mode");
        assert!(handle.is_alive());

        let status = handle.status().expect("expected status call to succeed");
        assert!(status.ready);

        handle.shutdown().unwrap();
    }

    #[test]
    fn test_repl_spawn_error_includes_context() {
        let mut config = ReplConfig::default();
        config.python_path = "/definitely/missing/python3".to_string();

        let err = match ReplHandle::spawn(config) {
            Ok(_) => panic!("spawn should fail when python path is invalid"),
            Err(err) => err,
        };
        let msg = err.to_string();

        assert!(msg.contains("Failed to spawn REPL subprocess"));
        assert!(msg.contains("python_path='/definitely/missing/python3'"));
        assert!(msg.contains("entrypoint='-m ontorlm_repl'"));
    }

    #[test]
    #[ignore = "requires Python environment with ontorlm-repl installed"]
    fn test_submit_first_call_wins() {
        let mut handle =
            ReplHandle::spawn(local_repl_config()).expect("expected REPL subprocess to start");

        let code = "SUBMIT(a=1)\nSUBMIT(a=2)\n";
        let exec = handle.execute(code).expect("execute should succeed");

        assert!(exec.is_submitted());
        assert_eq!(exec.submit_call_count, 2);
        let payload = exec.submit_payload.unwrap();
        assert_eq!(payload.get("a"), Some(&serde_json::json!(1)));

        handle.shutdown().unwrap();
    }

    #[test]
    fn test_execute_result_with_submit_serialization() {
        let mut payload = Map::new();
        payload.insert("answer".to_string(), serde_json::json!("test"));

        let result = ExecuteResult {
            success: true,
            stdout: "output".to_string(),
            truncated: false,
            stderr: String::new(),
            error: None,
            error_type: None,
            execution_time_ms: 100.0,
            pending_operations: vec![],
            submit_payload: Some(payload),
            submit_call_count: 1,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("submit_payload"));

        let parsed: ExecuteResult = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_submitted());
    }

    #[test]
    fn test_execute_result_without_submit_omits_field() {
        let result = ExecuteResult {
            success: true,
            stdout: String::new(),
            truncated: false,
            stderr: String::new(),
            error: None,
            error_type: None,
            execution_time_ms: 50.0,
            pending_operations: vec![],
            submit_payload: None,
            submit_call_count: 0,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("submit_payload"));
    }

    #[test]
    fn test_llm_batch_operation_to_query() {
        let operation = PendingOperation {
            id: "op-1".to_string(),
            operation_type: "llm_batch".to_string(),
            params: HashMap::from([
                ("prompts".to_string(), serde_json::json!(["q1", "q2"])),
                ("contexts".to_string(), serde_json::json!(["c1", "c2"])),
                ("max_parallel".to_string(), serde_json::json!(3)),
                ("model".to_string(), serde_json::json!("test-model")),
                ("max_tokens".to_string(), serde_json::json!(512)),
            ]),
        };

        let query = llm_batch_query_from_operation(&operation).unwrap();
        assert_eq!(query.prompts, vec!["q1".to_string(), "q2".to_string()]);
        assert_eq!(
            query.contexts,
            vec![Some("c1".to_string()), Some("c2".to_string())]
        );
        assert_eq!(query.max_parallel, 3);
        assert_eq!(query.model, Some("test-model".to_string()));
        assert_eq!(query.max_tokens, Some(512));
    }

    #[test]
    fn test_llm_batch_operation_to_query_rejects_non_string_prompt() {
        let operation = PendingOperation {
            id: "op-1".to_string(),
            operation_type: "llm_batch".to_string(),
            params: HashMap::from([("prompts".to_string(), serde_json::json!(["q1", 2]))]),
        };

        let err = llm_batch_query_from_operation(&operation).unwrap_err();
        assert!(err.to_string().contains("prompt values must be strings"));
    }

    #[test]
    fn test_llm_batch_results_payload_mixed_success_failure() {
        let results = BatchedQueryResults::from_results(vec![
            crate::llm::BatchQueryResult::success(0, "answer-1".to_string(), Some(10)),
            crate::llm::BatchQueryResult::failure(1, "timeout".to_string()),
        ]);

        let payload = llm_batch_results_to_payload(&results);
        let arr = payload.as_array().expect("payload should be array");
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["status"], serde_json::json!("success"));
        assert_eq!(arr[0]["value"], serde_json::json!("answer-1"));
        assert_eq!(arr[1]["status"], serde_json::json!("error"));
        assert_eq!(arr[1]["value"], serde_json::json!("timeout"));
    }

    #[tokio::test]
    #[ignore = "requires Python environment with ontorlm-repl installed"]
    async fn test_llm_batch_host_resolution_roundtrip() {
        let mut handle =
            ReplHandle::spawn(local_repl_config()).expect("expected REPL subprocess to start");

        let exec = handle
            .execute("op = llm_batch(['q1', 'q2'], max_parallel=2)")
            .expect("expected llm_batch operation creation to succeed");
        assert!(exec.success);
        assert!(!exec.pending_operations.is_empty());

        let executor = BatchExecutor::new(MockBatchClient).with_max_parallel(4);
        let resolved = handle
            .resolve_pending_llm_batches(&executor)
            .await
            .expect("expected pending llm_batch operations to resolve");
        assert_eq!(resolved, 1);

        let pending_after = handle
            .list_pending_operations()
            .expect("expected pending operations query to succeed");
        assert!(pending_after.is_empty());

        handle.shutdown().unwrap();
    }

    #[test]
    fn test_wait_for_exit_with_timeout_allows_fast_exit() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .expect("expected short-lived process to spawn");

        let result =
            wait_for_exit_with_timeout(&mut child, Duration::from_millis(100), "test process");
        assert!(result.is_ok(), "expected fast process exit to pass");
    }

    #[test]
    fn test_wait_for_exit_with_timeout_kills_stuck_process() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 10")
            .spawn()
            .expect("expected long-lived process to spawn");

        let err = wait_for_exit_with_timeout(&mut child, Duration::from_millis(50), "test process")
            .expect_err("expected timeout for long-lived process");
        assert!(err.to_string().contains("did not exit within"));
        assert!(matches!(child.try_wait(), Ok(Some(_))));
    }
}
