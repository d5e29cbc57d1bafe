use super::submit;
use super::{Interpreter, InterpreterError, Outcome, Variables};
use crate::config::InterpreterConfig;
use crate::tools::ToolSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

pub const DEFAULT_PYTHON_COMMAND: &str = "python3";

const REAP_TIMEOUT_SECS: u64 = 5;

/// Runner program executed by the child interpreter. It owns the persistent
/// namespace, captures printed output per request, proxies tool calls back
/// to the host, and answers exec/eval requests over a JSON-line protocol.
/// `_HOST_STDOUT` is grabbed before any redirection so protocol frames never
/// land in the capture buffer.
const RUNNER: &str = r#"
import io
import json
import sys
import traceback
from contextlib import redirect_stdout

_HOST_STDOUT = sys.stdout


class _Final:
    def __init__(self, value):
        self.value = value


def _read():
    line = sys.stdin.readline()
    if not line:
        raise EOFError
    return json.loads(line)


def _write(message):
    _HOST_STDOUT.write(json.dumps(message, ensure_ascii=False) + "\n")
    _HOST_STDOUT.flush()


def _call_tool(name, args):
    _write({"type": "tool_call", "name": name, "args": list(args)})
    reply = _read()
    if reply.get("ok"):
        return reply.get("value", "")
    raise RuntimeError(reply.get("error") or "tool call failed")


def _make_proxy(name):
    def _proxy(*args):
        return _call_tool(name, args)

    _proxy.__name__ = name
    return _proxy


def _json_safe(value):
    if isinstance(value, _Final):
        value = value.value
    try:
        json.dumps(value)
        return value
    except (TypeError, ValueError):
        return repr(value)


namespace = {}
proxied = set()


def _bind_tools(names):
    global proxied
    for stale in proxied.difference(names):
        namespace.pop(stale, None)
    for name in names:
        namespace[name] = _make_proxy(name)
    proxied = set(names)


while True:
    try:
        request = _read()
    except EOFError:
        break
    kind = request.get("type")
    if kind == "exec":
        _bind_tools(request.get("tools") or [])
        namespace.update(request.get("variables") or {})
        namespace["SUBMIT"] = _Final
        sink = io.StringIO()
        try:
            with redirect_stdout(sink):
                exec(request.get("code", ""), namespace)
            _write({"type": "exec_result", "status": "ok", "stdout": sink.getvalue()})
        except Exception as exc:
            _write({
                "type": "exec_result",
                "status": "error",
                "error": str(exc),
                "traceback": traceback.format_exc(),
                "stdout": sink.getvalue(),
            })
    elif kind == "eval":
        try:
            value = eval(request.get("expr", ""), namespace)
            _write({"type": "eval_result", "status": "ok", "value": _json_safe(value)})
        except Exception as exc:
            _write({"type": "eval_result", "status": "error", "error": str(exc)})
    else:
        _write({
            "type": "exec_result",
            "status": "error",
            "error": "unknown request type",
            "traceback": "",
            "stdout": "",
        })
"#;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request<'a> {
    Exec {
        code: &'a str,
        variables: &'a Variables,
        tools: &'a [String],
    },
    Eval {
        expr: &'a str,
    },
    ToolResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    ToolCall {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    ExecResult {
        status: String,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        error: String,
        #[serde(default)]
        traceback: String,
    },
    EvalResult {
        status: String,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        error: String,
    },
}

struct ReplChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ReplChild {
    fn spawn(python_command: &str) -> Result<Self, InterpreterError> {
        let mut parts = python_command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            InterpreterError::SpawnFailed("empty interpreter command".to_string())
        })?;
        let mut command = Command::new(program);
        command.args(parts);
        command
            .arg("-u")
            .arg("-c")
            .arg(RUNNER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command
            .spawn()
            .map_err(|e| InterpreterError::SpawnFailed(format!("{}: {}", python_command, e)))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            InterpreterError::SpawnFailed("failed to capture interpreter stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            InterpreterError::SpawnFailed("failed to capture interpreter stdout".to_string())
        })?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn send(&mut self, request: &Request) -> Result<(), InterpreterError> {
        let mut line = serde_json::to_vec(request)
            .map_err(|e| InterpreterError::Protocol(e.to_string()))?;
        line.push(b'\n');
        self.stdin.write_all(&line)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn read_event(&mut self) -> Result<Event, InterpreterError> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line)?;
        if read == 0 {
            return Err(InterpreterError::ChildExited(
                "interpreter closed its output stream".to_string(),
            ));
        }
        serde_json::from_str(line.trim()).map_err(|e| {
            InterpreterError::Protocol(format!(
                "invalid frame from interpreter: {}; raw={}",
                e,
                line.trim()
            ))
        })
    }

    fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self
            .child
            .wait_timeout(Duration::from_secs(REAP_TIMEOUT_SECS));
    }
}

/// Read events until the child reports a result, dispatching tool calls to
/// the current tool set as they arrive.
fn next_result(child: &mut ReplChild, tools: &ToolSet) -> Result<Event, InterpreterError> {
    loop {
        match child.read_event()? {
            Event::ToolCall { name, args } => {
                let reply = match tools.call(&name, &args) {
                    Ok(value) => Request::ToolResult {
                        ok: true,
                        value: Some(value),
                        error: None,
                    },
                    Err(e) => Request::ToolResult {
                        ok: false,
                        value: None,
                        error: Some(e.to_string()),
                    },
                };
                child.send(&reply)?;
            }
            other => return Ok(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    NotStarted,
    Started,
    Shutdown,
}

/// A sandbox session backed by a persistent `python3` child process.
///
/// The namespace lives in the child, so it survives across `execute` calls
/// and dies with the child on `shutdown`. One session supports one caller at
/// a time; use one session per concurrent task. No timeout is imposed on
/// executing code: a fragment that never terminates blocks `execute` until
/// the caller kills the session from another thread or the process exits.
pub struct PythonInterpreter {
    python_command: String,
    tools: ToolSet,
    state: SessionState,
    child: Option<ReplChild>,
}

impl PythonInterpreter {
    pub fn new() -> Self {
        Self::with_tools(ToolSet::new())
    }

    pub fn with_tools(tools: ToolSet) -> Self {
        Self {
            python_command: DEFAULT_PYTHON_COMMAND.to_string(),
            tools,
            state: SessionState::NotStarted,
            child: None,
        }
    }

    pub fn from_config(config: &InterpreterConfig) -> Self {
        let mut interpreter = Self::new();
        if !config.python_command.trim().is_empty() {
            interpreter.python_command = config.python_command.clone();
        }
        interpreter
    }

    pub fn python_command(&self) -> &str {
        &self.python_command
    }

    fn kill_child(&mut self) {
        if let Some(child) = self.child.take() {
            child.kill();
        }
    }

    fn live_child(&mut self) -> Result<&mut ReplChild, InterpreterError> {
        self.child.as_mut().ok_or_else(|| {
            InterpreterError::ChildExited("no live interpreter process".to_string())
        })
    }

    /// Run the extracted submission expression against the post-execution
    /// namespace and wrap the result as the turn's final value.
    fn evaluate_submission(&mut self, expr: &str) -> Result<Outcome, InterpreterError> {
        let tools = self.tools.clone();
        let child = self.live_child()?;
        child.send(&Request::Eval { expr })?;
        match next_result(child, &tools)? {
            Event::EvalResult { status, value, error } => {
                if status == "ok" {
                    Ok(Outcome::Final(value))
                } else {
                    Ok(Outcome::Output(format!(
                        "Error processing SUBMIT(): {}",
                        error
                    )))
                }
            }
            other => Err(InterpreterError::Protocol(format!(
                "expected eval result, got {:?}",
                other
            ))),
        }
    }
}

impl Default for PythonInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for PythonInterpreter {
    /// Spawn a fresh child interpreter, discarding any previous one. The
    /// namespace starts empty. Safe to call repeatedly; each call resets.
    fn start(&mut self) -> Result<(), InterpreterError> {
        self.kill_child();
        self.state = SessionState::NotStarted;
        self.child = Some(ReplChild::spawn(&self.python_command)?);
        self.state = SessionState::Started;
        Ok(())
    }

    fn execute(
        &mut self,
        code: &str,
        variables: Option<&Variables>,
    ) -> Result<Outcome, InterpreterError> {
        if self.state != SessionState::Started {
            self.start()?;
        }

        let empty = Variables::new();
        let variables = variables.unwrap_or(&empty);
        let tool_names = self.tools.names();
        let tools = self.tools.clone();
        let wants_submit = submit::contains_marker(code);

        let child = self.live_child()?;
        child.send(&Request::Exec {
            code,
            variables,
            tools: &tool_names,
        })?;
        let result = next_result(child, &tools)?;

        let (status, stdout, error, traceback) = match result {
            Event::ExecResult {
                status,
                stdout,
                error,
                traceback,
            } => (status, stdout, error, traceback),
            other => {
                return Err(InterpreterError::Protocol(format!(
                    "expected exec result, got {:?}",
                    other
                )))
            }
        };

        if wants_submit {
            if status != "ok" {
                return Ok(Outcome::Output(format!(
                    "Error processing SUBMIT(): {}",
                    error
                )));
            }
            return match submit::extract_expression(code) {
                Some(expr) => self.evaluate_submission(expr),
                None => Ok(Outcome::Output(
                    "Error processing SUBMIT(): no closing parenthesis after the marker"
                        .to_string(),
                )),
            };
        }

        if status != "ok" {
            return Ok(Outcome::Output(format!("Error: {}\n{}", error, traceback)));
        }
        if stdout.is_empty() {
            Ok(Outcome::NoOutput)
        } else {
            Ok(Outcome::Output(stdout))
        }
    }

    /// Kill the child interpreter; the namespace dies with it. A later
    /// `start` (explicit or implicit) begins a fresh, empty session.
    fn shutdown(&mut self) {
        self.kill_child();
        self.state = SessionState::Shutdown;
    }

    fn tools(&self) -> &ToolSet {
        &self.tools
    }

    fn set_tools(&mut self, tools: ToolSet) {
        self.tools = tools;
    }
}

impl Drop for PythonInterpreter {
    fn drop(&mut self) {
        self.kill_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolFn;
    use serde_json::json;
    use std::sync::Arc;

    fn interpreter() -> PythonInterpreter {
        PythonInterpreter::new()
    }

    #[test]
    fn test_print_captured() {
        let mut interp = interpreter();
        let outcome = interp.execute("print('hi')", None).unwrap();
        assert_eq!(outcome, Outcome::Output("hi\n".to_string()));
    }

    #[test]
    fn test_silent_code_returns_no_output() {
        let mut interp = interpreter();
        let outcome = interp.execute("x = 1", None).unwrap();
        assert_eq!(outcome, Outcome::NoOutput);
    }

    #[test]
    fn test_namespace_persists_across_calls() {
        let mut interp = interpreter();
        interp.execute("counter = 41", None).unwrap();
        let outcome = interp.execute("print(counter + 1)", None).unwrap();
        assert_eq!(outcome, Outcome::Output("42\n".to_string()));
    }

    #[test]
    fn test_function_definitions_persist() {
        let mut interp = interpreter();
        interp
            .execute("def double(n):\n    return n * 2", None)
            .unwrap();
        let outcome = interp.execute("print(double(21))", None).unwrap();
        assert_eq!(outcome, Outcome::Output("42\n".to_string()));
    }

    #[test]
    fn test_submission_returns_final_value() {
        let mut interp = interpreter();
        let outcome = interp
            .execute("x = 10\ny = 20\nz = x + y\nSUBMIT(z)", None)
            .unwrap();
        assert_eq!(outcome, Outcome::Final(json!(30)));
    }

    #[test]
    fn test_submission_preserves_namespace() {
        let mut interp = interpreter();
        interp.execute("a = 5\nSUBMIT(a)", None).unwrap();
        let outcome = interp.execute("print(a)", None).unwrap();
        assert_eq!(outcome, Outcome::Output("5\n".to_string()));
    }

    #[test]
    fn test_submission_of_non_json_value_degrades_to_repr() {
        let mut interp = interpreter();
        let outcome = interp.execute("s = {1, 2}\nSUBMIT(s)", None).unwrap();
        match outcome {
            Outcome::Final(value) => {
                let text = value.as_str().unwrap();
                assert!(text.contains('1') && text.contains('2'), "got {}", text);
            }
            other => panic!("expected final value, got {:?}", other),
        }
    }

    #[test]
    fn test_submission_eval_failure_is_observation() {
        let mut interp = interpreter();
        let outcome = interp.execute("SUBMIT(undefined_name)", None).unwrap();
        match outcome {
            Outcome::Output(text) => {
                assert!(text.starts_with("Error processing SUBMIT():"), "got {}", text);
                assert!(text.contains("undefined_name"));
            }
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_submission_with_failing_body_is_observation() {
        let mut interp = interpreter();
        let outcome = interp
            .execute("raise RuntimeError('before marker')\nSUBMIT(1)", None)
            .unwrap();
        match outcome {
            Outcome::Output(text) => {
                assert!(text.starts_with("Error processing SUBMIT():"), "got {}", text);
                assert!(text.contains("before marker"));
            }
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_error_becomes_observation() {
        let mut interp = interpreter();
        let outcome = interp.execute("raise ValueError('boom')", None).unwrap();
        match outcome {
            Outcome::Output(text) => {
                assert!(text.starts_with("Error: boom"), "got {}", text);
                assert!(text.contains("Traceback"));
                assert!(text.contains("ValueError"));
            }
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_becomes_observation() {
        let mut interp = interpreter();
        let outcome = interp.execute("def broken(:", None).unwrap();
        assert!(matches!(outcome, Outcome::Output(ref text) if text.starts_with("Error:")));
    }

    #[test]
    fn test_session_survives_errors() {
        let mut interp = interpreter();
        interp.execute("kept = 'still here'", None).unwrap();
        interp.execute("raise ValueError('boom')", None).unwrap();
        let outcome = interp.execute("print(kept)", None).unwrap();
        assert_eq!(outcome, Outcome::Output("still here\n".to_string()));
    }

    #[test]
    fn test_variables_merged_before_execution() {
        let mut interp = interpreter();
        let mut variables = Variables::new();
        variables.insert("seed".to_string(), json!(7));
        let outcome = interp.execute("print(seed * 6)", Some(&variables)).unwrap();
        assert_eq!(outcome, Outcome::Output("42\n".to_string()));
    }

    #[test]
    fn test_caller_variables_overwrite_prior_values() {
        let mut interp = interpreter();
        interp.execute("mode = 'old'", None).unwrap();
        let mut variables = Variables::new();
        variables.insert("mode".to_string(), json!("new"));
        let outcome = interp.execute("print(mode)", Some(&variables)).unwrap();
        assert_eq!(outcome, Outcome::Output("new\n".to_string()));
    }

    #[test]
    fn test_tool_callable_from_code() {
        let upper: ToolFn = Arc::new(|args| {
            let text = args.first().and_then(|v| v.as_str()).unwrap_or_default();
            Ok(text.to_uppercase())
        });
        let mut tools = ToolSet::new();
        tools.insert("upper", "Uppercase a string", upper).unwrap();

        let mut interp = PythonInterpreter::with_tools(tools);
        let outcome = interp.execute("print(upper('rust'))", None).unwrap();
        assert_eq!(outcome, Outcome::Output("RUST\n".to_string()));
    }

    #[test]
    fn test_tool_result_can_be_submitted() {
        let answer: ToolFn = Arc::new(|_| Ok("forty-two".to_string()));
        let mut tools = ToolSet::new();
        tools.insert("answer", "The answer", answer).unwrap();

        let mut interp = PythonInterpreter::with_tools(tools);
        let outcome = interp.execute("a = answer()\nSUBMIT(a)", None).unwrap();
        assert_eq!(outcome, Outcome::Final(json!("forty-two")));
    }

    #[test]
    fn test_tool_error_surfaces_as_observation() {
        let failing: ToolFn = Arc::new(|_| {
            Err(crate::tools::ToolError::ExecutionFailed(
                "backend unavailable".to_string(),
            ))
        });
        let mut tools = ToolSet::new();
        tools.insert("search", "Always fails", failing).unwrap();

        let mut interp = PythonInterpreter::with_tools(tools);
        let outcome = interp.execute("search('anything')", None).unwrap();
        match outcome {
            Outcome::Output(text) => {
                assert!(text.starts_with("Error:"), "got {}", text);
                assert!(text.contains("backend unavailable"));
            }
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_replacing_tools_takes_effect_next_call() {
        let old: ToolFn = Arc::new(|_| Ok("old".to_string()));
        let mut tools = ToolSet::new();
        tools.insert("probe", "", old).unwrap();

        let mut interp = PythonInterpreter::with_tools(tools);
        interp.execute("first = probe()", None).unwrap();

        let new: ToolFn = Arc::new(|_| Ok("new".to_string()));
        let mut replacement = ToolSet::new();
        replacement.insert("probe", "", new).unwrap();
        interp.set_tools(replacement);

        let outcome = interp.execute("print(first, probe())", None).unwrap();
        assert_eq!(outcome, Outcome::Output("old new\n".to_string()));
    }

    #[test]
    fn test_removed_tool_unbound_next_call() {
        let probe: ToolFn = Arc::new(|_| Ok("here".to_string()));
        let mut tools = ToolSet::new();
        tools.insert("probe", "", probe).unwrap();

        let mut interp = PythonInterpreter::with_tools(tools);
        interp.execute("probe()", None).unwrap();

        interp.set_tools(ToolSet::new());
        let outcome = interp.execute("probe()", None).unwrap();
        assert!(matches!(outcome, Outcome::Output(ref text) if text.starts_with("Error:")));
    }

    #[test]
    fn test_implicit_start() {
        let mut interp = interpreter();
        // No explicit start() call.
        let outcome = interp.execute("print('ready')", None).unwrap();
        assert_eq!(outcome, Outcome::Output("ready\n".to_string()));
    }

    #[test]
    fn test_start_resets_namespace() {
        let mut interp = interpreter();
        interp.execute("x = 1", None).unwrap();
        interp.start().unwrap();
        let outcome = interp.execute("print(x)", None).unwrap();
        assert!(matches!(outcome, Outcome::Output(ref text) if text.contains("NameError")));
    }

    #[test]
    fn test_shutdown_clears_namespace_and_restarts() {
        let mut interp = interpreter();
        interp.execute("x = 99", None).unwrap();
        interp.shutdown();
        // Implicit restart: a fresh session with an empty namespace.
        let outcome = interp.execute("print('x' in dir())", None).unwrap();
        assert_eq!(outcome, Outcome::Output("False\n".to_string()));
    }

    #[test]
    fn test_spawn_failure_is_host_error() {
        let mut interp = interpreter();
        interp.python_command = "definitely-not-a-python-binary".to_string();
        let result = interp.execute("print(1)", None);
        assert!(matches!(result, Err(InterpreterError::SpawnFailed(_))));
    }

    #[test]
    fn test_unicode_round_trip() {
        let mut interp = interpreter();
        let outcome = interp.execute("print('日本語 🦀')", None).unwrap();
        assert_eq!(outcome, Outcome::Output("日本語 🦀\n".to_string()));
    }

    #[test]
    fn test_marker_in_string_goes_through_submit_path() {
        // The scan is textual, so a marker inside a string literal still
        // routes the turn through the submission path.
        let mut interp = interpreter();
        let outcome = interp.execute("s = 'SUBMIT(0)'", None).unwrap();
        assert_eq!(outcome, Outcome::Final(json!(0)));
    }
}
