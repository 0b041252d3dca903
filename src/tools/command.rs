//! External command tool - JSON on stdin, JSON on stdout.
//!
//! A script reports a structured failure by printing
//! `{"error": {"category": "...", "message": "..."}}` and exiting; otherwise
//! its exit code picks the category.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Tool, truncate_chars};
use crate::domain::FailureCause;

/// Longest stderr excerpt carried in a failure message
const MAX_STDERR_CHARS: usize = 2000;

// sysexits.h
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_UNAVAILABLE: i32 = 69;
const EX_TEMPFAIL: i32 = 75;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: FailureCause,
}

/// Runs a program per invocation
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CommandTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Category for a non-zero exit without a structured error
fn classify_exit(code: Option<i32>, detail: String) -> FailureCause {
    match code {
        Some(EX_TEMPFAIL) => FailureCause::transient(detail),
        Some(EX_USAGE) | Some(EX_DATAERR) => FailureCause::invalid_input(detail),
        Some(EX_UNAVAILABLE) => FailureCause::gone(detail),
        _ => FailureCause::unknown(detail),
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.program
    }

    async fn invoke(&self, inputs: Value) -> Result<Value, FailureCause> {
        let payload = serde_json::to_vec(&inputs).map_err(|e| FailureCause::invalid_input(e.to_string()))?;

        let mut child = self.command().spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FailureCause::gone(format!("{} not found", self.program)),
            _ => FailureCause::unknown(format!("Failed to spawn {}: {}", self.program, e)),
        })?;
        debug!(program = %self.program, pid = ?child.id(), "Spawned command tool");

        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| FailureCause::unknown(format!("IO error: {}", e)))?;
        if let Err(e) = written
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(FailureCause::unknown(format!("Failed to write inputs: {}", e)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: Option<Value> = serde_json::from_str(stdout.trim()).ok();

        if let Some(envelope) = parsed
            .as_ref()
            .and_then(|v| serde_json::from_value::<ErrorEnvelope>(v.clone()).ok())
        {
            return Err(envelope.error);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let (excerpt, truncated) = truncate_chars(stderr.trim(), MAX_STDERR_CHARS);
            let detail = format!(
                "{} exited with {}: {}{}",
                self.program,
                output.status,
                excerpt,
                if truncated { " ... [truncated]" } else { "" }
            );
            return Err(classify_exit(output.status.code(), detail));
        }

        parsed.ok_or_else(|| {
            let (excerpt, _) = truncate_chars(stdout.trim(), 200);
            FailureCause::output_violation(&[format!("stdout is not JSON: {:?}", excerpt)])
        })
    }
}
