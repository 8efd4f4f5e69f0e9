//! Committing a finished client record.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::session::ClientRecord;

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist `record` and return the order number it was filed under.
    async fn commit(&self, record: &ClientRecord) -> Result<String>;
}

/// Runs an external command with the record JSON on stdin and reads the
/// order number back from stdout.
pub struct CommandRecordSink {
    program: String,
    args: Vec<String>,
    order_number: Regex,
    timeout: Duration,
}

impl CommandRecordSink {
    pub fn new(command: &[String], order_number_pattern: &str, timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("persistence command is empty")?;
        let order_number = Regex::new(order_number_pattern)
            .with_context(|| format!("invalid order number pattern {order_number_pattern:?}"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            order_number,
            timeout,
        })
    }

    pub fn extract_order_number(&self, stdout: &str) -> Option<String> {
        self.order_number
            .captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl RecordSink for CommandRecordSink {
    async fn commit(&self, record: &ClientRecord) -> Result<String> {
        let payload = serde_json::to_vec(record)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await.context("failed to write record")?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.program, self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!(program = %self.program, line = %line, "Persistence output");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        match self.extract_order_number(&stdout) {
            Some(number) => {
                tracing::info!(order_number = %number, "Record saved");
                Ok(number)
            }
            None => bail!("{} did not report an order number", self.program),
        }
    }
}
