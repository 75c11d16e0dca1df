//! Stages backed by an external program
//!
//! The file content is written to the program's stdin and its stdout becomes the
//! new content. A non-zero exit status or an expired timeout fails the file; a
//! program that hangs is killed so sibling files are unaffected.

use std::{
    io::{Read, Write},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use serde_json::Value;

use super::{Stage, StageContext};
use crate::{config::CommandStageConfig, stage::StageOptions};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandStage {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(name: &str, config: &CommandStageConfig) -> Self {
        Self {
            name: name.to_owned(),
            program: config.command.clone(),
            args: config.args.clone(),
            timeout: config
                .timeout_ms
                .map_or(DEFAULT_TIMEOUT, Duration::from_millis),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configured arguments followed by the rule's `args` option, if any
    fn arguments(&self, options: &StageOptions) -> Result<Vec<String>> {
        let mut args = self.args.clone();
        match options.get("args") {
            None => {}
            Some(Value::Array(extra)) => {
                for arg in extra {
                    match arg {
                        Value::String(arg) => args.push(arg.clone()),
                        other => args.push(other.to_string()),
                    }
                }
            }
            Some(other) => bail!("`args` must be an array, got {other}"),
        }
        Ok(args)
    }
}

impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        content: Vec<u8>,
        options: &StageOptions,
        cx: &StageContext<'_>,
    ) -> Result<Vec<u8>> {
        let args = self.arguments(options)?;
        debug!(
            "{}: running `{} {}`",
            cx.path.display(),
            self.program,
            args.join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .env("STAGEWISE_FILE", cx.path)
            .env("STAGEWISE_MODE", cx.build.mode().as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start `{}`", self.program))?;

        let mut stdin = child.stdin.take().context("child stdin unavailable")?;
        let mut stdout = child.stdout.take().context("child stdout unavailable")?;
        let mut stderr = child.stderr.take().context("child stderr unavailable")?;

        // A child blocked on a full pipe never exits, so every pipe gets its own thread
        let writer = thread::spawn(move || stdin.write_all(&content));
        let out_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });
        let err_reader = thread::spawn(move || {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).map(|_| buf)
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().context("failed to poll child")? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{}: `{}` exceeded {:?}, killing it",
                    cx.path.display(),
                    self.program,
                    self.timeout
                );
                if let Err(err) = child.kill() {
                    warn!("failed to kill `{}`: {err}", self.program);
                }
                let _ = child.wait();
                bail!("`{}` timed out after {:?}", self.program, self.timeout);
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Ok(Err(err)) = writer.join() {
            // A program may legitimately exit without reading all of its input
            debug!("writing to `{}` stopped early: {err}", self.program);
        }
        let stdout = out_reader
            .join()
            .map_err(|_| anyhow!("stdout reader panicked"))?
            .context("failed to read child stdout")?;
        let stderr = err_reader
            .join()
            .map_err(|_| anyhow!("stderr reader panicked"))?
            .unwrap_or_default();

        if !status.success() {
            bail!(
                "`{}` exited with {status}: {}",
                self.program,
                stderr.trim()
            );
        }
        Ok(stdout)
    }
}
