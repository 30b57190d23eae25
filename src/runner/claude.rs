use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::stream::{Activity, StreamAccumulator};
use super::{StepOutput, StepRequest, StepRunner};
use crate::config::Config;
use crate::errors::StepError;
use crate::ui::PipelineUI;

/// Runs each step through the agent CLI (`claude --print --output-format stream-json`).
pub struct ClaudeStepRunner {
    command: String,
    flags: Vec<String>,
    working_dir: PathBuf,
    log_dir: Option<PathBuf>,
    ui: Option<Arc<PipelineUI>>,
}

/// Aborts the wrapped task when dropped, including on early `?` returns.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ClaudeStepRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            command: config.agent_command.clone(),
            flags: config.agent_flags(),
            working_dir: config.project_dir.clone(),
            log_dir: config.log_dir.clone(),
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<PipelineUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn log_step(&self, msg: &str) {
        tracing::debug!("{}", msg);
        if let Some(ref ui) = self.ui {
            ui.log_step(msg);
        }
    }

    pub fn prompt_file(&self, request: &StepRequest) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| {
            dir.join(format!(
                "{}-{}-prompt.md",
                request.role.name(),
                request.iteration
            ))
        })
    }

    pub fn output_file(&self, request: &StepRequest) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| {
            dir.join(format!(
                "{}-{}-output.log",
                request.role.name(),
                request.iteration
            ))
        })
    }

    fn write_log(path: Option<PathBuf>, content: &str) -> Result<(), StepError> {
        if let Some(path) = path {
            std::fs::write(&path, content).map_err(|source| StepError::LogWrite { path, source })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StepRunner for ClaudeStepRunner {
    async fn run(&self, request: &StepRequest) -> anyhow::Result<StepOutput> {
        Self::write_log(self.prompt_file(request), &request.prompt)?;

        let start = Instant::now();
        self.log_step(&format!(
            "Spawning: {} {}",
            self.command,
            self.flags.join(" ")
        ));

        let mut child = Command::new(&self.command)
            .args(&self.flags)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StepError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            self.log_step(&format!("Writing {} chars to stdin...", request.prompt.len()));
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(StepError::Io)?;
            stdin.shutdown().await.map_err(StepError::Io)?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StepError::Io(std::io::Error::other("agent stdout unavailable")))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    text.push_str(&line);
                    text.push('\n');
                }
                text
            })
        });
        let mut reader = BufReader::new(stdout).lines();

        let ui_clone = self.ui.clone();
        let _elapsed_ticker = AbortOnDrop(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Some(ref ui) = ui_clone {
                    ui.update_elapsed(start.elapsed());
                }
            }
        }));

        let mut acc = StreamAccumulator::new();
        while let Some(line) = reader.next_line().await.map_err(StepError::Io)? {
            for activity in acc.push_line(&line) {
                match (&self.ui, activity) {
                    (Some(ui), Activity::Tool(desc)) => ui.show_tool_use(&desc),
                    (Some(ui), Activity::Text(snippet)) => ui.show_thinking(&snippet),
                    (None, _) => {}
                }
            }
        }

        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        let status = child.wait().await.map_err(StepError::Io)?;

        let duration = start.elapsed();
        let mut exit_status = status.code().unwrap_or(-1);
        let is_error = acc.is_error();
        if is_error && exit_status == 0 {
            exit_status = 1;
        }
        self.log_step(&format!(
            "Completed in {:.1}s (exit: {})",
            duration.as_secs_f64(),
            exit_status
        ));

        let cost_usd = acc.cost_usd();
        let output = acc.into_output();
        Self::write_log(self.output_file(request), &output)?;

        let error = (exit_status != 0).then(|| {
            if is_error {
                "agent reported an error result".to_string()
            } else if stderr_text.trim().is_empty() {
                format!("agent exited with code {}", exit_status)
            } else {
                stderr_text.trim().to_string()
            }
        });

        Ok(StepOutput {
            output,
            exit_status,
            cost_usd,
            duration,
            error,
        })
    }
}
