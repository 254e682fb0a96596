//! Subprocess generation backend
//!
//! Runs the configured generator program once per request, writes the
//! input text to its stdin and decodes wire frames from its stdout. The
//! child is killed when the event stream is dropped.

use std::collections::VecDeque;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command as TokioCommand};
use tracing::debug;

use super::wire::FrameDecoder;
use super::{EventStream, GenerationBackend, GenerationRequest, StreamEvent};
use crate::config::BackendConfig;
use crate::error::GenerationError;

const READ_CHUNK: usize = 4096;

/// Backend that shells out to a generator program.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    allowed_models: Vec<String>,
}

impl ProcessBackend {
    /// Create a backend from the `[backend]` config section.
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            allowed_models: config.allowed_models.clone(),
        }
    }

    /// Build the command for one request.
    ///
    /// Configured args come first, then `--model`, `--session` and, when a
    /// refine hint is set, `--guide`.
    #[must_use]
    pub fn build_command(&self, request: &GenerationRequest) -> Command {
        let mut cmd = Command::new(&self.program);

        for arg in &self.args {
            cmd.arg(arg);
        }

        cmd.arg("--model").arg(&request.model);
        cmd.arg("--session").arg(&request.session_id);

        if let Some(hint) = &request.guide_hint {
            cmd.arg("--guide").arg(hint);
        }

        cmd
    }
}

impl GenerationBackend for ProcessBackend {
    fn issue_request(&self, request: &GenerationRequest) -> EventStream {
        let run = ProcessRun {
            program: self.program.clone(),
            request: request.clone(),
            allowed_models: self.allowed_models.clone(),
            phase: Phase::Idle(self.build_command(request)),
        };
        stream::unfold(run, ProcessRun::advance).boxed()
    }
}

enum Phase {
    Idle(Command),
    Reading(Box<Running>),
    Done,
}

struct Running {
    child: Child,
    stdout: ChildStdout,
    decoder: FrameDecoder,
    queued: VecDeque<StreamEvent>,
    eof: bool,
}

impl Running {
    async fn read_more(&mut self) -> std::io::Result<()> {
        let mut buf = [0_u8; READ_CHUNK];
        let read = self.stdout.read(&mut buf).await?;
        if read == 0 {
            self.eof = true;
            self.queued.extend(self.decoder.finish());
        } else {
            self.queued.extend(self.decoder.push(&buf[..read]));
        }
        Ok(())
    }
}

struct ProcessRun {
    program: String,
    request: GenerationRequest,
    allowed_models: Vec<String>,
    phase: Phase,
}

impl ProcessRun {
    async fn advance(mut self) -> Option<(Result<StreamEvent, GenerationError>, Self)> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Idle(command) => match spawn(command, &self.request.input_text) {
                    Ok(running) => self.phase = Phase::Reading(Box::new(running)),
                    Err(err) => {
                        let error = GenerationError::Backend(format!("{err:#}"));
                        return Some((Err(error), self));
                    }
                },
                Phase::Reading(mut running) => {
                    if let Some(event) = running.queued.pop_front() {
                        // An error frame is terminal; dropping `running` kills the child.
                        if let StreamEvent::Error { message, code } = event {
                            let error = GenerationError::from_wire(
                                &message,
                                code.as_deref(),
                                &self.request,
                                &self.allowed_models,
                            );
                            return Some((Err(error), self));
                        }
                        self.phase = Phase::Reading(running);
                        return Some((Ok(event), self));
                    }

                    if running.eof {
                        return match running.child.wait().await {
                            Ok(status) if status.success() => None,
                            Ok(status) => {
                                let error = GenerationError::Backend(format!(
                                    "{} exited with {status}",
                                    self.program
                                ));
                                Some((Err(error), self))
                            }
                            Err(err) => {
                                let error = GenerationError::Backend(format!(
                                    "Failed to wait for {}: {err}",
                                    self.program
                                ));
                                Some((Err(error), self))
                            }
                        };
                    }

                    if let Err(err) = running.read_more().await {
                        let error = GenerationError::Backend(format!(
                            "Failed to read {} output: {err}",
                            self.program
                        ));
                        return Some((Err(error), self));
                    }
                    self.phase = Phase::Reading(running);
                }
                Phase::Done => return None,
            }
        }
    }
}

fn spawn(command: Command, input: &str) -> Result<Running> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = TokioCommand::from(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))?;

    let mut stdin = child
        .stdin
        .take()
        .with_context(|| format!("No stdin from {program}"))?;
    let stdout = child
        .stdout
        .take()
        .with_context(|| format!("No stdout from {program}"))?;

    let input = input.to_string();
    tokio::spawn(async move {
        if let Err(err) = stdin.write_all(input.as_bytes()).await {
            debug!(error = %err, "generator closed stdin early");
        }
    });

    Ok(Running {
        child,
        stdout,
        decoder: FrameDecoder::new(),
        queued: VecDeque::new(),
        eof: false,
    })
}
