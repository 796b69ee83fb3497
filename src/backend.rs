use log::{debug, error, info, warn};
use serde::Deserialize;
use std::{
    io::{self, Read, Write},
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::{Duration, Instant},
};

use crate::config::Profile;
use crate::error::{InkError, Result};
use crate::surface::{CaptureRequest, RecognitionReply};

pub trait CaptureBackend: Send {
    fn name(&self) -> &'static str;

    /// Starts imaging and classification. Must not block the caller.
    fn submit(&mut self, request: &CaptureRequest) -> Result<()>;
}

/// Used when no classifier is configured: logs the capture placement and
/// never answers.
pub struct NullBackend;

impl CaptureBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn submit(&mut self, request: &CaptureRequest) -> Result<()> {
        info!(
            "request {}: camera at {:?} half extent {:.4} (no classifier configured)",
            request.id, request.camera.position, request.camera.half_extent
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CommandOutput {
    confidences: Vec<f32>,
}

/// Runs an external classifier per request: request JSON on stdin,
/// `{"confidences": [...]}` expected on stdout. A run that outlives
/// `timeout` is killed.
pub struct CommandBackend {
    command: String,
    timeout: Duration,
    replies: Sender<RecognitionReply>,
}

impl CommandBackend {
    pub fn new(command: &str, timeout: Duration, replies: Sender<RecognitionReply>) -> Self {
        Self {
            command: command.to_string(),
            timeout,
            replies,
        }
    }
}

impl CaptureBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn submit(&mut self, request: &CaptureRequest) -> Result<()> {
        let payload = serde_json::to_vec(request)?;
        let command = self.command.clone();
        let timeout = self.timeout;
        let tx = self.replies.clone();
        let (id, generation) = (request.id, request.generation);

        thread::Builder::new()
            .name(format!("classify-{id}"))
            .spawn(move || match run_classifier(&command, payload, timeout) {
                Ok(confidences) => {
                    debug!("request {id}: classifier returned {} values", confidences.len());
                    let _ = tx.send(RecognitionReply {
                        id,
                        generation,
                        confidences,
                    });
                }
                Err(e) => error!("request {id}: classifier failed: {e}"),
            })?;
        Ok(())
    }
}

fn run_classifier(command: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<f32>> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;
    let deadline = Instant::now() + timeout;

    // stdin and stdout are pumped off this thread so neither pipe can stall
    // the wait below
    let stdin = child.stdin.take();
    thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.write_all(&payload) {
                debug!("classifier stopped reading its input: {e}");
            }
        }
    });
    let stdout = child.stdout.take();
    let (tx_out, rx_out) = mpsc::channel();
    thread::spawn(move || {
        let mut out = Vec::new();
        let res = match stdout {
            Some(mut s) => s.read_to_end(&mut out).map(|_| out),
            None => Ok(out),
        };
        let _ = tx_out.send(res);
    });

    let status = match wait_until(&mut child, deadline) {
        Ok(Some(status)) => status,
        Ok(None) => {
            reap(&mut child);
            return Err(InkError::Backend(format!(
                "'{command}' killed after {} ms",
                timeout.as_millis()
            )));
        }
        Err(e) => {
            reap(&mut child);
            return Err(e.into());
        }
    };
    if !status.success() {
        return Err(InkError::Backend(format!("'{command}' exited with {status}")));
    }

    let stdout = rx_out
        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .map_err(|_| InkError::Backend(format!("'{command}' left its output open")))??;
    let parsed: CommandOutput = serde_json::from_slice(&stdout)?;
    Ok(parsed.confidences)
}

/// Exit status, or `None` once `deadline` passes with the child still running.
fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("failed to kill classifier {}: {e}", child.id());
    }
    let _ = child.wait();
}

pub fn reply_channel() -> (Sender<RecognitionReply>, Receiver<RecognitionReply>) {
    mpsc::channel()
}

/// Picks the backend the profile asks for. Profile validation only lets a
/// command through with `meta.allow_commands`.
pub fn from_profile(profile: &Profile, replies: Sender<RecognitionReply>) -> Box<dyn CaptureBackend> {
    match profile.recognition.command.as_deref() {
        Some(cmd) => {
            let timeout = Duration::from_millis(profile.recognition.timeout_ms);
            Box::new(CommandBackend::new(cmd, timeout, replies))
        }
        None => Box::new(NullBackend),
    }
}
