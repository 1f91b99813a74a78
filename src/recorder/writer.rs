//! ffmpeg subprocess pipe: raw gray planes in through stdin, stderr drained in the background.

use std::io::{BufWriter, ErrorKind, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use super::errors::EncodingError;

const PIPE_BUFFER_BYTES: usize = 1 << 20;
/// Bytes of encoder stderr kept for failure reports.
const STDERR_TAIL_BYTES: usize = 4096;

/// Anything raw gray planes can be written to.
pub trait FrameSink {
    fn write_frame(&mut self, plane: &[u8]) -> Result<(), EncodingError>;
}

/// One encoder subprocess fed raw frames through its stdin.
///
/// Stderr is drained on a background thread from the moment the child is
/// spawned, so a chatty encoder can never stall on a full pipe. Dropping an
/// open session closes it the same way [`EncoderSession::close`] does, which
/// lets the container trailer be written.
pub struct EncoderSession {
    program: String,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    drain: Option<JoinHandle<Vec<u8>>>,
    frames_written: u64,
}

impl EncoderSession {
    /// Spawns `argv[0]` with the remaining arguments.
    pub fn spawn(argv: &[String]) -> Result<Self, EncodingError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| EncodingError::SpawnFailed("empty encoder command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => EncodingError::EncoderNotFound(program.clone()),
                _ => EncodingError::SpawnFailed(format!("{}: {}", program, e)),
            })?;

        let drain = match child.stderr.take().map(spawn_stderr_drain).transpose() {
            Ok(drain) => drain,
            Err(e) => {
                abort_child(&mut child);
                return Err(EncodingError::SpawnFailed(format!(
                    "Failed to start stderr drain: {}",
                    e
                )));
            }
        };

        let Some(stdin) = child.stdin.take() else {
            abort_child(&mut child);
            return Err(EncodingError::PipeUnavailable(
                "Failed to capture encoder stdin".to_string(),
            ));
        };

        tracing::debug!(target: "mp4stream", "[WRITER] Spawned {} (pid {})", program, child.id());

        Ok(Self {
            program: program.clone(),
            child: Some(child),
            stdin: Some(BufWriter::with_capacity(PIPE_BUFFER_BYTES, stdin)),
            drain,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }

    /// Flushes and closes stdin, then blocks until the encoder exits.
    ///
    /// Calling this on an already closed session does nothing.
    pub fn close(&mut self) -> Result<(), EncodingError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let mut flush_error = None;
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.flush() {
                flush_error = Some(EncodingError::WriteFailed(format!(
                    "Failed to flush encoder stdin: {}",
                    e
                )));
            }
            drop(stdin);
        }

        let status = child.wait();
        let tail = self
            .drain
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        let process_error = match status {
            Ok(status) if status.success() => None,
            Ok(status) => Some(EncodingError::ProcessFailed {
                exit_code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&tail).trim().to_string(),
            }),
            Err(e) => Some(EncodingError::ProcessFailed {
                exit_code: -1,
                stderr: format!("wait failed: {}", e),
            }),
        };

        tracing::debug!(
            target: "mp4stream",
            "[WRITER] {} exited after {} frames",
            self.program,
            self.frames_written
        );

        match process_error.or(flush_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl FrameSink for EncoderSession {
    fn write_frame(&mut self, plane: &[u8]) -> Result<(), EncodingError> {
        let stdin = self.stdin.as_mut().ok_or(EncodingError::Closed)?;
        stdin.write_all(plane).map_err(|e| {
            EncodingError::WriteFailed(format!(
                "Failed to write frame {}: {}",
                self.frames_written, e
            ))
        })?;
        self.frames_written += 1;
        Ok(())
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        tracing::warn!(target: "mp4stream", "[WRITER] Session dropped while open, finalizing...");
        if let Err(e) = self.close() {
            tracing::warn!(target: "mp4stream", "[WRITER] Finalize on drop failed: {}", e);
        }
    }
}

fn spawn_stderr_drain(mut stderr: ChildStderr) -> std::io::Result<JoinHandle<Vec<u8>>> {
    std::thread::Builder::new()
        .name("ffmpeg-stderr".to_string())
        .spawn(move || {
            let mut buf = [0u8; 8192];
            let mut tail: Vec<u8> = Vec::with_capacity(STDERR_TAIL_BYTES);
            loop {
                match stderr.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_BYTES {
                            let excess = tail.len() - STDERR_TAIL_BYTES;
                            tail.drain(..excess);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            tail
        })
}

fn abort_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!(target: "mp4stream", "[WRITER] Failed to kill encoder: {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!(target: "mp4stream", "[WRITER] Failed to reap encoder: {}", e);
    }
}
