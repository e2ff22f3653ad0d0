//! Shell subprocess spawning and its stdio copiers

use crate::endpoint::EnvelopeSource;
use crate::{AgentError, Result};
use bytes::Bytes;
use shmux_proto::{Payload, StdStream};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A `<shell> -c <line>` child with all three pipes
#[derive(Debug)]
pub struct ShellProcess {
    /// Child handle, killed when dropped
    pub child: Child,
    /// Write end of the child's stdin
    pub stdin: ChildStdin,
    /// Read end of the child's stdout
    pub stdout: ChildStdout,
    /// Read end of the child's stderr
    pub stderr: ChildStderr,
}

impl ShellProcess {
    /// Spawn `line` through `shell`
    pub fn spawn(shell: &str, line: &str) -> Result<Self> {
        debug!("Spawning: {} -c {:?}", shell, line);

        let mut child = Command::new(shell)
            .arg("-c")
            .arg(line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                command: line.to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(AgentError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(AgentError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(AgentError::Pipe("stderr"))?;

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

/// Wait for the child to exit, killing it first if `cancel` fires
pub async fn reap(child: &mut Child, cancel: &CancellationToken) -> Option<ExitStatus> {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    let waited = match exited {
        Some(status) => status,
        None => {
            debug!("Session cancelled, killing child");
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill child: {}", e);
            }
            child.wait().await
        }
    };
    match waited {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("Failed to reap child: {}", e);
            None
        }
    }
}

/// Read `reader` in `chunk_size` pieces into `tx` as chunks of `stream`, then its EOF
///
/// A read error ends the stream like end-of-file. On cancel the copier stops without an EOF.
pub async fn copy_output<R>(
    mut reader: R,
    stream: StdStream,
    chunk_size: usize,
    tx: mpsc::Sender<Payload>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Payload::chunk(stream, Bytes::copy_from_slice(&buf[..n]));
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to read {:?}: {}", stream, e);
                break;
            }
        }
    }
    if tx.send(Payload::eof(stream)).await.is_err() {
        debug!("{:?} EOF not delivered, pump already gone", stream);
    }
}

/// Feed `MSG_STDIN` frames from `source` into `writer` until `EOF_STDIN`
///
/// The writer is closed as soon as input ends. After a write error the remaining input is
/// read and discarded so the sender can still finish its stream. A frame of any other kind
/// stops the copier.
pub async fn copy_stdin<S, W>(source: &mut S, writer: W, cancel: CancellationToken)
where
    S: EnvelopeSource + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut writer = Some(writer);
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = source.recv_envelope() => next,
        };
        let envelope = match next {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!("Input ended without EOF_STDIN");
                break;
            }
            Err(e) => {
                warn!("Failed to receive stdin: {}", e);
                break;
            }
        };
        match envelope.into_payload() {
            Ok(Payload::Stdin(data)) => {
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = w.write_all(&data).await {
                        warn!("Failed to write to process stdin, discarding further input: {}", e);
                        writer = None;
                    }
                }
            }
            Ok(Payload::EofStdin) => break,
            Ok(other) => {
                warn!("Unexpected {} on stdin stream", other.flag());
                break;
            }
            Err(e) => {
                warn!("Invalid stdin frame: {}", e);
                break;
            }
        }
    }
    if let Some(mut w) = writer {
        if let Err(e) = w.shutdown().await {
            debug!("Failed to close process stdin: {}", e);
        }
    }
}
