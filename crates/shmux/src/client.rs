//! Exec call client
//!
//! One connection carries one command: a `COMMAND` envelope addressed to the target, then
//! the caller's stdin, while the agent streams stdout and stderr back.

use crate::{ClientError, Result};
use bytes::{Bytes, BytesMut};
use shmux_proto::{Admission, Envelope, FrameReader, FrameWriter, Payload, StreamTracker};
use std::path::Path;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

/// Default agent socket path
pub const DEFAULT_SOCKET_PATH: &str = "agent.sock";

/// Connection to an agent's exec socket
#[derive(Debug)]
pub struct ExecClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

/// Everything a command wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output
    pub stdout: Bytes,
    /// Standard error
    pub stderr: Bytes,
}

impl ExecOutput {
    /// Standard output as text, invalid UTF-8 replaced
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as text, invalid UTF-8 replaced
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl ExecClient {
    /// Connect to the agent socket at `path`
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        debug!("Connected to agent at {}", path.as_ref().display());
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        })
    }

    /// Send the command and hand back the two directions of the call
    pub async fn start(mut self, target: &str, command: &str) -> Result<(ExecInput, ExecOutputs)> {
        let envelope = Envelope::new("", "", target, Payload::Command(command.to_string()));
        self.writer.send(&envelope).await?;
        debug!("Sent {:?} to {:?}", command, target);

        let input = ExecInput {
            writer: self.writer,
            target: target.to_string(),
            finished: false,
        };
        let outputs = ExecOutputs {
            reader: self.reader,
            tracker: StreamTracker::new(),
        };
        Ok((input, outputs))
    }

    /// Run `command` on `target` with `stdin` as its whole input and collect its output
    ///
    /// Never returns if the target is unreachable; wrap it in a timeout where that matters.
    pub async fn exec(self, target: &str, command: &str, stdin: impl Into<Bytes>) -> Result<ExecOutput> {
        let (mut input, outputs) = self.start(target, command).await?;
        let stdin = stdin.into();
        let feed = async move {
            input.send(stdin).await?;
            input.finish().await
        };
        let (fed, collected) = tokio::join!(feed, outputs.collect());
        fed?;
        collected
    }
}

/// Sending half of an exec call
#[derive(Debug)]
pub struct ExecInput {
    writer: FrameWriter<OwnedWriteHalf>,
    target: String,
    finished: bool,
}

impl ExecInput {
    /// Send one stdin chunk; empty chunks are skipped
    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        if data.is_empty() || self.finished {
            return Ok(());
        }
        self.writer.send(&self.envelope(Payload::Stdin(data))).await?;
        Ok(())
    }

    /// Send `EOF_STDIN`; later calls are no-ops
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.send(&self.envelope(Payload::EofStdin)).await?;
        Ok(())
    }

    fn envelope(&self, payload: Payload) -> Envelope {
        Envelope::new("", "", self.target.clone(), payload)
    }
}

/// Receiving half of an exec call
#[derive(Debug)]
pub struct ExecOutputs {
    reader: FrameReader<OwnedReadHalf>,
    tracker: StreamTracker,
}

impl ExecOutputs {
    /// Next output payload, `None` once both stdout and stderr have ended
    ///
    /// Duplicate EOF markers and empty chunks are swallowed.
    pub async fn next(&mut self) -> Result<Option<Payload>> {
        loop {
            if self.tracker.outputs_closed() {
                return Ok(None);
            }
            let envelope: Envelope = self.reader.recv().await?.ok_or(ClientError::Closed)?;
            let payload = envelope.into_payload()?;
            if !matches!(
                payload,
                Payload::Stdout(_) | Payload::Stderr(_) | Payload::EofStdout | Payload::EofStderr
            ) {
                return Err(ClientError::UnexpectedFlag(payload.flag()));
            }
            match self.tracker.admit(&payload) {
                Admission::Forward => return Ok(Some(payload)),
                Admission::SkipEmpty | Admission::DuplicateEof => {}
                Admission::AfterEof => debug!("Ignoring {} after its EOF", payload.flag()),
            }
        }
    }

    /// Read everything that is left
    pub async fn collect(mut self) -> Result<ExecOutput> {
        let mut stdout = BytesMut::new();
        let mut stderr = BytesMut::new();
        while let Some(payload) = self.next().await? {
            match payload {
                Payload::Stdout(data) => stdout.extend_from_slice(&data),
                Payload::Stderr(data) => stderr.extend_from_slice(&data),
                _ => {}
            }
        }
        Ok(ExecOutput {
            stdout: stdout.freeze(),
            stderr: stderr.freeze(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmux_proto::Flag;
    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio::task::JoinHandle;

    /// Fake agent: records the call and answers with `reply`
    fn fake_agent(dir: &TempDir, reply: Vec<Envelope>) -> (std::path::PathBuf, JoinHandle<Vec<Envelope>>) {
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, w) = stream.into_split();
            let mut reader = FrameReader::new(r);
            let mut writer = FrameWriter::new(w);
            let mut received = Vec::new();
            loop {
                let env: Envelope = reader.recv().await.unwrap().unwrap();
                let done = env.flag == Flag::EofStdin;
                received.push(env);
                if done {
                    break;
                }
            }
            for env in reply {
                writer.send(&env).await.unwrap();
            }
            received
        });
        (path, task)
    }

    fn out(payload: Payload) -> Envelope {
        Envelope::new("", "alpha", "", payload)
    }

    #[tokio::test]
    async fn test_exec_collects_output() {
        let dir = TempDir::new().unwrap();
        let reply = vec![
            out(Payload::Stdout(Bytes::from("he"))),
            out(Payload::Stderr(Bytes::from("warn"))),
            out(Payload::Stdout(Bytes::from("llo"))),
            out(Payload::EofStdout),
            out(Payload::EofStderr),
        ];
        let (path, agent) = fake_agent(&dir, reply);

        let client = ExecClient::connect(&path).await.unwrap();
        let output = client.exec("beta", "cat", "in").await.unwrap();
        assert_eq!(output.stdout_lossy(), "hello");
        assert_eq!(output.stderr_lossy(), "warn");

        let received = agent.await.unwrap();
        assert_eq!(
            received,
            vec![
                Envelope::new("", "", "beta", Payload::Command("cat".into())),
                Envelope::new("", "", "beta", Payload::Stdin(Bytes::from("in"))),
                Envelope::new("", "", "beta", Payload::EofStdin),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_stdin_sends_only_eof() {
        let dir = TempDir::new().unwrap();
        let (path, agent) = fake_agent(&dir, vec![out(Payload::EofStdout), out(Payload::EofStderr)]);

        let client = ExecClient::connect(&path).await.unwrap();
        let output = client.exec("local", "true", Bytes::new()).await.unwrap();
        assert_eq!(output, ExecOutput::default());

        let received = agent.await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].flag, Flag::EofStdin);
    }

    #[tokio::test]
    async fn test_duplicate_eof_swallowed() {
        let dir = TempDir::new().unwrap();
        let reply = vec![
            out(Payload::EofStdout),
            out(Payload::EofStdout),
            out(Payload::Stdout(Bytes::from("late"))),
            out(Payload::EofStderr),
        ];
        let (path, _agent) = fake_agent(&dir, reply);

        let client = ExecClient::connect(&path).await.unwrap();
        let (mut input, mut outputs) = client.start("local", "true").await.unwrap();
        input.finish().await.unwrap();
        input.finish().await.unwrap();

        assert_eq!(outputs.next().await.unwrap(), Some(Payload::EofStdout));
        assert_eq!(outputs.next().await.unwrap(), Some(Payload::EofStderr));
        assert_eq!(outputs.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_early_close() {
        let dir = TempDir::new().unwrap();
        let (path, _agent) = fake_agent(&dir, vec![out(Payload::EofStdout)]);

        let client = ExecClient::connect(&path).await.unwrap();
        let result = client.exec("local", "true", Bytes::new()).await;
        assert!(matches!(result, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_wrong_direction_rejected() {
        let dir = TempDir::new().unwrap();
        let (path, _agent) = fake_agent(&dir, vec![out(Payload::Stdin(Bytes::from("?")))]);

        let client = ExecClient::connect(&path).await.unwrap();
        let result = client.exec("local", "true", Bytes::new()).await;
        assert!(matches!(result, Err(ClientError::UnexpectedFlag(Flag::MsgStdin))));
    }
}
