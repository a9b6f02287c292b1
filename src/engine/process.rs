//! # Child-process engine driver.
//!
//! [`ProcessEngine`] launches the configured engine command (a shell line,
//! e.g. `matlab -nosplash` behind a wrapper that speaks this driver protocol)
//! and exchanges line-framed commands over the child's stdio:
//!
//! ```text
//! → put <name> <len>\n  <len raw bytes>      ← ok\n | err <message>\n
//! → eval <len>\n        <len raw bytes>      ← ok\n | err <message>\n
//! → get <name>\n                             ← ok <len>\n <len raw bytes> | err <message>\n
//! → close\n                                  (child exits)
//! ```
//!
//! The framing logic lives in [`StdioSession`], generic over the reader and
//! writer so the protocol is testable against in-memory streams.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::{Engine, EngineError, EngineSession};

/// Upper bound for a single `get` reply; matches the intake payload cap.
const MAX_REPLY: u64 = 1 << 30;

/// Launches the engine command as a child process.
pub struct ProcessEngine;

#[async_trait]
impl Engine for ProcessEngine {
    async fn open(&self, cmd: &str) -> Result<Box<dyn EngineSession>, EngineError> {
        let mut parts = cmd.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| EngineError::Protocol("empty engine command".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout unavailable".into()))?;

        debug!(%cmd, pid = child.id(), "engine process started");
        Ok(Box::new(ProcessSession {
            io: StdioSession::new(BufReader::new(stdout), stdin),
            child,
        }))
    }
}

/// Session backed by a live child process.
struct ProcessSession {
    io: StdioSession<BufReader<ChildStdout>, ChildStdin>,
    child: Child,
}

#[async_trait]
impl EngineSession for ProcessSession {
    async fn put(&mut self, name: &str, blob: &[u8]) -> Result<(), EngineError> {
        self.io.put(name, blob).await
    }

    async fn eval(&mut self, expr: &str) -> Result<(), EngineError> {
        self.io.eval(expr).await
    }

    async fn get(&mut self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.io.get(name).await
    }

    async fn close(mut self: Box<Self>) -> Result<(), EngineError> {
        // Best effort: ask politely, then reap. kill_on_drop covers a child
        // that ignores the request.
        if let Err(e) = self.io.send_close().await {
            warn!(error = %e, "engine close request failed");
        }
        match self.child.wait().await {
            Ok(status) => {
                debug!(?status, "engine process exited");
                Ok(())
            }
            Err(e) => Err(EngineError::Io(e)),
        }
    }
}

/// The driver protocol over any buffered reader/writer pair.
pub struct StdioSession<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> StdioSession<R, W>
where
    R: AsyncBufReadExt + AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps a reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// `put <name> <len>` followed by the raw blob.
    pub async fn put(&mut self, name: &str, blob: &[u8]) -> Result<(), EngineError> {
        self.writer
            .write_all(format!("put {} {}\n", name, blob.len()).as_bytes())
            .await?;
        self.writer.write_all(blob).await?;
        self.writer.flush().await?;
        self.read_ack().await
    }

    /// `eval <len>` followed by the expression bytes.
    pub async fn eval(&mut self, expr: &str) -> Result<(), EngineError> {
        self.writer
            .write_all(format!("eval {}\n", expr.len()).as_bytes())
            .await?;
        self.writer.write_all(expr.as_bytes()).await?;
        self.writer.flush().await?;
        self.read_ack().await
    }

    /// `get <name>`, expecting `ok <len>` plus the raw blob.
    pub async fn get(&mut self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.writer
            .write_all(format!("get {name}\n").as_bytes())
            .await?;
        self.writer.flush().await?;

        let line = self.read_line().await?;
        if let Some(msg) = line.strip_prefix("err ") {
            return Err(EngineError::Refused(msg.to_string()));
        }
        let len: u64 = line
            .strip_prefix("ok ")
            .and_then(|rest| rest.trim().parse().ok())
            .ok_or_else(|| EngineError::Protocol(format!("unexpected reply: {line:?}")))?;
        if len > MAX_REPLY {
            return Err(EngineError::Protocol(format!("reply of {len} bytes")));
        }
        let mut blob = vec![0u8; len as usize];
        self.reader.read_exact(&mut blob).await?;
        Ok(blob)
    }

    /// Sends the `close` request without waiting for a reply.
    pub async fn send_close(&mut self) -> Result<(), EngineError> {
        self.writer.write_all(b"close\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads one `ok`/`err` acknowledgement line.
    async fn read_ack(&mut self) -> Result<(), EngineError> {
        let line = self.read_line().await?;
        match line.as_str() {
            "ok" => Ok(()),
            other => match other.strip_prefix("err ") {
                Some(msg) => Err(EngineError::Refused(msg.to_string())),
                None => Err(EngineError::Protocol(format!("unexpected reply: {other:?}"))),
            },
        }
    }

    async fn read_line(&mut self) -> Result<String, EngineError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(EngineError::Protocol("engine closed its stdout".into()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Drives the scripted engine side of one exchange.
    async fn scripted_engine(
        mut stream: tokio::io::DuplexStream,
        reply: &[u8],
        expect: &str,
    ) {
        let mut buf = vec![0u8; expect.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expect.as_bytes());
        stream.write_all(reply).await.unwrap();
    }

    #[tokio::test]
    async fn put_sends_header_and_blob() {
        let (driver, engine) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(driver);
        let mut session = StdioSession::new(BufReader::new(read_half), write_half);

        let script = tokio::spawn(async move {
            scripted_engine(engine, b"ok\n", "put argin 3\n\x01\x02\x03").await;
        });

        session.put("argin", &[1, 2, 3]).await.unwrap();
        script.await.unwrap();
    }

    #[tokio::test]
    async fn refused_put_surfaces_the_message() {
        let (driver, engine) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(driver);
        let mut session = StdioSession::new(BufReader::new(read_half), write_half);

        let script = tokio::spawn(async move {
            scripted_engine(engine, b"err out of memory\n", "put argin 1\x0a\x00").await;
        });

        let err = session.put("argin", &[0]).await.unwrap_err();
        match err {
            EngineError::Refused(msg) => assert_eq!(msg, "out of memory"),
            other => panic!("unexpected error: {other}"),
        }
        script.await.unwrap();
    }

    #[tokio::test]
    async fn get_reads_the_declared_length() {
        let (driver, engine) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(driver);
        let mut session = StdioSession::new(BufReader::new(read_half), write_half);

        let script = tokio::spawn(async move {
            scripted_engine(engine, b"ok 4\n\xde\xad\xbe\xef", "get argout\n").await;
        });

        let blob = session.get("argout").await.unwrap();
        assert_eq!(blob, vec![0xde, 0xad, 0xbe, 0xef]);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_reply_is_a_protocol_error() {
        let (driver, engine) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(driver);
        let mut session = StdioSession::new(BufReader::new(read_half), write_half);

        let script = tokio::spawn(async move {
            scripted_engine(engine, b"maybe\n", "eval 1\nx").await;
        });

        assert!(matches!(
            session.eval("x").await,
            Err(EngineError::Protocol(_))
        ));
        script.await.unwrap();
    }

    #[tokio::test]
    async fn closed_engine_is_a_protocol_error() {
        let (driver, engine) = duplex(1024);
        drop(engine);
        let (read_half, write_half) = tokio::io::split(driver);
        let mut session = StdioSession::new(BufReader::new(read_half), write_half);

        assert!(session.eval("x").await.is_err());
    }
}
