//! Newline-delimited transport over any byte stream.
//!
//! - one UTF-8 JSON envelope per line, `\n` terminated (`\r\n` accepted)
//! - lines longer than the configured limit are a transport fault
//! - blank lines are skipped
//! - stdout carries messages only; logs go to stderr

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::codec::{self, Inbound, DEFAULT_MAX_MESSAGE_BYTES};
use super::Transport;
use crate::types::{McpError, McpResult, Message};

/// Line transport over stdin/stdout.
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

/// Newline-delimited JSON over a reader/writer pair.
pub struct LineTransport<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
    max_message_bytes: usize,
    closed: AtomicBool,
}

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// Read one raw line without its terminator. `None` at EOF.
    async fn read_line(&self) -> McpResult<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        loop {
            let mut buf = Vec::new();
            // room for a `\r\n` terminator; anything longer is oversized
            let mut limited = (&mut *reader).take(self.max_message_bytes as u64 + 2);
            let read = limited.read_until(b'\n', &mut buf).await?;
            if read == 0 {
                return Ok(None);
            }

            let terminated = buf.last() == Some(&b'\n');
            if terminated {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            if buf.len() > self.max_message_bytes {
                return Err(McpError::Transport(format!(
                    "message exceeded size limit of {} bytes",
                    self.max_message_bytes
                )));
            }

            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(buf));
        }
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: &Message) -> McpResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Transport("transport is closed".into()));
        }
        let mut line = codec::encode(message)?;
        line.push('\n');
        tracing::trace!("Sending: {}", line.trim_end());

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("flush failed: {e}")))?;
        Ok(())
    }

    async fn receive(&self) -> McpResult<Option<Inbound>> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        match self.read_line().await {
            Ok(Some(line)) => codec::decode(&line).map(Some),
            Ok(None) => Ok(None),
            Err(McpError::Io(e)) => Err(McpError::Transport(format!("read failed: {e}"))),
            Err(e) => Err(e),
        }
    }

    async fn close(&self) -> McpResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| McpError::Transport(format!("shutdown failed: {e}")))
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}
