//! Line-delimited JSON over stdin/stdout.
//!
//! The conventional transport for spawned MCP servers: each frame is one
//! `\n`-terminated line. Trailing partial lines stay buffered in the
//! reader until their newline arrives; EOF on stdin ends the stream.

use std::io::ErrorKind;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::io::Stdin;
use tokio::io::Stdout;
use tokio::io::{self};
use tokio::sync::Mutex;

use crate::Transport;
use crate::TransportError;

#[derive(Default)]
pub struct StdioTransport {
    reader: Mutex<Option<Lines<BufReader<Stdin>>>>,
    writer: Mutex<Option<Stdout>>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        *reader = Some(BufReader::new(io::stdin()).lines());
        *writer = Some(io::stdout());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.reader.lock().await.take();
        if let Some(mut stdout) = self.writer.lock().await.take() {
            let _ = stdout.flush().await;
        }
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let stdout = guard.as_mut().ok_or(TransportError::NotConnected)?;
        stdout.write_all(frame.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut guard = self.reader.lock().await;
        let lines = guard.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(line);
                }
                Ok(None) => return Err(TransportError::Closed),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Err(TransportError::WouldBlock);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
