//! Line-delimited JSON over a TCP connection, framed exactly like the
//! stdio transport.

use std::io::ErrorKind;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::Transport;
use crate::TransportError;

pub struct TcpTransport {
    address: String,
    reader: Mutex<Option<Lines<BufReader<OwnedReadHalf>>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpTransport {
    /// A transport that will dial `address` (`host:port`) on `connect`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Wrap an already-established stream, e.g. one accepted by a
    /// listening server.
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            address: String::new(),
            reader: Mutex::new(Some(BufReader::new(read_half).lines())),
            writer: Mutex::new(Some(write_half)),
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        if reader.is_some() && writer.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|err| TransportError::Setup(format!("connect {}: {err}", self.address)))?;
        let (read_half, write_half) = stream.into_split();
        *reader = Some(BufReader::new(read_half).lines());
        *writer = Some(write_half);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.reader.lock().await.take();
        if let Some(mut write_half) = self.writer.lock().await.take() {
            let _ = write_half.shutdown().await;
        }
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn frames_survive_split_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr").to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            // One frame delivered in two chunks, then a second frame plus a
            // trailing partial line that never completes.
            stream.write_all(b"{\"a\"").await.expect("write");
            stream.write_all(b":1}\n{\"b\":2}\n{\"part").await.expect("write");
        });

        let transport = TcpTransport::new(address);
        transport.connect().await.expect("connect");
        assert_eq!(transport.receive().await.expect("first frame"), "{\"a\":1}");
        assert_eq!(transport.receive().await.expect("second frame"), "{\"b\":2}");
        // The unterminated tail stays buffered until the socket closes, at
        // which point it surfaces as the final (undecodable) frame, matching
        // how the NDJSON reader flushes its remainder at end of stream.
        server.await.expect("server task");
        assert_eq!(transport.receive().await.expect("tail"), "{\"part");
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::Closed)
        ));
    }
}
