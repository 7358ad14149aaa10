//! In-process transport pair, used to host a client and a server inside
//! one process and by the integration tests.

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::Transport;
use crate::TransportError;

/// Size of the bounded frame channels. 128 frames of headroom is plenty
/// for an interactive peer.
const CHANNEL_CAPACITY: usize = 128;

/// One end of a linked in-memory duplex. Frames sent on one end are
/// received verbatim on the other.
pub struct InMemoryTransport {
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    incoming: Mutex<mpsc::Receiver<String>>,
}

impl InMemoryTransport {
    /// Create two linked transports.
    pub fn pair() -> (InMemoryTransport, InMemoryTransport) {
        let (left_tx, left_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (right_tx, right_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            InMemoryTransport {
                outgoing: Mutex::new(Some(left_tx)),
                incoming: Mutex::new(right_rx),
            },
            InMemoryTransport {
                outgoing: Mutex::new(Some(right_tx)),
                incoming: Mutex::new(left_rx),
            },
        )
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.outgoing.lock().await.is_some() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Dropping the sender closes the peer's incoming stream.
        self.outgoing.lock().await.take();
        self.incoming.lock().await.close();
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let sender = {
            let guard = self.outgoing.lock().await;
            guard.clone().ok_or(TransportError::NotConnected)?
        };
        sender
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or(TransportError::Closed)
    }
}
