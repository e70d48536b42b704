//! Handle for communicating with a web seed connection actor.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::commands::{ConnectionStats, WebSeedCommand};
use crate::WebSeedError;
use crate::layout::{PieceIndex, ResourceLayout};

/// Handle for a running web seed connection.
///
/// Cheap to clone and safe to share across tasks. Once the actor is gone,
/// every operation fails with `WebSeedError::ConnectionClosed`.
#[derive(Clone, Debug)]
pub struct WebSeedHandle {
    sender: mpsc::Sender<WebSeedCommand>,
    layout: ResourceLayout,
}

/// A submitted piece request awaiting its bytes.
#[derive(Debug)]
pub struct PendingPiece {
    index: PieceIndex,
    receiver: oneshot::Receiver<Result<Bytes, WebSeedError>>,
}

impl PendingPiece {
    pub fn index(&self) -> PieceIndex {
        self.index
    }

    /// Waits for the piece.
    ///
    /// # Errors
    /// - Any error the connection reported for this piece
    /// - `WebSeedError::ConnectionClosed` - The connection was destroyed first
    pub async fn recv(self) -> Result<Bytes, WebSeedError> {
        self.receiver
            .await
            .map_err(|_| WebSeedError::ConnectionClosed)?
    }
}

impl WebSeedHandle {
    pub fn new(sender: mpsc::Sender<WebSeedCommand>, layout: ResourceLayout) -> Self {
        Self { sender, layout }
    }

    pub fn layout(&self) -> &ResourceLayout {
        &self.layout
    }

    /// Submits a piece request without waiting for the bytes.
    ///
    /// Requests are handled in submission order, which is what seek detection
    /// observes. Use this to queue several pieces before awaiting any of them.
    ///
    /// # Errors
    /// - `WebSeedError::ConnectionClosed` - Actor no longer running
    pub async fn submit_piece(&self, index: PieceIndex) -> Result<PendingPiece, WebSeedError> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(WebSeedCommand::RequestPiece { index, responder })
            .await
            .map_err(|_| WebSeedError::ConnectionClosed)?;

        Ok(PendingPiece { index, receiver })
    }

    /// Requests one piece and waits for its bytes.
    ///
    /// # Errors
    /// - `WebSeedError::InvalidPieceIndex` - Index beyond the last piece
    /// - `WebSeedError::LastPieceFetch` - Dedicated fetch of the final piece failed
    /// - `WebSeedError::ConnectionClosed` - Connection destroyed before the piece arrived
    pub async fn request_piece(&self, index: PieceIndex) -> Result<Bytes, WebSeedError> {
        self.submit_piece(index).await?.recv().await
    }

    /// Snapshot of the connection counters.
    ///
    /// # Errors
    /// - `WebSeedError::ConnectionClosed` - Actor no longer running
    pub async fn stats(&self) -> Result<ConnectionStats, WebSeedError> {
        let (responder, rx) = oneshot::channel();
        self.sender
            .send(WebSeedCommand::GetStats { responder })
            .await
            .map_err(|_| WebSeedError::ConnectionClosed)?;

        rx.await.map_err(|_| WebSeedError::ConnectionClosed)
    }

    /// Tears the connection down.
    ///
    /// Cancels the active download and any last-piece fetch. Pending requests
    /// are abandoned. Destroying an already destroyed connection is a no-op.
    pub async fn destroy(&self) {
        let (responder, rx) = oneshot::channel();
        if self
            .sender
            .send(WebSeedCommand::Destroy { responder })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Checks if the actor is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
