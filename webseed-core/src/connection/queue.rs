//! Pending piece requests waiting for streamed bytes.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::WebSeedError;
use crate::layout::PieceIndex;

/// Completion channel for a single piece request.
pub type PieceResponder = oneshot::Sender<Result<Bytes, WebSeedError>>;

/// Outcome of adding a request to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// First request for this piece; a new entry was created.
    New,
    /// The piece was already pending; the responder joined that entry.
    Joined,
}

/// Outstanding requests keyed by piece index.
///
/// Each index has one entry. Repeated requests for a pending piece are
/// attached to the existing entry and all receive the same bytes.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BTreeMap<PieceIndex, Vec<PieceResponder>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: PieceIndex, responder: PieceResponder) -> Enqueued {
        match self.entries.get_mut(&index) {
            Some(responders) => {
                responders.push(responder);
                Enqueued::Joined
            }
            None => {
                self.entries.insert(index, vec![responder]);
                Enqueued::New
            }
        }
    }

    pub fn contains(&self, index: PieceIndex) -> bool {
        self.entries.contains_key(&index)
    }

    /// Number of distinct pending pieces.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of pending indices in ascending order.
    pub fn indices(&self) -> Vec<PieceIndex> {
        self.entries.keys().copied().collect()
    }

    /// Removes an entry and hands back its responders.
    pub fn take(&mut self, index: PieceIndex) -> Option<Vec<PieceResponder>> {
        self.entries.remove(&index)
    }

    /// Drops every pending responder without answering it.
    ///
    /// Returns the number of pieces abandoned.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.entries.len();
        self.entries.clear();
        abandoned
    }
}

/// Sends the same piece bytes to every responder, ignoring departed waiters.
pub fn resolve_all(responders: Vec<PieceResponder>, data: &Bytes) {
    for responder in responders {
        let _ = responder.send(Ok(data.clone()));
    }
}
