//! Web seed as a BitTorrent peer
//!
//! Adapts a `WebSeedHandle` to the peer-wire message vocabulary: the web
//! seed introduces itself with an id derived from its URL, claims every
//! piece, unchokes on interest and answers block requests from the
//! connection. Message framing belongs to the wire codec and is not done here.

use std::fmt;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use url::Url;

use crate::WebSeedError;
use crate::connection::WebSeedHandle;
use crate::layout::PieceIndex;

/// SHA-1 info hash of a torrent's info dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// 20-byte peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Derives a stable id for a web seed from its URL.
    ///
    /// The same URL always yields the same id, so a client never connects to
    /// one mirror twice.
    pub fn from_url(url: &Url) -> Self {
        Self(Sha1::digest(url.as_str().as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Peer-wire messages a web seed sends or reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: PieceIndex,
    },
    /// Piece availability bitmap, most significant bit first
    Bitfield {
        bitfield: Bytes,
    },
    Request {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    Piece {
        piece_index: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    Cancel {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
}

/// Handshake exchanged when a peer connection opens.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    pub protocol: String,
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl PeerHandshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: "BitTorrent protocol".to_string(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}

/// A web seed presented to the swarm logic as a regular peer.
#[derive(Debug, Clone)]
pub struct WebPeer {
    peer_id: PeerId,
    handle: WebSeedHandle,
    choking: bool,
}

impl WebPeer {
    pub fn new(url: &Url, handle: WebSeedHandle) -> Self {
        Self {
            peer_id: PeerId::from_url(url),
            handle,
            choking: true,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn is_choking(&self) -> bool {
        self.choking
    }

    /// Answers a remote handshake with our id for the same torrent.
    pub fn handshake_reply(&self, remote: &PeerHandshake) -> PeerHandshake {
        PeerHandshake::new(remote.info_hash, self.peer_id)
    }

    /// Claims every piece of the resource.
    ///
    /// The claim is optimistic: pieces are fetched on demand. Spare bits in
    /// the final byte are left clear.
    pub fn bitfield(&self) -> PeerMessage {
        let piece_count = self.handle.layout().piece_count() as usize;
        let mut bits = vec![0xFFu8; piece_count.div_ceil(8)];
        let spare = bits.len() * 8 - piece_count;
        if let Some(last) = bits.last_mut() {
            *last &= 0xFFu8 << spare;
        }
        PeerMessage::Bitfield {
            bitfield: Bytes::from(bits),
        }
    }

    /// Reacts to a message from the remote peer.
    ///
    /// Returns the reply to send, if any. Block requests wait for the piece.
    ///
    /// # Errors
    ///
    /// - `WebSeedError::Protocol` - If a request falls outside its piece
    /// - Any error from `WebSeedHandle::request_piece`
    pub async fn handle_message(
        &mut self,
        message: PeerMessage,
    ) -> Result<Option<PeerMessage>, WebSeedError> {
        match message {
            PeerMessage::Interested if self.choking => {
                self.choking = false;
                Ok(Some(PeerMessage::Unchoke))
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            } => {
                let piece = self.handle.request_piece(piece_index).await?;
                let start = offset as usize;
                let end = start + length as usize;
                if end > piece.len() {
                    return Err(WebSeedError::Protocol {
                        message: format!(
                            "block {offset}+{length} exceeds piece {piece_index} of {} bytes",
                            piece.len()
                        ),
                    });
                }
                Ok(Some(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: piece.slice(start..end),
                }))
            }
            other => {
                tracing::trace!("Web peer {} ignoring {:?}", self.peer_id, other);
                Ok(None)
            }
        }
    }

    /// Tears down the underlying connection.
    pub async fn destroy(&self) {
        self.handle.destroy().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::MemoryPieceCache;
    use crate::config::WebSeedConfig;
    use crate::connection::spawn_web_seed;
    use crate::layout::ResourceLayout;
    use crate::transport::MockRangeFetcher;

    fn url() -> Url {
        Url::parse("http://mirror.example.com/ubuntu.iso").unwrap()
    }

    fn peer(total: u64, piece_length: u32) -> WebPeer {
        let data = Bytes::from((0..total).map(|i| (i % 251) as u8).collect::<Vec<_>>());
        let handle = spawn_web_seed(
            url(),
            ResourceLayout::new(total, piece_length).unwrap(),
            Arc::new(MemoryPieceCache::new()),
            Arc::new(MockRangeFetcher::new(data, 64)),
            &WebSeedConfig::for_testing(),
        );
        WebPeer::new(&url(), handle)
    }

    #[test]
    fn test_peer_id_is_stable_per_url() {
        let a = PeerId::from_url(&url());
        let b = PeerId::from_url(&url());
        let other = PeerId::from_url(&Url::parse("http://other.example.com/x").unwrap());

        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(a.to_string().len(), 40);
    }

    #[tokio::test]
    async fn test_bitfield_sized_to_piece_count() {
        let peer = peer(1000, 100);
        assert_eq!(
            peer.bitfield(),
            PeerMessage::Bitfield {
                bitfield: Bytes::from_static(&[0xFF, 0xC0])
            }
        );

        let peer = peer_with_pieces(16);
        assert_eq!(
            peer.bitfield(),
            PeerMessage::Bitfield {
                bitfield: Bytes::from_static(&[0xFF, 0xFF])
            }
        );
    }

    fn peer_with_pieces(count: u64) -> WebPeer {
        peer(count * 10, 10)
    }

    #[tokio::test]
    async fn test_handshake_reply_uses_url_id() {
        let peer = peer(1000, 100);
        let remote = PeerHandshake::new(InfoHash::new([7; 20]), PeerId::new([1; 20]));

        let reply = peer.handshake_reply(&remote);

        assert_eq!(reply.info_hash, remote.info_hash);
        assert_eq!(reply.peer_id, PeerId::from_url(&url()));
    }

    #[tokio::test]
    async fn test_interested_unchokes_once() {
        let mut peer = peer(1000, 100);

        let first = peer.handle_message(PeerMessage::Interested).await.unwrap();
        let second = peer.handle_message(PeerMessage::Interested).await.unwrap();

        assert_eq!(first, Some(PeerMessage::Unchoke));
        assert_eq!(second, None);
        assert!(!peer.is_choking());
    }

    #[tokio::test]
    async fn test_request_answers_block() {
        let mut peer = peer(1000, 100);

        let reply = peer
            .handle_message(PeerMessage::Request {
                piece_index: PieceIndex::new(3),
                offset: 20,
                length: 30,
            })
            .await
            .unwrap();

        let expected: Vec<u8> = (320..350u64).map(|i| (i % 251) as u8).collect();
        assert_eq!(
            reply,
            Some(PeerMessage::Piece {
                piece_index: PieceIndex::new(3),
                offset: 20,
                data: Bytes::from(expected),
            })
        );
    }

    #[tokio::test]
    async fn test_request_past_piece_end_rejected() {
        let mut peer = peer(1000, 100);

        let result = peer
            .handle_message(PeerMessage::Request {
                piece_index: PieceIndex::new(1),
                offset: 90,
                length: 20,
            })
            .await;

        assert!(matches!(result, Err(WebSeedError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_keep_alive_ignored() {
        let mut peer = peer(1000, 100);
        assert_eq!(peer.handle_message(PeerMessage::KeepAlive).await.unwrap(), None);
        peer.destroy().await;
    }
}
