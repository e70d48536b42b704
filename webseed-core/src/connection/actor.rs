//! Actor implementation for a web seed connection.

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use super::commands::WebSeedCommand;
use super::handle::WebSeedHandle;
use super::server::PieceServer;
use super::session::SessionEvent;
use crate::cache::PieceCache;
use crate::config::WebSeedConfig;
use crate::layout::ResourceLayout;
use crate::transport::RangeFetcher;

/// Spawns a connection actor for one remote resource and returns its handle.
///
/// The actor owns the buffer and the single sequential download. It handles
/// piece requests and download events one at a time, so no locking is needed
/// around the download state. Dropping every handle tears the connection down.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
/// use webseed_core::config::WebSeedConfig;
/// use webseed_core::{HttpRangeFetcher, MemoryPieceCache, PieceIndex, ResourceLayout, spawn_web_seed};
///
/// let config = WebSeedConfig::default();
/// let url = url::Url::parse("https://example.com/video.mkv")?;
/// let layout = ResourceLayout::new(10 * 1024 * 1024, 262_144)?;
/// let fetcher = Arc::new(HttpRangeFetcher::new(&config.network)?);
/// let handle = spawn_web_seed(url, layout, Arc::new(MemoryPieceCache::new()), fetcher, &config);
/// let _piece = handle.request_piece(PieceIndex::new(0)).await?;
/// # Ok(())
/// # }
/// ```
pub fn spawn_web_seed(
    url: Url,
    layout: ResourceLayout,
    cache: Arc<dyn PieceCache>,
    fetcher: Arc<dyn RangeFetcher>,
    config: &WebSeedConfig,
) -> WebSeedHandle {
    let (sender, receiver) = mpsc::channel(config.seed.command_buffer.max(1));
    let (event_sender, event_receiver) = mpsc::unbounded_channel();
    let server = PieceServer::new(url, layout, cache, fetcher, event_sender);

    tokio::spawn(async move {
        run_actor_loop(server, receiver, event_receiver).await;
    });

    WebSeedHandle::new(sender, layout)
}

/// Processes commands and download events until destroyed.
///
/// The loop also ends when every handle is dropped; the connection is then
/// destroyed so in-flight fetches stop.
async fn run_actor_loop(
    mut server: PieceServer,
    mut receiver: mpsc::Receiver<WebSeedCommand>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    tracing::debug!("Web seed actor started ({})", server.layout());

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    break;
                };
                if !handle_command(&mut server, command) {
                    break;
                }
            }
            // The server holds a sender, so this channel never closes first
            Some(event) = events.recv() => {
                server.handle_session_event(event);
            }
        }
    }

    server.destroy();
    tracing::debug!("Web seed actor stopped");
}

/// Handles a single command.
/// Returns true to continue processing, false to shut down.
fn handle_command(server: &mut PieceServer, command: WebSeedCommand) -> bool {
    match command {
        WebSeedCommand::RequestPiece { index, responder } => {
            server.request_piece(index, responder);
        }
        WebSeedCommand::GetStats { responder } => {
            let _ = responder.send(server.stats());
        }
        WebSeedCommand::Destroy { responder } => {
            server.destroy();
            let _ = responder.send(());
            return false;
        }
    }
    true
}
