//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;
use webseed_core::config::WebSeedConfig;
use webseed_core::peer::PeerId;
use webseed_core::{
    HttpRangeFetcher, MemoryPieceCache, PieceIndex, ResourceLayout, WebSeedHandle,
    spawn_web_seed,
};

/// Log progress every this many mirrored pieces
const PROGRESS_INTERVAL: u32 = 64;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the size and piece layout of a remote file
    Info {
        /// HTTP(S) URL of the file
        url: Url,
    },
    /// Fetch a single piece
    Piece {
        /// HTTP(S) URL of the file
        url: Url,
        /// Zero-based piece index
        index: u32,
        /// Write the piece bytes to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download the whole file piece by piece through one connection
    Mirror {
        /// HTTP(S) URL of the file
        url: Url,
        /// Destination path
        output: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the first transport, layout or filesystem error hit by the command
pub async fn handle_command(command: Commands, piece_length: Option<u32>) -> anyhow::Result<()> {
    let config = WebSeedConfig::from_env();
    let piece_length = piece_length.unwrap_or(config.seed.default_piece_length);

    match command {
        Commands::Info { url } => show_info(&config, url, piece_length).await,
        Commands::Piece { url, index, output } => {
            fetch_piece(&config, url, piece_length, index, output).await
        }
        Commands::Mirror { url, output } => mirror_file(&config, url, piece_length, output).await,
    }
}

/// Print the resource layout as seen by a web seed
///
/// # Errors
/// - HEAD request failed or reported no length
pub async fn show_info(config: &WebSeedConfig, url: Url, piece_length: u32) -> anyhow::Result<()> {
    let fetcher = HttpRangeFetcher::new(&config.network)?;
    let layout = discover_layout(&fetcher, &url, piece_length).await?;

    println!("URL:          {url}");
    println!("Peer ID:      {}", PeerId::from_url(&url));
    println!("Total length: {} bytes", layout.total_length());
    println!("Piece length: {} bytes", layout.piece_length());
    println!("Pieces:       {}", layout.piece_count());
    println!("Last piece:   {} bytes", layout.last_piece_length());

    Ok(())
}

/// Fetch one piece and optionally save it
///
/// # Errors
/// - Index out of range, transport failure, or output file not writable
pub async fn fetch_piece(
    config: &WebSeedConfig,
    url: Url,
    piece_length: u32,
    index: u32,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let handle = connect(config, url, piece_length).await?;

    let piece = handle.request_piece(PieceIndex::new(index)).await;
    handle.destroy().await;
    let piece = piece.with_context(|| format!("failed to fetch piece {index}"))?;

    println!("Piece {index}: {} bytes", piece.len());
    if let Some(path) = output {
        fs::write(&path, &piece)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("  Written to {}", path.display());
    }

    Ok(())
}

/// Request every piece in order and write them out sequentially
///
/// # Errors
/// - Any piece failing to arrive, or the output file not writable
pub async fn mirror_file(
    config: &WebSeedConfig,
    url: Url,
    piece_length: u32,
    output: PathBuf,
) -> anyhow::Result<()> {
    let handle = connect(config, url, piece_length).await?;
    let piece_count = handle.layout().piece_count();

    let result = write_pieces(&handle, piece_count, &output).await;
    let stats = handle.stats().await;
    handle.destroy().await;
    result?;

    println!("Mirrored {piece_count} pieces to {}", output.display());
    if let Ok(stats) = stats {
        println!(
            "  Sessions: {} started, {} aborted; {} bytes streamed",
            stats.sessions_started, stats.sessions_aborted, stats.bytes_fetched
        );
    }

    Ok(())
}

async fn write_pieces(
    handle: &WebSeedHandle,
    piece_count: u32,
    output: &Path,
) -> anyhow::Result<()> {
    let mut file = fs::File::create(output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;

    // Queue everything up front so the connection sees one sequential run
    let mut pending = Vec::with_capacity(piece_count as usize);
    for index in 0..piece_count {
        pending.push(handle.submit_piece(PieceIndex::new(index)).await?);
    }

    for piece in pending {
        let index = piece.index();
        let bytes = piece
            .recv()
            .await
            .with_context(|| format!("failed to fetch piece {index}"))?;
        file.write_all(&bytes).await?;

        if (index.as_u32() + 1) % PROGRESS_INTERVAL == 0 {
            tracing::info!("Mirrored {}/{} pieces", index.as_u32() + 1, piece_count);
        }
    }

    file.flush().await?;
    Ok(())
}

async fn connect(config: &WebSeedConfig, url: Url, piece_length: u32) -> anyhow::Result<WebSeedHandle> {
    let fetcher = HttpRangeFetcher::new(&config.network)?;
    let layout = discover_layout(&fetcher, &url, piece_length).await?;
    tracing::debug!("Connecting to {} ({})", url, layout);

    Ok(spawn_web_seed(
        url,
        layout,
        Arc::new(MemoryPieceCache::new()),
        Arc::new(fetcher),
        config,
    ))
}

async fn discover_layout(
    fetcher: &HttpRangeFetcher,
    url: &Url,
    piece_length: u32,
) -> anyhow::Result<ResourceLayout> {
    let total_length = fetcher
        .content_length(url)
        .await
        .with_context(|| format!("failed to read length of {url}"))?;
    Ok(ResourceLayout::new(total_length, piece_length)?)
}
