//! Web seed connection: one sequential download serving random piece requests
//!
//! A connection is an actor. `WebSeedHandle` sends piece requests to it; the
//! actor's `PieceServer` answers from the external cache or its buffer,
//! parks the rest, and steers a single range fetch toward what readers need.

pub mod actor;
pub mod commands;
pub mod handle;
pub mod queue;
pub mod seek;
pub mod server;
pub mod session;

pub use actor::spawn_web_seed;
pub use commands::{ConnectionStats, WebSeedCommand};
pub use handle::{PendingPiece, WebSeedHandle};
pub use server::PieceServer;
pub use session::{SessionEvent, SessionState};
