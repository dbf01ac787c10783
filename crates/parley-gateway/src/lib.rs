//! WebSocket gateway for real-time voice sessions.
//!
//! Each client connection becomes one session: a handshake carrying API
//! keys, a recognition stream fed with the client's audio, and an
//! orchestrator loop that turns final transcripts into spoken responses.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod session;
pub mod state;

pub use server::{build_router, start_gateway};
pub use session::{ClientInput, Session, SessionReport};
pub use state::GatewayState;
