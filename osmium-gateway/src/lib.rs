//! Osmium Gateway - Discord Gateway WebSocket client
#![deny(unsafe_code)]
//!
//! A long-lived, authenticated, bidirectional WebSocket client for
//! Discord's gateway. Each [`Shard`] maintains a durable session:
//! it identifies or resumes, heartbeats, demultiplexes dispatch events
//! into the client caches, and recovers from transport and session
//! failures transparently.
//!
//! # Features
//!
//! - Session resumption with randomized reconnect backoff
//! - Zlib-stream transport compression
//! - ETF or JSON wire encoding (`etf` cargo feature)
//! - Rate-limited outbound command path with priority slots
//! - Guild member chunking correlated by nonce
//! - Strict error handling (no unwrap outside tests)
//!
//! # Example
//!
//! ```ignore
//! use osmium_gateway::{Client, GatewayOptions, Shard};
//! use osmium_model::Intents;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = GatewayOptions::new("your-token", Intents::default());
//!     let (client, events) = Client::new(options);
//!     let shard = Shard::new(0, 1, client);
//!
//!     tokio::spawn(async move {
//!         while let Ok((shard_id, event)) = events.recv_async().await {
//!             println!("shard {shard_id}: {event:?}");
//!         }
//!     });
//!
//!     shard.run().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod codec;
mod compression;
mod dispatch;
pub mod error;
pub mod etf;
pub mod event;
mod heartbeat;
mod manager;
mod members;
mod metrics;
mod opcode;
mod outbound;
mod payload;
mod ratelimit;
mod session;
mod shard;

pub use client::{Client, GatewayOptions};
pub use codec::{FrameCodec, GatewayEncoding};
pub use compression::ZlibInflater;
pub use error::{CloseCode, GatewayError};
pub use event::{Event, Possibly};
pub use heartbeat::Heartbeat;
pub use manager::ShardManager;
pub use members::{MemberRequestTable, RequestMembersOptions, DEFAULT_REQUEST_TIMEOUT};
pub use metrics::{MetricsSnapshot, ShardMetrics};
pub use opcode::OpCode;
pub use payload::{GatewayPacket, UpdatePresence};
pub use ratelimit::{Bucket, IdentifyRateLimiter};
pub use session::{SessionState, ShardStatus};
pub use shard::Shard;

/// Discord Gateway API version spoken by this library.
pub const GATEWAY_VERSION: u8 = 10;

/// Default gateway URL (normally overridden by /gateway/bot).
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
