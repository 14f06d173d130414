//! # pagecast-relay: Real-time page relay
//!
//! Clients bound to the same page exchange full-document snapshots over
//! WebSocket. The relay stores the last snapshot of every page and hands it
//! to each newly joining client; it never inspects or merges content.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌──────────────────────┐
//! │ RelayClient │ ◄─────────────────► │ RelayServer          │
//! │ (per user)  │  /ws?pageId=<page>  │  one ClientSession   │
//! └─────────────┘                     │  per connection      │
//!                                     └──────────┬───────────┘
//!                              ┌─────────────────┼─────────────────┐
//!                              ▼                 ▼                 ▼
//!                     ┌────────────────┐ ┌──────────────┐ ┌────────────────┐
//!                     │ PageStore      │ │ Broadcaster  │ │ Connection     │
//!                     │ (per-page lock)│ │ (fan-out)    │ │ Registry       │
//!                     └────────────────┘ └──────────────┘ └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Page identifiers and request binding
//! - [`queue`]: Bounded per-client outbound queue and overflow policy
//! - [`storage`]: Durable snapshot store, file or in-memory backend
//! - [`registry`]: Page → connected clients
//! - [`broadcast`]: Fan-out to everyone on a page except the sender
//! - [`session`]: Join, replay, read/write loops, teardown
//! - [`transport`]: WebSocket and in-memory connections
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket relay client

pub mod protocol;
pub mod queue;
pub mod storage;
pub mod registry;
pub mod broadcast;
pub mod session;
pub mod transport;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{BindError, PageId, PageIdError};
pub use queue::{ClientId, OverflowPolicy, QueueConfig};
pub use storage::{FileBackend, MemoryBackend, PageBackend, PageStore, StoreError};
pub use registry::ConnectionRegistry;
pub use broadcast::{BroadcastStats, Broadcaster, PublishReport};
pub use session::{ClientSession, Relay, SessionSummary};
pub use transport::{MessageSink, MessageSource, TransportError};
pub use server::{RelayError, RelayServer, ServerConfig, ServerStats};
pub use client::{ConnectionState, RelayClient, RelayEvent};
