//! Gateway module - the real-time session with the remote endpoint
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!   frames  ───▶  │   Session engine     │ ──▶ Event router ──▶ handlers
//!                 │  (read loop, state)  │
//!                 └──────────┬───────────┘
//!                            │ identify / resume / heartbeat
//!                            ▼
//!                 ┌──────────────────────┐
//!   frames  ◀───  │ Outbound dispatcher  │ ◀── presence, application commands
//!                 │ (priority, budget)   │
//!                 └──────────────────────┘
//! ```
//!
//! The engine reads, the dispatcher writes, the heartbeat monitor and the
//! router run on their own tasks. They talk through channels only.

pub mod dispatcher;
pub mod engine;
pub mod heartbeat;
pub mod intents;
pub mod protocol;
pub mod rate_limit;
pub mod reconnect;
pub mod router;
pub mod session;
pub mod transport;

pub use dispatcher::{OutboundDispatcher, OutboundHandle, Priority, Scope};
pub use engine::{EngineParts, SessionEngine};
pub use heartbeat::{HeartbeatFailure, HeartbeatHandle};
pub use intents::Intents;
pub use protocol::{Activity, Codec, Envelope, JsonCodec, PresenceUpdate, Status};
pub use router::{EventRouter, RouterSettings};
pub use session::{LifecycleEvent, ResumeToken, Session, SessionSnapshot, SessionState};
pub use transport::{
    Connection, Connector, Disconnect, Frame, FrameSink, FrameStream, MemoryConnector, MemoryGateway,
    MemoryPeer, PeerEvent, WsConnector,
};
