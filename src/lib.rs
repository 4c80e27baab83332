//! # DiscordWave
//!
//! An asynchronous gateway client for building chat bots.
//!
//! ## Features
//!
//! - **Resilient sessions:** heartbeats, zombie detection, resume and re-identify
//! - **Rate-limited sends:** priority queue that never starves session control
//! - **Ordered events:** handlers start in the order events arrive
//! - **Prefix commands:** `!ping`-style commands with quoted arguments
//! - **Pluggable transport:** WebSocket by default, in-memory for tests

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod rest;

pub use client::{Client, Credentials, GatewayHandle};
pub use commands::{CommandContext, CommandMeta, Context, EventContext};
pub use config::Config;
pub use error::{Error, Result};
pub use gateway::{Activity, Intents, LifecycleEvent, PresenceUpdate, SessionSnapshot, SessionState, Status};
pub use models::{Message, User};
pub use rest::RestClient;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
