//! Configuration types module
//!
//! The gateway engine reads every tunable from this tree.

pub mod protocol;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::gateway::Intents;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bot token
    #[serde(default, skip_serializing)]
    pub token: Option<SecretString>,

    /// Gateway connection configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Protocol policy (opcodes, close codes, identify properties)
    #[serde(default)]
    pub protocol: protocol::ProtocolPolicy,

    /// Heartbeat configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Outbound rate budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Reconnect policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Text command configuration
    #[serde(default)]
    pub commands: CommandConfig,

    /// REST API configuration
    #[serde(default)]
    pub rest: RestConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from the default file and environment variables
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Gateway connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway URL; fetched from the REST API when unset
    pub url: Option<String>,
    /// Gateway API version
    #[serde(default = "default_version")]
    pub version: u8,
    /// Payload encoding
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Time allowed for HELLO and READY/RESUMED to arrive
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
    /// Intents sent with IDENTIFY
    #[serde(default)]
    pub intents: Intents,
    /// Close code used when the client drops a connection it wants to resume
    #[serde(default = "default_resume_close_code")]
    pub resume_close_code: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            url: None,
            version: default_version(),
            encoding: default_encoding(),
            handshake_timeout: default_handshake_timeout(),
            intents: Intents::default(),
            resume_close_code: default_resume_close_code(),
        }
    }
}

fn default_version() -> u8 {
    10
}

fn default_encoding() -> String {
    "json".to_string()
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_resume_close_code() -> u16 {
    4000
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Fraction of the interval by which the first tick may be shortened
    #[serde(default = "default_jitter")]
    pub first_tick_jitter: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            first_tick_jitter: default_jitter(),
        }
    }
}

fn default_jitter() -> f64 {
    0.1
}

/// Outbound rate budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sends permitted per window
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Window length
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
    /// Tokens held back for priority commands (heartbeat, identify, resume)
    #[serde(default = "default_reserve")]
    pub priority_reserve: u32,
    /// Maximum queued commands per priority tier
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            capacity: default_capacity(),
            window: default_window(),
            priority_reserve: default_reserve(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_capacity() -> u32 {
    120
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_reserve() -> u32 {
    3
}

fn default_max_pending() -> usize {
    256
}

/// Reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Growth factor between attempts
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Random spread applied to each delay (0.0 disables)
    #[serde(default = "default_randomization")]
    pub randomization_factor: f64,
    /// Consecutive failed attempts before giving up (None retries forever)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
    /// Pause before re-identifying after a non-resumable INVALID_SESSION
    #[serde(with = "humantime_serde", default = "default_invalid_session_delay")]
    pub invalid_session_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization(),
            max_attempts: default_max_attempts(),
            invalid_session_delay: default_invalid_session_delay(),
        }
    }
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_randomization() -> f64 {
    0.3
}

fn default_max_attempts() -> Option<u32> {
    Some(10)
}

fn default_invalid_session_delay() -> Duration {
    Duration::from_secs(3)
}

/// Text command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Prefix that marks a message as a command
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Match command names case-insensitively
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    /// Skip command resolution for messages written by bots
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        CommandConfig {
            prefix: default_prefix(),
            case_insensitive: true,
            ignore_bots: true,
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_true() -> bool {
    true
}

/// REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// API base URL including the version segment
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_rest_timeout")]
    pub timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        RestConfig {
            api_base: default_api_base(),
            timeout: default_rest_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_rest_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "discordwave=info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
