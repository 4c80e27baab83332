//! Configuration module
//!
//! - types/mod.rs: connection, heartbeat, rate-limit, reconnect and command settings
//! - types/protocol.rs: protocol policy (opcodes, close codes, identify properties)
//! - io.rs: configuration loading and saving
//! - validation.rs: configuration validation
//! - paths.rs: configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::{
    CommandConfig, Config, GatewayConfig, HeartbeatConfig, LogConfig, RateLimitConfig,
    ReconnectConfig, RestConfig,
};

pub use types::protocol::{
    CloseAction, CloseCodePolicy, ConnectionProperties, EventNames, OpcodeTable, ProtocolPolicy,
};

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
