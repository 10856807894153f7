//! Configuration module
//!
//! - types/mod.rs: Core configuration types (Config, LogConfig)
//! - types/gateway.rs: Gateway endpoint, credentials and timing
//! - types/session.rs: Chat and exec-approval settings
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::{
    ApprovalsConfig, ChatConfig, Config, GatewayConfig, LogConfig, LogFormat,
    DEFAULT_PROTOCOL_VERSION,
};

pub use io::{
    apply_env_overrides, load_config, load_config_from_path, load_config_with_path,
    read_config_snapshot, save_config, ConfigSnapshot,
};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
