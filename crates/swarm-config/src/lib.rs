//! # swarm-config
//!
//! Configuration for the Swarm engine. Reads `swarm.toml`, then applies
//! `SWARM_*` environment overrides.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, ReloadHook};
pub use schema::{
    AgentConfig, ApprovalConfig, ConfigWarning, LoggingConfig, ModelConfig, ProviderConfig,
    ProxyConfig, RoleChains, RoutingConfig, SwarmConfig, WarningSeverity, default_base_url,
};
