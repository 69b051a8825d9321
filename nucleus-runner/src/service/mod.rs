//! Service layer
//!
//! Services contain the runner's business logic: fetching payloads and secrets,
//! preparing the checkout, running commands and framework runners, and handling
//! caches, blocklists and coverage. Drivers compose them into task lifecycles.
//!
//! All services are trait-based to enable testing and dependency injection.

mod blocklist;
mod cache;
mod coverage;
mod diff;
mod discovery;
mod execution;
mod git;
mod log_buffer;
mod log_store;
mod payload;
mod runner;
mod secrets;
mod tas_config;
mod test_execution;

// Re-export traits
pub use blocklist::BlocklistService;
pub use cache::CacheStore;
pub use coverage::CoverageService;
pub use diff::DiffManager;
pub use discovery::TestDiscoveryService;
pub use execution::ExecutionManager;
pub use git::GitManager;
pub use log_store::LogStore;
pub use payload::PayloadManager;
pub use secrets::SecretParser;
pub use tas_config::TasConfigManager;
pub use test_execution::TestExecutionService;

// Re-export implementations
pub use blocklist::StandardBlocklistService;
pub use cache::LocalCacheStore;
pub use coverage::StandardCoverageService;
pub use diff::GitDiffManager;
pub use discovery::RunnerDiscoveryService;
pub use execution::ShellExecutionManager;
pub use git::GitCliManager;
pub use log_store::FileLogStore;
pub use payload::HttpPayloadManager;
pub use secrets::FileSecretParser;
pub use tas_config::YamlTasConfigManager;
pub use test_execution::RunnerExecutionService;

// Re-export supporting types
pub use discovery::{DiscoveryArgs, DiscoveryMeta};
pub use execution::{CommandType, INSTALL_RUNNERS_COMMAND, shell_quote};
pub use log_buffer::LogBuffer;
pub use secrets::{Secrets, substitute_env};
pub use test_execution::ExecutionArgs;
