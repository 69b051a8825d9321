//! Repository layer
//!
//! Repositories wrap the control-plane client behind small traits so that services
//! and drivers never talk HTTP directly. They carry no business logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod blocklist;
mod results;
mod tasks;

// Re-export traits
pub use blocklist::BlocklistRepository;
pub use results::ResultRepository;
pub use tasks::TaskRepository;

// Re-export implementations
pub use blocklist::HttpBlocklistRepository;
pub use results::HttpResultRepository;
pub use tasks::HttpTaskRepository;
