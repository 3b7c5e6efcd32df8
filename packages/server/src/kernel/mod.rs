//! Kernel module - task engine and shared infrastructure.

pub mod browser_pool;
pub mod deps;
pub mod stream_hub;
pub mod tasks;
pub mod test_dependencies;

pub use browser_pool::{BrowserConfig, BrowserError, BrowserLease, BrowserPool};
pub use deps::{KernelSettings, ServerDeps};
pub use stream_hub::{StreamHub, Subscription};
pub use test_dependencies::{register_test_crawlers, RecordingSink, TestGate};
