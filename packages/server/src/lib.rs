// Crawl Orchestrator - API Core
//
// Runs named crawler strategies as background tasks, persists their
// lifecycle, streams progress to websocket subscribers, and recycles tasks
// that stall in `running`.
//
// Crawler strategies live in domains/crawlers/; the task engine in kernel/tasks/.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
