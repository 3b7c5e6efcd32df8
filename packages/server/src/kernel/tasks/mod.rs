//! Crawl task orchestration.
//!
//! This module holds the task lifecycle engine:
//! - [`Task`] / [`TaskStatus`] / [`TaskTransition`] - model and state machine
//! - [`TaskStore`] - persistence boundary ([`PostgresTaskStore`], [`InMemoryTaskStore`])
//! - [`CrawlerRegistry`] - crawler type name → strategy factory
//! - [`TaskSupervisor`] - runs one task and settles it exactly once
//! - [`TaskManager`] - submit / query / cancel / delete
//! - [`StaleTaskRecycler`] - fails tasks stuck in `running`
//!
//! # Architecture
//!
//! ```text
//! TaskManager.submit(type, params)
//!     │
//!     ├─► CrawlerRegistry.validate
//!     ├─► TaskStore.create (pending)
//!     └─► TaskSupervisor.spawn
//!             ├─► CrawlerRegistry.instantiate → CrawlerStrategy
//!             ├─► strategy.run(ProgressEmitter) → TaskStore + StreamHub
//!             └─► guarded terminal transition → StreamHub
//!
//! StaleTaskRecycler (interval)
//!     └─► find_stale → guarded running → failed → StreamHub
//! ```

pub mod events;
pub mod manager;
mod memory_store;
mod postgres_store;
pub mod recycler;
pub mod registry;
mod running;
pub mod store;
pub mod strategy;
pub mod supervisor;
mod task;

pub use events::TaskEvent;
pub use manager::{
    TaskError, TaskManager, TaskPage, TaskQuery, TaskStats, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use memory_store::InMemoryTaskStore;
pub use postgres_store::PostgresTaskStore;
pub use recycler::{RecycleTimeout, RecyclerConfig, StaleTaskRecycler};
pub use registry::{CrawlerDescriptor, CrawlerRegistry, RegistryError, SharedCrawlerRegistry};
pub use running::RunningTasks;
pub use store::{TaskFilter, TaskStore};
pub use strategy::{CrawlerError, CrawlerStrategy, ProgressEmitter, ProgressSink};
pub use supervisor::{SupervisorConfig, TaskSupervisor};
pub use task::{ParseStatusError, Task, TaskStatus, TaskTransition};
