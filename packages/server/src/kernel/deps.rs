//! Server dependencies for the task engine
//!
//! Wires one store, one hub and one registry into the supervisor, the
//! manager and the recycler, so every component shares the same instances.

use std::sync::Arc;

use crate::kernel::stream_hub::StreamHub;
use crate::kernel::tasks::{
    RecyclerConfig, RunningTasks, SharedCrawlerRegistry, StaleTaskRecycler, SupervisorConfig,
    TaskManager, TaskStore, TaskSupervisor,
};

#[derive(Debug, Clone, Default)]
pub struct KernelSettings {
    pub supervisor: SupervisorConfig,
    pub recycler: RecyclerConfig,
}

#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn TaskStore>,
    pub registry: SharedCrawlerRegistry,
    /// In-process pub/sub hub for task progress
    pub hub: StreamHub,
    pub running: RunningTasks,
    pub supervisor: TaskSupervisor,
    pub manager: TaskManager,
    recycler_config: RecyclerConfig,
}

impl ServerDeps {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: SharedCrawlerRegistry,
        settings: KernelSettings,
    ) -> Self {
        let hub = StreamHub::new();
        let running = RunningTasks::new();
        let supervisor = TaskSupervisor::new(
            Arc::clone(&store),
            hub.clone(),
            Arc::clone(&registry),
            running.clone(),
            settings.supervisor,
        );
        let manager = TaskManager::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            supervisor.clone(),
            hub.clone(),
            running.clone(),
        );

        Self {
            store,
            registry,
            hub,
            running,
            supervisor,
            manager,
            recycler_config: settings.recycler,
        }
    }

    pub fn recycler(&self) -> StaleTaskRecycler {
        self.recycler_with(self.recycler_config.clone())
    }

    pub fn recycler_with(&self, config: RecyclerConfig) -> StaleTaskRecycler {
        StaleTaskRecycler::new(
            Arc::clone(&self.store),
            self.hub.clone(),
            self.running.clone(),
            config,
        )
    }
}
