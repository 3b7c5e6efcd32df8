//! Test harnesses for integration testing.
//!
//! [`TestHarness`] wires the full task engine over the in-memory store with
//! the scripted test crawlers registered. [`PostgresHarness`] shares one
//! Postgres container across every test in a binary; containers and
//! migrations are initialized once on first use, then reused.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use crawl_core::kernel::tasks::{
    CrawlerRegistry, InMemoryTaskStore, PostgresTaskStore, SupervisorConfig, Task, TaskStatus,
    TaskStore,
};
use crawl_core::kernel::{register_test_crawlers, KernelSettings, ServerDeps, TestGate};
use crawl_core::server::{build_app, AppState};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

fn init_tracing() {
    // Run tests with: RUST_LOG=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Full engine over the in-memory store.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &mut TestHarness) {
///     let task = ctx.deps.manager.submit("echo", json!({}), None).await.unwrap();
///     let task = ctx.wait_for_terminal(task.id).await;
/// }
/// ```
pub struct TestHarness {
    pub deps: ServerDeps,
    /// Same store as `deps.store`, typed for direct fixture setup.
    pub store: Arc<InMemoryTaskStore>,
    /// Controls every `gated` task run by this harness.
    pub gate: TestGate,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
    }

    async fn teardown(self) {
        // Release anything still parked so spawned tasks can finish.
        for _ in 0..16 {
            self.gate.release();
        }
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_concurrency(SupervisorConfig::default().max_concurrent)
    }

    pub fn with_concurrency(max_concurrent: usize) -> Self {
        init_tracing();

        let store = Arc::new(InMemoryTaskStore::new());
        let gate = TestGate::new();
        let mut registry = CrawlerRegistry::new();
        register_test_crawlers(&mut registry, &gate);

        let settings = KernelSettings {
            supervisor: SupervisorConfig {
                max_concurrent,
                ..SupervisorConfig::default()
            },
            ..KernelSettings::default()
        };
        let deps = ServerDeps::new(store.clone(), Arc::new(registry), settings);

        Self { deps, store, gate }
    }

    /// Router over this harness's engine, for `tower::ServiceExt::oneshot`.
    pub fn app(&self) -> Router {
        build_app(AppState::new(self.deps.clone()), &[])
    }

    pub async fn task(&self, task_id: Uuid) -> Task {
        self.store
            .find_by_id(task_id)
            .await
            .expect("store read")
            .expect("task exists")
    }

    /// Poll until the task reaches `status`; panics after 5s.
    pub async fn wait_for_status(&self, task_id: Uuid, status: TaskStatus) -> Task {
        self.wait_until(task_id, |task| task.status == status).await
    }

    /// Poll until the task is completed, failed or cancelled; panics after 5s.
    pub async fn wait_for_terminal(&self, task_id: Uuid) -> Task {
        self.wait_until(task_id, |task| task.status.is_terminal()).await
    }

    async fn wait_until(&self, task_id: Uuid, done: impl Fn(&Task) -> bool) -> Task {
        let poll = async {
            loop {
                let task = self.task(task_id).await;
                if done(&task) {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .unwrap_or_else(|_| panic!("task {task_id} did not reach the expected state"))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared test infrastructure that persists across all tests.
/// The container is started once and reused, migrations run once.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{pg_host}:{pg_port}/postgres");

        // Run migrations once on the shared database
        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// A fresh pool and store over the shared Postgres container.
///
/// Tests share one database, so each test should scope its rows (for
/// example with a unique `crawler_type`) rather than truncating.
pub struct PostgresHarness {
    pub db_pool: PgPool,
    pub store: PostgresTaskStore,
}

impl AsyncTestContext for PostgresHarness {
    async fn setup() -> Self {
        let infra = SharedTestInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .expect("Failed to connect to test database");

        Self {
            store: PostgresTaskStore::new(db_pool.clone()),
            db_pool,
        }
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}
