// Test doubles for the task kernel
//
// Scripted crawler strategies and a recording progress sink, shared by unit
// tests and the integration suites under tests/.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::kernel::tasks::{
    CrawlerDescriptor, CrawlerError, CrawlerRegistry, CrawlerStrategy, ProgressEmitter,
    ProgressSink,
};

// =============================================================================
// Recording Sink
// =============================================================================

/// Captures every `(percent, message)` a strategy emits.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(i32, String)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitter(&self) -> ProgressEmitter {
        self.emitter_with(CancellationToken::new())
    }

    pub fn emitter_with(&self, cancel: CancellationToken) -> ProgressEmitter {
        ProgressEmitter::new(Arc::new(self.clone()), cancel)
    }

    pub fn events(&self) -> Vec<(i32, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<i32> {
        self.events().into_iter().map(|(p, _)| p).collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn emit(&self, percent: i32, message: String) -> Result<(), CrawlerError> {
        self.events.lock().unwrap().push((percent, message));
        Ok(())
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Lets a test hold a `gated` strategy mid-run.
///
/// The strategy signals `entered` after its first emit, then waits for one
/// `release` per run.
#[derive(Clone)]
pub struct TestGate {
    entered: Arc<Semaphore>,
    released: Arc<Semaphore>,
}

impl TestGate {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Semaphore::new(0)),
            released: Arc::new(Semaphore::new(0)),
        }
    }

    /// Wait until one gated run has reached the gate.
    pub async fn wait_until_entered(&self) {
        self.entered.acquire().await.unwrap().forget();
    }

    /// Let one gated run continue.
    pub fn release(&self) {
        self.released.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.add_permits(1);
        self.released.acquire().await.unwrap().forget();
    }
}

impl Default for TestGate {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Strategies
// =============================================================================

struct Echo {
    params: Map<String, Value>,
}

#[async_trait]
impl CrawlerStrategy for Echo {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        progress.emit(50, "echoing params").await?;
        Ok(json!({ "echo": self.params }))
    }
}

struct NullResult;

#[async_trait]
impl CrawlerStrategy for NullResult {
    async fn run(&mut self, _progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        Ok(Value::Null)
    }
}

struct Failing;

#[async_trait]
impl CrawlerStrategy for Failing {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        progress.emit(20, "looking for data").await?;
        Err(CrawlerError::NoData("nothing to see".to_string()))
    }
}

struct Panicking;

#[async_trait]
impl CrawlerStrategy for Panicking {
    async fn run(&mut self, _progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        panic!("crawler exploded");
    }
}

/// Emits the `steps` param verbatim, regressions and overshoots included.
struct Scripted {
    steps: Vec<i32>,
}

#[async_trait]
impl CrawlerStrategy for Scripted {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        for step in &self.steps {
            progress.emit(*step, format!("step {step}")).await?;
        }
        Ok(json!({ "steps": self.steps.len() }))
    }
}

struct Gated {
    gate: TestGate,
}

#[async_trait]
impl CrawlerStrategy for Gated {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError> {
        progress.emit(10, "waiting at gate").await?;
        self.gate.pass().await;
        progress.emit(50, "released").await?;
        progress.emit(90, "finishing").await?;
        Ok(json!({ "released": true }))
    }
}

/// Registers `echo`, `null_result`, `failing`, `panicking`, `scripted` and `gated`.
pub fn register_test_crawlers(registry: &mut CrawlerRegistry, gate: &TestGate) {
    registry.register(
        CrawlerDescriptor::new("echo", "Echo").description("Returns its params"),
        |params| {
            Ok(Box::new(Echo {
                params: params.clone(),
            }))
        },
    );
    registry.register(CrawlerDescriptor::new("null_result", "Null Result"), |_| {
        Ok(Box::new(NullResult))
    });
    registry.register(CrawlerDescriptor::new("failing", "Failing"), |_| {
        Ok(Box::new(Failing))
    });
    registry.register(CrawlerDescriptor::new("panicking", "Panicking"), |_| {
        Ok(Box::new(Panicking))
    });
    registry.register(
        CrawlerDescriptor::new("scripted", "Scripted").requires(&["steps"]),
        |params| {
            let steps = params
                .get("steps")
                .and_then(Value::as_array)
                .ok_or_else(|| CrawlerError::invalid_param("steps", "must be an array"))?
                .iter()
                .filter_map(Value::as_i64)
                .map(|s| s as i32)
                .collect();
            Ok(Box::new(Scripted { steps }))
        },
    );
    let gate = gate.clone();
    registry.register(CrawlerDescriptor::new("gated", "Gated"), move |_| {
        Ok(Box::new(Gated { gate: gate.clone() }))
    });
}
