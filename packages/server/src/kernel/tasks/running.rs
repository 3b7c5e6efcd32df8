use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Cancellation handles of the tasks executing in this process.
#[derive(Clone, Default)]
pub struct RunningTasks {
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and hand back the token its strategy will observe.
    pub async fn insert(&self, task_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(task_id, token.clone());
        token
    }

    /// Signal the task's strategy. Returns `false` if it is not running here.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        match self.tokens.read().await.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, task_id: Uuid) {
        self.tokens.write().await.remove(&task_id);
    }

    pub async fn contains(&self, task_id: Uuid) -> bool {
        self.tokens.read().await.contains_key(&task_id)
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}
