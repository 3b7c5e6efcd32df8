//! Scripted transport for tests.
//!
//! Replies are queued per URL (query string excluded) and consumed in order.
//! A sticky reply answers every call once the queue is empty; URLs with no
//! script answer 404.
//!
//! ```rust,ignore
//! let transport = MockTransport::new();
//! transport.push("https://example.com/feed", MockReply::status(503));
//! transport.push("https://example.com/feed", MockReply::json(json!({"jobs": []})));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::FetchError;
use crate::request::{FetchRequest, FetchResponse};
use crate::transport::Transport;

/// One canned outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response { status: u16, body: String },
    NetworkError(String),
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        MockReply::Response {
            status: 200,
            body: body.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn status(status: u16) -> Self {
        MockReply::Response {
            status,
            body: String::new(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        MockReply::NetworkError(message.into())
    }
}

#[derive(Default)]
struct Script {
    queue: VecDeque<MockReply>,
    sticky: Option<MockReply>,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, Script>,
    calls: Vec<FetchRequest>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `url`.
    pub fn push(&self, url: &str, reply: MockReply) {
        self.lock()
            .scripts
            .entry(url.to_string())
            .or_default()
            .queue
            .push_back(reply);
    }

    /// Answer every call to `url` with `reply` once the queue is drained.
    pub fn always(&self, url: &str, reply: MockReply) {
        self.lock().scripts.entry(url.to_string()).or_default().sticky = Some(reply);
    }

    /// Every request sent so far, in order.
    pub fn calls(&self) -> Vec<FetchRequest> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.lock().calls.iter().filter(|r| r.url == url).count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let reply = {
            let mut state = self.lock();
            state.calls.push(request.clone());
            state.scripts.get_mut(&request.url).and_then(|script| {
                script.queue.pop_front().or_else(|| script.sticky.clone())
            })
        };

        match reply {
            Some(MockReply::Response { status, body }) => {
                Ok(FetchResponse::new(request.url.clone(), status, body))
            }
            Some(MockReply::NetworkError(message)) => Err(FetchError::Network {
                url: request.url.clone(),
                message,
            }),
            None => Ok(FetchResponse::new(request.url.clone(), 404, "")),
        }
    }
}
