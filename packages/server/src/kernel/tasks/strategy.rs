//! The uniform contract every crawler implements.

use std::sync::Arc;

use async_trait::async_trait;
use fetch_client::{FetchError, TerminalFetchError};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::kernel::browser_pool::BrowserError;

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("no data found: {0}")]
    NoData(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Terminal(#[from] TerminalFetchError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("task was cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl CrawlerError {
    pub fn invalid_param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        CrawlerError::InvalidParam {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// A crawler's site-specific logic.
///
/// `run` may report progress any number of times, in any order; the
/// supervisor decides what observers see.
#[async_trait]
pub trait CrawlerStrategy: Send {
    async fn run(&mut self, progress: ProgressEmitter) -> Result<Value, CrawlerError>;
}

/// Where progress reports go.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, percent: i32, message: String) -> Result<(), CrawlerError>;
}

/// Handle a strategy uses to report progress.
///
/// Every `emit` is a cancellation checkpoint: once the task is cancelled or
/// recycled it returns [`CrawlerError::Cancelled`], so `?` stops the strategy.
#[derive(Clone)]
pub struct ProgressEmitter {
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl ProgressEmitter {
    pub fn new(sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
        Self { sink, cancel }
    }

    pub async fn emit(&self, percent: i32, message: impl Into<String>) -> Result<(), CrawlerError> {
        if self.cancel.is_cancelled() {
            return Err(CrawlerError::Cancelled);
        }
        self.sink.emit(percent, message.into()).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the task is cancelled or recycled. Strategies holding
    /// external processes race their work against this.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
