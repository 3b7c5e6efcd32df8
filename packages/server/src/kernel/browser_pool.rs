//! Bounded pool of headless browser processes.
//!
//! A [`BrowserLease`] holds one pool slot. The slot is released when the lease
//! drops, and a child process is killed when the future awaiting it is
//! dropped, so neither outlives the strategy that started it.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("browser did not finish within {0:?}")]
    Timeout(Duration),

    #[error("browser exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("browser pool is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub binary: String,
    /// Arguments placed before the target URL.
    pub args: Vec<String>,
    pub max_browsers: usize,
    pub page_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            binary: "chromium".to_string(),
            args: [
                "--headless=new",
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--dump-dom",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_browsers: 2,
            page_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Clone)]
pub struct BrowserPool {
    permits: Arc<Semaphore>,
    config: Arc<BrowserConfig>,
}

impl BrowserPool {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_browsers.max(1))),
            config: Arc::new(config),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<BrowserLease, BrowserError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BrowserError::Closed)?;

        Ok(BrowserLease {
            _permit: permit,
            config: Arc::clone(&self.config),
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse further leases; outstanding ones keep working.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// One browser slot.
pub struct BrowserLease {
    _permit: OwnedSemaphorePermit,
    config: Arc<BrowserConfig>,
}

impl BrowserLease {
    /// Render `url` and return the serialized DOM.
    pub async fn dump_dom(&self, url: &str) -> Result<String, BrowserError> {
        let mut command = Command::new(&self.config.binary);
        command
            .args(&self.config.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| BrowserError::Spawn {
            binary: self.config.binary.clone(),
            source,
        })?;
        debug!(url, pid = child.id(), "browser launched");

        let output = match tokio::time::timeout(self.config.page_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(BrowserError::Spawn {
                    binary: self.config.binary.clone(),
                    source,
                })
            }
            Err(_) => {
                warn!(url, timeout = ?self.config.page_timeout, "browser timed out, killed");
                return Err(BrowserError::Timeout(self.config.page_timeout));
            }
        };

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.len() > 500 {
                let mut end = 500;
                while !stderr.is_char_boundary(end) {
                    end -= 1;
                }
                stderr.truncate(end);
            }
            return Err(BrowserError::Exit {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
