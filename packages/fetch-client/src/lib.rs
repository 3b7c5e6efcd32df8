//! Rate-limited HTTP fetch client.
//!
//! Wraps outbound requests with a jittered pre-request delay and a small
//! retry loop that separates transient failures (429, 5xx, network) from
//! terminal ones (every other status). Crawlers only ever see either a usable
//! response or an explicit [`FetchError::Exhausted`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use fetch_client::{FetchClient, FetchConfig, FetchRequest};
//!
//! let client = FetchClient::reqwest(FetchConfig::default().with_base_delay(Duration::from_secs(1)))?;
//! let response = client
//!     .fetch(FetchRequest::get("https://example.com/feed").query("page", "2"))
//!     .await?
//!     .error_for_status()?;
//! println!("{}", response.text());
//! ```

pub mod client;
pub mod error;
pub mod mock;
pub mod request;
pub mod transport;

pub use client::{jittered_delay, FetchClient, FetchConfig, USER_AGENTS};
pub use error::{FetchError, TerminalFetchError};
pub use mock::{MockReply, MockTransport};
pub use request::{FetchRequest, FetchResponse};
pub use transport::{ReqwestTransport, Transport};
