// HTTP routes
pub mod crawlers;
pub mod health;
pub mod stats;
pub mod tasks;
pub mod ws;

pub use crawlers::*;
pub use health::*;
pub use stats::*;
pub use tasks::*;
pub use ws::*;
