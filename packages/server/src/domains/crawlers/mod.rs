//! Built-in crawler strategies.
//!
//! Each crawler module exposes a `descriptor()` and a `from_params`
//! constructor; [`register_default_crawlers`] wires them into a registry.

pub mod jobs;
pub mod movies;
mod params;
pub mod rendered_page;

use fetch_client::FetchClient;

use crate::kernel::browser_pool::BrowserPool;
use crate::kernel::tasks::CrawlerRegistry;

pub use jobs::RemoteJobsCrawler;
pub use movies::TopMoviesCrawler;
pub use rendered_page::RenderedPageCrawler;

pub fn register_default_crawlers(
    registry: &mut CrawlerRegistry,
    fetch: &FetchClient,
    browsers: &BrowserPool,
) {
    let client = fetch.clone();
    registry.register(jobs::descriptor(), move |params| {
        Ok(Box::new(RemoteJobsCrawler::from_params(&client, params)?))
    });

    let client = fetch.clone();
    registry.register(movies::descriptor(), move |params| {
        Ok(Box::new(TopMoviesCrawler::from_params(&client, params)?))
    });

    let pool = browsers.clone();
    registry.register(rendered_page::descriptor(), move |params| {
        Ok(Box::new(RenderedPageCrawler::from_params(&pool, params)?))
    });
}
