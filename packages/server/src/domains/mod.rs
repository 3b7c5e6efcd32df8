// Business domains
pub mod crawlers;
