//! Crawler registry for validating and instantiating strategies.
//!
//! The registry maps crawler type names (e.g., "jobs") to:
//! - A descriptor listing the parameters the crawler accepts
//! - A factory that parses those parameters and builds the strategy
//!
//! Each factory captures its own dependencies (fetch client, browser pool),
//! so dispatch never branches on the crawler type.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::strategy::{CrawlerError, CrawlerStrategy};

type BoxedFactory = Box<
    dyn Fn(&Map<String, Value>) -> Result<Box<dyn CrawlerStrategy>, CrawlerError> + Send + Sync,
>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown crawler type: {0}")]
    UnknownCrawlerType(String),

    #[error("invalid params for {crawler_type}: {reason}")]
    InvalidParams { crawler_type: String, reason: String },
}

/// Static description of a registered crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub parameters: Vec<String>,
    pub optional_parameters: Vec<String>,
    pub status: String,
}

impl CrawlerDescriptor {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            parameters: Vec::new(),
            optional_parameters: Vec::new(),
            status: "active".to_string(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn requires(mut self, names: &[&str]) -> Self {
        self.parameters = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn accepts(mut self, names: &[&str]) -> Self {
        self.optional_parameters = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

struct CrawlerRegistration {
    descriptor: CrawlerDescriptor,
    factory: BoxedFactory,
}

/// Registry mapping crawler type names to strategy factories.
///
/// # Example
///
/// ```ignore
/// let mut registry = CrawlerRegistry::new();
/// let fetch = fetch_client.clone();
/// registry.register(
///     CrawlerDescriptor::new("jobs", "Remote Jobs").accepts(&["category", "search"]),
///     move |params| Ok(Box::new(RemoteJobsCrawler::from_params(&fetch, params)?)),
/// );
///
/// let strategy = registry.instantiate("jobs", &json!({"category": "software-dev"}))?;
/// ```
#[derive(Default)]
pub struct CrawlerRegistry {
    registrations: HashMap<String, CrawlerRegistration>,
}

impl CrawlerRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a crawler under `descriptor.name`, replacing any previous one.
    pub fn register<F>(&mut self, descriptor: CrawlerDescriptor, factory: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn CrawlerStrategy>, CrawlerError>
            + Send
            + Sync
            + 'static,
    {
        self.registrations.insert(
            descriptor.name.clone(),
            CrawlerRegistration {
                descriptor,
                factory: Box::new(factory),
            },
        );
    }

    pub fn describe(&self, name: &str) -> Option<&CrawlerDescriptor> {
        self.registrations.get(name).map(|r| &r.descriptor)
    }

    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<CrawlerDescriptor> {
        let mut descriptors: Vec<CrawlerDescriptor> = self
            .registrations
            .values()
            .map(|r| r.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registrations.contains_key(name)
    }

    /// Submission-time check: known type, object params, required keys present.
    pub fn validate(&self, name: &str, params: &Value) -> Result<&CrawlerDescriptor, RegistryError> {
        let registration = self.registration(name)?;
        let params = as_object(name, params)?;

        let missing: Vec<&str> = registration
            .descriptor
            .parameters
            .iter()
            .filter(|p| params.get(p.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(RegistryError::InvalidParams {
                crawler_type: name.to_string(),
                reason: format!("missing required parameter(s): {}", missing.join(", ")),
            });
        }

        Ok(&registration.descriptor)
    }

    /// Build a strategy for `name`, letting its factory parse `params`.
    pub fn instantiate(
        &self,
        name: &str,
        params: &Value,
    ) -> Result<Box<dyn CrawlerStrategy>, RegistryError> {
        self.validate(name, params)?;
        let registration = self.registration(name)?;
        let params = as_object(name, params)?;

        (registration.factory)(params).map_err(|e| RegistryError::InvalidParams {
            crawler_type: name.to_string(),
            reason: e.to_string(),
        })
    }

    fn registration(&self, name: &str) -> Result<&CrawlerRegistration, RegistryError> {
        self.registrations
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCrawlerType(name.to_string()))
    }
}

fn as_object<'a>(name: &str, params: &'a Value) -> Result<&'a Map<String, Value>, RegistryError> {
    params.as_object().ok_or_else(|| RegistryError::InvalidParams {
        crawler_type: name.to_string(),
        reason: "params must be a JSON object".to_string(),
    })
}

/// Thread-safe registry wrapped in Arc.
pub type SharedCrawlerRegistry = Arc<CrawlerRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tasks::ProgressEmitter;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo {
        symbol: String,
    }

    #[async_trait]
    impl CrawlerStrategy for Echo {
        async fn run(&mut self, _progress: ProgressEmitter) -> Result<Value, CrawlerError> {
            Ok(json!({ "symbol": self.symbol }))
        }
    }

    fn registry() -> CrawlerRegistry {
        let mut registry = CrawlerRegistry::new();
        registry.register(
            CrawlerDescriptor::new("quote", "Stock Quote")
                .description("Daily quote for a ticker")
                .requires(&["symbol"])
                .accepts(&["period"]),
            |params| {
                let symbol = params
                    .get("symbol")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CrawlerError::invalid_param("symbol", "must be a string"))?;
                Ok(Box::new(Echo {
                    symbol: symbol.to_string(),
                }))
            },
        );
        registry.register(CrawlerDescriptor::new("alpha", "Alpha"), |_| {
            Ok(Box::new(Echo {
                symbol: "A".into(),
            }))
        });
        registry
    }

    #[test]
    fn test_describe_and_list() {
        let registry = registry();

        let descriptor = registry.describe("quote").unwrap();
        assert_eq!(descriptor.parameters, vec!["symbol"]);
        assert_eq!(descriptor.optional_parameters, vec!["period"]);
        assert_eq!(descriptor.status, "active");
        assert!(registry.describe("missing").is_none());

        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "quote"]);
    }

    #[test]
    fn test_unknown_crawler_type() {
        let err = registry().validate("nope", &json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownCrawlerType(ref name) if name == "nope"));
    }

    #[test]
    fn test_missing_required_parameter() {
        let registry = registry();
        let err = registry.validate("quote", &json!({"period": "1d"})).unwrap_err();
        assert!(err.to_string().contains("symbol"));

        let err = registry.validate("quote", &json!({"symbol": null})).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParams { .. }));
    }

    #[test]
    fn test_params_must_be_object() {
        let err = registry().validate("alpha", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParams { .. }));
    }

    #[test]
    fn test_factory_errors_surface_as_invalid_params() {
        let err = registry()
            .instantiate("quote", &json!({"symbol": 42}))
            .err()
            .unwrap();
        assert!(err.to_string().contains("must be a string"));
    }

    #[tokio::test]
    async fn test_instantiate_builds_strategy_from_params() {
        let registry = registry();
        let mut strategy = registry.instantiate("quote", &json!({"symbol": "AAPL"})).unwrap();

        let emitter = crate::kernel::test_dependencies::RecordingSink::new().emitter();
        let result = strategy.run(emitter).await.unwrap();
        assert_eq!(result, json!({"symbol": "AAPL"}));
    }
}
