//! Typed access to a crawler's JSON params.

use serde_json::{Map, Value};

use crate::kernel::tasks::CrawlerError;

/// A string param; blank strings count as absent.
pub fn optional_string(
    params: &Map<String, Value>,
    name: &str,
) -> Result<Option<String>, CrawlerError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(CrawlerError::invalid_param(name, "must be a string")),
    }
}

pub fn required_string(params: &Map<String, Value>, name: &str) -> Result<String, CrawlerError> {
    optional_string(params, name)?.ok_or_else(|| CrawlerError::invalid_param(name, "is required"))
}

/// A non-negative integer param, also accepted as a numeric string.
pub fn optional_u32(params: &Map<String, Value>, name: &str) -> Result<Option<u32>, CrawlerError> {
    let invalid = || CrawlerError::invalid_param(name, "must be a non-negative integer");
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse::<u32>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}
