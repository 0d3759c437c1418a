use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a driver handle
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver was cancelled by its pool, all tasks on it should run again
    #[error("web driver #{0} is canceled")]
    Cancelled(u64),

    /// The driver is in a state it can not recover from
    #[error("illegal web driver state: {0}")]
    IllegalState(String),

    /// The connection to the browser failed
    #[error("web driver transport failure: {0}")]
    Transport(String),

    #[error("web driver timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Where to navigate, with the metadata the browser should see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateEntry {
    /// The url actually loaded, the href when the task has one
    pub url: String,
    /// The url the task was created for
    pub page_url: String,
    pub referrer: Option<String>,
}

impl NavigateEntry {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            page_url: url.clone(),
            url,
            referrer: None,
        }
    }
}

/// Result of evaluating a script, with the page-side exception if one was thrown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluateDetail {
    pub value: Option<Value>,
    pub exception: Option<String>,
}

/// A resource loaded without rendering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceResponse {
    pub status_code: i32,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// One controllable browser tab, handed out by a driver pool.
///
/// Implementations report liveness through [`DriverHandle::is_canceled`] and
/// [`DriverHandle::is_quit`]; the engine checks both at every phase boundary.
/// A retired handle is never used again: the engine calls `retire` and drops
/// its ownership in the same step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DriverHandle: Send + Sync {
    fn id(&self) -> u64;

    fn browser_type(&self) -> String;

    /// False for drivers that can only load pages, not run scripts
    fn supports_javascript(&self) -> bool;

    fn is_canceled(&self) -> bool;

    fn is_quit(&self) -> bool;

    async fn navigate_to(&self, entry: &NavigateEntry) -> Result<(), DriverError>;

    /// Evaluate an expression, `Value::Null` for undefined results
    async fn evaluate(&self, expression: &str) -> Result<Value, DriverError>;

    /// Evaluate a script, reporting page-side exceptions instead of failing
    async fn evaluate_detail(&self, script: &str) -> Result<EvaluateDetail, DriverError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;

    async fn exists(&self, selector: &str) -> Result<bool, DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError>;

    async fn first_text(&self, selector: &str) -> Result<Option<String>, DriverError>;

    async fn scroll_down(&self, count: u32) -> Result<(), DriverError>;

    async fn scroll_to_top(&self) -> Result<(), DriverError>;

    /// Scroll so that the given ratio of the page height is in the middle of the viewport
    async fn scroll_to_middle(&self, ratio: f64) -> Result<(), DriverError>;

    async fn bring_to_front(&self) -> Result<(), DriverError>;

    async fn page_source(&self) -> Result<Option<String>, DriverError>;

    /// Status code of the main document response, if the driver knows it
    async fn main_response_status(&self) -> Result<Option<i32>, DriverError>;

    async fn load_resource(&self, url: &str) -> Result<ResourceResponse, DriverError>;

    /// Stop all pending navigation and loading in the tab
    async fn stop(&self) -> Result<(), DriverError>;

    /// Take the driver out of service for good
    fn retire(&self);
}

/// Retire a driver and give up ownership of it
pub fn retire_driver<D: DriverHandle>(driver: D) {
    driver.retire();
    drop(driver);
}

/// Whether a script result counts as an answer
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("ready")));
        assert!(is_truthy(&json!({"ni": 10})));
        assert!(is_truthy(&json!(true)));
    }

    #[test]
    fn test_retire_driver_consumes_handle() {
        let mut driver = MockDriverHandle::new();
        driver.expect_retire().times(1).return_const(());
        retire_driver(driver);
    }
}
