use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::browser::driver::DriverHandle;
use crate::cli::config::InteractSettings;
use crate::crawler::task::FetchTask;
use crate::protocol::ProtocolStatus;

/// Whether the remaining phases of an interaction should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Continue,
    Break,
}

impl FlowState {
    pub fn is_continue(&self) -> bool {
        *self == FlowState::Continue
    }
}

/// Urls the page reports about itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveDomUrls {
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(rename = "baseURI")]
    pub base_uri: Option<String>,
    pub location: Option<String>,
    pub referrer: Option<String>,
}

/// Structured result of the DOM feature script, passed through unmodified
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveDomMessage {
    pub trace: Option<Value>,
    pub urls: Option<ActiveDomUrls>,
    pub metadata: Option<Value>,
}

impl ActiveDomMessage {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// A message describing an error page rendered by the browser
    pub fn from_browser_error(message: &str) -> Self {
        Self {
            trace: None,
            urls: None,
            metadata: Some(serde_json::json!({ "browserError": message })),
        }
    }
}

/// Polling counters of one attempt, kept for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTrace {
    pub script_injected: bool,
    pub script_injection_rounds: u32,
    pub ready_rounds: u32,
    pub scroll_steps: usize,
    pub selector_rounds: u32,
}

/// Outcome of the interaction phase.
///
/// Once `state` is `Break` no later phase touches the page; only the result
/// is finalised.
#[derive(Debug, Clone)]
pub struct InteractResult {
    pub protocol_status: ProtocolStatus,
    pub active_dom_message: Option<ActiveDomMessage>,
    pub state: FlowState,
    pub trace: FetchTrace,
}

impl InteractResult {
    pub fn success() -> Self {
        Self {
            protocol_status: ProtocolStatus::success(),
            active_dom_message: None,
            state: FlowState::Continue,
            trace: FetchTrace::default(),
        }
    }

    /// Stop the remaining phases with the given status
    pub fn interrupt(&mut self, status: ProtocolStatus) {
        self.protocol_status = status;
        self.state = FlowState::Break;
    }
}

/// HTML integrity of a page source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtmlIntegrity {
    #[default]
    Ok,
    Empty,
    EmptyBody,
}

impl HtmlIntegrity {
    pub fn is_ok(&self) -> bool {
        *self == HtmlIntegrity::Ok
    }
}

/// Everything that becomes the persisted page record
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageDatum {
    pub url: String,
    pub location: Option<String>,
    pub base_uri: Option<String>,
    pub protocol_status: ProtocolStatus,
    pub headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub content: Vec<u8>,
    /// Length of the page source before any post-processing
    pub original_content_length: usize,
    pub html_integrity: HtmlIntegrity,
    pub active_dom_stat_trace: Option<Value>,
    pub active_dom_urls: Option<ActiveDomUrls>,
    pub active_dom_metadata: Option<Value>,
    pub last_browser: Option<String>,
    pub trace: FetchTrace,
}

impl PageDatum {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }
}

/// State of one fetch attempt. A retry builds a new one.
pub struct NavigateTask<'a, D: DriverHandle> {
    pub fetch_task: Arc<FetchTask>,
    pub driver: &'a D,
    pub page_source: String,
    pub original_content_length: usize,
    pub page_datum: PageDatum,
    pub interact_settings: InteractSettings,
    /// Skip DOM feature computation for this attempt
    pub ignore_dom_features: bool,
}

impl<'a, D: DriverHandle> NavigateTask<'a, D> {
    pub fn new(fetch_task: Arc<FetchTask>, driver: &'a D, interact_settings: InteractSettings) -> Self {
        let page_datum = PageDatum::new(fetch_task.url.clone());
        let ignore_dom_features = fetch_task.options.ignore_dom_features;

        Self {
            fetch_task,
            driver,
            page_source: String::new(),
            original_content_length: 0,
            page_datum,
            interact_settings,
            ignore_dom_features,
        }
    }

    pub fn url(&self) -> &str {
        &self.fetch_task.url
    }
}

/// The view of an attempt used while interacting with the page
pub struct InteractTask<'n, 'a, D: DriverHandle> {
    pub navigate_task: &'n mut NavigateTask<'a, D>,
    pub settings: InteractSettings,
}

impl<'n, 'a, D: DriverHandle> InteractTask<'n, 'a, D> {
    pub fn new(navigate_task: &'n mut NavigateTask<'a, D>) -> Self {
        let settings = navigate_task.interact_settings.clone();
        Self { navigate_task, settings }
    }

    pub fn driver(&self) -> &'a D {
        self.navigate_task.driver
    }

    pub fn url(&self) -> &str {
        self.navigate_task.url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_active_dom_message() {
        let json = r#"{"trace":{"ni":3,"na":10},"urls":{"URL":"https://a.com/","baseURI":"https://a.com/","location":"https://a.com/x","referrer":""},"metadata":{"title":"A"}}"#;
        let message = ActiveDomMessage::from_json(json).unwrap();
        let urls = message.urls.unwrap();
        assert_eq!(urls.location.as_deref(), Some("https://a.com/x"));
        assert_eq!(urls.base_uri.as_deref(), Some("https://a.com/"));
        assert_eq!(message.trace.unwrap()["ni"], 3);
    }

    #[test]
    fn test_interrupt_breaks_flow() {
        let mut result = InteractResult::success();
        assert!(result.state.is_continue());
        result.interrupt(ProtocolStatus::cancel("stop"));
        assert_eq!(result.state, FlowState::Break);
        assert!(result.protocol_status.is_canceled());
    }
}
