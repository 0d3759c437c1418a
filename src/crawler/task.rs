use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::crawler::events::BrowseEventHandler;

/// Per-task options set by the frontier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Load a single resource without rendering it
    pub resource: bool,

    /// Attach to the page already open in the tab instead of navigating
    pub connect: bool,

    /// Selectors that should be present before the page is considered steady
    pub wait_non_blank: Vec<String>,

    /// Skip DOM feature computation for this task
    pub ignore_dom_features: bool,

    pub max_retries: u32,

    /// The task is dead once this instant has passed
    pub deadline: Option<DateTime<Utc>>,
}

impl FetchOptions {
    /// Parse a comma separated selector list, e.g. from the command line
    pub fn parse_selectors(selectors: &str) -> Vec<String> {
        selectors
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_dead(&self) -> bool {
        self.deadline.map_or(false, |deadline| Utc::now() > deadline)
    }
}

/// One request to fetch a url, created by the frontier per dequeued url.
///
/// The only mutation after creation is cancellation, which any holder of the
/// task may trigger at any time.
pub struct FetchTask {
    pub id: Uuid,

    /// Identifier of the batch this task belongs to
    pub batch_id: String,

    /// The url the page is known by
    pub url: String,

    /// The url to actually load, it has priority over `url` when present
    pub href: Option<String>,

    pub referrer: Option<String>,

    /// Number of the current attempt, starting at 1
    pub attempt: u32,

    pub options: FetchOptions,

    /// Task-specific lifecycle handler, invoked after the global one
    pub handler: Option<Arc<dyn BrowseEventHandler>>,

    canceled: AtomicBool,
}

impl FetchTask {
    pub fn new(batch_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id: batch_id.into(),
            url: url.into(),
            href: None,
            referrer: None,
            attempt: 1,
            options: FetchOptions::default(),
            handler: None,
            canceled: AtomicBool::new(false),
        }
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn BrowseEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// The url to load
    pub fn location(&self) -> &str {
        self.href.as_deref().unwrap_or(&self.url)
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn is_dead(&self) -> bool {
        self.options.is_dead()
    }
}

impl fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchTask")
            .field("id", &self.id)
            .field("batch_id", &self.batch_id)
            .field("url", &self.url)
            .field("href", &self.href)
            .field("attempt", &self.attempt)
            .field("options", &self.options)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
