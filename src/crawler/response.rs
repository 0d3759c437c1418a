use scraper::{Html, Selector};
use serde::Serialize;
use std::sync::{Arc, OnceLock};

use crate::browser::driver::{DriverError, DriverHandle};
use crate::crawler::navigate::{HtmlIntegrity, PageDatum};
use crate::crawler::task::FetchTask;
use crate::protocol::{ProtocolStatus, RetryScope};

/// The finalised result of one fetch attempt, immutable once built
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    datum: PageDatum,
}

impl Response {
    pub fn new(datum: PageDatum) -> Self {
        Self { datum }
    }

    /// A response without content, carrying only a status
    pub fn with_status(task: &FetchTask, status: ProtocolStatus) -> Self {
        let mut datum = PageDatum::new(task.url.clone());
        datum.protocol_status = status;
        Self::new(datum)
    }

    pub fn canceled(task: &FetchTask, reason: impl Into<String>) -> Self {
        Self::with_status(task, ProtocolStatus::cancel(reason))
    }

    /// The browser identity is burned, the caller should rotate it and retry
    pub fn privacy_retry(task: &FetchTask, reason: impl Into<String>) -> Self {
        Self::with_status(task, ProtocolStatus::retry(RetryScope::Privacy, reason))
    }

    pub fn crawl_retry(task: &FetchTask, reason: impl Into<String>) -> Self {
        Self::with_status(task, ProtocolStatus::retry(RetryScope::Crawl, reason))
    }

    pub fn status(&self) -> &ProtocolStatus {
        &self.datum.protocol_status
    }

    pub fn datum(&self) -> &PageDatum {
        &self.datum
    }

    pub fn content(&self) -> &[u8] {
        &self.datum.content
    }

    pub fn into_datum(self) -> PageDatum {
        self.datum
    }
}

/// What the engine hands back to the caller for one task
#[derive(Debug)]
pub struct FetchResult {
    pub task: Arc<FetchTask>,
    pub response: Response,
    /// The driver failure that ended the attempt, if any
    pub exception: Option<DriverError>,
}

impl FetchResult {
    pub fn new(task: Arc<FetchTask>, response: Response) -> Self {
        Self { task, response, exception: None }
    }

    pub fn with_exception(task: Arc<FetchTask>, response: Response, exception: DriverError) -> Self {
        Self { task, response, exception: Some(exception) }
    }

    pub fn canceled(task: Arc<FetchTask>, reason: impl Into<String>) -> Self {
        let response = Response::canceled(&task, reason);
        Self::new(task, response)
    }

    pub fn status(&self) -> &ProtocolStatus {
        self.response.status()
    }
}

/// What happened to the driver handle passed to the engine
#[derive(Debug)]
pub enum DriverDisposition<D> {
    /// The handle is healthy and goes back to its pool
    Released(D),
    /// The handle was retired and dropped, it must not be used again
    Retired,
}

/// A fetch result together with the driver handle, if it survived
#[derive(Debug)]
pub struct BrowseOutcome<D: DriverHandle> {
    pub result: FetchResult,
    pub driver: DriverDisposition<D>,
}

impl<D: DriverHandle> BrowseOutcome<D> {
    pub fn released(result: FetchResult, driver: D) -> Self {
        Self { result, driver: DriverDisposition::Released(driver) }
    }

    pub fn retired(result: FetchResult) -> Self {
        Self { result, driver: DriverDisposition::Retired }
    }

    pub fn is_driver_retired(&self) -> bool {
        matches!(self.driver, DriverDisposition::Retired)
    }

    pub fn into_driver(self) -> Option<D> {
        match self.driver {
            DriverDisposition::Released(driver) => Some(driver),
            DriverDisposition::Retired => None,
        }
    }
}

/// Check that a page source is a document with a non-empty body
pub fn check_html_integrity(page_source: &str) -> HtmlIntegrity {
    static BODY: OnceLock<Option<Selector>> = OnceLock::new();

    if page_source.trim().is_empty() {
        return HtmlIntegrity::Empty;
    }

    let Some(selector) = BODY.get_or_init(|| Selector::parse("body").ok()).as_ref() else {
        return HtmlIntegrity::Ok;
    };

    let document = Html::parse_document(page_source);
    let has_content = document
        .select(selector)
        .next()
        .map_or(false, |body| !body.inner_html().trim().is_empty());

    if has_content {
        HtmlIntegrity::Ok
    } else {
        HtmlIntegrity::EmptyBody
    }
}
