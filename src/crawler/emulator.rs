use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::browser::behavior::build_scroll_positions;
use crate::browser::driver::{is_truthy, retire_driver, DriverError, DriverHandle, NavigateEntry};
use crate::browser::resource::HttpResourceLoader;
use crate::cli::config::{FetcherConfig, ResourceLoaderKind};
use crate::crawler::events::{BrowseEvent, BrowseEventBus};
use crate::crawler::navigate::{ActiveDomMessage, HtmlIntegrity, InteractResult, InteractTask, NavigateTask};
use crate::crawler::response::{check_html_integrity, BrowseOutcome, FetchResult, Response};
use crate::crawler::task::FetchTask;
use crate::protocol::translator::is_browser_error_page;
use crate::protocol::{
    translate_browser_error, translate_http_code, ProtocolStatus, RetryScope, INCOMPATIBLE_CODE_START,
};
use crate::utils::metrics::MetricsCollector;

/// Expression telling whether the helper script is installed in the page
const SCRIPT_MARKER_CHECK: &str = "typeof(__fetcher__)";

/// Failures the engine does not classify, the caller has to deal with them
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unclassified driver failure on web driver #{driver_id} | {url}")]
    Unclassified {
        url: String,
        driver_id: u64,
        #[source]
        source: anyhow::Error,
    },
}

/// Why an attempt stopped before producing a response
#[derive(Debug, Error)]
enum BrowseError {
    #[error("task is canceled: {0}")]
    TaskCanceled(String),

    #[error("interactive emulator is closed")]
    EmulatorClosed,

    #[error("{step} exceeded its budget of {budget:?}")]
    Timeout { step: &'static str, budget: Duration },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Drives a browser tab through navigation, interaction and teardown for one
/// task at a time, and turns every expected failure into a status.
///
/// The engine is shared by all concurrent attempts. It keeps no state across
/// attempts apart from metrics and the scroll jitter generator.
pub struct InteractiveEmulator {
    config: FetcherConfig,

    events: BrowseEventBus,

    metrics: MetricsCollector,

    /// Cancelled when the engine closes, in-flight attempts stop at their next phase
    shutdown: CancellationToken,

    /// Loader for resource tasks when the http loader is selected
    resource_loader: Option<HttpResourceLoader>,

    scroll_rng: Mutex<StdRng>,
}

impl InteractiveEmulator {
    pub fn new(config: FetcherConfig, events: BrowseEventBus, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let resource_loader = match config.engine.resource_loader {
            ResourceLoaderKind::Http => Some(HttpResourceLoader::new(
                config.browser.user_agent.as_deref(),
                config.interact.page_load_timeout(),
            )?),
            ResourceLoaderKind::Driver => None,
        };

        Ok(Self {
            config,
            events,
            metrics: MetricsCollector::new(),
            shutdown,
            resource_loader,
            scroll_rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Make the scroll jitter reproducible
    pub fn with_scroll_seed(mut self, seed: u64) -> Self {
        self.scroll_rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Close the engine; attempts in flight end canceled
    pub fn close(&self) {
        if self.is_active() {
            info!("Closing interactive emulator");
            self.shutdown.cancel();
        }
    }

    /// Cancel a task, it stops at its next phase boundary
    pub async fn cancel(&self, task: &FetchTask) {
        self.metrics.record_cancel().await;
        task.cancel();
    }

    /// Fetch one task with the given driver.
    ///
    /// Expected failures come back as a result with a non-success status. The
    /// driver comes back too unless it had to be retired.
    pub async fn execute<D: DriverHandle>(
        &self,
        task: Arc<FetchTask>,
        driver: D,
    ) -> Result<BrowseOutcome<D>, FetchError> {
        if !self.is_active() {
            return Ok(BrowseOutcome::released(FetchResult::canceled(task, "Inactive interactive emulator"), driver));
        }

        if task.is_canceled() {
            return Ok(BrowseOutcome::released(FetchResult::canceled(task, "Task is canceled"), driver));
        }

        if task.is_dead() {
            info!("Task is dead before it is fetched | {}", task.url);
            return Ok(BrowseOutcome::released(FetchResult::canceled(task, "Task deadline exceeded"), driver));
        }

        let timer = self.metrics.start_timer();
        let attempt = {
            let mut navigate_task = NavigateTask::new(task.clone(), &driver, self.config.interact.clone());
            if task.options.resource {
                self.load_resource_without_rendering(&mut navigate_task).await
            } else {
                self.browse_with_cancellation_handled(&mut navigate_task).await
            }
        };

        let outcome = self.handle_attempt(task, driver, attempt).await?;

        let status = outcome.result.status();
        self.metrics.record_fetch(
            &outcome.result.task.url,
            status.is_success(),
            status.name(),
            timer.end(),
            outcome.result.response.content().len(),
        ).await;

        Ok(outcome)
    }

    async fn handle_attempt<D: DriverHandle>(
        &self,
        task: Arc<FetchTask>,
        driver: D,
        attempt: Result<Response, BrowseError>,
    ) -> Result<BrowseOutcome<D>, FetchError> {
        let error = match attempt {
            Ok(response) => return Ok(BrowseOutcome::released(FetchResult::new(task, response), driver)),
            Err(error) => error,
        };

        match error {
            BrowseError::TaskCanceled(reason) => {
                debug!("Task is canceled during fetch | {}", task.url);
                Ok(BrowseOutcome::released(FetchResult::canceled(task, reason), driver))
            }
            BrowseError::EmulatorClosed => {
                Ok(BrowseOutcome::released(FetchResult::canceled(task, "Interactive emulator is closed"), driver))
            }
            BrowseError::Timeout { step, budget } => {
                warn!("Timeout in {} after {:?}, retry is supposed | {}", step, budget, task.url);
                let response = Response::crawl_retry(&task, format!("Timeout in {}", step));
                Ok(BrowseOutcome::released(FetchResult::new(task, response), driver))
            }
            BrowseError::Driver(e) => self.handle_driver_error(task, driver, e).await,
        }
    }

    async fn handle_driver_error<D: DriverHandle>(
        &self,
        task: Arc<FetchTask>,
        driver: D,
        error: DriverError,
    ) -> Result<BrowseOutcome<D>, FetchError> {
        match error {
            DriverError::Cancelled(id) => {
                debug!("Web driver #{} is canceled, task is canceled | {}", id, task.url);
                Ok(BrowseOutcome::released(FetchResult::canceled(task, "Web driver is canceled"), driver))
            }
            DriverError::IllegalState(_) => {
                if self.is_active() {
                    info!("Dismissing illegal web driver #{} | {} | {}", driver.id(), error, task.url);
                }
                retire_driver(driver);
                self.metrics.record_retired_driver().await;

                let response = Response::privacy_retry(&task, "Illegal web driver state");
                Ok(BrowseOutcome::retired(FetchResult::with_exception(task, response, error)))
            }
            DriverError::Transport(_) => {
                warn!("Web driver #{} is disconnected | {} | {}", driver.id(), error, task.url);
                retire_driver(driver);
                self.metrics.record_retired_driver().await;

                let response = Response::crawl_retry(&task, "Web driver is disconnected");
                Ok(BrowseOutcome::retired(FetchResult::with_exception(task, response, error)))
            }
            DriverError::Timeout(_) => {
                warn!("Web driver #{} timed out | {} | {}", driver.id(), error, task.url);
                let response = Response::crawl_retry(&task, "Web driver timeout");
                Ok(BrowseOutcome::released(FetchResult::with_exception(task, response, error), driver))
            }
            DriverError::Other(source) => {
                warn!("Unexpected failure on web driver #{} | {}", driver.id(), task.url);
                Err(FetchError::Unclassified {
                    url: task.url.clone(),
                    driver_id: driver.id(),
                    source,
                })
            }
        }
    }

    /// Liveness of the engine, the driver and the task, checked at every phase boundary
    fn check_state<D: DriverHandle>(&self, task: &FetchTask, driver: &D) -> Result<(), BrowseError> {
        if !self.is_active() {
            return Err(BrowseError::EmulatorClosed);
        }

        if driver.is_canceled() || driver.is_quit() {
            return Err(DriverError::Cancelled(driver.id()).into());
        }

        if task.is_canceled() {
            return Err(BrowseError::TaskCanceled("Task is canceled".to_string()));
        }

        Ok(())
    }

    async fn emit<D: DriverHandle>(&self, event: BrowseEvent, navigate_task: &NavigateTask<'_, D>) {
        self.events.emit(event, &navigate_task.fetch_task, navigate_task.driver).await;
    }

    async fn check_and_emit<D: DriverHandle>(
        &self,
        event: BrowseEvent,
        navigate_task: &NavigateTask<'_, D>,
    ) -> Result<(), BrowseError> {
        self.check_state(&navigate_task.fetch_task, navigate_task.driver)?;
        self.emit(event, navigate_task).await;
        Ok(())
    }

    async fn load_resource_without_rendering<D: DriverHandle>(
        &self,
        navigate_task: &mut NavigateTask<'_, D>,
    ) -> Result<Response, BrowseError> {
        let task = navigate_task.fetch_task.clone();
        let driver = navigate_task.driver;
        self.check_state(&task, driver)?;

        let response = match (&self.resource_loader, self.config.engine.resource_loader) {
            (Some(loader), ResourceLoaderKind::Http) => {
                loader.load(task.location(), task.referrer.as_deref()).await?
            }
            _ => {
                if let Some(referrer) = &task.referrer {
                    driver.navigate_to(&NavigateEntry::new(referrer.clone())).await?;
                    driver.wait_for_selector("body", self.config.engine.referrer_wait()).await?;
                }
                driver.load_resource(task.location()).await?
            }
        };

        navigate_task.original_content_length = response.body.len();
        navigate_task.page_source = self.preprocess_page_content(task.location(), Some(response.body));

        let datum = &mut navigate_task.page_datum;
        datum.protocol_status = translate_http_code(response.status_code);
        datum.headers = response.headers;
        datum.content = navigate_task.page_source.as_bytes().to_vec();

        Ok(self.create_response_with_datum(navigate_task))
    }

    async fn browse_with_cancellation_handled<D: DriverHandle>(
        &self,
        navigate_task: &mut NavigateTask<'_, D>,
    ) -> Result<Response, BrowseError> {
        self.check_state(&navigate_task.fetch_task, navigate_task.driver)?;

        let response = self.browse_with_driver(navigate_task).await?;

        self.check_and_emit(BrowseEvent::WillStopTab, navigate_task).await?;
        navigate_task.driver.stop().await?;
        self.emit(BrowseEvent::TabStopped, navigate_task).await;

        Ok(response)
    }

    async fn browse_with_driver<D: DriverHandle>(
        &self,
        navigate_task: &mut NavigateTask<'_, D>,
    ) -> Result<Response, BrowseError> {
        let interact_result = if navigate_task.fetch_task.options.connect {
            self.connect(navigate_task).await?
        } else {
            self.navigate_and_interact(navigate_task).await?
        };

        let driver = navigate_task.driver;
        let http_code = driver.main_response_status().await?;
        let status = reconcile_status(http_code, &interact_result.protocol_status);

        let datum = &mut navigate_task.page_datum;
        datum.protocol_status = status;
        datum.trace = interact_result.trace;
        if let Some(message) = interact_result.active_dom_message {
            datum.active_dom_stat_trace = message.trace;
            datum.active_dom_urls = message.urls;
            datum.active_dom_metadata = message.metadata;
        }

        let content = driver.page_source().await?;
        if navigate_task.original_content_length == 0 {
            navigate_task.original_content_length = content.as_ref().map_or(0, String::len);
        }
        navigate_task.page_source = self.preprocess_page_content(navigate_task.url(), content);

        Ok(self.create_response(navigate_task))
    }

    /// Attach to the page already open in the tab
    async fn connect<D: DriverHandle>(&self, navigate_task: &mut NavigateTask<'_, D>) -> Result<InteractResult, BrowseError> {
        navigate_task.ignore_dom_features = true;

        self.check_state(&navigate_task.fetch_task, navigate_task.driver)?;
        self.update_meta_infos(navigate_task).await?;
        navigate_task.original_content_length = self.page_source_length(navigate_task).await?;

        Ok(InteractResult::success())
    }

    async fn navigate_and_interact<D: DriverHandle>(
        &self,
        navigate_task: &mut NavigateTask<'_, D>,
    ) -> Result<InteractResult, BrowseError> {
        let task = navigate_task.fetch_task.clone();
        let driver = navigate_task.driver;

        trace!(
            "Navigating | attempt {} | driver #{} | batch {} | {}",
            task.attempt, driver.id(), task.batch_id, task.location()
        );

        self.check_and_emit(BrowseEvent::WillNavigate, navigate_task).await?;
        self.metrics.record_navigate().await;

        let entry = NavigateEntry {
            url: task.location().to_string(),
            page_url: task.url.clone(),
            referrer: task.referrer.clone(),
        };
        let navigated = driver.navigate_to(&entry).await;
        self.emit(BrowseEvent::Navigated, navigate_task).await;
        navigated?;

        if !driver.supports_javascript() {
            return Ok(InteractResult::success());
        }

        self.check_and_emit(BrowseEvent::WillInteract, navigate_task).await?;

        let mut interact_task = InteractTask::new(navigate_task);
        let result = if self.config.engine.startup_script_enabled {
            self.interact(&mut interact_task).await
        } else {
            self.interact_no_script(&mut interact_task).await
        };

        self.emit(BrowseEvent::DidInteract, navigate_task).await;

        result
    }

    async fn interact<D: DriverHandle>(&self, it: &mut InteractTask<'_, '_, D>) -> Result<InteractResult, BrowseError> {
        let mut result = InteractResult::success();

        self.check_and_emit(BrowseEvent::WillCheckDocumentState, it.navigate_task).await?;

        let has_script = self.wait_for_javascript_injected(it, &mut result).await?;
        if has_script {
            self.wait_for_document_fully_loaded(it, &mut result).await?;
        }

        if result.state.is_continue() {
            self.check_and_emit(BrowseEvent::DocumentFullyLoaded, it.navigate_task).await?;
        }

        if result.state.is_continue() {
            self.check_and_emit(BrowseEvent::WillScroll, it.navigate_task).await?;
            let scrolled = if has_script {
                self.scroll_on_page(it, &mut result).await
            } else {
                Ok(())
            };
            self.emit(BrowseEvent::DidScroll, it.navigate_task).await;
            scrolled?;
        }

        let selectors = it.navigate_task.fetch_task.options.wait_non_blank.clone();
        if result.state.is_continue() && has_script && !selectors.is_empty() {
            self.wait_for_elements(it, &selectors, &mut result).await?;
        }

        if result.state.is_continue() {
            self.update_meta_infos(it.navigate_task).await?;
            self.check_and_emit(BrowseEvent::DocumentSteady, it.navigate_task).await?;
        }

        it.navigate_task.original_content_length = self.page_source_length(it.navigate_task).await?;

        if result.state.is_continue() {
            self.check_and_emit(BrowseEvent::WillComputeFeature, it.navigate_task).await?;
            let computed = if has_script && !it.navigate_task.ignore_dom_features {
                self.compute_document_features(it, &mut result).await
            } else {
                Ok(())
            };
            self.emit(BrowseEvent::FeatureComputed, it.navigate_task).await;
            computed?;
        }

        Ok(result)
    }

    /// Poll the page source until it is long enough, for pages fetched without the helper script
    async fn interact_no_script<D: DriverHandle>(
        &self,
        it: &mut InteractTask<'_, '_, D>,
    ) -> Result<InteractResult, BrowseError> {
        let engine = &self.config.engine;

        let mut round = 0;
        while round < engine.no_script_rounds {
            round += 1;
            self.check_state(&it.navigate_task.fetch_task, it.driver())?;

            let length = self.page_source_length(it.navigate_task).await?;
            if length >= engine.no_script_min_source_length {
                break;
            }

            sleep(engine.no_script_interval()).await;
        }

        debug!("Page source polled for {} rounds | {}", round, it.url());
        let mut result = InteractResult::success();
        result.trace.ready_rounds = round;
        Ok(result)
    }

    async fn wait_for_javascript_injected<D: DriverHandle>(
        &self,
        it: &mut InteractTask<'_, '_, D>,
        result: &mut InteractResult,
    ) -> Result<bool, BrowseError> {
        let engine = &self.config.engine;
        let max_rounds = engine.script_injection_rounds;
        let interval = engine.script_injection_interval();
        let budget = interval * max_rounds + it.settings.script_timeout();
        let navigate_task: &NavigateTask<'_, D> = it.navigate_task;

        let polling = async {
            let mut round = 0;
            while round < max_rounds {
                round += 1;
                let marker = self.evaluate(navigate_task, SCRIPT_MARKER_CHECK).await?;
                if marker.as_str() == Some("function") {
                    return Ok::<_, BrowseError>((round, true));
                }
                sleep(interval).await;
            }
            Ok((round, false))
        };

        let (rounds, injected) = timeout(budget, polling)
            .await
            .map_err(|_| BrowseError::Timeout { step: "script injection wait", budget })??;

        result.trace.script_injection_rounds = rounds;
        result.trace.script_injected = injected;
        if !injected {
            warn!("Helper script is not injected after {} rounds, page is not scriptable | {}", rounds, it.url());
        }

        Ok(injected)
    }

    async fn wait_for_document_fully_loaded<D: DriverHandle>(
        &self,
        it: &mut InteractTask<'_, '_, D>,
        result: &mut InteractResult,
    ) -> Result<(), BrowseError> {
        let engine = &self.config.engine;
        let max_rounds = engine.ready_rounds;
        let interval = engine.ready_interval();
        let budget = interval * max_rounds + it.settings.script_timeout();
        let initial_scroll = if it.settings.scroll_count > 0 { 5 } else { 0 };
        let expression = format!("__fetcher_utils__.waitForReady({})", initial_scroll);
        let navigate_task: &NavigateTask<'_, D> = it.navigate_task;

        let polling = async {
            let mut round = 0;
            while round < max_rounds {
                round += 1;
                sleep(interval).await;

                let message = self.evaluate(navigate_task, &expression).await?;
                if is_truthy(&message) && message.as_str() != Some("timeout") {
                    return Ok::<_, BrowseError>((round, Some(message)));
                }
            }
            Ok((round, None))
        };

        let (rounds, message) = timeout(budget, polling)
            .await
            .map_err(|_| BrowseError::Timeout { step: "document ready wait", budget })??;

        result.trace.ready_rounds = rounds;

        match message {
            None => {
                self.check_state(&it.navigate_task.fetch_task, it.driver())?;
                warn!("Timeout to wait for document ready after {} rounds, retry is supposed | {}", rounds, it.url());
                result.interrupt(ProtocolStatus::retry(RetryScope::Crawl, "Timeout to wait for document ready"));
            }
            Some(Value::String(message)) if is_browser_error_page(&message) => {
                let status = translate_browser_error(&message);
                info!("Browser error page, {} | {}", status, it.url());
                result.active_dom_message = Some(ActiveDomMessage::from_browser_error(&message));
                result.interrupt(status);
            }
            Some(_) => {
                trace!("Document is ready after {} rounds | {}", rounds, it.url());
            }
        }

        Ok(())
    }

    async fn scroll_on_page<D: DriverHandle>(
        &self,
        it: &mut InteractTask<'_, '_, D>,
        result: &mut InteractResult,
    ) -> Result<(), BrowseError> {
        let positions = {
            let mut rng = self.scroll_rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            build_scroll_positions(&it.settings, &mut *rng)
        };

        let driver = it.driver();
        let interval = it.settings.scroll_interval();
        for (i, ratio) in positions.iter().enumerate() {
            self.check_state(&it.navigate_task.fetch_task, driver)?;

            if it.settings.bring_to_front && i % 2 == 0 {
                driver.bring_to_front().await?;
            }

            driver.scroll_to_middle(*ratio).await?;
            sleep(interval).await;
        }

        result.trace.scroll_steps = positions.len();
        Ok(())
    }

    /// Wait until every required selector is present. Giving up is not an error.
    async fn wait_for_elements<D: DriverHandle>(
        &self,
        it: &mut InteractTask<'_, '_, D>,
        selectors: &[String],
        result: &mut InteractResult,
    ) -> Result<(), BrowseError> {
        let expressions = selectors
            .iter()
            .map(|selector| {
                let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
                format!("!!document.querySelector({})", quoted)
            })
            .collect::<Vec<_>>();

        let max_rounds = self.config.engine.selector_rounds;
        let delay = it.settings.scroll_interval();

        let mut round = 0;
        let mut all_present = false;
        while round < max_rounds && !all_present {
            round += 1;
            self.metrics.record_js_wait().await;

            all_present = true;
            for expression in &expressions {
                if self.evaluate(it.navigate_task, expression).await? != Value::Bool(true) {
                    all_present = false;
                    break;
                }
            }

            if !all_present {
                sleep(delay).await;
            }
        }

        result.trace.selector_rounds = round;
        if !all_present {
            debug!("Required elements are not all present after {} rounds | {:?} | {}", round, selectors, it.url());
        }

        Ok(())
    }

    /// Leave the fetch metadata in the document so saved copies keep it
    async fn update_meta_infos<D: DriverHandle>(&self, navigate_task: &NavigateTask<'_, D>) -> Result<(), BrowseError> {
        let task = &navigate_task.fetch_task;
        let metas = serde_json::json!({
            "fetcher-url": task.url,
            "fetcher-batch-id": task.batch_id,
            "fetcher-fetch-time": Utc::now().to_rfc3339(),
        });

        let script = format!(
            ";(function(metas) {{ \
                if (!document.head) return; \
                for (const name in metas) {{ \
                    let meta = document.head.querySelector('meta[name=\"' + name + '\"]'); \
                    if (!meta) {{ meta = document.createElement('meta'); meta.name = name; document.head.appendChild(meta); }} \
                    meta.content = metas[name]; \
                }} \
            }})({});",
            metas
        );

        self.check_state(task, navigate_task.driver)?;
        let detail = navigate_task.driver.evaluate_detail(&script).await?;
        if let Some(exception) = detail.exception {
            warn!("Failed to update meta infos | {} | {}", exception, task.url);
        }

        Ok(())
    }

    async fn compute_document_features<D: DriverHandle>(
        &self,
        it: &mut InteractTask<'_, '_, D>,
        result: &mut InteractResult,
    ) -> Result<(), BrowseError> {
        let message = self.evaluate(it.navigate_task, "__fetcher_utils__.compute()").await?;

        let parsed = match message {
            Value::String(json) => ActiveDomMessage::from_json(&json),
            Value::Null => return Ok(()),
            other => serde_json::from_value(other),
        };

        match parsed {
            Ok(message) => result.active_dom_message = Some(message),
            Err(e) => warn!("Malformed document features | {} | {}", e, it.url()),
        }

        Ok(())
    }

    async fn evaluate<D: DriverHandle>(&self, navigate_task: &NavigateTask<'_, D>, expression: &str) -> Result<Value, BrowseError> {
        self.check_state(&navigate_task.fetch_task, navigate_task.driver)?;
        self.metrics.record_js_evaluate().await;
        Ok(navigate_task.driver.evaluate(expression).await?)
    }

    async fn page_source_length<D: DriverHandle>(&self, navigate_task: &NavigateTask<'_, D>) -> Result<usize, BrowseError> {
        let source = navigate_task.driver.page_source().await?;
        Ok(source.map_or(0, |s| s.len()))
    }

    /// Drop page sources too large to be kept
    fn preprocess_page_content(&self, url: &str, content: Option<String>) -> String {
        let content = content.unwrap_or_default();

        let max_length = self.config.engine.max_content_length;
        if content.len() > max_length {
            warn!("Page source is too large ({} > {}), content is dropped | {}", content.len(), max_length, url);
            return String::new();
        }

        content
    }

    fn create_response<D: DriverHandle>(&self, navigate_task: &mut NavigateTask<'_, D>) -> Response {
        if !self.is_active() {
            return Response::canceled(&navigate_task.fetch_task, "Interactive emulator is closed");
        }

        navigate_task.page_datum.last_browser = Some(navigate_task.driver.browser_type());

        if !navigate_task.page_datum.protocol_status.is_success() {
            navigate_task.page_source.clear();
            return self.create_response_with_datum(navigate_task);
        }

        let url = navigate_task.url().to_string();
        let ignore_integrity = navigate_task.ignore_dom_features || url.starts_with("file://");
        let integrity = if ignore_integrity {
            HtmlIntegrity::Ok
        } else {
            check_html_integrity(&navigate_task.page_source)
        };

        let datum = &mut navigate_task.page_datum;
        if !integrity.is_ok() {
            warn!("Broken html ({:?}), retry is supposed | {}", integrity, url);
            datum.protocol_status = ProtocolStatus::retry(RetryScope::Crawl, format!("Broken html: {:?}", integrity));
        }

        datum.html_integrity = integrity;
        datum.headers.insert("Content-Length".to_string(), navigate_task.page_source.len().to_string());
        datum.content = navigate_task.page_source.as_bytes().to_vec();

        self.create_response_with_datum(navigate_task)
    }

    fn create_response_with_datum<D: DriverHandle>(&self, navigate_task: &mut NavigateTask<'_, D>) -> Response {
        let mut datum = std::mem::take(&mut navigate_task.page_datum);

        datum.url = navigate_task.fetch_task.url.clone();
        datum.original_content_length = navigate_task.original_content_length;
        if !datum.protocol_status.is_success() {
            datum.content.clear();
        }

        if let Some(urls) = &datum.active_dom_urls {
            datum.base_uri = urls.base_uri.clone();
            datum.location = urls.location.clone();
        }

        datum.headers.insert("Content-Encoding".to_string(), "UTF-8".to_string());
        datum.headers.insert("X-Fetcher-Response-Time".to_string(), Utc::now().timestamp_millis().to_string());

        Response::new(datum)
    }
}

/// Pick the final status from the transport code and the interaction status.
///
/// The transport code wins unless it is missing, out of the HTTP range, or the
/// interaction already reported an engine condition.
pub fn reconcile_status(http_code: Option<i32>, interact_status: &ProtocolStatus) -> ProtocolStatus {
    match http_code {
        Some(code) if code > 0 && code < INCOMPATIBLE_CODE_START && !interact_status.is_out_of_band() => {
            translate_http_code(code)
        }
        _ => interact_status.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::{EvaluateDetail, MockDriverHandle, ResourceResponse};
    use crate::cli::config::InteractSettings;
    use crate::crawler::events::BrowseEventHandler;
    use crate::crawler::task::FetchOptions;
    use crate::protocol::codes;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    const PAGE: &str = "<html><head><title>Items</title></head><body><div id=\"price\">10</div></body></html>";

    /// A scripted tab: every answer is decided up front
    struct FakeDriver {
        calls: Mutex<Vec<String>>,
        javascript: bool,
        /// Round from which the helper script is reported installed
        script_round: Option<u32>,
        /// Round from which the page reports ready
        ready_round: Option<u32>,
        ready_message: Value,
        hang_on_ready: bool,
        selectors_present: bool,
        http_status: Option<i32>,
        source: String,
        canceled: AtomicBool,
        script_checks: AtomicU32,
        ready_checks: AtomicU32,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                javascript: true,
                script_round: Some(1),
                ready_round: Some(1),
                ready_message: Value::String("{\"ni\":1}".to_string()),
                hang_on_ready: false,
                selectors_present: true,
                http_status: Some(200),
                source: PAGE.to_string(),
                canceled: AtomicBool::new(false),
                script_checks: AtomicU32::new(0),
                ready_checks: AtomicU32::new(0),
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn called(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl DriverHandle for FakeDriver {
        fn id(&self) -> u64 {
            1
        }

        fn browser_type(&self) -> String {
            "fake".to_string()
        }

        fn supports_javascript(&self) -> bool {
            self.javascript
        }

        fn is_canceled(&self) -> bool {
            self.canceled.load(Ordering::SeqCst)
        }

        fn is_quit(&self) -> bool {
            false
        }

        async fn navigate_to(&self, entry: &NavigateEntry) -> Result<(), DriverError> {
            self.record(format!("navigate:{}", entry.url));
            Ok(())
        }

        async fn evaluate(&self, expression: &str) -> Result<Value, DriverError> {
            if expression == SCRIPT_MARKER_CHECK {
                let round = self.script_checks.fetch_add(1, Ordering::SeqCst) + 1;
                let injected = self.script_round.map_or(false, |r| round >= r);
                return Ok(Value::String(if injected { "function" } else { "undefined" }.to_string()));
            }

            if expression.starts_with("__fetcher_utils__.waitForReady") {
                if self.hang_on_ready {
                    sleep(Duration::from_secs(24 * 3600)).await;
                }
                let round = self.ready_checks.fetch_add(1, Ordering::SeqCst) + 1;
                let ready = self.ready_round.map_or(false, |r| round >= r);
                return Ok(if ready { self.ready_message.clone() } else { Value::Null });
            }

            if expression.starts_with("!!document.querySelector") {
                self.record("selector");
                return Ok(Value::Bool(self.selectors_present));
            }

            if expression.starts_with("__fetcher_utils__.compute") {
                self.record("compute");
                return Ok(Value::String(
                    r#"{"trace":{"ni":1},"urls":{"URL":"https://example.com/items","baseURI":"https://example.com/","location":"https://example.com/items?p=1"},"metadata":{"title":"Items"}}"#
                        .to_string(),
                ));
            }

            Ok(Value::Null)
        }

        async fn evaluate_detail(&self, _script: &str) -> Result<EvaluateDetail, DriverError> {
            self.record("meta");
            Ok(EvaluateDetail::default())
        }

        async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> Result<bool, DriverError> {
            Ok(true)
        }

        async fn exists(&self, _selector: &str) -> Result<bool, DriverError> {
            Ok(true)
        }

        async fn click(&self, _selector: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn type_text(&self, _selector: &str, _text: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn first_text(&self, _selector: &str) -> Result<Option<String>, DriverError> {
            Ok(None)
        }

        async fn scroll_down(&self, _count: u32) -> Result<(), DriverError> {
            Ok(())
        }

        async fn scroll_to_top(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn scroll_to_middle(&self, ratio: f64) -> Result<(), DriverError> {
            self.record(format!("scroll:{}", ratio));
            Ok(())
        }

        async fn bring_to_front(&self) -> Result<(), DriverError> {
            self.record("front");
            Ok(())
        }

        async fn page_source(&self) -> Result<Option<String>, DriverError> {
            Ok(Some(self.source.clone()))
        }

        async fn main_response_status(&self) -> Result<Option<i32>, DriverError> {
            Ok(self.http_status)
        }

        async fn load_resource(&self, url: &str) -> Result<ResourceResponse, DriverError> {
            self.record(format!("resource:{}", url));
            Ok(ResourceResponse { status_code: 200, headers: BTreeMap::new(), body: "{}".to_string() })
        }

        async fn stop(&self) -> Result<(), DriverError> {
            self.record("stop");
            Ok(())
        }

        fn retire(&self) {
            self.record("retire");
        }
    }

    /// Records event names, optionally canceling the task on one event
    struct EventLog {
        events: Mutex<Vec<BrowseEvent>>,
        cancel_on: Option<BrowseEvent>,
    }

    impl EventLog {
        fn new(cancel_on: Option<BrowseEvent>) -> Arc<Self> {
            Arc::new(Self { events: Mutex::new(Vec::new()), cancel_on })
        }

        fn events(&self) -> Vec<BrowseEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrowseEventHandler for EventLog {
        async fn on_event(&self, event: BrowseEvent, task: &FetchTask, _driver: &dyn DriverHandle) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event);
            if self.cancel_on == Some(event) {
                task.cancel();
            }
            Ok(())
        }
    }

    fn test_config() -> FetcherConfig {
        let mut config = FetcherConfig::default();
        config.engine.resource_loader = ResourceLoaderKind::Driver;
        config.interact = InteractSettings::default().no_scroll();
        config
    }

    fn emulator(config: FetcherConfig, log: Option<Arc<EventLog>>) -> InteractiveEmulator {
        let bus = BrowseEventBus::new(log.map(|l| l as Arc<dyn BrowseEventHandler>));
        InteractiveEmulator::new(config, bus, CancellationToken::new())
            .unwrap()
            .with_scroll_seed(42)
    }

    fn task() -> Arc<FetchTask> {
        Arc::new(FetchTask::new("batch-1", "https://example.com/items"))
    }

    fn lenient_mock() -> MockDriverHandle {
        let mut driver = MockDriverHandle::new();
        driver.expect_id().returning(|| 7);
        driver.expect_is_canceled().returning(|| false);
        driver.expect_is_quit().returning(|| false);
        driver
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_interaction_emits_events_in_order() {
        let log = EventLog::new(None);
        let mut config = test_config();
        config.interact = InteractSettings::default();
        let emulator = emulator(config, Some(log.clone()));

        let outcome = emulator.execute(task(), FakeDriver::new()).await.unwrap();

        assert!(outcome.result.status().is_success());
        assert_eq!(outcome.result.status().http_code(), Some(200));
        assert_eq!(log.events(), BrowseEvent::ALL.to_vec());

        let datum = outcome.result.response.datum();
        assert_eq!(datum.content, PAGE.as_bytes());
        assert_eq!(datum.original_content_length, PAGE.len());
        assert_eq!(datum.location.as_deref(), Some("https://example.com/items?p=1"));
        assert_eq!(datum.base_uri.as_deref(), Some("https://example.com/"));
        assert_eq!(datum.active_dom_metadata.as_ref().unwrap()["title"], "Items");
        assert_eq!(datum.last_browser.as_deref(), Some("fake"));
        assert_eq!(datum.headers.get("Content-Length"), Some(&PAGE.len().to_string()));
        assert!(datum.trace.script_injected);

        let driver = outcome.into_driver().unwrap();
        assert_eq!(driver.called("navigate:https://example.com/items"), 1);
        assert!(driver.called("scroll:") >= 2);
        assert_eq!(driver.called("compute"), 1);
        assert_eq!(driver.called("stop"), 1);
        assert_eq!(driver.called("retire"), 0);

        let metrics = emulator.metrics().get_metrics().await;
        assert_eq!(metrics.navigates, 1);
        assert_eq!(metrics.successful_fetches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_round() {
        let mut config = test_config();
        config.engine.ready_interval_ms = 500;
        let emulator = emulator(config, None);

        let mut driver = FakeDriver::new();
        driver.ready_round = Some(3);

        let start = Instant::now();
        let outcome = emulator.execute(task(), driver).await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(1500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1600), "elapsed {:?}", elapsed);
        assert!(outcome.result.status().is_success());
        assert_eq!(outcome.result.response.datum().trace.ready_rounds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_never_injected_still_succeeds() {
        let log = EventLog::new(None);
        let emulator = emulator(test_config(), Some(log.clone()));

        let mut driver = FakeDriver::new();
        driver.script_round = None;

        let start = Instant::now();
        let outcome = emulator.execute(task(), driver).await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(10), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(11), "elapsed {:?}", elapsed);
        assert!(outcome.result.status().is_success());
        assert_eq!(outcome.result.status().http_code(), Some(200));

        let trace = &outcome.result.response.datum().trace;
        assert!(!trace.script_injected);
        assert_eq!(trace.script_injection_rounds, 10);
        assert_eq!(trace.ready_rounds, 0);

        // the scroll phase events still fire, without scrolling
        assert!(log.events().contains(&BrowseEvent::DidScroll));
        let driver = outcome.into_driver().unwrap();
        assert_eq!(driver.called("compute"), 0);
        assert_eq!(driver.called("stop"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_never_answers_is_crawl_retry() {
        let log = EventLog::new(None);
        let mut config = test_config();
        config.interact = InteractSettings::default();
        let emulator = emulator(config, Some(log.clone()));

        let mut driver = FakeDriver::new();
        driver.ready_round = None;

        let start = Instant::now();
        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(start.elapsed() <= Duration::from_secs(61));
        let status = outcome.result.status();
        assert!(status.is_retry_in(RetryScope::Crawl));
        assert_eq!(status.reason(), Some("Timeout to wait for document ready"));
        assert_eq!(outcome.result.response.datum().trace.ready_rounds, 60);
        assert!(outcome.result.response.content().is_empty());

        let events = log.events();
        assert!(!events.contains(&BrowseEvent::DocumentFullyLoaded));
        assert!(!events.contains(&BrowseEvent::WillScroll));
        assert!(events.ends_with(&[BrowseEvent::DidInteract, BrowseEvent::WillStopTab, BrowseEvent::TabStopped]));

        let driver = outcome.into_driver().unwrap();
        assert_eq!(driver.called("scroll:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_error_page() {
        let emulator = emulator(test_config(), None);

        let mut driver = FakeDriver::new();
        driver.ready_message = Value::String("chrome-error://chromewebdata/ net::ERR_NAME_NOT_RESOLVED".to_string());
        driver.http_status = None;

        let outcome = emulator.execute(task(), driver).await.unwrap();

        let status = outcome.result.status();
        assert!(status.is_failed());
        assert_eq!(status.minor_code(), codes::UNKNOWN_HOST);
        assert!(outcome.result.response.datum().active_dom_metadata.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_budget_exceeded_is_crawl_retry() {
        let emulator = emulator(test_config(), None);

        let mut driver = FakeDriver::new();
        driver.hang_on_ready = true;

        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(outcome.result.status().is_retry_in(RetryScope::Crawl));
        assert!(!outcome.is_driver_retired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_interaction() {
        let log = EventLog::new(Some(BrowseEvent::WillScroll));
        let emulator = emulator(test_config(), Some(log.clone()));

        let outcome = emulator.execute(task(), FakeDriver::new()).await.unwrap();

        assert!(outcome.result.status().is_canceled());
        assert_eq!(outcome.result.status().retry_scope(), RetryScope::Cancel);

        let events = log.events();
        assert!(!events.contains(&BrowseEvent::WillStopTab));
        assert!(!events.contains(&BrowseEvent::TabStopped));

        let driver = outcome.into_driver().unwrap();
        assert_eq!(driver.called("stop"), 0);
        assert_eq!(driver.called("compute"), 0);

        // only cancel requests made through the engine are counted
        assert_eq!(emulator.metrics().get_metrics().await.cancels, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_driver_is_not_navigated() {
        let emulator = emulator(test_config(), None);

        let driver = FakeDriver::new();
        driver.canceled.store(true, Ordering::SeqCst);

        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(outcome.result.status().is_canceled());
        let driver = outcome.into_driver().unwrap();
        assert_eq!(driver.called("navigate:"), 0);
    }

    #[tokio::test]
    async fn test_inactive_emulator_never_touches_driver() {
        let emulator = emulator(test_config(), None);
        emulator.close();
        assert!(!emulator.is_active());

        // no expectations: any driver call panics
        let driver = MockDriverHandle::new();
        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(outcome.result.status().is_canceled());
        assert!(!outcome.is_driver_retired());
    }

    #[tokio::test]
    async fn test_canceled_and_dead_tasks_are_not_fetched() {
        let emulator = emulator(test_config(), None);

        let canceled = task();
        emulator.cancel(&canceled).await;
        let outcome = emulator.execute(canceled, MockDriverHandle::new()).await.unwrap();
        assert!(outcome.result.status().is_canceled());

        let options = FetchOptions {
            deadline: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..FetchOptions::default()
        };
        let dead = Arc::new(FetchTask::new("batch-1", "https://example.com").with_options(options));
        let outcome = emulator.execute(dead, MockDriverHandle::new()).await.unwrap();
        assert!(outcome.result.status().is_canceled());

        assert_eq!(emulator.metrics().get_metrics().await.cancels, 1);
    }

    #[tokio::test]
    async fn test_illegal_state_retires_driver_once() {
        let log = EventLog::new(None);
        let emulator = emulator(test_config(), Some(log.clone()));

        let mut driver = lenient_mock();
        driver
            .expect_navigate_to()
            .returning(|_| Err(DriverError::IllegalState("invalid session id".to_string())));
        driver.expect_retire().times(1).return_const(());

        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(outcome.result.status().is_retry_in(RetryScope::Privacy));
        assert!(matches!(outcome.result.exception, Some(DriverError::IllegalState(_))));
        assert!(outcome.is_driver_retired());
        assert_eq!(log.events(), vec![BrowseEvent::WillNavigate, BrowseEvent::Navigated]);
        assert_eq!(emulator.metrics().get_metrics().await.retired_drivers, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_retires_driver() {
        let emulator = emulator(test_config(), None);

        let mut driver = lenient_mock();
        driver.expect_navigate_to().returning(|_| Ok(()));
        driver.expect_supports_javascript().returning(|| true);
        driver
            .expect_evaluate()
            .returning(|_| Err(DriverError::Transport("connection refused".to_string())));
        driver.expect_retire().times(1).return_const(());

        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(outcome.result.status().is_retry_in(RetryScope::Crawl));
        assert!(outcome.is_driver_retired());
    }

    /// Where a scripted mock starts failing
    #[derive(Debug, Clone, Copy)]
    enum FailurePoint {
        Readiness,
        PageSource,
        Stop,
    }

    /// A mock that runs a full interaction and fails once at `point`, expecting exactly one retirement
    fn failing_mock(point: FailurePoint, error: fn() -> DriverError) -> MockDriverHandle {
        let mut driver = lenient_mock();
        driver.expect_browser_type().returning(|| "mock".to_string());
        driver.expect_supports_javascript().returning(|| true);
        driver.expect_navigate_to().returning(|_| Ok(()));
        driver.expect_bring_to_front().returning(|| Ok(()));
        driver.expect_scroll_to_middle().returning(|_| Ok(()));
        driver.expect_wait_for_selector().returning(|_, _| Ok(true));
        driver.expect_evaluate_detail().returning(|_| Ok(EvaluateDetail::default()));
        driver.expect_main_response_status().returning(|| Ok(Some(200)));
        driver.expect_evaluate().returning(move |expression: &str| {
            if expression == SCRIPT_MARKER_CHECK {
                return Ok(Value::String("function".to_string()));
            }
            if expression.starts_with("__fetcher_utils__.waitForReady") {
                return match point {
                    FailurePoint::Readiness => Err(error()),
                    _ => Ok(Value::String("{\"ni\":1}".to_string())),
                };
            }
            if expression.starts_with("__fetcher_utils__.compute") {
                return Ok(Value::String(r#"{"trace":{"ni":1},"metadata":{"title":"Items"}}"#.to_string()));
            }
            Ok(Value::Null)
        });
        driver.expect_page_source().returning(move || match point {
            FailurePoint::PageSource => Err(error()),
            _ => Ok(Some(PAGE.to_string())),
        });
        driver.expect_stop().returning(move || match point {
            FailurePoint::Stop => Err(error()),
            _ => Ok(()),
        });
        driver.expect_retire().times(1).return_const(());
        driver
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_driver_is_retired_at_any_phase() {
        let failures: [(fn() -> DriverError, RetryScope); 2] = [
            (|| DriverError::IllegalState("no such window".to_string()), RetryScope::Privacy),
            (|| DriverError::Transport("connection reset".to_string()), RetryScope::Crawl),
        ];

        for point in [FailurePoint::Readiness, FailurePoint::PageSource, FailurePoint::Stop] {
            for (error, scope) in failures {
                let emulator = emulator(test_config(), None);

                let outcome = emulator.execute(task(), failing_mock(point, error)).await.unwrap();

                assert!(outcome.result.status().is_retry_in(scope), "{:?} gave {}", point, outcome.result.status());
                assert!(outcome.result.exception.is_some());
                assert!(outcome.is_driver_retired());
                assert_eq!(emulator.metrics().get_metrics().await.retired_drivers, 1);
            }
        }
    }

    #[tokio::test]
    async fn test_driver_timeout_keeps_driver() {
        let emulator = emulator(test_config(), None);

        let mut driver = lenient_mock();
        driver
            .expect_navigate_to()
            .returning(|_| Err(DriverError::Timeout("page load".to_string())));
        driver.expect_retire().never();

        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(outcome.result.status().is_retry_in(RetryScope::Crawl));
        assert!(outcome.into_driver().is_some());
    }

    #[tokio::test]
    async fn test_unclassified_failure_is_propagated() {
        let emulator = emulator(test_config(), None);

        let mut driver = lenient_mock();
        driver
            .expect_navigate_to()
            .returning(|_| Err(DriverError::Other(anyhow::anyhow!("unexpected alert open"))));

        let error = assert_err!(emulator.execute(task(), driver).await);

        assert!(matches!(error, FetchError::Unclassified { driver_id: 7, .. }));
    }

    #[tokio::test]
    async fn test_resource_task_skips_interaction() {
        let log = EventLog::new(None);
        let emulator = emulator(test_config(), Some(log.clone()));

        let mut driver = lenient_mock();
        driver.expect_load_resource().times(1).returning(|_| {
            Ok(ResourceResponse { status_code: 404, headers: BTreeMap::new(), body: "missing".to_string() })
        });

        let options = FetchOptions { resource: true, ..FetchOptions::default() };
        let task = Arc::new(FetchTask::new("batch-1", "https://example.com/api/items").with_options(options));
        let outcome = emulator.execute(task, driver).await.unwrap();

        assert!(outcome.result.status().is_not_found());
        assert_eq!(outcome.result.status().http_code(), Some(404));
        assert!(outcome.result.response.content().is_empty());
        assert_eq!(outcome.result.response.datum().original_content_length, 7);
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_resource_task_over_http_loader() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"items\":[1,2]}"))
            .mount(&server)
            .await;

        let mut config = test_config();
        config.engine.resource_loader = ResourceLoaderKind::Http;
        let emulator = emulator(config, None);

        let options = FetchOptions { resource: true, ..FetchOptions::default() };
        let task = Arc::new(FetchTask::new("batch-1", format!("{}/api/items", server.uri())).with_options(options));

        // the tab is only asked whether it is alive
        let outcome = assert_ok!(emulator.execute(task, lenient_mock()).await);

        assert!(outcome.result.status().is_success());
        assert_eq!(outcome.result.response.content(), b"{\"items\":[1,2]}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_scriptable_driver_returns_after_navigation() {
        let log = EventLog::new(None);
        let emulator = emulator(test_config(), Some(log.clone()));

        let mut driver = FakeDriver::new();
        driver.javascript = false;

        let outcome = emulator.execute(task(), driver).await.unwrap();

        assert!(outcome.result.status().is_success());
        assert_eq!(
            log.events(),
            vec![BrowseEvent::WillNavigate, BrowseEvent::Navigated, BrowseEvent::WillStopTab, BrowseEvent::TabStopped]
        );
        assert_eq!(outcome.result.response.datum().original_content_length, PAGE.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_does_not_navigate() {
        let log = EventLog::new(None);
        let emulator = emulator(test_config(), Some(log.clone()));

        let options = FetchOptions { connect: true, ..FetchOptions::default() };
        let task = Arc::new(FetchTask::new("batch-1", "https://example.com/items").with_options(options));
        let outcome = emulator.execute(task, FakeDriver::new()).await.unwrap();

        assert!(outcome.result.status().is_success());
        assert_eq!(log.events(), vec![BrowseEvent::WillStopTab, BrowseEvent::TabStopped]);

        let driver = outcome.into_driver().unwrap();
        assert_eq!(driver.called("navigate:"), 0);
        assert_eq!(driver.called("meta"), 1);
        assert_eq!(driver.called("compute"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_selectors_are_tolerated() {
        let emulator = emulator(test_config(), None);

        let mut driver = FakeDriver::new();
        driver.selectors_present = false;

        let options = FetchOptions { wait_non_blank: vec!["#price".to_string()], ..FetchOptions::default() };
        let task = Arc::new(FetchTask::new("batch-1", "https://example.com/items").with_options(options));
        let outcome = emulator.execute(task, driver).await.unwrap();

        assert!(outcome.result.status().is_success());
        assert_eq!(outcome.result.response.datum().trace.selector_rounds, 5);
        assert_eq!(outcome.into_driver().unwrap().called("selector"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_and_oversized_pages_are_retried() {
        let mut config = test_config();
        config.engine.max_content_length = 64;
        let emulator = emulator(config, None);

        let outcome = emulator.execute(task(), FakeDriver::new()).await.unwrap();
        let status = outcome.result.status();
        assert!(status.is_retry_in(RetryScope::Crawl));
        assert!(status.reason().unwrap().starts_with("Broken html"));

        let emulator = self::emulator(test_config(), None);
        let mut driver = FakeDriver::new();
        driver.source = "<html><body></body></html>".to_string();
        let outcome = emulator.execute(task(), driver).await.unwrap();
        assert!(outcome.result.status().is_retry_in(RetryScope::Crawl));
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_code_overrides_interaction_status() {
        let emulator = emulator(test_config(), None);

        let mut driver = FakeDriver::new();
        driver.http_status = Some(404);

        let outcome = emulator.execute(task(), driver).await.unwrap();
        assert!(outcome.result.status().is_not_found());
        assert!(outcome.result.response.content().is_empty());
    }

    #[test]
    fn test_reconcile_status() {
        let success = ProtocolStatus::success();
        let retry = ProtocolStatus::retry(RetryScope::Crawl, "not ready");

        assert!(reconcile_status(Some(404), &success).is_not_found());
        assert!(reconcile_status(None, &success).is_success());
        assert!(reconcile_status(Some(-1), &success).is_success());
        assert!(reconcile_status(Some(1601), &success).is_success());
        assert!(reconcile_status(Some(200), &retry).is_retry_in(RetryScope::Crawl));
    }
}
