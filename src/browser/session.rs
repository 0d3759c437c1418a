use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use crate::browser::behavior::BehaviorSimulator;
use crate::browser::driver::{DriverError, DriverHandle, EvaluateDetail, NavigateEntry, ResourceResponse};
use crate::browser::resource::HttpResourceLoader;
use crate::cli::config::{BrowserSettings, InteractSettings};
use crate::protocol::translator::browser_error_code;

/// Helper script installed in every page after navigation
const FETCHER_UTILS_JS: &str = include_str!("js/fetcher_utils.js");

static NEXT_TAB_ID: AtomicU64 = AtomicU64::new(1);

/// A browser tab driven over WebDriver
pub struct BrowserTab {
    id: u64,

    browser_type: String,

    /// WebDriver session, taken when the tab is dropped
    driver: Option<WebDriver>,

    /// Human-like pacing for clicks and typing
    behavior: BehaviorSimulator,

    /// Loader for resources that need no rendering
    resource_loader: HttpResourceLoader,

    canceled: AtomicBool,

    retired: AtomicBool,
}

impl BrowserTab {
    /// Open a new WebDriver session
    pub async fn launch(settings: &BrowserSettings, interact: &InteractSettings) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();

        if settings.browser_type != "chrome" {
            warn!("Unsupported browser type {}, falling back to chrome", settings.browser_type);
        }

        if let Some(user_agent) = &settings.user_agent {
            caps.add_chrome_arg(&format!("--user-agent={}", user_agent))?;
        }

        caps.add_chrome_arg(&format!("--window-size={},{}", settings.window_size.0, settings.window_size.1))?;

        if settings.headless {
            caps.set_headless()?;
        }

        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;

        let driver = WebDriver::new(&settings.webdriver_url, caps).await
            .context(format!("Failed to connect to WebDriver at {}", settings.webdriver_url))?;

        driver.set_page_load_timeout(interact.page_load_timeout()).await?;
        driver.set_script_timeout(interact.script_timeout()).await?;

        let resource_loader = HttpResourceLoader::new(settings.user_agent.as_deref(), interact.page_load_timeout())?;

        let id = NEXT_TAB_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Browser tab #{} opened on {}", id, settings.webdriver_url);

        Ok(Self {
            id,
            browser_type: "chrome".to_string(),
            driver: Some(driver),
            behavior: BehaviorSimulator::new(interact.clone()),
            resource_loader,
            canceled: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        })
    }

    /// Cancel the tab, tasks running on it are canceled at their next phase boundary
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Close the WebDriver session and wait for it to end
    pub async fn quit(mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                error!("Error closing browser tab #{}: {}", self.id, e);
            }
        }
    }

    fn driver(&self) -> Result<&WebDriver, DriverError> {
        if self.retired.load(Ordering::SeqCst) {
            return Err(DriverError::IllegalState(format!("tab #{} is retired", self.id)));
        }

        self.driver.as_ref()
            .ok_or_else(|| DriverError::IllegalState(format!("tab #{} has no session", self.id)))
    }

    async fn execute(&self, script: &str) -> Result<Value, DriverError> {
        let ret = self.driver()?.execute(script, Vec::new()).await
            .map_err(classify_error)?;
        Ok(ret.json().clone())
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<WebElement>, DriverError> {
        self.driver()?.find_all(By::Css(selector)).await.map_err(classify_error)
    }
}

/// Map a WebDriver failure onto the driver error taxonomy
fn classify_error(e: WebDriverError) -> DriverError {
    classify_message(&e.to_string()).unwrap_or_else(|| DriverError::Other(anyhow::Error::new(e)))
}

fn classify_message(message: &str) -> Option<DriverError> {
    static ILLEGAL: OnceLock<Option<Regex>> = OnceLock::new();
    static TRANSPORT: OnceLock<Option<Regex>> = OnceLock::new();
    static TIMEOUT: OnceLock<Option<Regex>> = OnceLock::new();

    let matches = |cell: &OnceLock<Option<Regex>>, pattern: &str| {
        cell.get_or_init(|| Regex::new(pattern).ok())
            .as_ref()
            .map_or(false, |re| re.is_match(message))
    };

    if matches(&ILLEGAL, r"(?i)invalid session id|no such window|session not created|target window already closed|chrome not reachable") {
        Some(DriverError::IllegalState(message.to_string()))
    } else if matches(&TIMEOUT, r"(?i)timeout|timed[ _]out") {
        Some(DriverError::Timeout(message.to_string()))
    } else if matches(&TRANSPORT, r"(?i)connection[ _](refused|reset)|error sending request|broken pipe|disconnected") {
        Some(DriverError::Transport(message.to_string()))
    } else {
        None
    }
}

/// Script recording a failed navigation on the error page the browser rendered for it
fn net_error_marker(code: &str) -> String {
    format!("window.__fetcher_net_error__ = {};", Value::String(format!("net::{}", code)))
}

fn is_javascript_error(e: &DriverError) -> bool {
    matches!(e, DriverError::Other(inner) if inner.to_string().to_lowercase().contains("javascript error"))
}

#[async_trait]
impl DriverHandle for BrowserTab {
    fn id(&self) -> u64 {
        self.id
    }

    fn browser_type(&self) -> String {
        self.browser_type.clone()
    }

    fn supports_javascript(&self) -> bool {
        true
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn is_quit(&self) -> bool {
        self.retired.load(Ordering::SeqCst) || self.driver.is_none()
    }

    async fn navigate_to(&self, entry: &NavigateEntry) -> Result<(), DriverError> {
        if let Some(referrer) = &entry.referrer {
            debug!("Referrer {} can not be set over WebDriver, navigating without it", referrer);
        }

        debug!("Navigating to: {}", entry.url);
        // The tab stays on the browser's own error page when the load fails at the network level
        let net_error = match self.driver()?.goto(&entry.url).await {
            Ok(()) => None,
            Err(e) => {
                let message = e.to_string();
                match browser_error_code(&message) {
                    Some(code) => {
                        debug!("Navigation failed with {} | {}", code, entry.url);
                        Some(code.to_string())
                    }
                    None => return Err(classify_error(e)),
                }
            }
        };

        if let Err(e) = self.execute(FETCHER_UTILS_JS).await {
            if is_javascript_error(&e) {
                warn!("Failed to install helper script | {} | {}", entry.url, e);
            } else {
                return Err(e);
            }
        }

        if let Some(code) = net_error {
            self.execute(&net_error_marker(&code)).await?;
        }

        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, DriverError> {
        match self.execute(&format!("return ({});", expression)).await {
            Err(e) if is_javascript_error(&e) => {
                debug!("Evaluation failed on page: {}", e);
                Ok(Value::Null)
            }
            other => other,
        }
    }

    async fn evaluate_detail(&self, script: &str) -> Result<EvaluateDetail, DriverError> {
        match self.execute(script).await {
            Ok(value) => Ok(EvaluateDetail { value: Some(value), exception: None }),
            Err(e) if is_javascript_error(&e) => Ok(EvaluateDetail { value: None, exception: Some(e.to_string()) }),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.find_all(selector).await?.is_empty() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(200)).await;
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(!self.find_all(selector).await?.is_empty())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self.find_all(selector).await?.into_iter().next()
            .ok_or_else(|| DriverError::Other(anyhow::anyhow!("Element not found: {}", selector)))?;

        // Simulates human reaction time
        sleep(self.behavior.click_delay()).await;
        element.scroll_into_view().await.map_err(classify_error)?;
        element.click().await.map_err(classify_error)?;

        debug!("Clicked element {}", selector);
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self.find_all(selector).await?.into_iter().next()
            .ok_or_else(|| DriverError::Other(anyhow::anyhow!("Element not found: {}", selector)))?;

        element.clear().await.map_err(classify_error)?;
        for c in text.chars() {
            element.send_keys(c.to_string()).await.map_err(classify_error)?;
            sleep(self.behavior.typing_delay()).await;
        }

        debug!("Typed {} chars into {}", text.chars().count(), selector);
        Ok(())
    }

    async fn first_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        match self.find_all(selector).await?.into_iter().next() {
            Some(element) => Ok(Some(element.text().await.map_err(classify_error)?)),
            None => Ok(None),
        }
    }

    async fn scroll_down(&self, count: u32) -> Result<(), DriverError> {
        for _ in 0..count {
            self.execute("window.scrollBy({ top: window.innerHeight, left: 0, behavior: 'smooth' });").await?;
        }
        Ok(())
    }

    async fn scroll_to_top(&self) -> Result<(), DriverError> {
        self.execute("window.scrollTo(0, 0);").await.map(|_| ())
    }

    async fn scroll_to_middle(&self, ratio: f64) -> Result<(), DriverError> {
        let script = format!(
            "const h = document.body ? document.body.scrollHeight : 0; \
             window.scrollTo(0, Math.max(0, h * {} - window.innerHeight / 2));",
            ratio
        );
        self.execute(&script).await.map(|_| ())
    }

    async fn bring_to_front(&self) -> Result<(), DriverError> {
        self.execute("window.focus();").await.map(|_| ())
    }

    async fn page_source(&self) -> Result<Option<String>, DriverError> {
        let source = self.driver()?.source().await.map_err(classify_error)?;
        Ok(Some(source))
    }

    async fn main_response_status(&self) -> Result<Option<i32>, DriverError> {
        let value = self.evaluate(
            "(performance.getEntriesByType('navigation')[0] || {}).responseStatus || null"
        ).await?;

        Ok(value.as_i64().and_then(|code| i32::try_from(code).ok()).filter(|code| *code > 0))
    }

    async fn load_resource(&self, url: &str) -> Result<ResourceResponse, DriverError> {
        self.resource_loader.load(url, None).await
    }

    async fn stop(&self) -> Result<(), DriverError> {
        self.execute("window.stop();").await.map(|_| ())
    }

    fn retire(&self) {
        if !self.retired.swap(true, Ordering::SeqCst) {
            debug!("Browser tab #{} retired", self.id);
        }
    }
}

impl Drop for BrowserTab {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            let id = self.id;
            // Spawn a task to quit the driver
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser tab #{} during drop: {}", id, e);
                }
            });
        }
    }
}
