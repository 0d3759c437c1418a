use anyhow::{Result, Context};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::browser::session::BrowserTab;
use crate::cli::config::{FetcherConfig, InteractLevel, InteractSettings};
use crate::crawler::emulator::InteractiveEmulator;
use crate::crawler::events::{BrowseEventBus, TracingEventHandler};
use crate::crawler::response::FetchResult;
use crate::crawler::task::{FetchOptions, FetchTask};
use crate::protocol::RetryScope;

/// Arguments of the fetch command
pub struct FetchRequest {
    pub urls: Vec<String>,
    pub profile: Option<String>,
    pub level: Option<InteractLevel>,
    pub resource: bool,
    pub wait_selector: Option<String>,
    pub referrer: Option<String>,
    pub output: Option<PathBuf>,
}

/// What is printed for every fetched url
#[derive(Debug, Serialize)]
pub struct FetchSummary {
    pub url: String,
    pub status: String,
    pub retry_scope: RetryScope,
    pub reason: Option<String>,
    pub http_code: Option<i32>,
    pub content_length: usize,
    pub original_content_length: usize,
    pub location: Option<String>,
    pub title: Option<Value>,
    pub error: Option<String>,
}

impl FetchSummary {
    fn from_result(result: &FetchResult) -> Self {
        let status = result.status();
        let datum = result.response.datum();

        Self {
            url: result.task.url.clone(),
            status: status.name(),
            retry_scope: status.retry_scope(),
            reason: status.reason().map(str::to_string),
            http_code: status.http_code(),
            content_length: datum.content_length(),
            original_content_length: datum.original_content_length,
            location: datum.location.clone(),
            title: datum.active_dom_metadata.as_ref().and_then(|m| m.get("title").cloned()),
            error: result.exception.as_ref().map(|e| e.to_string()),
        }
    }

    fn failed(url: &str, error: String) -> Self {
        Self {
            url: url.to_string(),
            status: "NotFetched".to_string(),
            retry_scope: RetryScope::None,
            reason: None,
            http_code: None,
            content_length: 0,
            original_content_length: 0,
            location: None,
            title: None,
            error: Some(error),
        }
    }
}

/// Fetch every url on its own browser tab, concurrently
pub async fn fetch(request: FetchRequest) -> Result<()> {
    for url in &request.urls {
        Url::parse(url).context(format!("Invalid url: {}", url))?;
    }

    let mut config = match &request.profile {
        Some(profile) => FetcherConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile))?,
        None => FetcherConfig::load_default()?,
    };

    if let Some(level) = request.level {
        config.interact = InteractSettings::create(level);
    }

    let events = BrowseEventBus::new(Some(Arc::new(TracingEventHandler)));
    let emulator = InteractiveEmulator::new(config.clone(), events, CancellationToken::new())
        .context("Failed to create interactive emulator")?;

    let options = FetchOptions {
        resource: request.resource,
        wait_non_blank: request.wait_selector.as_deref().map(FetchOptions::parse_selectors).unwrap_or_default(),
        ..FetchOptions::default()
    };

    let batch_id = Uuid::new_v4().to_string();
    let tasks = request.urls.iter().map(|url| {
        let mut task = FetchTask::new(batch_id.clone(), url.clone()).with_options(options.clone());
        if let Some(referrer) = &request.referrer {
            task = task.with_referrer(referrer.clone());
        }
        Arc::new(task)
    });

    let summaries = join_all(tasks.map(|task| fetch_one(&emulator, &config, task))).await;

    let json = serde_json::to_string_pretty(&summaries)
        .context("Failed to serialize fetch results")?;
    match &request.output {
        Some(path) => {
            fs::write(path, json).context(format!("Failed to write results to {}", path.display()))?;
            info!("Results written to: {}", path.display());
        }
        None => println!("{}", json),
    }

    let metrics = emulator.metrics().get_metrics().await;
    info!(
        "Batch {} done: {}/{} fetched successfully, {} navigations, {} bytes",
        batch_id, metrics.successful_fetches, metrics.total_fetches, metrics.navigates, metrics.bytes_fetched
    );

    emulator.close();
    Ok(())
}

async fn fetch_one(emulator: &InteractiveEmulator, config: &FetcherConfig, task: Arc<FetchTask>) -> FetchSummary {
    let tab = match BrowserTab::launch(&config.browser, &config.interact).await {
        Ok(tab) => tab,
        Err(e) => {
            error!("Failed to open browser tab for {}: {:#}", task.url, e);
            return FetchSummary::failed(&task.url, format!("{:#}", e));
        }
    };

    match emulator.execute(task.clone(), tab).await {
        Ok(outcome) => {
            let summary = FetchSummary::from_result(&outcome.result);
            if let Some(tab) = outcome.into_driver() {
                tab.quit().await;
            }
            summary
        }
        Err(e) => {
            error!("Fetch failed for {}: {:#}", task.url, e);
            FetchSummary::failed(&task.url, format!("{:#}", e))
        }
    }
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = FetcherConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it from the defaults when it does not exist
pub fn manage_profile(profile_name: String) -> Result<()> {
    match FetcherConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        },
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = FetcherConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = FetcherConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
