use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::browser::driver::DriverHandle;
use crate::crawler::task::FetchTask;

/// Lifecycle events of one fetch, in the order they are emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BrowseEvent {
    WillNavigate,
    Navigated,
    WillInteract,
    WillCheckDocumentState,
    DocumentFullyLoaded,
    WillScroll,
    DidScroll,
    DocumentSteady,
    WillComputeFeature,
    FeatureComputed,
    DidInteract,
    WillStopTab,
    TabStopped,
}

impl BrowseEvent {
    pub const ALL: [BrowseEvent; 13] = [
        BrowseEvent::WillNavigate,
        BrowseEvent::Navigated,
        BrowseEvent::WillInteract,
        BrowseEvent::WillCheckDocumentState,
        BrowseEvent::DocumentFullyLoaded,
        BrowseEvent::WillScroll,
        BrowseEvent::DidScroll,
        BrowseEvent::DocumentSteady,
        BrowseEvent::WillComputeFeature,
        BrowseEvent::FeatureComputed,
        BrowseEvent::DidInteract,
        BrowseEvent::WillStopTab,
        BrowseEvent::TabStopped,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BrowseEvent::WillNavigate => "willNavigate",
            BrowseEvent::Navigated => "navigated",
            BrowseEvent::WillInteract => "willInteract",
            BrowseEvent::WillCheckDocumentState => "willCheckDocumentState",
            BrowseEvent::DocumentFullyLoaded => "documentFullyLoaded",
            BrowseEvent::WillScroll => "willScroll",
            BrowseEvent::DidScroll => "didScroll",
            BrowseEvent::DocumentSteady => "documentSteady",
            BrowseEvent::WillComputeFeature => "willComputeFeature",
            BrowseEvent::FeatureComputed => "featureComputed",
            BrowseEvent::DidInteract => "didInteract",
            BrowseEvent::WillStopTab => "willStopTab",
            BrowseEvent::TabStopped => "tabStopped",
        }
    }
}

impl fmt::Display for BrowseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observer of fetch lifecycle events.
///
/// Handlers may run concurrently for different tasks and must synchronise
/// access to anything they share.
#[async_trait]
pub trait BrowseEventHandler: Send + Sync {
    async fn on_event(&self, event: BrowseEvent, task: &FetchTask, driver: &dyn DriverHandle) -> Result<()>;
}

/// Delivers lifecycle events to the global handler, then to the task's own.
///
/// Both are always invoked; a task handler can not suppress the global one.
/// A failing handler is logged and never interrupts the fetch.
#[derive(Clone, Default)]
pub struct BrowseEventBus {
    global: Option<Arc<dyn BrowseEventHandler>>,
}

impl BrowseEventBus {
    pub fn new(global: Option<Arc<dyn BrowseEventHandler>>) -> Self {
        Self { global }
    }

    pub async fn emit(&self, event: BrowseEvent, task: &FetchTask, driver: &dyn DriverHandle) {
        if let Some(handler) = &self.global {
            if let Err(e) = handler.on_event(event, task, driver).await {
                warn!("Global handler failed on {} | {} | {}", event, task.url, e);
            }
        }

        if let Some(handler) = &task.handler {
            if let Err(e) = handler.on_event(event, task, driver).await {
                warn!("Task handler failed on {} | {} | {}", event, task.url, e);
            }
        }
    }
}

/// Logs every lifecycle event
pub struct TracingEventHandler;

#[async_trait]
impl BrowseEventHandler for TracingEventHandler {
    async fn on_event(&self, event: BrowseEvent, task: &FetchTask, driver: &dyn DriverHandle) -> Result<()> {
        debug!("{} | driver #{} | {}", event, driver.id(), task.url);
        Ok(())
    }
}
