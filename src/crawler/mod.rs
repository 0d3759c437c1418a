pub mod emulator;
pub mod events;
pub mod navigate;
pub mod response;
pub mod task;

// Re-export common types
pub use emulator::{reconcile_status, FetchError, InteractiveEmulator};
pub use events::{BrowseEvent, BrowseEventBus, BrowseEventHandler, TracingEventHandler};
pub use navigate::{ActiveDomMessage, FetchTrace, FlowState, HtmlIntegrity, InteractResult, PageDatum};
pub use response::{BrowseOutcome, DriverDisposition, FetchResult, Response};
pub use task::{FetchOptions, FetchTask};
