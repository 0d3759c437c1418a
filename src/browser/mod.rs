pub mod behavior;
pub mod driver;
pub mod resource;
pub mod session;

// Re-export common types
pub use behavior::{build_scroll_positions, BehaviorSimulator};
pub use driver::{retire_driver, DriverError, DriverHandle, EvaluateDetail, NavigateEntry, ResourceResponse};
pub use resource::HttpResourceLoader;
pub use session::BrowserTab;
