pub mod status;
pub mod translator;

// Re-export common types
pub use status::{codes, MajorCode, ProtocolStatus, RetryScope, INCOMPATIBLE_CODE_START};
pub use translator::{translate_browser_error, translate_http_code};
