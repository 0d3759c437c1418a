use serde::{Deserialize, Serialize};
use std::fmt;

/// Minor status codes. Codes below [`INCOMPATIBLE_CODE_START`] mirror HTTP,
/// codes at or above it describe conditions raised by the fetcher itself.
pub mod codes {
    pub const SC_OK: i32 = 200;
    pub const CREATED: i32 = 201;
    pub const MOVED_PERMANENTLY: i32 = 301;
    pub const MOVED_TEMPORARILY: i32 = 302;
    pub const NOT_MODIFIED: i32 = 304;
    pub const UNAUTHORIZED: i32 = 401;
    pub const SC_NOT_FOUND: i32 = 404;
    pub const REQUEST_TIMEOUT: i32 = 408;
    pub const GONE: i32 = 410;
    pub const PRECONDITION_FAILED: i32 = 412;

    /// Start of the range HTTP never uses.
    pub const INCOMPATIBLE_CODE_START: i32 = 1000;

    pub const PROTO_NOT_FOUND: i32 = 1200;
    pub const UNKNOWN_HOST: i32 = 1400;
    pub const ROBOTS_DENIED: i32 = 1401;
    pub const REDIR_EXCEEDED: i32 = 1402;
    pub const WOULD_BLOCK: i32 = 1403;
    pub const BLOCKED: i32 = 1404;

    pub const EXCEPTION: i32 = 1600;
    pub const RETRY: i32 = 1601;
    pub const CANCELED: i32 = 1602;
    pub const THREAD_TIMEOUT: i32 = 1603;
    pub const WEB_DRIVER_TIMEOUT: i32 = 1604;
    pub const SCRIPT_TIMEOUT: i32 = 1605;
}

pub use codes::INCOMPATIBLE_CODE_START;

/// Major outcome of a fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MajorCode {
    NotFetched,
    Success,
    Failed,
}

/// Tells the frontier how a failed fetch may be retried.
///
/// `Privacy` means the browser identity (fingerprint, proxy, session) is
/// considered burned and must be rotated before the next attempt. It is a
/// signal to the caller; the fetch engine never rotates identities itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryScope {
    None,
    Crawl,
    Privacy,
    Cancel,
}

impl fmt::Display for RetryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryScope::None => "NONE",
            RetryScope::Crawl => "CRAWL",
            RetryScope::Privacy => "PRIVACY",
            RetryScope::Cancel => "CANCEL",
        };
        f.write_str(name)
    }
}

/// Outcome classification of one fetch attempt.
///
/// Values are only built through the named constructors so that a retry
/// scope other than `None` is never attached to a successful status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStatus {
    major: MajorCode,
    minor: i32,
    retry_scope: RetryScope,
    reason: Option<String>,
    http_code: Option<i32>,
}

impl ProtocolStatus {
    fn new(major: MajorCode, minor: i32) -> Self {
        Self {
            major,
            minor,
            retry_scope: RetryScope::None,
            reason: None,
            http_code: None,
        }
    }

    pub fn not_fetched() -> Self {
        Self::new(MajorCode::NotFetched, -1)
    }

    pub fn success() -> Self {
        Self::new(MajorCode::Success, codes::SC_OK)
    }

    pub fn not_modified() -> Self {
        Self::new(MajorCode::Success, codes::NOT_MODIFIED)
    }

    /// A success carrying a specific 2xx code
    pub fn success_with(minor: i32) -> Self {
        Self::new(MajorCode::Success, minor)
    }

    pub fn failed(minor: i32) -> Self {
        Self::new(MajorCode::Failed, minor)
    }

    pub fn failed_with_reason(minor: i32, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::failed(minor)
        }
    }

    /// A retryable failure. Passing `RetryScope::None` is treated as `Crawl`,
    /// a retry always has a scope.
    pub fn retry(scope: RetryScope, reason: impl Into<String>) -> Self {
        let scope = match scope {
            RetryScope::None => RetryScope::Crawl,
            other => other,
        };

        Self {
            retry_scope: scope,
            reason: Some(reason.into()),
            ..Self::failed(codes::RETRY)
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            retry_scope: RetryScope::Cancel,
            reason: Some(reason.into()),
            ..Self::failed(codes::CANCELED)
        }
    }

    /// Attach the transport code the status was derived from
    pub fn with_http_code(mut self, code: i32) -> Self {
        self.http_code = Some(code);
        self
    }

    pub fn major(&self) -> MajorCode {
        self.major
    }

    pub fn minor_code(&self) -> i32 {
        self.minor
    }

    pub fn retry_scope(&self) -> RetryScope {
        self.retry_scope
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn http_code(&self) -> Option<i32> {
        self.http_code
    }

    pub fn is_success(&self) -> bool {
        self.major == MajorCode::Success
    }

    pub fn is_failed(&self) -> bool {
        self.major == MajorCode::Failed
    }

    pub fn is_canceled(&self) -> bool {
        self.minor == codes::CANCELED
    }

    pub fn is_retry(&self) -> bool {
        self.minor == codes::RETRY
    }

    pub fn is_retry_in(&self, scope: RetryScope) -> bool {
        self.is_retry() && self.retry_scope == scope
    }

    pub fn is_not_found(&self) -> bool {
        self.minor == codes::SC_NOT_FOUND
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.minor,
            codes::REQUEST_TIMEOUT
                | codes::THREAD_TIMEOUT
                | codes::WEB_DRIVER_TIMEOUT
                | codes::SCRIPT_TIMEOUT
        )
    }

    /// True for conditions raised by the fetcher rather than the remote server
    pub fn is_out_of_band(&self) -> bool {
        self.minor >= INCOMPATIBLE_CODE_START
    }

    pub fn minor_name(&self) -> &'static str {
        minor_name(self.minor)
    }

    pub fn name(&self) -> String {
        let major = match self.major {
            MajorCode::NotFetched => "NotFetched",
            MajorCode::Success => "Success",
            MajorCode::Failed => "Failed",
        };
        format!("{}/{}", major, self.minor_name())
    }
}

impl Default for ProtocolStatus {
    fn default() -> Self {
        Self::not_fetched()
    }
}

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.minor_name(), self.minor)?;

        let mut args = Vec::new();
        if self.retry_scope != RetryScope::None {
            args.push(format!("scope: {}", self.retry_scope));
        }
        if let Some(reason) = &self.reason {
            args.push(format!("reason: {}", reason));
        }
        if let Some(code) = self.http_code {
            args.push(format!("httpCode: {}", code));
        }
        if !args.is_empty() {
            write!(f, " {}", args.join(", "))?;
        }

        Ok(())
    }
}

fn minor_name(code: i32) -> &'static str {
    match code {
        codes::SC_OK => "OK",
        codes::CREATED => "Created",
        codes::MOVED_PERMANENTLY => "Moved",
        codes::MOVED_TEMPORARILY => "TempMoved",
        codes::NOT_MODIFIED => "NotModified",
        codes::UNAUTHORIZED => "AccessDenied",
        codes::SC_NOT_FOUND => "NotFound",
        codes::REQUEST_TIMEOUT => "RequestTimeout",
        codes::GONE => "Gone",
        codes::PRECONDITION_FAILED => "PreconditionFailed",
        codes::PROTO_NOT_FOUND => "ProtoNotFound",
        codes::UNKNOWN_HOST => "UnknownHost",
        codes::ROBOTS_DENIED => "RobotsDenied",
        codes::REDIR_EXCEEDED => "RedirExceeded",
        codes::WOULD_BLOCK => "WouldBlock",
        codes::BLOCKED => "Blocked",
        codes::EXCEPTION => "Exception",
        codes::RETRY => "Retry",
        codes::CANCELED => "Canceled",
        codes::THREAD_TIMEOUT => "ThreadTimeout",
        codes::WEB_DRIVER_TIMEOUT => "WebDriverTimeout",
        codes::SCRIPT_TIMEOUT => "ScriptTimeout",
        -1 => "NotFetched",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_never_carries_none_scope() {
        let status = ProtocolStatus::retry(RetryScope::None, "flaky");
        assert!(status.is_retry_in(RetryScope::Crawl));
        assert!(status.is_failed());
    }

    #[test]
    fn test_privacy_retry_is_not_success() {
        let status = ProtocolStatus::retry(RetryScope::Privacy, "Illegal web driver");
        assert!(!status.is_success());
        assert_eq!(status.retry_scope(), RetryScope::Privacy);
        assert!(status.is_out_of_band());
    }

    #[test]
    fn test_cancel_is_distinct_from_retry() {
        let status = ProtocolStatus::cancel("task canceled");
        assert!(status.is_canceled());
        assert!(!status.is_retry());
        assert_eq!(status.retry_scope(), RetryScope::Cancel);
    }

    #[test]
    fn test_display() {
        let status = ProtocolStatus::retry(RetryScope::Crawl, "timeout");
        assert_eq!(status.to_string(), "Retry(1601) scope: CRAWL, reason: timeout");
        assert_eq!(ProtocolStatus::success().to_string(), "OK(200)");
        assert_eq!(ProtocolStatus::success().name(), "Success/OK");
    }

    #[test]
    fn test_timeouts() {
        assert!(ProtocolStatus::failed(codes::SCRIPT_TIMEOUT).is_timeout());
        assert!(!ProtocolStatus::failed(codes::GONE).is_timeout());
    }
}
