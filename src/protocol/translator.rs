use regex::Regex;
use std::sync::OnceLock;

use crate::protocol::status::{codes, ProtocolStatus, RetryScope};

/// Marker the browser puts in the location of its own error pages
pub const BROWSER_ERROR_SCHEME: &str = "chrome-error://";

/// Translate a transport status code into a protocol status
pub fn translate_http_code(code: i32) -> ProtocolStatus {
    let status = match code {
        304 => ProtocolStatus::not_modified(),
        200..=299 => ProtocolStatus::success_with(code),
        301 | 308 => ProtocolStatus::failed(codes::MOVED_PERMANENTLY),
        300..=399 => ProtocolStatus::failed(codes::MOVED_TEMPORARILY),
        401 | 403 => ProtocolStatus::failed(codes::UNAUTHORIZED),
        404 => ProtocolStatus::failed(codes::SC_NOT_FOUND),
        408 => ProtocolStatus::failed(codes::REQUEST_TIMEOUT),
        410 => ProtocolStatus::failed(codes::GONE),
        412 => ProtocolStatus::failed(codes::PRECONDITION_FAILED),
        429 | 500..=599 => ProtocolStatus::retry(RetryScope::Crawl, format!("HTTP {}", code)),
        _ => ProtocolStatus::failed(code),
    };

    status.with_http_code(code)
}

/// Whether a readiness message reports an error page rendered by the browser
pub fn is_browser_error_page(message: &str) -> bool {
    message.contains(BROWSER_ERROR_SCHEME)
}

/// Extract the `net::ERR_*` code from a browser error page message
pub fn browser_error_code(message: &str) -> Option<&str> {
    static NET_ERROR: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = NET_ERROR
        .get_or_init(|| Regex::new(r"net::(ERR_[A-Z0-9_]+)").ok())
        .as_ref()?;

    regex
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Classify an error page rendered by the browser itself
pub fn translate_browser_error(message: &str) -> ProtocolStatus {
    let Some(code) = browser_error_code(message) else {
        return ProtocolStatus::retry(RetryScope::Crawl, "Browser error page");
    };

    match code {
        "ERR_NAME_NOT_RESOLVED" | "ERR_NAME_RESOLUTION_FAILED" | "ERR_ADDRESS_UNREACHABLE" => {
            ProtocolStatus::failed_with_reason(codes::UNKNOWN_HOST, code)
        }
        c if c.starts_with("ERR_PROXY") || c.starts_with("ERR_TUNNEL") || c == "ERR_SOCKS_CONNECTION_FAILED" => {
            ProtocolStatus::retry(RetryScope::Privacy, code)
        }
        c if c.starts_with("ERR_BLOCKED_BY") => ProtocolStatus::failed_with_reason(codes::BLOCKED, code),
        "ERR_TOO_MANY_REDIRECTS" => ProtocolStatus::failed_with_reason(codes::REDIR_EXCEEDED, code),
        _ => ProtocolStatus::retry(RetryScope::Crawl, code),
    }
}
