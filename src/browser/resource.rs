use anyhow::Context;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::browser::driver::{DriverError, ResourceResponse};

/// Loads single resources over plain HTTP, nothing is rendered
#[derive(Debug, Clone)]
pub struct HttpResourceLoader {
    client: Client,
}

impl HttpResourceLoader {
    pub fn new(user_agent: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let mut builder = Client::builder().timeout(timeout).cookie_store(true);
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Load a resource, optionally telling the server where we came from
    pub async fn load(&self, url: &str, referrer: Option<&str>) -> Result<ResourceResponse, DriverError> {
        debug!("Loading resource without rendering: {}", url);

        let mut request = self.client.get(url);
        if let Some(referrer) = referrer {
            request = request.header(reqwest::header::REFERER, referrer);
        }

        let response = request.send().await.map_err(Self::translate_error)?;

        let status_code = i32::from(response.status().as_u16());
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(Self::translate_error)?;

        Ok(ResourceResponse {
            status_code,
            headers,
            body,
        })
    }

    fn translate_error(e: reqwest::Error) -> DriverError {
        if e.is_timeout() {
            DriverError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() || e.is_body() {
            DriverError::Transport(e.to_string())
        } else {
            DriverError::Other(e.into())
        }
    }
}
