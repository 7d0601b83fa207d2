//! Webhook endpoint configuration.
//!
//! An endpoint is either a full `url`, or a `service` reference plus a
//! `path` resolved through cluster DNS. Exactly one of the two forms must
//! be usable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HookError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a decision webhook lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Full URL. Overrides `service` + `path` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Per-request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Path appended to the service address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// In-cluster service to send requests to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceReference>,
}

/// Reference to an in-cluster Service backing a webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: DEFAULT_TIMEOUT,
            path: None,
            service: None,
        }
    }
}

impl WebhookConfig {
    /// Shorthand for a full-URL endpoint with the default timeout.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Resolves the endpoint URL from the configured form.
    pub fn endpoint_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let (Some(service), Some(path)) = (&self.service, &self.path) else {
            return Err(HookError::InvalidConfig {
                message: "must specify either full 'url', or both 'service' and 'path'"
                    .to_string(),
            });
        };
        if service.name.is_empty() || service.namespace.is_empty() {
            return Err(HookError::InvalidConfig {
                message: "service reference needs both 'name' and 'namespace'".to_string(),
            });
        }
        // Resolve the Service through cluster DNS.
        let port = service.port.unwrap_or(80);
        let protocol = service.protocol.as_deref().unwrap_or("http");
        Ok(format!(
            "{protocol}://{}.{}:{port}{path}",
            service.name, service.namespace
        ))
    }

    /// The configured timeout; zero is rejected rather than waiting forever.
    pub fn request_timeout(&self) -> Result<Duration> {
        if self.timeout.is_zero() {
            return Err(HookError::InvalidConfig {
                message: "timeout must be a positive duration".to_string(),
            });
        }
        Ok(self.timeout)
    }
}
