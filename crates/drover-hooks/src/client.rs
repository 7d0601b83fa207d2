//! The decision-function seam and its webhook implementation.
//!
//! The engine only ever sees [`DecisionHook`]: one opaque call per
//! materialized parent, dispatched to the finalize endpoint when the
//! request says so. [`WebhookClient`] is the production implementation:
//! a synchronous JSON POST with a per-endpoint timeout and no retries -
//! retry policy belongs to the reconciliation queue, not the transport.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::WebhookConfig;
use crate::error::{HookError, Result};
use crate::request::{SyncRequest, SyncResponse};

/// The external decision function.
#[async_trait]
pub trait DecisionHook: Send + Sync {
    /// Asks the decision function for desired state. Implementations route
    /// to the finalize endpoint when `request.finalizing` is set and one is
    /// configured.
    async fn call(&self, request: &SyncRequest) -> Result<SyncResponse>;

    /// Whether a finalize endpoint exists. Controls whether the engine
    /// takes responsibility for pre-deletion cleanup at all.
    fn has_finalize(&self) -> bool;
}

/// A single webhook endpoint.
pub struct WebhookClient {
    url: String,
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let url = config.endpoint_url()?;
        let timeout = config.request_timeout()?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HookError::Transport {
                url: url.clone(),
                source: e,
            })?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POSTs a JSON request and decodes the JSON response. Anything other
    /// than a plain 200 is an error carrying the response body.
    pub async fn post<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)?;
        debug!(url = %self.url, bytes = body.len(), "calling webhook");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| HookError::Transport {
                url: self.url.clone(),
                source: e,
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| HookError::Transport {
            url: self.url.clone(),
            source: e,
        })?;

        if status != reqwest::StatusCode::OK {
            return Err(HookError::RemoteError {
                url: self.url.clone(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| HookError::DecodeResponse {
            url: self.url.clone(),
            source: e,
        })
    }
}

/// The sync/finalize endpoint pair configured for one controller.
pub struct HookEndpoints {
    sync: WebhookClient,
    finalize: Option<WebhookClient>,
}

impl HookEndpoints {
    pub fn new(sync: WebhookClient, finalize: Option<WebhookClient>) -> Self {
        Self { sync, finalize }
    }

    /// Builds the pair from endpoint configs.
    pub fn from_configs(sync: &WebhookConfig, finalize: Option<&WebhookConfig>) -> Result<Self> {
        Ok(Self {
            sync: WebhookClient::new(sync)?,
            finalize: finalize.map(WebhookClient::new).transpose()?,
        })
    }
}

#[async_trait]
impl DecisionHook for HookEndpoints {
    async fn call(&self, request: &SyncRequest) -> Result<SyncResponse> {
        match &self.finalize {
            Some(finalize) if request.finalizing => finalize.post(request).await,
            _ => self.sync.post(request).await,
        }
    }

    fn has_finalize(&self) -> bool {
        self.finalize.is_some()
    }
}
