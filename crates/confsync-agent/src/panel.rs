//! Vendor panel access
//!
//! The agent only needs one panel capability: restarting an instance after
//! its config changed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PanelConfig;

/// Panel call failed
#[derive(Debug, Error)]
pub enum PanelError {
    /// No `base_url` configured
    #[error("panel is not configured")]
    NotConfigured,

    /// Request never got a response
    #[error("panel request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Panel answered with a non-success status
    #[error("panel returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Vendor panel operations
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// Restart a server instance
    async fn restart(&self, instance: &str) -> Result<(), PanelError>;
}

/// Pterodactyl-style client API over HTTP
#[derive(Debug, Clone)]
pub struct HttpPanelClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPanelClient {
    /// # Errors
    /// `NotConfigured` without a base URL; `Transport` if the HTTP client
    /// cannot be built
    pub fn from_config(config: &PanelConfig) -> Result<Self, PanelError> {
        let base_url = config.base_url.clone().ok_or(PanelError::NotConfigured)?;
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    #[must_use]
    pub fn power_url(&self, instance: &str) -> String {
        format!("{}/api/client/servers/{instance}/power", self.base_url)
    }
}

#[async_trait]
impl PanelApi for HttpPanelClient {
    async fn restart(&self, instance: &str) -> Result<(), PanelError> {
        let url = self.power_url(instance);
        debug!(instance, url = %url, "Requesting restart");
        let mut request = self.client.post(&url).json(&json!({ "signal": "restart" }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PanelError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }
        info!(instance, "Instance restart requested");
        Ok(())
    }
}
