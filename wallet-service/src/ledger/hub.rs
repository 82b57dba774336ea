use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ServiceError;

use super::types::Joint;

#[async_trait]
pub trait Hub: Send + Sync {
    /// Submit a finalised joint; returns the accepted unit hash.
    async fn broadcast_joint(&self, joint: &Joint) -> Result<String, ServiceError>;
}

pub struct HttpHub {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHub {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url }
    }
}

#[derive(Deserialize)]
struct BroadcastResponse {
    unit: String,
}

#[async_trait]
impl Hub for HttpHub {
    async fn broadcast_joint(&self, joint: &Joint) -> Result<String, ServiceError> {
        let url = format!("{}/broadcast", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(joint)
            .send()
            .await
            .map_err(|e| ServiceError::Hub(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Hub(format!("hub rejected joint ({}): {}", status, body)));
        }

        let parsed: BroadcastResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Hub(e.to_string()))?;
        Ok(parsed.unit)
    }
}
