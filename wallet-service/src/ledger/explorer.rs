use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ServiceError;

use super::types::{AssetMetadataRecord, BalanceEntry, HistoryItem, HistoryOptions, TxRecord, UtxoRecord};

#[async_trait]
pub trait Explorer: Send + Sync {
    async fn get_utxos(
        &self,
        addresses: &[String],
        asset: Option<&str>,
    ) -> Result<Vec<UtxoRecord>, ServiceError>;

    async fn get_balance(
        &self,
        addresses: &[String],
        asset: Option<&str>,
    ) -> Result<BTreeMap<String, BalanceEntry>, ServiceError>;

    async fn get_tx_history(
        &self,
        addresses: &[String],
        opts: &HistoryOptions,
    ) -> Result<Vec<HistoryItem>, ServiceError>;

    async fn get_address_activity(&self, address: &str) -> Result<bool, ServiceError>;

    async fn get_transaction(&self, unit: &str) -> Result<Option<TxRecord>, ServiceError>;

    /// Asset-metadata units published by the given registries.
    async fn get_asset_metadata(
        &self,
        registries: &[String],
    ) -> Result<Vec<AssetMetadataRecord>, ServiceError>;
}

/// HTTP explorer client against an esplora-style JSON API.
pub struct HttpExplorer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExplorer {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::Explorer(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::Explorer(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Explorer(e.to_string()))
    }
}

#[async_trait]
impl Explorer for HttpExplorer {
    async fn get_utxos(
        &self,
        addresses: &[String],
        asset: Option<&str>,
    ) -> Result<Vec<UtxoRecord>, ServiceError> {
        let mut path = format!("/utxos?addresses={}", addresses.join(","));
        if let Some(asset) = asset {
            path.push_str(&format!("&asset={}", asset));
        }
        self.get_json(&path).await
    }

    async fn get_balance(
        &self,
        addresses: &[String],
        asset: Option<&str>,
    ) -> Result<BTreeMap<String, BalanceEntry>, ServiceError> {
        let mut path = format!("/balance?addresses={}", addresses.join(","));
        if let Some(asset) = asset {
            path.push_str(&format!("&asset={}", asset));
        }
        self.get_json(&path).await
    }

    async fn get_tx_history(
        &self,
        addresses: &[String],
        opts: &HistoryOptions,
    ) -> Result<Vec<HistoryItem>, ServiceError> {
        let mut path = format!("/txhistory?addresses={}", addresses.join(","));
        if let Some(asset) = &opts.asset {
            path.push_str(&format!("&asset={}", asset));
        }
        if let Some(limit) = opts.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(last_row_id) = opts.last_row_id {
            path.push_str(&format!("&lastRowId={}", last_row_id));
        }
        if let Some(unit) = &opts.unit {
            path.push_str(&format!("&unit={}", unit));
        }
        self.get_json(&path).await
    }

    async fn get_address_activity(&self, address: &str) -> Result<bool, ServiceError> {
        self.get_json(&format!("/address/{}/activity", address)).await
    }

    async fn get_transaction(&self, unit: &str) -> Result<Option<TxRecord>, ServiceError> {
        let url = format!("{}/tx/{}", self.base_url, urlencode(unit));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::Explorer(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ServiceError::Explorer(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ServiceError::Explorer(e.to_string()))
    }

    async fn get_asset_metadata(
        &self,
        registries: &[String],
    ) -> Result<Vec<AssetMetadataRecord>, ServiceError> {
        self.get_json(&format!("/asset_metadata?registries={}", registries.join(",")))
            .await
    }
}

/// Unit hashes are base64 and may contain '+' and '/'.
fn urlencode(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '+' => "%2B".chars().collect::<Vec<_>>(),
            '/' => "%2F".chars().collect(),
            '=' => "%3D".chars().collect(),
            other => vec![other],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_hashes_are_url_safe() {
        assert_eq!(urlencode("ab+c/d="), "ab%2Bc%2Fd%3D");
        assert_eq!(urlencode("plain"), "plain");
    }
}
