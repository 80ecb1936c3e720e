//! HTTP client for the permanent storage network gateway.
//!
//! Gateway surface (Arweave-gateway style):
//!   `POST /tx`            — raw artifact bytes, `Content-Type` header, tags
//!                           as `tag.<name>` query parameters → `{"id": ...}`
//!   `GET  /tx/{id}/status`— `{"confirmed": bool}`
//!   `GET  /price/{bytes}` — plain integer cost in network base units

use async_trait::async_trait;

use super::{ArtifactReceipt, Result, ServiceError, StorageClient};

pub struct GatewayStorageClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayStorageClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Permanent URL of an artifact by gateway transaction id.
    fn artifact_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }
}

#[async_trait]
impl StorageClient for GatewayStorageClient {
    async fn submit_asset(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        tags: &[(String, String)],
    ) -> Result<ArtifactReceipt> {
        let mut req = self
            .http
            .post(format!("{}/tx", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        for (name, value) in tags {
            req = req.query(&[(format!("tag.{}", name), value.clone())]);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected(format!(
                "storage gateway returned {}: {}",
                status, body
            )));
        }

        #[derive(serde::Deserialize)]
        struct TxResponse {
            id: String,
        }
        let tx: TxResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        Ok(ArtifactReceipt {
            url: self.artifact_url(&tx.id),
            transaction_id: tx.id,
        })
    }

    async fn query_status(&self, transaction_id: &str) -> Result<bool> {
        let resp = self
            .http
            .get(format!("{}/tx/{}/status", self.base_url, transaction_id))
            .send()
            .await?;
        if !resp.status().is_success() {
            // An unknown tx id is simply "not confirmed yet".
            return Ok(false);
        }

        #[derive(serde::Deserialize)]
        struct StatusResponse {
            confirmed: bool,
        }
        let status: StatusResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        Ok(status.confirmed)
    }

    async fn estimate_cost(&self, byte_size: u64) -> Result<u64> {
        let resp = self
            .http
            .get(format!("{}/price/{}", self.base_url, byte_size))
            .send()
            .await?;
        let text = resp.text().await?;
        text.trim()
            .parse()
            .map_err(|_| ServiceError::InvalidResponse(format!("non-numeric price: {}", text)))
    }
}
