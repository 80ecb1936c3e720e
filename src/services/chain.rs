//! Chain access: balance lookups go straight to the RPC endpoint; asset
//! creation goes through the local wallet bridge, which holds the keys,
//! signs and submits. The wallet's refusal reasons are classified here so
//! the rest of the app never string-matches error text.

use async_trait::async_trait;
use serde_json::json;

use super::{ChainClient, CreateAssetRequest, MintReceipt, Result, ServiceError};

pub struct RpcChainClient {
    http: reqwest::Client,
    rpc_url: String,
    wallet_url: String,
    /// Wallet address, fetched from the bridge on connect.
    address: Option<String>,
}

impl RpcChainClient {
    /// Construct without a connected wallet (balance queries still work for
    /// arbitrary addresses; minting will fail validation).
    pub fn new(rpc_url: &str, wallet_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.to_string(),
            wallet_url: wallet_url.trim_end_matches('/').to_string(),
            address: None,
        }
    }

    /// Ask the wallet bridge for its public address. Returns a connected
    /// client; failure means no wallet is running.
    pub async fn connect(rpc_url: &str, wallet_url: &str) -> Result<Self> {
        let mut client = Self::new(rpc_url, wallet_url);
        let resp = client
            .http
            .get(format!("{}/v1/address", client.wallet_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ServiceError::Rejected(format!(
                "wallet bridge returned {}",
                resp.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct AddressResponse {
            address: String,
        }
        let addr: AddressResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        client.address = Some(addr.address);
        Ok(client)
    }

    /// Map a wallet-bridge refusal body onto the error taxonomy.
    fn classify_wallet_error(status: reqwest::StatusCode, body: &str) -> ServiceError {
        let lower = body.to_ascii_lowercase();
        if lower.contains("rejected") || lower.contains("denied") {
            ServiceError::WalletRejected
        } else if lower.contains("insufficient") {
            ServiceError::InsufficientFunds
        } else {
            ServiceError::Rejected(format!("wallet returned {}: {}", status, body))
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn address(&self) -> Option<String> {
        self.address.clone()
    }

    async fn get_balance(&self, address: &str) -> Result<u64> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address],
        });
        let resp = self.http.post(&self.rpc_url).json(&body).send().await?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        if let Some(err) = value.get("error") {
            return Err(ServiceError::Rejected(format!("rpc error: {}", err)));
        }
        value["result"]["value"]
            .as_u64()
            .ok_or_else(|| ServiceError::InvalidResponse("missing result.value".to_string()))
    }

    async fn create_asset(&self, request: CreateAssetRequest) -> Result<MintReceipt> {
        let resp = self
            .http
            .post(format!("{}/v1/create-asset", self.wallet_url))
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_wallet_error(status, &body));
        }

        resp.json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_errors_are_classified() {
        let status = reqwest::StatusCode::FORBIDDEN;
        assert!(matches!(
            RpcChainClient::classify_wallet_error(status, "User rejected the request"),
            ServiceError::WalletRejected
        ));
        assert!(matches!(
            RpcChainClient::classify_wallet_error(status, "insufficient lamports 12, need 40"),
            ServiceError::InsufficientFunds
        ));
        assert!(matches!(
            RpcChainClient::classify_wallet_error(status, "something else"),
            ServiceError::Rejected(_)
        ));
    }
}
