//! External service boundary.
//!
//! The chain, the storage network and the record store are never
//! reimplemented here — each is reached through a trait so the mint
//! pipeline and the UI take explicitly constructed clients and tests can
//! substitute fakes. Module-level singletons are deliberately absent.

pub mod chain;
pub mod records;
pub mod storage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::grid::{CellCoord, OwnershipRecord, Region};

// Service-boundary Result type
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors crossing any external-service boundary. Wallet rejection and
/// insufficient funds get their own variants so the UI can show distinct,
/// readable reasons instead of a generic failure.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transaction rejected in the wallet")]
    WalletRejected,
    #[error("insufficient funds in the wallet")]
    InsufficientFunds,
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Network(e.to_string())
    }
}

// ============================================================================
// STORAGE NETWORK
// ============================================================================

/// Result of a storage submission: the permanent URL plus the network's
/// transaction id (usable for later status checks).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactReceipt {
    pub url: String,
    pub transaction_id: String,
}

/// Permanent content-addressed storage network (images and metadata).
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Submit one artifact. `tags` become queryable name/value pairs on the
    /// network.
    async fn submit_asset(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        tags: &[(String, String)],
    ) -> Result<ArtifactReceipt>;

    /// Has the submission with this transaction id been confirmed yet?
    async fn query_status(&self, transaction_id: &str) -> Result<bool>;

    /// Cost estimate (network base units) for storing `byte_size` bytes.
    async fn estimate_cost(&self, byte_size: u64) -> Result<u64>;
}

// ============================================================================
// BLOCKCHAIN WALLET / RPC
// ============================================================================

pub const LAMPORTS_PER_UNIT: u64 = 1_000_000_000;

#[derive(Clone, Debug, Serialize)]
pub struct Creator {
    pub address: String,
    pub share: u8,
}

/// Everything `create_asset` needs to mint one region NFT.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssetRequest {
    pub metadata_uri: String,
    pub name: String,
    pub symbol: String,
    pub royalty_basis_points: u16,
    pub creators: Vec<Creator>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintReceipt {
    pub asset_address: String,
    pub tx_signature: String,
}

/// Wallet plus chain RPC.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Connected wallet address, `None` when no wallet is connected.
    fn address(&self) -> Option<String>;

    /// Wallet balance in lamports.
    async fn get_balance(&self, address: &str) -> Result<u64>;

    /// Submit the mint transaction. Wallet-level refusals must map to
    /// [`ServiceError::WalletRejected`] / [`ServiceError::InsufficientFunds`].
    async fn create_asset(&self, request: CreateAssetRequest) -> Result<MintReceipt>;
}

// ============================================================================
// RECORD STORE
// ============================================================================

/// Aggregate marketplace statistics from the record store.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStats {
    pub record_count: u64,
    pub unique_owners: u64,
    /// Total sold area in cells.
    pub total_cells: u64,
}

/// Hosted relational mirror of on-chain ownership. Overlap rejection at
/// write time is the store's job; the client only mirrors and queries.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn all(&self) -> Result<Vec<OwnershipRecord>>;

    async fn by_owner(&self, owner: &str) -> Result<Vec<OwnershipRecord>>;

    /// The record whose region contains `cell`, if any.
    async fn containing(&self, cell: CellCoord) -> Result<Option<OwnershipRecord>>;

    /// All records whose region overlaps `region`.
    async fn overlapping(&self, region: Region) -> Result<Vec<OwnershipRecord>>;

    /// Records created strictly after `after` — the polling basis for the
    /// realtime insert channel.
    async fn records_since(&self, after: DateTime<Utc>) -> Result<Vec<OwnershipRecord>>;

    async fn insert(&self, record: &OwnershipRecord) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn stats(&self) -> Result<GridStats>;
}

/// Native-unit amount → lamports, rounding up so a balance check never
/// passes on less than the true cost.
pub fn native_to_lamports(amount: f64) -> u64 {
    (amount * LAMPORTS_PER_UNIT as f64).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_conversion_rounds_up() {
        assert_eq!(native_to_lamports(0.01), 10_000_000);
        assert_eq!(native_to_lamports(0.0), 0);
        // A hair above one lamport's worth must round up, not truncate.
        assert_eq!(native_to_lamports(1.000_000_000_4), 1_000_000_001);
    }
}
