//! Mint pipeline: one selection → one on-chain region asset.
//!
//! Ordered sequence with an asymmetric failure policy:
//!   validate → upload image → upload metadata → mint on chain → persist
//! Steps up to and including the chain mint are all-or-nothing — any failure
//! aborts the rest. The final record-store write is best-effort: the
//! on-chain asset already exists by then, so a persistence failure is logged
//! and the mint still reports success. Nothing retries automatically; retry
//! means the user re-invokes the whole sequence.

use std::sync::mpsc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::grid::{OwnershipRecord, Region};
use crate::services::{
    ChainClient, CreateAssetRequest, Creator, RecordStore, ServiceError, StorageClient,
    native_to_lamports,
};

// ============================================================================
// SESSION TYPES
// ============================================================================

/// Step cursor of a mint session. Metadata upload shares the `Uploading`
/// step with the image — the UI shows them as one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MintStep {
    Uploading,
    Minting,
    Saving,
}

impl MintStep {
    pub fn label(&self) -> &'static str {
        match self {
            MintStep::Uploading => "Uploading assets",
            MintStep::Minting => "Minting on chain",
            MintStep::Saving => "Saving record",
        }
    }
}

/// Messages sent to the UI thread while a session runs. A step event is
/// sent before the step begins; exactly one terminal event follows.
#[derive(Clone, Debug)]
pub enum MintEvent {
    Step(MintStep),
    Success(MintOutcome),
    Failed(String),
}

/// Terminal result of a successful session.
#[derive(Clone, Debug)]
pub struct MintOutcome {
    pub record: OwnershipRecord,
    pub asset_address: String,
    /// False when the best-effort record-store write failed — the asset is
    /// on chain but the off-chain mirror may lag until reconciliation.
    pub persisted: bool,
}

#[derive(Debug, Error)]
pub enum MintError {
    #[error("{0}")]
    Validation(String),
    #[error("image upload failed: {0}")]
    ImageUpload(ServiceError),
    #[error("metadata upload failed: {0}")]
    MetadataUpload(ServiceError),
    #[error("transaction rejected in the wallet")]
    WalletRejected,
    #[error("insufficient funds: need {needed} lamports, wallet has {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("mint transaction failed: {0}")]
    Chain(ServiceError),
}

/// What the user is minting.
#[derive(Clone, Debug)]
pub struct MintRequest {
    pub region: Region,
    pub image_bytes: Vec<u8>,
    pub image_content_type: String,
    pub external_link: Option<String>,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// The orchestrator, parameterised over injected service clients so tests
/// run against fakes. One instance per mint attempt; strictly sequential.
pub struct MintPipeline<'a> {
    pub storage: &'a dyn StorageClient,
    pub chain: &'a dyn ChainClient,
    pub records: &'a dyn RecordStore,
    pub config: &'a AppConfig,
}

impl MintPipeline<'_> {
    /// Run the whole sequence. Progress events go to `progress`; a dropped
    /// receiver (dialog closed) does not cancel anything in flight.
    pub async fn run(
        &self,
        request: MintRequest,
        progress: &mpsc::Sender<MintEvent>,
    ) -> Result<MintOutcome, MintError> {
        let (owner, available) = self.validate(&request).await?;

        // -- Uploading: image, then metadata ------------------------------
        let _ = progress.send(MintEvent::Step(MintStep::Uploading));
        let image = self
            .storage
            .submit_asset(
                request.image_bytes.clone(),
                &request.image_content_type,
                &standard_tags(&request.region),
            )
            .await
            .map_err(MintError::ImageUpload)?;

        let metadata = build_metadata(&request, &image.url, &owner, self.config);
        let metadata_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| MintError::Validation(format!("metadata serialization failed: {}", e)))?;
        let metadata_receipt = self
            .storage
            .submit_asset(
                metadata_bytes,
                "application/json",
                &standard_tags(&request.region),
            )
            .await
            .map_err(MintError::MetadataUpload)?;

        // -- Minting -------------------------------------------------------
        let _ = progress.send(MintEvent::Step(MintStep::Minting));
        let receipt = self
            .chain
            .create_asset(CreateAssetRequest {
                metadata_uri: metadata_receipt.url.clone(),
                name: region_asset_name(&request.region),
                symbol: self.config.asset_symbol.clone(),
                royalty_basis_points: self.config.royalty_basis_points,
                creators: vec![Creator { address: owner.clone(), share: 100 }],
            })
            .await
            .map_err(|e| match e {
                ServiceError::WalletRejected => MintError::WalletRejected,
                // The wallet can refuse for fees even after our pre-check
                // passed; report the balance we actually observed there.
                ServiceError::InsufficientFunds => MintError::InsufficientFunds {
                    needed: native_to_lamports(self.config.mint_cost(request.region.cell_count())),
                    available,
                },
                other => MintError::Chain(other),
            })?;

        // -- Saving (best-effort) -----------------------------------------
        let _ = progress.send(MintEvent::Step(MintStep::Saving));
        let record = OwnershipRecord {
            id: Uuid::new_v4(),
            region: request.region,
            owner,
            image_url: image.url,
            metadata_url: metadata_receipt.url,
            tx_signature: receipt.tx_signature,
            external_link: request.external_link,
            created_at: Utc::now(),
        };

        let persisted = match self.records.insert(&record).await {
            Ok(()) => true,
            Err(e) => {
                // The asset is already on chain: report success anyway and
                // leave the mirror to catch up on reconciliation.
                log_err!(
                    "Record persistence failed after successful mint (tx {}): {}",
                    record.tx_signature,
                    e
                );
                false
            }
        };

        Ok(MintOutcome {
            record,
            asset_address: receipt.asset_address,
            persisted,
        })
    }

    /// Synchronous checks plus the wallet balance. Fails fast with a
    /// descriptive reason; none of the sequence's uploads or transactions
    /// happen until everything here passes. Returns the owner address and
    /// the observed balance in lamports.
    async fn validate(&self, request: &MintRequest) -> Result<(String, u64), MintError> {
        if request.image_bytes.is_empty() {
            return Err(MintError::Validation("No image selected".to_string()));
        }
        let Some(owner) = self.chain.address() else {
            return Err(MintError::Validation("No wallet connected".to_string()));
        };

        let cells = request.region.cell_count();
        let needed = native_to_lamports(self.config.mint_cost(cells));
        let available = self
            .chain
            .get_balance(&owner)
            .await
            .map_err(|e| MintError::Validation(format!("balance check failed: {}", e)))?;
        if available < needed {
            return Err(MintError::InsufficientFunds { needed, available });
        }
        Ok((owner, available))
    }
}

fn region_asset_name(region: &Region) -> String {
    format!(
        "Grid {}x{} @ ({},{})",
        region.width(),
        region.height(),
        region.start_x,
        region.start_y
    )
}

fn standard_tags(region: &Region) -> Vec<(String, String)> {
    vec![
        ("App-Name".to_string(), "MintFE".to_string()),
        (
            "Region".to_string(),
            format!("{},{}:{},{}", region.start_x, region.start_y, region.end_x, region.end_y),
        ),
    ]
}

/// Metadata artifact referencing the uploaded image, in the shape the chain
/// tooling expects (name/symbol/image plus region attributes).
fn build_metadata(
    request: &MintRequest,
    image_url: &str,
    owner: &str,
    config: &AppConfig,
) -> serde_json::Value {
    json!({
        "name": region_asset_name(&request.region),
        "symbol": config.asset_symbol,
        "description": "Advertising region on the MintFE pixel grid",
        "image": image_url,
        "external_url": request.external_link,
        "attributes": [
            { "trait_type": "startX", "value": request.region.start_x },
            { "trait_type": "startY", "value": request.region.start_y },
            { "trait_type": "endX", "value": request.region.end_x },
            { "trait_type": "endY", "value": request.region.end_y },
            { "trait_type": "cellCount", "value": request.region.cell_count() },
        ],
        "properties": {
            "creators": [{ "address": owner, "share": 100 }],
        },
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ArtifactReceipt, GridStats, MintReceipt, Result as SvcResult};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeStorage {
        submissions: Mutex<Vec<(Vec<u8>, String)>>,
        fail: AtomicBool,
    }

    impl FakeStorage {
        fn new() -> Self {
            Self { submissions: Mutex::new(Vec::new()), fail: AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn submit_asset(
            &self,
            bytes: Vec<u8>,
            content_type: &str,
            _tags: &[(String, String)],
        ) -> SvcResult<ArtifactReceipt> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ServiceError::Network("gateway unreachable".to_string()));
            }
            let mut subs = self.submissions.lock().unwrap();
            subs.push((bytes, content_type.to_string()));
            let n = subs.len();
            Ok(ArtifactReceipt {
                url: format!("https://perma.example/artifact-{}", n),
                transaction_id: format!("tx-{}", n),
            })
        }

        async fn query_status(&self, _id: &str) -> SvcResult<bool> {
            Ok(true)
        }

        async fn estimate_cost(&self, byte_size: u64) -> SvcResult<u64> {
            Ok(byte_size * 2)
        }
    }

    struct FakeChain {
        connected: bool,
        balance: u64,
        mints: AtomicUsize,
        error: Mutex<Option<ServiceError>>,
    }

    impl FakeChain {
        fn new(balance: u64) -> Self {
            Self { connected: true, balance, mints: AtomicUsize::new(0), error: Mutex::new(None) }
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        fn address(&self) -> Option<String> {
            self.connected.then(|| "FAKEWALLET111".to_string())
        }

        async fn get_balance(&self, _address: &str) -> SvcResult<u64> {
            Ok(self.balance)
        }

        async fn create_asset(&self, _request: CreateAssetRequest) -> SvcResult<MintReceipt> {
            if let Some(e) = self.error.lock().unwrap().clone() {
                return Err(e);
            }
            self.mints.fetch_add(1, Ordering::SeqCst);
            Ok(MintReceipt {
                asset_address: "ASSET111".to_string(),
                tx_signature: "SIG111".to_string(),
            })
        }
    }

    struct FakeRecords {
        inserted: Mutex<Vec<OwnershipRecord>>,
        fail_insert: AtomicBool,
    }

    impl FakeRecords {
        fn new() -> Self {
            Self { inserted: Mutex::new(Vec::new()), fail_insert: AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl RecordStore for FakeRecords {
        async fn all(&self) -> SvcResult<Vec<OwnershipRecord>> {
            Ok(self.inserted.lock().unwrap().clone())
        }
        async fn by_owner(&self, _owner: &str) -> SvcResult<Vec<OwnershipRecord>> {
            Ok(Vec::new())
        }
        async fn containing(&self, _cell: crate::grid::CellCoord) -> SvcResult<Option<OwnershipRecord>> {
            Ok(None)
        }
        async fn overlapping(&self, _region: Region) -> SvcResult<Vec<OwnershipRecord>> {
            Ok(Vec::new())
        }
        async fn records_since(&self, _after: DateTime<Utc>) -> SvcResult<Vec<OwnershipRecord>> {
            Ok(Vec::new())
        }
        async fn insert(&self, record: &OwnershipRecord) -> SvcResult<()> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(ServiceError::Network("record store down".to_string()));
            }
            self.inserted.lock().unwrap().push(record.clone());
            Ok(())
        }
        async fn delete(&self, _id: Uuid) -> SvcResult<()> {
            Ok(())
        }
        async fn stats(&self) -> SvcResult<GridStats> {
            Ok(GridStats::default())
        }
    }

    fn request_2x2() -> MintRequest {
        MintRequest {
            region: Region { start_x: 2, start_y: 3, end_x: 3, end_y: 4 },
            image_bytes: vec![1, 2, 3, 4],
            image_content_type: "image/png".to_string(),
            external_link: Some("https://example.com".to_string()),
        }
    }

    fn pipeline<'a>(
        storage: &'a FakeStorage,
        chain: &'a FakeChain,
        records: &'a FakeRecords,
        config: &'a AppConfig,
    ) -> MintPipeline<'a> {
        MintPipeline { storage, chain, records, config }
    }

    #[tokio::test]
    async fn happy_path_mints_and_persists() {
        let (storage, chain, records) = (FakeStorage::new(), FakeChain::new(u64::MAX), FakeRecords::new());
        let config = AppConfig::default();
        let (tx, rx) = mpsc::channel();

        let outcome = pipeline(&storage, &chain, &records, &config)
            .run(request_2x2(), &tx)
            .await
            .unwrap();

        assert!(outcome.persisted);
        assert_eq!(outcome.record.tx_signature, "SIG111");
        assert_eq!(outcome.record.region.cell_count(), 4);

        // One image artifact, one metadata artifact referencing it.
        let subs = storage.submissions.lock().unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].1, "application/json");
        let meta: serde_json::Value = serde_json::from_slice(&subs[1].0).unwrap();
        assert_eq!(meta["image"], "https://perma.example/artifact-1");

        // Step cursor ran Uploading → Minting → Saving.
        let steps: Vec<_> = rx.try_iter().collect();
        assert!(matches!(steps[0], MintEvent::Step(MintStep::Uploading)));
        assert!(matches!(steps[1], MintEvent::Step(MintStep::Minting)));
        assert!(matches!(steps[2], MintEvent::Step(MintStep::Saving)));

        assert_eq!(records.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_failure_aborts_before_any_mint() {
        let (storage, chain, records) = (FakeStorage::new(), FakeChain::new(u64::MAX), FakeRecords::new());
        storage.fail.store(true, Ordering::SeqCst);
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel();

        let err = pipeline(&storage, &chain, &records, &config)
            .run(request_2x2(), &tx)
            .await
            .unwrap_err();

        assert!(matches!(err, MintError::ImageUpload(_)));
        // The storage error text survives verbatim inside the step prefix.
        assert!(err.to_string().contains("gateway unreachable"));
        assert_eq!(chain.mints.load(Ordering::SeqCst), 0);
        assert!(records.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_still_reports_success() {
        let (storage, chain, records) = (FakeStorage::new(), FakeChain::new(u64::MAX), FakeRecords::new());
        records.fail_insert.store(true, Ordering::SeqCst);
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel();

        let outcome = pipeline(&storage, &chain, &records, &config)
            .run(request_2x2(), &tx)
            .await
            .unwrap();

        assert!(!outcome.persisted);
        assert_eq!(outcome.record.tx_signature, "SIG111");
        assert_eq!(chain.mints.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_rejects_before_any_network_step() {
        let (storage, chain, records) = (FakeStorage::new(), FakeChain::new(u64::MAX), FakeRecords::new());
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel();

        let mut req = request_2x2();
        req.image_bytes.clear();
        let err = pipeline(&storage, &chain, &records, &config)
            .run(req, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::Validation(_)));
        assert!(storage.submissions.lock().unwrap().is_empty());
        assert_eq!(chain.mints.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disconnected_wallet_fails_validation() {
        let (storage, mut chain, records) = (FakeStorage::new(), FakeChain::new(u64::MAX), FakeRecords::new());
        chain.connected = false;
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel();

        let err = pipeline(&storage, &chain, &records, &config)
            .run(request_2x2(), &tx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wallet"));
        assert!(storage.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn balance_below_cost_plus_buffer_is_rejected() {
        // 4 cells × 0.01 + 0.01 buffer = 0.05 native = 50_000_000 lamports.
        let (storage, chain, records) =
            (FakeStorage::new(), FakeChain::new(49_999_999), FakeRecords::new());
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel();

        let err = pipeline(&storage, &chain, &records, &config)
            .run(request_2x2(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MintError::InsufficientFunds { needed: 50_000_000, .. }
        ));
        assert!(storage.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chain_side_insufficient_funds_reports_observed_balance() {
        // Balance passes the pre-check but the wallet still refuses (fees):
        // the error must carry the balance we saw, not a made-up zero.
        let (storage, chain, records) =
            (FakeStorage::new(), FakeChain::new(60_000_000), FakeRecords::new());
        *chain.error.lock().unwrap() = Some(ServiceError::InsufficientFunds);
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel();

        let err = pipeline(&storage, &chain, &records, &config)
            .run(request_2x2(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MintError::InsufficientFunds { needed: 50_000_000, available: 60_000_000 }
        ));
    }

    #[tokio::test]
    async fn wallet_rejection_is_a_distinct_reason() {
        let (storage, chain, records) = (FakeStorage::new(), FakeChain::new(u64::MAX), FakeRecords::new());
        *chain.error.lock().unwrap() = Some(ServiceError::WalletRejected);
        let config = AppConfig::default();
        let (tx, _rx) = mpsc::channel();

        let err = pipeline(&storage, &chain, &records, &config)
            .run(request_2x2(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::WalletRejected));
        assert!(records.inserted.lock().unwrap().is_empty());
    }
}
