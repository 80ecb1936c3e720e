//! REST client for the hosted record store plus the realtime insert channel.
//!
//! The store enforces the no-overlap invariant at write time (a conflicting
//! insert comes back 409). The realtime channel is modelled as a polling
//! task over `created_after`, delivering fresh inserts to the UI thread over
//! a plain `mpsc` channel — the same discipline the rest of the app uses for
//! background results.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{GridStats, RecordStore, Result, ServiceError};
use crate::grid::{CellCoord, OwnershipRecord, Region};

pub struct RestRecordStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestRecordStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn fetch_records(&self, req: reqwest::RequestBuilder) -> Result<Vec<OwnershipRecord>> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected(format!(
                "record store returned {}: {}",
                status, body
            )));
        }
        resp.json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn all(&self) -> Result<Vec<OwnershipRecord>> {
        self.fetch_records(self.get("/records")).await
    }

    async fn by_owner(&self, owner: &str) -> Result<Vec<OwnershipRecord>> {
        self.fetch_records(self.get("/records").query(&[("owner", owner)]))
            .await
    }

    async fn containing(&self, cell: CellCoord) -> Result<Option<OwnershipRecord>> {
        let records = self
            .fetch_records(
                self.get("/records/containing")
                    .query(&[("x", cell.x), ("y", cell.y)]),
            )
            .await?;
        // Records never overlap, so at most one can contain the cell.
        Ok(records.into_iter().next())
    }

    async fn overlapping(&self, region: Region) -> Result<Vec<OwnershipRecord>> {
        self.fetch_records(self.get("/records/overlap").query(&[
            ("startX", region.start_x),
            ("startY", region.start_y),
            ("endX", region.end_x),
            ("endY", region.end_y),
        ]))
        .await
    }

    async fn records_since(&self, after: DateTime<Utc>) -> Result<Vec<OwnershipRecord>> {
        self.fetch_records(
            self.get("/records")
                .query(&[("created_after", after.to_rfc3339())]),
        )
        .await
    }

    async fn insert(&self, record: &OwnershipRecord) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/records", self.base_url))
            .bearer_auth(&self.api_key)
            .json(record)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected(format!(
                "region overlaps an existing record: {}",
                body
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected(format!(
                "record store returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/records/{}", self.base_url, id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ServiceError::Rejected(format!(
                "record store returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn stats(&self) -> Result<GridStats> {
        let resp = self.get("/records/stats").send().await?;
        if !resp.status().is_success() {
            return Err(ServiceError::Rejected(format!(
                "record store returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

// ============================================================================
// REALTIME INSERT CHANNEL
// ============================================================================

/// Start the insert watcher on the worker runtime. New records land on the
/// returned receiver; the UI polls it with `try_recv()` each frame. The task
/// stops on its own once the receiver is dropped.
pub fn spawn_insert_watcher(
    handle: &tokio::runtime::Handle,
    store: Arc<dyn RecordStore>,
    poll_secs: u64,
) -> mpsc::Receiver<OwnershipRecord> {
    let (sender, receiver) = mpsc::channel();
    let interval = Duration::from_secs(poll_secs.max(1));

    handle.spawn(async move {
        let mut cursor = Utc::now();
        loop {
            tokio::time::sleep(interval).await;
            match store.records_since(cursor).await {
                Ok(records) => {
                    for rec in records {
                        cursor = cursor.max(rec.created_at);
                        if sender.send(rec).is_err() {
                            return; // receiver dropped — app shut the channel
                        }
                    }
                }
                Err(e) => {
                    // Transient poll failures are expected (offline, etc.) —
                    // log and keep the cursor so nothing is skipped.
                    log_warn!("Record watcher poll failed: {}", e);
                }
            }
        }
    });

    receiver
}
