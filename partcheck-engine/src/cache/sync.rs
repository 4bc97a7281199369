//! Version check and incremental sync against the remote repository
//!
//! Sync pages through the remote change feed, downloads changed payloads
//! with bounded concurrency and writes the new [`VersionRecord`] only after
//! every page has been processed. An interrupted sync therefore leaves the
//! old version in place and the next check reports the cache as stale.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::local::RenderStatus;
use super::remote::{ChangedPart, RemoteError, RemoteRepository};
use super::{
    CacheEntry, CacheError, CacheKey, CacheKind, CachePayload, CacheTier, HybridCache, SyncStatus,
    VersionRecord,
};

/// Local vs. remote version comparison
#[derive(Debug, Clone, Serialize)]
pub struct VersionCheck {
    pub local: Option<VersionRecord>,
    pub remote: VersionRecord,
    /// True when versions differ or no local record exists
    pub sync_required: bool,
}

/// Summary of one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub from_version: Option<String>,
    pub to_version: String,
    pub pages: usize,
    pub changes: usize,
    /// Payloads fetched from the remote
    pub downloads: usize,
    /// Changes already present locally at the target version
    pub skipped: usize,
    pub ready: usize,
    pub not_rendered: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
struct ChangeOutcome {
    downloads: usize,
    skipped: bool,
    render: Option<RenderStatus>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl HybridCache {
    /// Compare the local version record with the remote one
    pub async fn check_version(&self) -> Result<VersionCheck, CacheError> {
        let remote = self.remote()?;
        let local = self.local.version().await?;

        let remote_record = match remote.version().await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Remote version check failed");
                let message = e.to_string();
                self.update_state(|s| {
                    s.status = SyncStatus::Failed;
                    s.last_error = Some(message);
                })
                .await;
                return Err(e.into());
            }
        };

        let sync_required = local
            .as_ref()
            .map_or(true, |l| l.version != remote_record.version);

        let remote_version = remote_record.version.clone();
        self.update_state(|s| {
            s.remote_version = Some(remote_version);
            if s.status != SyncStatus::Syncing {
                s.status = if sync_required {
                    SyncStatus::Stale
                } else {
                    SyncStatus::UpToDate
                };
            }
        })
        .await;

        debug!(
            local = ?local.as_ref().map(|l| &l.version),
            remote = %remote_record.version,
            sync_required,
            "Version check complete"
        );
        Ok(VersionCheck {
            local,
            remote: remote_record,
            sync_required,
        })
    }

    /// Check the version and sync only if it changed
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, CacheError> {
        let check = self.check_version().await?;
        if !check.sync_required {
            return Ok(SyncReport {
                from_version: check.local.map(|l| l.version),
                to_version: check.remote.version,
                ..Default::default()
            });
        }
        self.sync_incremental(&check.remote, cancel).await
    }

    /// Bring the local tier up to `target`
    ///
    /// Missing or failing remote assets are recorded per key and do not fail
    /// the sync. Change-feed and local-store failures do, leaving the status
    /// `Failed` and the old version record in place.
    pub async fn sync_incremental(
        &self,
        target: &VersionRecord,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, CacheError> {
        let remote = self.remote()?.clone();
        let local_version = self.local.version().await?.map(|r| r.version);

        if local_version.as_deref() == Some(target.version.as_str()) {
            self.update_state(|s| {
                s.status = SyncStatus::UpToDate;
                s.remote_version = Some(target.version.clone());
            })
            .await;
            return Ok(SyncReport {
                from_version: local_version,
                to_version: target.version.clone(),
                ..Default::default()
            });
        }

        self.update_state(|s| s.status = SyncStatus::Syncing).await;
        info!(
            from = ?local_version,
            to = %target.version,
            "Starting incremental sync"
        );

        let mut report = SyncReport {
            from_version: local_version.clone(),
            to_version: target.version.clone(),
            ..Default::default()
        };
        let outcome = self
            .sync_pages(remote.as_ref(), local_version.as_deref(), &mut report, cancel)
            .await;

        // Version record goes last
        let outcome = match outcome {
            Ok(()) => self.local.set_version(target).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.update_state(|s| {
                    s.status = SyncStatus::UpToDate;
                    s.remote_version = Some(target.version.clone());
                    s.last_error = None;
                    s.last_sync = Some(Utc::now());
                })
                .await;
                info!(
                    to = %report.to_version,
                    changes = report.changes,
                    downloads = report.downloads,
                    skipped = report.skipped,
                    not_rendered = report.not_rendered,
                    errors = report.errors,
                    "Incremental sync complete"
                );
                Ok(report)
            }
            Err(CacheError::Cancelled) => {
                warn!(changes = report.changes, "Sync cancelled, cache left stale");
                self.update_state(|s| s.status = SyncStatus::Stale).await;
                Err(CacheError::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "Sync failed, cache left stale");
                let message = e.to_string();
                self.update_state(|s| {
                    s.status = SyncStatus::Failed;
                    s.last_error = Some(message);
                })
                .await;
                Err(e)
            }
        }
    }

    async fn sync_pages(
        &self,
        remote: &dyn RemoteRepository,
        since: Option<&str>,
        report: &mut SyncReport,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let batch_size = self.config.sync_batch_size.max(1);
        let concurrency = self.config.download_concurrency.max(1);
        let mut offset = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let page = remote.changes(since, offset, batch_size).await?;
            report.pages += 1;
            report.changes += page.changes.len();
            debug!(offset, changes = page.changes.len(), "Processing change page");

            let pending: Vec<_> = page
                .changes
                .iter()
                .map(|change| self.apply_change(remote, change))
                .collect();
            let outcomes: Vec<Result<ChangeOutcome, CacheError>> = stream::iter(pending)
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                let outcome = outcome?;
                report.downloads += outcome.downloads;
                if outcome.skipped {
                    report.skipped += 1;
                }
                match outcome.render {
                    Some(RenderStatus::Ready) => report.ready += 1,
                    Some(RenderStatus::NotRendered) => report.not_rendered += 1,
                    Some(RenderStatus::Error) => report.errors += 1,
                    None => {}
                }
            }

            match page.next_offset {
                Some(next) if next > offset && !page.changes.is_empty() => offset = next,
                _ => return Ok(()),
            }
        }
    }

    async fn apply_change(
        &self,
        remote: &dyn RemoteRepository,
        change: &ChangedPart,
    ) -> Result<ChangeOutcome, CacheError> {
        let key = change.key();
        let vectors_key = CacheKey::new(CacheKind::Vectors, key.clone());

        if let Some(existing) = self.local.get(&vectors_key).await? {
            if existing.version == change.version {
                return Ok(ChangeOutcome {
                    skipped: true,
                    ..Default::default()
                });
            }
        }

        let mut outcome = ChangeOutcome::default();

        match remote.fetch_vectors(&key).await {
            Ok(vectors) => {
                outcome.downloads += 1;
                self.store(change, CachePayload::Vectors(vectors)).await?;
            }
            Err(e) => {
                let status = self.record_failure(&key, &e).await?;
                outcome.render = Some(status);
                return Ok(outcome);
            }
        }

        if !change.has_asset {
            self.local
                .set_render_status(&key, RenderStatus::NotRendered, None)
                .await?;
            outcome.render = Some(RenderStatus::NotRendered);
            return Ok(outcome);
        }

        let status = match remote.fetch_asset(&key).await {
            Ok(bytes) => {
                outcome.downloads += 1;
                match &change.sha256 {
                    Some(expected) if !expected.eq_ignore_ascii_case(&sha256_hex(&bytes)) => {
                        warn!(key = %key, "Asset digest mismatch, discarding download");
                        self.local
                            .set_render_status(&key, RenderStatus::Error, Some("digest mismatch"))
                            .await?;
                        RenderStatus::Error
                    }
                    _ => {
                        self.store(change, CachePayload::Asset(bytes)).await?;
                        self.local
                            .set_render_status(&key, RenderStatus::Ready, None)
                            .await?;
                        RenderStatus::Ready
                    }
                }
            }
            Err(e) => self.record_failure(&key, &e).await?,
        };
        outcome.render = Some(status);
        Ok(outcome)
    }

    async fn store(&self, change: &ChangedPart, payload: CachePayload) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: change.key(),
            version: change.version.clone(),
            payload,
            origin: CacheTier::Remote,
            cached_at: Utc::now(),
        };
        self.local.put(&entry).await?;
        // Memory may hold the previous version
        self.memory.remove(&entry.cache_key()).await;
        Ok(())
    }

    async fn record_failure(
        &self,
        key: &crate::types::PartKey,
        error: &RemoteError,
    ) -> Result<RenderStatus, CacheError> {
        let (status, detail) = if error.is_not_found() {
            (RenderStatus::NotRendered, None)
        } else {
            (RenderStatus::Error, Some(error.to_string()))
        };
        debug!(key = %key, status = %status, "Recording render status");
        self.local
            .set_render_status(key, status, detail.as_deref())
            .await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
