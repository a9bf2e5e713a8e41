//! Orphan blob collection.
//!
//! A blob is an orphan when no version row references it: left behind by an
//! upload whose metadata never committed, or by a delete whose blob removal
//! failed after commit. Blobs are listed before the live key set is read, so
//! a blob written in between is either referenced already or younger than
//! the grace cutoff.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::engine::StorageEngine;
use crate::error::EngineResult;
use crate::model::SweepReport;

impl StorageEngine {
    /// Find unreferenced blobs older than the configured grace period and,
    /// unless `dry_run`, delete them.
    pub fn sweep_orphans(&self, dry_run: bool) -> EngineResult<SweepReport> {
        self.sweep_orphans_at(Utc::now(), dry_run)
    }

    pub(crate) fn sweep_orphans_at(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> EngineResult<SweepReport> {
        let cutoff = grace_cutoff(now, self.config().orphan_grace_secs);

        let blobs = self.blobs().list()?;
        let mut tx = self.metadata().begin()?;
        let live = tx.live_storage_keys()?;
        drop(tx);

        let orphans: Vec<_> = blobs
            .iter()
            .filter(|b| b.stored_at <= cutoff && !live.contains(&b.key))
            .map(|b| b.key.clone())
            .collect();

        let mut removed = 0;
        if !dry_run {
            for key in &orphans {
                match self.blobs().delete(key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!(%key, error = %e, "failed to remove orphan blob"),
                }
            }
        }

        info!(
            scanned = blobs.len(),
            orphans = orphans.len(),
            removed,
            dry_run,
            "orphan sweep finished"
        );
        Ok(SweepReport {
            scanned: blobs.len(),
            orphans,
            removed,
            dry_run,
        })
    }
}

fn grace_cutoff(now: DateTime<Utc>, grace_secs: u64) -> DateTime<Utc> {
    let grace = i64::try_from(grace_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    now.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stash_blob::{BlobStore, InMemoryBlobStore};
    use stash_meta::InMemoryMetadataStore;
    use stash_types::StorageKey;

    use crate::config::EngineConfig;

    fn engine(grace_secs: u64) -> (StorageEngine, Arc<InMemoryBlobStore>) {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let meta = Arc::new(InMemoryMetadataStore::new());
        let config = EngineConfig {
            orphan_grace_secs: grace_secs,
            ..EngineConfig::default()
        };
        (StorageEngine::new(blobs.clone(), meta, config), blobs)
    }

    fn aged(blobs: &InMemoryBlobStore, name: &str, age_secs: i64) -> StorageKey {
        let key = StorageKey::generate(name);
        blobs
            .insert_at(key.clone(), b"stale", Utc::now() - TimeDelta::seconds(age_secs))
            .unwrap();
        key
    }

    #[test]
    fn removes_only_old_unreferenced_blobs() {
        let (engine, blobs) = engine(3600);
        let owner = engine.provision_account(Some(1000)).unwrap().id;
        let live = engine
            .ingest(&owner, "keep.txt", "text/plain", b"keep", None)
            .unwrap();
        let old_orphan = aged(&blobs, "old.bin", 7200);
        let fresh_orphan = aged(&blobs, "fresh.bin", 60);

        let report = engine.sweep_orphans(false).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.orphans, vec![old_orphan.clone()]);
        assert_eq!(report.removed, 1);
        assert!(!blobs.exists(&old_orphan).unwrap());
        assert!(blobs.exists(&fresh_orphan).unwrap());
        assert!(blobs.exists(&live.version.storage_key).unwrap());
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let (engine, blobs) = engine(0);
        let orphan = aged(&blobs, "x", 10);

        let report = engine.sweep_orphans(true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.orphans, vec![orphan.clone()]);
        assert_eq!(report.removed, 0);
        assert!(blobs.exists(&orphan).unwrap());
    }

    #[test]
    fn superseded_versions_are_not_orphans() {
        let (engine, blobs) = engine(0);
        let owner = engine.provision_account(Some(1000)).unwrap().id;
        let f = engine.ingest(&owner, "a", "text/plain", b"v1", None).unwrap();
        engine
            .ingest_new_version(&f.file_id, &owner, "a", "text/plain", b"v2")
            .unwrap();

        let report = engine.sweep_orphans_at(Utc::now() + TimeDelta::seconds(1), false).unwrap();
        assert!(report.orphans.is_empty());
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn collects_blobs_left_by_failed_delete() {
        let (engine, blobs) = engine(0);
        let owner = engine.provision_account(Some(1000)).unwrap().id;
        let f = engine.ingest(&owner, "a", "text/plain", b"abc", None).unwrap();

        blobs.set_read_only(true);
        let report = engine.delete(&f.file_id, &owner).unwrap();
        blobs.set_read_only(false);
        assert_eq!(report.blob_failures.len(), 1);

        let sweep = engine.sweep_orphans_at(Utc::now() + TimeDelta::seconds(1), false).unwrap();
        assert_eq!(sweep.orphans, vec![f.version.storage_key]);
        assert!(blobs.is_empty());
    }

    #[test]
    fn cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(grace_cutoff(now, 0), now);
        assert_eq!(grace_cutoff(now, 60), now - TimeDelta::seconds(60));
        assert_eq!(grace_cutoff(now, u64::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
