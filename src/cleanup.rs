//! Detection and repair of references that no longer resolve, plus the
//! destructive reset and the diagnostic report.
//!
//! Only a definite "not found" marks something orphaned. A transient failure
//! while resolving leaves the target alone and reports it as unresolved.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::CleanupConfig;
use crate::confirm::{Confirmation, DestructiveAction, Reversibility};
use crate::diagnostics::{DiagnosticReport, RecordCount};
use crate::model::RecordId;
use crate::prefs::PrefsHandle;
use crate::remote::{RemoteError, RemoteRecord, RemoteResult, RemoteStore, SHARE_RECORD_TYPE};
use crate::state::HouseholdContext;
use crate::store::{ItemFilter, ItemSort, ItemStore};
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const CACHE_RESET_FLAG: &str = "sharing_cache_reset_v2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrphanRecord {
    /// A share whose root record is gone.
    Share {
        share: RecordId,
        root: Option<RecordId>,
    },
    /// A record whose parent no longer resolves.
    Reference {
        record: RemoteRecord,
        missing_parent: RecordId,
    },
}

impl OrphanRecord {
    pub fn target(&self) -> &RecordId {
        match self {
            OrphanRecord::Share { share, .. } => share,
            OrphanRecord::Reference { record, .. } => &record.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Deleted,
    /// Already deleted by someone else; counts as success.
    AlreadyGone,
    ReferenceCleared,
    Failed(String),
}

impl CleanupOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, CleanupOutcome::Failed(_))
    }

    fn from_delete(result: RemoteResult<()>) -> Self {
        match result {
            Ok(()) => CleanupOutcome::Deleted,
            Err(RemoteError::NotFound(_)) => CleanupOutcome::AlreadyGone,
            Err(err) => CleanupOutcome::Failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanScan {
    pub scanned: usize,
    pub orphans: Vec<OrphanRecord>,
    /// Targets whose check failed for another reason; left untouched.
    pub unresolved: Vec<(RecordId, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceCleanup {
    pub record_type: String,
    pub scan: OrphanScan,
    pub results: Vec<(RecordId, CleanupOutcome)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareCleanup {
    pub scan: OrphanScan,
    pub results: Vec<(RecordId, CleanupOutcome)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub shares: Result<ShareCleanup, String>,
    pub references: Vec<(String, Result<ReferenceCleanup, String>)>,
    pub local_references_cleared: Result<u64, String>,
    pub cache_keys_cleared: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub records: Vec<(String, Result<Vec<(RecordId, CleanupOutcome)>, String>)>,
    pub shares: Result<Vec<(RecordId, CleanupOutcome)>, String>,
    pub local_references_cleared: Result<u64, String>,
    pub cache_keys_cleared: Vec<String>,
    pub reversibility: Reversibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickFixReport {
    pub references: Result<ReferenceCleanup, String>,
    pub cache_keys_cleared: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CacheResetOutcome {
    AlreadyDone,
    Cleared { keys: Vec<String> },
}

pub struct CleanupEngine {
    household: Arc<HouseholdContext>,
    store: Arc<dyn ItemStore>,
    remote: Arc<dyn RemoteStore>,
    prefs: PrefsHandle,
    config: CleanupConfig,
}

impl CleanupEngine {
    pub fn new(
        household: Arc<HouseholdContext>,
        store: Arc<dyn ItemStore>,
        remote: Arc<dyn RemoteStore>,
        prefs: PrefsHandle,
        config: CleanupConfig,
    ) -> Self {
        Self {
            household,
            store,
            remote,
            prefs,
            config,
        }
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Shares whose root record is missing.
    pub async fn scan_orphaned_shares(&self) -> AppResult<OrphanScan> {
        let shares = self.remote.list_shares().await?;
        let checks = shares.iter().map(|share| async move {
            let verdict = match &share.root_record {
                None => Err(None),
                Some(root) => match self.remote.fetch_record(root).await {
                    Ok(_) => Ok(()),
                    Err(err) if err.is_not_found() => Err(None),
                    Err(err) => Err(Some(err.to_string())),
                },
            };
            (share, verdict)
        });

        let mut scan = OrphanScan {
            scanned: shares.len(),
            ..OrphanScan::default()
        };
        for (share, verdict) in join_all(checks).await {
            match verdict {
                Ok(()) => {}
                Err(None) => scan.orphans.push(OrphanRecord::Share {
                    share: share.id.clone(),
                    root: share.root_record.clone(),
                }),
                Err(Some(reason)) => scan.unresolved.push((share.id.clone(), reason)),
            }
        }
        info!(
            target: "spichr",
            event = "cleanup_share_scan",
            scanned = scan.scanned,
            orphans = scan.orphans.len(),
            unresolved = scan.unresolved.len()
        );
        Ok(scan)
    }

    /// Deletes in batches that run concurrently; one result per share.
    pub async fn delete_orphaned_shares(
        &self,
        orphans: &[OrphanRecord],
    ) -> Vec<(RecordId, CleanupOutcome)> {
        let ids: Vec<RecordId> = orphans
            .iter()
            .filter_map(|orphan| match orphan {
                OrphanRecord::Share { share, .. } => Some(share.clone()),
                OrphanRecord::Reference { .. } => None,
            })
            .collect();
        let results = self.delete_in_batches(&ids).await;
        let failed = results.iter().filter(|(_, o)| !o.is_success()).count();
        info!(
            target: "spichr",
            event = "cleanup_shares_deleted",
            attempted = ids.len(),
            failed
        );
        results
    }

    async fn delete_in_batches(&self, ids: &[RecordId]) -> Vec<(RecordId, CleanupOutcome)> {
        let batches = ids
            .chunks(self.batch_size())
            .map(|batch| self.remote.delete_records(batch));
        join_all(batches)
            .await
            .into_iter()
            .flatten()
            .map(|(id, result)| (id, CleanupOutcome::from_delete(result)))
            .collect()
    }

    /// Finds records of `record_type` whose parent is gone and saves them
    /// back without the parent. Nothing is deleted.
    pub async fn scan_orphaned_record_references(
        &self,
        record_type: &str,
    ) -> AppResult<ReferenceCleanup> {
        let records = self.remote.query(record_type).await?;
        let mut scan = OrphanScan {
            scanned: records.len(),
            ..OrphanScan::default()
        };

        let parents: BTreeSet<RecordId> =
            records.iter().filter_map(|r| r.parent.clone()).collect();
        let lookups = parents.into_iter().map(|parent| async move {
            let verdict = self.remote.fetch_record(&parent).await.map(|_| ());
            (parent, verdict)
        });
        let verdicts: HashMap<RecordId, RemoteResult<()>> =
            join_all(lookups).await.into_iter().collect();

        let mut repaired = Vec::new();
        for record in records {
            let Some(parent) = record.parent.clone() else {
                continue;
            };
            match verdicts.get(&parent) {
                Some(Ok(())) | None => {}
                Some(Err(RemoteError::NotFound(_))) => {
                    let mut detached = record.clone();
                    detached.parent = None;
                    repaired.push(detached);
                    scan.orphans.push(OrphanRecord::Reference {
                        record,
                        missing_parent: parent,
                    });
                }
                Some(Err(err)) => scan.unresolved.push((record.id.clone(), err.to_string())),
            }
        }

        let batches = repaired
            .chunks(self.batch_size())
            .map(|batch| self.remote.save_records(batch));
        let results: Vec<(RecordId, CleanupOutcome)> = join_all(batches)
            .await
            .into_iter()
            .flatten()
            .map(|(id, result)| {
                let outcome = match result {
                    Ok(()) => CleanupOutcome::ReferenceCleared,
                    Err(err) => CleanupOutcome::Failed(err.to_string()),
                };
                (id, outcome)
            })
            .collect();

        info!(
            target: "spichr",
            event = "cleanup_reference_scan",
            record_type,
            scanned = scan.scanned,
            orphans = scan.orphans.len(),
            unresolved = scan.unresolved.len()
        );
        Ok(ReferenceCleanup {
            record_type: record_type.to_string(),
            scan,
            results,
        })
    }

    /// Clears local `share_reference`s pointing at shares that no longer exist.
    pub async fn repair_local_share_references(&self) -> AppResult<u64> {
        let filter = ItemFilter {
            has_share_reference: Some(true),
            ..ItemFilter::default()
        };
        let items = self.store.fetch(&filter, ItemSort::Name).await?;
        let mut known: HashMap<RecordId, bool> = HashMap::new();
        let mut cleared = 0;
        for item in items {
            let Some(reference) = item.share_reference.clone() else {
                continue;
            };
            let missing = match known.get(&reference) {
                Some(missing) => *missing,
                None => {
                    let missing = match self.remote.fetch_share(&reference).await {
                        Ok(_) => false,
                        Err(err) if err.is_not_found() => true,
                        Err(err) => {
                            warn!(
                                target: "spichr",
                                event = "cleanup_local_reference_unresolved",
                                share = %reference,
                                error = %err
                            );
                            false
                        }
                    };
                    known.insert(reference.clone(), missing);
                    missing
                }
            };
            if missing {
                match self.store.set_share_reference(item.id, None).await {
                    Ok(_) => cleared += 1,
                    // Deleted locally while the share was being resolved.
                    Err(err) if err.has_code(AppError::NOT_FOUND_CODE) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(cleared)
    }

    /// Shares, then record references type by type, then local state. A
    /// failing phase is reported and the next one still runs. Refused while a
    /// share operation is in flight.
    pub async fn perform_full_cleanup(&self) -> AppResult<CleanupReport> {
        let _flight = self.household.begin_share()?;
        info!(target: "spichr", event = "cleanup_full_start");
        let shares = match self.scan_orphaned_shares().await {
            Ok(scan) => {
                let results = self.delete_orphaned_shares(&scan.orphans).await;
                Ok(ShareCleanup { scan, results })
            }
            Err(err) => {
                warn!(target: "spichr", event = "cleanup_share_phase_failed", error = %err);
                Err(err.to_string())
            }
        };

        let mut references = Vec::with_capacity(self.config.reference_record_types.len());
        for record_type in &self.config.reference_record_types {
            let outcome = self
                .scan_orphaned_record_references(record_type)
                .await
                .map_err(|err| {
                    warn!(
                        target: "spichr",
                        event = "cleanup_reference_phase_failed",
                        record_type = %record_type,
                        error = %err
                    );
                    err.to_string()
                });
            references.push((record_type.clone(), outcome));
        }

        let local_references_cleared = self
            .repair_local_share_references()
            .await
            .map_err(|err| err.to_string());
        let cache_keys_cleared = self.household.profile.clear_sharing_cache();
        info!(target: "spichr", event = "cleanup_full_complete");

        Ok(CleanupReport {
            shares,
            references,
            local_references_cleared,
            cache_keys_cleared,
        })
    }

    /// Deletes every record of every configured type and every share, then all
    /// local sharing state. Never runs without a matching confirmation.
    pub async fn perform_nuclear_reset(&self, confirmation: &Confirmation) -> AppResult<ResetReport> {
        confirmation.require(DestructiveAction::NuclearReset)?;
        let _flight = self.household.begin_share()?;
        warn!(target: "spichr", event = "nuclear_reset_start");

        let mut records = Vec::with_capacity(self.config.reset_record_types.len());
        for record_type in &self.config.reset_record_types {
            let outcome = match self.remote.query(record_type).await {
                Ok(found) => {
                    let ids: Vec<RecordId> = found.into_iter().map(|r| r.id).collect();
                    Ok(self.delete_in_batches(&ids).await)
                }
                Err(err) => {
                    warn!(
                        target: "spichr",
                        event = "nuclear_reset_query_failed",
                        record_type = %record_type,
                        error = %err
                    );
                    Err(err.to_string())
                }
            };
            records.push((record_type.clone(), outcome));
        }

        let shares = match self.remote.query(SHARE_RECORD_TYPE).await {
            Ok(found) => {
                let ids: Vec<RecordId> = found.into_iter().map(|r| r.id).collect();
                Ok(self.delete_in_batches(&ids).await)
            }
            Err(err) => Err(err.to_string()),
        };

        let cache_keys_cleared = self.household.profile.clear_sharing_cache();
        let local_references_cleared = self
            .store
            .clear_share_references()
            .await
            .map_err(|err| err.to_string());
        warn!(target: "spichr", event = "nuclear_reset_complete");

        Ok(ResetReport {
            records,
            shares,
            local_references_cleared,
            cache_keys_cleared,
            reversibility: DestructiveAction::NuclearReset.reversibility(),
        })
    }

    pub async fn generate_diagnostic_report(&self) -> DiagnosticReport {
        let mut report = DiagnosticReport::new(crate::time::to_date(now_ms()));
        report.household_id = self.household.identity.peek();
        report.cached_keys = self.household.profile.cached_keys();

        let mut types = self.config.diagnostic_record_types.clone();
        types.push(SHARE_RECORD_TYPE.to_string());
        for record_type in types {
            let count = match self.remote.query(&record_type).await {
                Ok(found) => RecordCount::Counted(found.len() as u64),
                Err(err) => {
                    warn!(
                        target: "spichr",
                        event = "diagnostics_count_failed",
                        record_type = %record_type,
                        error = %err
                    );
                    RecordCount::Unavailable
                }
            };
            report.record_counts.push((record_type, count));
        }

        report.local_items = self.store.count(&ItemFilter::default()).await.ok();
        report.local_share_references = self
            .store
            .count(&ItemFilter {
                has_share_reference: Some(true),
                ..ItemFilter::default()
            })
            .await
            .ok();
        report
    }

    /// Repairs the household record type only, then drops the sharing cache.
    /// Refused while a share operation is in flight.
    pub async fn quick_fix_orphaned_share_error(&self) -> AppResult<QuickFixReport> {
        let _flight = self.household.begin_share()?;
        let household_type = self.config.household_record_type.clone();
        let references = self
            .scan_orphaned_record_references(&household_type)
            .await
            .map_err(|err: AppError| err.to_string());
        let cache_keys_cleared = self.household.profile.clear_sharing_cache();
        Ok(QuickFixReport {
            references,
            cache_keys_cleared,
        })
    }

    /// Clears cached sharing state the first time this install starts.
    pub fn reset_sharing_cache_once(&self) -> CacheResetOutcome {
        if self.prefs.get_bool(CACHE_RESET_FLAG) {
            return CacheResetOutcome::AlreadyDone;
        }
        let keys = self.household.profile.clear_sharing_cache();
        self.prefs.set_bool(CACHE_RESET_FLAG, true);
        self.prefs.persist_best_effort("cache_reset_flag_save_failed");
        CacheResetOutcome::Cleared { keys }
    }
}
