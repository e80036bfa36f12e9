use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};

use crate::model::HouseholdId;
use crate::prefs::PrefsHandle;
use crate::store::ItemStore;
use crate::{AppError, AppResult};

pub const HOUSEHOLD_ID_KEY: &str = "householdID";
pub const UNTAGGED_MIGRATION_FLAG: &str = "hasRunMigrationV2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    AlreadyRan,
    Tagged { household: HouseholdId, count: u64 },
}

/// The installation's durable household id.
///
/// The cached value and the preference entry are only ever written while the
/// mutex is held, so racing first callers all observe the same id.
pub struct HouseholdIdentity {
    prefs: PrefsHandle,
    current: Mutex<Option<HouseholdId>>,
}

impl HouseholdIdentity {
    pub fn new(prefs: PrefsHandle) -> Self {
        Self {
            prefs,
            current: Mutex::new(None),
        }
    }

    /// Returns the household id, creating and persisting it on first use.
    pub fn current(&self) -> AppResult<HouseholdId> {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = *guard {
            return Ok(id);
        }

        if let Some(raw) = self.prefs.get_string(HOUSEHOLD_ID_KEY) {
            match raw.parse::<HouseholdId>() {
                Ok(id) => {
                    *guard = Some(id);
                    return Ok(id);
                }
                Err(err) => {
                    warn!(
                        target: "spichr",
                        event = "household_id_unparseable",
                        value = %raw,
                        error = %err
                    );
                }
            }
        }

        let id = HouseholdId::generate();
        self.prefs.set_string(HOUSEHOLD_ID_KEY, &id.to_string());
        self.prefs.persist().map_err(|err| {
            AppError::new(
                "HOUSEHOLD/PERSIST_FAILED",
                "Could not save the household identifier",
            )
            .with_cause(err)
        })?;
        *guard = Some(id);
        info!(target: "spichr", event = "household_id_created", household_id = %id);
        Ok(id)
    }

    /// The id if one exists already; never creates one.
    pub fn peek(&self) -> Option<HouseholdId> {
        let guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        guard.or_else(|| {
            self.prefs
                .get_string(HOUSEHOLD_ID_KEY)
                .and_then(|raw| raw.parse().ok())
        })
    }

    pub fn migration_done(&self) -> bool {
        self.prefs.get_bool(UNTAGGED_MIGRATION_FLAG)
    }

    /// Tags items written before household tagging existed. Runs once per
    /// install; the flag is only set after the rows were updated, so a failed
    /// pass is retried on the next launch.
    pub async fn migrate_untagged(&self, store: &dyn ItemStore) -> AppResult<MigrationOutcome> {
        if self.migration_done() {
            return Ok(MigrationOutcome::AlreadyRan);
        }
        let household = self.current()?;
        let count = store.tag_untagged(household).await?;
        self.prefs.set_bool(UNTAGGED_MIGRATION_FLAG, true);
        self.prefs.persist_best_effort("household_migration_flag_save_failed");
        info!(
            target: "spichr",
            event = "household_untagged_migrated",
            household_id = %household,
            count
        );
        Ok(MigrationOutcome::Tagged { household, count })
    }
}
