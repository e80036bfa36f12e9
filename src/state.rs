use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::accept::AcceptanceHandler;
use crate::cleanup::{CacheResetOutcome, CleanupEngine};
use crate::config::AppConfig;
use crate::db;
use crate::household::{HouseholdIdentity, MigrationOutcome};
use crate::inventory::InventoryService;
use crate::migrate::apply_migrations;
use crate::notify::{NotificationHost, NotificationScheduler};
use crate::prefs::PrefsHandle;
use crate::profile::HouseholdProfile;
use crate::remote::RemoteStore;
use crate::share::{ShareError, ShareOrchestrator};
use crate::store::{ItemStore, SqliteItemStore};
use crate::time::LocalCalendar;
use crate::AppResult;

/// The contended household state: identity and the share in-flight flag.
/// One instance per process, created at startup and passed around explicitly.
pub struct HouseholdContext {
    pub identity: Arc<HouseholdIdentity>,
    pub profile: Arc<HouseholdProfile>,
    share_in_flight: Arc<AtomicBool>,
}

impl HouseholdContext {
    pub fn new(prefs: PrefsHandle) -> Self {
        Self {
            identity: Arc::new(HouseholdIdentity::new(prefs.clone())),
            profile: Arc::new(HouseholdProfile::load(prefs)),
            share_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn begin_share(&self) -> Result<ShareFlightGuard, ShareError> {
        ShareFlightGuard::begin(self.share_in_flight.clone())
    }

    pub fn share_in_flight(&self) -> bool {
        self.share_in_flight.load(Ordering::SeqCst)
    }
}

/// Held for the duration of a share operation; released on drop, including
/// when the operation bails out early.
pub struct ShareFlightGuard {
    flag: Arc<AtomicBool>,
}

impl ShareFlightGuard {
    fn begin(flag: Arc<AtomicBool>) -> Result<Self, ShareError> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ShareError::AlreadyInProgress);
        }
        Ok(Self { flag })
    }
}

impl Drop for ShareFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub migration: MigrationOutcome,
    pub cache_reset: CacheResetOutcome,
}

/// Everything a front end needs, wired once.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub prefs: PrefsHandle,
    pub household: Arc<HouseholdContext>,
    pub store: Arc<SqliteItemStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub notifications: Arc<NotificationScheduler>,
}

impl AppContext {
    /// On-disk database and preferences under the configured data dir.
    pub async fn open(
        config: AppConfig,
        remote: Arc<dyn RemoteStore>,
        host: Arc<dyn NotificationHost>,
    ) -> AppResult<Self> {
        let pool = db::open_sqlite_pool(&config.db_path()).await?;
        apply_migrations(&pool).await?;
        let prefs = PrefsHandle::json_file(config.prefs_path())?;
        Ok(Self::assemble(config, prefs, pool, remote, host))
    }

    /// Fully in-memory; nothing touches the filesystem.
    pub async fn in_memory(
        config: AppConfig,
        remote: Arc<dyn RemoteStore>,
        host: Arc<dyn NotificationHost>,
    ) -> AppResult<Self> {
        let pool = db::open_memory_pool().await?;
        apply_migrations(&pool).await?;
        Ok(Self::assemble(
            config,
            PrefsHandle::in_memory(),
            pool,
            remote,
            host,
        ))
    }

    fn assemble(
        config: AppConfig,
        prefs: PrefsHandle,
        pool: sqlx::SqlitePool,
        remote: Arc<dyn RemoteStore>,
        host: Arc<dyn NotificationHost>,
    ) -> Self {
        let household = Arc::new(HouseholdContext::new(prefs.clone()));
        let store = Arc::new(SqliteItemStore::new(pool, household.identity.clone()));
        let calendar = LocalCalendar::new(config.resolve_timezone());
        let notifications = Arc::new(NotificationScheduler::new(
            host,
            calendar,
            config.notifications.clone(),
        ));
        Self {
            config: Arc::new(config),
            prefs,
            household,
            store,
            remote,
            notifications,
        }
    }

    pub fn item_store(&self) -> Arc<dyn ItemStore> {
        self.store.clone()
    }

    pub fn inventory(&self) -> InventoryService {
        InventoryService::new(
            self.item_store(),
            self.notifications.clone(),
            self.config.notifications.summary_window_days,
        )
    }

    pub fn orchestrator(&self) -> ShareOrchestrator {
        ShareOrchestrator::new(
            self.household.clone(),
            self.item_store(),
            self.remote.clone(),
            self.config.sharing.clone(),
        )
    }

    pub fn acceptance(&self) -> AcceptanceHandler {
        AcceptanceHandler::new(
            self.household.clone(),
            self.remote.clone(),
            self.config.sharing.clone(),
        )
    }

    pub fn cleanup(&self) -> CleanupEngine {
        CleanupEngine::new(
            self.household.clone(),
            self.item_store(),
            self.remote.clone(),
            self.prefs.clone(),
            self.config.cleanup.clone(),
        )
    }

    /// Once-per-install housekeeping: tag legacy items, drop stale share caches.
    pub async fn startup(&self) -> AppResult<StartupReport> {
        let migration = self
            .household
            .identity
            .migrate_untagged(self.store.as_ref())
            .await?;
        let cache_reset = self.cleanup().reset_sharing_cache_once();
        info!(
            target: "spichr",
            event = "startup_complete",
            migration = ?migration,
            cache_reset = ?cache_reset
        );
        Ok(StartupReport {
            migration,
            cache_reset,
        })
    }
}
