use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{AppError, AppResult};

pub const APP_IDENTIFIER: &str = "com.de.SkerskiDev.Spichr";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const PREFS_FILE_NAME: &str = "preferences.json";
pub const DB_FILE_NAME: &str = "spichr.sqlite3";

pub const DATA_DIR_ENV: &str = "SPICHR_DATA_DIR";
pub const TZ_ENV: &str = "SPICHR_TZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour.min(23), self.minute.min(59), 0).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub daily_summary_enabled: bool,
    pub expiring_in_30_days_enabled: bool,
    pub expiring_in_7_days_enabled: bool,
    pub expiring_in_1_day_enabled: bool,
    pub expiring_today_enabled: bool,
    pub opened_items_enabled: bool,
    pub daily_summary_time: TimeOfDay,
    /// Local time of the reminder on the expiry day itself.
    pub due_today_time: TimeOfDay,
    /// Horizon for the summary body and the badge count.
    pub summary_window_days: i64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            daily_summary_enabled: true,
            expiring_in_30_days_enabled: true,
            expiring_in_7_days_enabled: true,
            expiring_in_1_day_enabled: true,
            expiring_today_enabled: true,
            opened_items_enabled: true,
            daily_summary_time: TimeOfDay::new(9, 0),
            due_today_time: TimeOfDay::new(9, 0),
            summary_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub share_title: String,
    pub share_type: String,
    /// Host of invitation deep links.
    pub invitation_host: String,
    /// Path segment that marks a link as a share invitation.
    pub invitation_path_segment: String,
    pub placeholder_name: String,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            share_title: "Spichr Household".into(),
            share_type: "com.de.SkerskiDev.FoodGuard.household".into(),
            invitation_host: "www.icloud.com".into(),
            invitation_path_segment: "share".into(),
            placeholder_name: "Shared Household".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub batch_size: usize,
    /// Types whose parent references are checked during a full cleanup.
    pub reference_record_types: Vec<String>,
    /// Types wiped by a nuclear reset.
    pub reset_record_types: Vec<String>,
    /// Types counted in the diagnostic report (shares are always counted).
    pub diagnostic_record_types: Vec<String>,
    pub household_record_type: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            batch_size: 100,
            reference_record_types: names(&["Household", "SharedHousehold", "FoodItem"]),
            reset_record_types: names(&[
                "Household",
                "SharedHousehold",
                "FoodItem",
                "FoodGuardList",
                "SpichrInventory",
                "Users",
            ]),
            diagnostic_record_types: names(&["Household", "SharedHousehold", "FoodItem"]),
            household_record_type: "Household".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// IANA zone name; the system zone is used when absent.
    pub timezone: Option<String>,
    pub notifications: NotificationSettings,
    pub sharing: SharingConfig,
    pub cleanup: CleanupConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            timezone: None,
            notifications: NotificationSettings::default(),
            sharing: SharingConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let base = dirs::data_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(env::temp_dir);
    base.join(APP_IDENTIFIER)
}

impl AppConfig {
    /// Reads `config.json` from the data dir when present, then applies env overrides.
    pub fn load() -> AppResult<Self> {
        let data_dir = default_data_dir();
        let mut config = Self::load_from(&data_dir.join(CONFIG_FILE_NAME))?;
        config.data_dir = data_dir;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => {
                let config: AppConfig = serde_json::from_str(&raw).map_err(|err| {
                    AppError::from(err).with_context("path", path.display().to_string())
                })?;
                info!(target: "spichr", event = "config_loaded", path = %path.display());
                Ok(config)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(AppError::from(err).with_context("path", path.display().to_string())),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(tz) = env::var(TZ_ENV) {
            if !tz.trim().is_empty() {
                self.timezone = Some(tz);
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join(PREFS_FILE_NAME)
    }

    /// Configured zone, else the system zone, else UTC.
    pub fn resolve_timezone(&self) -> Tz {
        if let Some(name) = self.timezone.as_deref() {
            match name.parse::<Tz>() {
                Ok(tz) => return tz,
                Err(_) => warn!(
                    target: "spichr",
                    event = "config_timezone_invalid",
                    timezone = %name
                ),
            }
        }
        iana_time_zone::get_timezone()
            .ok()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC)
    }
}
