use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::model::HouseholdId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "count", rename_all = "snake_case")]
pub enum RecordCount {
    Counted(u64),
    /// The query failed; shown as -1.
    Unavailable,
}

impl RecordCount {
    pub fn is_zero(&self) -> bool {
        matches!(self, RecordCount::Counted(0))
    }
}

impl fmt::Display for RecordCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordCount::Counted(n) => write!(f, "{n}"),
            RecordCount::Unavailable => f.write_str("-1"),
        }
    }
}

/// Read-only snapshot of remote record counts and cached sharing state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Utc>,
    pub app_version: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
    pub household_id: Option<HouseholdId>,
    pub cached_keys: BTreeMap<String, Value>,
    pub record_counts: Vec<(String, RecordCount)>,
    pub local_items: Option<u64>,
    pub local_share_references: Option<u64>,
}

impl DiagnosticReport {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            app_version: env!("CARGO_PKG_VERSION"),
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            household_id: None,
            cached_keys: BTreeMap::new(),
            record_counts: Vec::new(),
            local_items: None,
            local_share_references: None,
        }
    }

    pub fn count_for(&self, record_type: &str) -> Option<RecordCount> {
        self.record_counts
            .iter()
            .find(|(name, _)| name == record_type)
            .map(|(_, count)| *count)
    }

    /// No remote records, no shares and no cached sharing keys.
    pub fn is_clean(&self) -> bool {
        self.cached_keys.is_empty() && self.record_counts.iter().all(|(_, c)| c.is_zero())
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Sharing Diagnostic Report ===")?;
        writeln!(
            f,
            "generated: {}",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(f, "version: {} ({}/{})", self.app_version, self.platform, self.arch)?;
        match &self.household_id {
            Some(id) => writeln!(f, "household: {id}")?,
            None => writeln!(f, "household: (none)")?,
        }
        writeln!(f)?;
        writeln!(f, "Cached sharing keys:")?;
        if self.cached_keys.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (key, value) in &self.cached_keys {
            writeln!(f, "  {key}: {value}")?;
        }
        writeln!(f)?;
        writeln!(f, "Record counts:")?;
        for (record_type, count) in &self.record_counts {
            writeln!(f, "  {record_type}: {count}")?;
        }
        if let Some(items) = self.local_items {
            writeln!(f)?;
            writeln!(f, "Local items: {items}")?;
        }
        if let Some(refs) = self.local_share_references {
            writeln!(f, "Local share references: {refs}")?;
        }
        Ok(())
    }
}
